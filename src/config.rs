//! Configuration management
//!
//! Loads the TOML configuration once at startup, layers `WIFIKEEPER__*`
//! environment overrides on top, and validates the result. Any failure here
//! is fatal; the monitor loop only ever sees a validated `Config`.

use crate::models::PortalFormData;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "WIFIKEEPER";

/// Root configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Loop pacing and backoff
    #[serde(default)]
    pub global: GlobalConfig,

    /// Wireless network to keep joined
    #[serde(default)]
    pub network: NetworkConfig,

    /// Portal login settings
    #[serde(default)]
    pub portal: PortalConfig,

    /// Connectivity probe endpoints
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Headless browser settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Global daemon settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GlobalConfig {
    /// Wall-clock period between probes, in milliseconds
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Pause after a join or an authentication attempt
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Long pause once `max_failures` is exceeded
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Consecutive ONLINE checks before quiet mode
    #[serde(default = "default_quiet_after")]
    pub quiet_after: u32,

    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            settle_secs: default_settle_secs(),
            cooldown_secs: default_cooldown_secs(),
            quiet_after: default_quiet_after(),
            max_failures: default_max_failures(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    #[serde(default)]
    pub ssid: String,

    /// Omit for open networks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Wireless interface, e.g. "wlan0" (auto-detected if empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: None,
            interface: None,
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PortalConfig {
    /// Login page of the portal; tried before the generic triggers
    #[serde(default)]
    pub auth_url: String,

    #[serde(default)]
    pub id_number: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    #[serde(default)]
    pub birth_year: String,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Pause after submitting the form, before the browser is closed
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    #[serde(default = "default_keystroke_delay_ms")]
    pub keystroke_delay_ms: u64,

    /// Additional trigger URLs tried after the built-in ones
    #[serde(default)]
    pub extra_candidates: Vec<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            id_number: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            birth_year: String::new(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            settle_secs: default_settle_secs(),
            keystroke_delay_ms: default_keystroke_delay_ms(),
            extra_candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProbeConfig {
    /// Expected to answer 204 with an empty body
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    /// Expected to answer with `fallback_marker` in the body
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,

    #[serde(default = "default_fallback_marker")]
    pub fallback_marker: String,

    /// Request timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            fallback_url: default_fallback_url(),
            fallback_marker: default_fallback_marker(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome/Chromium binary (auto-detected if empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,

    #[serde(default)]
    pub no_sandbox: bool,

    /// Capture full-page screenshots around the form submission
    #[serde(default = "default_true")]
    pub snapshots: bool,

    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Page events kept between drains
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            no_sandbox: false,
            snapshots: true,
            snapshot_dir: default_snapshot_dir(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

// Default value functions
fn default_check_interval_ms() -> u64 {
    5_000
}

fn default_settle_secs() -> u64 {
    8
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_quiet_after() -> u32 {
    3
}

fn default_max_failures() -> u32 {
    3
}

fn default_join_timeout_secs() -> u64 {
    30
}

fn default_navigation_timeout_secs() -> u64 {
    15
}

fn default_keystroke_delay_ms() -> u64 {
    60
}

fn default_primary_url() -> String {
    "http://connectivitycheck.gstatic.com/generate_204".to_string()
}

fn default_fallback_url() -> String {
    "http://detectportal.firefox.com/success.txt".to_string()
}

fn default_fallback_marker() -> String {
    "success".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_event_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `explicit`, or from the first file found on the
    /// default search path, then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        match &path {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            None => tracing::debug!("No config file found, using defaults and environment"),
        }

        let settings = builder
            .add_source(
                // Values stay strings until deserialization so that
                // passwords and identity numbers keep their leading zeros.
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        let cfg: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/wifikeeper/config.toml"),
        ];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/wifikeeper/config.toml"));
        }
        paths
    }

    /// Reject configurations the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.network.ssid.trim().is_empty() {
            bail!("network.ssid is required");
        }

        if self.portal.auth_url.trim().is_empty() {
            bail!("portal.auth_url is required");
        }
        let auth = url::Url::parse(&self.portal.auth_url)
            .with_context(|| format!("portal.auth_url is not a valid URL: {}", self.portal.auth_url))?;
        if !matches!(auth.scheme(), "http" | "https") {
            bail!("portal.auth_url must be http or https, got {}", auth.scheme());
        }

        for extra in &self.portal.extra_candidates {
            url::Url::parse(extra)
                .with_context(|| format!("portal.extra_candidates entry is not a valid URL: {}", extra))?;
        }

        if self.global.check_interval_ms == 0 {
            bail!("global.check_interval_ms must be greater than zero");
        }
        if self.probe.timeout_secs == 0 {
            bail!("probe.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn form_data(&self) -> PortalFormData {
        PortalFormData {
            id_number: self.portal.id_number.clone(),
            first_name: self.portal.first_name.clone(),
            last_name: self.portal.last_name.clone(),
            birth_year: self.portal.birth_year.clone(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.global.check_interval_ms)
    }

    /// Effective configuration as TOML, with the password masked
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.network.password.is_some() {
            shown.network.password = Some("********".to_string());
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }
}
