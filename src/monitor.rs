//! Monitor loop
//!
//! Each cycle classifies connectivity, acts on the result (join the network,
//! authenticate against the portal, or nothing), folds the result into a new
//! `MonitorState`, and sleeps out the rest of the configured interval.
//! Cycles never overlap and nothing inside a cycle can end the loop.

use crate::clock::Clock;
use crate::config::Config;
use crate::connectivity::Classifier;
use crate::link::NetworkLink;
use crate::models::{ConnectivityStatus, MonitorState};
use crate::portal::PortalAuthenticator;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub ssid: String,
    pub password: Option<String>,
    pub check_interval: Duration,
    /// Pause after a join or an authentication attempt
    pub settle: Duration,
    /// Pause once `max_failures` is exceeded
    pub cooldown: Duration,
    pub quiet_after: u32,
    pub max_failures: u32,
}

impl MonitorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ssid: cfg.network.ssid.clone(),
            password: cfg.network.password.clone(),
            check_interval: cfg.check_interval(),
            settle: Duration::from_secs(cfg.global.settle_secs),
            cooldown: Duration::from_secs(cfg.global.cooldown_secs),
            quiet_after: cfg.global.quiet_after,
            max_failures: cfg.global.max_failures,
        }
    }
}

pub struct Monitor {
    classifier: Box<dyn Classifier>,
    link: Arc<dyn NetworkLink>,
    portal: Box<dyn PortalAuthenticator>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    state: MonitorState,
}

impl Monitor {
    pub fn new(
        classifier: Box<dyn Classifier>,
        link: Arc<dyn NetworkLink>,
        portal: Box<dyn PortalAuthenticator>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            classifier,
            link,
            portal,
            clock,
            settings,
            state: MonitorState::default(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Run forever
    pub async fn run(&mut self) {
        tracing::info!("Monitoring '{}' every {:?}", self.settings.ssid, self.settings.check_interval);
        loop {
            self.run_cycle().await;
        }
    }

    /// One classify/act/pace cycle
    pub async fn run_cycle(&mut self) -> ConnectivityStatus {
        let started = self.clock.now();
        let status = self.step().await;
        self.pace(started).await;
        status
    }

    /// A single classify/act pass without pacing
    pub async fn check_once(&mut self) -> ConnectivityStatus {
        self.step().await
    }

    /// Release resources held by an interrupted cycle
    pub async fn shutdown(&mut self) {
        self.portal.shutdown().await;
    }

    async fn step(&mut self) -> ConnectivityStatus {
        let previous = self.state;
        let status = self.classifier.classify().await;
        let mut state = previous.observe(status, self.clock.wall(), self.settings.quiet_after);
        self.report(&previous, &state, status);

        match status {
            ConnectivityStatus::Online => {}
            ConnectivityStatus::Offline => {
                let ssid = &self.settings.ssid;
                tracing::info!("Joining '{}'...", ssid);
                match self.link.join(ssid, self.settings.password.as_deref()).await {
                    Ok(()) => tracing::info!("Joined '{}'", ssid),
                    Err(e) => {
                        tracing::warn!("Join failed: {:#}", e);
                        state = state.with_error();
                    }
                }
                self.clock.sleep(self.settings.settle).await;
            }
            ConnectivityStatus::CaptivePortal => {
                if !self.portal.authenticate().await {
                    state = state.with_error();
                }
                self.clock.sleep(self.settings.settle).await;
            }
        }

        if state.needs_cooldown(self.settings.max_failures) {
            tracing::error!(
                "{} consecutive failures, backing off for {:?}...",
                state.consecutive_failures,
                self.settings.cooldown
            );
            if status == ConnectivityStatus::Offline {
                if let Err(e) = self.link.leave().await {
                    tracing::warn!("Failed to leave network before cooldown: {:#}", e);
                }
            }
            self.clock.sleep(self.settings.cooldown).await;
            state = state.after_cooldown();
        }

        self.state = state;
        status
    }

    fn report(&self, previous: &MonitorState, state: &MonitorState, status: ConnectivityStatus) {
        if status.is_online() {
            if state.just_regained() {
                tracing::info!(
                    "Internet is reachable (success #{})",
                    state.total_successes
                );
            } else if state.quiet_mode && !previous.quiet_mode {
                tracing::info!(
                    "Connection stable for {} checks, entering quiet mode",
                    state.consecutive_online_checks
                );
            } else if state.quiet_mode {
                tracing::debug!("Online ({} consecutive checks)", state.consecutive_online_checks);
            } else {
                tracing::info!("Online ({} consecutive checks)", state.consecutive_online_checks);
            }
            return;
        }

        if previous.quiet_mode {
            tracing::info!("Leaving quiet mode");
        }
        tracing::warn!(
            "{} detected (failure {}/{})",
            status,
            state.consecutive_failures,
            self.settings.max_failures
        );
    }

    /// Sleep out whatever is left of the interval
    async fn pace(&self, started: Instant) {
        let elapsed = self.clock.now().saturating_duration_since(started);
        let remaining = self.settings.check_interval.saturating_sub(elapsed);
        if !remaining.is_zero() {
            self.clock.sleep(remaining).await;
        }
    }
}
