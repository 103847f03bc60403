//! Wireless link control through NetworkManager's `nmcli`

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Join/leave a named wireless network.
///
/// Outcomes are best-effort; the monitor logs failures and carries on.
#[async_trait]
pub trait NetworkLink: Send + Sync {
    async fn join(&self, ssid: &str, password: Option<&str>) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    async fn local_mac_address(&self) -> Option<String>;

    /// SSID the adapter is currently associated with, if any
    async fn current_ssid(&self) -> Result<Option<String>>;
}

pub struct NmcliLink {
    interface: Option<String>,
    join_timeout: Duration,
}

impl NmcliLink {
    pub fn new(interface: Option<String>, join_timeout: Duration) -> Self {
        Self {
            interface,
            join_timeout,
        }
    }

    async fn nmcli(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let mut cmd = Command::new("nmcli");
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .with_context(|| format!("nmcli {} timed out after {:?}", args.first().unwrap_or(&""), timeout))?
            .context("Failed to run nmcli")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("nmcli exited with {}: {}", output.status, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn wireless_interface(&self) -> Option<String> {
        if let Some(iface) = &self.interface {
            return Some(iface.clone());
        }
        find_wireless_interface(Path::new("/sys/class/net")).await
    }
}

#[async_trait]
impl NetworkLink for NmcliLink {
    async fn join(&self, ssid: &str, password: Option<&str>) -> Result<()> {
        let mut args = vec!["dev", "wifi", "connect", ssid];
        if let Some(password) = password {
            args.extend(["password", password]);
        }
        if let Some(iface) = &self.interface {
            args.extend(["ifname", iface.as_str()]);
        }

        self.nmcli(&args, self.join_timeout)
            .await
            .with_context(|| format!("Failed to join '{}'", ssid))?;
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        let iface = self
            .wireless_interface()
            .await
            .context("No wireless interface found")?;
        self.nmcli(&["dev", "disconnect", &iface], self.join_timeout)
            .await
            .with_context(|| format!("Failed to disconnect {}", iface))?;
        Ok(())
    }

    async fn local_mac_address(&self) -> Option<String> {
        let iface = self.wireless_interface().await?;
        let path = Path::new("/sys/class/net").join(&iface).join("address");
        match tokio::fs::read_to_string(&path).await {
            Ok(mac) => Some(mac.trim().to_uppercase()),
            Err(e) => {
                tracing::debug!("Cannot read MAC of {}: {}", iface, e);
                None
            }
        }
    }

    async fn current_ssid(&self) -> Result<Option<String>> {
        let stdout = self
            .nmcli(&["-t", "-f", "active,ssid", "dev", "wifi"], Duration::from_secs(10))
            .await?;
        Ok(parse_active_ssid(&stdout))
    }
}

/// Pick the active SSID out of `nmcli -t -f active,ssid dev wifi` output
fn parse_active_ssid(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .filter(|ssid| !ssid.is_empty())
        .map(|ssid| ssid.replace("\\:", ":"))
}

/// First interface under `sys_net` that exposes a `wireless` directory
async fn find_wireless_interface(sys_net: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(sys_net).await.ok()?;
    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if tokio::fs::metadata(entry.path().join("wireless")).await.is_ok() {
            found.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    found.sort();
    found.into_iter().next()
}
