//! Connectivity classification
//!
//! Two probes decide between ONLINE, OFFLINE and CAPTIVE_PORTAL. The primary
//! probe expects a bare 204; anything else in the 2xx/3xx range means the
//! request was intercepted. When the primary probe errors or answers outside
//! that range, a second independent endpoint is checked for a fixed marker
//! string so that "unreachable" can be told apart from "intercepted".

use crate::config::ProbeConfig;
use crate::http::{HttpClient, ProbeResponse};
use crate::models::ConnectivityStatus;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Never fails; network errors are folded into the returned status.
    async fn classify(&self) -> ConnectivityStatus;
}

pub struct HttpClassifier {
    client: HttpClient,
    primary_url: String,
    fallback_url: String,
    fallback_marker: String,
}

impl HttpClassifier {
    pub fn new(cfg: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(Duration::from_secs(cfg.timeout_secs))?,
            primary_url: cfg.primary_url.clone(),
            fallback_url: cfg.fallback_url.clone(),
            fallback_marker: cfg.fallback_marker.clone(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self) -> ConnectivityStatus {
        match self.client.probe(&self.primary_url).await {
            Ok(resp) => {
                tracing::debug!("Primary probe answered {} ({} bytes)", resp.status, resp.body.len());
                if let Some(status) = judge_primary(&resp) {
                    return status;
                }
            }
            Err(e) => tracing::debug!("Primary probe failed: {:#}", e),
        }

        let fallback = match self.client.probe(&self.fallback_url).await {
            Ok(resp) => {
                tracing::debug!("Fallback probe answered {} ({} bytes)", resp.status, resp.body.len());
                Some(resp)
            }
            Err(e) => {
                tracing::debug!("Fallback probe failed: {:#}", e);
                None
            }
        };
        judge_fallback(fallback.as_ref(), &self.fallback_marker)
    }
}

fn answered(resp: &ProbeResponse) -> bool {
    resp.status.is_success() || resp.status.is_redirection()
}

/// `None` means the primary probe was inconclusive and the fallback must run.
fn judge_primary(resp: &ProbeResponse) -> Option<ConnectivityStatus> {
    if resp.status.as_u16() == 204 && resp.body.is_empty() {
        Some(ConnectivityStatus::Online)
    } else if answered(resp) {
        Some(ConnectivityStatus::CaptivePortal)
    } else {
        None
    }
}

fn judge_fallback(resp: Option<&ProbeResponse>, marker: &str) -> ConnectivityStatus {
    match resp {
        Some(resp) if resp.status.is_success() && resp.body.contains(marker) => ConnectivityStatus::Online,
        // Reachable but not the content we expect: something is in the way.
        Some(resp) if answered(resp) => ConnectivityStatus::CaptivePortal,
        _ => ConnectivityStatus::Offline,
    }
}
