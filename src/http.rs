//! HTTP client for connectivity probes
//!
//! Redirects are never followed: a portal that intercepts the probe must show
//! up as the 3xx it answers with, not as the login page it points to.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use reqwest::{redirect, Client, StatusCode};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reading stops once this many body bytes have arrived
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Status and (possibly truncated) body of one probe request
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub body: String,
}

pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/html, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .default_headers(headers)
            .build()
            .context("Failed to build probe HTTP client")?;

        Ok(Self { inner: client })
    }

    /// Single GET, no retries. The caller decides what a failure means.
    pub async fn probe(&self, url: &str) -> Result<ProbeResponse> {
        let mut resp = self
            .inner
            .get(url)
            .send()
            .await
            .with_context(|| format!("Probe request to {} failed", url))?;

        let status = resp.status();
        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("Failed to read probe body from {}", url))?
        {
            let room = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() == MAX_BODY_BYTES {
                break;
            }
        }

        Ok(ProbeResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
