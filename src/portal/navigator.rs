//! Browser-driven portal authentication
//!
//! One `authenticate()` call runs LAUNCH -> NAVIGATE/DETECT -> FILL ->
//! SETTLE -> CLOSE in order. The browser session is always released before
//! the call returns; if a previous call was interrupted and left a session
//! behind, it is force-closed before a new one is launched.

use super::form::FormFillEngine;
use super::snapshot::SnapshotSink;
use super::PortalAuthenticator;
use crate::browser::{BrowserLauncher, BrowserSession, Landing};
use crate::clock::Clock;
use crate::models::PortalFormData;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use url::Url;

/// Path/query tokens that usually mark a login page
static LOGIN_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(login|logon|signin|sign-in|auth|hotspot|captive|portal|guest|splash)")
        .expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// The operator-configured portal address
    AuthUrl,
    /// Generic plain-HTTP endpoint used only to provoke a redirect
    Trigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    pub url: String,
    pub kind: CandidateKind,
    /// Status the endpoint answers with when nothing intercepts it
    pub expected_status: Option<u16>,
}

impl CandidateUrl {
    pub fn trigger(url: &str, expected_status: Option<u16>) -> Self {
        Self {
            url: url.to_string(),
            kind: CandidateKind::Trigger,
            expected_status,
        }
    }
}

/// Configured auth URL first, then the well-known triggers, then extras
pub fn candidate_urls(auth_url: &str, extra: &[String]) -> Vec<CandidateUrl> {
    let mut candidates = vec![
        CandidateUrl {
            url: auth_url.to_string(),
            kind: CandidateKind::AuthUrl,
            expected_status: None,
        },
        CandidateUrl::trigger("http://connectivitycheck.gstatic.com/generate_204", Some(204)),
        CandidateUrl::trigger("http://captive.apple.com/hotspot-detect.html", Some(200)),
        CandidateUrl::trigger("http://www.msftconnecttest.com/connecttest.txt", Some(200)),
        CandidateUrl::trigger("http://neverssl.com/", Some(200)),
    ];
    candidates.extend(extra.iter().map(|url| CandidateUrl::trigger(url, None)));
    candidates
}

/// Why a landing looks like the portal, or `None` if it does not
pub fn portal_signal(candidate: &CandidateUrl, landing: &Landing) -> Option<&'static str> {
    let requested = Url::parse(&candidate.url).ok();
    let landed = Url::parse(&landing.final_url).ok();

    if let (Some(requested), Some(landed)) = (&requested, &landed) {
        let host = |u: &Url| u.host_str().map(str::to_ascii_lowercase);
        if host(requested) != host(landed) {
            return Some("redirected to another host");
        }
    }

    // A trigger's own URL may contain a token (hotspot-detect.html), so for
    // triggers only a redirected URL counts.
    let redirected = landing.final_url != candidate.url;
    if redirected || candidate.kind == CandidateKind::AuthUrl {
        let tail = match &landed {
            Some(u) => format!("{}?{}", u.path(), u.query().unwrap_or("")),
            None => landing.final_url.clone(),
        };
        if LOGIN_TOKEN.is_match(&tail) {
            return Some("login-style path");
        }
    }

    if let (Some(expected), Some(actual)) = (candidate.expected_status, landing.status) {
        if expected != actual {
            return Some("unexpected status");
        }
    }
    None
}

/// Outcome of walking the candidate list
#[derive(Debug, Default)]
pub struct Detection {
    /// First portal-like landing, if any
    pub landing: Option<Landing>,
    /// Candidates that loaded but did not look like a portal
    pub rejected: Vec<String>,
    /// Candidates that could not be loaded at all
    pub failed: Vec<String>,
}

/// Navigate the candidates in order until one lands on something portal-like.
pub async fn scan_candidates(
    session: &mut dyn BrowserSession,
    candidates: &[CandidateUrl],
    timeout: Duration,
) -> Detection {
    let mut detection = Detection::default();

    for candidate in candidates {
        tracing::info!("   -> Trying {}", candidate.url);
        match session.navigate(&candidate.url, timeout).await {
            Ok(landing) => match portal_signal(candidate, &landing) {
                Some(reason) => {
                    tracing::info!(
                        "   -> Portal identified at {} via {} ({}, status {:?})",
                        landing.final_url,
                        landing.requested,
                        reason,
                        landing.status
                    );
                    detection.landing = Some(landing);
                    return detection;
                }
                None => {
                    tracing::info!(
                        "   -> {} not identified as portal (landed on {}, status {:?})",
                        candidate.url,
                        landing.final_url,
                        landing.status
                    );
                    detection.rejected.push(candidate.url.clone());
                }
            },
            Err(e) => {
                tracing::warn!("   -> Navigation failed: {}", e);
                detection.failed.push(candidate.url.clone());
            }
        }
        report_events(session, "navigate");
    }
    detection
}

/// Log page events queued since the last drain
fn report_events(session: &dyn BrowserSession, phase: &str) {
    let (events, dropped) = session.drain_events();
    for event in &events {
        tracing::debug!("[{}] {}", phase, event);
    }
    if dropped > 0 {
        tracing::debug!("[{}] {} page events dropped", phase, dropped);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NavigatorSettings {
    pub navigation_timeout: Duration,
    /// Pause after submitting, before the session is closed
    pub settle: Duration,
}

pub struct PortalNavigator {
    launcher: Box<dyn BrowserLauncher>,
    candidates: Vec<CandidateUrl>,
    form_data: PortalFormData,
    engine: FormFillEngine,
    snapshots: SnapshotSink,
    clock: Arc<dyn Clock>,
    settings: NavigatorSettings,
    /// At most one live session, only between LAUNCH and CLOSE
    session: Option<Box<dyn BrowserSession>>,
}

impl PortalNavigator {
    pub fn new(
        launcher: Box<dyn BrowserLauncher>,
        candidates: Vec<CandidateUrl>,
        form_data: PortalFormData,
        engine: FormFillEngine,
        snapshots: SnapshotSink,
        clock: Arc<dyn Clock>,
        settings: NavigatorSettings,
    ) -> Self {
        Self {
            launcher,
            candidates,
            form_data,
            engine,
            snapshots,
            clock,
            settings,
            session: None,
        }
    }

    pub fn has_live_session(&self) -> bool {
        self.session.is_some()
    }

    async fn launch(&mut self) -> bool {
        if self.session.is_some() {
            tracing::warn!("Browser session left over from an interrupted attempt, closing it");
            self.release().await;
        }

        match self.launcher.launch().await {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(e) => {
                tracing::error!("Failed to launch browser: {}", e);
                false
            }
        }
    }

    /// NAVIGATE/DETECT, FILL and SETTLE on the live session
    async fn drive(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let detection =
            scan_candidates(session.as_mut(), &self.candidates, self.settings.navigation_timeout).await;
        if detection.landing.is_none() {
            let current = session.current_url().await;
            tracing::warn!(
                "No candidate looked like a portal ({} loaded, {} failed); using current page {}",
                detection.rejected.len(),
                detection.failed.len(),
                current.as_deref().unwrap_or("<unknown>")
            );
        }

        self.snapshots.capture(session.as_ref(), "before-fill").await;
        let report = self.engine.fill_and_submit(session.page(), &self.form_data).await;
        report_events(session.as_ref(), "fill");
        tracing::info!(
            "   -> Fields filled: {}, not found: {}, failed: {}, skipped: {}, submit: {}",
            report.filled.len(),
            report.not_found.len(),
            report.failed.len(),
            report.skipped.len(),
            if report.submitted() { "clicked" } else { "missing" }
        );

        let label = if report.submitted() { "after-submit" } else { "error" };
        self.snapshots.capture(session.as_ref(), label).await;

        self.clock.sleep(self.settings.settle).await;
        report_events(session.as_ref(), "settle");
        report.submitted()
    }

    /// CLOSE: the reference is dropped even if closing fails.
    async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                tracing::error!("Failed to close browser session: {}", e);
            }
        }
    }
}

#[async_trait]
impl PortalAuthenticator for PortalNavigator {
    async fn authenticate(&mut self) -> bool {
        tracing::info!("Starting portal authentication...");
        if !self.launch().await {
            return false;
        }
        let submitted = self.drive().await;
        self.release().await;

        if submitted {
            tracing::info!("Portal form submitted");
        } else {
            tracing::warn!("Portal authentication attempt found nothing to submit");
        }
        submitted
    }

    async fn shutdown(&mut self) {
        if self.has_live_session() {
            tracing::info!("Releasing browser session");
            self.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FailAt, FakeLauncher, FakePage, Route};
    use crate::clock::ManualClock;
    use crate::portal::selectors::{DEFAULT_FIELDS, SUBMIT_LOCATORS};

    const AUTH: &str = "http://10.0.0.1/login";

    fn landing(requested: &str, final_url: &str, status: Option<u16>) -> Landing {
        Landing {
            requested: requested.to_string(),
            final_url: final_url.to_string(),
            status,
        }
    }

    fn portal_page() -> FakePage {
        FakePage::new()
            .with_element("#idnumber")
            .with_element("button[type='submit']")
    }

    fn navigator(launcher: FakeLauncher, candidates: Vec<CandidateUrl>, snapshots: bool) -> PortalNavigator {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let dir = snapshots.then(|| std::env::temp_dir().join("wifikeeper-test-snapshots"));
        PortalNavigator::new(
            Box::new(launcher),
            candidates,
            PortalFormData {
                id_number: "12345678901".into(),
                ..Default::default()
            },
            FormFillEngine::new(DEFAULT_FIELDS, SUBMIT_LOCATORS, Duration::ZERO, clock.clone()),
            SnapshotSink::new(dir, clock.clone()),
            clock,
            NavigatorSettings {
                navigation_timeout: Duration::from_secs(15),
                settle: Duration::from_secs(8),
            },
        )
    }

    #[test]
    fn test_cross_host_redirect_is_portal() {
        let c = CandidateUrl::trigger("http://neverssl.com/", Some(200));
        let l = landing(&c.url, "http://10.0.0.1/welcome", Some(200));
        assert_eq!(portal_signal(&c, &l), Some("redirected to another host"));
    }

    #[test]
    fn test_login_token_after_redirect_is_portal() {
        let c = CandidateUrl::trigger("http://neverssl.com/", Some(200));
        let l = landing(&c.url, "http://neverssl.com/cgi-bin/login?dst=x", Some(200));
        assert_eq!(portal_signal(&c, &l), Some("login-style path"));
    }

    #[test]
    fn test_trigger_own_token_is_not_portal() {
        let c = CandidateUrl::trigger("http://captive.apple.com/hotspot-detect.html", Some(200));
        let l = landing(&c.url, &c.url, Some(200));
        assert_eq!(portal_signal(&c, &l), None);
    }

    #[test]
    fn test_auth_url_with_token_is_portal() {
        let c = &candidate_urls(AUTH, &[])[0];
        let l = landing(AUTH, AUTH, Some(200));
        assert_eq!(portal_signal(c, &l), Some("login-style path"));
    }

    #[test]
    fn test_unexpected_status_is_portal() {
        let c = CandidateUrl::trigger("http://connectivitycheck.gstatic.com/generate_204", Some(204));
        let l = landing(&c.url, &c.url, Some(200));
        assert_eq!(portal_signal(&c, &l), Some("unexpected status"));

        let l = landing(&c.url, &c.url, Some(204));
        assert_eq!(portal_signal(&c, &l), None);

        let l = landing(&c.url, &c.url, None);
        assert_eq!(portal_signal(&c, &l), None);
    }

    #[test]
    fn test_candidate_order() {
        let urls = candidate_urls(AUTH, &["http://example.org/".to_string()]);
        assert_eq!(urls[0].url, AUTH);
        assert_eq!(urls[0].kind, CandidateKind::AuthUrl);
        assert_eq!(urls.last().unwrap().url, "http://example.org/");
        assert!(urls[1..].iter().all(|c| c.kind == CandidateKind::Trigger));
    }

    #[tokio::test]
    async fn test_third_candidate_wins() {
        let candidates = vec![
            CandidateUrl::trigger("http://a.test/generate_204", Some(204)),
            CandidateUrl::trigger("http://b.test/", Some(200)),
            CandidateUrl::trigger("http://c.test/", Some(200)),
            CandidateUrl::trigger("http://d.test/", Some(200)),
        ];
        let launcher = FakeLauncher::new(portal_page())
            .land("http://a.test/generate_204", "http://a.test/generate_204", 204)
            .land("http://b.test/", "http://b.test/", 200)
            .land("http://c.test/", "http://portal.example.net/login", 200)
            .land("http://d.test/", "http://portal.example.net/other", 200);
        let mut session = launcher.session();

        let detection = scan_candidates(&mut session, &candidates, Duration::from_secs(15)).await;

        assert_eq!(detection.rejected, vec!["http://a.test/generate_204", "http://b.test/"]);
        assert!(detection.failed.is_empty());
        let chosen = detection.landing.unwrap();
        assert_eq!(chosen.requested, "http://c.test/");
        assert_eq!(chosen.final_url, "http://portal.example.net/login");
        assert_eq!(session.current_url().await.as_deref(), Some("http://portal.example.net/login"));
        assert_eq!(launcher.log().lock().unwrap().navigations.len(), 3);
    }

    #[tokio::test]
    async fn test_authenticate_fills_the_portal_landing() {
        let candidates = vec![
            CandidateUrl::trigger("http://a.test/generate_204", Some(204)),
            CandidateUrl::trigger("http://b.test/", Some(200)),
            CandidateUrl::trigger("http://c.test/", Some(200)),
        ];
        let portal = Arc::new(portal_page());
        let decoy = FakePage::new()
            .with_element("#idnumber")
            .with_element("button[type='submit']");
        let launcher = FakeLauncher::new(decoy)
            .land("http://a.test/generate_204", "http://a.test/generate_204", 204)
            .land("http://b.test/", "http://b.test/", 200)
            .land("http://c.test/", "http://portal.example.net/login", 200)
            .page_at("http://portal.example.net/login", portal.clone());
        let log = launcher.log();
        let decoy = launcher.page();
        let mut nav = navigator(launcher, candidates, false);

        assert!(nav.authenticate().await);

        assert_eq!(log.lock().unwrap().navigations.len(), 3);
        assert_eq!(portal.value("#idnumber").as_deref(), Some("12345678901"));
        assert_eq!(portal.clicks(), vec!["button[type='submit']".to_string()]);
        assert_eq!(decoy.value("#idnumber").as_deref(), Some(""));
        assert!(decoy.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_errors_move_to_next_candidate() {
        let candidates = vec![
            CandidateUrl::trigger("http://a.test/", Some(200)),
            CandidateUrl::trigger("http://b.test/", Some(200)),
            CandidateUrl::trigger("http://c.test/", Some(200)),
        ];
        let launcher = FakeLauncher::new(portal_page())
            .route("http://a.test/", Route::Timeout)
            .route("http://b.test/", Route::Refused)
            .land("http://c.test/", "http://c.test/", 302);
        let mut session = launcher.session();

        let detection = scan_candidates(&mut session, &candidates, Duration::from_secs(15)).await;

        assert_eq!(detection.failed.len(), 2);
        assert_eq!(detection.landing.unwrap().status, Some(302));
    }

    #[tokio::test]
    async fn test_authenticate_fills_and_closes() {
        let launcher = FakeLauncher::new(portal_page()).land(AUTH, AUTH, 200);
        let log = launcher.log();
        let page = launcher.page();
        let mut nav = navigator(launcher, candidate_urls(AUTH, &[]), true);

        assert!(nav.authenticate().await);

        assert!(!nav.has_live_session());
        let log = log.lock().unwrap();
        assert_eq!(log.launches, 1);
        assert_eq!(log.closes, 1);
        assert_eq!(log.navigations, vec![AUTH.to_string()]);
        assert_eq!(log.snapshots.len(), 2);
        assert!(log.snapshots[1].to_string_lossy().ends_with("-after-submit.png"));
        assert_eq!(page.value("#idnumber").as_deref(), Some("12345678901"));
    }

    #[tokio::test]
    async fn test_no_portal_found_still_fills_current_page() {
        let launcher = FakeLauncher::new(portal_page());
        let log = launcher.log();
        let candidates = vec![
            CandidateUrl::trigger("http://a.test/", Some(200)),
            CandidateUrl::trigger("http://b.test/", Some(200)),
        ];
        let mut nav = navigator(launcher, candidates, false);

        assert!(nav.authenticate().await);
        assert_eq!(log.lock().unwrap().navigations.len(), 2);
        assert_eq!(log.lock().unwrap().live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_missing_submit_reports_false_and_snapshots_error() {
        let launcher = FakeLauncher::new(FakePage::new().with_element("#idnumber")).land(AUTH, AUTH, 200);
        let log = launcher.log();
        let mut nav = navigator(launcher, candidate_urls(AUTH, &[]), true);

        assert!(!nav.authenticate().await);
        let log = log.lock().unwrap();
        assert!(log.snapshots.last().unwrap().to_string_lossy().ends_with("-error.png"));
        assert_eq!(log.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_no_session_survives_failure_in_any_phase() {
        for phase in [FailAt::Launch, FailAt::Snapshot, FailAt::PageOps, FailAt::Close] {
            let launcher = FakeLauncher::new(portal_page())
                .land(AUTH, AUTH, 200)
                .fail_at(phase);
            let log = launcher.log();
            let mut nav = navigator(launcher, candidate_urls(AUTH, &[]), true);

            let submitted = nav.authenticate().await;

            assert!(!nav.has_live_session(), "session leaked after {:?}", phase);
            assert_eq!(log.lock().unwrap().live_sessions(), 0, "browser left open after {:?}", phase);
            match phase {
                FailAt::Launch | FailAt::PageOps => assert!(!submitted, "{:?}", phase),
                FailAt::Snapshot | FailAt::Close => assert!(submitted, "{:?}", phase),
            }
        }
    }

    #[tokio::test]
    async fn test_all_navigations_failing_does_not_leak() {
        let launcher = FakeLauncher::new(FakePage::new()).route(AUTH, Route::Timeout);
        let log = launcher.log();
        let mut nav = navigator(launcher, candidate_urls(AUTH, &[]), false);

        assert!(!nav.authenticate().await);
        assert!(!nav.has_live_session());
        assert_eq!(log.lock().unwrap().live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_attempt_is_cleaned_up() {
        let launcher = FakeLauncher::new(portal_page()).route(AUTH, Route::Hang);
        let log = launcher.log();
        let mut nav = navigator(launcher, candidate_urls(AUTH, &[]), false);

        let interrupted = tokio::time::timeout(Duration::from_millis(50), nav.authenticate()).await;
        assert!(interrupted.is_err());
        assert!(nav.has_live_session());

        // The next attempt force-closes the stale session before launching.
        let again = tokio::time::timeout(Duration::from_millis(50), nav.authenticate()).await;
        assert!(again.is_err());
        assert_eq!(log.lock().unwrap().launches, 2);
        assert_eq!(log.lock().unwrap().closes, 1);

        nav.shutdown().await;
        assert!(!nav.has_live_session());
        assert_eq!(log.lock().unwrap().live_sessions(), 0);
    }
}
