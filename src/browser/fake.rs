//! In-memory browser used by the form and navigator tests

use super::{
    drain_events, push_event, shared_events, BrowserError, BrowserLauncher, BrowserSession,
    Landing, Locator, PageEvent, PortalPage, SharedEvents,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct FakeElement {
    visible: bool,
    typeable: bool,
    value: String,
}

#[derive(Default)]
struct Dom {
    /// Keyed by the locator's display form
    elements: HashMap<String, FakeElement>,
    /// Locators whose lookup raises a script error
    broken: HashSet<String>,
    clicks: Vec<String>,
}

/// Synthetic page; elements are addressed by locator text
#[derive(Default)]
pub struct FakePage {
    dom: Mutex<Dom>,
    /// Every page operation fails
    fail_all: bool,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(self, selector: &str, visible: bool, value: &str) -> Self {
        self.dom.lock().unwrap().elements.insert(
            selector.to_string(),
            FakeElement {
                visible,
                typeable: true,
                value: value.to_string(),
            },
        );
        self
    }

    pub fn with_element(self, selector: &str) -> Self {
        self.insert(selector, true, "")
    }

    pub fn with_value(self, selector: &str, value: &str) -> Self {
        self.insert(selector, true, value)
    }

    pub fn with_hidden(self, selector: &str) -> Self {
        self.insert(selector, false, "")
    }

    pub fn with_broken(self, selector: &str) -> Self {
        self.dom.lock().unwrap().broken.insert(selector.to_string());
        self
    }

    /// Element is found but rejects input
    pub fn with_untypeable(self, selector: &str) -> Self {
        if let Some(el) = self.dom.lock().unwrap().elements.get_mut(selector) {
            el.typeable = false;
        }
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn value(&self, selector: &str) -> Option<String> {
        self.dom
            .lock()
            .unwrap()
            .elements
            .get(selector)
            .map(|el| el.value.clone())
    }

    pub fn clicks(&self) -> Vec<String> {
        self.dom.lock().unwrap().clicks.clone()
    }

    fn with_dom<T>(
        &self,
        locator: &Locator,
        f: impl FnOnce(&mut Dom, &str) -> Result<T, BrowserError>,
    ) -> Result<T, BrowserError> {
        let key = locator.to_string();
        let mut dom = self.dom.lock().unwrap();
        if self.fail_all || dom.broken.contains(&key) {
            return Err(BrowserError::Script(format!("invalid selector {}", key)));
        }
        f(&mut dom, &key)
    }
}

fn element<'a>(dom: &'a mut Dom, key: &str) -> Result<&'a mut FakeElement, BrowserError> {
    dom.elements
        .get_mut(key)
        .ok_or_else(|| BrowserError::ElementNotFound(key.to_string()))
}

fn typeable<'a>(dom: &'a mut Dom, key: &str) -> Result<&'a mut FakeElement, BrowserError> {
    let el = element(dom, key)?;
    if !el.typeable {
        return Err(BrowserError::Script(format!("{} is not editable", key)));
    }
    Ok(el)
}

#[async_trait]
impl PortalPage for FakePage {
    async fn is_interactable(&self, locator: &Locator) -> Result<bool, BrowserError> {
        self.with_dom(locator, |dom, key| {
            Ok(dom.elements.get(key).map(|el| el.visible).unwrap_or(false))
        })
    }

    async fn clear(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.with_dom(locator, |dom, key| {
            typeable(dom, key)?.value.clear();
            Ok(())
        })
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError> {
        self.with_dom(locator, |dom, key| {
            typeable(dom, key)?.value.push_str(text);
            Ok(())
        })
    }

    async fn dom_click(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.with_dom(locator, |dom, key| {
            element(dom, key)?;
            dom.clicks.push(key.to_string());
            Ok(())
        })
    }
}

/// How a fake navigation to one URL behaves
#[derive(Debug, Clone)]
pub enum Route {
    Land { final_url: String, status: Option<u16> },
    Timeout,
    Refused,
    /// Never completes; for cancellation tests
    Hang,
}

/// Where an injected failure happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Launch,
    Snapshot,
    PageOps,
    Close,
}

/// Shared record of everything the fake browser was asked to do
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub launches: usize,
    pub closes: usize,
    pub navigations: Vec<String>,
    pub snapshots: Vec<PathBuf>,
}

impl BrowserLog {
    pub fn live_sessions(&self) -> usize {
        self.launches - self.closes
    }
}

pub struct FakeLauncher {
    routes: HashMap<String, Route>,
    /// Default page, shown wherever no page is registered for the current URL
    page: Arc<FakePage>,
    pages: HashMap<String, Arc<FakePage>>,
    fail_at: Option<FailAt>,
    log: Arc<Mutex<BrowserLog>>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            routes: HashMap::new(),
            page: Arc::new(page),
            pages: HashMap::new(),
            fail_at: None,
            log: Arc::new(Mutex::new(BrowserLog::default())),
        }
    }

    pub fn route(mut self, url: &str, route: Route) -> Self {
        self.routes.insert(url.to_string(), route);
        self
    }

    /// Navigation to `url` ends on `final_url` with `status`
    pub fn land(self, url: &str, final_url: &str, status: u16) -> Self {
        self.route(
            url,
            Route::Land {
                final_url: final_url.to_string(),
                status: Some(status),
            },
        )
    }

    /// Serve `page` while the session sits on `url`
    pub fn page_at(mut self, url: &str, page: Arc<FakePage>) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn fail_at(mut self, phase: FailAt) -> Self {
        self.fail_at = Some(phase);
        self
    }

    pub fn log(&self) -> Arc<Mutex<BrowserLog>> {
        self.log.clone()
    }

    pub fn page(&self) -> Arc<FakePage> {
        self.page.clone()
    }

    /// Session handed out directly, for scanning tests
    pub fn session(&self) -> FakeSession {
        self.log.lock().unwrap().launches += 1;
        FakeSession {
            routes: self.routes.clone(),
            page: self.page.clone(),
            pages: self.pages.clone(),
            fail_at: self.fail_at,
            log: self.log.clone(),
            current: "about:blank".to_string(),
            events: shared_events(16),
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if self.fail_at == Some(FailAt::Launch) {
            return Err(BrowserError::Launch("no chrome executable".into()));
        }
        Ok(Box::new(self.session()))
    }
}

pub struct FakeSession {
    routes: HashMap<String, Route>,
    page: Arc<FakePage>,
    pages: HashMap<String, Arc<FakePage>>,
    fail_at: Option<FailAt>,
    log: Arc<Mutex<BrowserLog>>,
    current: String,
    events: SharedEvents,
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn page(&self) -> &dyn PortalPage {
        if self.fail_at == Some(FailAt::PageOps) {
            static FAILING: std::sync::OnceLock<FakePage> = std::sync::OnceLock::new();
            return FAILING.get_or_init(FakePage::failing);
        }
        self.pages.get(&self.current).unwrap_or(&self.page).as_ref()
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Landing, BrowserError> {
        self.log.lock().unwrap().navigations.push(url.to_string());
        match self.routes.get(url).cloned() {
            Some(Route::Land { final_url, status }) => {
                self.current = final_url.clone();
                Ok(Landing {
                    requested: url.to_string(),
                    final_url,
                    status,
                })
            }
            Some(Route::Timeout) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
            Some(Route::Hang) => std::future::pending().await,
            Some(Route::Refused) | None => {
                push_event(
                    &self.events,
                    PageEvent::RequestFailed {
                        url: url.to_string(),
                        reason: "net::ERR_CONNECTION_REFUSED".into(),
                    },
                );
                Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_REFUSED".into(),
                })
            }
        }
    }

    async fn current_url(&self) -> Option<String> {
        Some(self.current.clone())
    }

    async fn snapshot(&self, path: &Path) -> Result<(), BrowserError> {
        if self.fail_at == Some(FailAt::Snapshot) {
            return Err(BrowserError::Snapshot("capture failed".into()));
        }
        self.log.lock().unwrap().snapshots.push(path.to_path_buf());
        Ok(())
    }

    fn drain_events(&self) -> (Vec<PageEvent>, usize) {
        drain_events(&self.events)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.log.lock().unwrap().closes += 1;
        if self.fail_at == Some(FailAt::Close) {
            return Err(BrowserError::Closed);
        }
        Ok(())
    }
}
