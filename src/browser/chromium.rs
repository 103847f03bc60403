//! chromiumoxide-backed browser session

use super::{
    drain_events, push_event, shared_events, BrowserError, BrowserLauncher, BrowserSession,
    Landing, Locator, PageEvent, PortalPage, RequestUrls, SharedEvents,
};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EventLoadingFailed, EventRequestWillBeSent};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;

/// In-flight request URLs remembered for failure reports
const TRACKED_REQUESTS: usize = 512;

/// Attribute used to hand an element found by script over to CDP input
const TARGET_ATTR: &str = "data-wifikeeper-target";

/// Resolves a locator in page context and applies one action to it.
/// Returns "missing", "hidden" or "ok".
const LOCATE_JS: &str = r#"(function (kind, query, action, attr) {
    const visible = (el) => {
        const style = window.getComputedStyle(el);
        const rect = el.getBoundingClientRect();
        return style.display !== 'none'
            && style.visibility !== 'hidden'
            && rect.width > 0
            && rect.height > 0;
    };
    let el = null;
    if (kind === 'css') {
        el = document.querySelector(query);
    } else {
        const want = query.toLowerCase();
        const candidates = document.querySelectorAll(
            'button, input[type=submit], input[type=button], a, [role=button]');
        el = Array.from(candidates).find((c) => visible(c)
            && (c.innerText || c.value || '').trim().toLowerCase().includes(want)) || null;
    }
    if (!el) return 'missing';
    switch (action) {
        case 'probe':
            return visible(el) && !el.disabled && !el.readOnly ? 'ok' : 'hidden';
        case 'click':
            el.click();
            return 'ok';
        case 'select':
            el.focus();
            if (typeof el.select === 'function') el.select();
            return 'ok';
        case 'mark':
            document.querySelectorAll('[' + attr + ']').forEach((m) => m.removeAttribute(attr));
            el.setAttribute(attr, '1');
            el.focus();
            return 'ok';
        default:
            return 'missing';
    }
})"#;

pub struct ChromiumLauncher {
    cfg: BrowserConfig,
}

impl ChromiumLauncher {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self { cfg }
    }

    fn browser_config(&self) -> Result<chromiumoxide::BrowserConfig, BrowserError> {
        let mut builder = chromiumoxide::BrowserConfig::builder()
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            // Plain-HTTP triggers must stay plain HTTP or the portal never sees them.
            .arg("--disable-features=HttpsUpgrades,HttpsFirstBalancedModeAutoEnable");
        if !self.cfg.headless {
            builder = builder.with_head();
        }
        if self.cfg.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(exe) = &self.cfg.executable {
            builder = builder.chrome_executable(exe);
        }
        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let config = self.browser_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("chromiumoxide handler event error: {}", e);
                }
            }
        });

        let events = shared_events(self.cfg.event_capacity);
        let setup = async {
            let page = browser.new_page("about:blank").await?;
            let listeners = spawn_listeners(&page, &events).await?;
            Ok::<_, BrowserError>((page, listeners))
        };

        match setup.await {
            Ok((page, listeners)) => Ok(Box::new(ChromiumSession {
                browser,
                page: ChromiumPage { page },
                handler_task,
                listeners,
                events,
                closed: false,
            })),
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                Err(BrowserError::Launch(e.to_string()))
            }
        }
    }
}

/// Forward page callbacks into the event queue
async fn spawn_listeners(
    page: &Page,
    events: &SharedEvents,
) -> Result<Vec<JoinHandle<()>>, BrowserError> {
    let mut tasks = Vec::with_capacity(3);

    let mut sent = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;
    let queue = events.clone();
    tasks.push(tokio::spawn(async move {
        let mut urls = RequestUrls::new(TRACKED_REQUESTS);
        loop {
            tokio::select! {
                Some(ev) = sent.next() => {
                    urls.insert(ev.request_id.inner().clone(), ev.request.url.clone());
                }
                Some(ev) = failed.next() => {
                    push_event(
                        &queue,
                        PageEvent::RequestFailed {
                            url: urls.resolve(ev.request_id.inner()),
                            reason: ev.error_text.clone(),
                        },
                    );
                }
                else => break,
            }
        }
    }));

    let mut exceptions = page.event_listener::<EventExceptionThrown>().await?;
    let queue = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = exceptions.next().await {
            let details = &ev.exception_details;
            let message = details
                .exception
                .as_ref()
                .and_then(|e| e.description.clone())
                .unwrap_or_else(|| details.text.clone());
            push_event(&queue, PageEvent::PageError(message));
        }
    }));

    let mut console = page.event_listener::<EventConsoleApiCalled>().await?;
    let queue = events.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = console.next().await {
            if ev.r#type != ConsoleApiCalledType::Error {
                continue;
            }
            let message = ev
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(v), _) => v.to_string(),
                    (None, Some(d)) => d.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            push_event(&queue, PageEvent::ConsoleError(message));
        }
    }));

    Ok(tasks)
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn locate(&self, locator: &Locator, action: &str) -> Result<String, BrowserError> {
        let (kind, query) = match locator {
            Locator::Css(css) => ("css", *css),
            Locator::Label(label) => ("label", *label),
        };
        let script = format!(
            "{}({}, {}, {}, {})",
            LOCATE_JS,
            js_string(kind),
            js_string(query),
            js_string(action),
            js_string(TARGET_ATTR)
        );
        self.page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn expect_found(&self, locator: &Locator, action: &str) -> Result<(), BrowserError> {
        match self.locate(locator, action).await?.as_str() {
            "ok" => Ok(()),
            _ => Err(BrowserError::ElementNotFound(locator.to_string())),
        }
    }

    async fn marked_element(&self, locator: &Locator) -> Result<chromiumoxide::Element, BrowserError> {
        self.expect_found(locator, "mark").await?;
        Ok(self.page.find_element(format!("[{}]", TARGET_ATTR)).await?)
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[async_trait]
impl PortalPage for ChromiumPage {
    async fn is_interactable(&self, locator: &Locator) -> Result<bool, BrowserError> {
        Ok(self.locate(locator, "probe").await? == "ok")
    }

    async fn clear(&self, locator: &Locator) -> Result<(), BrowserError> {
        let element = self.marked_element(locator).await?;
        self.expect_found(locator, "select").await?;
        element.press_key("Backspace").await?;
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError> {
        let element = self.marked_element(locator).await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn dom_click(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.expect_found(locator, "click").await
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: ChromiumPage,
    handler_task: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
    events: SharedEvents,
    closed: bool,
}

impl ChromiumSession {
    fn abort_tasks(&mut self) {
        for task in self.listeners.drain(..) {
            task.abort();
        }
        self.handler_task.abort();
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> &dyn PortalPage {
        &self.page
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Landing, BrowserError> {
        if self.closed {
            return Err(BrowserError::Closed);
        }

        let page = &self.page.page;
        let navigation = async {
            page.goto(url).await?;
            page.wait_for_navigation_response().await
        };

        let response = tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            })?
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response
            .as_ref()
            .and_then(|request| request.response.as_ref())
            .and_then(|resp| u16::try_from(resp.status).ok());
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(Landing {
            requested: url.to_string(),
            final_url,
            status,
        })
    }

    async fn current_url(&self) -> Option<String> {
        self.page.page.url().await.ok().flatten()
    }

    async fn snapshot(&self, path: &Path) -> Result<(), BrowserError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .page
            .save_screenshot(params, path)
            .await
            .map_err(|e| BrowserError::Snapshot(e.to_string()))?;
        Ok(())
    }

    fn drain_events(&self) -> (Vec<PageEvent>, usize) {
        drain_events(&self.events)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.browser.close().await;
        if result.is_err() {
            // Graceful close failed; make sure the process is gone anyway.
            let _ = self.browser.kill().await;
        }
        let _ = self.browser.wait().await;
        self.abort_tasks();
        result.map(|_| ()).map_err(BrowserError::from)
    }
}
