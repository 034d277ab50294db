//! Chrome DevTools Protocol driver.
//!
//! Production implementation of the session traits over `chromiumoxide`. One
//! `CdpBrowser` owns the Chrome process and its event loop; each region
//! worker leases a `CdpPage`, which closes its tab on drop even when the
//! worker bails out early.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::{
    BrowserPage, PageElement, SavedDownload, SessionFactory, SessionResult, WaitOutcome,
};

/// How often `wait_for_any` re-queries the DOM.
const ELEMENT_POLL: Duration = Duration::from_millis(250);
/// How often the capture directory is re-scanned for finished downloads.
const DOWNLOAD_POLL: Duration = Duration::from_millis(500);

/// Runs against the element node; Angular keeps plenty of zero-size nodes
/// attached, so geometry is checked before computed style.
const VISIBILITY_FN: &str = r#"function() {
    const rect = this.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) {
        return false;
    }
    const style = window.getComputedStyle(this);
    return style.display !== 'none' && style.visibility !== 'hidden';
}"#;

/// A launched Chrome plus the task draining its CDP event stream.
pub struct CdpBrowser {
    browser: Browser,
    event_loop: JoinHandle<()>,
}

impl CdpBrowser {
    /// Launches Chrome and starts the handler loop. A failure here is fatal
    /// for the whole run, there is no degraded mode without a browser.
    pub async fn launch(headless: bool) -> Result<Self, SessionError> {
        let mut builder = BrowserConfig::builder()
            .window_size(1366, 900)
            .no_sandbox();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|error| SessionError::Launch(error.to_string()))?;

        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    debug!(%error, "browser event loop error");
                }
            }
        });

        Ok(Self {
            browser,
            event_loop,
        })
    }

    /// Orderly shutdown. Asks Chrome to exit, reaps the process, then stops
    /// the event loop.
    pub async fn close(mut self) {
        if let Err(error) = self.browser.close().await {
            warn!(%error, "browser close failed");
        }
        if let Err(error) = self.browser.wait().await {
            debug!(%error, "browser wait failed");
        }
        self.event_loop.abort();
    }
}

#[async_trait]
impl SessionFactory for CdpBrowser {
    type Page = CdpPage;

    async fn open(&self) -> SessionResult<CdpPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(SessionError::command)?;
        Ok(CdpPage::new(page))
    }
}

/// Files already present when capture began, so only new arrivals count.
struct CaptureState {
    dir: PathBuf,
    seen: HashSet<PathBuf>,
}

/// One Chrome tab.
///
/// chromiumoxide pages have no drop-time cleanup of their own; an unclosed
/// tab leaks a CDP session for the life of the browser. The runtime handle is
/// captured at construction so the drop path can always spawn the close.
pub struct CdpPage {
    page: Option<Page>,
    runtime_handle: tokio::runtime::Handle,
    capture: Mutex<Option<CaptureState>>,
}

impl CdpPage {
    fn new(page: Page) -> Self {
        Self {
            page: Some(page),
            runtime_handle: tokio::runtime::Handle::current(),
            capture: Mutex::new(None),
        }
    }

    fn page(&self) -> SessionResult<&Page> {
        self.page.as_ref().ok_or(SessionError::Closed)
    }

    /// Explicit close for the orderly path; `Drop` covers the rest.
    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(error) = page.close().await {
                debug!(%error, "page close failed");
            }
        }
    }

    /// One pass over the capture directory. A file counts as finished once
    /// its size holds steady across two scans and Chrome's `.crdownload`
    /// spool name is gone.
    async fn scan_capture_dir(
        &self,
        sizes: &mut HashMap<PathBuf, u64>,
    ) -> SessionResult<Option<SavedDownload>> {
        let mut capture = self.capture.lock().await;
        let Some(state) = capture.as_mut() else {
            return Ok(None);
        };

        let mut entries = tokio::fs::read_dir(&state.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if state.seen.contains(&path) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".crdownload") || name.ends_with(".tmp") {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let size = metadata.len();
            if sizes.insert(path.clone(), size) == Some(size) {
                state.seen.insert(path.clone());
                return Ok(Some(SavedDownload {
                    suggested_name: name,
                    path,
                    size_bytes: size,
                }));
            }
        }
        Ok(None)
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            // Fire-and-forget; drop cannot await and a failed close of a
            // dying tab is not worth surfacing.
            self.runtime_handle.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    type Element = CdpElement;

    async fn navigate(&self, url: &str) -> SessionResult<()> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|source| SessionError::Navigation {
                url: url.to_string(),
                source: Box::new(source),
            })?;
        // The load event can already be past by the time we subscribe; treat
        // a failed wait as settled.
        if let Err(error) = page.wait_for_navigation().await {
            debug!(%error, url, "navigation wait ended early");
        }
        Ok(())
    }

    async fn current_url(&self) -> SessionResult<String> {
        let page = self.page()?;
        let url = page.url().await.map_err(SessionError::command)?;
        Ok(url.unwrap_or_default())
    }

    async fn find_all(&self, selector: &str) -> SessionResult<Vec<CdpElement>> {
        let page = self.page()?;
        let elements = page
            .find_elements(selector)
            .await
            .map_err(SessionError::command)?;
        Ok(elements.into_iter().map(CdpElement::new).collect())
    }

    async fn wait_for_any(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> SessionResult<WaitOutcome> {
        let page = self.page()?;
        let deadline = Instant::now() + timeout;
        loop {
            // DOM queries fail transiently while Angular swaps the document;
            // within the deadline that is the same as "not there yet".
            match page.find_elements(selector).await {
                Ok(elements) if !elements.is_empty() => return Ok(WaitOutcome::Found),
                Ok(_) => {}
                Err(error) => debug!(%error, selector, "element query failed, retrying"),
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }

    async fn body_text(&self) -> SessionResult<String> {
        let page = self.page()?;
        let result = page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(SessionError::command)?;
        result.into_value::<String>().map_err(SessionError::command)
    }

    async fn settle(&self, pause: Duration) {
        tokio::time::sleep(pause).await;
    }

    async fn begin_download_capture(&self, dir: &Path) -> SessionResult<()> {
        let page = self.page()?;
        tokio::fs::create_dir_all(dir).await?;

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.display().to_string())
            .build()
            .map_err(|error: String| SessionError::Command(error.into()))?;
        page.execute(params).await.map_err(SessionError::command)?;

        let mut seen = HashSet::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            seen.insert(entry.path());
        }
        *self.capture.lock().await = Some(CaptureState {
            dir: dir.to_path_buf(),
            seen,
        });
        Ok(())
    }

    async fn wait_for_download(
        &self,
        timeout: Duration,
    ) -> SessionResult<Option<SavedDownload>> {
        let deadline = Instant::now() + timeout;
        let mut sizes = HashMap::new();
        loop {
            if let Some(saved) = self.scan_capture_dir(&mut sizes).await? {
                return Ok(Some(saved));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(DOWNLOAD_POLL).await;
        }
    }
}

/// A DOM node resolved through a page query.
pub struct CdpElement {
    element: Element,
}

impl CdpElement {
    fn new(element: Element) -> Self {
        Self { element }
    }
}

#[async_trait]
impl PageElement for CdpElement {
    async fn text(&self) -> SessionResult<String> {
        let text = self
            .element
            .inner_text()
            .await
            .map_err(SessionError::command)?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> SessionResult<Option<String>> {
        self.element
            .attribute(name)
            .await
            .map_err(SessionError::command)
    }

    async fn is_visible(&self) -> SessionResult<bool> {
        let returns = self
            .element
            .call_js_fn(VISIBILITY_FN, false)
            .await
            .map_err(SessionError::command)?;
        Ok(returns
            .result
            .value
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    async fn is_enabled(&self) -> SessionResult<bool> {
        let disabled = self
            .element
            .attribute("disabled")
            .await
            .map_err(SessionError::command)?;
        if disabled.is_some() {
            return Ok(false);
        }
        let aria = self
            .element
            .attribute("aria-disabled")
            .await
            .map_err(SessionError::command)?;
        Ok(aria.as_deref() != Some("true"))
    }

    async fn click(&self) -> SessionResult<()> {
        self.element.click().await.map_err(SessionError::command)?;
        Ok(())
    }

    async fn find_all(&self, selector: &str) -> SessionResult<Vec<CdpElement>> {
        let elements = self
            .element
            .find_elements(selector)
            .await
            .map_err(SessionError::command)?;
        Ok(elements.into_iter().map(CdpElement::new).collect())
    }
}
