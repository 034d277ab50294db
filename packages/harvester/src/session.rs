//! Browser-session abstraction.
//!
//! Every pipeline component talks to the portal through these traits instead
//! of a concrete driver, so region workers can lease independent pages and
//! tests can drive the pipeline against a scripted fake. The production
//! implementation lives in [`crate::cdp`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SessionError;

pub type SessionResult<T> = Result<T, SessionError>;

/// Result of a bounded element wait.
///
/// Timeouts are ordinary control flow: a selector that never appears means
/// "feature not found on this page", not a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Found,
    TimedOut,
}

impl WaitOutcome {
    pub fn found(self) -> bool {
        matches!(self, WaitOutcome::Found)
    }
}

/// A file the browser finished writing into the capture directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDownload {
    /// Filename the engine chose for the download.
    pub suggested_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Handle to one element currently attached to a page.
#[async_trait]
pub trait PageElement: Send + Sync + Sized {
    /// Visible text content, trimmed by the caller as needed.
    async fn text(&self) -> SessionResult<String>;

    async fn attribute(&self, name: &str) -> SessionResult<Option<String>>;

    async fn is_visible(&self) -> SessionResult<bool>;

    /// False for disabled controls (`disabled` attribute or
    /// `aria-disabled="true"`).
    async fn is_enabled(&self) -> SessionResult<bool>;

    async fn click(&self) -> SessionResult<()>;

    /// Scoped query under this element.
    async fn find_all(&self, selector: &str) -> SessionResult<Vec<Self>>;
}

/// One browser tab navigating the portal.
///
/// A page is owned by exactly one region worker at a time; all navigation on
/// it is sequential.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    type Element: PageElement;

    async fn navigate(&self, url: &str) -> SessionResult<()>;

    async fn current_url(&self) -> SessionResult<String>;

    /// Matching elements in document order. A selector that matches nothing
    /// yields an empty list, never an error.
    async fn find_all(&self, selector: &str) -> SessionResult<Vec<Self::Element>>;

    /// Bounded wait for at least one match to appear.
    async fn wait_for_any(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> SessionResult<WaitOutcome>;

    /// Full visible text of the page body.
    async fn body_text(&self) -> SessionResult<String>;

    /// Fixed pause for pages that render after load.
    async fn settle(&self, pause: Duration);

    /// Routes engine downloads into `dir` and starts tracking completions.
    async fn begin_download_capture(&self, dir: &Path) -> SessionResult<()>;

    /// Bounded wait for the next completed download; `None` on timeout.
    async fn wait_for_download(
        &self,
        timeout: Duration,
    ) -> SessionResult<Option<SavedDownload>>;
}

/// Leases fresh pages, one per region worker.
///
/// Concrete pages clean themselves up on drop, so a worker that bails out
/// early never leaks a tab.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Page: BrowserPage;

    async fn open(&self) -> SessionResult<Self::Page>;
}
