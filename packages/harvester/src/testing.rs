//! Shared test doubles.
//!
//! `FakePage` models the portal as a graph of views: selectors are matched by
//! exact key, clicks switch views or emit downloads, navigation jumps to the
//! view registered for a URL. `MemoryTenderStore` is a vector-backed
//! [`TenderStore`] with a per-identifier failure switch for persistence
//! tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::error::{SessionError, StoreError};
use crate::session::{
    BrowserPage, PageElement, SavedDownload, SessionFactory, SessionResult, WaitOutcome,
};
use crate::storage::TenderStore;
use crate::types::{RegionCode, TenderRecord};

/// What clicking an element does to the page.
#[derive(Debug, Clone, Default)]
pub enum ClickEffect {
    #[default]
    None,
    /// Switch the page to another registered view.
    GoToView(&'static str),
    /// Queue a completed download carrying this suggested filename.
    EmitDownload(&'static str),
}

/// One element in a fake view.
#[derive(Debug, Clone)]
pub struct FakeNode {
    pub text: String,
    pub attrs: Vec<(String, String)>,
    pub visible: bool,
    pub enabled: bool,
    pub children: Vec<(String, FakeNode)>,
    pub click: ClickEffect,
}

impl FakeNode {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attrs: Vec::new(),
            visible: true,
            enabled: true,
            children: Vec::new(),
            click: ClickEffect::None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn child(mut self, selector: &str, node: FakeNode) -> Self {
        self.children.push((selector.to_string(), node));
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.click = effect;
        self
    }
}

/// One renderable state of the fake portal.
#[derive(Debug, Clone, Default)]
struct FakeView {
    url: String,
    body_text: String,
    nodes: Vec<(String, FakeNode)>,
}

#[derive(Debug, Default)]
struct FakeState {
    views: Vec<(String, FakeView)>,
    current: String,
    failing_urls: HashSet<String>,
    pending_downloads: VecDeque<&'static str>,
    download_dir: Option<PathBuf>,
    clicks: Vec<String>,
    navigations: Vec<String>,
}

impl FakeState {
    fn view(&self, key: &str) -> Option<&FakeView> {
        self.views
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, view)| view)
    }

    fn view_key_for_url(&self, url: &str) -> Option<String> {
        self.views
            .iter()
            .find(|(key, view)| view.url == url || key == &url)
            .map(|(key, _)| key.clone())
    }
}

/// Scripted stand-in for a live browser page.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    pub fn builder() -> FakePageBuilder {
        FakePageBuilder::default()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn current_view(&self) -> String {
        self.state.lock().unwrap().current.clone()
    }

    fn apply_click(&self, text: &str, effect: &ClickEffect) {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(text.to_string());
        match effect {
            ClickEffect::None => {}
            ClickEffect::GoToView(key) => {
                if state.view(key).is_some() {
                    state.current = key.to_string();
                }
            }
            ClickEffect::EmitDownload(name) => {
                state.pending_downloads.push_back(name);
            }
        }
    }
}

#[derive(Default)]
pub struct FakePageBuilder {
    state: FakeState,
    current_key: Option<String>,
}

impl FakePageBuilder {
    /// Starts a new view; subsequent nodes land in it.
    pub fn view(mut self, key: &str, url: &str) -> Self {
        self.state.views.push((
            key.to_string(),
            FakeView {
                url: url.to_string(),
                ..FakeView::default()
            },
        ));
        self.current_key = Some(key.to_string());
        self
    }

    fn ensure_view(&mut self) -> &mut FakeView {
        if self.current_key.is_none() {
            self.state.views.push((
                "default".to_string(),
                FakeView {
                    url: "about:fake".to_string(),
                    ..FakeView::default()
                },
            ));
            self.current_key = Some("default".to_string());
        }
        let key = self.current_key.clone().unwrap();
        self.state
            .views
            .iter_mut()
            .find(|(name, _)| *name == key)
            .map(|(_, view)| view)
            .unwrap()
    }

    pub fn node(mut self, selector: &str, node: FakeNode) -> Self {
        self.ensure_view()
            .nodes
            .push((selector.to_string(), node));
        self
    }

    pub fn element(self, selector: &str, text: &str) -> Self {
        self.node(selector, FakeNode::text(text))
    }

    pub fn hidden_element(self, selector: &str, text: &str) -> Self {
        self.node(selector, FakeNode::text(text).hidden())
    }

    pub fn body_text(mut self, text: &str) -> Self {
        self.ensure_view().body_text = text.to_string();
        self
    }

    /// Makes `navigate` fail for this URL with a session error.
    pub fn fail_navigation(mut self, url: &str) -> Self {
        self.state.failing_urls.insert(url.to_string());
        self
    }

    pub fn build(mut self) -> FakePage {
        if self.state.views.is_empty() {
            self.ensure_view();
        }
        self.state.current = self.state.views[0].0.clone();
        FakePage {
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

/// Element handle over a cloned node; click effects flow back to the page.
#[derive(Debug, Clone)]
pub struct FakeElement {
    node: FakeNode,
    page: FakePage,
}

impl FakeElement {
    pub fn text_sync(&self) -> String {
        self.node.text.clone()
    }
}

#[async_trait]
impl PageElement for FakeElement {
    async fn text(&self) -> SessionResult<String> {
        Ok(self.node.text.clone())
    }

    async fn attribute(&self, name: &str) -> SessionResult<Option<String>> {
        Ok(self
            .node
            .attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.clone()))
    }

    async fn is_visible(&self) -> SessionResult<bool> {
        Ok(self.node.visible)
    }

    async fn is_enabled(&self) -> SessionResult<bool> {
        Ok(self.node.enabled)
    }

    async fn click(&self) -> SessionResult<()> {
        self.page.apply_click(&self.node.text, &self.node.click);
        Ok(())
    }

    async fn find_all(&self, selector: &str) -> SessionResult<Vec<Self>> {
        Ok(self
            .node
            .children
            .iter()
            .filter(|(key, _)| key == selector)
            .map(|(_, child)| FakeElement {
                node: child.clone(),
                page: self.page.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> SessionResult<()> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        if state.failing_urls.contains(url) {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                source: "scripted navigation failure".into(),
            });
        }
        match state.view_key_for_url(url) {
            Some(key) => {
                state.current = key;
            }
            None => {
                // Unregistered URLs land on an empty document.
                state.views.push((
                    url.to_string(),
                    FakeView {
                        url: url.to_string(),
                        ..FakeView::default()
                    },
                ));
                state.current = url.to_string();
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> SessionResult<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .view(&state.current)
            .map(|view| view.url.clone())
            .unwrap_or_default())
    }

    async fn find_all(&self, selector: &str) -> SessionResult<Vec<FakeElement>> {
        let state = self.state.lock().unwrap();
        let Some(view) = state.view(&state.current) else {
            return Ok(Vec::new());
        };
        Ok(view
            .nodes
            .iter()
            .filter(|(key, _)| key == selector)
            .map(|(_, node)| FakeElement {
                node: node.clone(),
                page: self.clone(),
            })
            .collect())
    }

    async fn wait_for_any(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> SessionResult<WaitOutcome> {
        let found = !self.find_all(selector).await?.is_empty();
        Ok(if found {
            WaitOutcome::Found
        } else {
            WaitOutcome::TimedOut
        })
    }

    async fn body_text(&self) -> SessionResult<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .view(&state.current)
            .map(|view| view.body_text.clone())
            .unwrap_or_default())
    }

    async fn settle(&self, _pause: Duration) {}

    async fn begin_download_capture(&self, dir: &Path) -> SessionResult<()> {
        std::fs::create_dir_all(dir)?;
        self.state.lock().unwrap().download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn wait_for_download(
        &self,
        _timeout: Duration,
    ) -> SessionResult<Option<SavedDownload>> {
        let (name, dir) = {
            let mut state = self.state.lock().unwrap();
            let Some(name) = state.pending_downloads.pop_front() else {
                return Ok(None);
            };
            let dir = state
                .download_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir);
            (name, dir)
        };
        let path = dir.join(name);
        std::fs::write(&path, b"fake-download")?;
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Some(SavedDownload {
            suggested_name: name.to_string(),
            path,
            size_bytes,
        }))
    }
}

/// Hands out clones of one shared page, like a browser reusing a profile.
#[derive(Debug, Clone)]
pub struct FakeFactory {
    page: FakePage,
}

impl FakeFactory {
    pub fn new(page: FakePage) -> Self {
        Self { page }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Page = FakePage;

    async fn open(&self) -> SessionResult<FakePage> {
        Ok(self.page.clone())
    }
}

/// Factory whose leases always fail, for session-fatal paths.
#[derive(Debug, Clone, Default)]
pub struct DeadFactory;

#[async_trait]
impl SessionFactory for DeadFactory {
    type Page = FakePage;

    async fn open(&self) -> SessionResult<FakePage> {
        Err(SessionError::Closed)
    }
}

/// Vector-backed store double.
#[derive(Debug, Clone, Default)]
pub struct MemoryTenderStore {
    rows: Arc<Mutex<Vec<TenderRecord>>>,
    failing_ids: Arc<Mutex<HashSet<String>>>,
}

impl MemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write for this external id fail.
    pub fn fail_writes_for(&self, external_id: &str) {
        self.failing_ids
            .lock()
            .unwrap()
            .insert(external_id.to_string());
    }

    pub fn rows(&self) -> Vec<TenderRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn check_write(&self, external_id: &str) -> Result<(), StoreError> {
        if self.failing_ids.lock().unwrap().contains(external_id) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl TenderStore for MemoryTenderStore {
    async fn existing_external_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.external_id.is_empty())
            .map(|row| row.external_id.clone())
            .collect())
    }

    async fn insert(&self, record: &TenderRecord) -> Result<(), StoreError> {
        self.check_write(&record.external_id)?;
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn update_by_external_id(&self, record: &TenderRecord) -> Result<(), StoreError> {
        self.check_write(&record.external_id)?;
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|row| row.external_id == record.external_id)
        {
            Some(row) => {
                *row = record.clone();
                Ok(())
            }
            None => Err(StoreError::Database(sqlx::Error::RowNotFound)),
        }
    }
}

/// Minimal record for reconciler and store tests.
pub fn sample_record(external_id: &str, title: &str) -> TenderRecord {
    TenderRecord {
        external_id: external_id.to_string(),
        region_code: RegionCode::Sp,
        title: title.to_string(),
        raw_description: String::new(),
        object_description: String::new(),
        organization_name: String::new(),
        municipality_name: String::new(),
        modality: String::new(),
        status: "recebendo_proposta".to_string(),
        estimated_total_value: None,
        publication_date: None,
        deadline: None,
        source_url: String::new(),
        detail_url: String::new(),
        data_source: "pncp".to_string(),
        scraped_at: Utc::now(),
        provenance: Vec::new(),
        items: Vec::new(),
        files: Vec::new(),
    }
}

/// Temp directory unique to one test, created on first use.
pub fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pncp-harvester-{tag}-{}", uuid::Uuid::new_v4()))
}
