//! Scripted in-memory page driver for capture tests
//!
//! Elements are identified by the `Display` form of their locator
//! (`button.cta`, `li:has-text('128GB')`). Option lists are plain string
//! lists, optionally depending on what was last selected in another group.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use variant_capture::browser::{LoadState, Locator, OptionSource, PageDriver, PageFactory};
use variant_capture::error::{BrowserError, Result};
use variant_capture::ScreenshotScope;

#[derive(Default)]
struct MockState {
    url: Option<String>,
    options: HashMap<String, Vec<String>>,
    /// list selector -> (selection key, selected value -> options)
    dependent: HashMap<String, (String, HashMap<String, Vec<String>>)>,
    /// css prefix -> option list the suffix must belong to
    select_prefixes: HashMap<String, String>,
    /// selection key (prefix or list selector) -> selected value
    selections: HashMap<String, String>,
    present: HashSet<String>,
    /// element -> selections under which it exists
    present_when: HashMap<String, Vec<(String, String)>>,
    dismissible: HashSet<String>,
    covered: HashSet<String>,
    broken: HashSet<String>,
    texts: HashMap<String, String>,
    nav_failures: usize,
    nav_fail_urls: HashSet<String>,
    empty_urls: HashSet<String>,
    screenshot_fails: bool,
    /// Clicking one of these navigates off the page until the next `navigate`
    exits: HashSet<String>,
    left: bool,
    /// Links revealed one batch per scroll
    scroll_batches: VecDeque<(String, Vec<String>)>,
    scrolls: usize,

    navigations: Vec<String>,
    clicks: Vec<String>,
    dom_clicks: Vec<String>,
    keys: Vec<String>,
    shots: Vec<(ScreenshotScope, HashMap<String, String>)>,
    viewport: Option<(u32, u32)>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
    active: Option<Arc<ActivePages>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Static option list.
    pub fn with_options(self, selector: &str, options: &[&str]) -> Self {
        self.state()
            .options
            .insert(selector.to_string(), strings(options));
        self
    }

    /// Options of `selector` once `value` is selected under `key`.
    pub fn with_options_when(self, selector: &str, key: &str, value: &str, options: &[&str]) -> Self {
        self.state()
            .dependent
            .entry(selector.to_string())
            .or_insert_with(|| (key.to_string(), HashMap::new()))
            .1
            .insert(value.to_string(), strings(options));
        self
    }

    /// Clicking `{prefix}{value}` selects `value` when it is one of `list`'s options.
    pub fn with_select_prefix(self, prefix: &str, list: &str) -> Self {
        self.state()
            .select_prefixes
            .insert(prefix.to_string(), list.to_string());
        self
    }

    pub fn with_element(self, key: &str) -> Self {
        self.state().present.insert(key.to_string());
        self
    }

    /// Element that only exists while `value` is selected under `selection_key`.
    pub fn with_element_when(self, key: &str, selection_key: &str, value: &str) -> Self {
        self.state()
            .present_when
            .entry(key.to_string())
            .or_default()
            .push((selection_key.to_string(), value.to_string()));
        self
    }

    /// Present element that disappears once clicked.
    pub fn with_popup(self, key: &str) -> Self {
        {
            let mut state = self.state();
            state.present.insert(key.to_string());
            state.dismissible.insert(key.to_string());
        }
        self
    }

    /// Standard clicks fail as if an overlay covered the element.
    pub fn covered(self, key: &str) -> Self {
        self.state().covered.insert(key.to_string());
        self
    }

    /// Both click paths fail.
    pub fn broken(self, key: &str) -> Self {
        self.state().broken.insert(key.to_string());
        self
    }

    pub fn with_text(self, selector: &str, text: &str) -> Self {
        self.state()
            .texts
            .insert(selector.to_string(), text.to_string());
        self
    }

    /// The first `n` navigations fail.
    pub fn failing_navigations(self, n: usize) -> Self {
        self.state().nav_failures = n;
        self
    }

    pub fn failing_url(self, url: &str) -> Self {
        self.state().nav_fail_urls.insert(url.to_string());
        self
    }

    /// No option list renders anything on `url`.
    pub fn empty_on(self, url: &str) -> Self {
        self.state().empty_urls.insert(url.to_string());
        self
    }

    /// Clicking `key` leaves the page; nothing is present until the next navigation.
    pub fn leaving_on(self, key: &str) -> Self {
        self.state().exits.insert(key.to_string());
        self
    }

    /// Each scroll appends the next batch to `selector`'s elements.
    pub fn with_scroll_batches(self, selector: &str, batches: &[&[&str]]) -> Self {
        self.state().scroll_batches.extend(
            batches
                .iter()
                .map(|batch| (selector.to_string(), strings(batch))),
        );
        self
    }

    pub fn failing_screenshots(self) -> Self {
        self.state().screenshot_fails = true;
        self
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn dom_clicks(&self) -> Vec<String> {
        self.state().dom_clicks.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().keys.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn screenshot_count(&self) -> usize {
        self.state().shots.len()
    }

    /// Selection state at the time of each screenshot.
    pub fn shot_selections(&self, key: &str) -> Vec<Option<String>> {
        self.state()
            .shots
            .iter()
            .map(|(_, selections)| selections.get(key).cloned())
            .collect()
    }

    pub fn shot_scopes(&self) -> Vec<ScreenshotScope> {
        self.state().shots.iter().map(|(scope, _)| *scope).collect()
    }

    pub fn selection(&self, key: &str) -> Option<String> {
        self.state().selections.get(key).cloned()
    }

    pub fn scrolls(&self) -> usize {
        self.state().scrolls
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.state().viewport
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl MockState {
    fn current_options(&self, selector: &str) -> Vec<String> {
        if self.left {
            return Vec::new();
        }
        if let Some(url) = &self.url {
            if self.empty_urls.contains(url) {
                return Vec::new();
            }
        }
        if let Some((key, by_value)) = self.dependent.get(selector) {
            return self
                .selections
                .get(key)
                .and_then(|value| by_value.get(value))
                .cloned()
                .unwrap_or_default();
        }
        self.options.get(selector).cloned().unwrap_or_default()
    }

    /// Prefix and value when `css` addresses an option through a select prefix.
    fn prefixed_option(&self, css: &str) -> Option<(String, String)> {
        self.select_prefixes.iter().find_map(|(prefix, list)| {
            let value = css.strip_prefix(prefix.as_str())?;
            self.current_options(list)
                .iter()
                .any(|o| o == value)
                .then(|| (prefix.clone(), value.to_string()))
        })
    }

    fn text_option(&self, locator: &Locator) -> Option<String> {
        if locator.has_text.as_deref().map_or(true, str::is_empty) {
            return None;
        }
        let options = self.current_options(&locator.css);
        let index = locator.pick(&options)?;
        options.into_iter().nth(index)
    }

    fn is_present(&self, locator: &Locator) -> bool {
        if self.left {
            return false;
        }
        let key = locator.to_string();
        if self.present.contains(&key) {
            return true;
        }
        if let Some(conditions) = self.present_when.get(&key) {
            if conditions
                .iter()
                .any(|(k, v)| self.selections.get(k) == Some(v))
            {
                return true;
            }
        }
        self.text_option(locator).is_some() || self.prefixed_option(&locator.css).is_some()
    }

    fn apply_click(&mut self, locator: &Locator) {
        let key = locator.to_string();
        if let Some(value) = self.text_option(locator) {
            self.selections.insert(locator.css.clone(), value);
        } else if let Some((prefix, value)) = self.prefixed_option(&locator.css) {
            self.selections.insert(prefix, value);
        }
        if self.dismissible.contains(&key) {
            self.present.remove(&key);
        }
        if self.exits.contains(&key) {
            self.left = true;
            self.selections.clear();
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[async_trait]
impl PageDriver for MockPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        // Let other targets make progress, like a real page load would
        tokio::task::yield_now().await;

        let mut state = self.state();
        state.navigations.push(url.to_string());
        if state.nav_failures > 0 {
            state.nav_failures -= 1;
            return Err(BrowserError::Timeout(format!("navigation to {}", url)));
        }
        if state.nav_fail_urls.contains(url) {
            return Err(BrowserError::NavigationFailed(format!(
                "net::ERR_NAME_NOT_RESOLVED {}",
                url
            )));
        }
        state.url = Some(url.to_string());
        state.left = false;
        state.selections.clear();
        Ok(())
    }

    async fn wait_for_load_state(&self, _state: LoadState, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for_selector(&self, locator: &Locator, _timeout: Duration) -> Result<bool> {
        Ok(self.state().is_present(locator))
    }

    async fn query_selector(&self, locator: &Locator) -> Result<bool> {
        Ok(self.state().is_present(locator))
    }

    async fn query_selector_all(&self, selector: &str, _source: &OptionSource) -> Result<Vec<String>> {
        Ok(self.state().current_options(selector))
    }

    async fn click(&self, locator: &Locator, _timeout: Duration) -> Result<()> {
        let mut state = self.state();
        let key = locator.to_string();
        if state.broken.contains(&key) {
            return Err(BrowserError::Other(format!("{} is detached", key)));
        }
        if state.covered.contains(&key) {
            return Err(BrowserError::Timeout(format!(
                "{} is covered by another element",
                key
            )));
        }
        if !state.is_present(locator) {
            return Err(BrowserError::ElementNotFound(key));
        }
        state.clicks.push(key);
        state.apply_click(locator);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let mut state = self.state();
        if script.contains("scrollBy") {
            state.scrolls += 1;
            if let Some((selector, batch)) = state.scroll_batches.pop_front() {
                state.options.entry(selector).or_default().extend(batch);
            }
        }
        Ok(serde_json::Value::Null)
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.state().current_options(selector).len())
    }

    async fn dom_click_nth(&self, selector: &str, index: usize) -> Result<bool> {
        let mut state = self.state();
        let Some(value) = state.current_options(selector).into_iter().nth(index) else {
            return Ok(false);
        };
        state.dom_clicks.push(format!("{}[{}]", selector, index));
        state.selections.insert(selector.to_string(), value);
        Ok(true)
    }

    async fn dom_click(&self, locator: &Locator) -> Result<bool> {
        let mut state = self.state();
        let key = locator.to_string();
        if state.broken.contains(&key) {
            return Err(BrowserError::Other(format!("{} threw on click()", key)));
        }
        if !state.is_present(locator) {
            return Ok(false);
        }
        state.dom_clicks.push(key);
        state.apply_click(locator);
        Ok(true)
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        Ok(self.state().texts.get(selector).cloned())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.state().keys.push(key.to_string());
        Ok(())
    }

    async fn screenshot(&self, scope: ScreenshotScope) -> Result<Vec<u8>> {
        let mut state = self.state();
        if state.screenshot_fails {
            return Err(BrowserError::Other("capture failed".to_string()));
        }
        let selections = state.selections.clone();
        state.shots.push((scope, selections));
        Ok(format!("png-{}", state.shots.len()).into_bytes())
    }

    async fn set_viewport_size(&self, width: u32, height: u32) -> Result<()> {
        self.state().viewport = Some((width, height));
        Ok(())
    }

    async fn pause(&self, _duration: Duration) {}

    async fn close(&self) -> Result<()> {
        let was_closed = std::mem::replace(&mut self.state().closed, true);
        if !was_closed {
            if let Some(active) = &self.active {
                active.current.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ActivePages {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Opens a fresh page from `build` for every target.
pub struct MockFactory {
    build: Box<dyn Fn() -> MockPage + Send + Sync>,
    opened: Mutex<Vec<MockPage>>,
    active: Arc<ActivePages>,
    fail_open: bool,
}

impl MockFactory {
    pub fn new(build: impl Fn() -> MockPage + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            opened: Mutex::new(Vec::new()),
            active: Arc::new(ActivePages::default()),
            fail_open: false,
        }
    }

    pub fn failing() -> Self {
        let mut factory = Self::new(MockPage::new);
        factory.fail_open = true;
        factory
    }

    pub fn opened(&self) -> Vec<MockPage> {
        self.opened.lock().unwrap().clone()
    }

    pub fn peak_open_pages(&self) -> usize {
        self.active.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFactory for MockFactory {
    type Page = MockPage;

    async fn open_page(&self) -> Result<MockPage> {
        if self.fail_open {
            return Err(BrowserError::NoPage);
        }
        let mut page = (self.build)();
        page.active = Some(Arc::clone(&self.active));

        let current = self.active.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.peak.fetch_max(current, Ordering::SeqCst);

        self.opened.lock().unwrap().push(page.clone());
        Ok(page)
    }
}
