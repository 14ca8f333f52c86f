//! Page driver capability surface
//!
//! The capture core only talks to a browser through these traits. `ChromePage`
//! is the production implementation; tests substitute a scripted page.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Document readiness milestones a driver can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    DomContentLoaded,
    Load,
}

/// Whether a screenshot covers the whole document or only the viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenshotScope {
    #[default]
    FullPage,
    Viewport,
}

impl ScreenshotScope {
    pub fn is_full_page(self) -> bool {
        matches!(self, ScreenshotScope::FullPage)
    }
}

/// How the value of each matched element is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSource {
    /// Trimmed inner text of the element
    #[default]
    Text,
    /// Value of the named attribute (elements without it are skipped)
    Attribute(String),
}

/// A CSS selector, optionally narrowed to elements whose visible text
/// contains `has_text` (case-insensitive, whitespace-normalised). When
/// several elements match, one whose whole text equals `has_text` wins
/// over the first one that merely contains it.
///
/// Deserialises from a plain selector string or from `{ "css": .., "has_text": .. }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LocatorRepr")]
pub struct Locator {
    pub css: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_text: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocatorRepr {
    Css(String),
    Full {
        css: String,
        #[serde(default)]
        has_text: Option<String>,
    },
}

impl From<LocatorRepr> for Locator {
    fn from(repr: LocatorRepr) -> Self {
        match repr {
            LocatorRepr::Css(css) => Locator { css, has_text: None },
            LocatorRepr::Full { css, has_text } => Locator { css, has_text },
        }
    }
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            has_text: None,
        }
    }

    pub fn with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            has_text: Some(text.into()),
        }
    }

    /// Whether `text` satisfies this locator's text filter.
    pub fn text_matches(&self, text: &str) -> bool {
        match &self.has_text {
            None => true,
            Some(needle) => normalize_text(text).contains(&normalize_text(needle)),
        }
    }

    pub fn text_equals(&self, text: &str) -> bool {
        match &self.has_text {
            None => true,
            Some(needle) => normalize_text(text) == normalize_text(needle),
        }
    }

    /// Index of the element this locator picks among candidates with the
    /// given texts: the first exact match, else the first containing match.
    pub fn pick<S: AsRef<str>>(&self, texts: &[S]) -> Option<usize> {
        texts
            .iter()
            .position(|t| self.text_equals(t.as_ref()))
            .or_else(|| texts.iter().position(|t| self.text_matches(t.as_ref())))
    }
}

impl From<&str> for Locator {
    fn from(css: &str) -> Self {
        Locator::css(css)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.has_text {
            Some(text) => write!(f, "{}:has-text('{}')", self.css, text),
            None => f.write_str(&self.css),
        }
    }
}

/// Lowercases and collapses runs of whitespace to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One exclusively owned browser page.
///
/// Every method is a suspension point. Presence queries return `Ok(false)`
/// for a missing element; `Err` is reserved for driver failures.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;

    /// Polls until the locator matches or `timeout` elapses. `Ok(false)` on timeout.
    async fn wait_for_selector(&self, locator: &Locator, timeout: Duration) -> Result<bool>;

    async fn query_selector(&self, locator: &Locator) -> Result<bool>;

    /// Reads every element matching `selector`, in document order.
    async fn query_selector_all(&self, selector: &str, source: &OptionSource)
        -> Result<Vec<String>>;

    /// Standard (input-level) click on the first matching element.
    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Invokes the element's own click behaviour from inside the document,
    /// bypassing overlays. `Ok(false)` if nothing matched.
    async fn dom_click(&self, locator: &Locator) -> Result<bool> {
        let value = self.evaluate(&dom_click_script(locator)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Number of elements matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize> {
        let css = serde_json::Value::String(selector.to_string());
        let value = self
            .evaluate(&format!("document.querySelectorAll({}).length", css))
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    /// In-document click on the `index`-th element matching `selector`.
    /// `Ok(false)` if there are not that many.
    async fn dom_click_nth(&self, selector: &str, index: usize) -> Result<bool> {
        let css = serde_json::Value::String(selector.to_string());
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll({css})[{index}];
                if (!el) return false;
                el.click();
                return true;
            }})()"#
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn screenshot(&self, scope: ScreenshotScope) -> Result<Vec<u8>>;

    async fn set_viewport_size(&self, width: u32, height: u32) -> Result<()>;

    /// Fixed settle delay.
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(&self) -> Result<()>;
}

/// Hands out fresh pages, one per product target.
#[async_trait]
pub trait PageFactory: Send + Sync {
    type Page: PageDriver;

    async fn open_page(&self) -> Result<Self::Page>;
}

/// Builds the in-document script used by [`PageDriver::dom_click`].
pub fn dom_click_script(locator: &Locator) -> String {
    let css = serde_json::Value::String(locator.css.clone());
    let text = match &locator.has_text {
        Some(t) => serde_json::Value::String(normalize_text(t)),
        None => serde_json::Value::Null,
    };
    format!(
        r#"(() => {{
            const css = {css};
            const text = {text};
            const norm = s => (s || '').split(/\s+/).filter(Boolean).join(' ').toLowerCase();
            const all = Array.from(document.querySelectorAll(css));
            const label = e => norm(e.innerText || e.textContent);
            const el = text === null
                ? all[0]
                : all.find(e => label(e) === text) || all.find(e => label(e).includes(text));
            if (!el) return false;
            el.click();
            return true;
        }})()"#
    )
}
