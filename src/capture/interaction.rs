//! Resilient click primitives
//!
//! Optional UI (cookie banners, modals, optional flows) is the normal case on
//! configurator pages, so absence is reported as `false` rather than an error.

use crate::browser::{Locator, PageDriver};
use crate::error::CaptureError;
use std::time::Duration;

/// Stateless click helpers bound to one page.
pub struct InteractionStrategy<'a, D: PageDriver + ?Sized> {
    page: &'a D,
    click_timeout: Duration,
}

impl<'a, D: PageDriver + ?Sized> InteractionStrategy<'a, D> {
    pub fn new(page: &'a D, click_timeout: Duration) -> Self {
        Self {
            page,
            click_timeout,
        }
    }

    pub fn page(&self) -> &'a D {
        self.page
    }

    /// Clicks the element if it is there. Never fails.
    pub async fn soft_click(&self, locator: &Locator) -> bool {
        match self.page.query_selector(locator).await {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("soft click: {} absent", locator);
                return false;
            }
            Err(e) => {
                log::debug!("soft click: lookup of {} failed: {}", locator, e);
                return false;
            }
        }

        match self.page.click(locator, self.click_timeout).await {
            Ok(()) => {
                log::debug!("soft click: clicked {}", locator);
                true
            }
            Err(e) => {
                log::debug!("soft click: {} not clickable: {}", locator, e);
                false
            }
        }
    }

    /// Standard click, falling back to an in-document click when the element
    /// is covered, detached or slow to respond.
    pub async fn forced_click(&self, locator: &Locator) -> Result<(), CaptureError> {
        let standard_error = match self.page.click(locator, self.click_timeout).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        log::debug!(
            "forced click: standard click on {} failed ({}), using DOM fallback",
            locator,
            standard_error
        );

        match self.page.dom_click(locator).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CaptureError::InteractionFailed {
                selector: locator.to_string(),
                reason: format!("{}; DOM fallback found no element", standard_error),
            }),
            Err(fallback_error) => Err(CaptureError::InteractionFailed {
                selector: locator.to_string(),
                reason: format!("{}; DOM fallback failed: {}", standard_error, fallback_error),
            }),
        }
    }

    /// Soft-clicks every selector in order, ignoring outcomes.
    pub async fn dismiss_optional_popups(&self, selectors: &[String]) {
        for selector in selectors {
            if self.soft_click(&Locator::css(selector.as_str())).await {
                log::info!("Dismissed popup {}", selector);
            }
        }
    }

    /// Presence check with an optional bounded wait; errors count as absent.
    pub async fn is_present(&self, locator: &Locator, timeout: Duration) -> bool {
        let lookup = if timeout.is_zero() {
            self.page.query_selector(locator).await
        } else {
            self.page.wait_for_selector(locator, timeout).await
        };

        lookup.unwrap_or_else(|e| {
            log::debug!("lookup of {} failed, treating as absent: {}", locator, e);
            false
        })
    }
}
