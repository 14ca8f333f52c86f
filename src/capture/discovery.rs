//! Product URL discovery on listing pages
//!
//! Listings render product cards lazily, so the page is scrolled one
//! viewport at a time until the link count stops changing for
//! `stable_rounds` consecutive scrolls.

use super::interaction::InteractionStrategy;
use super::profile::ListingProfile;
use crate::browser::{LoadState, OptionSource, PageDriver};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

const SCROLL_ONE_VIEWPORT: &str = "window.scrollBy(0, window.innerHeight)";

pub struct ListingDiscovery<'a> {
    config: &'a CaptureConfig,
    listing: &'a ListingProfile,
    pattern: Regex,
}

impl<'a> ListingDiscovery<'a> {
    /// Fails when the site profile has no listing page.
    pub fn new(config: &'a CaptureConfig) -> Result<Self, CaptureError> {
        let listing = config.profile.listing.as_ref().ok_or_else(|| {
            CaptureError::Config(format!(
                "{} has no listing page to discover products on",
                config.profile.site_name
            ))
        })?;
        let pattern = Regex::new(&listing.path_pattern).map_err(|e| {
            CaptureError::Config(format!(
                "Invalid listing path_pattern '{}': {}",
                listing.path_pattern, e
            ))
        })?;

        Ok(Self {
            config,
            listing,
            pattern,
        })
    }

    /// Loads the listing and returns its product URLs, deduplicated and sorted.
    pub async fn discover<D: PageDriver>(&self, page: &D) -> Result<Vec<String>, CaptureError> {
        let timings = &self.config.timings;
        let url = &self.listing.url;
        log::info!("Discovering products on {}", url);

        page.navigate(url, timings.navigation_timeout())
            .await
            .map_err(|e| CaptureError::NavigationFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if let Err(e) = page
            .wait_for_load_state(LoadState::DomContentLoaded, timings.load_state_timeout())
            .await
        {
            log::warn!("{}: load state not reached: {}", url, e);
        }

        let strategy = InteractionStrategy::new(page, timings.click_timeout());
        strategy
            .dismiss_optional_popups(&self.config.profile.popup_dismiss_selectors)
            .await;

        if let Some(viewport) = self.config.viewport {
            if let Err(e) = page.set_viewport_size(viewport.width, viewport.height).await {
                log::warn!("{}: could not resize viewport: {}", url, e);
            }
        }

        let rendered = self.scroll_until_stable(page).await;
        log::info!("{}: {} link(s) rendered", url, rendered);

        let hrefs = page
            .query_selector_all(
                &self.listing.link_selector,
                &OptionSource::Attribute("href".to_string()),
            )
            .await
            .map_err(|e| CaptureError::InteractionFailed {
                selector: self.listing.link_selector.clone(),
                reason: e.to_string(),
            })?;

        let products = product_links(url, &hrefs, &self.pattern)?;
        log::info!("{}: {} product URL(s)", url, products.len());
        Ok(products)
    }

    /// Scrolls until the link count settles; returns the final count.
    async fn scroll_until_stable<D: PageDriver>(&self, page: &D) -> usize {
        let interval = Duration::from_millis(self.listing.scroll_interval_ms);
        let mut previous = 0;
        let mut unchanged = 0;

        for round in 1..=self.listing.max_scrolls {
            if let Err(e) = page.evaluate(SCROLL_ONE_VIEWPORT).await {
                log::warn!("Scrolling the listing failed: {}", e);
                break;
            }
            page.pause(interval).await;

            let count = match page.count(&self.listing.link_selector).await {
                Ok(count) => count,
                Err(e) => {
                    log::debug!("Counting links failed: {}", e);
                    previous
                }
            };

            if count == previous {
                unchanged += 1;
                if unchanged >= self.listing.stable_rounds {
                    log::debug!("Listing settled after {} scroll(s)", round);
                    break;
                }
            } else {
                previous = count;
                unchanged = 0;
            }
        }

        previous
    }
}

/// Resolves `hrefs` against `base` and keeps the http(s) links whose path
/// matches `pattern`. Fragments are dropped before deduplication.
pub fn product_links(
    base: &str,
    hrefs: &[String],
    pattern: &Regex,
) -> Result<Vec<String>, CaptureError> {
    let base = Url::parse(base)
        .map_err(|e| CaptureError::Config(format!("Invalid listing url '{}': {}", base, e)))?;

    let links: BTreeSet<String> = hrefs
        .iter()
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|link| matches!(link.scheme(), "http" | "https"))
        .filter(|link| pattern.is_match(link.path()))
        .map(|mut link| {
            link.set_fragment(None);
            link.to_string()
        })
        .collect();

    Ok(links.into_iter().collect())
}
