//! Variant discovery
//!
//! Reads the selectable options of a product page. When variants are nested
//! under a primary choice (storage under color), every primary option is tried
//! and the one unlocking the most secondary options wins, because catalogs are
//! not orthogonal: not every color offers every storage size.

use super::interaction::InteractionStrategy;
use super::naming::unique_labels;
use super::profile::{OptionGroup, SelectorProfile};
use crate::browser::{Locator, PageDriver};
use crate::config::Timings;
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};

/// One purchasable option of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDescriptor {
    /// Raw option value as read from the page
    pub id: String,
    /// Filesystem-safe, unique within one product
    pub label: String,
}

impl VariantDescriptor {
    /// Builds descriptors with collision-free labels, preserving order.
    pub fn from_ids(ids: Vec<String>) -> Vec<Self> {
        let labels = unique_labels(&ids);
        ids.into_iter()
            .zip(labels)
            .map(|(id, label)| Self { id, label })
            .collect()
    }
}

/// Variants plus the primary option left selected to reach them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    /// Set only for two-dimensional profiles
    pub primary: Option<String>,
    pub variants: Vec<VariantDescriptor>,
}

/// Picks the entry with strictly the highest count; the first one wins ties.
/// Entries with a zero count never win.
pub fn best_primary<S: AsRef<str>>(counts: &[(S, usize)]) -> Option<&str> {
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if *count > best.map_or(0, |(_, c)| c) {
            best = Some((value.as_ref(), *count));
        }
    }
    best.map(|(value, _)| value)
}

pub struct VariantEnumerator<'s, 'p, D: PageDriver + ?Sized> {
    strategy: &'s InteractionStrategy<'p, D>,
    timings: &'s Timings,
}

impl<'s, 'p, D: PageDriver + ?Sized> VariantEnumerator<'s, 'p, D> {
    pub fn new(strategy: &'s InteractionStrategy<'p, D>, timings: &'s Timings) -> Self {
        Self { strategy, timings }
    }

    /// Discovers the variants to capture, leaving the page with the winning
    /// primary option selected when the profile has a secondary dimension.
    pub async fn enumerate(
        &self,
        profile: &SelectorProfile,
    ) -> Result<Vec<VariantDescriptor>, CaptureError> {
        self.enumerate_with_primary(profile)
            .await
            .map(|enumeration| enumeration.variants)
    }

    pub async fn enumerate_with_primary(
        &self,
        profile: &SelectorProfile,
    ) -> Result<Enumeration, CaptureError> {
        self.open(&profile.primary).await;
        let primaries = self.read(&profile.primary).await;
        if primaries.is_empty() {
            return Err(CaptureError::NoVariants(format!(
                "no options matched '{}'",
                profile.primary.option_list_selector
            )));
        }
        log::info!("Found {} option(s): {:?}", primaries.len(), primaries);

        let Some(secondary) = &profile.secondary else {
            return Ok(Enumeration {
                primary: None,
                variants: VariantDescriptor::from_ids(primaries),
            });
        };

        let mut counts = Vec::with_capacity(primaries.len());
        for primary in &primaries {
            if let Err(e) = self.select(&profile.primary, primary).await {
                log::warn!("Could not select '{}' while probing: {}", primary, e);
                continue;
            }
            self.page().pause(self.timings.option_render()).await;
            let count = self.read(secondary).await.len();
            log::debug!("'{}' unlocks {} option(s)", primary, count);
            counts.push((primary.clone(), count));
        }

        let best = best_primary(&counts).map(str::to_string);
        if let Some(best) = &best {
            log::info!("Selected '{}' as the richest option", best);
            if let Err(e) = self.select(&profile.primary, best).await {
                log::warn!("Could not re-select '{}': {}", best, e);
            }
            self.page().pause(self.timings.reopen_delay()).await;
        }

        let variants = self.read(secondary).await;
        if variants.is_empty() {
            return Err(CaptureError::NoVariants(format!(
                "no options matched '{}' for any of {} primary option(s)",
                secondary.option_list_selector,
                primaries.len()
            )));
        }
        Ok(Enumeration {
            primary: best,
            variants: VariantDescriptor::from_ids(variants),
        })
    }

    /// Selects `value` in `group`, reopening its dropdown first if it has one.
    pub async fn select(&self, group: &OptionGroup, value: &str) -> Result<(), CaptureError> {
        if let Some(trigger) = &group.dropdown_trigger {
            self.strategy
                .soft_click(&Locator::css(trigger.as_str()))
                .await;
            self.page().pause(self.timings.reopen_delay()).await;
        }
        self.strategy
            .forced_click(&group.select_locator(value))
            .await
    }

    async fn open(&self, group: &OptionGroup) {
        let Some(trigger) = &group.dropdown_trigger else {
            return;
        };
        let trigger = Locator::css(trigger.as_str());
        if !self
            .strategy
            .is_present(&trigger, self.timings.selector_timeout())
            .await
        {
            log::debug!("Dropdown trigger {} did not appear", trigger);
        }
        self.strategy.soft_click(&trigger).await;
        self.page().pause(self.timings.option_render()).await;
    }

    /// Option values in page order, duplicates dropped.
    async fn read(&self, group: &OptionGroup) -> Vec<String> {
        let values = match self
            .page()
            .query_selector_all(&group.option_list_selector, &group.option_source)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                log::warn!(
                    "Reading options '{}' failed: {}",
                    group.option_list_selector,
                    e
                );
                return Vec::new();
            }
        };

        let mut unique: Vec<String> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        unique
    }

    fn page(&self) -> &'p D {
        self.strategy.page()
    }
}
