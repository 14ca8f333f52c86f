//! Capture configuration
//!
//! A run is described by one JSON document: the site's selector profile plus
//! timing and concurrency knobs. Every field but `profile` has a default.

use crate::capture::profile::{SelectorProfile, StageSpec};
use crate::error::CaptureError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub profile: SelectorProfile,

    #[serde(default)]
    pub timings: Timings,

    /// Targets processed at once, each on its own page
    #[serde(default = "default_max_concurrent_targets")]
    pub max_concurrent_targets: usize,

    /// Extra navigation attempts after the first failure
    #[serde(default)]
    pub navigation_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,

    /// Navigate back to the product page before every variant after the first
    #[serde(default)]
    pub reload_between_variants: bool,
}

/// Bounded waits, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// After selecting a variant, before its stages run
    pub settle_delay_ms: u64,
    /// After opening a selection control, for its options to render
    pub option_render_ms: u64,
    /// After reopening a dropdown, before picking an option
    pub reopen_delay_ms: u64,
    /// After dismissing popups
    pub popup_settle_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Waiting for DOMContentLoaded after a navigating click
    pub load_state_timeout_ms: u64,
    pub click_timeout_ms: u64,
    /// Waiting for required controls to appear
    pub selector_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
            option_render_ms: 1000,
            reopen_delay_ms: 500,
            popup_settle_ms: 1500,
            navigation_timeout_ms: 60_000,
            load_state_timeout_ms: 30_000,
            click_timeout_ms: 1000,
            selector_timeout_ms: 5000,
        }
    }
}

impl Timings {
    /// All waits zeroed except the timeouts; used by tests and dry runs.
    pub fn instant() -> Self {
        Self {
            settle_delay_ms: 0,
            option_render_ms: 0,
            reopen_delay_ms: 0,
            popup_settle_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn option_render(&self) -> Duration {
        Duration::from_millis(self.option_render_ms)
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }

    pub fn popup_settle(&self) -> Duration {
        Duration::from_millis(self.popup_settle_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn load_state_timeout(&self) -> Duration {
        Duration::from_millis(self.load_state_timeout_ms)
    }

    pub fn click_timeout(&self) -> Duration {
        Duration::from_millis(self.click_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

fn default_max_concurrent_targets() -> usize {
    1
}

impl CaptureConfig {
    pub fn new(profile: SelectorProfile) -> Self {
        Self {
            profile,
            timings: Timings::default(),
            max_concurrent_targets: default_max_concurrent_targets(),
            navigation_retries: 0,
            viewport: None,
            reload_between_variants: false,
        }
    }

    /// Configuration for a built-in site profile.
    pub fn for_site(site: &str) -> Option<Self> {
        let profile = SelectorProfile::builtin(site)?;
        let mut config = Self::new(profile);
        config.viewport = Some(Viewport {
            width: 1280,
            height: 2000,
        });
        // Each variant must start from the product page, not where the last one ended
        config.reload_between_variants = config.profile.has_navigating_stage();
        Some(config)
    }

    /// Load and validate a configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self, CaptureError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: CaptureConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that would otherwise surface mid-run.
    pub fn validate(&self) -> Result<(), CaptureError> {
        let profile = &self.profile;

        if profile.site_name.trim().is_empty() {
            return Err(CaptureError::Config("site_name cannot be empty".to_string()));
        }

        if profile.primary.option_list_selector.trim().is_empty() {
            return Err(CaptureError::Config(
                "option_list_selector cannot be empty".to_string(),
            ));
        }

        if let Some(secondary) = &profile.secondary {
            if secondary.option_list_selector.trim().is_empty() {
                return Err(CaptureError::Config(
                    "secondary option_list_selector cannot be empty".to_string(),
                ));
            }
        }

        validate_stage_names(&profile.stages)?;

        if let Some(promotions) = &profile.promotions {
            if promotions.overview_stage.trim().is_empty() {
                return Err(CaptureError::Config(
                    "promotions overview_stage cannot be empty".to_string(),
                ));
            }
            if promotions.card_selector.trim().is_empty() {
                return Err(CaptureError::Config(
                    "promotions card_selector cannot be empty".to_string(),
                ));
            }
            validate_stage_names(&promotions.card_stages)?;
        }

        if let Some(listing) = &profile.listing {
            if listing.link_selector.trim().is_empty() {
                return Err(CaptureError::Config(
                    "listing link_selector cannot be empty".to_string(),
                ));
            }
            Regex::new(&listing.path_pattern).map_err(|e| {
                CaptureError::Config(format!(
                    "Invalid listing path_pattern '{}': {}",
                    listing.path_pattern, e
                ))
            })?;
        }

        if self.max_concurrent_targets == 0 {
            return Err(CaptureError::Config(
                "max_concurrent_targets must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_stage_names(stages: &[StageSpec]) -> Result<(), CaptureError> {
    let mut names = HashSet::new();
    for (i, stage) in stages.iter().enumerate() {
        if stage.name.trim().is_empty() {
            return Err(CaptureError::Config(format!(
                "Stage {} has an empty name",
                i + 1
            )));
        }
        // Stage names are part of artifact paths
        if !names.insert(stage.name.as_str()) {
            return Err(CaptureError::Config(format!(
                "Duplicate stage name '{}'",
                stage.name
            )));
        }
    }
    Ok(())
}
