//! Declarative per-site selector profiles
//!
//! A profile is everything the orchestrator needs to know about one site:
//! where the variant controls live, which optional flows exist and how to
//! get rid of popups. Profiles are immutable for the duration of a run.

use crate::browser::{Locator, OptionSource, ScreenshotScope};
use serde::{Deserialize, Serialize};

/// Placeholder replaced by the raw option value in `option_select_template`.
pub const OPTION_PLACEHOLDER: &str = "{option}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorProfile {
    /// Folder name for this site's artifacts (e.g. "Vodafone UK")
    pub site_name: String,

    /// Element holding the product name; falls back to the URL slug
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_selector: Option<String>,

    /// Prefix the title with the brand taken from the URL's last path segment
    #[serde(default)]
    pub brand_from_url: bool,

    /// The selection control that is always present
    #[serde(flatten)]
    pub primary: OptionGroup,

    /// Nested dimension unlocked by the primary choice (e.g. storage under color)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<OptionGroup>,

    /// Executed in declaration order for every variant
    #[serde(default)]
    pub stages: Vec<StageSpec>,

    /// Soft-clicked in order once after navigation
    #[serde(default)]
    pub popup_dismiss_selectors: Vec<String>,

    /// Page-level offers captured once per target after the variants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotions: Option<PromotionFlow>,

    /// Where product URLs for this site are discovered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingProfile>,
}

/// A promotions modal listing offer cards, each with its own detail view.
///
/// The open modal is captured as `{overview_stage}_all.png`. Every card is
/// then opened in turn and `card_stages` run for it with the label
/// `offer{n}` (1-based), before `back` returns to the list. `close` shuts
/// the modal once all cards are done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionFlow {
    pub opener: Locator,

    #[serde(default = "default_overview_stage")]
    pub overview_stage: String,

    /// Matches every offer card button inside the open modal
    pub card_selector: String,

    #[serde(default)]
    pub card_stages: Vec<StageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back: Option<Locator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<Locator>,

    /// After opening the modal or a card
    #[serde(default = "default_post_click_wait_ms")]
    pub settle_ms: u64,
}

fn default_overview_stage() -> String {
    "Promotions".to_string()
}

/// A listing page that lazily renders product links while scrolling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingProfile {
    pub url: String,

    /// Anchors whose `href` may point at a product
    pub link_selector: String,

    /// Regex the resolved link's path must match
    pub path_pattern: String,

    /// Consecutive scrolls without new links before the listing counts as loaded
    #[serde(default = "default_stable_rounds")]
    pub stable_rounds: u32,

    #[serde(default = "default_scroll_interval_ms")]
    pub scroll_interval_ms: u64,

    /// Hard stop for listings that never settle
    #[serde(default = "default_max_scrolls")]
    pub max_scrolls: u32,
}

fn default_stable_rounds() -> u32 {
    3
}

fn default_scroll_interval_ms() -> u64 {
    2000
}

fn default_max_scrolls() -> u32 {
    200
}

/// One selection dimension on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionGroup {
    /// Control that must be opened before options render (dropdowns)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropdown_trigger: Option<String>,

    /// Matches every option element of this dimension
    pub option_list_selector: String,

    #[serde(default)]
    pub option_source: OptionSource,

    /// Selector for one option with `{option}` standing for its raw value.
    /// Without it the option is picked by its text inside the option list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_select_template: Option<String>,
}

impl OptionGroup {
    /// Locator that picks `value` in this dimension.
    pub fn select_locator(&self, value: &str) -> Locator {
        match &self.option_select_template {
            Some(template) => {
                Locator::css(template.replace(OPTION_PLACEHOLDER, &escape_css_string(value)))
            }
            None => Locator::with_text(self.option_list_selector.clone(), value),
        }
    }
}

/// Escapes a value for use inside a quoted CSS attribute selector.
fn escape_css_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | '"') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One capturable UI state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,

    /// Element that opens this stage. `None` captures the state the variant
    /// selection left the page in.
    #[serde(default, alias = "trigger_selector", skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Locator>,

    /// Further clicks after the trigger; each must be present or the stage is skipped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up: Vec<Locator>,

    /// Skip entirely unless the immediately preceding stage completed
    #[serde(default)]
    pub requires_prior_success: bool,

    /// How long the trigger may take to appear; 0 checks once
    #[serde(default)]
    pub trigger_timeout_ms: u64,

    /// Wait for DOMContentLoaded after the clicks (the stage navigates)
    #[serde(default)]
    pub wait_for_navigation: bool,

    #[serde(default = "default_post_click_wait_ms")]
    pub post_click_wait_ms: u64,

    #[serde(default)]
    pub screenshot_scope: ScreenshotScope,

    /// Soft-clicked after the screenshot to restore the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_selector: Option<Locator>,

    /// Key pressed after the screenshot (and after `cleanup_selector`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_key: Option<String>,
}

fn default_post_click_wait_ms() -> u64 {
    2000
}

impl StageSpec {
    /// A stage with the default settle policy and no trigger.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger: None,
            follow_up: Vec::new(),
            requires_prior_success: false,
            trigger_timeout_ms: 0,
            wait_for_navigation: false,
            post_click_wait_ms: default_post_click_wait_ms(),
            screenshot_scope: ScreenshotScope::FullPage,
            cleanup_selector: None,
            cleanup_key: None,
        }
    }

    pub fn triggered_by(mut self, trigger: impl Into<Locator>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn then_click(mut self, locator: impl Into<Locator>) -> Self {
        self.follow_up.push(locator.into());
        self
    }

    pub fn requiring_prior_success(mut self) -> Self {
        self.requires_prior_success = true;
        self
    }

    pub fn navigating(mut self) -> Self {
        self.wait_for_navigation = true;
        self
    }

    pub fn settle_ms(mut self, ms: u64) -> Self {
        self.post_click_wait_ms = ms;
        self
    }

    pub fn scope(mut self, scope: ScreenshotScope) -> Self {
        self.screenshot_scope = scope;
        self
    }

    pub fn cleanup(mut self, locator: impl Into<Locator>) -> Self {
        self.cleanup_selector = Some(locator.into());
        self
    }

    pub fn cleanup_with_key(mut self, key: impl Into<String>) -> Self {
        self.cleanup_key = Some(key.into());
        self
    }
}

impl SelectorProfile {
    /// Looks up a built-in profile by its CLI id.
    pub fn builtin(site: &str) -> Option<Self> {
        match site {
            "vodafone-uk" => Some(Self::vodafone_uk()),
            "tmobile-us" => Some(Self::tmobile_us()),
            _ => None,
        }
    }

    pub fn builtin_ids() -> &'static [&'static str] {
        &["vodafone-uk", "tmobile-us"]
    }

    /// Capacity dropdown with payment, plan and airtime flows.
    pub fn vodafone_uk() -> Self {
        Self {
            site_name: "Vodafone UK".to_string(),
            title_selector: None,
            brand_from_url: false,
            primary: OptionGroup {
                dropdown_trigger: Some("#selectedCapacity".to_string()),
                option_list_selector: "ul[role='listbox'] li".to_string(),
                option_source: OptionSource::Text,
                option_select_template: None,
            },
            secondary: None,
            stages: vec![
                StageSpec::new("PDP").settle_ms(0),
                StageSpec::new("MSRP")
                    .triggered_by(Locator::with_text("button", "Pay for your phone in one go"))
                    .scope(ScreenshotScope::Viewport)
                    .cleanup_with_key("Escape"),
                StageSpec::new("Phoneplan")
                    .triggered_by(Locator::with_text("button", "Build your own plan"))
                    .then_click(Locator::with_text("button", "Continue without trade in"))
                    .navigating()
                    .settle_ms(3000),
                StageSpec::new("Airtime")
                    .triggered_by("button[data-selector='configurator-cta']")
                    .navigating()
                    .settle_ms(3000),
            ],
            popup_dismiss_selectors: vec![
                "#onetrust-accept-btn-handler".to_string(),
                "button[data-testid='newOrExisting-cta-new']".to_string(),
            ],
            promotions: None,
            listing: Some(ListingProfile {
                url: "https://www.vodafone.co.uk/mobile/pay-monthly-contracts".to_string(),
                link_selector: "a[href*='/mobile/pay-monthly-contracts/']".to_string(),
                path_pattern: "^/mobile/pay-monthly-contracts/[^/]+/[^/]+".to_string(),
                stable_rounds: default_stable_rounds(),
                scroll_interval_ms: default_scroll_interval_ms(),
                max_scrolls: default_max_scrolls(),
            }),
        }
    }

    /// Color radios gating storage radios, with an optional airtime flow.
    pub fn tmobile_us() -> Self {
        Self {
            site_name: "T-Mobile US".to_string(),
            title_selector: Some("h1".to_string()),
            brand_from_url: true,
            primary: OptionGroup {
                dropdown_trigger: None,
                option_list_selector: ".upf-skuSelector__group--color input[type=radio]"
                    .to_string(),
                option_source: OptionSource::Attribute("value".to_string()),
                option_select_template: Some("input[value='{option}']".to_string()),
            },
            secondary: Some(OptionGroup {
                dropdown_trigger: None,
                option_list_selector: ".upf-skuSelector__group--storage input[type=radio]"
                    .to_string(),
                option_source: OptionSource::Attribute("value".to_string()),
                option_select_template: Some("input[value='{option}']".to_string()),
            }),
            stages: vec![
                StageSpec::new("PDP").settle_ms(0),
                StageSpec::new("Airtime")
                    .triggered_by("button[data-selector='configurator-cta']")
                    .navigating()
                    .settle_ms(3000),
            ],
            popup_dismiss_selectors: vec![
                "#onetrust-accept-btn-handler".to_string(),
                "[data-testid='_15gifts-engagement-bubble-button-secondary']".to_string(),
                ".op-block-class".to_string(),
            ],
            promotions: Some(PromotionFlow {
                opener: Locator::css(".upf-productCard__promo--action"),
                overview_stage: default_overview_stage(),
                card_selector: "button.upf-productPromoDetails__card--btn".to_string(),
                card_stages: vec![
                    StageSpec::new("Offer"),
                    StageSpec::new("Airtime")
                        .triggered_by("button[data-selector='configurator-cta']")
                        .navigating()
                        .settle_ms(3000),
                ],
                back: Some(Locator::css("button.upf-productPromoDetails__card--back")),
                close: Some(Locator::css("button.phx-modal__close")),
                settle_ms: 3000,
            }),
            listing: Some(ListingProfile {
                url: "https://www.t-mobile.com/cell-phones".to_string(),
                link_selector: "a[itemprop='url']".to_string(),
                path_pattern: "^/cell-phone/".to_string(),
                stable_rounds: default_stable_rounds(),
                scroll_interval_ms: default_scroll_interval_ms(),
                max_scrolls: default_max_scrolls(),
            }),
        }
    }

    /// The dimension whose options become variants.
    pub fn variant_group(&self) -> &OptionGroup {
        self.secondary.as_ref().unwrap_or(&self.primary)
    }

    /// Whether any stage that may run on this site leaves the product page.
    pub fn has_navigating_stage(&self) -> bool {
        let card_stages = self
            .promotions
            .iter()
            .flat_map(|promotions| promotions.card_stages.iter());
        self.stages
            .iter()
            .chain(card_stages)
            .any(|stage| stage.wait_for_navigation)
    }
}
