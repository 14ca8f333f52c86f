//! End-to-end capture of one target against a scripted page

mod mock_page;

use mock_page::MockPage;
use std::path::PathBuf;
use variant_capture::browser::Locator;
use variant_capture::capture::{
    CaptureOrchestrator, CaptureState, MemoryArtifactSink, OptionGroup, PromotionFlow,
    SelectorProfile, StageSpec,
};
use variant_capture::config::{CaptureConfig, Timings, Viewport};
use variant_capture::error::ErrorKind;
use variant_capture::targets::ProductTarget;
use variant_capture::OptionSource;

const URL: &str = "https://shop.example/mobile/apple/iphone-13";
const CAPACITY_LIST: &str = "li.capacity";

fn config(stages: Vec<StageSpec>) -> CaptureConfig {
    let profile = SelectorProfile {
        site_name: "Example".to_string(),
        title_selector: None,
        brand_from_url: false,
        primary: OptionGroup {
            dropdown_trigger: Some("#capacity".to_string()),
            option_list_selector: CAPACITY_LIST.to_string(),
            option_source: OptionSource::Text,
            option_select_template: None,
        },
        secondary: None,
        stages,
        popup_dismiss_selectors: vec!["#accept-cookies".to_string(), "#newsletter-close".to_string()],
        promotions: None,
        listing: None,
    };
    let mut config = CaptureConfig::new(profile);
    config.timings = Timings::instant();
    config
}

fn target() -> ProductTarget {
    ProductTarget::new(URL, "out", "Example")
}

fn pdp_and_airtime() -> Vec<StageSpec> {
    vec![
        StageSpec::new("PDP"),
        StageSpec::new("Airtime")
            .triggered_by("button.airtime")
            .requiring_prior_success(),
    ]
}

fn capacity_page() -> MockPage {
    MockPage::new()
        .with_element("#capacity")
        .with_options(CAPACITY_LIST, &["128GB", "256GB"])
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_optional_stage_present_for_one_variant_only() {
    let page = capacity_page().with_element_when("button.airtime", CAPACITY_LIST, "256GB");
    let sink = MemoryArtifactSink::new();
    let config = config(pdp_and_airtime());

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert!(result.aborted.is_none());
    assert_eq!(result.completed_variants, 2);
    assert_eq!(result.artifacts.len(), 3);
    assert_eq!(result.skipped_stages, 1);
    assert_eq!(
        file_names(&sink.paths()),
        vec!["Airtime_256GB.png", "PDP_128GB.png", "PDP_256GB.png"]
    );
    assert_eq!(
        sink.paths()[0].parent(),
        Some(PathBuf::from("out/Example/Apple Iphone 13").as_path())
    );
    assert!(page.is_closed());
}

#[tokio::test]
async fn test_no_variants_aborts_without_artifacts() {
    let page = MockPage::new().with_element("#capacity");
    let sink = MemoryArtifactSink::new();
    let config = config(pdp_and_airtime());

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(result.abort_kind(), Some(ErrorKind::NoVariants));
    assert!(result.artifacts.is_empty());
    assert!(sink.paths().is_empty());
    assert_eq!(result.states.last(), Some(&CaptureState::Aborted(ErrorKind::NoVariants)));
    assert!(page.is_closed());
}

#[tokio::test]
async fn test_covered_trigger_still_produces_artifact() {
    let page = capacity_page()
        .with_element("button.airtime")
        .covered("button.airtime");
    let sink = MemoryArtifactSink::new();
    let config = config(pdp_and_airtime());

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(result.artifacts.len(), 4);
    assert_eq!(page.dom_clicks(), vec!["button.airtime", "button.airtime"]);
    // The airtime button opens UI in place, so no reload is needed
    assert_eq!(page.navigations(), vec![URL]);
    assert!(file_names(&sink.paths()).contains(&"Airtime_128GB.png".to_string()));
}

#[tokio::test]
async fn test_navigation_failure_aborts_and_closes_page() {
    let page = capacity_page().failing_navigations(1);
    let sink = MemoryArtifactSink::new();
    let config = config(pdp_and_airtime());

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(result.abort_kind(), Some(ErrorKind::NavigationFailed));
    assert_eq!(result.states, vec![CaptureState::Aborted(ErrorKind::NavigationFailed)]);
    assert!(result.product_title.is_none());
    assert_eq!(page.screenshot_count(), 0);
    assert!(page.is_closed());
}

#[tokio::test]
async fn test_navigation_retries_recover() {
    let page = capacity_page().failing_navigations(2);
    let sink = MemoryArtifactSink::new();
    let mut config = config(vec![StageSpec::new("PDP")]);
    config.navigation_retries = 2;

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert!(result.aborted.is_none());
    assert_eq!(page.navigations().len(), 3);
    assert_eq!(result.artifacts.len(), 2);
}

#[tokio::test]
async fn test_state_machine_order() {
    let page = capacity_page();
    let sink = MemoryArtifactSink::new();
    let config = config(vec![StageSpec::new("PDP")]);

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page, &target())
        .await;

    let variant = |v: &str| v.to_string();
    assert_eq!(
        result.states,
        vec![
            CaptureState::Navigated,
            CaptureState::PopupsDismissed,
            CaptureState::VariantsEnumerated,
            CaptureState::Selecting(variant("128GB")),
            CaptureState::StagesRunning(variant("128GB")),
            CaptureState::VariantDone(variant("128GB")),
            CaptureState::Selecting(variant("256GB")),
            CaptureState::StagesRunning(variant("256GB")),
            CaptureState::VariantDone(variant("256GB")),
            CaptureState::TargetDone,
        ]
    );
}

#[tokio::test]
async fn test_unselectable_variant_aborts_only_that_variant() {
    let page = capacity_page().broken(&Locator::with_text(CAPACITY_LIST, "128GB").to_string());
    let sink = MemoryArtifactSink::new();
    let config = config(vec![StageSpec::new("PDP")]);

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert!(result.aborted.is_none());
    assert_eq!(result.failed_variants, 1);
    assert_eq!(result.completed_variants, 1);
    assert_eq!(file_names(&sink.paths()), vec!["PDP_256GB.png"]);
    assert!(!result
        .states
        .contains(&CaptureState::StagesRunning("128GB".to_string())));
}

#[tokio::test]
async fn test_each_shot_taken_with_its_variant_selected() {
    let page = capacity_page();
    let sink = MemoryArtifactSink::new();
    let config = config(vec![StageSpec::new("PDP")]);

    CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(
        page.shot_selections(CAPACITY_LIST),
        vec![Some("128GB".to_string()), Some("256GB".to_string())]
    );
}

#[tokio::test]
async fn test_popups_dismissed_once_and_absent_ones_ignored() {
    let page = capacity_page().with_popup("#accept-cookies");
    let sink = MemoryArtifactSink::new();
    let config = config(vec![StageSpec::new("PDP")]);

    CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    let clicks = page.clicks();
    assert_eq!(clicks.iter().filter(|c| *c == "#accept-cookies").count(), 1);
    assert!(!clicks.contains(&"#newsletter-close".to_string()));
}

#[tokio::test]
async fn test_reload_between_variants() {
    let page = capacity_page().with_popup("#accept-cookies");
    let sink = MemoryArtifactSink::new();
    let mut config = config(vec![StageSpec::new("PDP")]);
    config.reload_between_variants = true;

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(page.navigations(), vec![URL, URL]);
    assert_eq!(result.artifacts.len(), 2);
    assert_eq!(
        page.shot_selections(CAPACITY_LIST),
        vec![Some("128GB".to_string()), Some("256GB".to_string())]
    );
}

#[tokio::test]
async fn test_title_and_viewport_from_config() {
    let page = capacity_page().with_text("h1", "iPhone 13");
    let sink = MemoryArtifactSink::new();
    let mut config = config(vec![StageSpec::new("PDP")]);
    config.profile.title_selector = Some("h1".to_string());
    config.profile.brand_from_url = true;
    config.viewport = Some(Viewport {
        width: 1280,
        height: 2000,
    });

    let target = ProductTarget::new("https://shop.example/cell-phone/apple-iphone-13", "out", "Example");

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target)
        .await;

    assert_eq!(result.product_title.as_deref(), Some("Apple iPhone 13"));
    assert_eq!(page.viewport(), Some((1280, 2000)));
    assert!(result.artifacts[0]
        .path
        .starts_with("out/Example/Apple iPhone 13"));
}

#[tokio::test]
async fn test_overlapping_option_labels_select_exact_option() {
    let page = MockPage::new()
        .with_element("#capacity")
        .with_options(CAPACITY_LIST, &["128GB Refurbished", "128GB"]);
    let sink = MemoryArtifactSink::new();
    let config = config(vec![StageSpec::new("PDP")]);

    CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(
        page.shot_selections(CAPACITY_LIST),
        vec![
            Some("128GB Refurbished".to_string()),
            Some("128GB".to_string())
        ]
    );
    assert_eq!(
        file_names(&sink.paths()),
        vec!["PDP_128GB.png", "PDP_128GB_Refurbished.png"]
    );
}

#[tokio::test]
async fn test_navigating_stage_reloads_before_next_variant() {
    let page = capacity_page()
        .with_element("button.airtime")
        .leaving_on("button.airtime");
    let sink = MemoryArtifactSink::new();
    let config = config(vec![
        StageSpec::new("PDP"),
        StageSpec::new("Airtime")
            .triggered_by("button.airtime")
            .navigating(),
    ]);
    assert!(!config.reload_between_variants);

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(result.completed_variants, 2);
    assert_eq!(result.failed_variants, 0);
    assert_eq!(page.navigations(), vec![URL, URL]);
    assert_eq!(
        file_names(&sink.paths()),
        vec![
            "Airtime_128GB.png",
            "Airtime_256GB.png",
            "PDP_128GB.png",
            "PDP_256GB.png"
        ]
    );
}

const VODAFONE_OPTIONS: &str = "ul[role='listbox'] li";
const CONFIGURATOR_CTA: &str = "button[data-selector='configurator-cta']";

#[tokio::test]
async fn test_builtin_profile_captures_every_variant_after_airtime() {
    let page = MockPage::new()
        .with_element("#selectedCapacity")
        .with_options(VODAFONE_OPTIONS, &["128GB", "256GB", "512GB"])
        .with_element(CONFIGURATOR_CTA)
        .leaving_on(CONFIGURATOR_CTA);
    let sink = MemoryArtifactSink::new();
    let mut config = CaptureConfig::for_site("vodafone-uk").unwrap();
    config.timings = Timings::instant();
    let target = ProductTarget::new(URL, "out", "Vodafone UK");

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target)
        .await;

    assert!(result.aborted.is_none());
    assert_eq!(result.completed_variants, 3);
    assert_eq!(result.failed_variants, 0);
    assert_eq!(page.navigations().len(), 3);
    assert_eq!(
        file_names(&sink.paths()),
        vec![
            "Airtime_128GB.png",
            "Airtime_256GB.png",
            "Airtime_512GB.png",
            "PDP_128GB.png",
            "PDP_256GB.png",
            "PDP_512GB.png"
        ]
    );
    // Every product page shot has its own capacity selected
    let selected: Vec<_> = page
        .shot_selections(VODAFONE_OPTIONS)
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(selected, vec!["128GB", "256GB", "512GB"]);
}

const OFFER_CARDS: &str = "button.offer-card";

fn with_promotions(mut config: CaptureConfig) -> CaptureConfig {
    config.profile.promotions = Some(PromotionFlow {
        opener: Locator::css("button.promo"),
        overview_stage: "Promotions".to_string(),
        card_selector: OFFER_CARDS.to_string(),
        card_stages: vec![
            StageSpec::new("Offer"),
            StageSpec::new("Airtime")
                .triggered_by("button.airtime")
                .navigating(),
        ],
        back: Some(Locator::css("button.back")),
        close: Some(Locator::css("button.close")),
        settle_ms: 0,
    });
    config
}

fn promo_page() -> MockPage {
    capacity_page()
        .with_element("button.promo")
        .with_options(OFFER_CARDS, &["Trade-in deal", "Buy one get one"])
        .with_element("button.back")
        .with_element("button.close")
}

fn count(clicks: &[String], key: &str) -> usize {
    clicks.iter().filter(|c| *c == key).count()
}

#[tokio::test]
async fn test_promotions_captured_once_per_target() {
    let page = promo_page();
    let sink = MemoryArtifactSink::new();
    let config = with_promotions(config(vec![StageSpec::new("PDP")]));

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert_eq!(result.completed_variants, 2);
    assert_eq!(result.skipped_stages, 2);
    assert_eq!(
        file_names(&sink.paths()),
        vec![
            "Offer_offer1.png",
            "Offer_offer2.png",
            "PDP_128GB.png",
            "PDP_256GB.png",
            "Promotions_all.png"
        ]
    );
    assert_eq!(
        page.dom_clicks(),
        vec!["button.offer-card[0]", "button.offer-card[1]"]
    );

    let clicks = page.clicks();
    assert_eq!(count(&clicks, "button.promo"), 1);
    assert_eq!(count(&clicks, "button.back"), 2);
    assert_eq!(count(&clicks, "button.close"), 1);

    let n = result.states.len();
    assert_eq!(
        &result.states[n - 2..],
        &[CaptureState::Promotions, CaptureState::TargetDone]
    );
}

#[tokio::test]
async fn test_offer_airtime_reopens_promotions_for_next_card() {
    let page = promo_page()
        .with_element_when("button.airtime", OFFER_CARDS, "Trade-in deal")
        .leaving_on("button.airtime");
    let sink = MemoryArtifactSink::new();
    let config = with_promotions(config(vec![StageSpec::new("PDP")]));

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert!(result.aborted.is_none());
    assert_eq!(
        file_names(&sink.paths()),
        vec![
            "Airtime_offer1.png",
            "Offer_offer1.png",
            "Offer_offer2.png",
            "PDP_128GB.png",
            "PDP_256GB.png",
            "Promotions_all.png"
        ]
    );
    assert_eq!(page.navigations(), vec![URL, URL]);

    let clicks = page.clicks();
    assert_eq!(count(&clicks, "button.promo"), 2);
    assert_eq!(count(&clicks, "button.back"), 1);
    assert_eq!(count(&clicks, "button.close"), 1);
}

#[tokio::test]
async fn test_absent_promotions_are_not_an_error() {
    let page = capacity_page();
    let sink = MemoryArtifactSink::new();
    let config = with_promotions(config(vec![StageSpec::new("PDP")]));

    let result = CaptureOrchestrator::new(&config, &sink)
        .capture(page.clone(), &target())
        .await;

    assert!(result.aborted.is_none());
    assert_eq!(result.artifacts.len(), 2);
    assert!(!result.states.contains(&CaptureState::Promotions));
}
