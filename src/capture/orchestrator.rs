//! Per-target capture state machine
//!
//! ```text
//! Navigated -> PopupsDismissed -> VariantsEnumerated
//!     -> { Selecting -> StagesRunning -> VariantDone }* -> [Promotions] -> TargetDone
//! ```
//!
//! `Aborted` is reachable from navigation and from enumeration. A variant that
//! cannot be selected ends in `VariantDone` without running its stages; only
//! the two target-level failures stop the whole target.
//!
//! Whenever a completed stage navigated away, the product page is reloaded
//! before the next variant (or the promotions) so every pass starts from the
//! same baseline.

use super::enumerator::{VariantDescriptor, VariantEnumerator};
use super::interaction::InteractionStrategy;
use super::naming::{ArtifactNamer, ArtifactSink};
use super::pipeline::{FlowStagePipeline, PassContext};
use super::profile::{PromotionFlow, StageSpec};
use super::report::CaptureResult;
use crate::browser::{LoadState, PageDriver};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, ErrorKind};
use crate::targets::{self, ProductTarget};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Navigated,
    PopupsDismissed,
    VariantsEnumerated,
    Selecting(String),
    StagesRunning(String),
    VariantDone(String),
    Promotions,
    TargetDone,
    Aborted(ErrorKind),
}

/// Captures one product target at a time on a page it owns.
pub struct CaptureOrchestrator<'a> {
    config: &'a CaptureConfig,
    sink: &'a dyn ArtifactSink,
}

impl<'a> CaptureOrchestrator<'a> {
    pub fn new(config: &'a CaptureConfig, sink: &'a dyn ArtifactSink) -> Self {
        Self { config, sink }
    }

    /// Runs the full capture for `target` and closes `page` afterwards,
    /// whether the target completed or was aborted.
    pub async fn capture<D: PageDriver>(&self, page: D, target: &ProductTarget) -> CaptureResult {
        let mut result = CaptureResult::new(&target.url);
        log::info!("Capturing {}", target.url);

        match self.drive(&page, target, &mut result).await {
            Ok(()) => Self::advance(&mut result, CaptureState::TargetDone),
            Err(e) => {
                log::error!("{}: aborted: {}", target.url, e);
                result.abort_with(&e);
                let kind = result.abort_kind().unwrap_or(ErrorKind::NavigationFailed);
                Self::advance(&mut result, CaptureState::Aborted(kind));
            }
        }

        if let Err(e) = page.close().await {
            log::warn!("{}: failed to close page: {}", target.url, e);
        }

        result.finish();
        result
    }

    async fn drive<D: PageDriver>(
        &self,
        page: &D,
        target: &ProductTarget,
        result: &mut CaptureResult,
    ) -> Result<(), CaptureError> {
        let timings = &self.config.timings;
        let profile = &self.config.profile;
        let strategy = InteractionStrategy::new(page, timings.click_timeout());

        self.navigate(page, &target.url).await?;
        Self::advance(result, CaptureState::Navigated);

        if let Some(viewport) = self.config.viewport {
            if let Err(e) = page.set_viewport_size(viewport.width, viewport.height).await {
                log::warn!("{}: could not resize viewport: {}", target.url, e);
            }
        }

        self.dismiss_popups(&strategy).await;
        Self::advance(result, CaptureState::PopupsDismissed);

        let title = self.resolve_title(page, &target.url).await;
        log::info!("{}: product title '{}'", target.url, title);
        result.product_title = Some(title.clone());

        let enumerator = VariantEnumerator::new(&strategy, timings);
        let enumeration = enumerator.enumerate_with_primary(profile).await?;
        Self::advance(result, CaptureState::VariantsEnumerated);
        log::info!(
            "{}: {} variant(s) to capture",
            target.url,
            enumeration.variants.len()
        );

        let namer = target.namer();
        let pipeline = FlowStagePipeline::new(&strategy, timings, self.sink);

        let mut off_product_page = false;

        for (i, variant) in enumeration.variants.iter().enumerate() {
            Self::advance(result, CaptureState::Selecting(variant.id.clone()));

            if i > 0 && (self.config.reload_between_variants || off_product_page) {
                if let Err(e) = self.reload(page, &strategy, &target.url).await {
                    log::warn!("{}: [{}] reload failed: {}", target.url, variant.id, e);
                    result.add_failed_variant();
                    Self::advance(result, CaptureState::VariantDone(variant.id.clone()));
                    continue;
                }
                off_product_page = false;
                if let Some(primary) = &enumeration.primary {
                    if let Err(e) = enumerator.select(&profile.primary, primary).await {
                        log::warn!("{}: could not restore '{}': {}", target.url, primary, e);
                    }
                }
            }

            if let Err(e) = enumerator.select(profile.variant_group(), &variant.id).await {
                log::warn!(
                    "{}: [{}] selection failed, skipping variant: {}",
                    target.url,
                    variant.id,
                    e
                );
                result.add_failed_variant();
                Self::advance(result, CaptureState::VariantDone(variant.id.clone()));
                continue;
            }
            page.pause(timings.settle_delay()).await;

            Self::advance(result, CaptureState::StagesRunning(variant.id.clone()));
            let ctx = PassContext {
                product_title: &title,
                variant,
                namer: &namer,
            };
            let run = pipeline.run(&profile.stages, &ctx).await;
            if run.left_page(&profile.stages) {
                log::debug!("{}: [{}] left the product page", target.url, variant.id);
                off_product_page = true;
            }
            result.add_variant(run);
            Self::advance(result, CaptureState::VariantDone(variant.id.clone()));
        }

        if let Some(promotions) = &profile.promotions {
            let pass = PromotionPass {
                strategy: &strategy,
                pipeline: &pipeline,
                target,
                title: &title,
                namer: &namer,
            };
            self.capture_promotions(&pass, promotions, off_product_page, result)
                .await;
        }

        Ok(())
    }

    /// Captures the promotions modal and every offer card in it. Nothing here
    /// can abort the target; an unreachable modal just ends the pass.
    async fn capture_promotions<D: PageDriver>(
        &self,
        pass: &PromotionPass<'_, '_, D>,
        promotions: &PromotionFlow,
        mut off_product_page: bool,
        result: &mut CaptureResult,
    ) {
        let page = pass.strategy.page();
        let url = &pass.target.url;

        if off_product_page {
            if let Err(e) = self.reload(page, pass.strategy, url).await {
                log::warn!("{}: cannot return for promotions: {}", url, e);
                return;
            }
        }
        if !self.open_promotions(pass.strategy, promotions).await {
            log::info!("{}: no promotions offered", url);
            return;
        }
        Self::advance(result, CaptureState::Promotions);

        let overview = VariantDescriptor {
            id: "promotions".to_string(),
            label: "all".to_string(),
        };
        let stages = [StageSpec::new(promotions.overview_stage.clone())];
        result.add_pass(pass.pipeline.run(&stages, &pass.context(&overview)).await);

        let cards = page.count(&promotions.card_selector).await.unwrap_or_else(|e| {
            log::warn!("{}: counting offer cards failed: {}", url, e);
            0
        });
        log::info!("{}: {} offer card(s)", url, cards);
        off_product_page = false;

        for index in 0..cards {
            let label = format!("offer{}", index + 1);
            let offer = VariantDescriptor {
                id: label.clone(),
                label,
            };

            if off_product_page {
                let reopened = match self.reload(page, pass.strategy, url).await {
                    Ok(()) => self.open_promotions(pass.strategy, promotions).await,
                    Err(e) => {
                        log::warn!("{}: [{}] reload failed: {}", url, offer.id, e);
                        false
                    }
                };
                if !reopened {
                    break;
                }
                off_product_page = false;
            }

            match page.dom_click_nth(&promotions.card_selector, index).await {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!("{}: [{}] offer card is gone", url, offer.id);
                    continue;
                }
                Err(e) => {
                    log::warn!("{}: [{}] could not open offer: {}", url, offer.id, e);
                    continue;
                }
            }
            page.pause(Duration::from_millis(promotions.settle_ms)).await;

            let run = pass
                .pipeline
                .run(&promotions.card_stages, &pass.context(&offer))
                .await;
            off_product_page = run.left_page(&promotions.card_stages);
            result.add_pass(run);

            if !off_product_page {
                if let Some(back) = &promotions.back {
                    if let Err(e) = pass.strategy.forced_click(back).await {
                        log::warn!("{}: [{}] back to offer list failed: {}", url, offer.id, e);
                    }
                    page.pause(self.config.timings.reopen_delay()).await;
                }
            }
        }

        if !off_product_page {
            if let Some(close) = &promotions.close {
                if let Err(e) = pass.strategy.forced_click(close).await {
                    log::warn!("{}: closing promotions failed: {}", url, e);
                }
            }
        }
    }

    async fn open_promotions<D: PageDriver>(
        &self,
        strategy: &InteractionStrategy<'_, D>,
        promotions: &PromotionFlow,
    ) -> bool {
        if !strategy.is_present(&promotions.opener, Duration::ZERO).await {
            return false;
        }
        if let Err(e) = strategy.forced_click(&promotions.opener).await {
            log::warn!("Opening promotions failed: {}", e);
            return false;
        }
        strategy
            .page()
            .pause(Duration::from_millis(promotions.settle_ms))
            .await;
        true
    }

    /// Navigates with up to `navigation_retries` extra attempts.
    async fn navigate<D: PageDriver>(&self, page: &D, url: &str) -> Result<(), CaptureError> {
        let timings = &self.config.timings;
        let attempts = self.config.navigation_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match page.navigate(url, timings.navigation_timeout()).await {
                Ok(()) => {
                    if let Err(e) = page
                        .wait_for_load_state(LoadState::DomContentLoaded, timings.load_state_timeout())
                        .await
                    {
                        log::warn!("{}: load state not reached: {}", url, e);
                    }
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("{}: navigation attempt {}/{} failed: {}", url, attempt, attempts, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        page.pause(timings.settle_delay()).await;
                    }
                }
            }
        }

        Err(CaptureError::NavigationFailed {
            url: url.to_string(),
            reason: last_error,
        })
    }

    async fn reload<D: PageDriver>(
        &self,
        page: &D,
        strategy: &InteractionStrategy<'_, D>,
        url: &str,
    ) -> Result<(), CaptureError> {
        self.navigate(page, url).await?;
        self.dismiss_popups(strategy).await;
        Ok(())
    }

    async fn dismiss_popups<D: PageDriver>(&self, strategy: &InteractionStrategy<'_, D>) {
        let selectors = &self.config.profile.popup_dismiss_selectors;
        if selectors.is_empty() {
            return;
        }
        strategy.dismiss_optional_popups(selectors).await;
        strategy.page().pause(self.config.timings.popup_settle()).await;
    }

    async fn resolve_title<D: PageDriver>(&self, page: &D, url: &str) -> String {
        let profile = &self.config.profile;
        let page_title = match &profile.title_selector {
            Some(selector) => page.inner_text(selector).await.unwrap_or_else(|e| {
                log::debug!("{}: title lookup failed: {}", url, e);
                None
            }),
            None => None,
        };
        targets::product_title(url, page_title.as_deref(), profile.brand_from_url)
    }

    fn advance(result: &mut CaptureResult, state: CaptureState) {
        log::debug!("{}: -> {:?}", result.url, state);
        result.states.push(state);
    }
}

/// What the promotions pass shares with the variant passes.
struct PromotionPass<'a, 'p, D: PageDriver> {
    strategy: &'a InteractionStrategy<'p, D>,
    pipeline: &'a FlowStagePipeline<'a, 'p, D>,
    target: &'a ProductTarget,
    title: &'a str,
    namer: &'a ArtifactNamer,
}

impl<'a, 'p, D: PageDriver> PromotionPass<'a, 'p, D> {
    fn context<'c>(&'c self, variant: &'c VariantDescriptor) -> PassContext<'c> {
        PassContext {
            product_title: self.title,
            variant,
            namer: self.namer,
        }
    }
}
