//! Per-variant flow stages
//!
//! Stages model optional UI branches (payment popups, plan builders, airtime
//! pages). A stage whose trigger is missing is skipped, never failed, and no
//! artifact is written for it.

use super::enumerator::VariantDescriptor;
use super::interaction::InteractionStrategy;
use super::naming::{ArtifactNamer, ArtifactSink};
use super::profile::StageSpec;
use super::report::CaptureArtifact;
use crate::browser::{LoadState, Locator, PageDriver};
use crate::config::Timings;
use crate::error::{CaptureError, ErrorKind};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "selector")]
pub enum SkipReason {
    /// The stage requires the previous stage to have completed, and it did not
    PredecessorIncomplete,
    TriggerAbsent,
    FollowUpAbsent(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageOutcome {
    Captured { artifact: CaptureArtifact },
    /// The UI state was reached but its screenshot could not be stored
    WriteFailed { path: PathBuf, error: String },
    Skipped { reason: SkipReason },
    Failed { kind: ErrorKind, error: String },
}

impl StageOutcome {
    /// Whether the stage's UI state was reached; gates `requires_prior_success`.
    pub fn completed(&self) -> bool {
        matches!(
            self,
            StageOutcome::Captured { .. } | StageOutcome::WriteFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub outcome: StageOutcome,
}

/// Everything one pipeline pass produced for one variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineRun {
    pub records: Vec<StageRecord>,
}

impl PipelineRun {
    pub fn artifacts(&self) -> impl Iterator<Item = &CaptureArtifact> {
        self.records.iter().filter_map(|r| match &r.outcome {
            StageOutcome::Captured { artifact } => Some(artifact),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Failed { .. }))
    }

    pub fn write_failures(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::WriteFailed { .. }))
    }

    /// Whether a completed stage of this pass navigated off the page it started on.
    pub fn left_page(&self, stages: &[StageSpec]) -> bool {
        self.records.iter().any(|record| {
            record.outcome.completed()
                && stages
                    .iter()
                    .any(|stage| stage.name == record.stage && stage.wait_for_navigation)
        })
    }

    fn count(&self, pred: impl Fn(&StageOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Identifies the product and variant a pass belongs to.
pub struct PassContext<'a> {
    pub product_title: &'a str,
    pub variant: &'a VariantDescriptor,
    pub namer: &'a ArtifactNamer,
}

pub struct FlowStagePipeline<'s, 'p, D: PageDriver + ?Sized> {
    strategy: &'s InteractionStrategy<'p, D>,
    timings: &'s Timings,
    sink: &'s dyn ArtifactSink,
}

impl<'s, 'p, D: PageDriver + ?Sized> FlowStagePipeline<'s, 'p, D> {
    pub fn new(
        strategy: &'s InteractionStrategy<'p, D>,
        timings: &'s Timings,
        sink: &'s dyn ArtifactSink,
    ) -> Self {
        Self {
            strategy,
            timings,
            sink,
        }
    }

    /// Runs `stages` in order for the currently selected variant.
    pub async fn run(&self, stages: &[StageSpec], ctx: &PassContext<'_>) -> PipelineRun {
        let mut run = PipelineRun::default();
        // The first stage has no predecessor to wait on
        let mut previous_completed = true;

        for stage in stages {
            let outcome = if stage.requires_prior_success && !previous_completed {
                StageOutcome::Skipped {
                    reason: SkipReason::PredecessorIncomplete,
                }
            } else {
                self.run_stage(stage, ctx).await
            };

            match &outcome {
                StageOutcome::Captured { artifact } => log::info!(
                    "[{}] {} saved: {}",
                    ctx.variant.id,
                    stage.name,
                    artifact.path.display()
                ),
                StageOutcome::Skipped { reason } => {
                    log::info!("[{}] {} skipped: {:?}", ctx.variant.id, stage.name, reason)
                }
                StageOutcome::WriteFailed { path, error } => log::warn!(
                    "[{}] {} could not be written to {}: {}",
                    ctx.variant.id,
                    stage.name,
                    path.display(),
                    error
                ),
                StageOutcome::Failed { kind, error } => log::warn!(
                    "[{}] {} failed ({}): {}",
                    ctx.variant.id,
                    stage.name,
                    kind,
                    error
                ),
            }

            previous_completed = outcome.completed();
            run.records.push(StageRecord {
                stage: stage.name.clone(),
                outcome,
            });
        }

        run
    }

    async fn run_stage(&self, stage: &StageSpec, ctx: &PassContext<'_>) -> StageOutcome {
        let mut touched_ui = false;

        if let Some(trigger) = &stage.trigger {
            let timeout = Duration::from_millis(stage.trigger_timeout_ms);
            if !self.strategy.is_present(trigger, timeout).await {
                return StageOutcome::Skipped {
                    reason: SkipReason::TriggerAbsent,
                };
            }

            if let Err(e) = self.strategy.forced_click(trigger).await {
                return Self::failure(e);
            }
            touched_ui = true;

            for locator in &stage.follow_up {
                // Give the UI opened by the previous click time to render
                self.page().pause(self.timings.reopen_delay()).await;
                if let Some(outcome) = self.follow_up(locator).await {
                    self.cleanup(stage).await;
                    return outcome;
                }
            }

            if stage.wait_for_navigation {
                if let Err(e) = self
                    .page()
                    .wait_for_load_state(LoadState::DomContentLoaded, self.timings.load_state_timeout())
                    .await
                {
                    log::warn!("{}: page did not settle after click: {}", stage.name, e);
                }
            }

            self.page()
                .pause(Duration::from_millis(stage.post_click_wait_ms))
                .await;
        }

        let outcome = self.capture(stage, ctx).await;

        if touched_ui || stage.cleanup_selector.is_some() || stage.cleanup_key.is_some() {
            self.cleanup(stage).await;
        }

        outcome
    }

    /// `Some` ends the stage early.
    async fn follow_up(&self, locator: &Locator) -> Option<StageOutcome> {
        if !self.strategy.is_present(locator, Duration::ZERO).await {
            return Some(StageOutcome::Skipped {
                reason: SkipReason::FollowUpAbsent(locator.to_string()),
            });
        }
        match self.strategy.forced_click(locator).await {
            Ok(()) => None,
            Err(e) => Some(Self::failure(e)),
        }
    }

    async fn capture(&self, stage: &StageSpec, ctx: &PassContext<'_>) -> StageOutcome {
        let path = ctx
            .namer
            .path(ctx.product_title, &ctx.variant.label, &stage.name);

        let bytes = match self.page().screenshot(stage.screenshot_scope).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return StageOutcome::WriteFailed {
                    path,
                    error: format!("screenshot failed: {}", e),
                }
            }
        };

        if let Err(source) = self.sink.write(&path, &bytes).await {
            let error = CaptureError::ArtifactWriteFailed {
                path: path.clone(),
                source,
            };
            return StageOutcome::WriteFailed {
                path,
                error: error.to_string(),
            };
        }

        StageOutcome::Captured {
            artifact: CaptureArtifact {
                path,
                product_title: ctx.product_title.to_string(),
                variant_id: ctx.variant.id.clone(),
                stage_name: stage.name.clone(),
            },
        }
    }

    /// Best effort; a failed cleanup only gets logged.
    async fn cleanup(&self, stage: &StageSpec) {
        if let Some(locator) = &stage.cleanup_selector {
            if !self.strategy.soft_click(locator).await {
                log::warn!("{}: cleanup {} had no effect", stage.name, locator);
            }
        }
        if let Some(key) = &stage.cleanup_key {
            if let Err(e) = self.page().press_key(key).await {
                log::warn!("{}: cleanup key {} failed: {}", stage.name, key, e);
            }
        }
        if stage.cleanup_selector.is_some() || stage.cleanup_key.is_some() {
            self.page().pause(self.timings.reopen_delay()).await;
        }
    }

    fn failure(error: CaptureError) -> StageOutcome {
        StageOutcome::Failed {
            kind: error.kind().unwrap_or(ErrorKind::InteractionFailed),
            error: error.to_string(),
        }
    }

    fn page(&self) -> &'p D {
        self.strategy.page()
    }
}
