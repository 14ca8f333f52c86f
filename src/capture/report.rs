use super::orchestrator::CaptureState;
use super::pipeline::PipelineRun;
use crate::error::{CaptureError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One screenshot written for one stage of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureArtifact {
    pub path: PathBuf,
    pub product_title: String,
    pub variant_id: String,
    pub stage_name: String,
}

/// Why a whole target was given up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Outcome of capturing one product target
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,

    /// Variants whose stage pipeline ran
    pub completed_variants: usize,

    /// Variants that could not be selected
    pub failed_variants: usize,

    pub artifacts: Vec<CaptureArtifact>,

    pub skipped_stages: usize,
    pub failed_stages: usize,
    pub write_failures: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortReason>,

    /// State machine transitions in the order they happened
    pub states: Vec<CaptureState>,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CaptureResult {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            product_title: None,
            completed_variants: 0,
            failed_variants: 0,
            artifacts: Vec::new(),
            skipped_stages: 0,
            failed_stages: 0,
            write_failures: 0,
            aborted: None,
            states: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Folds one variant's pipeline pass into the counters.
    pub fn add_variant(&mut self, run: PipelineRun) {
        self.completed_variants += 1;
        self.add_pass(run);
    }

    /// Folds a pass that is not a variant (promotions) into the counters.
    pub fn add_pass(&mut self, run: PipelineRun) {
        self.skipped_stages += run.skipped();
        self.failed_stages += run.failed();
        self.write_failures += run.write_failures();
        self.artifacts.extend(run.artifacts().cloned());
    }

    pub fn add_failed_variant(&mut self) {
        self.failed_variants += 1;
    }

    pub fn abort(&mut self, kind: ErrorKind, detail: impl Into<String>) {
        self.aborted = Some(AbortReason {
            kind,
            detail: detail.into(),
        });
    }

    /// Records `error` as the abort reason. Errors outside the result
    /// taxonomy count as navigation failures since they stop the target
    /// before any capture.
    pub fn abort_with(&mut self, error: &CaptureError) {
        let kind = error.kind().unwrap_or(ErrorKind::NavigationFailed);
        self.abort(kind, error.to_string());
    }

    pub fn finish(&mut self) {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn abort_kind(&self) -> Option<ErrorKind> {
        self.aborted.as_ref().map(|a| a.kind)
    }

    /// One human-readable line for the end-of-run summary.
    pub fn summary_line(&self) -> String {
        let title = self.product_title.as_deref().unwrap_or("-");
        match &self.aborted {
            Some(reason) => format!(
                "ABORTED {} [{}]: {} ({})",
                self.url, title, reason.kind, reason.detail
            ),
            None => format!(
                "OK {} [{}]: {} variant(s), {} artifact(s), {} skipped, {} failed, {} write failure(s)",
                self.url,
                title,
                self.completed_variants,
                self.artifacts.len(),
                self.skipped_stages,
                self.failed_stages,
                self.write_failures
            ),
        }
    }
}

/// Aggregate over all targets of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub targets: usize,
    pub completed_targets: usize,
    pub aborted_targets: usize,
    pub total_variants: usize,
    pub total_artifacts: usize,
    pub write_failures: usize,
    pub results: Vec<CaptureResult>,
}

impl RunSummary {
    pub fn from_results(results: Vec<CaptureResult>) -> Self {
        let aborted_targets = results.iter().filter(|r| r.is_aborted()).count();
        Self {
            targets: results.len(),
            completed_targets: results.len() - aborted_targets,
            aborted_targets,
            total_variants: results.iter().map(|r| r.completed_variants).sum(),
            total_artifacts: results.iter().map(|r| r.artifacts.len()).sum(),
            write_failures: results.iter().map(|r| r.write_failures).sum(),
            results,
        }
    }

    /// Save the report as pretty-printed JSON
    pub async fn to_file(&self, path: &Path) -> Result<(), CaptureError> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
