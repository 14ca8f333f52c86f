use super::naming::ArtifactSink;
use super::orchestrator::CaptureOrchestrator;
use super::report::{CaptureResult, RunSummary};
use crate::browser::PageFactory;
use crate::config::CaptureConfig;
use crate::error::ErrorKind;
use crate::targets::ProductTarget;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Captures many targets through a bounded pool, one page per target.
pub struct CaptureRunner<F: PageFactory> {
    factory: F,
    config: CaptureConfig,
    sink: Arc<dyn ArtifactSink>,
    artifact_count: Arc<AtomicUsize>,
}

impl<F: PageFactory> CaptureRunner<F> {
    pub fn new(factory: F, config: CaptureConfig, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            factory,
            config,
            sink,
            artifact_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of artifacts written so far, across all targets
    pub fn artifact_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.artifact_count)
    }

    /// Hands the page factory back, e.g. to shut the browser down.
    pub fn into_factory(self) -> F {
        self.factory
    }

    /// Processes `targets` with at most `max_concurrent_targets` in flight.
    /// Results keep the input order; one target's abort never affects another.
    pub async fn run(&self, targets: Vec<ProductTarget>) -> RunSummary {
        let limit = self.config.max_concurrent_targets.max(1);
        log::info!(
            "Capturing {} target(s), {} at a time",
            targets.len(),
            limit
        );

        let results: Vec<CaptureResult> = stream::iter(targets)
            .map(|target| self.capture_one(target))
            .buffered(limit)
            .collect()
            .await;

        RunSummary::from_results(results)
    }

    async fn capture_one(&self, target: ProductTarget) -> CaptureResult {
        let page = match self.factory.open_page().await {
            Ok(page) => page,
            Err(e) => {
                log::error!("{}: could not open a page: {}", target.url, e);
                let mut result = CaptureResult::new(&target.url);
                result.abort(ErrorKind::NavigationFailed, format!("could not open page: {}", e));
                result.finish();
                return result;
            }
        };

        let orchestrator = CaptureOrchestrator::new(&self.config, self.sink.as_ref());
        let result = orchestrator.capture(page, &target).await;

        let total = self
            .artifact_count
            .fetch_add(result.artifacts.len(), Ordering::SeqCst)
            + result.artifacts.len();
        log::info!("{} ({} artifact(s) so far)", result.summary_line(), total);
        result
    }
}
