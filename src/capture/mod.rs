pub mod discovery;
pub mod enumerator;
pub mod interaction;
pub mod naming;
pub mod orchestrator;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod runner;

pub use discovery::ListingDiscovery;
pub use enumerator::{best_primary, Enumeration, VariantDescriptor, VariantEnumerator};
pub use interaction::InteractionStrategy;
pub use naming::{ArtifactNamer, ArtifactSink, FsArtifactSink, MemoryArtifactSink};
pub use orchestrator::{CaptureOrchestrator, CaptureState};
pub use pipeline::{
    FlowStagePipeline, PassContext, PipelineRun, SkipReason, StageOutcome, StageRecord,
};
pub use profile::{ListingProfile, OptionGroup, PromotionFlow, SelectorProfile, StageSpec};
pub use report::{AbortReason, CaptureArtifact, CaptureResult, RunSummary};
pub use runner::CaptureRunner;
