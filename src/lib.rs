pub mod browser;
pub mod capture;
pub mod config;
pub mod error;
pub mod targets;

//  Re-export commonly used items
pub use browser::{
    ChromeBrowser, ChromePage, ConnectionMode, LoadState, Locator, OptionSource, PageDriver,
    PageFactory, ScreenshotScope,
};
pub use capture::{
    ArtifactNamer, ArtifactSink, CaptureArtifact, CaptureOrchestrator, CaptureResult,
    CaptureRunner, CaptureState, FsArtifactSink, MemoryArtifactSink, RunSummary, SelectorProfile,
    StageSpec, VariantDescriptor,
};
pub use config::{CaptureConfig, Timings, Viewport};
pub use error::{BrowserError, CaptureError, ErrorKind};
pub use targets::ProductTarget;
