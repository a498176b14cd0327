pub mod analyzer;
pub mod classify;
pub mod error;
pub mod recognition;
pub mod stage;

pub use analyzer::{Analyzer, CommandAnalyzer};
pub use classify::{Classification, Sentinels, classify, normalize_response, recorded_response};
pub use error::{PipelineError, PipelineErrorKind};
pub use recognition::{PipelineSettings, RecognitionPipeline, request_timestamp};
pub use stage::stage_artifact;
