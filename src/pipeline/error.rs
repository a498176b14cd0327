use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Staging,
    Launch,
}

/// Unrecoverable pipeline failure. The agent terminates when one surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub fn staging_failed(message: impl Into<String>) -> PipelineError {
    PipelineError::new(PipelineErrorKind::Staging, message)
}

pub fn launch_failed(message: impl Into<String>) -> PipelineError {
    PipelineError::new(PipelineErrorKind::Launch, message)
}
