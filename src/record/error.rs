use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    UnsupportedUri,
    Io,
    Serialize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RecordError {
    pub kind: RecordErrorKind,
    pub message: String,
}

impl RecordError {
    pub fn new(kind: RecordErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub fn unsupported_uri(message: impl Into<String>) -> RecordError {
    RecordError::new(RecordErrorKind::UnsupportedUri, message)
}

pub fn io_failed(message: impl Into<String>) -> RecordError {
    RecordError::new(RecordErrorKind::Io, message)
}

pub fn serialize_failed(message: impl Into<String>) -> RecordError {
    RecordError::new(RecordErrorKind::Serialize, message)
}
