use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    InvalidOptions,
    NotConnected,
    RequestRejected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub fn invalid_options(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::InvalidOptions, message)
}

pub fn not_connected(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::NotConnected, message)
}

pub fn request_rejected(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::RequestRejected, message)
}

pub fn transport_closed(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::Closed, message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    InvalidConfig,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub fn invalid_config(message: impl Into<String>) -> SessionError {
    SessionError::new(SessionErrorKind::InvalidConfig, message)
}

pub fn fatal(message: impl Into<String>) -> SessionError {
    SessionError::new(SessionErrorKind::Fatal, message)
}
