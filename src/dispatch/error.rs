use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    RegistrationInvalid,
    TopicConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub fn registration_invalid(message: impl Into<String>) -> DispatchError {
    DispatchError::new(DispatchErrorKind::RegistrationInvalid, message)
}

pub fn topic_conflict(message: impl Into<String>) -> DispatchError {
    DispatchError::new(DispatchErrorKind::TopicConflict, message)
}

/// Raised by a topic handler. Always fatal to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler for topic '{topic}' failed: {message}")]
pub struct HandlerError {
    pub topic: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
        }
    }
}
