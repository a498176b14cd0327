pub mod actions;
pub mod adapters;
pub mod error;
pub mod ports;
pub mod session;

pub use actions::{
    ActionCompletion, ActionId, ActionKind, ActionObserver, ActionOutcome, ActionTracker,
    BrokerPublisher, PendingAction, ResolvedAction, TracingActionObserver,
};
pub use error::{SessionError, SessionErrorKind, TransportError, TransportErrorKind};
pub use ports::{BrokerTransport, ConnectOptions, SessionEvent, TransportChannels};
pub use session::{BrokerSession, SessionConfig, SessionState};
