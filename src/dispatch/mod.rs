pub mod dispatcher;
pub mod error;
pub mod ports;
pub mod table;

pub use dispatcher::{DispatchOutcome, TopicDispatcher};
pub use error::{DispatchError, DispatchErrorKind, HandlerError};
pub use ports::TopicHandler;
pub use table::{SubscriptionTable, issue_subscriptions};
