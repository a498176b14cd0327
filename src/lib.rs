pub mod agent;
pub mod broker;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod shutdown;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
