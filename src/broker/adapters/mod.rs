pub mod rumqtt;

pub use rumqtt::{RumqttTransport, parse_address};
