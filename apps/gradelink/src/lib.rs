pub mod acceptor;
pub mod config;
pub mod encoder;
pub mod initiator;
pub mod store;
pub mod telemetry;
pub mod terminal;

pub use gradelink_proto as proto;
