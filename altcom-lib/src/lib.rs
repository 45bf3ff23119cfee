pub mod buffer;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod constants;
pub mod digest;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod job;
pub mod lifecycle;
pub mod loopback;
pub mod psm;
pub mod registry;
pub mod status;
pub mod x509;

#[cfg(test)]
mod tests;

// Re-export the client and the types every caller touches
pub use client::{Altcom, Callback};
pub use command::{CommandId, LogicalCommand, ProtocolVersion};
pub use config::AltcomConfig;
pub use error::{AltcomError, result_code};
pub use gateway::{CommandGateway, Timeout};
pub use status::{ModemStatus, StatusBroadcaster, StatusNotifier};
