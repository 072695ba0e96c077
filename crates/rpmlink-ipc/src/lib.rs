//! Inter-process plumbing for rpmlink.
//!
//! Two one-way channels connect the processes: commands flow from the peripheral
//! to the controller and telemetry flows back. Both are newline-delimited text
//! over named pipes, and either end may come and go at any time.
#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod error;
pub mod fifo;
pub mod mock;
pub mod protocol;

pub use channel::{ChannelState, Connector, Delivery, InboundChannel, InboundEvent, OutboundChannel};
pub use config::IpcConfig;
pub use error::ProtocolError;
pub use fifo::{FifoReader, FifoWriter};
pub use protocol::{Command, TelemetryMessage};
