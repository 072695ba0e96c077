//! BLE side of rpmlink.
//!
//! The peripheral exposes one custom service with two characteristics: a
//! write-only command characteristic whose bytes are forwarded to the
//! controller's command pipe, and a notify characteristic that relays the
//! controller's telemetry. When the central disconnects, an `off` command is
//! sent down the command pipe.
#![warn(missing_docs)]

pub mod bridge;
#[cfg(feature = "bluez")]
pub mod bluez;
pub mod config;
pub mod console;
pub mod error;
pub mod gatt;
pub mod server;

pub use error::GattError;
pub use gatt::{COMMAND_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID};
pub use server::{ConnectionState, PeripheralEvent, PeripheralServer};
