//! Error types for the GATT surface.

use thiserror::Error;
use uuid::Uuid;

/// Failure handling a GATT request.
#[derive(Debug, Error)]
pub enum GattError {
    /// No characteristic with this UUID is registered.
    #[error("unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),
    /// The characteristic does not support the operation.
    #[error("characteristic {uuid} does not support {operation}")]
    NotSupported {
        /// Characteristic addressed.
        uuid: Uuid,
        /// Operation attempted.
        operation: &'static str,
    },
    /// The command queue is full; the write was dropped.
    #[error("command queue full")]
    CommandBacklog,
    /// The command pump has exited.
    #[error("command path closed")]
    CommandPathClosed,
    /// BlueZ reported an error.
    #[cfg(feature = "bluez")]
    #[error("bluetooth error")]
    Bluez(#[from] bluer::Error),
}
