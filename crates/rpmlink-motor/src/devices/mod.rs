//! Concrete drivers.

pub mod h_bridge;
pub mod mock;
#[cfg(feature = "gpio-hardware")]
pub mod rpi;
pub mod sim;
