//! Motor-level contracts.

pub mod motor;
