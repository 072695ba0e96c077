//! Closed-loop fan speed control.
//!
//! A dedicated sampler thread turns break-beam transitions into an RPM estimate
//! and publishes it on a small blackboard. The control loop owns everything
//! else: the motor driver, the PID state and the control mode, all held by a
//! single [`session::ControlSession`] that is only ever touched from the loop.
#![warn(missing_docs)]

pub mod blackboard;
pub mod error;
pub mod estimator;
pub mod pid;
pub mod runner;
pub mod sampler;
pub mod session;

pub use blackboard::{EstimateReader, EstimateWriter, RpmEstimate, shared_estimate};
pub use error::ControlError;
pub use estimator::{EstimatorConfig, RpmEstimator};
pub use pid::{PidConfig, PidSpeedController, PidState};
pub use runner::{ControlLoop, LoopStatus};
pub use sampler::{SamplerHandle, spawn_sampler};
pub use session::{CommandOutcome, ControlMode, ControlSession, RejectReason, SessionConfig};
