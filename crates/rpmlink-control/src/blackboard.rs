//! The one datum shared between the sampler thread and the control loop.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

/// Latest published speed estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RpmEstimate {
    /// Estimated speed.
    pub rpm: f64,
    /// When the sampler published it; `None` until the first publish.
    pub updated_at: Option<Instant>,
}

type Blackboard = Arc<RwLock<RpmEstimate>>;

/// Create a blackboard and its two handles.
pub fn shared_estimate() -> (EstimateWriter, EstimateReader) {
    let bb: Blackboard = Arc::default();
    (
        EstimateWriter { bb: Arc::clone(&bb) },
        EstimateReader { bb },
    )
}

/// Publishing side. There is exactly one, owned by the sampler.
#[derive(Debug)]
pub struct EstimateWriter {
    bb: Blackboard,
}

impl EstimateWriter {
    /// Replace the estimate and its timestamp in one step.
    pub fn publish(&self, rpm: f64) {
        *self.bb.write() = RpmEstimate {
            rpm,
            updated_at: Some(Instant::now()),
        };
    }
}

/// Reading side; clone freely.
#[derive(Debug, Clone)]
pub struct EstimateReader {
    bb: Blackboard,
}

impl EstimateReader {
    /// Copy of the latest estimate.
    pub fn snapshot(&self) -> RpmEstimate {
        *self.bb.read()
    }
}
