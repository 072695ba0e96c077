//! Sensor sampling thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rpmlink_motor::hardware::gpio::DigitalInput;
use rpmlink_motor::HardwareError;
use spin_sleep::SpinSleeper;
use tracing::{error, info, warn};

use crate::blackboard::EstimateWriter;
use crate::error::ControlError;
use crate::estimator::{EstimatorConfig, RpmEstimator};

// Consecutive read failures between repeated warnings.
const ERROR_REPORT_EVERY: u64 = 10_000;

/// Running sampler thread. Stopping (or dropping) the handle joins the thread.
#[derive(Debug)]
pub struct SamplerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("sensor thread panicked");
            } else {
                info!("sensor thread stopped");
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start polling `input` on a dedicated thread, publishing estimates through `writer`.
pub fn spawn_sampler<I>(
    mut input: I,
    config: EstimatorConfig,
    writer: EstimateWriter,
) -> Result<SamplerHandle, ControlError>
where
    I: DigitalInput + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let thread = std::thread::Builder::new()
        .name("sensor".into())
        .spawn({
            let stop = Arc::clone(&stop);
            move || {
                info!(blades = config.blades, window_ms = config.window_ms, "sensor thread started");
                let sleeper = SpinSleeper::new(20_000);
                let interval = config.sample_interval();
                let window = Duration::from_millis(u64::from(config.window_ms));
                let update_interval = Duration::from_millis(u64::from(config.update_interval_ms));
                let epoch = Instant::now();
                let mut estimator = RpmEstimator::new(&config);
                let mut failures: u64 = 0;
                let mut failing_since: Option<Instant> = None;
                let mut stall_published: Option<Instant> = None;

                while !stop.load(Ordering::Acquire) {
                    match input.is_high() {
                        Ok(level) => {
                            failures = 0;
                            failing_since = None;
                            stall_published = None;
                            // Free-running microsecond counter; truncation is the wrap.
                            let now = epoch.elapsed().as_micros() as u32;
                            if let Some(rpm) = estimator.sample(level, now) {
                                writer.publish(rpm);
                            }
                        }
                        Err(e) => {
                            if failures % ERROR_REPORT_EVERY == 0 {
                                let e: HardwareError = e.into();
                                warn!(error = %e, failures, "sensor read failed");
                            }
                            failures += 1;

                            // A sensor that stays unreadable for a whole window reads as stalled.
                            let since = *failing_since.get_or_insert_with(Instant::now);
                            let due = stall_published
                                .is_none_or(|at| at.elapsed() >= update_interval);
                            if since.elapsed() >= window && due {
                                writer.publish(0.0);
                                stall_published = Some(Instant::now());
                            }
                        }
                    }
                    sleeper.sleep(interval);
                }
            }
        })
        .map_err(ControlError::Spawn)?;

    Ok(SamplerHandle {
        stop,
        thread: Some(thread),
    })
}
