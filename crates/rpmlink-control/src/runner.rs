//! The control loop.
//!
//! One task multiplexes the shutdown signal, the command channel, local console
//! input and the control tick. Each wake-up handles exactly one of them, so the
//! session is only ever touched from here.

use std::time::Duration;

use rpmlink_ipc::{
    ChannelState, Command, Connector, InboundChannel, InboundEvent, OutboundChannel,
    TelemetryMessage,
};
use rpmlink_motor::{MotorControl, MotorError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::blackboard::EstimateReader;
use crate::sampler::SamplerHandle;
use crate::session::{CommandOutcome, ControlMode, ControlSession};

/// Whether the loop should keep going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Keep stepping.
    Running,
    /// Shutdown was requested.
    Finished,
}

/// Owns the session and every input feeding it.
pub struct ControlLoop<M, CI, TO>
where
    CI: Connector,
    TO: Connector,
{
    session: ControlSession<M>,
    estimate: EstimateReader,
    commands: InboundChannel<CI>,
    telemetry: OutboundChannel<TO>,
    local: Option<mpsc::Receiver<String>>,
    shutdown: watch::Receiver<bool>,
    ticker: Interval,
    sampler: Option<SamplerHandle>,
}

impl<M, CI, TO> ControlLoop<M, CI, TO>
where
    M: MotorControl<Error = MotorError>,
    CI: Connector,
    CI::Stream: AsyncRead + Unpin,
    TO: Connector,
    TO::Stream: AsyncWrite + Unpin,
{
    /// Assemble a loop ticking every `tick`.
    pub fn new(
        session: ControlSession<M>,
        estimate: EstimateReader,
        commands: InboundChannel<CI>,
        telemetry: OutboundChannel<TO>,
        shutdown: watch::Receiver<bool>,
        tick: Duration,
    ) -> Self {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            session,
            estimate,
            commands,
            telemetry,
            local: None,
            shutdown,
            ticker,
            sampler: None,
        }
    }

    /// Also accept commands typed on the console.
    pub fn with_local_input(mut self, local: mpsc::Receiver<String>) -> Self {
        self.local = Some(local);
        self
    }

    /// Stop this sampler as part of shutdown.
    pub fn with_sampler(mut self, sampler: SamplerHandle) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// The session.
    pub fn session(&self) -> &ControlSession<M> {
        &self.session
    }

    /// State of the command channel.
    pub fn command_channel_state(&self) -> ChannelState {
        self.commands.state()
    }

    /// State of the telemetry channel.
    pub fn telemetry_channel_state(&self) -> ChannelState {
        self.telemetry.state()
    }

    /// Run until shutdown is requested, then stop everything.
    pub async fn run(mut self) {
        info!("control loop started");
        while self.step().await == LoopStatus::Running {}
        self.shutdown();
        info!("control loop finished");
    }

    /// Wait for and handle one event.
    pub async fn step(&mut self) -> LoopStatus {
        if *self.shutdown.borrow() {
            return LoopStatus::Finished;
        }

        tokio::select! {
            biased;

            changed = self.shutdown.changed() => {
                if changed.is_err() || *self.shutdown.borrow() {
                    info!("shutdown requested");
                    LoopStatus::Finished
                } else {
                    LoopStatus::Running
                }
            }
            event = self.commands.next_event() => match event {
                InboundEvent::Line(line) => self.handle_line(&line, "pipe"),
                InboundEvent::Lost => {
                    warn!("command channel lost");
                    if let Err(e) = self.session.fail_safe() {
                        error!(error = %e, "fail-safe could not stop the motor");
                    }
                    LoopStatus::Running
                }
            },
            line = next_local(&mut self.local) => match line {
                Some(line) => self.handle_line(&line, "console"),
                None => {
                    info!("console input closed");
                    self.local = None;
                    LoopStatus::Running
                }
            },
            _ = self.ticker.tick() => {
                self.tick().await;
                LoopStatus::Running
            }
        }
    }

    fn handle_line(&mut self, line: &str, source: &'static str) -> LoopStatus {
        let Some(command) = Command::parse(line) else {
            return LoopStatus::Running;
        };
        debug!(source, %command, "command received");

        let rpm = self.estimate.snapshot().rpm;
        match self.session.handle(command, rpm) {
            Ok(CommandOutcome::Quit) => {
                info!(source, "quit requested");
                LoopStatus::Finished
            }
            Ok(CommandOutcome::Rpm(rpm)) => {
                info!(rpm = %format!("{rpm:.2}"), "current speed");
                LoopStatus::Running
            }
            Ok(CommandOutcome::Rejected(reason)) => {
                warn!(source, %reason, "command rejected");
                LoopStatus::Running
            }
            Ok(CommandOutcome::Applied | CommandOutcome::Ignored) => LoopStatus::Running,
            Err(e) => {
                error!(source, error = %e, "command failed");
                LoopStatus::Running
            }
        }
    }

    async fn tick(&mut self) {
        let rpm = self.estimate.snapshot().rpm;
        if let Err(e) = self.session.regulate(rpm, Instant::now().into_std()) {
            error!(error = %e, "speed regulation failed");
        }

        let delivery = self
            .telemetry
            .send(TelemetryMessage::new(rpm).to_line().as_bytes())
            .await;

        let state = self.session.motor_state();
        match self.session.mode() {
            ControlMode::Automatic { target_rpm } => debug!(
                link = ?self.commands.state(),
                rpm = %format!("{rpm:.2}"),
                target_rpm,
                on = state.on,
                speed = state.speed,
                telemetry = ?delivery,
                "auto"
            ),
            ControlMode::Manual => debug!(
                link = ?self.commands.state(),
                rpm = %format!("{rpm:.2}"),
                on = state.on,
                speed = state.speed,
                telemetry = ?delivery,
                "manual"
            ),
        }
    }

    /// Stop the sampler, force the motor off and close both channels.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
        if let Err(e) = self.session.shutdown() {
            error!(error = %e, "failed to stop motor during shutdown");
        }
        self.commands.close();
        self.telemetry.close();
    }
}

async fn next_local(local: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match local {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
