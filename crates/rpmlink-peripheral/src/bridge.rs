//! Tasks connecting the GATT surface to the controller's pipes.
//!
//! * the command pump drains queued command lines into the command pipe,
//! * the telemetry pump keeps the latest sample read from the telemetry pipe,
//! * the notifier forwards that sample to the central every notify interval.

use std::time::Duration;

use rpmlink_ipc::{
    Command, Connector, Delivery, InboundChannel, InboundEvent, OutboundChannel, TelemetryMessage,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use crate::error::GattError;
use crate::gatt::NotificationState;

/// Queue feeding the command pump.
#[derive(Debug, Clone)]
pub struct CommandSink {
    tx: mpsc::Sender<Vec<u8>>,
}

/// Create a command queue holding up to `capacity` lines, at least two.
pub fn command_queue(capacity: usize) -> (CommandSink, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(capacity.max(2));
    (CommandSink { tx }, rx)
}

impl CommandSink {
    /// Queue `bytes` verbatim plus a trailing newline. Never waits.
    pub fn forward(&self, bytes: &[u8]) -> Result<(), GattError> {
        let mut line = Vec::with_capacity(bytes.len() + 1);
        line.extend_from_slice(bytes);
        line.push(b'\n');
        self.tx.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => GattError::CommandBacklog,
            TrySendError::Closed(_) => GattError::CommandPathClosed,
        })
    }

    /// Queue a protocol command.
    pub fn send_command(&self, command: &Command) -> Result<(), GattError> {
        self.forward(command.to_string().as_bytes())
    }

    /// Queue `off` followed by `manual` as one unit.
    ///
    /// Unlike [`CommandSink::forward`] this waits up to `wait` for two free slots.
    pub async fn send_fail_safe(&self, wait: Duration) -> Result<(), GattError> {
        let mut permits = match timeout(wait, self.tx.reserve_many(2)).await {
            Ok(Ok(permits)) => permits,
            Ok(Err(_)) => return Err(GattError::CommandPathClosed),
            Err(_) => return Err(GattError::CommandBacklog),
        };
        for command in [Command::Off, Command::SetManual] {
            if let Some(permit) = permits.next() {
                permit.send(format!("{command}\n").into_bytes());
            }
        }
        Ok(())
    }
}

/// Write queued lines to the command pipe until every sink is dropped.
///
/// Lines that arrive while the pipe has no reader are dropped; the channel keeps
/// retrying on its own cadence in the meantime. Lines already queued when the
/// sinks go away are still written.
pub async fn run_command_pump<C>(mut channel: OutboundChannel<C>, mut lines: mpsc::Receiver<Vec<u8>>)
where
    C: Connector,
    C::Stream: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            line = lines.recv() => {
                let Some(line) = line else { break };
                match channel.send(&line).await {
                    Delivery::Sent => debug!(command = %String::from_utf8_lossy(&line).trim_end(), "command forwarded"),
                    Delivery::Dropped => warn!(command = %String::from_utf8_lossy(&line).trim_end(), "controller not reachable; command dropped"),
                }
            }
            () = channel.reconnect_due() => {}
        }
    }
    channel.close();
    info!("command pump stopped");
}

/// Keep `latest` set to the newest telemetry sample until shutdown.
pub async fn run_telemetry_pump<C>(
    mut channel: InboundChannel<C>,
    latest: watch::Sender<Option<TelemetryMessage>>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: Connector,
    C::Stream: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            event = channel.next_event() => match event {
                InboundEvent::Line(line) => match TelemetryMessage::parse(&line) {
                    Ok(message) => {
                        latest.send_replace(Some(message));
                    }
                    Err(e) => debug!(error = %e, "ignoring telemetry line"),
                },
                InboundEvent::Lost => info!("telemetry pipe closed; waiting for controller"),
            },
        }
    }
    channel.close();
}

/// Every `period`, forward a fresh sample to `outbox` while notifications are enabled.
///
/// Samples that arrive while notifications are off are consumed, not replayed
/// on the next subscribe.
pub async fn run_notifier(
    mut latest: watch::Receiver<Option<TelemetryMessage>>,
    notifications: NotificationState,
    outbox: mpsc::Sender<Vec<u8>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !latest.has_changed().unwrap_or(false) {
                    continue;
                }
                let sample = *latest.borrow_and_update();
                if !notifications.is_enabled() {
                    continue;
                }
                if let Some(message) = sample {
                    match outbox.try_send(message.notification_payload()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => debug!("notification backlog; sample skipped"),
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
    }
}
