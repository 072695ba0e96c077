//! Connection lifecycle and request dispatch.
//!
//! Backends translate whatever the radio stack reports into [`PeripheralEvent`]s.
//! The dispatcher applies them to a [`PeripheralServer`] one at a time.

use std::time::Duration;

use rpmlink_ipc::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::CommandSink;
use crate::gatt::{NotificationState, ServiceRegistry};

/// Something the radio stack reported.
#[derive(Debug)]
pub enum PeripheralEvent {
    /// A central connected.
    Connected,
    /// The central went away.
    Disconnected,
    /// The central wrote a characteristic.
    Write {
        /// Characteristic written.
        uuid: Uuid,
        /// Raw value.
        value: Vec<u8>,
    },
    /// The central read a characteristic.
    Read {
        /// Characteristic read.
        uuid: Uuid,
        /// Where to send the value.
        reply: oneshot::Sender<Vec<u8>>,
    },
    /// The central enabled notifications.
    Subscribe {
        /// Characteristic subscribed to.
        uuid: Uuid,
    },
    /// The central disabled notifications.
    Unsubscribe {
        /// Characteristic unsubscribed from.
        uuid: Uuid,
    },
}

/// Link status as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    /// A central is connected.
    pub connected: bool,
    /// The central receives status notifications.
    pub notifications_enabled: bool,
}

/// Motor pulses played when a central connects, so the operator sees and hears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Number of on/off pulses; zero disables the acknowledgment.
    pub pulses: u32,
    /// Speed set before pulsing.
    pub speed: i32,
    /// Pause after setting the speed.
    pub settle: Duration,
    /// How long each pulse stays on.
    pub on: Duration,
    /// Pause between pulses.
    pub gap: Duration,
}

impl Default for Acknowledgment {
    fn default() -> Self {
        Self {
            pulses: 4,
            speed: 50,
            settle: Duration::from_millis(50),
            on: Duration::from_millis(150),
            gap: Duration::from_millis(100),
        }
    }
}

// Longest the disconnect fail-safe waits for room in the command queue.
const FAIL_SAFE_WAIT: Duration = Duration::from_secs(1);

fn queue_pulse(sink: &CommandSink, command: &Command) {
    if let Err(e) = sink.send_command(command) {
        debug!(%command, error = %e, "acknowledgment command dropped");
    }
}

async fn acknowledge(sink: CommandSink, ack: Acknowledgment) {
    if ack.pulses == 0 {
        return;
    }
    queue_pulse(&sink, &Command::SetSpeed(ack.speed));
    sleep(ack.settle).await;
    for pulse in 0..ack.pulses {
        queue_pulse(&sink, &Command::On);
        sleep(ack.on).await;
        queue_pulse(&sink, &Command::Off);
        if pulse + 1 < ack.pulses {
            sleep(ack.gap).await;
        }
    }
    debug!(pulses = ack.pulses, "connection acknowledged");
}

/// Applies peripheral events to the service.
pub struct PeripheralServer {
    registry: ServiceRegistry,
    notifications: NotificationState,
    commands: CommandSink,
    ack: Acknowledgment,
    ack_task: Option<JoinHandle<()>>,
    connected: bool,
}

impl PeripheralServer {
    /// Server over `registry`. `notifications` must be the state the status
    /// characteristic toggles.
    pub fn new(
        registry: ServiceRegistry,
        notifications: NotificationState,
        commands: CommandSink,
        ack: Acknowledgment,
    ) -> Self {
        Self {
            registry,
            notifications,
            commands,
            ack,
            ack_task: None,
            connected: false,
        }
    }

    /// Current link status.
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            connected: self.connected,
            notifications_enabled: self.notifications.is_enabled(),
        }
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::Connected => self.on_connected().await,
            PeripheralEvent::Disconnected => self.on_disconnected().await,
            PeripheralEvent::Write { uuid, value } => {
                let result = self
                    .registry
                    .get_mut(uuid)
                    .and_then(|characteristic| characteristic.write(&value));
                if let Err(e) = result {
                    warn!(%uuid, error = %e, "write dropped");
                }
            }
            PeripheralEvent::Read { uuid, reply } => {
                let value = self
                    .registry
                    .get(uuid)
                    .and_then(|characteristic| characteristic.read())
                    .unwrap_or_else(|e| {
                        debug!(%uuid, error = %e, "read refused");
                        Vec::new()
                    });
                let _ = reply.send(value);
            }
            PeripheralEvent::Subscribe { uuid } => {
                let result = self
                    .registry
                    .get_mut(uuid)
                    .and_then(|characteristic| characteristic.on_subscribe());
                if let Err(e) = result {
                    warn!(%uuid, error = %e, "subscribe refused");
                }
            }
            PeripheralEvent::Unsubscribe { uuid } => {
                let result = self
                    .registry
                    .get_mut(uuid)
                    .and_then(|characteristic| characteristic.on_unsubscribe());
                if let Err(e) = result {
                    warn!(%uuid, error = %e, "unsubscribe refused");
                }
            }
        }
    }

    async fn on_connected(&mut self) {
        if self.connected {
            return;
        }
        self.connected = true;
        info!("central connected");
        self.cancel_ack().await;
        self.ack_task = Some(tokio::spawn(acknowledge(self.commands.clone(), self.ack)));
    }

    async fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.notifications.disable();
        // The acknowledgment must not get a pulse in after the off below.
        self.cancel_ack().await;
        match self.commands.send_fail_safe(FAIL_SAFE_WAIT).await {
            Ok(()) => warn!("central disconnected; motor off and manual mode requested"),
            Err(e) => error!(error = %e, "central disconnected but the fail-safe could not be queued"),
        }
    }

    async fn cancel_ack(&mut self) {
        if let Some(task) = self.ack_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Stop the acknowledgment, then request the motor off and manual mode.
    pub async fn shutdown(&mut self) {
        self.cancel_ack().await;
        self.notifications.disable();
        if let Err(e) = self.commands.send_fail_safe(FAIL_SAFE_WAIT).await {
            error!(error = %e, "could not queue fail-safe at shutdown");
        }
    }
}

/// Apply events until every sender is dropped, then shut the server down.
pub async fn run_dispatcher(mut server: PeripheralServer, mut events: mpsc::Receiver<PeripheralEvent>) {
    info!("peripheral dispatcher started");
    while let Some(event) = events.recv().await {
        server.handle(event).await;
    }
    server.shutdown().await;
    info!("peripheral dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{command_queue, run_notifier};
    use crate::gatt::{
        COMMAND_CHAR_UUID, CommandCharacteristic, STATUS_CHAR_UUID, StatusCharacteristic,
    };
    use rpmlink_ipc::TelemetryMessage;
    use tokio::sync::watch;

    struct Rig {
        server: PeripheralServer,
        commands: mpsc::Receiver<Vec<u8>>,
        notifications: NotificationState,
        latest: watch::Sender<Option<TelemetryMessage>>,
    }

    fn rig(ack: Acknowledgment) -> Rig {
        rig_with_queue(ack, 64)
    }

    fn rig_with_queue(ack: Acknowledgment, capacity: usize) -> Rig {
        let (sink, commands) = command_queue(capacity);
        let notifications = NotificationState::default();
        let (latest, latest_rx) = watch::channel(None);
        let registry = ServiceRegistry::new(
            CommandCharacteristic::new(sink.clone()),
            StatusCharacteristic::new(notifications.clone(), latest_rx),
        );
        Rig {
            server: PeripheralServer::new(registry, notifications.clone(), sink, ack),
            commands,
            notifications,
            latest,
        }
    }

    fn no_ack() -> Acknowledgment {
        Acknowledgment {
            pulses: 0,
            ..Acknowledgment::default()
        }
    }

    fn fail_safe_lines() -> Vec<String> {
        vec!["off\n".to_string(), "manual\n".to_string()]
    }

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_stream_sends_single_off() {
        let mut rig = rig(no_ack());
        let (outbox_tx, mut outbox) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = Duration::from_millis(100);
        let notifier = tokio::spawn(run_notifier(
            rig.latest.subscribe(),
            rig.notifications.clone(),
            outbox_tx,
            period,
            shutdown_rx,
        ));

        rig.server.handle(PeripheralEvent::Connected).await;
        rig.server
            .handle(PeripheralEvent::Subscribe { uuid: STATUS_CHAR_UUID })
            .await;
        assert!(rig.server.connection_state().notifications_enabled);

        rig.latest.send_replace(Some(TelemetryMessage::new(1500.0)));
        sleep(period * 2).await;
        assert_eq!(outbox.try_recv().unwrap(), b"1500.00\n");

        rig.server.handle(PeripheralEvent::Disconnected).await;
        assert_eq!(rig.server.connection_state(), ConnectionState::default());

        for rpm in [1510.0, 1520.0, 1530.0] {
            rig.latest.send_replace(Some(TelemetryMessage::new(rpm)));
            sleep(period * 2).await;
        }
        assert!(outbox.try_recv().is_err());
        assert_eq!(drain(&mut rig.commands), fail_safe_lines());

        shutdown_tx.send_replace(true);
        notifier.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_transitions_are_deduplicated() {
        let mut rig = rig(no_ack());
        rig.server.handle(PeripheralEvent::Disconnected).await;
        assert!(drain(&mut rig.commands).is_empty());

        rig.server.handle(PeripheralEvent::Connected).await;
        rig.server.handle(PeripheralEvent::Connected).await;
        rig.server.handle(PeripheralEvent::Disconnected).await;
        rig.server.handle(PeripheralEvent::Disconnected).await;
        assert_eq!(drain(&mut rig.commands), fail_safe_lines());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgment_pulses() {
        let mut rig = rig(Acknowledgment::default());
        rig.server.handle(PeripheralEvent::Connected).await;
        sleep(Duration::from_secs(2)).await;

        let mut expected = vec!["s 50\n".to_string()];
        for _ in 0..4 {
            expected.push("on\n".into());
            expected.push("off\n".into());
        }
        assert_eq!(drain(&mut rig.commands), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgment_survives_full_queue() {
        let mut rig = rig_with_queue(Acknowledgment::default(), 2);
        rig.server.handle(PeripheralEvent::Connected).await;
        sleep(Duration::from_secs(2)).await;

        // Pulses past the queue capacity are dropped, not fatal to the sequence.
        assert_eq!(drain(&mut rig.commands), vec!["s 50\n".to_string(), "on\n".into()]);

        rig.server.handle(PeripheralEvent::Disconnected).await;
        assert_eq!(drain(&mut rig.commands), fail_safe_lines());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_acknowledgment_ends_with_off() {
        let mut rig = rig(Acknowledgment::default());
        rig.server.handle(PeripheralEvent::Connected).await;
        // Land inside the first pulse.
        sleep(Duration::from_millis(120)).await;
        rig.server.handle(PeripheralEvent::Disconnected).await;
        sleep(Duration::from_secs(2)).await;

        let lines = drain(&mut rig.commands);
        assert_eq!(
            lines,
            vec!["s 50\n".to_string(), "on\n".into(), "off\n".into(), "manual\n".into()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_forward_and_reads_reply() {
        let mut rig = rig(no_ack());
        rig.server
            .handle(PeripheralEvent::Write {
                uuid: COMMAND_CHAR_UUID,
                value: b"auto 1200".to_vec(),
            })
            .await;
        assert_eq!(drain(&mut rig.commands), vec!["auto 1200\n".to_string()]);

        rig.latest.send_replace(Some(TelemetryMessage::new(42.0)));
        let (reply, value) = oneshot::channel();
        rig.server
            .handle(PeripheralEvent::Read {
                uuid: STATUS_CHAR_UUID,
                reply,
            })
            .await;
        assert_eq!(value.await.unwrap(), b"42.00\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_shutdown_queues_off() {
        let rig = rig(no_ack());
        let mut commands = rig.commands;
        let (events_tx, events_rx) = mpsc::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(rig.server, events_rx));

        events_tx.send(PeripheralEvent::Connected).await.unwrap();
        drop(events_tx);
        dispatcher.await.unwrap();

        // Connected itself queues nothing without an acknowledgment; shutdown queues the fail-safe.
        assert_eq!(drain(&mut commands), fail_safe_lines());
    }
}
