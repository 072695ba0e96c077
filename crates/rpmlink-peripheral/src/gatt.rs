//! The custom service and its two characteristics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rpmlink_ipc::TelemetryMessage;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::bridge::CommandSink;
use crate::error::GattError;

/// Primary service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Command characteristic: write without response.
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Status characteristic: notify.
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// GATT characteristic property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicFlag {
    /// Readable.
    Read,
    /// Writable without a response.
    WriteWithoutResponse,
    /// Supports notifications.
    Notify,
}

impl CharacteristicFlag {
    /// Flag name as BlueZ spells it.
    pub const fn as_str(self) -> &'static str {
        match self {
            CharacteristicFlag::Read => "read",
            CharacteristicFlag::WriteWithoutResponse => "write-without-response",
            CharacteristicFlag::Notify => "notify",
        }
    }
}

/// Whether the central has subscribed to status notifications.
#[derive(Debug, Clone, Default)]
pub struct NotificationState {
    enabled: Arc<AtomicBool>,
}

impl NotificationState {
    /// Turn notifications on.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Turn notifications off.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether notifications are on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Behavior behind one characteristic.
///
/// Operations a characteristic does not override are refused with
/// [`GattError::NotSupported`].
pub trait Characteristic: Send {
    /// Characteristic UUID.
    fn uuid(&self) -> Uuid;

    /// Advertised properties.
    fn flags(&self) -> &'static [CharacteristicFlag];

    /// Current value.
    fn read(&self) -> Result<Vec<u8>, GattError> {
        Err(GattError::NotSupported {
            uuid: self.uuid(),
            operation: "read",
        })
    }

    /// New value from the central.
    fn write(&mut self, _value: &[u8]) -> Result<(), GattError> {
        Err(GattError::NotSupported {
            uuid: self.uuid(),
            operation: "write",
        })
    }

    /// Central enabled notifications.
    fn on_subscribe(&mut self) -> Result<(), GattError> {
        Err(GattError::NotSupported {
            uuid: self.uuid(),
            operation: "subscribe",
        })
    }

    /// Central disabled notifications.
    fn on_unsubscribe(&mut self) -> Result<(), GattError> {
        Err(GattError::NotSupported {
            uuid: self.uuid(),
            operation: "unsubscribe",
        })
    }
}

/// Forwards every write to the command pipe as one line.
pub struct CommandCharacteristic {
    sink: CommandSink,
}

impl CommandCharacteristic {
    /// Characteristic writing into `sink`.
    pub fn new(sink: CommandSink) -> Self {
        Self { sink }
    }
}

impl Characteristic for CommandCharacteristic {
    fn uuid(&self) -> Uuid {
        COMMAND_CHAR_UUID
    }

    fn flags(&self) -> &'static [CharacteristicFlag] {
        &[CharacteristicFlag::WriteWithoutResponse]
    }

    fn write(&mut self, value: &[u8]) -> Result<(), GattError> {
        info!(command = %String::from_utf8_lossy(value), "command from central");
        self.sink.forward(value)
    }
}

/// Relays telemetry to the central.
pub struct StatusCharacteristic {
    notifications: NotificationState,
    latest: watch::Receiver<Option<TelemetryMessage>>,
}

impl StatusCharacteristic {
    /// Characteristic toggling `notifications` and reading from `latest`.
    pub fn new(
        notifications: NotificationState,
        latest: watch::Receiver<Option<TelemetryMessage>>,
    ) -> Self {
        Self {
            notifications,
            latest,
        }
    }
}

impl Characteristic for StatusCharacteristic {
    fn uuid(&self) -> Uuid {
        STATUS_CHAR_UUID
    }

    fn flags(&self) -> &'static [CharacteristicFlag] {
        &[CharacteristicFlag::Notify]
    }

    fn read(&self) -> Result<Vec<u8>, GattError> {
        let latest = *self.latest.borrow();
        Ok(latest
            .map(|message| message.notification_payload())
            .unwrap_or_default())
    }

    fn on_subscribe(&mut self) -> Result<(), GattError> {
        self.notifications.enable();
        info!("notifications enabled");
        Ok(())
    }

    fn on_unsubscribe(&mut self) -> Result<(), GattError> {
        self.notifications.disable();
        info!("notifications disabled");
        Ok(())
    }
}

/// The service: exactly the command and status characteristics.
pub struct ServiceRegistry {
    characteristics: [Box<dyn Characteristic>; 2],
}

impl ServiceRegistry {
    /// Register both characteristics.
    pub fn new(command: CommandCharacteristic, status: StatusCharacteristic) -> Self {
        Self {
            characteristics: [Box::new(command), Box::new(status)],
        }
    }

    /// Look a characteristic up by UUID.
    pub fn get(&self, uuid: Uuid) -> Result<&(dyn Characteristic + 'static), GattError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid() == uuid)
            .map(|c| &**c)
            .ok_or(GattError::UnknownCharacteristic(uuid))
    }

    /// Look a characteristic up by UUID, mutably.
    pub fn get_mut(
        &mut self,
        uuid: Uuid,
    ) -> Result<&mut (dyn Characteristic + 'static), GattError> {
        self.characteristics
            .iter_mut()
            .find(|c| c.uuid() == uuid)
            .map(|c| &mut **c)
            .ok_or(GattError::UnknownCharacteristic(uuid))
    }

    /// All characteristics, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &(dyn Characteristic + 'static)> {
        self.characteristics.iter().map(|c| &**c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::command_queue;

    fn registry() -> (ServiceRegistry, NotificationState, watch::Sender<Option<TelemetryMessage>>, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        let (sink, rx) = command_queue(8);
        let notifications = NotificationState::default();
        let (latest_tx, latest_rx) = watch::channel(None);
        let registry = ServiceRegistry::new(
            CommandCharacteristic::new(sink),
            StatusCharacteristic::new(notifications.clone(), latest_rx),
        );
        (registry, notifications, latest_tx, rx)
    }

    #[test]
    fn test_uuids_match_service_layout() {
        assert_eq!(SERVICE_UUID.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(COMMAND_CHAR_UUID.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(STATUS_CHAR_UUID.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn test_registry_holds_both_characteristics() {
        let (registry, ..) = registry();
        let uuids: Vec<Uuid> = registry.iter().map(|c| c.uuid()).collect();
        assert_eq!(uuids, vec![COMMAND_CHAR_UUID, STATUS_CHAR_UUID]);
        assert_eq!(
            registry.get(STATUS_CHAR_UUID).unwrap().flags(),
            &[CharacteristicFlag::Notify]
        );
        assert!(matches!(
            registry.get(SERVICE_UUID),
            Err(GattError::UnknownCharacteristic(_))
        ));
    }

    #[test]
    fn test_write_forwards_line() {
        let (mut registry, _, _, mut rx) = registry();
        registry.get_mut(COMMAND_CHAR_UUID).unwrap().write(b"auto 900").unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"auto 900\n");
    }

    #[test]
    fn test_unsupported_operations_are_refused() {
        let (mut registry, ..) = registry();
        assert!(matches!(
            registry.get_mut(STATUS_CHAR_UUID).unwrap().write(b"on"),
            Err(GattError::NotSupported { operation: "write", .. })
        ));
        assert!(matches!(
            registry.get_mut(COMMAND_CHAR_UUID).unwrap().on_subscribe(),
            Err(GattError::NotSupported { operation: "subscribe", .. })
        ));
    }

    #[test]
    fn test_subscription_toggles_notifications() {
        let (mut registry, notifications, ..) = registry();
        assert!(!notifications.is_enabled());
        registry.get_mut(STATUS_CHAR_UUID).unwrap().on_subscribe().unwrap();
        assert!(notifications.is_enabled());
        registry.get_mut(STATUS_CHAR_UUID).unwrap().on_unsubscribe().unwrap();
        assert!(!notifications.is_enabled());
    }

    #[test]
    fn test_status_read_returns_latest_sample() {
        let (registry, _, latest, _) = registry();
        assert!(registry.get(STATUS_CHAR_UUID).unwrap().read().unwrap().is_empty());
        latest.send_replace(Some(TelemetryMessage::new(88.5)));
        assert_eq!(registry.get(STATUS_CHAR_UUID).unwrap().read().unwrap(), b"88.50\n");
    }
}
