//! BlueZ backend.
//!
//! Registers the GATT application and an advertisement with `bluetoothd` over
//! D-Bus. BlueZ does not report connections to the application directly, so the
//! adapter's devices are polled.

use std::sync::Arc;

use bluer::adv::{Advertisement, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, Characteristic as LocalCharacteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicWrite,
    CharacteristicWriteMethod, ReqError, Service,
};
use bluer::Adapter;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::PeripheralConfig;
use crate::error::GattError;
use crate::gatt::{COMMAND_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID};
use crate::server::PeripheralEvent;

type NotifierSlot = Arc<Mutex<Option<CharacteristicNotifier>>>;

fn command_characteristic(events: mpsc::Sender<PeripheralEvent>) -> LocalCharacteristic {
    LocalCharacteristic {
        uuid: COMMAND_CHAR_UUID,
        write: Some(CharacteristicWrite {
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _request| {
                let events = events.clone();
                Box::pin(async move {
                    events
                        .send(PeripheralEvent::Write {
                            uuid: COMMAND_CHAR_UUID,
                            value,
                        })
                        .await
                        .map_err(|_| ReqError::Failed)
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn status_characteristic(events: mpsc::Sender<PeripheralEvent>, slot: NotifierSlot) -> LocalCharacteristic {
    LocalCharacteristic {
        uuid: STATUS_CHAR_UUID,
        notify: Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                let events = events.clone();
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    *slot.lock().await = Some(notifier);
                    let _ = events
                        .send(PeripheralEvent::Subscribe {
                            uuid: STATUS_CHAR_UUID,
                        })
                        .await;
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn any_connected(adapter: &Adapter) -> bluer::Result<bool> {
    for address in adapter.device_addresses().await? {
        if adapter.device(address)?.is_connected().await? {
            return Ok(true);
        }
    }
    Ok(false)
}

// Drop a notifier BlueZ has stopped and tell the server.
async fn reap_notifier(slot: &NotifierSlot, events: &mpsc::Sender<PeripheralEvent>) {
    let mut slot = slot.lock().await;
    if slot.as_ref().is_some_and(|notifier| notifier.is_stopped()) {
        *slot = None;
        let _ = events
            .send(PeripheralEvent::Unsubscribe {
                uuid: STATUS_CHAR_UUID,
            })
            .await;
    }
}

async fn notify(slot: &NotifierSlot, events: &mpsc::Sender<PeripheralEvent>, payload: Vec<u8>) {
    let mut guard = slot.lock().await;
    let Some(notifier) = guard.as_mut() else {
        return;
    };
    if let Err(e) = notifier.notify(payload).await {
        debug!(error = %e, "notification failed; dropping subscription");
        *guard = None;
        drop(guard);
        let _ = events
            .send(PeripheralEvent::Unsubscribe {
                uuid: STATUS_CHAR_UUID,
            })
            .await;
    }
}

/// Serve the GATT application until shutdown.
pub async fn run(
    config: &PeripheralConfig,
    events: mpsc::Sender<PeripheralEvent>,
    mut outbox: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GattError> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(adapter = adapter.name(), address = %adapter.address().await?, "bluetooth adapter ready");

    let advertisement = Advertisement {
        advertisement_type: AdvertisementType::Peripheral,
        service_uuids: [SERVICE_UUID].into_iter().collect(),
        local_name: Some(config.device_name.clone()),
        discoverable: Some(true),
        ..Default::default()
    };
    let _advertisement = adapter.advertise(advertisement).await?;

    let slot = NotifierSlot::default();
    let application = Application {
        services: vec![Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: vec![
                command_characteristic(events.clone()),
                status_characteristic(events.clone(), Arc::clone(&slot)),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };
    let _application = adapter.serve_gatt_application(application).await?;
    info!(name = %config.device_name, "advertising");

    let mut poll = interval(config.connection_poll());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut connected = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            payload = outbox.recv() => match payload {
                Some(payload) => notify(&slot, &events, payload).await,
                None => break,
            },
            _ = poll.tick() => {
                reap_notifier(&slot, &events).await;
                match any_connected(&adapter).await {
                    Ok(now) if now != connected => {
                        connected = now;
                        let event = if now {
                            PeripheralEvent::Connected
                        } else {
                            *slot.lock().await = None;
                            PeripheralEvent::Disconnected
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to query connected devices"),
                }
            }
        }
    }

    info!("bluetooth peripheral stopped");
    Ok(())
}
