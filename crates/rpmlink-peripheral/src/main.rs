use std::time::Duration;

use anyhow::Context;
use rpmlink_ipc::{FifoReader, FifoWriter, InboundChannel, OutboundChannel};
use rpmlink_peripheral::bridge::{command_queue, run_command_pump, run_notifier, run_telemetry_pump};
use rpmlink_peripheral::config::{Settings, load_settings};
use rpmlink_peripheral::gatt::{
    CommandCharacteristic, NotificationState, ServiceRegistry, StatusCharacteristic,
};
use rpmlink_peripheral::server::run_dispatcher;
use rpmlink_peripheral::{PeripheralEvent, PeripheralServer};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Upper bound on draining the final `off` into the command pipe.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings().context("loading peripheral configuration")?;
    info!(
        name = %settings.peripheral.device_name,
        commands = %settings.ipc.command_path.display(),
        telemetry = %settings.ipc.telemetry_path.display(),
        "rpmlink peripheral starting"
    );

    run(settings).await
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sink, command_lines) = command_queue(settings.peripheral.command_queue);
    let (latest_tx, latest_rx) = watch::channel(None);
    let (events_tx, events_rx) = mpsc::channel::<PeripheralEvent>(32);
    let (outbox_tx, outbox_rx) = mpsc::channel::<Vec<u8>>(8);
    let notifications = NotificationState::default();

    let command_pump = tokio::spawn(run_command_pump(
        OutboundChannel::new(
            "commands",
            FifoWriter::new(&settings.ipc.command_path),
            settings.ipc.reconnect_interval(),
            settings.ipc.write_timeout(),
        ),
        command_lines,
    ));
    let telemetry_pump = tokio::spawn(run_telemetry_pump(
        InboundChannel::new(
            "telemetry",
            FifoReader::new(&settings.ipc.telemetry_path),
            settings.ipc.reconnect_interval(),
        ),
        latest_tx,
        shutdown_rx.clone(),
    ));
    let notifier = tokio::spawn(run_notifier(
        latest_rx.clone(),
        notifications.clone(),
        outbox_tx,
        settings.peripheral.notify_interval(),
        shutdown_rx.clone(),
    ));

    let registry = ServiceRegistry::new(
        CommandCharacteristic::new(sink.clone()),
        StatusCharacteristic::new(notifications.clone(), latest_rx),
    );
    let server = PeripheralServer::new(
        registry,
        notifications,
        sink,
        settings.peripheral.acknowledgment(),
    );
    let dispatcher = tokio::spawn(run_dispatcher(server, events_rx));

    let mut backend = spawn_backend(&settings, events_tx, outbox_rx, shutdown_rx)?;

    let backend_result = tokio::select! {
        () = wait_for_signal() => {
            info!("shutdown requested");
            None
        }
        result = &mut backend => Some(result),
    };

    shutdown_tx.send_replace(true);
    let backend_result = match backend_result {
        Some(result) => result,
        None => backend.await,
    };

    // The dispatcher ends once the backend has dropped its event sender and
    // queues the final `off` on the way out.
    if let Err(e) = dispatcher.await {
        error!(error = %e, "dispatcher task failed");
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, command_pump).await {
        Ok(Err(e)) => error!(error = %e, "command pump failed"),
        Ok(Ok(())) => {}
        Err(_) => warn!("command pipe did not drain before exit"),
    }
    for (name, task) in [("telemetry pump", telemetry_pump), ("notifier", notifier)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "task failed");
        }
    }

    backend_result
        .context("backend task panicked")?
        .context("peripheral backend failed")?;
    info!("rpmlink peripheral stopped");
    Ok(())
}

#[cfg(not(feature = "bluez"))]
fn spawn_backend(
    _settings: &Settings,
    events: mpsc::Sender<PeripheralEvent>,
    outbox: mpsc::Receiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<Result<(), rpmlink_peripheral::GattError>>> {
    use rpmlink_peripheral::console;

    let input = console::spawn_stdin_lines().context("spawning console reader")?;
    Ok(tokio::spawn(async move {
        console::run(input, events, outbox, shutdown).await;
        Ok(())
    }))
}

#[cfg(feature = "bluez")]
fn spawn_backend(
    settings: &Settings,
    events: mpsc::Sender<PeripheralEvent>,
    outbox: mpsc::Receiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<Result<(), rpmlink_peripheral::GattError>>> {
    let config = settings.peripheral.clone();
    Ok(tokio::spawn(async move {
        rpmlink_peripheral::bluez::run(&config, events, outbox, shutdown).await
    }))
}

async fn wait_for_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; waiting for ctrl-c only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "ctrl-c handler failed");
                terminate.recv().await;
            }
        }
        _ = terminate.recv() => {}
    }
}
