mod config;
mod console;
mod hardware;

use anyhow::Context;
use rpmlink_control::{ControlLoop, ControlSession, shared_estimate, spawn_sampler};
use rpmlink_ipc::{FifoReader, FifoWriter, InboundChannel, OutboundChannel};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("rpmlink controller starting");
    let settings = config::load_settings().context("loading controller configuration")?;

    let (motor, sensor) = hardware::open(&settings).context("initializing motor hardware")?;
    let (writer, estimate) = shared_estimate();
    let sampler =
        spawn_sampler(sensor, settings.sensor, writer).context("starting sensor thread")?;

    let session = ControlSession::new(motor, settings.pid, settings.control);
    let commands = InboundChannel::new(
        "commands",
        FifoReader::new(&settings.ipc.command_path),
        settings.ipc.reconnect_interval(),
    );
    let telemetry = OutboundChannel::new(
        "telemetry",
        FifoWriter::new(&settings.ipc.telemetry_path),
        settings.ipc.reconnect_interval(),
        settings.ipc.write_timeout(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested");
        shutdown_tx.send_replace(true);
    });

    let mut control = ControlLoop::new(
        session,
        estimate,
        commands,
        telemetry,
        shutdown_rx,
        settings.control.tick(),
    )
    .with_sampler(sampler);
    match console::spawn() {
        Ok(input) => control = control.with_local_input(input),
        Err(e) => warn!(error = %e, "console input unavailable"),
    }

    info!(
        commands = %settings.ipc.command_path.display(),
        telemetry = %settings.ipc.telemetry_path.display(),
        "controller ready"
    );
    control.run().await;
    info!("rpmlink controller stopped");
    Ok(())
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
