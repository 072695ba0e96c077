//! Stand-in for the radio: drive the peripheral from the terminal.
//!
//! Type `connect`, `subscribe`, `write auto 1200`, `read`, `unsubscribe` or
//! `disconnect`; notifications are printed as they would be sent.

use std::io::{self, BufRead};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::gatt::{COMMAND_CHAR_UUID, STATUS_CHAR_UUID};
use crate::server::PeripheralEvent;

/// A console line, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    /// Simulate a central connecting.
    Connect,
    /// Simulate the central leaving.
    Disconnect,
    /// Enable status notifications.
    Subscribe,
    /// Disable status notifications.
    Unsubscribe,
    /// Read the status characteristic.
    Read,
    /// Write the command characteristic.
    Write(String),
}

impl ConsoleAction {
    /// Decode one line; `None` if it is not an action.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            "connect" => Some(ConsoleAction::Connect),
            "disconnect" => Some(ConsoleAction::Disconnect),
            "subscribe" => Some(ConsoleAction::Subscribe),
            "unsubscribe" => Some(ConsoleAction::Unsubscribe),
            "read" => Some(ConsoleAction::Read),
            _ => line
                .strip_prefix("write ")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| ConsoleAction::Write(value.to_owned())),
        }
    }

    fn into_event(self) -> (PeripheralEvent, Option<oneshot::Receiver<Vec<u8>>>) {
        match self {
            ConsoleAction::Connect => (PeripheralEvent::Connected, None),
            ConsoleAction::Disconnect => (PeripheralEvent::Disconnected, None),
            ConsoleAction::Subscribe => (PeripheralEvent::Subscribe { uuid: STATUS_CHAR_UUID }, None),
            ConsoleAction::Unsubscribe => (PeripheralEvent::Unsubscribe { uuid: STATUS_CHAR_UUID }, None),
            ConsoleAction::Read => {
                let (reply, value) = oneshot::channel();
                (PeripheralEvent::Read { uuid: STATUS_CHAR_UUID, reply }, Some(value))
            }
            ConsoleAction::Write(value) => (
                PeripheralEvent::Write {
                    uuid: COMMAND_CHAR_UUID,
                    value: value.into_bytes(),
                },
                None,
            ),
        }
    }
}

/// Read stdin lines on a dedicated thread.
///
/// The thread is detached: it ends at end of input or when the receiver is
/// dropped and the next line arrives.
pub fn spawn_stdin_lines() -> io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

async fn next_line(input: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Translate console input into peripheral events and print notifications.
pub async fn run(
    input: mpsc::Receiver<String>,
    events: mpsc::Sender<PeripheralEvent>,
    mut outbox: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("console peripheral ready: connect, subscribe, write <command>, read, unsubscribe, disconnect");
    let mut input = Some(input);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            line = next_line(&mut input) => {
                let Some(line) = line else {
                    info!("console input closed");
                    input = None;
                    continue;
                };
                let Some(action) = ConsoleAction::parse(&line) else {
                    if !line.trim().is_empty() {
                        warn!(input = %line.trim(), "unrecognized console input");
                    }
                    continue;
                };
                let (event, reply) = action.into_event();
                if events.send(event).await.is_err() {
                    break;
                }
                if let Some(reply) = reply {
                    if let Ok(value) = reply.await {
                        info!(value = %String::from_utf8_lossy(&value).trim_end(), "status read");
                    }
                }
            }
            payload = outbox.recv() => match payload {
                Some(payload) => info!(value = %String::from_utf8_lossy(&payload).trim_end(), "notify"),
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        assert_eq!(ConsoleAction::parse("connect"), Some(ConsoleAction::Connect));
        assert_eq!(ConsoleAction::parse(" disconnect\n"), Some(ConsoleAction::Disconnect));
        assert_eq!(ConsoleAction::parse("subscribe"), Some(ConsoleAction::Subscribe));
        assert_eq!(ConsoleAction::parse("unsubscribe"), Some(ConsoleAction::Unsubscribe));
        assert_eq!(ConsoleAction::parse("read"), Some(ConsoleAction::Read));
        assert_eq!(
            ConsoleAction::parse("write s 40"),
            Some(ConsoleAction::Write("s 40".into()))
        );
        assert_eq!(ConsoleAction::parse("write "), None);
        assert_eq!(ConsoleAction::parse("on"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_drives_events_and_prints_notifications() {
        let (input_tx, input_rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let (outbox_tx, outbox_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let console = tokio::spawn(run(input_rx, events_tx, outbox_rx, shutdown_rx));

        input_tx.send("write auto 900".into()).await.unwrap();
        match events_rx.recv().await {
            Some(PeripheralEvent::Write { uuid, value }) => {
                assert_eq!(uuid, COMMAND_CHAR_UUID);
                assert_eq!(value, b"auto 900");
            }
            other => panic!("unexpected {other:?}"),
        }

        outbox_tx.send(b"12.00\n".to_vec()).await.unwrap();
        shutdown_tx.send_replace(true);
        console.await.unwrap();
    }
}
