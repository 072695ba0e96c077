//! Reconnecting one-way byte channels.
//!
//! A channel owns a [`Connector`] that knows how to reach the peer. While no peer
//! is attached the channel sits in [`ChannelState::Connecting`] and retries on a
//! fixed cadence; losing the peer drops the stream and starts retrying again.
//! Messages are never queued across an outage.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, trace, warn};

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Shut down for good.
    Closed,
    /// Waiting for a peer.
    Connecting,
    /// Attached to a peer.
    Open,
}

/// Opens the stream behind a channel.
pub trait Connector {
    /// Stream produced by a successful connect.
    type Stream;

    /// Try to reach the peer once.
    ///
    /// `Ok(None)` means no peer is attached yet, which is not an error.
    fn connect(&mut self) -> io::Result<Option<Self::Stream>>;
}

/// Something observed on an inbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A complete line, terminator stripped.
    Line(String),
    /// The peer went away. The channel is already retrying.
    Lost,
}

/// Result of an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written and flushed.
    Sent,
    /// Not delivered; the message is gone.
    Dropped,
}

/// Receiving half: yields lines from whichever peer is attached.
pub struct InboundChannel<C: Connector> {
    name: &'static str,
    connector: C,
    lines: Option<Lines<BufReader<C::Stream>>>,
    state: ChannelState,
    retry_at: Instant,
    reconnect_interval: Duration,
}

impl<C> InboundChannel<C>
where
    C: Connector,
    C::Stream: AsyncRead + Unpin,
{
    /// New channel that makes its first attempt immediately.
    pub fn new(name: &'static str, connector: C, reconnect_interval: Duration) -> Self {
        Self {
            name,
            connector,
            lines: None,
            state: ChannelState::Connecting,
            retry_at: Instant::now(),
            reconnect_interval,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Drop the stream and stop retrying.
    pub fn close(&mut self) {
        self.lines = None;
        if self.state != ChannelState::Closed {
            info!(channel = self.name, "channel closed");
        }
        self.state = ChannelState::Closed;
    }

    /// Wait for the next line or for the peer to go away.
    ///
    /// Reconnect attempts happen inside this call. It is cancel-safe: dropping
    /// the future loses neither buffered data nor the retry deadline. A closed
    /// channel never yields.
    pub async fn next_event(&mut self) -> InboundEvent {
        loop {
            match self.state {
                ChannelState::Closed => std::future::pending::<()>().await,
                ChannelState::Connecting => {
                    if Instant::now() < self.retry_at {
                        sleep_until(self.retry_at).await;
                    }
                    self.attempt();
                }
                ChannelState::Open => {
                    let Some(lines) = self.lines.as_mut() else {
                        self.lose();
                        return InboundEvent::Lost;
                    };
                    match lines.next_line().await {
                        Ok(Some(line)) => return InboundEvent::Line(line),
                        Ok(None) => {
                            info!(channel = self.name, "peer closed the channel");
                            self.lose();
                            return InboundEvent::Lost;
                        }
                        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                            warn!(channel = self.name, "discarding line that is not valid UTF-8");
                        }
                        Err(e) => {
                            warn!(channel = self.name, error = %e, "read failed");
                            self.lose();
                            return InboundEvent::Lost;
                        }
                    }
                }
            }
        }
    }

    fn attempt(&mut self) {
        match self.connector.connect() {
            Ok(Some(stream)) => {
                self.lines = Some(BufReader::new(stream).lines());
                self.state = ChannelState::Open;
                info!(channel = self.name, "channel open");
            }
            Ok(None) => {
                trace!(channel = self.name, "no peer yet");
                self.retry_at = Instant::now() + self.reconnect_interval;
            }
            Err(e) => {
                warn!(channel = self.name, error = %e, "failed to open channel");
                self.retry_at = Instant::now() + self.reconnect_interval;
            }
        }
    }

    fn lose(&mut self) {
        self.lines = None;
        self.state = ChannelState::Connecting;
        self.retry_at = Instant::now() + self.reconnect_interval;
    }
}

/// Sending half: writes whole messages to whichever peer is attached.
pub struct OutboundChannel<C: Connector> {
    name: &'static str,
    connector: C,
    stream: Option<C::Stream>,
    state: ChannelState,
    retry_at: Instant,
    reconnect_interval: Duration,
    write_timeout: Duration,
}

impl<C> OutboundChannel<C>
where
    C: Connector,
    C::Stream: AsyncWrite + Unpin,
{
    /// New channel that makes its first attempt on the first send.
    pub fn new(
        name: &'static str,
        connector: C,
        reconnect_interval: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            name,
            connector,
            stream: None,
            state: ChannelState::Connecting,
            retry_at: Instant::now(),
            reconnect_interval,
            write_timeout,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Attempt to attach a peer if a retry is due. Returns whether the channel is open.
    pub fn try_reconnect(&mut self) -> bool {
        if self.state == ChannelState::Connecting && Instant::now() >= self.retry_at {
            self.attempt();
        }
        self.state == ChannelState::Open
    }

    /// Resolves after the next scheduled reconnect attempt has been made.
    ///
    /// Pending forever while the channel is open or closed. Cancel-safe.
    pub async fn reconnect_due(&mut self) {
        if self.state != ChannelState::Connecting {
            return std::future::pending().await;
        }
        sleep_until(self.retry_at).await;
        self.attempt();
    }

    /// Write one message. Never blocks longer than the write timeout.
    pub async fn send(&mut self, bytes: &[u8]) -> Delivery {
        if !self.try_reconnect() {
            debug!(channel = self.name, "no peer; message dropped");
            return Delivery::Dropped;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Delivery::Dropped;
        };

        let write_timeout = self.write_timeout;
        let result = timeout(write_timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(e)) => {
                warn!(channel = self.name, error = %e, "write failed; reconnecting");
                self.lose();
                Delivery::Dropped
            }
            Err(_) => {
                warn!(channel = self.name, "peer not draining; message dropped");
                Delivery::Dropped
            }
        }
    }

    /// Drop the stream and stop retrying.
    pub fn close(&mut self) {
        self.stream = None;
        if self.state != ChannelState::Closed {
            info!(channel = self.name, "channel closed");
        }
        self.state = ChannelState::Closed;
    }

    fn attempt(&mut self) {
        match self.connector.connect() {
            Ok(Some(stream)) => {
                self.stream = Some(stream);
                self.state = ChannelState::Open;
                info!(channel = self.name, "channel open");
            }
            Ok(None) => {
                trace!(channel = self.name, "no peer yet");
                self.retry_at = Instant::now() + self.reconnect_interval;
            }
            Err(e) => {
                warn!(channel = self.name, error = %e, "failed to open channel");
                self.retry_at = Instant::now() + self.reconnect_interval;
            }
        }
    }

    fn lose(&mut self) {
        self.stream = None;
        self.state = ChannelState::Connecting;
        self.retry_at = Instant::now() + self.reconnect_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    const RETRY: Duration = Duration::from_secs(1);
    const WRITE_TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn test_inbound_reads_lines_then_reports_loss() {
        let connector = MockConnector::<DuplexStream>::new();
        let (mut peer, ours) = duplex(64);
        connector.attach(ours);
        let mut channel = InboundChannel::new("command", connector.clone(), RETRY);

        peer.write_all(b"on\ns 40\r\n").await.unwrap();
        assert_eq!(channel.next_event().await, InboundEvent::Line("on".into()));
        assert_eq!(channel.next_event().await, InboundEvent::Line("s 40".into()));
        assert_eq!(channel.state(), ChannelState::Open);

        drop(peer);
        assert_eq!(channel.next_event().await, InboundEvent::Lost);
        assert_eq!(channel.state(), ChannelState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_retries_at_fixed_cadence() {
        let connector = MockConnector::<DuplexStream>::new();
        let mut channel = InboundChannel::new("command", connector.clone(), RETRY);

        // No peer: the first attempt fails immediately, the next one waits a full interval.
        let waited = tokio::time::timeout(Duration::from_millis(1500), channel.next_event()).await;
        assert!(waited.is_err());
        assert_eq!(connector.attempts(), 2);

        let (mut peer, ours) = duplex(64);
        connector.attach(ours);
        peer.write_all(b"rpm\n").await.unwrap();
        assert_eq!(channel.next_event().await, InboundEvent::Line("rpm".into()));
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_skips_invalid_utf8() {
        let connector = MockConnector::<DuplexStream>::new();
        let (mut peer, ours) = duplex(64);
        connector.attach(ours);
        let mut channel = InboundChannel::new("command", connector, RETRY);

        peer.write_all(b"\xff\xfe\noff\n").await.unwrap();
        assert_eq!(channel.next_event().await, InboundEvent::Line("off".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_inbound_never_yields() {
        let connector = MockConnector::<DuplexStream>::new();
        let (_peer, ours) = duplex(64);
        connector.attach(ours);
        let mut channel = InboundChannel::new("command", connector, RETRY);
        channel.close();

        let waited = tokio::time::timeout(Duration::from_secs(5), channel.next_event()).await;
        assert!(waited.is_err());
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_drops_without_peer() {
        let connector = MockConnector::<DuplexStream>::new();
        let mut channel = OutboundChannel::new("telemetry", connector.clone(), RETRY, WRITE_TIMEOUT);

        assert_eq!(channel.send(b"rpm:0.00\n").await, Delivery::Dropped);
        // A second send inside the retry interval does not hit the connector again.
        assert_eq!(channel.send(b"rpm:0.00\n").await, Delivery::Dropped);
        assert_eq!(connector.attempts(), 1);

        let (mut peer, ours) = duplex(64);
        connector.attach(ours);
        tokio::time::advance(RETRY).await;
        assert_eq!(channel.send(b"rpm:12.00\n").await, Delivery::Sent);

        let mut buf = [0u8; 10];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"rpm:12.00\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_write_failure_reenters_connecting() {
        let connector = MockConnector::<DuplexStream>::new();
        let (peer, ours) = duplex(64);
        connector.attach(ours);
        let mut channel = OutboundChannel::new("telemetry", connector, RETRY, WRITE_TIMEOUT);

        assert!(channel.try_reconnect());
        drop(peer);
        assert_eq!(channel.send(b"rpm:1.00\n").await, Delivery::Dropped);
        assert_eq!(channel.state(), ChannelState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_times_out_on_full_peer() {
        let connector = MockConnector::<DuplexStream>::new();
        let (_peer, ours) = duplex(4);
        connector.attach(ours);
        let mut channel = OutboundChannel::new("telemetry", connector, RETRY, WRITE_TIMEOUT);

        assert_eq!(channel.send(b"rpm:1234.00\n").await, Delivery::Dropped);
        // A slow peer is not a lost peer.
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_due_attaches_peer() {
        let connector = MockConnector::<DuplexStream>::new();
        let mut channel = OutboundChannel::new("command", connector.clone(), RETRY, WRITE_TIMEOUT);
        assert!(!channel.try_reconnect());

        let (_peer, ours) = duplex(64);
        connector.attach(ours);
        channel.reconnect_due().await;
        assert_eq!(channel.state(), ChannelState::Open);
    }
}
