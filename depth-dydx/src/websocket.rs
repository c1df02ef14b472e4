//! dYdX WebSocket stream connection
//!
//! Owns the single upstream connection: connect, heartbeat probing, liveness
//! timeout, reconnect with backoff and subscription forwarding. All connection
//! state lives in one task; `StreamHandle` talks to it over a command channel.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::DateTime;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use depth_core::{
    ConnectionHealth, ConnectionStatus, EventBus, FeedControl, FeedError, FeedResult,
    LifecycleEvent, Subscription,
};

use crate::dispatcher::Dispatcher;
use crate::types::{Network, SubscriptionRequest, MARKETS_CHANNEL};

/// Default delay between reconnect attempts
const RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Default heartbeat check interval
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(15000);

/// Default time to wait for any frame after a heartbeat ping
const PING_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default cap for exponential backoff
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

// ============================================================================
// Transport
// ============================================================================

/// Outbound half of a transport: text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = FeedError> + Send>>;

/// Inbound half of a transport: text frames or transport errors
pub type FrameStream = Pin<Box<dyn Stream<Item = FeedResult<String>> + Send>>;

/// Opens transports to the venue
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> FeedResult<(FrameSink, FrameStream)>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> FeedResult<(FrameSink, FrameStream)> {
        info!("[dYdX WS] Connecting to {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::transport(format!("Connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| FeedError::transport(format!("Send failed: {}", e)))
            .with(|text: String| future::ready(Ok::<_, FeedError>(Message::Text(text.into()))));

        // Ping/pong is answered by tungstenite; only text reaches the dispatcher
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => Some(Err(FeedError::transport(format!(
                    "Connection closed by server: {:?}",
                    frame
                )))),
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::transport(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Delay policy between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectBackoff {
    /// Always wait the base interval
    #[default]
    Fixed,
    /// `base * 2^attempts`, capped at `max_delay`
    Exponential { max_delay: Duration },
}

impl ReconnectBackoff {
    pub fn exponential() -> Self {
        ReconnectBackoff::Exponential {
            max_delay: MAX_RECONNECT_DELAY,
        }
    }

    /// Delay before the next attempt, given the failed attempts so far
    pub fn delay(&self, base: Duration, attempts: u32) -> Duration {
        match self {
            ReconnectBackoff::Fixed => base,
            ReconnectBackoff::Exponential { max_delay } => 2u32
                .checked_pow(attempts)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(*max_delay, |delay| delay.min(*max_delay)),
        }
    }
}

/// Configuration for the stream connection
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub ping_timeout: Duration,
    pub reconnect_interval: Duration,
    pub backoff: ReconnectBackoff,
}

impl StreamConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            url: network.ws_url().to_string(),
            ..Self::default()
        }
    }

    /// Upper bound on how long a connection may stay silent
    fn liveness_window(&self) -> Duration {
        self.heartbeat_interval + self.ping_timeout
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: Network::Mainnet.ws_url().to_string(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            ping_timeout: PING_TIMEOUT,
            reconnect_interval: RECONNECT_INTERVAL,
            backoff: ReconnectBackoff::Fixed,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Commands sent to the connection task
#[derive(Debug)]
enum StreamCommand {
    Connect,
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Shutdown(oneshot::Sender<()>),
}

/// Health counters shared with handles (atomic for lock-free reads)
#[derive(Debug, Default)]
struct ConnectionMetrics {
    last_message_epoch_ms: AtomicU64,
    message_count: AtomicU64,
    reconnect_attempts: AtomicU32,
    session: AtomicU64,
}

impl ConnectionMetrics {
    fn record_message(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_message_epoch_ms.store(now, Ordering::SeqCst);
        self.message_count.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self, status: ConnectionStatus) -> ConnectionHealth {
        let last_ms = self.last_message_epoch_ms.load(Ordering::SeqCst);
        let last_message_time = if last_ms > 0 {
            DateTime::from_timestamp_millis(last_ms as i64)
        } else {
            None
        };

        ConnectionHealth {
            status,
            last_message_time,
            message_count: self.message_count.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            session: self.session.load(Ordering::SeqCst),
        }
    }
}

/// Handle to the running stream connection
///
/// Cheap to clone. Requests are fire-and-forget; their outcome is visible
/// through `status()`, `health()` and lifecycle events on the bus.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    command_tx: mpsc::UnboundedSender<StreamCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    metrics: Arc<ConnectionMetrics>,
}

impl StreamHandle {
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.metrics.snapshot(self.status())
    }

    /// Stop the connection and wait until it has released the transport
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(StreamCommand::Shutdown(ack_tx)).is_err() {
            debug!("[dYdX WS] Connection task already stopped");
            return;
        }
        let _ = ack_rx.await;
    }

    fn send(&self, command: StreamCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("[dYdX WS] Connection task stopped, command dropped");
        }
    }
}

impl FeedControl for StreamHandle {
    fn connect(&self) {
        self.send(StreamCommand::Connect);
    }

    fn subscribe(&self, subscription: Subscription) {
        self.send(StreamCommand::Subscribe(subscription));
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.send(StreamCommand::Unsubscribe(subscription));
    }
}

// ============================================================================
// Connection Task
// ============================================================================

/// Where the connection task goes next
enum Phase {
    Idle,
    Connecting,
    Connected(FrameSink, FrameStream),
    Backoff(Instant),
    Exit,
}

/// The stream connection task
pub struct StreamConnection {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    bus: Arc<dyn EventBus>,
    dispatcher: Dispatcher,
    command_rx: mpsc::UnboundedReceiver<StreamCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
    metrics: Arc<ConnectionMetrics>,
    status: ConnectionStatus,
    session: u64,
    reconnect_attempts: u32,
}

impl StreamConnection {
    /// Spawn the connection task. It stays idle until asked to connect.
    pub fn spawn(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        bus: Arc<dyn EventBus>,
    ) -> StreamHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let metrics = Arc::new(ConnectionMetrics::default());

        let connection = Self {
            config,
            connector,
            dispatcher: Dispatcher::new(bus.clone()),
            bus,
            command_rx,
            status_tx,
            metrics: metrics.clone(),
            status: ConnectionStatus::Disconnected,
            session: 0,
            reconnect_attempts: 0,
        };

        tokio::spawn(connection.run());

        StreamHandle {
            command_tx,
            status_rx,
            metrics,
        }
    }

    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connect().await,
                Phase::Connected(sink, stream) => self.session_loop(sink, stream).await,
                Phase::Backoff(deadline) => self.backoff(deadline).await,
                Phase::Exit => break,
            };
        }
        debug!("[dYdX WS] Connection task exiting");
    }

    /// Disconnected: wait for something to do
    async fn idle(&mut self) -> Phase {
        loop {
            match self.command_rx.recv().await {
                Some(StreamCommand::Connect) => return Phase::Connecting,
                Some(StreamCommand::Subscribe(sub)) => {
                    warn!("[dYdX WS] {}", FeedError::subscription(sub.to_string()));
                    return Phase::Connecting;
                }
                Some(StreamCommand::Unsubscribe(sub)) => {
                    warn!("[dYdX WS] {}", FeedError::subscription(sub.to_string()));
                }
                Some(StreamCommand::Shutdown(ack)) => {
                    let _ = ack.send(());
                    return Phase::Exit;
                }
                None => return Phase::Exit,
            }
        }
    }

    /// Open a transport, bounded by the liveness window
    async fn connect(&mut self) -> Phase {
        self.set_status(ConnectionStatus::Connecting);

        let connector = self.connector.clone();
        let attempt = timeout(self.config.liveness_window(), async move {
            connector.connect().await
        });
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok((sink, stream))) => {
                            self.on_connected();
                            Phase::Connected(sink, stream)
                        }
                        Ok(Err(e)) => {
                            error!("[dYdX WS] {}", e);
                            self.schedule_reconnect()
                        }
                        Err(_) => {
                            error!(
                                "[dYdX WS] Connection attempt timed out after {:?}",
                                self.config.liveness_window()
                            );
                            self.schedule_reconnect()
                        }
                    };
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(StreamCommand::Shutdown(ack)) => {
                        self.set_status(ConnectionStatus::Disconnected);
                        let _ = ack.send(());
                        return Phase::Exit;
                    }
                    Some(cmd) => self.reject(cmd),
                    None => return Phase::Exit,
                }
            }
        }
    }

    /// Wait out the reconnect delay
    async fn backoff(&mut self, deadline: Instant) -> Phase {
        let wait = sleep_until(deadline);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = &mut wait => {
                    self.reconnect_attempts += 1;
                    self.metrics
                        .reconnect_attempts
                        .store(self.reconnect_attempts, Ordering::SeqCst);
                    return Phase::Connecting;
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(StreamCommand::Shutdown(ack)) => {
                        info!("[dYdX WS] Reconnect cancelled by shutdown");
                        self.set_status(ConnectionStatus::Disconnected);
                        let _ = ack.send(());
                        return Phase::Exit;
                    }
                    Some(cmd) => self.reject(cmd),
                    None => return Phase::Exit,
                }
            }
        }
    }

    /// Connected: read frames, forward commands, check liveness
    async fn session_loop(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> Phase {
        let heartbeat_interval = self.config.heartbeat_interval;
        let mut last_message_at = Instant::now();
        let mut ping_deadline: Option<Instant> = None;

        let mut heartbeat = interval_at(last_message_at + heartbeat_interval, heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        last_message_at = Instant::now();
                        ping_deadline = None;
                        self.metrics.record_message();
                        self.dispatcher.dispatch(&text, self.session);
                    }
                    Some(Err(e)) => {
                        error!("[dYdX WS] Error: {}", e);
                        break;
                    }
                    None => {
                        info!("[dYdX WS] Stream ended");
                        break;
                    }
                },

                cmd = self.command_rx.recv() => match cmd {
                    Some(StreamCommand::Connect) => {
                        debug!("[dYdX WS] Already connected");
                    }
                    Some(StreamCommand::Subscribe(sub)) => {
                        debug!("[dYdX WS] Subscribing to {}", sub);
                        if let Err(e) = send_request(&mut sink, SubscriptionRequest::subscribe(&sub)).await {
                            warn!("[dYdX WS] Failed to subscribe to {}: {}", sub, e);
                            break;
                        }
                    }
                    Some(StreamCommand::Unsubscribe(sub)) => {
                        debug!("[dYdX WS] Unsubscribing from {}", sub);
                        if let Err(e) = send_request(&mut sink, SubscriptionRequest::unsubscribe(&sub)).await {
                            warn!("[dYdX WS] Failed to unsubscribe from {}: {}", sub, e);
                            break;
                        }
                    }
                    Some(StreamCommand::Shutdown(ack)) => {
                        self.close(sink).await;
                        let _ = ack.send(());
                        return Phase::Exit;
                    }
                    None => {
                        self.close(sink).await;
                        return Phase::Exit;
                    }
                },

                _ = heartbeat.tick() => {
                    if ping_deadline.is_none() && last_message_at.elapsed() >= heartbeat_interval {
                        debug!(
                            "[dYdX WS] No message for {:?}, sending heartbeat ping",
                            last_message_at.elapsed()
                        );
                        let ping = Subscription::channel(MARKETS_CHANNEL);
                        if let Err(e) = send_request(&mut sink, SubscriptionRequest::subscribe(&ping)).await {
                            warn!("[dYdX WS] Failed to send heartbeat ping: {}", e);
                            break;
                        }
                        ping_deadline = Some(Instant::now() + self.config.ping_timeout);
                    }
                },

                _ = sleep_until_deadline(ping_deadline) => {
                    warn!(
                        "[dYdX WS] No response within {:?} of heartbeat ping",
                        self.config.ping_timeout
                    );
                    break;
                }
            }
        }

        self.on_disconnected();
        let next = self.schedule_reconnect();
        drop(stream);
        self.close_transport(sink).await;
        next
    }

    fn on_connected(&mut self) {
        self.session += 1;
        self.reconnect_attempts = 0;
        self.metrics.session.store(self.session, Ordering::SeqCst);
        self.metrics.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Connected);

        info!("[dYdX WS] Connected successfully (session {})", self.session);
        self.bus.publish(
            LifecycleEvent::Connected {
                session: self.session,
            }
            .into(),
        );
    }

    /// Publishes `Disconnected` once per lost connection
    fn on_disconnected(&mut self) {
        if self.status == ConnectionStatus::Connected {
            info!("[dYdX WS] Disconnected (session {})", self.session);
            self.bus.publish(
                LifecycleEvent::Disconnected {
                    session: self.session,
                }
                .into(),
            );
        }
    }

    fn schedule_reconnect(&mut self) -> Phase {
        self.set_status(ConnectionStatus::Reconnecting);
        let delay = self
            .config
            .backoff
            .delay(self.config.reconnect_interval, self.reconnect_attempts);
        info!(
            "[dYdX WS] Attempting to reconnect in {:?} (attempt {})",
            delay,
            self.reconnect_attempts + 1
        );
        Phase::Backoff(Instant::now() + delay)
    }

    /// Send a close on the transport, bounded by the ping timeout
    async fn close_transport(&self, mut sink: FrameSink) {
        match timeout(self.config.ping_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[dYdX WS] Error closing transport: {}", e),
            Err(_) => debug!("[dYdX WS] Timed out closing transport"),
        }
    }

    /// Shut down a live session
    async fn close(&mut self, sink: FrameSink) {
        self.close_transport(sink).await;
        self.on_disconnected();
        self.set_status(ConnectionStatus::Disconnected);
        info!("[dYdX WS] Connection shut down");
    }

    /// Handle a command that needs a live transport while there is none
    fn reject(&self, cmd: StreamCommand) {
        match cmd {
            StreamCommand::Connect => {
                debug!("[dYdX WS] Connect ignored, already {}", self.status);
            }
            StreamCommand::Subscribe(sub) | StreamCommand::Unsubscribe(sub) => {
                warn!("[dYdX WS] {}", FeedError::subscription(sub.to_string()));
            }
            StreamCommand::Shutdown(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }
}

async fn send_request(sink: &mut FrameSink, request: SubscriptionRequest<'_>) -> FeedResult<()> {
    let json = serde_json::to_string(&request)
        .map_err(|e| FeedError::parse(format!("Failed to encode request: {}", e)))?;
    sink.send(json).await
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
