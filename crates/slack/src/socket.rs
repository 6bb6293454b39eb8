use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use goosebot_core::config::ReconnectConfig;

use crate::envelope::{envelope_id_of, parse_frame, SocketFrame};
use crate::events::{EventContext, EventDispatcher, SlackEnvelope};
use crate::web::SlackWebClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 10, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the server closed the stream.
    async fn next_frame(&self) -> Result<Option<SocketFrame>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Why [`SocketModeRunner::start`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerExit {
    Shutdown,
    RetriesExhausted,
}

/// Live connection counters shared with the health endpoints.
#[derive(Debug, Default)]
pub struct SocketStatus {
    connected: AtomicBool,
    exhausted: AtomicBool,
    envelopes_received: AtomicU64,
    reconnects: AtomicU64,
}

impl SocketStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True once the runner gave up reconnecting; it never recovers in-process.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    pub fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }

    pub fn envelopes_received(&self) -> u64 {
        self.envelopes_received.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

enum SessionEnd {
    Closed { received_frames: bool },
    Disconnect { reason: String },
    Shutdown,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
    status: Arc<SocketStatus>,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(dispatcher),
            reconnect_policy,
            status: Arc::new(SocketStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<SocketStatus> {
        Arc::clone(&self.status)
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect_policy
    }

    /// Runs until the stream is exhausted past `max_retries` or `shutdown` flips to true.
    ///
    /// Handler tasks outlive individual sessions; they are only awaited before returning.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> RunnerExit {
        let mut in_flight = JoinSet::new();
        let exit = self.run_sessions(&mut shutdown, &mut in_flight).await;
        if exit == RunnerExit::RetriesExhausted {
            self.status.mark_exhausted();
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "waiting for in-flight event handlers");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "event handler task panicked");
            }
        }
        exit
    }

    async fn run_sessions(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        in_flight: &mut JoinSet<()>,
    ) -> RunnerExit {
        let mut attempt = 0_u32;
        loop {
            let outcome = self.connect_and_pump(attempt, shutdown, in_flight).await;
            self.status.set_connected(false);

            let failure = match outcome {
                Ok(SessionEnd::Shutdown) => {
                    info!(event_name = "ingress.slack.shutdown", "socket mode runner stopping");
                    return RunnerExit::Shutdown;
                }
                Ok(SessionEnd::Disconnect { reason }) => {
                    info!(
                        event_name = "ingress.slack.disconnect_requested",
                        reason = %reason,
                        "slack requested reconnect"
                    );
                    attempt = 0;
                    self.status.reconnects.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(SessionEnd::Closed { received_frames }) => {
                    if received_frames {
                        attempt = 0;
                    }
                    "socket mode stream closed".to_string()
                }
                Err(transport_error) => transport_error.to_string(),
            };

            warn!(
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %failure,
                "socket mode transport failed"
            );
            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    event_name = "ingress.slack.retries_exhausted",
                    max_retries = self.reconnect_policy.max_retries,
                    "socket mode retries exhausted"
                );
                return RunnerExit::RetriesExhausted;
            }

            let delay = self.reconnect_policy.backoff(attempt);
            attempt += 1;
            self.status.reconnects.fetch_add(1, Ordering::Relaxed);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return RunnerExit::Shutdown,
                }
            }
        }
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        shutdown: &mut watch::Receiver<bool>,
        in_flight: &mut JoinSet<()>,
    ) -> Result<SessionEnd, TransportError> {
        if *shutdown.borrow() {
            return Ok(SessionEnd::Shutdown);
        }

        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        self.status.set_connected(true);
        info!(attempt, "socket mode transport connected");

        let end = self.pump(shutdown, in_flight).await;

        if let Err(error) = self.transport.disconnect().await {
            debug!(error = %error, "socket mode disconnect failed");
        }
        end
    }

    async fn pump(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        in_flight: &mut JoinSet<()>,
    ) -> Result<SessionEnd, TransportError> {
        let mut received_frames = false;
        loop {
            let frame = tokio::select! {
                frame = self.transport.next_frame() => frame?,
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(error) = joined {
                        warn!(error = %error, "event handler task panicked");
                    }
                    continue;
                }
            };

            let Some(frame) = frame else {
                info!("socket mode transport stream closed");
                return Ok(SessionEnd::Closed { received_frames });
            };
            received_frames = true;

            match frame {
                SocketFrame::Hello { num_connections } => {
                    info!(
                        event_name = "ingress.slack.hello",
                        num_connections = num_connections.unwrap_or_default(),
                        "socket mode session ready"
                    );
                }
                SocketFrame::Disconnect { reason } => {
                    return Ok(SessionEnd::Disconnect { reason });
                }
                SocketFrame::Envelope(envelope) => {
                    self.acknowledge(&envelope).await;
                    self.spawn_dispatch(envelope, in_flight);
                }
            }
        }
    }

    async fn acknowledge(&self, envelope: &SlackEnvelope) {
        self.status.envelopes_received.fetch_add(1, Ordering::Relaxed);
        let channel_id = envelope.event.channel_id().unwrap_or("unknown");
        info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %envelope.envelope_id,
            channel_id,
            retry_attempt = envelope.retry_attempt,
            "received slack envelope"
        );

        if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
            warn!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "failed to acknowledge slack envelope"
            );
        } else {
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                "acknowledged slack envelope"
            );
        }
    }

    fn spawn_dispatch(&self, envelope: SlackEnvelope, in_flight: &mut JoinSet<()>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        in_flight.spawn(async move {
            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            if let Err(error) = dispatcher.dispatch(&envelope, &context).await {
                warn!(
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "event dispatch failed; continuing socket loop"
                );
            }
        });
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Socket Mode over a real WebSocket: `apps.connections.open`, then text frames.
///
/// A read that sees nothing for `idle_timeout` sends a ping; a second silent interval fails the
/// session so the runner reconnects.
pub struct WebSocketTransport {
    web: SlackWebClient,
    connect_timeout: Duration,
    idle_timeout: Duration,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketTransport {
    pub fn new(web: SlackWebClient) -> Self {
        Self {
            web,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sink: Mutex::new(None),
            stream: Mutex::new(None),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.idle_timeout = idle_timeout;
        self
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or_else(|| TransportError::Acknowledge("not connected".into()))?;
        sink.send(message).await.map_err(|error| TransportError::Acknowledge(error.to_string()))
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .web
            .open_socket_url()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()));
        let (socket, _response) = handshake
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "websocket handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<SocketFrame>, TransportError> {
        let mut pinged = false;
        loop {
            let next = {
                let mut stream = self.stream.lock().await;
                let Some(stream) = stream.as_mut() else {
                    return Ok(None);
                };
                tokio::time::timeout(self.idle_timeout, stream.next()).await
            };

            let Ok(message) = next else {
                if pinged {
                    return Err(TransportError::Receive(format!(
                        "no frames for {}ms after liveness ping",
                        self.idle_timeout.as_millis()
                    )));
                }
                debug!("socket mode connection idle; sending liveness ping");
                self.send(Message::Ping(Vec::new())).await?;
                pinged = true;
                continue;
            };
            pinged = false;

            match message {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(error) => {
                        warn!(error = %error, "skipping unparseable socket mode frame");
                        if let Some(envelope_id) = envelope_id_of(&text) {
                            self.acknowledge(&envelope_id).await?;
                        }
                    }
                },
                Some(Ok(Message::Ping(payload))) => self.send(Message::Pong(payload)).await?,
                Some(Ok(_)) => {}
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        self.send(Message::Text(ack)).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stream.lock().await.take();
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))?;
        }
        Ok(())
    }
}
