//! Stdio transport: a single peer over standard input/output.
//!
//! A reader task drains the input stream through the frame codec and hands
//! each decoded message to the attached handler; responses and
//! server-initiated messages funnel through a bounded outbound queue drained
//! by a writer task, the sole producer to the output stream. A full queue
//! applies backpressure to `send` callers. Recoverable decode errors produce
//! a `-32700` response and the stream continues; EOF disconnects.

use crate::{
    ConnectionState, LifecycleEvent, MessageHandler, Result, Transport, TransportContext,
    TransportError, TransportKind, TransportMetrics, TransportStats,
};
use async_trait::async_trait;
use bytes::BytesMut;
use conduit_mcp_core::protocol::framing::{FrameCodec, Framing, DEFAULT_MAX_MESSAGE_SIZE};
use conduit_mcp_core::protocol::jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
use conduit_mcp_core::utils::generate_session_id;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct StdioTransportConfig {
    pub framing: Framing,
    /// Read chunk size; also the depth of the bounded outbound queue.
    pub buffer_size: usize,
    pub max_message_size: usize,
    /// Heartbeat `ping` notification interval; `None` disables keepalive.
    pub keepalive_interval: Option<Duration>,
    /// How long `stop` waits for the writer to flush pending frames.
    pub shutdown_timeout: Duration,
}

impl Default for StdioTransportConfig {
    fn default() -> Self {
        Self {
            framing: Framing::NewlineDelimited,
            buffer_size: 8192,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            keepalive_interval: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

pub struct StdioTransport {
    config: StdioTransportConfig,
    session_id: String,
    outbound: Option<mpsc::Sender<JsonRpcMessage>>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    state: Arc<StdRwLock<ConnectionState>>,
    metrics: Arc<TransportMetrics>,
}

impl StdioTransport {
    pub fn new(config: StdioTransportConfig) -> Self {
        Self {
            config,
            session_id: generate_session_id(),
            outbound: None,
            shutdown: None,
            tasks: Vec::new(),
            state: Arc::new(StdRwLock::new(ConnectionState::Idle)),
            metrics: Arc::new(TransportMetrics::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Clone of the bounded outbound queue's sender, once started. The
    /// engine's notification pump feeds this directly; a full queue applies
    /// backpressure to the producer.
    pub fn outbound_sender(&self) -> Option<mpsc::Sender<JsonRpcMessage>> {
        self.outbound.clone()
    }

    fn set_state(state: &Arc<StdRwLock<ConnectionState>>, next: ConnectionState) {
        *state.write().expect("state lock poisoned") = next;
    }

    /// Wire the transport onto arbitrary byte streams. `start` uses the
    /// process stdio; tests drive this with in-memory duplex pipes.
    pub async fn start_with_streams<R, W>(
        &mut self,
        handler: Arc<dyn MessageHandler>,
        reader: R,
        writer: W,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.outbound.is_some() {
            return Err(TransportError::Initialization {
                message: "transport already started".to_string(),
            });
        }

        let queue_depth = self.config.buffer_size.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel::<JsonRpcMessage>(queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self::set_state(&self.state, ConnectionState::Connected);
        self.metrics.mark_connected();

        let ctx = TransportContext::new(self.session_id.clone(), TransportKind::Stdio);
        handler
            .on_lifecycle(LifecycleEvent::Connected, ctx.clone())
            .await;

        self.tasks.push(tokio::spawn(writer_task(
            writer,
            outbound_rx,
            shutdown_rx.clone(),
            FrameCodec::new(self.config.framing, self.config.max_message_size),
            Arc::clone(&self.state),
            Arc::clone(&self.metrics),
        )));

        self.tasks.push(tokio::spawn(reader_task(
            reader,
            handler,
            ctx,
            outbound_tx.clone(),
            shutdown_rx.clone(),
            FrameCodec::new(self.config.framing, self.config.max_message_size),
            self.config.buffer_size,
            Arc::clone(&self.state),
            Arc::clone(&self.metrics),
        )));

        if let Some(interval) = self.config.keepalive_interval {
            self.tasks.push(tokio::spawn(keepalive_task(
                interval,
                outbound_tx.clone(),
                shutdown_rx,
            )));
        }

        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown_tx);
        debug!(session_id = %self.session_id, "stdio transport started");
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&mut self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.start_with_streams(handler, tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    async fn stop(&mut self) -> Result<()> {
        Self::set_state(&self.state, ConnectionState::ShuttingDown);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.outbound = None;

        let flush_deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for task in self.tasks.drain(..) {
            match tokio::time::timeout_at(flush_deadline, task).await {
                Ok(_) => {}
                Err(_) => {
                    // Reader may be parked on a blocking stdin read.
                }
            }
        }
        Self::set_state(&self.state, ConnectionState::Disconnected);
        debug!("stdio transport stopped");
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::NotReady {
                state: self.state(),
            });
        };
        outbound
            .send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn state(&self) -> ConnectionState {
        self.state.read().expect("state lock poisoned").clone()
    }

    fn stats(&self) -> TransportStats {
        self.metrics.snapshot()
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<JsonRpcMessage>,
    mut shutdown: watch::Receiver<bool>,
    codec: FrameCodec,
    state: Arc<StdRwLock<ConnectionState>>,
    metrics: Arc<TransportMetrics>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Drain whatever is already queued, then flush and exit.
                    while let Ok(message) = outbound.try_recv() {
                        match codec.encode_message(&message) {
                            Ok(bytes) => {
                                if writer.write_all(&bytes).await.is_err() {
                                    break;
                                }
                                metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(_) => {
                                metrics.send_errors.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    let _ = writer.flush().await;
                    break;
                }
            }
            received = outbound.recv() => {
                let Some(message) = received else {
                    let _ = writer.flush().await;
                    break;
                };
                let bytes = match codec.encode_message(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        metrics.send_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("failed to encode outbound frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&bytes).await {
                    metrics.send_errors.fetch_add(1, Ordering::Relaxed);
                    StdioTransport::set_state(&state, ConnectionState::Failed(e.to_string()));
                    break;
                }
                if writer.flush().await.is_err() {
                    StdioTransport::set_state(&state, ConnectionState::Failed("flush failed".into()));
                    break;
                }
                metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn reader_task<R>(
    mut reader: R,
    handler: Arc<dyn MessageHandler>,
    ctx: TransportContext,
    outbound: mpsc::Sender<JsonRpcMessage>,
    mut shutdown: watch::Receiver<bool>,
    mut codec: FrameCodec,
    buffer_size: usize,
    state: Arc<StdRwLock<ConnectionState>>,
    metrics: Arc<TransportMetrics>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut chunk = BytesMut::with_capacity(buffer_size.max(1));
    loop {
        let read = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            read = reader.read_buf(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                debug!("stdio peer reached EOF");
                StdioTransport::set_state(&state, ConnectionState::Disconnected);
                handler
                    .on_lifecycle(LifecycleEvent::Disconnected, ctx.clone())
                    .await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                StdioTransport::set_state(&state, ConnectionState::Failed(e.to_string()));
                handler
                    .on_lifecycle(LifecycleEvent::Error(e.to_string()), ctx.clone())
                    .await;
                break;
            }
        }

        let messages = match codec.feed(&chunk) {
            Ok(messages) => {
                chunk.clear();
                messages
            }
            Err(e) => {
                chunk.clear();
                metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
                trace!("recoverable decode error: {e}");
                let response = JsonRpcResponse::error(JsonRpcError::parse_error(e.to_string()), None);
                if outbound
                    .send(JsonRpcMessage::Response(response))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        for message in messages {
            metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            if let Some(reply) = handler.on_message(message, ctx.clone()).await {
                if outbound.send(reply).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn keepalive_task(
    interval: Duration,
    outbound: mpsc::Sender<JsonRpcMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let heartbeat = JsonRpcMessage::notification("ping", None);
                if outbound.send(heartbeat).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_mcp_core::protocol::jsonrpc::JsonRpcRequest;
    use serde_json::json;
    use tokio::io::duplex;

    struct PongHandler;

    #[async_trait]
    impl MessageHandler for PongHandler {
        async fn on_message(
            &self,
            message: JsonRpcMessage,
            _ctx: TransportContext,
        ) -> Option<JsonRpcMessage> {
            match message {
                JsonRpcMessage::Request(req) if req.id.is_some() => Some(JsonRpcMessage::Response(
                    JsonRpcResponse::success(json!({}), req.id),
                )),
                _ => None,
            }
        }
    }

    async fn read_line(reader: &mut (impl AsyncRead + Unpin)) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            reader.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn request_gets_response_over_pipes() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let mut transport = StdioTransport::new(StdioTransportConfig::default());
        transport
            .start_with_streams(Arc::new(PongHandler), server_read, server_write)
            .await
            .unwrap();

        let request =
            serde_json::to_string(&JsonRpcRequest::new("ping", None, 1.into())).unwrap();
        client_write
            .write_all(format!("{request}\n").as_bytes())
            .await
            .unwrap();

        let line = read_line(&mut client_read).await;
        let response: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, Some(1.into()));
        assert!(response.is_success());

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn parse_error_yields_32700_and_stream_survives() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let mut transport = StdioTransport::new(StdioTransportConfig::default());
        transport
            .start_with_streams(Arc::new(PongHandler), server_read, server_write)
            .await
            .unwrap();

        client_write.write_all(b"not-json\n").await.unwrap();
        let line = read_line(&mut client_read).await;
        let response: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        let error = response.error.expect("expected parse error");
        assert_eq!(error.code, -32700);
        assert_eq!(response.id, None);

        // The session stays open: a valid request still round-trips.
        let request =
            serde_json::to_string(&JsonRpcRequest::new("ping", None, 2.into())).unwrap();
        client_write
            .write_all(format!("{request}\n").as_bytes())
            .await
            .unwrap();
        let line = read_line(&mut client_read).await;
        let response: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, Some(2.into()));
        assert!(response.is_success());

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_flushes_queued_outbound_frames() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, _client_write) = tokio::io::split(client);

        let mut transport = StdioTransport::new(StdioTransportConfig::default());
        transport
            .start_with_streams(Arc::new(PongHandler), server_read, server_write)
            .await
            .unwrap();

        transport
            .send(JsonRpcMessage::notification(
                "notifications/message",
                Some(json!({"level": "info", "data": "goodbye"})),
            ))
            .await
            .unwrap();
        transport.stop().await.unwrap();

        let line = read_line(&mut client_read).await;
        assert!(line.contains("notifications/message"));
    }

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let transport = StdioTransport::new(StdioTransportConfig::default());
        let result = transport
            .send(JsonRpcMessage::notification("ping", None))
            .await;
        assert!(matches!(result, Err(TransportError::NotReady { .. })));
    }

    #[tokio::test]
    async fn keepalive_emits_ping_notifications() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, _client_write) = tokio::io::split(client);

        let mut transport = StdioTransport::new(StdioTransportConfig {
            keepalive_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        transport
            .start_with_streams(Arc::new(PongHandler), server_read, server_write)
            .await
            .unwrap();

        let line = read_line(&mut client_read).await;
        assert!(line.contains("\"method\":\"ping\""));
        transport.stop().await.unwrap();
    }
}
