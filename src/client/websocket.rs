//! Socket.IO-over-WebSocket transport
//!
//! A connect performs the WebSocket upgrade, waits for the Engine.IO `OPEN` packet, joins the
//! default namespace and then splits the stream into a reader task and a writer task. The
//! session talks to those tasks over channels; dropping the session cancels both.

use crate::client::protocol::{self, EnginePacket, OpenInfo, SocketPacket};
use crate::client::tls;
use crate::client::{ConnectTarget, Connector, Prober, Session, SessionEvent};
use crate::common::TerminalIdentity;
use crate::config::ConnectionConfig;
use crate::constants::*;
use crate::errors::{ErrorContext, HarnessError, Result};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::{
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::Message, tungstenite::client::IntoClientRequest,
    tungstenite::protocol::WebSocketConfig,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Opens Socket.IO sessions over `ws://` or `wss://`
pub struct WebSocketConnector {
    tls: Arc<rustls::ClientConfig>,
    probe_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            tls: tls::client_config(config.ssl_verify)?,
            probe_timeout: config.connect_timeout,
        })
    }

    async fn open_stream(&self, target: &ConnectTarget) -> Result<WsStream> {
        let request = target.url.as_str().into_client_request().map_err(|e| {
            HarnessError::connect(format!("Invalid WebSocket request for {}: {}", target.masked, e))
        })?;

        let (stream, _response) = connect_async_tls_with_config(
            request,
            Some(WebSocketConfig::default()),
            true,
            Some(TlsConnector::Rustls(self.tls.clone())),
        )
        .await
        .map_err(classify_connect_error)?;

        Ok(stream)
    }
}

fn classify_connect_error(err: tokio_tungstenite::tungstenite::Error) -> HarnessError {
    match HarnessError::from(err) {
        HarnessError::WebSocket(inner) => HarnessError::connect(inner.to_string()),
        other => other,
    }
}

impl WebSocketConnector {
    /// Upgrade, join the default namespace and start the session's I/O tasks
    pub async fn open(&self, target: &ConnectTarget) -> Result<WebSocketSession> {
        let mut stream = self.open_stream(target).await?;
        let open = handshake(&mut stream).await?;
        debug!(
            "[{}] Engine.IO session {} open (ping interval {}ms, timeout {}ms)",
            target.terminal, open.sid, open.ping_interval, open.ping_timeout
        );
        Ok(WebSocketSession::start(
            stream,
            &open,
            target.terminal.clone(),
            self.probe_timeout,
        ))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>> {
        Ok(Box::new(self.open(target).await?))
    }
}

fn text(packet: EnginePacket) -> Message {
    Message::Text(packet.encode().into())
}

/// Next Engine.IO packet during the handshake, skipping non-text frames
async fn next_packet(stream: &mut WsStream) -> Result<EnginePacket> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(frame))) => return protocol::decode(frame.as_str()),
            Some(Ok(Message::Close(frame))) => {
                return Err(HarnessError::connect(format!(
                    "Server closed the connection during the handshake{}",
                    frame
                        .map(|f| format!(" ({})", f.reason.as_str()))
                        .unwrap_or_default()
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(classify_connect_error(e)),
            None => {
                return Err(HarnessError::connect(
                    "Connection ended during the handshake",
                ));
            }
        }
    }
}

/// Engine.IO `OPEN`, then join the default namespace
async fn handshake(stream: &mut WsStream) -> Result<OpenInfo> {
    let open = match next_packet(stream).await? {
        EnginePacket::Open(info) => info,
        other => {
            return Err(HarnessError::connect(format!(
                "Expected Engine.IO OPEN, got {:?}",
                other
            )));
        }
    };

    stream
        .send(text(EnginePacket::Message(SocketPacket::connect())))
        .await
        .map_err(classify_connect_error)?;

    loop {
        match next_packet(stream).await? {
            EnginePacket::Message(SocketPacket::Connect { .. }) => return Ok(open),
            EnginePacket::Message(SocketPacket::ConnectError { data, .. }) => {
                let reason = data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string());
                return Err(HarnessError::AuthRejected(reason));
            }
            EnginePacket::Ping => {
                stream
                    .send(text(EnginePacket::Pong))
                    .await
                    .map_err(classify_connect_error)?;
            }
            EnginePacket::Close => {
                return Err(HarnessError::connect(
                    "Server closed the Engine.IO session during the handshake",
                ));
            }
            _ => continue,
        }
    }
}

/// A frame for the writer task, optionally acknowledged once written
struct Outbound {
    message: Message,
    ack: Option<oneshot::Sender<Result<()>>>,
}

impl Outbound {
    fn fire(message: Message) -> Self {
        Self { message, ack: None }
    }

    fn acked(message: Message) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                ack: Some(tx),
            },
            rx,
        )
    }
}

/// Keep-alive probes waiting for the server's Socket.IO ACK, by ack id
type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>;

async fn send_acked(outbound: &mpsc::Sender<Outbound>, message: Message) -> Result<()> {
    let (frame, ack) = Outbound::acked(message);
    outbound
        .send(frame)
        .await
        .with_transport_context("Writer task has stopped")?;
    ack.await
        .with_transport_context("Writer task dropped the frame")?
}

pub struct WebSocketSession {
    terminal: TerminalIdentity,
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<Result<SessionEvent>>,
    prober: Arc<WebSocketProber>,
    io: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    _io_guard: DropGuard,
}

impl WebSocketSession {
    fn start(
        stream: WsStream,
        open: &OpenInfo,
        terminal: TerminalIdentity,
        probe_timeout: Duration,
    ) -> Self {
        let (sink, source) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);
        let acks = PendingAcks::default();
        let io = CancellationToken::new();

        let liveness = if open.ping_interval == 0 {
            DEFAULT_PING_INTERVAL + DEFAULT_PING_TIMEOUT
        } else {
            open.liveness_window()
        };

        let tasks = vec![
            tokio::spawn(write_loop(sink, outbound_rx, io.clone())),
            tokio::spawn(read_loop(
                source,
                inbound_tx,
                outbound_tx.clone(),
                acks.clone(),
                liveness,
                io.clone(),
            )),
        ];

        let prober = Arc::new(WebSocketProber {
            terminal: terminal.clone(),
            outbound: outbound_tx.clone(),
            acks,
            next_id: AtomicU64::new(1),
            timeout: probe_timeout,
        });

        Self {
            terminal,
            outbound: outbound_tx,
            inbound: inbound_rx,
            prober,
            io: io.clone(),
            tasks,
            _io_guard: io.drop_guard(),
        }
    }
}

#[async_trait]
impl Session for WebSocketSession {
    fn prober(&self) -> Arc<dyn Prober> {
        self.prober.clone()
    }

    async fn next_event(&mut self) -> Result<SessionEvent> {
        match self.inbound.recv().await {
            Some(event) => event,
            None => Err(HarnessError::transport("Reader task has stopped")),
        }
    }

    /// Sends `41` and a close frame, then stops and joins the reader and writer tasks
    async fn close(&mut self) -> Result<()> {
        debug!("[{}] Closing session", self.terminal);
        let mut result = send_acked(
            &self.outbound,
            text(EnginePacket::Message(SocketPacket::disconnect())),
        )
        .await;
        if result.is_ok() {
            result = send_acked(&self.outbound, Message::Close(None)).await;
        }

        self.io.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        result
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        // A stuck socket must not outlive the session
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sink.send(frame.message) => {
                result.map_err(|e| HarnessError::transport(format!("Write failed: {}", e)))
            }
        };
        let failed = result.is_err();
        if let Some(ack) = frame.ack {
            let _ = ack.send(result);
        }
        if failed {
            break;
        }
    }
}

fn render_args(mut args: Vec<Value>) -> String {
    if args.len() == 1 {
        args.remove(0).to_string()
    } else {
        Value::Array(args).to_string()
    }
}

async fn read_loop(
    mut source: WsSource,
    inbound: mpsc::Sender<Result<SessionEvent>>,
    outbound: mpsc::Sender<Outbound>,
    acks: PendingAcks,
    liveness: Duration,
    cancel: CancellationToken,
) {
    let ended = read_frames(&mut source, &inbound, &outbound, &acks, liveness, &cancel).await;

    // Dropping the senders fails every probe still waiting for an ACK
    acks.lock().await.clear();

    if let Some(ended) = ended {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = inbound.send(Err(ended)) => {}
        }
    }
}

/// Reads until the session ends; `None` when cancelled or nobody is listening
async fn read_frames(
    source: &mut WsSource,
    inbound: &mpsc::Sender<Result<SessionEvent>>,
    outbound: &mpsc::Sender<Outbound>,
    acks: &PendingAcks,
    liveness: Duration,
    cancel: &CancellationToken,
) -> Option<HarnessError> {
    let mut deadline = Instant::now() + liveness;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = sleep_until(deadline) => {
                return Some(HarnessError::transport(format!(
                    "No traffic from server for {}s",
                    liveness.as_secs()
                )));
            }
            frame = source.next() => frame,
        };
        deadline = Instant::now() + liveness;

        let event = match frame {
            Some(Ok(Message::Text(frame))) => match protocol::decode(frame.as_str()) {
                Ok(EnginePacket::Ping) => {
                    if outbound.send(Outbound::fire(text(EnginePacket::Pong))).await.is_err() {
                        return Some(HarnessError::transport("Writer task has stopped"));
                    }
                    SessionEvent::Heartbeat
                }
                Ok(EnginePacket::Message(SocketPacket::Event { name, args, .. })) => {
                    SessionEvent::ServerEvent {
                        name,
                        data: render_args(args),
                    }
                }
                Ok(EnginePacket::Message(SocketPacket::Ack { id, .. })) => {
                    if let Some(waiter) = acks.lock().await.remove(&id) {
                        let _ = waiter.send(());
                    }
                    continue;
                }
                Ok(EnginePacket::Message(SocketPacket::Disconnect { .. })) => {
                    return Some(HarnessError::transport("Server disconnected the namespace"));
                }
                Ok(EnginePacket::Close) => {
                    return Some(HarnessError::transport("Server closed the Engine.IO session"));
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("Ignoring undecodable frame: {}", e);
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                return Some(HarnessError::transport(format!(
                    "Close frame received{}",
                    frame
                        .map(|f| format!(" ({} {})", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_default()
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Some(HarnessError::transport(e.to_string())),
            None => return Some(HarnessError::transport("Connection closed by server")),
        };

        tokio::select! {
            _ = cancel.cancelled() => return None,
            sent = inbound.send(Ok(event)) => {
                if sent.is_err() {
                    return None;
                }
            }
        }
    }
}

/// Emits the application keep-alive event and waits for the server's ACK.
///
/// A write that succeeds proves nothing on a half-open connection, so a probe only
/// passes once the matching Socket.IO ACK has been read back.
pub struct WebSocketProber {
    terminal: TerminalIdentity,
    outbound: mpsc::Sender<Outbound>,
    acks: PendingAcks,
    next_id: AtomicU64,
    timeout: Duration,
}

impl WebSocketProber {
    fn payload(&self) -> Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "mid": self.terminal.merchant_id,
            "tid": self.terminal.terminal_id,
            "ts": Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl Prober for WebSocketProber {
    async fn probe(&self) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (acked, ack) = oneshot::channel();
        self.acks.lock().await.insert(id, acked);

        let frame = text(EnginePacket::Message(SocketPacket::event_with_ack(
            KEEPALIVE_EVENT,
            self.payload(),
            id,
        )));
        let exchange = async {
            match send_acked(&self.outbound, frame).await {
                Ok(()) => ack
                    .await
                    .with_transport_context("Session ended before the keep-alive was acknowledged"),
                Err(e) => Err(e),
            }
        };

        let result = match timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::transport(format!(
                "Keep-alive {} not acknowledged within {:.1}s",
                id,
                self.timeout.as_secs_f64()
            ))),
        };
        if result.is_err() {
            self.acks.lock().await.remove(&id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const OPEN: &str =
        r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return t.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    /// Accepts one client and completes the Engine.IO and namespace handshake
    async fn accept_joined(listener: TcpListener, accept: bool) -> Option<WebSocketStream<TcpStream>> {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();
        ws.send(Message::Text(OPEN.into())).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "40");
        if !accept {
            ws.send(Message::Text(r#"44{"message":"invalid token"}"#.into()))
                .await
                .unwrap();
            return None;
        }
        ws.send(Message::Text(r#"40{"sid":"xyz"}"#.into())).await.unwrap();
        Some(ws)
    }

    fn template(addr: std::net::SocketAddr) -> String {
        format!(
            "ws://{}/socket.io/?EIO=4&transport=websocket&tid={{tid}}&mid={{mid}}&token={{token}}",
            addr
        )
    }

    /// Single-connection Socket.IO server; `accept` decides the namespace answer
    async fn serve_once(accept: bool) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let Some(mut ws) = accept_joined(listener, accept).await else {
                return Vec::new();
            };
            ws.send(Message::Text("2".into())).await.unwrap();
            ws.send(Message::Text(r#"42["payment",{"amount":5}]"#.into()))
                .await
                .unwrap();

            let mut seen = vec![next_text(&mut ws).await];

            // answer the keep-alive with its ack id
            let keepalive = next_text(&mut ws).await;
            let id: String = keepalive[2..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            ws.send(Message::Text(format!("43{}[]", id).into()))
                .await
                .unwrap();
            seen.push(keepalive);

            seen.push(next_text(&mut ws).await);
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
            seen
        });
        (template(addr), server)
    }

    fn target(template: &str) -> (ConnectionConfig, ConnectTarget) {
        let config = ConnectionConfig::quick_test(template, "secret123");
        let target =
            ConnectTarget::new(&config, TerminalIdentity::new("mid1", "tid1")).unwrap();
        (config, target)
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let (template, server) = serve_once(true).await;
        let (config, target) = target(&template);
        let connector = WebSocketConnector::new(&config).unwrap();

        let mut session = connector.open(&target).await.unwrap();
        assert_eq!(session.next_event().await.unwrap(), SessionEvent::Heartbeat);
        assert_eq!(
            session.next_event().await.unwrap(),
            SessionEvent::ServerEvent {
                name: "payment".into(),
                data: r#"{"amount":5}"#.into(),
            }
        );

        session.prober().probe().await.unwrap();
        assert!(session.prober.acks.lock().await.is_empty());
        session.close().await.unwrap();

        // reader and writer are gone once close returns
        assert!(session.outbound.is_closed());
        loop {
            match session.inbound.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => panic!("reader task still running"),
            }
        }

        let seen = server.await.unwrap();
        assert_eq!(seen[0], "3");
        assert!(seen[1].starts_with(r#"421["keepalive",{"#));
        assert!(seen[1].contains(r#""mid":"mid1""#));
        assert!(seen[1].contains(r#""tid":"tid1""#));
        assert_eq!(seen[2], "41");
    }

    #[tokio::test]
    async fn test_probe_fails_when_peer_stops_answering() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            // joined, then never reads or writes again
            let _ws = accept_joined(listener, true).await;
            std::future::pending::<()>().await;
        });

        let (mut config, target) = target(&template(addr));
        config.connect_timeout = Duration::from_millis(300);
        let connector = WebSocketConnector::new(&config).unwrap();
        let session = connector.open(&target).await.unwrap();

        for _ in 0..3 {
            let err = session.prober().probe().await.unwrap_err();
            assert_eq!(err.kind(), "TransportError");
            assert!(err.to_string().contains("not acknowledged"));
        }
        assert!(session.prober.acks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_error_is_auth_rejected() {
        let (template, server) = serve_once(false).await;
        let (config, target) = target(&template);
        let connector = WebSocketConnector::new(&config).unwrap();

        let err = connector.connect(&target).await.err().unwrap();
        assert!(matches!(err, HarnessError::AuthRejected(ref reason) if reason == "invalid token"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let template = format!("ws://{}/socket.io/?tid={{tid}}&mid={{mid}}&token={{token}}", addr);
        let (config, target) = target(&template);
        let connector = WebSocketConnector::new(&config).unwrap();

        let err = connector.connect(&target).await.err().unwrap();
        assert!(matches!(err, HarnessError::ConnectFailed(_)));
        assert!(!err.to_string().contains("secret123"));
    }

    #[test]
    fn test_render_args() {
        assert_eq!(render_args(vec![json!("hi")]), "\"hi\"");
        assert_eq!(render_args(vec![json!(1), json!(2)]), "[1,2]");
        assert_eq!(render_args(vec![]), "[]");
    }
}
