use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, warn};

use crate::codec::{StompCodec, StompItem};
use crate::frame::Frame;
use crate::message::Message;
use crate::subscription::Subscription;

/// Versions offered in the `accept-version` header of the handshake.
pub const ACCEPT_VERSIONS: &str = "1.1,1.2";

/// Tick period of the I/O task when heart-beating is disabled both ways.
const IDLE_TICK: Duration = Duration::from_secs(3600);

/// Dispatch map: local subscription id -> sender feeding that subscription.
pub(crate) type Subscriptions = HashMap<String, mpsc::UnboundedSender<Frame>>;

/// Pending receipt map: receipt-id -> waiter. The waiter gets `Err` when the
/// broker answers with an ERROR frame instead of a RECEIPT.
pub(crate) type PendingReceipts = HashMap<String, oneshot::Sender<Result<(), ServerError>>>;

static RECEIPT_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_receipt_id() -> String {
    format!("rcpt-{}", RECEIPT_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// An ERROR frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header (short description).
    pub message: String,
    /// The frame body as text, when present.
    pub body: Option<String>,
    /// The `receipt-id` header, when the error answers a receipted frame.
    pub receipt_id: Option<String>,
    /// The complete ERROR frame.
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(frame.body_text())
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) => write!(f, "{} ({})", self.message, body.trim_end()),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ServerError {}

/// Errors returned by `Connection` and `Subscription` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The broker answered with an ERROR frame
    #[error("server rejected request: {0}")]
    ServerRejected(ServerError),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    /// The connection's I/O task has stopped
    #[error("connection closed")]
    Closed,
}

/// Subscription acknowledgement modes as defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Protocol version agreed on during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StompVersion {
    Stomp10,
    Stomp11,
    Stomp12,
}

impl StompVersion {
    /// Interpret the `version` header of a CONNECTED frame. A missing header
    /// means the broker only speaks STOMP 1.0.
    pub fn from_header(value: Option<&str>) -> Result<Self, ConnError> {
        match value.map(str::trim) {
            None | Some("1.0") => Ok(StompVersion::Stomp10),
            Some("1.1") => Ok(StompVersion::Stomp11),
            Some("1.2") => Ok(StompVersion::Stomp12),
            Some(other) => Err(ConnError::Protocol(format!(
                "unsupported STOMP version '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StompVersion::Stomp10 => "1.0",
            StompVersion::Stomp11 => "1.1",
            StompVersion::Stomp12 => "1.2",
        }
    }
}

impl fmt::Display for StompVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Returns `(cx, cy)` in milliseconds. Missing or invalid fields become `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',').map(|s| s.trim().parse::<u64>().unwrap_or(0));
    let cx = parts.next().unwrap_or(0);
    let cy = parts.next().unwrap_or(0);
    (cx, cy)
}

/// Negotiate heart-beat intervals between client and server.
///
/// Returns `(outgoing, incoming)`; each is `None` when heart-beating is
/// disabled in that direction. Enabled directions use the larger of the
/// client and server values, per the STOMP rule.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let direction = |ours: u64, theirs: u64| {
        if ours == 0 || theirs == 0 {
            None
        } else {
            Some(Duration::from_millis(ours.max(theirs)))
        }
    };
    (
        direction(client_out, server_in),
        direction(client_in, server_out),
    )
}

/// Tuning knobs for `Connection::connect`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client `heart-beat` header value ("cx,cy" in milliseconds).
    pub heartbeat: String,
    /// Virtual host sent in the `host` header.
    pub host: String,
    /// Upper bound on waiting for CONNECTED after the TCP connect.
    pub connect_timeout: Option<Duration>,
    /// Upper bound on waiting for any RECEIPT (subscribe, disconnect).
    pub receipt_timeout: Duration,
    /// Open the session with a `STOMP` frame (true) or a `CONNECT` frame.
    pub use_stomp_frame: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            heartbeat: "10000,10000".to_string(),
            host: "/".to_string(),
            connect_timeout: Some(Duration::from_secs(30)),
            receipt_timeout: Duration::from_secs(10),
            use_stomp_frame: true,
        }
    }
}

impl ConnectOptions {
    pub fn with_heartbeat(mut self, heartbeat: impl Into<String>) -> Self {
        self.heartbeat = heartbeat.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Use the legacy `CONNECT` command for the handshake.
    pub fn with_connect_frame(mut self) -> Self {
        self.use_stomp_frame = false;
        self
    }
}

/// Writer side of a connection shared by the connection and its
/// subscriptions.
#[derive(Clone)]
pub(crate) struct Outbound {
    pub(crate) tx: mpsc::Sender<StompItem>,
    pub(crate) receipts: Arc<Mutex<PendingReceipts>>,
    pub(crate) receipt_timeout: Duration,
    pub(crate) version: StompVersion,
}

impl Outbound {
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), ConnError> {
        self.tx
            .send(StompItem::Frame(frame))
            .await
            .map_err(|_| ConnError::Closed)
    }

    /// Send `frame` with a `receipt` header and wait for the broker to
    /// confirm it.
    pub(crate) async fn send_confirmed(&self, frame: Frame) -> Result<(), ConnError> {
        let receipt_id = next_receipt_id();
        let (tx, rx) = oneshot::channel();
        self.receipts.lock().await.insert(receipt_id.clone(), tx);

        if let Err(e) = self.send(frame.receipt(&receipt_id)).await {
            self.receipts.lock().await.remove(&receipt_id);
            return Err(e);
        }

        match tokio::time::timeout(self.receipt_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(server))) => Err(ConnError::ServerRejected(server)),
            Ok(Err(_)) => Err(ConnError::Closed),
            Err(_) => {
                self.receipts.lock().await.remove(&receipt_id);
                Err(ConnError::ReceiptTimeout(receipt_id))
            }
        }
    }

    /// Build an ACK or NACK frame for `message` in the shape the negotiated
    /// protocol version expects.
    pub(crate) fn ack_frame(&self, command: &str, message: &Message) -> Result<Frame, ConnError> {
        let missing =
            |header: &str| ConnError::Protocol(format!("MESSAGE frame has no '{}' header", header));
        match self.version {
            StompVersion::Stomp12 => {
                // some 1.2 brokers omit `ack`; their message-id is the ack id
                let id = message
                    .ack_id()
                    .or_else(|| message.id())
                    .ok_or_else(|| missing("ack"))?;
                Ok(Frame::new(command).header("id", id))
            }
            StompVersion::Stomp11 => {
                let id = message.id().ok_or_else(|| missing("message-id"))?;
                let sub = message
                    .subscription()
                    .ok_or_else(|| missing("subscription"))?;
                Ok(Frame::new(command)
                    .header("message-id", id)
                    .header("subscription", sub))
            }
            StompVersion::Stomp10 => {
                if command == "NACK" {
                    return Err(ConnError::Protocol(
                        "NACK requires STOMP 1.1 or later".to_string(),
                    ));
                }
                let id = message.id().ok_or_else(|| missing("message-id"))?;
                Ok(Frame::new(command).header("message-id", id))
            }
        }
    }
}

/// A single TCP/STOMP session.
///
/// `connect` performs the handshake and then hands the socket to a
/// background task which writes outbound frames, dispatches MESSAGE frames to
/// subscriptions, resolves receipts and exchanges heart-beats. The session is
/// opened once; there is no reconnect.
///
/// Call `disconnect` to close the session gracefully. Dropping the
/// connection stops the background task without a DISCONNECT frame.
pub struct Connection {
    outbound: Outbound,
    subscriptions: Arc<Mutex<Subscriptions>>,
    sub_id_counter: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    io_task: Option<JoinHandle<()>>,
    server: Option<String>,
    session: Option<String>,
}

impl Connection {
    /// Establish a session with the STOMP broker at `addr`.
    ///
    /// Fails with `ConnError::Io` when the TCP connection cannot be opened,
    /// `ConnError::ServerRejected` when the broker answers the handshake with
    /// an ERROR frame and `ConnError::Protocol` when the socket closes (or
    /// the connect timeout expires) before CONNECTED arrives.
    pub async fn connect(
        addr: &str,
        login: &str,
        passcode: &str,
        options: ConnectOptions,
    ) -> Result<Self, ConnError> {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = Framed::new(stream, StompCodec::new());

        let command = if options.use_stomp_frame {
            "STOMP"
        } else {
            "CONNECT"
        };
        let handshake = Frame::new(command)
            .header("accept-version", ACCEPT_VERSIONS)
            .header("host", &options.host)
            .header("login", login)
            .header("passcode", passcode)
            .header("heart-beat", &options.heartbeat);
        framed.send(StompItem::Frame(handshake)).await?;

        let connected = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, await_connected(&mut framed))
                .await
                .map_err(|_| {
                    ConnError::Protocol(format!("no CONNECTED frame within {:?}", limit))
                })??,
            None => await_connected(&mut framed).await?,
        };

        let version = StompVersion::from_header(connected.get_header("version"))?;
        let (cx, cy) = parse_heartbeat_header(&options.heartbeat);
        let (sx, sy) = parse_heartbeat_header(connected.get_header("heart-beat").unwrap_or("0,0"));
        let (send_interval, recv_interval) = negotiate_heartbeats(cx, cy, sx, sy);
        debug!(
            %version,
            ?send_interval,
            ?recv_interval,
            "STOMP session established"
        );

        let (out_tx, out_rx) = mpsc::channel::<StompItem>(32);
        let subscriptions: Arc<Mutex<Subscriptions>> = Arc::new(Mutex::new(HashMap::new()));
        let receipts: Arc<Mutex<PendingReceipts>> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let io = IoTask {
            framed,
            out_rx,
            subscriptions: subscriptions.clone(),
            receipts: receipts.clone(),
            shutdown_rx,
            send_interval,
            recv_interval,
        };
        let io_task = tokio::spawn(io.run());

        Ok(Self {
            outbound: Outbound {
                tx: out_tx,
                receipts,
                receipt_timeout: options.receipt_timeout,
                version,
            },
            subscriptions,
            sub_id_counter: AtomicU64::new(1),
            shutdown_tx,
            io_task: Some(io_task),
            server: connected.get_header("server").map(str::to_string),
            session: connected.get_header("session").map(str::to_string),
        })
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> StompVersion {
        self.outbound.version
    }

    /// The `server` header of the CONNECTED frame.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// The `session` header of the CONNECTED frame.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Subscribe to a destination.
    ///
    /// The SUBSCRIBE frame carries a receipt request, so this returns only
    /// once the broker has accepted the subscription. A broker that rejects
    /// the destination answers with an ERROR frame, reported as
    /// `ConnError::ServerRejected`.
    pub async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
    ) -> Result<Subscription, ConnError> {
        self.subscribe_with_headers(destination, ack, Vec::new())
            .await
    }

    /// Subscribe with additional SUBSCRIBE headers (for example a broker
    /// prefetch limit or a selector).
    pub async fn subscribe_with_headers(
        &self,
        destination: &str,
        ack: AckMode,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Subscription, ConnError> {
        let id = self
            .sub_id_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        // registered before SUBSCRIBE goes out: messages may beat the RECEIPT
        self.subscriptions.lock().await.insert(id.clone(), tx);

        let mut frame = Frame::new("SUBSCRIBE")
            .header("id", &id)
            .header("destination", destination)
            .header("ack", ack.as_str());
        for (k, v) in extra_headers {
            frame = frame.header(k, v);
        }

        if let Err(e) = self.outbound.send_confirmed(frame).await {
            self.subscriptions.lock().await.remove(&id);
            return Err(e);
        }

        Ok(Subscription::new(
            id,
            destination.to_string(),
            ack,
            rx,
            self.outbound.clone(),
            self.subscriptions.clone(),
        ))
    }

    /// Close the session: send DISCONNECT, wait (bounded by the receipt
    /// timeout) for the broker to confirm it, then stop the I/O task.
    ///
    /// Failures are logged only; the session is closed either way.
    pub async fn disconnect(mut self) {
        match self.outbound.send_confirmed(Frame::new("DISCONNECT")).await {
            Ok(()) => debug!("DISCONNECT confirmed by broker"),
            Err(e) => debug!(error = %e, "DISCONNECT not confirmed"),
        }
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.io_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task did not finish cleanly");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Read frames until CONNECTED arrives.
async fn await_connected(framed: &mut Framed<TcpStream, StompCodec>) -> Result<Frame, ConnError> {
    while let Some(item) = framed.next().await {
        match item? {
            StompItem::Heartbeat => {}
            StompItem::Frame(f) if f.command == "CONNECTED" => return Ok(f),
            StompItem::Frame(f) if f.command == "ERROR" => {
                return Err(ConnError::ServerRejected(ServerError::from_frame(f)));
            }
            StompItem::Frame(f) => {
                debug!(command = %f.command, "ignoring frame received before CONNECTED");
            }
        }
    }
    Err(ConnError::Protocol(
        "connection closed before CONNECTED frame".to_string(),
    ))
}

/// State owned by the background I/O task.
struct IoTask {
    framed: Framed<TcpStream, StompCodec>,
    out_rx: mpsc::Receiver<StompItem>,
    subscriptions: Arc<Mutex<Subscriptions>>,
    receipts: Arc<Mutex<PendingReceipts>>,
    shutdown_rx: broadcast::Receiver<()>,
    send_interval: Option<Duration>,
    recv_interval: Option<Duration>,
}

impl IoTask {
    async fn run(self) {
        let IoTask {
            framed,
            mut out_rx,
            subscriptions,
            receipts,
            mut shutdown_rx,
            send_interval,
            recv_interval,
        } = self;
        let (mut sink, mut stream) = framed.split();

        let tick_every = [send_interval, recv_interval]
            .into_iter()
            .flatten()
            .min()
            .map(|d| d / 2)
            .unwrap_or(IDLE_TICK);
        let mut tick = tokio::time::interval(tick_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent = Instant::now();
        let mut last_received = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let _ = sink.close().await;
                    break;
                }
                maybe = out_rx.recv() => {
                    let Some(item) = maybe else { break };
                    if let Err(e) = sink.send(item).await {
                        warn!(error = %e, "failed to write to broker");
                        break;
                    }
                    last_sent = Instant::now();
                }
                item = stream.next() => match item {
                    Some(Ok(StompItem::Heartbeat)) => last_received = Instant::now(),
                    Some(Ok(StompItem::Frame(frame))) => {
                        last_received = Instant::now();
                        dispatch(frame, &subscriptions, &receipts).await;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "failed to read from broker");
                        break;
                    }
                    None => {
                        debug!("broker closed the connection");
                        break;
                    }
                },
                _ = tick.tick() => {
                    if let Some(interval) = send_interval {
                        if last_sent.elapsed() >= interval / 2 {
                            if sink.send(StompItem::Heartbeat).await.is_err() {
                                break;
                            }
                            last_sent = Instant::now();
                        }
                    }
                    if let Some(interval) = recv_interval {
                        if last_received.elapsed() > interval * 2 {
                            warn!(?interval, "broker missed its heart-beats, closing connection");
                            break;
                        }
                    }
                }
            }
        }

        // dropping the senders ends every pending receive and receipt wait
        subscriptions.lock().await.clear();
        receipts.lock().await.clear();
    }
}

/// Route one inbound frame to its subscription or receipt waiter.
async fn dispatch(
    frame: Frame,
    subscriptions: &Mutex<Subscriptions>,
    receipts: &Mutex<PendingReceipts>,
) {
    match frame.command.as_str() {
        "MESSAGE" => {
            let Some(id) = frame.get_header("subscription").map(str::to_string) else {
                warn!("dropping MESSAGE frame without a subscription header");
                return;
            };
            let map = subscriptions.lock().await;
            match map.get(&id) {
                Some(tx) => {
                    if tx.send(frame).is_err() {
                        debug!(subscription = %id, "subscriber gone, MESSAGE dropped");
                    }
                }
                None => debug!(subscription = %id, "MESSAGE for unknown subscription dropped"),
            }
        }
        "RECEIPT" => {
            if let Some(id) = frame.get_header("receipt-id") {
                if let Some(waiter) = receipts.lock().await.remove(id) {
                    let _ = waiter.send(Ok(()));
                }
            }
        }
        "ERROR" => {
            let err = ServerError::from_frame(frame);
            error!(message = %err.message, body = ?err.body, "broker sent ERROR frame");
            let mut pending = receipts.lock().await;
            match err.receipt_id.clone() {
                Some(id) => {
                    if let Some(waiter) = pending.remove(&id) {
                        let _ = waiter.send(Err(err));
                    }
                }
                None => {
                    for (_, waiter) in pending.drain() {
                        let _ = waiter.send(Err(err.clone()));
                    }
                }
            }
        }
        other => debug!(command = other, "ignoring unexpected frame"),
    }
}
