// Connection channel: the one persistent WebSocket connection to the round
// feed.
//
// A single background task owns the connection. It decodes inbound frames,
// forwards subscribed events in arrival order, and reconnects with capped
// exponential backoff when the transport drops. On every reconnect it writes
// the subscription frames for the current event kinds before reporting the
// channel open again. Nothing is buffered while disconnected.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::protocol::{decode_frame, encode_subscription, EventKind, ServerEvent, SubscriptionAction};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Disconnected,
}

/// Events the channel delivers downstream, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Server(ServerEvent),
    /// Synthetic: the transport dropped after having been open.
    ConnectionLost,
    /// Synthetic: a reconnect completed and subscriptions were restored.
    ConnectionRestored,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
}

/// Opaque session credential. Forwarded to the server as-is, never inspected.
#[derive(Clone, Default)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        SessionToken(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Both halves of one established connection.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Establishes connections. Abstracted so the channel loop can run against
/// in-memory streams.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, ChannelError>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    token: SessionToken,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, token: SessionToken) -> Self {
        WsConnector {
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        let mut request = self.url.as_str().into_client_request()?;
        if !self.token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.token.expose()))
                .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("Connected to {}", self.url);

        let (sink, stream) = ws.split();
        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

/// Capped exponential backoff: initial, initial*m, initial*m^2, ... <= max.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Backoff {
            policy,
            next: policy.initial_delay.min(policy.max_delay),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay
            .checked_mul(self.policy.multiplier)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.policy.initial_delay.min(self.policy.max_delay);
    }
}

// ---------------------------------------------------------------------------
// Channel handle
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ChannelCommand {
    Subscribe(EventKind),
    Unsubscribe(EventKind),
    Reconnect,
    Close,
}

/// Handle to the connection task. Exactly one per process; dropping it
/// aborts the task along with any pending backoff timer.
pub struct ConnectionChannel {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    state: watch::Receiver<ChannelState>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionChannel {
    /// Spawn the connection task and start connecting. `kinds` is the
    /// initial subscription set.
    pub fn open<C: Connector>(
        connector: C,
        policy: ReconnectPolicy,
        kinds: impl IntoIterator<Item = EventKind>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let task = ChannelTask {
            connector,
            backoff: Backoff::new(policy),
            subscriptions: kinds.into_iter().collect(),
            commands: cmd_rx,
            state: state_tx,
            events,
            has_opened: false,
        };

        ConnectionChannel {
            commands: cmd_tx,
            state: state_rx,
            task: Some(tokio::spawn(task.run())),
        }
    }

    /// Subscribe to `kind`. Idempotent: a kind is delivered at most once per
    /// frame no matter how often it is subscribed.
    pub fn on(&self, kind: EventKind) {
        let _ = self.commands.send(ChannelCommand::Subscribe(kind));
    }

    /// Unsubscribe from `kind`. Idempotent.
    pub fn off(&self, kind: EventKind) {
        let _ = self.commands.send(ChannelCommand::Unsubscribe(kind));
    }

    /// Drop the current connection and reconnect. A no-op while a reconnect
    /// is already pending.
    pub fn reconnect(&self) {
        let _ = self.commands.send(ChannelCommand::Reconnect);
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Close the connection and wait for the task to finish. Any pending
    /// backoff timer is cancelled.
    pub async fn close(mut self) {
        let _ = self.commands.send(ChannelCommand::Close);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// What the task does after a session or a wait ends.
enum Flow {
    Continue,
    ReconnectNow,
    Close,
}

struct ChannelTask<C> {
    connector: C,
    backoff: Backoff,
    subscriptions: BTreeSet<EventKind>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    state: watch::Sender<ChannelState>,
    events: mpsc::Sender<ChannelEvent>,
    has_opened: bool,
}

impl<C: Connector> ChannelTask<C> {
    async fn run(mut self) {
        loop {
            self.set_state(ChannelState::Connecting);

            let attempt = {
                let connect = self.connector.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        result = &mut connect => break Some(result),
                        cmd = self.commands.recv() => {
                            if let Flow::Close = apply_offline(&mut self.subscriptions, cmd) {
                                break None;
                            }
                        }
                    }
                }
            };

            let flow = match attempt {
                None => Flow::Close,
                Some(Ok(conn)) => self.run_session(conn).await,
                Some(Err(e)) => {
                    warn!("Connection attempt failed: {}", e);
                    self.set_state(ChannelState::Disconnected);
                    Flow::Continue
                }
            };

            match flow {
                Flow::Close => break,
                Flow::ReconnectNow => continue,
                Flow::Continue => {}
            }

            let delay = self.backoff.next_delay();
            info!("Reconnecting in {:?}", delay);
            if let Flow::Close = self.wait(delay).await {
                break;
            }
        }

        self.set_state(ChannelState::Disconnected);
        info!("Connection channel closed");
    }

    /// Drive one established connection until it ends.
    async fn run_session(&mut self, conn: Connection) -> Flow {
        let Connection {
            mut sink,
            mut stream,
        } = conn;

        for kind in self.subscriptions.iter().copied() {
            let frame = encode_subscription(SubscriptionAction::Subscribe, kind);
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                warn!("Failed to restore subscription to {}: {}", kind, e);
                self.set_state(ChannelState::Disconnected);
                return Flow::Continue;
            }
        }

        self.backoff.reset();
        self.set_state(ChannelState::Open);
        if self.has_opened {
            info!("Connection restored");
            if self.emit(ChannelEvent::ConnectionRestored).await.is_err() {
                return Flow::Close;
            }
        }
        self.has_opened = true;

        let mut flow = Flow::Continue;
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.dispatch(text.as_str()).await.is_err() {
                            return self.shutdown(sink).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Transport error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping, pong and raw frames carry no events.
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(ChannelCommand::Subscribe(kind)) => {
                        if self.subscriptions.insert(kind)
                            && !send_subscription(&mut sink, SubscriptionAction::Subscribe, kind).await
                        {
                            break;
                        }
                    }
                    Some(ChannelCommand::Unsubscribe(kind)) => {
                        if self.subscriptions.remove(&kind)
                            && !send_subscription(&mut sink, SubscriptionAction::Unsubscribe, kind).await
                        {
                            break;
                        }
                    }
                    Some(ChannelCommand::Reconnect) => {
                        info!("Reconnect requested");
                        flow = Flow::ReconnectNow;
                        break;
                    }
                    Some(ChannelCommand::Close) | None => {
                        return self.shutdown(sink).await;
                    }
                },
            }
        }

        self.set_state(ChannelState::Disconnected);
        if self.emit(ChannelEvent::ConnectionLost).await.is_err() {
            return Flow::Close;
        }
        flow
    }

    /// Wait out a backoff delay while still honoring commands.
    async fn wait(&mut self, delay: Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                cmd = self.commands.recv() => {
                    if let Flow::Close = apply_offline(&mut self.subscriptions, cmd) {
                        return Flow::Close;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, text: &str) -> Result<(), ()> {
        match decode_frame(text) {
            Ok(Some(event)) => {
                let kind = event.kind();
                if !self.subscriptions.contains(&kind) {
                    debug!("Dropping unsubscribed {} event", kind);
                    return Ok(());
                }
                self.emit(ChannelEvent::Server(event)).await
            }
            Ok(None) => {
                debug!("Ignoring frame with unknown event kind");
                Ok(())
            }
            Err(e) => {
                warn!("Dropping malformed event: {}", e);
                Ok(())
            }
        }
    }

    /// Forward an event downstream. Fails only when the consumer is gone.
    async fn emit(&self, event: ChannelEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| {
            info!("Event consumer dropped, stopping connection channel");
        })
    }

    async fn shutdown(&mut self, mut sink: FrameSink) -> Flow {
        let _ = sink.close().await;
        Flow::Close
    }

    fn set_state(&self, next: ChannelState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Channel state {:?} -> {:?}", previous, next);
        }
    }
}

/// Apply a command received while no connection is open. Subscriptions are
/// recorded for the next session; a reconnect request is a no-op because one
/// is already pending.
fn apply_offline(subscriptions: &mut BTreeSet<EventKind>, cmd: Option<ChannelCommand>) -> Flow {
    match cmd {
        Some(ChannelCommand::Subscribe(kind)) => {
            subscriptions.insert(kind);
        }
        Some(ChannelCommand::Unsubscribe(kind)) => {
            subscriptions.remove(&kind);
        }
        Some(ChannelCommand::Reconnect) => {
            debug!("Reconnect already pending, ignoring request");
        }
        Some(ChannelCommand::Close) | None => return Flow::Close,
    }
    Flow::Continue
}

async fn send_subscription(sink: &mut FrameSink, action: SubscriptionAction, kind: EventKind) -> bool {
    let frame = encode_subscription(action, kind);
    match sink.send(Message::Text(frame.into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to send {:?} for {}: {}", action, kind, e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// In-memory [`Connector`] for driving the channel without a network.
pub mod memory {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Client side: hand this to [`ConnectionChannel::open`].
    pub struct MemoryConnector {
        accepted: mpsc::UnboundedSender<ServerEnd>,
        refusals: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
    }

    /// Server side: accepts connections and controls refusals.
    pub struct MemoryServer {
        accepted: mpsc::UnboundedReceiver<ServerEnd>,
        refusals: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
    }

    /// The server end of one connection. Dropping it drops the connection.
    pub struct ServerEnd {
        to_client: mpsc::UnboundedSender<Message>,
        from_client: mpsc::UnboundedReceiver<Message>,
    }

    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refusals = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            MemoryConnector {
                accepted: tx,
                refusals: refusals.clone(),
                attempts: attempts.clone(),
            },
            MemoryServer {
                accepted: rx,
                refusals,
                attempts,
            },
        )
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Connection, ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(ChannelError::Transport(tungstenite::Error::ConnectionClosed));
            }

            let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<Message>();
            let (from_client_tx, from_client_rx) = mpsc::unbounded_channel::<Message>();

            self.accepted
                .send(ServerEnd {
                    to_client: to_client_tx,
                    from_client: from_client_rx,
                })
                .map_err(|_| ChannelError::Transport(tungstenite::Error::ConnectionClosed))?;

            let stream = futures_util::stream::unfold(to_client_rx, |mut rx| async move {
                rx.recv()
                    .await
                    .map(|msg| (Ok::<Message, tungstenite::Error>(msg), rx))
            });
            let sink = futures_util::sink::unfold(from_client_tx, |tx, msg: Message| async move {
                let _ = tx.send(msg);
                Ok::<_, tungstenite::Error>(tx)
            });

            Ok(Connection {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
    }

    impl MemoryServer {
        pub async fn accept(&mut self) -> Option<ServerEnd> {
            self.accepted.recv().await
        }

        /// Make the next `n` connection attempts fail.
        pub fn refuse_next(&self, n: usize) {
            self.refusals.store(n, Ordering::SeqCst);
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl ServerEnd {
        /// Push a text frame to the client. Returns false if the client is
        /// gone.
        pub fn push(&self, text: impl Into<String>) -> bool {
            self.to_client.send(Message::Text(text.into().into())).is_ok()
        }

        /// Next text frame the client sent.
        pub async fn next_sent(&mut self) -> Option<String> {
            while let Some(msg) = self.from_client.recv().await {
                if let Message::Text(text) = msg {
                    return Some(text.to_string());
                }
            }
            None
        }

        /// Text frames the client has sent so far, without waiting.
        pub fn drain_sent(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(msg) = self.from_client.try_recv() {
                if let Message::Text(text) = msg {
                    frames.push(text.to_string());
                }
            }
            frames
        }
    }
}
