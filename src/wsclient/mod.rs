pub mod handlers;
#[cfg(feature = "websocket")]
mod transport;

#[cfg(feature = "websocket")]
pub use transport::TungsteniteConnector;

use crate::api::{ApiClientError, ConnectionSettings};
use crate::vcc::{Channel, Event, Role, KEEPALIVE_FRAME};
use crate::{nullstr, state::*, state_log};
use async_trait::async_trait;
use handlers::{Disposition, EventHandler, HandlerContext, HandlerRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Target and headers of one connection attempt, derived from the session at connect time
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    pub uri: url::Url,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ApiClientError>;
    /// Must treat an already closed connection as success
    async fn close(&mut self) -> Result<(), ApiClientError>;
}

/// Inbound half of a connection. `None` once the peer closed.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<String, ApiClientError>>;
}

pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Opens duplex text connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: &ConnectRequest) -> Result<Connection, ApiClientError>;
}

/// Cross thread disconnect request. Cloning shares the same flag.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> ShutdownHandle {
        ShutdownHandle::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> ShutdownHandle {
        let (tx, _) = watch::channel(false);
        ShutdownHandle { tx: Arc::new(tx) }
    }

    /// Safe to call from any thread, including outside the runtime
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone, nobody can request shutdown anymore
                std::future::pending::<()>().await;
            }
        }
    }
}

type SharedSink = Arc<Mutex<Option<Box<dyn FrameSink>>>>;

/// Takes the sink out before closing it so the connection is closed exactly once
async fn close_sink(sink: &SharedSink) -> Result<(), ApiClientError> {
    let taken = sink.lock().await.take();
    if let Some(mut sink) = taken {
        sink.close().await?;
        log::info!("WebSocket closed.");
    }
    Ok(())
}

async fn send_frame(sink: &SharedSink, text: &str) -> Result<(), ApiClientError> {
    match sink.lock().await.as_mut() {
        Some(sink) => sink.send_text(text.to_string()).await,
        None => Err(ApiClientError::ConnectionClosed),
    }
}

/// How the receive loop ended
enum Outcome {
    Shutdown,
    /// The keepalive failed and asked the connection to stop
    Stopped,
    Reconnect(String),
}

async fn keepalive(
    sink: &SharedSink,
    interval: Duration,
    mut shutdown: ShutdownSignal,
    mut stop: ShutdownSignal,
) -> Result<(), ApiClientError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.requested() => {
                log::info!("Disconnect requested, stopping ping.");
                return close_sink(sink).await;
            }
            _ = stop.requested() => return Ok(()),
            _ = ticker.tick() => {}
        }

        match send_frame(sink, KEEPALIVE_FRAME).await {
            Ok(()) => log::debug!("Ping sent"),
            Err(ApiClientError::ConnectionClosed) => {
                log::info!("Connection closed, stopping ping.");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

async fn receive(
    source: &mut dyn FrameSource,
    registry: &mut HandlerRegistry,
    context: &HandlerContext,
    sink: &SharedSink,
    shutdown: &ShutdownHandle,
    mut stop: ShutdownSignal,
) -> Result<Outcome, ApiClientError> {
    let mut shutdown_signal = shutdown.signal();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown_signal.requested() => {
                log::info!("Socket Disconnect Requested by Client, stopping message handler.");
                close_sink(sink).await?;
                return Ok(Outcome::Shutdown);
            }
            _ = stop.requested() => return Ok(Outcome::Stopped),
            frame = source.next_frame() => frame,
        };

        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(ApiClientError::MalformedEvent(details))) => {
                log::warn!("Dropping undecodable frame: {}", details);
                continue;
            }
            Some(Err(e)) => return Err(e),
            None if shutdown.is_requested() => return Ok(Outcome::Shutdown),
            None => return Err(ApiClientError::ConnectionClosed),
        };
        log::debug!("Message received: {}", text);

        let event = match Event::decode(&text) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("{}", e);
                continue;
            }
        };

        match registry.dispatch(context, &event).await {
            Ok(Disposition::Handled) => {}
            Ok(Disposition::Reconnect) => {
                log::info!("Reconnecting socket.");
                return Ok(Outcome::Reconnect(event.event_id().to_string()));
            }
            Err(e) => log::warn!("Handler for event {} failed: {}", event.event_id(), e),
        }
    }
}

/// Persistent event socket of one role.
///
/// Properties:
///
/// * `registry`: handlers keyed by event type. Survives reconnects.
/// * `context`: session, REST client and extensions handed to every handler
/// * `shutdown`: process wide disconnect request, see [`WsClient::shutdown_handle`]
/// * `stop`: per connection signal the keepalive uses to end the receive loop when it fails
/// * `sink` / `source`: the two halves of the live connection, if any
/// * `state`: current FSM state
pub struct WsClient {
    role: Role,
    socket_app_key: String,
    socket_scheme: String,
    keepalive_interval: Duration,
    connector: Arc<dyn Connector>,
    registry: HandlerRegistry,
    context: HandlerContext,
    shutdown: ShutdownHandle,
    stop: ShutdownHandle,
    sink: SharedSink,
    source: Option<Box<dyn FrameSource>>,
    state: State,
}

impl WsClient {
    pub fn new(
        settings: &ConnectionSettings,
        context: HandlerContext,
        connector: Arc<dyn Connector>,
    ) -> WsClient {
        WsClient {
            role: context.role,
            socket_app_key: settings.socket_app_key.clone(),
            socket_scheme: settings.socket_scheme.clone(),
            keepalive_interval: settings.keepalive_interval,
            connector,
            registry: HandlerRegistry::with_defaults(),
            context,
            shutdown: ShutdownHandle::new(),
            stop: ShutdownHandle::new(),
            sink: Arc::new(Mutex::new(None)),
            source: None,
            state: State::Disconnected(nullstr!()),
        }
    }

    pub fn add_socket_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.registry.register(handler);
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Handle that stops the socket from anywhere: the keepalive and the receive loop both watch it
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// URI and headers for a new connection, read from the session as it is right now
    pub fn connect_request(&self) -> Result<ConnectRequest, ApiClientError> {
        let session = self.context.session.snapshot()?;
        let address = format!(
            "{}://{}:{}{}",
            self.socket_scheme,
            session.host,
            session.port,
            self.role.websocket_path(&self.socket_app_key)
        );
        let uri = url::Url::parse(&address)
            .map_err(|e| ApiClientError::Config(format!("Invalid socket URI {}: {}", address, e)))?;

        let mut headers = vec![("Authorization".to_string(), session.authorization())];
        if !session.cookies_header.is_empty() {
            headers.push(("Cookie".to_string(), session.cookies_header.clone()));
        }
        Ok(ConnectRequest { uri, headers })
    }

    /// Drives the socket until shutdown is requested or the connection fails.
    /// Reconnect directives from handlers are followed transparently.
    pub async fn run(&mut self) -> Result<(), ApiClientError> {
        log::info!("{} socket starting", self.role);
        self.state = State::Disconnected(nullstr!());
        loop {
            self.trigger().await?;
            if let State::Disconnected(reason) = &self.state {
                log::info!("{} socket stopped: {}", self.role, reason);
                return Ok(());
            }
        }
    }

    /// Closes the live connection, if any. Safe to call repeatedly.
    pub async fn close(&self) -> Result<(), ApiClientError> {
        close_sink(&self.sink).await
    }
}

#[async_trait]
impl Channel for WsClient {
    fn role(&self) -> Role {
        self.role
    }

    async fn trigger(&mut self) -> Result<(), ApiClientError> {
        if matches!(self.state, State::Connecting(_)) && self.shutdown.is_requested() {
            self.state = State::Disconnected(state_log!("shutdown requested"));
            return Ok(());
        }
        match self.state.clone().evaluate(self).await {
            Ok(next) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                self.state = State::Disconnected(state_log!("failed"));
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Result<StateResponse, ApiClientError> {
        if self.keepalive_interval.is_zero() {
            return Err(ApiClientError::Config(
                "keepalive interval must be greater than zero".to_string(),
            ));
        }
        let request = self.connect_request()?;
        log::debug!("WebSocket URI: {}", request.uri);

        let connection = self.connector.open(&request).await.map_err(|e| match e {
            ApiClientError::Connection(_) => e,
            other => ApiClientError::Connection(other.to_string()),
        })?;
        *self.sink.lock().await = Some(connection.sink);
        self.source = Some(connection.source);
        self.stop = ShutdownHandle::new();

        log::info!("{} websocket connected to {}", self.role, request.uri);
        Ok(StateResponse::Reply(state_log!("connected")))
    }

    async fn listen(&mut self) -> Result<StateResponse, ApiClientError> {
        let mut source = self.source.take().ok_or(ApiClientError::ConnectionClosed)?;
        let registry = &mut self.registry;
        let context = &self.context;
        let sink = &self.sink;
        let shutdown = &self.shutdown;
        let stop = &self.stop;
        let interval = self.keepalive_interval;

        let keepalive_loop = async {
            let result = keepalive(
                sink,
                interval,
                shutdown.signal(),
                stop.signal(),
            )
            .await;
            if result.is_err() {
                stop.request();
            }
            result
        };
        let receive_loop = async {
            let outcome = receive(
                &mut *source,
                registry,
                context,
                sink,
                shutdown,
                stop.signal(),
            )
            .await;
            stop.request();
            outcome
        };

        let (pinged, received) = tokio::join!(keepalive_loop, receive_loop);
        match (pinged, received?) {
            (Err(e), Outcome::Stopped) => Err(e),
            (_, Outcome::Reconnect(event_id)) => Ok(StateResponse::Reconnect(event_id)),
            (_, Outcome::Stopped) | (_, Outcome::Shutdown) => Ok(StateResponse::None),
        }
    }

    async fn disconnect(&mut self) -> Result<StateResponse, ApiClientError> {
        self.source = None;
        close_sink(&self.sink).await?;
        Ok(StateResponse::Reply(state_log!("disconnected")))
    }
}
