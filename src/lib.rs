//! # Five9 VCC Client Library
//!
//! A client library for the Five9 agent and supervisor REST and WebSocket APIs.
//!
//! five9-rs is an async, event driven API for writing contact center integrations: wallboards,
//! queue alerting, supervisor tooling and agent helpers. At a high level, it provides a few major
//! capabilities:
//!
//! * Login and a shared session that follows the account across data center migrations
//! * Typed REST operations for both roles, declared as a static catalog
//! * A persistent event socket per role with keepalive, handler dispatch and reconnect
//! * Queue statistics tracking with threshold alerts
//! * Feature flags that let you choose functionality to suit your use case
//!
//! ## Not supported
//! The following will *not* be supported by this library
//!
//! * Credential storage of any kind
//! * Automatic retry of logins or failed calls. Retry policy belongs to the caller
//! * The full vendor REST surface. Only what the session, the socket and the built-in handlers need
//!
//! # Integrating five9-rs
//!
//! ```toml
//! five9-rs = { version = "0.1.0", features = ["websocket", "extras"] }
//! ```
//!
//! Logging in, starting the supervisor session and listening for events looks like this:
//!
//! ```no_run
//! use five9_rs::api::{Api, ConnectionSettings, Credentials};
//! use five9_rs::stats::QueueStatisticsHandler;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), five9_rs::api::ApiClientError> {
//! let settings = ConnectionSettings {
//!     credentials: Credentials::new("supervisor@example.com", "secret"),
//!     ..Default::default()
//! };
//! let mut api = Api::login(settings).await?;
//! api.add_socket_handler(Arc::new(QueueStatisticsHandler::snapshot()));
//! api.add_socket_handler(Arc::new(QueueStatisticsHandler::update()));
//!
//! if api.initialize_supervisor_session(true).await? {
//!     let mut socket = api.supervisor_socket();
//!     five9_rs::extras::console::spawn_disconnect_listener(socket.shutdown_handle());
//!     socket.run().await?;
//! }
//! api.supervisor().logout().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Under the hood
//!
//! ### Session
//!
//! Login returns a metadata document naming the data center the account lives in. The derived
//! base URL, ids and headers are published as one immutable snapshot; every REST call and every
//! socket connect reads the latest snapshot instead of caching fields. When the VCC migrates the
//! domain, the migration event carries the new metadata and the snapshot is replaced atomically.
//!
//! ### Finite State Machine
//!
//! Each socket is driven by a small FSM: `Disconnected`, `Connecting`, `Connected`,
//! `Reconnecting` and `Disconnecting`. Running in debug mode logs every transition.
//!
//! ## Channel support
//!
//! The FSM drives anything implementing the Channel trait
//!
//! ```ignore
//! pub trait Channel: Send {
//!     fn role(&self) -> Role;
//!     async fn trigger(&mut self) -> Result<(), ApiClientError>;
//!     async fn connect(&mut self) -> Result<StateResponse, ApiClientError>;
//!     async fn listen(&mut self) -> Result<StateResponse, ApiClientError>;
//!     async fn disconnect(&mut self) -> Result<StateResponse, ApiClientError>;
//! }
//! ```
//!
//! ### Websocket
//!
//! While connected, the keepalive and the receive loop run side by side on the same task. Both
//! watch the shutdown handle, which can be triggered from any thread, and the connection is closed
//! exactly once whoever gets there first. Frames are dispatched to handlers strictly in arrival
//! order. A frame that does not decode, or a handler that fails, is logged and skipped.
//!
//! ## Design philosophy
//!
//! Everything runs on the async runtime except the optional console listener, which blocks on
//! stdin in its own thread. Errors surface to the caller; nothing is retried behind its back.
//!

pub mod api;
pub mod extras;
pub mod httpclient;
pub mod session;
pub mod state;
pub mod stats;
pub mod vcc;
pub mod wsclient;
