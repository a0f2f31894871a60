use crate::httpclient::methods::{MaintenanceNotice, RoleApi, SupervisorApi};
use crate::httpclient::{HttpClient, LoginState};
use crate::session::SessionConfig;
use crate::vcc::{util::generate_socket_key, Role};
use crate::wsclient::handlers::{EventHandler, HandlerContext};
use crate::wsclient::{Connector, WsClient};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Login regions and the login endpoint each one answers on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[default]
    US,
    CA,
    LDN,
    FRK,
}

impl Region {
    pub fn login_url(self) -> &'static str {
        match self {
            Region::US => "https://app.five9.com/appsvcs/rs/svc/auth/login",
            Region::CA => "https://app.ca.five9.com/appsvcs/rs/svc/auth/login",
            Region::LDN => "https://app.ca.five9.eu/appsvcs/rs/svc/auth/login",
            Region::FRK => "https://app.eu.five9.eu/appsvcs/rs/svc/auth/login",
        }
    }
}

impl FromStr for Region {
    type Err = ApiClientError;

    fn from_str(s: &str) -> Result<Region, ApiClientError> {
        match s.to_ascii_uppercase().as_str() {
            "US" => Ok(Region::US),
            "CA" => Ok(Region::CA),
            "LDN" => Ok(Region::LDN),
            "FRK" => Ok(Region::FRK),
            other => Err(ApiClientError::Config(format!("Unknown region {}", other))),
        }
    }
}

/// Station registered when a role session is started
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    pub station_id: String,
    /// One of PSTN, SOFTPHONE, GATEWAY, EMPTY
    pub station_type: String,
    /// One of CONNECTING, CONNECTED, DISCONNECTED
    pub station_state: String,
}

impl Default for Station {
    fn default() -> Station {
        Station {
            station_id: "".to_string(),
            station_type: "EMPTY".to_string(),
            station_state: "DISCONNECTED".to_string(),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a client needs before it logs in.
///
/// Properties:
///
/// * `credentials`: username and password posted to the login endpoint
/// * `region`: selects the login endpoint, ignored when `login_url` is set
/// * `login_url`: explicit login endpoint override
/// * `app_key`: application key reported at login
/// * `policy`: login policy, `AttachExisting` reuses a live session
/// * `socket_app_key`: arbitrary key embedded in the websocket path to identify this app
/// * `station`: station registered on session start
/// * `keepalive_interval`: how often the socket sends its keepalive frame
/// * `api_scheme` / `socket_scheme`: URL schemes for the derived REST and websocket endpoints
/// * `debugmode`: log level binaries should install via `extras::init_logging`
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub credentials: Credentials,
    pub region: Region,
    pub login_url: Option<String>,
    pub app_key: String,
    pub policy: String,
    pub socket_app_key: String,
    pub station: Station,
    pub keepalive_interval: Duration,
    pub api_scheme: String,
    pub socket_scheme: String,
    pub debugmode: log::LevelFilter,
}

impl ConnectionSettings {
    pub fn login_endpoint(&self) -> String {
        match &self.login_url {
            Some(url) => url.clone(),
            None => self.region.login_url().to_string(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> ConnectionSettings {
        ConnectionSettings {
            credentials: Credentials::default(),
            region: Region::default(),
            login_url: None,
            app_key: "five9-rs-supervisor-session".to_string(),
            policy: "AttachExisting".to_string(),
            socket_app_key: generate_socket_key(),
            station: Station::default(),
            keepalive_interval: Duration::from_secs(15),
            api_scheme: "https".to_string(),
            socket_scheme: "wss".to_string(),
            debugmode: log::LevelFilter::Info,
        }
    }
}

/// Errors reported by the API, the session and the socket.
#[derive(Debug, Error)]
pub enum ApiClientError {
    /// Login rejected or returned no session metadata
    #[error("Authentication failed <{status}> : {details}")]
    Authentication { status: u16, details: String },
    /// The role is already logged in elsewhere; recover with logout then retry
    #[error("Already logged in <{status}> : {body}")]
    DuplicateLogin { status: u16, body: String },
    #[error("Remote call failed <{status}> : {body}")]
    RemoteCall { status: u16, body: String },
    /// Transport failure (timeout, reset, DNS) before a response was read
    #[error("Connectivity error: {0}")]
    Connectivity(String),
    /// The websocket could not be opened
    #[error("Websocket connection failed: {0}")]
    Connection(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid session metadata: {0}")]
    InvalidMetadata(String),
    #[error("No session: login has not completed")]
    NotLoggedIn,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiClientError {
    /// HTTP status behind the error, when there was one
    pub fn code(&self) -> Option<u16> {
        match self {
            ApiClientError::Authentication { status, .. }
            | ApiClientError::DuplicateLogin { status, .. }
            | ApiClientError::RemoteCall { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_duplicate_login(&self) -> bool {
        matches!(self, ApiClientError::DuplicateLogin { .. })
    }
}

/// Named, typed state attached to a client and shared by every handler that asks for it
#[derive(Default)]
pub struct Extensions {
    entries: tokio::sync::Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Extensions {
    pub async fn insert<T: Any + Send + Sync>(&self, name: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries
            .lock()
            .await
            .insert(name.to_string(), value.clone() as Arc<dyn Any + Send + Sync>);
        value
    }

    pub async fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let entries = self.entries.lock().await;
        entries.get(name).cloned()?.downcast::<T>().ok()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.lock().await.contains_key(name)
    }

    /// Returns the extension stored under `name`, running `init` once to create it when absent.
    /// A failing `init` stores nothing and its error is returned as is.
    pub async fn get_or_try_init<T, F, Fut>(
        &self,
        name: &str,
        init: F,
    ) -> Result<Arc<T>, ApiClientError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiClientError>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(name) {
            return existing.clone().downcast::<T>().map_err(|_| {
                ApiClientError::Config(format!("Extension '{}' holds another type", name))
            });
        }

        let value = Arc::new(init().await?);
        entries.insert(name.to_string(), value.clone() as Arc<dyn Any + Send + Sync>);
        log::info!("Client extension '{}' initialized", name);
        Ok(value)
    }
}

/// Client facade: owns the session, exposes the role REST namespaces and builds role sockets.
pub struct Api {
    settings: ConnectionSettings,
    session: Arc<SessionConfig>,
    http: HttpClient,
    extensions: Arc<Extensions>,
    socket_handlers: Vec<Arc<dyn EventHandler>>,
}

impl Api {
    /// Logs in with `settings` and returns a ready client
    pub async fn login(settings: ConnectionSettings) -> Result<Api, ApiClientError> {
        log::info!("Initializing VCC client");
        let session = Arc::new(SessionConfig::new(&settings)?);
        session.login().await?;
        Api::with_session(settings, session)
    }

    /// Wraps an existing session; nothing is fetched
    pub fn with_session(
        settings: ConnectionSettings,
        session: Arc<SessionConfig>,
    ) -> Result<Api, ApiClientError> {
        let http = HttpClient::new(session.clone())?;
        Ok(Api {
            settings,
            session,
            http,
            extensions: Arc::new(Extensions::default()),
            socket_handlers: vec![],
        })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn session(&self) -> &Arc<SessionConfig> {
        &self.session
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn extensions(&self) -> &Arc<Extensions> {
        &self.extensions
    }

    pub fn agent(&self) -> RoleApi<'_> {
        RoleApi::new(&self.http, Role::Agent)
    }

    pub fn supervisor(&self) -> SupervisorApi<'_> {
        SupervisorApi::new(&self.http)
    }

    pub fn role(&self, role: Role) -> RoleApi<'_> {
        RoleApi::new(&self.http, role)
    }

    /// Adds a handler that every socket built afterwards registers on top of the built-ins
    pub fn add_socket_handler(&mut self, handler: Arc<dyn EventHandler>) {
        log::debug!("Custom socket handler queued for event {}", handler.event_id());
        self.socket_handlers.push(handler);
    }

    pub async fn login_state(&self, role: Role) -> Result<LoginState, ApiClientError> {
        self.role(role).login_state().await
    }

    pub async fn supervisor_login_state(&self) -> Result<LoginState, ApiClientError> {
        self.login_state(Role::Supervisor).await
    }

    pub async fn agent_login_state(&self) -> Result<LoginState, ApiClientError> {
        self.login_state(Role::Agent).await
    }

    /// Accepts every outstanding maintenance notice and returns how many were accepted
    pub async fn accept_maintenance_notices(&self, role: Role) -> Result<usize, ApiClientError> {
        let api = self.role(role);
        let user_id = self.session.snapshot()?.user_id.clone();
        log::info!("Accepting maintenance notices for {}: {}", role, user_id);

        let notices: Vec<MaintenanceNotice> = api.maintenance_notices().await?;
        let mut accepted = 0;
        for notice in notices.iter().filter(|n| !n.accepted) {
            api.accept_maintenance_notice(&notice.id).await?;
            log::info!("Accepted maintenance notice: {}", notice.id);
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Brings the role session to a working state.
    ///
    /// Reads the login state, accepts pending maintenance notices when allowed, and starts the
    /// session on the configured station when the VCC asks for a station. Returns `false` when the
    /// role was already logged in elsewhere: that session is logged out so a later retry can
    /// succeed.
    pub async fn initialize_session(
        &self,
        role: Role,
        auto_accept_notice: bool,
    ) -> Result<bool, ApiClientError> {
        let mut state = self.login_state(role).await?;

        if auto_accept_notice && state == LoginState::AcceptNotice {
            self.accept_maintenance_notices(role).await?;
            state = self.login_state(role).await?;
        }

        if state != LoginState::SelectStation {
            log::debug!("{} session not started, login state is {}", role, state);
            return Ok(state == LoginState::Working);
        }

        match self.role(role).session_start(&self.settings.station).await {
            Ok(()) => {
                log::info!("{} session started", role);
                Ok(true)
            }
            Err(ApiClientError::DuplicateLogin { .. }) => {
                log::info!(
                    "{} already logged in, logging out, please try again.",
                    role
                );
                self.role(role).logout().await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn initialize_supervisor_session(
        &self,
        auto_accept_notice: bool,
    ) -> Result<bool, ApiClientError> {
        self.initialize_session(Role::Supervisor, auto_accept_notice)
            .await
    }

    pub async fn initialize_agent_session(
        &self,
        auto_accept_notice: bool,
    ) -> Result<bool, ApiClientError> {
        self.initialize_session(Role::Agent, auto_accept_notice)
            .await
    }

    pub fn handler_context(&self, role: Role) -> HandlerContext {
        HandlerContext {
            role,
            session: self.session.clone(),
            http: self.http.clone(),
            extensions: self.extensions.clone(),
            station: self.settings.station.clone(),
        }
    }

    /// Builds the role socket over a caller supplied transport
    pub fn socket_with_connector(&self, role: Role, connector: Arc<dyn Connector>) -> WsClient {
        let mut socket = WsClient::new(&self.settings, self.handler_context(role), connector);
        for handler in &self.socket_handlers {
            socket.add_socket_handler(handler.clone());
        }
        socket
    }

    #[cfg(feature = "websocket")]
    pub fn socket(&self, role: Role) -> WsClient {
        self.socket_with_connector(role, Arc::new(crate::wsclient::TungsteniteConnector))
    }

    #[cfg(feature = "websocket")]
    pub fn supervisor_socket(&self) -> WsClient {
        self.socket(Role::Supervisor)
    }

    #[cfg(feature = "websocket")]
    pub fn agent_socket(&self) -> WsClient {
        self.socket(Role::Agent)
    }
}
