use crate::api::{ApiClientError, Extensions, Station};
use crate::httpclient::methods::{RoleApi, SupervisorApi};
use crate::httpclient::{HttpClient, LoginState};
use crate::session::SessionConfig;
use crate::vcc::{Event, Role};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// What the socket should do once a handler returns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Close the connection and connect again with the current session
    Reconnect,
}

/// Everything a handler may touch while processing an event
#[derive(Clone)]
pub struct HandlerContext {
    pub role: Role,
    pub session: Arc<SessionConfig>,
    pub http: HttpClient,
    pub extensions: Arc<Extensions>,
    pub station: Station,
}

impl HandlerContext {
    /// REST namespace of the socket's role
    pub fn api(&self) -> RoleApi<'_> {
        RoleApi::new(&self.http, self.role)
    }

    pub fn supervisor(&self) -> SupervisorApi<'_> {
        SupervisorApi::new(&self.http)
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event type key this handler is registered under
    fn event_id(&self) -> &str;
    async fn handle(
        &self,
        ctx: &HandlerContext,
        event: &Event,
    ) -> Result<Disposition, ApiClientError>;
}

/// Log only handler installed for event types nobody registered
pub struct GenericEventHandler {
    event_id: String,
}

impl GenericEventHandler {
    pub fn new(event_id: &str) -> GenericEventHandler {
        GenericEventHandler {
            event_id: event_id.to_string(),
        }
    }
}

#[async_trait]
impl EventHandler for GenericEventHandler {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn handle(
        &self,
        _ctx: &HandlerContext,
        event: &Event,
    ) -> Result<Disposition, ApiClientError> {
        log::info!(
            "Generic Handler EVENT: {} - {} - Payload:\n{}\n",
            event.event_id(),
            event.reason(),
            event.payload
        );
        Ok(Disposition::Handled)
    }
}

/// Built-in handler that only logs the event under a fixed label
pub struct LogEventHandler {
    event_id: &'static str,
    label: &'static str,
}

impl LogEventHandler {
    pub fn new(event_id: &'static str, label: &'static str) -> LogEventHandler {
        LogEventHandler { event_id, label }
    }
}

#[async_trait]
impl EventHandler for LogEventHandler {
    fn event_id(&self) -> &str {
        self.event_id
    }

    async fn handle(
        &self,
        _ctx: &HandlerContext,
        event: &Event,
    ) -> Result<Disposition, ApiClientError> {
        log::info!("{} EVENT: {} - {}", self.label, event.event_id(), event.payload);
        Ok(Disposition::Handled)
    }
}

pub const EVENT_DEFAULT: &str = "1202";
pub const EVENT_MIGRATION_STARTED: &str = "70";
pub const EVENT_DOMAIN_MIGRATED: &str = "1002";

/// Handles a completed domain migration.
///
/// The payload is the session metadata for the new data center. It is applied to the session, the
/// role session is restarted there when it is not already working, and the socket is told to
/// reconnect so the next connection is opened against the new host with the new token.
pub struct DomainMigratedHandler;

#[async_trait]
impl EventHandler for DomainMigratedHandler {
    fn event_id(&self) -> &str {
        EVENT_DOMAIN_MIGRATED
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        event: &Event,
    ) -> Result<Disposition, ApiClientError> {
        log::info!(
            "Default Handler EVENT: {} - {}",
            event.event_id(),
            event.reason()
        );
        let state = ctx.session.refresh_from_value(&event.payload)?;
        log::info!("Session migrated to {}", state.base_api_url);

        let api = ctx.api();
        match api.login_state().await? {
            LoginState::Working => {}
            other => {
                log::info!("{} login state is {}, restarting session", ctx.role, other);
                api.session_start(&ctx.station).await?;
            }
        }
        // Reconnect even when the session was already WORKING: the host and token changed, and
        // the open socket still points at the old data center.
        Ok(Disposition::Reconnect)
    }
}

/// Event type key to handler. Mutated only by the task that dispatches events.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> HandlerRegistry {
        HandlerRegistry::with_defaults()
    }
}

impl HandlerRegistry {
    pub fn empty() -> HandlerRegistry {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in handlers
    pub fn with_defaults() -> HandlerRegistry {
        let mut registry = HandlerRegistry::empty();
        registry.register(Arc::new(LogEventHandler::new(EVENT_DEFAULT, "Default Handler")));
        registry.register(Arc::new(LogEventHandler::new(EVENT_MIGRATION_STARTED, "MGR")));
        registry.register(Arc::new(DomainMigratedHandler));
        registry
    }

    /// Adds `handler`, replacing any handler already registered for its event type
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let event_id = handler.event_id().to_string();
        log::info!("Handler Added: {}", event_id);
        self.handlers.insert(event_id, handler);
    }

    pub fn get(&self, event_id: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_id).cloned()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.handlers.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler for `event`, installing a permanent generic one on first sight of an unknown type
    pub fn resolve(&mut self, event: &Event) -> Arc<dyn EventHandler> {
        self.handlers
            .entry(event.event_id().to_string())
            .or_insert_with(|| {
                log::info!(
                    "No handler found for event {}, creating generic handler.\npayLoad:\n{}\n",
                    event.event_id(),
                    event.payload
                );
                Arc::new(GenericEventHandler::new(event.event_id()))
            })
            .clone()
    }

    pub async fn dispatch(
        &mut self,
        ctx: &HandlerContext,
        event: &Event,
    ) -> Result<Disposition, ApiClientError> {
        let handler = self.resolve(event);
        handler.handle(ctx, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Api;
    use crate::session::tests::{login_document, session_for};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event(id: &str, payload: serde_json::Value) -> Event {
        serde_json::from_value(json!({
            "context": {"eventId": id, "eventReason": "UPDATED"},
            "payLoad": payload
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_event_gets_one_permanent_fallback() {
        let server = MockServer::start().await;
        let (settings, session) = session_for(&server);
        let ctx = Api::with_session(settings, session).unwrap().handler_context(Role::Supervisor);

        let mut registry = HandlerRegistry::with_defaults();
        let before = registry.len();
        let unknown = event("9999", json!([]));

        assert_eq!(
            registry.dispatch(&ctx, &unknown).await.unwrap(),
            Disposition::Handled
        );
        let first = registry.get("9999").unwrap();
        registry.dispatch(&ctx, &unknown).await.unwrap();
        let second = registry.get("9999").unwrap();

        assert_eq!(registry.len(), before + 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn defaults_and_overrides() {
        let mut registry = HandlerRegistry::with_defaults();
        assert!(registry.contains(EVENT_DEFAULT));
        assert!(registry.contains(EVENT_MIGRATION_STARTED));
        assert!(registry.contains(EVENT_DOMAIN_MIGRATED));

        registry.register(Arc::new(GenericEventHandler::new(EVENT_DOMAIN_MIGRATED)));
        assert_eq!(registry.len(), 3);
        assert!(HandlerRegistry::empty().is_empty());
    }

    #[tokio::test]
    async fn domain_migration_refreshes_session_and_reconnects() {
        let server = MockServer::start().await;
        let (settings, session) = session_for(&server);
        let ctx = Api::with_session(settings, session.clone()).unwrap().handler_context(Role::Supervisor);

        Mock::given(method("GET"))
            .and(path("/supsvcs/rs/svc/supervisors/3001/login_state"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"SELECT_STATION\""))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/supsvcs/rs/svc/supervisors/3001/session_start"))
            .and(wiremock::matchers::header("Authorization", "Bearer-token-2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let port = server.address().port();
        let migrated = event(
            EVENT_DOMAIN_MIGRATED,
            login_document("token-2", "127.0.0.1", port),
        );
        let disposition = HandlerRegistry::with_defaults()
            .dispatch(&ctx, &migrated)
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Reconnect);
        assert_eq!(session.snapshot().unwrap().token_id, "token-2");
    }

    #[tokio::test]
    async fn domain_migration_reconnects_a_working_session_without_restarting_it() {
        let server = MockServer::start().await;
        let (settings, session) = session_for(&server);
        let ctx = Api::with_session(settings, session.clone()).unwrap().handler_context(Role::Agent);

        Mock::given(method("GET"))
            .and(path("/appsvcs/rs/svc/agents/3001/login_state"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"WORKING\""))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let migrated = event(
            EVENT_DOMAIN_MIGRATED,
            login_document("token-3", "127.0.0.1", server.address().port()),
        );
        let disposition = DomainMigratedHandler.handle(&ctx, &migrated).await.unwrap();

        assert_eq!(disposition, Disposition::Reconnect);
        assert_eq!(session.snapshot().unwrap().token_id, "token-3");
    }

    #[tokio::test]
    async fn malformed_migration_payload_is_an_error() {
        let server = MockServer::start().await;
        let (settings, session) = session_for(&server);
        let ctx = Api::with_session(settings, session.clone()).unwrap().handler_context(Role::Agent);
        let before = session.snapshot().unwrap();

        let result = DomainMigratedHandler
            .handle(&ctx, &event(EVENT_DOMAIN_MIGRATED, json!({"tokenId": "x"})))
            .await;
        assert!(matches!(result, Err(ApiClientError::InvalidMetadata(_))));
        assert_eq!(session.snapshot().unwrap(), before);
    }
}
