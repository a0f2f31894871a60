pub mod methods;

use crate::api::ApiClientError;
use crate::session::{SessionConfig, SessionState};
use crate::vcc::DUPLICATE_LOGIN_CODE;
use methods::{Call, Operation, ReplyKind};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// The `HttpClient` struct executes catalog operations against the VCC REST API.
///
/// Properties:
///
/// * `session`: shared session state. A snapshot is taken at the start of every call so the base
/// URL, ids and headers are always the ones published by the latest login or migration.
/// * `client`: the underlying reqwest client, reused across calls for connection pooling.
#[derive(Clone)]
pub struct HttpClient {
    session: Arc<SessionConfig>,
    client: ReqwestClient,
}

/// Parsed body of a successful call
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

impl Reply {
    fn parse(kind: ReplyKind, body: &str) -> Result<Reply, ApiClientError> {
        match kind {
            ReplyKind::Empty => Ok(Reply::Empty),
            ReplyKind::Text => Ok(Reply::Text(body.trim().trim_matches('"').to_string())),
            ReplyKind::Json if body.trim().is_empty() => Ok(Reply::Empty),
            ReplyKind::Json => serde_json::from_str(body)
                .map(Reply::Json)
                .map_err(|e| ApiClientError::InvalidResponse(e.to_string())),
        }
    }

    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiClientError> {
        let value = match self {
            Reply::Json(value) => value,
            Reply::Text(text) => serde_json::Value::String(text),
            Reply::Empty => serde_json::Value::Null,
        };
        serde_json::from_value(value).map_err(|e| ApiClientError::InvalidResponse(e.to_string()))
    }

    pub fn into_text(self) -> Result<String, ApiClientError> {
        match self {
            Reply::Text(text) => Ok(text),
            Reply::Json(serde_json::Value::String(text)) => Ok(text),
            Reply::Json(other) => Err(ApiClientError::InvalidResponse(format!(
                "expected a bare string, got {}",
                other
            ))),
            Reply::Empty => Err(ApiClientError::InvalidResponse(
                "expected a bare string, got an empty body".to_string(),
            )),
        }
    }
}

/// Login state reported by the `login_state` operation of either role
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginState {
    Working,
    SelectStation,
    AcceptNotice,
    SelectSkills,
    Relogin,
    Other(String),
}

impl From<&str> for LoginState {
    fn from(value: &str) -> LoginState {
        match value {
            "WORKING" => LoginState::Working,
            "SELECT_STATION" => LoginState::SelectStation,
            "ACCEPT_NOTICE" => LoginState::AcceptNotice,
            "SELECT_SKILLS" => LoginState::SelectSkills,
            "RELOGIN" => LoginState::Relogin,
            other => LoginState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoginState::Working => write!(f, "WORKING"),
            LoginState::SelectStation => write!(f, "SELECT_STATION"),
            LoginState::AcceptNotice => write!(f, "ACCEPT_NOTICE"),
            LoginState::SelectSkills => write!(f, "SELECT_SKILLS"),
            LoginState::Relogin => write!(f, "RELOGIN"),
            LoginState::Other(state) => write!(f, "{}", state),
        }
    }
}

/// Maps a non-2xx answer to the error the caller can act on
fn classify_failure(status: StatusCode, body: String) -> ApiClientError {
    let duplicate = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|detail| {
            detail
                .pointer("/five9ExceptionDetail/context/contextCode")
                .and_then(|code| code.as_str().map(|code| code == DUPLICATE_LOGIN_CODE))
        })
        .unwrap_or(false);

    if duplicate {
        ApiClientError::DuplicateLogin {
            status: status.as_u16(),
            body,
        }
    } else {
        ApiClientError::RemoteCall {
            status: status.as_u16(),
            body,
        }
    }
}

impl HttpClient {
    pub fn new(session: Arc<SessionConfig>) -> Result<HttpClient, ApiClientError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(|e| ApiClientError::Config(format!("HTTP client: {}", e)))?;
        Ok(HttpClient { session, client })
    }

    pub fn session(&self) -> &Arc<SessionConfig> {
        &self.session
    }

    /// Full URL of `operation` against the published session
    pub fn url_for(
        &self,
        state: &SessionState,
        operation: &Operation,
        call: &Call,
    ) -> Result<String, ApiClientError> {
        Ok(format!(
            "{}{}{}",
            state.base_api_url,
            operation.role.rest_context(),
            operation.render_path(state, call)?
        ))
    }

    /// Executes one operation. Connectivity failures are returned as is, never retried here.
    pub async fn invoke(&self, operation: &Operation, call: Call) -> Result<Reply, ApiClientError> {
        let state = self.session.snapshot()?;
        let url = self.url_for(&state, operation, &call)?;
        log::debug!("{} - {} {}", operation.label(), operation.verb, url);

        let mut request = self.client.request(operation.verb.as_method(), url.as_str());
        for (name, value) in &state.api_header {
            request = request.header(name.as_str(), value.as_str());
        }
        if operation.verb != methods::Verb::Get {
            if let Some(body) = &call.body {
                request = request.json(body);
            }
        }
        let query = call.query_pairs(operation);
        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::error!("{} - Error Connecting: {}", operation.label(), e);
                return Err(ApiClientError::Connectivity(e.to_string()));
            }
        };

        let status = response.status();
        log::info!("{} - RESPONSE: {}", operation.label(), status.as_u16());
        let body = response
            .text()
            .await
            .map_err(|e| ApiClientError::Connectivity(e.to_string()))?;
        log::debug!("{} -    TEXT: {}", operation.label(), body);

        if status.is_success() {
            Reply::parse(operation.reply, &body)
        } else {
            Err(classify_failure(status, body))
        }
    }

    /// Looks `name` up in the operation catalog and executes it
    pub async fn invoke_named(&self, name: &str, call: Call) -> Result<Reply, ApiClientError> {
        let operation = methods::find(name)
            .ok_or_else(|| ApiClientError::Config(format!("Unknown operation {}", name)))?;
        self.invoke(operation, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::methods::{agent, supervisor};
    use super::*;
    use crate::session::tests::session_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn call_reads_headers_and_base_url_from_session() {
        let server = MockServer::start().await;
        let (_, session) = session_for(&server);
        let http = HttpClient::new(session).unwrap();

        Mock::given(method("GET"))
            .and(path("/supsvcs/rs/svc/supervisors/3001/login_state"))
            .and(header("Authorization", "Bearer-token-1"))
            .and(header("farmId", "3000000000000000022"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"SELECT_STATION\""))
            .expect(1)
            .mount(&server)
            .await;

        let reply = http
            .invoke(&supervisor::LOGIN_STATE, Call::new())
            .await
            .unwrap();
        assert_eq!(reply, Reply::Text("SELECT_STATION".to_string()));
    }

    #[tokio::test]
    async fn refresh_is_visible_to_the_next_call() {
        let server = MockServer::start().await;
        let (_, session) = session_for(&server);
        let http = HttpClient::new(session.clone()).unwrap();

        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer-token-2"))
            .and(path("/supsvcs/rs/svc/orgs/113555/skills"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let port = server.address().port();
        session
            .refresh_from_value(&crate::session::tests::login_document(
                "token-2",
                "127.0.0.1",
                port,
            ))
            .unwrap();
        let reply = http
            .invoke(&supervisor::DOMAIN_QUEUES, Call::new())
            .await
            .unwrap();
        assert_eq!(reply, Reply::Json(json!([])));
    }

    #[tokio::test]
    async fn body_and_query_are_attached() {
        let server = MockServer::start().await;
        let (_, session) = session_for(&server);
        let http = HttpClient::new(session).unwrap();

        Mock::given(method("POST"))
            .and(path("/supsvcs/rs/svc/supervisors/3001/migrate"))
            .and(query_param("migrateToMaintenanceHost", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/supsvcs/rs/svc/alerts/a1"))
            .and(body_json(json!({"name": "calls"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a1"})))
            .expect(1)
            .mount(&server)
            .await;

        http.invoke(&supervisor::MIGRATE, Call::new())
            .await
            .unwrap();
        let updated = http
            .invoke_named(
                "Supervisor:UpdateAlert",
                Call::new().param("alertId", "a1").json(json!({"name": "calls"})),
            )
            .await
            .unwrap();
        assert_eq!(updated, Reply::Json(json!({"id": "a1"})));
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let server = MockServer::start().await;
        let (_, session) = session_for(&server);
        let http = HttpClient::new(session).unwrap();

        Mock::given(method("PUT"))
            .and(path("/appsvcs/rs/svc/agents/3001/session_start"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "five9ExceptionDetail": {"context": {"contextCode": "DUPLICATE_LOGIN"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/appsvcs/rs/svc/agents/3001/maintenance_notices"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let duplicate = http
            .invoke(&agent::SESSION_START, Call::new().json(json!({})))
            .await
            .unwrap_err();
        assert!(duplicate.is_duplicate_login());
        assert_eq!(duplicate.code(), Some(409));

        match http.invoke(&agent::MAINTENANCE_NOTICES, Call::new()).await {
            Err(ApiClientError::RemoteCall { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connectivity_error() {
        let server = MockServer::start().await;
        let (_, session) = session_for(&server);
        session
            .refresh_from_value(&crate::session::tests::login_document(
                "token-1",
                "127.0.0.1",
                1,
            ))
            .unwrap();
        let http = HttpClient::new(session).unwrap();

        assert!(matches!(
            http.invoke(&agent::LOGIN_STATE, Call::new()).await,
            Err(ApiClientError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn unknown_operation_and_unbound_parameters_are_rejected() {
        let server = MockServer::start().await;
        let (_, session) = session_for(&server);
        let http = HttpClient::new(session).unwrap();

        assert!(matches!(
            http.invoke_named("Supervisor:Nope", Call::new()).await,
            Err(ApiClientError::Config(_))
        ));
        assert!(matches!(
            http.invoke(&supervisor::DELETE_ALERT, Call::new()).await,
            Err(ApiClientError::Config(_))
        ));
    }

    #[test]
    fn reply_parsing() {
        assert_eq!(
            Reply::parse(ReplyKind::Json, "  ").unwrap(),
            Reply::Empty
        );
        assert!(matches!(
            Reply::parse(ReplyKind::Json, "{oops"),
            Err(ApiClientError::InvalidResponse(_))
        ));
        assert_eq!(
            Reply::parse(ReplyKind::Text, "\"WORKING\"\n")
                .unwrap()
                .into_text()
                .unwrap(),
            "WORKING"
        );
        assert_eq!(LoginState::from("SELECT_SKILLS"), LoginState::SelectSkills);
        assert_eq!(LoginState::from("ODD").to_string(), "ODD");
    }
}
