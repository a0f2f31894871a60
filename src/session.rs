use crate::api::{ApiClientError, ConnectionSettings};
use crate::vcc::util::string_or_number;
use arc_swap::ArcSwapOption;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Body posted to the login endpoint
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    password_credentials: PasswordCredentials,
    app_key: String,
    policy: String,
}

#[derive(Clone, Debug, Serialize)]
struct PasswordCredentials {
    username: String,
    password: String,
}

/// Session metadata document returned by login and pushed again by migration events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginMetadata {
    #[serde(deserialize_with = "string_or_number")]
    pub token_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub org_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub context: LoginContext,
    pub metadata: DataCenterDirectory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginContext {
    #[serde(deserialize_with = "string_or_number")]
    pub farm_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCenterDirectory {
    #[serde(default)]
    pub freedom_url: Option<String>,
    #[serde(default)]
    pub data_centers: Vec<DataCenter>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCenter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub api_urls: Vec<ServiceUrl>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUrl {
    pub host: String,
    #[serde(deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(default)]
    pub route_key: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Settled connection parameters derived from one metadata document.
/// Published as a whole, never mutated after publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub host: String,
    pub port: String,
    pub base_api_url: String,
    pub org_id: String,
    pub user_id: String,
    pub farm_id: String,
    pub token_id: String,
    pub api_header: Vec<(String, String)>,
    pub cookies_header: String,
}

impl SessionState {
    pub fn derive(
        metadata: &LoginMetadata,
        scheme: &str,
        cookies_header: String,
    ) -> Result<SessionState, ApiClientError> {
        let data_center = metadata
            .metadata
            .data_centers
            .iter()
            .find(|dc| dc.active)
            .ok_or_else(|| ApiClientError::InvalidMetadata("no active data center".to_string()))?;
        let api_url = data_center.api_urls.first().ok_or_else(|| {
            ApiClientError::InvalidMetadata(format!(
                "data center '{}' has no API URL",
                data_center.name
            ))
        })?;

        let api_header = vec![
            (
                "Authorization".to_string(),
                format!("Bearer-{}", metadata.token_id),
            ),
            ("farmId".to_string(), metadata.context.farm_id.clone()),
            (
                "Accept".to_string(),
                "application/json, text/javascript".to_string(),
            ),
        ];

        Ok(SessionState {
            host: api_url.host.clone(),
            port: api_url.port.clone(),
            base_api_url: format!("{}://{}:{}", scheme, api_url.host, api_url.port),
            org_id: metadata.org_id.clone(),
            user_id: metadata.user_id.clone(),
            farm_id: metadata.context.farm_id.clone(),
            token_id: metadata.token_id.clone(),
            api_header,
            cookies_header,
        })
    }

    pub fn authorization(&self) -> String {
        format!("Bearer-{}", self.token_id)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.api_header
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Dependents that want to hear about every successful refresh
pub trait SessionObserver: Send + Sync {
    fn update_config(&self, state: &SessionState);
}

/// Authentication state shared by the REST namespaces and the sockets.
///
/// Writers go through `login` or `refresh` and are serialized; the derived state is swapped in
/// atomically so readers see either the old or the new document, never a mix. Readers call
/// `snapshot` each time they need a field instead of holding on to one.
pub struct SessionConfig {
    login_url: String,
    login_payload: LoginPayload,
    api_scheme: String,
    client: ReqwestClient,
    state: ArcSwapOption<SessionState>,
    writer: Mutex<()>,
    observers: Mutex<Vec<Arc<dyn SessionObserver>>>,
}

impl SessionConfig {
    pub fn new(settings: &ConnectionSettings) -> Result<SessionConfig, ApiClientError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(|e| ApiClientError::Config(format!("HTTP client: {}", e)))?;

        Ok(SessionConfig {
            login_url: settings.login_endpoint(),
            login_payload: LoginPayload {
                password_credentials: PasswordCredentials {
                    username: settings.credentials.username.clone(),
                    password: settings.credentials.password.clone(),
                },
                app_key: settings.app_key.clone(),
                policy: settings.policy.clone(),
            },
            api_scheme: settings.api_scheme.clone(),
            client,
            state: ArcSwapOption::empty(),
            writer: Mutex::new(()),
            observers: Mutex::new(vec![]),
        })
    }

    /// Posts the credentials and populates the session from the returned metadata
    pub async fn login(&self) -> Result<Arc<SessionState>, ApiClientError> {
        log::debug!("Logging in at {}", self.login_url);

        let response = self
            .client
            .post(&self.login_url)
            .json(&self.login_payload)
            .send()
            .await
            .map_err(|e| ApiClientError::Connectivity(format!("Login request failed: {}", e)))?;

        let status = response.status();
        let cookies_header = response
            .cookies()
            .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
            .collect::<Vec<_>>()
            .join("; ");
        let body = response
            .text()
            .await
            .map_err(|e| ApiClientError::Connectivity(format!("Login response failed: {}", e)))?;

        if !status.is_success() {
            log::warn!("Login rejected: {}", status);
            return Err(ApiClientError::Authentication {
                status: status.as_u16(),
                details: body,
            });
        }
        if body.trim().is_empty() {
            return Err(ApiClientError::Authentication {
                status: status.as_u16(),
                details: "login returned no session metadata".to_string(),
            });
        }
        log::trace!("Login result: {}", body);

        let metadata: LoginMetadata = serde_json::from_str(&body)
            .map_err(|e| ApiClientError::InvalidMetadata(e.to_string()))?;
        self.refresh(&metadata, Some(cookies_header))
    }

    /// Derives and publishes a new state from `metadata`, then notifies observers.
    /// `None` for cookies keeps the cookie string captured at login.
    /// On error the previously published state stays in place untouched.
    ///
    /// Observers run after the swap but before the writer lock is released, so notifications
    /// arrive in publication order and the last one always names the published state.
    pub fn refresh(
        &self,
        metadata: &LoginMetadata,
        cookies_header: Option<String>,
    ) -> Result<Arc<SessionState>, ApiClientError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let cookies_header = match cookies_header {
            Some(cookies) => cookies,
            None => self
                .state
                .load_full()
                .map(|current| current.cookies_header.clone())
                .unwrap_or_default(),
        };
        let published = Arc::new(SessionState::derive(
            metadata,
            &self.api_scheme,
            cookies_header,
        )?);
        self.state.store(Some(published.clone()));

        log::debug!(
            "Session metadata applied - Base API URL: {}, UserID: {}, OrgID: {}",
            published.base_api_url,
            published.user_id,
            published.org_id
        );
        self.notify_observers(&published);
        Ok(published)
    }

    /// Refresh from a raw metadata document, as delivered in a migration event payload
    pub fn refresh_from_value(
        &self,
        document: &serde_json::Value,
    ) -> Result<Arc<SessionState>, ApiClientError> {
        let document = match document {
            serde_json::Value::Array(items) if items.len() == 1 => &items[0],
            other => other,
        };
        let metadata: LoginMetadata = serde_json::from_value(document.clone())
            .map_err(|e| ApiClientError::InvalidMetadata(e.to_string()))?;
        self.refresh(&metadata, None)
    }

    pub fn snapshot(&self) -> Result<Arc<SessionState>, ApiClientError> {
        self.state.load_full().ok_or(ApiClientError::NotLoggedIn)
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.load().is_some()
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn notify_observers(&self, state: &SessionState) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.update_config(state);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::Credentials;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn login_document(token: &str, host: &str, port: u16) -> serde_json::Value {
        json!({
            "tokenId": token,
            "orgId": "113555",
            "userId": "3001",
            "context": {"farmId": "3000000000000000022"},
            "metadata": {
                "freedomUrl": "https://app.five9.com",
                "dataCenters": [
                    {
                        "name": "Standby",
                        "apiUrls": [{"host": "standby.invalid", "port": "443"}],
                        "active": false
                    },
                    {
                        "name": "AtlantaDataCenter",
                        "apiUrls": [
                            {"host": host, "port": port.to_string(), "routeKey": "ATLAPIah1F"},
                            {"host": "second.invalid", "port": "443"}
                        ],
                        "active": true
                    }
                ]
            }
        })
    }

    fn settings_for(login_url: String) -> ConnectionSettings {
        ConnectionSettings {
            credentials: Credentials::new("sup@example.com", "secret"),
            login_url: Some(login_url),
            api_scheme: "http".to_string(),
            socket_scheme: "ws".to_string(),
            ..Default::default()
        }
    }

    /// A session already populated with metadata pointing its REST calls at `server`
    pub(crate) fn session_for(server: &MockServer) -> (ConnectionSettings, Arc<SessionConfig>) {
        let settings = settings_for(format!("{}/auth/login", server.uri()));
        let session = Arc::new(SessionConfig::new(&settings).unwrap());
        let port = server.address().port();
        session
            .refresh_from_value(&login_document("token-1", "127.0.0.1", port))
            .unwrap();
        (settings, session)
    }

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl SessionObserver for CountingObserver {
        fn update_config(&self, _state: &SessionState) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn login_derives_connection_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({
                "passwordCredentials": {"username": "sup@example.com", "password": "secret"},
                "appKey": "five9-rs-supervisor-session",
                "policy": "AttachExisting"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "JSESSIONID=abc123; Path=/")
                    .set_body_json(login_document("token-1", "app-atl.five9.com", 443)),
            )
            .mount(&server)
            .await;

        let session = SessionConfig::new(&settings_for(format!("{}/auth/login", server.uri())))
            .unwrap();
        let state = session.login().await.unwrap();

        assert_eq!(state.base_api_url, "http://app-atl.five9.com:443");
        assert_eq!(state.user_id, "3001");
        assert_eq!(state.org_id, "113555");
        assert_eq!(state.farm_id, "3000000000000000022");
        assert_eq!(state.header("authorization"), Some("Bearer-token-1"));
        assert_eq!(state.header("farmId"), Some("3000000000000000022"));
        assert_eq!(state.cookies_header, "JSESSIONID=abc123");
        assert_eq!(session.snapshot().unwrap(), state);
    }

    #[tokio::test]
    async fn rejected_refresh_keeps_previous_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(login_document("token-1", "app-atl.five9.com", 443)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let session = SessionConfig::new(&settings_for(format!("{}/auth/login", server.uri())))
            .unwrap();
        let before = session.login().await.unwrap();

        let err = session.login().await.unwrap_err();
        assert!(matches!(err, ApiClientError::Authentication { status: 401, .. }));
        assert_eq!(*session.snapshot().unwrap(), *before);
    }

    #[tokio::test]
    async fn empty_login_body_is_an_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let session = SessionConfig::new(&settings_for(format!("{}/auth/login", server.uri())))
            .unwrap();
        assert!(matches!(
            session.login().await,
            Err(ApiClientError::Authentication { status: 200, .. })
        ));
        assert!(!session.is_logged_in());
        assert!(matches!(session.snapshot(), Err(ApiClientError::NotLoggedIn)));
    }

    #[test]
    fn invalid_metadata_leaves_state_untouched() {
        let session = SessionConfig::new(&settings_for("http://127.0.0.1:9/login".to_string()))
            .unwrap();
        session
            .refresh_from_value(&login_document("token-1", "host-a", 443))
            .unwrap();
        let before = session.snapshot().unwrap();

        let mut broken = login_document("token-2", "host-b", 443);
        broken["metadata"]["dataCenters"] = json!([]);
        assert!(matches!(
            session.refresh_from_value(&broken),
            Err(ApiClientError::InvalidMetadata(_))
        ));
        assert!(session
            .refresh_from_value(&json!({"tokenId": "token-3"}))
            .is_err());
        assert_eq!(session.snapshot().unwrap(), before);
    }

    #[test]
    fn migration_refresh_keeps_cookies_and_notifies() {
        let session = SessionConfig::new(&settings_for("http://127.0.0.1:9/login".to_string()))
            .unwrap();
        let observer = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        session.subscribe(observer.clone());

        let metadata: LoginMetadata =
            serde_json::from_value(login_document("token-1", "host-a", 443)).unwrap();
        session
            .refresh(&metadata, Some("JSESSIONID=abc".to_string()))
            .unwrap();

        let migrated = session
            .refresh_from_value(&json!([login_document("token-2", "host-b", 8443)]))
            .unwrap();
        assert_eq!(migrated.base_api_url, "http://host-b:8443");
        assert_eq!(migrated.authorization(), "Bearer-token-2");
        assert_eq!(migrated.cookies_header, "JSESSIONID=abc");
        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
    }

    /// Checks, from inside every notification, that the notified state is still the published one
    struct PublishedStateObserver {
        session: Mutex<std::sync::Weak<SessionConfig>>,
        stale: AtomicUsize,
        last_token: Mutex<String>,
    }

    impl SessionObserver for PublishedStateObserver {
        fn update_config(&self, state: &SessionState) {
            let session = self.session.lock().unwrap().upgrade();
            if let Some(session) = session {
                if session.snapshot().unwrap().token_id != state.token_id {
                    self.stale.fetch_add(1, Ordering::SeqCst);
                }
            }
            *self.last_token.lock().unwrap() = state.token_id.clone();
        }
    }

    #[test]
    fn concurrent_refreshes_notify_in_publication_order() {
        let session = Arc::new(
            SessionConfig::new(&settings_for("http://127.0.0.1:9/login".to_string())).unwrap(),
        );
        let observer = Arc::new(PublishedStateObserver {
            session: Mutex::new(Arc::downgrade(&session)),
            stale: AtomicUsize::new(0),
            last_token: Mutex::new(String::new()),
        });
        session.subscribe(observer.clone());

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let session = &session;
                scope.spawn(move || {
                    for round in 0..25 {
                        let token = format!("token-{}-{}", writer, round);
                        session
                            .refresh_from_value(&login_document(&token, "host-a", 443))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(observer.stale.load(Ordering::SeqCst), 0);
        assert_eq!(
            *observer.last_token.lock().unwrap(),
            session.snapshot().unwrap().token_id
        );
    }

    #[test]
    fn numeric_ids_and_ports_are_accepted() {
        let metadata: LoginMetadata = serde_json::from_value(json!({
            "tokenId": "t",
            "orgId": 113555,
            "userId": 3001,
            "context": {"farmId": 22},
            "metadata": {"dataCenters": [{"apiUrls": [{"host": "h", "port": 443}]}]}
        }))
        .unwrap();
        let state = SessionState::derive(&metadata, "https", String::new()).unwrap();
        assert_eq!(state.base_api_url, "https://h:443");
        assert_eq!(state.user_id, "3001");
    }
}
