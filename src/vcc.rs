use crate::api::ApiClientError;
use crate::state::StateResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[async_trait]
/// The `Channel` trait is what a persistent event transport implements so the socket FSM can drive it
pub trait Channel: Send {
    fn role(&self) -> Role;
    // State transition handlers
    async fn trigger(&mut self) -> Result<(), ApiClientError>;
    async fn connect(&mut self) -> Result<StateResponse, ApiClientError>;
    async fn listen(&mut self) -> Result<StateResponse, ApiClientError>;
    async fn disconnect(&mut self) -> Result<StateResponse, ApiClientError>;
}

/// The two session roles exposed by the VCC. Each role has its own REST context root and its own
/// websocket endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Agent,
    Supervisor,
}

impl Role {
    pub fn rest_context(self) -> &'static str {
        match self {
            Role::Agent => paths::AGENT_REST,
            Role::Supervisor => paths::SUPERVISOR_REST,
        }
    }

    /// Websocket path for this role with the caller chosen application key embedded
    pub fn websocket_path(self, socket_app_key: &str) -> String {
        let template = match self {
            Role::Agent => paths::WEBSOCKET_AGENT,
            Role::Supervisor => paths::WEBSOCKET_SUPERVISOR,
        };
        template.replace("{socket_app_key}", socket_app_key)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Agent => write!(f, "Agent"),
            Role::Supervisor => write!(f, "Supervisor"),
        }
    }
}

pub mod paths {
    /// Agent REST API services
    pub const AGENT_REST: &str = "/appsvcs/rs/svc";
    /// Agent call recordings and email message attachments
    pub const AGENT_STORAGE: &str = "/strsvcs/rs/svc";
    /// Supervisor REST API services
    pub const SUPERVISOR_REST: &str = "/supsvcs/rs/svc";

    pub const WEBSOCKET_AGENT: &str = "/appsvcs/ws/{socket_app_key}_agent";
    pub const WEBSOCKET_SUPERVISOR: &str = "/supsvcs/sws/{socket_app_key}_super";
}

/// Literal text frame the server expects as a keepalive
pub const KEEPALIVE_FRAME: &str = "ping";

/// `contextCode` the VCC reports when a role is already logged in elsewhere
pub const DUPLICATE_LOGIN_CODE: &str = "DUPLICATE_LOGIN";

/// Header block of every inbound socket event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(rename = "eventId", deserialize_with = "util::string_or_number")]
    pub event_id: String,
    #[serde(
        rename = "eventReason",
        default,
        deserialize_with = "util::optional_string_or_number"
    )]
    pub event_reason: Option<String>,
}

/// A decoded inbound socket message.
///
/// The payload is kept as raw JSON: statistics events carry an ordered list of update records
/// while migration events carry a full session metadata document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub context: EventContext,
    #[serde(rename = "payLoad", default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn decode(text: &str) -> Result<Event, ApiClientError> {
        serde_json::from_str(text).map_err(|e| ApiClientError::MalformedEvent(e.to_string()))
    }

    pub fn event_id(&self) -> &str {
        &self.context.event_id
    }

    pub fn reason(&self) -> &str {
        self.context.event_reason.as_deref().unwrap_or("")
    }

    /// Update records of the payload; empty when the payload is not a sequence
    pub fn records(&self) -> &[serde_json::Value] {
        self.payload
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub mod util {
    use serde::{Deserialize, Deserializer};
    use std::time::SystemTime;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Text(String),
        Number(serde_json::Number),
    }

    impl From<StringOrNumber> for String {
        fn from(value: StringOrNumber) -> String {
            match value {
                StringOrNumber::Text(text) => text,
                StringOrNumber::Number(number) => number.to_string(),
            }
        }
    }

    /// The VCC is not consistent about quoting ids and ports, accept both forms
    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        StringOrNumber::deserialize(deserializer).map(String::from)
    }

    pub fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<StringOrNumber>::deserialize(deserializer).map(|value| value.map(String::from))
    }

    pub fn generate_ulid() -> ulid::Ulid {
        let mut rng = rand::thread_rng();
        ulid::Ulid::from_datetime_with_source(SystemTime::now(), &mut rng)
    }

    /// A fresh application key for the websocket path
    pub fn generate_socket_key() -> String {
        generate_ulid().to_string().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_with_numeric_id() {
        let event = Event::decode(
            r#"{"context":{"eventId":5012,"eventReason":"UPDATED"},"payLoad":[{"dataSource":"ACD_STATUS"}]}"#,
        )
        .unwrap();
        assert_eq!(event.event_id(), "5012");
        assert_eq!(event.reason(), "UPDATED");
        assert_eq!(event.records().len(), 1);
    }

    #[test]
    fn missing_payload_and_reason_default() {
        let event = Event::decode(r#"{"context":{"eventId":"1202"}}"#).unwrap();
        assert_eq!(event.reason(), "");
        assert!(event.records().is_empty());
    }

    #[test]
    fn malformed_frame_is_reported() {
        assert!(matches!(
            Event::decode("pong"),
            Err(ApiClientError::MalformedEvent(_))
        ));
        assert!(matches!(
            Event::decode(r#"{"payLoad":[]}"#),
            Err(ApiClientError::MalformedEvent(_))
        ));
    }

    #[test]
    fn websocket_paths_embed_app_key() {
        assert_eq!(
            Role::Supervisor.websocket_path("demo"),
            "/supsvcs/sws/demo_super"
        );
        assert_eq!(Role::Agent.websocket_path("demo"), "/appsvcs/ws/demo_agent");
    }

    #[test]
    fn socket_keys_are_unique() {
        assert_ne!(util::generate_socket_key(), util::generate_socket_key());
    }
}
