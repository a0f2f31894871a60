//! Catalog of the REST operations the client and its built-in handlers use.
//!
//! Every operation is a static `(role, verb, path template, reply shape)` record. Path templates
//! may embed `{userId}` and `{orgId}`, which are filled from the session at call time, and any
//! other `{name}` placeholder bound through [`Call::param`].

use super::{HttpClient, LoginState, Reply};
use crate::api::{ApiClientError, Station};
use crate::session::SessionState;
use crate::vcc::util::string_or_number;
use crate::vcc::Role;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::ops::Deref;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
}

impl Verb {
    pub fn as_method(self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Put => reqwest::Method::PUT,
            Verb::Post => reqwest::Method::POST,
            Verb::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verb::Get => write!(f, "GET"),
            Verb::Put => write!(f, "PUT"),
            Verb::Post => write!(f, "POST"),
            Verb::Delete => write!(f, "DELETE"),
        }
    }
}

/// How a successful body is parsed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Json,
    /// Bare string, surrounding quotes stripped
    Text,
    Empty,
}

#[derive(Debug)]
pub struct Operation {
    pub name: &'static str,
    pub role: Role,
    pub verb: Verb,
    pub path: &'static str,
    pub query: &'static [(&'static str, &'static str)],
    pub reply: ReplyKind,
}

impl Operation {
    /// Name used in logs and by `find`, e.g. `Supervisor:LoginState`
    pub fn label(&self) -> String {
        format!("{}:{}", self.role, self.name)
    }

    pub fn render_path(&self, state: &SessionState, call: &Call) -> Result<String, ApiClientError> {
        let mut path = self
            .path
            .replace("{userId}", &state.user_id)
            .replace("{orgId}", &state.org_id);
        for (name, value) in &call.params {
            path = path.replace(&format!("{{{}}}", name), &urlencoding::encode(value));
        }
        if path.contains('{') {
            return Err(ApiClientError::Config(format!(
                "{}: unbound parameter in {}",
                self.label(),
                path
            )));
        }
        Ok(path)
    }
}

/// Per call arguments: path parameters, extra query pairs and the JSON body
#[derive(Clone, Debug, Default)]
pub struct Call {
    pub(crate) params: Vec<(String, String)>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<serde_json::Value>,
}

impl Call {
    pub fn new() -> Call {
        Call::default()
    }

    pub fn param(mut self, name: &str, value: &str) -> Call {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query(mut self, name: &str, value: &str) -> Call {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    /// Ignored for GET operations
    pub fn json(mut self, body: serde_json::Value) -> Call {
        self.body = Some(body);
        self
    }

    pub(crate) fn query_pairs(&self, operation: &Operation) -> Vec<(String, String)> {
        operation
            .query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .chain(self.query.iter().cloned())
            .collect()
    }
}

pub mod agent {
    use super::{Operation, ReplyKind, Verb};
    use crate::vcc::Role;

    pub static MAINTENANCE_NOTICES: Operation = Operation {
        name: "MaintenanceNoticesGet",
        role: Role::Agent,
        verb: Verb::Get,
        path: "/agents/{userId}/maintenance_notices",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static MAINTENANCE_NOTICE_ACCEPT: Operation = Operation {
        name: "MaintenanceNoticeAccept",
        role: Role::Agent,
        verb: Verb::Put,
        path: "/agents/{userId}/maintenance_notices/{noticeId}/accept",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static LOGIN_STATE: Operation = Operation {
        name: "LoginState",
        role: Role::Agent,
        verb: Verb::Get,
        path: "/agents/{userId}/login_state",
        query: &[],
        reply: ReplyKind::Text,
    };

    pub static SESSION_START: Operation = Operation {
        name: "SessionStart",
        role: Role::Agent,
        verb: Verb::Put,
        path: "/agents/{userId}/session_start",
        query: &[],
        reply: ReplyKind::Empty,
    };

    pub static LOGOUT: Operation = Operation {
        name: "LogOut",
        role: Role::Agent,
        verb: Verb::Post,
        path: "/auth/logout",
        query: &[],
        reply: ReplyKind::Empty,
    };
}

pub mod supervisor {
    use super::{Operation, ReplyKind, Verb};
    use crate::vcc::Role;

    pub static MAINTENANCE_NOTICES: Operation = Operation {
        name: "MaintenanceNoticesGet",
        role: Role::Supervisor,
        verb: Verb::Get,
        path: "/supervisors/{userId}/maintenance_notices",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static MAINTENANCE_NOTICE_ACCEPT: Operation = Operation {
        name: "MaintenanceNoticeAccept",
        role: Role::Supervisor,
        verb: Verb::Put,
        path: "/supervisors/{userId}/maintenance_notices/{noticeId}/accept",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static LOGIN_STATE: Operation = Operation {
        name: "LoginState",
        role: Role::Supervisor,
        verb: Verb::Get,
        path: "/supervisors/{userId}/login_state",
        query: &[],
        reply: ReplyKind::Text,
    };

    pub static SESSION_START: Operation = Operation {
        name: "SessionStart",
        role: Role::Supervisor,
        verb: Verb::Put,
        path: "/supervisors/{userId}/session_start",
        query: &[],
        reply: ReplyKind::Empty,
    };

    pub static LOGOUT: Operation = Operation {
        name: "LogOut",
        role: Role::Supervisor,
        verb: Verb::Post,
        path: "/auth/logout",
        query: &[],
        reply: ReplyKind::Empty,
    };

    pub static DOMAIN_QUEUES: Operation = Operation {
        name: "DomainQueues",
        role: Role::Supervisor,
        verb: Verb::Get,
        path: "/orgs/{orgId}/skills",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static MIGRATE: Operation = Operation {
        name: "MigrateToMaintenanceHost",
        role: Role::Supervisor,
        verb: Verb::Post,
        path: "/supervisors/{userId}/migrate",
        query: &[("migrateToMaintenanceHost", "true")],
        reply: ReplyKind::Json,
    };

    pub static GET_ALERTS: Operation = Operation {
        name: "GetAlerts",
        role: Role::Supervisor,
        verb: Verb::Get,
        path: "/alerts",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static GET_ALERT: Operation = Operation {
        name: "GetAlert",
        role: Role::Supervisor,
        verb: Verb::Get,
        path: "/alerts/{alertId}",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static CREATE_ALERT: Operation = Operation {
        name: "CreateAlert",
        role: Role::Supervisor,
        verb: Verb::Post,
        path: "/alerts",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static UPDATE_ALERT: Operation = Operation {
        name: "UpdateAlert",
        role: Role::Supervisor,
        verb: Verb::Put,
        path: "/alerts/{alertId}",
        query: &[],
        reply: ReplyKind::Json,
    };

    pub static DELETE_ALERT: Operation = Operation {
        name: "DeleteAlert",
        role: Role::Supervisor,
        verb: Verb::Delete,
        path: "/alerts/{alertId}",
        query: &[],
        reply: ReplyKind::Json,
    };
}

static OPERATIONS: &[&Operation] = &[
    &agent::MAINTENANCE_NOTICES,
    &agent::MAINTENANCE_NOTICE_ACCEPT,
    &agent::LOGIN_STATE,
    &agent::SESSION_START,
    &agent::LOGOUT,
    &supervisor::MAINTENANCE_NOTICES,
    &supervisor::MAINTENANCE_NOTICE_ACCEPT,
    &supervisor::LOGIN_STATE,
    &supervisor::SESSION_START,
    &supervisor::LOGOUT,
    &supervisor::DOMAIN_QUEUES,
    &supervisor::MIGRATE,
    &supervisor::GET_ALERTS,
    &supervisor::GET_ALERT,
    &supervisor::CREATE_ALERT,
    &supervisor::UPDATE_ALERT,
    &supervisor::DELETE_ALERT,
];

/// Finds an operation by its label
pub fn find(label: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().copied().find(|op| op.label() == label)
}

pub fn operations() -> &'static [&'static Operation] {
    OPERATIONS
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceNotice {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub accepted: bool,
}

/// A queue (skill) of the domain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// Operations both roles share, bound to one role
#[derive(Clone, Copy)]
pub struct RoleApi<'a> {
    http: &'a HttpClient,
    role: Role,
}

impl<'a> RoleApi<'a> {
    pub fn new(http: &'a HttpClient, role: Role) -> RoleApi<'a> {
        RoleApi { http, role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn pick(&self, agent: &'static Operation, supervisor: &'static Operation) -> &'static Operation {
        match self.role {
            Role::Agent => agent,
            Role::Supervisor => supervisor,
        }
    }

    pub async fn maintenance_notices(&self) -> Result<Vec<MaintenanceNotice>, ApiClientError> {
        let op = self.pick(&agent::MAINTENANCE_NOTICES, &supervisor::MAINTENANCE_NOTICES);
        self.http.invoke(op, Call::new()).await?.into_json()
    }

    pub async fn accept_maintenance_notice(
        &self,
        notice_id: &str,
    ) -> Result<serde_json::Value, ApiClientError> {
        let op = self.pick(
            &agent::MAINTENANCE_NOTICE_ACCEPT,
            &supervisor::MAINTENANCE_NOTICE_ACCEPT,
        );
        self.http
            .invoke(op, Call::new().param("noticeId", notice_id))
            .await?
            .into_json()
    }

    pub async fn login_state(&self) -> Result<LoginState, ApiClientError> {
        let op = self.pick(&agent::LOGIN_STATE, &supervisor::LOGIN_STATE);
        let state = self.http.invoke(op, Call::new()).await?.into_text()?;
        Ok(LoginState::from(state.as_str()))
    }

    /// Registers `station`; the login state must be `SELECT_STATION`
    pub async fn session_start(&self, station: &Station) -> Result<(), ApiClientError> {
        let op = self.pick(&agent::SESSION_START, &supervisor::SESSION_START);
        let body = json!({
            "state": station.station_state,
            "stationId": station.station_id,
            "stationType": station.station_type,
        });
        self.http.invoke(op, Call::new().json(body)).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ApiClientError> {
        let op = self.pick(&agent::LOGOUT, &supervisor::LOGOUT);
        self.http.invoke(op, Call::new()).await?;
        Ok(())
    }
}

/// Supervisor namespace: the shared role operations plus domain and alert management
#[derive(Clone, Copy)]
pub struct SupervisorApi<'a> {
    role_api: RoleApi<'a>,
}

impl<'a> Deref for SupervisorApi<'a> {
    type Target = RoleApi<'a>;

    fn deref(&self) -> &RoleApi<'a> {
        &self.role_api
    }
}

impl<'a> SupervisorApi<'a> {
    pub fn new(http: &'a HttpClient) -> SupervisorApi<'a> {
        SupervisorApi {
            role_api: RoleApi::new(http, Role::Supervisor),
        }
    }

    async fn json(&self, op: &Operation, call: Call) -> Result<serde_json::Value, ApiClientError> {
        match self.role_api.http.invoke(op, call).await? {
            Reply::Empty => Ok(serde_json::Value::Null),
            reply => reply.into_json(),
        }
    }

    pub async fn domain_queues(&self) -> Result<Vec<QueueInfo>, ApiClientError> {
        self.role_api
            .http
            .invoke(&supervisor::DOMAIN_QUEUES, Call::new())
            .await?
            .into_json()
    }

    pub async fn migrate_to_maintenance_host(&self) -> Result<serde_json::Value, ApiClientError> {
        self.json(&supervisor::MIGRATE, Call::new()).await
    }

    pub async fn get_alerts(&self) -> Result<serde_json::Value, ApiClientError> {
        self.json(&supervisor::GET_ALERTS, Call::new()).await
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<serde_json::Value, ApiClientError> {
        let call = Call::new().param("alertId", alert_id);
        self.json(&supervisor::GET_ALERT, call).await
    }

    pub async fn create_alert(
        &self,
        alert: serde_json::Value,
    ) -> Result<serde_json::Value, ApiClientError> {
        self.json(&supervisor::CREATE_ALERT, Call::new().json(alert))
            .await
    }

    pub async fn update_alert(
        &self,
        alert_id: &str,
        alert: serde_json::Value,
    ) -> Result<serde_json::Value, ApiClientError> {
        let call = Call::new().param("alertId", alert_id).json(alert);
        self.json(&supervisor::UPDATE_ALERT, call).await
    }

    pub async fn delete_alert(&self, alert_id: &str) -> Result<serde_json::Value, ApiClientError> {
        let call = Call::new().param("alertId", alert_id);
        self.json(&supervisor::DELETE_ALERT, call).await
    }
}
