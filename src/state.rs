use crate::api::ApiClientError;
use crate::vcc::Channel;

/// Lifecycle of one role socket. `Reconnecting` re-enters `Connecting` without touching the
/// handler registry or the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected(String),
    Connecting(String),
    Connected(String),
    Reconnecting(String),
    Disconnecting(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum StateResponse {
    Reply(String),
    Reconnect(String),
    None,
}

#[macro_export]
macro_rules! nullstr {
    () => {
        "".to_string()
    };
}

#[macro_export]
macro_rules! state_log {
    ($token:literal) => {
        ($token).to_string()
    };
}

impl State {
    pub async fn evaluate(self, client: &mut dyn Channel) -> Result<State, ApiClientError> {
        log::debug!("{} socket in state {:?}", client.role(), self);
        match self {
            State::Disconnected(_) => Ok(State::Connecting(nullstr!())),

            // Connect failures surface to the caller, retry policy is theirs
            State::Connecting(_) => match client.connect().await? {
                StateResponse::Reply(data) => Ok(State::Connected(data)),
                StateResponse::Reconnect(reason) => Ok(State::Reconnecting(reason)),
                StateResponse::None => Ok(State::Connected(nullstr!())),
            },

            State::Connected(_) => match client.listen().await {
                Ok(StateResponse::Reconnect(reason)) => Ok(State::Reconnecting(reason)),
                Ok(StateResponse::Reply(data)) => Ok(State::Disconnecting(data)),
                Ok(StateResponse::None) => Ok(State::Disconnecting(nullstr!())),
                Err(e) => {
                    if let Err(close_err) = client.disconnect().await {
                        log::warn!("Close after failure also failed: {}", close_err);
                    }
                    Err(e)
                }
            },

            State::Reconnecting(_) => {
                client.disconnect().await?;
                Ok(State::Connecting(state_log!("reconnecting")))
            }

            State::Disconnecting(_) => {
                client.disconnect().await?;
                Ok(State::Disconnected(state_log!("closed")))
            }
        }
    }
}
