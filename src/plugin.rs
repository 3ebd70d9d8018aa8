//! Method-channel surface exposed to the application layer

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::keystore::DeviceIdentity;
use crate::prompt::{AuthOutcome, SessionManager};

pub const AUTH_ERROR: &str = "AUTH_ERROR";
pub const KEY_ERROR: &str = "KEY_ERROR";
pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

/// Method names understood by [`FingerprintPlugin::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginMethod {
    AuthenticateOnce,
    GetDeviceIdentifier,
    CancelPrompt,
}

impl PluginMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "authenticateOnce" => Some(Self::AuthenticateOnce),
            "getFingerprintId" | "getDeviceIdentifier" => Some(Self::GetDeviceIdentifier),
            "cancelPrompt" => Some(Self::CancelPrompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginError {
    pub code: String,
    pub message: String,
}

/// Reply shipped back over the channel as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginReply {
    Authenticated { success: bool },
    Identifier { identifier: String },
    Acknowledged { acknowledged: bool },
    Error { error: PluginError },
}

impl PluginReply {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            error: PluginError {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl From<AuthOutcome> for PluginReply {
    fn from(outcome: AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::Succeeded => Self::Authenticated { success: true },
            AuthOutcome::Failed => Self::Authenticated { success: false },
            AuthOutcome::Errored(message) => Self::error(AUTH_ERROR, message),
        }
    }
}

pub struct FingerprintPlugin {
    sessions: SessionManager,
    identity: DeviceIdentity,
}

impl FingerprintPlugin {
    pub fn new(sessions: SessionManager, identity: DeviceIdentity) -> Self {
        Self { sessions, identity }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn handle(&self, method: &str) -> PluginReply {
        let Some(parsed) = PluginMethod::parse(method) else {
            warn!("Unknown plugin method: {}", method);
            return PluginReply::error(NOT_IMPLEMENTED, format!("Method {} is not implemented", method));
        };

        debug!(?parsed, "Plugin call");
        match parsed {
            PluginMethod::AuthenticateOnce => {
                self.sessions.authenticate_once().outcome().await.into()
            }
            PluginMethod::GetDeviceIdentifier => match self.identity.get_device_identifier() {
                Ok(identifier) => PluginReply::Identifier {
                    identifier: identifier.into_inner(),
                },
                Err(e) => PluginReply::error(KEY_ERROR, format!("Failed to get fingerprint ID: {}", e)),
            },
            PluginMethod::CancelPrompt => {
                self.sessions.cancel_prompt();
                PluginReply::Acknowledged { acknowledged: true }
            }
        }
    }
}
