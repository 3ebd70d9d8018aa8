//! Single-shot biometric authentication sessions
//!
//! A session arms the platform prompt once and settles on the first terminal
//! event. Platform callbacks may arrive on any thread, any number of times;
//! every event after the first is dropped without effect.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message carried by a session closed through [`SessionManager::cancel_prompt`]
pub const CANCELLED: &str = "cancelled";

/// Message carried by a session replaced by a newer attempt
pub const SUPERSEDED: &str = "superseded";

/// Terminal result of one authentication attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthOutcome {
    /// The platform verified the user
    Succeeded,
    /// The user was checked and rejected
    Failed,
    /// The attempt could not complete (sensor fault, lockout, cancellation)
    Errored(String),
}

/// Raw event reported by the platform prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Succeeded,
    Failed,
    Error { code: i32, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Prompting,
    Resolved(AuthOutcome),
}

/// Text shown by the platform prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub title: String,
    pub subtitle: String,
    pub negative_button_text: String,
}

impl Default for PromptInfo {
    fn default() -> Self {
        Self {
            title: "Authenticate".to_string(),
            subtitle: "Place your finger on the sensor".to_string(),
            negative_button_text: "Cancel".to_string(),
        }
    }
}

#[derive(Error, Debug)]
#[error("Biometric prompt unavailable: {0}")]
pub struct PromptError(pub String);

/// Platform biometric prompt.
///
/// `authenticate` must return without waiting for the user; results are
/// reported later through the supplied [`PromptCallback`].
pub trait BiometricPrompt: Send + Sync {
    fn authenticate(&self, info: &PromptInfo, callback: PromptCallback) -> Result<(), PromptError>;

    /// Close the prompt if it is showing. Must tolerate being called when it is not.
    fn cancel_authentication(&self);
}

/// State of one authentication attempt
pub struct AuthenticationSession {
    id: Uuid,
    resolved: AtomicBool,
    outcome: OnceLock<AuthOutcome>,
    sender: Mutex<Option<oneshot::Sender<AuthOutcome>>>,
}

impl AuthenticationSession {
    fn new() -> (Arc<Self>, oneshot::Receiver<AuthOutcome>) {
        let (tx, rx) = oneshot::channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            resolved: AtomicBool::new(false),
            outcome: OnceLock::new(),
            sender: Mutex::new(Some(tx)),
        });
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// `None` while the prompt is still pending
    pub fn outcome(&self) -> Option<&AuthOutcome> {
        self.outcome.get()
    }

    /// Settle the session. Returns false when another event got there first.
    fn resolve(&self, outcome: AuthOutcome) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Only the winner of the exchange reaches this point
        let _ = self.outcome.set(outcome.clone());
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            // Caller may have dropped the pending handle; the outcome is still recorded
            let _ = sender.send(outcome);
        }
        true
    }
}

/// Handle the platform uses to report prompt events.
///
/// Cheap to clone and safe to invoke from any thread, any number of times.
#[derive(Clone)]
pub struct PromptCallback {
    session: Arc<AuthenticationSession>,
    prompt: Arc<dyn BiometricPrompt>,
}

impl PromptCallback {
    pub fn on_authentication_succeeded(&self) {
        self.deliver(AuthEvent::Succeeded);
    }

    pub fn on_authentication_failed(&self) {
        self.deliver(AuthEvent::Failed);
    }

    pub fn on_authentication_error(&self, code: i32, message: impl Into<String>) {
        self.deliver(AuthEvent::Error {
            code,
            message: message.into(),
        });
    }

    pub fn deliver(&self, event: AuthEvent) {
        let outcome = match event {
            AuthEvent::Succeeded => AuthOutcome::Succeeded,
            AuthEvent::Failed => AuthOutcome::Failed,
            AuthEvent::Error { code, message } => {
                debug!(session = %self.session.id, code, "Platform reported prompt error");
                AuthOutcome::Errored(message)
            }
        };
        let failed = outcome == AuthOutcome::Failed;

        if !self.session.resolve(outcome) {
            return;
        }
        info!(session = %self.session.id, outcome = ?self.session.outcome(), "Authentication settled");

        // A rejected finger ends the attempt instead of letting the platform retry
        if failed {
            self.prompt.cancel_authentication();
        }
    }
}

/// Awaitable result of [`SessionManager::authenticate_once`]
pub struct PendingAuthentication {
    session: Arc<AuthenticationSession>,
    receiver: oneshot::Receiver<AuthOutcome>,
}

impl PendingAuthentication {
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Outcome if the session already settled, without waiting
    pub fn try_outcome(&self) -> Option<AuthOutcome> {
        self.session.outcome().cloned()
    }

    pub async fn outcome(self) -> AuthOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            // The sender only disappears after resolve() recorded the outcome
            Err(_) => self
                .session
                .outcome()
                .cloned()
                .unwrap_or_else(|| AuthOutcome::Errored(CANCELLED.to_string())),
        }
    }
}

/// Drives biometric prompts, one active session at a time
pub struct SessionManager {
    prompt: Arc<dyn BiometricPrompt>,
    info: PromptInfo,
    active: Mutex<Option<Arc<AuthenticationSession>>>,
}

impl SessionManager {
    pub fn new(prompt: Arc<dyn BiometricPrompt>) -> Self {
        Self::with_prompt_info(prompt, PromptInfo::default())
    }

    pub fn with_prompt_info(prompt: Arc<dyn BiometricPrompt>, info: PromptInfo) -> Self {
        Self {
            prompt,
            info,
            active: Mutex::new(None),
        }
    }

    pub fn prompt_info(&self) -> &PromptInfo {
        &self.info
    }

    /// Arm the platform prompt and return immediately
    pub fn authenticate_once(&self) -> PendingAuthentication {
        let (session, receiver) = AuthenticationSession::new();

        let previous = self.lock_active().replace(session.clone());
        if let Some(previous) = previous {
            if previous.resolve(AuthOutcome::Errored(SUPERSEDED.to_string())) {
                warn!(session = %previous.id, "Pending authentication superseded");
                self.prompt.cancel_authentication();
            }
        }

        let callback = PromptCallback {
            session: session.clone(),
            prompt: self.prompt.clone(),
        };

        debug!(session = %session.id, "Starting biometric prompt");
        if let Err(e) = self.prompt.authenticate(&self.info, callback) {
            warn!(session = %session.id, "Biometric prompt refused to start: {}", e.0);
            session.resolve(AuthOutcome::Errored(e.0));
        }

        PendingAuthentication { session, receiver }
    }

    /// Close the active prompt. No-op when idle or already settled.
    pub fn cancel_prompt(&self) {
        let active = self.lock_active().clone();
        let Some(session) = active else {
            return;
        };

        if session.resolve(AuthOutcome::Errored(CANCELLED.to_string())) {
            info!(session = %session.id, "Authentication cancelled");
            self.prompt.cancel_authentication();
        }
    }

    pub fn state(&self) -> SessionState {
        match self.lock_active().as_ref() {
            None => SessionState::Idle,
            Some(session) => match session.outcome() {
                Some(outcome) => SessionState::Resolved(outcome.clone()),
                None => SessionState::Prompting,
            },
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Arc<AuthenticationSession>>> {
        // The guarded value is a plain Option; a panic elsewhere cannot leave it torn
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
