//! States, outcomes and failure taxonomy of the callback reconciler.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use thiserror::Error;

use crate::{auth::profiles::Role, config::CallbackConfig, types::UserId};

/// Where the reconciler currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCallbackState {
    Init,
    Error,
    ExchangingCode,
    SettingSession,
    AwaitingAsyncSignIn,
    AwaitingProfile,
    Redirecting,
    Terminal,
}

/// Status line shown to the user while the callback page is visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Processing,
    Error(String),
    Success,
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => f.write_str("processing"),
            Self::Error(message) => f.write_str(message),
            Self::Success => f.write_str("success"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The identity provider redirected back with an error.
    #[error("identity provider error {error}: {}", description.as_deref().unwrap_or("no description"))]
    Provider { error: String, description: Option<String> },

    /// Code exchange, set-session or its verification failed.
    #[error("session exchange failed: {0}")]
    Exchange(String),

    #[error("profile for user {user_id} not found after {attempts} attempts")]
    ProfileTimeout { user_id: UserId, attempts: u32 },

    #[error("no sign-in event within {0:?}")]
    SessionTimeout(Duration),
}

impl CallbackError {
    /// Short human-readable status for the page.
    pub fn status_message(&self) -> String {
        match self {
            Self::Provider { error, description } => description.clone().unwrap_or_else(|| error.clone()),
            Self::Exchange(_) => "authorization error".to_string(),
            Self::ProfileTimeout { .. } => "profile creation failed".to_string(),
            Self::SessionTimeout(_) => "session not found".to_string(),
        }
    }

    /// How long the status stays visible before returning to login.
    pub fn redirect_delay(&self, config: &CallbackConfig) -> Duration {
        match self {
            Self::Provider { .. } => config.provider_error_delay,
            _ => config.failure_delay,
        }
    }
}

/// Result of one reconciler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Session and profile confirmed, navigated to the landing page.
    Redirected { user_id: UserId, role: Role, to: String },
    /// Failed and navigated back to login.
    Failed(CallbackError),
    /// Another run on the same reconciler already claimed the callback.
    AlreadyProcessed,
    /// Torn down before reaching a navigation.
    Cancelled,
}

/// Single-use guard: the first `claim` wins, all later ones lose.
#[derive(Debug, Default)]
pub struct OneShot(AtomicBool);

impl OneShot {
    pub fn claim(&self) -> bool {
        self.0.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
