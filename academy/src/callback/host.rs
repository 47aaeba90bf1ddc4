//! The page hosting the callback: status line, history and navigation.

use tracing::info;

use crate::callback::state::CallbackStatus;

/// Side effects the reconciler performs on the page that received the redirect.
pub trait CallbackHost: Send + Sync {
    fn set_status(&self, status: CallbackStatus);

    /// Replace the current history entry without navigating.
    fn replace_url(&self, path: &str);

    fn navigate(&self, path: &str);
}

/// Host for headless runs: every effect becomes a log line.
#[derive(Debug, Default)]
pub struct TracingHost;

impl CallbackHost for TracingHost {
    fn set_status(&self, status: CallbackStatus) {
        info!(%status, "Callback status");
    }

    fn replace_url(&self, path: &str) {
        info!(path, "History entry replaced");
    }

    fn navigate(&self, path: &str) {
        info!(path, "Navigating");
    }
}
