//! Edge functions served under `/functions/v1`.
//!
//! - [`email`]: `send-email`, `email-events` (provider delivery webhooks), `inbound-email`
//! - [`oauth`]: `oauth-exchange`, the authorization-code exchange proxy
//! - [`models`]: request and response bodies

pub mod email;
pub mod models;
pub mod oauth;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

/// Routes relative to the `/functions/v1` mount point.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send-email", post(email::send_email))
        .route("/email-events", post(email::email_events))
        .route("/inbound-email", post(email::inbound_email))
        .route("/oauth-exchange", get(oauth::oauth_exchange))
}
