//! Request and response bodies for the edge functions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::email_logs::EmailStatus,
    email::EmailTemplate,
    types::{EmailLogId, InboxMessageId},
};

/// One address or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(address) => vec![address],
            Self::Many(addresses) => addresses,
        }
    }
}

/// Body of `POST /send-email`.
///
/// Either `template` or an explicit `subject` with at least one of `html`/`text` is required.
/// Explicit fields override what the template renders.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendEmailRequest {
    pub to: Recipients,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template: Option<EmailTemplate>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendEmailResponse {
    pub id: EmailLogId,
    pub status: EmailStatus,
}

/// Delivery event posted by the email provider.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub data: EmailEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailEventData {
    pub email_id: String,
    #[serde(default)]
    pub bounce: Option<BounceDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BounceDetails {
    #[serde(default)]
    pub message: Option<String>,
}

impl EmailEvent {
    /// Status this event moves the email to, or `None` for event types we don't track.
    pub fn status(&self) -> Option<EmailStatus> {
        match self.event_type.as_str() {
            "email.sent" => Some(EmailStatus::Sent),
            "email.delivered" => Some(EmailStatus::Delivered),
            "email.delivery_delayed" => Some(EmailStatus::Delayed),
            "email.bounced" => Some(EmailStatus::Bounced),
            "email.complained" => Some(EmailStatus::Complained),
            "email.opened" => Some(EmailStatus::Opened),
            "email.clicked" => Some(EmailStatus::Clicked),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        self.data.bounce.as_ref().and_then(|bounce| bounce.message.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventAck {
    pub received: bool,
    /// Whether an email log entry was updated
    pub updated: bool,
}

/// Body of `POST /inbound-email`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundEmailResponse {
    pub id: InboxMessageId,
}

/// Query string the OAuth provider redirects back with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthExchangeQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Form body of the `authorization_code` grant.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<&'a str>,
    pub code: &'a str,
}

/// Token endpoint answer. Some providers report errors with a 200 and an `error` field.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub provider_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}
