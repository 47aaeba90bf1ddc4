//! Database models for inbound mail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::types::InboxMessageId;

/// Database entity model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct InboxMessage {
    pub id: InboxMessageId,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub read: bool,
}

/// Request for storing an inbound message
#[derive(Debug, Clone)]
pub struct InboxMessageCreateDBRequest {
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
}

/// Response type (same as entity for now)
pub type InboxMessageDBResponse = InboxMessage;
