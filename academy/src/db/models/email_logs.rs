//! Database models for the outbound email log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};

use crate::types::EmailLogId;

/// Delivery status of an outbound email.
///
/// `Queued` is the initial state; the send function moves it to `Sent` or `Failed`, and the
/// provider's delivery webhooks move it through the remaining states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Queued,
    Sent,
    Delivered,
    Delayed,
    Bounced,
    Complained,
    Opened,
    Clicked,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Delayed => "delayed",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "delayed" => Ok(Self::Delayed),
            "bounced" => Ok(Self::Bounced),
            "complained" => Ok(Self::Complained),
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown email status: {s}")),
        }
    }
}

/// Raw row as stored in `email_logs`
#[derive(Debug, Clone, FromRow)]
pub struct EmailLogRow {
    pub id: EmailLogId,
    pub provider_message_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub template: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Email log entry with a typed status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailLog {
    pub id: EmailLogId,
    pub provider_message_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub template: Option<String>,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EmailLogRow> for EmailLog {
    type Error = anyhow::Error;

    fn try_from(row: EmailLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            id: row.id,
            provider_message_id: row.provider_message_id,
            recipient: row.recipient,
            subject: row.subject,
            template: row.template,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Request for recording an email
#[derive(Debug, Clone)]
pub struct EmailLogCreateDBRequest {
    pub provider_message_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub template: Option<String>,
    pub status: EmailStatus,
    pub error: Option<String>,
}

/// Request for updating delivery status
#[derive(Debug, Clone)]
pub struct EmailLogUpdateDBRequest {
    pub status: EmailStatus,
    pub error: Option<String>,
}

/// Response type (typed entity)
pub type EmailLogDBResponse = EmailLog;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [EmailStatus::Queued, EmailStatus::Delayed, EmailStatus::Complained, EmailStatus::Failed] {
            assert_eq!(status.as_str().parse::<EmailStatus>().unwrap(), status);
        }
        assert!("lost".parse::<EmailStatus>().is_err());
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let now = Utc::now();
        let row = EmailLogRow {
            id: uuid::Uuid::new_v4(),
            provider_message_id: None,
            recipient: "a@example.com".into(),
            subject: "Hi".into(),
            template: None,
            status: "archived".into(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        assert!(EmailLog::try_from(row).is_err());
    }
}
