//! Common type definitions.
//!
//! # ID Types
//!
//! Entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: identity gateway user, also the primary key of the `profiles` table
//! - [`EmailLogId`]: row in the outbound email log
//! - [`InboxMessageId`]: row in the inbound mail inbox
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging
//! - [`redact`]: Mask credentials before they reach a log line

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type EmailLogId = Uuid;
pub type InboxMessageId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Mask a secret value for logging, keeping only the first four characters.
///
/// Values of eight characters or fewer are masked entirely.
pub fn redact(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}***")
}
