//! Database record structures matching table schemas.

pub mod email_logs;
pub mod inbox_messages;
