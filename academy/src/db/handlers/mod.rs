//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection or transaction and implements the
//! [`Repository`] trait for one table:
//!
//! - [`EmailLogs`]: outbound email log and delivery status
//! - [`InboxMessages`]: inbound mail received through the provider
//!
//! ```ignore
//! use academy::db::handlers::{EmailLogs, Repository};
//!
//! let mut conn = pool.acquire().await?;
//! let log = EmailLogs::new(&mut conn).create(&request).await?;
//! ```

pub mod email_logs;
pub mod inbox_messages;
pub mod repository;

pub use email_logs::EmailLogs;
pub use inbox_messages::InboxMessages;
pub use repository::Repository;
