//! Database layer for the edge functions.
//!
//! ```text
//! ┌─────────────┐
//! │  Functions  │  (axum handlers)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  MailStore  │  (db::store - Postgres or in-memory)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! Repositories wrap a connection or transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let log = EmailLogs::new(&mut tx).create(&request).await?;
//! tx.commit().await?;
//! ```
//!
//! Migrations live in `migrations/` and are applied with [`crate::migrator`].
//! The `profiles` table read by the callback flow is owned by the hosted backend and is not
//! migrated here.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod store;
