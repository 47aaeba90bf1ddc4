//! Storage seam used by the edge functions.
//!
//! Handlers talk to a [`MailStore`] rather than a pool so that the routes can be exercised without
//! Postgres. [`PgMailStore`] runs the repositories inside a transaction; [`MemoryMailStore`] keeps
//! everything in concurrent maps and mirrors the table constraints that the handlers rely on.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    handlers::{EmailLogs, InboxMessages, Repository},
    models::{
        email_logs::{EmailLog, EmailLogCreateDBRequest, EmailLogUpdateDBRequest},
        inbox_messages::{InboxMessage, InboxMessageCreateDBRequest},
    },
};

#[async_trait]
pub trait MailStore: Send + Sync {
    /// Record an outbound email.
    async fn record_email(&self, request: &EmailLogCreateDBRequest) -> Result<EmailLog>;

    /// Apply a delivery status change reported by the provider. `None` when the message is unknown.
    async fn update_email_status(&self, provider_message_id: &str, update: &EmailLogUpdateDBRequest) -> Result<Option<EmailLog>>;

    /// Store an inbound message.
    async fn store_inbound(&self, request: &InboxMessageCreateDBRequest) -> Result<InboxMessage>;
}

#[derive(Clone, Debug)]
pub struct PgMailStore {
    pool: PgPool,
}

impl PgMailStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailStore for PgMailStore {
    #[instrument(skip_all, err)]
    async fn record_email(&self, request: &EmailLogCreateDBRequest) -> Result<EmailLog> {
        let mut tx = self.pool.begin().await?;
        let log = EmailLogs::new(&mut tx).create(request).await?;
        tx.commit().await?;
        Ok(log)
    }

    #[instrument(skip(self, update), fields(status = %update.status), err)]
    async fn update_email_status(&self, provider_message_id: &str, update: &EmailLogUpdateDBRequest) -> Result<Option<EmailLog>> {
        let mut conn = self.pool.acquire().await?;
        EmailLogs::new(&mut conn)
            .update_status_by_provider_id(provider_message_id, update.status, update.error.as_deref())
            .await
    }

    #[instrument(skip_all, err)]
    async fn store_inbound(&self, request: &InboxMessageCreateDBRequest) -> Result<InboxMessage> {
        let mut tx = self.pool.begin().await?;
        let message = InboxMessages::new(&mut tx).create(request).await?;
        tx.commit().await?;
        Ok(message)
    }
}

/// In-memory store, used by tests and for running the functions without a database.
#[derive(Debug, Default)]
pub struct MemoryMailStore {
    emails: DashMap<Uuid, EmailLog>,
    inbox: DashMap<Uuid, InboxMessage>,
}

impl MemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email_logs(&self) -> Vec<EmailLog> {
        let mut logs: Vec<_> = self.emails.iter().map(|entry| entry.value().clone()).collect();
        logs.sort_by_key(|log| log.created_at);
        logs
    }

    pub fn find_by_provider_id(&self, provider_message_id: &str) -> Option<EmailLog> {
        self.emails
            .iter()
            .find(|entry| entry.provider_message_id.as_deref() == Some(provider_message_id))
            .map(|entry| entry.value().clone())
    }

    pub fn inbox(&self) -> Vec<InboxMessage> {
        let mut messages: Vec<_> = self.inbox.iter().map(|entry| entry.value().clone()).collect();
        messages.sort_by_key(|message| message.received_at);
        messages
    }
}

#[async_trait]
impl MailStore for MemoryMailStore {
    async fn record_email(&self, request: &EmailLogCreateDBRequest) -> Result<EmailLog> {
        if let Some(provider_id) = &request.provider_message_id
            && self.find_by_provider_id(provider_id).is_some()
        {
            return Err(DbError::UniqueViolation {
                constraint: Some("email_logs_provider_message_id_unique".to_string()),
                table: Some("email_logs".to_string()),
                message: format!("duplicate provider message id {provider_id}"),
            });
        }

        let now = Utc::now();
        let log = EmailLog {
            id: Uuid::new_v4(),
            provider_message_id: request.provider_message_id.clone(),
            recipient: request.recipient.clone(),
            subject: request.subject.clone(),
            template: request.template.clone(),
            status: request.status,
            error: request.error.clone(),
            created_at: now,
            updated_at: now,
        };
        self.emails.insert(log.id, log.clone());
        Ok(log)
    }

    async fn update_email_status(&self, provider_message_id: &str, update: &EmailLogUpdateDBRequest) -> Result<Option<EmailLog>> {
        let Some(mut entry) = self
            .emails
            .iter_mut()
            .find(|entry| entry.provider_message_id.as_deref() == Some(provider_message_id))
        else {
            return Ok(None);
        };

        entry.status = update.status;
        if update.error.is_some() {
            entry.error = update.error.clone();
        }
        entry.updated_at = Utc::now();
        Ok(Some(entry.value().clone()))
    }

    async fn store_inbound(&self, request: &InboxMessageCreateDBRequest) -> Result<InboxMessage> {
        let message = InboxMessage {
            id: Uuid::new_v4(),
            from_address: request.from_address.clone(),
            to_address: request.to_address.clone(),
            subject: request.subject.clone(),
            text_body: request.text_body.clone(),
            html_body: request.html_body.clone(),
            received_at: Utc::now(),
            read: false,
        };
        self.inbox.insert(message.id, message.clone());
        Ok(message)
    }
}
