//! Database repository for the outbound email log.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::email_logs::{EmailLog, EmailLogCreateDBRequest, EmailLogDBResponse, EmailLogRow, EmailStatus},
};

const COLUMNS: &str = "id, provider_message_id, recipient, subject, template, status, error, created_at, updated_at";

pub struct EmailLogs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> EmailLogs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Update the delivery status of the email the provider knows as `provider_message_id`.
    ///
    /// Returns `None` when no logged email carries that ID.
    #[instrument(skip(self), err)]
    pub async fn update_status_by_provider_id(
        &mut self,
        provider_message_id: &str,
        status: EmailStatus,
        error: Option<&str>,
    ) -> Result<Option<EmailLogDBResponse>> {
        let row = sqlx::query_as::<_, EmailLogRow>(&format!(
            "UPDATE email_logs
             SET status = $2, error = COALESCE($3, error), updated_at = NOW()
             WHERE provider_message_id = $1
             RETURNING {COLUMNS}"
        ))
        .bind(provider_message_id)
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(&mut *self.db)
        .await?;

        row.map(to_entity).transpose()
    }
}

fn to_entity(row: EmailLogRow) -> Result<EmailLog> {
    EmailLog::try_from(row).map_err(DbError::Other)
}

#[async_trait::async_trait]
impl<'c> Repository for EmailLogs<'c> {
    type CreateRequest = EmailLogCreateDBRequest;
    type Response = EmailLogDBResponse;

    #[instrument(skip(self, request), fields(recipient = %request.recipient, status = %request.status), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let row = sqlx::query_as::<_, EmailLogRow>(&format!(
            "INSERT INTO email_logs (provider_message_id, recipient, subject, template, status, error)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        ))
        .bind(&request.provider_message_id)
        .bind(&request.recipient)
        .bind(&request.subject)
        .bind(&request.template)
        .bind(request.status.as_str())
        .bind(&request.error)
        .fetch_one(&mut *self.db)
        .await?;

        to_entity(row)
    }
}
