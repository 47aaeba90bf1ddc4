//! Database repository for inbound mail.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::Result,
    handlers::repository::Repository,
    models::inbox_messages::{InboxMessage, InboxMessageCreateDBRequest, InboxMessageDBResponse},
};

const COLUMNS: &str = "id, from_address, to_address, subject, text_body, html_body, received_at, read";

pub struct InboxMessages<'c> {
    db: &'c mut PgConnection,
}

impl<'c> InboxMessages<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for InboxMessages<'c> {
    type CreateRequest = InboxMessageCreateDBRequest;
    type Response = InboxMessageDBResponse;

    #[instrument(skip(self, request), fields(from = %request.from_address), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let message = sqlx::query_as::<_, InboxMessage>(&format!(
            "INSERT INTO inbox_messages (from_address, to_address, subject, text_body, html_body)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        ))
        .bind(&request.from_address)
        .bind(&request.to_address)
        .bind(&request.subject)
        .bind(&request.text_body)
        .bind(&request.html_body)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(message)
    }
}
