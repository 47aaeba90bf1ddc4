//! Shared shape of the table repositories.

use crate::db::errors::Result;

/// Data access for one Postgres table, borrowed from a connection or transaction.
///
/// Only inserts go through the trait. Table-specific writes, such as a delivery status change keyed
/// by the provider's message id, are inherent methods on the repository.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type Response;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;
}
