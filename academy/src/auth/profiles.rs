//! Profile lookup.
//!
//! Profile rows are created by a trigger in the hosted database some time after a user first
//! signs in, so callers treat "not found" as a transient state and poll.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::{
    auth::gateway::HttpIdentityGateway,
    config::GatewayConfig,
    http_client::ensure_slash,
    types::{UserId, abbrev_uuid},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Student,
}

impl Role {
    /// Only the exact `admin` value grants admin; anything else, including a missing role, is the default.
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("admin") => Self::Admin,
            _ => Self::Student,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: UserId,
    pub email: Option<String>,
    pub role: Role,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Row shape shared by the REST and SQL lookups.
#[derive(Debug, Clone, FromRow, Deserialize)]
pub struct ProfileRow {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            role: Role::from_db(row.role.as_deref()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("profile endpoint returned {status}")]
    Api { status: u16 },

    #[error("profile query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid profile URL: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profile(&self, user_id: UserId) -> Result<Option<Profile>, ProfileError>;
}

/// Reads `profiles` through the gateway's PostgREST endpoint.
pub struct RestProfileStore {
    client: Client,
    base_url: Url,
    anon_key: String,
    gateway: Option<Arc<HttpIdentityGateway>>,
}

impl RestProfileStore {
    pub fn new(config: &GatewayConfig, client: Client) -> Self {
        Self {
            client,
            base_url: ensure_slash(&config.url),
            anon_key: config.anon_key.clone(),
            gateway: None,
        }
    }

    /// Authorise lookups with the gateway's current session instead of the anon key, so that
    /// row-level security lets a user read their own profile.
    pub fn with_gateway(mut self, gateway: Arc<HttpIdentityGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn find_profile(&self, user_id: UserId) -> Result<Option<Profile>, ProfileError> {
        let mut url = self.base_url.join("rest/v1/profiles")?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{user_id}"))
            .append_pair("select", "id,email,role");

        let bearer = self
            .gateway
            .as_ref()
            .and_then(|gateway| gateway.access_token())
            .unwrap_or_else(|| self.anon_key.clone());

        let response = self
            .client
            .get(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileError::Api { status: status.as_u16() });
        }

        let rows: Vec<ProfileRow> = response.json().await?;
        Ok(rows.into_iter().next().map(Profile::from))
    }
}

/// Reads `profiles` straight from Postgres.
#[derive(Clone, Debug)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn find_profile(&self, user_id: UserId) -> Result<Option<Profile>, ProfileError> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT id, email, role FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Profile::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    fn store(server: &MockServer) -> RestProfileStore {
        let config = GatewayConfig {
            url: Url::parse(&server.uri()).unwrap(),
            anon_key: "anon-key".to_string(),
            request_timeout: Duration::from_secs(5),
        };
        RestProfileStore::new(&config, http_client::build(config.request_timeout).unwrap())
    }

    #[test]
    fn test_only_exact_admin_role_is_admin() {
        assert_eq!(Role::from_db(Some("admin")), Role::Admin);
        assert_eq!(Role::from_db(Some("ADMIN")), Role::Student);
        assert_eq!(Role::from_db(Some(" admin")), Role::Student);
        assert_eq!(Role::from_db(Some("teacher")), Role::Student);
        assert_eq!(Role::from_db(None), Role::Student);
    }

    #[tokio::test]
    async fn test_rest_lookup_found() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", format!("eq.{user_id}").as_str()))
            .and(query_param("select", "id,email,role"))
            .and(header("apikey", "anon-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "id": user_id, "email": "admin@school.example", "role": "admin" }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let profile = store(&server).find_profile(user_id).await.unwrap().unwrap();
        assert_eq!(profile.id, user_id);
        assert!(profile.is_admin());
    }

    #[tokio::test]
    async fn test_rest_lookup_empty_array_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        assert!(store(&server).find_profile(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rest_lookup_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = store(&server).find_profile(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProfileError::Api { status: 503 }));
    }
}
