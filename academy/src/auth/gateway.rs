//! Client for the managed identity gateway.
//!
//! [`IdentityGateway`] is the narrow set of operations the callback flow consumes. The HTTP
//! implementation speaks the GoTrue REST dialect used by the hosted backend:
//!
//! | Operation | Request |
//! |---|---|
//! | exchange code | `POST /auth/v1/token?grant_type=pkce` |
//! | refresh | `POST /auth/v1/token?grant_type=refresh_token` |
//! | verify access token | `GET /auth/v1/user` |
//!
//! Every request carries the project's anon key in the `apikey` header. The current session is
//! held in memory and every change is announced on the gateway's [`AuthEventBus`].

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    auth::{
        events::{AuthChangeEvent, AuthEvent, AuthEventBus, Subscription},
        session::{Session, User, jwt_expiry},
    },
    config::GatewayConfig,
    http_client::ensure_slash,
    types::abbrev_uuid,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),

    #[error("no PKCE code verifier available for the code exchange")]
    MissingCodeVerifier,

    #[error("invalid gateway URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Identity operations used by the callback reconciler.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Current session, refreshed first if its access token has expired.
    async fn get_session(&self) -> Result<Option<Session>, GatewayError>;

    /// Exchange an authorization code for a session and make it current.
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, GatewayError>;

    /// Install a token pair delivered by the implicit flow as the current session.
    async fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<Session, GatewayError>;

    /// Listen for auth-state changes.
    fn subscribe(&self) -> Subscription;
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

pub struct HttpIdentityGateway {
    client: Client,
    base_url: Url,
    anon_key: String,
    session: ArcSwapOption<Session>,
    code_verifier: ArcSwapOption<String>,
    bus: AuthEventBus,
}

impl HttpIdentityGateway {
    pub fn new(config: &GatewayConfig, client: Client) -> Self {
        Self {
            client,
            base_url: ensure_slash(&config.url),
            anon_key: config.anon_key.clone(),
            session: ArcSwapOption::empty(),
            code_verifier: ArcSwapOption::empty(),
            bus: AuthEventBus::new(),
        }
    }

    /// Use the PKCE verifier stored when the sign-in was started.
    pub fn with_code_verifier(self, verifier: impl Into<String>) -> Self {
        self.set_code_verifier(verifier);
        self
    }

    pub fn set_code_verifier(&self, verifier: impl Into<String>) {
        self.code_verifier.store(Some(Arc::new(verifier.into())));
    }

    /// Access token of the current session, if any.
    pub fn access_token(&self) -> Option<String> {
        self.session.load_full().map(|s| s.access_token.clone())
    }

    fn endpoint(&self, path: &str, grant_type: Option<&str>) -> Result<Url, GatewayError> {
        let mut url = self.base_url.join(path)?;
        if let Some(grant_type) = grant_type {
            url.query_pairs_mut().append_pair("grant_type", grant_type);
        }
        Ok(url)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.anon_key)
    }

    async fn check(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.error_description.or(b.msg).or(b.message).or(b.error))
            .unwrap_or(body);

        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, GatewayError> {
        let url = self.endpoint("auth/v1/token", Some(grant_type))?;
        let response = self.request(self.client.post(url)).json(&body).send().await?;
        let mut session: Session = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if session.expires_at.is_none() {
            session.expires_at = session
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs)
                .or_else(|| jwt_expiry(&session.access_token));
        }
        Ok(session)
    }

    fn install(&self, session: Session, kind: AuthChangeEvent) -> Session {
        self.session.store(Some(Arc::new(session.clone())));
        let delivered = self.bus.publish(AuthEvent::new(kind, Some(session.clone())));
        debug!(event = %kind, user_id = %abbrev_uuid(&session.user.id), delivered, "Session installed");
        session
    }

    fn clear(&self) {
        if self.session.swap(None).is_some() {
            self.bus.publish(AuthEvent::new(AuthChangeEvent::SignedOut, None));
        }
    }

    #[instrument(skip_all, err)]
    async fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        let session = self
            .token_grant("refresh_token", serde_json::json!({ "refresh_token": refresh_token }))
            .await?;
        Ok(self.install(session, AuthChangeEvent::TokenRefreshed))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, GatewayError> {
        let url = self.endpoint("auth/v1/user", None)?;
        let response = self.request(self.client.get(url)).bearer_auth(access_token).send().await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl IdentityGateway for HttpIdentityGateway {
    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        let Some(current) = self.session.load_full() else {
            return Ok(None);
        };

        if !current.is_expired(Utc::now().timestamp()) {
            return Ok(Some(current.as_ref().clone()));
        }

        match self.refresh(&current.refresh_token).await {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Session expired and refresh failed, signing out locally");
                self.clear();
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, err)]
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, GatewayError> {
        let verifier = self.code_verifier.load_full().ok_or(GatewayError::MissingCodeVerifier)?;

        let session = self
            .token_grant(
                "pkce",
                serde_json::json!({ "auth_code": code, "code_verifier": verifier.as_str() }),
            )
            .await?;
        self.code_verifier.store(None);

        info!(user_id = %abbrev_uuid(&session.user.id), "Exchanged authorization code for session");
        Ok(self.install(session, AuthChangeEvent::SignedIn))
    }

    #[instrument(skip_all, err)]
    async fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<Session, GatewayError> {
        let expires_at = jwt_expiry(access_token);
        let now = Utc::now().timestamp();

        if expires_at.is_some_and(|exp| exp <= now) {
            debug!("Provided access token already expired, refreshing");
            return self.refresh(refresh_token).await;
        }

        let user = self.fetch_user(access_token).await?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            token_type: "bearer".to_string(),
            expires_in: expires_at.map(|exp| exp - now),
            expires_at,
            provider_token: None,
            user,
        };

        info!(user_id = %abbrev_uuid(&session.user.id), "Installed session from token pair");
        Ok(self.install(session, AuthChangeEvent::SignedIn))
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }
}
