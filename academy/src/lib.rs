//! # academy: auth callback reconciliation and edge functions for the coding school site
//!
//! The school's site runs on a managed backend: a GoTrue-compatible identity service and a
//! PostgREST-compatible data API (together, the *gateway*). This crate holds the pieces that need
//! real logic around that backend.
//!
//! ## OAuth callback
//!
//! After a third-party sign-in the browser lands on the callback page with an error, an
//! authorization code, a token pair, or nothing at all. [`callback::CallbackReconciler`] turns any
//! of these into a session through the [`auth::gateway::IdentityGateway`], waits for the user's
//! profile row to appear via [`auth::profiles::ProfileStore`], and then navigates to the landing
//! page. Every failure ends back at login after a short, visible status message. The reconciler is
//! a single task driven by tokio timers, so it can be tested under paused time and run headlessly
//! from the CLI (`academy callback <url>`).
//!
//! ## Edge functions
//!
//! Small HTTP handlers served under `/functions/v1` (see [`functions`]):
//!
//! - `POST /send-email`: transactional mail through [`email::EmailService`], recorded in the
//!   email log
//! - `POST /email-events`: provider delivery webhooks, verified with Standard Webhooks signatures
//!   ([`webhooks`]) and applied to the email log
//! - `POST /inbound-email`: inbound mail stored in the inbox
//! - `GET /oauth-exchange`: authorization-code exchange proxy feeding the callback page
//!
//! Storage goes through [`db::store::MailStore`]; Postgres in production, in-memory for tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use academy::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = academy::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     academy::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod auth;
pub mod callback;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod functions;
pub mod http_client;
pub mod telemetry;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    http::{self, HeaderName, HeaderValue, Method},
    routing::get,
};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};

use crate::{
    auth::{
        gateway::HttpIdentityGateway,
        profiles::{PgProfileStore, ProfileStore, RestProfileStore},
    },
    callback::{CallbackHost, CallbackReconciler},
    config::{CorsOrigin, ProfileLookup},
    db::store::{MailStore, PgMailStore},
    email::EmailService,
};

pub use types::UserId;

/// Shared state for the edge function handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .email(Arc::new(EmailService::new(&config.email)?))
///     .store(Arc::new(MemoryMailStore::new()))
///     .http(client)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub email: Arc<EmailService>,
    pub store: Arc<dyn MailStore>,
    /// Outbound client for the OAuth token endpoint
    pub http: reqwest::Client,
}

/// Get the academy database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("database.url is required to serve the edge functions. Set DATABASE_URL."))?;

    let settings = &config.database.pool;
    let non_zero = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(non_zero(settings.idle_timeout_secs))
        .max_lifetime(non_zero(settings.max_lifetime_secs))
        .connect(url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Wire a callback reconciler to the configured gateway and profile lookup.
///
/// `code_verifier` is the PKCE verifier stored when the sign-in was started. Without it a `code`
/// redirect cannot be exchanged and ends in an authorization error.
pub async fn callback_reconciler(
    config: &Config,
    code_verifier: Option<String>,
    host: Arc<dyn CallbackHost>,
) -> anyhow::Result<CallbackReconciler> {
    let client = http_client::build(config.gateway.request_timeout)?;

    let mut gateway = HttpIdentityGateway::new(&config.gateway, client.clone());
    if let Some(verifier) = code_verifier.filter(|v| !v.is_empty()) {
        gateway = gateway.with_code_verifier(verifier);
    }
    let gateway = Arc::new(gateway);

    let profiles: Arc<dyn ProfileStore> = match config.callback.profile_lookup {
        ProfileLookup::Rest => Arc::new(RestProfileStore::new(&config.gateway, client).with_gateway(gateway.clone())),
        ProfileLookup::Database => {
            let database_url = config
                .database
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("profile_lookup is 'database' but database.url is not set"))?;
            Arc::new(PgProfileStore::new(PgPool::connect(database_url).await?))
        }
    };

    Ok(CallbackReconciler::new(gateway, profiles, host, config.callback.clone()))
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            http::header::CONTENT_TYPE,
            http::header::AUTHORIZATION,
            HeaderName::from_static("apikey"),
            HeaderName::from_static("x-client-info"),
        ])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers([http::header::LOCATION]);

    // tower-http refuses "*" inside an origin list
    if cors_config.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        cors = cors.allow_origin(Any);
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        cors = cors.allow_origin(origins);
    }

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the router: health check, the edge functions, CORS and request tracing.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/functions/v1", functions::router())
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// The edge function server.
///
/// 1. **Create**: [`Application::new`] connects to Postgres and runs migrations;
///    [`Application::with_store`] skips the database and uses the given store
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown future resolves, in-flight requests finish and the pool closes
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
}

impl Application {
    /// Create the application backed by the configured database.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting edge functions with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;
        let store = Arc::new(PgMailStore::new(pool.clone()));

        let mut app = Self::with_store(config, store)?;
        app.pool = Some(pool);
        Ok(app)
    }

    /// Create the application on top of an existing store.
    pub fn with_store(config: Config, store: Arc<dyn MailStore>) -> anyhow::Result<Self> {
        let email = Arc::new(EmailService::new(&config.email)?);
        let http = http_client::build(config.gateway.request_timeout)?;

        let state = AppState::builder()
            .config(config.clone())
            .email(email)
            .store(store)
            .http(http)
            .build();

        let router = build_router(state)?;

        Ok(Self { router, config, pool: None })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Edge functions listening on http://{}, available at http://localhost:{}/functions/v1",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        Ok(())
    }
}
