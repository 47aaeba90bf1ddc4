//! OAuth authorization-code exchange proxy.
//!
//! The provider redirects here with `?code=...`. The code is exchanged at the configured token
//! endpoint with the client secret, which never reaches the browser, and the browser is sent on to
//! the callback page with the tokens in the URL fragment, where the callback reconciler picks them
//! up as a token pair.

use axum::{
    extract::{Query, State},
    http::header,
    response::Redirect,
};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    AppState,
    config::OAuthProxyConfig,
    errors::{Error, Result},
    functions::models::{OAuthExchangeQuery, TokenRequest, TokenResponse},
    types::redact,
};

#[derive(Debug, Error)]
enum ExchangeError {
    #[error("token endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {0}")]
    Status(u16),

    #[error("{}", description.as_deref().unwrap_or(error))]
    Provider { error: String, description: Option<String> },

    #[error("token response had no access token")]
    MissingToken,

    #[error("token response had no refresh token, so no session can be established")]
    MissingRefreshToken,

    #[error("could not encode token request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),

    #[error("OAuth exchange is not configured")]
    NotConfigured,
}

impl ExchangeError {
    fn code(&self) -> &str {
        match self {
            Self::Provider { error, .. } => error,
            Self::NotConfigured => "server_error",
            _ => "exchange_failed",
        }
    }
}

/// `GET /oauth-exchange`
#[instrument(skip_all, err)]
pub async fn oauth_exchange(State(state): State<AppState>, Query(query): Query<OAuthExchangeQuery>) -> Result<Redirect> {
    let oauth = &state.config.oauth;
    if !oauth.enabled {
        return Err(Error::NotFound {
            resource: "function".to_string(),
            id: "oauth-exchange".to_string(),
        });
    }

    let callback = state.config.callback_url().map_err(|e| Error::Internal {
        operation: format!("build callback URL: {e}"),
    })?;

    if let Some(error) = query.error.filter(|e| !e.is_empty()) {
        warn!(%error, "Provider returned an error to the exchange proxy");
        return Ok(error_redirect(callback, &error, query.error_description.as_deref()));
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Ok(error_redirect(callback, "invalid_request", Some("missing authorization code")));
    };

    match exchange_code(&state.http, oauth, &code).await {
        Ok(tokens) => Ok(success_redirect(callback, tokens)),
        Err(e) => {
            warn!(error = %e, "Authorization code exchange failed");
            Ok(error_redirect(callback, e.code(), Some(&e.to_string())))
        }
    }
}

async fn exchange_code(client: &reqwest::Client, oauth: &OAuthProxyConfig, code: &str) -> std::result::Result<ExchangedTokens, ExchangeError> {
    let token_url = oauth.token_url.as_ref().ok_or(ExchangeError::NotConfigured)?;

    let form = serde_urlencoded::to_string(TokenRequest {
        grant_type: "authorization_code",
        client_id: &oauth.client_id,
        client_secret: oauth.client_secret.as_deref(),
        redirect_uri: oauth.redirect_uri.as_ref().map(Url::as_str),
        code,
    })?;

    let response = client
        .post(token_url.clone())
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::ACCEPT, "application/json")
        .body(form)
        .send()
        .await?;

    let status = response.status();
    let body: Option<TokenResponse> = response.json().await.ok();

    // Error bodies win over the status so the provider's own reason reaches the callback page
    if let Some(TokenResponse { error: Some(error), error_description, .. }) = &body {
        return Err(ExchangeError::Provider {
            error: error.clone(),
            description: error_description.clone(),
        });
    }
    if !status.is_success() {
        return Err(ExchangeError::Status(status.as_u16()));
    }

    let tokens = body.ok_or(ExchangeError::MissingToken)?;
    let access_token = tokens.access_token.filter(|t| !t.is_empty()).ok_or(ExchangeError::MissingToken)?;
    // The callback page only installs a full token pair
    let refresh_token = tokens
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or(ExchangeError::MissingRefreshToken)?;
    info!(access_token = %redact(&access_token), "Authorization code exchanged");

    Ok(ExchangedTokens {
        provider_token: tokens.provider_token.unwrap_or_else(|| access_token.clone()),
        refresh_token,
        token_type: tokens.token_type.unwrap_or_else(|| "bearer".to_string()),
        expires_in: tokens.expires_in,
        access_token,
    })
}

struct ExchangedTokens {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_in: Option<i64>,
    provider_token: String,
}

fn success_redirect(mut callback: Url, tokens: ExchangedTokens) -> Redirect {
    let mut pairs = vec![
        ("access_token", tokens.access_token),
        ("refresh_token", tokens.refresh_token),
        ("token_type", tokens.token_type),
    ];
    if let Some(expires_in) = tokens.expires_in {
        pairs.push(("expires_in", expires_in.to_string()));
    }
    pairs.push(("provider_token", tokens.provider_token));

    let fragment = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
    callback.set_fragment(Some(&fragment));
    Redirect::to(callback.as_str())
}

fn error_redirect(mut callback: Url, error: &str, description: Option<&str>) -> Redirect {
    {
        let mut query = callback.query_pairs_mut();
        query.append_pair("error", error);
        if let Some(description) = description {
            query.append_pair("error_description", description);
        }
    }
    Redirect::to(callback.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        callback::{CallbackParams, params::RedirectShape},
        config::Config,
        test_utils::{create_test_app, create_test_config},
    };
    use axum::http::StatusCode;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header as header_matcher, method, path},
    };

    fn proxy_config(token_url: &str) -> Config {
        let mut config = create_test_config();
        config.site_url = Url::parse("https://school.example").unwrap();
        config.oauth.enabled = true;
        config.oauth.token_url = Some(Url::parse(token_url).unwrap());
        config.oauth.client_id = "client-123".to_string();
        config.oauth.client_secret = Some("shh".to_string());
        config.oauth.redirect_uri = Some(Url::parse("https://fn.example/functions/v1/oauth-exchange").unwrap());
        config
    }

    fn location(response: &axum_test::TestResponse) -> Url {
        let location = response.headers().get("location").expect("redirect has a location");
        Url::parse(location.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_proxy_is_not_found() {
        let (server, _store) = create_test_app(create_test_config());
        let response = server.get("/functions/v1/oauth-exchange").add_query_param("code", "abc").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_code_is_exchanged_and_tokens_land_in_fragment() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(header_matcher("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("client_id=client-123"))
            .and(body_string_contains("client_secret=shh"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("redirect_uri=https%3A%2F%2Ffn.example%2Ffunctions%2Fv1%2Foauth-exchange"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_access",
                "refresh_token": "ghr_refresh",
                "token_type": "bearer",
                "expires_in": 28800
            })))
            .expect(1)
            .mount(&provider)
            .await;

        let (server, _store) = create_test_app(proxy_config(&format!("{}/login/oauth/access_token", provider.uri())));
        let response = server
            .get("/functions/v1/oauth-exchange")
            .add_query_param("code", "the-code")
            .add_query_param("state", "xyz")
            .await;

        response.assert_status(StatusCode::SEE_OTHER);
        let target = location(&response);
        assert_eq!(target.origin().ascii_serialization(), "https://school.example");
        assert_eq!(target.path(), "/auth/callback");

        let params = CallbackParams::from_url(&target);
        assert_eq!(params.shape(), RedirectShape::TokenPair);
        let (access, refresh) = params.token_pair().unwrap();
        assert_eq!(access, "gho_access");
        assert_eq!(refresh, "ghr_refresh");
        assert!(target.fragment().unwrap().contains("provider_token=gho_access"));
        assert!(target.fragment().unwrap().contains("expires_in=28800"));
    }

    #[tokio::test]
    async fn test_provider_error_is_forwarded_without_exchange() {
        let provider = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&provider).await;

        let (server, _store) = create_test_app(proxy_config(&format!("{}/token", provider.uri())));
        let response = server
            .get("/functions/v1/oauth-exchange")
            .add_query_param("error", "access_denied")
            .add_query_param("error_description", "The user denied access")
            .await;

        response.assert_status(StatusCode::SEE_OTHER);
        let target = location(&response);
        let params = CallbackParams::from_url(&target);
        assert_eq!(params.shape(), RedirectShape::Error);
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("The user denied access"));
    }

    #[tokio::test]
    async fn test_error_body_from_token_endpoint_redirects_with_reason() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&provider)
            .await;

        let (server, _store) = create_test_app(proxy_config(&format!("{}/token", provider.uri())));
        let response = server.get("/functions/v1/oauth-exchange").add_query_param("code", "stale").await;

        let params = CallbackParams::from_url(&location(&response));
        assert_eq!(params.error.as_deref(), Some("bad_verification_code"));
        assert_eq!(params.error_description.as_deref(), Some("The code passed is incorrect or expired."));
    }

    #[tokio::test]
    async fn test_failed_exchange_redirects_with_error() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&provider)
            .await;

        let (server, _store) = create_test_app(proxy_config(&format!("{}/token", provider.uri())));
        let response = server.get("/functions/v1/oauth-exchange").add_query_param("code", "abc").await;

        response.assert_status(StatusCode::SEE_OTHER);
        let params = CallbackParams::from_url(&location(&response));
        assert_eq!(params.error.as_deref(), Some("exchange_failed"));
        assert!(params.error_description.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn test_access_token_without_refresh_token_is_exchange_failure() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_access",
                "token_type": "bearer",
                "scope": "read:user"
            })))
            .expect(1)
            .mount(&provider)
            .await;

        let (server, _store) = create_test_app(proxy_config(&format!("{}/token", provider.uri())));
        let response = server.get("/functions/v1/oauth-exchange").add_query_param("code", "abc").await;

        response.assert_status(StatusCode::SEE_OTHER);
        let target = location(&response);
        assert!(target.fragment().is_none(), "no tokens should reach the callback page");

        let params = CallbackParams::from_url(&target);
        assert_eq!(params.shape(), RedirectShape::Error);
        assert_eq!(params.error.as_deref(), Some("exchange_failed"));
        assert!(params.error_description.unwrap().contains("refresh token"));
    }

    #[tokio::test]
    async fn test_missing_code_redirects_with_invalid_request() {
        let (server, _store) = create_test_app(proxy_config("https://provider.example/token"));
        let response = server.get("/functions/v1/oauth-exchange").await;

        let params = CallbackParams::from_url(&location(&response));
        assert_eq!(params.error.as_deref(), Some("invalid_request"));
    }

    #[test]
    fn test_success_redirect_omits_absent_fields() {
        let callback = Url::parse("https://school.example/auth/callback").unwrap();
        let redirect = success_redirect(
            callback,
            ExchangedTokens {
                access_token: "a b".to_string(),
                refresh_token: "r".to_string(),
                token_type: "bearer".to_string(),
                expires_in: None,
                provider_token: "p".to_string(),
            },
        );
        let response = axum::response::IntoResponse::into_response(redirect);
        let location = response.headers()["location"].to_str().unwrap();
        assert_eq!(location, "https://school.example/auth/callback#access_token=a+b&refresh_token=r&token_type=bearer&provider_token=p");
    }
}
