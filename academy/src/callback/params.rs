//! Redirect parameters carried by the callback URL.

use std::fmt;
use url::{Url, form_urlencoded};

use crate::types::redact;

/// Parameters recognised on the callback URL.
///
/// Everything except `code` may arrive in either the fragment or the query string; the fragment
/// wins when both carry a value. `code` is only read from the query. Names are case-sensitive
/// and empty values count as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<String>,
    pub provider_token: Option<String>,
}

/// The redirect shapes the reconciler distinguishes, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectShape {
    Error,
    Code,
    TokenPair,
    Empty,
}

impl CallbackParams {
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();

        for (key, value) in url.query_pairs() {
            params.assign(&key, value.into_owned(), true);
        }

        if let Some(fragment) = url.fragment() {
            for (key, value) in form_urlencoded::parse(fragment.as_bytes()) {
                params.assign(&key, value.into_owned(), false);
            }
        }

        params
    }

    fn assign(&mut self, key: &str, value: String, from_query: bool) {
        if value.is_empty() {
            return;
        }
        let slot = match key {
            "error" => &mut self.error,
            "error_description" => &mut self.error_description,
            "access_token" => &mut self.access_token,
            "refresh_token" => &mut self.refresh_token,
            "token_type" => &mut self.token_type,
            "expires_in" => &mut self.expires_in,
            "provider_token" => &mut self.provider_token,
            "code" if from_query => &mut self.code,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Both halves of an implicit-flow token pair, when present.
    pub fn token_pair(&self) -> Option<(&str, &str)> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some((access, refresh)),
            _ => None,
        }
    }

    pub fn shape(&self) -> RedirectShape {
        if self.error.is_some() {
            RedirectShape::Error
        } else if self.code.is_some() {
            RedirectShape::Code
        } else if self.token_pair().is_some() {
            RedirectShape::TokenPair
        } else {
            RedirectShape::Empty
        }
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = |value: &Option<String>| value.as_deref().map(redact);
        f.debug_struct("CallbackParams")
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .field("code", &masked(&self.code))
            .field("access_token", &masked(&self.access_token))
            .field("refresh_token", &masked(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("provider_token", &masked(&self.provider_token))
            .finish()
    }
}
