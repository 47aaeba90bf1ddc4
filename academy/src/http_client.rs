//! Shared outbound HTTP client setup.

use std::{sync::Once, time::Duration};
use url::Url;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the aws-lc-rs rustls provider for the process.
///
/// Safe to call repeatedly; later calls and an already-installed provider are no-ops.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means another provider is already the process default
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Build the client used for gateway, profile and OAuth token calls.
pub fn build(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    install_crypto_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("academy/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Makes sure a url has a trailing slash.
///
/// Joining '/project', 'auth/v1/token' gives '/auth/v1/token', but '/project/' gives
/// '/project/auth/v1/token'. Call this before calling .join
pub fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}
