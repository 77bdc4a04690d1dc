//! HTTP client used for embedding requests.

use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Large batches of long documents can take a while on the provider side.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for embedding endpoints: rustls, `issuelens/{version}` user-agent, no
/// redirects, and bounded connect and request times.
///
/// Falls back to a plain [`reqwest::Client`] if the tuned builder is rejected.
#[must_use]
pub fn embedding_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("issuelens/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("embedding client setup failed ({e}), using reqwest defaults");
            reqwest::Client::new()
        })
}
