//! Shared HTTP client construction for consistent timeout and TLS configuration.

use std::time::Duration;

/// Per-request timeout applied when a provider does not configure its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a shared HTTP client with standard mailsift configuration.
///
/// Config: 10s connect timeout, caller-supplied request timeout, rustls TLS,
/// `mailsift/{version}` user-agent.
#[must_use]
pub fn default_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .user_agent(concat!("mailsift/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("default HTTP client construction must not fail")
}
