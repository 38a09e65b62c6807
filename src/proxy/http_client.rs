// Upstream HTTP client builder.
// One pooled client is shared by the chat dispatcher, the token refresher
// and the quota prober.

use std::time::Duration;

use crate::constants::UPSTREAM_TIMEOUT_SECS;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Max idle connections per host kept warm for upstream reuse.
    pub pool_max_idle_per_host: usize,
    pub connect_timeout: Duration,
    /// Whole-request deadline; generous to tolerate long completions.
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 10,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(UPSTREAM_TIMEOUT_SECS),
        }
    }
}

pub fn build_http_client(config: &HttpClientConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
}
