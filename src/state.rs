use std::sync::Arc;

use owc_core::ProxyConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    /// One client for every upstream request. The configured timeout is the
    /// deadline for the whole upstream exchange.
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(AppState {
            config: Arc::new(config),
            client,
        })
    }
}
