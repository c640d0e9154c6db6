use std::time::Duration;

use async_trait::async_trait;
use netweave_core::HealthProbe;
use reqwest::Client as ReqwestClient;
use tracing::debug;
use url::Url;

use super::ReqwestTransport;

/// Health probe that issues a `GET` and treats any 2xx as healthy
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: ReqwestClient,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(client: ReqwestClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Probe over the same client the transport uses
    pub fn for_transport(transport: &ReqwestTransport, timeout: Duration) -> Self {
        Self::new(transport.client().clone(), timeout)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &Url) -> bool {
        match self.client.get(url.clone()).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(%url, status = %response.status(), "health check failed");
                false
            }
            Err(error) => {
                debug!(%url, %error, "health check unreachable");
                false
            }
        }
    }
}
