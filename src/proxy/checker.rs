//! Liveness prober: one HTTP GET tunnelled through a candidate proxy endpoint

use crate::error::ProbeFailure;
use crate::proxy::socks::{username_only_target, AuthRelay};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default URL fetched through each proxy
const DEFAULT_TEST_URL: &str = "http://www.google.com/";

/// Anything that can tell whether a proxy endpoint is usable
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `true` only when the endpoint relayed the test request successfully
    async fn probe(&self, endpoint: &str) -> bool;
}

/// Configuration for the liveness prober
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Upper bound for the whole probe, dial to drained body
    pub timeout: Duration,
    /// URL to fetch through the proxy
    pub test_url: String,
    /// Skip certificate validation for HTTPS test targets
    pub accept_invalid_certs: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            test_url: DEFAULT_TEST_URL.to_string(),
            accept_invalid_certs: true,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

/// Proxy checker for validating proxy endpoints
#[derive(Debug, Clone, Default)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe an endpoint, keeping the failure reason.
    ///
    /// Returns the round-trip time on success.
    pub async fn check(&self, endpoint: &str) -> Result<Duration, ProbeFailure> {
        let start = Instant::now();
        let proxy_url = Url::parse(endpoint)?;

        // Kept alive until the probe finishes
        let relay = match username_only_target(&proxy_url) {
            Some((upstream, username)) => Some(
                AuthRelay::bind(upstream, username)
                    .await
                    .map_err(ProbeFailure::Relay)?,
            ),
            None => None,
        };
        let dial_url = match &relay {
            Some(relay) => relay.proxy_url(),
            None => proxy_url.to_string(),
        };
        let client = self.create_client(&dial_url)?;

        match tokio::time::timeout(self.config.timeout, self.fetch_test_url(&client)).await {
            Ok(Ok(())) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProbeFailure::Timeout),
        }
    }

    async fn fetch_test_url(&self, client: &Client) -> Result<(), ProbeFailure> {
        let response = client
            .get(&self.config.test_url)
            .send()
            .await
            .map_err(transport_failure)?;

        if response.status() != StatusCode::OK {
            return Err(ProbeFailure::Status(response.status()));
        }

        // Drain the body so the connection is released cleanly
        response.bytes().await.map_err(transport_failure)?;
        Ok(())
    }

    /// Create a reqwest client that dials through the proxy
    fn create_client(&self, proxy_url: &str) -> Result<Client, ProbeFailure> {
        let reqwest_proxy = ReqwestProxy::all(proxy_url).map_err(ProbeFailure::Dialer)?;

        Client::builder()
            .proxy(reqwest_proxy)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .timeout(self.config.timeout)
            .build()
            .map_err(ProbeFailure::Dialer)
    }
}

fn transport_failure(err: reqwest::Error) -> ProbeFailure {
    if err.is_timeout() {
        ProbeFailure::Timeout
    } else {
        ProbeFailure::Transport(err)
    }
}

#[async_trait]
impl LivenessProbe for ProxyChecker {
    async fn probe(&self, endpoint: &str) -> bool {
        match self.check(endpoint).await {
            Ok(elapsed) => {
                debug!(endpoint, elapsed_ms = elapsed.as_millis() as u64, "probe passed");
                true
            }
            Err(reason) => {
                debug!(endpoint, %reason, "probe failed");
                false
            }
        }
    }
}
