use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::header::HeaderMap;
use reqwest::Proxy;

use super::HttpRequest;
use crate::{AttackConfig, ThrottleMode};

/// Shared blocking client. Built once at startup and handed to every worker.
pub struct HttpClient {
    inner: Client,
    default_timeout: Duration,
    default_headers: HeaderMap,
}

impl HttpClient {
    /// Certificate validation is off: targets are lab systems with self-signed
    /// certificates and the operator accepts that risk.
    pub fn new(
        timeout: Duration,
        proxy_url: Option<&str>,
        default_headers: HeaderMap,
        keep_alive: bool,
    ) -> anyhow::Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(timeout)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = proxy_url {
            let p = Proxy::all(proxy).with_context(|| format!("invalid proxy URL '{}'", proxy))?;
            builder = builder.proxy(p);
        }

        // New anonymity-network identities only apply to fresh connections.
        if !keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }

        let inner = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            inner,
            default_timeout: timeout,
            default_headers,
        })
    }

    pub fn from_config(config: &AttackConfig) -> anyhow::Result<Self> {
        Self::new(
            config.request_timeout(),
            config.proxy_ref(),
            config.header_map()?,
            config.throttle_mode != ThrottleMode::Anonymity,
        )
    }

    pub fn send_request(&self, req: &HttpRequest) -> Result<Response, reqwest::Error> {
        let mut builder = self.inner
            .request(req.method.clone(), req.url.as_str())
            .headers(self.default_headers.clone())
            .timeout(self.default_timeout);

        if let Some(ref body) = req.body {
            builder = builder.body(body.clone());
        }

        builder.send()
    }

    pub fn get(&self, url: &str) -> Result<Response, reqwest::Error> {
        self.inner
            .get(url)
            .headers(self.default_headers.clone())
            .timeout(self.default_timeout)
            .send()
    }
}
