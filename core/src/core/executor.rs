use std::sync::Arc;

use anyhow::Context;
use log::debug;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::Method;

use super::Attempt;
use crate::error::AttemptError;
use crate::http::{HttpClient, HttpRequest, PayloadFormat};
use crate::utils::csrf;
use crate::{AttackConfig, ResponseMatcher};

/// Everything except RFC 3986 unreserved characters is escaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Verdict for a pair whose response could be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub success: bool,
    pub status: u16,
}

struct CsrfSource {
    field: String,
    url: String,
    pattern: Regex,
}

/// Sends one login attempt and classifies the response.
///
/// Stateless apart from the shared client, so a single executor serves every worker.
pub struct AttemptExecutor {
    client: Arc<HttpClient>,
    config: Arc<AttackConfig>,
    method: Method,
    format: PayloadFormat,
    csrf: Option<CsrfSource>,
}

impl AttemptExecutor {
    pub fn new(client: Arc<HttpClient>, config: Arc<AttackConfig>) -> anyhow::Result<Self> {
        let method = Method::from_bytes(config.method.trim().to_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", config.method))?;

        let csrf = match config.csrf_field_ref() {
            Some(field) => Some(CsrfSource {
                field: field.to_string(),
                url: config.csrf_source.clone().unwrap_or_else(|| config.url.clone()),
                pattern: csrf::csrf_pattern(field)
                    .with_context(|| format!("invalid CSRF field name '{}'", field))?,
            }),
            None => None,
        };

        Ok(Self {
            format: PayloadFormat::detect(&config.payload),
            client,
            config,
            method,
            csrf,
        })
    }

    pub fn execute(&self, attempt: &Attempt) -> Result<AttemptOutcome, AttemptError> {
        let token = match self.csrf {
            Some(ref source) => Some(self.fetch_csrf_token(source)?),
            None => None,
        };

        let payload = render_payload(
            &self.config.payload,
            self.format,
            &attempt.username,
            &attempt.password,
            token.as_deref(),
        );
        let request = HttpRequest::from_payload(self.method.clone(), &self.config.url, payload);

        let response = self.client.send_request(&request)?;
        let status = response.status().as_u16();
        if self.config.is_throttling_status(status) {
            return Err(AttemptError::Throttled(status));
        }

        let body = response.text()?;
        let success = classify(&self.config.matcher, &body, status)?;
        debug!("{} -> {} (success: {})", attempt, status, success);

        Ok(AttemptOutcome { success, status })
    }

    fn fetch_csrf_token(&self, source: &CsrfSource) -> Result<String, AttemptError> {
        let response = self.client.get(&source.url)?;
        let status = response.status().as_u16();
        if self.config.is_throttling_status(status) {
            return Err(AttemptError::Throttled(status));
        }

        let body = response.text()?;
        csrf::extract_with(&source.pattern, &body).ok_or_else(|| AttemptError::CsrfMissing {
            field: source.field.clone(),
            status,
        })
    }
}

/// Decides the verdict from the body. With a fail keyword, an absent keyword
/// only counts as success when the status is in 200-399.
pub fn classify(matcher: &ResponseMatcher, body: &str, status: u16) -> Result<bool, AttemptError> {
    match matcher {
        ResponseMatcher::Success(keyword) => Ok(body.contains(keyword.as_str())),
        ResponseMatcher::Fail(keyword) => {
            if body.contains(keyword.as_str()) {
                Ok(false)
            } else if !(200..400).contains(&status) {
                Err(AttemptError::InvalidStatus(status))
            } else {
                Ok(true)
            }
        }
    }
}

/// Fills `^USER^`, `^PASS^` and `^CSRF^`, escaping each value for the template's format.
/// `^CSRF^` is left untouched when no token is given.
pub fn render_payload(
    template: &str,
    format: PayloadFormat,
    username: &str,
    password: &str,
    csrf_token: Option<&str>,
) -> String {
    let escape = |value: &str| match format {
        PayloadFormat::Json => json_escape(value),
        PayloadFormat::FormUrlEncoded => utf8_percent_encode(value, QUERY_VALUE).to_string(),
    };

    let mut payload = template
        .replace("^USER^", &escape(username))
        .replace("^PASS^", &escape(password));
    if let Some(token) = csrf_token {
        payload = payload.replace("^CSRF^", &escape(token));
    }
    payload
}

/// Contents of a JSON string literal, without the surrounding quotes.
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
