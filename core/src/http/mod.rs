pub mod client;

pub use client::HttpClient;

use reqwest::Method;

/// Wire format of a payload template, decided by its first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    FormUrlEncoded,
}

impl PayloadFormat {
    /// Templates starting with `{` are treated as JSON documents.
    pub fn detect(template: &str) -> PayloadFormat {
        if template.trim_start().starts_with('{') {
            PayloadFormat::Json
        } else {
            PayloadFormat::FormUrlEncoded
        }
    }
}

/// One fully rendered login request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

impl HttpRequest {
    /// GET carries the payload as the raw query string; every other method sends it as the body.
    pub fn from_payload(method: Method, target: &str, payload: String) -> Self {
        if method == Method::GET {
            let sep = if target.contains('?') { '&' } else { '?' };
            Self {
                url: format!("{}{}{}", target, sep, payload),
                method,
                body: None,
            }
        } else {
            Self {
                method,
                url: target.to_string(),
                body: Some(payload),
            }
        }
    }
}
