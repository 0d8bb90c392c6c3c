pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod retry;
pub mod throttle;
pub mod tracker;

use serde::{Deserialize, Serialize};

/// One (username, password) pair to test. Identity is the pair itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attempt {
    pub username: String,
    pub password: String,
}

impl Attempt {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `user:pass`, the plain identity used by the retry budget and the found store.
    pub fn key(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.username, self.password)
    }
}
