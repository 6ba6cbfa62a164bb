//! services/client/src/adapters/token.rs

use mcq_core::ports::TokenProvider;

/// A fixed token loaded once from configuration. Interactive clients with
/// refreshing sessions supply their own `TokenProvider` instead.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn from_optional(token: Option<String>) -> Self {
        Self { token }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}
