//! Token validation seam.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub ok: bool,
    /// Account details reported by the validator, when it has any.
    pub identity: Option<Value>,
    pub error: Option<String>,
}

impl Validation {
    #[must_use]
    pub fn accepted(identity: Option<Value>) -> Self {
        Self {
            ok: true,
            identity,
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            identity: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str, endpoint: &str) -> Validation;
}

/// Accepts any non-empty token. The upstream API rejects bad tokens on first use.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptNonEmpty;

#[async_trait]
impl TokenValidator for AcceptNonEmpty {
    async fn validate(&self, token: &str, _endpoint: &str) -> Validation {
        if token.trim().is_empty() {
            Validation::rejected("token is empty")
        } else {
            Validation::accepted(None)
        }
    }
}
