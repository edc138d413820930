//! API key validation for WebSocket authentication.

use async_trait::async_trait;
use subtle::ConstantTimeEq;

/// Validates an API key presented in an `auth` frame.
///
/// A trait seam so tests can plug in their own acceptance policy.
#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn validate(&self, api_key: &str) -> bool;
}

/// Validator against a single configured key, compared in constant time.
///
/// With no key configured (dev mode) every key is accepted.
pub struct StaticKeyValidator {
    expected: Option<Vec<u8>>,
}

impl StaticKeyValidator {
    pub fn new(api_key: Option<String>) -> Self {
        if api_key.is_none() {
            tracing::warn!("No API key configured, accepting all auth attempts (dev mode)");
        }
        Self {
            expected: api_key.map(String::into_bytes),
        }
    }
}

#[async_trait]
impl KeyValidator for StaticKeyValidator {
    async fn validate(&self, api_key: &str) -> bool {
        match &self.expected {
            None => true,
            Some(expected) => bool::from(expected.ct_eq(api_key.as_bytes())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_matching_key() {
        let validator = StaticKeyValidator::new(Some("secret".into()));
        assert!(validator.validate("secret").await);
    }

    #[tokio::test]
    async fn rejects_wrong_key() {
        let validator = StaticKeyValidator::new(Some("secret".into()));
        assert!(!validator.validate("guess").await);
        assert!(!validator.validate("").await);
        assert!(!validator.validate("secret-but-longer").await);
    }

    #[tokio::test]
    async fn dev_mode_accepts_anything() {
        let validator = StaticKeyValidator::new(None);
        assert!(validator.validate("whatever").await);
        assert!(validator.validate("").await);
    }
}
