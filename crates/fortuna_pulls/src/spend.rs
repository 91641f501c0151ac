//! # Spend Verification
//!
//! The economy deducts currency before a pull reaches the engine and hands the
//! client an opaque confirmation token. The engine only asks whether that token
//! authorizes this request; settlement stays with the economy.

use crate::error::SpendError;
use crate::request::PullRequest;

/// Economy collaborator.
pub trait SpendVerifier: Send + Sync {
    /// Confirms that `request` is paid for.
    ///
    /// Must be idempotent for a given request: the engine may call it again when it
    /// retries an attempt.
    ///
    /// # Errors
    ///
    /// - [`SpendError::Rejected`] if the token does not authorize this pull
    /// - [`SpendError::Unavailable`] if the economy cannot answer right now
    fn verify(&self, request: &PullRequest) -> Result<(), SpendError>;
}

/// Accepts any token of plausible form.
///
/// Used when the economy signs tokens that are checked elsewhere, and in tests.
#[derive(Clone, Debug)]
pub struct TokenFormatVerifier {
    /// Shortest accepted token.
    pub min_len: usize,
}

impl Default for TokenFormatVerifier {
    fn default() -> Self {
        Self { min_len: 8 }
    }
}

impl SpendVerifier for TokenFormatVerifier {
    fn verify(&self, request: &PullRequest) -> Result<(), SpendError> {
        let token = &request.spend_confirmation_token;
        if token.len() < self.min_len {
            return Err(SpendError::Rejected(format!("token shorter than {} bytes", self.min_len)));
        }
        // base64url, JWT and opaque hex alphabets
        let plausible = token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'=' | b'+' | b'/' | b'~'));
        if !plausible {
            return Err(SpendError::Rejected("token contains characters outside its alphabet".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let verifier = TokenFormatVerifier::default();
        let mut request = PullRequest::new("r", "u", "p", "tok_0123456789");
        verifier.verify(&request).unwrap();

        request.spend_confirmation_token = "short".into();
        assert!(matches!(verifier.verify(&request), Err(SpendError::Rejected(_))));

        request.spend_confirmation_token = "tok_0123456789!".into();
        assert!(matches!(verifier.verify(&request), Err(SpendError::Rejected(_))));
    }
}
