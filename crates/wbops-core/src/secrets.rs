//! Token handling seam.
//!
//! Connection rows store marketplace API tokens encrypted at rest; the
//! encryption primitives themselves are provisioned outside this codebase.
//! [`TokenCipher`] is the boundary the credential resolver decrypts through,
//! and [`mask_token`] is the only representation that may leave the resolver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("token decryption failed: {0}")]
    Decrypt(String),
    #[error("token encryption failed: {0}")]
    Encrypt(String),
}

/// Encrypt/decrypt boundary for stored API tokens.
pub trait TokenCipher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SecretError::Encrypt`] when the token cannot be sealed.
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;

    /// # Errors
    ///
    /// Returns [`SecretError::Decrypt`] when the stored value cannot be
    /// opened.
    fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError>;
}

/// Identity cipher for deployments where encryption happens in the storage
/// layer, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl TokenCipher for PassthroughCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        Ok(plaintext.to_owned())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError> {
        Ok(ciphertext.to_owned())
    }
}

/// Masks a token for display: everything but the last four characters is
/// replaced. Short tokens mask entirely.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "••••".to_owned();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("••••{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_only_last_four() {
        assert_eq!(mask_token("eyJhbGciOiJFUzI1NiJ9"), "••••NiJ9");
    }

    #[test]
    fn short_tokens_mask_entirely() {
        assert_eq!(mask_token("abcd"), "••••");
        assert_eq!(mask_token(""), "••••");
    }

    #[test]
    fn passthrough_round_trips() {
        let cipher = PassthroughCipher;
        let sealed = cipher.encrypt("secret").expect("encrypt");
        assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), "secret");
    }
}
