//! Auth token — the 16-byte shared secret used by the handshake
//!
//! Supplied out-of-band as a 32-hex-character string (the vendor app shows
//! it as a hyphenated UUID). Normalized by stripping hyphens and
//! case-folding before storage; never regenerated at runtime.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the raw token in bytes.
pub const TOKEN_LEN: usize = 16;

/// Errors parsing a token string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token must be {expected} hex characters, got {got}")]
    BadLength { expected: usize, got: usize },
    #[error("token contains non-hex characters")]
    NotHex,
}

/// The immutable device secret, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken([u8; TOKEN_LEN]);

impl AuthToken {
    /// Parse a token from its textual form. Hyphens are optional and case
    /// is ignored.
    pub fn parse(text: &str) -> Result<Self, TokenError> {
        let normalized: String = text
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();

        if normalized.len() != TOKEN_LEN * 2 {
            return Err(TokenError::BadLength {
                expected: TOKEN_LEN * 2,
                got: normalized.len(),
            });
        }

        let raw = hex::decode(&normalized).map_err(|_| TokenError::NotHex)?;
        let mut bytes = [0u8; TOKEN_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    /// Raw bytes, written verbatim to the link during the handshake.
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl FromStr for AuthToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// The secret must never end up in logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}
