//! Signed console tokens: `hex(json claims).hex(blake3 keyed mac)`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConsoleError;
use crate::time::unix_now;

const KEY_CONTEXT: &str = "satellite console token signing key v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Activation,
    Session,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub kind: TokenKind,
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: u64,
}

pub struct TokenSigner {
    key: [u8; 32],
}

impl TokenSigner {
    /// Derives the MAC key from the configured secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret),
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, ConsoleError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| ConsoleError::InvalidToken(e.to_string()))?;
        let mac = blake3::keyed_hash(&self.key, &payload);
        Ok(format!("{}.{}", hex::encode(&payload), mac.to_hex()))
    }

    /// Checks the MAC and expiry and returns the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, ConsoleError> {
        let (payload, mac) = token
            .split_once('.')
            .ok_or_else(|| ConsoleError::InvalidToken("malformed token".to_string()))?;
        let payload =
            hex::decode(payload).map_err(|e| ConsoleError::InvalidToken(e.to_string()))?;
        let mac = blake3::Hash::from_hex(mac).map_err(|e| ConsoleError::InvalidToken(e.to_string()))?;

        // blake3::Hash compares in constant time.
        if blake3::keyed_hash(&self.key, &payload) != mac {
            return Err(ConsoleError::InvalidToken("signature mismatch".to_string()));
        }
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|e| ConsoleError::InvalidToken(e.to_string()))?;
        if claims.expires_at <= unix_now() {
            return Err(ConsoleError::TokenExpired);
        }
        Ok(claims)
    }
}
