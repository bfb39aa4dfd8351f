//! Session tokens: claims signed with HMAC-SHA256 under a process-wide secret.
//!
//! Wire form is `base64url(claims JSON)` + `.` + `base64url(signature)`, both
//! without padding. Tokens are stateless; expiry is the only invalidation.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime in seconds.
pub const TOKEN_TTL_SECS: i64 = 3600;

/// Payload carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username the token was issued to.
    pub sub: String,
    /// Account id.
    pub uid: i64,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds. The token is dead once `now >= exp`.
    pub exp: i64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Structure, encoding or signature failure. All of these collapse into
    /// one variant so a forged token learns nothing from the reply.
    #[error("malformed token")]
    Malformed,
    /// Signature is valid but the expiry has passed.
    #[error("expired token")]
    Expired,
}

/// Issues and verifies session tokens with one shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self { secret: secret.as_bytes().to_vec() }
    }

    /// Sign a fresh token for an account, valid for [`TOKEN_TTL_SECS`].
    pub fn issue(&self, username: &str, uid: i64) -> Result<String> {
        self.issue_at(username, uid, Utc::now().timestamp())
    }

    pub(crate) fn issue_at(&self, username: &str, uid: i64, now: i64) -> Result<String> {
        let claims = Claims {
            sub: username.to_string(),
            uid,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).context("encode claims")?);
        let sig = self.sign(body.as_bytes());
        Ok(format!("{body}.{sig}"))
    }

    /// Check signature then expiry, returning the claims on success.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let (body, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let sig_bytes = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac();
        mac.update(body.as_bytes());
        // Constant-time comparison; the signature is checked before the body
        // is even decoded.
        mac.verify_slice(&sig_bytes).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(body).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC key size is always valid")
    }
}
