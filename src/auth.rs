//! Bearer-token gate applied at the top of protected handlers.
//!
//! Both failure modes reply 403; the message distinguishes a missing token
//! from a rejected one. Successful verification hands the claims to the
//! handler, which is all the request context there is.

use axum::http::HeaderMap;
use tracing::debug;

use crate::error::AppError;
use crate::token::{Claims, TokenSigner};

/// Extract the bearer token from the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
}

/// Gate for protected routes. Expired and malformed tokens share one reply;
/// the log carries the difference.
pub fn require_claims(signer: &TokenSigner, headers: &HeaderMap) -> Result<Claims, AppError> {
    let Some(token) = bearer_token(headers) else {
        return Err(AppError::forbidden("no_token", "Token não fornecido."));
    };
    match signer.verify(token) {
        Ok(claims) => Ok(claims),
        Err(e) => {
            debug!(target: "estoque::auth", "token rejected: {}", e);
            Err(AppError::forbidden("invalid_token", "Token inválido."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_tokens_only() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn missing_token_is_403_with_its_own_message() {
        let signer = TokenSigner::new("segredo");
        let err = require_claims(&signer, &HeaderMap::new()).unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert_eq!(err.message(), "Token não fornecido.");
    }

    #[test]
    fn bad_token_is_403_invalid() {
        let signer = TokenSigner::new("segredo");
        let err = require_claims(&signer, &headers_with("Bearer lixo")).unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert_eq!(err.message(), "Token inválido.");
    }

    #[test]
    fn expired_token_is_403_invalid() {
        let signer = TokenSigner::new("segredo");
        let old = signer.issue_at("alice", 1, 1_000).unwrap();
        let err = require_claims(&signer, &headers_with(&format!("Bearer {old}"))).unwrap_err();
        assert_eq!(err.message(), "Token inválido.");
    }

    #[test]
    fn valid_token_yields_claims() {
        let signer = TokenSigner::new("segredo");
        let token = signer.issue("alice", 7).unwrap();
        let claims = require_claims(&signer, &headers_with(&format!("Bearer {token}"))).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.uid, 7);
    }
}
