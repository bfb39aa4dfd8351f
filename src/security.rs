//! Credential handling: argon2 password hashing and the register/login checks
//! built on top of the shared store.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::storage::{Account, SharedStore, StoreError};

/// Hash a password into an argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

/// Verify a password against a stored PHC string. Unparseable hashes verify
/// as false rather than erroring.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Hash the password, then insert the account inside one locked mutation so a
/// concurrent registration of the same username cannot slip past the check.
///
/// Duplicates and persistence failures share one status and reply message;
/// the error code tells them apart in logs.
pub fn register(store: &SharedStore, username: &str, password: &str) -> AppResult<Account> {
    let hash = hash_password(password)?;
    let mut guard = store.0.lock();
    match guard.insert_user(username, &hash) {
        Ok(account) => Ok(account),
        Err(StoreError::DuplicateUser) => {
            Err(AppError::duplicate("user_exists", "Usuário já existe ou erro no registro."))
        }
        Err(e) => {
            warn!(target: "estoque::security", "register failed for '{}': {}", username, e);
            Err(AppError::duplicate("user_register", "Usuário já existe ou erro no registro."))
        }
    }
}

/// Check a login attempt. Fail closed: unknown usernames and wrong passwords
/// are indistinguishable to the caller, both come back as `None`.
pub fn verify_login(store: &SharedStore, username: &str, password: &str) -> Option<Account> {
    let account = {
        let guard = store.0.lock();
        guard.find_user(username)?.clone()
    };
    if verify_password(&account.password_hash, password) {
        Some(account)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SharedStore) {
        let tmp = tempfile::tempdir().unwrap();
        let shared = SharedStore::open(tmp.path().join("estoque.db")).unwrap();
        (tmp, shared)
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let phc = hash_password("secret123").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "secret123"));
        assert!(!verify_password(&phc, "secret124"));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("secret123").unwrap();
        let b = hash_password("secret123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_verifies_false() {
        assert!(!verify_password("not-a-phc-string", "anything"));
        assert!(!verify_password("", "anything"));
    }

    #[test]
    fn register_then_login() {
        let (_tmp, shared) = store();
        let account = register(&shared, "alice", "secret123").unwrap();
        assert_eq!(account.id, 1);
        assert_ne!(account.password_hash, "secret123");

        let found = verify_login(&shared, "alice", "secret123").unwrap();
        assert_eq!(found.id, account.id);
    }

    #[test]
    fn duplicate_register_maps_to_400() {
        let (_tmp, shared) = store();
        register(&shared, "alice", "secret123").unwrap();
        let err = register(&shared, "alice", "outra-senha").unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.message(), "Usuário já existe ou erro no registro.");
    }

    #[test]
    fn wrong_password_and_unknown_user_look_identical() {
        let (_tmp, shared) = store();
        register(&shared, "alice", "secret123").unwrap();
        let wrong_password = verify_login(&shared, "alice", "errada");
        let unknown_user = verify_login(&shared, "mallory", "errada");
        assert!(wrong_password.is_none());
        assert!(unknown_user.is_none());
        assert_eq!(wrong_password, unknown_user);
    }
}
