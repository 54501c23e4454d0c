use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use civic_shared::errors::{AppError, ErrorCode};
use civic_shared::types::auth::{AccessToken, Claims};

use crate::models::Admin;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::internal(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Burn the same hashing work as a real check when the email is unknown,
/// so a missing admin costs as long as a wrong password.
pub fn verify_against_dummy(password: &str) {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    let hash = DUMMY_HASH.get_or_init(|| hash_password("not-a-real-password-0").ok());
    if let Some(hash) = hash {
        let _ = verify_password(password, hash);
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must be at least 8 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must contain at least one number"));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must contain at least one letter"));
    }
    Ok(())
}

pub fn issue_token(admin: &Admin, secret: &str, ttl_secs: i64) -> Result<AccessToken, AppError> {
    let claims = Claims::new(admin.id, admin.email.clone(), admin.department.clone(), ttl_secs);
    let token = claims
        .encode(secret)
        .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))?;
    Ok(AccessToken::bearer(token, ttl_secs))
}
