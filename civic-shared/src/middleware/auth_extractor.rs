use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{AuthAdmin, Claims};

/// Router state that knows the secret admin tokens are signed with.
pub trait JwtSecret {
    fn jwt_secret(&self) -> &str;
}

impl<T: JwtSecret + ?Sized> JwtSecret for Arc<T> {
    fn jwt_secret(&self) -> &str {
        (**self).jwt_secret()
    }
}

/// Require a valid administrator bearer token.
pub struct AdminUser(pub AuthAdmin);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: JwtSecret + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = validate_jwt(&token, state.jwt_secret())?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(Self(AuthAdmin::from(claims)))
    }
}

/// Optional admin extractor, `None` when the header is absent or invalid.
pub struct OptionalAdminUser(pub Option<AuthAdmin>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAdminUser
where
    S: JwtSecret + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AdminUser::from_request_parts(parts, state).await {
            Ok(AdminUser(admin)) => Ok(Self(Some(admin))),
            Err(_) => Ok(Self(None)),
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme"))
}

fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    Claims::decode(token, secret).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid token: {e}")),
    })
}
