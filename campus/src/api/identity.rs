//! Caller identity extractors.
//!
//! The upstream identity collaborator has already verified the caller and
//! forwards `X-User-Id` / `X-User-Role`. Both values are trusted as-is.

use crate::api::error::AppError;
use crate::types::{Identity, Role};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the verified user id
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Header carrying the verified role
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Verified caller
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::unauthorized("Missing caller identity"))?;

        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => Role::Student,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| AppError::unauthorized("Unknown caller role"))?,
        };

        Ok(Self(Identity::new(user_id, role)))
    }
}

/// Verified caller with the admin role
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Caller(identity) = Caller::from_request_parts(parts, state).await?;
        if !identity.is_admin() {
            return Err(AppError::forbidden("Admin role required"));
        }
        Ok(Self(identity))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract<T: FromRequestParts<(), Rejection = AppError>>(headers: &[(&str, &str)]) -> Result<T, AppError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        T::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_user_is_unauthorized() {
        let err = extract::<Caller>(&[]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn role_defaults_to_student() {
        let Caller(identity) = extract::<Caller>(&[(USER_ID_HEADER, "u1")]).await.unwrap();
        assert_eq!(identity.user_id.as_str(), "u1");
        assert_eq!(identity.role, Role::Student);
    }

    #[tokio::test]
    async fn admin_guard_checks_role() {
        let err = extract::<RequireAdmin>(&[(USER_ID_HEADER, "u1"), (USER_ROLE_HEADER, "organizer")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let RequireAdmin(identity) = extract::<RequireAdmin>(&[(USER_ID_HEADER, "root"), (USER_ROLE_HEADER, "Admin")])
            .await
            .unwrap();
        assert!(identity.is_admin());
    }
}
