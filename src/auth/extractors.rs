use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::{jwt::JwtKeys, repo_types::User, services::resolve_token};
use crate::{error::AppError, state::AppState};

/// Resolves `Authorization: Bearer <token>` to the stored user.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthenticated("Not authenticated".into()))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("Invalid authentication scheme".into()))?;

        let keys = JwtKeys::from_ref(state);
        let user = resolve_token(&state.db, &keys, token).await?;
        Ok(CurrentUser(user))
    }
}
