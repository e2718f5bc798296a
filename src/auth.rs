//! Bearer-token identity and the admin gate.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::backend::BackendError;
use crate::error::ApiError;
use crate::handlers::{AppState, SharedState};
use crate::models::AuthenticatedUser;

/// Caller resolved from the `Authorization: Bearer` header
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

/// Caller that passed the admin check
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller, reusing a user already resolved earlier in the
/// request (the user-scoped admission layer stores it in the extensions).
pub async fn authenticate(parts: &mut Parts, state: &AppState) -> Result<AuthenticatedUser, ApiError> {
    if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
        return Ok(user.clone());
    }

    let token = bearer_token(&parts.headers).ok_or_else(|| {
        ApiError::Unauthorized("Missing or invalid authorization header".to_string())
    })?;

    let user = match state.auth.user_for_token(token).await {
        Ok(user) => user,
        Err(BackendError::Unauthorized) => {
            return Err(ApiError::Unauthorized("Invalid or expired token".to_string()))
        }
        Err(e) => return Err(ApiError::upstream("Authentication failed", e)),
    };

    parts.extensions.insert(user.clone());
    Ok(user)
}

/// Allow-list first, then the store flag. Lookup failures deny.
pub async fn is_admin(state: &AppState, user: &AuthenticatedUser) -> bool {
    if state.admin_emails.contains(&user.email.to_lowercase()) {
        return true;
    }

    match state.store.is_admin(&user.id).await {
        Ok(flag) => flag,
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Failed to check admin status");
            false
        }
    }
}

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await.map(AuthUser)
    }
}

#[async_trait]
impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let user = authenticate(parts, state).await?;
        if !is_admin(state, &user).await {
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
