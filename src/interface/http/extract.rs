//! 已认证调用方提取器

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::MessagingError;
use crate::infrastructure::auth::bearer_token;
use crate::service::ApplicationContext;

/// 从 `Authorization: Bearer` 中解析出的用户
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl FromRequestParts<Arc<ApplicationContext>> for AuthenticatedUser {
    type Rejection = MessagingError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApplicationContext>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| {
                MessagingError::Unauthenticated("missing bearer token".to_string())
            })?;
        state.authenticator.authenticate(token).map(AuthenticatedUser)
    }
}
