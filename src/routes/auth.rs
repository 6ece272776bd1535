//! 인증 extractor
//!
//! `Authorization: Bearer <token>` → identity provider → `AuthUser`

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use crate::db::UserRepository;
use crate::error::{ApiError, CoreError};
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if !self.is_admin {
            warn!(user_id = %self.user_id, "Admin endpoint called by non-admin");
            return Err(CoreError::Forbidden("admin role required".into()).into());
        }
        Ok(())
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(CoreError::Authentication)?;
        let identity = state.identity.resolve(token).await?;

        // 송금 수신자 확인용 사용자 등록
        state
            .repo
            .ensure_user(&identity.user_id)
            .await
            .map_err(CoreError::from)?;

        Ok(AuthUser {
            is_admin: identity.has_admin_role() || state.config.is_admin(&identity.user_id),
            user_id: identity.user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/balance");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }

    #[test]
    fn test_require_admin() {
        let user = AuthUser { user_id: "u1".into(), is_admin: false };
        assert!(user.require_admin().is_err());
        let admin = AuthUser { user_id: "a1".into(), is_admin: true };
        assert!(admin.require_admin().is_ok());
    }
}
