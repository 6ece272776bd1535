//! Identity Provider
//!
//! bearer token → user id. 토큰 발급은 하지 않고 외부 provider 결과를 신뢰함

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Option<String>,
}

impl Identity {
    pub fn has_admin_role(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> CoreResult<Identity>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    app_metadata: Option<AppMetadata>,
}

#[derive(Debug, Deserialize)]
struct AppMetadata {
    #[serde(default)]
    role: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        // app_metadata.role이 있으면 우선
        let role = user.app_metadata.and_then(|m| m.role).or(user.role);
        Identity { user_id: user.id, role }
    }
}

/// `GET {auth_url}/user` (Authorization: Bearer)
pub struct HttpIdentityProvider {
    client: Client,
    auth_url: String,
    api_key: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(auth_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, bearer_token: &str) -> CoreResult<Identity> {
        if bearer_token.trim().is_empty() {
            return Err(CoreError::Authentication);
        }

        let mut request = self
            .client
            .get(format!("{}/user", self.auth_url))
            .bearer_auth(bearer_token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Identity provider unreachable");
            CoreError::Authentication
        })?;

        match response.status() {
            status if status.is_success() => {
                let user: UserResponse = response.json().await.map_err(|e| {
                    warn!(error = %e, "Identity provider returned malformed user");
                    CoreError::Authentication
                })?;
                debug!(user_id = %user.id, "Resolved bearer token");
                Ok(user.into())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CoreError::Authentication),
            status => {
                warn!(status = %status, "Identity provider returned error");
                Err(CoreError::Authentication)
            }
        }
    }
}
