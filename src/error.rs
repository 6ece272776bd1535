//! Error Handling Module
//!
//! Two layers:
//! - `CoreError`: domain taxonomy returned by the services (ledger, limits, transfer, ...)
//! - `ApiError`: HTTP mapping with machine-readable codes
//!
//! Validation, auth and limit failures never have side effects. Persistence and chain
//! failures are logged in full and surfaced to clients as generic 5xx responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::StoreError;
use crate::services::chain::ChainError;
use crate::services::wallet_vault::VaultError;
use crate::types::Amount;

/// 위반된 한도 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    MaxBalance,
    MaxTransactionAmount,
    DailyTransferLimit,
    DailyWithdrawalLimit,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LimitKind::MaxBalance => "max_balance",
            LimitKind::MaxTransactionAmount => "max_transaction_amount",
            LimitKind::DailyTransferLimit => "daily_transfer_limit",
            LimitKind::DailyWithdrawalLimit => "daily_withdrawal_limit",
        };
        f.write_str(name)
    }
}

/// 도메인 에러
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication required")]
    Authentication,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Amount, requested: Amount },

    /// `attempted`: 이 요청이 반영되었을 때의 값 (예: 오늘 사용량 + 요청 금액)
    #[error("{limit} exceeded: {attempted} > {limit_value}")]
    LimitExceeded {
        limit: LimitKind,
        limit_value: Amount,
        attempted: Amount,
    },

    #[error("duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("key vault error: {0}")]
    Crypto(#[from] VaultError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Persistence(StoreError::from(err))
    }
}

/// API 에러 타입
///
/// 각 variant는 HTTP 상태 코드에 매핑됨
/// 민감한 내부 정보는 클라이언트에 노출하지 않음
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
        match self {
            ApiError::Core(err) => core_parts(err),
        }
    }
}

fn core_parts(err: &CoreError) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
    match err {
        // 4xx 클라이언트 에러
        CoreError::Authentication => (
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Authentication required".to_string(),
            None,
        ),
        CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
        CoreError::Validation(msg) => (
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "Validation failed".to_string(),
            Some(serde_json::Value::String(msg.clone())),
        ),
        CoreError::InsufficientBalance { available, requested } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "INSUFFICIENT_BALANCE",
            "Insufficient balance".to_string(),
            Some(serde_json::json!({
                "available": available,
                "requested": requested,
            })),
        ),
        CoreError::LimitExceeded { limit, limit_value, attempted } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "LIMIT_EXCEEDED",
            format!("{} exceeded", limit),
            Some(serde_json::json!({
                "limit": limit,
                "limit_value": limit_value,
                "attempted": attempted,
            })),
        ),
        CoreError::DuplicateRequest(msg) => (
            StatusCode::CONFLICT,
            "DUPLICATE_REQUEST",
            "Idempotency key already used for a different request".to_string(),
            Some(serde_json::Value::String(msg.clone())),
        ),
        CoreError::NotFound(resource) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{} not found", resource),
            None,
        ),
        CoreError::InvalidState(msg) => (
            StatusCode::CONFLICT,
            "INVALID_STATE",
            msg.clone(),
            None,
        ),

        // 5xx 서버 에러 - 상세 정보는 로그에만 남김
        CoreError::Chain(inner) => {
            tracing::error!("Chain error: {:?}", inner);
            (
                StatusCode::BAD_GATEWAY,
                "CHAIN_ERROR",
                "Blockchain network error".to_string(),
                None,
            )
        }
        CoreError::Persistence(inner) => {
            tracing::error!("Persistence error: {:?}", inner);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error occurred".to_string(),
                None,
            )
        }
        CoreError::Crypto(inner) => {
            tracing::error!("Key vault error: {:?}", inner);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_exceeded_maps_to_422() {
        let err = ApiError::from(CoreError::LimitExceeded {
            limit: LimitKind::DailyWithdrawalLimit,
            limit_value: Amount::whole(40),
            attempted: Amount::whole(50),
        });
        let (status, code, _, details) = err.parts();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "LIMIT_EXCEEDED");
        let details = details.unwrap();
        assert_eq!(details["limit"], "daily_withdrawal_limit");
        assert_eq!(details["limit_value"], "40");
    }

    #[test]
    fn test_bad_input_surfaces_as_validation_error() {
        let response = ApiError::from(CoreError::Validation("amount must be greater than zero".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (_, code, _, details) = ApiError::from(CoreError::Validation("bad".into())).parts();
        assert_eq!(code, "VALIDATION_ERROR");
        assert_eq!(details, Some(serde_json::Value::String("bad".into())));
    }

    #[test]
    fn test_persistence_error_hides_details() {
        let err = ApiError::from(CoreError::Persistence(StoreError::Corrupt(
            "relation \"ledger_entries\" does not exist".to_string(),
        )));
        let (status, _, message, details) = err.parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("ledger_entries"));
        assert!(details.is_none());
    }

    #[test]
    fn test_chain_error_is_5xx() {
        let err = ApiError::from(CoreError::Chain(ChainError::Rpc("connection refused".into())));
        let (status, code, message, _) = err.parts();
        assert!(status.is_server_error());
        assert_eq!(code, "CHAIN_ERROR");
        assert!(!message.contains("refused"));
    }
}
