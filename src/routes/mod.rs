//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/balance`, `/ledger` - 잔고 / ledger 히스토리
//! - `/transfer` - 사용자 간 송금
//! - `/withdraw` - 출금 요청 / 취소
//! - `/deposits` - 입금 주소, 입금 내역, 관리자 스캔
//! - `/limits` - 한도 조회 / 변경 / 사전 검증

pub mod auth;
pub mod balance;
pub mod deposits;
pub mod health;
pub mod limits;
pub mod transfer;
pub mod withdraw;

pub use auth::AuthUser;

use axum::http::HeaderMap;

use crate::error::{ApiError, CoreError};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// body 값 우선, 없으면 `Idempotency-Key` 헤더
pub(crate) fn idempotency_key(body: Option<String>, headers: &HeaderMap) -> Result<String, ApiError> {
    body.filter(|k| !k.trim().is_empty())
        .or_else(|| {
            headers
                .get(IDEMPOTENCY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .ok_or_else(|| CoreError::Validation("idempotency key is required".into()).into())
}
