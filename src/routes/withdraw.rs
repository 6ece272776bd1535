//! Withdrawal Endpoints
//!
//! 요청 생성 시 바로 ledger에서 예약 debit, 실제 broadcast는 백그라운드 배치가 수행

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::WithdrawalRequest;
use crate::error::{ApiError, CoreError};
use crate::routes::{idempotency_key, AuthUser};
use crate::services::{BatchSummary, WithdrawalInput};
use crate::types::{Amount, PageQuery, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawBody {
    pub amount: Amount,
    pub to_address: String,
    pub currency: Option<String>,
    pub network: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    pub withdrawal_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBody {
    pub network: String,
    pub max_count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalListResponse {
    pub withdrawals: Vec<WithdrawalRequest>,
    pub pagination: Pagination,
}

/// POST /withdraw → 201
pub async fn create_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<WithdrawBody>,
) -> Result<(StatusCode, Json<WithdrawalRequest>), ApiError> {
    let idempotency_key = idempotency_key(body.idempotency_key, &headers)?;
    let network = match body.network {
        Some(network) => network.to_lowercase(),
        None => state
            .config
            .networks
            .first()
            .map(|n| n.name.clone())
            .ok_or_else(|| CoreError::Validation("no withdrawal network configured".into()))?,
    };

    let request = state
        .withdrawals
        .create(WithdrawalInput {
            user_id: user.user_id,
            amount: body.amount,
            to_address: body.to_address,
            currency: body.currency.map(|c| c.to_uppercase()),
            network,
            idempotency_key,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /withdraw
pub async fn list_withdrawals(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<WithdrawalListResponse>, ApiError> {
    let (withdrawals, pagination) = state.withdrawals.list(&user.user_id, &page).await?;
    Ok(Json(WithdrawalListResponse { withdrawals, pagination }))
}

/// GET /withdraw/:id
pub async fn get_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<WithdrawalRequest>, ApiError> {
    Ok(Json(state.withdrawals.get(id, &user.user_id).await?))
}

/// DELETE /withdraw
///
/// pending 상태에서만 취소 가능 (예약금 반환)
pub async fn cancel_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CancelBody>,
) -> Result<Json<WithdrawalRequest>, ApiError> {
    Ok(Json(state.withdrawals.cancel(body.withdrawal_id, &user.user_id).await?))
}

/// PUT /withdraw (admin)
///
/// 배치를 즉시 한 번 실행
pub async fn run_withdrawal_batch(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchSummary>, ApiError> {
    user.require_admin()?;
    let max_count = body.max_count.unwrap_or(state.config.jobs.withdrawal_batch_size);
    let summary = state
        .withdrawals
        .process_batch(&body.network.to_lowercase(), max_count)
        .await?;
    Ok(Json(summary))
}
