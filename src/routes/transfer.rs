//! Transfer Endpoints

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::TransferRecord;
use crate::error::ApiError;
use crate::routes::{idempotency_key, AuthUser};
use crate::services::{TransferRequest, TransferResult};
use crate::types::{Amount, PageQuery, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub to_user_id: String,
    pub amount: Amount,
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferHistoryResponse {
    pub transfers: Vec<TransferRecord>,
    pub pagination: Pagination,
}

/// POST /transfer
///
/// # Request
///
/// ```json
/// { "toUserId": "…", "amount": "30", "currency": "USDT", "idempotencyKey": "k1" }
/// ```
///
/// 같은 key로 같은 송금을 다시 보내면 처음 결과를 그대로 반환
pub async fn create_transfer(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<TransferBody>,
) -> Result<Json<TransferResult>, ApiError> {
    let idempotency_key = idempotency_key(body.idempotency_key, &headers)?;
    let currency = body
        .currency
        .map(|c| c.to_uppercase())
        .unwrap_or_else(|| state.config.default_currency.clone());

    let result = state
        .transfers
        .transfer(TransferRequest {
            from_user_id: user.user_id,
            to_user_id: body.to_user_id,
            amount: body.amount,
            currency,
            idempotency_key,
        })
        .await?;

    Ok(Json(result))
}

/// GET /transfer
pub async fn list_transfers(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<TransferHistoryResponse>, ApiError> {
    let (transfers, pagination) = state.transfers.history(&user.user_id, &page).await?;
    Ok(Json(TransferHistoryResponse { transfers, pagination }))
}
