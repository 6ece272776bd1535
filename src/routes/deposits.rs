//! Deposit Endpoints
//!
//! # Interview Q&A
//!
//! Q: 입금 주소는 언제 만들어지는가?
//! A: 사용자가 처음 주소를 요청할 때 (network 별 1개, 재생성 없음)
//!
//! Q: 관리자 엔드포인트가 따로 있는 이유는?
//! A: 백그라운드 작업이 멈췄거나 특정 블록부터 다시 스캔해야 할 때 수동 실행용
//!    스캔/처리 모두 tx_hash 기준 멱등이라 여러 번 실행해도 안전

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::DepositTransaction;
use crate::error::{ApiError, CoreError};
use crate::routes::AuthUser;
use crate::services::{DepositAddress, ScanReport};
use crate::types::{PageQuery, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DepositsQuery {
    /// "address" 이면 입금 주소 조회
    pub action: Option<String>,
    pub network: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DepositHistoryResponse {
    pub deposits: Vec<DepositTransaction>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DepositsResponse {
    Address(DepositAddress),
    History(DepositHistoryResponse),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub network: String,
    pub from_block: Option<u64>,
}

/// GET /deposits
///
/// - `?action=address&network=ethereum` → 입금 주소 + QR payload
/// - 그 외 → 입금 내역
pub async fn get_deposits(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DepositsQuery>,
) -> Result<Json<DepositsResponse>, ApiError> {
    match query.action.as_deref() {
        Some("address") => {
            let network = query
                .network
                .ok_or_else(|| CoreError::Validation("network is required".into()))?;
            let address = state
                .deposits
                .deposit_address(&user.user_id, &network.to_lowercase())
                .await?;
            Ok(Json(DepositsResponse::Address(address)))
        }
        Some(other) => Err(CoreError::Validation(format!("unknown action: {}", other)).into()),
        None => {
            let page = PageQuery { limit: query.limit, offset: query.offset };
            let (deposits, pagination) = state.deposits.history(&user.user_id, &page).await?;
            Ok(Json(DepositsResponse::History(DepositHistoryResponse { deposits, pagination })))
        }
    }
}

/// POST /deposits (admin)
///
/// confirmed 입금을 ledger에 반영
pub async fn process_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ProcessBody>,
) -> Result<Json<DepositTransaction>, ApiError> {
    user.require_admin()?;
    Ok(Json(state.deposits.process_confirmed_deposit(&body.tx_hash).await?))
}

/// PUT /deposits (admin)
///
/// 스캔 즉시 실행 (`fromBlock` 지정 시 해당 블록부터 재스캔)
pub async fn scan_deposits(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ScanBody>,
) -> Result<Json<ScanReport>, ApiError> {
    user.require_admin()?;
    let network = body.network.to_lowercase();
    let report = state.deposits.scan(&network, body.from_block).await?;
    state.deposits.update_confirmations(&network).await?;
    Ok(Json(report))
}
