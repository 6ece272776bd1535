//! Balance Endpoints
//!
//! 잔고는 항상 ledger entry 합계에서 계산 (저장된 잔고 없음)

use std::collections::{BTreeMap, BTreeSet};

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::LedgerEntry;
use crate::error::ApiError;
use crate::routes::AuthUser;
use crate::types::{Amount, PageQuery, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlatformBalance {
    pub fiat: Amount,
    pub tickets: Amount,
}

#[derive(Debug, Serialize)]
pub struct BalanceOverview {
    /// 온체인 토큰 통화
    pub crypto: BTreeMap<String, Amount>,
    pub platform: PlatformBalance,
    pub total: BTreeMap<String, Amount>,
}

#[derive(Debug, Serialize)]
pub struct CurrencyBalance {
    pub currency: String,
    pub balance: Amount,
    pub recent: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BalanceResponse {
    Overview(BalanceOverview),
    Currency(CurrencyBalance),
}

/// GET /balance
///
/// `?currency=USDT` 이면 단일 통화 상세 (최근 entry 포함)
pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    if let Some(currency) = query.currency {
        let currency = currency.to_uppercase();
        let balance = state.ledger.get_balance(&user.user_id, &currency).await?;
        let page = PageQuery { limit: Some(10), offset: None };
        let (recent, _) = state.ledger.history(&user.user_id, Some(&currency), &page).await?;
        return Ok(Json(BalanceResponse::Currency(CurrencyBalance { currency, balance, recent })));
    }

    let total: BTreeMap<String, Amount> = state.ledger.balances(&user.user_id).await?.into_iter().collect();
    let token_currencies: BTreeSet<&str> = state.config.networks.iter().map(|n| n.currency.as_str()).collect();
    let crypto = total
        .iter()
        .filter(|(currency, _)| token_currencies.contains(currency.as_str()))
        .map(|(currency, amount)| (currency.clone(), *amount))
        .collect();
    let platform = PlatformBalance {
        fiat: total.get(&state.config.fiat_currency).copied().unwrap_or_default(),
        tickets: total.get(&state.config.ticket_currency).copied().unwrap_or_default(),
    };

    Ok(Json(BalanceResponse::Overview(BalanceOverview { crypto, platform, total })))
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub currency: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LedgerHistoryResponse {
    pub entries: Vec<LedgerEntry>,
    pub pagination: Pagination,
}

/// GET /ledger
///
/// ledger entry 히스토리 (최신순)
pub async fn get_ledger_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerHistoryResponse>, ApiError> {
    let page = PageQuery { limit: query.limit, offset: query.offset };
    let currency = query.currency.map(|c| c.to_uppercase());
    let (entries, pagination) = state
        .ledger
        .history(&user.user_id, currency.as_deref(), &page)
        .await?;
    Ok(Json(LedgerHistoryResponse { entries, pagination }))
}
