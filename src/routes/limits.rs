//! Limits Endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::{LimitsUpdate, UserLimits};
use crate::error::{ApiError, CoreError};
use crate::routes::AuthUser;
use crate::services::LimitsStatus;
use crate::types::Amount;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LimitsQuery {
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLimitsBody {
    pub user_id: String,
    pub currency: Option<String>,
    pub max_balance: Option<Amount>,
    pub max_transaction_amount: Option<Amount>,
    pub daily_transfer_limit: Option<Amount>,
    pub daily_withdrawal_limit: Option<Amount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTransferBody {
    pub to_user_id: String,
    pub amount: Amount,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckTransferResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn currency_or_default(state: &AppState, currency: Option<String>) -> String {
    currency
        .map(|c| c.to_uppercase())
        .unwrap_or_else(|| state.config.default_currency.clone())
}

/// GET /limits
///
/// 한도 + 오늘 사용량 + 남은 여유분
pub async fn get_limits(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LimitsQuery>,
) -> Result<Json<LimitsStatus>, ApiError> {
    let currency = currency_or_default(&state, query.currency);
    Ok(Json(state.limits.status(&user.user_id, &currency).await?))
}

/// PUT /limits (admin)
///
/// 지정한 값만 변경
pub async fn update_limits(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateLimitsBody>,
) -> Result<Json<UserLimits>, ApiError> {
    user.require_admin()?;
    let currency = currency_or_default(&state, body.currency);
    let update = LimitsUpdate {
        max_balance: body.max_balance,
        max_transaction_amount: body.max_transaction_amount,
        daily_transfer_limit: body.daily_transfer_limit,
        daily_withdrawal_limit: body.daily_withdrawal_limit,
    };
    Ok(Json(state.limits.update_limits(&body.user_id, &currency, &update).await?))
}

/// POST /limits
///
/// 송금을 실행하지 않고 한도만 검사
pub async fn check_transfer(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CheckTransferBody>,
) -> Result<Json<CheckTransferResponse>, ApiError> {
    if !body.amount.is_positive() {
        return Err(CoreError::Validation("amount must be greater than zero".into()).into());
    }
    let currency = currency_or_default(&state, body.currency);

    let balance = state.ledger.get_balance(&user.user_id, &currency).await?;
    let result = if balance < body.amount {
        Err(CoreError::InsufficientBalance {
            available: balance,
            requested: body.amount,
        })
    } else {
        state
            .limits
            .validate_transfer_limits(&user.user_id, &body.to_user_id, &currency, body.amount)
            .await
    };

    match result {
        Ok(()) => Ok(Json(CheckTransferResponse { allowed: true, reason: None })),
        Err(e @ (CoreError::InsufficientBalance { .. } | CoreError::LimitExceeded { .. })) => {
            Ok(Json(CheckTransferResponse {
                allowed: false,
                reason: Some(e.to_string()),
            }))
        }
        Err(e) => Err(e.into()),
    }
}
