//! Limits Engine
//!
//! # Interview Q&A
//!
//! Q: 한도 검사와 실제 쓰기 사이의 race는?
//! A: 여기 validate_* 는 읽기 전용 사전 검사 (빠른 거절 + 어떤 한도인지 보고)
//!
//!    최종 판정은 persistence 레이어의 원자적 연산이 같은 트랜잭션 안에서 다시 수행
//!    (`atomic_transfer`, `reserve_withdrawal`, `credit_deposit`)
//!    → 동시 요청 두 개가 합쳐서 한도를 넘는 일이 없음
//!
//! Q: 기본 한도는 어디서 오는가?
//! A: 설정값 (`LimitDefaults`). 최초 조회 시 (user, currency) 행을 lazy 생성

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::config::LimitDefaults;
use crate::db::{Breach, EntryType, LimitsRepository, LimitsUpdate, Repository, UserLimits};
use crate::error::{CoreError, CoreResult, LimitKind};
use crate::services::ledger::LedgerStore;
use crate::types::Amount;

/// 원자적 쓰기에서 돌아온 위반을 도메인 에러로 변환
///
/// `daily`: DailyLimit 위반이 어떤 한도인지 (송금 / 출금)
pub fn breach_error(breach: Breach, daily: LimitKind) -> CoreError {
    match breach {
        Breach::InsufficientBalance { available, requested } => {
            CoreError::InsufficientBalance { available, requested }
        }
        Breach::DailyLimit { used, requested, limit } => CoreError::LimitExceeded {
            limit: daily,
            limit_value: limit,
            attempted: used.saturating_add(requested),
        },
        Breach::MaxBalance { current, requested, limit } => CoreError::LimitExceeded {
            limit: LimitKind::MaxBalance,
            limit_value: limit,
            attempted: current.saturating_add(requested),
        },
    }
}

fn exceeded(limit: LimitKind, limit_value: Amount, attempted: Amount) -> CoreError {
    CoreError::LimitExceeded { limit, limit_value, attempted }
}

/// 한도 + 남은 여유분
#[derive(Debug, Clone, Serialize)]
pub struct LimitsStatus {
    pub limits: UserLimits,
    pub balance: Amount,
    pub daily_transfer_used: Amount,
    pub daily_withdrawal_used: Amount,
    pub remaining_daily_transfer: Amount,
    pub remaining_daily_withdrawal: Amount,
    pub remaining_balance_capacity: Amount,
}

#[derive(Clone)]
pub struct LimitsEngine {
    repo: Arc<dyn Repository>,
    ledger: LedgerStore,
    defaults: LimitDefaults,
}

impl LimitsEngine {
    pub fn new(repo: Arc<dyn Repository>, ledger: LedgerStore, defaults: LimitDefaults) -> Self {
        Self { repo, ledger, defaults }
    }

    /// 저장된 한도, 없으면 기본값으로 생성
    pub async fn get_limits(&self, user_id: &str, currency: &str) -> CoreResult<UserLimits> {
        if let Some(limits) = self.repo.find_limits(user_id, currency).await? {
            return Ok(limits);
        }

        let limits = self
            .repo
            .insert_limits(UserLimits {
                user_id: user_id.to_string(),
                currency: currency.to_string(),
                max_balance: self.defaults.max_balance,
                max_transaction_amount: self.defaults.max_transaction_amount,
                daily_transfer_limit: self.defaults.daily_transfer_limit,
                daily_withdrawal_limit: self.defaults.daily_withdrawal_limit,
                updated_at: Utc::now(),
            })
            .await?;
        info!(user_id = %user_id, currency = %currency, "Created default limits");
        Ok(limits)
    }

    /// amount ≤ maxTransactionAmount
    pub async fn validate_transaction_amount(&self, user_id: &str, currency: &str, amount: Amount) -> CoreResult<()> {
        let limits = self.get_limits(user_id, currency).await?;
        if amount > limits.max_transaction_amount {
            return Err(exceeded(LimitKind::MaxTransactionAmount, limits.max_transaction_amount, amount));
        }
        Ok(())
    }

    /// 현재 잔고 + delta ≤ maxBalance
    pub async fn validate_balance_increase(&self, user_id: &str, currency: &str, delta: Amount) -> CoreResult<()> {
        let limits = self.get_limits(user_id, currency).await?;
        let balance = self.ledger.get_balance(user_id, currency).await?;
        if balance.would_exceed(delta, limits.max_balance) {
            return Err(exceeded(LimitKind::MaxBalance, limits.max_balance, balance.saturating_add(delta)));
        }
        Ok(())
    }

    pub async fn validate_daily_transfer_limit(&self, user_id: &str, currency: &str, amount: Amount) -> CoreResult<()> {
        let limits = self.get_limits(user_id, currency).await?;
        let used = self.ledger.daily_outflow(user_id, currency, EntryType::Transfer).await?;
        if used.would_exceed(amount, limits.daily_transfer_limit) {
            let attempted = used.saturating_add(amount);
            return Err(exceeded(LimitKind::DailyTransferLimit, limits.daily_transfer_limit, attempted));
        }
        Ok(())
    }

    pub async fn validate_daily_withdrawal_limit(&self, user_id: &str, currency: &str, amount: Amount) -> CoreResult<()> {
        let limits = self.get_limits(user_id, currency).await?;
        let used = self.ledger.daily_outflow(user_id, currency, EntryType::Withdrawal).await?;
        if used.would_exceed(amount, limits.daily_withdrawal_limit) {
            let attempted = used.saturating_add(amount);
            return Err(exceeded(LimitKind::DailyWithdrawalLimit, limits.daily_withdrawal_limit, attempted));
        }
        Ok(())
    }

    /// 송금 사전 검사: 건당 한도 → 송신자 일일 한도 → 수신자 최대 잔고 (첫 위반에서 중단)
    pub async fn validate_transfer_limits(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        currency: &str,
        amount: Amount,
    ) -> CoreResult<()> {
        self.validate_transaction_amount(from_user_id, currency, amount).await?;
        self.validate_daily_transfer_limit(from_user_id, currency, amount).await?;
        self.validate_balance_increase(to_user_id, currency, amount).await
    }

    /// 출금 사전 검사: 건당 한도 → 일일 출금 한도
    pub async fn validate_withdrawal_limits(&self, user_id: &str, currency: &str, amount: Amount) -> CoreResult<()> {
        self.validate_transaction_amount(user_id, currency, amount).await?;
        self.validate_daily_withdrawal_limit(user_id, currency, amount).await
    }

    /// 관리자 한도 변경 (지정한 값만)
    pub async fn update_limits(&self, user_id: &str, currency: &str, update: &LimitsUpdate) -> CoreResult<UserLimits> {
        if update.is_empty() {
            return Err(CoreError::Validation("no limit values supplied".into()));
        }
        let values = [
            update.max_balance,
            update.max_transaction_amount,
            update.daily_transfer_limit,
            update.daily_withdrawal_limit,
        ];
        if values.iter().flatten().any(|v| !v.is_positive()) {
            return Err(CoreError::Validation("limit values must be positive".into()));
        }

        // 행이 없으면 기본값으로 만든 뒤 갱신
        self.get_limits(user_id, currency).await?;
        let limits = self.repo.update_limits(user_id, currency, update).await?;
        info!(user_id = %user_id, currency = %currency, ?update, "Updated user limits");
        Ok(limits)
    }

    /// 한도 + 오늘 사용량 + 남은 여유분
    pub async fn status(&self, user_id: &str, currency: &str) -> CoreResult<LimitsStatus> {
        let limits = self.get_limits(user_id, currency).await?;
        let balance = self.ledger.get_balance(user_id, currency).await?;
        let daily_transfer_used = self.ledger.daily_outflow(user_id, currency, EntryType::Transfer).await?;
        let daily_withdrawal_used = self.ledger.daily_outflow(user_id, currency, EntryType::Withdrawal).await?;

        Ok(LimitsStatus {
            remaining_daily_transfer: (limits.daily_transfer_limit - daily_transfer_used).clamp_non_negative(),
            remaining_daily_withdrawal: (limits.daily_withdrawal_limit - daily_withdrawal_used).clamp_non_negative(),
            remaining_balance_capacity: (limits.max_balance - balance).clamp_non_negative(),
            limits,
            balance,
            daily_transfer_used,
            daily_withdrawal_used,
        })
    }
}
