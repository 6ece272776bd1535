//! Withdrawal Processor
//!
//! # Interview Q&A
//!
//! Q: 출금 요청 시점에 바로 잔고를 빼는 이유는?
//! A: 요청 생성과 같은 트랜잭션에서 음수 withdrawal entry로 예약 (reservation)
//!    broadcast 전까지 같은 돈을 다시 송금/출금하지 못하게 막음
//!
//! Q: broadcast가 실패하면?
//! A: 요청은 failed + errorMessage로 기록하고 예약 debit은 그대로 둠
//!    자동 환불/무한 재시도 없음 (운영자가 보정 entry로 처리)
//!
//! Q: hot wallet nonce 충돌은 어떻게 막는가?
//! A: 네트워크별 `tokio::sync::Mutex` lease
//!
//!    claim → 잔고/가스 확인 → send → receipt 대기까지 lease를 쥐고 있음
//!    배치와 단건 처리가 동시에 돌아도 같은 네트워크의 broadcast는 한 번에 하나

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethers::types::U256;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{JobConfig, NetworkConfig};
use crate::db::{
    CancelOutcome, LedgerRepository, NewWithdrawal, Repository, ReserveOutcome, WithdrawalRepository,
    WithdrawalRequest, WithdrawalSettlement, WithdrawalStatus,
};
use crate::error::{CoreError, CoreResult, LimitKind};
use crate::services::chain::{ChainError, ChainRegistry};
use crate::services::ledger::utc_day_start;
use crate::services::limits::{breach_error, LimitsEngine};
use crate::types::{Amount, EthAddress, PageQuery, Pagination};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct WithdrawalInput {
    pub user_id: String,
    pub amount: Amount,
    pub to_address: String,
    /// 없으면 네트워크 기본 통화
    pub currency: Option<String>,
    pub network: String,
    pub idempotency_key: String,
}

impl WithdrawalInput {
    /// 같은 key로 들어온 요청이 같은 출금인지
    fn matches(&self, existing: &WithdrawalRequest) -> bool {
        existing.user_id == self.user_id
            && existing.amount == self.amount
            && existing.network == self.network
            && existing.to_address.eq_ignore_ascii_case(self.to_address.trim())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    /// 처리 직전에 취소되었거나 다른 처리자가 가져간 요청
    pub skipped: usize,
}

/// broadcast 단계 실패 (요청에 기록됨)
struct BroadcastFailure {
    reason: String,
    tx_hash: Option<String>,
}

impl BroadcastFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            tx_hash: None,
        }
    }
}

impl From<ChainError> for BroadcastFailure {
    fn from(err: ChainError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Clone)]
pub struct WithdrawalProcessor {
    repo: Arc<dyn Repository>,
    limits: LimitsEngine,
    chains: ChainRegistry,
    networks: HashMap<String, NetworkConfig>,
    /// 네트워크별 hot wallet lease
    leases: HashMap<String, Arc<Mutex<()>>>,
    receipt_timeout: Duration,
    broadcast_delay: Duration,
}

impl WithdrawalProcessor {
    pub fn new(
        repo: Arc<dyn Repository>,
        limits: LimitsEngine,
        chains: ChainRegistry,
        networks: HashMap<String, NetworkConfig>,
        jobs: &JobConfig,
    ) -> Self {
        let leases = networks
            .keys()
            .map(|name| (name.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            repo,
            limits,
            chains,
            networks,
            leases,
            receipt_timeout: jobs.receipt_timeout,
            broadcast_delay: jobs.broadcast_delay,
        }
    }

    fn network(&self, name: &str) -> CoreResult<&NetworkConfig> {
        self.networks
            .get(name)
            .ok_or_else(|| CoreError::Validation(format!("unsupported network: {}", name)))
    }

    fn validate(&self, input: &WithdrawalInput) -> CoreResult<String> {
        if !input.amount.is_positive() {
            return Err(CoreError::Validation("amount must be greater than zero".into()));
        }
        if input.idempotency_key.trim().is_empty() || input.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(CoreError::Validation("idempotency key must be 1-255 characters".into()));
        }

        let address = EthAddress::new(&input.to_address)
            .map_err(|_| CoreError::Validation(format!("invalid destination address: {}", input.to_address)))?;
        if address.is_zero() {
            return Err(CoreError::Validation("cannot withdraw to the zero address".into()));
        }

        let network = self.network(&input.network)?;
        let currency = match &input.currency {
            Some(c) if !c.eq_ignore_ascii_case(&network.currency) => {
                return Err(CoreError::Validation(format!(
                    "{} is not withdrawable on {}",
                    c, network.name
                )));
            }
            _ => network.currency.clone(),
        };
        Ok(currency)
    }

    /// 출금 요청 생성 + 예약 debit
    pub async fn create(&self, input: WithdrawalInput) -> CoreResult<WithdrawalRequest> {
        let currency = self.validate(&input)?;

        if let Some(existing) = self.repo.find_withdrawal_by_key(&input.idempotency_key).await? {
            return self.replay(&input, existing);
        }

        // 사전 검사: 잔고 → 건당 한도 → 일일 출금 한도
        let available = self.repo.balance(&input.user_id, &currency).await?;
        if available < input.amount {
            return Err(CoreError::InsufficientBalance {
                available,
                requested: input.amount,
            });
        }
        self.limits
            .validate_withdrawal_limits(&input.user_id, &currency, input.amount)
            .await?;

        let limits = self.limits.get_limits(&input.user_id, &currency).await?;
        let outcome = self
            .repo
            .reserve_withdrawal(
                NewWithdrawal {
                    id: Uuid::new_v4(),
                    user_id: input.user_id.clone(),
                    amount: input.amount,
                    currency,
                    to_address: input.to_address.trim().to_lowercase(),
                    network: input.network.clone(),
                    idempotency_key: input.idempotency_key.clone(),
                },
                limits.daily_withdrawal_limit,
                utc_day_start(Utc::now()),
            )
            .await?;

        match outcome {
            ReserveOutcome::Reserved(request) => {
                info!(
                    withdrawal_id = %request.id,
                    user_id = %request.user_id,
                    amount = %request.amount,
                    network = %request.network,
                    "Withdrawal reserved"
                );
                Ok(request)
            }
            ReserveOutcome::Duplicate(existing) => self.replay(&input, existing),
            ReserveOutcome::Rejected(breach) => {
                warn!(user_id = %input.user_id, ?breach, "Withdrawal rejected");
                Err(breach_error(breach, LimitKind::DailyWithdrawalLimit))
            }
        }
    }

    fn replay(&self, input: &WithdrawalInput, existing: WithdrawalRequest) -> CoreResult<WithdrawalRequest> {
        if !input.matches(&existing) {
            warn!(key = %input.idempotency_key, "Idempotency key reused for a different withdrawal");
            return Err(CoreError::DuplicateRequest(input.idempotency_key.clone()));
        }
        debug!(withdrawal_id = %existing.id, "Withdrawal replayed from idempotency key");
        Ok(existing)
    }

    /// pending 요청을 broadcast
    ///
    /// 체인 쪽 실패는 에러로 반환하지 않고 요청에 failed로 기록
    pub async fn process(&self, id: Uuid) -> CoreResult<WithdrawalRequest> {
        let request = self
            .repo
            .find_withdrawal(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", id)))?;
        let config = self.network(&request.network)?;
        let lease = self
            .leases
            .get(&request.network)
            .ok_or_else(|| CoreError::Validation(format!("unsupported network: {}", request.network)))?;

        let _guard = lease.lock().await;

        let Some(claimed) = self.repo.claim_withdrawal(id).await? else {
            let status = self
                .repo
                .find_withdrawal(id)
                .await?
                .map(|w| w.status)
                .unwrap_or(request.status);
            return Err(CoreError::InvalidState(format!("withdrawal {} is {}", id, status)));
        };

        match self.broadcast(&claimed, config).await {
            Ok(settlement) => {
                let completed = self.repo.complete_withdrawal(id, settlement).await?;
                info!(
                    withdrawal_id = %id,
                    tx_hash = ?completed.tx_hash,
                    gas_fee = ?completed.gas_fee,
                    "Withdrawal completed"
                );
                Ok(completed)
            }
            Err(failure) => {
                error!(
                    withdrawal_id = %id,
                    network = %claimed.network,
                    tx_hash = ?failure.tx_hash,
                    reason = %failure.reason,
                    "Withdrawal failed, reservation kept"
                );
                Ok(self
                    .repo
                    .fail_withdrawal(id, &failure.reason, failure.tx_hash.as_deref())
                    .await?)
            }
        }
    }

    async fn broadcast(
        &self,
        request: &WithdrawalRequest,
        config: &NetworkConfig,
    ) -> Result<WithdrawalSettlement, BroadcastFailure> {
        let chain = self.chains.get(&request.network)?;
        let to = EthAddress::new(&request.to_address).map_err(BroadcastFailure::new)?;
        let amount = request
            .amount
            .to_token_units(config.token_decimals)
            .map_err(|e| BroadcastFailure::new(e.to_string()))?;
        let hot_wallet = chain.hot_wallet_address()?;

        let token_balance = chain.token_balance_of(&hot_wallet).await?;
        if token_balance < amount {
            return Err(BroadcastFailure::new(format!(
                "insufficient hot wallet token balance: {} < {}",
                token_balance, amount
            )));
        }

        let fee = chain.estimate_transfer_fee(&to, amount).await?;
        let native = chain.native_balance_of(&hot_wallet).await?;
        let required = fee.max(U256::from(config.min_gas_balance_wei));
        if native < required {
            return Err(BroadcastFailure::new(format!(
                "insufficient gas balance: {} wei < {} wei",
                native, required
            )));
        }

        let tx_hash = chain.send_token(&to, amount).await?;
        let receipt = chain
            .await_receipt(&tx_hash, self.receipt_timeout)
            .await
            .map_err(|e| BroadcastFailure {
                reason: e.to_string(),
                tx_hash: Some(tx_hash.clone()),
            })?;

        if !receipt.success {
            return Err(BroadcastFailure {
                reason: ChainError::Reverted(tx_hash.clone()).to_string(),
                tx_hash: Some(tx_hash),
            });
        }

        Ok(WithdrawalSettlement {
            gas_used: receipt.gas_used.low_u64() as i64,
            gas_fee: receipt.gas_fee().to_string(),
            tx_hash: receipt.tx_hash,
        })
    }

    /// pending → cancelled + 예약금 반환
    pub async fn cancel(&self, id: Uuid, user_id: &str) -> CoreResult<WithdrawalRequest> {
        match self.repo.cancel_withdrawal(id, user_id).await? {
            CancelOutcome::Cancelled(request) => {
                info!(withdrawal_id = %id, user_id = %user_id, amount = %request.amount, "Withdrawal cancelled");
                Ok(request)
            }
            CancelOutcome::NotFound => Err(CoreError::NotFound(format!("withdrawal {}", id))),
            CancelOutcome::NotCancellable(status) => Err(CoreError::InvalidState(format!(
                "withdrawal {} is {} and can no longer be cancelled",
                id, status
            ))),
        }
    }

    /// 네트워크의 pending 요청을 오래된 순으로 하나씩 처리
    pub async fn process_batch(&self, network: &str, max_count: usize) -> CoreResult<BatchSummary> {
        self.network(network)?;
        let pending = self.repo.pending_withdrawals(network, max_count as i64).await?;
        let mut summary = BatchSummary::default();

        for (i, request) in pending.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.broadcast_delay).await;
            }

            match self.process(request.id).await {
                Ok(w) if w.status == WithdrawalStatus::Completed => summary.completed += 1,
                Ok(_) => summary.failed += 1,
                Err(CoreError::InvalidState(reason)) => {
                    debug!(withdrawal_id = %request.id, reason = %reason, "Skipping withdrawal");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if !pending.is_empty() {
            info!(network = %network, ?summary, "Withdrawal batch finished");
        }
        Ok(summary)
    }

    /// 본인 요청만 조회
    pub async fn get(&self, id: Uuid, user_id: &str) -> CoreResult<WithdrawalRequest> {
        match self.repo.find_withdrawal(id).await? {
            Some(w) if w.user_id == user_id => Ok(w),
            _ => Err(CoreError::NotFound(format!("withdrawal {}", id))),
        }
    }

    pub async fn list(&self, user_id: &str, page: &PageQuery) -> CoreResult<(Vec<WithdrawalRequest>, Pagination)> {
        let (requests, total) = self
            .repo
            .list_withdrawals(user_id, page.limit(), page.offset())
            .await?;
        Ok((requests, page.paginate(total)))
    }

    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.keys().cloned().collect();
        names.sort();
        names
    }
}
