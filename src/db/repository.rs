//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: Repository 패턴이란?
//! A: 데이터 접근 로직을 추상화하는 패턴
//!
//!    - 비즈니스 로직과 데이터 접근 분리
//!    - 테스트 시 Mock 구현 쉬움 (`db::mock::MockRepository`)
//!    - 서비스는 `Arc<dyn Repository>` 하나만 주입받음 (전역 싱글톤 없음)
//!
//! Q: 한도 검사와 쓰기 사이의 race condition은 어떻게 막는가?
//! A: check-then-act를 애플리케이션 코드에서 분리하지 않음
//!
//!    `atomic_transfer`, `reserve_withdrawal`, `credit_deposit`은 한도 값을 인자로 받아
//!    잔고/사용량 검사와 ledger 쓰기를 같은 DB 트랜잭션 안에서 수행
//!    (사용자별 advisory lock으로 직렬화)
//!
//!    동시 요청 두 개가 각각 한도를 "통과"해서 합쳐서 초과하는 상황이 불가능

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;
use crate::types::Amount;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// 저장된 값이 도메인 타입으로 해석되지 않음
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("{0} not found")]
    Missing(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// posted entry 합계 (`get_user_balance`)
    async fn balance(&self, user_id: &str, currency: &str) -> StoreResult<Amount>;

    /// 통화별 잔고
    async fn balances(&self, user_id: &str) -> StoreResult<Vec<(String, Amount)>>;

    /// reference가 이미 있으면 기존 entry 반환 (중복 insert 없음)
    async fn append_entry(&self, entry: NewLedgerEntry) -> StoreResult<Appended>;

    async fn find_entry_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>>;

    /// 최신순 페이지 + 전체 개수
    async fn history(
        &self,
        user_id: &str,
        currency: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<LedgerEntry>, i64)>;

    /// `since` 이후 해당 타입의 유출량: 음수 entry 합의 절대값에서 출금 취소 환불을 뺀 값 (최소 0)
    async fn outflow_since(
        &self,
        user_id: &str,
        currency: &str,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> StoreResult<Amount>;
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn find_transfer_by_key(&self, idempotency_key: &str) -> StoreResult<Option<TransferRecord>>;

    /// 잔고/일일 한도/수신자 최대 잔고 검사 + debit/credit을 하나의 단위로 적용
    async fn atomic_transfer(&self, transfer: AtomicTransfer) -> StoreResult<TransferOutcome>;

    /// 보낸 송금과 받은 송금 모두
    async fn transfer_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<TransferRecord>, i64)>;
}

#[async_trait]
pub trait LimitsRepository: Send + Sync {
    async fn find_limits(&self, user_id: &str, currency: &str) -> StoreResult<Option<UserLimits>>;

    /// 이미 있으면 기존 행 반환 (동시 lazy 생성에도 1행만 존재)
    async fn insert_limits(&self, limits: UserLimits) -> StoreResult<UserLimits>;

    async fn update_limits(
        &self,
        user_id: &str,
        currency: &str,
        update: &LimitsUpdate,
    ) -> StoreResult<UserLimits>;
}

#[async_trait]
pub trait DepositRepository: Send + Sync {
    /// tx_hash가 이미 있으면 false
    async fn insert_deposit(&self, deposit: DepositTransaction) -> StoreResult<bool>;

    async fn find_deposit(&self, tx_hash: &str) -> StoreResult<Option<DepositTransaction>>;

    async fn deposits_by_status(
        &self,
        network: &str,
        status: DepositStatus,
        limit: i64,
    ) -> StoreResult<Vec<DepositTransaction>>;

    /// pending 행만 갱신 (다른 상태는 변경하지 않음)
    async fn update_confirmations(
        &self,
        tx_hash: &str,
        confirmations: i64,
        status: DepositStatus,
    ) -> StoreResult<()>;

    /// confirmed → processed (ledger credit) 또는 confirmed → failed (최대 잔고 초과)
    async fn credit_deposit(&self, tx_hash: &str, max_balance: Amount) -> StoreResult<DepositCreditOutcome>;

    /// confirmed → failed (ledger 영향 없음)
    async fn fail_deposit(&self, tx_hash: &str, reason: &str) -> StoreResult<Option<DepositTransaction>>;

    async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<DepositTransaction>, i64)>;

    async fn last_scanned_block(&self, network: &str) -> StoreResult<Option<u64>>;

    async fn set_last_scanned_block(&self, network: &str, block: u64) -> StoreResult<()>;
}

#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    async fn find_withdrawal(&self, id: Uuid) -> StoreResult<Option<WithdrawalRequest>>;

    async fn find_withdrawal_by_key(&self, idempotency_key: &str) -> StoreResult<Option<WithdrawalRequest>>;

    /// 잔고/일일 출금 한도 검사 + 요청 생성 + 예약 debit
    async fn reserve_withdrawal(
        &self,
        withdrawal: NewWithdrawal,
        daily_limit: Amount,
        day_start: DateTime<Utc>,
    ) -> StoreResult<ReserveOutcome>;

    /// pending → cancelled + 예약금 반환 entry
    async fn cancel_withdrawal(&self, id: Uuid, user_id: &str) -> StoreResult<CancelOutcome>;

    /// pending → processing (compare-and-swap). pending이 아니면 None
    async fn claim_withdrawal(&self, id: Uuid) -> StoreResult<Option<WithdrawalRequest>>;

    /// processing → completed
    async fn complete_withdrawal(
        &self,
        id: Uuid,
        settlement: WithdrawalSettlement,
    ) -> StoreResult<WithdrawalRequest>;

    /// processing → failed (예약 debit은 유지)
    async fn fail_withdrawal(
        &self,
        id: Uuid,
        error_message: &str,
        tx_hash: Option<&str>,
    ) -> StoreResult<WithdrawalRequest>;

    /// 오래된 순
    async fn pending_withdrawals(&self, network: &str, limit: i64) -> StoreResult<Vec<WithdrawalRequest>>;

    async fn list_withdrawals(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WithdrawalRequest>, i64)>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_wallet(&self, user_id: &str, network: &str) -> StoreResult<Option<CryptoWallet>>;

    /// (user, network)가 이미 있으면 기존 지갑 반환 (재생성하지 않음)
    async fn insert_wallet(&self, wallet: CryptoWallet) -> StoreResult<CryptoWallet>;

    /// lowercase 주소 → user id
    async fn wallet_owners(&self, network: &str) -> StoreResult<HashMap<String, String>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn user_exists(&self, user_id: &str) -> StoreResult<bool>;

    /// identity provider로 확인된 사용자를 등록 (이미 있으면 무시)
    async fn ensure_user(&self, user_id: &str) -> StoreResult<()>;
}

/// 서비스가 주입받는 단일 persistence 인터페이스
#[async_trait]
pub trait Repository:
    LedgerRepository
    + TransferRepository
    + LimitsRepository
    + DepositRepository
    + WithdrawalRepository
    + WalletRepository
    + UserRepository
{
    async fn health_check(&self) -> StoreResult<()>;
}
