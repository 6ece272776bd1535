//! Transfer Coordinator
//!
//! 사용자 간 송금. debit + credit은 `atomic_transfer` 하나로 적용되며
//! idempotency key 단위로 최대 한 번만 반영됨

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{
    AtomicTransfer, Repository, TransferOutcome, TransferRecord, TransferRepository, UserRepository,
};
use crate::error::{CoreError, CoreResult, LimitKind};
use crate::services::ledger::utc_day_start;
use crate::services::limits::{breach_error, LimitsEngine};
use crate::types::{Amount, PageQuery, Pagination};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: Amount,
    pub currency: String,
    pub idempotency_key: String,
}

impl TransferRequest {
    fn validate(&self) -> CoreResult<()> {
        if self.from_user_id == self.to_user_id {
            return Err(CoreError::Validation("cannot transfer to yourself".into()));
        }
        if !self.amount.is_positive() {
            return Err(CoreError::Validation("amount must be greater than zero".into()));
        }
        if self.currency.trim().is_empty() {
            return Err(CoreError::Validation("currency is required".into()));
        }
        if self.idempotency_key.trim().is_empty() || self.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(CoreError::Validation("idempotency key must be 1-255 characters".into()));
        }
        Ok(())
    }

    /// 같은 key로 들어온 요청이 같은 송금인지
    fn matches(&self, record: &TransferRecord) -> bool {
        record.from_user_id == self.from_user_id
            && record.to_user_id == self.to_user_id
            && record.amount == self.amount
            && record.currency == self.currency
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub transaction_id: Uuid,
    pub from_balance: Amount,
    pub to_balance: Amount,
    /// 이전 요청의 결과를 그대로 돌려준 경우
    #[serde(skip)]
    pub replayed: bool,
}

#[derive(Clone)]
pub struct TransferCoordinator {
    repo: Arc<dyn Repository>,
    limits: LimitsEngine,
}

impl TransferCoordinator {
    pub fn new(repo: Arc<dyn Repository>, limits: LimitsEngine) -> Self {
        Self { repo, limits }
    }

    pub async fn transfer(&self, request: TransferRequest) -> CoreResult<TransferResult> {
        request.validate()?;

        // 1. idempotency key 재사용 확인
        if let Some(existing) = self.repo.find_transfer_by_key(&request.idempotency_key).await? {
            return self.replay(&request, existing).await;
        }

        // 2. 수신자 확인
        if !self.repo.user_exists(&request.to_user_id).await? {
            return Err(CoreError::NotFound(format!("user {}", request.to_user_id)));
        }

        // 3. 사전 한도 검사 (어떤 한도가 위반됐는지 보고)
        self.limits
            .validate_transfer_limits(&request.from_user_id, &request.to_user_id, &request.currency, request.amount)
            .await?;

        // 4. 원자적 적용: 잔고/일일 한도/최대 잔고를 같은 트랜잭션에서 재검사
        let sender_limits = self.limits.get_limits(&request.from_user_id, &request.currency).await?;
        let recipient_limits = self.limits.get_limits(&request.to_user_id, &request.currency).await?;

        let outcome = self
            .repo
            .atomic_transfer(AtomicTransfer {
                transfer_id: Uuid::new_v4(),
                idempotency_key: request.idempotency_key.clone(),
                from_user_id: request.from_user_id.clone(),
                to_user_id: request.to_user_id.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                sender_daily_limit: sender_limits.daily_transfer_limit,
                recipient_max_balance: recipient_limits.max_balance,
                day_start: utc_day_start(Utc::now()),
            })
            .await?;

        match outcome {
            TransferOutcome::Applied { record, from_balance, to_balance } => {
                info!(
                    transfer_id = %record.id,
                    from = %record.from_user_id,
                    to = %record.to_user_id,
                    amount = %record.amount,
                    currency = %record.currency,
                    "Transfer applied"
                );
                Ok(TransferResult {
                    transaction_id: record.id,
                    from_balance,
                    to_balance,
                    replayed: false,
                })
            }
            // 동시에 같은 key로 들어온 다른 요청이 먼저 적용됨
            TransferOutcome::Replayed { record, from_balance, to_balance } => {
                if !request.matches(&record) {
                    return Err(CoreError::DuplicateRequest(request.idempotency_key));
                }
                Ok(TransferResult {
                    transaction_id: record.id,
                    from_balance,
                    to_balance,
                    replayed: true,
                })
            }
            TransferOutcome::Rejected(breach) => {
                warn!(from = %request.from_user_id, to = %request.to_user_id, ?breach, "Transfer rejected");
                Err(breach_error(breach, LimitKind::DailyTransferLimit))
            }
        }
    }

    async fn replay(&self, request: &TransferRequest, existing: TransferRecord) -> CoreResult<TransferResult> {
        if !request.matches(&existing) {
            warn!(key = %request.idempotency_key, "Idempotency key reused for a different transfer");
            return Err(CoreError::DuplicateRequest(request.idempotency_key.clone()));
        }

        info!(transfer_id = %existing.id, "Transfer replayed from idempotency key");

        // 처음 적용 시점의 잔고를 그대로 반환
        Ok(TransferResult {
            transaction_id: existing.id,
            from_balance: existing.from_balance,
            to_balance: existing.to_balance,
            replayed: true,
        })
    }

    /// 보낸 송금 + 받은 송금 (최신순)
    pub async fn history(&self, user_id: &str, page: &PageQuery) -> CoreResult<(Vec<TransferRecord>, Pagination)> {
        let (records, total) = self
            .repo
            .transfer_history(user_id, page.limit(), page.offset())
            .await?;
        Ok((records, page.paginate(total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitDefaults;
    use crate::db::mock::MockRepository;
    use crate::db::{LedgerRepository, LimitsRepository, LimitsUpdate};
    use crate::services::ledger::LedgerStore;
    use tokio_test::assert_ok;

    fn setup() -> (Arc<MockRepository>, TransferCoordinator) {
        let repo = Arc::new(MockRepository::new());
        let ledger = LedgerStore::new(repo.clone());
        let limits = LimitsEngine::new(repo.clone(), ledger, LimitDefaults::default());
        repo.add_user("A");
        repo.add_user("B");
        (repo.clone(), TransferCoordinator::new(repo, limits))
    }

    fn request(amount: i64, key: &str) -> TransferRequest {
        TransferRequest {
            from_user_id: "A".into(),
            to_user_id: "B".into(),
            amount: Amount::whole(amount),
            currency: "USDT".into(),
            idempotency_key: key.into(),
        }
    }

    async fn balance(repo: &MockRepository, user: &str) -> Amount {
        repo.balance(user, "USDT").await.unwrap()
    }

    #[tokio::test]
    async fn test_transfer_conserves_value() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));
        repo.seed_balance("B", "USDT", Amount::whole(5));

        let result = coordinator.transfer(request(40, "k-cons")).await.unwrap();
        assert_eq!(result.from_balance, Amount::whole(60));
        assert_eq!(result.to_balance, Amount::whole(45));

        let total = balance(&repo, "A").await + balance(&repo, "B").await;
        assert_eq!(total, Amount::whole(105));
    }

    #[tokio::test]
    async fn test_same_key_twice_applies_once() {
        // A=100 → transfer(A,B,30,"k1") 두 번 → A=70, B=30
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));

        let first = coordinator.transfer(request(30, "k1")).await.unwrap();
        let second = coordinator.transfer(request(30, "k1")).await.unwrap();

        assert_eq!(first.transaction_id, second.transaction_id);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(balance(&repo, "A").await, Amount::whole(70));
        assert_eq!(balance(&repo, "B").await, Amount::whole(30));
        assert_eq!(second.from_balance, Amount::whole(70));
        assert_eq!(second.to_balance, Amount::whole(30));

        let transfer_entries = repo
            .entries_for("A")
            .into_iter()
            .filter(|e| e.entry_type == crate::db::EntryType::Transfer)
            .count();
        assert_eq!(transfer_entries, 1);
    }

    #[tokio::test]
    async fn test_replay_returns_original_balances_after_later_activity() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));

        let first = coordinator.transfer(request(30, "k1")).await.unwrap();
        coordinator.transfer(request(10, "k2")).await.unwrap();
        let replay = coordinator.transfer(request(30, "k1")).await.unwrap();

        assert!(replay.replayed);
        assert_eq!(replay.transaction_id, first.transaction_id);
        assert_eq!((replay.from_balance, replay.to_balance), (first.from_balance, first.to_balance));
        assert_eq!(replay.from_balance, Amount::whole(70));
        assert_eq!(replay.to_balance, Amount::whole(30));
        assert_eq!(balance(&repo, "A").await, Amount::whole(60));
    }

    #[tokio::test]
    async fn test_store_replay_outcome_carries_recorded_balances() {
        // 사전 조회를 지나친 동시 요청: atomic_transfer 자체의 replay 경로
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));
        coordinator.transfer(request(30, "k1")).await.unwrap();
        coordinator.transfer(request(10, "k2")).await.unwrap();

        let outcome = repo
            .atomic_transfer(AtomicTransfer {
                transfer_id: Uuid::new_v4(),
                idempotency_key: "k1".into(),
                from_user_id: "A".into(),
                to_user_id: "B".into(),
                amount: Amount::whole(30),
                currency: "USDT".into(),
                sender_daily_limit: Amount::whole(25_000),
                recipient_max_balance: Amount::whole(10_000),
                day_start: utc_day_start(Utc::now()),
            })
            .await
            .unwrap();

        match outcome {
            TransferOutcome::Replayed { from_balance, to_balance, .. } => {
                assert_eq!(from_balance, Amount::whole(70));
                assert_eq!(to_balance, Amount::whole(30));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_amount_conflicts() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));

        assert_ok!(coordinator.transfer(request(30, "k1")).await);
        let err = coordinator.transfer(request(31, "k1")).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRequest(_)));
        assert_eq!(balance(&repo, "A").await, Amount::whole(70));
    }

    #[tokio::test]
    async fn test_over_max_transaction_rejected_without_side_effects() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(9_000));

        let err = coordinator.transfer(request(5_001, "k-big")).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::LimitExceeded { limit: LimitKind::MaxTransactionAmount, .. }
        ));
        assert_eq!(balance(&repo, "A").await, Amount::whole(9_000));
        assert_eq!(balance(&repo, "B").await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(10));

        match coordinator.transfer(request(11, "k-poor")).await {
            Err(CoreError::InsufficientBalance { available, requested }) => {
                assert_eq!(available, Amount::whole(10));
                assert_eq!(requested, Amount::whole(11));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(balance(&repo, "B").await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_recipient_max_balance() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));
        repo.seed_balance("B", "USDT", Amount::whole(9_950));

        let err = coordinator.transfer(request(60, "k-rich")).await.unwrap_err();
        assert!(matches!(err, CoreError::LimitExceeded { limit: LimitKind::MaxBalance, .. }));
        assert_eq!(balance(&repo, "A").await, Amount::whole(100));
    }

    #[tokio::test]
    async fn test_validation_and_unknown_recipient() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));

        let mut to_self = request(1, "k-self");
        to_self.to_user_id = "A".into();
        assert!(matches!(coordinator.transfer(to_self).await, Err(CoreError::Validation(_))));

        assert!(matches!(
            coordinator.transfer(request(0, "k-zero")).await,
            Err(CoreError::Validation(_))
        ));

        let mut unknown = request(1, "k-ghost");
        unknown.to_user_id = "ghost".into();
        assert!(matches!(coordinator.transfer(unknown).await, Err(CoreError::NotFound(_))));
        assert_eq!(balance(&repo, "A").await, Amount::whole(100));
    }

    #[tokio::test]
    async fn test_concurrent_transfers_cannot_overdraw_daily_limit() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(1_000));
        let ledger = LedgerStore::new(repo.clone());
        LimitsEngine::new(repo.clone(), ledger, LimitDefaults::default())
            .get_limits("A", "USDT")
            .await
            .unwrap();
        repo.update_limits(
            "A",
            "USDT",
            &LimitsUpdate {
                daily_transfer_limit: Some(Amount::whole(100)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.transfer(request(30, &format!("race-{}", i))).await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                applied += 1;
            }
        }

        // 30 × 3 = 90 ≤ 100 < 120
        assert_eq!(applied, 3);
        assert_eq!(balance(&repo, "A").await, Amount::whole(910));
        assert_eq!(balance(&repo, "B").await, Amount::whole(90));
    }

    #[tokio::test]
    async fn test_history_includes_both_directions() {
        let (repo, coordinator) = setup();
        repo.seed_balance("A", "USDT", Amount::whole(100));
        repo.seed_balance("B", "USDT", Amount::whole(100));

        coordinator.transfer(request(10, "h1")).await.unwrap();
        let mut back = request(5, "h2");
        back.from_user_id = "B".into();
        back.to_user_id = "A".into();
        coordinator.transfer(back).await.unwrap();

        let (records, pagination) = coordinator.history("A", &PageQuery::default()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].idempotency_key, "h2");
        assert_eq!(pagination.total, 2);
        assert!(!pagination.has_next);
    }
}
