//! In-memory Repository (테스트 전용)
//!
//! 모든 상태를 하나의 Mutex 뒤에 두어 PostgreSQL 구현의 원자성을 그대로 흉내냄

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use super::repository::*;
use crate::types::Amount;

#[derive(Default)]
struct State {
    users: HashSet<String>,
    entries: Vec<LedgerEntry>,
    limits: HashMap<(String, String), UserLimits>,
    transfers: Vec<TransferRecord>,
    deposits: Vec<DepositTransaction>,
    scan_cursor: HashMap<String, u64>,
    withdrawals: Vec<WithdrawalRequest>,
    wallets: Vec<CryptoWallet>,
    unhealthy: bool,
}

impl State {
    fn balance(&self, user_id: &str, currency: &str) -> Amount {
        self.entries
            .iter()
            .filter(|e| e.user_id == user_id && e.currency == currency && e.status == EntryStatus::Posted)
            .map(|e| e.amount)
            .sum()
    }

    fn outflow(&self, user_id: &str, currency: &str, entry_type: EntryType, since: DateTime<Utc>) -> Amount {
        self.entries
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && e.currency == currency
                    && e.entry_type == entry_type
                    && e.status == EntryStatus::Posted
                    && e.created_at >= since
            })
            .map(|e| {
                if e.amount.is_negative() {
                    e.amount.abs()
                } else if matches!(e.metadata, Some(EntryMetadata::WithdrawalRefund { .. })) {
                    -e.amount
                } else {
                    Amount::ZERO
                }
            })
            .sum::<Amount>()
            .clamp_non_negative()
    }

    fn find_by_reference(&self, reference: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.reference.as_deref() == Some(reference))
    }

    /// reference 충돌 시 None
    fn insert_entry(&mut self, entry: LedgerEntry) -> Option<LedgerEntry> {
        if let Some(reference) = entry.reference.as_deref() {
            if self.find_by_reference(reference).is_some() {
                return None;
            }
        }
        self.entries.push(entry.clone());
        Some(entry)
    }

    fn deposit_mut(&mut self, tx_hash: &str) -> Option<&mut DepositTransaction> {
        let tx_hash = tx_hash.to_lowercase();
        self.deposits.iter_mut().find(|d| d.tx_hash == tx_hash)
    }

    fn withdrawal_mut(&mut self, id: Uuid) -> Option<&mut WithdrawalRequest> {
        self.withdrawals.iter_mut().find(|w| w.id == id)
    }
}

fn page<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let page = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (page, total)
}

#[derive(Default)]
pub struct MockRepository {
    state: Mutex<State>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str) {
        self.state.lock().unwrap().users.insert(user_id.to_string());
    }

    /// 사용자 등록 + 잔고 시드 (credit entry)
    pub fn seed_balance(&self, user_id: &str, currency: &str, amount: Amount) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(user_id.to_string());
        let entry = NewLedgerEntry {
            user_id: user_id.to_string(),
            amount,
            currency: currency.to_string(),
            entry_type: EntryType::Credit,
            reference: None,
            metadata: Some(EntryMetadata::Adjustment { note: "seed".to_string() }),
        }
        .into_entry(Utc::now());
        state.entries.push(entry);
    }

    /// 임의 시각의 entry 삽입 (일일 한도 경계 테스트용)
    pub fn insert_entry_at(&self, entry: NewLedgerEntry, created_at: DateTime<Utc>) {
        let entry = entry.into_entry(created_at);
        self.state.lock().unwrap().entries.push(entry);
    }

    pub fn entries_for(&self, user_id: &str) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn all_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.state.lock().unwrap().unhealthy = unhealthy;
    }

    pub fn set_withdrawal_status(&self, id: Uuid, status: WithdrawalStatus) {
        if let Some(w) = self.state.lock().unwrap().withdrawal_mut(id) {
            w.status = status;
        }
    }
}

#[async_trait]
impl LedgerRepository for MockRepository {
    async fn balance(&self, user_id: &str, currency: &str) -> StoreResult<Amount> {
        Ok(self.state.lock().unwrap().balance(user_id, currency))
    }

    async fn balances(&self, user_id: &str) -> StoreResult<Vec<(String, Amount)>> {
        let state = self.state.lock().unwrap();
        let mut totals: HashMap<String, Amount> = HashMap::new();
        for e in state.entries.iter().filter(|e| e.user_id == user_id && e.status == EntryStatus::Posted) {
            let total = totals.entry(e.currency.clone()).or_insert(Amount::ZERO);
            *total = *total + e.amount;
        }
        let mut out: Vec<(String, Amount)> = totals.into_iter().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> StoreResult<Appended> {
        let mut state = self.state.lock().unwrap();
        let entry = entry.into_entry(Utc::now());
        if let Some(reference) = entry.reference.clone() {
            if let Some(existing) = state.find_by_reference(&reference) {
                return Ok(Appended { entry: existing.clone(), created: false });
            }
        }
        state.entries.push(entry.clone());
        Ok(Appended { entry, created: true })
    }

    async fn find_entry_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.state.lock().unwrap().find_by_reference(reference).cloned())
    }

    async fn history(
        &self,
        user_id: &str,
        currency: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<LedgerEntry>, i64)> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && currency.map_or(true, |c| e.currency == c))
            .cloned()
            .collect();
        // 같은 시각이면 나중에 들어간 entry가 먼저
        items.reverse();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(items, limit, offset))
    }

    async fn outflow_since(
        &self,
        user_id: &str,
        currency: &str,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> StoreResult<Amount> {
        Ok(self.state.lock().unwrap().outflow(user_id, currency, entry_type, since))
    }
}

#[async_trait]
impl TransferRepository for MockRepository {
    async fn find_transfer_by_key(&self, idempotency_key: &str) -> StoreResult<Option<TransferRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.transfers.iter().find(|t| t.idempotency_key == idempotency_key).cloned())
    }

    async fn atomic_transfer(&self, t: AtomicTransfer) -> StoreResult<TransferOutcome> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.transfers.iter().find(|r| r.idempotency_key == t.idempotency_key).cloned() {
            let (from_balance, to_balance) = (existing.from_balance, existing.to_balance);
            return Ok(TransferOutcome::Replayed { record: existing, from_balance, to_balance });
        }

        let from_balance = state.balance(&t.from_user_id, &t.currency);
        if from_balance < t.amount {
            return Ok(TransferOutcome::Rejected(Breach::InsufficientBalance {
                available: from_balance,
                requested: t.amount,
            }));
        }

        let used = state.outflow(&t.from_user_id, &t.currency, EntryType::Transfer, t.day_start);
        if used.would_exceed(t.amount, t.sender_daily_limit) {
            return Ok(TransferOutcome::Rejected(Breach::DailyLimit {
                used,
                requested: t.amount,
                limit: t.sender_daily_limit,
            }));
        }

        let to_balance = state.balance(&t.to_user_id, &t.currency);
        if to_balance.would_exceed(t.amount, t.recipient_max_balance) {
            return Ok(TransferOutcome::Rejected(Breach::MaxBalance {
                current: to_balance,
                requested: t.amount,
                limit: t.recipient_max_balance,
            }));
        }

        let now = Utc::now();
        let record = TransferRecord {
            id: t.transfer_id,
            idempotency_key: t.idempotency_key.clone(),
            from_user_id: t.from_user_id.clone(),
            to_user_id: t.to_user_id.clone(),
            amount: t.amount,
            currency: t.currency.clone(),
            from_balance: from_balance - t.amount,
            to_balance: to_balance + t.amount,
            created_at: now,
        };
        state.transfers.push(record.clone());

        let legs = [
            (&t.from_user_id, -t.amount, reference::transfer_debit(t.transfer_id), &t.to_user_id),
            (&t.to_user_id, t.amount, reference::transfer_credit(t.transfer_id), &t.from_user_id),
        ];
        for (user, amount, reference, counterparty) in legs {
            let entry = NewLedgerEntry {
                user_id: user.clone(),
                amount,
                currency: t.currency.clone(),
                entry_type: EntryType::Transfer,
                reference: Some(reference),
                metadata: Some(EntryMetadata::Transfer {
                    transfer_id: t.transfer_id,
                    counterparty: counterparty.clone(),
                }),
            }
            .into_entry(now);
            state.insert_entry(entry);
        }

        Ok(TransferOutcome::Applied {
            from_balance: record.from_balance,
            to_balance: record.to_balance,
            record,
        })
    }

    async fn transfer_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<TransferRecord>, i64)> {
        let state = self.state.lock().unwrap();
        let items: Vec<TransferRecord> = state
            .transfers
            .iter()
            .rev()
            .filter(|t| t.from_user_id == user_id || t.to_user_id == user_id)
            .cloned()
            .collect();
        Ok(page(items, limit, offset))
    }
}

#[async_trait]
impl LimitsRepository for MockRepository {
    async fn find_limits(&self, user_id: &str, currency: &str) -> StoreResult<Option<UserLimits>> {
        let state = self.state.lock().unwrap();
        Ok(state.limits.get(&(user_id.to_string(), currency.to_string())).cloned())
    }

    async fn insert_limits(&self, limits: UserLimits) -> StoreResult<UserLimits> {
        let mut state = self.state.lock().unwrap();
        let key = (limits.user_id.clone(), limits.currency.clone());
        Ok(state.limits.entry(key).or_insert(limits).clone())
    }

    async fn update_limits(
        &self,
        user_id: &str,
        currency: &str,
        update: &LimitsUpdate,
    ) -> StoreResult<UserLimits> {
        let mut state = self.state.lock().unwrap();
        let limits = state
            .limits
            .get_mut(&(user_id.to_string(), currency.to_string()))
            .ok_or_else(|| StoreError::Missing(format!("limits for {}", user_id)))?;
        update.apply(limits);
        limits.updated_at = Utc::now();
        Ok(limits.clone())
    }
}

#[async_trait]
impl DepositRepository for MockRepository {
    async fn insert_deposit(&self, mut deposit: DepositTransaction) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        deposit.tx_hash = deposit.tx_hash.to_lowercase();
        if state.deposits.iter().any(|d| d.tx_hash == deposit.tx_hash) {
            return Ok(false);
        }
        state.deposits.push(deposit);
        Ok(true)
    }

    async fn find_deposit(&self, tx_hash: &str) -> StoreResult<Option<DepositTransaction>> {
        Ok(self.state.lock().unwrap().deposit_mut(tx_hash).map(|d| d.clone()))
    }

    async fn deposits_by_status(
        &self,
        network: &str,
        status: DepositStatus,
        limit: i64,
    ) -> StoreResult<Vec<DepositTransaction>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<DepositTransaction> = state
            .deposits
            .iter()
            .filter(|d| d.network == network && d.status == status)
            .cloned()
            .collect();
        items.sort_by_key(|d| d.block_number);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn update_confirmations(
        &self,
        tx_hash: &str,
        confirmations: i64,
        status: DepositStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.deposit_mut(tx_hash) {
            if d.status == DepositStatus::Pending {
                d.confirmations = confirmations;
                d.status = status;
            }
        }
        Ok(())
    }

    async fn credit_deposit(&self, tx_hash: &str, max_balance: Amount) -> StoreResult<DepositCreditOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(deposit) = state.deposit_mut(tx_hash).map(|d| d.clone()) else {
            return Ok(DepositCreditOutcome::NotFound);
        };
        match deposit.status {
            DepositStatus::Processed | DepositStatus::Failed => {
                return Ok(DepositCreditOutcome::AlreadyFinal(deposit));
            }
            DepositStatus::Pending => return Ok(DepositCreditOutcome::NotConfirmed(deposit)),
            DepositStatus::Confirmed => {}
        }

        let user_id = deposit
            .user_id
            .clone()
            .ok_or_else(|| StoreError::Corrupt(format!("deposit {} has no owner", deposit.tx_hash)))?;
        let current = state.balance(&user_id, &deposit.currency);
        let now = Utc::now();

        if current.would_exceed(deposit.amount, max_balance) {
            let breach = Breach::MaxBalance {
                current,
                requested: deposit.amount,
                limit: max_balance,
            };
            let d = state
                .deposit_mut(tx_hash)
                .ok_or_else(|| StoreError::Missing(format!("deposit {}", tx_hash)))?;
            d.status = DepositStatus::Failed;
            d.error_message = Some(format!(
                "max_balance exceeded: {} + {} > {}",
                current, deposit.amount, max_balance
            ));
            d.processed_at = Some(now);
            return Ok(DepositCreditOutcome::Failed { deposit: d.clone(), breach });
        }

        let reference = reference::deposit(&deposit.tx_hash);
        let entry = match state.find_by_reference(&reference) {
            Some(existing) => existing.clone(),
            None => {
                let entry = NewLedgerEntry {
                    user_id,
                    amount: deposit.amount,
                    currency: deposit.currency.clone(),
                    entry_type: EntryType::Deposit,
                    reference: Some(reference),
                    metadata: Some(EntryMetadata::Deposit {
                        tx_hash: deposit.tx_hash.clone(),
                        network: deposit.network.clone(),
                    }),
                }
                .into_entry(now);
                state.entries.push(entry.clone());
                entry
            }
        };

        let d = state
            .deposit_mut(tx_hash)
            .ok_or_else(|| StoreError::Missing(format!("deposit {}", tx_hash)))?;
        d.status = DepositStatus::Processed;
        d.processed_at = Some(now);
        Ok(DepositCreditOutcome::Processed { deposit: d.clone(), entry })
    }

    async fn fail_deposit(&self, tx_hash: &str, reason: &str) -> StoreResult<Option<DepositTransaction>> {
        let mut state = self.state.lock().unwrap();
        match state.deposit_mut(tx_hash) {
            Some(d) if d.status == DepositStatus::Confirmed => {
                d.status = DepositStatus::Failed;
                d.error_message = Some(reason.to_string());
                d.processed_at = Some(Utc::now());
                Ok(Some(d.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<DepositTransaction>, i64)> {
        let state = self.state.lock().unwrap();
        let items: Vec<DepositTransaction> = state
            .deposits
            .iter()
            .rev()
            .filter(|d| d.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        Ok(page(items, limit, offset))
    }

    async fn last_scanned_block(&self, network: &str) -> StoreResult<Option<u64>> {
        Ok(self.state.lock().unwrap().scan_cursor.get(network).copied())
    }

    async fn set_last_scanned_block(&self, network: &str, block: u64) -> StoreResult<()> {
        self.state.lock().unwrap().scan_cursor.insert(network.to_string(), block);
        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for MockRepository {
    async fn find_withdrawal(&self, id: Uuid) -> StoreResult<Option<WithdrawalRequest>> {
        Ok(self.state.lock().unwrap().withdrawal_mut(id).map(|w| w.clone()))
    }

    async fn find_withdrawal_by_key(&self, idempotency_key: &str) -> StoreResult<Option<WithdrawalRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state.withdrawals.iter().find(|w| w.idempotency_key == idempotency_key).cloned())
    }

    async fn reserve_withdrawal(
        &self,
        withdrawal: NewWithdrawal,
        daily_limit: Amount,
        day_start: DateTime<Utc>,
    ) -> StoreResult<ReserveOutcome> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state
            .withdrawals
            .iter()
            .find(|w| w.idempotency_key == withdrawal.idempotency_key)
        {
            return Ok(ReserveOutcome::Duplicate(existing.clone()));
        }

        let balance = state.balance(&withdrawal.user_id, &withdrawal.currency);
        if balance < withdrawal.amount {
            return Ok(ReserveOutcome::Rejected(Breach::InsufficientBalance {
                available: balance,
                requested: withdrawal.amount,
            }));
        }

        let used = state.outflow(&withdrawal.user_id, &withdrawal.currency, EntryType::Withdrawal, day_start);
        if used.would_exceed(withdrawal.amount, daily_limit) {
            return Ok(ReserveOutcome::Rejected(Breach::DailyLimit {
                used,
                requested: withdrawal.amount,
                limit: daily_limit,
            }));
        }

        let now = Utc::now();
        let request = withdrawal.into_request(now);
        let entry = NewLedgerEntry {
            user_id: request.user_id.clone(),
            amount: -request.amount,
            currency: request.currency.clone(),
            entry_type: EntryType::Withdrawal,
            reference: Some(reference::withdrawal(request.id)),
            metadata: Some(EntryMetadata::Withdrawal {
                withdrawal_id: request.id,
                network: request.network.clone(),
                to_address: request.to_address.clone(),
            }),
        }
        .into_entry(now);
        state.insert_entry(entry);
        state.withdrawals.push(request.clone());

        Ok(ReserveOutcome::Reserved(request))
    }

    async fn cancel_withdrawal(&self, id: Uuid, user_id: &str) -> StoreResult<CancelOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(request) = state.withdrawal_mut(id).map(|w| w.clone()) else {
            return Ok(CancelOutcome::NotFound);
        };
        if request.user_id != user_id {
            return Ok(CancelOutcome::NotFound);
        }
        if request.status != WithdrawalStatus::Pending {
            return Ok(CancelOutcome::NotCancellable(request.status));
        }

        let now = Utc::now();
        let refund = NewLedgerEntry {
            user_id: request.user_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            entry_type: EntryType::Withdrawal,
            reference: Some(reference::withdrawal_refund(id)),
            metadata: Some(EntryMetadata::WithdrawalRefund { withdrawal_id: id }),
        }
        .into_entry(now);
        state.insert_entry(refund);

        let w = state
            .withdrawal_mut(id)
            .ok_or_else(|| StoreError::Missing(format!("withdrawal {}", id)))?;
        w.status = WithdrawalStatus::Cancelled;
        w.updated_at = now;
        Ok(CancelOutcome::Cancelled(w.clone()))
    }

    async fn claim_withdrawal(&self, id: Uuid) -> StoreResult<Option<WithdrawalRequest>> {
        let mut state = self.state.lock().unwrap();
        match state.withdrawal_mut(id) {
            Some(w) if w.status == WithdrawalStatus::Pending => {
                w.status = WithdrawalStatus::Processing;
                w.updated_at = Utc::now();
                Ok(Some(w.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_withdrawal(
        &self,
        id: Uuid,
        settlement: WithdrawalSettlement,
    ) -> StoreResult<WithdrawalRequest> {
        let mut state = self.state.lock().unwrap();
        match state.withdrawal_mut(id) {
            Some(w) if w.status == WithdrawalStatus::Processing => {
                w.status = WithdrawalStatus::Completed;
                w.tx_hash = Some(settlement.tx_hash);
                w.gas_used = Some(settlement.gas_used);
                w.gas_fee = Some(settlement.gas_fee);
                w.error_message = None;
                w.updated_at = Utc::now();
                Ok(w.clone())
            }
            _ => Err(StoreError::Missing(format!("processing withdrawal {}", id))),
        }
    }

    async fn fail_withdrawal(
        &self,
        id: Uuid,
        error_message: &str,
        tx_hash: Option<&str>,
    ) -> StoreResult<WithdrawalRequest> {
        let mut state = self.state.lock().unwrap();
        match state.withdrawal_mut(id) {
            Some(w) if w.status == WithdrawalStatus::Processing => {
                w.status = WithdrawalStatus::Failed;
                w.error_message = Some(error_message.to_string());
                if let Some(hash) = tx_hash {
                    w.tx_hash = Some(hash.to_string());
                }
                w.updated_at = Utc::now();
                Ok(w.clone())
            }
            _ => Err(StoreError::Missing(format!("processing withdrawal {}", id))),
        }
    }

    async fn pending_withdrawals(&self, network: &str, limit: i64) -> StoreResult<Vec<WithdrawalRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .withdrawals
            .iter()
            .filter(|w| w.network == network && w.status == WithdrawalStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_withdrawals(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WithdrawalRequest>, i64)> {
        let state = self.state.lock().unwrap();
        let items: Vec<WithdrawalRequest> = state
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        Ok(page(items, limit, offset))
    }
}

#[async_trait]
impl WalletRepository for MockRepository {
    async fn find_wallet(&self, user_id: &str, network: &str) -> StoreResult<Option<CryptoWallet>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .wallets
            .iter()
            .find(|w| w.user_id == user_id && w.network == network)
            .cloned())
    }

    async fn insert_wallet(&self, mut wallet: CryptoWallet) -> StoreResult<CryptoWallet> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .wallets
            .iter()
            .find(|w| w.user_id == wallet.user_id && w.network == wallet.network)
        {
            return Ok(existing.clone());
        }
        wallet.address = wallet.address.to_lowercase();
        if state
            .wallets
            .iter()
            .any(|w| w.network == wallet.network && w.address == wallet.address)
        {
            return Err(StoreError::Corrupt(format!("address {} already assigned", wallet.address)));
        }
        state.wallets.push(wallet.clone());
        Ok(wallet)
    }

    async fn wallet_owners(&self, network: &str) -> StoreResult<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .wallets
            .iter()
            .filter(|w| w.network == network)
            .map(|w| (w.address.to_lowercase(), w.user_id.clone()))
            .collect())
    }
}

#[async_trait]
impl UserRepository for MockRepository {
    async fn user_exists(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self.state.lock().unwrap().users.contains(user_id))
    }

    async fn ensure_user(&self, user_id: &str) -> StoreResult<()> {
        self.state.lock().unwrap().users.insert(user_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn health_check(&self) -> StoreResult<()> {
        if self.state.lock().unwrap().unhealthy {
            return Err(StoreError::Missing("database connection".into()));
        }
        Ok(())
    }
}
