//! PostgreSQL Repository 구현
//!
//! 한도 검사가 필요한 쓰기는 모두 하나의 트랜잭션 안에서
//! `pg_advisory_xact_lock(hashtext('user:<id>'))`로 사용자 단위 직렬화 후 수행

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::models::*;
use super::repository::*;
use super::Database;
use crate::types::Amount;

// ============ Row types ============

const LEDGER_COLUMNS: &str =
    "id, user_id, amount, currency, entry_type, reference, status, metadata, created_at";

#[derive(FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: String,
    amount: i64,
    currency: String,
    entry_type: String,
    reference: Option<String>,
    status: String,
    metadata: Option<Json<EntryMetadata>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> StoreResult<Self> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            amount: Amount::from_units(row.amount),
            currency: row.currency,
            entry_type: parse(&row.entry_type)?,
            reference: row.reference,
            status: parse(&row.status)?,
            metadata: row.metadata.map(|m| m.0),
            created_at: row.created_at,
        })
    }
}

const TRANSFER_COLUMNS: &str =
    "id, idempotency_key, from_user_id, to_user_id, amount, currency, from_balance, to_balance, created_at";

#[derive(FromRow)]
struct TransferRow {
    id: Uuid,
    idempotency_key: String,
    from_user_id: String,
    to_user_id: String,
    amount: i64,
    currency: String,
    from_balance: i64,
    to_balance: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for TransferRecord {
    fn from(row: TransferRow) -> Self {
        TransferRecord {
            id: row.id,
            idempotency_key: row.idempotency_key,
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            amount: Amount::from_units(row.amount),
            currency: row.currency,
            from_balance: Amount::from_units(row.from_balance),
            to_balance: Amount::from_units(row.to_balance),
            created_at: row.created_at,
        }
    }
}

const LIMITS_COLUMNS: &str = "user_id, currency, max_balance, max_transaction_amount, \
     daily_transfer_limit, daily_withdrawal_limit, updated_at";

#[derive(FromRow)]
struct LimitsRow {
    user_id: String,
    currency: String,
    max_balance: i64,
    max_transaction_amount: i64,
    daily_transfer_limit: i64,
    daily_withdrawal_limit: i64,
    updated_at: DateTime<Utc>,
}

impl From<LimitsRow> for UserLimits {
    fn from(row: LimitsRow) -> Self {
        UserLimits {
            user_id: row.user_id,
            currency: row.currency,
            max_balance: Amount::from_units(row.max_balance),
            max_transaction_amount: Amount::from_units(row.max_transaction_amount),
            daily_transfer_limit: Amount::from_units(row.daily_transfer_limit),
            daily_withdrawal_limit: Amount::from_units(row.daily_withdrawal_limit),
            updated_at: row.updated_at,
        }
    }
}

const DEPOSIT_COLUMNS: &str = "tx_hash, user_id, network, from_address, to_address, amount, \
     currency, block_number, confirmations, status, error_message, created_at, processed_at";

#[derive(FromRow)]
struct DepositRow {
    tx_hash: String,
    user_id: Option<String>,
    network: String,
    from_address: String,
    to_address: String,
    amount: i64,
    currency: String,
    block_number: i64,
    confirmations: i64,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DepositRow> for DepositTransaction {
    type Error = StoreError;

    fn try_from(row: DepositRow) -> StoreResult<Self> {
        Ok(DepositTransaction {
            tx_hash: row.tx_hash,
            user_id: row.user_id,
            network: row.network,
            from_address: row.from_address,
            to_address: row.to_address,
            amount: Amount::from_units(row.amount),
            currency: row.currency,
            block_number: row.block_number,
            confirmations: row.confirmations,
            status: parse(&row.status)?,
            error_message: row.error_message,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount, currency, to_address, network, \
     idempotency_key, status, tx_hash, gas_used, gas_fee, error_message, created_at, updated_at";

#[derive(FromRow)]
struct WithdrawalRow {
    id: Uuid,
    user_id: String,
    amount: i64,
    currency: String,
    to_address: String,
    network: String,
    idempotency_key: String,
    status: String,
    tx_hash: Option<String>,
    gas_used: Option<i64>,
    gas_fee: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WithdrawalRow> for WithdrawalRequest {
    type Error = StoreError;

    fn try_from(row: WithdrawalRow) -> StoreResult<Self> {
        Ok(WithdrawalRequest {
            id: row.id,
            user_id: row.user_id,
            amount: Amount::from_units(row.amount),
            currency: row.currency,
            to_address: row.to_address,
            network: row.network,
            idempotency_key: row.idempotency_key,
            status: parse(&row.status)?,
            tx_hash: row.tx_hash,
            gas_used: row.gas_used,
            gas_fee: row.gas_fee,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct WalletRow {
    user_id: String,
    network: String,
    address: String,
    encrypted_private_key: String,
    created_at: DateTime<Utc>,
}

impl From<WalletRow> for CryptoWallet {
    fn from(row: WalletRow) -> Self {
        CryptoWallet {
            user_id: row.user_id,
            network: row.network,
            address: row.address,
            encrypted_private_key: row.encrypted_private_key,
            created_at: row.created_at,
        }
    }
}

fn parse<T: FromStr<Err = String>>(text: &str) -> StoreResult<T> {
    text.parse().map_err(StoreError::Corrupt)
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============ Transaction helpers ============

async fn lock_key(conn: &mut PgConnection, key: &str) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

async fn lock_user(conn: &mut PgConnection, user_id: &str) -> StoreResult<()> {
    lock_key(conn, &format!("user:{}", user_id)).await
}

async fn balance_in(conn: &mut PgConnection, user_id: &str, currency: &str) -> StoreResult<Amount> {
    let units: i64 = sqlx::query_scalar("SELECT get_user_balance($1, $2)")
        .bind(user_id)
        .bind(currency)
        .fetch_one(conn)
        .await?;
    Ok(Amount::from_units(units))
}

/// 음수 entry 합 (출금 취소 환불은 상쇄)
const OUTFLOW_SQL: &str = r#"
    SELECT COALESCE(SUM(
        CASE
            WHEN amount < 0 THEN -amount
            WHEN metadata->>'kind' = 'withdrawal_refund' THEN -amount
            ELSE 0
        END
    ), 0)::BIGINT
    FROM ledger_entries
    WHERE user_id = $1
      AND currency = $2
      AND entry_type = $3
      AND status = 'posted'
      AND created_at >= $4
"#;

async fn outflow_in(
    conn: &mut PgConnection,
    user_id: &str,
    currency: &str,
    entry_type: EntryType,
    since: DateTime<Utc>,
) -> StoreResult<Amount> {
    let units: i64 = sqlx::query_scalar(OUTFLOW_SQL)
        .bind(user_id)
        .bind(currency)
        .bind(entry_type.as_str())
        .bind(since)
        .fetch_one(conn)
        .await?;
    Ok(Amount::from_units(units).clamp_non_negative())
}

async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> StoreResult<Option<LedgerEntry>> {
    let row = sqlx::query_as::<_, LedgerRow>(&format!(
        r#"
        INSERT INTO ledger_entries (id, user_id, amount, currency, entry_type, reference, status, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (reference) DO NOTHING
        RETURNING {}
        "#,
        LEDGER_COLUMNS
    ))
    .bind(entry.id)
    .bind(&entry.user_id)
    .bind(entry.amount.units())
    .bind(&entry.currency)
    .bind(entry.entry_type.as_str())
    .bind(&entry.reference)
    .bind(entry.status.as_str())
    .bind(entry.metadata.clone().map(Json))
    .bind(entry.created_at)
    .fetch_optional(conn)
    .await?;

    row.map(LedgerEntry::try_from).transpose()
}

// ============ Ledger ============

#[async_trait]
impl LedgerRepository for Database {
    async fn balance(&self, user_id: &str, currency: &str) -> StoreResult<Amount> {
        let mut conn = self.pool().acquire().await?;
        balance_in(&mut conn, user_id, currency).await
    }

    async fn balances(&self, user_id: &str) -> StoreResult<Vec<(String, Amount)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT currency, COALESCE(SUM(amount), 0)::BIGINT
            FROM ledger_entries
            WHERE user_id = $1 AND status = 'posted'
            GROUP BY currency
            ORDER BY currency
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(currency, units)| (currency, Amount::from_units(units)))
            .collect())
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> StoreResult<Appended> {
        let reference = entry.reference.clone();
        let entry = entry.into_entry(Utc::now());

        let mut conn = self.pool().acquire().await?;
        if let Some(inserted) = insert_entry(&mut conn, &entry).await? {
            return Ok(Appended { entry: inserted, created: true });
        }

        // reference 충돌: 기존 entry 반환
        let reference = reference.ok_or_else(|| StoreError::Corrupt("insert without reference returned no row".into()))?;
        let existing = self
            .find_entry_by_reference(&reference)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("ledger entry {}", reference)))?;
        Ok(Appended { entry: existing, created: false })
    }

    async fn find_entry_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE reference = $1",
            LEDGER_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(self.pool())
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn history(
        &self,
        user_id: &str,
        currency: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<LedgerEntry>, i64)> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            r#"
            SELECT {}
            FROM ledger_entries
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR currency = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
            LEDGER_COLUMNS
        ))
        .bind(user_id)
        .bind(currency)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_entries WHERE user_id = $1 AND ($2::TEXT IS NULL OR currency = $2)",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_one(self.pool())
        .await?;

        Ok((convert_all(rows)?, total))
    }

    async fn outflow_since(
        &self,
        user_id: &str,
        currency: &str,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> StoreResult<Amount> {
        let mut conn = self.pool().acquire().await?;
        outflow_in(&mut conn, user_id, currency, entry_type, since).await
    }
}

// ============ Transfers ============

#[async_trait]
impl TransferRepository for Database {
    async fn find_transfer_by_key(&self, idempotency_key: &str) -> StoreResult<Option<TransferRecord>> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM transfers WHERE idempotency_key = $1",
            TRANSFER_COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(TransferRecord::from))
    }

    async fn atomic_transfer(&self, transfer: AtomicTransfer) -> StoreResult<TransferOutcome> {
        type OutcomeRow = (String, Option<Uuid>, Option<i64>, Option<i64>, Option<i64>, Option<i64>);

        let (outcome, transfer_id, from_balance, to_balance, observed, threshold): OutcomeRow =
            sqlx::query_as("SELECT * FROM atomic_transfer($1, $2, $3, $4, $5, $6, $7, $8, $9)")
                .bind(transfer.transfer_id)
                .bind(&transfer.idempotency_key)
                .bind(&transfer.from_user_id)
                .bind(&transfer.to_user_id)
                .bind(transfer.amount.units())
                .bind(&transfer.currency)
                .bind(transfer.sender_daily_limit.units())
                .bind(transfer.recipient_max_balance.units())
                .bind(transfer.day_start)
                .fetch_one(self.pool())
                .await?;

        let amount = |v: Option<i64>| Amount::from_units(v.unwrap_or(0));

        match outcome.as_str() {
            "applied" | "replayed" => {
                let id = transfer_id.ok_or_else(|| StoreError::Corrupt("atomic_transfer returned no id".into()))?;
                let row = sqlx::query_as::<_, TransferRow>(&format!(
                    "SELECT {} FROM transfers WHERE id = $1",
                    TRANSFER_COLUMNS
                ))
                .bind(id)
                .fetch_one(self.pool())
                .await?;
                let record = TransferRecord::from(row);
                let (from_balance, to_balance) = (amount(from_balance), amount(to_balance));

                Ok(if outcome == "applied" {
                    TransferOutcome::Applied { record, from_balance, to_balance }
                } else {
                    TransferOutcome::Replayed { record, from_balance, to_balance }
                })
            }
            "insufficient_balance" => Ok(TransferOutcome::Rejected(Breach::InsufficientBalance {
                available: amount(observed),
                requested: transfer.amount,
            })),
            "daily_transfer_limit" => Ok(TransferOutcome::Rejected(Breach::DailyLimit {
                used: amount(observed),
                requested: transfer.amount,
                limit: amount(threshold),
            })),
            "max_balance" => Ok(TransferOutcome::Rejected(Breach::MaxBalance {
                current: amount(observed),
                requested: transfer.amount,
                limit: amount(threshold),
            })),
            other => Err(StoreError::Corrupt(format!("unknown atomic_transfer outcome: {}", other))),
        }
    }

    async fn transfer_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<TransferRecord>, i64)> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            r#"
            SELECT {}
            FROM transfers
            WHERE from_user_id = $1 OR to_user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transfers WHERE from_user_id = $1 OR to_user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;

        Ok((rows.into_iter().map(TransferRecord::from).collect(), total))
    }
}

// ============ Limits ============

#[async_trait]
impl LimitsRepository for Database {
    async fn find_limits(&self, user_id: &str, currency: &str) -> StoreResult<Option<UserLimits>> {
        let row = sqlx::query_as::<_, LimitsRow>(&format!(
            "SELECT {} FROM user_limits WHERE user_id = $1 AND currency = $2",
            LIMITS_COLUMNS
        ))
        .bind(user_id)
        .bind(currency)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(UserLimits::from))
    }

    async fn insert_limits(&self, limits: UserLimits) -> StoreResult<UserLimits> {
        sqlx::query(
            r#"
            INSERT INTO user_limits (
                user_id, currency, max_balance, max_transaction_amount,
                daily_transfer_limit, daily_withdrawal_limit, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(&limits.user_id)
        .bind(&limits.currency)
        .bind(limits.max_balance.units())
        .bind(limits.max_transaction_amount.units())
        .bind(limits.daily_transfer_limit.units())
        .bind(limits.daily_withdrawal_limit.units())
        .bind(limits.updated_at)
        .execute(self.pool())
        .await?;

        self.find_limits(&limits.user_id, &limits.currency)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("limits for {}", limits.user_id)))
    }

    async fn update_limits(
        &self,
        user_id: &str,
        currency: &str,
        update: &LimitsUpdate,
    ) -> StoreResult<UserLimits> {
        let row = sqlx::query_as::<_, LimitsRow>(&format!(
            r#"
            UPDATE user_limits SET
                max_balance = COALESCE($3, max_balance),
                max_transaction_amount = COALESCE($4, max_transaction_amount),
                daily_transfer_limit = COALESCE($5, daily_transfer_limit),
                daily_withdrawal_limit = COALESCE($6, daily_withdrawal_limit),
                updated_at = NOW()
            WHERE user_id = $1 AND currency = $2
            RETURNING {}
            "#,
            LIMITS_COLUMNS
        ))
        .bind(user_id)
        .bind(currency)
        .bind(update.max_balance.map(Amount::units))
        .bind(update.max_transaction_amount.map(Amount::units))
        .bind(update.daily_transfer_limit.map(Amount::units))
        .bind(update.daily_withdrawal_limit.map(Amount::units))
        .fetch_optional(self.pool())
        .await?;

        row.map(UserLimits::from)
            .ok_or_else(|| StoreError::Missing(format!("limits for {}", user_id)))
    }
}

// ============ Deposits ============

#[async_trait]
impl DepositRepository for Database {
    async fn insert_deposit(&self, deposit: DepositTransaction) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposit_transactions (
                tx_hash, user_id, network, from_address, to_address, amount, currency,
                block_number, confirmations, status, error_message, created_at, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(deposit.tx_hash.to_lowercase())
        .bind(&deposit.user_id)
        .bind(&deposit.network)
        .bind(&deposit.from_address)
        .bind(&deposit.to_address)
        .bind(deposit.amount.units())
        .bind(&deposit.currency)
        .bind(deposit.block_number)
        .bind(deposit.confirmations)
        .bind(deposit.status.as_str())
        .bind(&deposit.error_message)
        .bind(deposit.created_at)
        .bind(deposit.processed_at)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_deposit(&self, tx_hash: &str) -> StoreResult<Option<DepositTransaction>> {
        let row = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM deposit_transactions WHERE tx_hash = $1",
            DEPOSIT_COLUMNS
        ))
        .bind(tx_hash.to_lowercase())
        .fetch_optional(self.pool())
        .await?;

        row.map(DepositTransaction::try_from).transpose()
    }

    async fn deposits_by_status(
        &self,
        network: &str,
        status: DepositStatus,
        limit: i64,
    ) -> StoreResult<Vec<DepositTransaction>> {
        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            r#"
            SELECT {}
            FROM deposit_transactions
            WHERE network = $1 AND status = $2
            ORDER BY block_number ASC, created_at ASC
            LIMIT $3
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(network)
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    async fn update_confirmations(
        &self,
        tx_hash: &str,
        confirmations: i64,
        status: DepositStatus,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE deposit_transactions
            SET confirmations = $2, status = $3
            WHERE tx_hash = $1 AND status = 'pending'
            "#,
        )
        .bind(tx_hash.to_lowercase())
        .bind(confirmations)
        .bind(status.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn credit_deposit(&self, tx_hash: &str, max_balance: Amount) -> StoreResult<DepositCreditOutcome> {
        let tx_hash = tx_hash.to_lowercase();
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM deposit_transactions WHERE tx_hash = $1 FOR UPDATE",
            DEPOSIT_COLUMNS
        ))
        .bind(&tx_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(deposit) = row.map(DepositTransaction::try_from).transpose()? else {
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
            .ok_or_else(|| StoreError::Corrupt(format!("deposit {} has no owner", tx_hash)))?;

        lock_user(&mut tx, &user_id).await?;
        let current = balance_in(&mut tx, &user_id, &deposit.currency).await?;

        if current.would_exceed(deposit.amount, max_balance) {
            let breach = Breach::MaxBalance {
                current,
                requested: deposit.amount,
                limit: max_balance,
            };
            let failed = sqlx::query_as::<_, DepositRow>(&format!(
                r#"
                UPDATE deposit_transactions
                SET status = 'failed', error_message = $2, processed_at = NOW()
                WHERE tx_hash = $1
                RETURNING {}
                "#,
                DEPOSIT_COLUMNS
            ))
            .bind(&tx_hash)
            .bind(format!("max_balance exceeded: {} + {} > {}", current, deposit.amount, max_balance))
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(DepositCreditOutcome::Failed {
                deposit: DepositTransaction::try_from(failed)?,
                breach,
            });
        }

        let metadata = EntryMetadata::Deposit {
            tx_hash: tx_hash.clone(),
            network: deposit.network.clone(),
        };
        let entry_id: Uuid = sqlx::query_scalar("SELECT add_to_crypto_balance($1, $2, $3, $4, $5)")
            .bind(&user_id)
            .bind(deposit.amount.units())
            .bind(&deposit.currency)
            .bind(reference::deposit(&tx_hash))
            .bind(Json(metadata))
            .fetch_one(&mut *tx)
            .await?;

        let entry = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE id = $1",
            LEDGER_COLUMNS
        ))
        .bind(entry_id)
        .fetch_one(&mut *tx)
        .await?;

        let processed = sqlx::query_as::<_, DepositRow>(&format!(
            r#"
            UPDATE deposit_transactions
            SET status = 'processed', processed_at = NOW()
            WHERE tx_hash = $1
            RETURNING {}
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(&tx_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DepositCreditOutcome::Processed {
            deposit: DepositTransaction::try_from(processed)?,
            entry: LedgerEntry::try_from(entry)?,
        })
    }

    async fn fail_deposit(&self, tx_hash: &str, reason: &str) -> StoreResult<Option<DepositTransaction>> {
        let row = sqlx::query_as::<_, DepositRow>(&format!(
            r#"
            UPDATE deposit_transactions
            SET status = 'failed', error_message = $2, processed_at = NOW()
            WHERE tx_hash = $1 AND status = 'confirmed'
            RETURNING {}
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(tx_hash.to_lowercase())
        .bind(reason)
        .fetch_optional(self.pool())
        .await?;

        row.map(DepositTransaction::try_from).transpose()
    }

    async fn list_deposits(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<DepositTransaction>, i64)> {
        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            r#"
            SELECT {}
            FROM deposit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deposit_transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await?;

        Ok((convert_all(rows)?, total))
    }

    async fn last_scanned_block(&self, network: &str) -> StoreResult<Option<u64>> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT last_block FROM deposit_scan_state WHERE network = $1")
                .bind(network)
                .fetch_optional(self.pool())
                .await?;
        Ok(block.map(|b| b.max(0) as u64))
    }

    async fn set_last_scanned_block(&self, network: &str, block: u64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deposit_scan_state (network, last_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (network) DO UPDATE SET last_block = EXCLUDED.last_block, updated_at = NOW()
            "#,
        )
        .bind(network)
        .bind(block as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

// ============ Withdrawals ============

#[async_trait]
impl WithdrawalRepository for Database {
    async fn find_withdrawal(&self, id: Uuid) -> StoreResult<Option<WithdrawalRequest>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawal_requests WHERE id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(WithdrawalRequest::try_from).transpose()
    }

    async fn find_withdrawal_by_key(&self, idempotency_key: &str) -> StoreResult<Option<WithdrawalRequest>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawal_requests WHERE idempotency_key = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await?;

        row.map(WithdrawalRequest::try_from).transpose()
    }

    async fn reserve_withdrawal(
        &self,
        withdrawal: NewWithdrawal,
        daily_limit: Amount,
        day_start: DateTime<Utc>,
    ) -> StoreResult<ReserveOutcome> {
        let mut tx = self.pool().begin().await?;

        lock_key(&mut tx, &format!("withdrawal-key:{}", withdrawal.idempotency_key)).await?;
        let existing = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawal_requests WHERE idempotency_key = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(&withdrawal.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Ok(ReserveOutcome::Duplicate(WithdrawalRequest::try_from(row)?));
        }

        lock_user(&mut tx, &withdrawal.user_id).await?;

        let balance = balance_in(&mut tx, &withdrawal.user_id, &withdrawal.currency).await?;
        if balance < withdrawal.amount {
            return Ok(ReserveOutcome::Rejected(Breach::InsufficientBalance {
                available: balance,
                requested: withdrawal.amount,
            }));
        }

        let used = outflow_in(
            &mut tx,
            &withdrawal.user_id,
            &withdrawal.currency,
            EntryType::Withdrawal,
            day_start,
        )
        .await?;
        if used.would_exceed(withdrawal.amount, daily_limit) {
            return Ok(ReserveOutcome::Rejected(Breach::DailyLimit {
                used,
                requested: withdrawal.amount,
                limit: daily_limit,
            }));
        }

        let now = Utc::now();
        let request = withdrawal.into_request(now);

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            INSERT INTO withdrawal_requests (
                id, user_id, amount, currency, to_address, network, idempotency_key,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $8)
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(request.id)
        .bind(&request.user_id)
        .bind(request.amount.units())
        .bind(&request.currency)
        .bind(&request.to_address)
        .bind(&request.network)
        .bind(&request.idempotency_key)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let reservation = NewLedgerEntry {
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
        insert_entry(&mut tx, &reservation).await?;

        tx.commit().await?;
        Ok(ReserveOutcome::Reserved(WithdrawalRequest::try_from(row)?))
    }

    async fn cancel_withdrawal(&self, id: Uuid, user_id: &str) -> StoreResult<CancelOutcome> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawal_requests WHERE id = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(request) = row.map(WithdrawalRequest::try_from).transpose()? else {
            return Ok(CancelOutcome::NotFound);
        };
        if request.user_id != user_id {
            return Ok(CancelOutcome::NotFound);
        }
        if request.status != WithdrawalStatus::Pending {
            return Ok(CancelOutcome::NotCancellable(request.status));
        }

        let cancelled = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            UPDATE withdrawal_requests
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let refund = NewLedgerEntry {
            user_id: request.user_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            entry_type: EntryType::Withdrawal,
            reference: Some(reference::withdrawal_refund(id)),
            metadata: Some(EntryMetadata::WithdrawalRefund { withdrawal_id: id }),
        }
        .into_entry(Utc::now());
        insert_entry(&mut tx, &refund).await?;

        tx.commit().await?;
        Ok(CancelOutcome::Cancelled(WithdrawalRequest::try_from(cancelled)?))
    }

    async fn claim_withdrawal(&self, id: Uuid) -> StoreResult<Option<WithdrawalRequest>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            UPDATE withdrawal_requests
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(WithdrawalRequest::try_from).transpose()
    }

    async fn complete_withdrawal(
        &self,
        id: Uuid,
        settlement: WithdrawalSettlement,
    ) -> StoreResult<WithdrawalRequest> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            UPDATE withdrawal_requests
            SET status = 'completed', tx_hash = $2, gas_used = $3, gas_fee = $4,
                error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .bind(&settlement.tx_hash)
        .bind(settlement.gas_used)
        .bind(&settlement.gas_fee)
        .fetch_optional(self.pool())
        .await?;

        row.map(WithdrawalRequest::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::Missing(format!("processing withdrawal {}", id)))
    }

    async fn fail_withdrawal(
        &self,
        id: Uuid,
        error_message: &str,
        tx_hash: Option<&str>,
    ) -> StoreResult<WithdrawalRequest> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            UPDATE withdrawal_requests
            SET status = 'failed', error_message = $2, tx_hash = COALESCE($3, tx_hash), updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .bind(error_message)
        .bind(tx_hash)
        .fetch_optional(self.pool())
        .await?;

        row.map(WithdrawalRequest::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::Missing(format!("processing withdrawal {}", id)))
    }

    async fn pending_withdrawals(&self, network: &str, limit: i64) -> StoreResult<Vec<WithdrawalRequest>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            SELECT {}
            FROM withdrawal_requests
            WHERE network = $1 AND status = 'pending'
            ORDER BY created_at ASC
            LIMIT $2
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(network)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    async fn list_withdrawals(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WithdrawalRequest>, i64)> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            SELECT {}
            FROM withdrawal_requests
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM withdrawal_requests WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await?;

        Ok((convert_all(rows)?, total))
    }
}

// ============ Wallets ============

#[async_trait]
impl WalletRepository for Database {
    async fn find_wallet(&self, user_id: &str, network: &str) -> StoreResult<Option<CryptoWallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT user_id, network, address, encrypted_private_key, created_at
            FROM crypto_wallets
            WHERE user_id = $1 AND network = $2
            "#,
        )
        .bind(user_id)
        .bind(network)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(CryptoWallet::from))
    }

    async fn insert_wallet(&self, wallet: CryptoWallet) -> StoreResult<CryptoWallet> {
        sqlx::query(
            r#"
            INSERT INTO crypto_wallets (user_id, network, address, encrypted_private_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&wallet.user_id)
        .bind(&wallet.network)
        .bind(wallet.address.to_lowercase())
        .bind(&wallet.encrypted_private_key)
        .bind(wallet.created_at)
        .execute(self.pool())
        .await?;

        // (user, network) 충돌이면 기존 지갑, (network, address) 충돌이면 데이터 이상
        self.find_wallet(&wallet.user_id, &wallet.network)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("address {} already assigned", wallet.address)))
    }

    async fn wallet_owners(&self, network: &str) -> StoreResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT address, user_id FROM crypto_wallets WHERE network = $1")
                .bind(network)
                .fetch_all(self.pool())
                .await?;

        Ok(rows
            .into_iter()
            .map(|(address, user_id)| (address.to_lowercase(), user_id))
            .collect())
    }
}

// ============ Users ============

#[async_trait]
impl UserRepository for Database {
    async fn user_exists(&self, user_id: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }

    async fn ensure_user(&self, user_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for Database {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }
}
