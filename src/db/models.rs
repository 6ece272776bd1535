//! Database Models
//!
//! Money-movement records and the request/transaction rows that reference them.
//! Balances are never stored: they are always the sum of posted ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Amount;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============ Ledger ============

/// Ledger entry 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Credit,
    Debit,
    Transfer,
    Deposit,
    Withdrawal,
}

text_enum!(EntryType {
    Credit => "credit",
    Debit => "debit",
    Transfer => "transfer",
    Deposit => "deposit",
    Withdrawal => "withdrawal",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Posted,
    Pending,
}

text_enum!(EntryStatus {
    Posted => "posted",
    Pending => "pending",
});

/// Entry에 붙는 메타데이터 (알려진 형태만 허용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryMetadata {
    Transfer {
        transfer_id: Uuid,
        counterparty: String,
    },
    Deposit {
        tx_hash: String,
        network: String,
    },
    Withdrawal {
        withdrawal_id: Uuid,
        network: String,
        to_address: String,
    },
    /// 취소된 출금의 예약금 반환
    WithdrawalRefund {
        withdrawal_id: Uuid,
    },
    /// 운영자 수동 보정
    Adjustment {
        note: String,
    },
}

/// 불변 money-movement 레코드
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    /// 부호 있는 금액 (출금/송금 = 음수)
    pub amount: Amount,
    pub currency: String,
    pub entry_type: EntryType,
    /// idempotency / dedup 키 (unique)
    pub reference: Option<String>,
    pub status: EntryStatus,
    pub metadata: Option<EntryMetadata>,
    pub created_at: DateTime<Utc>,
}

/// append 입력
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: String,
    pub amount: Amount,
    pub currency: String,
    pub entry_type: EntryType,
    pub reference: Option<String>,
    pub metadata: Option<EntryMetadata>,
}

impl NewLedgerEntry {
    pub fn into_entry(self, now: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            amount: self.amount,
            currency: self.currency,
            entry_type: self.entry_type,
            reference: self.reference,
            status: EntryStatus::Posted,
            metadata: self.metadata,
            created_at: now,
        }
    }
}

/// append 결과: `created = false` 이면 같은 reference의 기존 entry
#[derive(Debug, Clone)]
pub struct Appended {
    pub entry: LedgerEntry,
    pub created: bool,
}

/// Ledger reference 키 규칙
pub mod reference {
    use uuid::Uuid;

    pub fn transfer_debit(transfer_id: Uuid) -> String {
        format!("transfer:{}:debit", transfer_id)
    }

    pub fn transfer_credit(transfer_id: Uuid) -> String {
        format!("transfer:{}:credit", transfer_id)
    }

    pub fn withdrawal(withdrawal_id: Uuid) -> String {
        format!("withdrawal:{}", withdrawal_id)
    }

    pub fn withdrawal_refund(withdrawal_id: Uuid) -> String {
        format!("withdrawal:{}:refund", withdrawal_id)
    }

    pub fn deposit(tx_hash: &str) -> String {
        format!("deposit:{}", tx_hash.to_lowercase())
    }
}

// ============ Limits ============

/// 사용자별 한도 (user, currency 당 1행)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserLimits {
    pub user_id: String,
    pub currency: String,
    pub max_balance: Amount,
    pub max_transaction_amount: Amount,
    pub daily_transfer_limit: Amount,
    pub daily_withdrawal_limit: Amount,
    pub updated_at: DateTime<Utc>,
}

/// 관리자 한도 변경 (None = 유지)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsUpdate {
    pub max_balance: Option<Amount>,
    pub max_transaction_amount: Option<Amount>,
    pub daily_transfer_limit: Option<Amount>,
    pub daily_withdrawal_limit: Option<Amount>,
}

impl LimitsUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_balance.is_none()
            && self.max_transaction_amount.is_none()
            && self.daily_transfer_limit.is_none()
            && self.daily_withdrawal_limit.is_none()
    }

    pub fn apply(&self, limits: &mut UserLimits) {
        if let Some(v) = self.max_balance {
            limits.max_balance = v;
        }
        if let Some(v) = self.max_transaction_amount {
            limits.max_transaction_amount = v;
        }
        if let Some(v) = self.daily_transfer_limit {
            limits.daily_transfer_limit = v;
        }
        if let Some(v) = self.daily_withdrawal_limit {
            limits.daily_withdrawal_limit = v;
        }
    }
}

/// 원자적 쓰기 내부에서 발견된 한도 위반
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    InsufficientBalance { available: Amount, requested: Amount },
    DailyLimit { used: Amount, requested: Amount, limit: Amount },
    MaxBalance { current: Amount, requested: Amount, limit: Amount },
}

// ============ Transfers ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: Amount,
    pub currency: String,
    /// 적용 직후 양쪽 잔고. replay 시 그대로 반환하며 히스토리에는 노출하지 않음
    #[serde(skip)]
    pub from_balance: Amount,
    #[serde(skip)]
    pub to_balance: Amount,
    pub created_at: DateTime<Utc>,
}

/// atomic_transfer 입력: 한도 값은 호출 측에서 조회해 전달
#[derive(Debug, Clone)]
pub struct AtomicTransfer {
    pub transfer_id: Uuid,
    pub idempotency_key: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: Amount,
    pub currency: String,
    pub sender_daily_limit: Amount,
    pub recipient_max_balance: Amount,
    pub day_start: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Applied {
        record: TransferRecord,
        from_balance: Amount,
        to_balance: Amount,
    },
    /// 같은 idempotency key로 이미 적용된 송금
    Replayed {
        record: TransferRecord,
        from_balance: Amount,
        to_balance: Amount,
    },
    Rejected(Breach),
}

// ============ Deposits ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Processed,
    Failed,
}

text_enum!(DepositStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Processed => "processed",
    Failed => "failed",
});

impl DepositStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Processed | DepositStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepositTransaction {
    pub tx_hash: String,
    /// 주소 → 사용자 매핑 전에는 None
    pub user_id: Option<String>,
    pub network: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Amount,
    pub currency: String,
    pub block_number: i64,
    pub confirmations: i64,
    pub status: DepositStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum DepositCreditOutcome {
    Processed {
        deposit: DepositTransaction,
        entry: LedgerEntry,
    },
    Failed {
        deposit: DepositTransaction,
        breach: Breach,
    },
    /// 이미 processed / failed
    AlreadyFinal(DepositTransaction),
    /// 아직 confirmed 상태가 아님
    NotConfirmed(DepositTransaction),
    NotFound,
}

// ============ Withdrawals ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(WithdrawalStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Amount,
    pub currency: String,
    pub to_address: String,
    pub network: String,
    pub idempotency_key: String,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub gas_used: Option<i64>,
    /// native 토큰 wei (10진 문자열)
    pub gas_fee: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Amount,
    pub currency: String,
    pub to_address: String,
    pub network: String,
    pub idempotency_key: String,
}

impl NewWithdrawal {
    pub fn into_request(self, now: DateTime<Utc>) -> WithdrawalRequest {
        WithdrawalRequest {
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            currency: self.currency,
            to_address: self.to_address,
            network: self.network,
            idempotency_key: self.idempotency_key,
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            gas_used: None,
            gas_fee: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Reserved(WithdrawalRequest),
    /// 같은 idempotency key의 기존 요청
    Duplicate(WithdrawalRequest),
    Rejected(Breach),
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(WithdrawalRequest),
    NotFound,
    NotCancellable(WithdrawalStatus),
}

/// broadcast 성공 결과
#[derive(Debug, Clone)]
pub struct WithdrawalSettlement {
    pub tx_hash: String,
    pub gas_used: i64,
    pub gas_fee: String,
}

// ============ Wallets ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CryptoWallet {
    pub user_id: String,
    pub network: String,
    /// lowercase 0x 주소
    pub address: String,
    /// "iv:tag:ciphertext"
    #[serde(skip_serializing)]
    pub encrypted_private_key: String,
    pub created_at: DateTime<Utc>,
}
