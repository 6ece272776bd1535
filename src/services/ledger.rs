//! Ledger Store
//!
//! 잔고는 저장하지 않는다. 항상 posted entry의 합으로 계산
//! entry는 append-only이며 보정은 반대 부호의 새 entry로만 함

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::debug;

use crate::db::{EntryMetadata, EntryType, LedgerEntry, LedgerRepository, NewLedgerEntry, Repository};
use crate::error::{CoreError, CoreResult};
use crate::types::{Amount, PageQuery, Pagination};

/// 오늘 00:00 UTC (일일 사용량 기준 시각)
pub fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Clone)]
pub struct LedgerStore {
    repo: Arc<dyn Repository>,
}

impl LedgerStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// 기록이 없으면 0
    pub async fn get_balance(&self, user_id: &str, currency: &str) -> CoreResult<Amount> {
        Ok(self.repo.balance(user_id, currency).await?)
    }

    pub async fn balances(&self, user_id: &str) -> CoreResult<Vec<(String, Amount)>> {
        Ok(self.repo.balances(user_id).await?)
    }

    /// posted entry 추가
    ///
    /// 같은 `reference`가 이미 있으면 새로 넣지 않고 기존 entry를 반환
    pub async fn append(
        &self,
        user_id: &str,
        amount: Amount,
        entry_type: EntryType,
        currency: &str,
        reference: Option<String>,
        metadata: Option<EntryMetadata>,
    ) -> CoreResult<LedgerEntry> {
        if amount == Amount::ZERO {
            return Err(CoreError::Validation("ledger entry amount must be non-zero".into()));
        }

        let appended = self
            .repo
            .append_entry(NewLedgerEntry {
                user_id: user_id.to_string(),
                amount,
                currency: currency.to_string(),
                entry_type,
                reference,
                metadata,
            })
            .await?;

        if !appended.created {
            debug!(
                user_id = %user_id,
                reference = ?appended.entry.reference,
                "Ledger append replayed existing entry"
            );
        }
        Ok(appended.entry)
    }

    /// 최신순
    pub async fn history(
        &self,
        user_id: &str,
        currency: Option<&str>,
        page: &PageQuery,
    ) -> CoreResult<(Vec<LedgerEntry>, Pagination)> {
        let (entries, total) = self
            .repo
            .history(user_id, currency, page.limit(), page.offset())
            .await?;
        Ok((entries, page.paginate(total)))
    }

    /// 오늘(UTC) 해당 타입의 유출량
    pub async fn daily_outflow(&self, user_id: &str, currency: &str, entry_type: EntryType) -> CoreResult<Amount> {
        let since = utc_day_start(Utc::now());
        Ok(self.repo.outflow_since(user_id, currency, entry_type, since).await?)
    }
}
