//! Deposit Watcher
//!
//! # Interview Q&A
//!
//! Q: 입금은 어떤 상태를 거치는가?
//! A: pending → confirmed → processed | failed
//!
//!    - scan: 알려진 사용자 주소로 들어온 Transfer 로그를 기록 (tx_hash 기준 중복 제거)
//!    - update_confirmations: currentBlock − blockNumber ≥ threshold 이면 confirmed
//!    - process_confirmed_deposit: 최대 잔고 검사 후 ledger credit (deposit:<tx_hash>)
//!
//! Q: 같은 입금을 두 번 처리하면?
//! A: 두 번째 호출은 processed / failed 상태를 보고 아무것도 하지 않음
//!    ledger reference가 unique라서 credit도 한 번만 들어감

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::db::{
    CryptoWallet, DepositCreditOutcome, DepositRepository, DepositStatus, DepositTransaction, Repository,
    WalletRepository,
};
use crate::error::{CoreError, CoreResult};
use crate::services::chain::{ChainClient, ChainRegistry};
use crate::services::limits::LimitsEngine;
use crate::services::wallet_vault::WalletKeyVault;
use crate::types::{Amount, EthAddress, PageQuery, Pagination};

/// update_confirmations 한 번에 다루는 pending 최대 개수
const CONFIRMATION_BATCH: i64 = 500;

/// 입금 주소 + QR payload
#[derive(Debug, Clone, Serialize)]
pub struct DepositAddress {
    pub network: String,
    pub address: String,
    pub currency: String,
    pub chain_id: u64,
    pub token_address: Option<String>,
    /// EIP-681
    pub qr_payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub network: String,
    pub from_block: u64,
    pub to_block: u64,
    pub new_deposits: Vec<DepositTransaction>,
}

/// 네트워크 한 번 처리한 결과 (백그라운드 작업용)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: usize,
    pub failed: usize,
}

/// EIP-681 토큰 전송 URI
pub fn qr_payload(network: &NetworkConfig, address: &str) -> String {
    match &network.token_address {
        Some(token) => format!("ethereum:{}@{}/transfer?address={}", token, network.chain_id, address),
        None => format!("ethereum:{}@{}", address, network.chain_id),
    }
}

#[derive(Clone)]
pub struct DepositWatcher {
    repo: Arc<dyn Repository>,
    chains: ChainRegistry,
    limits: LimitsEngine,
    vault: WalletKeyVault,
    networks: HashMap<String, NetworkConfig>,
}

impl DepositWatcher {
    pub fn new(
        repo: Arc<dyn Repository>,
        chains: ChainRegistry,
        limits: LimitsEngine,
        vault: WalletKeyVault,
        networks: HashMap<String, NetworkConfig>,
    ) -> Self {
        Self {
            repo,
            chains,
            limits,
            vault,
            networks,
        }
    }

    fn network(&self, name: &str) -> CoreResult<&NetworkConfig> {
        self.networks
            .get(name)
            .ok_or_else(|| CoreError::Validation(format!("unsupported network: {}", name)))
    }

    fn chain(&self, network: &str) -> CoreResult<Arc<dyn ChainClient>> {
        Ok(self.chains.get(network)?)
    }

    /// (user, network) 지갑. 없으면 파생 후 암호화해서 저장 (재생성 없음)
    pub async fn ensure_wallet(&self, user_id: &str, network: &str) -> CoreResult<CryptoWallet> {
        self.network(network)?;
        if let Some(wallet) = self.repo.find_wallet(user_id, network).await? {
            return Ok(wallet);
        }

        let (address, encrypted_private_key) = self.vault.seal_wallet(user_id)?;
        let wallet = self
            .repo
            .insert_wallet(CryptoWallet {
                user_id: user_id.to_string(),
                network: network.to_string(),
                address: address.to_string(),
                encrypted_private_key,
                created_at: Utc::now(),
            })
            .await?;
        info!(user_id = %user_id, network = %network, address = %wallet.address, "Created deposit wallet");
        Ok(wallet)
    }

    pub async fn deposit_address(&self, user_id: &str, network: &str) -> CoreResult<DepositAddress> {
        let config = self.network(network)?.clone();
        let wallet = self.ensure_wallet(user_id, network).await?;

        Ok(DepositAddress {
            qr_payload: qr_payload(&config, &wallet.address),
            network: config.name,
            address: wallet.address,
            currency: config.currency,
            chain_id: config.chain_id,
            token_address: config.token_address.map(|t| t.to_string()),
        })
    }

    /// 사용자 주소로 들어온 토큰 전송을 기록
    ///
    /// `from_block`이 없으면 저장된 커서 다음 블록부터
    pub async fn scan(&self, network: &str, from_block: Option<u64>) -> CoreResult<ScanReport> {
        let config = self.network(network)?;
        let chain = self.chain(network)?;
        let current = chain.block_height().await?;

        let from_block = match from_block {
            Some(block) => block,
            None => match self.repo.last_scanned_block(network).await? {
                Some(last) => last + 1,
                None => config
                    .start_block
                    .unwrap_or_else(|| current.saturating_sub(config.confirmations)),
            },
        };

        let mut report = ScanReport {
            network: network.to_string(),
            from_block,
            to_block: current,
            new_deposits: Vec::new(),
        };
        if from_block > current {
            return Ok(report);
        }

        let owners = self.repo.wallet_owners(network).await?;
        let recipients: Vec<EthAddress> = owners.keys().filter_map(|a| EthAddress::new(a).ok()).collect();
        if recipients.is_empty() {
            self.repo.set_last_scanned_block(network, current).await?;
            return Ok(report);
        }

        let transfers = chain.transfer_events_in_range(from_block, current, &recipients).await?;
        debug!(network = %network, from = from_block, to = current, found = transfers.len(), "Scanned transfer logs");

        for transfer in transfers {
            let Some(user_id) = owners.get(transfer.to.as_str()) else {
                continue;
            };
            let amount = match Amount::from_token_units(transfer.value, config.token_decimals) {
                Ok(amount) if amount.is_positive() => amount,
                Ok(_) => continue,
                Err(e) => {
                    warn!(tx_hash = %transfer.tx_hash, error = %e, "Skipping deposit with unrepresentable amount");
                    continue;
                }
            };

            let confirmations = current.saturating_sub(transfer.block_number);
            let status = if confirmations >= config.confirmations {
                DepositStatus::Confirmed
            } else {
                DepositStatus::Pending
            };

            let deposit = DepositTransaction {
                tx_hash: transfer.tx_hash.to_lowercase(),
                user_id: Some(user_id.clone()),
                network: network.to_string(),
                from_address: transfer.from.to_string(),
                to_address: transfer.to.to_string(),
                amount,
                currency: config.currency.clone(),
                block_number: transfer.block_number as i64,
                confirmations: confirmations as i64,
                status,
                error_message: None,
                created_at: Utc::now(),
                processed_at: None,
            };

            if self.repo.insert_deposit(deposit.clone()).await? {
                info!(
                    tx_hash = %deposit.tx_hash,
                    user_id = %user_id,
                    network = %network,
                    amount = %deposit.amount,
                    status = %deposit.status,
                    "Recorded deposit"
                );
                report.new_deposits.push(deposit);
            }
        }

        self.repo.set_last_scanned_block(network, current).await?;
        Ok(report)
    }

    /// pending 입금의 confirmation 재계산. confirmed로 바뀐 입금 반환
    pub async fn update_confirmations(&self, network: &str) -> CoreResult<Vec<DepositTransaction>> {
        let config = self.network(network)?;
        let pending = self
            .repo
            .deposits_by_status(network, DepositStatus::Pending, CONFIRMATION_BATCH)
            .await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let current = self.chain(network)?.block_height().await?;
        let mut promoted = Vec::new();

        for mut deposit in pending {
            let confirmations = current.saturating_sub(deposit.block_number.max(0) as u64);
            let status = if confirmations >= config.confirmations {
                DepositStatus::Confirmed
            } else {
                DepositStatus::Pending
            };
            self.repo
                .update_confirmations(&deposit.tx_hash, confirmations as i64, status)
                .await?;

            if status == DepositStatus::Confirmed {
                debug!(tx_hash = %deposit.tx_hash, confirmations, "Deposit confirmed");
                deposit.confirmations = confirmations as i64;
                deposit.status = status;
                promoted.push(deposit);
            }
        }

        Ok(promoted)
    }

    /// confirmed 입금을 ledger에 반영
    ///
    /// 이미 processed / failed 이면 현재 상태를 그대로 반환 (no-op)
    pub async fn process_confirmed_deposit(&self, tx_hash: &str) -> CoreResult<DepositTransaction> {
        let deposit = self
            .repo
            .find_deposit(tx_hash)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("deposit {}", tx_hash)))?;

        if deposit.status.is_terminal() {
            debug!(tx_hash = %deposit.tx_hash, status = %deposit.status, "Deposit already final");
            return Ok(deposit);
        }
        if deposit.status != DepositStatus::Confirmed {
            return Err(CoreError::InvalidState(format!(
                "deposit {} has {} confirmations and is not confirmed yet",
                deposit.tx_hash, deposit.confirmations
            )));
        }

        let Some(user_id) = deposit.user_id.clone() else {
            return self.fail(&deposit, "deposit address has no owner").await;
        };

        // 사전 검사 (위반 시 ledger 변경 없이 failed)
        if let Err(err) = self
            .limits
            .validate_balance_increase(&user_id, &deposit.currency, deposit.amount)
            .await
        {
            return match err {
                CoreError::LimitExceeded { .. } => self.fail(&deposit, &err.to_string()).await,
                other => Err(other),
            };
        }

        let max_balance = self.limits.get_limits(&user_id, &deposit.currency).await?.max_balance;
        match self.repo.credit_deposit(&deposit.tx_hash, max_balance).await? {
            DepositCreditOutcome::Processed { deposit, entry } => {
                info!(
                    tx_hash = %deposit.tx_hash,
                    user_id = %user_id,
                    amount = %deposit.amount,
                    entry_id = %entry.id,
                    "Deposit credited"
                );
                Ok(deposit)
            }
            DepositCreditOutcome::Failed { deposit, breach } => {
                warn!(tx_hash = %deposit.tx_hash, user_id = %user_id, ?breach, "Deposit rejected by balance cap");
                Ok(deposit)
            }
            DepositCreditOutcome::AlreadyFinal(deposit) => Ok(deposit),
            DepositCreditOutcome::NotConfirmed(deposit) => Err(CoreError::InvalidState(format!(
                "deposit {} is not confirmed",
                deposit.tx_hash
            ))),
            DepositCreditOutcome::NotFound => Err(CoreError::NotFound(format!("deposit {}", tx_hash))),
        }
    }

    async fn fail(&self, deposit: &DepositTransaction, reason: &str) -> CoreResult<DepositTransaction> {
        warn!(tx_hash = %deposit.tx_hash, reason = %reason, "Deposit failed");
        match self.repo.fail_deposit(&deposit.tx_hash, reason).await? {
            Some(failed) => Ok(failed),
            // 다른 처리자가 먼저 상태를 바꿈
            None => self
                .repo
                .find_deposit(&deposit.tx_hash)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("deposit {}", deposit.tx_hash))),
        }
    }

    /// 네트워크의 confirmed 입금 전부 처리
    pub async fn process_confirmed(&self, network: &str, limit: i64) -> CoreResult<ProcessSummary> {
        let confirmed = self
            .repo
            .deposits_by_status(network, DepositStatus::Confirmed, limit)
            .await?;

        let mut summary = ProcessSummary::default();
        for deposit in confirmed {
            match self.process_confirmed_deposit(&deposit.tx_hash).await {
                Ok(d) if d.status == DepositStatus::Processed => summary.processed += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    warn!(tx_hash = %deposit.tx_hash, error = %e, "Deposit processing error");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    pub async fn history(&self, user_id: &str, page: &PageQuery) -> CoreResult<(Vec<DepositTransaction>, Pagination)> {
        let (deposits, total) = self
            .repo
            .list_deposits(user_id, page.limit(), page.offset())
            .await?;
        Ok((deposits, page.paginate(total)))
    }

    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.keys().cloned().collect();
        names.sort();
        names
    }
}
