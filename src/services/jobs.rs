//! Background Jobs
//!
//! 요청과 무관하게 도는 주기 작업 2개
//!
//! - 입금: 네트워크마다 scan → update_confirmations → confirmed 입금 처리
//! - 출금: 네트워크마다 pending 요청 배치 처리 (직렬)
//!
//! 한 사이클이 실패해도 로그만 남기고 다음 tick에 다시 시도

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::error::CoreResult;
use crate::services::deposit::{DepositWatcher, ProcessSummary};
use crate::services::withdrawal::WithdrawalProcessor;

/// 한 사이클에 처리하는 confirmed 입금 최대 개수
const DEPOSIT_PROCESS_LIMIT: i64 = 200;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DepositCycle {
    pub recorded: usize,
    pub confirmed: usize,
    pub processed: ProcessSummary,
}

/// 네트워크 하나에 대한 입금 사이클
pub async fn run_deposit_cycle(watcher: &DepositWatcher, network: &str) -> CoreResult<DepositCycle> {
    let report = watcher.scan(network, None).await?;
    let promoted = watcher.update_confirmations(network).await?;
    let processed = watcher.process_confirmed(network, DEPOSIT_PROCESS_LIMIT).await?;

    Ok(DepositCycle {
        recorded: report.new_deposits.len(),
        confirmed: promoted.len(),
        processed,
    })
}

pub fn spawn_deposit_watcher(watcher: DepositWatcher, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), networks = ?watcher.networks(), "Deposit watcher started");

        loop {
            ticker.tick().await;
            for network in watcher.networks() {
                match run_deposit_cycle(&watcher, &network).await {
                    Ok(cycle) if cycle != DepositCycle::default() => {
                        info!(network = %network, ?cycle, "Deposit cycle finished");
                    }
                    Ok(_) => {}
                    Err(e) => error!(network = %network, error = %e, "Deposit cycle failed"),
                }
            }
        }
    })
}

pub fn spawn_withdrawal_batcher(processor: WithdrawalProcessor, every: Duration, batch_size: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), batch_size, "Withdrawal batcher started");

        loop {
            ticker.tick().await;
            for network in processor.networks() {
                if let Err(e) = processor.process_batch(&network, batch_size).await {
                    error!(network = %network, error = %e, "Withdrawal batch failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use ethers::types::U256;

    use super::*;
    use crate::config::{LimitDefaults, NetworkConfig};
    use crate::db::mock::MockRepository;
    use crate::db::LedgerRepository;
    use crate::services::chain::mock::FakeChain;
    use crate::services::chain::ChainRegistry;
    use crate::services::ledger::LedgerStore;
    use crate::services::limits::LimitsEngine;
    use crate::services::wallet_vault::WalletKeyVault;
    use crate::types::{Amount, EthAddress};

    #[tokio::test]
    async fn test_deposit_cycle_credits_mature_deposits() {
        let repo = Arc::new(MockRepository::new());
        let chain = Arc::new(FakeChain::new(100));
        let mut chains = ChainRegistry::new();
        chains.insert("ethereum", chain.clone());
        let mut network = NetworkConfig::reference("ethereum").unwrap();
        network.start_block = Some(0);
        let networks = HashMap::from([("ethereum".to_string(), network)]);

        let limits = LimitsEngine::new(repo.clone(), LedgerStore::new(repo.clone()), LimitDefaults::default());
        let watcher = DepositWatcher::new(repo.clone(), chains, limits, WalletKeyVault::new("s", "k"), networks);

        let wallet = watcher.ensure_wallet("u1", "ethereum").await.unwrap();
        let address = EthAddress::new(&wallet.address).unwrap();
        chain.push_transfer("0x01", &address, U256::from(5_000_000u64), 50);
        chain.push_transfer("0x02", &address, U256::from(7_000_000u64), 95);

        // 0x02는 아직 5 confirmations
        let first = run_deposit_cycle(&watcher, "ethereum").await.unwrap();
        assert_eq!(first.recorded, 2);
        assert_eq!(first.processed, ProcessSummary { processed: 1, failed: 0 });
        assert_eq!(repo.balance("u1", "USDT").await.unwrap(), Amount::whole(5));

        chain.set_height(120);
        let second = run_deposit_cycle(&watcher, "ethereum").await.unwrap();
        assert_eq!(second.recorded, 0);
        assert_eq!(second.confirmed, 1);
        assert_eq!(repo.balance("u1", "USDT").await.unwrap(), Amount::whole(12));
    }
}
