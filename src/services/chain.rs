//! Chain Client
//!
//! 코어 로직이 의존하는 블록체인 접근 인터페이스
//!
//! # Features
//! - 블록 높이 조회
//! - ERC-20 Transfer 이벤트 조회 (수신 주소 필터)
//! - 토큰 / native 잔고 조회
//! - Hot wallet 서명 + broadcast, 영수증 대기

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    contract::abigen,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, Filter, ValueOrArray, H256, U256},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::types::EthAddress;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
        event Transfer(address indexed from, address indexed to, uint256 value)
    ]"#
);

const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("network {0} is not configured")]
    UnknownNetwork(String),

    #[error("{0}")]
    NotConfigured(String),

    #[error("broadcast rejected: {0}")]
    Rejected(String),

    #[error("transaction {0} reverted")]
    Reverted(String),

    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// ERC-20 Transfer 로그 한 건
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub tx_hash: String,
    pub from: EthAddress,
    pub to: EthAddress,
    /// 토큰 최소 단위
    pub value: U256,
    pub block_number: u64,
}

/// 채굴된 트랜잭션 영수증
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: U256,
    pub effective_gas_price: U256,
}

impl TxReceipt {
    /// wei
    pub fn gas_fee(&self) -> U256 {
        self.gas_used.saturating_mul(self.effective_gas_price)
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_height(&self) -> ChainResult<u64>;

    /// [from_block, to_block] 범위에서 `recipients` 로 들어온 토큰 전송
    async fn transfer_events_in_range(
        &self,
        from_block: u64,
        to_block: u64,
        recipients: &[EthAddress],
    ) -> ChainResult<Vec<TokenTransfer>>;

    async fn token_balance_of(&self, address: &EthAddress) -> ChainResult<U256>;

    async fn native_balance_of(&self, address: &EthAddress) -> ChainResult<U256>;

    fn hot_wallet_address(&self) -> ChainResult<EthAddress>;

    /// hot wallet → `to` 토큰 전송의 예상 수수료 (gas × gas price, wei)
    async fn estimate_transfer_fee(&self, to: &EthAddress, amount: U256) -> ChainResult<U256>;

    /// 서명 + broadcast 후 tx hash 반환
    async fn send_token(&self, to: &EthAddress, amount: U256) -> ChainResult<String>;

    async fn await_receipt(&self, tx_hash: &str, timeout: Duration) -> ChainResult<TxReceipt>;
}

type HotSigner = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

/// ethers 기반 구현 (네트워크당 1개)
pub struct EthersChainClient {
    network: NetworkConfig,
    provider: Arc<Provider<Http>>,
    signer: Option<Arc<HotSigner>>,
    max_block_range: u64,
}

impl EthersChainClient {
    pub fn new(network: NetworkConfig, hot_wallet: Option<LocalWallet>, max_block_range: u64) -> ChainResult<Self> {
        let provider = Provider::<Http>::try_from(network.rpc_url.as_str())
            .map_err(|e| ChainError::Rpc(format!("invalid rpc url for {}: {}", network.name, e)))?;
        let provider = Arc::new(provider.interval(RECEIPT_POLL_INTERVAL));

        let signer = hot_wallet.map(|wallet| {
            let wallet = wallet.with_chain_id(network.chain_id);
            Arc::new(SignerMiddleware::new(provider.clone(), wallet))
        });

        Ok(Self {
            network,
            provider,
            signer,
            max_block_range: max_block_range.max(1),
        })
    }

    fn token(&self) -> ChainResult<Address> {
        self.network
            .token_address
            .as_ref()
            .map(EthAddress::to_h160)
            .ok_or_else(|| ChainError::NotConfigured(format!("{} token address is not configured", self.network.name)))
    }

    fn signer(&self) -> ChainResult<&Arc<HotSigner>> {
        self.signer
            .as_ref()
            .ok_or_else(|| ChainError::NotConfigured("hot wallet key is not configured".into()))
    }
}

/// [from, to] 를 최대 `size` 블록 단위로 분할
pub fn block_chunks(from_block: u64, to_block: u64, size: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    let size = size.max(1);
    let mut current = from_block;
    while current <= to_block {
        let end = current.saturating_add(size - 1).min(to_block);
        chunks.push((current, end));
        if end == u64::MAX {
            break;
        }
        current = end + 1;
    }
    chunks
}

fn rpc<E: std::fmt::Display>(err: E) -> ChainError {
    ChainError::Rpc(err.to_string())
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn block_height(&self) -> ChainResult<u64> {
        Ok(self.provider.get_block_number().await.map_err(rpc)?.as_u64())
    }

    async fn transfer_events_in_range(
        &self,
        from_block: u64,
        to_block: u64,
        recipients: &[EthAddress],
    ) -> ChainResult<Vec<TokenTransfer>> {
        if recipients.is_empty() || from_block > to_block {
            return Ok(Vec::new());
        }
        let token = self.token()?;
        let to_topics: Vec<Option<H256>> = recipients
            .iter()
            .map(|addr| Some(H256::from(addr.to_h160())))
            .collect();

        let mut transfers = Vec::new();
        for (start, end) in block_chunks(from_block, to_block, self.max_block_range) {
            let filter = Filter::new()
                .address(token)
                .event(TRANSFER_EVENT)
                .topic2(ValueOrArray::Array(to_topics.clone()))
                .from_block(start)
                .to_block(end);

            let logs = self.provider.get_logs(&filter).await.map_err(rpc)?;
            debug!(network = %self.network.name, from = start, to = end, logs = logs.len(), "Fetched transfer logs");

            for log in logs {
                // indexed from / to 가 없거나 value가 uint256이 아닌 로그는 ERC-20 Transfer가 아님
                if log.topics.len() < 3 || log.data.len() > 32 {
                    continue;
                }
                let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number) else {
                    continue;
                };
                transfers.push(TokenTransfer {
                    tx_hash: format!("{:#x}", tx_hash),
                    from: EthAddress::from_h160(Address::from(log.topics[1])),
                    to: EthAddress::from_h160(Address::from(log.topics[2])),
                    value: U256::from_big_endian(&log.data),
                    block_number: block_number.as_u64(),
                });
            }
        }

        Ok(transfers)
    }

    async fn token_balance_of(&self, address: &EthAddress) -> ChainResult<U256> {
        let contract = Erc20::new(self.token()?, self.provider.clone());
        contract.balance_of(address.to_h160()).call().await.map_err(rpc)
    }

    async fn native_balance_of(&self, address: &EthAddress) -> ChainResult<U256> {
        self.provider.get_balance(address.to_h160(), None).await.map_err(rpc)
    }

    fn hot_wallet_address(&self) -> ChainResult<EthAddress> {
        Ok(EthAddress::from_h160(self.signer()?.address()))
    }

    async fn estimate_transfer_fee(&self, to: &EthAddress, amount: U256) -> ChainResult<U256> {
        let contract = Erc20::new(self.token()?, self.signer()?.clone());
        let gas = contract.transfer(to.to_h160(), amount).estimate_gas().await.map_err(rpc)?;
        let gas_price = self.provider.get_gas_price().await.map_err(rpc)?;
        Ok(gas.saturating_mul(gas_price))
    }

    async fn send_token(&self, to: &EthAddress, amount: U256) -> ChainResult<String> {
        let contract = Erc20::new(self.token()?, self.signer()?.clone());
        let call = contract.transfer(to.to_h160(), amount);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        let tx_hash = format!("{:#x}", pending.tx_hash());
        info!(network = %self.network.name, tx_hash = %tx_hash, to = %to, "Broadcast token transfer");
        Ok(tx_hash)
    }

    async fn await_receipt(&self, tx_hash: &str, timeout: Duration) -> ChainResult<TxReceipt> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|_| ChainError::Rpc(format!("invalid tx hash {}", tx_hash)))?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
                    return Ok(TxReceipt {
                        tx_hash: tx_hash.to_string(),
                        block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
                        success,
                        gas_used: receipt.gas_used.unwrap_or_default(),
                        effective_gas_price: receipt.effective_gas_price.unwrap_or_default(),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed, retrying"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::ReceiptTimeout(tx_hash.to_string()));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

/// 네트워크 이름 → ChainClient
#[derive(Clone, Default)]
pub struct ChainRegistry {
    clients: HashMap<String, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network: impl Into<String>, client: Arc<dyn ChainClient>) {
        self.clients.insert(network.into(), client);
    }

    pub fn get(&self, network: &str) -> ChainResult<Arc<dyn ChainClient>> {
        self.clients
            .get(network)
            .cloned()
            .ok_or_else(|| ChainError::UnknownNetwork(network.to_string()))
    }

    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }
}
