//! Services Module
//!
//! 비즈니스 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `LedgerStore`: append-only ledger, 잔고 계산
//! - `LimitsEngine`: 사용자 한도 + 사전 검사
//! - `TransferCoordinator`: 사용자 간 송금
//! - `DepositWatcher`: 온체인 입금 감지/확정/반영
//! - `WithdrawalProcessor`: 출금 예약, hot wallet broadcast
//! - `WalletKeyVault`: 입금 지갑 파생 + 개인키 암호화
//! - `ChainClient`: 체인 RPC 추상화
//! - `IdentityProvider`: bearer token 확인

pub mod chain;
pub mod deposit;
pub mod identity;
pub mod jobs;
pub mod ledger;
pub mod limits;
pub mod transfer;
pub mod wallet_vault;
pub mod withdrawal;

pub use chain::{ChainClient, ChainError, ChainRegistry, EthersChainClient};
pub use deposit::{DepositAddress, DepositWatcher, ScanReport};
pub use identity::{HttpIdentityProvider, Identity, IdentityProvider};
pub use ledger::LedgerStore;
pub use limits::{LimitsEngine, LimitsStatus};
pub use transfer::{TransferCoordinator, TransferRequest, TransferResult};
pub use wallet_vault::{VaultError, WalletKeyVault};
pub use withdrawal::{BatchSummary, WithdrawalInput, WithdrawalProcessor};
