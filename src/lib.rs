//! Ledger Core API Library
//!
//! # Overview
//!
//! 크라우드펀딩 플랫폼의 off-chain 가치 이동 코어
//! (ledger, 사용자 간 송금, 온체인 입금 감지, hot wallet 출금)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          API                              │
//! │                                                           │
//! │  ┌─────────┐  ┌──────────┐  ┌─────────┐  ┌─────────┐     │
//! │  │ Routes  │  │ Services │  │   DB    │  │  Types  │     │
//! │  └────┬────┘  └────┬─────┘  └────┬────┘  └────┬────┘     │
//! │       └────────────┴─────────────┴────────────┘          │
//! │                          │                                │
//! └──────────────────────────┼────────────────────────────────┘
//!                            │
//!               ┌────────────┴────────────┐
//!               ▼                         ▼
//!      ┌────────────────┐        ┌────────────────┐
//!      │   PostgreSQL   │        │  EVM networks  │
//!      └────────────────┘        └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 도메인 에러 + HTTP 매핑
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: ledger, limits, transfer, deposit, withdrawal, wallet vault
//! - `db`: repository trait + PostgreSQL 구현
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledger_core_api::{config::Config, db::Database, services::*, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url).await?;
//!     let identity = HttpIdentityProvider::new(config.auth_url.clone(), config.auth_api_key.clone());
//!     let vault = WalletKeyVault::new(&config.wallet_secret_salt, &config.wallet_encryption_key);
//!
//!     let state = AppState::new(config, Arc::new(db), Arc::new(identity), ChainRegistry::new(), vault);
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, CoreError};

use db::Repository;
use services::{
    ChainRegistry, DepositWatcher, IdentityProvider, LedgerStore, LimitsEngine, TransferCoordinator,
    WalletKeyVault, WithdrawalProcessor,
};

/// 애플리케이션 상태
///
/// 프로세스 시작 시 한 번 만들고 각 서비스에 같은 의존성을 주입 (전역 싱글톤 없음)
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn Repository>,
    pub identity: Arc<dyn IdentityProvider>,
    pub chains: ChainRegistry,
    pub ledger: LedgerStore,
    pub limits: LimitsEngine,
    pub transfers: TransferCoordinator,
    pub deposits: DepositWatcher,
    pub withdrawals: WithdrawalProcessor,
}

impl AppState {
    pub fn new(
        config: Config,
        repo: Arc<dyn Repository>,
        identity: Arc<dyn IdentityProvider>,
        chains: ChainRegistry,
        vault: WalletKeyVault,
    ) -> Self {
        let networks = config.network_map();
        let ledger = LedgerStore::new(repo.clone());
        let limits = LimitsEngine::new(repo.clone(), ledger.clone(), config.limit_defaults);
        let transfers = TransferCoordinator::new(repo.clone(), limits.clone());
        let deposits = DepositWatcher::new(repo.clone(), chains.clone(), limits.clone(), vault, networks.clone());
        let withdrawals = WithdrawalProcessor::new(repo.clone(), limits.clone(), chains.clone(), networks, &config.jobs);

        Self {
            config: Arc::new(config),
            repo,
            identity,
            chains,
            ledger,
            limits,
            transfers,
            deposits,
            withdrawals,
        }
    }
}
