//! Ledger Core API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Client (Crowdfunding frontend)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Bearer token
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /balance  /transfer  /withdraw  /deposits  /limits      ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  LedgerStore  LimitsEngine  TransferCoordinator          ││
//! │  │  DepositWatcher  WithdrawalProcessor  WalletKeyVault     ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL (atomic_transfer, get_user_balance, ...)     ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                 Background Jobs                          ││
//! │  │  deposit scan / confirm / credit   withdrawal batches    ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              EVM networks (ethereum, polygon, bsc)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use ledger_core_api::{
    routes,
    services::{jobs, ChainRegistry, EthersChainClient, HttpIdentityProvider, WalletKeyVault},
    AppState, Config, Database,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ledger_core_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Ledger Core API Server");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        networks = config.networks.len(),
        "📋 Configuration loaded"
    );

    // 데이터베이스 연결
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 지갑 vault + hot wallet
    let vault = WalletKeyVault::new(&config.wallet_secret_salt, &config.wallet_encryption_key);
    let hot_wallet = match &config.hot_wallet_key {
        Some(key) => Some(vault.hot_wallet(key)?),
        None => {
            tracing::warn!("Hot wallet key not configured, withdrawals will fail until it is set");
            None
        }
    };

    // 네트워크별 체인 클라이언트
    let mut chains = ChainRegistry::new();
    for network in &config.networks {
        let client = EthersChainClient::new(network.clone(), hot_wallet.clone(), config.jobs.scan_max_block_range)?;
        chains.insert(network.name.clone(), Arc::new(client));
        tracing::info!(network = %network.name, chain_id = network.chain_id, "⛓️  Chain client ready");
    }

    let identity = HttpIdentityProvider::new(config.auth_url.clone(), config.auth_api_key.clone());

    // 앱 상태 구성
    let port = config.port;
    let jobs_config = config.jobs.clone();
    let state = AppState::new(config, Arc::new(db), Arc::new(identity), chains, vault);

    // 백그라운드 작업
    jobs::spawn_deposit_watcher(state.deposits.clone(), jobs_config.deposit_scan_interval);
    jobs::spawn_withdrawal_batcher(
        state.withdrawals.clone(),
        jobs_config.withdrawal_batch_interval,
        jobs_config.withdrawal_batch_size,
    );

    // 라우터 구성
    let app = create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET    /health           - 서버 상태 확인 (DB, 네트워크별 block height)
///
/// GET    /balance          - 잔고 (crypto / platform / total), ?currency= 단일 통화
/// GET    /ledger           - ledger entry 히스토리
///
/// POST   /transfer         - 사용자 간 송금 (Idempotency-Key)
/// GET    /transfer         - 송금 히스토리
///
/// POST   /withdraw         - 출금 요청 (201)
/// GET    /withdraw         - 출금 요청 목록
/// GET    /withdraw/:id     - 출금 요청 조회
/// DELETE /withdraw         - 출금 취소
/// PUT    /withdraw         - (admin) 출금 배치 즉시 실행
///
/// GET    /deposits         - 입금 내역, ?action=address&network= 입금 주소
/// POST   /deposits         - (admin) confirmed 입금 반영
/// PUT    /deposits         - (admin) 입금 스캔
///
/// GET    /limits           - 한도 + 남은 여유분
/// PUT    /limits           - (admin) 한도 변경
/// POST   /limits           - 송금 사전 검증
/// ```
fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 특정 도메인만 허용
    use axum::http::{header, HeaderName, HeaderValue, Method};

    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];
    let headers = [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static(routes::IDEMPOTENCY_HEADER),
    ];

    let cors = if state.config.is_production() {
        // 프로덕션: 특정 도메인만 허용 (환경변수로 설정)
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "https://yourdomain.com".to_string());
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        // 개발: 모두 허용
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health check
        .route("/health", get(routes::health::health_check))

        // Balance
        .route("/balance", get(routes::balance::get_balance))
        .route("/ledger", get(routes::balance::get_ledger_history))

        // Transfer
        .route(
            "/transfer",
            post(routes::transfer::create_transfer).get(routes::transfer::list_transfers),
        )

        // Withdraw
        .route(
            "/withdraw",
            post(routes::withdraw::create_withdrawal)
                .get(routes::withdraw::list_withdrawals)
                .delete(routes::withdraw::cancel_withdrawal)
                .put(routes::withdraw::run_withdrawal_batch),
        )
        .route("/withdraw/:id", get(routes::withdraw::get_withdrawal))

        // Deposits
        .route(
            "/deposits",
            get(routes::deposits::get_deposits)
                .post(routes::deposits::process_deposit)
                .put(routes::deposits::scan_deposits),
        )

        // Limits
        .route(
            "/limits",
            get(routes::limits::get_limits)
                .put(routes::limits::update_limits)
                .post(routes::limits::check_transfer),
        )

        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)

        // 상태 주입
        .with_state(state)
}
