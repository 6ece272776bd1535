//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: DB 연결 상태와 블록 높이까지 체크하는 이유는?
//! A: "깊은 헬스체크"(deep health check) 패턴
//!    - 단순 200 OK: 프로세스 살아있음
//!    - DB 체크: 잔고/송금 처리 가능 상태
//!    - 네트워크별 block height: 입금 감지 / 출금 broadcast 가능 상태
//!    - 외부 의존성 장애 시 트래픽 차단 가능

use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub networks: Vec<NetworkStatus>,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct NetworkStatus {
    pub name: String,
    pub block_height: Option<u64>,
}

/// GET /health
///
/// 서버 및 의존성 상태 확인
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_start = Instant::now();
    let database = match state.repo.health_check().await {
        Ok(_) => DatabaseStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            DatabaseStatus {
                connected: false,
                latency_ms: None,
            }
        }
    };

    let mut networks = Vec::new();
    for name in state.chains.networks() {
        let block_height = match state.chains.get(&name) {
            Ok(chain) => chain.block_height().await.ok(),
            Err(_) => None,
        };
        networks.push(NetworkStatus { name, block_height });
    }

    let healthy = database.connected && networks.iter().all(|n| n.block_height.is_some());
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        networks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
