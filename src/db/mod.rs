//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 금융 원장에 적합한 이유
//!
//!    1. ACID 트랜잭션: debit + credit이 함께 적용되거나 둘 다 적용되지 않음
//!    2. Stored procedure: `atomic_transfer`, `get_user_balance`, `add_to_crypto_balance`
//!    3. Advisory lock: 사용자 단위 직렬화로 한도 검사와 쓰기를 원자화
//!    4. UNIQUE 제약: reference / idempotency key / tx_hash 중복 방지
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - 커넥션 재사용 (오버헤드 감소)
//!    - 타임아웃 처리

mod models;
mod postgres;
mod repository;

#[cfg(test)]
pub mod mock;

pub use models::*;
pub use repository::*;

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// PostgreSQL 기반 Repository 구현
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 20 (API 요청 + 백그라운드 작업)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 이미 만들어진 pool 사용 (테스트 DB 등)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
