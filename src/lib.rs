//! Corecoin Ledger Library
//!
//! # Overview
//!
//! 수탁형 지갑 원장 서비스. 사용자별 입금 주소의 개인키를 암호화해 보관하고,
//! 사용자에게 보이는 잔고는 내부 원장("ghost balance")으로 관리한다.
//! 실제 코인은 관리자 스윕으로 마스터 볼트에 모인다.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          API                             │
//! │                                                          │
//! │  ┌─────────┐  ┌──────────┐  ┌─────────┐  ┌─────────┐     │
//! │  │ Routes  │─►│ Services │─►│   DB    │  │  Types  │     │
//! │  └─────────┘  └────┬─────┘  └─────────┘  └─────────┘     │
//! │                    │                                     │
//! └────────────────────┼─────────────────────────────────────┘
//!                      ▼
//!             ┌─────────────────┐
//!             │  EVM JSON-RPC   │
//!             └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `middleware`: 사용자/관리자 식별 extractor
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 비즈니스 로직 (입금 동기화, 스윕, 출금, 지갑)
//! - `db`: 원장 저장소
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use corecoin_ledger::{config::Config, db::Database, services::EthersChain};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url).await?;
//!     let chain = EthersChain::new(&config.rpc_url, config.chain_id, config.rpc_timeout)?;
//!
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::{Database, LedgerStore};
pub use error::ApiError;
pub use services::{AddressLocks, ChainClient, SecretCodec};

use services::{
    AdminService, DepositReconciler, PinService, SweepOrchestrator, WalletService, WithdrawalService,
};

/// 애플리케이션 전역 상태
///
/// 저장소와 체인 클라이언트는 trait 객체로 주입된다 (테스트에서는 in-memory 구현).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub chain: Arc<dyn ChainClient>,
    pub codec: Arc<SecretCodec>,
    pub locks: Arc<AddressLocks>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn reconciler(&self) -> DepositReconciler {
        DepositReconciler::new(
            self.store.clone(),
            self.chain.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }

    pub fn sweeper(&self) -> SweepOrchestrator {
        SweepOrchestrator::new(
            self.store.clone(),
            self.chain.clone(),
            self.codec.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }

    pub fn withdrawals(&self) -> WithdrawalService {
        WithdrawalService::new(
            self.store.clone(),
            self.chain.clone(),
            self.codec.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }

    pub fn wallets(&self) -> WalletService {
        WalletService::new(
            self.store.clone(),
            self.chain.clone(),
            self.codec.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }

    pub fn pins(&self) -> PinService {
        PinService::new(self.store.clone())
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(
            self.store.clone(),
            self.chain.clone(),
            self.codec.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }
}
