//! Corecoin Ledger API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Client (Web / Admin panel)                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /health  /wallet/*  /security/*  /admin/*              ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  Reconciler  Sweep/GasStation  Withdrawal  Wallet       ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL ledger (wallets, transactions)              ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 EVM JSON-RPC (ETH + ERC-20)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use corecoin_ledger::{
    routes, services::EthersChain, AddressLocks, AppState, Config, Database, SecretCodec,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "corecoin_ledger=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Corecoin Ledger API Server");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(environment = ?config.environment, chain_id = config.chain_id, "📋 Configuration loaded");

    if config.master_address.is_none() {
        tracing::warn!("ADMIN_WALLET_ADDRESS not set; sweeps will be refused");
    }
    if config.gas_station_key.is_none() {
        tracing::warn!("GAS_WALLET_PRIVATE_KEY not set; token sweeps and withdrawals will be refused");
    }

    // 데이터베이스 연결
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 서비스 초기화
    let codec = SecretCodec::new(&config.encryption_key)?;
    tracing::info!("🔐 Key codec initialized");

    let chain = EthersChain::new(&config.rpc_url, config.chain_id, config.rpc_timeout)?;
    tracing::info!("⛓️  Chain client ready");

    // 앱 상태 구성
    let port = config.port;
    let state = AppState {
        store: Arc::new(db),
        chain: Arc::new(chain),
        codec: Arc::new(codec),
        locks: Arc::new(AddressLocks::new()),
        config: Arc::new(config),
    };

    // 라우터 구성
    let app = routes::create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
