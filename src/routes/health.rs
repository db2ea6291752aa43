//! Health Check Endpoint
//!
//! 원장 DB와 체인 RPC 둘 다 확인하는 deep health check.
//! 둘 중 하나라도 실패하면 `degraded`.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DependencyStatus,
    pub chain: ChainStatus,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DependencyStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct ChainStatus {
    pub connected: bool,
    pub block_number: Option<u64>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_start = std::time::Instant::now();
    let database = match state.store.health_check().await {
        Ok(_) => DependencyStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(_) => DependencyStatus {
            connected: false,
            latency_ms: None,
        },
    };

    let chain = match state.chain.block_number().await {
        Ok(block) => ChainStatus {
            connected: true,
            block_number: Some(block),
        },
        Err(e) => {
            tracing::warn!(error = %e, "chain health check failed");
            ChainStatus {
                connected: false,
                block_number: None,
            }
        }
    };

    let healthy = database.connected && chain.connected;

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        chain,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
