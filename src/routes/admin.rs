//! Admin Endpoints
//!
//! 모든 핸들러는 `x-admin-key` 헤더를 요구한다. 실패 응답의 `details`에는
//! 원본 에러 메시지가 들어간다 (`AdminError`).

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{TransactionRecord, WalletRecord};
use crate::error::AdminError;
use crate::middleware::AdminAuth;
use crate::services::wallet::AdjustReceipt;
use crate::services::{
    AdminFundsRequest, IntegrityEntry, PlatformStatus, ReconcileSummary, SweepOutcome,
};
use crate::types::{ApiResponse, Asset, TxStatus};
use crate::AppState;

type AdminResult<T> = Result<Json<ApiResponse<T>>, AdminError>;

// ============ Request/Response Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRequest {
    pub target_user_id: String,
    #[serde(default = "default_asset")]
    pub asset: Asset,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransactionRequest {
    pub id: i64,
    pub status: TxStatus,
}

#[derive(Debug, Serialize)]
pub struct UpdateTransactionResponse {
    pub transaction: TransactionRecord,
    pub refunded: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileAllRequest {
    #[serde(default = "default_asset")]
    pub asset: Asset,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckQuery {
    /// 기본 10분
    pub older_than_minutes: Option<i64>,
}

fn default_asset() -> Asset {
    Asset::Eth
}

// ============ Handlers ============

/// POST /admin/funds
pub async fn adjust_funds(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<AdminFundsRequest>,
) -> AdminResult<AdjustReceipt> {
    let receipt = state.wallets().admin_adjust(&req).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// POST /admin/sweep
pub async fn sweep(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<SweepRequest>,
) -> AdminResult<SweepOutcome> {
    let outcome = state.sweeper().sweep(&req.target_user_id, req.asset).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /admin/update-transaction
pub async fn update_transaction(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<UpdateTransactionRequest>,
) -> AdminResult<UpdateTransactionResponse> {
    let transition = state.withdrawals().update_status(req.id, req.status).await?;
    Ok(Json(ApiResponse::success(UpdateTransactionResponse {
        transaction: transition.record,
        refunded: transition.refunded,
    })))
}

/// POST /admin/reconcile-all
pub async fn reconcile_all(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<ReconcileAllRequest>,
) -> AdminResult<ReconcileSummary> {
    let summary = state.admin().reconcile_all(req.asset).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// GET /admin/get-users
pub async fn get_users(State(state): State<AppState>, _admin: AdminAuth) -> AdminResult<Vec<WalletRecord>> {
    let users = state.admin().list_users_healing().await?;
    Ok(Json(ApiResponse::success(users)))
}

/// GET /admin/get-transactions
pub async fn get_transactions(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(query): Query<ListQuery>,
) -> AdminResult<Vec<TransactionRecord>> {
    let rows = state.admin().transactions(query.limit.unwrap_or(200)).await?;
    Ok(Json(ApiResponse::success(rows)))
}

/// GET /admin/stuck-withdrawals
pub async fn stuck_withdrawals(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(query): Query<StuckQuery>,
) -> AdminResult<Vec<TransactionRecord>> {
    let minutes = query.older_than_minutes.unwrap_or(10).max(0);
    let rows = state
        .withdrawals()
        .stuck_withdrawals(Duration::minutes(minutes))
        .await?;
    Ok(Json(ApiResponse::success(rows)))
}

/// GET /admin/status
pub async fn status(State(state): State<AppState>, _admin: AdminAuth) -> AdminResult<PlatformStatus> {
    let status = state.admin().platform_status().await?;
    Ok(Json(ApiResponse::success(status)))
}

/// GET /admin/check-integrity
pub async fn check_integrity(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> AdminResult<Vec<IntegrityEntry>> {
    let report = state.admin().integrity_report().await?;
    Ok(Json(ApiResponse::success(report)))
}
