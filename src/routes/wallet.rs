//! Wallet Endpoints
//!
//! 호출자 본인의 지갑만 다룬다. 사용자는 `x-user-id` 헤더로 식별된다.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{TransactionRecord, WalletRecord};
use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::services::{ImportKind, SwapRequest, WithdrawalReceipt, WithdrawalRequest};
use crate::services::wallet::SwapReceipt;
use crate::types::{ApiResponse, Asset};
use crate::AppState;

// ============ Request/Response Types ============

/// 사용자에게 보이는 지갑. 워터마크와 암호화 키는 포함하지 않는다.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub address: String,
    pub readable_id: Option<String>,
    pub balances: BTreeMap<&'static str, Decimal>,
    pub created_at: DateTime<Utc>,
}

impl From<&WalletRecord> for WalletView {
    fn from(wallet: &WalletRecord) -> Self {
        Self {
            address: wallet.address.clone(),
            readable_id: wallet.readable_id.clone(),
            balances: Asset::ALL
                .iter()
                .map(|asset| (asset.symbol(), wallet.balance_of(*asset)))
                .collect(),
            created_at: wallet.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 기본 50, 최대 500
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportWalletRequest {
    #[serde(rename = "type")]
    pub kind: ImportKind,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub user_id: Option<String>,
    #[serde(default = "default_asset")]
    pub asset: Asset,
}

fn default_asset() -> Asset {
    Asset::Eth
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub asset: Asset,
    pub chain_balance: Decimal,
    pub credited: Decimal,
}

// ============ Handlers ============

/// GET /wallet
pub async fn get_wallet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let wallet = state.wallets().wallet(&user.user_id).await?;
    Ok(Json(ApiResponse::success(WalletView::from(&wallet))))
}

/// GET /wallet/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<TransactionRecord>>>, ApiError> {
    let rows = state
        .wallets()
        .history(&user.user_id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(ApiResponse::success(rows)))
}

/// POST /wallet/create
pub async fn create_wallet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let wallet = state.wallets().create_wallet(&user.user_id, &req.pin).await?;
    Ok(Json(ApiResponse::success(WalletView::from(&wallet))))
}

/// POST /wallet/import
pub async fn import_wallet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<ImportWalletRequest>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let wallet = state
        .wallets()
        .import_wallet(&user.user_id, req.kind, &req.value)
        .await?;
    Ok(Json(ApiResponse::success(WalletView::from(&wallet))))
}

/// POST /wallet/send
pub async fn send(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<WithdrawalRequest>,
) -> Result<Json<ApiResponse<WithdrawalReceipt>>, ApiError> {
    let receipt = state.withdrawals().submit(&user.user_id, req).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// POST /wallet/sync
///
/// 본문의 `userId`는 선택. 있으면 헤더의 사용자와 같아야 한다.
pub async fn sync(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<SyncRequest>,
) -> Result<Json<ApiResponse<SyncResponse>>, ApiError> {
    if let Some(requested) = req.user_id.as_deref() {
        if requested != user.user_id {
            return Err(ApiError::Forbidden("cannot sync another user's wallet".to_string()));
        }
    }

    let outcome = state.reconciler().reconcile(&user.user_id, req.asset).await?;
    Ok(Json(ApiResponse::success(SyncResponse {
        asset: outcome.asset,
        chain_balance: outcome.chain_balance,
        credited: outcome.credited,
    })))
}

/// POST /wallet/swap
pub async fn swap(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<SwapRequest>,
) -> Result<Json<ApiResponse<SwapReceipt>>, ApiError> {
    let receipt = state.wallets().swap(&user.user_id, &req).await?;
    Ok(Json(ApiResponse::success(receipt)))
}
