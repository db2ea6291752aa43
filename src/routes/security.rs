//! Security Endpoints (withdrawal PIN)

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::types::ApiResponse;
use crate::AppState;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinAction {
    Set,
    Verify,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub action: PinAction,
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPinRequest {
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub verified: bool,
}

/// POST /security/pin
pub async fn pin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<PinRequest>,
) -> Result<Json<ApiResponse<PinResponse>>, ApiError> {
    let pins = state.pins();
    match req.action {
        PinAction::Set => {
            pins.set_pin(&user.user_id, &req.pin).await?;
            Ok(Json(ApiResponse::success(PinResponse { verified: false })))
        }
        PinAction::Verify => {
            pins.verify(&user.user_id, &req.pin).await?;
            Ok(Json(ApiResponse::success(PinResponse { verified: true })))
        }
    }
}

/// POST /security/verify-pin
pub async fn verify_pin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<VerifyPinRequest>,
) -> Result<Json<ApiResponse<PinResponse>>, ApiError> {
    state.pins().verify(&user.user_id, &req.pin).await?;
    Ok(Json(ApiResponse::success(PinResponse { verified: true })))
}
