//! Error Handling Module
//!
//! Provides type-safe error handling with proper HTTP status code mapping.
//! Every fault is turned into a structured JSON body at the handler boundary;
//! nothing here panics the process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::ChainError;
use crate::types::ParseEnumError;

/// API 에러 타입
///
/// # Fault categories
///
/// - 검증 실패: 400 (부작용 없음)
/// - 보안 실패: 401/403 (상세 정보는 서버 로그에만)
/// - 잔고/가스 부족: 422 (변경 전에 거절)
/// - 외부 의존성 실패: 503 (재시도 가능)
/// - 상태 충돌: 409 (이미 확정된 트랜잭션 등)
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ============ 401 / 403 ============
    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Security fault: {0}")]
    SecurityFault(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 409 Conflict ============
    #[error("Transaction already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ============ 422 Unprocessable Entity ============
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    // ============ 500 Internal Server Error ============
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,

    // ============ 503 Service Unavailable ============
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// API 에러 응답 구조
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// 재시도하면 성공할 수 있는 실패인지
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::ChainUnavailable(_) | ApiError::ServiceUnavailable(_)
        )
    }

    /// (status, code, 사용자용 메시지, 상세)
    fn parts(&self) -> (StatusCode, &'static str, String, Option<String>) {
        match self {
            // 4xx 클라이언트 에러
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
                None,
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            ApiError::SecurityFault(_) => {
                tracing::error!("Security fault: {:?}", self);
                (
                    StatusCode::FORBIDDEN,
                    "SECURITY_FAULT",
                    "Security check failed for this wallet".to_string(),
                    None,
                )
            }
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),
            ApiError::AlreadyFinalized(_) => (
                StatusCode::CONFLICT,
                "ALREADY_FINALIZED",
                "Transaction already finalized".to_string(),
                None,
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None),
            ApiError::InsufficientFunds(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_FUNDS",
                "Insufficient funds".to_string(),
                Some(msg.clone()),
            ),

            // 5xx 서버 에러
            ApiError::Configuration(_) => {
                tracing::error!("Configuration error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIGURATION_ERROR",
                    "Service is misconfigured".to_string(),
                    None,
                )
            }
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ChainUnavailable(_) => {
                tracing::warn!("Chain unavailable: {:?}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CHAIN_UNAVAILABLE",
                    "Blockchain network is unavailable, please retry".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                format!("{} is currently unavailable", service),
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// 관리자 라우트용 에러
///
/// 상태 코드와 코드는 `ApiError`와 같고, `details`에 원본 메시지를 항상 포함한다.
#[derive(Debug)]
pub struct AdminError(pub ApiError);

impl From<ApiError> for AdminError {
    fn from(err: ApiError) -> Self {
        AdminError(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, code, message, _) = self.0.parts();

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details: Some(self.0.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

/// SQLx 에러를 ApiError로 변환
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("SQLx error: {:?}", err);
        ApiError::DatabaseError(err.to_string())
    }
}

/// anyhow 에러를 ApiError로 변환
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {:?}", err);
        ApiError::InternalError
    }
}

impl From<ParseEnumError> for ApiError {
    fn from(err: ParseEnumError) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

/// 체인 에러 → API 에러. 타임아웃/RPC 실패는 재시도 가능.
impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Timeout(_) | ChainError::Rpc(_) => ApiError::ChainUnavailable(err.to_string()),
            ChainError::InvalidKey => ApiError::SecurityFault(err.to_string()),
            ChainError::InvalidAddress(_) => ApiError::ValidationError(err.to_string()),
            ChainError::Reverted(_) => ApiError::ServiceUnavailable(err.to_string()),
        }
    }
}
