//! Authentication Extractors
//!
//! `x-user-id`로 사용자를 식별하고 `x-admin-key`로 관리자 요청을 확인한다.
//! 둘 다 실패하면 핸들러에 도달하지 않는다.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// 게이트웨이가 넣어 주는 사용자 ID 헤더
pub const USER_ID_HEADER: &str = "x-user-id";

/// 관리자 요청 헤더 (`ADMIN_API_KEY`와 같아야 함)
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// 인증된 사용자
///
/// 사용법:
/// ```rust,ignore
/// pub async fn get_wallet(
///     State(state): State<AppState>,
///     user: AuthenticatedUser,
/// ) -> Result<...> {
///     let wallet = state.wallets().wallet(&user.user_id).await?;
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthenticatedUser {
            user_id: user_id.to_string(),
        })
    }
}

/// 관리자 요청 표시. 값은 없다.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.config.admin_api_key.as_str();
        if expected.is_empty() {
            return Err(ApiError::Configuration("ADMIN_API_KEY is not set".to_string()));
        }

        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        if !keys_match(presented.as_bytes(), expected.as_bytes()) {
            warn!(path = %parts.uri.path(), "admin request with wrong key");
            return Err(ApiError::Forbidden("admin access denied".to_string()));
        }

        Ok(AdminAuth)
    }
}

/// 길이가 같으면 모든 바이트를 비교한다 (조기 종료 없음)
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
