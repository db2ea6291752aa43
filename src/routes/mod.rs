//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크 (DB + 체인)
//! - `/wallet/*` - 사용자 지갑, 입금 동기화, 출금, 스왑
//! - `/security/*` - 출금 PIN
//! - `/admin/*` - 관리자 작업 (`x-admin-key` 필요)

pub mod admin;
pub mod health;
pub mod security;
pub mod wallet;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::{ADMIN_KEY_HEADER, USER_ID_HEADER};
use crate::AppState;

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health                      - 서버 상태 확인
///
/// GET  /wallet                      - 내 지갑 (잔고)
/// GET  /wallet/transactions         - 내 거래 내역
/// POST /wallet/create               - 지갑 생성 + PIN 설정
/// POST /wallet/import               - 니모닉/개인키 가져오기
/// POST /wallet/send                 - 출금 요청
/// POST /wallet/sync                 - 체인 입금 반영
/// POST /wallet/swap                 - 내부 환전
///
/// POST /security/pin                - PIN 설정/확인
/// POST /security/verify-pin         - PIN 확인
///
/// POST /admin/funds                 - 수동 잔고 조정
/// POST /admin/sweep                 - 마스터 볼트로 스윕
/// POST /admin/update-transaction    - 출금 승인/거절
/// POST /admin/reconcile-all         - 전체 입금 동기화
/// GET  /admin/get-users             - 지갑 목록 (readable id 복구)
/// GET  /admin/get-transactions      - 전체 거래 내역
/// GET  /admin/stuck-withdrawals     - 브로드캐스트 기록 없는 출금
/// GET  /admin/status                - 가스 탱크 / 마스터 볼트
/// GET  /admin/check-integrity       - 키/주소 무결성 검사
/// ```
pub fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션: ALLOWED_ORIGINS (쉼표 구분), 개발: localhost
    let cors = if state.config.is_production() {
        let allowed_origins = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("ALLOWED_ORIGINS is empty; cross-origin requests will be rejected");
        }
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static(USER_ID_HEADER),
                HeaderName::from_static(ADMIN_KEY_HEADER),
            ])
    } else {
        CorsLayer::new()
            .allow_origin([
                HeaderValue::from_static("http://localhost:5173"),
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health check
        .route("/health", get(health::health_check))

        // Wallet
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/create", post(wallet::create_wallet))
        .route("/wallet/import", post(wallet::import_wallet))
        .route("/wallet/send", post(wallet::send))
        .route("/wallet/sync", post(wallet::sync))
        .route("/wallet/swap", post(wallet::swap))

        // Security
        .route("/security/pin", post(security::pin))
        .route("/security/verify-pin", post(security::verify_pin))

        // Admin
        .route("/admin/funds", post(admin::adjust_funds))
        .route("/admin/sweep", post(admin::sweep))
        .route("/admin/update-transaction", post(admin::update_transaction))
        .route("/admin/reconcile-all", post(admin::reconcile_all))
        .route("/admin/get-users", get(admin::get_users))
        .route("/admin/get-transactions", get(admin::get_transactions))
        .route("/admin/stuck-withdrawals", get(admin::stuck_withdrawals))
        .route("/admin/status", get(admin::status))
        .route("/admin/check-integrity", get(admin::check_integrity))

        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)

        // 상태 주입
        .with_state(state)
}
