//! Request Extractors
//!
//! 인증 자체는 앞단 게이트웨이가 담당한다. 여기서는 게이트웨이가 넣어 준
//! 사용자 식별 헤더와 관리자 키 헤더만 확인한다.

pub mod auth;

pub use auth::{AdminAuth, AuthenticatedUser, ADMIN_KEY_HEADER, USER_ID_HEADER};
