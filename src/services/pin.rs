//! 출금 PIN
//!
//! 4자리 숫자 PIN을 argon2 해시(PHC 문자열)로 저장하고 검증한다.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{info, warn};

use crate::db::LedgerStore;
use crate::error::ApiError;
use crate::types::is_valid_pin;

pub struct PinService {
    store: Arc<dyn LedgerStore>,
}

impl PinService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn set_pin(&self, user_id: &str, pin: &str) -> Result<(), ApiError> {
        check_format(pin)?;
        let hash = hash_pin(pin)?;
        self.store.set_pin_hash(user_id, &hash).await?;
        info!(user_id, "withdrawal PIN updated");
        Ok(())
    }

    /// PIN이 없으면 `NotFound`, 틀리면 `Forbidden`
    pub async fn verify(&self, user_id: &str, pin: &str) -> Result<(), ApiError> {
        check_format(pin)?;

        let stored = self
            .store
            .pin_hash(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("PIN".to_string()))?;

        let parsed = PasswordHash::new(&stored).map_err(|_| {
            warn!(user_id, "stored PIN hash is unreadable");
            ApiError::SecurityFault("stored PIN hash is invalid".to_string())
        })?;

        Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .map_err(|_| {
                warn!(user_id, "PIN mismatch");
                ApiError::Forbidden("Incorrect PIN".to_string())
            })
    }
}

fn check_format(pin: &str) -> Result<(), ApiError> {
    if is_valid_pin(pin) {
        Ok(())
    } else {
        Err(ApiError::ValidationError("PIN must be exactly 4 digits".to_string()))
    }
}

fn hash_pin(pin: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ApiError::InternalError)
}
