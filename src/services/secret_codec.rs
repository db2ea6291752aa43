//! Secret Codec
//!
//! 지갑 개인키 암호화/복호화. 저장 형식은 `nonce_hex:ciphertext_hex`.
//! ChaCha20-Poly1305 인증 암호라서 키가 틀리거나 암호문이 변조되면
//! 복호화가 실패한다 (쓰레기 평문을 돌려주지 않음).

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::ApiError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// 개인키 암호화기
pub struct SecretCodec {
    cipher: ChaCha20Poly1305,
}

impl SecretCodec {
    /// 64 hex 문자(32 bytes) 키로 생성
    pub fn new(key_hex: &str) -> Result<Self, ApiError> {
        let key = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|_| ApiError::Configuration("ENCRYPTION_KEY is not valid hex".to_string()))?,
        );
        if key.len() != KEY_LEN {
            return Err(ApiError::Configuration(
                "ENCRYPTION_KEY must be 32 bytes".to_string(),
            ));
        }

        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_slice())),
        })
    }

    /// 호출마다 새 nonce를 사용
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ApiError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| ApiError::InternalError)?;

        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// 형식 오류, 잘못된 키, 변조 모두 None
    pub fn decrypt(&self, token: &str) -> Option<Zeroizing<String>> {
        let (nonce_hex, body_hex) = token.split_once(':')?;

        let nonce = hex::decode(nonce_hex).ok()?;
        if nonce.len() != NONCE_LEN {
            return None;
        }
        let body = hex::decode(body_hex).ok()?;

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&nonce), body.as_slice())
                .ok()?,
        );

        std::str::from_utf8(&plaintext)
            .ok()
            .map(|s| Zeroizing::new(s.to_string()))
    }

    /// 복호화 실패를 보안 오류로 바꾼다. 실패 시 호출자는 즉시 중단해야 한다.
    pub fn reveal(&self, token: &str) -> Result<Zeroizing<String>, ApiError> {
        self.decrypt(token)
            .ok_or_else(|| ApiError::SecurityFault("wallet key could not be decrypted".to_string()))
    }
}
