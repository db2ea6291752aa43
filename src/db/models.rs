//! Database Models
//!
//! Wallet rows carry the per-asset ledger ("ghost") balances and the on-chain
//! watermarks; transaction rows form the append-only history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{Asset, TxStatus, TxType};

/// 사용자 지갑 (사용자당 1개)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WalletRecord {
    pub id: Uuid,

    /// 외부 인증 시스템의 사용자 ID
    pub user_id: String,

    /// 온체인 주소 (생성 시 1회 설정, import로만 교체)
    pub address: String,

    /// 암호화된 개인키 (`nonce_hex:ciphertext_hex`)
    #[serde(skip_serializing)]
    pub encrypted_private_key: String,

    /// `CORE-XXXXXX`
    pub readable_id: Option<String>,

    // 원장 잔고
    pub balance: Decimal,
    pub usdt_balance: Decimal,
    pub btc_balance: Decimal,
    pub sol_balance: Decimal,
    pub trx_balance: Decimal,

    // 마지막으로 관측한 체인 잔고 (사용자에게 보이지 않음)
    pub last_chain_balance: Decimal,
    pub last_usdt_chain_balance: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletRecord {
    pub fn balance_of(&self, asset: Asset) -> Decimal {
        match asset {
            Asset::Eth => self.balance,
            Asset::Usdt => self.usdt_balance,
            Asset::Btc => self.btc_balance,
            Asset::Sol => self.sol_balance,
            Asset::Trx => self.trx_balance,
        }
    }

    pub fn balance_mut(&mut self, asset: Asset) -> &mut Decimal {
        match asset {
            Asset::Eth => &mut self.balance,
            Asset::Usdt => &mut self.usdt_balance,
            Asset::Btc => &mut self.btc_balance,
            Asset::Sol => &mut self.sol_balance,
            Asset::Trx => &mut self.trx_balance,
        }
    }

    /// 온체인 자산의 워터마크. 수동 자산은 None.
    pub fn watermark_of(&self, asset: Asset) -> Option<Decimal> {
        match asset {
            Asset::Eth => Some(self.last_chain_balance),
            Asset::Usdt => Some(self.last_usdt_chain_balance),
            _ => None,
        }
    }

    pub fn watermark_mut(&mut self, asset: Asset) -> Option<&mut Decimal> {
        match asset {
            Asset::Eth => Some(&mut self.last_chain_balance),
            Asset::Usdt => Some(&mut self.last_usdt_chain_balance),
            _ => None,
        }
    }
}

/// 신규 지갑
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: String,
    pub address: String,
    pub encrypted_private_key: String,
    pub readable_id: String,
}

/// 키 교체 시점의 새 주소 체인 잔고. 두 워터마크의 출발점이 된다.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainBaseline {
    pub eth: Decimal,
    pub usdt: Decimal,
}

/// 트랜잭션 기록 (append-only)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: String,

    #[sqlx(try_from = "String")]
    pub tx_type: TxType,

    /// 자산 심볼
    #[sqlx(try_from = "String")]
    pub currency: Asset,

    /// 부호 있음: 입금 +, 출금 -(amount + fee)
    pub amount: Decimal,

    #[sqlx(try_from = "String")]
    pub status: TxStatus,

    /// 목적지 주소, 네트워크, 수수료, tx_hash 등
    pub metadata: serde_json::Value,

    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn tx_hash(&self) -> Option<&str> {
        self.metadata.get("tx_hash").and_then(|v| v.as_str())
    }
}

/// 신규 트랜잭션
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub tx_type: TxType,
    pub currency: Asset,
    pub amount: Decimal,
    pub status: TxStatus,
    pub metadata: serde_json::Value,
    pub description: Option<String>,
}

/// 원장 항목: 잔고 증감 + 그에 대응하는 트랜잭션 한 줄.
/// 두 변경은 항상 함께 적용된다.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: String,
    pub asset: Asset,
    /// 잔고 변화량 (음수면 차감). 결과가 0 미만이면 거절.
    pub delta: Decimal,
    pub record: NewTransaction,
}

/// 상태 전이 결과
#[derive(Debug, Clone)]
pub struct Transition {
    pub record: TransactionRecord,
    /// 환불된 금액 (있다면)
    pub refunded: Option<Decimal>,
}
