//! Common Types Module
//!
//! 원장 전반에서 사용되는 공통 타입 정의.
//! 자산 → 컬럼 매핑은 이 파일의 `Asset` 한 곳에서만 결정된다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API 응답 래퍼
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// 문자열 → enum 변환 실패
#[derive(Debug, Error)]
#[error("unsupported {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============ Asset ============

/// 자산의 정산 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// 체인 네이티브 코인 (gas 지불 수단)
    Native,
    /// ERC-20 토큰
    Token,
    /// 원장에만 존재, 관리자가 수동 정산
    Manual,
}

/// 지원 자산
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Eth,
    Usdt,
    Btc,
    Sol,
    Trx,
}

impl Asset {
    pub const ALL: [Asset; 5] = [Asset::Eth, Asset::Usdt, Asset::Btc, Asset::Sol, Asset::Trx];

    pub fn symbol(self) -> &'static str {
        match self {
            Asset::Eth => "ETH",
            Asset::Usdt => "USDT",
            Asset::Btc => "BTC",
            Asset::Sol => "SOL",
            Asset::Trx => "TRX",
        }
    }

    pub fn class(self) -> AssetClass {
        match self {
            Asset::Eth => AssetClass::Native,
            Asset::Usdt => AssetClass::Token,
            Asset::Btc | Asset::Sol | Asset::Trx => AssetClass::Manual,
        }
    }

    /// 원장 잔고 컬럼 (wallets 테이블)
    pub fn balance_column(self) -> &'static str {
        match self {
            Asset::Eth => "balance",
            Asset::Usdt => "usdt_balance",
            Asset::Btc => "btc_balance",
            Asset::Sol => "sol_balance",
            Asset::Trx => "trx_balance",
        }
    }

    /// 체인 잔고 워터마크 컬럼. 수동 자산은 없음.
    pub fn watermark_column(self) -> Option<&'static str> {
        match self {
            Asset::Eth => Some("last_chain_balance"),
            Asset::Usdt => Some("last_usdt_chain_balance"),
            Asset::Btc | Asset::Sol | Asset::Trx => None,
        }
    }

    /// 온체인 최소 단위 자릿수
    pub fn decimals(self) -> u32 {
        match self {
            Asset::Eth => 18,
            Asset::Usdt => 6,
            Asset::Btc => 8,
            Asset::Sol => 9,
            Asset::Trx => 6,
        }
    }

    pub fn network(self) -> &'static str {
        match self {
            Asset::Eth => "Ethereum",
            Asset::Usdt => "ERC-20",
            Asset::Btc => "Bitcoin Network",
            Asset::Sol => "Solana",
            Asset::Trx => "Tron (TRC20)",
        }
    }

    pub fn is_on_chain(self) -> bool {
        self.class() != AssetClass::Manual
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Asset {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ETH" => Ok(Asset::Eth),
            "USDT" => Ok(Asset::Usdt),
            "BTC" => Ok(Asset::Btc),
            "SOL" => Ok(Asset::Sol),
            "TRX" => Ok(Asset::Trx),
            _ => Err(ParseEnumError::new("asset", s)),
        }
    }
}

impl TryFrom<String> for Asset {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============ Transaction type / status ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Swap,
}

impl TxType {
    pub fn as_str(self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
            TxType::Swap => "swap",
        }
    }

    /// 거절(failed) 시 원장 환불 여부.
    /// 제출 시점에 차감이 일어나는 건 출금뿐이므로 출금만 환불한다.
    pub fn refunds_on_reject(self) -> bool {
        matches!(self, TxType::Withdrawal)
    }
}

impl FromStr for TxType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TxType::Deposit),
            "withdrawal" => Ok(TxType::Withdrawal),
            "swap" => Ok(TxType::Swap),
            _ => Err(ParseEnumError::new("transaction type", s)),
        }
    }
}

impl TryFrom<String> for TxType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// 트랜잭션 상태 머신
///
/// ```text
/// processing ──► pending ──► completed
///      │            │
///      └────────────┴──────► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Processing,
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Processing => "processing",
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }

    /// 이 상태로 전이할 수 있는 출발 상태들
    pub fn allowed_sources(self) -> &'static [TxStatus] {
        match self {
            TxStatus::Processing => &[],
            TxStatus::Pending => &[TxStatus::Processing],
            TxStatus::Completed | TxStatus::Failed => &[TxStatus::Processing, TxStatus::Pending],
        }
    }
}

impl FromStr for TxStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(TxStatus::Processing),
            "pending" => Ok(TxStatus::Pending),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            _ => Err(ParseEnumError::new("transaction status", s)),
        }
    }
}

impl TryFrom<String> for TxStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============ Identifiers ============

/// Ethereum 주소 타입 (lowercase 정규화)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthAddress(String);

impl EthAddress {
    pub fn new(addr: &str) -> Result<Self, String> {
        let addr = addr.trim().to_lowercase();
        if addr.starts_with("0x")
            && addr.len() == 42
            && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            Ok(Self(addr))
        } else {
            Err("Invalid Ethereum address format".to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 사용자 표시용 ID (`CORE-XXXXXX`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadableId(String);

impl ReadableId {
    pub const PREFIX: &'static str = "CORE-";

    /// 6자리 랜덤 번호로 새 ID 생성
    pub fn generate() -> Self {
        use rand::Rng;
        let number: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
        Self(format!("{}{}", Self::PREFIX, number))
    }

    pub fn is_valid(value: &str) -> bool {
        value
            .strip_prefix(Self::PREFIX)
            .map(|digits| digits.len() == 6 && digits.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 4자리 숫자 PIN 형식 검사
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit())
}
