//! Wallet Service
//!
//! 지갑 생성/가져오기, 잔고/내역 조회, 스왑, 관리자 잔고 조정.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{
    ChainBaseline, LedgerEntry, LedgerStore, NewTransaction, NewWallet, TransactionRecord,
    WalletRecord,
};
use crate::error::ApiError;
use crate::services::chain::{
    address_of, checksum, generate_key, key_from_phrase, ChainClient, ChainError,
};
use crate::services::locks::AddressLocks;
use crate::services::pin::PinService;
use crate::services::reconciler::DepositReconciler;
use crate::services::secret_codec::SecretCodec;
use crate::types::{Asset, ReadableId, TxStatus, TxType};

/// readable id 충돌 시 재시도 횟수
pub const READABLE_ID_ATTEMPTS: usize = 10;

/// 가져오기 입력 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ImportKind {
    #[serde(rename = "phrase")]
    Phrase,
    #[serde(rename = "privateKey", alias = "private_key")]
    PrivateKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustDirection {
    Credit,
    Debit,
}

/// 관리자 잔고 조정
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminFundsRequest {
    pub target_user_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub direction: AdjustDirection,
    pub currency: Asset,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub from_currency: Asset,
    pub to_currency: Asset,
    pub amount: Decimal,
    /// 1 from 당 to 수량 (클라이언트 제공)
    pub rate: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapReceipt {
    pub pair_id: Uuid,
    pub debited: Decimal,
    pub credited: Decimal,
    pub legs: (TransactionRecord, TransactionRecord),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustReceipt {
    pub balance: Decimal,
    pub transaction: TransactionRecord,
}

pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    codec: Arc<SecretCodec>,
    locks: Arc<AddressLocks>,
    pins: PinService,
    reconciler: DepositReconciler,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        codec: Arc<SecretCodec>,
        locks: Arc<AddressLocks>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pins: PinService::new(store.clone()),
            reconciler: DepositReconciler::new(store.clone(), chain, locks.clone(), config),
            store,
            codec,
            locks,
        }
    }

    // ============ Lifecycle ============

    /// 지갑이 없으면 PIN을 저장하고 새 키쌍으로 만든다.
    /// 이미 있으면 기존 지갑을 그대로 돌려주고, 저장된 PIN은 바꾸지 않는다.
    pub async fn create_wallet(&self, user_id: &str, pin: &str) -> Result<WalletRecord, ApiError> {
        if let Some(existing) = self.store.wallet_by_user(user_id).await? {
            // 가져오기로 만든 지갑처럼 PIN이 없을 때만 설정
            if self.store.pin_hash(user_id).await?.is_none() {
                self.pins.set_pin(user_id, pin).await?;
            }
            return Ok(existing);
        }

        self.pins.set_pin(user_id, pin).await?;

        let (key, address) = generate_key();
        let encrypted = self.codec.encrypt(&key)?;

        for _ in 0..READABLE_ID_ATTEMPTS {
            let wallet = NewWallet {
                user_id: user_id.to_string(),
                address: checksum(address),
                encrypted_private_key: encrypted.clone(),
                readable_id: ReadableId::generate().as_str().to_string(),
            };

            match self.store.insert_wallet(&wallet).await {
                Ok(row) => {
                    info!(user_id, address = %row.address, readable_id = ?row.readable_id, "wallet created");
                    return Ok(row);
                }
                Err(ApiError::Conflict(_)) => {
                    // 동시 생성이면 먼저 만든 지갑을 쓴다. 아니면 id 충돌이므로 재시도.
                    if let Some(existing) = self.store.wallet_by_user(user_id).await? {
                        return Ok(existing);
                    }
                    warn!(user_id, "readable id collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ApiError::Conflict("could not allocate a unique readable id".to_string()))
    }

    /// 니모닉 또는 개인키로 지갑 교체. 잔고와 readable id는 유지된다.
    ///
    /// 워터마크는 새 주소의 현재 체인 잔고로 맞춘다. 가져오기 이전부터 있던
    /// 코인은 입금으로 반영되지 않고, 체인 조회가 실패하면 아무것도 쓰지 않는다.
    pub async fn import_wallet(&self, user_id: &str, kind: ImportKind, value: &str) -> Result<WalletRecord, ApiError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ApiError::ValidationError("key is required".to_string()));
        }

        let invalid = |_: ChainError| ApiError::ValidationError("Invalid seed phrase or private key".to_string());
        let key = match kind {
            ImportKind::Phrase => key_from_phrase(value).map_err(invalid)?,
            ImportKind::PrivateKey => {
                let hex_key = if value.starts_with("0x") {
                    value.to_string()
                } else {
                    format!("0x{}", value)
                };
                address_of(&hex_key).map_err(invalid)?;
                zeroize::Zeroizing::new(hex_key)
            }
        };
        let address = checksum(address_of(&key)?);

        // 이전 주소의 스윕/출금/입금 반영과 겹치지 않도록 두 주소 모두 잠금
        let previous = self
            .store
            .wallet_by_user(user_id)
            .await?
            .map(|w| w.address)
            .unwrap_or_else(|| address.clone());
        let _guards = self.locks.acquire_pair(&previous, &address).await;

        let baseline = self.chain_baseline(&address).await?;

        let wallet = NewWallet {
            user_id: user_id.to_string(),
            address,
            encrypted_private_key: self.codec.encrypt(&key)?,
            readable_id: ReadableId::generate().as_str().to_string(),
        };

        let row = self.store.replace_keys(&wallet, &baseline).await?;
        info!(
            user_id,
            address = %row.address,
            eth_watermark = %baseline.eth,
            usdt_watermark = %baseline.usdt,
            "wallet imported"
        );
        Ok(row)
    }

    /// 새 주소의 현재 ETH / USDT 잔고. USDT 컨트랙트가 없으면 0.
    async fn chain_baseline(&self, address: &str) -> Result<ChainBaseline, ApiError> {
        let eth = self.reconciler.live_balance(Asset::Eth, address).await?;
        let usdt = match self.reconciler.live_balance(Asset::Usdt, address).await {
            Ok(balance) => balance,
            Err(ApiError::Configuration(_)) => Decimal::ZERO,
            Err(e) => return Err(e),
        };
        Ok(ChainBaseline { eth, usdt })
    }

    // ============ Queries ============

    pub async fn wallet(&self, user_id: &str) -> Result<WalletRecord, ApiError> {
        self.store
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Wallet".to_string()))
    }

    pub async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<TransactionRecord>, ApiError> {
        self.store
            .list_transactions(Some(user_id), limit.clamp(1, 500))
            .await
    }

    // ============ Ledger operations ============

    /// 원장만 움직이는 관리자 조정. 차감으로 음수가 되면 거절.
    pub async fn admin_adjust(&self, request: &AdminFundsRequest) -> Result<AdjustReceipt, ApiError> {
        if request.amount <= Decimal::ZERO {
            return Err(ApiError::ValidationError("amount must be greater than zero".to_string()));
        }

        let (delta, tx_type, label) = match request.direction {
            AdjustDirection::Credit => (request.amount, TxType::Deposit, "credit"),
            AdjustDirection::Debit => (-request.amount, TxType::Withdrawal, "debit"),
        };

        let entry = LedgerEntry {
            user_id: request.target_user_id.clone(),
            asset: request.currency,
            delta,
            record: NewTransaction {
                user_id: request.target_user_id.clone(),
                tx_type,
                currency: request.currency,
                amount: delta,
                status: TxStatus::Completed,
                metadata: json!({ "method": "admin_panel" }),
                description: Some(format!("Admin {}", label)),
            },
        };

        let (balance, transaction) = self.store.apply_entry(&entry).await?;
        info!(
            user_id = %request.target_user_id,
            currency = %request.currency,
            %delta,
            %balance,
            "admin balance adjustment"
        );
        Ok(AdjustReceipt { balance, transaction })
    }

    /// 두 다리를 한 번에 기록. 한쪽만 남는 일은 없다.
    pub async fn swap(&self, user_id: &str, request: &SwapRequest) -> Result<SwapReceipt, ApiError> {
        if request.from_currency == request.to_currency {
            return Err(ApiError::ValidationError("cannot swap an asset into itself".to_string()));
        }
        if request.amount <= Decimal::ZERO || request.rate <= Decimal::ZERO {
            return Err(ApiError::ValidationError(
                "amount and rate must be greater than zero".to_string(),
            ));
        }

        let received = request
            .amount
            .checked_mul(request.rate)
            .ok_or_else(|| ApiError::ValidationError("swap amount out of range".to_string()))?;

        let pair_id = Uuid::new_v4();
        let description = format!("Swap {} -> {}", request.from_currency, request.to_currency);
        let metadata = json!({
            "pair_id": pair_id,
            "from": request.from_currency,
            "to": request.to_currency,
            "rate": request.rate.to_string(),
        });

        let leg = |asset: Asset, delta: Decimal| LedgerEntry {
            user_id: user_id.to_string(),
            asset,
            delta,
            record: NewTransaction {
                user_id: user_id.to_string(),
                tx_type: TxType::Swap,
                currency: asset,
                amount: delta,
                status: TxStatus::Completed,
                metadata: metadata.clone(),
                description: Some(description.clone()),
            },
        };

        let debit = leg(request.from_currency, -request.amount);
        let credit = leg(request.to_currency, received);
        let legs = self.store.record_swap(&debit, &credit).await?;

        info!(
            user_id,
            from = %request.from_currency,
            to = %request.to_currency,
            amount = %request.amount,
            %received,
            "swap recorded"
        );

        Ok(SwapReceipt {
            pair_id,
            debited: request.amount,
            credited: received,
            legs,
        })
    }
}
