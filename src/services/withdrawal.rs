//! Withdrawal / Refund State Machine
//!
//! 출금은 2단계로 처리된다: 먼저 원장에서 `amount + fee`를 예약(차감)하고
//! `processing` 행을 만든 뒤, 체인 브로드캐스트 결과에 따라 유지하거나
//! 같은 환불 전이로 되돌린다.
//!
//! ```text
//! submit ─► reserve (ledger -= amount+fee, row=processing)
//!              │
//!              ├─ broadcast ok      ─► tx_hash 기록, 관리자 검토 대기
//!              ├─ node rejected     ─► failed + refund
//!              └─ outcome unknown   ─► processing 유지 (stuck 목록에서 수동 확인)
//!
//! admin: processing ─► pending ─► completed | failed(+refund)
//! ```
//!
//! 종료 상태(completed/failed)의 행은 어떤 전이도 받지 않는다.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{LedgerEntry, LedgerStore, NewTransaction, TransactionRecord, Transition};
use crate::error::ApiError;
use crate::services::chain::{effective_gas_price, parse_address, ChainClient, ChainError};
use crate::services::locks::AddressLocks;
use crate::services::pin::PinService;
use crate::services::secret_codec::SecretCodec;
use crate::services::sweep::{GasStation, NATIVE_TRANSFER_GAS, TOKEN_TRANSFER_GAS};
use crate::services::units::{from_base_units, to_base_units};
use crate::types::{Asset, AssetClass, EthAddress, TxStatus, TxType};

/// 출금 요청
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub to_address: String,
    pub amount: Decimal,
    #[serde(default = "default_asset")]
    pub asset: Asset,
    pub pin: String,
}

fn default_asset() -> Asset {
    Asset::Eth
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub transaction_id: i64,
    pub status: TxStatus,
    pub asset: Asset,
    pub amount: Decimal,
    pub fee: Decimal,
    pub tx_hash: Option<String>,
}

/// 브로드캐스트 실패 구분
enum BroadcastFailure {
    /// 전송 전 실패 또는 노드가 거절: 예약을 풀어도 됨
    Rejected(ApiError),
    /// 타임아웃: 전송됐을 수 있으므로 예약 유지
    Unknown(ApiError),
}

impl BroadcastFailure {
    fn from_send(err: ChainError) -> Self {
        match err {
            ChainError::Timeout(_) => Self::Unknown(err.into()),
            other => Self::Rejected(other.into()),
        }
    }
}

/// 브로드캐스트 방식
enum Payout {
    Native { value: U256, gas_price: U256 },
    Token { contract: Address, units: U256, gas_price: U256 },
}

pub struct WithdrawalService {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    codec: Arc<SecretCodec>,
    locks: Arc<AddressLocks>,
    config: Arc<Config>,
    pins: PinService,
    gas_station: GasStation,
}

impl WithdrawalService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        codec: Arc<SecretCodec>,
        locks: Arc<AddressLocks>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pins: PinService::new(store.clone()),
            gas_station: GasStation::new(
                store.clone(),
                chain.clone(),
                locks.clone(),
                config.clone(),
            ),
            store,
            chain,
            codec,
            locks,
            config,
        }
    }

    // ============ Submit ============

    pub async fn submit(&self, user_id: &str, request: WithdrawalRequest) -> Result<WithdrawalReceipt, ApiError> {
        let asset = request.asset;
        if request.amount <= Decimal::ZERO {
            return Err(ApiError::ValidationError("amount must be greater than zero".to_string()));
        }

        let destination = if asset.is_on_chain() {
            EthAddress::new(&request.to_address)
                .map_err(ApiError::ValidationError)?
                .as_str()
                .to_string()
        } else {
            let trimmed = request.to_address.trim();
            if trimmed.is_empty() {
                return Err(ApiError::ValidationError("destination address is required".to_string()));
            }
            trimmed.to_string()
        };

        self.pins.verify(user_id, &request.pin).await?;

        let wallet = self
            .store
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Wallet".to_string()))?;

        if asset.class() == AssetClass::Manual {
            // 수동 자산: 예약만 하고 관리자가 정산
            let row = self
                .reserve(user_id, asset, request.amount, Decimal::ZERO, &destination)
                .await?;
            return Ok(receipt(&row, request.amount, Decimal::ZERO, None));
        }

        let key = self.codec.reveal(&wallet.encrypted_private_key).map_err(|e| {
            error!(user_id, "withdrawal aborted: wallet key failed to decrypt");
            e
        })?;
        let from = parse_address(&wallet.address)?;
        let to = parse_address(&destination)?;

        // 같은 키로 서명하는 스윕과 겹치지 않도록
        let _guard = self.locks.acquire(&wallet.address).await;

        let (payout, fee) = self.quote(asset, request.amount, from).await?;

        let row = self
            .reserve(user_id, asset, request.amount, fee, &destination)
            .await?;

        match self.broadcast(user_id, &key, from, to, &payout).await {
            Ok(hash) => {
                let tx_hash = format!("{:?}", hash);
                if let Err(e) = self.store.attach_tx_hash(row.id, &tx_hash).await {
                    // 브로드캐스트는 됐지만 해시를 잃음: 수동 확인 필요
                    error!(
                        tx_id = row.id,
                        tx_hash = %tx_hash,
                        error = %e,
                        alert = "unrecorded_broadcast",
                        "withdrawal broadcast but tx hash was not stored"
                    );
                }
                info!(user_id, %asset, tx_id = row.id, tx_hash = %tx_hash, "withdrawal broadcast");
                Ok(receipt(&row, request.amount, fee, Some(tx_hash)))
            }
            Err(BroadcastFailure::Rejected(e)) => {
                warn!(user_id, %asset, tx_id = row.id, error = %e, "withdrawal broadcast failed, releasing reservation");
                self.release(row.id).await;
                Err(e)
            }
            Err(BroadcastFailure::Unknown(e)) => {
                // 체인에 들어갔을 수 있음: 환불하지 않고 관리자 확인을 기다린다
                error!(
                    user_id,
                    %asset,
                    tx_id = row.id,
                    error = %e,
                    alert = "stuck_withdrawal",
                    "withdrawal broadcast outcome unknown, reservation kept"
                );
                Err(e)
            }
        }
    }

    /// 체인 사전 검사 + 수수료 산정. 아무것도 변경하지 않는다.
    async fn quote(&self, asset: Asset, amount: Decimal, from: Address) -> Result<(Payout, Decimal), ApiError> {
        let gas_price = effective_gas_price(self.chain.as_ref()).await?;

        match asset.class() {
            AssetClass::Native => {
                let value = to_base_units(amount, asset.decimals())?;
                let fee_wei = U256::from(NATIVE_TRANSFER_GAS) * gas_price;
                let on_chain = self.chain.native_balance(from).await?;
                if on_chain < value + fee_wei {
                    return Err(ApiError::InsufficientFunds(
                        "on-chain balance cannot cover amount plus gas".to_string(),
                    ));
                }
                let fee = from_base_units(fee_wei, asset.decimals())?;
                Ok((Payout::Native { value, gas_price }, fee))
            }
            AssetClass::Token => {
                let contract = self.config.token_contract(asset)?;
                // 토큰 가스는 가스 스테이션이 낸다
                self.config.gas_station_key()?;
                let units = to_base_units(amount, asset.decimals())?;
                let on_chain = self.chain.token_balance(contract, from).await?;
                if on_chain < units {
                    return Err(ApiError::InsufficientFunds(format!(
                        "on-chain {} balance is too low",
                        asset
                    )));
                }
                Ok((Payout::Token { contract, units, gas_price }, Decimal::ZERO))
            }
            AssetClass::Manual => Err(ApiError::ValidationError(format!(
                "{} has no on-chain payout",
                asset
            ))),
        }
    }

    async fn broadcast(
        &self,
        user_id: &str,
        key: &str,
        from: Address,
        to: Address,
        payout: &Payout,
    ) -> Result<H256, BroadcastFailure> {
        match payout {
            Payout::Native { value, gas_price } => self
                .chain
                .send_native(key, to, *value, U256::from(NATIVE_TRANSFER_GAS), *gas_price)
                .await
                .map_err(BroadcastFailure::from_send),
            Payout::Token { contract, units, gas_price } => {
                // 충전 단계의 실패는 출금 전송 전이므로 해제 대상
                let required = U256::from(TOKEN_TRANSFER_GAS) * *gas_price;
                self.gas_station
                    .ensure_gas(user_id, from, required)
                    .await
                    .map_err(BroadcastFailure::Rejected)?;
                self.chain
                    .send_token(key, *contract, to, *units)
                    .await
                    .map_err(BroadcastFailure::from_send)
            }
        }
    }

    /// 원장 예약: 잔고 차감과 processing 행을 함께 기록
    pub(crate) async fn reserve(
        &self,
        user_id: &str,
        asset: Asset,
        amount: Decimal,
        fee: Decimal,
        destination: &str,
    ) -> Result<TransactionRecord, ApiError> {
        let total = amount + fee;
        let entry = LedgerEntry {
            user_id: user_id.to_string(),
            asset,
            delta: -total,
            record: NewTransaction {
                user_id: user_id.to_string(),
                tx_type: TxType::Withdrawal,
                currency: asset,
                amount: -total,
                status: TxStatus::Processing,
                metadata: json!({
                    "to_address": destination,
                    "network": asset.network(),
                    "amount": amount.to_string(),
                    "fee": fee.to_string(),
                }),
                description: Some(format!("Withdrawal to {}", destination)),
            },
        };

        let (balance, row) = self.store.apply_entry(&entry).await?;
        info!(user_id, %asset, reserved = %total, remaining = %balance, tx_id = row.id, "withdrawal reserved");
        Ok(row)
    }

    /// 실패한 브로드캐스트의 예약 해제. 해제마저 실패하면 알림 대상.
    async fn release(&self, id: i64) {
        match self.store.transition(id, TxStatus::Failed).await {
            Ok(t) => info!(tx_id = id, refunded = ?t.refunded, "withdrawal reservation released"),
            Err(e) => error!(
                tx_id = id,
                error = %e,
                alert = "stuck_withdrawal",
                "failed to release withdrawal reservation"
            ),
        }
    }

    // ============ Admin transitions ============

    /// 관리자 상태 변경 요청을 해당 전이로 보낸다
    pub async fn update_status(&self, id: i64, status: TxStatus) -> Result<Transition, ApiError> {
        match status {
            TxStatus::Pending => self.mark_pending(id).await,
            TxStatus::Completed => self.approve(id).await,
            TxStatus::Failed => self.reject(id).await,
            TxStatus::Processing => Err(ApiError::ValidationError(
                "transactions cannot be moved back to processing".to_string(),
            )),
        }
    }

    pub async fn mark_pending(&self, id: i64) -> Result<Transition, ApiError> {
        let t = self.store.transition(id, TxStatus::Pending).await?;
        info!(tx_id = id, "transaction under review");
        Ok(t)
    }

    /// 잔고 변화 없음 (차감은 제출 시 이미 일어남)
    pub async fn approve(&self, id: i64) -> Result<Transition, ApiError> {
        let t = self.store.transition(id, TxStatus::Completed).await?;
        info!(tx_id = id, "transaction approved");
        Ok(t)
    }

    /// 출금이면 `abs(amount)`를 같은 자산으로 환불
    pub async fn reject(&self, id: i64) -> Result<Transition, ApiError> {
        let t = self.store.transition(id, TxStatus::Failed).await?;
        info!(
            tx_id = id,
            currency = %t.record.currency,
            refunded = ?t.refunded,
            "transaction rejected"
        );
        Ok(t)
    }

    /// 브로드캐스트 기록 없이 processing에 남은 온체인 출금
    pub async fn stuck_withdrawals(&self, older_than: Duration) -> Result<Vec<TransactionRecord>, ApiError> {
        self.store.stuck_withdrawals(Utc::now() - older_than).await
    }
}

fn receipt(row: &TransactionRecord, amount: Decimal, fee: Decimal, tx_hash: Option<String>) -> WithdrawalReceipt {
    WithdrawalReceipt {
        transaction_id: row.id,
        status: row.status,
        asset: row.currency,
        amount,
        fee,
        tx_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chain::mock::Sent;
    use crate::services::testing::{dec, Fixture, PIN, USER};

    const DEST: &str = "0x1111111111111111111111111111111111111111";

    fn request(amount: &str, asset: Asset) -> WithdrawalRequest {
        WithdrawalRequest {
            to_address: DEST.to_string(),
            amount: dec(amount),
            asset,
            pin: PIN.to_string(),
        }
    }

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    async fn balance(fx: &Fixture, asset: Asset) -> Decimal {
        fx.store
            .wallet_by_user(USER)
            .await
            .unwrap()
            .unwrap()
            .balance_of(asset)
    }

    #[tokio::test]
    async fn test_reject_refunds_exactly_once() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("2.0"), None);

        let service = fx.state().withdrawals();
        let row = service
            .reserve(USER, Asset::Eth, dec("1.5"), dec("0.01"), DEST)
            .await
            .unwrap();
        assert_eq!(row.amount, dec("-1.51"));
        assert_eq!(row.status, TxStatus::Processing);
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.49"));

        let t = service.reject(row.id).await.unwrap();
        assert_eq!(t.record.status, TxStatus::Failed);
        assert_eq!(t.refunded, Some(dec("1.51")));
        assert_eq!(balance(&fx, Asset::Eth).await, dec("2.0"));

        let again = service.reject(row.id).await.unwrap_err();
        assert!(matches!(again, ApiError::AlreadyFinalized(_)));
        assert_eq!(balance(&fx, Asset::Eth).await, dec("2.0"));
    }

    #[tokio::test]
    async fn test_submit_native_broadcasts_and_stays_processing() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("2"), None);
        fx.chain.set_native(fx.user_address(), U256::exp10(18) * 2);
        fx.chain.set_gas_price(Some(gwei(500)));

        let receipt = fx
            .state()
            .withdrawals()
            .submit(USER, request("1.5", Asset::Eth))
            .await
            .unwrap();

        // 21000 * 500 gwei = 0.0105 ETH
        assert_eq!(receipt.fee, dec("0.0105"));
        assert_eq!(receipt.status, TxStatus::Processing);
        assert!(receipt.tx_hash.is_some());
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.4895"));

        let row = fx.store.transaction(receipt.transaction_id).await.unwrap().unwrap();
        assert_eq!(row.amount, dec("-1.5105"));
        assert_eq!(row.tx_hash(), receipt.tx_hash.as_deref());

        let sent = fx.chain.sent();
        assert!(matches!(sent.as_slice(), [Sent::Native { .. }]));
    }

    #[tokio::test]
    async fn test_broadcast_failure_releases_reservation() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("2"), None);
        fx.chain.set_native(fx.user_address(), U256::exp10(18) * 2);
        fx.chain.fail_sends(true);

        let err = fx
            .state()
            .withdrawals()
            .submit(USER, request("1", Asset::Eth))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(balance(&fx, Asset::Eth).await, dec("2"));

        let rows = fx.store.list_transactions(Some(USER), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn test_insufficient_ledger_balance_mutates_nothing() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("0.5"), None);
        fx.chain.set_native(fx.user_address(), U256::exp10(18) * 5);

        let err = fx
            .state()
            .withdrawals()
            .submit(USER, request("1", Asset::Eth))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientFunds(_)));
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.5"));
        assert_eq!(fx.store.transaction_count(), 0);
        assert!(fx.chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_chain_balance_is_rejected_before_reserve() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("5"), None);
        fx.chain.set_native(fx.user_address(), U256::exp10(17));

        let err = fx
            .state()
            .withdrawals()
            .submit(USER, request("1", Asset::Eth))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientFunds(_)));
        assert_eq!(fx.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_pin_is_forbidden() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("5"), None);

        let mut req = request("1", Asset::Eth);
        req.pin = "9999".to_string();
        let err = fx.state().withdrawals().submit(USER, req).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(fx.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_faults() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        let service = fx.state().withdrawals();

        let mut bad_address = request("1", Asset::Eth);
        bad_address.to_address = "0x1234".to_string();
        assert!(matches!(
            service.submit(USER, bad_address).await,
            Err(ApiError::ValidationError(_))
        ));

        assert!(matches!(
            service.submit(USER, request("0", Asset::Eth)).await,
            Err(ApiError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_token_withdrawal_uses_gas_station() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Usdt, dec("100"), None);
        fx.chain
            .set_token(fx.usdt_contract(), fx.user_address(), U256::from(100_000_000u64));
        fx.chain.set_native(fx.gas_station_address(), U256::exp10(18));

        let receipt = fx
            .state()
            .withdrawals()
            .submit(USER, request("30", Asset::Usdt))
            .await
            .unwrap();
        assert_eq!(receipt.fee, Decimal::ZERO);
        assert_eq!(balance(&fx, Asset::Usdt).await, dec("70"));

        let sent = fx.chain.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            Sent::Token {
                from: fx.user_address(),
                contract: fx.usdt_contract(),
                to: DEST.parse().unwrap(),
                amount: U256::from(30_000_000u64),
            }
        );
    }

    #[tokio::test]
    async fn test_manual_asset_is_reserved_for_admin() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Btc, dec("1"), None);

        let mut req = request("0.25", Asset::Btc);
        req.to_address = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh".to_string();
        let receipt = fx.state().withdrawals().submit(USER, req).await.unwrap();

        assert!(receipt.tx_hash.is_none());
        assert_eq!(balance(&fx, Asset::Btc).await, dec("0.75"));
        assert!(fx.chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_review_then_approve() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("1"), None);
        let service = fx.state().withdrawals();

        let row = service
            .reserve(USER, Asset::Eth, dec("0.5"), Decimal::ZERO, DEST)
            .await
            .unwrap();
        service.update_status(row.id, TxStatus::Pending).await.unwrap();
        let done = service.update_status(row.id, TxStatus::Completed).await.unwrap();
        assert_eq!(done.record.status, TxStatus::Completed);
        assert!(done.refunded.is_none());
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.5"));

        // 종료 후에는 거절 불가
        assert!(matches!(
            service.update_status(row.id, TxStatus::Failed).await,
            Err(ApiError::AlreadyFinalized(_))
        ));
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.5"));
        assert!(matches!(
            service.update_status(row.id, TxStatus::Processing).await,
            Err(ApiError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_stuck_withdrawals_lists_unbroadcast_rows() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("1"), None);
        let service = fx.state().withdrawals();

        let row = service
            .reserve(USER, Asset::Eth, dec("0.1"), Decimal::ZERO, DEST)
            .await
            .unwrap();

        // cutoff을 미래로 두면 방금 만든 행도 포함된다
        let stuck = service.stuck_withdrawals(Duration::seconds(-60)).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, row.id);

        fx.store.attach_tx_hash(row.id, "0xabc").await.unwrap();
        assert!(service
            .stuck_withdrawals(Duration::seconds(-60))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_timeout_after_send_keeps_reservation() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("2"), None);
        fx.chain.set_native(fx.user_address(), U256::exp10(18) * 2);
        fx.chain.set_gas_price(Some(gwei(10)));
        fx.chain.timeout_after_send(true);

        let service = fx.state().withdrawals();
        let err = service.submit(USER, request("1.5", Asset::Eth)).await.unwrap_err();
        assert!(err.is_retryable());

        // 체인에는 나갔으므로 환불하지 않는다 (21000 * 10 gwei 수수료 포함)
        assert_eq!(fx.chain.sent().len(), 1);
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.49979"));

        let rows = fx.store.list_transactions(Some(USER), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TxStatus::Processing);
        assert!(rows[0].tx_hash().is_none());

        let stuck = service.stuck_withdrawals(Duration::seconds(-60)).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, rows[0].id);
    }

    #[tokio::test]
    async fn test_refuel_timeout_releases_token_reservation() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Usdt, dec("100"), None);
        fx.chain
            .set_token(fx.usdt_contract(), fx.user_address(), U256::from(100_000_000u64));
        fx.chain.set_native(fx.gas_station_address(), U256::exp10(18));
        fx.chain.timeout_after_send(true);

        let err = fx
            .state()
            .withdrawals()
            .submit(USER, request("30", Asset::Usdt))
            .await
            .unwrap_err();

        // 가스 충전 응답이 타임아웃이면 토큰 전송 전이므로 해제된다
        assert!(err.is_retryable());
        assert_eq!(balance(&fx, Asset::Usdt).await, dec("100"));
        assert!(fx
            .chain
            .sent()
            .iter()
            .all(|s| matches!(s, Sent::Native { .. })));
    }

    #[tokio::test]
    async fn test_parallel_rejects_refund_once() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("2"), None);

        let service = fx.state().withdrawals();
        let row = service
            .reserve(USER, Asset::Eth, dec("1.5"), dec("0.01"), DEST)
            .await
            .unwrap();

        let other = fx.state().withdrawals();
        let (a, b) = tokio::join!(service.reject(row.id), other.reject(row.id));

        let (ok, finalized): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(|r| r.is_ok());
        assert_eq!(ok.len(), 1);
        assert_eq!(finalized.len(), 1);
        assert!(matches!(finalized[0], Err(ApiError::AlreadyFinalized(_))));
        match &ok[0] {
            Ok(t) => assert_eq!(t.refunded, Some(dec("1.51"))),
            Err(e) => panic!("unexpected error: {}", e),
        }
        assert_eq!(balance(&fx, Asset::Eth).await, dec("2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_submits_cannot_overdraw() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("1"), None);
        fx.chain.set_native(fx.user_address(), U256::exp10(18) * 10);
        fx.chain.set_gas_price(Some(gwei(10)));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let state = fx.state();
                tokio::spawn(async move {
                    state.withdrawals().submit(USER, request("0.6", Asset::Eth)).await
                })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, ApiError::InsufficientFunds(_))),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(balance(&fx, Asset::Eth).await, dec("0.39979"));
    }
}
