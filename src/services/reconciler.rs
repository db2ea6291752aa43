//! Deposit Reconciler
//!
//! 체인 잔고와 워터마크(마지막으로 관측한 체인 잔고)의 차이로 입금을 감지한다.
//!
//! - 증가분이 먼지 기준을 넘으면 원장에 입금으로 반영
//! - 감소분은 워터마크만 내린다 (스윕으로 빠져나간 코인은 사용자 잔고와 무관)
//! - 먼지 기준 이내의 변화는 무시
//!
//! 반영은 워터마크 compare-and-set과 함께 일어나므로 같은 증가분이 두 번
//! 입금되는 일은 없다. 지갑 주소 잠금을 잡고 실행하므로 같은 주소의 스윕,
//! 출금, 가스 충전 도중의 잔고를 입금으로 오인하지 않는다.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{LedgerStore, NewTransaction, WalletRecord};
use crate::error::ApiError;
use crate::services::chain::{parse_address, ChainClient};
use crate::services::locks::AddressLocks;
use crate::services::units::from_base_units;
use crate::types::{Asset, AssetClass, TxStatus, TxType};

/// 0.000001 단위 이하 변화는 무시
pub const DUST_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub asset: Asset,
    pub chain_balance: Decimal,
    pub watermark: Decimal,
    pub credited: Decimal,
}

pub struct DepositReconciler {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    locks: Arc<AddressLocks>,
    config: Arc<Config>,
}

impl DepositReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        locks: Arc<AddressLocks>,
        config: Arc<Config>,
    ) -> Self {
        Self { store, chain, locks, config }
    }

    async fn load_wallet(&self, user_id: &str) -> Result<WalletRecord, ApiError> {
        self.store
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Wallet".to_string()))
    }

    /// 지갑 주소의 현재 체인 잔고 (원장 단위)
    pub async fn live_balance(&self, asset: Asset, address: &str) -> Result<Decimal, ApiError> {
        let owner = parse_address(address)?;

        let raw = match asset.class() {
            AssetClass::Native => self.chain.native_balance(owner).await?,
            AssetClass::Token => {
                let contract = self.config.token_contract(asset)?;
                self.chain.token_balance(contract, owner).await?
            }
            AssetClass::Manual => return Err(not_reconcilable(asset)),
        };

        from_base_units(raw, asset.decimals())
    }

    pub async fn reconcile(&self, user_id: &str, asset: Asset) -> Result<ReconcileOutcome, ApiError> {
        if !asset.is_on_chain() {
            return Err(not_reconcilable(asset));
        }

        let address = self.load_wallet(user_id).await?.address;
        let _guard = self.locks.acquire(&address).await;

        // 잠금을 기다리는 동안 바뀐 워터마크를 읽기 위해 다시 조회
        let wallet = self.load_wallet(user_id).await?;
        if !wallet.address.eq_ignore_ascii_case(&address) {
            return Err(ApiError::Conflict(format!(
                "Wallet for {} was re-keyed during sync, retry",
                user_id
            )));
        }

        // 체인 조회가 실패하면 아무것도 쓰지 않고 끝난다
        let live = self.live_balance(asset, &wallet.address).await?;
        let watermark = wallet.watermark_of(asset).unwrap_or_default();
        let diff = live - watermark;

        let unchanged = ReconcileOutcome {
            asset,
            chain_balance: live,
            watermark,
            credited: Decimal::ZERO,
        };

        if diff.abs() <= DUST_THRESHOLD {
            debug!(user_id, %asset, %diff, "chain balance unchanged");
            return Ok(unchanged);
        }

        if diff.is_sign_negative() {
            // 스윕 등으로 줄어든 경우: 원장은 건드리지 않는다
            let moved = self
                .store
                .move_watermark(user_id, asset, watermark, live)
                .await?;
            if moved {
                info!(user_id, %asset, %watermark, %live, "watermark lowered without ledger change");
                return Ok(ReconcileOutcome { watermark: live, ..unchanged });
            }
            warn!(user_id, %asset, "watermark changed concurrently, skipping");
            return Ok(unchanged);
        }

        let record = NewTransaction {
            user_id: user_id.to_string(),
            tx_type: TxType::Deposit,
            currency: asset,
            amount: diff,
            status: TxStatus::Completed,
            metadata: json!({
                "source": "chain_sync",
                "network": asset.network(),
                "address": wallet.address,
                "chain_balance": live.to_string(),
            }),
            description: Some(format!("Deposit detected on {}", asset.network())),
        };

        match self
            .store
            .credit_deposit(user_id, asset, watermark, live, &record)
            .await?
        {
            Some(row) => {
                info!(user_id, %asset, credited = %diff, tx_id = row.id, "deposit credited");
                Ok(ReconcileOutcome {
                    watermark: live,
                    credited: diff,
                    ..unchanged
                })
            }
            None => {
                // 다른 요청이 먼저 반영함
                warn!(user_id, %asset, "concurrent reconcile won the watermark, nothing credited");
                Ok(unchanged)
            }
        }
    }
}

fn not_reconcilable(asset: Asset) -> ApiError {
    ApiError::ValidationError(format!("{} is settled manually and cannot be synced", asset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chain::checksum;
    use crate::services::testing::{dec, Fixture, USER};
    use ethers::types::U256;

    fn eth(value: &str) -> U256 {
        crate::services::units::to_base_units(dec(value), 18).unwrap()
    }

    #[tokio::test]
    async fn test_credits_increase_once() {
        let fx = Fixture::new();
        let wallet = fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("1"), Some(dec("5")));
        fx.chain.set_native(fx.user_address(), eth("7"));

        let reconciler = fx.state().reconciler();
        let first = reconciler.reconcile(USER, Asset::Eth).await.unwrap();
        assert_eq!(first.credited, dec("2"));
        assert_eq!(first.watermark, dec("7"));

        let after = fx.store.wallet_by_user(USER).await.unwrap().unwrap();
        assert_eq!(after.balance, dec("3"));
        assert_eq!(after.last_chain_balance, dec("7"));

        let txs = fx.store.list_transactions(Some(USER), 10).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].tx_type, TxType::Deposit);
        assert_eq!(txs[0].amount, dec("2"));
        assert_eq!(txs[0].status, TxStatus::Completed);
        assert_eq!(txs[0].metadata["address"], wallet.address.as_str());

        // 체인 변화 없이 다시 실행하면 아무것도 반영하지 않음
        let second = reconciler.reconcile(USER, Asset::Eth).await.unwrap();
        assert_eq!(second.credited, Decimal::ZERO);
        assert_eq!(fx.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_dust_is_ignored() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("10"), Some(dec("10")));
        fx.chain.set_native(fx.user_address(), eth("10.0000005"));

        let outcome = fx.state().reconciler().reconcile(USER, Asset::Eth).await.unwrap();
        assert_eq!(outcome.credited, Decimal::ZERO);
        assert_eq!(fx.store.transaction_count(), 0);

        let after = fx.store.wallet_by_user(USER).await.unwrap().unwrap();
        assert_eq!(after.balance, dec("10"));
    }

    #[tokio::test]
    async fn test_decrease_moves_watermark_only() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("10"), Some(dec("10")));
        fx.chain.set_native(fx.user_address(), eth("6"));

        let outcome = fx.state().reconciler().reconcile(USER, Asset::Eth).await.unwrap();
        assert_eq!(outcome.credited, Decimal::ZERO);
        assert_eq!(outcome.watermark, dec("6"));

        let after = fx.store.wallet_by_user(USER).await.unwrap().unwrap();
        assert_eq!(after.balance, dec("10"));
        assert_eq!(after.last_chain_balance, dec("6"));
        assert_eq!(fx.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_token_uses_own_watermark() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("0"), Some(dec("5")));
        fx.chain
            .set_token(fx.usdt_contract(), fx.user_address(), U256::from(25_000_000u64));

        let outcome = fx.state().reconciler().reconcile(USER, Asset::Usdt).await.unwrap();
        assert_eq!(outcome.credited, dec("25"));

        let after = fx.store.wallet_by_user(USER).await.unwrap().unwrap();
        assert_eq!(after.usdt_balance, dec("25"));
        assert_eq!(after.last_usdt_chain_balance, dec("25"));
        // ETH 워터마크는 그대로
        assert_eq!(after.last_chain_balance, dec("5"));
    }

    #[tokio::test]
    async fn test_rpc_failure_writes_nothing() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.chain.fail_reads(true);

        let err = fx.state().reconciler().reconcile(USER, Asset::Eth).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fx.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_assets_are_rejected() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        let err = fx.state().reconciler().reconcile(USER, Asset::Btc).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let fx = Fixture::new();
        let err = fx.state().reconciler().reconcile("ghost", Asset::Eth).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_syncs_credit_once() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("0"), Some(dec("1")));
        fx.chain.set_native(fx.user_address(), eth("4"));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = fx.state();
                tokio::spawn(async move { state.reconciler().reconcile(USER, Asset::Eth).await })
            })
            .collect();

        let mut total = Decimal::ZERO;
        for task in tasks {
            total += task.await.unwrap().unwrap().credited;
        }
        assert_eq!(total, dec("3"));

        let after = fx.store.wallet_by_user(USER).await.unwrap().unwrap();
        assert_eq!(after.balance, dec("3"));
        assert_eq!(after.last_chain_balance, dec("4"));
        assert_eq!(fx.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_store_credit_is_compare_and_set() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("0"), Some(dec("1")));

        let deposit = NewTransaction {
            user_id: USER.to_string(),
            tx_type: TxType::Deposit,
            currency: Asset::Eth,
            amount: dec("2"),
            status: TxStatus::Completed,
            metadata: json!({ "source": "chain_sync" }),
            description: None,
        };

        // 같은 워터마크를 본 두 반영 중 하나만 성공
        let (a, b) = tokio::join!(
            fx.store.credit_deposit(USER, Asset::Eth, dec("1"), dec("3"), &deposit),
            fx.store.credit_deposit(USER, Asset::Eth, dec("1"), dec("3"), &deposit),
        );
        let applied = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();
        assert_eq!(applied, 1);

        let after = fx.store.wallet_by_user(USER).await.unwrap().unwrap();
        assert_eq!(after.balance, dec("2"));
        assert_eq!(fx.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_waits_for_address_lock() {
        let fx = Fixture::new();
        fx.with_wallet(USER).await;
        fx.store.seed_balance(USER, Asset::Eth, dec("0"), Some(dec("0")));
        fx.chain.set_native(fx.user_address(), eth("1"));

        let state = fx.state();
        let held = state.locks.acquire(&checksum(fx.user_address())).await;
        let pending = tokio::spawn({
            let state = state.clone();
            async move { state.reconciler().reconcile(USER, Asset::Eth).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        assert_eq!(fx.store.transaction_count(), 0);

        drop(held);
        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome.credited, dec("1"));
    }
}
