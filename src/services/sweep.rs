//! Sweep Orchestrator + Gas Station
//!
//! 사용자 입금 주소의 실제 코인을 마스터 볼트로 옮긴다. 수탁 작업일 뿐
//! 사용자 원장 잔고는 절대 건드리지 않는다.
//!
//! # Flow
//!
//! ```text
//! decrypt key ─► native? ─► balance - 21000*gas ─► transfer to master
//!             └► token?  ─► balanceOf ─► gas station refuel (if short) ─► transfer(master, all)
//! ```

use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::LedgerStore;
use crate::error::ApiError;
use crate::services::chain::{
    address_of, checksum, effective_gas_price, parse_address, ChainClient,
};
use crate::services::locks::AddressLocks;
use crate::services::secret_codec::SecretCodec;
use crate::services::units::from_base_units;
use crate::types::{Asset, AssetClass};

/// 네이티브 송금 gas
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// ERC-20 `transfer` gas 고정 추정치
pub const TOKEN_TRANSFER_GAS: u64 = 65_000;

/// 가스 충전 여유분 (0.00001 ETH)
pub const REFUEL_BUFFER_WEI: u64 = 10_000_000_000_000;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    #[serde(rename_all = "camelCase")]
    Swept {
        tx_hash: String,
        asset: Asset,
        amount: Decimal,
        refuel_tx: Option<String>,
    },
    NothingToSweep { reason: String },
}

// ============ Gas Station ============

/// 충전분을 워터마크에 반영할 때 compare-and-set 재시도 횟수
const WATERMARK_RETRIES: usize = 3;

/// 가스 지갑에서 사용자 주소로 부족한 가스를 보낸다.
///
/// 보낸 가스는 입금이 아니므로 받은 만큼 ETH 워터마크를 올려 둔다.
/// 호출자는 `target` 주소 잠금을 잡고 있어야 한다.
pub struct GasStation {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    locks: Arc<AddressLocks>,
    config: Arc<Config>,
}

impl GasStation {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        locks: Arc<AddressLocks>,
        config: Arc<Config>,
    ) -> Self {
        Self { store, chain, locks, config }
    }

    /// `target`의 네이티브 잔고가 `required` 이상이 되도록 보장.
    /// 충전했다면 충전 트랜잭션 해시를 돌려준다.
    ///
    /// 충전 후 1블록 확인을 기다리고 잔고를 다시 읽는다. 그래도 부족하면
    /// `InsufficientFunds`로 중단한다.
    pub async fn ensure_gas(
        &self,
        user_id: &str,
        target: Address,
        required: U256,
    ) -> Result<Option<H256>, ApiError> {
        let balance = self.chain.native_balance(target).await?;
        if balance >= required {
            return Ok(None);
        }

        let station_key = self.config.gas_station_key()?;
        let station = address_of(station_key)?;
        if station == target {
            return Err(ApiError::ValidationError(
                "gas station cannot refuel its own address".to_string(),
            ));
        }

        let shortfall = required - balance + U256::from(REFUEL_BUFFER_WEI);
        let gas_price = effective_gas_price(self.chain.as_ref()).await?;

        // 가스 지갑 nonce: 충전은 확인까지 한 번에 하나
        let refuel = {
            let _station = self.locks.acquire(&checksum(station)).await;
            let hash = self
                .chain
                .send_native(
                    station_key,
                    target,
                    shortfall,
                    U256::from(NATIVE_TRANSFER_GAS),
                    gas_price,
                )
                .await?;
            info!(target = %checksum(target), shortfall = %shortfall, tx = ?hash, "gas station refuel sent");

            if let Err(e) = self.chain.wait_for_confirmation(hash, 1).await {
                // 나중에 도착하면 입금으로 보일 수 있음: 수동 확인 필요
                error!(
                    user_id,
                    tx = ?hash,
                    error = %e,
                    alert = "refuel_unabsorbed",
                    "gas refuel sent but not confirmed, watermark not adjusted"
                );
                return Err(e.into());
            }
            hash
        };

        let after = self.chain.native_balance(target).await?;

        // 충전으로 늘어난 몫은 사용자 입금이 아님
        let arrived = after.saturating_sub(balance).min(shortfall);
        if !arrived.is_zero() {
            let amount = from_base_units(arrived, Asset::Eth.decimals())?;
            self.absorb_refuel(user_id, amount).await?;
        }

        if after < required {
            warn!(target = %checksum(target), have = %after, need = %required, "refuel did not cover gas");
            return Err(ApiError::InsufficientFunds(
                "gas refuel did not reach the required balance".to_string(),
            ));
        }

        Ok(Some(refuel))
    }

    pub async fn station_address(&self) -> Result<Address, ApiError> {
        Ok(address_of(self.config.gas_station_key()?)?)
    }

    /// ETH 워터마크를 충전량만큼 올린다 (원장 잔고는 그대로)
    async fn absorb_refuel(&self, user_id: &str, amount: Decimal) -> Result<(), ApiError> {
        for _ in 0..WATERMARK_RETRIES {
            let wallet = self
                .store
                .wallet_by_user(user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Wallet".to_string()))?;
            let current = wallet.last_chain_balance;

            if self
                .store
                .move_watermark(user_id, Asset::Eth, current, current + amount)
                .await?
            {
                debug!(user_id, %amount, watermark = %(current + amount), "refuel absorbed into watermark");
                return Ok(());
            }
        }

        error!(user_id, %amount, alert = "refuel_unabsorbed", "could not move watermark past gas refuel");
        Err(ApiError::Conflict(
            "watermark changed during gas refuel, retry".to_string(),
        ))
    }
}

// ============ Sweep ============

pub struct SweepOrchestrator {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    codec: Arc<SecretCodec>,
    locks: Arc<AddressLocks>,
    config: Arc<Config>,
    gas_station: GasStation,
}

impl SweepOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        codec: Arc<SecretCodec>,
        locks: Arc<AddressLocks>,
        config: Arc<Config>,
    ) -> Self {
        let gas_station =
            GasStation::new(store.clone(), chain.clone(), locks.clone(), config.clone());
        Self {
            store,
            chain,
            codec,
            locks,
            config,
            gas_station,
        }
    }

    pub async fn sweep(&self, user_id: &str, asset: Asset) -> Result<SweepOutcome, ApiError> {
        if asset.class() == AssetClass::Manual {
            return Err(ApiError::ValidationError(format!(
                "{} is settled manually and cannot be swept",
                asset
            )));
        }

        let master = self.config.master_address()?;

        let wallet = self
            .store
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Wallet".to_string()))?;

        let key = self.codec.reveal(&wallet.encrypted_private_key).map_err(|e| {
            error!(user_id, "sweep aborted: wallet key failed to decrypt");
            e
        })?;

        let owner = parse_address(&wallet.address)?;
        if address_of(&key)? != owner {
            error!(user_id, address = %wallet.address, "sweep aborted: stored key does not match address");
            return Err(ApiError::SecurityFault(
                "wallet key does not match wallet address".to_string(),
            ));
        }

        let _guard = self.locks.acquire(&wallet.address).await;

        let outcome = match asset.class() {
            AssetClass::Native => self.sweep_native(&key, owner, master).await?,
            _ => self.sweep_token(user_id, &key, asset, owner, master).await?,
        };

        if let SweepOutcome::Swept { tx_hash, amount, .. } = &outcome {
            info!(user_id, %asset, %amount, tx_hash = %tx_hash, "sweep broadcast");
        }
        Ok(outcome)
    }

    async fn sweep_native(&self, key: &str, owner: Address, master: Address) -> Result<SweepOutcome, ApiError> {
        let balance = self.chain.native_balance(owner).await?;
        let gas_price = effective_gas_price(self.chain.as_ref()).await?;
        let gas_limit = U256::from(NATIVE_TRANSFER_GAS);
        let cost = gas_limit * gas_price;

        if balance <= cost {
            return Ok(SweepOutcome::NothingToSweep {
                reason: "dust, nothing to sweep".to_string(),
            });
        }

        let value = balance - cost;
        let hash = self
            .chain
            .send_native(key, master, value, gas_limit, gas_price)
            .await?;

        Ok(SweepOutcome::Swept {
            tx_hash: format!("{:?}", hash),
            asset: Asset::Eth,
            amount: from_base_units(value, Asset::Eth.decimals())?,
            refuel_tx: None,
        })
    }

    async fn sweep_token(
        &self,
        user_id: &str,
        key: &str,
        asset: Asset,
        owner: Address,
        master: Address,
    ) -> Result<SweepOutcome, ApiError> {
        let contract = self.config.token_contract(asset)?;

        let held = self.chain.token_balance(contract, owner).await?;
        if held.is_zero() {
            return Ok(SweepOutcome::NothingToSweep {
                reason: format!("no {} to sweep", asset),
            });
        }

        let gas_price = effective_gas_price(self.chain.as_ref()).await?;
        let required = U256::from(TOKEN_TRANSFER_GAS) * gas_price;
        let refuel = self.gas_station.ensure_gas(user_id, owner, required).await?;

        let hash = self.chain.send_token(key, contract, master, held).await?;

        Ok(SweepOutcome::Swept {
            tx_hash: format!("{:?}", hash),
            asset,
            amount: from_base_units(held, asset.decimals())?,
            refuel_tx: refuel.map(|h| format!("{:?}", h)),
        })
    }
}
