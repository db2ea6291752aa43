//! Admin Utilities
//!
//! 관리자 화면용 조회와 일괄 작업. 원장을 바꾸는 것은 `reconcile_all`과
//! readable id 복구뿐이다.

use std::sync::Arc;

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{LedgerStore, TransactionRecord, WalletRecord};
use crate::error::ApiError;
use crate::services::chain::{address_of, checksum, parse_address, ChainClient};
use crate::services::locks::AddressLocks;
use crate::services::reconciler::{DepositReconciler, ReconcileOutcome};
use crate::services::secret_codec::SecretCodec;
use crate::services::units::from_base_units;
use crate::services::wallet::READABLE_ID_ATTEMPTS;
use crate::types::{Asset, ReadableId};

/// 가스 지갑이 이 값(ETH) 이하면 critical
pub const GAS_TANK_CRITICAL: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Match,
    Mismatch,
    DecryptFailed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityEntry {
    pub user_id: String,
    pub readable_id: Option<String>,
    pub stored_address: String,
    pub derived_address: Option<String>,
    pub status: IntegrityStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct GasTank {
    pub address: String,
    pub balance: Decimal,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterVault {
    pub address: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    pub block_number: u64,
    pub gas_tank: GasTank,
    pub master_vault: MasterVault,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReconcile {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub asset: Asset,
    pub wallets: usize,
    pub failures: usize,
    pub total_credited: Decimal,
    pub results: Vec<UserReconcile>,
}

pub struct AdminService {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    codec: Arc<SecretCodec>,
    config: Arc<Config>,
    reconciler: DepositReconciler,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        codec: Arc<SecretCodec>,
        locks: Arc<AddressLocks>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            reconciler: DepositReconciler::new(store.clone(), chain.clone(), locks, config.clone()),
            store,
            chain,
            codec,
            config,
        }
    }

    /// 전체 지갑. readable id가 없는 지갑은 읽는 김에 새로 발급한다.
    pub async fn list_users_healing(&self) -> Result<Vec<WalletRecord>, ApiError> {
        let mut wallets = self.store.list_wallets().await?;

        for wallet in wallets.iter_mut() {
            let missing = wallet
                .readable_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty());
            if missing {
                wallet.readable_id = Some(self.heal_readable_id(wallet).await?);
            }
        }

        Ok(wallets)
    }

    async fn heal_readable_id(&self, wallet: &WalletRecord) -> Result<String, ApiError> {
        for _ in 0..READABLE_ID_ATTEMPTS {
            let candidate = ReadableId::generate();
            if self
                .store
                .assign_readable_id(wallet.id, candidate.as_str())
                .await?
            {
                info!(user_id = %wallet.user_id, readable_id = candidate.as_str(), "readable id assigned");
                return Ok(candidate.as_str().to_string());
            }

            // 다른 요청이 먼저 채웠을 수 있다
            if let Some(id) = self
                .store
                .wallet_by_user(&wallet.user_id)
                .await?
                .and_then(|w| w.readable_id)
                .filter(|id| !id.trim().is_empty())
            {
                return Ok(id);
            }
        }

        Err(ApiError::Conflict("could not allocate a unique readable id".to_string()))
    }

    pub async fn transactions(&self, limit: i64) -> Result<Vec<TransactionRecord>, ApiError> {
        self.store.list_transactions(None, limit.clamp(1, 1000)).await
    }

    /// 저장된 키에서 주소를 다시 계산해 저장된 주소와 비교
    pub async fn integrity_report(&self) -> Result<Vec<IntegrityEntry>, ApiError> {
        let wallets = self.store.list_wallets().await?;
        let mut report = Vec::with_capacity(wallets.len());

        for wallet in wallets {
            let derived = self
                .codec
                .decrypt(&wallet.encrypted_private_key)
                .and_then(|key| address_of(&key).ok());

            let status = match (derived, parse_address(&wallet.address)) {
                (None, _) => IntegrityStatus::DecryptFailed,
                (Some(d), Ok(stored)) if d == stored => IntegrityStatus::Match,
                _ => IntegrityStatus::Mismatch,
            };

            if status != IntegrityStatus::Match {
                error!(user_id = %wallet.user_id, status = ?status, "wallet key integrity check failed");
            }

            report.push(IntegrityEntry {
                user_id: wallet.user_id,
                readable_id: wallet.readable_id,
                stored_address: wallet.address,
                derived_address: derived.map(checksum),
                status,
            });
        }

        Ok(report)
    }

    pub async fn platform_status(&self) -> Result<PlatformStatus, ApiError> {
        let station = address_of(self.config.gas_station_key()?)?;
        let master = self.config.master_address()?;

        let block_number = self.chain.block_number().await?;
        let gas_balance = eth(self.chain.native_balance(station).await?)?;
        let master_balance = eth(self.chain.native_balance(master).await?)?;

        let status = if gas_balance > GAS_TANK_CRITICAL {
            "healthy"
        } else {
            warn!(balance = %gas_balance, "gas tank is running low");
            "critical"
        };

        Ok(PlatformStatus {
            block_number,
            gas_tank: GasTank {
                address: checksum(station),
                balance: gas_balance,
                status,
            },
            master_vault: MasterVault {
                address: checksum(master),
                balance: master_balance,
            },
        })
    }

    /// 모든 지갑에 대해 입금 동기화. 한 사용자의 실패가 나머지를 막지 않는다.
    pub async fn reconcile_all(&self, asset: Asset) -> Result<ReconcileSummary, ApiError> {
        if !asset.is_on_chain() {
            return Err(ApiError::ValidationError(format!(
                "{} is settled manually and cannot be synced",
                asset
            )));
        }

        let wallets = self.store.list_wallets().await?;
        let mut results = Vec::with_capacity(wallets.len());
        let mut total_credited = Decimal::ZERO;
        let mut failures = 0;

        for wallet in &wallets {
            match self.reconciler.reconcile(&wallet.user_id, asset).await {
                Ok(outcome) => {
                    total_credited += outcome.credited;
                    results.push(UserReconcile {
                        user_id: wallet.user_id.clone(),
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(e) => {
                    failures += 1;
                    warn!(user_id = %wallet.user_id, %asset, error = %e, "reconcile failed");
                    results.push(UserReconcile {
                        user_id: wallet.user_id.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(%asset, wallets = wallets.len(), failures, credited = %total_credited, "bulk reconcile finished");

        Ok(ReconcileSummary {
            asset,
            wallets: wallets.len(),
            failures,
            total_credited,
            results,
        })
    }
}

fn eth(wei: U256) -> Result<Decimal, ApiError> {
    from_base_units(wei, Asset::Eth.decimals())
}
