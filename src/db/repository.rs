//! Ledger Store Interface
//!
//! 원장 저장소 추상화. PostgreSQL 구현은 `db/mod.rs`의 `Database`,
//! 테스트용 구현은 아래 `mock::MemoryLedger`.
//!
//! # Atomicity contract
//!
//! - 잔고 변경은 단일 원자적 증감이며 결과가 음수가 되면 거절된다.
//! - 잔고 변경과 그에 대응하는 트랜잭션 행은 함께 적용되거나 둘 다 적용되지 않는다.
//! - 워터마크 갱신은 compare-and-set (기대값이 다르면 아무것도 바꾸지 않음).
//! - 상태 전이는 현재 상태가 허용된 출발 상태일 때만 적용되며,
//!   거절 환불은 같은 단위 안에서 일어난다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::{
    ChainBaseline, LedgerEntry, NewTransaction, NewWallet, TransactionRecord, Transition,
    WalletRecord,
};
use crate::error::ApiError;
use crate::types::{Asset, TxStatus};

pub type StoreResult<T> = Result<T, ApiError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ============ Wallets ============

    async fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<WalletRecord>>;

    async fn wallet_by_address(&self, address: &str) -> StoreResult<Option<WalletRecord>>;

    /// 최신순
    async fn list_wallets(&self) -> StoreResult<Vec<WalletRecord>>;

    /// 이미 지갑이 있으면 `Conflict`
    async fn insert_wallet(&self, wallet: &NewWallet) -> StoreResult<WalletRecord>;

    /// 주소와 키를 함께 교체 (없으면 생성). 잔고와 readable id는 유지하고,
    /// 워터마크는 같은 쓰기에서 `baseline`으로 바꾼다.
    async fn replace_keys(
        &self,
        wallet: &NewWallet,
        baseline: &ChainBaseline,
    ) -> StoreResult<WalletRecord>;

    /// readable id가 비어 있을 때만 설정. 이미 있거나 다른 지갑이 쓰는 id면 false.
    async fn assign_readable_id(&self, wallet_id: Uuid, readable_id: &str) -> StoreResult<bool>;

    // ============ Ledger ============

    /// 잔고 증감 + 트랜잭션 기록. 잔고가 음수가 되면 `InsufficientFunds`.
    async fn apply_entry(&self, entry: &LedgerEntry) -> StoreResult<(Decimal, TransactionRecord)>;

    /// 입금 반영: 워터마크가 `expected_watermark`일 때만
    /// 잔고 += delta, 워터마크 = live, 입금 기록 추가. 경쟁에서 지면 None.
    async fn credit_deposit(
        &self,
        user_id: &str,
        asset: Asset,
        expected_watermark: Decimal,
        live: Decimal,
        record: &NewTransaction,
    ) -> StoreResult<Option<TransactionRecord>>;

    /// 워터마크 compare-and-set
    async fn move_watermark(
        &self,
        user_id: &str,
        asset: Asset,
        expected: Decimal,
        live: Decimal,
    ) -> StoreResult<bool>;

    /// 스왑 양쪽 다리를 한 번에 기록
    async fn record_swap(
        &self,
        debit: &LedgerEntry,
        credit: &LedgerEntry,
    ) -> StoreResult<(TransactionRecord, TransactionRecord)>;

    // ============ Transactions ============

    /// 상태 전이. 종료 상태면 `AlreadyFinalized`, 없으면 `NotFound`.
    /// `Failed`로 가면서 유형이 환불 대상이면 `abs(amount)`를 돌려준다.
    async fn transition(&self, id: i64, to: TxStatus) -> StoreResult<Transition>;

    async fn attach_tx_hash(&self, id: i64, tx_hash: &str) -> StoreResult<()>;

    async fn transaction(&self, id: i64) -> StoreResult<Option<TransactionRecord>>;

    /// 최신순. user_id가 없으면 전체.
    async fn list_transactions(
        &self,
        user_id: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<TransactionRecord>>;

    /// `cutoff` 이전에 만들어졌고 tx_hash 없이 processing에 머문 온체인 출금
    async fn stuck_withdrawals(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<TransactionRecord>>;

    // ============ Security ============

    async fn pin_hash(&self, user_id: &str) -> StoreResult<Option<String>>;

    async fn set_pin_hash(&self, user_id: &str, pin_hash: &str) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
}

// 테스트용 Mock 구현:
