//! Database Module
//!
//! PostgreSQL 구현 (`LedgerStore`).
//!
//! 잔고 변경은 모두 `SET col = col + $delta` 한 문장으로 처리하고,
//! 여러 행에 걸친 변경은 SQL 트랜잭션으로 묶는다.
//! 상태 전이는 `WHERE status = ANY($allowed)` 조건으로 한 번만 성공한다.
//!
//! 컬럼 이름은 `Asset`의 고정 매핑에서만 오므로 SQL에 직접 넣어도 안전하다.

mod models;
mod repository;

pub use models::*;
pub use repository::{LedgerStore, StoreResult};

#[cfg(test)]
pub use repository::mock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::types::{Asset, TxStatus, TxType};

const WALLET_COLUMNS: &str = r#"
    id, user_id, address, encrypted_private_key, readable_id,
    balance, usdt_balance, btc_balance, sol_balance, trx_balance,
    last_chain_balance, last_usdt_chain_balance,
    created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, user_id, tx_type, currency, amount, status,
    metadata, description, created_at, updated_at
"#;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10
    /// - min_connections: 1
    /// - acquire_timeout: 3초
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// 잔고 조건부 증감. 결과가 음수가 되면 아무것도 바꾸지 않고 None.
    async fn bump_balance(
        conn: &mut PgConnection,
        user_id: &str,
        asset: Asset,
        delta: Decimal,
    ) -> Result<Option<Decimal>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE wallets
            SET {col} = {col} + $1, updated_at = NOW()
            WHERE user_id = $2 AND {col} + $1 >= 0
            RETURNING {col}
            "#,
            col = asset.balance_column()
        );

        sqlx::query_scalar::<_, Decimal>(&sql)
            .bind(delta)
            .bind(user_id)
            .fetch_optional(conn)
            .await
    }

    async fn insert_record(
        conn: &mut PgConnection,
        record: &NewTransaction,
    ) -> Result<TransactionRecord, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO transactions (
                user_id, tx_type, currency, amount, status, metadata, description,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(&record.user_id)
            .bind(record.tx_type.as_str())
            .bind(record.currency.symbol())
            .bind(record.amount)
            .bind(record.status.as_str())
            .bind(&record.metadata)
            .bind(&record.description)
            .fetch_one(conn)
            .await
    }

    /// 증감 실패 원인 구분 (지갑 없음 vs 잔고 부족)
    async fn balance_failure(&self, user_id: &str, asset: Asset) -> ApiError {
        match self.wallet_by_user(user_id).await {
            Ok(Some(_)) => ApiError::InsufficientFunds(format!("{} balance too low", asset)),
            Ok(None) => ApiError::NotFound("Wallet".to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<WalletRecord>> {
        let sql = format!("SELECT {} FROM wallets WHERE user_id = $1", WALLET_COLUMNS);
        let wallet = sqlx::query_as::<_, WalletRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(wallet)
    }

    async fn wallet_by_address(&self, address: &str) -> StoreResult<Option<WalletRecord>> {
        let sql = format!(
            "SELECT {} FROM wallets WHERE LOWER(address) = LOWER($1)",
            WALLET_COLUMNS
        );
        let wallet = sqlx::query_as::<_, WalletRecord>(&sql)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        Ok(wallet)
    }

    async fn list_wallets(&self) -> StoreResult<Vec<WalletRecord>> {
        let sql = format!(
            "SELECT {} FROM wallets ORDER BY created_at DESC",
            WALLET_COLUMNS
        );
        let wallets = sqlx::query_as::<_, WalletRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(wallets)
    }

    async fn insert_wallet(&self, wallet: &NewWallet) -> StoreResult<WalletRecord> {
        let sql = format!(
            r#"
            INSERT INTO wallets (user_id, address, encrypted_private_key, readable_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );

        sqlx::query_as::<_, WalletRecord>(&sql)
            .bind(&wallet.user_id)
            .bind(&wallet.address)
            .bind(&wallet.encrypted_private_key)
            .bind(&wallet.readable_id)
            .fetch_optional(&self.pool)
            .await?
            // user_id 또는 readable_id 충돌
            .ok_or_else(|| ApiError::Conflict("wallet already exists".to_string()))
    }

    async fn replace_keys(
        &self,
        wallet: &NewWallet,
        baseline: &ChainBaseline,
    ) -> StoreResult<WalletRecord> {
        // 주소, 키, 워터마크는 항상 한 문장에서 함께 바뀐다
        let sql = format!(
            r#"
            INSERT INTO wallets (
                user_id, address, encrypted_private_key, readable_id,
                last_chain_balance, last_usdt_chain_balance
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id)
            DO UPDATE SET
                address = EXCLUDED.address,
                encrypted_private_key = EXCLUDED.encrypted_private_key,
                last_chain_balance = EXCLUDED.last_chain_balance,
                last_usdt_chain_balance = EXCLUDED.last_usdt_chain_balance,
                updated_at = NOW()
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );

        let row = sqlx::query_as::<_, WalletRecord>(&sql)
            .bind(&wallet.user_id)
            .bind(&wallet.address)
            .bind(&wallet.encrypted_private_key)
            .bind(&wallet.readable_id)
            .bind(baseline.eth)
            .bind(baseline.usdt)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn assign_readable_id(&self, wallet_id: Uuid, readable_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET readable_id = $2, updated_at = NOW()
            WHERE id = $1 AND (readable_id IS NULL OR TRIM(readable_id) = '')
            "#,
        )
        .bind(wallet_id)
        .bind(readable_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            // readable_id UNIQUE 위반 → 호출자가 새 id로 재시도
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_entry(&self, entry: &LedgerEntry) -> StoreResult<(Decimal, TransactionRecord)> {
        let mut tx = self.pool.begin().await?;

        let balance = match Self::bump_balance(&mut *tx, &entry.user_id, entry.asset, entry.delta).await? {
            Some(balance) => balance,
            None => {
                tx.rollback().await?;
                return Err(self.balance_failure(&entry.user_id, entry.asset).await);
            }
        };
        let row = Self::insert_record(&mut *tx, &entry.record).await?;

        tx.commit().await?;
        Ok((balance, row))
    }

    async fn credit_deposit(
        &self,
        user_id: &str,
        asset: Asset,
        expected_watermark: Decimal,
        live: Decimal,
        record: &NewTransaction,
    ) -> StoreResult<Option<TransactionRecord>> {
        let watermark = asset
            .watermark_column()
            .ok_or_else(|| ApiError::ValidationError(format!("{} has no watermark", asset)))?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE wallets
            SET {bal} = {bal} + $1, {wm} = $2, updated_at = NOW()
            WHERE user_id = $3 AND {wm} = $4
            "#,
            bal = asset.balance_column(),
            wm = watermark
        );
        let updated = sqlx::query(&sql)
            .bind(record.amount)
            .bind(live)
            .bind(user_id)
            .bind(expected_watermark)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = Self::insert_record(&mut *tx, record).await?;
        tx.commit().await?;

        Ok(Some(row))
    }

    async fn move_watermark(
        &self,
        user_id: &str,
        asset: Asset,
        expected: Decimal,
        live: Decimal,
    ) -> StoreResult<bool> {
        let watermark = asset
            .watermark_column()
            .ok_or_else(|| ApiError::ValidationError(format!("{} has no watermark", asset)))?;

        let sql = format!(
            "UPDATE wallets SET {wm} = $1, updated_at = NOW() WHERE user_id = $2 AND {wm} = $3",
            wm = watermark
        );
        let updated = sqlx::query(&sql)
            .bind(live)
            .bind(user_id)
            .bind(expected)
            .execute(&self.pool)
            .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn record_swap(
        &self,
        debit: &LedgerEntry,
        credit: &LedgerEntry,
    ) -> StoreResult<(TransactionRecord, TransactionRecord)> {
        let mut tx = self.pool.begin().await?;

        for leg in [debit, credit] {
            if Self::bump_balance(&mut *tx, &leg.user_id, leg.asset, leg.delta)
                .await?
                .is_none()
            {
                tx.rollback().await?;
                return Err(self.balance_failure(&leg.user_id, leg.asset).await);
            }
        }

        let debit_row = Self::insert_record(&mut *tx, &debit.record).await?;
        let credit_row = Self::insert_record(&mut *tx, &credit.record).await?;

        tx.commit().await?;
        Ok((debit_row, credit_row))
    }

    async fn transition(&self, id: i64, to: TxStatus) -> StoreResult<Transition> {
        let allowed: Vec<String> = to
            .allowed_sources()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        let claimed = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(&allowed)
            .fetch_optional(&mut *tx)
            .await?;

        let record = match claimed {
            Some(record) => record,
            None => {
                tx.rollback().await?;
                let current = self
                    .transaction(id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound("Transaction".to_string()))?;
                return Err(if current.status.is_terminal() {
                    ApiError::AlreadyFinalized(id.to_string())
                } else {
                    ApiError::Conflict(format!(
                        "cannot move transaction {} from {} to {}",
                        id,
                        current.status.as_str(),
                        to.as_str()
                    ))
                });
            }
        };

        let mut refunded = None;
        if to == TxStatus::Failed && record.tx_type.refunds_on_reject() {
            let amount = record.amount.abs();
            if Self::bump_balance(&mut *tx, &record.user_id, record.currency, amount)
                .await?
                .is_none()
            {
                tx.rollback().await?;
                return Err(ApiError::NotFound("Wallet".to_string()));
            }
            refunded = Some(amount);
        }

        tx.commit().await?;
        Ok(Transition { record, refunded })
    }

    async fn attach_tx_hash(&self, id: i64, tx_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET metadata = jsonb_set(COALESCE(metadata, '{}'::jsonb), '{tx_hash}', to_jsonb($2::text)),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transaction(&self, id: i64) -> StoreResult<Option<TransactionRecord>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn list_transactions(
        &self,
        user_id: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE ($1::text IS NULL OR user_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        );
        let records = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn stuck_withdrawals(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<TransactionRecord>> {
        let on_chain: Vec<String> = Asset::ALL
            .iter()
            .filter(|a| a.is_on_chain())
            .map(|a| a.symbol().to_string())
            .collect();

        let sql = format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE tx_type = $1
              AND status = $2
              AND currency = ANY($3)
              AND metadata->>'tx_hash' IS NULL
              AND created_at < $4
            ORDER BY created_at ASC
            "#,
            TRANSACTION_COLUMNS
        );
        let records = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(TxType::Withdrawal.as_str())
            .bind(TxStatus::Processing.as_str())
            .bind(&on_chain)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn pin_hash(&self, user_id: &str) -> StoreResult<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT pin_hash FROM user_security WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(hash)
    }

    async fn set_pin_hash(&self, user_id: &str, pin_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_security (user_id, pin_hash, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET pin_hash = EXCLUDED.pin_hash, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(pin_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Health check
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
