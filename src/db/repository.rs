use alloy::primitives::Address;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::processor::store::{HolderKind, HolderRecord, HolderStore};

/// Postgres-backed holder store. One `holders` table keyed by
/// (kind, address); each kind is a logically separate keyspace.
#[derive(Clone)]
pub struct PgHolderStore {
    pool: PgPool,
}

impl PgHolderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HolderStore for PgHolderStore {
    async fn get(
        &self,
        kind: HolderKind,
        address: Address,
    ) -> eyre::Result<Option<HolderRecord>> {
        let row: Option<(BigDecimal, Option<BigDecimal>)> = sqlx::query_as(
            "SELECT balance, usd_value FROM holders WHERE kind = $1 AND address = $2",
        )
        .bind(kind.as_str())
        .bind(address.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(balance, usd_value)| HolderRecord {
            kind,
            address,
            balance,
            usd_value,
        }))
    }

    async fn upsert(&self, record: HolderRecord) -> eyre::Result<()> {
        sqlx::query(
            "INSERT INTO holders (kind, address, balance, usd_value, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (kind, address) DO UPDATE
             SET balance = $3, usd_value = $4, updated_at = NOW()",
        )
        .bind(record.kind.as_str())
        .bind(record.address.as_slice())
        .bind(&record.balance)
        .bind(&record.usd_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, kind: HolderKind) -> eyre::Result<Vec<HolderRecord>> {
        let rows: Vec<(Vec<u8>, BigDecimal, Option<BigDecimal>)> = sqlx::query_as(
            "SELECT address, balance, usd_value FROM holders WHERE kind = $1 ORDER BY address",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(address, balance, usd_value)| {
                if address.len() != 20 {
                    return Err(eyre::eyre!(
                        "Corrupt address in holders table: {} bytes",
                        address.len()
                    ));
                }
                Ok(HolderRecord {
                    kind,
                    address: Address::from_slice(&address),
                    balance,
                    usd_value,
                })
            })
            .collect()
    }
}

/// Get the last indexed block number. Returns None if never indexed.
pub async fn get_last_indexed_block(pool: &PgPool, chain_id: i64) -> eyre::Result<Option<u64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_indexed_block FROM indexer_state WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(b,)| b as u64))
}

/// Upsert the indexer checkpoint.
pub async fn upsert_indexer_state(
    pool: &PgPool,
    chain_id: i64,
    block_number: i64,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO indexer_state (chain_id, last_indexed_block, updated_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (chain_id) DO UPDATE
         SET last_indexed_block = $2, updated_at = NOW()",
    )
    .bind(chain_id)
    .bind(block_number)
    .execute(pool)
    .await?;

    Ok(())
}
