use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

/// Which holder table a record belongs to. One kind per tracked contract;
/// the keyspaces are logically separate even though they share a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKind {
    /// Direct LP token holders (pool transfers).
    Pool,
    /// StakeDao gauge stakers.
    StakeDao,
    /// Convex booster depositors.
    Convex,
    /// Curve gauge stakers.
    Curve,
}

impl HolderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderKind::Pool => "pool",
            HolderKind::StakeDao => "stakedao",
            HolderKind::Convex => "convex",
            HolderKind::Curve => "curve",
        }
    }
}

/// One holder's balance in a tracked contract. Last-write-wins: every
/// reconciliation overwrites the prior row, no history is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct HolderRecord {
    pub kind: HolderKind,
    pub address: Address,
    pub balance: BigDecimal,
    /// Implied USD share of pooled reserves, tracked only for the Pool kind.
    pub usd_value: Option<BigDecimal>,
}

/// Keyed persistence for holder records.
#[async_trait]
pub trait HolderStore: Send + Sync {
    async fn get(&self, kind: HolderKind, address: Address)
        -> eyre::Result<Option<HolderRecord>>;
    /// Insert-or-replace by (kind, address).
    async fn upsert(&self, record: HolderRecord) -> eyre::Result<()>;
    async fn list(&self, kind: HolderKind) -> eyre::Result<Vec<HolderRecord>>;
}

/// Read-only queries against the pool contract, raw on-chain integers at the
/// latest block tag.
#[async_trait]
pub trait PoolReader: Send + Sync {
    async fn balance_of(&self, address: Address) -> eyre::Result<U256>;
    async fn total_supply(&self) -> eyre::Result<U256>;
    /// Pool reserve balance by index in the pool's `balances(i)` array.
    async fn reserve_balance(&self, index: u64) -> eyre::Result<U256>;
}

/// Timestamp-indexed USD price lookup. `None` means no price is available;
/// callers treat that as zero.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn usd_price(&self, token: Address, at: DateTime<Utc>) -> Option<BigDecimal>;
}
