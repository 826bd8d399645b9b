use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};

/// Which tracked contract a log came from. Determines which events the
/// decoder looks for and which holder table the reconciler writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractFamily {
    Pool,
    StakeDaoGauge,
    CurveGauge,
    Booster,
}

/// A decoded event from one of the tracked contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// ERC-20 transfer of the pool's LP token.
    Transfer {
        sender: Address,
        receiver: Address,
        value: U256,
    },
    /// Gauge deposit (StakeDao or Curve, per the log's contract family).
    GaugeDeposit { provider: Address, value: U256 },
    GaugeWithdraw { provider: Address, value: U256 },
    /// Booster deposit/withdraw, tagged with the booster's numbered pool.
    BoosterDeposited {
        user: Address,
        pool_id: U256,
        amount: U256,
    },
    BoosterWithdrawn {
        user: Address,
        pool_id: U256,
        amount: U256,
    },
}

/// Block/transaction context carried alongside every decoded event.
#[derive(Debug, Clone)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub timestamp: DateTime<Utc>,
}
