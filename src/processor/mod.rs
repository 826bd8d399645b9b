pub mod scale;
pub mod store;

use alloy::primitives::{Address, U256};
use bigdecimal::{BigDecimal, Zero};

use crate::config::ContractsConfig;
use crate::indexer::types::{ContractFamily, EventMeta, PoolEvent};
use scale::scale_down;
use store::{HolderKind, HolderRecord, HolderStore, PoolReader, PriceOracle};

/// A pool reserve asset the valuation step prices.
#[derive(Debug, Clone)]
pub struct Reserve {
    pub symbol: String,
    pub address: Address,
    pub index: u64,
}

/// Static reconciler parameters derived from config.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub pool_decimals: u8,
    pub reserves: Vec<Reserve>,
    pub booster_pool_id: U256,
}

impl ProcessorSettings {
    pub fn from_config(contracts: &ContractsConfig) -> eyre::Result<Self> {
        let reserves = contracts
            .pool
            .reserves
            .iter()
            .map(|r| {
                Ok(Reserve {
                    symbol: r.symbol.clone(),
                    address: r
                        .address
                        .parse()
                        .map_err(|e| eyre::eyre!("Invalid reserve address '{}': {}", r.address, e))?,
                    index: r.index,
                })
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        Ok(Self {
            pool_decimals: contracts.pool.decimals,
            reserves,
            booster_pool_id: U256::from(contracts.booster.pool_id),
        })
    }
}

/// The balance reconciler: maps one decoded contract event to zero or one
/// holder-record write. All external effects go through the injected
/// capabilities, so the logic runs identically against Postgres + a live
/// node and against in-memory fakes.
pub struct Processor<S, P, O> {
    store: S,
    pool: P,
    oracle: O,
    settings: ProcessorSettings,
}

impl<S, P, O> Processor<S, P, O>
where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    pub fn new(store: S, pool: P, oracle: O, settings: ProcessorSettings) -> Self {
        Self {
            store,
            pool,
            oracle,
            settings,
        }
    }

    /// Route one event to its handler. Unmatched (family, event) pairs can
    /// only come from a decoder bug and are rejected.
    pub async fn handle(
        &self,
        family: ContractFamily,
        event: &PoolEvent,
        meta: &EventMeta,
    ) -> eyre::Result<()> {
        match (family, event) {
            (
                ContractFamily::Pool,
                PoolEvent::Transfer {
                    sender, receiver, ..
                },
            ) => self.on_pool_transfer(*sender, *receiver, meta).await,
            (ContractFamily::StakeDaoGauge, PoolEvent::GaugeDeposit { provider, value }) => {
                self.on_deposit(HolderKind::StakeDao, *provider, *value).await
            }
            (ContractFamily::StakeDaoGauge, PoolEvent::GaugeWithdraw { provider, value }) => {
                self.on_withdraw(HolderKind::StakeDao, *provider, *value, meta)
                    .await
            }
            (ContractFamily::CurveGauge, PoolEvent::GaugeDeposit { provider, value }) => {
                self.on_deposit(HolderKind::Curve, *provider, *value).await
            }
            (ContractFamily::CurveGauge, PoolEvent::GaugeWithdraw { provider, value }) => {
                self.on_withdraw(HolderKind::Curve, *provider, *value, meta)
                    .await
            }
            (
                ContractFamily::Booster,
                PoolEvent::BoosterDeposited {
                    user,
                    pool_id,
                    amount,
                },
            ) => {
                if *pool_id != self.settings.booster_pool_id {
                    return Ok(());
                }
                self.on_deposit(HolderKind::Convex, *user, *amount).await
            }
            (
                ContractFamily::Booster,
                PoolEvent::BoosterWithdrawn {
                    user,
                    pool_id,
                    amount,
                },
            ) => {
                if *pool_id != self.settings.booster_pool_id {
                    return Ok(());
                }
                self.on_withdraw(HolderKind::Convex, *user, *amount, meta)
                    .await
            }
            (family, event) => Err(eyre::eyre!(
                "Event {:?} does not belong to contract family {:?}",
                event,
                family
            )),
        }
    }

    /// LP token transfer: overwrite both parties' records with freshly
    /// queried on-chain balances, valued against the pool reserves. The two
    /// upserts are independent, non-atomic writes.
    async fn on_pool_transfer(
        &self,
        sender: Address,
        receiver: Address,
        meta: &EventMeta,
    ) -> eyre::Result<()> {
        let decimals = self.settings.pool_decimals;
        let sender_balance = scale_down(self.pool.balance_of(sender).await?, decimals);
        let receiver_balance = scale_down(self.pool.balance_of(receiver).await?, decimals);

        let supply = scale_down(self.pool.total_supply().await?, decimals);
        let mut sender_usd = BigDecimal::zero();
        let mut receiver_usd = BigDecimal::zero();
        if !supply.is_zero() {
            let mut reserve_value = BigDecimal::zero();
            for reserve in &self.settings.reserves {
                let balance = scale_down(self.pool.reserve_balance(reserve.index).await?, decimals);
                let price = self
                    .oracle
                    .usd_price(reserve.address, meta.timestamp)
                    .await
                    .unwrap_or_else(BigDecimal::zero);
                reserve_value += balance * price;
            }
            sender_usd = &sender_balance / &supply * &reserve_value;
            receiver_usd = &receiver_balance / &supply * &reserve_value;
        }

        for (address, balance, usd_value) in [
            (sender, sender_balance, sender_usd),
            (receiver, receiver_balance, receiver_usd),
        ] {
            if self.store.get(HolderKind::Pool, address).await?.is_none() {
                tracing::info!(
                    holder = %address,
                    balance = %balance,
                    usd_value = %usd_value,
                    "New LP holder"
                );
            }
            self.store
                .upsert(HolderRecord {
                    kind: HolderKind::Pool,
                    address,
                    balance,
                    usd_value: Some(usd_value),
                })
                .await?;
        }

        Ok(())
    }

    /// Deposit: add the scaled amount to the stored balance, creating the
    /// record on first sight.
    async fn on_deposit(&self, kind: HolderKind, address: Address, raw: U256) -> eyre::Result<()> {
        let amount = scale_down(raw, self.settings.pool_decimals);
        let balance = match self.store.get(kind, address).await? {
            Some(record) => record.balance + amount,
            None => {
                tracing::info!(kind = kind.as_str(), holder = %address, amount = %amount, "New holder");
                amount
            }
        };
        self.store
            .upsert(HolderRecord {
                kind,
                address,
                balance,
                usd_value: None,
            })
            .await
    }

    /// Withdraw: subtract the scaled amount. A withdraw for an address we
    /// have never seen is a no-op; no record is created. The result is not
    /// clamped at zero — a negative balance means the upstream event data is
    /// wrong and is worth surfacing rather than hiding.
    async fn on_withdraw(
        &self,
        kind: HolderKind,
        address: Address,
        raw: U256,
        meta: &EventMeta,
    ) -> eyre::Result<()> {
        let Some(record) = self.store.get(kind, address).await? else {
            return Ok(());
        };
        let amount = scale_down(raw, self.settings.pool_decimals);
        let balance = record.balance - amount;
        if balance < BigDecimal::zero() {
            tracing::warn!(
                kind = kind.as_str(),
                holder = %address,
                balance = %balance,
                block = meta.block_number,
                tx = %meta.tx_hash,
                "Withdrawal drove balance negative"
            );
        }
        self.store
            .upsert(HolderRecord {
                kind,
                address,
                balance,
                usd_value: None,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Mutex;

    /// In-memory HolderStore, keyed like the Postgres table.
    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<(HolderKind, Address), HolderRecord>>,
    }

    #[async_trait]
    impl HolderStore for MemoryStore {
        async fn get(
            &self,
            kind: HolderKind,
            address: Address,
        ) -> eyre::Result<Option<HolderRecord>> {
            Ok(self.records.lock().unwrap().get(&(kind, address)).cloned())
        }

        async fn upsert(&self, record: HolderRecord) -> eyre::Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert((record.kind, record.address), record);
            Ok(())
        }

        async fn list(&self, kind: HolderKind) -> eyre::Result<Vec<HolderRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.kind == kind)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakePool {
        balances: HashMap<Address, U256>,
        supply: U256,
        reserves: HashMap<u64, U256>,
    }

    #[async_trait]
    impl PoolReader for FakePool {
        async fn balance_of(&self, address: Address) -> eyre::Result<U256> {
            Ok(self.balances.get(&address).copied().unwrap_or(U256::ZERO))
        }

        async fn total_supply(&self) -> eyre::Result<U256> {
            Ok(self.supply)
        }

        async fn reserve_balance(&self, index: u64) -> eyre::Result<U256> {
            Ok(self.reserves.get(&index).copied().unwrap_or(U256::ZERO))
        }
    }

    struct FixedOracle {
        prices: HashMap<Address, BigDecimal>,
    }

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn usd_price(&self, token: Address, _at: DateTime<Utc>) -> Option<BigDecimal> {
            self.prices.get(&token).cloned()
        }
    }

    const TEST_USER: Address = Address::repeat_byte(0x11);
    const OTHER_USER: Address = Address::repeat_byte(0x22);
    const RLP: Address = Address::repeat_byte(0xaa);
    const USR: Address = Address::repeat_byte(0xbb);
    const TRACKED_PID: u64 = 385;

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            pool_decimals: 18,
            reserves: vec![
                Reserve {
                    symbol: "RLP".to_string(),
                    address: RLP,
                    index: 0,
                },
                Reserve {
                    symbol: "USR".to_string(),
                    address: USR,
                    index: 1,
                },
            ],
            booster_pool_id: U256::from(TRACKED_PID),
        }
    }

    fn meta() -> EventMeta {
        EventMeta {
            block_number: 21087900,
            tx_hash: alloy::primitives::B256::repeat_byte(0xab),
            log_index: 0,
            timestamp: Utc::now(),
        }
    }

    fn processor(pool: FakePool, prices: HashMap<Address, BigDecimal>) -> Processor<MemoryStore, FakePool, FixedOracle> {
        Processor::new(
            MemoryStore::default(),
            pool,
            FixedOracle { prices },
            settings(),
        )
    }

    #[tokio::test]
    async fn test_deposits_accumulate_in_order() {
        let p = processor(FakePool::default(), HashMap::new());
        for amount in [3u64, 7, 5] {
            p.handle(
                ContractFamily::StakeDaoGauge,
                &PoolEvent::GaugeDeposit {
                    provider: TEST_USER,
                    value: eth(amount),
                },
                &meta(),
            )
            .await
            .unwrap();
        }

        let record = p
            .store
            .get(HolderKind::StakeDao, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, BigDecimal::from(15));
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw() {
        // Seed scenario: deposit 10e18, withdraw 5e18, balance 5
        let p = processor(FakePool::default(), HashMap::new());
        p.handle(
            ContractFamily::StakeDaoGauge,
            &PoolEvent::GaugeDeposit {
                provider: TEST_USER,
                value: eth(10),
            },
            &meta(),
        )
        .await
        .unwrap();
        p.handle(
            ContractFamily::StakeDaoGauge,
            &PoolEvent::GaugeWithdraw {
                provider: TEST_USER,
                value: eth(5),
            },
            &meta(),
        )
        .await
        .unwrap();

        let record = p
            .store
            .get(HolderKind::StakeDao, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, BigDecimal::from(5));
    }

    #[tokio::test]
    async fn test_withdraw_without_record_is_noop() {
        let p = processor(FakePool::default(), HashMap::new());
        p.handle(
            ContractFamily::CurveGauge,
            &PoolEvent::GaugeWithdraw {
                provider: TEST_USER,
                value: eth(5),
            },
            &meta(),
        )
        .await
        .unwrap();

        assert!(p.store.list(HolderKind::Curve).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_can_go_negative() {
        let p = processor(FakePool::default(), HashMap::new());
        p.handle(
            ContractFamily::CurveGauge,
            &PoolEvent::GaugeDeposit {
                provider: TEST_USER,
                value: eth(3),
            },
            &meta(),
        )
        .await
        .unwrap();
        p.handle(
            ContractFamily::CurveGauge,
            &PoolEvent::GaugeWithdraw {
                provider: TEST_USER,
                value: eth(8),
            },
            &meta(),
        )
        .await
        .unwrap();

        let record = p
            .store
            .get(HolderKind::Curve, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, BigDecimal::from(-5));
    }

    #[tokio::test]
    async fn test_curve_withdraw_writes_curve_kind_only() {
        let p = processor(FakePool::default(), HashMap::new());
        p.handle(
            ContractFamily::CurveGauge,
            &PoolEvent::GaugeDeposit {
                provider: TEST_USER,
                value: eth(10),
            },
            &meta(),
        )
        .await
        .unwrap();
        p.handle(
            ContractFamily::CurveGauge,
            &PoolEvent::GaugeWithdraw {
                provider: TEST_USER,
                value: eth(4),
            },
            &meta(),
        )
        .await
        .unwrap();

        let record = p
            .store
            .get(HolderKind::Curve, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, BigDecimal::from(6));
        assert!(p.store.list(HolderKind::Convex).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_booster_deposit_tracked_pool() {
        let p = processor(FakePool::default(), HashMap::new());
        p.handle(
            ContractFamily::Booster,
            &PoolEvent::BoosterDeposited {
                user: TEST_USER,
                pool_id: U256::from(TRACKED_PID),
                amount: eth(10),
            },
            &meta(),
        )
        .await
        .unwrap();

        let record = p
            .store
            .get(HolderKind::Convex, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, BigDecimal::from(10));
    }

    #[tokio::test]
    async fn test_booster_other_pool_is_ignored() {
        let p = processor(FakePool::default(), HashMap::new());
        p.handle(
            ContractFamily::Booster,
            &PoolEvent::BoosterDeposited {
                user: TEST_USER,
                pool_id: U256::from(1u64),
                amount: eth(10),
            },
            &meta(),
        )
        .await
        .unwrap();
        p.handle(
            ContractFamily::Booster,
            &PoolEvent::BoosterWithdrawn {
                user: TEST_USER,
                pool_id: U256::from(1u64),
                amount: eth(10),
            },
            &meta(),
        )
        .await
        .unwrap();

        assert!(p.store.list(HolderKind::Convex).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_overwrites_with_live_balances() {
        let mut pool = FakePool::default();
        pool.balances.insert(TEST_USER, eth(7));
        pool.balances.insert(OTHER_USER, eth(3));
        let p = processor(pool, HashMap::new());

        // Stale record that must be overwritten, not added to
        p.store
            .upsert(HolderRecord {
                kind: HolderKind::Pool,
                address: TEST_USER,
                balance: BigDecimal::from(999),
                usd_value: None,
            })
            .await
            .unwrap();

        p.handle(
            ContractFamily::Pool,
            &PoolEvent::Transfer {
                sender: TEST_USER,
                receiver: OTHER_USER,
                value: eth(3),
            },
            &meta(),
        )
        .await
        .unwrap();

        let sender = p
            .store
            .get(HolderKind::Pool, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        let receiver = p
            .store
            .get(HolderKind::Pool, OTHER_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender.balance, BigDecimal::from(7));
        assert_eq!(receiver.balance, BigDecimal::from(3));
        // Zero supply: valued at zero, not skipped
        assert_eq!(sender.usd_value, Some(BigDecimal::zero()));
    }

    #[tokio::test]
    async fn test_transfer_usd_valuation() {
        let mut pool = FakePool::default();
        pool.balances.insert(TEST_USER, eth(10));
        pool.balances.insert(OTHER_USER, eth(5));
        pool.supply = eth(100);
        pool.reserves.insert(0, eth(50)); // RLP
        pool.reserves.insert(1, eth(40)); // USR
        let mut prices = HashMap::new();
        prices.insert(RLP, BigDecimal::from_str("1.2").unwrap());
        prices.insert(USR, BigDecimal::from(1));
        let p = processor(pool, prices);

        p.handle(
            ContractFamily::Pool,
            &PoolEvent::Transfer {
                sender: TEST_USER,
                receiver: OTHER_USER,
                value: eth(5),
            },
            &meta(),
        )
        .await
        .unwrap();

        // Pool reserve value = 50 * 1.2 + 40 * 1.0 = 100 USD
        let sender = p
            .store
            .get(HolderKind::Pool, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        let receiver = p
            .store
            .get(HolderKind::Pool, OTHER_USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender.usd_value, Some(BigDecimal::from(10)));
        assert_eq!(receiver.usd_value, Some(BigDecimal::from(5)));
    }

    #[tokio::test]
    async fn test_missing_price_counts_as_zero() {
        let mut pool = FakePool::default();
        pool.balances.insert(TEST_USER, eth(10));
        pool.supply = eth(100);
        pool.reserves.insert(0, eth(50));
        pool.reserves.insert(1, eth(40));
        let mut prices = HashMap::new();
        prices.insert(USR, BigDecimal::from(1)); // no RLP price
        let p = processor(pool, prices);

        p.handle(
            ContractFamily::Pool,
            &PoolEvent::Transfer {
                sender: TEST_USER,
                receiver: OTHER_USER,
                value: eth(1),
            },
            &meta(),
        )
        .await
        .unwrap();

        let sender = p
            .store
            .get(HolderKind::Pool, TEST_USER)
            .await
            .unwrap()
            .unwrap();
        // Only the USR leg prices: 10/100 * 40 * 1.0 = 4
        assert_eq!(sender.usd_value, Some(BigDecimal::from(4)));
    }
}
