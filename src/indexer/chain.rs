use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bindings::ContractBinding;
use crate::config::ChainConfig;
use crate::db::repository;
use crate::indexer::decoder;
use crate::indexer::types::ContractFamily;
use crate::processor::store::{HolderStore, PoolReader, PriceOracle};
use crate::processor::Processor;

/// Event signatures the dispatcher subscribes to across the bound contracts.
const TRACKED_EVENTS: [&str; 5] = [
    "Transfer(address,address,uint256)",
    "Deposit(address,uint256)",
    "Withdraw(address,uint256)",
    "Deposited(address,uint256,uint256)",
    "Withdrawn(address,uint256,uint256)",
];

/// Main entry point for the dispatcher task.
/// Runs backfill from the checkpoint (or the bound start blocks), then
/// switches to live indexing.
pub async fn run_dispatcher<S, P, O>(
    config: ChainConfig,
    bindings: Vec<ContractBinding>,
    processor: Processor<S, P, O>,
    pool: PgPool,
    shutdown: CancellationToken,
) -> eyre::Result<()>
where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    let chain_id = config.chain_id as i64;
    tracing::info!(chain = %config.name, chain_id, contracts = bindings.len(), "Starting dispatcher");

    // Contract address -> family routing table
    let routes: HashMap<Address, ContractFamily> =
        bindings.iter().map(|b| (b.address, b.family)).collect();

    let last_indexed = repository::get_last_indexed_block(&pool, chain_id).await?;
    let earliest_bound = bindings.iter().map(|b| b.start_block).min().unwrap_or(0);
    let start_block = last_indexed.map(|b| b + 1).unwrap_or(earliest_bound);

    // Phase 1: Backfill historical blocks
    if !shutdown.is_cancelled() {
        tracing::info!(chain = %config.name, start_block, "Starting backfill");
        backfill(
            &config, &pool, &routes, &processor, start_block, &shutdown,
        )
        .await?;
    }

    // Phase 2: Live indexing
    if !shutdown.is_cancelled() {
        tracing::info!(chain = %config.name, "Switching to live indexing");
        live_index(&config, &pool, &routes, &processor, &shutdown).await?;
    }

    tracing::info!(chain = %config.name, "Dispatcher stopped");
    Ok(())
}

/// Backfill historical blocks from `start_block` up to the current chain tip.
async fn backfill<S, P, O>(
    config: &ChainConfig,
    pool: &PgPool,
    routes: &HashMap<Address, ContractFamily>,
    processor: &Processor<S, P, O>,
    start_block: u64,
    shutdown: &CancellationToken,
) -> eyre::Result<()>
where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    let provider = ProviderBuilder::new().connect_http(
        config
            .rpc_http
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
    );

    let chain_tip = retry_rpc(|| provider.get_block_number()).await?;
    let batch_size = config.batch_size;
    let chain_id = config.chain_id as i64;

    if start_block > chain_tip {
        tracing::info!(
            chain = %config.name,
            start_block,
            chain_tip,
            "Already past chain tip, skipping backfill"
        );
        return Ok(());
    }

    let addresses: Vec<Address> = routes.keys().cloned().collect();
    let mut current = start_block;
    let total_blocks = chain_tip - start_block + 1;

    while current <= chain_tip && !shutdown.is_cancelled() {
        let to_block = std::cmp::min(current + batch_size - 1, chain_tip);
        let progress = ((current - start_block) as f64 / total_blocks as f64 * 100.0) as u32;

        tracing::info!(
            chain = %config.name,
            from = current,
            to = to_block,
            progress = %format!("{}%", progress),
            "Backfilling block range"
        );

        let filter = Filter::new()
            .address(addresses.clone())
            .events(TRACKED_EVENTS)
            .from_block(current)
            .to_block(to_block);

        let logs = retry_rpc(|| provider.get_logs(&filter)).await?;

        // Fetch timestamps for the blocks that carried logs
        let mut block_timestamps: HashMap<u64, DateTime<Utc>> = HashMap::new();
        for log in &logs {
            if let Some(block_num) = log.block_number {
                if !block_timestamps.contains_key(&block_num) {
                    let block = retry_rpc(|| async {
                        provider
                            .get_block_by_number(BlockNumberOrTag::Number(block_num))
                            .await
                    })
                    .await?;

                    if let Some(block) = block {
                        let ts = DateTime::from_timestamp(block.header.timestamp as i64, 0)
                            .unwrap_or_default();
                        block_timestamps.insert(block_num, ts);
                    }
                }
            }
        }

        dispatch_logs(config, routes, processor, logs, &block_timestamps).await;

        repository::upsert_indexer_state(pool, chain_id, to_block as i64).await?;

        current = to_block + 1;
    }

    tracing::info!(chain = %config.name, "Backfill complete");
    Ok(())
}

/// Live indexing: subscribe to new blocks via WebSocket, or poll via HTTP.
async fn live_index<S, P, O>(
    config: &ChainConfig,
    pool: &PgPool,
    routes: &HashMap<Address, ContractFamily>,
    processor: &Processor<S, P, O>,
    shutdown: &CancellationToken,
) -> eyre::Result<()>
where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    if let Some(ws_url) = &config.rpc_ws {
        match live_index_ws(config, ws_url, pool, routes, processor, shutdown).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    chain = %config.name,
                    error = %e,
                    "WebSocket connection failed, falling back to HTTP polling"
                );
            }
        }
    }

    live_index_http(config, pool, routes, processor, shutdown).await
}

/// Live indexing via WebSocket block subscription.
async fn live_index_ws<S, P, O>(
    config: &ChainConfig,
    ws_url: &str,
    pool: &PgPool,
    routes: &HashMap<Address, ContractFamily>,
    processor: &Processor<S, P, O>,
    shutdown: &CancellationToken,
) -> eyre::Result<()>
where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    let ws = WsConnect::new(ws_url);
    let provider = ProviderBuilder::new().connect_ws(ws).await?;

    let sub = provider.subscribe_blocks().await?;
    let mut stream = sub.into_stream();

    tracing::info!(chain = %config.name, "WebSocket block subscription active");

    loop {
        tokio::select! {
            maybe_block = stream.next() => {
                match maybe_block {
                    Some(block_header) => {
                        if let Err(e) = process_new_block(
                            &provider, pool, routes, processor, config,
                            block_header.number, block_header.timestamp,
                        ).await {
                            tracing::error!(
                                chain = %config.name,
                                block = block_header.number,
                                error = %e,
                                "Failed to process block"
                            );
                        }
                    }
                    None => {
                        tracing::warn!(chain = %config.name, "Block stream ended");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!(chain = %config.name, "Shutdown received, stopping live indexer");
                break;
            }
        }
    }

    Ok(())
}

/// Live indexing via HTTP polling (fallback when WS is unavailable).
async fn live_index_http<S, P, O>(
    config: &ChainConfig,
    pool: &PgPool,
    routes: &HashMap<Address, ContractFamily>,
    processor: &Processor<S, P, O>,
    shutdown: &CancellationToken,
) -> eyre::Result<()>
where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    let provider = ProviderBuilder::new().connect_http(
        config
            .rpc_http
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
    );

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut last_block = retry_rpc(|| provider.get_block_number()).await?;

    tracing::info!(
        chain = %config.name,
        poll_interval_ms = config.poll_interval_ms,
        last_block,
        "HTTP polling active"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!(chain = %config.name, "Shutdown received, stopping poller");
                break;
            }
        }

        let current = match retry_rpc(|| provider.get_block_number()).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(chain = %config.name, error = %e, "Failed to get block number");
                continue;
            }
        };

        if current <= last_block {
            continue;
        }

        for block_num in (last_block + 1)..=current {
            if shutdown.is_cancelled() {
                break;
            }

            let block = retry_rpc(|| async {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(block_num))
                    .await
            })
            .await?;

            if let Some(block) = block {
                if let Err(e) = process_new_block(
                    &provider,
                    pool,
                    routes,
                    processor,
                    config,
                    block_num,
                    block.header.timestamp,
                )
                .await
                {
                    tracing::error!(
                        chain = %config.name,
                        block = block_num,
                        error = %e,
                        "Failed to process block"
                    );
                }
            }
        }

        last_block = current;
    }

    Ok(())
}

/// Process a single new block: fetch logs for the bound contracts, dispatch
/// them to the reconciler, and advance the checkpoint.
async fn process_new_block<Pr, S, P, O>(
    provider: &Pr,
    pool: &PgPool,
    routes: &HashMap<Address, ContractFamily>,
    processor: &Processor<S, P, O>,
    config: &ChainConfig,
    block_number: u64,
    block_timestamp: u64,
) -> eyre::Result<()>
where
    Pr: Provider,
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    let chain_id = config.chain_id as i64;
    let addresses: Vec<Address> = routes.keys().cloned().collect();

    let filter = Filter::new()
        .address(addresses)
        .events(TRACKED_EVENTS)
        .from_block(block_number)
        .to_block(block_number);

    let logs = provider.get_logs(&filter).await?;
    let dispatched = logs.len();

    let timestamp = DateTime::from_timestamp(block_timestamp as i64, 0).unwrap_or_default();
    let mut block_timestamps = HashMap::new();
    block_timestamps.insert(block_number, timestamp);

    dispatch_logs(config, routes, processor, logs, &block_timestamps).await;

    repository::upsert_indexer_state(pool, chain_id, block_number as i64).await?;

    if dispatched > 0 {
        tracing::info!(
            chain = %config.name,
            block = block_number,
            logs = dispatched,
            "Processed block"
        );
    }

    Ok(())
}

/// Decode and hand each log to the reconciler in (block, log index) order,
/// so writes for a given address are serialized. A failing handler drops
/// only its own event: the error is logged with block and transaction
/// context, nothing is retried or rolled back.
async fn dispatch_logs<S, P, O>(
    config: &ChainConfig,
    routes: &HashMap<Address, ContractFamily>,
    processor: &Processor<S, P, O>,
    mut logs: Vec<Log>,
    block_timestamps: &HashMap<u64, DateTime<Utc>>,
) where
    S: HolderStore,
    P: PoolReader,
    O: PriceOracle,
{
    logs.sort_by_key(|log| (log.block_number.unwrap_or(0), log.log_index.unwrap_or(0)));

    for log in &logs {
        let Some(family) = routes.get(&log.inner.address).copied() else {
            continue;
        };
        let timestamp = log
            .block_number
            .and_then(|n| block_timestamps.get(&n).copied())
            .unwrap_or_default();

        let Some((event, meta)) = decoder::decode_log(log, family, timestamp) else {
            continue;
        };

        if let Err(e) = processor.handle(family, &event, &meta).await {
            tracing::error!(
                chain = %config.name,
                block = meta.block_number,
                tx = %meta.tx_hash,
                log_index = meta.log_index,
                error = ?e,
                "Handler failed, event dropped"
            );
        }
    }
}

/// Retry an async operation with exponential backoff.
/// Handles transient RPC errors (rate limits, network issues).
pub async fn retry_rpc<F, Fut, T, E>(mut f: F) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = Duration::from_millis(500);
    let max_retries = 5;

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    f().await
        .map_err(|e| eyre::eyre!("RPC call failed after {} retries: {}", max_retries, e))
}
