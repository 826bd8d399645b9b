use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};

use super::types::{ContractFamily, EventMeta, PoolEvent};

// Event ABIs for the tracked contracts, declared with alloy's sol! macro.
// This gives us SIGNATURE_HASH constants for topic0 matching.
sol! {
    // Curve two-crypto pool LP token (note: Curve names the parties
    // sender/receiver rather than from/to, same topology as ERC-20).
    event Transfer(address indexed sender, address indexed receiver, uint256 value);

    // Liquidity gauges (StakeDao v4 and Curve v6 share these signatures).
    event Deposit(address indexed provider, uint256 value);
    event Withdraw(address indexed provider, uint256 value);

    // Convex booster.
    event Deposited(address indexed user, uint256 indexed poolid, uint256 amount);
    event Withdrawn(address indexed user, uint256 indexed poolid, uint256 amount);
}

/// Attempt to decode a log from a tracked contract into a typed event.
///
/// Returns `None` if:
/// - The log's topic0 doesn't match any event the family emits
/// - The topic/data layout is malformed
///
/// Unrecognized logs are expected (the contracts emit more event kinds than
/// we track) and are skipped silently.
pub fn decode_log(
    log: &Log,
    family: ContractFamily,
    timestamp: DateTime<Utc>,
) -> Option<(PoolEvent, EventMeta)> {
    let inner = &log.inner;
    let topics = inner.data.topics();
    if topics.is_empty() {
        return None;
    }
    let data = inner.data.data.as_ref();

    let event = match family {
        ContractFamily::Pool => {
            // Transfer: signature + sender + receiver topics, value in data
            if topics[0] != Transfer::SIGNATURE_HASH || topics.len() != 3 || data.len() < 32 {
                return None;
            }
            PoolEvent::Transfer {
                sender: Address::from_word(topics[1]),
                receiver: Address::from_word(topics[2]),
                value: U256::from_be_slice(&data[..32]),
            }
        }
        ContractFamily::StakeDaoGauge | ContractFamily::CurveGauge => {
            // Deposit/Withdraw: signature + provider topics, value in data
            if topics.len() != 2 || data.len() < 32 {
                return None;
            }
            let provider = Address::from_word(topics[1]);
            let value = U256::from_be_slice(&data[..32]);
            if topics[0] == Deposit::SIGNATURE_HASH {
                PoolEvent::GaugeDeposit { provider, value }
            } else if topics[0] == Withdraw::SIGNATURE_HASH {
                PoolEvent::GaugeWithdraw { provider, value }
            } else {
                return None;
            }
        }
        ContractFamily::Booster => {
            // Deposited/Withdrawn: signature + user + poolid topics, amount in data
            if topics.len() != 3 || data.len() < 32 {
                return None;
            }
            let user = Address::from_word(topics[1]);
            let pool_id = U256::from_be_bytes(topics[2].0);
            let amount = U256::from_be_slice(&data[..32]);
            if topics[0] == Deposited::SIGNATURE_HASH {
                PoolEvent::BoosterDeposited {
                    user,
                    pool_id,
                    amount,
                }
            } else if topics[0] == Withdrawn::SIGNATURE_HASH {
                PoolEvent::BoosterWithdrawn {
                    user,
                    pool_id,
                    amount,
                }
            } else {
                return None;
            }
        }
    };

    let meta = EventMeta {
        block_number: log.block_number.unwrap_or(0),
        tx_hash: log.transaction_hash.unwrap_or_default(),
        log_index: log.log_index.unwrap_or(0),
        timestamp,
    };

    Some((event, meta))
}
