use alloy::primitives::Address;

use crate::config::ContractsConfig;
use crate::indexer::types::ContractFamily;

/// One (contract address, start block, family) registration handed to the
/// dispatcher. Built explicitly at startup; there is no load-time
/// registration state.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub address: Address,
    pub start_block: u64,
    pub family: ContractFamily,
}

/// Construct the dispatch bindings for the four tracked contracts.
pub fn bindings(contracts: &ContractsConfig) -> eyre::Result<Vec<ContractBinding>> {
    let entries = [
        (&contracts.pool.address, ContractFamily::Pool),
        (
            &contracts.stakedao_gauge.address,
            ContractFamily::StakeDaoGauge,
        ),
        (&contracts.curve_gauge.address, ContractFamily::CurveGauge),
        (&contracts.booster.address, ContractFamily::Booster),
    ];

    entries
        .into_iter()
        .map(|(address, family)| {
            Ok(ContractBinding {
                address: address
                    .parse()
                    .map_err(|e| eyre::eyre!("Invalid contract address '{}': {}", address, e))?,
                start_block: contracts.start_block,
                family,
            })
        })
        .collect()
}
