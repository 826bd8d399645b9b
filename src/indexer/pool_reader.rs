use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use async_trait::async_trait;

use crate::processor::store::PoolReader;

sol! {
    #[sol(rpc)]
    contract CurveTwocryptoOptimized {
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function balances(uint256 i) external view returns (uint256);
    }
}

/// `PoolReader` backed by live contract calls against the pool at the
/// latest block tag.
pub struct RpcPoolReader<P: Provider> {
    contract: CurveTwocryptoOptimized::CurveTwocryptoOptimizedInstance<P>,
}

impl<P: Provider> RpcPoolReader<P> {
    pub fn new(address: Address, provider: P) -> Self {
        Self {
            contract: CurveTwocryptoOptimized::new(address, provider),
        }
    }
}

#[async_trait]
impl<P: Provider> PoolReader for RpcPoolReader<P> {
    async fn balance_of(&self, address: Address) -> eyre::Result<U256> {
        Ok(self.contract.balanceOf(address).call().await?)
    }

    async fn total_supply(&self) -> eyre::Result<U256> {
        Ok(self.contract.totalSupply().call().await?)
    }

    async fn reserve_balance(&self, index: u64) -> eyre::Result<U256> {
        Ok(self.contract.balances(U256::from(index)).call().await?)
    }
}
