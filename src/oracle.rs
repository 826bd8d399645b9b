use alloy::primitives::Address;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::OracleConfig;
use crate::processor::store::PriceOracle;

/// Price API client. Lookups that fail for any reason (no base URL
/// configured, transport error, unparseable body, unknown token) resolve to
/// `None`; the reconciler treats a missing price as zero.
pub struct HttpPriceOracle {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: BigDecimal,
}

impl HttpPriceOracle {
    pub fn from_config(config: &OracleConfig) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        if config.base_url.is_none() {
            tracing::warn!("No price oracle configured, holder USD values will be zero");
        }
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn usd_price(&self, token: Address, at: DateTime<Utc>) -> Option<BigDecimal> {
        let base_url = self.base_url.as_ref()?;
        let url = format!(
            "{}/v1/prices/{:#x}?timestamp={}",
            base_url.trim_end_matches('/'),
            token,
            at.timestamp()
        );

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "Price lookup failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(token = %token, status = %response.status(), "No price available");
            return None;
        }
        match response.json::<PriceResponse>().await {
            Ok(body) => Some(body.price),
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "Malformed price response");
                None
            }
        }
    }
}
