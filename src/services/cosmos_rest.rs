use crate::errors::FetchError;
use crate::models::{DelegationInfo, TokenConfig, TokenRegistry, WalletBalance};
use crate::utils::helpers::{is_native_denom, scale_amount, short_address};
use async_trait::async_trait;
use futures::future::join_all;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

#[async_trait]
pub trait RestClient: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

pub struct HttpRestClient {
    client: reqwest::Client,
}

impl HttpRestClient {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("cosmos-apr-tracker/0.1")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let failed = |reason: String| FetchError::Endpoint {
            endpoint: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status)));
        }
        response.json().await.map_err(|e| failed(e.to_string()))
    }
}

#[derive(Deserialize)]
struct Coin {
    #[serde(default)]
    denom: String,
    amount: String,
}

#[derive(Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: Vec<Coin>,
}

#[derive(Deserialize)]
struct Delegation {
    validator_address: String,
}

#[derive(Deserialize)]
struct DelegationEntry {
    delegation: Delegation,
    balance: Coin,
}

#[derive(Deserialize)]
struct DelegationsResponse {
    #[serde(default)]
    delegation_responses: Vec<DelegationEntry>,
}

#[derive(Deserialize)]
struct Description {
    #[serde(default)]
    moniker: String,
}

#[derive(Deserialize)]
struct Validator {
    description: Description,
}

#[derive(Deserialize)]
struct ValidatorResponse {
    validator: Validator,
}

/// Reads balances and delegations from a chain's LCD endpoints, trying each
/// endpoint in order. One result never mixes data from two endpoints.
pub struct BalanceFetcher {
    client: Arc<dyn RestClient>,
    tokens: Arc<TokenRegistry>,
    chain_timeout: Duration,
}

impl BalanceFetcher {
    pub fn new(
        client: Arc<dyn RestClient>,
        tokens: Arc<TokenRegistry>,
        chain_timeout: Duration,
    ) -> Self {
        Self {
            client,
            tokens,
            chain_timeout,
        }
    }

    pub async fn fetch_balance(&self, address: &str, chain: &str) -> Option<WalletBalance> {
        match self.try_fetch_balance(address, chain).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                error!("Error fetching balance for {} on {}: {}", address, chain, e);
                None
            }
        }
    }

    pub async fn try_fetch_balance(
        &self,
        address: &str,
        chain: &str,
    ) -> Result<WalletBalance, FetchError> {
        let token = self
            .tokens
            .chain(chain)
            .ok_or_else(|| FetchError::UnknownChain(chain.to_string()))?;
        match timeout(self.chain_timeout, self.fetch_from_endpoints(address, token)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                chain: chain.to_string(),
                after: self.chain_timeout,
            }),
        }
    }

    async fn fetch_from_endpoints(
        &self,
        address: &str,
        token: &TokenConfig,
    ) -> Result<WalletBalance, FetchError> {
        for endpoint in &token.rest_endpoints {
            let endpoint = endpoint.trim_end_matches('/');
            match self.fetch_snapshot(endpoint, address, token).await {
                Ok(balance) => {
                    info!(
                        "{} on {}: {} available, {} delegated (via {})",
                        address,
                        token.chain_name,
                        balance.available_balance,
                        balance.delegated_balance,
                        endpoint
                    );
                    return Ok(balance);
                }
                Err(e) => warn!("Failed endpoint {}: {}", endpoint, e),
            }
        }
        Err(FetchError::AllEndpointsExhausted {
            chain: token.chain_name.clone(),
        })
    }

    /// The first endpoint with a good balance response owns the snapshot. A
    /// failed delegations call on it yields no delegations, not a failover.
    async fn fetch_snapshot(
        &self,
        endpoint: &str,
        address: &str,
        token: &TokenConfig,
    ) -> Result<WalletBalance, FetchError> {
        let available = self.fetch_available(endpoint, address, token).await?;
        let delegations = match self.fetch_delegations(endpoint, address, token).await {
            Ok(delegations) => delegations,
            Err(e) => {
                warn!("{}: Delegations unavailable from {}: {}", address, endpoint, e);
                Vec::new()
            }
        };
        Ok(WalletBalance::new(
            address,
            &token.chain_name,
            &token.symbol,
            available,
            delegations,
        ))
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", endpoint, path);
        let body = self.client.get_json(&url).await?;
        serde_json::from_value(body).map_err(|e| FetchError::Endpoint {
            endpoint: url,
            reason: format!("malformed response: {}", e),
        })
    }

    async fn fetch_available(
        &self,
        endpoint: &str,
        address: &str,
        token: &TokenConfig,
    ) -> Result<f64, FetchError> {
        let response: BalancesResponse = self
            .get(endpoint, &format!("/cosmos/bank/v1beta1/balances/{}", address))
            .await?;
        let Some(coin) = response
            .balances
            .iter()
            .find(|c| is_native_denom(&c.denom, &token.symbol))
        else {
            return Ok(0.0);
        };
        scale_amount(&coin.amount, token.decimals).ok_or_else(|| FetchError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unparseable amount {:?} for {}", coin.amount, coin.denom),
        })
    }

    async fn fetch_delegations(
        &self,
        endpoint: &str,
        address: &str,
        token: &TokenConfig,
    ) -> Result<Vec<DelegationInfo>, FetchError> {
        let response: DelegationsResponse = self
            .get(endpoint, &format!("/cosmos/staking/v1beta1/delegations/{}", address))
            .await?;

        let staked: Vec<(String, f64)> = response
            .delegation_responses
            .into_iter()
            .filter_map(|entry| {
                let validator = entry.delegation.validator_address;
                match scale_amount(&entry.balance.amount, token.decimals) {
                    Some(amount) if amount > 0.0 => Some((validator, amount)),
                    Some(_) => None,
                    None => {
                        warn!(
                            "Skipping delegation to {} with amount {:?}",
                            validator, entry.balance.amount
                        );
                        None
                    }
                }
            })
            .collect();

        let names = join_all(
            staked
                .iter()
                .map(|(validator, _)| self.validator_name(endpoint, validator)),
        )
        .await;

        Ok(staked
            .into_iter()
            .zip(names)
            .map(|((validator_address, amount), name)| DelegationInfo {
                validator_name: name.unwrap_or_else(|| short_address(&validator_address)),
                validator_address,
                amount,
                token_symbol: token.symbol.clone(),
            })
            .collect())
    }

    /// Best effort; any failure falls back to the caller's default.
    async fn validator_name(&self, endpoint: &str, validator: &str) -> Option<String> {
        let response: ValidatorResponse = self
            .get(endpoint, &format!("/cosmos/staking/v1beta1/validators/{}", validator))
            .await
            .ok()?;
        let moniker = response.validator.description.moniker.trim().to_string();
        (!moniker.is_empty()).then_some(moniker)
    }
}
