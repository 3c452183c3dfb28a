use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationInfo {
    pub validator_address: String,
    pub validator_name: String,
    pub amount: f64,
    pub token_symbol: String,
}

/// Balance snapshot for one address on one chain, read from a single endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub address: String,
    pub chain: String,
    pub token_symbol: String,
    pub available_balance: f64,
    pub delegated_balance: f64,
    pub total_balance: f64,
    pub delegations: Vec<DelegationInfo>,
}

impl WalletBalance {
    pub fn new(
        address: &str,
        chain: &str,
        token_symbol: &str,
        available_balance: f64,
        delegations: Vec<DelegationInfo>,
    ) -> Self {
        let delegated_balance: f64 = delegations.iter().map(|d| d.amount).sum();
        Self {
            address: address.to_string(),
            chain: chain.to_string(),
            token_symbol: token_symbol.to_string(),
            available_balance,
            delegated_balance,
            total_balance: available_balance + delegated_balance,
            delegations,
        }
    }
}
