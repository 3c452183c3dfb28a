use crate::models::{AprQueryResult, WalletBalance};
use serde::Serialize;

/// Projected staking income in token units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomeProjection {
    pub token_symbol: String,
    pub apr: f64,
    pub yearly: f64,
    pub monthly: f64,
    pub daily: f64,
}

impl IncomeProjection {
    /// Returns `None` when the APR is unavailable: such balances are excluded
    /// from projections rather than projected at zero yield.
    pub fn project(balance: &WalletBalance, apr: &AprQueryResult) -> Option<Self> {
        if !apr.is_usable() {
            return None;
        }
        let yearly = balance.delegated_balance * apr.value / 100.0;
        Some(Self {
            token_symbol: balance.token_symbol.clone(),
            apr: apr.value,
            yearly,
            monthly: yearly / 12.0,
            daily: yearly / 365.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AprOrigin, AprStatus, DelegationInfo};

    fn balance(delegated: f64) -> WalletBalance {
        WalletBalance::new(
            "cosmos1abc",
            "cosmoshub",
            "ATOM",
            5.0,
            vec![DelegationInfo {
                validator_address: "cosmosvaloper1xyz".to_string(),
                validator_name: "Validator".to_string(),
                amount: delegated,
                token_symbol: "ATOM".to_string(),
            }],
        )
    }

    #[test]
    fn projects_from_delegated_balance_only() {
        let apr = AprQueryResult {
            symbol: "ATOM".to_string(),
            value: 20.0,
            status: AprStatus::Stale,
            source: AprOrigin::Cache,
        };
        let projection = IncomeProjection::project(&balance(365.0), &apr).unwrap();
        assert!((projection.yearly - 73.0).abs() < 1e-9);
        assert!((projection.daily - 0.2).abs() < 1e-9);
        assert!((projection.monthly - 73.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn unavailable_apr_is_excluded() {
        let apr = AprQueryResult::unavailable("ATOM");
        assert!(IncomeProjection::project(&balance(100.0), &apr).is_none());
    }

    #[test]
    fn legitimately_zero_apr_still_projects() {
        let apr = AprQueryResult {
            symbol: "ATOM".to_string(),
            value: 0.0,
            status: AprStatus::Fresh,
            source: AprOrigin::Scrape,
        };
        let projection = IncomeProjection::project(&balance(100.0), &apr).unwrap();
        assert_eq!(projection.yearly, 0.0);
    }
}
