mod apr_query;
mod apr_record;
pub mod datetime_utils;
mod income;
mod token_config;
mod wallet_balance;

pub use apr_query::{AprOrigin, AprQueryResult, AprStatus};
pub use apr_record::{AprRecord, Freshness, FreshnessWindows};
pub use income::IncomeProjection;
pub use token_config::{TokenConfig, TokenRegistry};
pub use wallet_balance::{DelegationInfo, WalletBalance};
