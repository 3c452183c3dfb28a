use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::str::FromStr;

/// Minimal-denomination spellings that don't follow the `u<symbol>` rule.
const KNOWN_NATIVE_DENOMS: &[(&str, &str)] = &[
    ("atom", "uatom"),
    ("osmo", "uosmo"),
    ("tia", "utia"),
    ("juno", "ujuno"),
    ("huahua", "uhuahua"),
    ("dym", "adym"),
    ("saga", "usaga"),
    ("nls", "unls"),
];

pub fn is_native_denom(denom: &str, token_symbol: &str) -> bool {
    let symbol = token_symbol.to_lowercase();
    if denom == symbol || denom == format!("u{}", symbol) {
        return true;
    }
    KNOWN_NATIVE_DENOMS
        .iter()
        .any(|&(sym, known)| sym == symbol && known == denom)
}

/// Converts an integer amount in minimal units into whole tokens.
pub fn scale_amount(raw: &str, decimals: u32) -> Option<f64> {
    let cleaned = raw.trim().trim_matches('"');
    let amount = BigInt::from_str(cleaned).ok()?;
    let value = amount.to_f64()?;
    Some(value / 10f64.powi(decimals as i32))
}

/// Display fallback for validators whose moniker can't be fetched.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    let start = chars.len().saturating_sub(8);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_native_denoms_exactly() {
        assert!(is_native_denom("uatom", "ATOM"));
        assert!(is_native_denom("atom", "ATOM"));
        assert!(is_native_denom("adym", "DYM"));
        assert!(!is_native_denom("udym", "ATOM"));
        let ibc_atom = "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2";
        assert!(!is_native_denom(ibc_atom, "ATOM"));
        assert!(!is_native_denom("uatomx", "ATOM"));
    }

    #[test]
    fn scales_minimal_units() {
        assert_eq!(scale_amount("1500000", 6), Some(1.5));
        assert_eq!(scale_amount("\"2000000\"", 6), Some(2.0));
        assert_eq!(scale_amount("1000000000000000000", 18), Some(1.0));
        assert_eq!(scale_amount("12.5", 6), None);
        assert_eq!(scale_amount("", 6), None);
    }

    #[test]
    fn shortens_to_tail() {
        assert_eq!(short_address("cosmosvaloper1abcdefgh12345678"), "12345678");
        assert_eq!(short_address("abc"), "abc");
    }
}
