//! Wire representation of token amounts.
//!
//! Amounts are arbitrary-precision unsigned integers. Across the wire and in
//! persisted records they are carried as base-10 strings so no precision is
//! lost in JSON consumers.

use num_bigint::BigUint;
use num_traits::Num;

use crate::error::{LedgerError, LedgerResult};

/// Parse a decimal string (digits only, optional `_` separators) into an amount.
pub fn parse_amount(input: &str) -> LedgerResult<BigUint> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::InvalidArgument(format!(
            "amount must be a non-negative decimal integer, got '{}'",
            input
        )));
    }
    BigUint::from_str_radix(&cleaned, 10)
        .map_err(|e| LedgerError::InvalidArgument(format!("amount '{}': {}", input, e)))
}

pub fn format_amount(amount: &BigUint) -> String {
    amount.to_str_radix(10)
}

/// `#[serde(with = "crate::encoding::amount")]`
pub mod amount {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_amount(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_amount(&s).map_err(D::Error::custom)
    }
}

/// `#[serde(with = "crate::encoding::amount_opt")]`
pub mod amount_opt {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<BigUint>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&super::format_amount(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<BigUint>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| super::parse_amount(&s).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Holding {
        #[serde(with = "amount")]
        balance: BigUint,
        #[serde(with = "amount_opt", default)]
        cap: Option<BigUint>,
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1_000_000").unwrap(), BigUint::from(1_000_000u32));
        assert_eq!(parse_amount(" 42 ").unwrap(), BigUint::from(42u32));
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_amounts_beyond_u128_survive_json() {
        let big = parse_amount("340282366920938463463374607431768211456000").unwrap();
        let h = Holding { balance: big.clone(), cap: None };
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, r#"{"balance":"340282366920938463463374607431768211456000","cap":null}"#);
        let back: Holding = serde_json::from_str(&json).unwrap();
        assert_eq!(back.balance, big);
    }
}
