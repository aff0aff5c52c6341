//! Fixed-point money: one ether is 10^18 base units.

use crate::error::{Classify, ErrorKind};

pub type Amount = u128;

pub const DECIMALS: u32 = 18;
pub const ETHER: Amount = 1_000_000_000_000_000_000; // 1 ether = 1e18 base units

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount {0:?} has more than 18 fractional digits")]
    TooPrecise(String),
    #[error("amount {0:?} overflows u128 base units")]
    Overflow(String),
}

impl Classify for UnitsError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Value
    }
}

/// Parses a decimal ether string (`"0.02"`, `"10"`, `".5"`) into base units exactly.
pub fn parse_units(input: &str) -> Result<Amount, UnitsError> {
    let s = input.trim();
    if s.is_empty() || s == "." {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(UnitsError::InvalidDigit(s.to_string()));
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > DECIMALS as usize {
        return Err(UnitsError::TooPrecise(s.to_string()));
    }
    let overflow = || UnitsError::Overflow(s.to_string());

    let mut whole_units: Amount = 0;
    for b in whole.bytes() {
        whole_units = whole_units
            .checked_mul(10)
            .and_then(|v| v.checked_add(Amount::from(b - b'0')))
            .ok_or_else(overflow)?;
    }
    let mut frac_units: Amount = 0;
    for b in frac.bytes() {
        frac_units = frac_units * 10 + Amount::from(b - b'0');
    }
    frac_units *= 10u128.pow(DECIMALS - frac.len() as u32);

    whole_units
        .checked_mul(ETHER)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Renders base units as a decimal ether string without trailing zeros.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / ETHER;
    let frac = amount % ETHER;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:018}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Shorthand for `parse_units`, reads like `ether("0.001")` at call sites.
pub fn ether(value: &str) -> Result<Amount, UnitsError> {
    parse_units(value)
}

/// Serializes base-unit amounts as decimal strings so they survive JSON consumers
/// that cannot hold 128-bit integers.
pub(crate) mod serde_base_units {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.trim().parse::<Amount>().map_err(D::Error::custom)
    }
}

/// Same as `serde_base_units` but human-facing: values are ether decimals.
pub(crate) mod serde_ether {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::{format_units, parse_units, Amount};

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_units(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        parse_units(&encoded).map_err(D::Error::custom)
    }
}
