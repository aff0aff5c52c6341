use std::{fmt, str::FromStr};

use ed25519_dalek::VerifyingKey;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// 20-byte account or contract address, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Address owned by the holder of `key`: the last 20 bytes of its SHA-256.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(key.as_bytes());
        Self::truncate(hasher.finalize().into())
    }

    /// Address of the contract created by `deployer` at nonce `nonce`.
    pub fn for_contract(deployer: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"contract");
        hasher.update(deployer.0);
        hasher.update(nonce.to_le_bytes());
        Self::truncate(hasher.finalize().into())
    }

    fn truncate(digest: [u8; 32]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be 20 bytes, got {0}")]
    Length(usize),
    #[error("invalid address hex: {0}")]
    Hex(String),
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| AddressError::Hex(e.to_string()))?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        let addr = Address::for_contract(&Address::ZERO, 7);
        let text = addr.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 42);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn contract_addresses_depend_on_nonce() {
        let deployer = Address::from_bytes([9u8; 20]);
        assert_ne!(
            Address::for_contract(&deployer, 0),
            Address::for_contract(&deployer, 1)
        );
        assert!(!Address::for_contract(&deployer, 0).is_zero());
    }

    #[test]
    fn rejects_short_hex() {
        assert_eq!("0xabcd".parse::<Address>(), Err(AddressError::Length(2)));
        assert!(matches!("0xzz".parse::<Address>(), Err(AddressError::Hex(_))));
    }
}
