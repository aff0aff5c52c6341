use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    address::Address,
    error::{Classify, ErrorKind},
    escrow::EscrowCall,
    registry::TokenId,
    units::{serde_base_units, Amount},
};

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("malformed public key")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match transaction")]
    InvalidSignature,
    #[error("invalid secret key: {0}")]
    SecretKey(String),
    #[error("transaction encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl Classify for TxError {
    fn kind(&self) -> ErrorKind {
        match self {
            TxError::InvalidSignature => ErrorKind::Authorization,
            TxError::MalformedKey
            | TxError::MalformedSignature
            | TxError::SecretKey(_)
            | TxError::Encoding(_) => ErrorKind::Value,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    DeployRegistry {
        name: String,
        symbol: String,
    },
    Mint {
        registry: Address,
        metadata_uri: String,
    },
    Approve {
        registry: Address,
        operator: Address,
        token_id: TokenId,
    },
    DeployEscrow {
        nft_address: Address,
        seller: Address,
        inspector: Address,
        lender: Address,
    },
    Escrow {
        escrow: Address,
        call: EscrowCall,
    },
    /// Plain value transfer between accounts.
    Transfer {
        to: Address,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    #[serde(with = "serde_base_units")]
    pub value: Amount,
    pub call: Call,
}

impl Transaction {
    pub fn digest(&self) -> Result<[u8; 32], TxError> {
        let mut hasher = Sha256::new();
        hasher.update(b"deed-escrow-tx");
        hasher.update(serde_json::to_vec(self)?);
        Ok(hasher.finalize().into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Checks the signature and returns the caller address it authenticates.
    pub fn verify(&self) -> Result<Address, TxError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| TxError::MalformedKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| TxError::MalformedKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| TxError::MalformedSignature)?;
        let digest = self.transaction.digest()?;
        key.verify_strict(&digest, &signature)
            .map_err(|_| TxError::InvalidSignature)?;
        Ok(Address::from_verifying_key(&key))
    }

    /// Identifier of this signed transaction: digest bound to the signer key.
    pub fn hash(&self) -> Result<[u8; 32], TxError> {
        let mut hasher = Sha256::new();
        hasher.update(self.transaction.digest()?);
        hasher.update(&self.public_key);
        Ok(hasher.finalize().into())
    }
}

/// An ed25519 key that signs transactions for one address.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    pub fn random() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_hex(sk_hex: &str) -> Result<Self, TxError> {
        let bytes = hex::decode(sk_hex.trim()).map_err(|e| TxError::SecretKey(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TxError::SecretKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self {
            key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_verifying_key(&self.key.verifying_key())
    }

    pub fn sign(&self, transaction: Transaction) -> Result<SignedTransaction, TxError> {
        let digest = transaction.digest()?;
        let signature = self.key.sign(&digest);
        Ok(SignedTransaction {
            transaction,
            public_key: self.key.verifying_key().as_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        })
    }
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

pub(crate) mod serde_digest {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom("digest must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            nonce: 3,
            value: 1_000,
            call: Call::Escrow {
                escrow: Address::from_bytes([5u8; 20]),
                call: EscrowCall::DepositEarnest { token_id: 1 },
            },
        }
    }

    #[test]
    fn signed_transaction_recovers_signer_address() {
        let signer = Signer::random();
        let signed = signer.sign(sample()).unwrap();
        assert_eq!(signed.verify().unwrap(), signer.address());
    }

    #[test]
    fn tampered_transaction_is_rejected() {
        let signer = Signer::random();
        let mut signed = signer.sign(sample()).unwrap();
        signed.transaction.value = 2_000;
        let err = signed.verify().unwrap_err();
        assert!(matches!(err, TxError::InvalidSignature));
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn swapped_public_key_is_rejected() {
        let signer = Signer::random();
        let other = Signer::random();
        let mut signed = signer.sign(sample()).unwrap();
        signed.public_key = hex::decode(other.public_hex()).unwrap();
        assert!(matches!(signed.verify(), Err(TxError::InvalidSignature)));
        signed.public_key.truncate(4);
        assert!(matches!(signed.verify(), Err(TxError::MalformedKey)));
    }

    #[test]
    fn secret_hex_round_trips() {
        let signer = Signer::random();
        let restored = Signer::from_secret_hex(&signer.secret_hex()).unwrap();
        assert_eq!(restored.address(), signer.address());
        assert!(Signer::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn json_encoding_keeps_amounts_as_strings() {
        let signer = Signer::random();
        let signed = signer.sign(sample()).unwrap();
        let json = serde_json::to_value(&signed).unwrap();
        assert_eq!(json["transaction"]["value"], "1000");
        assert_eq!(json["transaction"]["call"]["type"], "escrow");
        assert_eq!(json["transaction"]["call"]["call"]["op"], "deposit_earnest");
        let back: SignedTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back.verify().unwrap(), signer.address());
    }
}
