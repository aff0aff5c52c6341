use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    address::Address,
    chain::LedgerEvent,
    error::{Classify, ErrorKind},
};

pub type TokenId = u64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("token {token_id} was never minted")]
    UnknownToken { token_id: TokenId },
    #[error("{caller} is not the owner of token {token_id}")]
    NotOwner { caller: Address, token_id: TokenId },
    #[error("{caller} is neither owner nor approved operator of token {token_id}")]
    NotApproved { caller: Address, token_id: TokenId },
    #[error("token {token_id} is owned by {owner}, not {from}")]
    WrongSender {
        from: Address,
        owner: Address,
        token_id: TokenId,
    },
    #[error("approval to current owner of token {token_id}")]
    ApprovalToOwner { token_id: TokenId },
    #[error("transfer of token {token_id} to the zero address")]
    TransferToZero { token_id: TokenId },
}

impl Classify for RegistryError {
    fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotOwner { .. } | RegistryError::NotApproved { .. } => {
                ErrorKind::Authorization
            }
            RegistryError::UnknownToken { .. } | RegistryError::WrongSender { .. } => {
                ErrorKind::Precursor
            }
            RegistryError::ApprovalToOwner { .. } | RegistryError::TransferToZero { .. } => {
                ErrorKind::Value
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyToken {
    pub owner: Address,
    pub metadata_uri: String,
    pub approved: Option<Address>,
}

/// Unique property tokens: one owner each, one optional approved operator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyRegistry {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    last_token_id: TokenId,
    tokens: BTreeMap<TokenId, PropertyToken>,
}

impl PropertyRegistry {
    pub fn new(address: Address, name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            symbol: symbol.into(),
            last_token_id: 0,
            tokens: BTreeMap::new(),
        }
    }

    /// Mints the next token id to `caller`. Ids start at 1.
    pub fn mint(
        &mut self,
        caller: Address,
        metadata_uri: impl Into<String>,
    ) -> (TokenId, LedgerEvent) {
        self.last_token_id += 1;
        let token_id = self.last_token_id;
        self.tokens.insert(
            token_id,
            PropertyToken {
                owner: caller,
                metadata_uri: metadata_uri.into(),
                approved: None,
            },
        );
        let event = LedgerEvent::Transfer {
            registry: self.address,
            from: Address::ZERO,
            to: caller,
            token_id,
        };
        (token_id, event)
    }

    pub fn approve(
        &mut self,
        caller: Address,
        operator: Address,
        token_id: TokenId,
    ) -> Result<LedgerEvent, RegistryError> {
        let registry = self.address;
        let token = self.token_mut(token_id)?;
        if token.owner != caller {
            return Err(RegistryError::NotOwner { caller, token_id });
        }
        if operator == token.owner {
            return Err(RegistryError::ApprovalToOwner { token_id });
        }
        token.approved = Some(operator);
        Ok(LedgerEvent::Approval {
            registry,
            owner: caller,
            approved: operator,
            token_id,
        })
    }

    /// Moves `token_id` from `from` to `to` on behalf of `caller`, who must be
    /// the owner or the approved operator. Approval is cleared.
    pub fn transfer_from(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        token_id: TokenId,
    ) -> Result<LedgerEvent, RegistryError> {
        if !self.is_approved_or_owner(caller, token_id)? {
            return Err(RegistryError::NotApproved { caller, token_id });
        }
        let registry = self.address;
        let token = self.token_mut(token_id)?;
        if token.owner != from {
            return Err(RegistryError::WrongSender {
                from,
                owner: token.owner,
                token_id,
            });
        }
        if to.is_zero() {
            return Err(RegistryError::TransferToZero { token_id });
        }
        token.owner = to;
        token.approved = None;
        Ok(LedgerEvent::Transfer {
            registry,
            from,
            to,
            token_id,
        })
    }

    /// Capability query: may `spender` move `token_id` right now?
    pub fn is_approved_or_owner(
        &self,
        spender: Address,
        token_id: TokenId,
    ) -> Result<bool, RegistryError> {
        let token = self.token(token_id)?;
        Ok(token.owner == spender || token.approved == Some(spender))
    }

    pub fn owner_of(&self, token_id: TokenId) -> Result<Address, RegistryError> {
        Ok(self.token(token_id)?.owner)
    }

    pub fn token_uri(&self, token_id: TokenId) -> Result<&str, RegistryError> {
        Ok(self.token(token_id)?.metadata_uri.as_str())
    }

    pub fn get_approved(&self, token_id: TokenId) -> Result<Option<Address>, RegistryError> {
        Ok(self.token(token_id)?.approved)
    }

    pub fn balance_of(&self, owner: Address) -> u64 {
        self.tokens.values().filter(|t| t.owner == owner).count() as u64
    }

    pub fn total_supply(&self) -> u64 {
        self.last_token_id
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&TokenId, &PropertyToken)> {
        self.tokens.iter()
    }

    fn token(&self, token_id: TokenId) -> Result<&PropertyToken, RegistryError> {
        self.tokens
            .get(&token_id)
            .ok_or(RegistryError::UnknownToken { token_id })
    }

    fn token_mut(&mut self, token_id: TokenId) -> Result<&mut PropertyToken, RegistryError> {
        self.tokens
            .get_mut(&token_id)
            .ok_or(RegistryError::UnknownToken { token_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "ipfs://QmWAamZPKNo9VNhBzfE1udsaPASQES25i3wsrpov62zR3g/1.json";

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn registry() -> PropertyRegistry {
        PropertyRegistry::new(addr(0xee), "Real Estate", "REAL")
    }

    #[test]
    fn mint_assigns_monotonic_ids_to_caller() {
        let mut reg = registry();
        let (first, event) = reg.mint(addr(1), URI);
        let (second, _) = reg.mint(addr(2), "ipfs://two");
        assert_eq!((first, second), (1, 2));
        assert_eq!(reg.owner_of(1).unwrap(), addr(1));
        assert_eq!(reg.owner_of(2).unwrap(), addr(2));
        assert_eq!(reg.token_uri(1).unwrap(), URI);
        assert_eq!(reg.total_supply(), 2);
        assert_eq!(reg.balance_of(addr(1)), 1);
        match event {
            LedgerEvent::Transfer { from, to, token_id, .. } => {
                assert!(from.is_zero());
                assert_eq!(to, addr(1));
                assert_eq!(token_id, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn owner_of_unknown_token_fails() {
        let reg = registry();
        let err = reg.owner_of(42).unwrap_err();
        assert_eq!(err, RegistryError::UnknownToken { token_id: 42 });
        assert_eq!(err.kind(), ErrorKind::Precursor);
    }

    #[test]
    fn only_owner_may_approve() {
        let mut reg = registry();
        reg.mint(addr(1), URI);
        let err = reg.approve(addr(2), addr(3), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(reg.get_approved(1).unwrap(), None);

        reg.approve(addr(1), addr(3), 1).unwrap();
        assert_eq!(reg.get_approved(1).unwrap(), Some(addr(3)));
        assert!(reg.is_approved_or_owner(addr(3), 1).unwrap());
        assert!(!reg.is_approved_or_owner(addr(4), 1).unwrap());
    }

    #[test]
    fn approving_the_owner_is_rejected() {
        let mut reg = registry();
        reg.mint(addr(1), URI);
        let err = reg.approve(addr(1), addr(1), 1).unwrap_err();
        assert_eq!(err, RegistryError::ApprovalToOwner { token_id: 1 });
    }

    #[test]
    fn approved_operator_transfer_clears_approval() {
        let mut reg = registry();
        reg.mint(addr(1), URI);
        reg.approve(addr(1), addr(9), 1).unwrap();
        reg.transfer_from(addr(9), addr(1), addr(9), 1).unwrap();
        assert_eq!(reg.owner_of(1).unwrap(), addr(9));
        assert_eq!(reg.get_approved(1).unwrap(), None);
        assert_eq!(reg.balance_of(addr(1)), 0);
    }

    #[test]
    fn unapproved_transfer_fails_without_mutation() {
        let mut reg = registry();
        reg.mint(addr(1), URI);
        let err = reg.transfer_from(addr(9), addr(1), addr(9), 1).unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotApproved {
                caller: addr(9),
                token_id: 1
            }
        );
        assert_eq!(reg.owner_of(1).unwrap(), addr(1));
    }

    #[test]
    fn transfer_checks_sender_and_recipient() {
        let mut reg = registry();
        reg.mint(addr(1), URI);
        let err = reg.transfer_from(addr(1), addr(2), addr(3), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precursor);
        let err = reg
            .transfer_from(addr(1), addr(1), Address::ZERO, 1)
            .unwrap_err();
        assert_eq!(err, RegistryError::TransferToZero { token_id: 1 });
        assert_eq!(reg.owner_of(1).unwrap(), addr(1));
    }
}
