use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    access::{Operation, Role},
    address::Address,
    chain::LedgerEvent,
    error::{Classify, ErrorKind},
    registry::{PropertyRegistry, RegistryError, TokenId},
    units::{serde_base_units, Amount},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EscrowError {
    #[error("{operation} requires the {role}, called by {caller}")]
    Unauthorized {
        operation: Operation,
        role: Role,
        caller: Address,
    },
    #[error("token {token_id} is not listed")]
    NotListed { token_id: TokenId },
    #[error("escrow holds no transfer approval for token {token_id}")]
    CustodyNotApproved { token_id: TokenId },
    #[error("escrow is bound to registry {expected}, got {got}")]
    WrongRegistry { expected: Address, got: Address },
    #[error("{operation} does not accept value")]
    NonPayable { operation: Operation },
    #[error("buyer for token {token_id} is the zero address")]
    ZeroBuyer { token_id: TokenId },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Classify for EscrowError {
    fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::Unauthorized { .. } => ErrorKind::Authorization,
            EscrowError::NotListed { .. }
            | EscrowError::CustodyNotApproved { .. }
            | EscrowError::WrongRegistry { .. } => ErrorKind::Precursor,
            EscrowError::NonPayable { .. } | EscrowError::ZeroBuyer { .. } => ErrorKind::Value,
            EscrowError::Registry(err) => err.kind(),
        }
    }
}

/// Sale terms and inspection state for one listed token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    pub buyer: Address,
    #[serde(with = "serde_base_units")]
    pub purchase_price: Amount,
    #[serde(with = "serde_base_units")]
    pub escrow_amount: Amount,
    pub inspection_passed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EscrowCall {
    List {
        token_id: TokenId,
        buyer: Address,
        #[serde(with = "serde_base_units")]
        purchase_price: Amount,
        #[serde(with = "serde_base_units")]
        escrow_amount: Amount,
    },
    DepositEarnest {
        token_id: TokenId,
    },
    UpdateInspectionStatus {
        token_id: TokenId,
        passed: bool,
    },
}

impl EscrowCall {
    pub fn operation(&self) -> Operation {
        match self {
            EscrowCall::List { .. } => Operation::List,
            EscrowCall::DepositEarnest { .. } => Operation::DepositEarnest,
            EscrowCall::UpdateInspectionStatus { .. } => Operation::UpdateInspectionStatus,
        }
    }

    pub fn token_id(&self) -> TokenId {
        match self {
            EscrowCall::List { token_id, .. }
            | EscrowCall::DepositEarnest { token_id }
            | EscrowCall::UpdateInspectionStatus { token_id, .. } => *token_id,
        }
    }
}

/// Caller identity and attached value of the transaction being executed.
#[derive(Clone, Copy, Debug)]
pub struct CallContext {
    pub caller: Address,
    pub value: Amount,
}

/// One escrow instance: fixed roles, many listings keyed by token id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowLedger {
    pub address: Address,
    nft_address: Address,
    seller: Address,
    inspector: Address,
    lender: Address,
    listings: BTreeMap<TokenId, Listing>,
}

impl EscrowLedger {
    pub fn new(
        address: Address,
        nft_address: Address,
        seller: Address,
        inspector: Address,
        lender: Address,
    ) -> Self {
        Self {
            address,
            nft_address,
            seller,
            inspector,
            lender,
            listings: BTreeMap::new(),
        }
    }

    /// Single entry point for mutations. Applies the policy table before any
    /// operation body runs. The attached value itself is moved by the caller
    /// of `dispatch` (the chain), this only decides whether it is allowed.
    pub fn dispatch(
        &mut self,
        ctx: &CallContext,
        registry: &mut PropertyRegistry,
        call: EscrowCall,
    ) -> Result<Vec<LedgerEvent>, EscrowError> {
        let operation = call.operation();
        let rule = operation.rule();
        if !rule.payable && ctx.value > 0 {
            return Err(EscrowError::NonPayable { operation });
        }
        let holder = self.role_holder(rule.role, call.token_id())?;
        if holder != ctx.caller {
            return Err(EscrowError::Unauthorized {
                operation,
                role: rule.role,
                caller: ctx.caller,
            });
        }
        debug!(escrow = %self.address, %operation, caller = %ctx.caller, "authorized");

        match call {
            EscrowCall::List {
                token_id,
                buyer,
                purchase_price,
                escrow_amount,
            } => self.list(registry, token_id, buyer, purchase_price, escrow_amount),
            EscrowCall::DepositEarnest { token_id } => Ok(vec![LedgerEvent::EarnestDeposited {
                escrow: self.address,
                token_id,
                from: ctx.caller,
                amount: ctx.value,
            }]),
            EscrowCall::UpdateInspectionStatus { token_id, passed } => {
                self.update_inspection_status(token_id, passed)
            }
        }
    }

    fn role_holder(&self, role: Role, token_id: TokenId) -> Result<Address, EscrowError> {
        match role {
            Role::Seller => Ok(self.seller),
            Role::Inspector => Ok(self.inspector),
            Role::Lender => Ok(self.lender),
            Role::Buyer => self
                .listings
                .get(&token_id)
                .map(|listing| listing.buyer)
                .ok_or(EscrowError::NotListed { token_id }),
        }
    }

    fn list(
        &mut self,
        registry: &mut PropertyRegistry,
        token_id: TokenId,
        buyer: Address,
        purchase_price: Amount,
        escrow_amount: Amount,
    ) -> Result<Vec<LedgerEvent>, EscrowError> {
        if registry.address != self.nft_address {
            return Err(EscrowError::WrongRegistry {
                expected: self.nft_address,
                got: registry.address,
            });
        }
        if buyer.is_zero() {
            return Err(EscrowError::ZeroBuyer { token_id });
        }
        // phase 1: the seller must already have approved us on the registry
        if !registry.is_approved_or_owner(self.address, token_id)? {
            return Err(EscrowError::CustodyNotApproved { token_id });
        }
        // phase 2: pull the token into custody
        let transfer = registry.transfer_from(self.address, self.seller, self.address, token_id)?;

        self.listings.insert(
            token_id,
            Listing {
                buyer,
                purchase_price,
                escrow_amount,
                inspection_passed: false,
            },
        );
        Ok(vec![
            transfer,
            LedgerEvent::Listed {
                escrow: self.address,
                token_id,
                buyer,
                purchase_price,
                escrow_amount,
            },
        ])
    }

    fn update_inspection_status(
        &mut self,
        token_id: TokenId,
        passed: bool,
    ) -> Result<Vec<LedgerEvent>, EscrowError> {
        let listing = self
            .listings
            .get_mut(&token_id)
            .ok_or(EscrowError::NotListed { token_id })?;
        listing.inspection_passed = passed;
        Ok(vec![LedgerEvent::InspectionUpdated {
            escrow: self.address,
            token_id,
            passed,
        }])
    }

    pub fn nft_address(&self) -> Address {
        self.nft_address
    }

    pub fn seller(&self) -> Address {
        self.seller
    }

    pub fn inspector(&self) -> Address {
        self.inspector
    }

    pub fn lender(&self) -> Address {
        self.lender
    }

    pub fn listing(&self, token_id: TokenId) -> Option<&Listing> {
        self.listings.get(&token_id)
    }

    pub fn listings(&self) -> impl Iterator<Item = (&TokenId, &Listing)> {
        self.listings.iter()
    }

    // Unlisted ids read as defaults.

    pub fn is_listed(&self, token_id: TokenId) -> bool {
        self.listings.contains_key(&token_id)
    }

    pub fn buyer(&self, token_id: TokenId) -> Address {
        self.listing(token_id).map(|l| l.buyer).unwrap_or_default()
    }

    pub fn purchase_price(&self, token_id: TokenId) -> Amount {
        self.listing(token_id).map(|l| l.purchase_price).unwrap_or(0)
    }

    pub fn escrow_amount(&self, token_id: TokenId) -> Amount {
        self.listing(token_id).map(|l| l.escrow_amount).unwrap_or(0)
    }

    pub fn inspection_passed(&self, token_id: TokenId) -> bool {
        self.listing(token_id)
            .map(|l| l.inspection_passed)
            .unwrap_or(false)
    }
}
