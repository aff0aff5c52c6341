use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    address::Address,
    error::{Classify, ErrorKind},
    escrow::{CallContext, EscrowError, EscrowLedger},
    registry::{PropertyRegistry, RegistryError, TokenId},
    tx::{serde_digest, Call, SignedTransaction, Signer, Transaction, TxError},
    units::{serde_base_units, Amount},
};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error("nonce mismatch for {account}: expected {expected}, got {got}")]
    BadNonce {
        account: Address,
        expected: u64,
        got: u64,
    },
    #[error("insufficient funds in account {account}: need {needed}, have {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("balance overflow in account {account}")]
    BalanceOverflow { account: Address },
    #[error("{call} does not accept value")]
    NonPayable { call: &'static str },
    #[error("no property registry at {0}")]
    UnknownRegistry(Address),
    #[error("no escrow at {0}")]
    UnknownEscrow(Address),
}

impl Classify for ChainError {
    fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Tx(err) => err.kind(),
            ChainError::Registry(err) => err.kind(),
            ChainError::Escrow(err) => err.kind(),
            ChainError::BadNonce { .. }
            | ChainError::UnknownRegistry(_)
            | ChainError::UnknownEscrow(_) => ErrorKind::Precursor,
            ChainError::InsufficientFunds { .. }
            | ChainError::BalanceOverflow { .. }
            | ChainError::NonPayable { .. } => ErrorKind::Value,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Account {
    #[serde(with = "serde_base_units")]
    pub balance: Amount,
    pub nonce: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    PropertyRegistry,
    Escrow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Deployed {
        address: Address,
        kind: ContractKind,
        deployer: Address,
    },
    ValueTransfer {
        from: Address,
        to: Address,
        #[serde(with = "serde_base_units")]
        amount: Amount,
    },
    Transfer {
        registry: Address,
        from: Address,
        to: Address,
        token_id: TokenId,
    },
    Approval {
        registry: Address,
        owner: Address,
        approved: Address,
        token_id: TokenId,
    },
    Listed {
        escrow: Address,
        token_id: TokenId,
        buyer: Address,
        #[serde(with = "serde_base_units")]
        purchase_price: Amount,
        #[serde(with = "serde_base_units")]
        escrow_amount: Amount,
    },
    EarnestDeposited {
        escrow: Address,
        token_id: TokenId,
        from: Address,
        #[serde(with = "serde_base_units")]
        amount: Amount,
    },
    InspectionUpdated {
        escrow: Address,
        token_id: TokenId,
        passed: bool,
    },
}

/// Outcome of a committed transaction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    #[serde(with = "serde_digest")]
    pub tx_hash: [u8; 32],
    pub height: u64,
    pub caller: Address,
    /// Contract address for deployments.
    pub created: Option<Address>,
    /// Token id for mints.
    pub minted: Option<TokenId>,
    pub events: Vec<LedgerEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub height: u64,
    pub accounts: BTreeMap<Address, Account>,
    pub registries: BTreeMap<Address, PropertyRegistry>,
    pub escrows: BTreeMap<Address, EscrowLedger>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "serde_digest")]
    pub state_root: [u8; 32],
}

#[derive(Clone, Debug, Default)]
struct WorldState {
    accounts: BTreeMap<Address, Account>,
    registries: BTreeMap<Address, PropertyRegistry>,
    escrows: BTreeMap<Address, EscrowLedger>,
}

#[derive(Default)]
struct Outcome {
    created: Option<Address>,
    minted: Option<TokenId>,
    events: Vec<LedgerEvent>,
}

/// In-process ledger: accounts, deployed contracts and the committed history.
///
/// Transactions execute one at a time against a scratch copy of the state;
/// the copy replaces the live state only when every step succeeded, so a
/// rejected transaction leaves balances, nonces, tokens and listings as they
/// were.
#[derive(Debug, Default)]
pub struct Chain {
    state: WorldState,
    height: u64,
    receipts: Vec<Receipt>,
    events: Vec<LedgerEvent>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_genesis(
        allocations: impl IntoIterator<Item = (Address, Amount)>,
    ) -> Result<Self, ChainError> {
        let mut chain = Self::new();
        for (account, amount) in allocations {
            chain.fund(account, amount)?;
        }
        Ok(chain)
    }

    /// Genesis credit, outside of any transaction.
    pub fn fund(&mut self, account: Address, amount: Amount) -> Result<(), ChainError> {
        let entry = self.state.accounts.entry(account).or_default();
        entry.balance = entry
            .balance
            .checked_add(amount)
            .ok_or(ChainError::BalanceOverflow { account })?;
        Ok(())
    }

    pub fn submit(&mut self, signed: &SignedTransaction) -> Result<Receipt, ChainError> {
        let mut scratch = self.state.clone();
        let executed = signed.verify().map_err(ChainError::from).and_then(|caller| {
            let tx_hash = signed.hash()?;
            let outcome = apply(&mut scratch, caller, &signed.transaction)?;
            Ok((caller, tx_hash, outcome))
        });
        let (caller, tx_hash, outcome) = match executed {
            Ok(executed) => executed,
            Err(err) => {
                warn!(
                    public_key = %hex::encode(&signed.public_key),
                    nonce = signed.transaction.nonce,
                    kind = ?err.kind(),
                    error = %err,
                    "transaction rejected"
                );
                return Err(err);
            }
        };

        self.state = scratch;
        self.height += 1;
        self.events.extend(outcome.events.iter().cloned());
        let receipt = Receipt {
            tx_hash,
            height: self.height,
            caller,
            created: outcome.created,
            minted: outcome.minted,
            events: outcome.events,
        };
        info!(
            height = receipt.height,
            %caller,
            tx = %hex::encode(tx_hash),
            events = receipt.events.len(),
            "transaction committed"
        );
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Signs `call` with the signer's next nonce and submits it.
    pub fn send(
        &mut self,
        signer: &Signer,
        value: Amount,
        call: Call,
    ) -> Result<Receipt, ChainError> {
        let transaction = Transaction {
            nonce: self.nonce(&signer.address()),
            value,
            call,
        };
        let signed = signer.sign(transaction)?;
        self.submit(&signed)
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.state
            .accounts
            .get(account)
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    pub fn nonce(&self, account: &Address) -> u64 {
        self.state
            .accounts
            .get(account)
            .map(|a| a.nonce)
            .unwrap_or(0)
    }

    pub fn registry(&self, address: &Address) -> Result<&PropertyRegistry, ChainError> {
        self.state
            .registries
            .get(address)
            .ok_or(ChainError::UnknownRegistry(*address))
    }

    pub fn escrow(&self, address: &Address) -> Result<&EscrowLedger, ChainError> {
        self.state
            .escrows
            .get(address)
            .ok_or(ChainError::UnknownEscrow(*address))
    }

    /// Aggregate currency held by the escrow at `address`.
    pub fn get_balance(&self, escrow: &Address) -> Result<Amount, ChainError> {
        self.escrow(escrow)?;
        Ok(self.balance_of(escrow))
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            height: self.height,
            accounts: self.state.accounts.clone(),
            registries: self.state.registries.clone(),
            escrows: self.state.escrows.clone(),
            events: self.events.clone(),
            state_root: compute_state_root(&self.state),
        }
    }
}

fn apply(state: &mut WorldState, caller: Address, tx: &Transaction) -> Result<Outcome, ChainError> {
    let account = state.accounts.entry(caller).or_default();
    if account.nonce != tx.nonce {
        return Err(ChainError::BadNonce {
            account: caller,
            expected: account.nonce,
            got: tx.nonce,
        });
    }
    let deploy_nonce = account.nonce;
    account.nonce += 1;

    let value = tx.value;
    let mut outcome = Outcome::default();
    match &tx.call {
        Call::Transfer { to } => {
            move_value(&mut state.accounts, caller, *to, value)?;
            outcome.events.push(LedgerEvent::ValueTransfer {
                from: caller,
                to: *to,
                amount: value,
            });
        }
        Call::DeployRegistry { name, symbol } => {
            reject_value(value, "deployRegistry")?;
            let address = Address::for_contract(&caller, deploy_nonce);
            state
                .registries
                .insert(address, PropertyRegistry::new(address, name.clone(), symbol.clone()));
            outcome.created = Some(address);
            outcome.events.push(LedgerEvent::Deployed {
                address,
                kind: ContractKind::PropertyRegistry,
                deployer: caller,
            });
        }
        Call::Mint {
            registry,
            metadata_uri,
        } => {
            reject_value(value, "mint")?;
            let registry = state
                .registries
                .get_mut(registry)
                .ok_or(ChainError::UnknownRegistry(*registry))?;
            let (token_id, event) = registry.mint(caller, metadata_uri.clone());
            debug!(registry = %registry.address, token_id, "minted");
            outcome.minted = Some(token_id);
            outcome.events.push(event);
        }
        Call::Approve {
            registry,
            operator,
            token_id,
        } => {
            reject_value(value, "approve")?;
            let registry = state
                .registries
                .get_mut(registry)
                .ok_or(ChainError::UnknownRegistry(*registry))?;
            outcome
                .events
                .push(registry.approve(caller, *operator, *token_id)?);
        }
        Call::DeployEscrow {
            nft_address,
            seller,
            inspector,
            lender,
        } => {
            reject_value(value, "deployEscrow")?;
            if !state.registries.contains_key(nft_address) {
                return Err(ChainError::UnknownRegistry(*nft_address));
            }
            let address = Address::for_contract(&caller, deploy_nonce);
            state.escrows.insert(
                address,
                EscrowLedger::new(address, *nft_address, *seller, *inspector, *lender),
            );
            outcome.created = Some(address);
            outcome.events.push(LedgerEvent::Deployed {
                address,
                kind: ContractKind::Escrow,
                deployer: caller,
            });
        }
        Call::Escrow { escrow, call } => {
            let ledger = state
                .escrows
                .get_mut(escrow)
                .ok_or(ChainError::UnknownEscrow(*escrow))?;
            let nft_address = ledger.nft_address();
            let registry = state
                .registries
                .get_mut(&nft_address)
                .ok_or(ChainError::UnknownRegistry(nft_address))?;
            let ctx = CallContext { caller, value };
            let events = ledger.dispatch(&ctx, registry, call.clone())?;
            if value > 0 {
                move_value(&mut state.accounts, caller, *escrow, value)?;
            }
            outcome.events.extend(events);
        }
    }
    Ok(outcome)
}

fn reject_value(value: Amount, call: &'static str) -> Result<(), ChainError> {
    if value > 0 {
        return Err(ChainError::NonPayable { call });
    }
    Ok(())
}

fn move_value(
    accounts: &mut BTreeMap<Address, Account>,
    from: Address,
    to: Address,
    amount: Amount,
) -> Result<(), ChainError> {
    let sender = accounts.entry(from).or_default();
    if sender.balance < amount {
        return Err(ChainError::InsufficientFunds {
            account: from,
            needed: amount,
            available: sender.balance,
        });
    }
    sender.balance -= amount;
    let recipient = accounts.entry(to).or_default();
    recipient.balance = recipient
        .balance
        .checked_add(amount)
        .ok_or(ChainError::BalanceOverflow { account: to })?;
    Ok(())
}

fn compute_state_root(state: &WorldState) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (address, account) in &state.accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(address.as_bytes());
        hasher.update(account.balance.to_le_bytes());
        hasher.update(account.nonce.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (address, registry) in &state.registries {
        let mut hasher = Sha256::new();
        hasher.update(b"registry");
        hasher.update(address.as_bytes());
        hash_str(&mut hasher, &registry.name);
        hash_str(&mut hasher, &registry.symbol);
        hasher.update(registry.total_supply().to_le_bytes());
        leaves.push(hasher.finalize().into());
        for (token_id, token) in registry.tokens() {
            let mut hasher = Sha256::new();
            hasher.update(b"token");
            hasher.update(address.as_bytes());
            hasher.update(token_id.to_le_bytes());
            hasher.update(token.owner.as_bytes());
            hasher.update(token.approved.unwrap_or_default().as_bytes());
            hash_str(&mut hasher, &token.metadata_uri);
            leaves.push(hasher.finalize().into());
        }
    }
    for (address, escrow) in &state.escrows {
        let mut hasher = Sha256::new();
        hasher.update(b"escrow");
        hasher.update(address.as_bytes());
        hasher.update(escrow.nft_address().as_bytes());
        hasher.update(escrow.seller().as_bytes());
        hasher.update(escrow.inspector().as_bytes());
        hasher.update(escrow.lender().as_bytes());
        leaves.push(hasher.finalize().into());
        for (token_id, listing) in escrow.listings() {
            let mut hasher = Sha256::new();
            hasher.update(b"listing");
            hasher.update(address.as_bytes());
            hasher.update(token_id.to_le_bytes());
            hasher.update(listing.buyer.as_bytes());
            hasher.update(listing.purchase_price.to_le_bytes());
            hasher.update(listing.escrow_amount.to_le_bytes());
            hasher.update([listing.inspection_passed as u8]);
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

/// Length-prefixed so adjacent strings cannot shift into each other.
fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"deed-escrow-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
