//! JSON scenarios: named accounts plus an ordered list of signed calls.
//!
//! Names (accounts and labelled deployments) are resolved to addresses when a
//! step runs, so a scenario can refer to contracts it deploys earlier on.
//! Amounts are written in ether (`"0.02"`).

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    address::Address,
    chain::{Chain, ChainError},
    error::{Classify, ErrorKind},
    escrow::EscrowCall,
    registry::TokenId,
    tx::{Call, Signer, TxError},
    units::{serde_ether, Amount, ETHER},
};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("cannot read scenario {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("account {name}: {source}")]
    Signer {
        name: String,
        #[source]
        source: TxError,
    },
    #[error("name {0:?} is defined twice")]
    DuplicateName(String),
    #[error("accounts {first:?} and {second:?} share one key")]
    DuplicateAccount { first: String, second: String },
    #[error("genesis: {0}")]
    Genesis(#[source] ChainError),
    #[error("step {step}: label {label:?} on a step that deploys nothing")]
    MisplacedLabel { step: usize, label: String },
    #[error("step {step}: unknown name {name:?}")]
    UnknownName { step: usize, name: String },
    #[error("step {step}: sender {name:?} is not a scenario account")]
    UnknownSender { step: usize, name: String },
    #[error("step {step} failed: {source}")]
    UnexpectedFailure {
        step: usize,
        #[source]
        source: ChainError,
    },
    #[error("step {step} succeeded but a {expected:?} failure was expected")]
    UnexpectedSuccess { step: usize, expected: ErrorKind },
    #[error("step {step} failed with {actual:?} ({message}) but {expected:?} was expected")]
    WrongFailure {
        step: usize,
        expected: ErrorKind,
        actual: ErrorKind,
        message: String,
    },
}

fn default_balance() -> Amount {
    10_000 * ETHER
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSpec {
    pub name: String,
    /// Hex ed25519 secret; a fresh key is generated when absent.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_balance", with = "serde_ether")]
    pub balance: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    DeployRegistry {
        name: String,
        symbol: String,
    },
    Mint {
        registry: String,
        metadata_uri: String,
    },
    Approve {
        registry: String,
        operator: String,
        token_id: TokenId,
    },
    DeployEscrow {
        nft_address: String,
        seller: String,
        inspector: String,
        lender: String,
    },
    List {
        escrow: String,
        token_id: TokenId,
        buyer: String,
        #[serde(with = "serde_ether")]
        purchase_price: Amount,
        #[serde(with = "serde_ether")]
        escrow_amount: Amount,
    },
    DepositEarnest {
        escrow: String,
        token_id: TokenId,
    },
    UpdateInspectionStatus {
        escrow: String,
        token_id: TokenId,
        passed: bool,
    },
    Transfer {
        to: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::DeployRegistry { .. } => "deploy_registry",
            Action::Mint { .. } => "mint",
            Action::Approve { .. } => "approve",
            Action::DeployEscrow { .. } => "deploy_escrow",
            Action::List { .. } => "list",
            Action::DepositEarnest { .. } => "deposit_earnest",
            Action::UpdateInspectionStatus { .. } => "update_inspection_status",
            Action::Transfer { .. } => "transfer",
        }
    }

    fn deploys(&self) -> bool {
        matches!(self, Action::DeployRegistry { .. } | Action::DeployEscrow { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub from: String,
    #[serde(default, with = "serde_ether")]
    pub value: Amount,
    /// Name under which a deployed contract address is remembered.
    #[serde(default)]
    pub label: Option<String>,
    /// Failure class this step must be rejected with.
    #[serde(default)]
    pub expect: Option<ErrorKind>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub accounts: Vec<AccountSpec>,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Committed {
        height: u64,
        created: Option<Address>,
        minted: Option<TokenId>,
    },
    Rejected {
        kind: ErrorKind,
        error: String,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub from: String,
    pub action: &'static str,
    pub outcome: StepOutcome,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub chain: Chain,
    pub names: BTreeMap<String, Address>,
    pub steps: Vec<StepReport>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let bytes = fs::read(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        let mut signers = BTreeMap::new();
        let mut names = BTreeMap::new();
        let mut owners: BTreeMap<Address, &str> = BTreeMap::new();
        let mut genesis = Vec::with_capacity(self.accounts.len());
        for spec in &self.accounts {
            let signer = match &spec.secret_key {
                Some(sk) => Signer::from_secret_hex(sk).map_err(|source| ScenarioError::Signer {
                    name: spec.name.clone(),
                    source,
                })?,
                None => Signer::random(),
            };
            if names.insert(spec.name.clone(), signer.address()).is_some() {
                return Err(ScenarioError::DuplicateName(spec.name.clone()));
            }
            if let Some(first) = owners.insert(signer.address(), &spec.name) {
                return Err(ScenarioError::DuplicateAccount {
                    first: first.to_string(),
                    second: spec.name.clone(),
                });
            }
            debug!(name = %spec.name, address = %signer.address(), "account");
            genesis.push((signer.address(), spec.balance));
            signers.insert(spec.name.clone(), signer);
        }

        let mut chain = Chain::with_genesis(genesis).map_err(ScenarioError::Genesis)?;
        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let signer = signers
                .get(&step.from)
                .ok_or_else(|| ScenarioError::UnknownSender {
                    step: index,
                    name: step.from.clone(),
                })?;
            if let Some(label) = &step.label {
                if step.expect.is_some() || !step.action.deploys() {
                    return Err(ScenarioError::MisplacedLabel {
                        step: index,
                        label: label.clone(),
                    });
                }
            }
            let call = step.action.resolve(index, &names)?;
            let outcome = match (chain.send(signer, step.value, call), step.expect) {
                (Ok(receipt), None) => {
                    if let (Some(label), Some(created)) = (&step.label, receipt.created) {
                        if names.insert(label.clone(), created).is_some() {
                            return Err(ScenarioError::DuplicateName(label.clone()));
                        }
                    }
                    StepOutcome::Committed {
                        height: receipt.height,
                        created: receipt.created,
                        minted: receipt.minted,
                    }
                }
                (Ok(_), Some(expected)) => {
                    return Err(ScenarioError::UnexpectedSuccess {
                        step: index,
                        expected,
                    })
                }
                (Err(source), None) => {
                    return Err(ScenarioError::UnexpectedFailure {
                        step: index,
                        source,
                    })
                }
                (Err(err), Some(expected)) => {
                    if err.kind() != expected {
                        return Err(ScenarioError::WrongFailure {
                            step: index,
                            expected,
                            actual: err.kind(),
                            message: err.to_string(),
                        });
                    }
                    StepOutcome::Rejected {
                        kind: err.kind(),
                        error: err.to_string(),
                    }
                }
            };
            steps.push(StepReport {
                index,
                from: step.from.clone(),
                action: step.action.name(),
                outcome,
            });
        }
        info!(steps = steps.len(), height = chain.height(), "scenario complete");
        Ok(ScenarioReport {
            chain,
            names,
            steps,
        })
    }
}

impl Action {
    fn resolve(&self, step: usize, names: &BTreeMap<String, Address>) -> Result<Call, ScenarioError> {
        let lookup = |name: &str| -> Result<Address, ScenarioError> {
            if let Some(address) = names.get(name) {
                return Ok(*address);
            }
            name.parse().map_err(|_| ScenarioError::UnknownName {
                step,
                name: name.to_string(),
            })
        };
        let call = match self {
            Action::DeployRegistry { name, symbol } => Call::DeployRegistry {
                name: name.clone(),
                symbol: symbol.clone(),
            },
            Action::Mint {
                registry,
                metadata_uri,
            } => Call::Mint {
                registry: lookup(registry)?,
                metadata_uri: metadata_uri.clone(),
            },
            Action::Approve {
                registry,
                operator,
                token_id,
            } => Call::Approve {
                registry: lookup(registry)?,
                operator: lookup(operator)?,
                token_id: *token_id,
            },
            Action::DeployEscrow {
                nft_address,
                seller,
                inspector,
                lender,
            } => Call::DeployEscrow {
                nft_address: lookup(nft_address)?,
                seller: lookup(seller)?,
                inspector: lookup(inspector)?,
                lender: lookup(lender)?,
            },
            Action::List {
                escrow,
                token_id,
                buyer,
                purchase_price,
                escrow_amount,
            } => Call::Escrow {
                escrow: lookup(escrow)?,
                call: EscrowCall::List {
                    token_id: *token_id,
                    buyer: lookup(buyer)?,
                    purchase_price: *purchase_price,
                    escrow_amount: *escrow_amount,
                },
            },
            Action::DepositEarnest { escrow, token_id } => Call::Escrow {
                escrow: lookup(escrow)?,
                call: EscrowCall::DepositEarnest {
                    token_id: *token_id,
                },
            },
            Action::UpdateInspectionStatus {
                escrow,
                token_id,
                passed,
            } => Call::Escrow {
                escrow: lookup(escrow)?,
                call: EscrowCall::UpdateInspectionStatus {
                    token_id: *token_id,
                    passed: *passed,
                },
            },
            Action::Transfer { to } => Call::Transfer { to: lookup(to)? },
        };
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ether;

    const SETUP: &str = r#"{
        "accounts": [
            {"name": "buyer"},
            {"name": "seller"},
            {"name": "inspector"},
            {"name": "lender", "balance": "1"}
        ],
        "steps": [
            {"from": "seller", "action": "deploy_registry", "label": "realEstate",
             "name": "Real Estate", "symbol": "REAL"},
            {"from": "seller", "action": "mint", "registry": "realEstate",
             "metadata_uri": "ipfs://1.json"},
            {"from": "seller", "action": "deploy_escrow", "label": "escrow",
             "nft_address": "realEstate", "seller": "seller",
             "inspector": "inspector", "lender": "lender"},
            {"from": "seller", "action": "approve", "registry": "realEstate",
             "operator": "escrow", "token_id": 1},
            {"from": "buyer", "action": "list", "escrow": "escrow", "token_id": 1,
             "buyer": "buyer", "purchase_price": "0.02", "escrow_amount": "0.001",
             "expect": "authorization"},
            {"from": "seller", "action": "list", "escrow": "escrow", "token_id": 1,
             "buyer": "buyer", "purchase_price": "0.02", "escrow_amount": "0.001"},
            {"from": "buyer", "action": "deposit_earnest", "escrow": "escrow",
             "token_id": 1, "value": "0.001"}
        ]
    }"#;

    #[test]
    fn runs_listing_flow_and_resolves_labels() {
        let report = Scenario::from_json(SETUP).unwrap().run().unwrap();
        let escrow = report.names["escrow"];
        let registry = report.names["realEstate"];
        assert_eq!(report.steps.len(), 7);
        assert!(matches!(
            report.steps[4].outcome,
            StepOutcome::Rejected {
                kind: ErrorKind::Authorization,
                ..
            }
        ));
        assert_eq!(
            report.chain.registry(&registry).unwrap().owner_of(1).unwrap(),
            escrow
        );
        assert_eq!(
            report.chain.get_balance(&escrow).unwrap(),
            ether("0.001").unwrap()
        );
        assert_eq!(
            report.chain.balance_of(&report.names["lender"]),
            ether("1").unwrap()
        );
    }

    #[test]
    fn unexpected_success_aborts() {
        let json = r#"{
            "accounts": [{"name": "a"}, {"name": "b"}],
            "steps": [{"from": "a", "action": "transfer", "to": "b", "value": "1",
                       "expect": "value"}]
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::UnexpectedSuccess {
                step: 0,
                expected: ErrorKind::Value
            }
        ));
    }

    #[test]
    fn wrong_failure_kind_is_reported() {
        let json = r#"{
            "accounts": [{"name": "a", "balance": "0"}, {"name": "b"}],
            "steps": [{"from": "a", "action": "transfer", "to": "b", "value": "1",
                       "expect": "authorization"}]
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::WrongFailure {
                actual: ErrorKind::Value,
                ..
            }
        ));
    }

    #[test]
    fn unknown_names_and_senders_are_rejected() {
        let json = r#"{
            "accounts": [{"name": "a"}],
            "steps": [{"from": "a", "action": "transfer", "to": "nobody"}]
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownName { step: 0, .. }));

        let json = r#"{
            "accounts": [{"name": "a"}],
            "steps": [{"from": "ghost", "action": "transfer", "to": "a"}]
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownSender { step: 0, .. }));
    }

    #[test]
    fn literal_addresses_are_accepted() {
        let json = r#"{
            "accounts": [{"name": "a"}],
            "steps": [{"from": "a", "action": "transfer", "value": "2",
                       "to": "0x0101010101010101010101010101010101010101"}]
        }"#;
        let report = Scenario::from_json(json).unwrap().run().unwrap();
        let target = Address::from_bytes([1u8; 20]);
        assert_eq!(report.chain.balance_of(&target), 2 * ETHER);
    }

    #[test]
    fn duplicate_account_names_are_rejected() {
        let json = r#"{"accounts": [{"name": "a"}, {"name": "a"}], "steps": []}"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(err, ScenarioError::DuplicateName(_)));
    }

    #[test]
    fn accounts_sharing_a_key_are_rejected() {
        let json = r#"{
            "accounts": [
                {"name": "a", "balance": "1",
                 "secret_key": "0202020202020202020202020202020202020202020202020202020202020202"},
                {"name": "b", "balance": "1",
                 "secret_key": "0202020202020202020202020202020202020202020202020202020202020202"}
            ],
            "steps": []
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        match err {
            ScenarioError::DuplicateAccount { first, second } => {
                assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn labels_only_name_committed_deployments() {
        let json = r#"{
            "accounts": [{"name": "a"}, {"name": "b"}],
            "steps": [{"from": "a", "action": "transfer", "to": "b", "value": "1",
                       "label": "oops"}]
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(err, ScenarioError::MisplacedLabel { step: 0, .. }));

        let json = r#"{
            "accounts": [{"name": "a"}],
            "steps": [{"from": "a", "action": "deploy_escrow", "label": "escrow",
                       "nft_address": "0x0303030303030303030303030303030303030303",
                       "seller": "a", "inspector": "a", "lender": "a",
                       "expect": "precursor"}]
        }"#;
        let err = Scenario::from_json(json).unwrap().run().unwrap_err();
        assert!(matches!(err, ScenarioError::MisplacedLabel { step: 0, .. }));
    }
}
