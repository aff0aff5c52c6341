//! Which role may invoke which escrow operation.
//!
//! Every mutating escrow operation has exactly one permitted role. The table
//! is consulted once, at the escrow dispatch boundary, before any operation
//! body runs.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Seller,
    /// Per-listing: the buyer recorded when the token was listed.
    Buyer,
    Inspector,
    Lender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Seller => "seller",
            Role::Buyer => "buyer",
            Role::Inspector => "inspector",
            Role::Lender => "lender",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    DepositEarnest,
    UpdateInspectionStatus,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::List => "list",
            Operation::DepositEarnest => "depositEarnest",
            Operation::UpdateInspectionStatus => "updateInspectionStatus",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rule {
    pub role: Role,
    pub payable: bool,
}

impl Operation {
    pub const ALL: [Operation; 3] = [
        Operation::List,
        Operation::DepositEarnest,
        Operation::UpdateInspectionStatus,
    ];

    /// Policy table: the single role allowed to invoke `self`.
    pub const fn rule(self) -> Rule {
        match self {
            Operation::List => Rule {
                role: Role::Seller,
                payable: false,
            },
            Operation::DepositEarnest => Rule {
                role: Role::Buyer,
                payable: true,
            },
            Operation::UpdateInspectionStatus => Rule {
                role: Role::Inspector,
                payable: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_deposit_is_payable() {
        assert!(Operation::DepositEarnest.rule().payable);
        assert!(!Operation::List.rule().payable);
        assert!(!Operation::UpdateInspectionStatus.rule().payable);
    }

    #[test]
    fn roles_match_operations() {
        assert_eq!(Operation::List.rule().role, Role::Seller);
        assert_eq!(Operation::DepositEarnest.rule().role, Role::Buyer);
        assert_eq!(Operation::UpdateInspectionStatus.rule().role, Role::Inspector);
    }

    #[test]
    fn lender_holds_no_mutation_rights() {
        assert!(Operation::ALL.iter().all(|op| op.rule().role != Role::Lender));
    }
}
