//! Property-token registry and role-gated real-estate escrow.
//!
//! * [`registry`] mints property tokens and handles owner approvals.
//! * [`escrow`] lists tokens for sale, takes custody of them and tracks
//!   earnest deposits and inspection status, gated by [`access`].
//! * [`chain`] executes signed [`tx`] transactions atomically against both.
//! * [`scenario`] drives a chain from a JSON description.

pub mod access;
pub mod address;
pub mod chain;
pub mod error;
pub mod escrow;
pub mod registry;
pub mod scenario;
pub mod tx;
pub mod units;

pub use address::Address;
pub use chain::{Chain, ChainError, LedgerEvent, Receipt};
pub use error::{Classify, ErrorKind};
pub use escrow::{EscrowCall, EscrowLedger};
pub use registry::{PropertyRegistry, TokenId};
pub use tx::{Call, Signer};
pub use units::{ether, Amount};
