//! Account Store
//!
//! Balances, allowances and freeze flags for every (token, address) pair,
//! plus the per-token role model used to authorise privileged operations.

pub mod types;
pub mod store;
pub mod auth;

pub use types::{AccountKey, AccountRow, AccountSnapshot, Address, Amount, TokenId};
pub use store::{AccountStore, LockedRows, RowSet};
pub use auth::{AuthoritySet, Caller, Role};
