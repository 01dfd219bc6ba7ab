pub mod error;
pub mod encoding;
pub mod config;
pub mod clock;
pub mod context;
pub mod account; // leaf: balances, allowances, roles
pub mod events;
pub mod supply;
pub mod transfer;
pub mod staking;
pub mod governance;
pub mod ledger;
pub mod api;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
