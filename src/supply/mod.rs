//! Supply Controller: per-token total/circulating/max supply, roles and pause state

pub mod token;
pub mod controller;

pub use controller::SupplyController;
pub use token::{SupplyAudit, SupplyView, TokenHandle, TokenState};
