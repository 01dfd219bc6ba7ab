//! Per-token roles and the authority set that grants them

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::types::Address;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Grants and revokes roles
    Admin,
    /// Issues new supply
    Minter,
    /// Pauses and unpauses the token
    Pauser,
    /// Freezes accounts and seizes funds
    Compliance,
    /// Opens proposals regardless of balance
    Governance,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Minter,
        Role::Pauser,
        Role::Compliance,
        Role::Governance,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::str::FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| LedgerError::InvalidArgument(format!("unknown role '{}'", s)))
    }
}

/// Who is invoking a privileged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller<'a> {
    /// An account, authorised through its roles
    Account(&'a str),
    /// An executed governance proposal, authorised by the vote itself
    Governance(u64),
}

impl<'a> From<&'a str> for Caller<'a> {
    fn from(address: &'a str) -> Self {
        Caller::Account(address)
    }
}

impl<'a> From<&'a String> for Caller<'a> {
    fn from(address: &'a String) -> Self {
        Caller::Account(address.as_str())
    }
}

impl Caller<'_> {
    /// Actor recorded in the event log.
    pub fn actor(&self) -> String {
        match self {
            Caller::Account(address) => address.to_string(),
            Caller::Governance(id) => format!("governance:{}", id),
        }
    }

    pub fn authorize(&self, authorities: &AuthoritySet, role: Role) -> LedgerResult<()> {
        match self {
            Caller::Account(address) => authorities.require(role, address),
            Caller::Governance(_) => Ok(()),
        }
    }
}

/// Maps roles to the addresses holding them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthoritySet {
    authorities: HashMap<Role, HashSet<Address>>,
}

impl AuthoritySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authority set where `admin` holds every role
    pub fn with_admin(admin: &str) -> Self {
        let mut set = Self::new();
        for role in Role::ALL {
            set.add(role, admin);
        }
        set
    }

    pub fn add(&mut self, role: Role, address: &str) {
        self.authorities
            .entry(role)
            .or_default()
            .insert(address.to_string());
    }

    pub fn remove(&mut self, role: Role, address: &str) {
        if let Some(set) = self.authorities.get_mut(&role) {
            set.remove(address);
        }
    }

    pub fn has_role(&self, role: Role, address: &str) -> bool {
        self.authorities
            .get(&role)
            .map(|set| set.contains(address))
            .unwrap_or(false)
    }

    pub fn require(&self, role: Role, address: &str) -> LedgerResult<()> {
        if self.has_role(role, address) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(format!(
                "{} does not hold the {} role",
                address, role
            )))
        }
    }

    pub fn holders(&self, role: Role) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .authorities
            .get(&role)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}
