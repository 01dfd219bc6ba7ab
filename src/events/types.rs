use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::account::types::{Address, Amount, TokenId};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TokenRegistered,
    Mint,
    Burn,
    ForceBurn,
    Transfer,
    Approval,
    Freeze,
    Unfreeze,
    Paused,
    Unpaused,
    RoleGranted,
    RoleRevoked,
    SupplyCapChanged,
    RewardRateCapChanged,
    Stake,
    Compound,
    Unstake,
    EmergencyUnstake,
    ProposalCreated,
    VoteCast,
    ProposalResolved,
    ProposalExecuted,
}

impl EventKind {
    pub const ALL: [EventKind; 22] = [
        EventKind::TokenRegistered,
        EventKind::Mint,
        EventKind::Burn,
        EventKind::ForceBurn,
        EventKind::Transfer,
        EventKind::Approval,
        EventKind::Freeze,
        EventKind::Unfreeze,
        EventKind::Paused,
        EventKind::Unpaused,
        EventKind::RoleGranted,
        EventKind::RoleRevoked,
        EventKind::SupplyCapChanged,
        EventKind::RewardRateCapChanged,
        EventKind::Stake,
        EventKind::Compound,
        EventKind::Unstake,
        EventKind::EmergencyUnstake,
        EventKind::ProposalCreated,
        EventKind::VoteCast,
        EventKind::ProposalResolved,
        EventKind::ProposalExecuted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TokenRegistered => "token_registered",
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::ForceBurn => "force_burn",
            EventKind::Transfer => "transfer",
            EventKind::Approval => "approval",
            EventKind::Freeze => "freeze",
            EventKind::Unfreeze => "unfreeze",
            EventKind::Paused => "paused",
            EventKind::Unpaused => "unpaused",
            EventKind::RoleGranted => "role_granted",
            EventKind::RoleRevoked => "role_revoked",
            EventKind::SupplyCapChanged => "supply_cap_changed",
            EventKind::RewardRateCapChanged => "reward_rate_cap_changed",
            EventKind::Stake => "stake",
            EventKind::Compound => "compound",
            EventKind::Unstake => "unstake",
            EventKind::EmergencyUnstake => "emergency_unstake",
            EventKind::ProposalCreated => "proposal_created",
            EventKind::VoteCast => "vote_cast",
            EventKind::ProposalResolved => "proposal_resolved",
            EventKind::ProposalExecuted => "proposal_executed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidArgument(format!("unknown event kind '{}'", s)))
    }
}

/// One audited state change. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub token: TokenId,
    pub sequence: u64,
    pub kind: EventKind,
    pub actor: Address,
    pub counterparty: Option<Address>,
    #[serde(with = "crate::encoding::amount_opt")]
    pub amount: Option<Amount>,
    pub timestamp: DateTime<Utc>,
    /// Position id, proposal id, role name... whatever the kind refers to.
    pub reference: Option<String>,
}

impl Event {
    pub fn involves(&self, address: &str) -> bool {
        self.actor == address || self.counterparty.as_deref() == Some(address)
    }
}

/// Event contents before the log assigns sequence and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub kind: EventKind,
    pub actor: Address,
    pub counterparty: Option<Address>,
    pub amount: Option<Amount>,
    pub reference: Option<String>,
}

impl NewEvent {
    pub fn new(kind: EventKind, actor: &str) -> Self {
        Self {
            kind,
            actor: actor.to_string(),
            counterparty: None,
            amount: None,
            reference: None,
        }
    }

    pub fn counterparty(mut self, address: &str) -> Self {
        self.counterparty = Some(address.to_string());
        self
    }

    pub fn amount(mut self, amount: &Amount) -> Self {
        self.amount = Some(amount.clone());
        self
    }

    pub fn reference(mut self, reference: impl ToString) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub(crate) fn stamp(self, token: &str, timestamp: DateTime<Utc>) -> Event {
        Event {
            token: token.to_string(),
            sequence: 0,
            kind: self.kind,
            actor: self.actor,
            counterparty: self.counterparty,
            amount: self.amount,
            timestamp,
            reference: self.reference,
        }
    }
}
