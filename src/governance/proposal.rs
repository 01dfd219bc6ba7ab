use chrono::{DateTime, Utc};
use num_traits::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::account::auth::Role;
use crate::account::types::{Address, Amount, TokenId};
use crate::config::MajorityRule;
use crate::error::{LedgerError, LedgerResult};
use crate::staking::rewards::rate_parts;

/// Supply cap carried by [`GovernanceAction::SetMaxSupply`]; `None` lifts the cap.
/// Encoded as a decimal string, or `null` when uncapped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupplyCap(pub Option<Amount>);

impl Serialize for SupplyCap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        crate::encoding::amount_opt::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for SupplyCap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::encoding::amount_opt::deserialize(deserializer).map(SupplyCap)
    }
}

/// Parameter change a proposal applies when executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum GovernanceAction {
    SetMaxSupply(SupplyCap),
    SetPaused(bool),
    Freeze(Address),
    Unfreeze(Address),
    GrantRole(Role, Address),
    RevokeRole(Role, Address),
    SetMaxRewardRate(Decimal),
}

impl GovernanceAction {
    pub fn set_max_supply(max: Option<Amount>) -> Self {
        GovernanceAction::SetMaxSupply(SupplyCap(max))
    }

    /// Checks that do not depend on ledger state.
    pub fn validate(&self) -> LedgerResult<()> {
        match self {
            GovernanceAction::Freeze(a)
            | GovernanceAction::Unfreeze(a)
            | GovernanceAction::GrantRole(_, a)
            | GovernanceAction::RevokeRole(_, a)
                if a.is_empty() =>
            {
                Err(LedgerError::InvalidArgument("action address must be non-empty".to_string()))
            }
            GovernanceAction::SetMaxRewardRate(rate) if rate.is_sign_negative() => {
                Err(LedgerError::InvalidArgument("reward rate must not be negative".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for GovernanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernanceAction::SetMaxSupply(SupplyCap(Some(max))) => write!(f, "set_max_supply({})", max),
            GovernanceAction::SetMaxSupply(SupplyCap(None)) => write!(f, "set_max_supply(uncapped)"),
            GovernanceAction::SetPaused(p) => write!(f, "set_paused({})", p),
            GovernanceAction::Freeze(a) => write!(f, "freeze({})", a),
            GovernanceAction::Unfreeze(a) => write!(f, "unfreeze({})", a),
            GovernanceAction::GrantRole(r, a) => write!(f, "grant_role({}, {})", r, a),
            GovernanceAction::RevokeRole(r, a) => write!(f, "revoke_role({}, {})", r, a),
            GovernanceAction::SetMaxRewardRate(r) => write!(f, "set_max_reward_rate({})", r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Open,
    Passed,
    Rejected,
    Executed,
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalState::Open => "open",
            ProposalState::Passed => "passed",
            ProposalState::Rejected => "rejected",
            ProposalState::Executed => "executed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub support: bool,
    #[serde(with = "crate::encoding::amount")]
    pub weight: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub token: TokenId,
    pub proposer: Address,
    pub action: GovernanceAction,
    pub votes: BTreeMap<Address, Ballot>,
    #[serde(with = "crate::encoding::amount")]
    pub votes_for: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub votes_against: Amount,
    pub state: ProposalState,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn new(
        id: u64,
        token: &str,
        proposer: &str,
        action: GovernanceAction,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            token: token.to_string(),
            proposer: proposer.to_string(),
            action,
            votes: BTreeMap::new(),
            votes_for: Amount::zero(),
            votes_against: Amount::zero(),
            state: ProposalState::Open,
            created_at,
            deadline,
            resolved_at: None,
            executed_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ProposalState::Open && now >= self.deadline
    }

    /// Record `voter`'s ballot, replacing any earlier one.
    pub fn cast(&mut self, voter: &str, support: bool, weight: Amount) {
        if let Some(previous) = self.votes.remove(voter) {
            if previous.support {
                self.votes_for -= &previous.weight;
            } else {
                self.votes_against -= &previous.weight;
            }
        }
        if support {
            self.votes_for += &weight;
        } else {
            self.votes_against += &weight;
        }
        self.votes.insert(voter.to_string(), Ballot { support, weight });
    }

    pub fn turnout(&self) -> Amount {
        &self.votes_for + &self.votes_against
    }

    /// Outcome against `circulating` supply: quorum is a fraction of supply
    /// that must have voted, majority is judged on the votes cast.
    pub fn outcome(&self, quorum: Decimal, majority: &MajorityRule, circulating: &Amount) -> ProposalState {
        let turnout = self.turnout();
        let (q_num, q_den) = rate_parts(quorum);
        let quorum_met = &turnout * q_den >= q_num * circulating;

        let majority_met = match majority {
            MajorityRule::Simple => self.votes_for > self.votes_against,
            MajorityRule::Supermajority(fraction) => {
                let (m_num, m_den) = rate_parts(*fraction);
                !self.votes_for.is_zero() && &self.votes_for * m_den >= m_num * &turnout
            }
        };

        if quorum_met && majority_met {
            ProposalState::Passed
        } else {
            ProposalState::Rejected
        }
    }
}
