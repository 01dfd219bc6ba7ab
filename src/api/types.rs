// Boundary types handed to HTTP handlers; amounts are decimal strings on the wire
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::types::{AccountSnapshot, Address, Amount, TokenId};
use crate::error::LedgerError;
use crate::events::{Event, EventKind};
use crate::governance::{GovernanceAction, Proposal, ProposalState};
use crate::staking::{PositionStatus, StakePosition};

/// `{"ok": true, "data": ...}` or `{"ok": false, "error": {...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&LedgerError> for ApiError {
    fn from(e: &LedgerError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: &LedgerError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (Some(data), _) if self.ok => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err(ApiError {
                kind: "InvalidState".to_string(),
                message: "response carries neither data nor error".to_string(),
                retryable: false,
            }),
        }
    }
}

impl<T> From<Result<T, LedgerError>> for ApiResponse<T> {
    fn from(result: Result<T, LedgerError>) -> Self {
        match result {
            Ok(data) => ApiResponse::success(data),
            Err(e) => ApiResponse::failure(&e),
        }
    }
}

pub type BalanceView = AccountSnapshot;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AllowanceView {
    pub token: TokenId,
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "crate::encoding::amount")]
    pub limit: Amount,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PositionView {
    pub id: Uuid,
    pub token: TokenId,
    pub owner: Address,
    pub status: PositionStatus,
    #[serde(with = "crate::encoding::amount")]
    pub principal: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub locked_amount: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub accrued_rewards: Amount,
    pub reward_rate_annual: Decimal,
    pub compounding: bool,
    pub start_time: DateTime<Utc>,
    pub unlocks_at: DateTime<Utc>,
}

impl PositionView {
    pub fn new(position: &StakePosition, now: DateTime<Utc>) -> Self {
        Self {
            id: position.id,
            token: position.token.clone(),
            owner: position.owner.clone(),
            status: position.status(now),
            principal: position.principal.clone(),
            locked_amount: position.locked_amount.clone(),
            accrued_rewards: position.accrued_rewards.clone(),
            reward_rate_annual: position.reward_rate_annual,
            compounding: position.compounding,
            start_time: position.start_time,
            unlocks_at: position.unlocks_at(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProposalView {
    pub id: u64,
    pub token: TokenId,
    pub proposer: Address,
    pub action: GovernanceAction,
    pub state: ProposalState,
    #[serde(with = "crate::encoding::amount")]
    pub votes_for: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub votes_against: Amount,
    pub voters: usize,
    pub deadline: DateTime<Utc>,
}

impl From<&Proposal> for ProposalView {
    fn from(p: &Proposal) -> Self {
        Self {
            id: p.id,
            token: p.token.clone(),
            proposer: p.proposer.clone(),
            action: p.action.clone(),
            state: p.state,
            votes_for: p.votes_for.clone(),
            votes_against: p.votes_against.clone(),
            voters: p.votes.len(),
            deadline: p.deadline,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventView {
    pub sequence: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub actor: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<Address>,
    #[serde(with = "crate::encoding::amount_opt", skip_serializing_if = "Option::is_none", default)]
    pub amount: Option<Amount>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl From<Event> for EventView {
    fn from(e: Event) -> Self {
        Self {
            sequence: e.sequence,
            kind: e.kind,
            actor: e.actor,
            counterparty: e.counterparty,
            amount: e.amount,
            timestamp: e.timestamp,
            reference: e.reference,
        }
    }
}

// Request payloads for the batch and governance entry points
#[derive(Deserialize, Debug, Clone)]
pub struct BatchLeg {
    pub to: String,
    pub amount: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EventQueryParams {
    #[serde(default)]
    pub kinds: Vec<String>,
    pub address: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Events to skip (by sequence), for paging.
    #[serde(default)]
    pub after: u64,
    pub limit: Option<usize>,
}
