//! String-argument entry points for transport handlers.
//!
//! Every method decodes its arguments once, runs the ledger operation and
//! wraps the outcome in an [`ApiResponse`] ready for `serde_json`.

pub mod types;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

pub use types::{
    AllowanceView, ApiError, ApiResponse, BalanceView, BatchLeg, EventQueryParams, EventView, PositionView,
    ProposalView,
};

use crate::account::types::Amount;
use crate::context::OpContext;
use crate::encoding::parse_amount;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventFilter, EventKind};
use crate::governance::GovernanceAction;
use crate::ledger::Ledger;
use crate::staking::UnstakeReceipt;
use crate::supply::SupplyView;
use crate::transfer::{BatchItem, BatchReceipt, TransferReceipt};

const DEFAULT_EVENT_LIMIT: usize = 1_000;

fn parse_id(id: &str) -> LedgerResult<Uuid> {
    Uuid::parse_str(id).map_err(|e| LedgerError::InvalidArgument(format!("position id '{}': {}", id, e)))
}

fn parse_rate(rate: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(rate.trim()).map_err(|e| LedgerError::InvalidArgument(format!("rate '{}': {}", rate, e)))
}

pub struct LedgerApi {
    ledger: Arc<Ledger>,
    request_timeout: Option<Duration>,
}

impl LedgerApi {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            request_timeout: None,
        }
    }

    /// Bound every request's lock waits by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn call<T>(&self, op: &str, f: impl FnOnce(&OpContext) -> LedgerResult<T>) -> ApiResponse<T> {
        let ctx = match self.request_timeout {
            Some(timeout) => OpContext::with_timeout(timeout),
            None => OpContext::new(),
        };
        let result = f(&ctx);
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(op, error = %e, "ledger storage failure");
            } else {
                debug!(op, kind = e.kind(), "request rejected");
            }
        }
        result.into()
    }

    pub fn balance(&self, token: &str, address: &str) -> ApiResponse<BalanceView> {
        self.call("balance", |ctx| self.ledger.account(ctx, token, address))
    }

    pub fn supply(&self, token: &str) -> ApiResponse<SupplyView> {
        self.call("supply", |ctx| self.ledger.supply().supply(ctx, token))
    }

    pub fn allowance(&self, token: &str, owner: &str, spender: &str) -> ApiResponse<AllowanceView> {
        self.call("allowance", |ctx| {
            let limit = self.ledger.transfers().allowance(ctx, token, owner, spender)?;
            Ok(allowance_view(token, owner, spender, limit))
        })
    }

    pub fn mint(&self, token: &str, to: &str, amount: &str, caller: &str) -> ApiResponse<SupplyView> {
        self.call("mint", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.supply().mint(ctx, token, to, &amount, caller)?;
            self.ledger.supply().supply(ctx, token)
        })
    }

    pub fn burn(&self, token: &str, from: &str, amount: &str) -> ApiResponse<SupplyView> {
        self.call("burn", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.supply().burn(ctx, token, from, &amount)?;
            self.ledger.supply().supply(ctx, token)
        })
    }

    pub fn burn_from(&self, token: &str, spender: &str, owner: &str, amount: &str) -> ApiResponse<SupplyView> {
        self.call("burn_from", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.supply().burn_from(ctx, token, spender, owner, &amount)?;
            self.ledger.supply().supply(ctx, token)
        })
    }

    pub fn force_burn(&self, token: &str, from: &str, amount: &str, caller: &str) -> ApiResponse<SupplyView> {
        self.call("force_burn", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.supply().force_burn(ctx, token, from, &amount, caller)?;
            self.ledger.supply().supply(ctx, token)
        })
    }

    pub fn transfer(&self, token: &str, from: &str, to: &str, amount: &str) -> ApiResponse<TransferReceipt> {
        self.call("transfer", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.transfers().transfer(ctx, token, from, to, &amount)
        })
    }

    pub fn transfer_from(&self, token: &str, spender: &str, owner: &str, to: &str, amount: &str) -> ApiResponse<TransferReceipt> {
        self.call("transfer_from", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.transfers().transfer_from(ctx, token, spender, owner, to, &amount)
        })
    }

    pub fn batch_transfer(&self, token: &str, from: &str, legs: &[BatchLeg]) -> ApiResponse<BatchReceipt> {
        self.call("batch_transfer", |ctx| {
            let items = legs
                .iter()
                .map(|leg| -> LedgerResult<BatchItem> { Ok(BatchItem::new(&leg.to, parse_amount(&leg.amount)?)) })
                .collect::<LedgerResult<Vec<_>>>()?;
            self.ledger.transfers().batch_transfer(ctx, token, from, &items)
        })
    }

    pub fn approve(&self, token: &str, owner: &str, spender: &str, amount: &str) -> ApiResponse<AllowanceView> {
        self.call("approve", |ctx| {
            let amount = parse_amount(amount)?;
            self.ledger.transfers().approve(ctx, token, owner, spender, &amount)?;
            Ok(allowance_view(token, owner, spender, amount))
        })
    }

    pub fn increase_allowance(&self, token: &str, owner: &str, spender: &str, by: &str) -> ApiResponse<AllowanceView> {
        self.call("increase_allowance", |ctx| {
            let by = parse_amount(by)?;
            let limit = self.ledger.transfers().increase_allowance(ctx, token, owner, spender, &by)?;
            Ok(allowance_view(token, owner, spender, limit))
        })
    }

    pub fn decrease_allowance(&self, token: &str, owner: &str, spender: &str, by: &str) -> ApiResponse<AllowanceView> {
        self.call("decrease_allowance", |ctx| {
            let by = parse_amount(by)?;
            let limit = self.ledger.transfers().decrease_allowance(ctx, token, owner, spender, &by)?;
            Ok(allowance_view(token, owner, spender, limit))
        })
    }

    pub fn freeze(&self, token: &str, address: &str, caller: &str) -> ApiResponse<BalanceView> {
        self.call("freeze", |ctx| {
            self.ledger.supply().freeze(ctx, token, address, caller)?;
            self.ledger.account(ctx, token, address)
        })
    }

    pub fn unfreeze(&self, token: &str, address: &str, caller: &str) -> ApiResponse<BalanceView> {
        self.call("unfreeze", |ctx| {
            self.ledger.supply().unfreeze(ctx, token, address, caller)?;
            self.ledger.account(ctx, token, address)
        })
    }

    pub fn set_paused(&self, token: &str, paused: bool, caller: &str) -> ApiResponse<SupplyView> {
        self.call("set_paused", |ctx| {
            self.ledger.supply().set_paused(ctx, token, paused, caller)?;
            self.ledger.supply().supply(ctx, token)
        })
    }

    pub fn stake(
        &self,
        token: &str,
        owner: &str,
        amount: &str,
        lock_period_secs: u64,
        rate: &str,
        compounding: bool,
    ) -> ApiResponse<PositionView> {
        self.call("stake", |ctx| {
            let amount = parse_amount(amount)?;
            let rate = parse_rate(rate)?;
            let position = self
                .ledger
                .staking()
                .stake(ctx, token, owner, &amount, lock_period_secs, rate, compounding)?;
            Ok(PositionView::new(&position, self.now()))
        })
    }

    pub fn position(&self, id: &str) -> ApiResponse<PositionView> {
        self.call("position", |ctx| {
            let id = parse_id(id)?;
            let now = self.now();
            self.ledger.staking().accrue_rewards(ctx, &id, now).or_else(|e| match e {
                LedgerError::InvalidState(_) => Ok(Amount::default()),
                e => Err(e),
            })?;
            let position = self.ledger.staking().position(ctx, &id)?;
            Ok(PositionView::new(&position, now))
        })
    }

    pub fn positions(&self, token: &str, owner: &str) -> ApiResponse<Vec<PositionView>> {
        self.call("positions", |ctx| {
            let now = self.now();
            Ok(self
                .ledger
                .staking()
                .positions_of(ctx, token, owner)?
                .iter()
                .map(|p| PositionView::new(p, now))
                .collect())
        })
    }

    pub fn compound(&self, id: &str) -> ApiResponse<PositionView> {
        self.call("compound", |ctx| {
            let position = self.ledger.staking().compound(ctx, &parse_id(id)?)?;
            Ok(PositionView::new(&position, self.now()))
        })
    }

    pub fn unstake(&self, id: &str) -> ApiResponse<UnstakeReceipt> {
        self.call("unstake", |ctx| self.ledger.staking().unstake(ctx, &parse_id(id)?))
    }

    pub fn emergency_unstake(&self, id: &str) -> ApiResponse<UnstakeReceipt> {
        self.call("emergency_unstake", |ctx| {
            self.ledger.staking().emergency_unstake(ctx, &parse_id(id)?)
        })
    }

    pub fn create_proposal(
        &self,
        token: &str,
        proposer: &str,
        action: GovernanceAction,
        deadline: Option<DateTime<Utc>>,
    ) -> ApiResponse<ProposalView> {
        self.call("create_proposal", |ctx| {
            let proposal = self.ledger.governance().create_proposal(ctx, token, proposer, action, deadline)?;
            Ok(ProposalView::from(&proposal))
        })
    }

    pub fn proposal(&self, token: &str, id: u64) -> ApiResponse<ProposalView> {
        self.call("proposal", |ctx| {
            Ok(ProposalView::from(&self.ledger.governance().proposal(ctx, token, id)?))
        })
    }

    pub fn vote(&self, token: &str, id: u64, voter: &str, support: bool) -> ApiResponse<ProposalView> {
        self.call("vote", |ctx| {
            Ok(ProposalView::from(&self.ledger.governance().vote(ctx, token, id, voter, support)?))
        })
    }

    pub fn execute(&self, token: &str, id: u64, caller: &str) -> ApiResponse<ProposalView> {
        self.call("execute", |ctx| {
            Ok(ProposalView::from(&self.ledger.governance().execute(ctx, token, id, caller)?))
        })
    }

    /// Matching events after `params.after`, at most `params.limit` of them.
    pub fn events(&self, token: &str, params: &EventQueryParams) -> ApiResponse<Vec<EventView>> {
        self.call("events", |_| {
            let mut filter = EventFilter::all();
            for kind in &params.kinds {
                filter = filter.kind(EventKind::from_str(kind)?);
            }
            if let Some(address) = &params.address {
                filter = filter.address(address);
            }
            filter.from = params.from;
            filter.until = params.until;

            let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
            let mut views = Vec::new();
            for event in self.ledger.events(token, filter)? {
                let event = event?;
                if event.sequence <= params.after {
                    continue;
                }
                if views.len() >= limit {
                    break;
                }
                views.push(EventView::from(event));
            }
            Ok(views)
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.ledger.clock().now()
    }
}

fn allowance_view(token: &str, owner: &str, spender: &str, limit: Amount) -> AllowanceView {
    AllowanceView {
        token: token.to_string(),
        owner: owner.to_string(),
        spender: spender.to_string(),
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{LedgerConfig, TokenConfig};
    use crate::events::MemoryEventStore;
    use serde_json::json;

    fn api() -> (LedgerApi, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = LedgerConfig {
            tokens: vec![TokenConfig {
                id: "T1".to_string(),
                admin: "root".to_string(),
                max_supply: Some(Amount::from(1_000_000u64)),
            }],
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_event_store(config, Arc::new(MemoryEventStore::new()), clock.clone()).unwrap();
        (LedgerApi::new(Arc::new(ledger)).with_request_timeout(Duration::from_millis(500)), clock)
    }

    #[test]
    fn test_example_scenario_over_strings() {
        let (api, _) = api();
        assert!(api.mint("T1", "alice", "500000", "root").ok);
        assert!(api.approve("T1", "alice", "bob", "1000").ok);
        let receipt = api.transfer_from("T1", "bob", "alice", "carol", "1000").into_result().unwrap();
        assert_eq!(receipt.amount, Amount::from(1_000u64));

        let alice = serde_json::to_value(api.balance("T1", "alice")).unwrap();
        assert_eq!(alice["ok"], true);
        assert_eq!(alice["data"]["balance"], "499000");

        let denied = serde_json::to_value(api.transfer_from("T1", "bob", "alice", "carol", "1")).unwrap();
        assert_eq!(denied["ok"], false);
        assert_eq!(denied["error"]["kind"], "AllowanceExceeded");
        assert!(denied.get("data").is_none());
    }

    #[test]
    fn test_malformed_arguments_are_invalid() {
        let (api, _) = api();
        let resp = api.transfer("T1", "alice", "bob", "12.5");
        assert_eq!(resp.error.unwrap().kind, "InvalidArgument");
        let resp = api.unstake("not-a-uuid");
        assert_eq!(resp.error.unwrap().kind, "InvalidArgument");
        let resp = api.stake("T1", "alice", "10", 60, "ten percent", false);
        assert_eq!(resp.error.unwrap().kind, "InvalidArgument");
    }

    #[test]
    fn test_big_amounts_survive_the_wire() {
        let (api, _) = api();
        let huge = "123456789012345678901234567890";
        assert!(api.set_paused("T1", false, "root").ok);
        let resp = api.mint("T1", "whale", huge, "root");
        assert_eq!(resp.error.unwrap().kind, "SupplyCapExceeded");

        let ledger = api.ledger();
        ledger
            .supply()
            .set_max_supply(&OpContext::new(), "T1", None, "root")
            .unwrap();
        let supply = serde_json::to_value(api.mint("T1", "whale", huge, "root")).unwrap();
        assert_eq!(supply["data"]["total_supply"], huge);
    }

    #[test]
    fn test_batch_and_event_paging() {
        let (api, _) = api();
        api.mint("T1", "alice", "100", "root");
        let legs = vec![
            BatchLeg {
                to: "bob".to_string(),
                amount: "10".to_string(),
            },
            BatchLeg {
                to: "carol".to_string(),
                amount: "20".to_string(),
            },
        ];
        let receipt = api.batch_transfer("T1", "alice", &legs).into_result().unwrap();
        assert_eq!(receipt.transfers, 2);

        let params: EventQueryParams = serde_json::from_value(json!({ "kinds": ["transfer"], "limit": 1 })).unwrap();
        let page = api.events("T1", &params).into_result().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].counterparty.as_deref(), Some("bob"));

        let params: EventQueryParams =
            serde_json::from_value(json!({ "kinds": ["transfer"], "after": page[0].sequence })).unwrap();
        let rest = api.events("T1", &params).into_result().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].counterparty.as_deref(), Some("carol"));

        let json = serde_json::to_value(&rest[0]).unwrap();
        assert_eq!(json["type"], "transfer");
        assert_eq!(json["amount"], "20");

        let bad: EventQueryParams = serde_json::from_value(json!({ "kinds": ["teleport"] })).unwrap();
        assert!(!api.events("T1", &bad).ok);
    }

    #[test]
    fn test_staking_and_governance_views() {
        let (api, clock) = api();
        api.mint("T1", "alice", "1000", "root");
        let position = api.stake("T1", "alice", "400", 3_600, "0.05", false).into_result().unwrap();
        assert_eq!(position.status, crate::staking::PositionStatus::Locked);
        assert_eq!(api.positions("T1", "alice").into_result().unwrap().len(), 1);

        let early = api.unstake(&position.id.to_string());
        assert_eq!(early.error.unwrap().kind, "StillLocked");
        clock.advance(chrono::Duration::hours(2));
        assert!(api.unstake(&position.id.to_string()).ok);
        let closed = api.position(&position.id.to_string()).into_result().unwrap();
        assert_eq!(closed.status, crate::staking::PositionStatus::Closed);

        let proposal = api
            .create_proposal("T1", "alice", GovernanceAction::SetPaused(true), None)
            .into_result()
            .unwrap();
        let view = api.vote("T1", proposal.id, "alice", true).into_result().unwrap();
        assert_eq!(view.voters, 1);
        assert_eq!(api.execute("T1", proposal.id, "alice").error.unwrap().kind, "InvalidState");
    }
}
