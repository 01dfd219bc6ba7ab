//! Governance Module
//!
//! Proposals are numbered per token. Votes are weighted by the voter's live
//! balance when the vote is cast; a later vote by the same address replaces
//! the earlier one. Resolution happens lazily on the first access after the
//! deadline, or explicitly through `resolve` / `resolve_due`.

pub mod proposal;

use chrono::{DateTime, Duration, Utc};
use num_traits::Zero;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

pub use proposal::{Ballot, GovernanceAction, Proposal, ProposalState, SupplyCap};

use crate::account::auth::{Caller, Role};
use crate::account::store::AccountStore;
use crate::account::types::TokenId;
use crate::clock::Clock;
use crate::config::{GovernanceConfig, LockConfig};
use crate::context::{read_registry, write_registry, LockBudget, OpContext};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventKind, EventLog, NewEvent};
use crate::supply::SupplyController;

/// Actor recorded when a proposal resolves on its own.
pub const GOVERNANCE_ACTOR: &str = "governance";

type Slot = Arc<Mutex<Proposal>>;

pub struct GovernanceModule {
    proposals: RwLock<BTreeMap<(TokenId, u64), Slot>>,
    accounts: Arc<AccountStore>,
    supply: Arc<SupplyController>,
    events: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    config: GovernanceConfig,
    locks: LockConfig,
}

impl GovernanceModule {
    pub fn new(
        accounts: Arc<AccountStore>,
        supply: Arc<SupplyController>,
        events: Arc<EventLog>,
        clock: Arc<dyn Clock>,
        config: GovernanceConfig,
        locks: LockConfig,
    ) -> Self {
        Self {
            proposals: RwLock::new(BTreeMap::new()),
            accounts,
            supply,
            events,
            clock,
            config,
            locks,
        }
    }

    fn budget(&self, ctx: &OpContext) -> LockBudget {
        LockBudget::new(&self.locks, ctx)
    }

    fn slot(&self, token: &str, id: u64) -> LedgerResult<Slot> {
        read_registry(&self.proposals)?
            .get(&(token.to_string(), id))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("proposal {} on {}", id, token)))
    }

    /// Open a proposal. The proposer needs the `Governance` role or a balance
    /// of at least `min_proposer_balance` (and never zero).
    pub fn create_proposal(
        &self,
        ctx: &OpContext,
        token: &str,
        proposer: &str,
        action: GovernanceAction,
        deadline: Option<DateTime<Utc>>,
    ) -> LedgerResult<Proposal> {
        action.validate()?;
        let now = self.clock.now();
        let deadline = match deadline {
            Some(d) => d,
            None => now + Duration::seconds(i64::try_from(self.config.voting_period_secs).unwrap_or(i64::MAX / 1_000)),
        };
        if deadline <= now {
            return Err(LedgerError::InvalidArgument("deadline must be in the future".to_string()));
        }

        if !self.supply.has_role(ctx, token, Role::Governance, proposer)? {
            let balance = self.accounts.get_balance(ctx, token, proposer)?;
            if balance.is_zero() || balance < self.config.min_proposer_balance {
                return Err(LedgerError::Unauthorized(format!(
                    "{} holds {} but proposing requires {}",
                    proposer, balance, self.config.min_proposer_balance
                )));
            }
        }

        let mut proposals = write_registry(&self.proposals)?;
        let id = proposals
            .range((token.to_string(), 0)..=(token.to_string(), u64::MAX))
            .next_back()
            .map(|((_, id), _)| id + 1)
            .unwrap_or(1);
        let proposal = Proposal::new(id, token, proposer, action, now, deadline);
        self.events.append(
            token,
            NewEvent::new(EventKind::ProposalCreated, proposer).reference(format!("{}:{}", id, proposal.action)),
        )?;
        proposals.insert((token.to_string(), id), Arc::new(Mutex::new(proposal.clone())));
        info!(token, proposer, id, action = %proposal.action, "proposal created");
        Ok(proposal)
    }

    /// Cast or replace `voter`'s ballot, weighted by their current balance.
    pub fn vote(&self, ctx: &OpContext, token: &str, id: u64, voter: &str, support: bool) -> LedgerResult<Proposal> {
        let slot = self.slot(token, id)?;
        let mut proposal = self.budget(ctx).lock(&slot, "proposal")?;
        let now = self.clock.now();
        if proposal.is_due(now) {
            self.settle(ctx, &mut proposal, now)?;
        }
        if proposal.state != ProposalState::Open {
            return Err(LedgerError::InvalidState(format!("voting on proposal {} is closed", id)));
        }

        let weight = self.accounts.get_balance(ctx, token, voter)?;
        if weight.is_zero() {
            return Err(LedgerError::Unauthorized(format!("{} has no voting weight", voter)));
        }
        let side = if support { "for" } else { "against" };
        self.events.append(
            token,
            NewEvent::new(EventKind::VoteCast, voter).amount(&weight).reference(format!("{}:{}", id, side)),
        )?;
        proposal.cast(voter, support, weight);
        Ok(proposal.clone())
    }

    /// Current view of a proposal, resolving it first if its deadline passed.
    pub fn proposal(&self, ctx: &OpContext, token: &str, id: u64) -> LedgerResult<Proposal> {
        let slot = self.slot(token, id)?;
        let mut proposal = self.budget(ctx).lock(&slot, "proposal")?;
        let now = self.clock.now();
        if proposal.is_due(now) {
            self.settle(ctx, &mut proposal, now)?;
        }
        Ok(proposal.clone())
    }

    pub fn proposals(&self, ctx: &OpContext, token: &str) -> LedgerResult<Vec<Proposal>> {
        let ids: Vec<u64> = read_registry(&self.proposals)?
            .range((token.to_string(), 0)..=(token.to_string(), u64::MAX))
            .map(|((_, id), _)| *id)
            .collect();
        ids.into_iter().map(|id| self.proposal(ctx, token, id)).collect()
    }

    /// Resolve a proposal whose deadline has passed. Fails while voting is open.
    pub fn resolve(&self, ctx: &OpContext, token: &str, id: u64) -> LedgerResult<ProposalState> {
        let slot = self.slot(token, id)?;
        let mut proposal = self.budget(ctx).lock(&slot, "proposal")?;
        let now = self.clock.now();
        if proposal.state == ProposalState::Open {
            if now < proposal.deadline {
                return Err(LedgerError::InvalidState(format!(
                    "proposal {} is open until {}",
                    id, proposal.deadline
                )));
            }
            self.settle(ctx, &mut proposal, now)?;
        }
        Ok(proposal.state)
    }

    /// Resolve every open proposal of `token` whose deadline has passed.
    pub fn resolve_due(&self, ctx: &OpContext, token: &str) -> LedgerResult<Vec<(u64, ProposalState)>> {
        let slots: Vec<(u64, Slot)> = read_registry(&self.proposals)?
            .range((token.to_string(), 0)..=(token.to_string(), u64::MAX))
            .map(|((_, id), slot)| (*id, slot.clone()))
            .collect();
        let budget = self.budget(ctx);
        let now = self.clock.now();
        let mut resolved = Vec::new();
        for (id, slot) in slots {
            let mut proposal = budget.lock(&slot, "proposal")?;
            if proposal.is_due(now) {
                self.settle(ctx, &mut proposal, now)?;
                resolved.push((id, proposal.state));
            }
        }
        Ok(resolved)
    }

    /// Apply a passed proposal's action. Anyone may trigger execution; the
    /// action runs with governance authority instead of the caller's roles.
    pub fn execute(&self, ctx: &OpContext, token: &str, id: u64, caller: &str) -> LedgerResult<Proposal> {
        let slot = self.slot(token, id)?;
        let mut proposal = self.budget(ctx).lock(&slot, "proposal")?;
        let now = self.clock.now();
        if proposal.is_due(now) {
            self.settle(ctx, &mut proposal, now)?;
        }
        match proposal.state {
            ProposalState::Executed => return Err(LedgerError::AlreadyExecuted(id)),
            ProposalState::Open | ProposalState::Rejected => {
                return Err(LedgerError::InvalidState(format!(
                    "proposal {} is {} and cannot be executed",
                    id, proposal.state
                )))
            }
            ProposalState::Passed => {}
        }

        self.apply(ctx, token, id, &proposal.action)?;
        self.events.append(
            token,
            NewEvent::new(EventKind::ProposalExecuted, caller).reference(format!("{}:{}", id, proposal.action)),
        )?;
        proposal.state = ProposalState::Executed;
        proposal.executed_at = Some(now);
        info!(token, id, caller, "proposal executed");
        Ok(proposal.clone())
    }

    fn apply(&self, ctx: &OpContext, token: &str, id: u64, action: &GovernanceAction) -> LedgerResult<()> {
        let caller = Caller::Governance(id);
        match action {
            GovernanceAction::SetMaxSupply(cap) => self.supply.set_max_supply(ctx, token, cap.0.clone(), caller),
            GovernanceAction::SetPaused(paused) => self.supply.set_paused(ctx, token, *paused, caller),
            GovernanceAction::Freeze(address) => self.supply.freeze(ctx, token, address, caller),
            GovernanceAction::Unfreeze(address) => self.supply.unfreeze(ctx, token, address, caller),
            GovernanceAction::GrantRole(role, address) => self.supply.grant_role(ctx, token, *role, address, caller),
            GovernanceAction::RevokeRole(role, address) => self.supply.revoke_role(ctx, token, *role, address, caller),
            GovernanceAction::SetMaxRewardRate(rate) => self.supply.set_max_reward_rate(ctx, token, *rate, caller),
        }
    }

    /// Tally against the circulating supply as of now. Caller holds the proposal lock.
    fn settle(&self, ctx: &OpContext, proposal: &mut Proposal, now: DateTime<Utc>) -> LedgerResult<()> {
        let circulating = self.supply.supply(ctx, &proposal.token)?.circulating_supply;
        let outcome = proposal.outcome(self.config.quorum, &self.config.majority, &circulating);
        self.events.append(
            &proposal.token,
            NewEvent::new(EventKind::ProposalResolved, GOVERNANCE_ACTOR)
                .amount(&proposal.turnout())
                .reference(format!("{}:{}", proposal.id, outcome)),
        )?;
        proposal.state = outcome;
        proposal.resolved_at = Some(now);
        if outcome == ProposalState::Rejected {
            warn!(token = %proposal.token, id = proposal.id, "proposal rejected");
        } else {
            info!(token = %proposal.token, id = proposal.id, "proposal passed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::types::Amount;
    use crate::clock::ManualClock;
    use crate::events::MemoryEventStore;
    use rust_decimal::Decimal;

    fn amt(n: u64) -> Amount {
        Amount::from(n)
    }

    struct Fixture {
        supply: Arc<SupplyController>,
        governance: GovernanceModule,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: GovernanceConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let accounts = Arc::new(AccountStore::new(LockConfig::default()));
        let events = Arc::new(EventLog::new(Arc::new(MemoryEventStore::new()), clock.clone()));
        let supply = Arc::new(SupplyController::new(
            accounts.clone(),
            events.clone(),
            LockConfig::default(),
            Decimal::ONE,
        ));
        supply.register_token("T1", "root", Some(amt(1_000_000))).unwrap();
        let ctx = OpContext::new();
        supply.mint(&ctx, "T1", "alice", &amt(100), "root").unwrap();
        supply.mint(&ctx, "T1", "bob", &amt(10), "root").unwrap();
        supply.mint(&ctx, "T1", "carol", &amt(890), "root").unwrap();
        let governance = GovernanceModule::new(accounts, supply.clone(), events, clock.clone(), config, LockConfig::default());
        Fixture {
            supply,
            governance,
            clock,
        }
    }

    #[test]
    fn test_lifecycle_passes_and_executes_once() {
        let f = fixture(GovernanceConfig::default());
        let ctx = OpContext::new();
        let p = f
            .governance
            .create_proposal(&ctx, "T1", "alice", GovernanceAction::set_max_supply(Some(amt(2_000_000))), None)
            .unwrap();
        assert_eq!(p.id, 1);
        f.governance.vote(&ctx, "T1", 1, "alice", true).unwrap();
        let tally = f.governance.vote(&ctx, "T1", 1, "bob", false).unwrap();
        assert_eq!(tally.votes_for, amt(100));
        assert_eq!(tally.votes_against, amt(10));

        assert!(matches!(f.governance.execute(&ctx, "T1", 1, "bob"), Err(LedgerError::InvalidState(_))));
        assert!(f.governance.resolve(&ctx, "T1", 1).is_err());

        f.clock.advance(Duration::days(4));
        assert_eq!(f.governance.resolve(&ctx, "T1", 1).unwrap(), ProposalState::Passed);
        let executed = f.governance.execute(&ctx, "T1", 1, "bob").unwrap();
        assert_eq!(executed.state, ProposalState::Executed);
        assert_eq!(f.supply.supply(&ctx, "T1").unwrap().max_supply, Some(amt(2_000_000)));
        assert_eq!(
            f.governance.execute(&ctx, "T1", 1, "bob").unwrap_err(),
            LedgerError::AlreadyExecuted(1)
        );
    }

    #[test]
    fn test_lazy_resolution_on_execute() {
        let f = fixture(GovernanceConfig::default());
        let ctx = OpContext::new();
        f.governance
            .create_proposal(&ctx, "T1", "alice", GovernanceAction::SetPaused(true), None)
            .unwrap();
        f.governance.vote(&ctx, "T1", 1, "carol", true).unwrap();
        f.clock.advance(Duration::days(4));
        f.governance.execute(&ctx, "T1", 1, "anyone").unwrap();
        assert!(f.supply.supply(&ctx, "T1").unwrap().paused);
    }

    #[test]
    fn test_quorum_not_met_rejects() {
        let config = GovernanceConfig {
            quorum: Decimal::new(5, 1),
            ..GovernanceConfig::default()
        };
        let f = fixture(config);
        let ctx = OpContext::new();
        f.governance
            .create_proposal(&ctx, "T1", "alice", GovernanceAction::Freeze("carol".to_string()), None)
            .unwrap();
        f.governance.vote(&ctx, "T1", 1, "alice", true).unwrap();
        f.clock.advance(Duration::days(4));
        let resolved = f.governance.resolve_due(&ctx, "T1").unwrap();
        assert_eq!(resolved, vec![(1, ProposalState::Rejected)]);
        assert!(matches!(f.governance.execute(&ctx, "T1", 1, "alice"), Err(LedgerError::InvalidState(_))));
    }

    #[test]
    fn test_voting_rules() {
        let f = fixture(GovernanceConfig::default());
        let ctx = OpContext::new();
        assert!(matches!(
            f.governance.create_proposal(&ctx, "T1", "nobody", GovernanceAction::SetPaused(true), None),
            Err(LedgerError::Unauthorized(_))
        ));
        f.governance
            .create_proposal(&ctx, "T1", "alice", GovernanceAction::SetPaused(true), None)
            .unwrap();
        assert!(matches!(
            f.governance.vote(&ctx, "T1", 1, "nobody", true),
            Err(LedgerError::Unauthorized(_))
        ));
        f.governance.vote(&ctx, "T1", 1, "alice", true).unwrap();
        let p = f.governance.vote(&ctx, "T1", 1, "alice", false).unwrap();
        assert_eq!(p.votes_for, amt(0));
        assert_eq!(p.votes_against, amt(100));

        f.clock.advance(Duration::days(4));
        assert!(matches!(
            f.governance.vote(&ctx, "T1", 1, "bob", true),
            Err(LedgerError::InvalidState(_))
        ));
        assert_eq!(f.governance.proposal(&ctx, "T1", 1).unwrap().state, ProposalState::Rejected);
        assert!(matches!(f.governance.proposal(&ctx, "T1", 9), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_governance_role_and_min_balance() {
        let config = GovernanceConfig {
            min_proposer_balance: amt(500),
            ..GovernanceConfig::default()
        };
        let f = fixture(config);
        let ctx = OpContext::new();
        assert!(f
            .governance
            .create_proposal(&ctx, "T1", "alice", GovernanceAction::SetPaused(true), None)
            .is_err());
        f.governance
            .create_proposal(&ctx, "T1", "carol", GovernanceAction::SetPaused(true), None)
            .unwrap();
        f.supply.grant_role(&ctx, "T1", Role::Governance, "council", "root").unwrap();
        let p = f
            .governance
            .create_proposal(&ctx, "T1", "council", GovernanceAction::SetPaused(false), None)
            .unwrap();
        assert_eq!(p.id, 2);
        assert_eq!(f.governance.proposals(&ctx, "T1").unwrap().len(), 2);
    }

    #[test]
    fn test_failed_action_leaves_proposal_passed() {
        let f = fixture(GovernanceConfig::default());
        let ctx = OpContext::new();
        f.governance
            .create_proposal(&ctx, "T1", "alice", GovernanceAction::set_max_supply(Some(amt(5))), None)
            .unwrap();
        f.governance.vote(&ctx, "T1", 1, "carol", true).unwrap();
        f.clock.advance(Duration::days(4));
        assert!(matches!(f.governance.execute(&ctx, "T1", 1, "alice"), Err(LedgerError::InvalidState(_))));
        assert_eq!(f.governance.proposal(&ctx, "T1", 1).unwrap().state, ProposalState::Passed);
    }
}
