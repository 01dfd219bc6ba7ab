//! Ledger facade
//!
//! Owns one account store and one event log and wires every component
//! over them. Tokens listed in the configuration are registered on boot.

use std::sync::Arc;
use tracing::info;

use crate::account::store::AccountStore;
use crate::account::types::{AccountSnapshot, Amount};
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::context::OpContext;
use crate::error::LedgerResult;
use crate::events::{EventFilter, EventLog, EventQuery, EventStore};
use crate::governance::GovernanceModule;
use crate::staking::StakingModule;
use crate::supply::{SupplyAudit, SupplyController};
use crate::transfer::TransferEngine;

pub struct Ledger {
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
    accounts: Arc<AccountStore>,
    events: Arc<EventLog>,
    supply: Arc<SupplyController>,
    transfers: TransferEngine,
    staking: StakingModule,
    governance: GovernanceModule,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> LedgerResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Event backend chosen by `config.events`.
    pub fn with_clock(config: LedgerConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let events = Arc::new(EventLog::from_config(&config.events, clock.clone())?);
        Self::assemble(config, clock, events)
    }

    pub fn with_event_store(config: LedgerConfig, store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let events = Arc::new(EventLog::new(store, clock.clone()));
        Self::assemble(config, clock, events)
    }

    fn assemble(config: LedgerConfig, clock: Arc<dyn Clock>, events: Arc<EventLog>) -> LedgerResult<Self> {
        let accounts = Arc::new(AccountStore::new(config.locks.clone()));
        let supply = Arc::new(SupplyController::new(
            accounts.clone(),
            events.clone(),
            config.locks.clone(),
            config.staking.max_reward_rate,
        ));
        let transfers = TransferEngine::new(accounts.clone(), supply.clone(), events.clone());
        let staking = StakingModule::new(
            accounts.clone(),
            supply.clone(),
            events.clone(),
            clock.clone(),
            config.staking.clone(),
            config.locks.clone(),
        );
        let governance = GovernanceModule::new(
            accounts.clone(),
            supply.clone(),
            events.clone(),
            clock.clone(),
            config.governance.clone(),
            config.locks.clone(),
        );

        for token in &config.tokens {
            supply.register_token(&token.id, &token.admin, token.max_supply.clone())?;
        }
        info!(tokens = config.tokens.len(), "ledger ready");

        Ok(Self {
            config,
            clock,
            accounts,
            events,
            supply,
            transfers,
            staking,
            governance,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn supply(&self) -> &SupplyController {
        &self.supply
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    pub fn staking(&self) -> &StakingModule {
        &self.staking
    }

    pub fn governance(&self) -> &GovernanceModule {
        &self.governance
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn get_balance(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<Amount> {
        self.accounts.get_balance(ctx, token, address)
    }

    pub fn account(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<AccountSnapshot> {
        self.accounts.snapshot(ctx, token, address)
    }

    /// `sum(balances) == circulating supply` for one token.
    pub fn audit_supply(&self, ctx: &OpContext, token: &str) -> LedgerResult<SupplyAudit> {
        self.supply.audit(ctx, token)
    }

    pub fn audit_all(&self, ctx: &OpContext) -> LedgerResult<Vec<SupplyAudit>> {
        self.supply
            .token_ids()?
            .iter()
            .map(|token| self.supply.audit(ctx, token))
            .collect()
    }

    pub fn events(&self, token: &str, filter: EventFilter) -> LedgerResult<EventQuery> {
        self.events.query(token, filter)
    }
}
