//! Supply Controller
//!
//! Mint and burn lock the token's supply row first and the affected account
//! rows second, validate everything, append the event and only then apply
//! the change. Token policy (roles, cap, pause, freeze) changes go through
//! here too so they are authorised and audited in one place.

use num_traits::Zero;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use super::token::{SupplyAudit, SupplyView, TokenHandle, TokenState};
use crate::account::auth::{Caller, Role};
use crate::account::store::AccountStore;
use crate::account::types::Amount;
use crate::config::LockConfig;
use crate::context::{read_registry, write_registry, LockBudget, OpContext};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventKind, EventLog, NewEvent};

pub struct SupplyController {
    tokens: RwLock<HashMap<String, Arc<TokenHandle>>>,
    accounts: Arc<AccountStore>,
    events: Arc<EventLog>,
    locks: LockConfig,
    default_max_reward_rate: Decimal,
}

pub(crate) fn require_positive(amount: &Amount, what: &str) -> LedgerResult<()> {
    if amount.is_zero() {
        return Err(LedgerError::InvalidArgument(format!("{} amount must be positive", what)));
    }
    Ok(())
}

impl SupplyController {
    pub fn new(
        accounts: Arc<AccountStore>,
        events: Arc<EventLog>,
        locks: LockConfig,
        default_max_reward_rate: Decimal,
    ) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            accounts,
            events,
            locks,
            default_max_reward_rate,
        }
    }

    pub fn budget(&self, ctx: &OpContext) -> LockBudget {
        LockBudget::new(&self.locks, ctx)
    }

    pub fn register_token(&self, token: &str, admin: &str, max_supply: Option<Amount>) -> LedgerResult<()> {
        if token.is_empty() || admin.is_empty() {
            return Err(LedgerError::InvalidArgument("token id and admin must be non-empty".to_string()));
        }
        let mut tokens = write_registry(&self.tokens)?;
        if tokens.contains_key(token) {
            return Err(LedgerError::InvalidState(format!("token {} already registered", token)));
        }
        let mut event = NewEvent::new(EventKind::TokenRegistered, admin);
        if let Some(max) = &max_supply {
            event = event.amount(max);
        }
        self.events.append(token, event)?;
        let state = TokenState::new(admin, max_supply, self.default_max_reward_rate);
        tokens.insert(token.to_string(), Arc::new(TokenHandle::new(token, state)));
        info!(token, admin, "token registered");
        Ok(())
    }

    pub fn handle(&self, token: &str) -> LedgerResult<Arc<TokenHandle>> {
        read_registry(&self.tokens)?
            .get(token)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("token {}", token)))
    }

    pub fn token_ids(&self) -> LedgerResult<Vec<String>> {
        let mut ids: Vec<String> = read_registry(&self.tokens)?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn supply(&self, ctx: &OpContext, token: &str) -> LedgerResult<SupplyView> {
        let handle = self.handle(token)?;
        let state = self.budget(ctx).lock(&handle.state, token)?;
        Ok(state.view(token, handle.is_paused()))
    }

    pub fn has_role(&self, ctx: &OpContext, token: &str, role: Role, address: &str) -> LedgerResult<bool> {
        let handle = self.handle(token)?;
        let state = self.budget(ctx).lock(&handle.state, token)?;
        Ok(state.authorities.has_role(role, address))
    }

    /// Issue `amount` to `to`. Requires the `Minter` role.
    pub fn mint(&self, ctx: &OpContext, token: &str, to: &str, amount: &Amount, caller: &str) -> LedgerResult<()> {
        require_positive(amount, "mint")?;
        let handle = self.handle(token)?;
        let budget = self.budget(ctx);
        let mut state = budget.lock(&handle.state, token)?;
        handle.ensure_active()?;
        state.authorities.require(Role::Minter, caller)?;
        state.check_mint(amount)?;

        let rows = self.accounts.rows(token, [to])?;
        let mut locked = rows.lock(&budget)?;
        self.events.append(
            token,
            NewEvent::new(EventKind::Mint, caller).counterparty(to).amount(amount),
        )?;
        state.apply_mint(locked.get_mut(to)?, amount);
        info!(token, to, %amount, total = %state.total_supply, "minted");
        Ok(())
    }

    /// Destroy `amount` of the caller's own available balance.
    pub fn burn(&self, ctx: &OpContext, token: &str, from: &str, amount: &Amount) -> LedgerResult<()> {
        self.burn_inner(ctx, token, from, from, amount, None)
    }

    /// Destroy `amount` of `owner`'s balance on behalf of `spender`, consuming allowance.
    pub fn burn_from(&self, ctx: &OpContext, token: &str, spender: &str, owner: &str, amount: &Amount) -> LedgerResult<()> {
        self.burn_inner(ctx, token, spender, owner, amount, Some(spender))
    }

    fn burn_inner(
        &self,
        ctx: &OpContext,
        token: &str,
        actor: &str,
        from: &str,
        amount: &Amount,
        spender: Option<&str>,
    ) -> LedgerResult<()> {
        require_positive(amount, "burn")?;
        let handle = self.handle(token)?;
        let budget = self.budget(ctx);
        let mut state = budget.lock(&handle.state, token)?;
        handle.ensure_active()?;

        let rows = self.accounts.rows(token, [from])?;
        let mut locked = rows.lock(&budget)?;
        let row = locked.get_mut(from)?;
        if let Some(spender) = spender {
            row.check_allowance(from, spender, amount)?;
        }
        row.check_debit(from, amount, false)?;

        let mut event = NewEvent::new(EventKind::Burn, actor).amount(amount);
        if actor != from {
            event = event.counterparty(from);
        }
        self.events.append(token, event)?;
        if let Some(spender) = spender {
            row.consume_allowance(from, spender, amount)?;
        }
        state.apply_burn(row, from, amount, false)?;
        info!(token, from, %amount, total = %state.total_supply, "burned");
        Ok(())
    }

    /// Seize and destroy funds, bypassing the freeze. Requires `Compliance`.
    pub fn force_burn<'c>(
        &self,
        ctx: &OpContext,
        token: &str,
        from: &str,
        amount: &Amount,
        caller: impl Into<Caller<'c>>,
    ) -> LedgerResult<()> {
        let caller = caller.into();
        require_positive(amount, "burn")?;
        let handle = self.handle(token)?;
        let budget = self.budget(ctx);
        let mut state = budget.lock(&handle.state, token)?;
        caller.authorize(&state.authorities, Role::Compliance)?;

        let rows = self.accounts.rows(token, [from])?;
        let mut locked = rows.lock(&budget)?;
        let row = locked.get_mut(from)?;
        row.check_debit(from, amount, true)?;
        self.events.append(
            token,
            NewEvent::new(EventKind::ForceBurn, &caller.actor()).counterparty(from).amount(amount),
        )?;
        state.apply_burn(row, from, amount, true)?;
        warn!(token, from, %amount, "funds seized");
        Ok(())
    }

    pub fn set_paused<'c>(&self, ctx: &OpContext, token: &str, paused: bool, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        let caller = caller.into();
        let handle = self.handle(token)?;
        let state = self.budget(ctx).lock(&handle.state, token)?;
        caller.authorize(&state.authorities, Role::Pauser)?;
        if handle.is_paused() == paused {
            return Ok(());
        }
        let _quiet = handle.quiesce()?;
        let kind = if paused { EventKind::Paused } else { EventKind::Unpaused };
        self.events.append(token, NewEvent::new(kind, &caller.actor()))?;
        handle.set_paused(paused);
        info!(token, paused, "pause state changed");
        Ok(())
    }

    pub fn freeze<'c>(&self, ctx: &OpContext, token: &str, address: &str, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        self.set_frozen(ctx, token, address, true, caller.into())
    }

    pub fn unfreeze<'c>(&self, ctx: &OpContext, token: &str, address: &str, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        self.set_frozen(ctx, token, address, false, caller.into())
    }

    fn set_frozen(&self, ctx: &OpContext, token: &str, address: &str, frozen: bool, caller: Caller<'_>) -> LedgerResult<()> {
        let handle = self.handle(token)?;
        let budget = self.budget(ctx);
        let state = budget.lock(&handle.state, token)?;
        caller.authorize(&state.authorities, Role::Compliance)?;

        let rows = self.accounts.rows(token, [address])?;
        let mut locked = rows.lock(&budget)?;
        let row = locked.get_mut(address)?;
        if row.frozen == frozen {
            return Ok(());
        }
        let kind = if frozen { EventKind::Freeze } else { EventKind::Unfreeze };
        self.events.append(token, NewEvent::new(kind, &caller.actor()).counterparty(address))?;
        row.frozen = frozen;
        info!(token, address, frozen, "freeze state changed");
        Ok(())
    }

    pub fn grant_role<'c>(&self, ctx: &OpContext, token: &str, role: Role, address: &str, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        self.change_role(ctx, token, role, address, true, caller.into())
    }

    pub fn revoke_role<'c>(&self, ctx: &OpContext, token: &str, role: Role, address: &str, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        self.change_role(ctx, token, role, address, false, caller.into())
    }

    fn change_role(&self, ctx: &OpContext, token: &str, role: Role, address: &str, grant: bool, caller: Caller<'_>) -> LedgerResult<()> {
        let handle = self.handle(token)?;
        let mut state = self.budget(ctx).lock(&handle.state, token)?;
        caller.authorize(&state.authorities, Role::Admin)?;
        if state.authorities.has_role(role, address) == grant {
            return Ok(());
        }
        let kind = if grant { EventKind::RoleGranted } else { EventKind::RoleRevoked };
        self.events.append(
            token,
            NewEvent::new(kind, &caller.actor()).counterparty(address).reference(role),
        )?;
        if grant {
            state.authorities.add(role, address);
        } else {
            state.authorities.remove(role, address);
        }
        info!(token, address, %role, grant, "role changed");
        Ok(())
    }

    /// Raise, lower or remove the cap. A cap below the current total supply is rejected.
    pub fn set_max_supply<'c>(&self, ctx: &OpContext, token: &str, max: Option<Amount>, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        let caller = caller.into();
        let handle = self.handle(token)?;
        let mut state = self.budget(ctx).lock(&handle.state, token)?;
        caller.authorize(&state.authorities, Role::Admin)?;
        if let Some(max) = &max {
            if *max < state.total_supply {
                return Err(LedgerError::InvalidState(format!(
                    "cap {} is below current supply {}",
                    max, state.total_supply
                )));
            }
        }
        let mut event = NewEvent::new(EventKind::SupplyCapChanged, &caller.actor());
        if let Some(max) = &max {
            event = event.amount(max);
        }
        self.events.append(token, event)?;
        state.max_supply = max;
        info!(token, "supply cap changed");
        Ok(())
    }

    pub fn set_max_reward_rate<'c>(&self, ctx: &OpContext, token: &str, rate: Decimal, caller: impl Into<Caller<'c>>) -> LedgerResult<()> {
        let caller = caller.into();
        if rate < Decimal::ZERO {
            return Err(LedgerError::InvalidArgument("reward rate must not be negative".to_string()));
        }
        let handle = self.handle(token)?;
        let mut state = self.budget(ctx).lock(&handle.state, token)?;
        caller.authorize(&state.authorities, Role::Admin)?;
        self.events.append(
            token,
            NewEvent::new(EventKind::RewardRateCapChanged, &caller.actor()).reference(rate),
        )?;
        state.max_reward_rate = rate;
        Ok(())
    }

    /// Check `sum(balances) == circulating supply` with the supply row and
    /// every account row of the token held at once.
    pub fn audit(&self, ctx: &OpContext, token: &str) -> LedgerResult<SupplyAudit> {
        let handle = self.handle(token)?;
        let budget = self.budget(ctx);
        let state = budget.lock(&handle.state, token)?;
        let rows = self.accounts.token_rows(token)?;
        let locked = rows.lock(&budget)?;
        let audit = SupplyAudit {
            token: token.to_string(),
            circulating_supply: state.circulating_supply.clone(),
            total_supply: state.total_supply.clone(),
            sum_of_balances: locked.total_balance(),
            accounts: rows.len(),
        };
        if !audit.is_conserved() {
            warn!(token, sum = %audit.sum_of_balances, circulating = %audit.circulating_supply, "conservation check failed");
        }
        Ok(audit)
    }
}
