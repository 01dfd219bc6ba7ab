//! Staking Module
//!
//! Positions earmark part of the owner's balance instead of moving it, so
//! the account store stays the only ledger. Lock order: position, then the
//! token's supply row, then account rows.

pub mod position;
pub mod rewards;

use num_traits::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub use position::{PositionStatus, StakePosition};

use crate::account::store::AccountStore;
use crate::account::types::{Address, Amount, TokenId};
use crate::clock::Clock;
use crate::config::{LockConfig, RewardSource, StakingConfig};
use crate::context::{read_registry, write_registry, LockBudget, OpContext};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventKind, EventLog, NewEvent};
use crate::supply::controller::require_positive;
use crate::supply::SupplyController;

/// Actor recorded on reward issuance.
pub const STAKING_ACTOR: &str = "staking";

/// What closing a position paid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstakeReceipt {
    pub position_id: Uuid,
    pub token: TokenId,
    pub owner: Address,
    /// Earmark released back to the available balance.
    #[serde(with = "crate::encoding::amount")]
    pub released: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub rewards: Amount,
    /// Burned on emergency withdrawal.
    #[serde(with = "crate::encoding::amount")]
    pub penalty: Amount,
    pub sequence: u64,
}

pub struct StakingModule {
    positions: RwLock<HashMap<Uuid, Arc<Mutex<StakePosition>>>>,
    accounts: Arc<AccountStore>,
    supply: Arc<SupplyController>,
    events: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    config: StakingConfig,
    locks: LockConfig,
}

impl StakingModule {
    pub fn new(
        accounts: Arc<AccountStore>,
        supply: Arc<SupplyController>,
        events: Arc<EventLog>,
        clock: Arc<dyn Clock>,
        config: StakingConfig,
        locks: LockConfig,
    ) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
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

    fn slot(&self, id: &Uuid) -> LedgerResult<Arc<Mutex<StakePosition>>> {
        read_registry(&self.positions)?
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("stake position {}", id)))
    }

    /// Earmark `amount` of `owner`'s available balance for `lock_period_secs`.
    pub fn stake(
        &self,
        ctx: &OpContext,
        token: &str,
        owner: &str,
        amount: &Amount,
        lock_period_secs: u64,
        rate: Decimal,
        compounding: bool,
    ) -> LedgerResult<StakePosition> {
        require_positive(amount, "stake")?;
        if rate.is_sign_negative() {
            return Err(LedgerError::InvalidArgument("reward rate must not be negative".to_string()));
        }
        if matches!(&self.config.reward_source, RewardSource::Pool(pool) if pool == owner) {
            return Err(LedgerError::InvalidArgument("the reward pool cannot stake".to_string()));
        }
        let handle = self.supply.handle(token)?;
        let budget = self.budget(ctx);
        let state = budget.lock(&handle.state, token)?;
        handle.ensure_active()?;
        if rate > state.max_reward_rate {
            return Err(LedgerError::InvalidArgument(format!(
                "reward rate {} exceeds maximum {}",
                rate, state.max_reward_rate
            )));
        }

        let rows = self.accounts.rows(token, [owner])?;
        let mut locked = rows.lock(&budget)?;
        let row = locked.get_mut(owner)?;
        row.check_earmark(owner, amount)?;

        let position = StakePosition::new(token, owner, amount.clone(), lock_period_secs, rate, compounding, self.clock.now());
        self.events.append(
            token,
            NewEvent::new(EventKind::Stake, owner).amount(amount).reference(position.id),
        )?;
        row.earmark(owner, amount)?;
        drop(state);

        write_registry(&self.positions)?.insert(position.id, Arc::new(Mutex::new(position.clone())));
        info!(token, owner, %amount, id = %position.id, "staked");
        Ok(position)
    }

    pub fn position(&self, ctx: &OpContext, id: &Uuid) -> LedgerResult<StakePosition> {
        let slot = self.slot(id)?;
        let position = self.budget(ctx).lock(&slot, "position")?;
        Ok(position.clone())
    }

    pub fn status(&self, ctx: &OpContext, id: &Uuid) -> LedgerResult<PositionStatus> {
        Ok(self.position(ctx, id)?.status(self.clock.now()))
    }

    /// Positions opened by `owner` on `token`, oldest first.
    pub fn positions_of(&self, ctx: &OpContext, token: &str, owner: &str) -> LedgerResult<Vec<StakePosition>> {
        let slots: Vec<_> = read_registry(&self.positions)?.values().cloned().collect();
        let budget = self.budget(ctx);
        let mut found = Vec::new();
        for slot in slots {
            let position = budget.lock(&slot, "position")?;
            if position.token == token && position.owner == owner {
                found.push(position.clone());
            }
        }
        found.sort_by_key(|p| p.start_time);
        Ok(found)
    }

    /// Rewards earned up to `as_of`. Instants up to the clock's current time
    /// are recorded on the position; later ones are a projection and change nothing.
    pub fn accrue_rewards(&self, ctx: &OpContext, id: &Uuid, as_of: chrono::DateTime<chrono::Utc>) -> LedgerResult<Amount> {
        let slot = self.slot(id)?;
        let mut position = self.budget(ctx).lock(&slot, "position")?;
        if position.is_closed() {
            return Err(LedgerError::InvalidState(format!("position {} is closed", id)));
        }
        let now = self.clock.now();
        if as_of > now {
            return Ok(position.rewards_at(as_of));
        }
        Ok(position.accrue(as_of, now).clone())
    }

    /// Fold accrued rewards into principal. Only for compounding positions.
    pub fn compound(&self, ctx: &OpContext, id: &Uuid) -> LedgerResult<StakePosition> {
        let slot = self.slot(id)?;
        let mut position = self.budget(ctx).lock(&slot, "position")?;
        if position.is_closed() {
            return Err(LedgerError::InvalidState(format!("position {} is closed", id)));
        }
        if !position.compounding {
            return Err(LedgerError::InvalidState(format!("position {} does not compound", id)));
        }
        let mut next = position.clone();
        let due = next.accrue_now(self.clock.now()).clone();
        if !due.is_zero() {
            self.events.append(
                &next.token,
                NewEvent::new(EventKind::Compound, &next.owner).amount(&due).reference(next.id),
            )?;
            next.compound();
        }
        *position = next;
        Ok(position.clone())
    }

    /// Close an unlocked position: release the earmark and pay rewards.
    pub fn unstake(&self, ctx: &OpContext, id: &Uuid) -> LedgerResult<UnstakeReceipt> {
        let slot = self.slot(id)?;
        let budget = self.budget(ctx);
        let mut position = budget.lock(&slot, "position")?;
        if position.is_closed() {
            return Err(LedgerError::InvalidState(format!("position {} is already closed", id)));
        }
        let now = self.clock.now();
        let unlocks_at = position.unlocks_at();
        if now < unlocks_at {
            return Err(LedgerError::StillLocked { unlocks_at });
        }
        let mut next = position.clone();
        next.accrue_now(now);
        let reward = next.reward_due();
        let receipt = self.settle(&budget, &next, reward, Amount::zero(), EventKind::Unstake)?;
        next.close(now);
        *position = next;
        info!(token = %receipt.token, owner = %receipt.owner, rewards = %receipt.rewards, "unstaked");
        Ok(receipt)
    }

    /// Close a position before it unlocks, burning the configured penalty.
    pub fn emergency_unstake(&self, ctx: &OpContext, id: &Uuid) -> LedgerResult<UnstakeReceipt> {
        let slot = self.slot(id)?;
        let budget = self.budget(ctx);
        let mut position = budget.lock(&slot, "position")?;
        if position.is_closed() {
            return Err(LedgerError::InvalidState(format!("position {} is already closed", id)));
        }
        let now = self.clock.now();
        let mut next = position.clone();
        next.accrue_now(now);
        let reward = if self.config.forfeit_rewards_on_emergency {
            Amount::zero()
        } else {
            next.reward_due()
        };
        let penalty = rewards::fraction_of(&next.locked_amount, self.config.emergency_penalty);
        let receipt = self.settle(&budget, &next, reward, penalty, EventKind::EmergencyUnstake)?;
        next.close(now);
        *position = next;
        warn!(token = %receipt.token, owner = %receipt.owner, penalty = %receipt.penalty, "emergency unstake");
        Ok(receipt)
    }

    /// Release the earmark, burn `penalty` and pay `reward`, all under the
    /// supply row and the affected account rows. Changes are staged on
    /// copies and only written back once the events are appended.
    fn settle(
        &self,
        budget: &LockBudget,
        position: &StakePosition,
        reward: Amount,
        penalty: Amount,
        kind: EventKind,
    ) -> LedgerResult<UnstakeReceipt> {
        let token = position.token.as_str();
        let owner = position.owner.as_str();
        let handle = self.supply.handle(token)?;
        let mut state = budget.lock(&handle.state, token)?;

        let pool = match &self.config.reward_source {
            RewardSource::Pool(pool) if !reward.is_zero() && pool != owner => Some(pool.as_str()),
            _ => None,
        };
        let rows = self.accounts.rows(token, std::iter::once(owner).chain(pool))?;
        let mut locked = rows.lock(budget)?;

        let mut next_state = state.clone();
        let mut owner_row = locked.get(owner)?.clone();
        let mut pool_row = None;
        let mut events = Vec::new();

        owner_row.release(&position.locked_amount);
        if !penalty.is_zero() {
            next_state.apply_burn(&mut owner_row, owner, &penalty, false)?;
            events.push(NewEvent::new(EventKind::Burn, owner).amount(&penalty).reference(position.id));
        }
        if !reward.is_zero() {
            match &self.config.reward_source {
                RewardSource::Mint => {
                    next_state.check_mint(&reward)?;
                    next_state.apply_mint(&mut owner_row, &reward);
                    events.push(
                        NewEvent::new(EventKind::Mint, STAKING_ACTOR)
                            .counterparty(owner)
                            .amount(&reward)
                            .reference(position.id),
                    );
                }
                RewardSource::Pool(_) => {
                    let pool = pool.ok_or_else(|| {
                        LedgerError::InvalidState(format!("position {} is owned by the reward pool", position.id))
                    })?;
                    let mut row = locked.get(pool)?.clone();
                    row.debit(pool, &reward, false)?;
                    owner_row.credit(&reward);
                    pool_row = Some(row);
                    events.push(
                        NewEvent::new(EventKind::Transfer, pool)
                            .counterparty(owner)
                            .amount(&reward)
                            .reference(position.id),
                    );
                }
            }
        }
        let returned = &position.locked_amount + &reward;
        events.push(NewEvent::new(kind, owner).amount(&returned).reference(position.id));

        let recorded = self.events.append_all(token, events)?;
        *locked.get_mut(owner)? = owner_row;
        if let (Some(pool), Some(row)) = (pool, pool_row) {
            *locked.get_mut(pool)? = row;
        }
        *state = next_state;

        Ok(UnstakeReceipt {
            position_id: position.id,
            token: token.to_string(),
            owner: owner.to_string(),
            released: position.locked_amount.clone(),
            rewards: reward,
            penalty,
            sequence: recorded.last().map(|e| e.sequence).unwrap_or_default(),
        })
    }
}
