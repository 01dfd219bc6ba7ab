use chrono::{DateTime, Duration, Utc};
use num_traits::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rewards;
use crate::account::types::{Address, Amount, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Locked,
    Unstakeable,
    Closed,
}

/// A stake earmarked against `owner`'s balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakePosition {
    pub id: Uuid,
    pub token: TokenId,
    pub owner: Address,
    /// Grows when rewards are compounded.
    #[serde(with = "crate::encoding::amount")]
    pub principal: Amount,
    /// Amount earmarked on the owner's account. Never changes after stake.
    #[serde(with = "crate::encoding::amount")]
    pub locked_amount: Amount,
    pub start_time: DateTime<Utc>,
    pub lock_period_secs: u64,
    pub reward_rate_annual: Decimal,
    #[serde(with = "crate::encoding::amount")]
    pub accrued_rewards: Amount,
    /// Start of the window `accrued_rewards` covers; reset by compounding.
    pub accrual_start: DateTime<Utc>,
    pub accrued_until: DateTime<Utc>,
    pub compounding: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl StakePosition {
    pub fn new(
        token: &str,
        owner: &str,
        amount: Amount,
        lock_period_secs: u64,
        rate: Decimal,
        compounding: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: token.to_string(),
            owner: owner.to_string(),
            principal: amount.clone(),
            locked_amount: amount,
            start_time: now,
            lock_period_secs,
            reward_rate_annual: rate,
            accrued_rewards: Amount::zero(),
            accrual_start: now,
            accrued_until: now,
            compounding,
            closed_at: None,
        }
    }

    pub fn unlocks_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.lock_period_secs).unwrap_or(i64::MAX);
        self.start_time
            .checked_add_signed(Duration::seconds(secs.min(i64::MAX / 1_000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn status(&self, now: DateTime<Utc>) -> PositionStatus {
        if self.closed_at.is_some() {
            PositionStatus::Closed
        } else if now < self.unlocks_at() {
            PositionStatus::Locked
        } else {
            PositionStatus::Unstakeable
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Rewards for `[accrual_start, as_of)` computed from scratch, so
    /// accruing twice to the same instant gives the same figure.
    pub fn rewards_at(&self, as_of: DateTime<Utc>) -> Amount {
        let secs = u64::try_from((as_of - self.accrual_start).num_seconds()).unwrap_or(0);
        rewards::accrued(&self.principal, self.reward_rate_annual, secs, self.compounding)
    }

    /// Bring `accrued_rewards` up to `as_of`, never past `now`. Never moves backwards.
    pub fn accrue(&mut self, as_of: DateTime<Utc>, now: DateTime<Utc>) -> &Amount {
        let as_of = as_of.min(now);
        if as_of > self.accrued_until {
            self.accrued_rewards = self.rewards_at(as_of);
            self.accrued_until = as_of;
        }
        &self.accrued_rewards
    }

    /// Recompute `accrued_rewards` at exactly `now`. Used before anything is
    /// paid out or folded into principal.
    pub fn accrue_now(&mut self, now: DateTime<Utc>) -> &Amount {
        self.accrued_rewards = self.rewards_at(now);
        self.accrued_until = now;
        &self.accrued_rewards
    }

    /// Fold accrued rewards into principal and restart the accrual window.
    pub fn compound(&mut self) -> Amount {
        let folded = std::mem::take(&mut self.accrued_rewards);
        self.principal += &folded;
        self.accrual_start = self.accrued_until;
        folded
    }

    /// Everything owed on top of the earmark: compounded growth plus accrued rewards.
    pub fn reward_due(&self) -> Amount {
        &self.principal - &self.locked_amount + &self.accrued_rewards
    }

    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        self.principal = Amount::zero();
        self.accrued_rewards = Amount::zero();
        self.closed_at = Some(at);
    }
}
