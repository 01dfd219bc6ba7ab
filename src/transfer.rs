//! Transfer Engine: single, delegated and batch transfers plus approvals
//!
//! Every operation locks all rows it touches up front (ascending address
//! order), validates, appends its events, then mutates. A failed check or
//! append therefore leaves every balance and allowance untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::account::store::AccountStore;
use crate::account::types::{Address, Amount, TokenId};
use crate::context::OpContext;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventKind, EventLog, NewEvent};
use crate::supply::controller::require_positive;
use crate::supply::SupplyController;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub token: TokenId,
    pub from: Address,
    pub to: Address,
    #[serde(with = "crate::encoding::amount")]
    pub amount: Amount,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub token: TokenId,
    pub from: Address,
    #[serde(with = "crate::encoding::amount")]
    pub total: Amount,
    pub transfers: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

/// One leg of a batch transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub to: Address,
    #[serde(with = "crate::encoding::amount")]
    pub amount: Amount,
}

impl BatchItem {
    pub fn new(to: &str, amount: Amount) -> Self {
        Self {
            to: to.to_string(),
            amount,
        }
    }
}

pub struct TransferEngine {
    accounts: Arc<AccountStore>,
    supply: Arc<SupplyController>,
    events: Arc<EventLog>,
}

impl TransferEngine {
    pub fn new(accounts: Arc<AccountStore>, supply: Arc<SupplyController>, events: Arc<EventLog>) -> Self {
        Self {
            accounts,
            supply,
            events,
        }
    }

    /// Move `amount` from `from` to `to`. A self-transfer changes nothing but is still recorded.
    pub fn transfer(&self, ctx: &OpContext, token: &str, from: &str, to: &str, amount: &Amount) -> LedgerResult<TransferReceipt> {
        self.move_funds(ctx, token, from, to, amount, None)
    }

    /// Spend `owner`'s funds on behalf of `spender`, consuming allowance first.
    pub fn transfer_from(
        &self,
        ctx: &OpContext,
        token: &str,
        spender: &str,
        owner: &str,
        to: &str,
        amount: &Amount,
    ) -> LedgerResult<TransferReceipt> {
        self.move_funds(ctx, token, owner, to, amount, Some(spender))
    }

    fn move_funds(
        &self,
        ctx: &OpContext,
        token: &str,
        from: &str,
        to: &str,
        amount: &Amount,
        spender: Option<&str>,
    ) -> LedgerResult<TransferReceipt> {
        require_positive(amount, "transfer")?;
        let handle = self.supply.handle(token)?;
        let _active = handle.enter()?;

        let rows = self.accounts.rows(token, [from, to])?;
        let mut locked = rows.lock(&self.accounts.budget(ctx))?;
        {
            let sender = locked.get(from)?;
            if let Some(spender) = spender {
                sender.check_allowance(from, spender, amount)?;
            }
            sender.check_debit(from, amount, false)?;
        }

        let mut event = NewEvent::new(EventKind::Transfer, from).counterparty(to).amount(amount);
        if let Some(spender) = spender {
            event = event.reference(format!("spender:{}", spender));
        }
        let recorded = self.events.append(token, event)?;

        if let Some(spender) = spender {
            locked.get_mut(from)?.consume_allowance(from, spender, amount)?;
        }
        if from != to {
            locked.get_mut(from)?.debit(from, amount, false)?;
            locked.get_mut(to)?.credit(amount);
        }
        debug!(token, from, to, %amount, seq = recorded.sequence, "transfer");

        Ok(TransferReceipt {
            token: token.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount: amount.clone(),
            sequence: recorded.sequence,
        })
    }

    /// All-or-nothing fan-out from `from`. The sender must cover the whole
    /// batch before any leg is applied; legs are recorded in caller order.
    pub fn batch_transfer(&self, ctx: &OpContext, token: &str, from: &str, items: &[BatchItem]) -> LedgerResult<BatchReceipt> {
        if items.is_empty() {
            return Err(LedgerError::InvalidArgument("batch has no transfers".to_string()));
        }
        for item in items {
            require_positive(&item.amount, "transfer")?;
        }
        let handle = self.supply.handle(token)?;
        let _active = handle.enter()?;
        let total: Amount = items.iter().map(|i| &i.amount).sum();

        let addresses = std::iter::once(from).chain(items.iter().map(|i| i.to.as_str()));
        let rows = self.accounts.rows(token, addresses)?;
        let mut locked = rows.lock(&self.accounts.budget(ctx))?;
        locked.get(from)?.check_debit(from, &total, false)?;

        let events = items
            .iter()
            .map(|i| NewEvent::new(EventKind::Transfer, from).counterparty(&i.to).amount(&i.amount))
            .collect();
        let recorded = self.events.append_all(token, events)?;

        locked.get_mut(from)?.debit(from, &total, false)?;
        for item in items {
            locked.get_mut(&item.to)?.credit(&item.amount);
        }
        info!(token, from, %total, legs = items.len(), "batch transfer");

        Ok(BatchReceipt {
            token: token.to_string(),
            from: from.to_string(),
            total,
            transfers: items.len(),
            first_sequence: recorded.first().map(|e| e.sequence).unwrap_or_default(),
            last_sequence: recorded.last().map(|e| e.sequence).unwrap_or_default(),
        })
    }

    /// Absolute allowance set (zero revokes).
    pub fn approve(&self, ctx: &OpContext, token: &str, owner: &str, spender: &str, amount: &Amount) -> LedgerResult<()> {
        self.update_allowance(ctx, token, owner, spender, |_| Ok(amount.clone()))
    }

    pub fn increase_allowance(&self, ctx: &OpContext, token: &str, owner: &str, spender: &str, by: &Amount) -> LedgerResult<Amount> {
        self.update_allowance(ctx, token, owner, spender, |current| Ok(current + by))?;
        self.accounts.allowance(ctx, token, owner, spender)
    }

    /// Saturates at zero.
    pub fn decrease_allowance(&self, ctx: &OpContext, token: &str, owner: &str, spender: &str, by: &Amount) -> LedgerResult<Amount> {
        self.update_allowance(ctx, token, owner, spender, |current| {
            Ok(if current > *by { current - by } else { Amount::default() })
        })?;
        self.accounts.allowance(ctx, token, owner, spender)
    }

    fn update_allowance<F>(&self, ctx: &OpContext, token: &str, owner: &str, spender: &str, next: F) -> LedgerResult<()>
    where
        F: FnOnce(Amount) -> LedgerResult<Amount>,
    {
        if owner == spender {
            return Err(LedgerError::InvalidArgument("owner cannot approve itself".to_string()));
        }
        let handle = self.supply.handle(token)?;
        let _active = handle.enter()?;
        let rows = self.accounts.rows(token, [owner])?;
        let mut locked = rows.lock(&self.accounts.budget(ctx))?;
        let row = locked.get_mut(owner)?;
        let limit = next(row.allowance(spender))?;
        self.events.append(
            token,
            NewEvent::new(EventKind::Approval, owner).counterparty(spender).amount(&limit),
        )?;
        row.set_allowance(spender, limit);
        Ok(())
    }

    pub fn allowance(&self, ctx: &OpContext, token: &str, owner: &str, spender: &str) -> LedgerResult<Amount> {
        self.accounts.allowance(ctx, token, owner, spender)
    }
}
