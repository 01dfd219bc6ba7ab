//! Account type definitions

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LedgerError, LedgerResult};

/// Token identifier (e.g. "T1", "GILT-2031", "LOYALTY")
pub type TokenId = String;

/// Account address - opaque string chosen by the caller
pub type Address = String;

/// Token quantity in base units
pub type Amount = BigUint;

/// Key of one account row: the same address holds independent rows per token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub token: TokenId,
    pub address: Address,
}

impl AccountKey {
    pub fn new(token: &str, address: &str) -> Self {
        Self {
            token: token.to_string(),
            address: address.to_string(),
        }
    }
}

/// Mutable state of one account. Only the account store hands these out,
/// always behind the row's mutex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountRow {
    pub balance: Amount,
    pub frozen: bool,
    /// Portion of `balance` earmarked by open stake positions.
    pub staked: Amount,
    /// spender -> remaining limit
    pub allowances: HashMap<Address, Amount>,
}

impl AccountRow {
    /// Indistinguishable from an address the store has never seen.
    pub fn is_empty(&self) -> bool {
        *self == AccountRow::default()
    }

    /// Balance not earmarked for staking.
    pub fn available(&self) -> Amount {
        if self.staked >= self.balance {
            Amount::zero()
        } else {
            &self.balance - &self.staked
        }
    }

    pub fn allowance(&self, spender: &str) -> Amount {
        self.allowances.get(spender).cloned().unwrap_or_default()
    }

    /// Outbound checks: frozen accounts are blocked unless `privileged`,
    /// and the amount must fit in the available balance.
    pub fn check_debit(&self, address: &str, amount: &Amount, privileged: bool) -> LedgerResult<()> {
        if self.frozen && !privileged {
            return Err(LedgerError::AccountFrozen(address.to_string()));
        }
        let available = self.available();
        if *amount > available {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount.clone(),
            });
        }
        Ok(())
    }

    pub fn debit(&mut self, address: &str, amount: &Amount, privileged: bool) -> LedgerResult<()> {
        self.check_debit(address, amount, privileged)?;
        self.balance -= amount;
        Ok(())
    }

    /// Inbound transfers are accepted even while frozen.
    pub fn credit(&mut self, amount: &Amount) {
        self.balance += amount;
    }

    pub fn check_allowance(&self, owner: &str, spender: &str, amount: &Amount) -> LedgerResult<()> {
        if self.frozen {
            return Err(LedgerError::AccountFrozen(owner.to_string()));
        }
        let limit = self.allowance(spender);
        if *amount > limit {
            return Err(LedgerError::AllowanceExceeded {
                limit,
                requested: amount.clone(),
            });
        }
        Ok(())
    }

    pub fn consume_allowance(&mut self, owner: &str, spender: &str, amount: &Amount) -> LedgerResult<()> {
        self.check_allowance(owner, spender, amount)?;
        let remaining = self.allowance(spender) - amount;
        self.allowances.insert(spender.to_string(), remaining);
        Ok(())
    }

    pub fn set_allowance(&mut self, spender: &str, amount: Amount) {
        if amount.is_zero() {
            self.allowances.remove(spender);
        } else {
            self.allowances.insert(spender.to_string(), amount);
        }
    }

    pub fn check_earmark(&self, address: &str, amount: &Amount) -> LedgerResult<()> {
        self.check_debit(address, amount, false)
    }

    pub fn earmark(&mut self, address: &str, amount: &Amount) -> LedgerResult<()> {
        self.check_earmark(address, amount)?;
        self.staked += amount;
        Ok(())
    }

    /// Release a stake earmark; saturates at zero.
    pub fn release(&mut self, amount: &Amount) {
        if self.staked <= *amount {
            self.staked = Amount::zero();
        } else {
            self.staked -= amount;
        }
    }
}

/// Read-only copy of an account handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub token: TokenId,
    pub address: Address,
    #[serde(with = "crate::encoding::amount")]
    pub balance: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub staked: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub available: Amount,
    pub frozen: bool,
}

impl AccountSnapshot {
    pub fn from_row(key: &AccountKey, row: &AccountRow) -> Self {
        Self {
            token: key.token.clone(),
            address: key.address.clone(),
            balance: row.balance.clone(),
            staked: row.staked.clone(),
            available: row.available(),
            frozen: row.frozen,
        }
    }

    pub fn empty(token: &str, address: &str) -> Self {
        Self::from_row(&AccountKey::new(token, address), &AccountRow::default())
    }
}
