use num_traits::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::account::auth::AuthoritySet;
use crate::account::types::{AccountRow, Amount, TokenId};
use crate::error::{LedgerError, LedgerResult};

/// Supply row and policy of one token. Lives behind [`TokenHandle::state`].
#[derive(Debug, Clone)]
pub struct TokenState {
    pub total_supply: Amount,
    pub circulating_supply: Amount,
    pub max_supply: Option<Amount>,
    pub authorities: AuthoritySet,
    /// Highest annual reward rate a stake may be opened with.
    pub max_reward_rate: Decimal,
}

impl TokenState {
    pub fn new(admin: &str, max_supply: Option<Amount>, max_reward_rate: Decimal) -> Self {
        Self {
            total_supply: Amount::zero(),
            circulating_supply: Amount::zero(),
            max_supply,
            authorities: AuthoritySet::with_admin(admin),
            max_reward_rate,
        }
    }

    /// Cap check for issuing `amount` more.
    pub fn check_mint(&self, amount: &Amount) -> LedgerResult<()> {
        if let Some(max) = &self.max_supply {
            let would_have = &self.total_supply + amount;
            if would_have > *max {
                return Err(LedgerError::SupplyCapExceeded {
                    max: max.clone(),
                    would_have,
                });
            }
        }
        Ok(())
    }

    /// Issue `amount` into `row`. Caller has validated with [`check_mint`](Self::check_mint).
    pub fn apply_mint(&mut self, row: &mut AccountRow, amount: &Amount) {
        self.total_supply += amount;
        self.circulating_supply += amount;
        row.credit(amount);
    }

    /// Destroy `amount` from `row`. `privileged` lets compliance seize from frozen accounts.
    pub fn apply_burn(&mut self, row: &mut AccountRow, address: &str, amount: &Amount, privileged: bool) -> LedgerResult<()> {
        row.check_debit(address, amount, privileged)?;
        if self.circulating_supply < *amount || self.total_supply < *amount {
            return Err(LedgerError::InvalidState(format!(
                "burn of {} exceeds recorded supply {}",
                amount, self.circulating_supply
            )));
        }
        row.debit(address, amount, privileged)?;
        self.total_supply -= amount;
        self.circulating_supply -= amount;
        Ok(())
    }

    pub fn view(&self, token: &str, paused: bool) -> SupplyView {
        SupplyView {
            token: token.to_string(),
            total_supply: self.total_supply.clone(),
            circulating_supply: self.circulating_supply.clone(),
            max_supply: self.max_supply.clone(),
            paused,
            max_reward_rate: self.max_reward_rate,
        }
    }
}

/// Registered token: supply row under a mutex, pause flag readable without it.
///
/// Operations that never take the supply row (transfers, approvals) hold
/// `activity` shared from their pause check until they commit; pause changes
/// take it exclusively, so no such operation lands after a `Paused` event.
#[derive(Debug)]
pub struct TokenHandle {
    pub id: TokenId,
    pub state: Mutex<TokenState>,
    paused: AtomicBool,
    activity: RwLock<()>,
}

impl TokenHandle {
    pub fn new(id: &str, state: TokenState) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(state),
            paused: AtomicBool::new(false),
            activity: RwLock::new(()),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Only called with `state` locked so pause changes are ordered with other policy changes.
    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn ensure_active(&self) -> LedgerResult<()> {
        if self.is_paused() {
            Err(LedgerError::Paused(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Pause check for operations that do not lock `state`; keep the guard until commit.
    pub fn enter(&self) -> LedgerResult<RwLockReadGuard<'_, ()>> {
        let guard = self.activity.read().map_err(|_| self.gate_poisoned())?;
        self.ensure_active()?;
        Ok(guard)
    }

    /// Waits for in-flight [`enter`](Self::enter) holders to commit.
    pub(crate) fn quiesce(&self) -> LedgerResult<RwLockWriteGuard<'_, ()>> {
        self.activity.write().map_err(|_| self.gate_poisoned())
    }

    fn gate_poisoned(&self) -> LedgerError {
        LedgerError::StorageUnavailable(format!("activity gate of {} poisoned", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyView {
    pub token: TokenId,
    #[serde(with = "crate::encoding::amount")]
    pub total_supply: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub circulating_supply: Amount,
    #[serde(with = "crate::encoding::amount_opt")]
    pub max_supply: Option<Amount>,
    pub paused: bool,
    pub max_reward_rate: Decimal,
}

/// Result of checking `sum(balances) == circulating supply` for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyAudit {
    pub token: TokenId,
    #[serde(with = "crate::encoding::amount")]
    pub circulating_supply: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub total_supply: Amount,
    #[serde(with = "crate::encoding::amount")]
    pub sum_of_balances: Amount,
    pub accounts: usize,
}

impl SupplyAudit {
    pub fn is_conserved(&self) -> bool {
        self.sum_of_balances == self.circulating_supply && self.circulating_supply <= self.total_supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn amt(n: u64) -> Amount {
        Amount::from(n)
    }

    #[test]
    fn test_cap_check() {
        let mut state = TokenState::new("root", Some(amt(100)), Decimal::ONE);
        let mut row = AccountRow::default();
        state.check_mint(&amt(100)).unwrap();
        state.apply_mint(&mut row, &amt(60));
        let err = state.check_mint(&amt(41)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::SupplyCapExceeded {
                max: amt(100),
                would_have: amt(101)
            }
        );
    }

    #[test]
    fn test_burn_keeps_supply_and_balance_in_step() {
        let mut state = TokenState::new("root", None, Decimal::ONE);
        let mut row = AccountRow::default();
        state.apply_mint(&mut row, &amt(50));
        state.apply_burn(&mut row, "alice", &amt(20), false).unwrap();
        assert_eq!(state.total_supply, amt(30));
        assert_eq!(state.circulating_supply, amt(30));
        assert_eq!(row.balance, amt(30));

        assert!(state.apply_burn(&mut row, "alice", &amt(31), false).is_err());
        assert_eq!(state.total_supply, amt(30));
    }

    #[test]
    fn test_pause_flag() {
        let handle = TokenHandle::new("T1", TokenState::new("root", None, Decimal::ONE));
        handle.ensure_active().unwrap();
        handle.set_paused(true);
        assert_eq!(handle.ensure_active().unwrap_err(), LedgerError::Paused("T1".to_string()));
    }

    #[test]
    fn test_pause_waits_for_in_flight_operations() {
        let handle = Arc::new(TokenHandle::new("T1", TokenState::new("root", None, Decimal::ONE)));
        let active = handle.enter().unwrap();

        let (tx, rx) = mpsc::channel();
        let pauser = {
            let handle = handle.clone();
            thread::spawn(move || {
                let _gate = handle.quiesce().unwrap();
                handle.set_paused(true);
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!handle.is_paused());

        drop(active);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pauser.join().unwrap();
        assert!(matches!(handle.enter(), Err(LedgerError::Paused(_))));
    }
}
