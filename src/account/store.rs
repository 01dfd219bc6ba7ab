//! Account storage: balances, allowances and freeze flags keyed by (token, address)
//!
//! Each account row sits behind its own mutex. Operations touching several
//! rows lock them through a [`RowSet`], which always acquires in ascending
//! address order so overlapping multi-row operations cannot deadlock.
//! Rows that end an operation empty are dropped again, so failed calls
//! against unknown addresses leave no trace in the registry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

use super::types::{AccountKey, AccountRow, AccountSnapshot, Address, Amount, TokenId};
use crate::config::LockConfig;
use crate::context::{read_registry, write_registry, LockBudget, OpContext};
use crate::error::{LedgerError, LedgerResult};

type Row = Arc<Mutex<AccountRow>>;
type Registry = Arc<RwLock<BTreeMap<AccountKey, Row>>>;

/// Owner of every balance and allowance in the ledger.
pub struct AccountStore {
    rows: Registry,
    locks: LockConfig,
}

impl AccountStore {
    pub fn new(locks: LockConfig) -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            locks,
        }
    }

    pub fn budget(&self, ctx: &OpContext) -> LockBudget {
        LockBudget::new(&self.locks, ctx)
    }

    fn existing(&self, token: &str, address: &str) -> LedgerResult<Option<Row>> {
        let rows = read_registry(&self.rows)?;
        Ok(rows.get(&AccountKey::new(token, address)).cloned())
    }

    fn row(&self, token: &str, address: &str) -> LedgerResult<Row> {
        if let Some(row) = self.existing(token, address)? {
            return Ok(row);
        }
        let mut rows = write_registry(&self.rows)?;
        Ok(rows
            .entry(AccountKey::new(token, address))
            .or_default()
            .clone())
    }

    /// Rows for `addresses` (created on demand), deduplicated and sorted.
    pub fn rows<'s, I>(&self, token: &str, addresses: I) -> LedgerResult<RowSet>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let mut wanted: Vec<&str> = addresses.into_iter().collect();
        wanted.sort_unstable();
        wanted.dedup();
        let mut rows = Vec::with_capacity(wanted.len());
        for address in wanted {
            rows.push((address.to_string(), self.row(token, address)?));
        }
        Ok(RowSet {
            token: token.to_string(),
            rows,
            registry: self.rows.clone(),
        })
    }

    fn single(&self, token: &str, address: &str) -> LedgerResult<RowSet> {
        self.rows(token, [address])
    }

    /// Every row that exists for `token`, in address order.
    pub fn token_rows(&self, token: &str) -> LedgerResult<RowSet> {
        let registry = read_registry(&self.rows)?;
        let start = AccountKey::new(token, "");
        let rows = registry
            .range(start..)
            .take_while(|(k, _)| k.token == token)
            .map(|(k, row)| (k.address.clone(), row.clone()))
            .collect();
        Ok(RowSet {
            token: token.to_string(),
            rows,
            registry: self.rows.clone(),
        })
    }

    /// Unknown addresses read as an empty account.
    pub fn snapshot(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<AccountSnapshot> {
        match self.existing(token, address)? {
            Some(row) => {
                let guard = self.budget(ctx).lock(&row, address)?;
                Ok(AccountSnapshot::from_row(&AccountKey::new(token, address), &guard))
            }
            None => Ok(AccountSnapshot::empty(token, address)),
        }
    }

    pub fn get_balance(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<Amount> {
        Ok(self.snapshot(ctx, token, address)?.balance)
    }

    /// Raw credit. Does not touch supply or the event log; the supply
    /// controller and transfer engine compose this into audited operations.
    pub fn credit(&self, ctx: &OpContext, token: &str, address: &str, amount: &Amount) -> LedgerResult<()> {
        let row = self.single(token, address)?;
        let mut locked = row.lock(&self.budget(ctx))?;
        locked.get_mut(address)?.credit(amount);
        debug!(token, address, %amount, "credit");
        Ok(())
    }

    /// Raw debit against the available (non-earmarked) balance.
    pub fn debit(&self, ctx: &OpContext, token: &str, address: &str, amount: &Amount) -> LedgerResult<()> {
        let row = self.single(token, address)?;
        let mut locked = row.lock(&self.budget(ctx))?;
        locked.get_mut(address)?.debit(address, amount, false)?;
        debug!(token, address, %amount, "debit");
        Ok(())
    }

    /// Absolute set; overwrites the previous limit.
    pub fn set_allowance(
        &self,
        ctx: &OpContext,
        token: &str,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> LedgerResult<()> {
        let row = self.single(token, owner)?;
        let mut locked = row.lock(&self.budget(ctx))?;
        locked.get_mut(owner)?.set_allowance(spender, amount);
        Ok(())
    }

    pub fn allowance(&self, ctx: &OpContext, token: &str, owner: &str, spender: &str) -> LedgerResult<Amount> {
        match self.existing(token, owner)? {
            Some(row) => Ok(self.budget(ctx).lock(&row, owner)?.allowance(spender)),
            None => Ok(Amount::default()),
        }
    }

    pub fn consume_allowance(
        &self,
        ctx: &OpContext,
        token: &str,
        owner: &str,
        spender: &str,
        amount: &Amount,
    ) -> LedgerResult<()> {
        let row = self.single(token, owner)?;
        let mut locked = row.lock(&self.budget(ctx))?;
        locked.get_mut(owner)?.consume_allowance(owner, spender, amount)
    }

    /// Idempotent.
    pub fn freeze(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<()> {
        self.set_frozen(ctx, token, address, true)
    }

    /// Idempotent.
    pub fn unfreeze(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<()> {
        self.set_frozen(ctx, token, address, false)
    }

    fn set_frozen(&self, ctx: &OpContext, token: &str, address: &str, frozen: bool) -> LedgerResult<()> {
        let row = self.single(token, address)?;
        let mut locked = row.lock(&self.budget(ctx))?;
        locked.get_mut(address)?.frozen = frozen;
        Ok(())
    }

    pub fn is_frozen(&self, ctx: &OpContext, token: &str, address: &str) -> LedgerResult<bool> {
        Ok(self.snapshot(ctx, token, address)?.frozen)
    }
}

/// A sorted, deduplicated set of rows of one token, ready to be locked together.
pub struct RowSet {
    token: TokenId,
    rows: Vec<(Address, Row)>,
    registry: Registry,
}

impl RowSet {
    /// Lock every row in ascending address order.
    pub fn lock(&self, budget: &LockBudget) -> LedgerResult<LockedRows<'_>> {
        let mut guards = Vec::with_capacity(self.rows.len());
        for (address, row) in &self.rows {
            guards.push((address.as_str(), budget.lock(row, address)?));
        }
        Ok(LockedRows {
            token: &self.token,
            guards,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Drop for RowSet {
    fn drop(&mut self) {
        let empty: Vec<Address> = self
            .rows
            .iter()
            .filter(|(_, row)| row.try_lock().map(|r| r.is_empty()).unwrap_or(false))
            .map(|(address, _)| address.clone())
            .collect();
        if empty.is_empty() {
            return;
        }
        self.rows.clear();
        let Ok(mut registry) = self.registry.write() else {
            return;
        };
        for address in empty {
            let key = AccountKey::new(&self.token, &address);
            // Under the write lock nobody can pick up a new handle, so a
            // count of one means no other operation holds this row.
            let unused = registry.get(&key).is_some_and(|row| {
                Arc::strong_count(row) == 1 && row.try_lock().map(|r| r.is_empty()).unwrap_or(false)
            });
            if unused {
                registry.remove(&key);
                debug!(token = %self.token, address = %address, "dropped empty account row");
            }
        }
    }
}

/// Guards over a [`RowSet`]; released together on drop.
pub struct LockedRows<'a> {
    token: &'a str,
    guards: Vec<(&'a str, MutexGuard<'a, AccountRow>)>,
}

impl<'a> LockedRows<'a> {
    fn position(&self, address: &str) -> LedgerResult<usize> {
        self.guards
            .binary_search_by(|(a, _)| (*a).cmp(address))
            .map_err(|_| LedgerError::InvalidState(format!("account {} was not locked", address)))
    }

    pub fn get(&self, address: &str) -> LedgerResult<&AccountRow> {
        let i = self.position(address)?;
        Ok(&self.guards[i].1)
    }

    pub fn get_mut(&mut self, address: &str) -> LedgerResult<&mut AccountRow> {
        let i = self.position(address)?;
        Ok(&mut self.guards[i].1)
    }

    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        self.guards
            .iter()
            .map(|(address, row)| AccountSnapshot::from_row(&AccountKey::new(self.token, address), row))
            .collect()
    }

    pub fn total_balance(&self) -> Amount {
        self.guards.iter().map(|(_, row)| &row.balance).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn store() -> AccountStore {
        AccountStore::new(LockConfig::default())
    }

    fn amt(n: u64) -> Amount {
        Amount::from(n)
    }

    #[test]
    fn test_unknown_address_reads_zero() {
        let s = store();
        let ctx = OpContext::new();
        assert_eq!(s.get_balance(&ctx, "T1", "nobody").unwrap(), amt(0));
        assert_eq!(s.allowance(&ctx, "T1", "nobody", "bob").unwrap(), amt(0));
        assert!(s.token_rows("T1").unwrap().is_empty());
    }

    #[test]
    fn test_credit_and_debit() {
        let s = store();
        let ctx = OpContext::new();
        s.credit(&ctx, "T1", "alice", &amt(1000)).unwrap();
        s.debit(&ctx, "T1", "alice", &amt(300)).unwrap();
        assert_eq!(s.get_balance(&ctx, "T1", "alice").unwrap(), amt(700));
        assert!(matches!(
            s.debit(&ctx, "T1", "alice", &amt(1000)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        // Same address, different token: independent row.
        assert_eq!(s.get_balance(&ctx, "T2", "alice").unwrap(), amt(0));
    }

    #[test]
    fn test_set_allowance_overwrites() {
        let s = store();
        let ctx = OpContext::new();
        s.set_allowance(&ctx, "T1", "alice", "bob", amt(50)).unwrap();
        s.set_allowance(&ctx, "T1", "alice", "bob", amt(20)).unwrap();
        assert_eq!(s.allowance(&ctx, "T1", "alice", "bob").unwrap(), amt(20));
        s.consume_allowance(&ctx, "T1", "alice", "bob", &amt(20)).unwrap();
        assert!(matches!(
            s.consume_allowance(&ctx, "T1", "alice", "bob", &amt(1)),
            Err(LedgerError::AllowanceExceeded { .. })
        ));
    }

    #[test]
    fn test_freeze_is_idempotent_and_blocks_debit() {
        let s = store();
        let ctx = OpContext::new();
        s.credit(&ctx, "T1", "alice", &amt(10)).unwrap();
        s.freeze(&ctx, "T1", "alice").unwrap();
        s.freeze(&ctx, "T1", "alice").unwrap();
        assert!(s.is_frozen(&ctx, "T1", "alice").unwrap());
        assert!(matches!(s.debit(&ctx, "T1", "alice", &amt(1)), Err(LedgerError::AccountFrozen(_))));
        s.credit(&ctx, "T1", "alice", &amt(1)).unwrap();
        s.unfreeze(&ctx, "T1", "alice").unwrap();
        s.debit(&ctx, "T1", "alice", &amt(11)).unwrap();
    }

    #[test]
    fn test_failed_calls_leave_no_empty_rows() {
        let s = store();
        let ctx = OpContext::new();
        assert!(s.debit(&ctx, "T1", "ghost", &amt(5)).is_err());
        assert!(s.consume_allowance(&ctx, "T1", "ghost", "bob", &amt(1)).is_err());
        s.unfreeze(&ctx, "T1", "ghost").unwrap();
        drop(s.rows("T1", ["ghost", "phantom"]).unwrap());
        assert!(s.token_rows("T1").unwrap().is_empty());

        // Rows that hold anything survive.
        s.credit(&ctx, "T1", "alice", &amt(1)).unwrap();
        s.freeze(&ctx, "T1", "bob").unwrap();
        let names: Vec<String> = {
            let set = s.token_rows("T1").unwrap();
            let locked = set.lock(&s.budget(&ctx)).unwrap();
            locked.snapshots().into_iter().map(|a| a.address).collect()
        };
        assert_eq!(names, vec!["alice", "bob"]);

        // Drained back to nothing: gone again.
        s.debit(&ctx, "T1", "alice", &amt(1)).unwrap();
        assert_eq!(s.token_rows("T1").unwrap().len(), 1);
    }

    #[test]
    fn test_rowset_sorted_and_deduplicated() {
        let s = store();
        let set = s.rows("T1", ["carol", "alice", "carol", "bob"]).unwrap();
        assert_eq!(set.len(), 3);
        let locked = set.lock(&s.budget(&OpContext::new())).unwrap();
        let names: Vec<String> = locked.snapshots().into_iter().map(|a| a.address).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert!(locked.get("dave").is_err());
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let s = Arc::new(store());
        let ctx = OpContext::new();
        s.credit(&ctx, "T1", "alice", &amt(100)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                thread::spawn(move || {
                    let ctx = OpContext::new();
                    let mut ok = 0u64;
                    for _ in 0..50 {
                        loop {
                            match s.debit(&ctx, "T1", "alice", &Amount::from(1u32)) {
                                Ok(()) => {
                                    ok += 1;
                                    break;
                                }
                                Err(e) if e.is_retryable() => continue,
                                Err(_) => break,
                            }
                        }
                    }
                    ok
                })
            })
            .collect();

        let succeeded: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(succeeded, 100);
        assert_eq!(s.get_balance(&ctx, "T1", "alice").unwrap(), amt(0));
    }
}
