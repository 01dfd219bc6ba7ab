//! Caller context and bounded lock acquisition.
//!
//! No ledger operation blocks indefinitely. Every lock is taken with
//! `try_lock` plus exponential backoff until the earlier of the configured
//! lock timeout and the caller's own deadline, then gives up with `Busy`.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::LockConfig;
use crate::error::{LedgerError, LedgerResult};

const MAX_BACKOFF: Duration = Duration::from_millis(1);

/// Per-call context supplied by the request handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort lock waits once `deadline` has passed.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Lock wait budget for one operation.
#[derive(Debug, Clone, Copy)]
pub struct LockBudget {
    deadline: Instant,
    backoff: Duration,
}

impl LockBudget {
    pub fn new(policy: &LockConfig, ctx: &OpContext) -> Self {
        let policy_deadline = Instant::now() + policy.timeout();
        let deadline = match ctx.deadline {
            Some(d) if d < policy_deadline => d,
            _ => policy_deadline,
        };
        Self {
            deadline,
            backoff: policy.backoff(),
        }
    }

    /// Lock `row`, waiting at most until the budget's deadline.
    pub fn lock<'a, T>(&self, row: &'a Mutex<T>, what: &str) -> LedgerResult<MutexGuard<'a, T>> {
        let mut backoff = self.backoff;
        loop {
            match row.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(LedgerError::StorageUnavailable(format!(
                        "{} row poisoned by an earlier panic",
                        what
                    )));
                }
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= self.deadline {
                        debug!(row = what, "lock wait timed out");
                        return Err(LedgerError::Busy(format!("{} is locked", what)));
                    }
                    thread::sleep(backoff.min(self.deadline - now));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Take a short-lived lock on a registry map (read path, never held across rows).
pub fn read_registry<'a, T>(lock: &'a std::sync::RwLock<T>) -> LedgerResult<std::sync::RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| LedgerError::StorageUnavailable("registry poisoned".to_string()))
}

pub fn write_registry<'a, T>(lock: &'a std::sync::RwLock<T>) -> LedgerResult<std::sync::RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| LedgerError::StorageUnavailable("registry poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_policy() -> LockConfig {
        LockConfig {
            timeout_ms: 20,
            backoff_us: 10,
        }
    }

    #[test]
    fn test_uncontended_lock() {
        let row = Mutex::new(5u32);
        let budget = LockBudget::new(&fast_policy(), &OpContext::new());
        let guard = budget.lock(&row, "row").unwrap();
        assert_eq!(*guard, 5);
    }

    #[test]
    fn test_contended_lock_times_out_with_busy() {
        let row = Arc::new(Mutex::new(0u32));
        let _held = row.lock().unwrap();
        let budget = LockBudget::new(&fast_policy(), &OpContext::new());
        let start = Instant::now();
        let err = budget.lock(&row, "alice").unwrap_err();
        assert!(matches!(err, LedgerError::Busy(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_caller_deadline_wins_over_policy() {
        let row = Mutex::new(0u32);
        let _held = row.lock().unwrap();
        let policy = LockConfig {
            timeout_ms: 60_000,
            backoff_us: 10,
        };
        let ctx = OpContext::with_timeout(Duration::from_millis(5));
        let start = Instant::now();
        let err = LockBudget::new(&policy, &ctx).lock(&row, "alice").unwrap_err();
        assert!(err.is_retryable());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_poisoned_row_is_storage_unavailable() {
        let row = Arc::new(Mutex::new(0u32));
        let r = row.clone();
        let _ = std::thread::spawn(move || {
            let _g = r.lock().unwrap();
            panic!("boom");
        })
        .join();
        let err = LockBudget::new(&fast_policy(), &OpContext::new())
            .lock(&row, "alice")
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
