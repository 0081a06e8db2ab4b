//! Bounded memory accountant.
//!
//! Ground: `original_source/Source/ISOTP/include/Atomic_int64_t.h` — a signed
//! 64-bit counter behind a timeout-bounded mutex, with a
//! test-and-decrement admission primitive (`subIfResIsGreaterThanZero`) used
//! at every allocation site. `parking_lot::Mutex::try_lock_for` supplies the
//! timeout bound idiomatically (no platform `wait(timeout)` hook needed).

use std::time::Duration;

use parking_lot::Mutex;

/// Default mutex-acquisition timeout, mirroring
/// `DEFAULT_Atomic_int64_t_TIMEOUT` in the reference implementation.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 100;

/// Atomic signed byte counter guarding the runner memory budget.
///
/// All operations that would otherwise return `bool` in the C++ source
/// (`set`/`add`/`sub`) do so here too; `get` returns `Option<i64>` so a lock
/// timeout is distinguishable from a legitimate zero balance.
pub struct Accountant {
    value: Mutex<i64>,
    lock_timeout: Duration,
}

impl Accountant {
    /// Creates an accountant seeded with `initial` bytes of budget.
    pub fn new(initial: i64) -> Self {
        Self::with_lock_timeout(initial, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    /// Creates an accountant with a non-default mutex-acquisition timeout.
    pub fn with_lock_timeout(initial: i64, lock_timeout: Duration) -> Self {
        Accountant {
            value: Mutex::new(initial),
            lock_timeout,
        }
    }

    /// Reads the current balance. `None` on a mutex-acquisition timeout.
    pub fn get(&self) -> Option<i64> {
        self.value.try_lock_for(self.lock_timeout).map(|g| *g)
    }

    /// Unconditionally sets the balance. Returns `false` on a lock timeout.
    pub fn set(&self, new_value: i64) -> bool {
        match self.value.try_lock_for(self.lock_timeout) {
            Some(mut g) => {
                *g = new_value;
                true
            }
            None => false,
        }
    }

    /// Unconditionally adds (can be negative). Returns `false` on a lock
    /// timeout.
    pub fn add(&self, amount: i64) -> bool {
        match self.value.try_lock_for(self.lock_timeout) {
            Some(mut g) => {
                *g = g.saturating_add(amount);
                true
            }
            None => false,
        }
    }

    /// Unconditionally subtracts. Returns `false` on a lock timeout.
    pub fn sub(&self, amount: i64) -> bool {
        self.add(-amount)
    }

    /// The admission primitive: atomically subtracts `amount` iff the
    /// resulting balance would remain greater than zero. Returns `false`
    /// (balance untouched) if the admission would drive the balance to zero
    /// or below, or on a lock-acquisition timeout.
    pub fn sub_if_result_would_be_greater_than_zero(&self, amount: i64) -> bool {
        match self.value.try_lock_for(self.lock_timeout) {
            Some(mut g) => {
                if *g - amount > 0 {
                    *g -= amount;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_while_budget_remains_positive() {
        let a = Accountant::new(100);
        assert!(a.sub_if_result_would_be_greater_than_zero(50));
        assert_eq!(a.get(), Some(50));
        assert!(a.sub_if_result_would_be_greater_than_zero(49));
        assert_eq!(a.get(), Some(1));
    }

    #[test]
    fn rejects_when_result_would_not_be_positive() {
        let a = Accountant::new(100);
        assert!(!a.sub_if_result_would_be_greater_than_zero(100));
        assert_eq!(a.get(), Some(100));
        assert!(!a.sub_if_result_would_be_greater_than_zero(200));
        assert_eq!(a.get(), Some(100));
    }

    #[test]
    fn add_and_sub_are_unconditional() {
        let a = Accountant::new(10);
        assert!(a.add(5));
        assert_eq!(a.get(), Some(15));
        assert!(a.sub(30));
        assert_eq!(a.get(), Some(-15));
    }

    #[test]
    fn conservation_across_reserve_and_release() {
        let a = Accountant::new(1000);
        let before = a.get().unwrap();
        assert!(a.sub_if_result_would_be_greater_than_zero(64));
        assert!(a.add(64));
        assert_eq!(a.get(), Some(before));
    }
}
