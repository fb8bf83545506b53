/*!
    Mutex + condition variable pair guarding a single predicate state.

    Every queue, decoder and scheduler in the engine coordinates through one
    of these. Mutations go through [`Monitor::update`], which always wakes
    waiters after mutating, so no caller can forget to signal.
*/

use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct Monitor<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /**
        Lock the state for reading or for a mutation that must not wake waiters.
    */
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /**
        Mutate the state and wake every waiter.
    */
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.state.lock();
        let result = f(&mut guard);
        self.cond.notify_all();
        result
    }

    /**
        Wake every waiter without mutating, for callers that already hold
        the guard and mutated through it.
    */
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /**
        Block until `condition` returns false, then return the locked state.
    */
    pub fn wait_while(&self, condition: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        let mut guard = self.state.lock();
        self.cond.wait_while(&mut guard, condition);
        guard
    }

    /**
        Block on an already held guard until `condition` returns false.
    */
    pub fn wait_guard_while(
        &self,
        guard: &mut MutexGuard<'_, T>,
        condition: impl FnMut(&mut T) -> bool,
    ) {
        self.cond.wait_while(guard, condition);
    }

    /**
        Like [`Monitor::wait_while`], but gives up after `timeout`.

        The returned flag is true if the wait timed out with the condition still holding.
    */
    pub fn wait_while_for(
        &self,
        condition: impl FnMut(&mut T) -> bool,
        timeout: Duration,
    ) -> (MutexGuard<'_, T>, bool) {
        let mut guard = self.state.lock();
        let result = self.cond.wait_while_for(&mut guard, condition, timeout);
        (guard, result.timed_out())
    }
}

static_assertions::assert_impl_all!(Monitor<usize>: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn update_wakes_waiter() {
        let monitor = Arc::new(Monitor::new(false));
        let waiter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || *monitor.wait_while(|ready| !*ready))
        };
        thread::sleep(Duration::from_millis(20));
        monitor.update(|ready| *ready = true);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn timed_wait_reports_timeout() {
        let monitor = Monitor::new(0u32);
        let start = Instant::now();
        let (guard, timed_out) = monitor.wait_while_for(|n| *n == 0, Duration::from_millis(20));
        assert!(timed_out);
        assert_eq!(*guard, 0);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn satisfied_condition_returns_immediately() {
        let monitor = Monitor::new(1u32);
        let (_, timed_out) = monitor.wait_while_for(|n| *n == 0, Duration::from_secs(5));
        assert!(!timed_out);
    }
}
