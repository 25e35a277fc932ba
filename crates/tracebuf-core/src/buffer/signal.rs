//! Wait/notify plumbing for the buffer stages.
//!
//! Each stage owns one signal: a condition variable with a minimal mutex
//! that is only held while checking the wake condition and waiting. Buffer
//! state itself is never protected by this mutex.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Condition variable with interrupt and shutdown support.
#[derive(Debug, Default)]
pub(crate) struct StageSignal {
    lock: Mutex<()>,
    condvar: Condvar,
    waiters: AtomicUsize,
    interrupts: AtomicU64,
    closed: AtomicBool,
}

/// Interrupt generation observed when a stage call started.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ticket(u64);

impl StageSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Snapshot the interrupt generation; interrupts after this are observed by `wait_until`.
    pub(crate) fn ticket(&self) -> Ticket {
        Ticket(self.interrupts.load(Ordering::Acquire))
    }

    /// Block until `ready` holds. Returns `false` if interrupted or closed instead.
    ///
    /// Notifiers publish their state change before calling `notify`, and the
    /// condition is re-checked under the lock after registering as a waiter,
    /// so a wakeup cannot be lost between the check and the wait.
    pub(crate) fn wait_until(&self, ticket: Ticket, mut ready: impl FnMut() -> bool) -> bool {
        if self.is_interrupted(ticket) {
            return false;
        }
        if ready() {
            return true;
        }

        let mut guard = self.lock.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let ready = loop {
            if self.is_interrupted(ticket) {
                break false;
            }
            if ready() {
                break true;
            }
            self.condvar.wait(&mut guard);
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        ready
    }

    /// Wake all waiters. Cheap when nobody waits.
    pub(crate) fn notify(&self) {
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    /// Make every wait that is currently blocked return `false` once.
    pub(crate) fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::AcqRel);
        self.wake();
    }

    /// Make all current and future waits return `false` until `reopen`.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake();
    }

    pub(crate) fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_interrupted(&self, ticket: Ticket) -> bool {
        self.is_closed() || self.interrupts.load(Ordering::Acquire) != ticket.0
    }

    fn wake(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ready_returns_immediately() {
        let signal = StageSignal::new();
        assert!(signal.wait_until(signal.ticket(), || true));
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let signal = Arc::new(StageSignal::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                let ticket = signal.ticket();
                signal.wait_until(ticket, || flag.load(Ordering::SeqCst))
            })
        };

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
        signal.notify();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_interrupt_wakes_waiter() {
        let signal = Arc::new(StageSignal::new());

        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let ticket = signal.ticket();
                signal.wait_until(ticket, || false)
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.interrupt();

        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_interrupt_before_ticket_is_not_observed() {
        let signal = StageSignal::new();
        signal.interrupt();

        let ticket = signal.ticket();
        assert!(signal.wait_until(ticket, || true));
    }

    #[test]
    fn test_closed_signal_never_blocks() {
        let signal = StageSignal::new();
        signal.close();
        assert!(signal.is_closed());
        assert!(!signal.wait_until(signal.ticket(), || false));

        signal.reopen();
        assert!(!signal.is_closed());
        assert!(signal.wait_until(signal.ticket(), || true));
    }

    #[test]
    fn test_notify_without_waiters_is_noop() {
        let signal = StageSignal::new();
        signal.notify();
        assert_eq!(signal.waiters.load(Ordering::SeqCst), 0);
    }
}
