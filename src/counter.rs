//! Sequence bookkeeping shared by fences and waiters.
//!
//! A [`SequenceCounter`] exists once per device context. It hands out
//! strictly increasing sequence numbers to new fences, records the highest
//! sequence the device has reported complete, and remembers when progress was
//! last observed so that blocked waiters can tell a slow device from a stalled
//! one.
//!
//! The counter also owns the wait queue: the mutex/condvar pair that
//! [`wait_for_sequence`](crate::wait::wait_for_sequence) blocks on and that
//! [`advance_to`](SequenceCounter::advance_to) notifies.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::FenceConfig;
use crate::error::FenceResult;

/// State guarded by the wait queue lock.
#[derive(Debug)]
pub(crate) struct WaitState {
    /// Last time the device reported progress (or a stall was handled).
    pub(crate) last_activity: Instant,
    /// Bumped every time interruptible waiters are cancelled.
    pub(crate) interrupt_epoch: u64,
}

/// Snapshot of counter statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterStats {
    /// Highest sequence handed out so far.
    pub last_assigned: u64,
    /// Highest sequence the device has completed.
    pub last_completed: u64,
    /// Number of [`SequenceCounter::is_signaled`] lookups.
    pub signal_queries: u64,
    /// Fences created from this counter that are still alive.
    pub live_fences: usize,
    /// Number of lockups declared by waiters.
    pub lockups: u64,
}

/// Process-wide sequence counter for one device context.
///
/// # Thread Safety
///
/// All operations take `&self` and are safe to call from any thread. The
/// sequence words are atomics; `last_activity` lives under the wait queue
/// lock so that a waiter can snapshot it and block without missing a wakeup.
#[derive(Debug)]
pub struct SequenceCounter {
    /// Last sequence handed out. Sequence `0` is never assigned.
    sync_seq: AtomicU64,
    /// Highest sequence confirmed by the device.
    last_seq: AtomicU64,
    wait_state: Mutex<WaitState>,
    wake: Condvar,
    config: FenceConfig,
    signal_queries: AtomicU64,
    live_fences: AtomicUsize,
    lockups: AtomicU64,
}

impl SequenceCounter {
    /// Create a counter with the default configuration.
    pub fn new() -> Self {
        Self::with_valid_config(FenceConfig::default())
    }

    /// Create a counter with a custom configuration.
    ///
    /// Returns [`FenceError::InvalidArgument`](crate::FenceError::InvalidArgument)
    /// if the configuration has a zero interval.
    pub fn with_config(config: FenceConfig) -> FenceResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: FenceConfig) -> Self {
        Self {
            sync_seq: AtomicU64::new(0),
            last_seq: AtomicU64::new(0),
            wait_state: Mutex::new(WaitState {
                last_activity: Instant::now(),
                interrupt_epoch: 0,
            }),
            wake: Condvar::new(),
            config,
            signal_queries: AtomicU64::new(0),
            live_fences: AtomicUsize::new(0),
            lockups: AtomicU64::new(0),
        }
    }

    /// Assign the next sequence number.
    ///
    /// Numbers start at 1 and are strictly increasing. If every previously
    /// assigned sequence has already completed, the device was idle rather
    /// than stalled, so the activity timestamp is re-armed.
    pub fn next_sequence(&self) -> u64 {
        let previous = self.sync_seq.fetch_add(1, Ordering::AcqRel);
        if previous <= self.last_seq.load(Ordering::Acquire) {
            self.wait_state.lock().last_activity = Instant::now();
        }
        previous.wrapping_add(1)
    }

    /// Record that the device has completed everything up to `seq`.
    ///
    /// `last_completed` only ever grows. A report beyond the last assigned
    /// sequence is clamped. Every call counts as device activity and wakes
    /// all blocked waiters.
    pub fn advance_to(&self, seq: u64) {
        let assigned = self.sync_seq.load(Ordering::Acquire);
        let seq = if seq > assigned {
            log::warn!(
                "Completion reported for unassigned sequence {} (last assigned {})",
                seq,
                assigned
            );
            assigned
        } else {
            seq
        };

        self.last_seq.fetch_max(seq, Ordering::AcqRel);
        self.wait_state.lock().last_activity = Instant::now();
        self.wake.notify_all();
    }

    /// Check whether `seq` has completed.
    pub fn is_signaled(&self, seq: u64) -> bool {
        self.signal_queries.fetch_add(1, Ordering::Relaxed);
        self.reached(seq)
    }

    /// Highest completed sequence.
    pub fn last_completed(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Highest assigned sequence, or 0 if none has been assigned.
    pub fn last_assigned(&self) -> u64 {
        self.sync_seq.load(Ordering::Acquire)
    }

    /// Last time progress was reported.
    pub fn last_activity(&self) -> Instant {
        self.wait_state.lock().last_activity
    }

    /// Cancel every interruptible wait currently blocked on this counter.
    ///
    /// Affected waiters return [`FenceError::Interrupted`](crate::FenceError::Interrupted).
    /// Non-interruptible waiters keep waiting.
    pub fn interrupt_waiters(&self) {
        self.wait_state.lock().interrupt_epoch += 1;
        self.wake.notify_all();
    }

    /// Note that an external policy has handled a stall (e.g. reset the device).
    ///
    /// Restarts the lockup window for all waiters.
    pub fn mark_recovered(&self) {
        self.wait_state.lock().last_activity = Instant::now();
        self.wake.notify_all();
    }

    /// Current statistics.
    pub fn stats(&self) -> CounterStats {
        CounterStats {
            last_assigned: self.last_assigned(),
            last_completed: self.last_completed(),
            signal_queries: self.signal_queries.load(Ordering::Relaxed),
            live_fences: self.live_fences.load(Ordering::Acquire),
            lockups: self.lockups.load(Ordering::Relaxed),
        }
    }

    /// Configuration this counter was created with.
    pub fn config(&self) -> &FenceConfig {
        &self.config
    }

    /// Signaled check that does not count as a query.
    pub(crate) fn reached(&self, seq: u64) -> bool {
        self.last_seq.load(Ordering::Acquire) >= seq
    }

    pub(crate) fn lock_wait_state(&self) -> MutexGuard<'_, WaitState> {
        self.wait_state.lock()
    }

    pub(crate) fn wake(&self) -> &Condvar {
        &self.wake
    }

    pub(crate) fn record_lockup(&self) {
        self.lockups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fence_created(&self) {
        self.live_fences.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn fence_destroyed(&self) {
        self.live_fences.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let counter = SequenceCounter::new();
        let seqs: Vec<u64> = (0..100).map(|_| counter.next_sequence()).collect();
        assert_eq!(seqs[0], 1);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(counter.last_assigned(), 100);
    }

    #[test]
    fn test_concurrent_sequences_are_unique() {
        let counter = Arc::new(SequenceCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    (0..1000).map(|_| counter.next_sequence()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(seen.insert(seq), "sequence {seq} assigned twice");
            }
        }
        assert_eq!(seen.len(), 8000);
        assert_eq!(counter.last_assigned(), 8000);
    }

    #[test]
    fn test_advance_and_signaled() {
        let counter = SequenceCounter::new();
        for _ in 0..10 {
            counter.next_sequence();
        }

        counter.advance_to(4);
        assert!((1..=4).all(|seq| counter.is_signaled(seq)));
        assert!((5..=10).all(|seq| !counter.is_signaled(seq)));
    }

    #[test]
    fn test_last_completed_never_decreases() {
        let counter = SequenceCounter::new();
        for _ in 0..10 {
            counter.next_sequence();
        }

        counter.advance_to(7);
        counter.advance_to(3);
        assert_eq!(counter.last_completed(), 7);
        assert!(counter.is_signaled(5));
    }

    #[test]
    fn test_advance_clamped_to_assigned() {
        let counter = SequenceCounter::new();
        counter.next_sequence();
        counter.next_sequence();

        counter.advance_to(50);
        assert_eq!(counter.last_completed(), 2);
        assert!(counter.last_completed() <= counter.last_assigned());
    }

    #[test]
    fn test_advance_stamps_activity() {
        let counter = SequenceCounter::new();
        counter.next_sequence();
        let before = counter.last_activity();

        std::thread::sleep(Duration::from_millis(5));
        counter.advance_to(1);
        assert!(counter.last_activity() > before);
    }

    #[test]
    fn test_idle_emit_rearms_activity() {
        let counter = SequenceCounter::new();
        counter.next_sequence();
        counter.advance_to(1);
        let idle_since = counter.last_activity();

        std::thread::sleep(Duration::from_millis(5));
        counter.next_sequence();
        assert!(counter.last_activity() > idle_since);

        // Outstanding work: emitting more must not postpone lockup detection.
        let busy_since = counter.last_activity();
        std::thread::sleep(Duration::from_millis(5));
        counter.next_sequence();
        assert_eq!(counter.last_activity(), busy_since);
    }

    #[test]
    fn test_signal_queries_counted() {
        let counter = SequenceCounter::new();
        counter.is_signaled(1);
        counter.is_signaled(2);
        assert!(!counter.reached(1));
        assert_eq!(counter.stats().signal_queries, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FenceConfig::default().with_lockup_window(Duration::ZERO);
        assert!(SequenceCounter::with_config(config).is_err());
    }
}
