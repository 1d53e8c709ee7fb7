//! Blocking wait with lockup detection.
//!
//! A waiter never sleeps longer than the remaining lockup window measured
//! from the last observed device activity. When the window runs out without
//! the target completing, the waiter re-validates against a snapshot taken
//! before it blocked:
//!
//! - `last_completed` moved: the device is progressing, keep waiting.
//! - `last_activity` moved: a stall was already handled elsewhere (or the
//!   device reported in), keep waiting.
//! - neither moved: no progress for a full window, report a lockup.
//!
//! If the target completes at the same moment the window expires, success
//! wins: the signaled predicate is checked before any lockup test.

use std::time::{Duration, Instant};

use crate::counter::SequenceCounter;
use crate::error::{FenceError, FenceResult};

/// Block until `target_seq` has completed on `counter`.
///
/// With `interruptible` set, [`SequenceCounter::interrupt_waiters`] aborts
/// the wait with [`FenceError::Interrupted`]. Shared state is not touched on
/// that path, so the wait can be retried.
///
/// Returns [`FenceError::DeviceTimeout`] once a full lockup window passes
/// with no completion progress and no recovery.
///
/// Declaring a lockup does not touch `last_activity`, so every waiter blocked
/// on a stalled device reports it. Duplicate declarations collapse only once
/// the reset policy calls [`SequenceCounter::mark_recovered`]: waiters that
/// have not declared yet see the new activity stamp and keep waiting.
pub fn wait_for_sequence(
    counter: &SequenceCounter,
    target_seq: u64,
    interruptible: bool,
) -> FenceResult<()> {
    let config = *counter.config();
    let mut state = counter.lock_wait_state();

    while !counter.reached(target_seq) {
        let timeout = remaining_window(
            state.last_activity,
            Instant::now(),
            config.lockup_window,
            config.min_wait,
        );

        let observed_seq = counter.last_completed();
        let observed_activity = state.last_activity;
        let observed_epoch = state.interrupt_epoch;

        let result = counter.wake().wait_while_for(
            &mut state,
            |s| {
                !counter.reached(target_seq)
                    && !(interruptible && s.interrupt_epoch != observed_epoch)
            },
            timeout,
        );

        if counter.reached(target_seq) {
            break;
        }

        if interruptible && state.interrupt_epoch != observed_epoch {
            log::debug!("Wait for sequence {} interrupted", target_seq);
            return Err(FenceError::Interrupted);
        }

        if !result.timed_out() {
            continue;
        }

        if counter.last_completed() != observed_seq {
            continue;
        }

        if state.last_activity != observed_activity {
            continue;
        }

        counter.record_lockup();
        log::warn!(
            "GPU lockup: no progress for {:?} waiting for sequence {} (last completed {})",
            config.lockup_window,
            target_seq,
            observed_seq
        );
        return Err(FenceError::DeviceTimeout {
            sequence: target_seq,
            last_completed: observed_seq,
        });
    }

    Ok(())
}

/// Time left until `window` has elapsed since `last_activity`.
///
/// Falls back to `min_wait` when the window is already used up. A window
/// too large to add to `last_activity` never elapses.
fn remaining_window(
    last_activity: Instant,
    now: Instant,
    window: Duration,
    min_wait: Duration,
) -> Duration {
    let Some(deadline) = last_activity.checked_add(window) else {
        return window;
    };
    match deadline.checked_duration_since(now) {
        Some(remaining) if !remaining.is_zero() => remaining,
        _ => min_wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FenceConfig;
    use std::sync::Arc;

    fn counter_with_window(ms: u64) -> Arc<SequenceCounter> {
        let config = FenceConfig::default().with_lockup_window(Duration::from_millis(ms));
        Arc::new(SequenceCounter::with_config(config).unwrap())
    }

    #[test]
    fn test_remaining_window() {
        let window = Duration::from_millis(500);
        let tick = Duration::from_millis(1);
        let start = Instant::now();

        assert_eq!(remaining_window(start, start, window, tick), window);
        assert_eq!(
            remaining_window(start, start + Duration::from_millis(200), window, tick),
            Duration::from_millis(300)
        );
        assert_eq!(remaining_window(start, start + window, window, tick), tick);
        assert_eq!(
            remaining_window(start, start + Duration::from_secs(5), window, tick),
            tick
        );
    }

    #[test]
    fn test_remaining_window_saturates() {
        let start = Instant::now();
        let tick = Duration::from_millis(1);
        assert_eq!(
            remaining_window(start, start, Duration::MAX, tick),
            Duration::MAX
        );
    }

    #[test]
    fn test_unbounded_window_waits_for_completion() {
        let config = FenceConfig::default().with_lockup_window(Duration::MAX);
        let counter = Arc::new(SequenceCounter::with_config(config).unwrap());
        let seq = counter.next_sequence();

        let producer = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.advance_to(seq);
        });

        assert_eq!(wait_for_sequence(&counter, seq, false), Ok(()));
        handle.join().unwrap();
    }

    #[test]
    fn test_recovery_after_lockup_rearms_window() {
        let counter = counter_with_window(100);
        let seq = counter.next_sequence();
        assert!(wait_for_sequence(&counter, seq, false)
            .unwrap_err()
            .is_lockup());

        // Without recovery the window is already spent and the next wait
        // would report the lockup again after a single tick.
        counter.mark_recovered();
        let producer = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(40));
            producer.advance_to(seq);
        });

        assert_eq!(wait_for_sequence(&counter, seq, false), Ok(()));
        assert_eq!(counter.stats().lockups, 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_already_signaled_returns_immediately() {
        let counter = counter_with_window(50);
        let seq = counter.next_sequence();
        counter.advance_to(seq);

        let start = Instant::now();
        assert!(wait_for_sequence(&counter, seq, false).is_ok());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_wakes_on_advance() {
        let counter = counter_with_window(2000);
        let seq = counter.next_sequence();

        let producer = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.advance_to(seq);
        });

        let start = Instant::now();
        assert!(wait_for_sequence(&counter, seq, false).is_ok());
        assert!(start.elapsed() < Duration::from_millis(2000));
        handle.join().unwrap();
    }

    #[test]
    fn test_lockup_after_window() {
        let counter = counter_with_window(100);
        let seq = counter.next_sequence();

        let start = Instant::now();
        let err = wait_for_sequence(&counter, seq, false).unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(
            err,
            FenceError::DeviceTimeout {
                sequence: seq,
                last_completed: 0
            }
        );
        assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");
        assert_eq!(counter.stats().lockups, 1);
    }

    #[test]
    fn test_progress_postpones_lockup() {
        let counter = counter_with_window(100);
        let first = counter.next_sequence();
        let second = counter.next_sequence();

        let producer = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(70));
            producer.advance_to(first);
            std::thread::sleep(Duration::from_millis(70));
            producer.advance_to(second);
        });

        // 140ms total exceeds one window, but progress arrives inside each.
        assert!(wait_for_sequence(&counter, second, false).is_ok());
        assert_eq!(counter.stats().lockups, 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_recovery_postpones_lockup() {
        let counter = counter_with_window(100);
        let seq = counter.next_sequence();

        let policy = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(70));
            policy.mark_recovered();
            std::thread::sleep(Duration::from_millis(70));
            policy.advance_to(seq);
        });

        assert!(wait_for_sequence(&counter, seq, false).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_interrupt_only_affects_interruptible() {
        let counter = counter_with_window(2000);
        let seq = counter.next_sequence();

        let waiter = Arc::clone(&counter);
        let interruptible = std::thread::spawn(move || wait_for_sequence(&waiter, seq, true));
        let waiter = Arc::clone(&counter);
        let uninterruptible = std::thread::spawn(move || wait_for_sequence(&waiter, seq, false));

        std::thread::sleep(Duration::from_millis(100));
        counter.interrupt_waiters();
        assert_eq!(interruptible.join().unwrap(), Err(FenceError::Interrupted));

        counter.advance_to(seq);
        assert_eq!(uninterruptible.join().unwrap(), Ok(()));
    }
}
