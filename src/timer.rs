//! Timer queue for the reactor.
//!
//! Sessions arm at most one reconnect timer each and servers arm at most
//! one port-retry timer each (spec.md §5 — "the only timers"). That
//! cardinality does not reward the teacher's hierarchical wheel
//! (`cyclone::timer::TimerWheel`, levels of `VecDeque` slots sized for
//! tens of thousands of timers and an `Arc<dyn TimerCallback>` per
//! entry); a single sorted queue is the right tool here. We keep the
//! teacher's token/slotmap shape (`TimerToken` backed by a `slotmap`, for
//! O(1) cancellation) and replace the wheel with a `BinaryHeap` ordered
//! by expiry, and replace the callback-object-per-timer indirection with
//! a plain generic payload: the reactor (the only caller) just wants to
//! know *which* session or server timed out, not to invoke an opaque
//! closure reaching back into state it does not have a handle to here.

use slotmap::{new_key_type, SlotMap};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

new_key_type! {
    /// Handle to a scheduled timer, returned by [`TimerWheel::schedule`].
    pub struct TimerToken;
}

struct ScheduledEntry {
    expiration: Instant,
    token: TimerToken,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expiration == other.expiration
    }
}
impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest expiry on top.
        other.expiration.cmp(&self.expiration)
    }
}

/// A sorted queue of armed timers, each carrying a `T` identifying who
/// armed it, drained once per reactor poll.
///
/// Cancellation is lazy: the slotmap entry is removed immediately, and
/// the (now-orphaned) heap entry is discarded without firing when it is
/// popped — the same "not in the slotmap anymore" technique the teacher
/// uses in `cyclone::timer::TimerWheel::cancel`.
pub struct TimerWheel<T> {
    payloads: SlotMap<TimerToken, T>,
    heap: BinaryHeap<ScheduledEntry>,
}

impl<T> TimerWheel<T> {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self {
            payloads: SlotMap::with_key(),
            heap: BinaryHeap::new(),
        }
    }

    /// Schedule `payload` to be returned from [`Self::advance_time`] once
    /// `delay` has elapsed. Returns a token that can cancel it first.
    pub fn schedule(&mut self, delay: Duration, payload: T) -> TimerToken {
        let token = self.payloads.insert(payload);
        self.heap.push(ScheduledEntry {
            expiration: Instant::now() + delay,
            token,
        });
        token
    }

    /// Cancel a scheduled timer, returning its payload if it was still pending.
    pub fn cancel(&mut self, token: TimerToken) -> Option<T> {
        self.payloads.remove(token)
    }

    /// Remove and return the payloads of every timer whose expiration is
    /// at or before `now`, earliest first.
    pub fn advance_time(&mut self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.expiration > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            if let Some(payload) = self.payloads.remove(entry.token) {
                fired.push(payload);
            }
        }
        fired
    }

    /// The expiration of the next pending timer, if any — used by the
    /// reactor to bound its poll timeout instead of busy-spinning.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.expiration)
    }

    /// Number of timers still armed (survives cancellation bookkeeping).
    pub fn pending_count(&self) -> usize {
        self.payloads.len()
    }
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_delay_not_before() {
        let mut wheel = TimerWheel::new();
        let start = Instant::now();
        wheel.schedule(Duration::from_millis(50), "session-1");

        assert!(wheel.advance_time(start).is_empty());
        assert!(wheel.advance_time(start + Duration::from_millis(49)).is_empty());
        assert_eq!(wheel.advance_time(start + Duration::from_millis(50)), vec!["session-1"]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::new();
        let token = wheel.schedule(Duration::from_millis(10), 42);
        assert_eq!(wheel.cancel(token), Some(42));
        assert_eq!(wheel.cancel(token), None);
        assert!(wheel.advance_time(Instant::now() + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn multiple_timers_fire_in_expiry_order() {
        let mut wheel = TimerWheel::new();
        let start = Instant::now();

        wheel.schedule(Duration::from_millis(30), 1);
        wheel.schedule(Duration::from_millis(10), 2);
        wheel.schedule(Duration::from_millis(20), 3);

        assert_eq!(wheel.advance_time(start + Duration::from_millis(40)), vec![2, 3, 1]);
    }

    #[test]
    fn next_deadline_reflects_earliest_pending_timer() {
        let mut wheel = TimerWheel::new();
        assert!(wheel.next_deadline().is_none());
        wheel.schedule(Duration::from_millis(100), ());
        assert!(wheel.next_deadline().is_some());
    }

    #[test]
    fn pending_count_decreases_after_fire_and_cancel() {
        let mut wheel = TimerWheel::new();
        let a = wheel.schedule(Duration::from_millis(10), "a");
        wheel.schedule(Duration::from_millis(20), "b");
        assert_eq!(wheel.pending_count(), 2);
        wheel.cancel(a);
        assert_eq!(wheel.pending_count(), 1);
        wheel.advance_time(Instant::now() + Duration::from_secs(1));
        assert_eq!(wheel.pending_count(), 0);
    }
}
