//! Monotonic time sources and the per-session delta clock
//!
//! The engine never reads wall time for deltas. It samples a wrapping
//! millisecond counter (like a microcontroller's `millis()`) and converts the
//! gap since the previous logged event into log ticks.
//!
//! Wraparound of the counter is harmless: all subtraction is modular.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of a wrapping millisecond counter
pub trait MonotonicClock {
    /// Milliseconds since an arbitrary origin, wrapping at `u32::MAX`
    fn now_ms(&self) -> u32;
}

/// Millisecond counter backed by `std::time::Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap
        self.origin.elapsed().as_millis() as u32
    }
}

/// Hand-driven clock for simulations and tests
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u32) {
        let current = self.now.load(Ordering::Relaxed);
        self.now.store(current.wrapping_add(ms), Ordering::Relaxed);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

/// What happens to the sub-tick part of an elapsed interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderPolicy {
    /// Keep the leftover milliseconds and add them to the next interval,
    /// so encoded ticks never drift from elapsed time.
    #[default]
    Carry,
    /// Floor every interval independently. Drifts by up to one tick per event.
    Drop,
}

/// Converts "now" into the tick delta since the previous event
///
/// The first call in a session returns 0 and anchors the clock.
#[derive(Debug, Clone)]
pub struct DeltaClock {
    tick_ms: u32,
    policy: RemainderPolicy,
    session_start: Option<u32>,
    last_event: u32,
    remainder_ms: u32,
}

impl DeltaClock {
    /// Create a clock with the given tick length in milliseconds
    ///
    /// # Panics
    ///
    /// Panics if `tick_ms` is zero.
    pub fn new(tick_ms: u32, policy: RemainderPolicy) -> Self {
        assert!(tick_ms > 0, "tick length must be at least 1ms");
        Self {
            tick_ms,
            policy,
            session_start: None,
            last_event: 0,
            remainder_ms: 0,
        }
    }

    /// Tick delta between the previous call and `now_ms`
    pub fn next_delta(&mut self, now_ms: u32) -> u32 {
        if self.session_start.is_none() {
            self.session_start = Some(now_ms);
            self.last_event = now_ms;
            self.remainder_ms = 0;
            return 0;
        }

        let elapsed = now_ms.wrapping_sub(self.last_event) as u64;
        self.last_event = now_ms;

        match self.policy {
            RemainderPolicy::Drop => (elapsed / self.tick_ms as u64) as u32,
            RemainderPolicy::Carry => {
                let total = elapsed + self.remainder_ms as u64;
                self.remainder_ms = (total % self.tick_ms as u64) as u32;
                (total / self.tick_ms as u64) as u32
            }
        }
    }

    /// Counter value of the first event, if any event has been timed yet
    pub fn session_start(&self) -> Option<u32> {
        self.session_start
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delta_is_zero() {
        let mut clock = DeltaClock::new(10, RemainderPolicy::Carry);
        assert_eq!(clock.next_delta(123_456), 0);
        assert_eq!(clock.session_start(), Some(123_456));
    }

    #[test]
    fn test_note_scenario_deltas() {
        let mut clock = DeltaClock::new(10, RemainderPolicy::Drop);
        let deltas: Vec<u32> = [0, 120, 500].iter().map(|&t| clock.next_delta(t)).collect();
        assert_eq!(deltas, vec![0, 12, 38]);
    }

    #[test]
    fn test_drop_policy_loses_remainders() {
        let mut clock = DeltaClock::new(10, RemainderPolicy::Drop);
        clock.next_delta(0);
        let total: u32 = (1..=10).map(|i| clock.next_delta(i * 15)).sum();
        // 150ms elapsed, but every 15ms interval floors to 1 tick
        assert_eq!(total, 10);
    }

    #[test]
    fn test_carry_policy_tracks_elapsed_time() {
        let mut clock = DeltaClock::new(10, RemainderPolicy::Carry);
        clock.next_delta(0);
        let total: u32 = (1..=10).map(|i| clock.next_delta(i * 15)).sum();
        assert_eq!(total, 15);
    }

    #[test]
    fn test_counter_wraparound() {
        let mut clock = DeltaClock::new(1, RemainderPolicy::Carry);
        clock.next_delta(u32::MAX - 4);
        assert_eq!(clock.next_delta(5), 10);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(u32::MAX);
        clock.advance(2);
        assert_eq!(clock.now_ms(), 1);
    }

    #[test]
    #[should_panic]
    fn test_zero_tick_length_rejected() {
        DeltaClock::new(0, RemainderPolicy::Drop);
    }
}
