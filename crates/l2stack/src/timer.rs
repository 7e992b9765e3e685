//! Tick-driven timer wheel.
//!
//! A single-threaded timer facility driven entirely by `step()` calls from the host
//! (one per protocol tick — typically 1ms). No wall clock is read anywhere in this
//! crate; tests advance time by calling `step()`, which keeps the whole stack
//! deterministic.

use std::collections::HashMap;

/// Opaque handle to a scheduled timer, returned by [`TickTimerWheel::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry {
    expires_at: u64,
    running: bool,
}

/// Drives every timer owned by one bearer. Expiry callbacks run synchronously inside
/// `step()`; a callback must not re-arm the same handle re-entrantly (it may call
/// `create` for a *new* handle, or `run` to restart itself, but not mutate the
/// wheel's iteration state directly — `step()` snapshots expired handles up front).
pub struct TickTimerWheel {
    now: u64,
    next_handle: u64,
    entries: HashMap<TimerHandle, Entry>,
}

impl Default for TickTimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTimerWheel {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_handle: 0,
            entries: HashMap::new(),
        }
    }

    /// Registers a new timer, initially stopped. Call [`run`](Self::run) to arm it.
    pub fn create(&mut self, duration_ticks: u64) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.entries.insert(
            handle,
            Entry {
                expires_at: self.now.wrapping_add(duration_ticks),
                running: false,
            },
        );
        handle
    }

    /// Arms (or re-arms) a timer, restarting its duration from the current tick.
    pub fn run(&mut self, handle: TimerHandle, duration_ticks: u64) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.expires_at = self.now.wrapping_add(duration_ticks);
            entry.running = true;
        }
    }

    pub fn stop(&mut self, handle: TimerHandle) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.running = false;
        }
    }

    pub fn is_running(&self, handle: TimerHandle) -> bool {
        self.entries.get(&handle).is_some_and(|e| e.running)
    }

    /// Drops a timer entirely, freeing its slot.
    pub fn remove(&mut self, handle: TimerHandle) {
        self.entries.remove(&handle);
    }

    pub fn current_tick(&self) -> u64 {
        self.now
    }

    /// Advances the wheel by `ticks` and returns every handle whose timer expired
    /// during the advance, in the order they were originally created. Expired
    /// one-shot timers are stopped (but not removed); the caller decides whether to
    /// re-arm via `run`.
    pub fn step(&mut self, ticks: u64) -> Vec<TimerHandle> {
        self.now = self.now.wrapping_add(ticks);
        let mut expired: Vec<TimerHandle> = self
            .entries
            .iter()
            .filter(|(_, e)| e.running && e.expires_at <= self.now)
            .map(|(h, _)| *h)
            .collect();
        expired.sort_by_key(|h| h.0);
        for handle in &expired {
            if let Some(entry) = self.entries.get_mut(handle) {
                entry.running = false;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_expires_after_duration() {
        let mut wheel = TickTimerWheel::new();
        let h = wheel.create(10);
        wheel.run(h, 10);
        assert!(wheel.step(9).is_empty());
        assert_eq!(wheel.step(1), vec![h]);
        assert!(!wheel.is_running(h));
    }

    #[test]
    fn stopped_timer_never_fires() {
        let mut wheel = TickTimerWheel::new();
        let h = wheel.create(5);
        wheel.run(h, 5);
        wheel.stop(h);
        assert!(wheel.step(100).is_empty());
    }

    #[test]
    fn restarting_extends_deadline() {
        let mut wheel = TickTimerWheel::new();
        let h = wheel.create(10);
        wheel.run(h, 10);
        wheel.step(5);
        wheel.run(h, 10); // restart from tick 5 -> expires at tick 15
        assert!(wheel.step(9).is_empty()); // now at tick 14
        assert_eq!(wheel.step(1), vec![h]); // tick 15
    }
}
