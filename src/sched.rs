//! Discrete-event co-scheduler.
//!
//! Every activity other than instruction execution (device timing, DMA
//! transfer, console polling, clock ticks) is an *event*: a unit becomes
//! active for a bounded number of simulated instructions, and the CPU loop
//! drains expiring events between instructions.
//!
//! Units are identified by a caller-supplied token type; each system defines
//! its own unit enum and owns the dispatch from token to service routine.

/// Event queue keyed by simulated-instruction time.
///
/// Timestamps are absolute against a monotonically increasing instruction
/// counter. The queue is kept sorted by due time; a unit appears at most
/// once (re-activating replaces the pending entry).
#[derive(Debug, Clone)]
pub struct EventQueue<U: Copy + PartialEq> {
    /// Pending activations, earliest due time first
    entries: Vec<Entry<U>>,
    /// Simulated time in instructions since construction
    gtime: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry<U> {
    unit: U,
    due: u64,
}

impl<U: Copy + PartialEq> EventQueue<U> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            gtime: 0,
        }
    }

    /// Simulated time in instructions since construction
    pub fn gtime(&self) -> u64 {
        self.gtime
    }

    /// Advance simulated time by one instruction
    pub fn tick(&mut self) {
        self.gtime += 1;
    }

    /// Schedule a unit to be serviced `delay` instructions from now.
    /// Replaces any pending activation for the same unit.
    pub fn activate(&mut self, unit: U, delay: u64) {
        self.cancel(unit);
        let due = self.gtime + delay;
        let pos = self
            .entries
            .iter()
            .position(|e| e.due > due)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { unit, due });
    }

    /// Schedule only if the unit is not already pending
    pub fn activate_if_idle(&mut self, unit: U, delay: u64) {
        if !self.is_active(unit) {
            self.activate(unit, delay);
        }
    }

    /// Remove a pending activation
    pub fn cancel(&mut self, unit: U) {
        self.entries.retain(|e| e.unit != unit);
    }

    pub fn is_active(&self, unit: U) -> bool {
        self.entries.iter().any(|e| e.unit == unit)
    }

    /// Instructions until the unit fires, `None` if inactive
    pub fn remaining(&self, unit: U) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.unit == unit)
            .map(|e| e.due.saturating_sub(self.gtime))
    }

    /// True when the head of the queue is due
    pub fn event_pending(&self) -> bool {
        self.entries.first().map_or(false, |e| e.due <= self.gtime)
    }

    /// Pop the next due unit, if any
    pub fn next_due(&mut self) -> Option<U> {
        if self.event_pending() {
            Some(self.entries.remove(0).unit)
        } else {
            None
        }
    }

    /// Jump simulated time forward to the next pending activation.
    ///
    /// Used when the CPU has nothing to do but wait for a device: the wait
    /// state and the busy phase of a block transfer both burn time only up
    /// to the next event. Returns false if the queue is empty.
    pub fn warp_to_next(&mut self) -> bool {
        match self.entries.first() {
            Some(e) => {
                if e.due > self.gtime {
                    self.gtime = e.due;
                }
                true
            }
            None => false,
        }
    }

    /// Ride along with another unit: returns the delay that lines the caller
    /// up with `tick_unit`'s next firing, or `dflt` if it is not running.
    ///
    /// Keyboard and line polls co-schedule with the line-frequency clock so
    /// a single tick serves every poller.
    pub fn cosched(&self, tick_unit: U, dflt: u64) -> u64 {
        match self.remaining(tick_unit) {
            Some(0) | None => dflt,
            Some(t) => t,
        }
    }

    /// Drop every pending activation (power-on reset)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<U: Copy + PartialEq> Default for EventQueue<U> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum U {
        A,
        B,
        C,
    }

    #[test]
    fn test_activate_order() {
        let mut q = EventQueue::new();
        q.activate(U::B, 20);
        q.activate(U::A, 10);
        q.activate(U::C, 30);
        assert!(!q.event_pending());

        for _ in 0..10 {
            q.tick();
        }
        assert!(q.event_pending());
        assert_eq!(q.next_due(), Some(U::A));
        assert_eq!(q.next_due(), None);
        assert_eq!(q.remaining(U::B), Some(10));
    }

    #[test]
    fn test_reactivate_replaces() {
        let mut q = EventQueue::new();
        q.activate(U::A, 10);
        q.activate(U::A, 50);
        assert_eq!(q.remaining(U::A), Some(50));

        q.activate_if_idle(U::A, 5);
        assert_eq!(q.remaining(U::A), Some(50));
    }

    #[test]
    fn test_cancel() {
        let mut q = EventQueue::new();
        q.activate(U::A, 10);
        assert!(q.is_active(U::A));
        q.cancel(U::A);
        assert!(!q.is_active(U::A));
        assert_eq!(q.remaining(U::A), None);
    }

    #[test]
    fn test_warp() {
        let mut q = EventQueue::new();
        assert!(!q.warp_to_next());

        q.activate(U::A, 100);
        assert!(q.warp_to_next());
        assert_eq!(q.gtime(), 100);
        assert_eq!(q.next_due(), Some(U::A));
    }

    #[test]
    fn test_cosched() {
        let mut q = EventQueue::new();
        assert_eq!(q.cosched(U::A, 400), 400);

        q.activate(U::A, 33);
        assert_eq!(q.cosched(U::A, 400), 33);
    }

    #[test]
    fn test_zero_delay_fires_now() {
        let mut q = EventQueue::new();
        q.activate(U::A, 0);
        assert!(q.event_pending());
        assert_eq!(q.next_due(), Some(U::A));
    }
}
