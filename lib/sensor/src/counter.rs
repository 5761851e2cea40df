//! Counters shared between an interrupt handler (single writer) and the main
//! loop (single reader).
//!
//! The reader collects by reading the count and subtracting what it read, so an
//! increment landing between the two is left in place and shows up on the next
//! collect, at most one loop late.

use core::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct EventCounter {
    count: AtomicU32,
}

impl EventCounter {
    pub const fn new() -> EventCounter {
        EventCounter {
            count: AtomicU32::new(0),
        }
    }

    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Take every event recorded so far.
    pub fn collect(&self) -> u32 {
        let seen = self.count.load(Ordering::Acquire);
        self.count.fetch_sub(seen, Ordering::AcqRel);
        seen
    }

    pub fn pending(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// Push button edge counter with a minimum delay between accepted presses.
#[derive(Debug)]
pub struct DebouncedButton {
    presses: EventCounter,
    last_press_ms: AtomicU32,
    min_delay_ms: u32,
}

impl DebouncedButton {
    pub const fn new(min_delay_ms: u32) -> DebouncedButton {
        DebouncedButton {
            presses: EventCounter::new(),
            last_press_ms: AtomicU32::new(0),
            min_delay_ms,
        }
    }

    /// Call from the edge interrupt.
    pub fn on_edge(&self, now_ms: u32) {
        let last = self.last_press_ms.load(Ordering::Acquire);
        if now_ms.wrapping_sub(last) > self.min_delay_ms {
            self.presses.record();
            self.last_press_ms.store(now_ms, Ordering::Release);
        }
    }

    pub fn collect_presses(&self) -> u32 {
        self.presses.collect()
    }
}

/// Remembers when a button was last pressed so a long hold can be detected by polling.
#[derive(Debug)]
pub struct LongPress {
    last_press_ms: AtomicU32,
}

impl LongPress {
    pub const fn new() -> LongPress {
        LongPress {
            last_press_ms: AtomicU32::new(0),
        }
    }

    pub fn on_press(&self, now_ms: u32) {
        self.last_press_ms.store(now_ms, Ordering::Release);
    }

    pub fn held_for(&self, now_ms: u32, pressed: bool, hold_ms: u32) -> bool {
        pressed && now_ms.wrapping_sub(self.last_press_ms.load(Ordering::Acquire)) > hold_ms
    }
}
