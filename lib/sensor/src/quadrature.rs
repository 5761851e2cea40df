use core::sync::atomic::{AtomicI32, AtomicU8, Ordering};

// indexed by previous a, previous b, new a, new b
const TRANSITIONS: [i8; 16] = [
    0, -1, 1, 0,
    1, 0, 0, -1,
    -1, 0, 0, 1,
    0, 1, -1, 0,
];

/// Quadrature wheel decoder fed from the pin change interrupt.
#[derive(Debug)]
pub struct QuadratureDecoder {
    pins: AtomicU8,
    ticks: AtomicI32,
}

impl QuadratureDecoder {
    pub const fn new() -> QuadratureDecoder {
        QuadratureDecoder {
            pins: AtomicU8::new(0),
            ticks: AtomicI32::new(0),
        }
    }

    /// Set the pin levels read at startup, before enabling the interrupt.
    pub fn begin(&self, a: bool, b: bool) {
        self.pins.store(pin_bits(a, b), Ordering::Release);
    }

    pub fn on_change(&self, a: bool, b: bool) {
        let new = pin_bits(a, b);
        let previous = self.pins.swap(new, Ordering::AcqRel);
        let step = TRANSITIONS[(previous << 2 | new) as usize];
        if step != 0 {
            self.ticks.fetch_add(step as i32, Ordering::AcqRel);
        }
    }

    /// Ticks turned since the last collect.
    pub fn collect(&self) -> i32 {
        let seen = self.ticks.load(Ordering::Acquire);
        self.ticks.fetch_sub(seen, Ordering::AcqRel);
        seen
    }
}

fn pin_bits(a: bool, b: bool) -> u8 {
    (a as u8) << 1 | b as u8
}
