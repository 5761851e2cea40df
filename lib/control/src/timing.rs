/// Monotonic time source for the loop.
pub trait Clock {
    fn now_us(&mut self) -> u64;
    fn delay_us(&mut self, us: u32);
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopTimer {
    last_loop_us: Option<u64>,
    fps_gamma: f32,
    pub fps: f32,
    pub max_loop_us: u64,
}

impl LoopTimer {
    pub fn new(fps_gamma: f32) -> LoopTimer {
        LoopTimer {
            last_loop_us: None,
            fps_gamma,
            fps: 0.0,
            max_loop_us: 0,
        }
    }

    /// Waits out the rest of `min_period_us` and returns the seconds since the previous loop.
    ///
    /// The first call only records the start time and returns zero.
    pub fn update(&mut self, clock: &mut impl Clock, min_period_us: u32) -> f32 {
        let last = match self.last_loop_us {
            Some(last) => last,
            None => {
                self.last_loop_us = Some(clock.now_us());
                return 0.0;
            }
        };

        let mut now = clock.now_us();
        let busy = now.saturating_sub(last);
        self.max_loop_us = self.max_loop_us.max(busy);

        if busy < min_period_us as u64 {
            clock.delay_us(min_period_us - busy as u32);
            now = clock.now_us();
        }

        let elapsed_us = now.saturating_sub(last);
        self.last_loop_us = Some(now);

        let elapsed = elapsed_us as f32 * 1e-6;
        // a clock that did not move still counts as a 1 ms loop
        let period = if elapsed_us == 0 { 1e-3 } else { elapsed };
        self.fps = self.fps_gamma * self.fps + (1.0 - self.fps_gamma) / period;
        elapsed
    }

    pub fn reset_max(&mut self) {
        self.max_loop_us = 0;
    }
}
