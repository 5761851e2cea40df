/// Exponential moving average parameterised by its half-life, so the smoothing
/// is the same regardless of how long each loop takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialAverage {
    pub half_life: f32, // in seconds
}

impl ExponentialAverage {
    pub const fn new(half_life: f32) -> ExponentialAverage {
        ExponentialAverage { half_life }
    }

    /// Weight of the new sample after `elapsed` seconds.
    pub fn gamma(&self, elapsed: f32) -> f32 {
        if self.half_life <= 0.0 || elapsed >= self.half_life {
            return 1.0;
        }
        if elapsed <= 0.0 {
            return 0.0;
        }
        1.0 - libm::exp2f(-elapsed / self.half_life)
    }

    pub fn apply(&self, new: f32, previous: f32, elapsed: f32) -> f32 {
        let gamma = self.gamma(elapsed);
        gamma * new + (1.0 - gamma) * previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_life() {
        let avg = ExponentialAverage::new(0.030);

        let mut value = 0.0;
        value = avg.apply(1.0, value, 0.015);
        value = avg.apply(1.0, value, 0.015);

        assert!((value - 0.5).abs() < 1e-4, "{}", value);
    }

    #[test]
    fn test_saturates_on_long_gaps() {
        let avg = ExponentialAverage::new(0.030);

        assert_eq!(avg.apply(0.7, 0.1, 0.030), 0.7);
        assert_eq!(avg.apply(0.7, 0.1, 5.0), 0.7);
        assert_eq!(avg.apply(0.7, 0.1, 0.0), 0.1);
    }

    #[test]
    fn test_stays_between_samples() {
        use rand_distr::{Distribution, Uniform};

        let values = Uniform::new(-10.0f32, 10.0);
        let times = Uniform::new(0.0f32, 0.1);
        let mut rng = rand::thread_rng();
        let avg = ExponentialAverage::new(0.030);

        for _ in 0..10000 {
            let new = values.sample(&mut rng);
            let previous = values.sample(&mut rng);
            let smoothed = avg.apply(new, previous, times.sample(&mut rng));

            let (lo, hi) = if new < previous { (new, previous) } else { (previous, new) };
            assert!(smoothed >= lo - 1e-4 && smoothed <= hi + 1e-4, "{} not in [{}, {}]", smoothed, lo, hi);
        }
    }
}
