use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter, used by proposers retrying after a
/// refused ballot and by scan directors waiting on a slow or silent deputy.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self { floor, ceiling, current: floor }
    }

    /// Duration to wait before the next retry, with the internal state
    /// advanced so the following call returns a longer wait (up to `ceiling`).
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.ceiling);

        let mut rng = rand::thread_rng();
        let jitter_micros = rng.gen_range(0..=base.as_micros().max(1) as u64 / 2);
        base + Duration::from_micros(jitter_micros)
    }

    /// Reset to the floor delay, used after a successful round.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_ceiling_plus_jitter_bound() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_millis(100));
        for _ in 0..20 {
            let d = b.next_delay();
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_millis(100));
        b.next_delay();
        b.next_delay();
        b.reset();
        let d = b.next_delay();
        assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(15));
    }
}
