use std::time::Duration;

/// Seconds-remaining counter behind the persistent notification. Counts down
/// from the sync interval to zero, then wraps back to the full interval on
/// the next tick.
#[derive(Debug, Clone)]
pub struct Countdown {
    interval_secs: u64,
    remaining: u64,
}

impl Countdown {
    pub fn new(sync_interval: Duration) -> Self {
        let interval_secs = sync_interval.as_secs().max(1);
        Self {
            interval_secs,
            remaining: interval_secs,
        }
    }

    /// Back to the top of the cycle.
    pub fn reset(&mut self) {
        self.remaining = self.interval_secs;
    }

    /// Advances one second and returns the new value. Zero is published for
    /// a full tick before the wrap.
    pub fn tick(&mut self) -> u64 {
        if self.remaining == 0 {
            self.remaining = self.interval_secs;
        } else {
            self.remaining -= 1;
        }
        self.remaining
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

/// Body text shared by the initial notification and every per-second update.
pub(crate) fn body_text(seconds_remaining: u64) -> String {
    format!("Next sync in {seconds_remaining}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_wraps() {
        let mut countdown = Countdown::new(Duration::from_secs(3));
        assert_eq!(countdown.remaining(), 3);
        assert_eq!(countdown.tick(), 2);
        assert_eq!(countdown.tick(), 1);
        assert_eq!(countdown.tick(), 0);
        assert_eq!(countdown.tick(), 3);
        assert_eq!(countdown.tick(), 2);
    }

    #[test]
    fn reset_restores_full_interval() {
        let mut countdown = Countdown::new(Duration::from_secs(5));
        countdown.tick();
        countdown.tick();
        countdown.reset();
        assert_eq!(countdown.remaining(), 5);
    }

    #[test]
    fn sub_second_interval_clamps_to_one() {
        let countdown = Countdown::new(Duration::from_millis(200));
        assert_eq!(countdown.remaining(), 1);
    }

    #[test]
    fn body_text_matches_notification_format() {
        assert_eq!(body_text(300), "Next sync in 300s");
        assert_eq!(body_text(0), "Next sync in 0s");
    }
}
