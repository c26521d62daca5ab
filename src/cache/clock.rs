//! Wall-clock source for freshness checks.

use std::time::SystemTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;


#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let origin = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = ManualClock::starting_at(origin);
        assert_eq!(clock.now(), origin);

        clock.advance(Duration::from_secs(90));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), origin + Duration::from_millis(90_500));
    }
}
