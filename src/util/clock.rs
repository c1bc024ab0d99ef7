use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Wall-clock source that never goes backwards within this process.
///
/// Timestamps have microsecond resolution (matching `TIMESTAMPTZ`); if the system clock stalls
/// or steps back, each reading is bumped one microsecond past the previous one.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut last = self.last_micros.load(Ordering::Acquire);

        loop {
            let next = wall.max(last + 1);
            match self.last_micros.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
                Err(observed) => last = observed,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_readings_strictly_increase() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();

        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_concurrent_readings_are_unique() {
        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..1_000).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {ts}");
            }
        }

        assert_eq!(seen.len(), 4_000);
    }
}
