//! Pacing for record and byte throughput limits.

use std::time::Duration;

use tokio::time::{self, Instant};

/// Sleeps whenever consumption runs ahead of the configured rates. A limit
/// of zero or less means unbounded.
#[derive(Debug)]
pub struct Throttle {
    started: Instant,
    records_per_second: Option<u64>,
    bytes_per_second: Option<u64>,
    records: u64,
    bytes: u64,
}

impl Throttle {
    pub fn new(records_per_second: Option<i64>, bytes_per_second: Option<i64>) -> Self {
        let positive = |v: Option<i64>| v.filter(|v| *v > 0).map(|v| v as u64);
        Self {
            started: Instant::now(),
            records_per_second: positive(records_per_second),
            bytes_per_second: positive(bytes_per_second),
            records: 0,
            bytes: 0,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.records_per_second.is_none() && self.bytes_per_second.is_none()
    }

    pub async fn consume(&mut self, records: u64, bytes: u64) {
        self.records += records;
        self.bytes += bytes;
        if self.is_unbounded() {
            return;
        }

        let mut due = Duration::ZERO;
        if let Some(rate) = self.records_per_second {
            due = due.max(Duration::from_secs_f64(self.records as f64 / rate as f64));
        }
        if let Some(rate) = self.bytes_per_second {
            due = due.max(Duration::from_secs_f64(self.bytes as f64 / rate as f64));
        }
        let elapsed = self.started.elapsed();
        if due > elapsed {
            time::sleep(due - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_records_per_second_paces_consumption() {
        let mut throttle = Throttle::new(Some(10), None);
        let start = Instant::now();
        for _ in 0..20 {
            throttle.consume(1, 0).await;
        }
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_limits_are_unbounded() {
        let mut throttle = Throttle::new(Some(0), Some(-5));
        assert!(throttle.is_unbounded());
        let start = Instant::now();
        throttle.consume(1_000_000, 1_000_000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
