//! Shared row counter and the periodic throughput report.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Rows committed so far. Written by workers, read by the reporter and the
/// final summary; only ever grows.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    pub fn new(start_rows: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_rows)))
    }

    /// Add committed rows, returning the new total.
    pub fn add(&self, rows: u64) -> u64 {
        self.0.fetch_add(rows, Ordering::Relaxed) + rows
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One reporting tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub elapsed: Duration,
    pub period_rate: f64,
    pub overall_rate: f64,
    pub total_rows: u64,
}

impl RateSample {
    pub fn report_line(&self) -> String {
        let whole_seconds = Duration::from_secs(self.elapsed.as_secs());
        format!(
            "at {:?}, row rate {:.2}/sec (period), row rate {:.2}/sec (overall), {:E} total rows",
            whole_seconds, self.period_rate, self.overall_rate, self.total_rows as f64
        )
    }
}

/// Samples a [`ProgressCounter`] and derives period and overall rates.
#[derive(Debug)]
pub struct RateTracker {
    start: Instant,
    prev_time: Instant,
    prev_rows: u64,
}

impl RateTracker {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            prev_time: start,
            prev_rows: 0,
        }
    }

    pub fn sample(&mut self, now: Instant, rows: u64) -> RateSample {
        let period = now.saturating_duration_since(self.prev_time);
        let elapsed = now.saturating_duration_since(self.start);
        let sample = RateSample {
            elapsed,
            period_rate: per_second(rows.saturating_sub(self.prev_rows), period),
            overall_rate: per_second(rows, elapsed),
            total_rows: rows,
        };
        self.prev_time = now;
        self.prev_rows = rows;
        sample
    }
}

pub fn per_second(rows: u64, took: Duration) -> f64 {
    let seconds = took.as_secs_f64();
    if seconds > 0.0 {
        rows as f64 / seconds
    } else {
        0.0
    }
}

/// Periodic stdout report of copy throughput.
pub struct RateReporter {
    period: Duration,
    progress: ProgressCounter,
}

impl RateReporter {
    pub fn new(period: Duration, progress: ProgressCounter) -> Self {
        Self { period, progress }
    }

    /// Run on a background task until `stop` is cancelled.
    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    async fn run(self, stop: CancellationToken) {
        let start = tokio::time::Instant::now();
        let mut tracker = RateTracker::new(start.into_std());
        let mut ticker = tokio::time::interval_at(start + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                tick = ticker.tick() => {
                    let sample = tracker.sample(tick.into_std(), self.progress.load());
                    println!("{}", sample.report_line());
                }
            }
        }
        log::debug!("rate reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_from_seed_and_accumulates() {
        let progress = ProgressCounter::new(100);
        assert_eq!(progress.add(5), 105);
        let shared = progress.clone();
        shared.add(10);
        assert_eq!(progress.load(), 115);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_are_not_lost() {
        let progress = ProgressCounter::new(0);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let progress = progress.clone();
                tokio::spawn(async move {
                    for _ in 0..1000 {
                        progress.add(3);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(progress.load(), 24_000);
    }

    #[test]
    fn tracker_reports_period_and_overall_rates() {
        let start = Instant::now();
        let mut tracker = RateTracker::new(start);

        let first = tracker.sample(start + Duration::from_secs(2), 1000);
        assert_eq!(first.period_rate, 500.0);
        assert_eq!(first.overall_rate, 500.0);

        let second = tracker.sample(start + Duration::from_secs(4), 5000);
        assert_eq!(second.period_rate, 2000.0);
        assert_eq!(second.overall_rate, 1250.0);
        assert_eq!(second.total_rows, 5000);
    }

    #[test]
    fn report_line_truncates_to_whole_seconds() {
        let sample = RateSample {
            elapsed: Duration::from_millis(3_700),
            period_rate: 12.5,
            overall_rate: 10.0,
            total_rows: 1500,
        };
        assert_eq!(
            sample.report_line(),
            "at 3s, row rate 12.50/sec (period), row rate 10.00/sec (overall), 1.5E3 total rows"
        );
    }

    #[test]
    fn zero_duration_rate_is_zero() {
        assert_eq!(per_second(10, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn reporter_stops_when_cancelled() {
        let stop = CancellationToken::new();
        let handle = RateReporter::new(Duration::from_millis(20), ProgressCounter::new(0))
            .spawn(stop.clone());

        tokio::time::sleep(Duration::from_millis(70)).await;
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter exits promptly")
            .unwrap();
    }
}
