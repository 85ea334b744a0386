//! Bounded fan-out for the batch utilities.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::error;

/// How one record of a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Successful,
    /// Not actionable yet, e.g. the student has not registered.
    Delayed,
    /// Nothing needed doing.
    Skipped,
    Failed,
}

#[derive(Debug, Default)]
struct Tally {
    successful: AtomicU64,
    delayed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Tally {
    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Successful => &self.successful,
            Outcome::Delayed => &self.delayed,
            Outcome::Skipped => &self.skipped,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, elapsed: Duration) -> BatchReport {
        BatchReport {
            successful: self.successful.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Aggregate result of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub successful: u64,
    pub delayed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn total(&self) -> u64 {
        self.successful + self.delayed + self.skipped + self.failed
    }

    /// Adds records that failed before reaching the fan-out.
    pub fn with_extra_failures(mut self, failures: u64) -> Self {
        self.failed += failures;
        self
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} successful, {} delayed, {} skipped, {} failed in {} ms",
            self.successful,
            self.delayed,
            self.skipped,
            self.failed,
            self.elapsed.as_millis()
        )
    }
}

/// Runs `work` over every item with at most `concurrency` items in flight.
///
/// Records are independent: a failed or panicking item is tallied as
/// `Failed` and the run carries on.
pub async fn fan_out<I, F, Fut>(items: I, concurrency: usize, work: F) -> BatchReport
where
    I: IntoIterator,
    I::Item: Send + 'static,
    F: Fn(I::Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let started = Instant::now();
    let concurrency = concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));
    let work = Arc::new(work);
    let tally = Arc::new(Tally::default());

    let (tx, mut rx) = mpsc::channel::<Outcome>(concurrency);
    let collector = {
        let tally = tally.clone();
        tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                tally.record(outcome);
            }
        })
    };

    let mut tasks = JoinSet::new();
    let mut crashed = 0u64;
    for item in items {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let work = work.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let outcome = work(item).await;
            drop(permit);
            // the collector only stops once every sender is gone
            let _ = tx.send(outcome).await;
        });

        // reap finished tasks so the set stays proportional to the limit
        while tasks.len() > concurrency {
            if let Some(Err(e)) = tasks.join_next().await {
                error!(error = %e, "Batch task crashed");
                crashed += 1;
            }
        }
    }
    drop(tx);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Batch task crashed");
            crashed += 1;
        }
    }
    if let Err(e) = collector.await {
        error!(error = %e, "Batch collector crashed");
    }

    tally.report(started.elapsed()).with_extra_failures(crashed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_outcomes_are_tallied() {
        let report = fan_out(0..10u32, 3, |n| async move {
            match n % 4 {
                0 => Outcome::Successful,
                1 => Outcome::Delayed,
                2 => Outcome::Skipped,
                _ => Outcome::Failed,
            }
        })
        .await;

        assert_eq!(report.successful, 3);
        assert_eq!(report.delayed, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.total(), 10);
    }

    #[tokio::test]
    async fn test_in_flight_work_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            fan_out(0..50, 4, move |_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Outcome::Successful
                }
            })
            .await
        };

        assert_eq!(report.successful, 50);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_panicking_item_counts_as_failed() {
        let report = fan_out(0..5, 2, |n| async move {
            if n == 3 {
                panic!("boom");
            }
            Outcome::Successful
        })
        .await;

        assert_eq!(report.successful, 4);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_report_display() {
        let report = BatchReport {
            successful: 60,
            delayed: 40,
            elapsed: Duration::from_millis(12),
            ..Default::default()
        };
        assert_eq!(report.to_string(), "60 successful, 40 delayed, 0 skipped, 0 failed in 12 ms");
    }
}
