//! Batch scheduler for remuxing every eligible item of a remux group.
//!
//! Jobs are launched in item order through a semaphore-bounded task set.
//! Each launch is announced on the batch channel before it starts, and a
//! freed permit is what lets the next item go.

use crate::concurrency::BatchPlan;
use crate::events::EventBus;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

pub const BATCH_DONE_LINE: &str = "\nBatch remux completed\n";

/// Counts reported once every job of a batch has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

fn progress_line(launched: usize, total: usize, label: &str) -> String {
    format!("\n[{}/{}] Remuxing {}\n", launched, total, label)
}

/// Run `run` over `items` with at most `plan.max_in_flight` in flight.
///
/// `label` names an item in the progress line. `run` resolves to whether the
/// job succeeded. The final line is published only after every job ended.
pub async fn run_batch<T, L, F, Fut>(
    bus: &EventBus,
    channel: &str,
    plan: BatchPlan,
    items: Vec<T>,
    label: L,
    run: F,
) -> BatchSummary
where
    T: Send + 'static,
    L: Fn(&T) -> String,
    F: Fn(T) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let total = items.len();
    let mut summary = BatchSummary {
        total,
        ..BatchSummary::default()
    };
    info!(channel = %channel, items = total, concurrency = plan.max_in_flight, "Starting batch remux");

    let semaphore = Arc::new(Semaphore::new(plan.max_in_flight.max(1)));
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        bus.publish_log(channel, progress_line(index + 1, total, &label(&item)));
        let job = run(item);
        tasks.spawn(async move {
            let ok = job.await;
            drop(permit);
            ok
        });
    }

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(true) => summary.succeeded += 1,
            Ok(false) => summary.failed += 1,
            Err(e) => {
                error!(channel = %channel, error = %e, "Batch job task failed");
                summary.failed += 1;
            }
        }
    }

    bus.publish_log(channel, BATCH_DONE_LINE);
    info!(
        channel = %channel,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Batch remux finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BusEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn drain(sub: &mut crate::events::Subscription) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(BusEvent::Log(log)) = sub.try_recv() {
            lines.push(log.message);
        }
        lines
    }

    #[tokio::test]
    async fn test_empty_batch_only_publishes_final_line() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        let summary = run_batch(
            &bus,
            "batch",
            BatchPlan::derive(None, 4, 0),
            Vec::<String>::new(),
            |s| s.clone(),
            |_| async { true },
        )
        .await;

        assert_eq!(summary, BatchSummary::default());
        assert_eq!(drain(&mut sub), vec![BATCH_DONE_LINE.to_string()]);
    }

    #[tokio::test]
    async fn test_progress_lines_precede_final_line() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let items = vec!["ep1.mkv".to_string(), "ep2.mkv".to_string(), "ep3.mkv".to_string()];

        let summary = run_batch(
            &bus,
            "batch",
            BatchPlan::derive(Some(1), 4, items.len()),
            items,
            |s| s.clone(),
            |name| async move { name != "ep2.mkv" },
        )
        .await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            drain(&mut sub),
            vec![
                "\n[1/3] Remuxing ep1.mkv\n".to_string(),
                "\n[2/3] Remuxing ep2.mkv\n".to_string(),
                "\n[3/3] Remuxing ep3.mkv\n".to_string(),
                BATCH_DONE_LINE.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_plan() {
        let bus = EventBus::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..12).collect();
        let plan = BatchPlan::derive(Some(3), 4, items.len());

        let summary = run_batch(&bus, "batch", plan, items, |i| format!("item{}", i), |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let finished = finished.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 + (i as u64 % 3) * 5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                finished.fetch_add(1, Ordering::SeqCst);
                true
            }
        })
        .await;

        assert_eq!(summary.completed(), 12);
        assert_eq!(finished.load(Ordering::SeqCst), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_final_line_waits_for_slowest_job() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let done = Arc::new(AtomicUsize::new(0));

        let items = vec![30u64, 1, 1];
        let plan = BatchPlan::derive(Some(3), 4, items.len());
        let counter = done.clone();
        run_batch(&bus, "batch", plan, items, |ms| format!("{}ms", ms), move |ms| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        })
        .await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        let lines = drain(&mut sub);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.last().map(String::as_str), Some(BATCH_DONE_LINE));
    }
}
