//! Batched concurrent execution with ordered results.
//!
//! Upstream services tolerate small bursts but not a fully parallel fan-out,
//! so work runs in sequential groups with a short pause between them.

use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::debug;

/// Pause inserted between task groups.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(200);

/// Run `tasks` in sequential groups of `batch_size`, the futures within a
/// group concurrently.
///
/// Results are returned in input order regardless of completion order. The
/// first failure cancels the group's unresolved tasks and propagates; later
/// groups never start. No retries.
pub async fn run_batches<T, E, F>(
    tasks: Vec<F>,
    batch_size: usize,
    pause: Duration,
) -> std::result::Result<Vec<T>, E>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    let batch_size = batch_size.max(1);
    let total = tasks.len();

    let mut groups = Vec::new();
    let mut iter = tasks.into_iter();
    loop {
        let group: Vec<F> = iter.by_ref().take(batch_size).collect();
        if group.is_empty() {
            break;
        }
        groups.push(group);
    }

    let group_count = groups.len();
    let mut results = Vec::with_capacity(total);
    for (index, group) in groups.into_iter().enumerate() {
        debug!(
            "Running batch {}/{} ({} tasks)",
            index + 1,
            group_count,
            group.len()
        );
        results.extend(try_join_all(group).await?);
        if index + 1 < group_count {
            tokio::time::sleep(pause).await;
        }
    }

    Ok(results)
}
