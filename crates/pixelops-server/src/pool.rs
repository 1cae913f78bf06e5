//! Bounded fan-out used inside batch jobs.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Run `work` over every item with at most `width` items in flight.
///
/// Each item's result is returned next to the item; a failing item never
/// aborts the others. Results arrive in completion order. A panicking task
/// is logged and dropped from the output.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    width: usize,
    work: F,
) -> Vec<(T, anyhow::Result<R>)>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let work = Arc::new(work);
    let mut join_set = JoinSet::new();

    for item in items {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(error = %e, "worker pool closed; dropping remaining items");
                break;
            }
        };
        let work = Arc::clone(&work);
        join_set.spawn(async move {
            let _permit = permit;
            let result = work(item.clone()).await;
            (item, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(pair) => results.push(pair),
            Err(e) => error!(error = %e, "worker task panicked"),
        }
    }
    results
}
