//! Bounded fan-out for upload tasks

use crate::error::{RegistryError, Result};
use futures::future;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run one spawned task per item with at most `limit` of them past the gate
/// at any moment. Results come back in item order; the first error in that
/// order is returned once every task has settled.
pub async fn run_bounded<T, R, F, Fut>(limit: usize, items: Vec<T>, task: F) -> Result<Vec<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let semaphore = Arc::clone(&semaphore);
            let work = task(item);
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    RegistryError::Io(format!("Failed to acquire upload permit: {}", e))
                })?;
                work.await
            })
        })
        .collect();

    let results = future::try_join_all(handles).await?;
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(3, (0..10).collect(), |n: u64| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(results, (0..10).map(|n| n * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_first_error_is_returned() {
        let result = run_bounded(2, vec![1, 2, 3], |n: u32| async move {
            if n == 2 {
                Err(RegistryError::InvalidInput(format!("bad item {}", n)))
            } else {
                Ok(n)
            }
        })
        .await;
        assert!(matches!(result, Err(RegistryError::InvalidInput(msg)) if msg == "bad item 2"));
    }
}
