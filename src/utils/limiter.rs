//! Bounded outbound concurrency and order-preserving fan-out.
//!
//! A [`RequestLimiter`] is a counting semaphore shared by every task that
//! talks to the same class of remote service. Permits are RAII guards, so a
//! slot is released on every exit path, including timeouts and dropped
//! futures.
//!
//! [`collect_ordered`] drives a batch of futures concurrently on the current
//! task and returns their outputs in input order, whatever order they finish
//! in.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::types::{AppError, Result};

/// Caps the number of in-flight requests across all holders of a clone.
#[derive(Debug, Clone)]
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl RequestLimiter {
    /// Create a limiter with `capacity` slots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. The slot is returned when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Request limiter closed".to_string()))
    }

    /// Run `fut` while holding a slot.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Await every future concurrently, returning outputs in input order.
pub async fn collect_ordered<I, Fut, T>(futures: I) -> Vec<T>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = T>,
{
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, fut)| async move { (index, fut.await) })
        .collect();

    let mut slots: Vec<Option<T>> = Vec::with_capacity(pending.len());
    slots.resize_with(pending.len(), || None);

    while let Some((index, output)) = pending.next().await {
        slots[index] = Some(output);
    }

    // Every future ran to completion, so every slot is filled.
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_output_order_matches_input_order() {
        // Later inputs finish first.
        let delays = [40u64, 30, 20, 10, 0];
        let outputs = collect_ordered(delays.iter().enumerate().map(|(i, &ms)| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            i
        }))
        .await;
        assert_eq!(outputs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outputs: Vec<u8> = collect_ordered(Vec::<std::future::Ready<u8>>::new()).await;
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_limiter_caps_in_flight_work() {
        let limiter = RequestLimiter::new(2);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = collect_ordered((0..8).map(|i| {
            let limiter = &limiter;
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                limiter
                    .run(async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        i * 10
                    })
                    .await
            }
        }))
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            (0..8).map(|i| i * 10).collect::<Vec<_>>()
        );
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_permit_released_on_timeout() {
        let limiter = RequestLimiter::new(1);
        let slow = limiter.run(tokio::time::sleep(Duration::from_secs(60)));
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.capacity(), 1);
    }
}
