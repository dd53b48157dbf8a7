//! Bounded, cancellable work queues connecting pipeline stages.
//!
//! A full queue blocks the producer instead of dropping work; an empty queue
//! blocks the consumer. Both waits end as soon as the cancellation token
//! fires. Several consumers may share one queue.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue wait cancelled")]
    Cancelled,
    #[error("Queue closed")]
    Closed,
}

/// Creates a bounded queue holding at most `capacity` undelivered items.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { inner: tx },
        QueueReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

pub struct QueueSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueues `item`, waiting while the queue is full.
    ///
    /// On cancellation the item is dropped, which for cloned repositories
    /// removes their directory.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<(), QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            sent = self.inner.send(item) => sent.map_err(|_| QueueError::Closed),
        }
    }

    /// Number of items enqueued but not yet received.
    pub fn pending(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }
}

pub struct QueueReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Waits for the next item.
    ///
    /// Returns `None` when cancelled, or when every sender is gone and the
    /// queue has been drained.
    pub async fn recv(&self, cancel: &CancellationToken) -> Option<T> {
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = async { self.inner.lock().await.recv().await } => item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded(4);
        for i in 0..3 {
            tx.send(i, &cancel).await.unwrap();
        }
        assert_eq!(tx.pending(), 3);
        assert_eq!(rx.recv(&cancel).await, Some(0));
        assert_eq!(rx.recv(&cancel).await, Some(1));
        assert_eq!(rx.recv(&cancel).await, Some(2));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded(2);
        tx.send(1, &cancel).await.unwrap();
        tx.send(2, &cancel).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(3, &cancel)).await;
        assert!(blocked.is_err(), "send on a full queue must wait");
        assert_eq!(tx.pending(), 2);

        assert_eq!(rx.recv(&cancel).await, Some(1));
        tx.send(3, &cancel).await.unwrap();
        assert_eq!(tx.pending(), 2);
    }

    #[tokio::test]
    async fn test_cancel_releases_blocked_producer() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = bounded(1);
        tx.send(1, &cancel).await.unwrap();

        let waiter = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.send(2, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(QueueError::Cancelled));
        assert_eq!(tx.pending(), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_blocked_consumer() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = bounded::<u32>(1);

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { rx.recv(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_ends() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded(2);
        tx.send("a", &cancel).await.unwrap();
        drop(tx);
        assert_eq!(rx.recv(&cancel).await, Some("a"));
        assert_eq!(rx.recv(&cancel).await, None);
    }

    #[tokio::test]
    async fn test_shared_consumers() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded(8);
        for i in 0..6 {
            tx.send(i, &cancel).await.unwrap();
        }
        drop(tx);

        let a = rx.clone();
        let b = rx;
        let ca = cancel.clone();
        let cb = cancel.clone();
        let ha = tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(i) = a.recv(&ca).await {
                got.push(i);
            }
            got
        });
        let hb = tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(i) = b.recv(&cb).await {
                got.push(i);
            }
            got
        });
        let mut all = ha.await.unwrap();
        all.extend(hb.await.unwrap());
        all.sort();
        assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
    }
}
