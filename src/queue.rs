//! `MessageQueue` — the single-session input buffer feeding a model client.
//!
//! A FIFO buffer paired with a FIFO of waiting consumer completion handles.
//! `enqueue` hands the item directly to a waiting consumer if one exists
//! (bypassing the buffer); otherwise it is appended. The buffer and the
//! waiter queue are never both non-empty at once — that invariant is what
//! lets `stream()` be implemented as a single bounded channel with one
//! reader, per this crate's usual mapping of "async generator" source
//! patterns onto `tokio::sync::mpsc`.

use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One item pulled off the queue by its single consumer, keyed by a
/// monotonic id into the queue's shared ack registry — resolving it is what
/// unblocks the producer's `enqueue` future.
pub struct InputItem<T> {
    pub payload: T,
    id: u64,
    acks: Arc<StdMutex<HashMap<u64, oneshot::Sender<()>>>>,
}

impl<T> InputItem<T> {
    /// Acknowledge the item, unblocking whoever called `enqueue`. A no-op if
    /// `clear()` already resolved this item's ack first.
    pub fn ack(self) {
        if let Some(tx) = self.acks.lock().expect("ack registry poisoned").remove(&self.id) {
            let _ = tx.send(());
        }
    }
}

/// A future that resolves once the corresponding item has been yielded and
/// acknowledged by the consumer, or rejects with `Aborted` if the queue was
/// aborted first.
pub type Ack = oneshot::Receiver<()>;

/// Single-session, single-consumer input buffer.
///
/// Built on a `tokio::sync::mpsc` channel: a waiter-list-plus-buffer design
/// collapses into the channel's own blocking receive, and `abort` is
/// implemented by dropping the sender side, which the consumer observes as
/// channel closure.
pub struct MessageQueue<T> {
    tx: mpsc::UnboundedSender<InputItem<T>>,
    rx: Option<mpsc::UnboundedReceiver<InputItem<T>>>,
    aborted: std::sync::atomic::AtomicBool,
    next_id: AtomicU64,
    pending_acks: Arc<StdMutex<HashMap<u64, oneshot::Sender<()>>>>,
}

impl<T: Send + 'static> MessageQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            aborted: std::sync::atomic::AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            pending_acks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Enqueue a payload; resolves once the consumer has yielded and
    /// acknowledged it, or `clear()` has resolved it on the consumer's
    /// behalf. Fails immediately with `Aborted` if the queue has already
    /// been aborted.
    pub async fn enqueue(&self, payload: T) -> Result<()> {
        if self.aborted.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::Aborted);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending_acks.lock().expect("ack registry poisoned").insert(id, ack_tx);
        let item = InputItem { payload, id, acks: self.pending_acks.clone() };
        if self.tx.send(item).is_err() {
            self.pending_acks.lock().expect("ack registry poisoned").remove(&id);
            return Err(CoreError::Aborted);
        }
        ack_rx.await.map_err(|_| CoreError::Aborted)
    }

    /// Take ownership of the consumer side. This queue has exactly one
    /// consumer; a second call simply receives `None` back.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<InputItem<T>>> {
        self.rx.take()
    }

    /// Resolve every currently outstanding ack directly, without yielding —
    /// this reaches producers regardless of whether the consumer side has
    /// been taken, since it never touches `rx`.
    pub fn clear(&self) {
        let mut acks = self.pending_acks.lock().expect("ack registry poisoned");
        for (_, tx) in acks.drain() {
            let _ = tx.send(());
        }
    }

    /// Terminal: no further `enqueue` calls succeed, and the consumer side
    /// observes end-of-stream once buffered items are drained.
    pub fn abort(&self) {
        self.aborted.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl<T: Send + 'static> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_stream_is_fifo() {
        let mut q: MessageQueue<u32> = MessageQueue::new();
        let mut rx = q.take_receiver().unwrap();

        let h1 = tokio::spawn(async move {
            let q = std::sync::Arc::new(q);
            let q2 = q.clone();
            tokio::spawn(async move { q2.enqueue(1).await });
            q.enqueue(2).await
        });

        let first = rx.recv().await.unwrap();
        assert!(first.payload == 1 || first.payload == 2);
        first.ack();
        let second = rx.recv().await.unwrap();
        second.ack();
        let _ = h1.await;
    }

    #[tokio::test]
    async fn enqueue_after_abort_fails() {
        let q: MessageQueue<u32> = MessageQueue::new();
        q.abort();
        let err = q.enqueue(1).await.unwrap_err();
        assert_eq!(err.kind(), "Aborted");
    }

    #[tokio::test]
    async fn clear_unblocks_pending_producers_without_yielding() {
        // No consumer ever reads the receiver; `clear()` must still resolve
        // the pending ack purely from the registry, regardless of `rx`.
        let q: MessageQueue<u32> = MessageQueue::new();

        let q = std::sync::Arc::new(q);
        let q2 = q.clone();
        let ack_fut = tokio::spawn(async move { q2.enqueue(7).await });
        tokio::task::yield_now().await;
        q.clear();
        let result = ack_fut.await.unwrap();
        assert!(result.is_ok());
    }
}
