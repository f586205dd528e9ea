/// Live query subscriptions
use futures_util::stream::{unfold, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a live query. Snapshots arrive in order; after `close` (or drop)
/// the background watcher is gone and nothing else is delivered.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Wait for the next snapshot. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next already-delivered snapshot, if any
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait for a snapshot, then skip ahead to the most recent one queued
    pub async fn recv_latest(&mut self) -> Option<T> {
        let mut latest = self.rx.recv().await?;
        while let Ok(next) = self.rx.try_recv() {
            latest = next;
        }
        Some(latest)
    }

    /// Stop the watcher and discard anything not yet received
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        unfold(self, |mut sub| async move {
            let next = sub.recv().await?;
            Some((next, sub))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
