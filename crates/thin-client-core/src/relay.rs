//! Cross-context message posting.
//!
//! The client runs two single-owner contexts: the network context and the
//! main context. Nothing is shared between them; instead one side posts
//! items into a relay and the owning side drains them in order when it gets
//! around to it. Posting never blocks.
//!
//! Every item is stamped with the receiver's generation at posting time. The
//! receiver only accepts items from its current generation, so bumping it
//! with [`RelayReceiver::invalidate`] turns everything already in flight into
//! a no-op. Dropping the receiver has the same effect on later posts.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc;

struct Posted<T> {
    generation: u64,
    payload: T,
}

/// Posting half of a relay. Cheap to clone and `Send` when `T` is.
pub struct RelaySender<T> {
    tx: mpsc::UnboundedSender<Posted<T>>,
    generation: Arc<AtomicU64>,
}

impl<T> Clone for RelaySender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<T> fmt::Debug for RelaySender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySender")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl<T> RelaySender<T> {
    /// Post an item to the destination context.
    ///
    /// Returns `false` when the destination is gone; the item is dropped.
    pub fn post(&self, payload: T) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        if self.tx.send(Posted { generation, payload }).is_err() {
            tracing::trace!("Relay destination is gone, dropping posted item");
            return false;
        }
        true
    }

    /// Whether the receiving side still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Whether both senders post into the same receiver.
    #[must_use]
    pub fn same_destination(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Receiving half of a relay, owned by the destination context.
pub struct RelayReceiver<T> {
    rx: mpsc::UnboundedReceiver<Posted<T>>,
    generation: Arc<AtomicU64>,
}

impl<T> fmt::Debug for RelayReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayReceiver")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T> RelayReceiver<T> {
    /// Take the next live item without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        while let Ok(posted) = self.rx.try_recv() {
            if let Some(payload) = self.accept(posted) {
                return Some(payload);
            }
        }
        None
    }

    /// Wait for the next live item. Returns `None` once every sender is gone.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            let posted = self.rx.recv().await?;
            if let Some(payload) = self.accept(posted) {
                return Some(payload);
            }
        }
    }

    /// Take every live item that is currently queued, in posting order.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Discard everything posted so far, including items still in flight.
    pub fn invalidate(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn accept(&self, posted: Posted<T>) -> Option<T> {
        if posted.generation == self.generation.load(Ordering::Acquire) {
            Some(posted.payload)
        } else {
            tracing::trace!(
                generation = posted.generation,
                "Discarding item posted to a previous relay generation"
            );
            None
        }
    }
}

/// Create a relay between two contexts.
#[must_use]
pub fn relay<T>() -> (RelaySender<T>, RelayReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let generation = Arc::new(AtomicU64::new(0));
    (
        RelaySender {
            tx,
            generation: Arc::clone(&generation),
        },
        RelayReceiver { rx, generation },
    )
}
