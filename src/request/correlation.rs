use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;

const LOCK_POISONED: &str = "correlation table lock poisoned";

/// Shared table of requests awaiting their reply
///
/// Maps correlation tokens to the completion signal of the task waiting for
/// the corresponding reply. The table owns each entry for its whole lifetime,
/// entries are retired by exactly one of two parties: the reply listener upon
/// [`resolving`](CorrelationTable::resolve) it or the [`PendingReply`] guard
/// when the waiting side gives up. Whoever comes second observes an already
/// absent entry and does nothing.
///
/// Clones share the same underlying table. The interior lock is only ever
/// held for individual map operations, never across anything that suspends.
#[derive(Clone, Default)]
pub(crate) struct CorrelationTable {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>>,
}

impl CorrelationTable {
    /// Creates a new, empty table
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new in-flight request under the given correlation token
    ///
    /// Returns `None` if the token is already taken by a concurrently active
    /// request. Collisions are astronomically unlikely with a reasonably sized
    /// token space but refusing them here makes the uniqueness invariant
    /// independent of that probability argument — callers simply draw a new
    /// token.
    pub(crate) fn register(&self, id: String) -> Option<PendingReply> {
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.lock().expect(LOCK_POISONED);

        if pending.contains_key(&id) {
            return None;
        }

        pending.insert(id.clone(), sender);

        Some(PendingReply {
            id,
            table: self.clone(),
            receiver,
        })
    }

    /// Delivers a reply payload to the request registered under `id`
    ///
    /// Removes the entry and wakes the waiting task. Returns `false` when no
    /// such request is in flight (it timed out earlier or the reply is a
    /// duplicate), in which case the payload is dropped.
    pub(crate) fn resolve(&self, id: &str, payload: Vec<u8>) -> bool {
        let sender = self.pending.lock().expect(LOCK_POISONED).remove(id);

        match sender {
            // The waiter may have given up between our removal and this send,
            // the reply is discarded in that case just as if it had lost the
            // race for the table entry.
            Some(sender) => {
                sender.send(payload).ok();
                true
            }
            None => false,
        }
    }

    /// Number of requests currently awaiting a reply
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().expect(LOCK_POISONED).len()
    }

    /// Retires all in-flight entries, waking their waiters empty-handed
    ///
    /// Used on shutdown. Dropping the senders closes the completion channels
    /// so waiters observe the loss of the transport instead of idling until
    /// their deadline.
    pub(crate) fn clear(&self) {
        self.pending.lock().expect(LOCK_POISONED).clear();
    }

    fn remove(&self, id: &str) {
        self.pending.lock().expect(LOCK_POISONED).remove(id);
    }
}

/// Reason why a [`PendingReply`] completed without a payload
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitError {
    /// The deadline elapsed before a correlated reply arrived
    TimedOut,
    /// The table retired the entry before a reply arrived (instance shutdown)
    Abandoned,
}

/// Waiting side of one registered request
///
/// Holds the receiving half of the single-use completion signal. Dropping the
/// guard removes the table entry if it is still present, making the timeout
/// path and cancellation safe against concurrent resolution by the listener.
pub(crate) struct PendingReply {
    id: String,
    table: CorrelationTable,
    receiver: oneshot::Receiver<Vec<u8>>,
}

impl PendingReply {
    /// Correlation token this request was registered under
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the reply payload until the deadline elapses
    pub(crate) async fn wait(mut self, deadline: Duration) -> Result<Vec<u8>, WaitError> {
        match time::timeout(deadline, &mut self.receiver).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
