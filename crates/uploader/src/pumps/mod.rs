//! Background tasks driving one WebSocket connection.

pub(crate) mod read;
pub(crate) mod write;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chunkferry_protocol::Message;
use tokio::sync::oneshot;

/// Requests awaiting a response, keyed by request id.
///
/// Shared between the callers issuing requests and the read pump that
/// completes them. The lock is never held across an await.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
}

impl PendingRequests {
    fn map(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Message>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `id`. The entry lives until a response arrives or the
    /// returned guard is dropped, whichever happens first.
    pub(crate) fn register(&self, id: &str) -> (PendingGuard, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        self.map().insert(id.to_string(), tx);
        let guard = PendingGuard {
            requests: self.clone(),
            id: id.to_string(),
        };
        (guard, rx)
    }

    /// Hands `msg` to the request waiting for its id. The message comes back
    /// as `Err` when nobody is waiting.
    pub(crate) fn complete(&self, msg: Message) -> Result<(), Message> {
        let waiter = self.map().remove(&msg.id);
        match waiter {
            Some(tx) => tx.send(msg),
            None => Err(msg),
        }
    }

    /// Drops every waiter; their receivers observe a closed channel.
    pub(crate) fn clear(&self) {
        self.map().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.map().contains_key(id)
    }
}

/// Removes its request from [`PendingRequests`] when dropped, so a caller
/// that times out or is cancelled mid-await leaves nothing behind.
pub(crate) struct PendingGuard {
    requests: PendingRequests,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.requests.map().remove(&self.id);
    }
}
