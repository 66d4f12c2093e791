//! Callback fan-out registry.
//!
//! Subscribers live in an intrusive singly-linked list so registration and
//! removal never reallocate. The registry lock guards the head/tail pointers
//! and every link mutation; delivery deliberately iterates without it,
//! re-reading each node's `next` after the await so subscribers may register
//! or drop handles while a delivery is in flight. An unlinked node keeps its
//! own `next` pointer, which lets a subscriber drop its registration from
//! inside its own delivery without cutting its siblings off.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, SessionError};
use crate::protocol::connection::ConnectionState;
use crate::utils::lock_unpoisoned;

/// Subscriber interface for connection events.
#[async_trait]
pub trait ConnectionCallback: Send + Sync {
    /// Payload of an accepted data datagram. An `Err` is logged and
    /// swallowed; sibling subscribers still fire.
    async fn packet_received(&self, payload: &[u8]) -> Result<()>;

    /// Fired once per real state transition, in transition order.
    fn state_changed(&self, state: ConnectionState);
}

struct Node {
    callback: Arc<dyn ConnectionCallback>,
    // mutated only under the registry lock; read lock-by-snapshot in delivery
    next: Mutex<Option<Arc<Node>>>,
}

#[derive(Default)]
struct ListState {
    head: Option<Arc<Node>>,
    tail: Option<Arc<Node>>,
}

#[derive(Default)]
struct RegistryInner {
    list: Mutex<ListState>,
}

/// Registry of connection subscribers.
pub(crate) struct CallbackRegistry {
    inner: Arc<RegistryInner>,
}

/// Owned handle for one subscription. Dropping it unlinks the subscriber;
/// removal walks the list from the head, O(n) in subscriber count.
pub struct CallbackRegistration {
    registry: Weak<RegistryInner>,
    node: Arc<Node>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner::default()),
        }
    }

    /// Append a subscriber at the tail.
    pub fn register(&self, callback: Arc<dyn ConnectionCallback>) -> CallbackRegistration {
        let node = Arc::new(Node {
            callback,
            next: Mutex::new(None),
        });

        let mut list = lock_unpoisoned(&self.inner.list);
        match list.tail.take() {
            Some(tail) => *lock_unpoisoned(&tail.next) = Some(node.clone()),
            None => list.head = Some(node.clone()),
        }
        list.tail = Some(node.clone());
        drop(list);

        CallbackRegistration {
            registry: Arc::downgrade(&self.inner),
            node,
        }
    }

    /// Drop every subscription at once. Links are severed, so an in-flight
    /// delivery ends at its current node instead of walking a dead chain.
    pub fn clear(&self) {
        let head = {
            let mut list = lock_unpoisoned(&self.inner.list);
            list.tail = None;
            list.head.take()
        };

        // sever iteratively; dropping a long Arc chain head-first would
        // recurse once per node
        let mut cursor = head;
        while let Some(node) = cursor {
            cursor = lock_unpoisoned(&node.next).take();
        }
    }

    /// Deliver one payload to every subscriber in registration order.
    /// Checks the token between subscribers and fails the remaining
    /// delivery when it fires.
    pub async fn packet_received(
        &self,
        payload: &[u8],
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let mut cursor = lock_unpoisoned(&self.inner.list).head.clone();
        while let Some(node) = cursor {
            if cancellation.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if let Err(error) = node.callback.packet_received(payload).await {
                warn!(%error, "subscriber failed while processing payload");
            }
            cursor = lock_unpoisoned(&node.next).clone();
        }
        Ok(())
    }

    /// Synchronous fire-and-forget state-change fan-out.
    pub fn notify_state_changed(&self, state: ConnectionState) {
        let mut cursor = lock_unpoisoned(&self.inner.list).head.clone();
        while let Some(node) = cursor {
            node.callback.state_changed(state);
            cursor = lock_unpoisoned(&node.next).clone();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = lock_unpoisoned(&self.inner.list).head.clone();
        while let Some(node) = cursor {
            count += 1;
            cursor = lock_unpoisoned(&node.next).clone();
        }
        count
    }
}

impl RegistryInner {
    fn unlink(&self, target: &Arc<Node>) {
        let mut list = lock_unpoisoned(&self.list);

        // the node keeps its own next pointer so a delivery paused on it
        // still continues past it after unlinking
        let after = lock_unpoisoned(&target.next).clone();

        let Some(head) = list.head.clone() else {
            return;
        };

        if Arc::ptr_eq(&head, target) {
            if after.is_none() {
                list.tail = None;
            }
            list.head = after;
            return;
        }

        let mut prev = head;
        loop {
            let next = lock_unpoisoned(&prev.next).clone();
            match next {
                Some(node) if Arc::ptr_eq(&node, target) => {
                    if after.is_none() {
                        list.tail = Some(prev.clone());
                    }
                    *lock_unpoisoned(&prev.next) = after;
                    return;
                }
                Some(node) => prev = node,
                // already unlinked (registry cleared underneath us)
                None => return,
            }
        }
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unlink(&self.node);
        }
    }
}
