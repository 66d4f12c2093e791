//! Negotiator contract and the early-packet cache.
//!
//! The handshake policy itself lives outside this crate; the connection only
//! routes type `0x01` datagrams to an attached [`Negotiator`] and expects a
//! single completion upcall. What does live here is the race the wire forces
//! on us: the remote may start the handshake before the local user calls
//! `negotiate`, so the first early datagram is cached and handed to the
//! negotiator on attach.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::utils::buffer_pool::{BufferPool, PooledBuffer};
use crate::utils::lock_unpoisoned;

/// External handshake driver attached through `Connection::negotiate`.
///
/// Implementations emit their own type `0x01` datagrams through
/// `Connection::queue_control_packet` and must report their outcome through
/// `Connection::complete_negotiation` exactly once.
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Inbound negotiation datagram (type `0x01`, full bytes including the
    /// type prefix). Returns whether the packet advanced the handshake.
    fn input_packet(&self, datagram: &[u8]) -> bool;

    /// A non-negotiation datagram arrived while still connecting. Returns
    /// whether that counts as proof the remote is making progress.
    fn notify_remote_progressing(&self) -> bool;

    /// Drive the handshake to completion. `cached` is the datagram that
    /// arrived ahead of the attach, if any. Resolves to the negotiation
    /// outcome after `complete_negotiation` has been reported.
    async fn negotiate(
        &self,
        cached: Option<PooledBuffer>,
        cancellation: CancellationToken,
    ) -> bool;

    /// The connection is tearing down; drop any back-references.
    fn notify_disposed(&self);
}

#[derive(Default)]
struct CacheSlot {
    packet: Option<PooledBuffer>,
    disabled: bool,
}

/// Holds at most one datagram received before the negotiator attached.
/// All mutations are serialised under the slot lock; once disabled the
/// cache never re-enables.
pub(crate) struct NegotiationCache {
    slot: Mutex<CacheSlot>,
}

impl NegotiationCache {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    /// Copy the first early datagram into a rented buffer. Later datagrams
    /// are dropped, not replaced; pool exhaustion drops the datagram too.
    pub fn store_if_empty(&self, datagram: &[u8], pool: &BufferPool) -> bool {
        let mut slot = lock_unpoisoned(&self.slot);
        if slot.disabled || slot.packet.is_some() {
            return false;
        }
        let Ok(mut buffer) = pool.rent(datagram.len(), false) else {
            return false;
        };
        buffer.extend_from_slice(datagram);
        slot.packet = Some(buffer);
        true
    }

    /// Extract the cached packet for the negotiator attach and permanently
    /// disable caching.
    pub fn take_and_disable(&self) -> Option<PooledBuffer> {
        let mut slot = lock_unpoisoned(&self.slot);
        slot.disabled = true;
        slot.packet.take()
    }

    /// Permanently disable caching and release any residual buffer.
    pub fn disable(&self) {
        let mut slot = lock_unpoisoned(&self.slot);
        slot.disabled = true;
        slot.packet = None;
    }

    #[cfg(test)]
    pub fn has_cached(&self) -> bool {
        lock_unpoisoned(&self.slot).packet.is_some()
    }

    #[cfg(test)]
    pub fn is_disabled(&self) -> bool {
        lock_unpoisoned(&self.slot).disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_datagram_wins() {
        let pool = BufferPool::new(4);
        let cache = NegotiationCache::new();

        assert!(cache.store_if_empty(&[0x01, 0xAA], &pool));
        assert!(!cache.store_if_empty(&[0x01, 0xBB], &pool));

        let cached = cache.take_and_disable().expect("cached packet");
        assert_eq!(&cached[..], &[0x01, 0xAA]);
    }

    #[test]
    fn test_take_disables_permanently() {
        let pool = BufferPool::new(4);
        let cache = NegotiationCache::new();

        assert!(cache.store_if_empty(&[0x01], &pool));
        let _ = cache.take_and_disable();

        assert!(cache.is_disabled());
        assert!(!cache.store_if_empty(&[0x01, 0xCC], &pool));
        assert!(cache.take_and_disable().is_none());
    }

    #[test]
    fn test_disable_releases_residual_buffer() {
        let pool = BufferPool::new(1);
        let cache = NegotiationCache::new();

        assert!(cache.store_if_empty(&[0x01, 0x02, 0x03], &pool));
        assert_eq!(pool.available(), 0);

        cache.disable();
        assert!(!cache.has_cached());
        // the rented buffer went back to the pool
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_exhausted_pool_drops_datagram() {
        let pool = BufferPool::with_growth(0, false);
        let cache = NegotiationCache::new();

        assert!(!cache.store_if_empty(&[0x01, 0xAA], &pool));
        assert!(!cache.has_cached());
    }
}
