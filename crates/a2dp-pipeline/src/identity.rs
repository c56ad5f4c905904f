//! Last connected peer persistence.
//!
//! Writes are skipped when the stored address already matches, so a device that
//! reconnects every boot does not wear out flash.

use anyhow::Result;

use a2dp_sink_types::{PEER_ADDRESS_LEN, PeerAddress};

/// Raw key/value backend holding the last peer address blob.
pub trait PeerStore: Send {
    /// Stored blob, or `None` if nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    fn save(&mut self, address: &[u8; PEER_ADDRESS_LEN]) -> Result<()>;
}

/// Read/compare/update policy on top of a [`PeerStore`].
pub struct DeviceIdentityStore {
    backend: Box<dyn PeerStore>,
}

impl DeviceIdentityStore {
    pub fn new(backend: Box<dyn PeerStore>) -> Self {
        Self { backend }
    }

    /// Last stored peer.
    ///
    /// An unreadable or malformed store is reported as "no known peer".
    pub fn read_last_peer(&self) -> Option<PeerAddress> {
        match self.backend.load() {
            Ok(Some(blob)) => {
                let addr = PeerAddress::from_slice(&blob);
                if addr.is_none() {
                    tracing::warn!(len = blob.len(), "stored peer address has wrong length");
                }
                addr
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("cannot read stored peer address: {e:#}");
                None
            }
        }
    }

    /// Store `addr` unless it is already stored. Returns `true` if a write happened.
    pub fn update_last_peer(&mut self, addr: PeerAddress) -> bool {
        if self.read_last_peer() == Some(addr) {
            tracing::debug!(peer = %addr, "stored peer unchanged");
            return false;
        }
        match self.backend.save(addr.as_bytes()) {
            Ok(()) => {
                tracing::info!(peer = %addr, "new peer address stored");
                true
            }
            Err(e) => {
                tracing::warn!(peer = %addr, "cannot store peer address: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPeerStore;
    use anyhow::bail;
    use std::sync::atomic::Ordering;

    struct BrokenStore;

    impl PeerStore for BrokenStore {
        fn load(&self) -> Result<Option<Vec<u8>>> {
            bail!("store unavailable")
        }

        fn save(&mut self, _address: &[u8; PEER_ADDRESS_LEN]) -> Result<()> {
            bail!("store unavailable")
        }
    }

    const PEER: PeerAddress = PeerAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    #[test]
    fn empty_store_has_no_peer() {
        let store = DeviceIdentityStore::new(Box::new(MemoryPeerStore::new()));
        assert_eq!(store.read_last_peer(), None);
    }

    #[test]
    fn same_address_is_written_once() {
        let backend = MemoryPeerStore::new();
        let writes = backend.write_counter();
        let mut store = DeviceIdentityStore::new(Box::new(backend));

        assert!(store.update_last_peer(PEER));
        assert!(!store.update_last_peer(PEER));
        assert_eq!(writes.load(Ordering::Relaxed), 1);
        assert_eq!(store.read_last_peer(), Some(PEER));
    }

    #[test]
    fn different_address_overwrites() {
        let backend = MemoryPeerStore::with_blob(PEER.as_bytes().to_vec());
        let writes = backend.write_counter();
        let mut store = DeviceIdentityStore::new(Box::new(backend));

        let other = PeerAddress::new([1, 2, 3, 4, 5, 6]);
        assert!(store.update_last_peer(other));
        assert_eq!(store.read_last_peer(), Some(other));
        assert_eq!(writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn addresses_differing_in_one_byte_are_distinct() {
        let backend = MemoryPeerStore::with_blob(PEER.as_bytes().to_vec());
        let writes = backend.write_counter();
        let mut store = DeviceIdentityStore::new(Box::new(backend));

        let mut bytes = *PEER.as_bytes();
        bytes[5] = 0xFE;
        assert!(store.update_last_peer(PeerAddress::new(bytes)));
        assert_eq!(writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn malformed_blob_reads_as_no_peer() {
        let store = DeviceIdentityStore::new(Box::new(MemoryPeerStore::with_blob(vec![1, 2, 3])));
        assert_eq!(store.read_last_peer(), None);
    }

    #[test]
    fn broken_backend_is_not_fatal() {
        let mut store = DeviceIdentityStore::new(Box::new(BrokenStore));
        assert_eq!(store.read_last_peer(), None);
        assert!(!store.update_last_peer(PEER));
    }
}
