//! JSON file backend for the last-peer store.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use a2dp_pipeline::identity::PeerStore;
use a2dp_sink_types::PEER_ADDRESS_LEN;

#[derive(Serialize, Deserialize)]
struct StoredPeer {
    /// Raw address bytes; length is checked by the identity store, not here.
    last_peer: Vec<u8>,
}

pub struct JsonPeerStore {
    path: PathBuf,
}

impl JsonPeerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PeerStore for JsonPeerStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {:?}", self.path)),
        };
        let stored: StoredPeer =
            serde_json::from_str(&raw).with_context(|| format!("parse {:?}", self.path))?;
        Ok(Some(stored.last_peer))
    }

    fn save(&mut self, address: &[u8; PEER_ADDRESS_LEN]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {dir:?}"))?;
        }
        let json = serde_json::to_string_pretty(&StoredPeer {
            last_peer: address.to_vec(),
        })?;
        // Write then rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {tmp:?}"))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("rename to {:?}", self.path))?;
        Ok(())
    }
}
