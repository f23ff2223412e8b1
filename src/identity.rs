//! Device identity: the hardware address the server knows us by, and the
//! device id it assigns.

use crate::storage::{DEVICE_ID_KEY, FileStore};
use parking_lot::RwLock;
use protocol_ganymede::StoreError;
use std::path::Path;
use std::sync::Arc;

/// Normalize a `xx:xx:xx:xx:xx:xx` address to lower case, `None` if it is
/// malformed.
pub fn parse_mac(s: &str) -> Option<String> {
    let octets: Vec<&str> = s.trim().split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    if !octets
        .iter()
        .all(|o| o.len() == 2 && o.bytes().all(|b| b.is_ascii_hexdigit()))
    {
        return None;
    }
    Some(octets.join(":").to_ascii_lowercase())
}

/// First non-loopback, non-zero interface address under `sys_class_net`
/// (normally `/sys/class/net`), in name order.
pub fn discover_mac(sys_class_net: &Path) -> Option<String> {
    let mut names: Vec<_> = std::fs::read_dir(sys_class_net)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .filter(|n| n != "lo")
        .collect();
    names.sort();

    names.into_iter().find_map(|name| {
        let address = std::fs::read_to_string(sys_class_net.join(&name).join("address")).ok()?;
        parse_mac(&address).filter(|mac| mac != "00:00:00:00:00:00")
    })
}

pub struct Identity {
    mac: String,
    device_id: RwLock<Option<String>>,
    store: Arc<FileStore>,
}

impl Identity {
    /// `mac` must already be normalized. A device id persisted by an
    /// earlier run is loaded.
    pub fn new(mac: String, store: Arc<FileStore>) -> Result<Self, StoreError> {
        let device_id = store.read_string(DEVICE_ID_KEY)?;
        if let Some(id) = &device_id {
            tracing::debug!(device_id = %id, "loaded device id");
        }
        Ok(Self {
            mac,
            device_id: RwLock::new(device_id),
            store,
        })
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn device_id(&self) -> Option<String> {
        self.device_id.read().clone()
    }

    /// Record the id assigned by the server. Persisted only when it changes.
    pub fn set_device_id(&self, id: &str) -> Result<(), StoreError> {
        let mut current = self.device_id.write();
        if current.as_deref() == Some(id) {
            return Ok(());
        }
        self.store.write_string(DEVICE_ID_KEY, id)?;
        tracing::info!(device_id = id, "device id assigned");
        *current = Some(id.to_string());
        Ok(())
    }
}
