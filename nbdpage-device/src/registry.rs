//! Process-wide export name → device registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use nbdpage_store::SendPageStore;

use crate::PagedDevice;

/// Hands out one shared [`PagedDevice`] per export name.
///
/// Repeated attaches to the same name return the same device, so sessions
/// of one process observe each other's acknowledged writes. The registry
/// lock is held only around lookup/insert, never across I/O.
pub struct DeviceRegistry<S> {
    page_size: u64,
    store: Option<S>,
    devices: Mutex<HashMap<String, Arc<PagedDevice<S>>>>,
}

impl<S: SendPageStore + Clone> DeviceRegistry<S> {
    /// Create a registry. Devices it creates use `page_size` and a clone of
    /// `store` (`None` for purely RAM-backed devices).
    pub fn new(page_size: u64, store: Option<S>) -> Self {
        Self {
            page_size,
            store,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the device for `export`, creating it with `size` bytes on
    /// first attach. Later attaches reuse the existing device regardless of
    /// `size`; the size is fixed for the device's lifetime.
    pub fn open_or_create(&self, export: &str, size: u64) -> Arc<PagedDevice<S>> {
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry(export.to_string())
            .or_insert_with(|| {
                debug!(
                    "export {:?}: new device (size={}, page_size={})",
                    export, size, self.page_size
                );
                let dev = match self.store.clone() {
                    Some(store) => PagedDevice::with_store(export, size, self.page_size, store),
                    None => PagedDevice::ram(export, size, self.page_size),
                };
                Arc::new(dev)
            })
            .clone()
    }
}
