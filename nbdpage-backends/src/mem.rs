//! In-memory page store.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use nbdpage_store::{PageAddress, SendPageStore};

/// Page store backed by process memory.
///
/// Pages survive for the process lifetime only; `flush_export` is a no-op
/// because every write is already as durable as this store gets. Cloning is
/// cheap and clones share the same pages.
#[derive(Clone, Default)]
pub struct MemStore {
    pages: Arc<Mutex<HashMap<(String, u64), Vec<u8>>>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SendPageStore for MemStore {
    type Error = Infallible;

    async fn read_page(&self, addr: &PageAddress) -> Result<Vec<u8>, Self::Error> {
        let pages = self.pages.lock().unwrap();
        Ok(pages
            .get(&(addr.export.clone(), addr.index))
            .cloned()
            .unwrap_or_else(|| vec![0; addr.size as usize]))
    }

    async fn write_page(&self, addr: &PageAddress, data: &[u8]) -> Result<(), Self::Error> {
        let mut pages = self.pages.lock().unwrap();
        pages.insert((addr.export.clone(), addr.index), data.to_vec());
        Ok(())
    }

    async fn flush_export(&self, _export: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}
