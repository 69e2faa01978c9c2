//! Byte-addressed paged device with dirty tracking and writeback.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use nbdpage_store::{PageAddress, SendPageStore};

/// Error type for [`PagedDevice`] operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum DeviceError<E> {
    /// The starting offset lies outside the device.
    OutOfBounds {
        /// Requested starting offset.
        offset: u64,
        /// Device size in bytes.
        size: u64,
    },
    /// Underlying page store error.
    Store(E),
}

impl<E: fmt::Display> fmt::Display for DeviceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfBounds { offset, size } => {
                write!(f, "offset {} out of bounds for device of {} bytes", offset, size)
            }
            DeviceError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for DeviceError<E> {}

/// Page map and dirty map, guarded together by one lock.
///
/// `dirty` maps a page index to the write epoch of its most recent write, so
/// a flush can tell whether a page was re-written after its snapshot was
/// taken. Invariant: `dirty.keys() ⊆ pages.keys()`, and every buffer in
/// `pages` is exactly `page_size` bytes long.
struct PageTable {
    pages: HashMap<u64, Vec<u8>>,
    dirty: HashMap<u64, u64>,
    epoch: u64,
}

impl PageTable {
    fn mark_dirty(&mut self, index: u64) {
        self.epoch += 1;
        self.dirty.insert(index, self.epoch);
    }
}

/// A fixed-size, byte-addressed block device backed by a sparse page map.
///
/// Pages materialize on first access and stay resident for the device's
/// lifetime. With a store attached, absent pages are fetched on demand and
/// dirty pages are written back on [`flush`](Self::flush); without one the
/// device is purely RAM-backed and absent pages read as zeroes.
///
/// All methods take `&self`; the page map is guarded by a reader/writer lock
/// that is never held across a store call.
pub struct PagedDevice<S> {
    export: String,
    size: u64,
    page_size: u64,
    store: Option<S>,
    table: RwLock<PageTable>,
}

impl<S: SendPageStore> PagedDevice<S> {
    /// Create a device whose pages are filled from and written back to `store`.
    pub fn with_store(export: impl Into<String>, size: u64, page_size: u64, store: S) -> Self {
        Self::new(export, size, page_size, Some(store))
    }

    /// Create a purely RAM-backed device. Absent pages read as zeroes and
    /// [`flush`](Self::flush) only clears the dirty set.
    pub fn ram(export: impl Into<String>, size: u64, page_size: u64) -> Self {
        Self::new(export, size, page_size, None)
    }

    fn new(export: impl Into<String>, size: u64, page_size: u64, store: Option<S>) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            export: export.into(),
            size,
            page_size,
            store,
            table: RwLock::new(PageTable {
                pages: HashMap::new(),
                dirty: HashMap::new(),
                epoch: 0,
            }),
        }
    }

    /// Device length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Export name this device is bound to.
    pub fn export(&self) -> &str {
        &self.export
    }

    /// Indices of pages currently dirty, in ascending order.
    pub fn dirty_pages(&self) -> Vec<u64> {
        let table = self.table.read().unwrap();
        let mut indices: Vec<u64> = table.dirty.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    fn addr(&self, index: u64) -> PageAddress {
        PageAddress::new(self.export.clone(), index, self.page_size)
    }

    /// Read bytes starting at `offset` into `buf`.
    ///
    /// A read that begins past the end fails with
    /// [`DeviceError::OutOfBounds`]; one that begins in range but extends
    /// past the end is shortened, and the returned count reflects it.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError<S::Error>> {
        if offset >= self.size {
            return Err(DeviceError::OutOfBounds { offset, size: self.size });
        }
        let len = (buf.len() as u64).min(self.size - offset) as usize;
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let index = pos / self.page_size;
            let in_page = (pos % self.page_size) as usize;
            let n = (self.page_size as usize - in_page).min(len - done);
            let dst = &mut buf[done..done + n];

            // Fast path: resident page, copy out under the shared lock.
            let hit = {
                let table = self.table.read().unwrap();
                match table.pages.get(&index) {
                    Some(page) => {
                        dst.copy_from_slice(&page[in_page..in_page + n]);
                        true
                    }
                    None => false,
                }
            };

            if !hit {
                match &self.store {
                    // RAM mode: absent pages read as zeroes, nothing installed.
                    None => dst.fill(0),
                    Some(store) => {
                        let fetched = store
                            .read_page(&self.addr(index))
                            .await
                            .map_err(DeviceError::Store)?;
                        debug_assert_eq!(fetched.len() as u64, self.page_size);
                        // Re-check under the exclusive lock: another session
                        // may have installed the page while we fetched.
                        let mut table = self.table.write().unwrap();
                        let page = table.pages.entry(index).or_insert(fetched);
                        dst.copy_from_slice(&page[in_page..in_page + n]);
                    }
                }
            }
            done += n;
        }
        Ok(len)
    }

    /// Write `buf` starting at `offset`.
    ///
    /// Bounds behave as in [`read_at`](Self::read_at): a write that begins
    /// past the end fails, one extending past the end is truncated and the
    /// truncated count returned. Every touched page is marked dirty.
    pub async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, DeviceError<S::Error>> {
        if offset >= self.size {
            return Err(DeviceError::OutOfBounds { offset, size: self.size });
        }
        let len = (buf.len() as u64).min(self.size - offset) as usize;
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let index = pos / self.page_size;
            let in_page = (pos % self.page_size) as usize;
            let n = (self.page_size as usize - in_page).min(len - done);
            let src = &buf[done..done + n];

            let resident = {
                let mut table = self.table.write().unwrap();
                let hit = match table.pages.get_mut(&index) {
                    Some(page) => {
                        page[in_page..in_page + n].copy_from_slice(src);
                        true
                    }
                    None => false,
                };
                if hit {
                    table.mark_dirty(index);
                }
                hit
            };

            if !resident {
                // Fetch before install so bytes outside the written range
                // keep their durable content. The fetch happens with no lock
                // held; the install re-checks for a race winner.
                let fetched = match &self.store {
                    Some(store) => store
                        .read_page(&self.addr(index))
                        .await
                        .map_err(DeviceError::Store)?,
                    None => vec![0; self.page_size as usize],
                };
                debug_assert_eq!(fetched.len() as u64, self.page_size);
                let mut table = self.table.write().unwrap();
                let page = table.pages.entry(index).or_insert(fetched);
                page[in_page..in_page + n].copy_from_slice(src);
                table.mark_dirty(index);
            }
            done += n;
        }
        Ok(len)
    }

    /// Write every dirty page back to the store, then issue the store's
    /// durability barrier for this export.
    ///
    /// The dirty set and page contents are snapshotted up front under the
    /// shared lock, so writes landing after the snapshot stay dirty for the
    /// next flush. On a store failure the error is surfaced and only the
    /// pages already written are marked clean; the failed and later pages
    /// remain dirty so a later flush can make progress.
    pub async fn flush(&self) -> Result<(), DeviceError<S::Error>> {
        let snapshot: Vec<(u64, u64, Vec<u8>)> = {
            let table = self.table.read().unwrap();
            table
                .dirty
                .iter()
                .map(|(&index, &epoch)| (index, epoch, table.pages[&index].clone()))
                .collect()
        };

        let Some(store) = &self.store else {
            self.retire(&snapshot);
            return Ok(());
        };

        let mut written = 0;
        for (index, _, data) in &snapshot {
            if let Err(e) = store.write_page(&self.addr(*index), data).await {
                self.retire(&snapshot[..written]);
                return Err(DeviceError::Store(e));
            }
            written += 1;
        }
        self.retire(&snapshot);

        store
            .flush_export(&self.export)
            .await
            .map_err(DeviceError::Store)
    }

    /// Remove snapshotted entries from the dirty map, unless the page was
    /// re-written since the snapshot (its epoch moved on).
    fn retire(&self, entries: &[(u64, u64, Vec<u8>)]) {
        if entries.is_empty() {
            return;
        }
        let mut table = self.table.write().unwrap();
        for (index, epoch, _) in entries {
            if table.dirty.get(index) == Some(epoch) {
                table.dirty.remove(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const PAGE: u64 = 64;

    /// Store double that records every call and can be told to start
    /// failing writes after a number of successes.
    #[derive(Clone, Default)]
    struct RecordingStore {
        pages: Arc<Mutex<HashMap<(String, u64), Vec<u8>>>>,
        writes: Arc<Mutex<Vec<(PageAddress, Vec<u8>)>>>,
        flushes: Arc<Mutex<Vec<String>>>,
        write_budget: Arc<AtomicUsize>,
    }

    impl RecordingStore {
        fn new() -> Self {
            let store = Self::default();
            store.write_budget.store(usize::MAX, Ordering::SeqCst);
            store
        }

        fn failing_after(successes: usize) -> Self {
            let store = Self::default();
            store.write_budget.store(successes, Ordering::SeqCst);
            store
        }

        fn seed(&self, export: &str, index: u64, data: Vec<u8>) {
            self.pages
                .lock()
                .unwrap()
                .insert((export.to_string(), index), data);
        }

        fn recorded_writes(&self) -> Vec<(PageAddress, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl SendPageStore for RecordingStore {
        type Error = String;

        async fn read_page(&self, addr: &PageAddress) -> Result<Vec<u8>, Self::Error> {
            let pages = self.pages.lock().unwrap();
            Ok(pages
                .get(&(addr.export.clone(), addr.index))
                .cloned()
                .unwrap_or_else(|| vec![0; addr.size as usize]))
        }

        async fn write_page(&self, addr: &PageAddress, data: &[u8]) -> Result<(), Self::Error> {
            let budget = self.write_budget.load(Ordering::SeqCst);
            if budget == 0 {
                return Err(format!("injected write failure at {}", addr));
            }
            self.write_budget.store(budget - 1, Ordering::SeqCst);
            self.pages
                .lock()
                .unwrap()
                .insert((addr.export.clone(), addr.index), data.to_vec());
            self.writes.lock().unwrap().push((addr.clone(), data.to_vec()));
            Ok(())
        }

        async fn flush_export(&self, export: &str) -> Result<(), Self::Error> {
            self.flushes.lock().unwrap().push(export.to_string());
            Ok(())
        }
    }

    fn ram(size: u64) -> PagedDevice<RecordingStore> {
        PagedDevice::ram("vol0", size, PAGE)
    }

    #[tokio::test]
    async fn ram_reads_zeroes_without_installing() {
        let dev = ram(PAGE * 4);
        let mut buf = [0xAAu8; 100];
        let n = dev.read_at(&mut buf, 10).await.unwrap();
        assert_eq!(n, 100);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(dev.table.read().unwrap().pages.len(), 0);
    }

    #[tokio::test]
    async fn read_your_writes_across_page_boundary() {
        let dev = ram(PAGE * 4);
        // Two bytes at the tail of page 0, two at the head of page 1.
        dev.write_at(&[1, 2, 3, 4], PAGE - 2).await.unwrap();
        let mut buf = [0u8; 4];
        let n = dev.read_at(&mut buf, PAGE - 2).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(dev.dirty_pages(), vec![0, 1]);
    }

    #[tokio::test]
    async fn touched_pages_match_the_byte_range() {
        let dev = ram(PAGE * 8);
        dev.write_at(&vec![7u8; PAGE as usize * 2 + 1], PAGE * 2 + 1)
            .await
            .unwrap();
        assert_eq!(dev.dirty_pages(), vec![2, 3, 4]);
        let table = dev.table.read().unwrap();
        assert_eq!(table.pages.len(), 3);
        assert!(table.pages.values().all(|p| p.len() == PAGE as usize));
    }

    #[tokio::test]
    async fn out_of_bounds_start_is_rejected() {
        let dev = ram(PAGE);
        let mut buf = [0u8; 1];
        assert!(matches!(
            dev.read_at(&mut buf, PAGE).await,
            Err(DeviceError::OutOfBounds { offset, size }) if offset == PAGE && size == PAGE
        ));
        assert!(dev.write_at(&[1], PAGE).await.is_err());
        // Rejected requests never touch the page map.
        assert_eq!(dev.table.read().unwrap().pages.len(), 0);
    }

    #[tokio::test]
    async fn writes_past_the_end_are_truncated() {
        let dev = ram(PAGE);
        let n = dev.write_at(&[9u8; 8], PAGE - 3).await.unwrap();
        assert_eq!(n, 3);
        let mut buf = [0u8; 3];
        assert_eq!(dev.read_at(&mut buf, PAGE - 3).await.unwrap(), 3);
        assert_eq!(buf, [9, 9, 9]);
    }

    #[tokio::test]
    async fn reads_past_the_end_are_shortened() {
        let dev = ram(PAGE);
        let mut buf = [0xFFu8; 10];
        let n = dev.read_at(&mut buf, PAGE - 4).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
        // Bytes beyond the shortened read are untouched.
        assert_eq!(&buf[4..], &[0xFF; 6]);
    }

    #[tokio::test]
    async fn absent_pages_fill_lazily_from_the_store() {
        let store = RecordingStore::new();
        let mut seeded = vec![0u8; PAGE as usize];
        seeded[..4].copy_from_slice(b"disk");
        store.seed("vol0", 1, seeded);

        let dev = PagedDevice::with_store("vol0", PAGE * 4, PAGE, store);
        let mut buf = [0u8; 4];
        dev.read_at(&mut buf, PAGE).await.unwrap();
        assert_eq!(&buf, b"disk");
        // Filled pages are resident but clean.
        assert_eq!(dev.table.read().unwrap().pages.len(), 1);
        assert!(dev.dirty_pages().is_empty());
    }

    #[tokio::test]
    async fn partial_write_preserves_durable_bytes() {
        let store = RecordingStore::new();
        store.seed("vol0", 0, vec![0x55; PAGE as usize]);

        let dev = PagedDevice::with_store("vol0", PAGE * 4, PAGE, store);
        dev.write_at(&[1, 2], 8).await.unwrap();

        let mut buf = vec![0u8; PAGE as usize];
        dev.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(&buf[..8], &[0x55; 8]);
        assert_eq!(&buf[8..10], &[1, 2]);
        assert_eq!(&buf[10..], &vec![0x55; PAGE as usize - 10][..]);
    }

    #[tokio::test]
    async fn flush_writes_each_dirty_page_once() {
        let store = RecordingStore::new();
        let dev = PagedDevice::with_store("vol0", PAGE * 4, PAGE, store.clone());

        dev.write_at(&[1, 2, 3, 4], PAGE - 2).await.unwrap();
        dev.write_at(&[5], 0).await.unwrap();
        assert_eq!(dev.dirty_pages(), vec![0, 1]);

        dev.flush().await.unwrap();
        assert!(dev.dirty_pages().is_empty());

        let mut writes = store.recorded_writes();
        writes.sort_by_key(|(addr, _)| addr.index);
        assert_eq!(writes.len(), 2);
        let (addr0, page0) = &writes[0];
        assert_eq!((addr0.index, addr0.size), (0, PAGE));
        assert_eq!(page0.len(), PAGE as usize);
        assert_eq!(page0[0], 5);
        assert_eq!(&page0[PAGE as usize - 2..], &[1, 2]);
        assert!(page0[1..PAGE as usize - 2].iter().all(|&b| b == 0));
        let (addr1, page1) = &writes[1];
        assert_eq!(addr1.index, 1);
        assert_eq!(&page1[..2], &[3, 4]);
        assert!(page1[2..].iter().all(|&b| b == 0));
        assert_eq!(store.flushes.lock().unwrap().as_slice(), &["vol0".to_string()]);

        // Nothing left to write on the next flush.
        dev.flush().await.unwrap();
        assert_eq!(store.recorded_writes().len(), 2);
    }

    #[tokio::test]
    async fn failed_flush_keeps_unwritten_pages_dirty() {
        let store = RecordingStore::failing_after(1);
        let dev = PagedDevice::with_store("vol0", PAGE * 4, PAGE, store.clone());

        dev.write_at(&[1], 0).await.unwrap();
        dev.write_at(&[2], PAGE).await.unwrap();
        assert!(dev.flush().await.is_err());

        // One page made it out and is clean; the other is still dirty.
        let dirty = dev.dirty_pages();
        assert_eq!(dirty.len(), 1);
        assert!(store.flushes.lock().unwrap().is_empty());

        // A later flush finishes the job.
        store.write_budget.store(usize::MAX, Ordering::SeqCst);
        dev.flush().await.unwrap();
        assert!(dev.dirty_pages().is_empty());
        assert_eq!(store.recorded_writes().len(), 2);
    }

    #[tokio::test]
    async fn ram_flush_clears_the_dirty_set() {
        let dev = ram(PAGE * 2);
        dev.write_at(&[1], 0).await.unwrap();
        assert_eq!(dev.dirty_pages(), vec![0]);
        dev.flush().await.unwrap();
        assert!(dev.dirty_pages().is_empty());
    }
}
