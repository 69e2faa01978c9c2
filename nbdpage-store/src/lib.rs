//! Core durable-storage abstraction for the nbdpage ecosystem.
//!
//! This crate provides the fundamental [`PageStore`] trait that defines how
//! fixed-size pages of an export are read from and written to durable
//! storage, plus the [`PageAddress`] key that names one such page.
//!
//! # Features
//!
//! - Async-first design using native async fn in traits
//! - Two trait variants: [`PageStore`] (single-threaded) and
//!   [`SendPageStore`] (multi-threaded)
//! - Stores take `&self` and are expected to be internally thread-safe
//!
//! # Example
//!
//! ```ignore
//! use nbdpage_store::{PageAddress, SendPageStore};
//!
//! struct MyStore;
//!
//! impl SendPageStore for MyStore {
//!     type Error = std::io::Error;
//!
//!     async fn read_page(&self, addr: &PageAddress) -> Result<Vec<u8>, Self::Error> {
//!         // Never-written pages read as zeroes
//!         Ok(vec![0; addr.size as usize])
//!     }
//!
//!     async fn write_page(&self, addr: &PageAddress, data: &[u8]) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//!
//!     async fn flush_export(&self, export: &str) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![allow(async_fn_in_trait)]

use core::fmt;

/// Identifies one page of one export against a [`PageStore`].
///
/// `size` is carried alongside the key so a store can zero-fill a
/// never-written page to the correct length on read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageAddress {
    /// Name of the export the page belongs to.
    pub export: String,
    /// Page index within the export (`offset / page_size`).
    pub index: u64,
    /// Page size in bytes.
    pub size: u64,
}

impl PageAddress {
    /// Create a page address.
    pub fn new(export: impl Into<String>, index: u64, size: u64) -> Self {
        Self {
            export: export.into(),
            index,
            size,
        }
    }

    /// Canonical object name for this page, shared by the file and object
    /// backends so their layouts stay interchangeable.
    pub fn object_name(&self) -> String {
        format!("page-{:08}.bin", self.index)
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/page-{:08}", self.export, self.index)
    }
}

/// A trait for durable page stores.
///
/// A store persists whole pages of `addr.size` bytes, keyed by
/// [`PageAddress`]. The contract:
///
/// - `read_page` returns exactly `addr.size` bytes. A page that has never
///   been written reads as a zero-filled buffer; this is **not** an error.
/// - `write_page` persists `data` (whose length must equal `addr.size`) as
///   the page content, effectively atomically: a concurrent `read_page` of
///   the same address observes either the old or the new content in full.
/// - `flush_export` is a durability barrier: once it returns success, every
///   prior successful `write_page` for that export is durable. Stores where
///   each write is already durable on return may make this a no-op.
///
/// Concurrent calls on different addresses must be safe; concurrent calls on
/// the same address yield one of the two serial orderings.
///
/// # Thread Safety
///
/// This trait generates two variants via [`trait_variant::make`]:
/// - [`PageStore`] - For single-threaded contexts (no `Send` requirement)
/// - [`SendPageStore`] - For multi-threaded contexts where futures must be
///   `Send`, e.g. when sessions run under `tokio::spawn`
#[trait_variant::make(SendPageStore: Send)]
pub trait PageStore {
    /// The error type for the store implementation.
    type Error: fmt::Debug + fmt::Display;

    /// Read one page. Never-written pages read as `addr.size` zero bytes.
    async fn read_page(&self, addr: &PageAddress) -> Result<Vec<u8>, Self::Error>;

    /// Persist one page. `data.len()` must equal `addr.size`.
    async fn write_page(&self, addr: &PageAddress, data: &[u8]) -> Result<(), Self::Error>;

    /// Durability barrier over every prior `write_page` for `export`.
    async fn flush_export(&self, export: &str) -> Result<(), Self::Error>;
}
