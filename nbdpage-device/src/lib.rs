//! Paged in-memory block devices over a durable page store.
//!
//! A [`PagedDevice`] presents a byte-addressed, fixed-size block device.
//! Internally it keeps a sparse map of fixed-size pages: pages materialize on
//! first access (lazily filled from a [`SendPageStore`](nbdpage_store::SendPageStore)
//! when one is attached, zeroed otherwise), writes mark their pages dirty,
//! and [`PagedDevice::flush`] writes every dirty page back to the store.
//!
//! A [`DeviceRegistry`] shares one device per export name across sessions,
//! so concurrent attaches to the same export see the same bytes.

mod paged;
mod registry;

pub use paged::{DeviceError, PagedDevice};
pub use registry::DeviceRegistry;
