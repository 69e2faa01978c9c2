//! PageStore implementations for the nbdpage ecosystem.
//!
//! Three backends, all satisfying the
//! [`SendPageStore`](nbdpage_store::SendPageStore) contract:
//!
//! - [`MemStore`]: pages held in process memory. Durable only for the
//!   process lifetime; mostly useful for tests and scratch exports.
//! - [`FsStore`]: one file per page under a root directory, written
//!   create-temp-then-rename so readers never observe a partial page.
//! - [`HttpObjectStore`]: one object per page behind an HTTP/1.1 endpoint,
//!   `GET` to read and `PUT` to write. Works against S3-compatible object
//!   gateways that accept unsigned requests.
//!
//! All three layouts use the same `<export>/page-<index:08>.bin` naming, so
//! an export can be copied between backends with plain tooling.

mod fs;
mod http;
mod mem;

pub use fs::FsStore;
pub use http::{HttpObjectStore, HttpStoreError};
pub use mem::MemStore;
