//! NBD server engine over paged block devices.
//!
//! Implements the fixed-newstyle dialect of the NBD protocol: the
//! [`handshake`] module negotiates options until a client commits to an
//! export, the [`transmit`] module runs the request/reply loop against a
//! [`PagedDevice`](nbdpage_device::PagedDevice), and [`run`] ties both to a
//! TCP listener with one task per connection.
//!
//! All stream code is written against `embedded_io_async` traits; the
//! acceptor bridges `tokio` sockets through `embedded_io_adapters`, and
//! tests drive whole sessions over in-memory duplex streams the same way.

pub mod consts;
mod error;
pub mod handshake;
mod server;
pub mod transmit;
pub mod wire;

pub use error::ProtocolError;
pub use server::{ServerConfig, run, serve_conn};
