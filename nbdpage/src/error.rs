//! Session-fatal protocol errors.

use core::fmt;

/// Error type for handshake and transmission framing.
///
/// Every variant is fatal to its session: the connection is closed without a
/// reply. Recoverable conditions (unknown options, out-of-range requests,
/// device I/O failures) are answered on the wire instead and never surface
/// here.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProtocolError<E> {
    /// Underlying stream error.
    Io(E),
    /// The peer closed the stream in the middle of a frame.
    UnexpectedEof,
    /// An option did not start with `IHAVEOPT`.
    BadOptionMagic(u64),
    /// A request did not start with `NBD_REQUEST_MAGIC`.
    BadRequestMagic(u32),
}

impl<E> From<E> for ProtocolError<E> {
    fn from(e: E) -> Self {
        ProtocolError::Io(e)
    }
}

impl<E: fmt::Display> fmt::Display for ProtocolError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "stream error: {}", e),
            ProtocolError::UnexpectedEof => write!(f, "unexpected end of stream"),
            ProtocolError::BadOptionMagic(magic) => {
                write!(f, "bad option magic: {:#018x}", magic)
            }
            ProtocolError::BadRequestMagic(magic) => {
                write!(f, "bad request magic: {:#010x}", magic)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> core::error::Error for ProtocolError<E> {}
