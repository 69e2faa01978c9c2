//! Big-endian framing primitives over buffered byte streams.
//!
//! Thin wrappers around `embedded_io_async` reads and writes. Reads demand
//! exact byte counts: a stream ending mid-field surfaces as
//! [`ProtocolError::UnexpectedEof`], which is fatal to the session.

use embedded_io_async::{Read, Write};

use crate::ProtocolError;

/// Fill `buf` completely, handling partial reads. The stream ending before
/// the buffer is full is a framing error.
pub async fn read_exact<R: Read>(
    r: &mut R,
    buf: &mut [u8],
) -> Result<(), ProtocolError<R::Error>> {
    let mut offset = 0;
    while offset < buf.len() {
        let n = r.read(&mut buf[offset..]).await?;
        if n == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
        offset += n;
    }
    Ok(())
}

/// Read `n` bytes into a fresh buffer.
pub async fn read_bytes<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, ProtocolError<R::Error>> {
    let mut buf = vec![0u8; n];
    read_exact(r, &mut buf).await?;
    Ok(buf)
}

/// Read a big-endian u16.
pub async fn read_u16<R: Read>(r: &mut R) -> Result<u16, ProtocolError<R::Error>> {
    let mut buf = [0u8; 2];
    read_exact(r, &mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a big-endian u32.
pub async fn read_u32<R: Read>(r: &mut R) -> Result<u32, ProtocolError<R::Error>> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a big-endian u64.
pub async fn read_u64<R: Read>(r: &mut R) -> Result<u64, ProtocolError<R::Error>> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf).await?;
    Ok(u64::from_be_bytes(buf))
}

/// Write a big-endian u16.
pub async fn write_u16<W: Write>(w: &mut W, v: u16) -> Result<(), ProtocolError<W::Error>> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

/// Write a big-endian u32.
pub async fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<(), ProtocolError<W::Error>> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

/// Write a big-endian u64.
pub async fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), ProtocolError<W::Error>> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

/// Write a raw payload.
pub async fn write_bytes<W: Write>(w: &mut W, buf: &[u8]) -> Result<(), ProtocolError<W::Error>> {
    w.write_all(buf).await?;
    Ok(())
}

/// Push buffered bytes down to the transport.
pub async fn flush<W: Write>(w: &mut W) -> Result<(), ProtocolError<W::Error>> {
    w.flush().await?;
    Ok(())
}
