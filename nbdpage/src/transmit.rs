//! Transmission-phase request/reply loop.

use embedded_io_async::{Read, Write};
use log::warn;
use nbdpage_device::PagedDevice;
use nbdpage_store::SendPageStore;

use crate::ProtocolError;
use crate::consts::*;
use crate::wire;

/// Serve transmission-phase requests against `dev` until the client
/// disconnects or a fatal framing error ends the session.
///
/// Requests are handled strictly in order; every reply echoes its request's
/// cookie. Out-of-range reads answer `EINVAL` and out-of-range writes
/// `ENOSPC`; device or store failures answer `EIO` and the session
/// continues. A request frame not starting with `NBD_REQUEST_MAGIC` is
/// fatal and ends the session without a reply.
pub async fn transmit<T, S>(
    stream: &mut T,
    dev: &PagedDevice<S>,
) -> Result<(), ProtocolError<T::Error>>
where
    T: Read + Write,
    S: SendPageStore,
{
    loop {
        let magic = wire::read_u32(stream).await?;
        if magic != NBD_REQUEST_MAGIC {
            return Err(ProtocolError::BadRequestMagic(magic));
        }
        let _command_flags = wire::read_u16(stream).await?;
        let command = wire::read_u16(stream).await?;
        let cookie = wire::read_u64(stream).await?;
        let offset = wire::read_u64(stream).await?;
        let length = wire::read_u32(stream).await?;

        match command {
            NBD_CMD_READ => {
                if out_of_range(offset, length, dev.size()) {
                    write_simple_reply(stream, NBD_EINVAL, cookie, &[]).await?;
                    continue;
                }
                let mut buf = vec![0u8; length as usize];
                match dev.read_at(&mut buf, offset).await {
                    Ok(_) => write_simple_reply(stream, 0, cookie, &buf).await?,
                    Err(e) => {
                        warn!("export {:?}: read failed: {}", dev.export(), e);
                        write_simple_reply(stream, NBD_EIO, cookie, &[]).await?;
                    }
                }
            }
            NBD_CMD_WRITE => {
                // The payload is drained before any validation so a rejected
                // write cannot leave its bytes in the stream and
                // desynchronize the framing of later requests.
                let payload = wire::read_bytes(stream, length as usize).await?;
                if out_of_range(offset, length, dev.size()) {
                    write_simple_reply(stream, NBD_ENOSPC, cookie, &[]).await?;
                    continue;
                }
                match dev.write_at(&payload, offset).await {
                    Ok(_) => write_simple_reply(stream, 0, cookie, &[]).await?,
                    Err(e) => {
                        warn!("export {:?}: write failed: {}", dev.export(), e);
                        write_simple_reply(stream, NBD_EIO, cookie, &[]).await?;
                    }
                }
            }
            NBD_CMD_FLUSH => match dev.flush().await {
                Ok(()) => write_simple_reply(stream, 0, cookie, &[]).await?,
                Err(e) => {
                    warn!("export {:?}: flush failed: {}", dev.export(), e);
                    write_simple_reply(stream, NBD_EIO, cookie, &[]).await?;
                }
            },
            NBD_CMD_DISC => return Ok(()),
            _ => write_simple_reply(stream, NBD_EINVAL, cookie, &[]).await?,
        }
    }
}

fn out_of_range(offset: u64, length: u32, size: u64) -> bool {
    match offset.checked_add(u64::from(length)) {
        Some(end) => end > size,
        None => true,
    }
}

/// Emit a simple reply. The payload is only sent on success, which in
/// practice means a successful `READ`.
async fn write_simple_reply<W: Write>(
    w: &mut W,
    error: u32,
    cookie: u64,
    payload: &[u8],
) -> Result<(), ProtocolError<W::Error>> {
    wire::write_u32(w, NBD_SIMPLE_REPLY_MAGIC).await?;
    wire::write_u32(w, error).await?;
    wire::write_u64(w, cookie).await?;
    if error == 0 && !payload.is_empty() {
        wire::write_bytes(w, payload).await?;
    }
    wire::flush(w).await
}
