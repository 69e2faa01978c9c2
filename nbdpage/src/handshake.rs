//! Fixed-newstyle option negotiation.

use embedded_io_async::{Read, Write};
use log::debug;

use crate::ProtocolError;
use crate::consts::*;
use crate::wire;

/// Outcome of a completed negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The client aborted; the session ends without transmission.
    Abort,
    /// The client committed to `export`; transmission follows.
    Go {
        /// Resolved export name (the server default if the client sent none).
        export: String,
    },
}

/// Run the server side of the fixed-newstyle handshake.
///
/// Emits the greeting, reads and discards the client flags, then serves the
/// option loop until the client aborts or commits to an export with `GO`.
/// Unknown options are answered `NBD_REP_ERR_UNSUP` and the loop continues;
/// a malformed `GO` payload is answered `NBD_REP_ERR_INVALID` likewise. An
/// option frame not starting with `IHAVEOPT` is fatal.
///
/// On `GO` the export size announced to the client is always
/// `default_size`; per-export sizes are not negotiated.
pub async fn negotiate<T: Read + Write>(
    stream: &mut T,
    default_export: &str,
    default_size: u64,
) -> Result<Negotiation, ProtocolError<T::Error>> {
    wire::write_u64(stream, NBDMAGIC).await?;
    wire::write_u64(stream, IHAVEOPT).await?;
    wire::write_u16(stream, NBD_FLAG_FIXED_NEWSTYLE | NBD_FLAG_NO_ZEROES).await?;
    wire::flush(stream).await?;

    let _client_flags = wire::read_u32(stream).await?;

    loop {
        let magic = wire::read_u64(stream).await?;
        if magic != IHAVEOPT {
            return Err(ProtocolError::BadOptionMagic(magic));
        }
        let option = wire::read_u32(stream).await?;
        let length = wire::read_u32(stream).await?;
        let data = wire::read_bytes(stream, length as usize).await?;

        match option {
            NBD_OPT_ABORT => {
                write_option_reply(stream, option, NBD_REP_ACK, &[]).await?;
                wire::flush(stream).await?;
                return Ok(Negotiation::Abort);
            }
            NBD_OPT_GO => match parse_go(&data) {
                Ok(name) => {
                    let export = if name.is_empty() {
                        default_export.to_string()
                    } else {
                        name
                    };
                    let flags = NBD_FLAG_HAS_FLAGS | NBD_FLAG_SEND_FLUSH;
                    let info = info_export_payload(default_size, flags);
                    write_option_reply(stream, option, NBD_REP_INFO, &info).await?;
                    write_option_reply(stream, option, NBD_REP_ACK, &[]).await?;
                    wire::flush(stream).await?;
                    return Ok(Negotiation::Go { export });
                }
                Err(reason) => {
                    debug!("rejecting GO option: {}", reason);
                    write_option_reply(stream, option, NBD_REP_ERR_INVALID, reason.as_bytes())
                        .await?;
                    wire::flush(stream).await?;
                }
            },
            _ => {
                debug!("unsupported option {}", option);
                write_option_reply(stream, option, NBD_REP_ERR_UNSUP, &[]).await?;
                wire::flush(stream).await?;
            }
        }
    }
}

/// Extract the export name from a `GO` payload:
/// `name_len:u32, name[name_len], info_count:u16, info_ids:u16[info_count]`.
///
/// The info ids are requests for extra `NBD_REP_INFO` blocks; only the
/// mandatory export block is ever sent, so they are discarded. A declared
/// info list running past the payload is tolerated for the same reason.
fn parse_go(data: &[u8]) -> Result<String, &'static str> {
    if data.len() < 6 {
        return Err("short GO payload");
    }
    let name_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if name_len + 6 > data.len() {
        return Err("bad export name length");
    }
    Ok(String::from_utf8_lossy(&data[4..4 + name_len]).into_owned())
}

fn info_export_payload(size: u64, transmission_flags: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&NBD_INFO_EXPORT.to_be_bytes());
    payload.extend_from_slice(&size.to_be_bytes());
    payload.extend_from_slice(&transmission_flags.to_be_bytes());
    payload
}

async fn write_option_reply<W: Write>(
    w: &mut W,
    option: u32,
    reply_type: u32,
    payload: &[u8],
) -> Result<(), ProtocolError<W::Error>> {
    wire::write_u64(w, NBD_REP_MAGIC).await?;
    wire::write_u32(w, option).await?;
    wire::write_u32(w, reply_type).await?;
    wire::write_u32(w, payload.len() as u32).await?;
    if !payload.is_empty() {
        wire::write_bytes(w, payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn go_payload(name: &[u8], info_ids: &[u16]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(name.len() as u32).to_be_bytes());
        data.extend_from_slice(name);
        data.extend_from_slice(&(info_ids.len() as u16).to_be_bytes());
        for id in info_ids {
            data.extend_from_slice(&id.to_be_bytes());
        }
        data
    }

    #[test]
    fn go_payload_with_name_parses() {
        assert_eq!(parse_go(&go_payload(b"vol0", &[])).unwrap(), "vol0");
        assert_eq!(parse_go(&go_payload(b"", &[])).unwrap(), "");
    }

    #[test]
    fn go_info_ids_are_ignored() {
        assert_eq!(parse_go(&go_payload(b"vol0", &[0, 1, 2])).unwrap(), "vol0");
    }

    #[test]
    fn go_info_count_past_payload_is_tolerated() {
        let mut data = go_payload(b"vol0", &[]);
        // Claim four info ids but supply none.
        let count_at = data.len() - 2;
        data[count_at..].copy_from_slice(&4u16.to_be_bytes());
        assert_eq!(parse_go(&data).unwrap(), "vol0");
    }

    #[test]
    fn short_go_payloads_are_rejected() {
        assert!(parse_go(&[]).is_err());
        assert!(parse_go(&[0, 0, 0, 0, 0]).is_err());
        // Name length pointing past the payload.
        let mut data = go_payload(b"vol0", &[]);
        data[..4].copy_from_slice(&100u32.to_be_bytes());
        assert!(parse_go(&data).is_err());
    }

    #[test]
    fn info_export_payload_layout() {
        let payload = info_export_payload(0x1122334455667788, 5);
        assert_eq!(payload.len(), 12);
        assert_eq!(&payload[..2], &[0, 0]);
        assert_eq!(&payload[2..10], &0x1122334455667788u64.to_be_bytes());
        assert_eq!(&payload[10..], &[0, 5]);
    }
}
