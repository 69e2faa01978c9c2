//! TCP acceptor and per-connection sessions.

use std::io;
use std::sync::Arc;

use embedded_io_adapters::tokio_1::FromTokio;
use embedded_io_async::{Read, Write};
use log::{debug, info, warn};
use nbdpage_device::DeviceRegistry;
use nbdpage_store::SendPageStore;
use tokio::io::BufStream;
use tokio::net::TcpListener;

use crate::ProtocolError;
use crate::handshake::{self, Negotiation};
use crate::transmit;

/// Server-wide settings; every export attaches with the same size and page
/// size.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:10809`.
    pub addr: String,
    /// Size in bytes of every export.
    pub default_size: u64,
    /// Page size in bytes for the in-memory cache and the page store.
    pub page_size: u64,
    /// Export served when a client attaches without a name.
    pub default_export: String,
}

/// Bind the listener and serve sessions until a fatal accept error.
///
/// Each accepted connection runs in its own task: handshake, then the
/// transmission loop against the shared device for the attached export.
/// Transient accept errors are logged and accepting continues.
pub async fn run<S>(cfg: ServerConfig, store: Option<S>) -> io::Result<()>
where
    S: SendPageStore + Clone + Send + Sync + 'static,
    S::Error: Send,
{
    let listener = TcpListener::bind(&cfg.addr).await?;
    info!(
        "listening on {} (default_size={}, page_size={})",
        cfg.addr, cfg.default_size, cfg.page_size
    );

    let registry = Arc::new(DeviceRegistry::new(cfg.page_size, store));
    let cfg = Arc::new(cfg);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!("connection from {}", peer);
                let registry = Arc::clone(&registry);
                let cfg = Arc::clone(&cfg);
                tokio::spawn(async move {
                    let stream = FromTokio::new(BufStream::new(socket));
                    match serve_conn(stream, &cfg, &registry).await {
                        Ok(()) => debug!("connection {} closed", peer),
                        Err(e) => warn!("connection {}: {}", peer, e),
                    }
                });
            }
            Err(e) if is_transient_accept_error(&e) => {
                warn!("transient accept error: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Serve one session over an already-connected stream: negotiate, resolve
/// the export against the registry, then run the transmission loop. Returns
/// cleanly on `ABORT` or `DISC`; a peer that just drops the connection
/// surfaces as a framing error.
pub async fn serve_conn<T, S>(
    mut stream: T,
    cfg: &ServerConfig,
    registry: &DeviceRegistry<S>,
) -> Result<(), ProtocolError<T::Error>>
where
    T: Read + Write,
    S: SendPageStore + Clone,
{
    match handshake::negotiate(&mut stream, &cfg.default_export, cfg.default_size).await? {
        Negotiation::Abort => Ok(()),
        Negotiation::Go { export } => {
            let dev = registry.open_or_create(&export, cfg.default_size);
            debug!("export {:?}: session attached", export);
            transmit::transmit(&mut stream, &dev).await
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
