//! TCP ingest listener
//!
//! The hub binds the well-known ingest port and accepts one connection at a
//! time. A producer writes one JSON document and closes its side; the
//! accumulated bytes are decoded and handed to the hub's router. Sending
//! exactly [`SHUTDOWN_SENTINEL`] in a single write stops the listener.
//!
//! A connection that sends more than the configured maximum, or stays silent
//! longer than the read timeout, is dropped so that it cannot stall the
//! listener.
//!
//! Binding fails when another process already owns the port. Callers treat
//! that as "someone else owns ingestion", not as fatal.

use asset_relay_core::config::IngestConfig;
use asset_relay_core::payload::{SHUTDOWN_SENTINEL, decode_payload};
use asset_relay_core::thumbnail::ThumbnailFinder;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::daemon::hub::ImportRouter;

/// What one connection produced
#[derive(Debug, PartialEq, Eq)]
enum Received {
    Payload(Vec<u8>),
    Shutdown,
}

/// Bounds applied to every connection
#[derive(Debug, Clone, Copy)]
struct ReadLimits {
    chunk_size: usize,
    max_payload: usize,
    idle: Duration,
}

impl ReadLimits {
    fn from_config(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_payload: config.max_payload_bytes,
            idle: config.read_timeout(),
        }
    }
}

/// A bound, not yet running, ingest listener
#[derive(Debug)]
pub struct SocketIngestService {
    listener: TcpListener,
    limits: ReadLimits,
    thumbnails: ThumbnailFinder,
}

impl SocketIngestService {
    /// Bind the configured address with the configured backlog.
    pub async fn bind(config: &IngestConfig, thumbnails: ThumbnailFinder) -> io::Result<Self> {
        let addr = lookup_host(config.address())
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, config.address()))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog)?;

        info!("Ingest listener bound to {}", listener.local_addr()?);
        Ok(Self {
            listener,
            limits: ReadLimits::from_config(config),
            thumbnails,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop. It runs until `cancel` fires or a producer
    /// sends the shutdown sentinel.
    pub fn spawn(self, router: Arc<dyn ImportRouter>, cancel: CancellationToken) -> io::Result<IngestHandle> {
        let local_addr = self.local_addr()?;
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            self.run(router, loop_cancel).await;
        });
        Ok(IngestHandle {
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    async fn run(self, router: Arc<dyn ImportRouter>, cancel: CancellationToken) {
        info!("Ingest accept loop started");
        let thumbnails = Arc::new(self.thumbnails);

        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingest listener cancelled");
                    break;
                }
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        debug!("Ingest connection from {peer}");
                        stream
                    }
                    Err(e) => {
                        error!("Ingest accept error: {e}");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingest listener cancelled mid-connection");
                    break;
                }
                result = read_connection(stream, self.limits) => result,
            };

            match received {
                Ok(Received::Shutdown) => {
                    info!("Producer sent shutdown sentinel; stopping ingest listener");
                    break;
                }
                Ok(Received::Payload(bytes)) => {
                    handle_payload(bytes, Arc::clone(&thumbnails), Arc::clone(&router)).await;
                }
                Err(e) => warn!("Failed to read ingest connection: {e}"),
            }
        }

        info!("Ingest accept loop stopped");
    }
}

async fn read_connection(mut stream: TcpStream, limits: ReadLimits) -> io::Result<Received> {
    read_until_closed(&mut stream, limits).await
}

/// Accumulate until the peer closes. A single read equal to the sentinel, or
/// a whole stream consisting of it, means shutdown.
///
/// Fails with `TimedOut` when a read waits longer than `limits.idle`, and with
/// `InvalidData` once more than `limits.max_payload` bytes arrived.
async fn read_until_closed<R: AsyncRead + Unpin>(reader: &mut R, limits: ReadLimits) -> io::Result<Received> {
    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; limits.chunk_size];

    loop {
        let n = match tokio::time::timeout(limits.idle, reader.read(&mut chunk)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data for {:?}", limits.idle),
                ));
            }
        };
        if n == 0 {
            break;
        }
        if &chunk[..n] == SHUTDOWN_SENTINEL {
            return Ok(Received::Shutdown);
        }
        if buffer.len() + n > limits.max_payload {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload exceeds {} bytes", limits.max_payload),
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    if buffer == SHUTDOWN_SENTINEL {
        return Ok(Received::Shutdown);
    }
    Ok(Received::Payload(buffer))
}

async fn handle_payload(bytes: Vec<u8>, thumbnails: Arc<ThumbnailFinder>, router: Arc<dyn ImportRouter>) {
    if bytes.is_empty() {
        debug!("Ingest connection closed without data");
        return;
    }
    let received = bytes.len();

    let result = tokio::task::spawn_blocking(move || {
        let decoded = match decode_payload(&bytes, &thumbnails) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding ingest payload ({received} bytes): {e}");
                return;
            }
        };
        for rejected in &decoded.rejected {
            debug!("Dropped payload element: {rejected}");
        }
        if decoded.requests.is_empty() {
            info!("Ingest payload contained no importable assets");
            return;
        }

        match router.route_import_data(decoded.requests) {
            Ok(outcome) => debug!("Routed ingest payload: {outcome:?}"),
            Err(e) => error!("Failed to route ingest payload: {e}"),
        }
    })
    .await;

    if let Err(e) = result {
        error!("Ingest payload handler panicked: {e}");
    }
}

/// Running ingest listener
#[derive(Debug)]
pub struct IngestHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl IngestHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `true` once the accept loop has exited (cancelled or sentinel).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Cancel the accept loop and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Ingest task panicked: {e}");
            }
        }
    }
}
