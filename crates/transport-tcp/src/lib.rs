//! TCP transport implementation for nexus-node
//!
//! Messages travel as length-prefixed frames (see [`framing`]). Each
//! connection owns a bounded outbound queue drained by a writer task, so
//! `send` is safe from many tasks and applies back-pressure when full.

pub mod framing;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nexus_transport::{Config, Connection, Listener, Transport, TransportError};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info};

pub use framing::{FrameCodec, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MIN_FRAME_SIZE};

use tokio_util::codec::Framed;

/// TCP-specific configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Generic transport configuration
    pub transport: Config,
    /// Disable Nagle's algorithm on accepted and dialed sockets
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            transport: Config::default(),
            nodelay: true,
        }
    }
}

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpConfig,
    next_id: AtomicU64,
}

impl TcpTransport {
    /// Create a new TCP transport with the given configuration
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Create a new TCP transport with default configuration
    pub fn new_default() -> Self {
        Self::new(TcpConfig::default())
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new_default()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        debug!("Connecting to tcp address {}", addr);

        let connect_timeout = Duration::from_millis(self.config.transport.connect_timeout_ms);
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!("connect to {addr} timed out"))
            })?
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        if self.config.nodelay {
            stream.set_nodelay(true).map_err(TransportError::Io)?;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = TcpConnection::spawn(stream, &self.config.transport, id);

        info!("TCP connection {} established to {}", id, addr);

        Ok(Box::new(conn))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;

        info!("TCP transport listening on {}", local_addr);

        Ok(Box::new(TcpListenerWrapper {
            inner: listener,
            config: self.config.clone(),
            local_addr: local_addr.to_string(),
            next_id: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One framed TCP connection.
///
/// The write half lives in a dedicated writer task fed by a bounded queue;
/// the read half is pulled directly by `recv`.
struct TcpConnection {
    id: u64,
    max_message_size: usize,
    outbound_tx: mpsc::Sender<Bytes>,
    stream: Mutex<SplitStream<Framed<TcpStream, FrameCodec>>>,
    closed: Arc<AtomicBool>,
}

impl Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TcpConnection {
    fn spawn(stream: TcpStream, config: &Config, id: u64) -> Self {
        let codec = FrameCodec::new().with_max_frame_size(config.max_message_size);
        let (sink, stream_half) = Framed::new(stream, codec).split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_size);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::write_loop(
            id,
            sink,
            outbound_rx,
            Arc::clone(&closed),
        ));

        Self {
            id,
            max_message_size: config.max_message_size.min(MAX_FRAME_SIZE),
            outbound_tx,
            stream: Mutex::new(stream_half),
            closed,
        }
    }

    async fn write_loop(
        id: u64,
        mut sink: SplitSink<Framed<TcpStream, FrameCodec>, Bytes>,
        mut outbound_rx: mpsc::Receiver<Bytes>,
        closed: Arc<AtomicBool>,
    ) {
        while let Some(data) = outbound_rx.recv().await {
            if let Err(e) = sink.send(data).await {
                error!("Writer for tcp connection {} failed: {}", id, e);
                closed.store(true, Ordering::Release);
                break;
            }
        }
        debug!("Writer for tcp connection {} exiting", id);
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let size = data.len();
        if size < MIN_FRAME_SIZE || size > self.max_message_size {
            return Err(TransportError::MessageSize {
                size,
                min: MIN_FRAME_SIZE,
                max: self.max_message_size,
            });
        }

        self.outbound_tx
            .send(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(data)) => {
                debug!("TCP connection {} received {} bytes", self.id, data.len());
                Ok(data)
            }
            Some(Err(e)) => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::Io(e))
            }
            None => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing tcp connection {}", self.id);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// TCP listener wrapper
struct TcpListenerWrapper {
    inner: TcpListener,
    config: TcpConfig,
    local_addr: String,
    next_id: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl Debug for TcpListenerWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListenerWrapper")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Listener for TcpListenerWrapper {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let (stream, addr) = self.inner.accept().await.map_err(TransportError::Io)?;
        debug!("Accepted tcp connection from {}", addr);

        if self.config.nodelay {
            stream.set_nodelay(true).map_err(TransportError::Io)?;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(TcpConnection::spawn(
            stream,
            &self.config.transport,
            id,
        )))
    }

    fn local_addr(&self) -> Result<String, TransportError> {
        Ok(self.local_addr.clone())
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing tcp listener on {}", self.local_addr);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
