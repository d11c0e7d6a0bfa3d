//! In-memory transport implementation for testing
//!
//! This transport routes messages between endpoints within the same process,
//! perfect for testing and single-process deployments.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use nexus_transport::{Config, Connection, Listener, Transport, TransportError};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Global registry of memory listeners for cross-connection routing
static GLOBAL_REGISTRY: once_cell::sync::Lazy<Arc<DashMap<String, MemoryListener>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashMap::new()));

/// Total payload bytes pushed through memory connections since the last reset
static BYTES_SENT: AtomicU64 = AtomicU64::new(0);

/// Memory transport implementation
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    config: Config,
}

impl MemoryTransport {
    /// Create a new memory transport with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Create a new memory transport with default configuration
    pub fn new_default() -> Self {
        Self::new(Config::default())
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }

    /// Payload bytes sent through any memory connection since the last reset
    pub fn bytes_sent() -> u64 {
        BYTES_SENT.load(Ordering::Relaxed)
    }

    /// Reset the sent-bytes counter (useful for tests)
    pub fn reset_bytes_sent() {
        BYTES_SENT.store(0, Ordering::Relaxed);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        debug!("Connecting to memory address {}", addr);

        // Find the listener at this address. Clone it out so no registry
        // guard is held across the handshake below.
        let listener = GLOBAL_REGISTRY.get(addr).map(|entry| entry.clone()).ok_or_else(|| {
            TransportError::ConnectionFailed(format!("No listener at address {addr}"))
        })?;

        // Create a bidirectional connection pair
        let queue_size = self.config.outbound_queue_size;
        let (client_to_server_tx, client_to_server_rx) = flume::bounded(queue_size);
        let (server_to_client_tx, server_to_client_rx) = flume::bounded(queue_size);

        let conn_id = Uuid::new_v4();

        let client_conn = MemoryConnection {
            id: conn_id,
            sender: client_to_server_tx,
            receiver: Arc::new(RwLock::new(server_to_client_rx)),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let server_conn = MemoryConnection {
            id: conn_id,
            sender: server_to_client_tx,
            receiver: Arc::new(RwLock::new(client_to_server_rx)),
            closed: Arc::new(AtomicBool::new(false)),
        };

        // Hand the server half to the listener
        listener
            .incoming_tx
            .send_async(Box::new(server_conn))
            .await
            .map_err(|_| TransportError::ConnectionFailed("Listener closed".to_string()))?;

        info!("Memory connection established to {}", addr);

        Ok(Box::new(client_conn))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        debug!("Creating memory listener at {}", addr);

        if addr.is_empty() {
            return Err(TransportError::InvalidAddress(
                "empty listen address".to_string(),
            ));
        }

        // One listener per address
        if GLOBAL_REGISTRY.contains_key(addr) {
            return Err(TransportError::Other(format!(
                "Address {addr} already has a listener"
            )));
        }

        let (incoming_tx, incoming_rx) = flume::unbounded();
        let listener = MemoryListener {
            addr: addr.to_string(),
            incoming_rx: Arc::new(RwLock::new(incoming_rx)),
            incoming_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };

        GLOBAL_REGISTRY.insert(addr.to_string(), listener.clone());

        info!("Memory listener created at {}", addr);

        Ok(Box::new(listener))
    }
}

/// Memory connection implementation
#[derive(Clone)]
struct MemoryConnection {
    id: Uuid,
    sender: flume::Sender<Bytes>,
    receiver: Arc<RwLock<flume::Receiver<Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        debug!("Memory connection {} sending {} bytes", self.id, data.len());
        BYTES_SENT.fetch_add(data.len() as u64, Ordering::Relaxed);

        self.sender
            .send_async(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        Ok(())
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let receiver = self.receiver.read().await;
        match receiver.recv_async().await {
            Ok(data) => {
                debug!(
                    "Memory connection {} received {} bytes",
                    self.id,
                    data.len()
                );
                Ok(data)
            }
            Err(_) => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing memory connection {}", self.id);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Memory listener implementation
#[derive(Clone)]
struct MemoryListener {
    addr: String,
    incoming_rx: Arc<RwLock<flume::Receiver<Box<dyn Connection>>>>,
    incoming_tx: flume::Sender<Box<dyn Connection>>,
    closed: Arc<AtomicBool>,
}

impl Debug for MemoryListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryListener")
            .field("addr", &self.addr)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let receiver = self.incoming_rx.read().await;
        match receiver.recv_async().await {
            Ok(conn) => {
                info!("Memory listener at {} accepted connection", self.addr);
                Ok(conn)
            }
            Err(_) => Err(TransportError::ConnectionClosed),
        }
    }

    fn local_addr(&self) -> Result<String, TransportError> {
        Ok(self.addr.clone())
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing memory listener at {}", self.addr);
        self.closed.store(true, Ordering::Release);

        GLOBAL_REGISTRY.remove(&self.addr);

        Ok(())
    }
}
