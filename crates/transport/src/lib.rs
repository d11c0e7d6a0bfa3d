//! Generic transport abstraction for node-to-node communication
//!
//! This crate provides a transport-agnostic interface for moving opaque,
//! framed messages between nodes. Specific transport implementations
//! (in-memory, TCP) are provided in separate crates.
//!
//! Transports handle:
//! - Message framing on the wire
//! - Per-connection outbound queuing
//! - Socket lifecycle (connect, accept, close)
//!
//! They do not interpret payloads; serialization belongs to the layer above.

pub mod error;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

pub use error::TransportError as Error;
pub use error::TransportError;

/// Factory for connections and listeners over one transport medium.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to the node at `addr`.
    async fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Start listening for inbound connections at `addr`.
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError>;
}

/// One established, bidirectional, framed byte stream.
///
/// `send` must be safe to call from many tasks concurrently; implementations
/// queue outbound messages per connection. `recv` is expected to have a
/// single consumer driving it sequentially.
#[async_trait]
pub trait Connection: Debug + Send + Sync {
    /// Queue one message for delivery. Blocks when the outbound queue is full.
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next message. Blocks until one arrives or the connection
    /// is lost.
    async fn recv(&self) -> Result<Bytes, TransportError>;

    /// Close the connection. Subsequent sends and receives fail.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Debug + Send + Sync {
    /// Wait for the next inbound connection.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// The address this listener is bound to.
    fn local_addr(&self) -> Result<String, TransportError>;

    /// Stop listening. Pending and future accepts fail.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Configuration shared by transport implementations.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Outbound message queue size per connection
    pub outbound_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,     // 5 seconds
            max_message_size: 65535,      // one u16 length prefix
            outbound_queue_size: 10_000,  // matches the RPC layer's pending-write budget
        }
    }
}
