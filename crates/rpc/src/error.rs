//! Error types for the RPC layer.

use thiserror::Error;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-related errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Dispatch errors from the handler side.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Routing errors before a call leaves the node.
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Errors from the underlying transport.
    #[error("Transport error: {0}")]
    Transport(#[from] nexus_transport::TransportError),
}

impl From<MethodError> for Error {
    fn from(err: MethodError) -> Self {
        Self::Handler(HandlerError::Method(err))
    }
}

/// Connection-specific errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was lost before a response arrived.
    #[error("Node is disconnected")]
    Disconnected,

    /// The client has no established connection.
    #[error("Client is not connected")]
    NotConnected,

    /// The client represents the local node and has no network connection.
    #[error("Local client has no network connection")]
    Local,
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An envelope could not be decoded.
    #[error("Failed to decode envelope: {0}")]
    Decode(String),
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),
}

/// Dispatch errors from handler-side processing.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No method registered under the requested name.
    #[error("Cannot find {0}")]
    MethodNotFound(String),

    /// A registered method returned an error.
    #[error("{0}")]
    Method(#[from] MethodError),

    /// The remote side reported a failure.
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// A typed value did not have the expected concrete type.
    #[error("Type mismatch: {0}")]
    TypeMismatch(&'static str),

    /// The handler's request queue is no longer accepting requests.
    #[error("Request queue closed")]
    QueueClosed,

    /// The request was dropped before its completion fired.
    #[error("Request dropped before completion")]
    Dropped,
}

/// Error returned by a service method implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MethodError(String);

impl MethodError {
    /// Create a method error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Registration-time violations.
///
/// These are returned from handler construction so the host can abort
/// startup; the callable surface must be correct before any traffic flows.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A service or method name is empty.
    #[error("Service or method name is empty")]
    EmptyName,

    /// A service or method name contains a reserved character.
    #[error("Invalid name {0:?}: must not contain '.'")]
    InvalidName(String),

    /// The same method name was registered twice.
    #[error("Method {0} is already registered")]
    DuplicateMethod(String),

    /// The same service name was registered twice on one server.
    #[error("Service {0} is already registered")]
    DuplicateService(String),

    /// The handler is already attached to a server.
    #[error("Handler for {0} is already registered with a server")]
    AlreadyRegistered(String),
}

/// Routing resolution errors.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The address string is not exactly "Service.Method".
    #[error("Service method {0:?} must be \"Service.Method\"")]
    MalformedAddress(String),

    /// The locator resolved more than one destination.
    #[error("Resolved {count} clients for {service_method}: multi-target calls are not supported")]
    MultipleTargets {
        /// The address being resolved.
        service_method: String,
        /// How many clients came back.
        count: usize,
    },

    /// The locator resolved no destination at all.
    #[error("No client resolved for {0}")]
    NoTarget(String),

    /// A local dispatch was attempted on a handler with no server attached.
    #[error("Handler is not attached to a server")]
    NoServer,
}
