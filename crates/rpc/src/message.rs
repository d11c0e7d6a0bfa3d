//! Request/response envelopes and the inbound request type.

use crate::error::{Error, HandlerError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Wire form of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Sequence number chosen by the client.
    pub seq: u64,
    /// Target address, format: "Service.Method".
    pub service_method: String,
    /// Codec-encoded input parameters.
    pub input: Vec<u8>,
}

/// Wire form of one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Sequence number echoed from the request.
    pub seq: u64,
    /// Error reported by the handler, if any.
    pub error: Option<String>,
    /// Codec-encoded return value; empty on error.
    pub returns: Vec<u8>,
}

/// A typed value travelling through the in-process fast path.
pub type LocalValue = Box<dyn Any + Send>;

/// Input parameters carried by an [`RpcRequest`].
pub enum RequestInput {
    /// Serialized parameter tuple from the wire.
    Encoded(Bytes),
    /// Already-typed parameter tuple from an in-process caller,
    /// bypassing serialization.
    Typed(LocalValue),
}

/// Output delivered to a request's completion.
pub enum ResponsePayload {
    /// Codec-encoded return value, for requests that arrived over the wire.
    Encoded(Bytes),
    /// Typed return value, for in-process dispatch.
    Typed(LocalValue),
}

impl std::fmt::Debug for ResponsePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponsePayload::Encoded(bytes) => {
                f.debug_tuple("Encoded").field(bytes).finish()
            }
            ResponsePayload::Typed(_) => {
                f.debug_tuple("Typed").field(&"<local value>").finish()
            }
        }
    }
}

/// Fires an [`RpcRequest`]'s callback exactly once.
///
/// Completing consumes the handle. A handle dropped without being completed
/// fires with [`HandlerError::Dropped`], so a request can never silently
/// strand its caller.
pub struct CompletionHandle(Option<Box<dyn FnOnce(Result<ResponsePayload>) + Send>>);

impl CompletionHandle {
    /// Wrap a callback.
    pub fn new(callback: impl FnOnce(Result<ResponsePayload>) + Send + 'static) -> Self {
        Self(Some(Box::new(callback)))
    }

    /// Deliver the outcome.
    pub fn complete(mut self, result: Result<ResponsePayload>) {
        if let Some(callback) = self.0.take() {
            callback(result);
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback(Err(Error::Handler(HandlerError::Dropped)));
        }
    }
}

/// One inbound invocation travelling through a handler's request queue.
pub struct RpcRequest {
    /// Sequence number chosen by the calling client; 0 for local calls.
    pub seq: u64,
    /// Target address, format: "Service.Method".
    pub service_method: String,
    /// Input parameters, encoded or typed.
    pub input: RequestInput,
    /// Invoked exactly once with the outcome.
    pub completion: CompletionHandle,
}

impl RpcRequest {
    /// Build a request with the given completion callback.
    pub fn new(
        seq: u64,
        service_method: impl Into<String>,
        input: RequestInput,
        on_complete: impl FnOnce(Result<ResponsePayload>) + Send + 'static,
    ) -> Self {
        Self {
            seq,
            service_method: service_method.into(),
            input,
            completion: CompletionHandle::new(on_complete),
        }
    }
}
