//! RPC layer for nexus-node with one uniform call contract.
//!
//! A process invokes named service methods either on a remote node over a
//! framed connection, or in-process when the target lives on the same host —
//! call sites never branch on locality.
//!
//! # Features
//!
//! - **Call correlation**: outgoing requests become asynchronously-completed
//!   [`Call`]s matched to responses by sequence number
//! - **Self-healing clients**: connection loss fails pending calls and a
//!   supervisor reconnects at a fixed interval
//! - **Explicit registries**: statically typed method registration, no
//!   runtime reflection
//! - **Pluggable serialization**: bincode by default, CBOR via ciborium,
//!   injected per client and handler
//!
//! # Example
//!
//! ```no_run
//! use nexus_rpc::{
//!     BincodeCodec, Client, Codec, Locator, MethodRegistry, Result, RpcHandler,
//!     RegistrationError, Server, Service,
//! };
//! use std::sync::Arc;
//!
//! struct Calc;
//!
//! impl Service for Calc {
//!     fn name(&self) -> &'static str {
//!         "Calc"
//!     }
//!
//!     fn register<C: Codec>(
//!         methods: &mut MethodRegistry<Self, C>,
//!     ) -> std::result::Result<(), RegistrationError> {
//!         methods.register("Add", |_calc: &Self, reply: &mut i64, args: &(i64, i64)| {
//!             *reply = args.0 + args.1;
//!             Ok(())
//!         })
//!     }
//! }
//!
//! struct Direct(Client<BincodeCodec>);
//!
//! impl Locator<BincodeCodec> for Direct {
//!     fn resolve(&self, _service_method: &str) -> Result<Vec<Client<BincodeCodec>>> {
//!         Ok(vec![self.0.clone()])
//!     }
//! }
//!
//! async fn example(client: Client<BincodeCodec>) -> Result<i64> {
//!     let handler = RpcHandler::new(
//!         Arc::new(Calc),
//!         BincodeCodec,
//!         Arc::new(Direct(client)),
//!     )
//!     .expect("registration is valid");
//!
//!     handler.call("Calc.Add", (2i64, 3i64)).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod call;
pub mod client;
pub mod codec;
pub mod error;
pub mod handler;
pub mod message;
mod router;
pub mod server;

// Re-export commonly used types
pub use call::{Call, Completer, call_pair};
pub use client::{Client, ClientConfig, ConnState};
pub use codec::{BincodeCodec, CborCodec, Codec};
pub use error::{
    CodecError, ConnectionError, Error, HandlerError, MethodError, ProtocolError,
    RegistrationError, Result, RoutingError,
};
pub use handler::{
    DEFAULT_QUEUE_CAPACITY, Handler, Locator, MethodRegistry, RpcHandler, Service,
};
pub use message::{
    CompletionHandle, LocalValue, RequestEnvelope, RequestInput, ResponseEnvelope,
    ResponsePayload, RpcRequest,
};
pub use server::{Server, ServerConfig};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
