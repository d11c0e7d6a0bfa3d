//! Node server: hosts handlers, serves inbound connections, and provides
//! in-process dispatch between handlers on the same node.

use crate::call::{Call, call_pair};
use crate::codec::Codec;
use crate::error::{Error, HandlerError, ProtocolError, RegistrationError, Result};
use crate::handler::{Handler, RpcHandler, Service};
use crate::message::{
    CompletionHandle, LocalValue, RequestEnvelope, RequestInput, ResponseEnvelope,
    ResponsePayload, RpcRequest,
};
use bytes::Bytes;
use nexus_transport::{Connection, Listener};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

/// Configuration for the server's accept loop.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent inbound connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
        }
    }
}

/// Hosts the RPC handlers of one node.
pub struct Server<C: Codec = crate::codec::BincodeCodec> {
    codec: C,
    config: ServerConfig,
    handlers: parking_lot::RwLock<HashMap<String, Arc<dyn Handler>>>,
    self_ref: Weak<Self>,
}

impl<C: Codec> Server<C> {
    /// Create a server with default configuration.
    pub fn new(codec: C) -> Arc<Self> {
        Self::with_config(codec, ServerConfig::default())
    }

    /// Create a server with explicit configuration.
    pub fn with_config(codec: C, config: ServerConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            codec,
            config,
            handlers: parking_lot::RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    /// Register a handler and spawn the worker that drains its request
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if the service name is taken or the
    /// handler is already registered somewhere.
    pub fn register<S: Service>(
        &self,
        handler: &Arc<RpcHandler<S, C>>,
    ) -> std::result::Result<(), RegistrationError> {
        let name = Handler::name(handler.as_ref()).to_string();

        {
            let handlers = self.handlers.read();
            if handlers.contains_key(&name) {
                return Err(RegistrationError::DuplicateService(name));
            }
        }

        if !handler.attach_server(self.self_ref.clone()) {
            return Err(RegistrationError::AlreadyRegistered(name));
        }
        let Some(mut queue_rx) = handler.take_request_queue() else {
            return Err(RegistrationError::AlreadyRegistered(name));
        };

        self.handlers
            .write()
            .insert(name.clone(), Arc::clone(handler) as Arc<dyn Handler>);

        let worker: Arc<dyn Handler> = Arc::clone(handler) as Arc<dyn Handler>;
        tokio::spawn(async move {
            while let Some(request) = queue_rx.recv().await {
                worker.handle_rpc_request(request);
            }
            debug!(service = %name, "request worker exiting");
        });

        Ok(())
    }

    /// Look up the handler hosting `service`.
    pub fn handler(&self, service: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(service).cloned()
    }

    /// In-process call into a service the caller itself owns: direct,
    /// synchronous invocation with no queue, encoding, or network.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::MethodNotFound`] when the service or method
    /// is absent, and whatever the method itself reports.
    pub fn dispatch_self(
        &self,
        service: &str,
        method: &str,
        reply: &mut dyn Any,
        args: &dyn Any,
    ) -> Result<()> {
        let handler = self.handler(service).ok_or_else(|| {
            HandlerError::MethodNotFound(format!("no service {service} on this node"))
        })?;
        handler.call_method(&format!("{service}.{method}"), reply, args)
    }

    /// In-process call into a different local handler, through that
    /// handler's request queue, returned as a [`Call`] for uniform waiting.
    pub async fn dispatch_other(
        &self,
        service: &str,
        method: &str,
        args: LocalValue,
    ) -> Call<LocalValue> {
        let service_method = format!("{service}.{method}");
        let (call, completer) = call_pair::<LocalValue>(0, &service_method);

        let Some(handler) = self.handler(service) else {
            completer.complete(Err(HandlerError::MethodNotFound(format!(
                "no service {service} on this node"
            ))
            .into()));
            return call;
        };

        let completion = CompletionHandle::new(move |result| {
            completer.complete(result.and_then(|payload| match payload {
                ResponsePayload::Typed(value) => Ok(value),
                ResponsePayload::Encoded(_) => {
                    Err(HandlerError::TypeMismatch("typed reply").into())
                }
            }));
        });
        let request = RpcRequest {
            seq: 0,
            service_method,
            input: RequestInput::Typed(args),
            completion,
        };

        if let Err(e) = handler.push_request(request).await {
            // The dropped completion already resolved the call.
            debug!(error = %e, "failed to enqueue local request");
        }
        call
    }

    /// Accept loop: serve inbound RPC connections from `listener` until it
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns the listener's error once accepting is no longer possible.
    pub async fn serve(self: Arc<Self>, listener: Box<dyn Listener>) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "rpc server accepting connections");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            let conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            };

            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                warn!("max connections reached, rejecting connection");
                continue;
            };

            let server = Arc::clone(&self);
            let conn: Arc<dyn Connection> = Arc::from(conn);
            tokio::spawn(async move {
                server.handle_connection(conn).await;
                drop(permit);
            });
        }
    }

    /// Per-connection loop: decode request envelopes, hand them to the
    /// owning handler's queue, write response envelopes back in completion
    /// order.
    async fn handle_connection(&self, conn: Arc<dyn Connection>) {
        debug!("accepted rpc connection");

        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<ResponseEnvelope>();

        let writer_conn = Arc::clone(&conn);
        let writer_codec = self.codec.clone();
        tokio::spawn(async move {
            while let Some(envelope) = resp_rx.recv().await {
                let frame = match writer_codec.marshal(&envelope) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(seq = envelope.seq, error = %e, "failed to encode response envelope");
                        continue;
                    }
                };
                if let Err(e) = writer_conn.send(frame).await {
                    debug!(error = %e, "response write failed");
                    break;
                }
            }
        });

        loop {
            let bytes = match conn.recv().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "rpc connection closed");
                    break;
                }
            };

            let envelope: RequestEnvelope = match self.codec.unmarshal(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("{}", Error::from(ProtocolError::Decode(e.to_string())));
                    continue;
                }
            };

            let seq = envelope.seq;
            let service = envelope
                .service_method
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string();

            let Some(handler) = self.handler(&service) else {
                warn!(seq, method = %envelope.service_method, "no handler for inbound request");
                let _ = resp_tx.send(ResponseEnvelope {
                    seq,
                    error: Some(format!("cannot find {}", envelope.service_method)),
                    returns: Vec::new(),
                });
                continue;
            };

            let resp_tx = resp_tx.clone();
            let completion = CompletionHandle::new(move |result| {
                let envelope = match result {
                    Ok(ResponsePayload::Encoded(returns)) => ResponseEnvelope {
                        seq,
                        error: None,
                        returns: returns.to_vec(),
                    },
                    Ok(ResponsePayload::Typed(_)) => ResponseEnvelope {
                        seq,
                        error: Some("internal: typed reply on wire path".to_string()),
                        returns: Vec::new(),
                    },
                    Err(e) => ResponseEnvelope {
                        seq,
                        error: Some(e.to_string()),
                        returns: Vec::new(),
                    },
                };
                let _ = resp_tx.send(envelope);
            });

            let request = RpcRequest {
                seq,
                service_method: envelope.service_method,
                input: RequestInput::Encoded(Bytes::from(envelope.input)),
                completion,
            };

            // Back-pressure: a full handler queue stalls this connection.
            if handler.push_request(request).await.is_err() {
                warn!(seq, service = %service, "handler queue closed");
            }
        }
    }
}
