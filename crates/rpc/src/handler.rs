//! Per-service method registry and request dispatch.
//!
//! Methods are registered explicitly through [`MethodRegistry::register`]
//! with statically typed functions; there is no runtime reflection. The
//! registry is built once at handler initialization and read-only afterward.

use crate::client::Client;
use crate::codec::Codec;
use crate::error::{Error, HandlerError, MethodError, RegistrationError, Result};
use crate::message::{LocalValue, RequestInput, ResponsePayload, RpcRequest};
use crate::server::Server;
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default capacity of a handler's inbound request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// A service exposes named methods through explicit registration.
pub trait Service: Send + Sync + 'static {
    /// Service name; forms the left segment of "Service.Method" addresses.
    fn name(&self) -> &'static str;

    /// Populate the method registry. Called once at handler initialization;
    /// any error aborts construction.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] on name or shape violations.
    fn register<C: Codec>(
        methods: &mut MethodRegistry<Self, C>,
    ) -> std::result::Result<(), RegistrationError>
    where
        Self: Sized;
}

/// Resolves the destination clients for a "Service.Method" address.
pub trait Locator<C: Codec>: Send + Sync + 'static {
    /// Locate the clients able to reach `service_method`.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be resolved at all.
    fn resolve(&self, service_method: &str) -> Result<Vec<Client<C>>>;
}

type WireInvoke<S, C> = Box<dyn Fn(&S, &C, &[u8]) -> Result<Bytes> + Send + Sync>;
type LocalInvoke<S> = Box<dyn Fn(&S, &mut dyn Any, &dyn Any) -> Result<()> + Send + Sync>;
type ReplyFactory = Box<dyn Fn() -> LocalValue + Send + Sync>;

/// Cached per-method dispatch data: one invoker for serialized inputs, one
/// for typed inputs, and a factory producing a zero-valued reply slot.
pub(crate) struct MethodInfo<S, C> {
    pub(crate) wire: WireInvoke<S, C>,
    pub(crate) local: LocalInvoke<S>,
    pub(crate) make_reply: ReplyFactory,
}

/// Builder for a service's method table.
pub struct MethodRegistry<S, C> {
    methods: HashMap<String, MethodInfo<S, C>>,
}

impl<S: Service, C: Codec> MethodRegistry<S, C> {
    fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register `name` as a callable method.
    ///
    /// The function shape is fixed: receiver, mutable reply slot, then the
    /// input tuple, returning a method error or nothing. `Reply::default()`
    /// is the prototype used as the output slot for queued dispatch and as
    /// the decode target shape for wire calls.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if the name is empty, contains `'.'`,
    /// or is already registered.
    pub fn register<Reply, Args, F>(
        &mut self,
        name: &str,
        f: F,
    ) -> std::result::Result<(), RegistrationError>
    where
        Reply: Serialize + Default + Any + Send + 'static,
        Args: DeserializeOwned + Any + Send + 'static,
        F: Fn(&S, &mut Reply, &Args) -> std::result::Result<(), MethodError>
            + Send
            + Sync
            + Clone
            + 'static,
    {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if name.contains('.') {
            return Err(RegistrationError::InvalidName(name.to_string()));
        }
        if self.methods.contains_key(name) {
            return Err(RegistrationError::DuplicateMethod(name.to_string()));
        }

        let wire = {
            let f = f.clone();
            Box::new(move |service: &S, codec: &C, input: &[u8]| -> Result<Bytes> {
                let args: Args = codec.unmarshal(input)?;
                let mut reply = Reply::default();
                f(service, &mut reply, &args).map_err(Error::from)?;
                Ok(codec.marshal(&reply)?)
            }) as WireInvoke<S, C>
        };

        let local = {
            let f = f.clone();
            Box::new(
                move |service: &S, reply: &mut dyn Any, args: &dyn Any| -> Result<()> {
                    let args = args
                        .downcast_ref::<Args>()
                        .ok_or(HandlerError::TypeMismatch("input parameters"))?;
                    let reply = reply
                        .downcast_mut::<Reply>()
                        .ok_or(HandlerError::TypeMismatch("reply slot"))?;
                    f(service, reply, args).map_err(Error::from)?;
                    Ok(())
                },
            ) as LocalInvoke<S>
        };

        let make_reply = Box::new(|| Box::new(Reply::default()) as LocalValue) as ReplyFactory;

        self.methods.insert(
            name.to_string(),
            MethodInfo {
                wire,
                local,
                make_reply,
            },
        );
        Ok(())
    }
}

/// Type-erased handler interface, as hosted by a [`Server`].
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// The service name this handler answers for.
    fn name(&self) -> &str;

    /// Dispatch one request, delivering its completion exactly once.
    fn handle_rpc_request(&self, request: RpcRequest);

    /// Synchronous direct invocation of a registered method, bypassing the
    /// queue and all encoding.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::MethodNotFound`] for unregistered names and
    /// whatever the method itself reports.
    fn call_method(
        &self,
        service_method: &str,
        reply: &mut dyn Any,
        args: &dyn Any,
    ) -> Result<()>;

    /// Enqueue a request. Blocks while the queue is full (back-pressure).
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::QueueClosed`] when the drain worker is gone.
    async fn push_request(&self, request: RpcRequest) -> Result<()>;

    /// Hand out the queue's receiving end for an external drain worker.
    /// Yields `Some` exactly once.
    fn take_request_queue(&self) -> Option<mpsc::Receiver<RpcRequest>>;
}

/// Hosts one service's method table, request queue, and routing references.
pub struct RpcHandler<S: Service, C: Codec = crate::codec::BincodeCodec> {
    service: Arc<S>,
    codec: C,
    methods: HashMap<String, MethodInfo<S, C>>,
    queue_tx: mpsc::Sender<RpcRequest>,
    queue_rx: parking_lot::Mutex<Option<mpsc::Receiver<RpcRequest>>>,
    locator: Arc<dyn Locator<C>>,
    server: OnceCell<Weak<Server<C>>>,
}

impl<S: Service, C: Codec> RpcHandler<S, C> {
    /// Build a handler with the default queue capacity.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if the service name or any method
    /// registration is invalid.
    pub fn new(
        service: Arc<S>,
        codec: C,
        locator: Arc<dyn Locator<C>>,
    ) -> std::result::Result<Arc<Self>, RegistrationError> {
        Self::with_queue_capacity(service, codec, locator, DEFAULT_QUEUE_CAPACITY)
    }

    /// Build a handler with an explicit queue capacity. Capacity bounds how
    /// many undispatched requests the handler may hold; a full queue blocks
    /// producers.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if the service name or any method
    /// registration is invalid.
    pub fn with_queue_capacity(
        service: Arc<S>,
        codec: C,
        locator: Arc<dyn Locator<C>>,
        queue_capacity: usize,
    ) -> std::result::Result<Arc<Self>, RegistrationError> {
        let name = service.name();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if name.contains('.') {
            return Err(RegistrationError::InvalidName(name.to_string()));
        }

        let mut registry = MethodRegistry::new();
        S::register(&mut registry)?;

        let methods = registry
            .methods
            .into_iter()
            .map(|(method, info)| (format!("{name}.{method}"), info))
            .collect();

        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);

        Ok(Arc::new(Self {
            service,
            codec,
            methods,
            queue_tx,
            queue_rx: parking_lot::Mutex::new(Some(queue_rx)),
            locator,
            server: OnceCell::new(),
        }))
    }

    pub(crate) fn locator(&self) -> &Arc<dyn Locator<C>> {
        &self.locator
    }

    pub(crate) fn attach_server(&self, server: Weak<Server<C>>) -> bool {
        self.server.set(server).is_ok()
    }

    pub(crate) fn server(&self) -> Option<Arc<Server<C>>> {
        self.server.get().and_then(Weak::upgrade)
    }

    pub(crate) fn service_name(&self) -> &'static str {
        self.service.name()
    }
}

#[async_trait]
impl<S: Service, C: Codec> Handler for RpcHandler<S, C> {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn handle_rpc_request(&self, request: RpcRequest) {
        let RpcRequest {
            seq,
            service_method,
            input,
            completion,
        } = request;

        let Some(info) = self.methods.get(&service_method) else {
            let err = HandlerError::MethodNotFound(format!(
                "{} cannot find {service_method}",
                self.service.name()
            ));
            warn!(seq, "{err}");
            completion.complete(Err(err.into()));
            return;
        };

        debug!(seq, method = %service_method, "dispatching request");

        let result = match input {
            RequestInput::Encoded(bytes) => {
                (info.wire)(&self.service, &self.codec, &bytes).map(ResponsePayload::Encoded)
            }
            RequestInput::Typed(args) => {
                let mut reply = (info.make_reply)();
                let reply_slot: &mut dyn Any = &mut *reply;
                let args_ref: &dyn Any = &*args;
                (info.local)(&self.service, reply_slot, args_ref)
                    .map(|()| ResponsePayload::Typed(reply))
            }
        };

        completion.complete(result);
    }

    fn call_method(
        &self,
        service_method: &str,
        reply: &mut dyn Any,
        args: &dyn Any,
    ) -> Result<()> {
        let info = self.methods.get(service_method).ok_or_else(|| {
            HandlerError::MethodNotFound(format!(
                "{} cannot find {service_method}",
                self.service.name()
            ))
        })?;
        (info.local)(&self.service, reply, args)
    }

    async fn push_request(&self, request: RpcRequest) -> Result<()> {
        self.queue_tx
            .send(request)
            .await
            .map_err(|_| Error::from(HandlerError::QueueClosed))
    }

    fn take_request_queue(&self) -> Option<mpsc::Receiver<RpcRequest>> {
        self.queue_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;

    struct Echo;

    impl Service for Echo {
        fn name(&self) -> &'static str {
            "Echo"
        }

        fn register<C: Codec>(
            methods: &mut MethodRegistry<Self, C>,
        ) -> std::result::Result<(), RegistrationError> {
            methods.register("Say", |_svc: &Self, reply: &mut String, args: &String| {
                reply.clone_from(args);
                Ok(())
            })
        }
    }

    struct NullLocator;

    impl<C: Codec> Locator<C> for NullLocator {
        fn resolve(&self, _service_method: &str) -> Result<Vec<Client<C>>> {
            Ok(Vec::new())
        }
    }

    fn echo_handler() -> Arc<RpcHandler<Echo, BincodeCodec>> {
        RpcHandler::new(Arc::new(Echo), BincodeCodec, Arc::new(NullLocator)).unwrap()
    }

    #[test]
    fn test_registered_method_is_callable() {
        let handler = echo_handler();
        let mut reply = String::new();
        handler
            .call_method("Echo.Say", &mut reply, &"hello".to_string())
            .unwrap();
        assert_eq!(reply, "hello");
    }

    #[test]
    fn test_unregistered_method_is_not_found() {
        let handler = echo_handler();
        let mut reply = String::new();
        let err = handler
            .call_method("Echo.Shout", &mut reply, &"hello".to_string())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Handler(HandlerError::MethodNotFound(_))
        ));
    }

    #[test]
    fn test_wrong_argument_type_is_rejected() {
        let handler = echo_handler();
        let mut reply = String::new();
        let err = handler
            .call_method("Echo.Say", &mut reply, &42u64)
            .unwrap_err();
        assert!(matches!(err, Error::Handler(HandlerError::TypeMismatch(_))));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let mut registry = MethodRegistry::<Echo, BincodeCodec>::new();
        registry
            .register("Say", |_: &Echo, _: &mut String, _: &String| Ok(()))
            .unwrap();
        let err = registry
            .register("Say", |_: &Echo, _: &mut String, _: &String| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateMethod(_)));
    }

    #[test]
    fn test_dotted_method_name_rejected() {
        let mut registry = MethodRegistry::<Echo, BincodeCodec>::new();
        let err = registry
            .register("Say.Loudly", |_: &Echo, _: &mut String, _: &String| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidName(_)));
    }

    #[test]
    fn test_empty_method_name_rejected() {
        let mut registry = MethodRegistry::<Echo, BincodeCodec>::new();
        let err = registry
            .register("", |_: &Echo, _: &mut String, _: &String| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::EmptyName));
    }

    struct DottedName;

    impl Service for DottedName {
        fn name(&self) -> &'static str {
            "Bad.Name"
        }

        fn register<C: Codec>(
            _methods: &mut MethodRegistry<Self, C>,
        ) -> std::result::Result<(), RegistrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_dotted_service_name_rejected() {
        let err = RpcHandler::new(Arc::new(DottedName), BincodeCodec, Arc::new(NullLocator))
            .err()
            .unwrap();
        assert!(matches!(err, RegistrationError::InvalidName(_)));
    }
}
