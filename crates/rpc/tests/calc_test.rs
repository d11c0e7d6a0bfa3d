//! End-to-end call scenarios: remote dispatch over the memory transport and
//! cross-handler dispatch on one node.

use nexus_rpc::{
    BincodeCodec, Client, Codec, Error, HandlerError, Locator, MethodError, MethodRegistry,
    RegistrationError, Result, RoutingError, RpcHandler, Server, Service,
};
use nexus_transport::Transport;
use nexus_transport_memory::MemoryTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

struct Calc;

impl Service for Calc {
    fn name(&self) -> &'static str {
        "Calc"
    }

    fn register<C: Codec>(
        methods: &mut MethodRegistry<Self, C>,
    ) -> std::result::Result<(), RegistrationError> {
        methods.register("Add", |_calc: &Self, reply: &mut i64, args: &(i64, i64)| {
            *reply = args.0 + args.1;
            Ok(())
        })?;
        methods.register("Div", |_calc: &Self, reply: &mut i64, args: &(i64, i64)| {
            if args.1 == 0 {
                return Err(MethodError::new("division by zero"));
            }
            *reply = args.0 / args.1;
            Ok(())
        })?;
        Ok(())
    }
}

/// Caller-side service with no methods of its own.
struct Frontend;

impl Service for Frontend {
    fn name(&self) -> &'static str {
        "Frontend"
    }

    fn register<C: Codec>(
        _methods: &mut MethodRegistry<Self, C>,
    ) -> std::result::Result<(), RegistrationError> {
        Ok(())
    }
}

struct StaticLocator {
    clients: Vec<Client<BincodeCodec>>,
}

impl Locator<BincodeCodec> for StaticLocator {
    fn resolve(&self, _service_method: &str) -> Result<Vec<Client<BincodeCodec>>> {
        Ok(self.clients.clone())
    }
}

struct NullLocator;

impl<C: Codec> Locator<C> for NullLocator {
    fn resolve(&self, _service_method: &str) -> Result<Vec<Client<C>>> {
        Ok(Vec::new())
    }
}

/// Locator that must never be consulted.
struct PanicLocator;

impl<C: Codec> Locator<C> for PanicLocator {
    fn resolve(&self, service_method: &str) -> Result<Vec<Client<C>>> {
        panic!("locator consulted for {service_method}");
    }
}

async fn start_calc_node(addr: &str) -> Arc<Server<BincodeCodec>> {
    let transport = MemoryTransport::new_default();
    let listener = transport.listen(addr).await.expect("listen");

    let server = Server::new(BincodeCodec);
    let calc = RpcHandler::new(Arc::new(Calc), BincodeCodec, Arc::new(NullLocator)).expect("calc");
    server.register(&calc).expect("register");

    tokio::spawn(Arc::clone(&server).serve(listener));
    server
}

async fn connect_client(addr: &str) -> Client<BincodeCodec> {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new_default());
    let client = Client::new(transport, BincodeCodec);
    client.connect(addr).expect("connect");
    timeout(Duration::from_secs(2), client.wait_connected())
        .await
        .expect("connection timed out");
    client
}

#[tokio::test]
async fn test_remote_add() {
    let _ = tracing_subscriber::fmt::try_init();

    let _server = start_calc_node("calc-remote-add").await;
    let client = connect_client("calc-remote-add").await;

    let frontend = RpcHandler::new(
        Arc::new(Frontend),
        BincodeCodec,
        Arc::new(StaticLocator {
            clients: vec![client.clone()],
        }),
    )
    .expect("frontend");

    let sum: i64 = timeout(
        Duration::from_secs(2),
        frontend.call("Calc.Add", (2i64, 3i64)),
    )
    .await
    .expect("call timed out")
    .expect("call failed");

    assert_eq!(sum, 5);
    assert_eq!(client.pending_calls(), 0);

    client.close().await;
}

#[tokio::test]
async fn test_remote_go_without_router() {
    let _ = tracing_subscriber::fmt::try_init();

    let _server = start_calc_node("calc-remote-go").await;
    let client = connect_client("calc-remote-go").await;

    let call = client.go::<(i64, i64), i64>("Calc.Add", &(20, 22)).await;
    assert_eq!(call.seq(), 1);
    assert_eq!(call.service_method(), "Calc.Add");

    let result = timeout(Duration::from_secs(2), call.wait())
        .await
        .expect("call timed out")
        .expect("call failed");
    assert_eq!(result, 42);

    client.close().await;
}

#[tokio::test]
async fn test_remote_method_error_propagates() {
    let _ = tracing_subscriber::fmt::try_init();

    let _server = start_calc_node("calc-remote-err").await;
    let client = connect_client("calc-remote-err").await;

    let call = client.go::<(i64, i64), i64>("Calc.Div", &(1, 0)).await;
    let err = timeout(Duration::from_secs(2), call.wait())
        .await
        .expect("call timed out")
        .unwrap_err();

    match err {
        Error::Handler(HandlerError::Remote(message)) => {
            assert!(message.contains("division by zero"), "got {message:?}");
        }
        other => panic!("expected remote handler error, got {other:?}"),
    }

    client.close().await;
}

#[tokio::test]
async fn test_remote_method_not_found() {
    let _ = tracing_subscriber::fmt::try_init();

    let _server = start_calc_node("calc-remote-missing").await;
    let client = connect_client("calc-remote-missing").await;

    let call = client.go::<(i64, i64), i64>("Calc.Mul", &(2, 3)).await;
    let err = timeout(Duration::from_secs(2), call.wait())
        .await
        .expect("call timed out")
        .unwrap_err();
    assert!(matches!(err, Error::Handler(HandlerError::Remote(_))));

    client.close().await;
}

#[tokio::test]
async fn test_cross_handler_local_dispatch() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Server::new(BincodeCodec);

    let calc = RpcHandler::new(Arc::new(Calc), BincodeCodec, Arc::new(NullLocator)).expect("calc");
    server.register(&calc).expect("register calc");

    let frontend = RpcHandler::new(
        Arc::new(Frontend),
        BincodeCodec,
        Arc::new(StaticLocator {
            clients: vec![Client::local(BincodeCodec)],
        }),
    )
    .expect("frontend");
    server.register(&frontend).expect("register frontend");

    // Frontend does not own Calc, so this goes through Calc's request queue.
    let sum: i64 = timeout(
        Duration::from_secs(2),
        frontend.call("Calc.Add", (2i64, 3i64)),
    )
    .await
    .expect("call timed out")
    .expect("call failed");

    assert_eq!(sum, 5);
}

#[tokio::test]
async fn test_malformed_address_rejected_before_lookup() {
    let _ = tracing_subscriber::fmt::try_init();

    let frontend = RpcHandler::new(Arc::new(Frontend), BincodeCodec, Arc::new(PanicLocator))
        .expect("frontend");

    let err = frontend
        .call::<(i64, i64), i64>("A.B.C", (1, 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Routing(RoutingError::MalformedAddress(_))
    ));
}

#[tokio::test]
async fn test_multiple_targets_rejected() {
    let _ = tracing_subscriber::fmt::try_init();

    let frontend = RpcHandler::new(
        Arc::new(Frontend),
        BincodeCodec,
        Arc::new(StaticLocator {
            clients: vec![Client::local(BincodeCodec), Client::local(BincodeCodec)],
        }),
    )
    .expect("frontend");

    let err = frontend
        .call::<(i64, i64), i64>("Calc.Add", (1, 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Routing(RoutingError::MultipleTargets { count: 2, .. })
    ));
}

#[tokio::test]
async fn test_unresolvable_address_rejected() {
    let _ = tracing_subscriber::fmt::try_init();

    let frontend = RpcHandler::new(Arc::new(Frontend), BincodeCodec, Arc::new(NullLocator))
        .expect("frontend");

    let err = frontend
        .call::<(i64, i64), i64>("Calc.Add", (1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::NoTarget(_))));
}
