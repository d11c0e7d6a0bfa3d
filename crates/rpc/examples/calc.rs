//! Calculator server/client example.
//!
//! Runs a Calc service on an in-memory node, connects a client to it, and
//! issues the same call through the remote and local paths.

use nexus_rpc::{
    BincodeCodec, Client, Codec, Locator, MethodError, MethodRegistry, RegistrationError, Result,
    RpcHandler, Server, Service,
};
use nexus_transport::Transport;
use nexus_transport_memory::MemoryTransport;
use std::sync::Arc;

/// Calculator service.
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

/// Caller-side service used only to issue calls.
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

struct Direct(Client<BincodeCodec>);

impl Locator<BincodeCodec> for Direct {
    fn resolve(&self, _service_method: &str) -> Result<Vec<Client<BincodeCodec>>> {
        Ok(vec![self.0.clone()])
    }
}

struct NullLocator;

impl<C: Codec> Locator<C> for NullLocator {
    fn resolve(&self, _service_method: &str) -> Result<Vec<Client<C>>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let transport = MemoryTransport::new_default();
    let listener = transport.listen("calc-node").await?;

    // Host the Calc service
    let server = Server::new(BincodeCodec);
    let calc = RpcHandler::new(Arc::new(Calc), BincodeCodec, Arc::new(NullLocator))
        .expect("Calc registration is valid");
    server
        .register(&calc)
        .expect("Calc is the only service on this node");
    tokio::spawn(Arc::clone(&server).serve(listener));

    // Connect a client and route calls through it
    let client = Client::new(Arc::new(transport) as Arc<dyn Transport>, BincodeCodec);
    client.connect("calc-node")?;
    client.wait_connected().await;

    let frontend = RpcHandler::new(
        Arc::new(Frontend),
        BincodeCodec,
        Arc::new(Direct(client.clone())),
    )
    .expect("Frontend registration is valid");

    let sum: i64 = frontend.call("Calc.Add", (2i64, 3i64)).await?;
    println!("Calc.Add(2, 3) over the wire = {sum}");

    match frontend.call::<(i64, i64), i64>("Calc.Div", (1, 0)).await {
        Ok(_) => println!("Calc.Div(1, 0) unexpectedly succeeded"),
        Err(e) => println!("Calc.Div(1, 0) failed as expected: {e}"),
    }

    client.close().await;
    Ok(())
}
