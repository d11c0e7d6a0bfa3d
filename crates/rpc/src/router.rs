//! Call routing: one call signature across in-process and remote execution.
//!
//! Only the router branches on locality. Call sites use
//! [`RpcHandler::call`] and never care where the target service lives.

use crate::codec::Codec;
use crate::error::{Error, HandlerError, Result, RoutingError};
use crate::handler::{RpcHandler, Service};
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use tracing::debug;

/// Split a "Service.Method" address into its two segments.
pub(crate) fn split_service_method(service_method: &str) -> Result<(&str, &str)> {
    let mut parts = service_method.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(method), None) if !service.is_empty() && !method.is_empty() => {
            Ok((service, method))
        }
        _ => Err(RoutingError::MalformedAddress(service_method.to_string()).into()),
    }
}

impl<S: Service, C: Codec> RpcHandler<S, C> {
    /// Invoke "Service.Method" wherever it lives and wait for the result.
    ///
    /// Resolution order: validate the address shape, resolve the destination
    /// through the locator, then dispatch in-process (same service: direct;
    /// other local service: through its queue) or remotely via the client.
    ///
    /// # Errors
    ///
    /// [`RoutingError::MalformedAddress`] before any lookup or I/O when the
    /// address is not exactly two segments; [`RoutingError::MultipleTargets`]
    /// when resolution is ambiguous; otherwise whatever the dispatched call
    /// reports.
    pub async fn call<A, R>(&self, service_method: &str, args: A) -> Result<R>
    where
        A: Serialize + Send + Sync + Any,
        R: DeserializeOwned + Default + Send + Any,
    {
        let (service, method) = split_service_method(service_method)?;

        let clients = self.locator().resolve(service_method)?;
        if clients.len() > 1 {
            return Err(RoutingError::MultipleTargets {
                service_method: service_method.to_string(),
                count: clients.len(),
            }
            .into());
        }
        let Some(client) = clients.into_iter().next() else {
            return Err(RoutingError::NoTarget(service_method.to_string()).into());
        };

        if client.is_local() {
            let server = self.server().ok_or(RoutingError::NoServer)?;

            if service == self.service_name() {
                // Calling into our own service: no queue, no encoding.
                debug!(method = %service_method, "dispatching to own service");
                let mut reply = R::default();
                server.dispatch_self(service, method, &mut reply, &args)?;
                return Ok(reply);
            }

            debug!(method = %service_method, "dispatching to local handler");
            let call = server.dispatch_other(service, method, Box::new(args)).await;
            let value = call.wait().await?;
            let reply = value
                .downcast::<R>()
                .map_err(|_| Error::from(HandlerError::TypeMismatch("reply type")))?;
            return Ok(*reply);
        }

        debug!(method = %service_method, "dispatching to remote node");
        let call = client.go::<A, R>(service_method, &args).await;
        call.wait().await
    }
}
