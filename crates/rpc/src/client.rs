//! RPC client: sequence assignment, pending-call correlation, reconnect
//! supervision.
//!
//! One client owns one connection. Calls may be issued from any task; a
//! single sequential read loop correlates responses back to their calls by
//! sequence number. Connection loss fails every pending call and the
//! supervisor retries at a fixed interval until the client is closed.

use crate::call::{Call, call_pair};
use crate::codec::Codec;
use crate::error::{ConnectionError, Error, HandlerError, ProtocolError, Result};
use crate::message::{RequestEnvelope, ResponseEnvelope};
use bytes::Bytes;
use dashmap::DashMap;
use nexus_transport::{Connection, Transport};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Connection parameters for a client.
///
/// Outbound queue bounds and frame sizing live in the transport's own
/// [`Config`](nexus_transport::Config); the client only decides how
/// eagerly to heal a lost connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(2),
        }
    }
}

/// Connection lifecycle states driven by the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No connection; the supervisor will retry.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The connection is established and the read loop is running.
    Connected,
    /// The client is shutting down; no further retries.
    Closing,
}

type PendingReply = Box<dyn FnOnce(Result<Bytes>) + Send + Sync>;

/// RPC client for one destination node.
pub struct Client<C: Codec = crate::codec::BincodeCodec> {
    inner: Arc<ClientInner<C>>,
}

impl<C: Codec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<C: Codec> {
    local: bool,
    codec: C,
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    addr: parking_lot::RwLock<String>,
    seq: AtomicU64,
    pending: DashMap<u64, PendingReply>,
    conn: parking_lot::RwLock<Option<Arc<dyn Connection>>>,
    state_tx: watch::Sender<ConnState>,
    supervisor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Codec> Client<C> {
    /// Create a client that reaches its node through `transport`.
    pub fn new(transport: Arc<dyn Transport>, codec: C) -> Self {
        Self::with_config(transport, codec, ClientConfig::default())
    }

    /// Create a client with explicit connection parameters.
    pub fn with_config(transport: Arc<dyn Transport>, codec: C, config: ClientConfig) -> Self {
        Self::build(Some(transport), codec, config, false)
    }

    /// Create a client representing the local node. Local clients carry no
    /// connection; the router short-circuits them to in-process dispatch.
    pub fn local(codec: C) -> Self {
        Self::build(None, codec, ClientConfig::default(), true)
    }

    fn build(
        transport: Option<Arc<dyn Transport>>,
        codec: C,
        config: ClientConfig,
        local: bool,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        Self {
            inner: Arc::new(ClientInner {
                local,
                codec,
                config,
                transport,
                addr: parking_lot::RwLock::new(String::new()),
                seq: AtomicU64::new(0),
                pending: DashMap::new(),
                conn: parking_lot::RwLock::new(None),
                state_tx,
                supervisor: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Whether this client targets the local node.
    pub fn is_local(&self) -> bool {
        self.inner.local
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        *self.inner.state_tx.borrow()
    }

    /// Number of calls still awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Start connecting to `addr` and keep the connection alive.
    ///
    /// Fails every currently pending call with a disconnect error, clears
    /// the pending table, resets the sequence counter, then hands the
    /// connection to the supervisor task. Reconnection after a lost
    /// connection is automatic; `close` stops it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Local`] for local clients, which have
    /// nothing to connect.
    pub fn connect(&self, addr: &str) -> Result<()> {
        if self.inner.transport.is_none() {
            return Err(ConnectionError::Local.into());
        }

        *self.inner.addr.write() = addr.to_string();
        self.inner.fail_pending();
        self.inner.seq.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnState::Disconnected);

        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.as_ref().is_none_or(|handle| handle.is_finished()) {
            let inner = Arc::clone(&self.inner);
            *supervisor = Some(tokio::spawn(async move {
                inner.supervise().await;
            }));
        }
        Ok(())
    }

    /// Subscribe to connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the supervisor reports an established connection.
    pub async fn wait_connected(&self) {
        let mut rx = self.subscribe_state();
        let _ = rx.wait_for(|state| *state == ConnState::Connected).await;
    }

    /// Stop reconnecting and drop the connection. Pending calls fail with a
    /// disconnect error.
    pub async fn close(&self) {
        self.inner.set_state(ConnState::Closing);
        let conn = { self.inner.conn.write().take() };
        if let Some(conn) = conn {
            let _ = conn.close().await;
        }
        self.inner.fail_pending();
    }

    /// Issue a call, resolved asynchronously through the returned [`Call`].
    ///
    /// The next sequence number is assigned and the call registered in the
    /// pending table before any encoding happens. Serialization or write
    /// failures resolve the call immediately with the error and deregister
    /// it; the call is still returned so the failure surfaces on `wait`.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let inner = &self.inner;
        let seq = inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (call, completer) = call_pair::<R>(seq, service_method);

        let codec = inner.codec.clone();
        inner.pending.insert(
            seq,
            Box::new(move |outcome: Result<Bytes>| {
                let resolved =
                    outcome.and_then(|returns| codec.unmarshal::<R>(&returns).map_err(Error::from));
                completer.complete(resolved);
            }),
        );
        debug!(seq, method = %service_method, "registered outbound call");

        let input = match inner.codec.marshal(args) {
            Ok(bytes) => bytes,
            Err(e) => {
                inner.abort_call(seq, e.into());
                return call;
            }
        };
        let envelope = RequestEnvelope {
            seq,
            service_method: service_method.to_string(),
            input: input.to_vec(),
        };
        let frame = match inner.codec.marshal(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                inner.abort_call(seq, e.into());
                return call;
            }
        };

        let conn = { inner.conn.read().clone() };
        let Some(conn) = conn else {
            inner.abort_call(seq, ConnectionError::NotConnected.into());
            return call;
        };
        if let Err(e) = conn.send(frame).await {
            inner.abort_call(seq, e.into());
        }

        call
    }
}

impl<C: Codec> ClientInner<C> {
    fn set_state(&self, state: ConnState) {
        self.state_tx.send_replace(state);
    }

    fn state(&self) -> ConnState {
        *self.state_tx.borrow()
    }

    /// Fail every pending call with a disconnect error and clear the table.
    fn fail_pending(&self) {
        let seqs: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for seq in seqs {
            if let Some((_, complete)) = self.pending.remove(&seq) {
                complete(Err(ConnectionError::Disconnected.into()));
            }
        }
    }

    /// Resolve one registered call with a send-side failure.
    fn abort_call(&self, seq: u64, err: Error) {
        debug!(seq, error = %err, "call aborted before response");
        if let Some((_, complete)) = self.pending.remove(&seq) {
            complete(Err(err));
        }
    }

    /// Connection state machine: connect, run the read loop, fail pending
    /// calls on loss, retry at a fixed interval until closing.
    async fn supervise(self: Arc<Self>) {
        let Some(transport) = self.transport.clone() else {
            return;
        };

        loop {
            if self.state() == ConnState::Closing {
                break;
            }
            self.set_state(ConnState::Connecting);

            let addr = { self.addr.read().clone() };
            match transport.connect(&addr).await {
                Ok(conn) => {
                    let conn: Arc<dyn Connection> = Arc::from(conn);
                    // Fresh connection instance: new sequence space.
                    self.seq.store(0, Ordering::SeqCst);
                    *self.conn.write() = Some(Arc::clone(&conn));
                    self.set_state(ConnState::Connected);
                    debug!(addr = %addr, "connection established");

                    self.read_loop(conn).await;

                    *self.conn.write() = None;
                    self.fail_pending();
                    if self.state() == ConnState::Closing {
                        break;
                    }
                    self.set_state(ConnState::Disconnected);
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "connect failed");
                    self.set_state(ConnState::Disconnected);
                }
            }

            tokio::time::sleep(self.config.reconnect_interval).await;
        }

        // Closing: nothing may be left waiting.
        self.fail_pending();
    }

    /// Sequential read loop for one connection instance. Returns when the
    /// transport reports an error; decode failures only skip the message.
    async fn read_loop(&self, conn: Arc<dyn Connection>) {
        loop {
            if self.state() == ConnState::Closing {
                break;
            }

            let bytes = match conn.recv().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "connection read failed");
                    break;
                }
            };

            let envelope: ResponseEnvelope = match self.codec.unmarshal(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("{}", ProtocolError::Decode(e.to_string()));
                    continue;
                }
            };

            // Stale or duplicate responses are dropped, not fatal.
            let Some((seq, complete)) = self.pending.remove(&envelope.seq) else {
                warn!(seq = envelope.seq, "cannot find seq in pending, dropping");
                continue;
            };

            let outcome = match envelope.error {
                Some(message) => Err(HandlerError::Remote(message).into()),
                None => Ok(Bytes::from(envelope.returns)),
            };
            // Deliberately after the map entry is released: decoding and
            // waking the caller must not block other correlation work.
            complete(outcome);
            debug!(seq, "call completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;

    #[tokio::test]
    async fn test_go_without_connection_fails_and_deregisters() {
        let client = Client::local(BincodeCodec);

        let call = client.go::<(i64, i64), i64>("Calc.Add", &(1, 2)).await;
        assert_eq!(call.seq(), 1);
        assert_eq!(client.pending_calls(), 0);

        let err = call.wait().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase_per_call() {
        let client = Client::local(BincodeCodec);

        for expected in 1..=5u64 {
            let call = client.go::<(i64, i64), i64>("Calc.Add", &(0, 0)).await;
            assert_eq!(call.seq(), expected);
        }
    }

    #[tokio::test]
    async fn test_connect_on_local_client_is_an_error() {
        let client = Client::local(BincodeCodec);
        let err = client.connect("nowhere").unwrap_err();
        assert!(matches!(err, Error::Connection(ConnectionError::Local)));
    }
}
