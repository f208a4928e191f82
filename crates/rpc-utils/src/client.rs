//! Blocking RPC client with async call handles.
//!
//! A [`ClientWrapper`] owns one TCP connection and a single-worker runtime
//! that drives it. Outgoing frames go through a writer task in issue order;
//! a reader task matches responses to waiting calls by request id, so
//! responses may arrive in any order.

use crate::error::{Error, Result};
use crate::protocol::args::IntoArgs;
use crate::protocol::codec;
use crate::protocol::{Frame, FrameCodec, FrameType, MAX_FRAME_SIZE, RequestEnvelope, ResponseEnvelope};
use ciborium::Value;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Call timeout used by the demo client, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: i64 = 5000;

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;
type FrameStream = SplitStream<Framed<TcpStream, FrameCodec>>;

/// Configuration for the RPC client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on the initial connection attempt.
    pub connect_timeout: Duration,
    /// Timeout applied to calls; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Largest frame accepted or sent.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            call_timeout: Some(Duration::from_secs(5)),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the call timeout.
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// Observable state of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet connected.
    Initial,
    /// Connected and usable.
    Connected,
    /// Closed by the peer or by the client.
    Disconnected,
    /// Dropped after a transport or protocol error.
    Reset,
}

/// State shared between the wrapper, its pending calls and the I/O tasks.
struct Shared {
    pending: DashMap<Uuid, oneshot::Sender<ResponseEnvelope>>,
    outstanding: watch::Sender<usize>,
    state: RwLock<ConnectionState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: DashMap::new(),
            outstanding: watch::Sender::new(0),
            state: RwLock::new(ConnectionState::Initial),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn register(&self, id: Uuid) -> oneshot::Receiver<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        self.outstanding.send_modify(|n| *n += 1);
        rx
    }

    fn complete(&self, response: ResponseEnvelope) {
        if let Some((_, tx)) = self.pending.remove(&response.request_id) {
            let _ = tx.send(response);
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        } else {
            warn!("Received response for unknown request: {}", response.request_id);
        }
    }

    /// Forget a request; its receiver observes a closed channel.
    fn abandon(&self, id: Uuid) {
        if self.pending.remove(&id).is_some() {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    /// Mark the connection dead and settle every pending request.
    fn fail_all(&self, state: ConnectionState) {
        {
            let mut current = self.state.write();
            if matches!(*current, ConnectionState::Initial | ConnectionState::Connected) {
                *current = state;
            }
        }
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.abandon(id);
        }
    }

    fn handle_frame(&self, frame: &Frame) {
        match frame.frame_type {
            FrameType::Response | FrameType::Error => {
                match codec::decode::<ResponseEnvelope>(&frame.payload) {
                    Ok(response) => self.complete(response),
                    Err(e) => warn!("Failed to decode response: {}", e),
                }
            }
            other => debug!("Received unexpected frame type: {:?}", other),
        }
    }
}

async fn read_loop(mut stream: FrameStream, shared: Arc<Shared>, shutdown: CancellationToken) {
    let final_state = loop {
        tokio::select! {
            () = shutdown.cancelled() => break ConnectionState::Disconnected,
            frame = stream.next() => match frame {
                Some(Ok(frame)) => shared.handle_frame(&frame),
                Some(Err(e)) => {
                    warn!("Connection error: {}", e);
                    break ConnectionState::Reset;
                }
                None => {
                    debug!("Server closed the connection");
                    break ConnectionState::Disconnected;
                }
            },
        }
    };
    shared.fail_all(final_state);
    shutdown.cancel();
}

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    warn!("Failed to send frame: {}", e);
                    shared.fail_all(ConnectionState::Reset);
                    shutdown.cancel();
                    break;
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
    let _ = sink.close().await;
}

/// Synchronous RPC client bound to one server connection.
///
/// The blocking methods (`call`, [`PendingCall::wait`], `wait_all_responses`)
/// must not be used from inside an async context; await the
/// [`PendingCall`] instead.
pub struct ClientWrapper {
    addr: String,
    runtime: Option<Runtime>,
    handle: Handle,
    outbound: mpsc::UnboundedSender<Frame>,
    codec: FrameCodec,
    shared: Arc<Shared>,
    timeout: RwLock<Option<Duration>>,
    shutdown: CancellationToken,
}

fn timeout_from_ms(timeout_ms: i64) -> Option<Duration> {
    (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms.unsigned_abs()))
}

impl ClientWrapper {
    /// Connect to `host:port`.
    ///
    /// A `timeout_ms` of zero or less means calls wait without a bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the connection cannot be established.
    pub fn new(host: &str, port: u16, timeout_ms: i64) -> Result<Self> {
        let config = ClientConfig::default().call_timeout(timeout_from_ms(timeout_ms));
        Self::with_config(host, port, config)
    }

    /// Connect with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the runtime cannot be created or the
    /// connection attempt fails or times out.
    pub fn with_config(host: &str, port: u16, config: ClientConfig) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let connect_err = |source: io::Error| Error::Connect {
            addr: addr.clone(),
            source,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rpc-client")
            .enable_all()
            .build()
            .map_err(connect_err)?;

        let stream = runtime
            .block_on(async {
                tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await
            })
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out"))
            .and_then(|connected| connected)
            .map_err(connect_err)?;
        let _ = stream.set_nodelay(true);

        let codec = FrameCodec::new().with_max_frame_size(config.max_frame_size);
        let framed = Framed::new(stream, codec);
        let (sink, stream) = framed.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared::new());
        *shared.state.write() = ConnectionState::Connected;

        let shutdown = CancellationToken::new();
        runtime.spawn(read_loop(stream, Arc::clone(&shared), shutdown.clone()));
        runtime.spawn(write_loop(
            sink,
            outbound_rx,
            Arc::clone(&shared),
            shutdown.clone(),
        ));

        debug!("Connected to RPC server at {}", addr);

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            addr,
            outbound,
            codec,
            shared,
            timeout: RwLock::new(config.call_timeout),
            shutdown,
        })
    }

    /// The `host:port` this client connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Call `function` and wait for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the server reported a failure
    /// - [`Error::Decode`] if the result does not decode as `R`
    /// - [`Error::Timeout`] if no response arrived in time
    /// - [`Error::ConnectionLost`] if the connection is gone
    pub fn call<R, A>(&self, function: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.async_call(function, args)?.get()
    }

    /// Send a call without waiting for its result.
    ///
    /// The returned handle captures the current timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be encoded, the request is
    /// larger than the maximum frame size ([`Error::Send`]), or the connection
    /// is gone.
    #[instrument(skip(self, args), fields(addr = %self.addr))]
    pub fn async_call<A: IntoArgs>(&self, function: &str, args: A) -> Result<PendingCall> {
        let request = RequestEnvelope::new(function, args.into_args()?);
        let request_id = request.id;
        let frame = request.into_frame(FrameType::Request)?;
        self.codec
            .ensure_fits(frame.payload.len())
            .map_err(|source| Error::Send {
                function: function.to_string(),
                source,
            })?;

        let receiver = self.shared.register(request_id);
        if !self.is_connected() || self.outbound.send(frame).is_err() {
            self.shared.abandon(request_id);
            return Err(Error::ConnectionLost {
                function: function.to_string(),
            });
        }
        debug!("Sent request {}", request_id);

        Ok(PendingCall {
            function: function.to_string(),
            request_id,
            receiver,
            handle: self.handle.clone(),
            timeout: self.timeout(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Invoke `function` without expecting a response.
    ///
    /// Failures are logged at debug level and otherwise ignored.
    pub fn send_notification<A: IntoArgs>(&self, function: &str, args: A) {
        let frame = match args.into_args().and_then(|args| {
            RequestEnvelope::new(function, args).into_frame(FrameType::Notification)
        }) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping notification '{}': {}", function, e);
                return;
            }
        };
        if let Err(e) = self.codec.ensure_fits(frame.payload.len()) {
            debug!("Dropping notification '{}': {}", function, e);
            return;
        }
        if self.outbound.send(frame).is_err() {
            debug!("Dropping notification '{}': connection closed", function);
        }
    }

    /// Set the timeout for subsequent calls; zero or less removes it.
    pub fn set_timeout(&self, timeout_ms: i64) {
        *self.timeout.write() = timeout_from_ms(timeout_ms);
    }

    /// Remove the call timeout.
    pub fn clear_timeout(&self) {
        *self.timeout.write() = None;
    }

    /// Current call timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.read()
    }

    /// Current connection state.
    #[must_use]
    pub fn get_connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the connection is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    /// Number of calls still waiting for a response.
    #[must_use]
    pub fn outstanding_calls(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Block until every issued call has been answered or abandoned.
    pub fn wait_all_responses(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        let _ = self.handle.block_on(async move {
            outstanding.wait_for(|n| *n == 0).await.map(|_| ())
        });
    }
}

impl Drop for ClientWrapper {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared.fail_all(ConnectionState::Disconnected);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Handle to an issued call.
///
/// Wait on it with [`wait`](Self::wait) or [`get`](Self::get), or `.await`
/// it. Awaiting does not apply the timeout.
pub struct PendingCall {
    function: String,
    request_id: Uuid,
    receiver: oneshot::Receiver<ResponseEnvelope>,
    handle: Handle,
    timeout: Option<Duration>,
    shared: Arc<Shared>,
}

impl PendingCall {
    /// Name of the called function.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Request id used on the wire.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Block until the response arrives or the timeout elapses.
    ///
    /// The timeout is the one the client had when the call was issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`], [`Error::Timeout`] or
    /// [`Error::ConnectionLost`].
    pub fn wait(mut self) -> Result<Payload> {
        match self.receiver.try_recv() {
            Ok(response) => return self.settle(response),
            Err(TryRecvError::Closed) => return Err(self.lost()),
            Err(TryRecvError::Empty) => {}
        }

        let handle = self.handle.clone();
        let received = match self.timeout {
            Some(after) => {
                let receiver = &mut self.receiver;
                let Ok(received) = handle
                    .block_on(async { tokio::time::timeout(after, receiver).await })
                else {
                    self.shared.abandon(self.request_id);
                    return Err(Error::Timeout {
                        function: self.function,
                        after,
                    });
                };
                received
            }
            None => handle.block_on(&mut self.receiver),
        };

        match received {
            Ok(response) => self.settle(response),
            Err(_) => Err(self.lost()),
        }
    }

    /// Wait and decode the result as `R`.
    ///
    /// # Errors
    ///
    /// Same as [`wait`](Self::wait), plus [`Error::Decode`].
    pub fn get<R: DeserializeOwned>(self) -> Result<R> {
        self.wait()?.decode()
    }

    fn settle(&self, response: ResponseEnvelope) -> Result<Payload> {
        match response.error {
            Some(error) => Err(Error::Remote {
                function: self.function.clone(),
                code: error.code,
                message: error.message,
            }),
            None => Ok(Payload {
                function: self.function.clone(),
                value: response.result,
            }),
        }
    }

    fn lost(&self) -> Error {
        Error::ConnectionLost {
            function: self.function.clone(),
        }
    }
}

impl Future for PendingCall {
    type Output = Result<Payload>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready(self.settle(response)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(self.lost())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Undecoded result of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    function: String,
    value: Value,
}

impl Payload {
    /// Decode the result as `R`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the value does not match `R`.
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R> {
        codec::from_value(&self.value).map_err(|source| Error::Decode {
            function: self.function.clone(),
            source,
        })
    }

    /// Name of the function that produced this result.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The raw CBOR value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Take the raw CBOR value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}
