//! RPC server with blocking and background run modes.
//!
//! The listening socket is bound when the [`ServerWrapper`] is created, so
//! [`ServerWrapper::port`] is known before the server runs. Each accepted
//! connection becomes a session task; bound callables run on the runtime's
//! blocking pool so a slow callable never stalls other sessions.

use crate::error::{Error, HandlerError, Result};
use crate::handler::{self, FallibleHandler, Handler, Registry};
use crate::protocol::codec;
use crate::protocol::{Frame, FrameCodec, FrameType, MAX_FRAME_SIZE, RequestEnvelope, ResponseEnvelope};
use ciborium::Value;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How long sessions may keep finishing in-flight calls after a stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Configuration for the RPC server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent sessions; further connections are dropped.
    pub max_connections: usize,
    /// Maximum frame size.
    pub max_frame_size: usize,
    /// Close sessions that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_frame_size: MAX_FRAME_SIZE,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Set the session limit.
    #[must_use]
    pub const fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

struct Shared {
    registry: Registry,
    suppress: AtomicBool,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    sessions: DashMap<Uuid, CancellationToken>,
    config: ServerConfig,
}

impl Shared {
    fn begin_running(&self) -> Result<CancellationToken> {
        let mut shutdown = self.shutdown.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        *shutdown = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
        Ok(shutdown.clone())
    }

    fn stop(&self) {
        let shutdown = self.shutdown.lock();
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping RPC server");
            shutdown.cancel();
        }
    }

    /// Stop the run that was handed `run_token`, unless it already ended.
    fn finish(&self, run_token: &CancellationToken) {
        let _shutdown = self.shutdown.lock();
        if !run_token.is_cancelled() {
            self.running.store(false, Ordering::SeqCst);
            run_token.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Cloneable handle that stops a server from any thread.
///
/// It does not keep the server alive, so it can be captured by a callable
/// bound on that same server.
#[derive(Clone)]
pub struct StopHandle {
    shared: Weak<Shared>,
}

impl StopHandle {
    /// Stop the server; a no-op if it is not running or already dropped.
    pub fn stop(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.stop();
        }
    }

    /// Whether the server is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| shared.is_running())
    }
}

/// RPC server owning one listening socket and a table of bound functions.
pub struct ServerWrapper {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    background: Mutex<Option<Runtime>>,
}

impl ServerWrapper {
    /// Listen on all interfaces at `port`; `0` picks a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the port cannot be bound.
    pub fn new(port: u16) -> Result<Self> {
        Self::with_address("0.0.0.0", port)
    }

    /// Listen on `address:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub fn with_address(address: &str, port: u16) -> Result<Self> {
        Self::with_config(address, port, ServerConfig::default())
    }

    /// Listen on `address:port` with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub fn with_config(address: &str, port: u16, config: ServerConfig) -> Result<Self> {
        let addr = format!("{address}:{port}");
        let bind_err = |source: io::Error| Error::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = std::net::TcpListener::bind(&addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        debug!("RPC server bound to {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                registry: Registry::default(),
                suppress: AtomicBool::new(true),
                running: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                sessions: DashMap::new(),
                config,
            }),
            background: Mutex::new(None),
        })
    }

    /// Register `handler` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyBound`] if the name is taken.
    pub fn bind<Args, H: Handler<Args>>(&self, name: &str, handler: H) -> Result<()> {
        self.shared.registry.insert(name, handler.into_boxed())?;
        debug!("Bound function '{}'", name);
        Ok(())
    }

    /// Register a callable returning `Result`; its `Err` reaches the caller
    /// as a remote error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyBound`] if the name is taken.
    pub fn bind_fallible<Args, H: FallibleHandler<Args>>(&self, name: &str, handler: H) -> Result<()> {
        self.shared.registry.insert(name, handler.into_boxed())?;
        debug!("Bound fallible function '{}'", name);
        Ok(())
    }

    /// Serve on the calling thread until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if the server is running, or an I/O
    /// error if the runtime cannot be started.
    pub fn run(&self) -> Result<()> {
        let shutdown = self.shared.begin_running()?;
        let result = self.run_blocking(shutdown.clone());
        self.shared.finish(&shutdown);
        result.map_err(Error::from)
    }

    fn run_blocking(&self, shutdown: CancellationToken) -> io::Result<()> {
        let listener = self.listener.try_clone()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async {
            let listener = TcpListener::from_std(listener)?;
            serve(listener, Arc::clone(&self.shared), shutdown).await;
            Ok::<(), io::Error>(())
        })
    }

    /// Serve on a background pool of `worker_threads` threads and return
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if the server is running, or an I/O
    /// error if the pool cannot be started.
    pub fn async_run(&self, worker_threads: usize) -> Result<()> {
        let shutdown = self.shared.begin_running()?;
        match self.start_background(worker_threads.max(1), shutdown) {
            Ok(runtime) => {
                if let Some(previous) = self.background.lock().replace(runtime) {
                    previous.shutdown_background();
                }
                Ok(())
            }
            Err(e) => {
                self.shared.stop();
                Err(e.into())
            }
        }
    }

    fn start_background(&self, worker_threads: usize, shutdown: CancellationToken) -> io::Result<Runtime> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("rpc-server")
            .enable_all()
            .build()?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(self.listener.try_clone()?)?
        };
        runtime.spawn(serve(listener, Arc::clone(&self.shared), shutdown));
        Ok(runtime)
    }

    /// Stop serving. A no-op when the server is not running.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Handle for stopping the server from elsewhere.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Whether callable panics become error responses (the default) or
    /// close the caller's session.
    pub fn suppress_exceptions(&self, suppress: bool) {
        self.shared.suppress.store(suppress, Ordering::Relaxed);
    }

    /// The bound port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Disconnect every client; the server keeps accepting new ones.
    pub fn close_all_sessions(&self) {
        let sessions: Vec<CancellationToken> = self
            .shared
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        debug!("Closing {} session(s)", sessions.len());
        for session in sessions {
            session.cancel();
        }
    }

    /// Number of connected clients.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Whether the server is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Sorted names of the bound functions.
    #[must_use]
    pub fn functions(&self) -> Vec<String> {
        self.shared.registry.names()
    }
}

impl Drop for ServerWrapper {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(runtime) = self.background.lock().take() {
            // Blocking shutdown is not allowed inside a runtime
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(SHUTDOWN_GRACE * 2);
            }
        }
    }
}

#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
async fn serve(listener: TcpListener, shared: Arc<Shared>, shutdown: CancellationToken) {
    let limit = Arc::new(Semaphore::new(shared.config.max_connections));
    let mut sessions = JoinSet::new();
    info!("RPC server listening");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!("Max connections reached, rejecting connection from {}", peer);
                        continue;
                    };
                    let _ = stream.set_nodelay(true);
                    sessions.spawn(run_session(
                        stream,
                        peer,
                        Arc::clone(&shared),
                        shutdown.child_token(),
                        permit,
                    ));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
        }
    }

    drop(listener);
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Aborting {} busy session(s) after shutdown", sessions.len());
    }
    info!("RPC server stopped");
}

struct SessionGuard<'a> {
    id: Uuid,
    sessions: &'a DashMap<Uuid, CancellationToken>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

type Connection = Framed<TcpStream, FrameCodec>;

async fn next_frame(framed: &mut Connection, idle: Option<Duration>) -> Option<io::Result<Frame>> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, framed.next())
            .await
            .unwrap_or_else(|_| Some(Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")))),
        None => framed.next().await,
    }
}

#[instrument(skip(stream, shared, token, _permit), fields(peer = %peer))]
async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let id = Uuid::new_v4();
    shared.sessions.insert(id, token.clone());
    let _guard = SessionGuard {
        id,
        sessions: &shared.sessions,
    };
    debug!("Session {} opened", id);

    let mut framed = Framed::new(
        stream,
        FrameCodec::new().with_max_frame_size(shared.config.max_frame_size),
    );

    loop {
        let next = tokio::select! {
            () = token.cancelled() => {
                debug!("Session {} closed by server", id);
                break;
            }
            next = next_frame(&mut framed, shared.config.idle_timeout) => next,
        };

        match next {
            Some(Ok(frame)) => {
                if handle_frame(&shared, frame, &mut framed).await.is_break() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Closing session {}: {}", id, e);
                break;
            }
            None => {
                debug!("Session {} closed by client", id);
                break;
            }
        }
    }
}

async fn handle_frame(shared: &Shared, frame: Frame, framed: &mut Connection) -> ControlFlow<()> {
    let notification = match frame.frame_type {
        FrameType::Request => false,
        FrameType::Notification => true,
        other => {
            warn!("Unexpected frame type from client: {:?}", other);
            return ControlFlow::Continue(());
        }
    };

    let RequestEnvelope { id, function, args } = match codec::decode(&frame.payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("Discarding malformed request: {}", e);
            return ControlFlow::Continue(());
        }
    };

    let Some(outcome) = dispatch(shared, &function, args).await else {
        return ControlFlow::Break(());
    };

    if notification {
        if let Err(e) = outcome {
            debug!("Notification '{}' failed: {}", function, e);
        }
        return ControlFlow::Continue(());
    }

    let response = match outcome {
        Ok(value) => ResponseEnvelope::success(id, value),
        Err(e) => {
            debug!("Call '{}' failed: {}", function, e);
            ResponseEnvelope::failure(id, &e)
        }
    };
    let Some(frame) = encode_response(response, &function, framed.codec()) else {
        return ControlFlow::Continue(());
    };
    if let Err(e) = framed.send(frame).await {
        warn!("Failed to send response for '{}': {}", function, e);
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

/// Encode a response, replacing one that does not fit in a frame with a
/// `HANDLER_ERROR` response.
fn encode_response(response: ResponseEnvelope, function: &str, codec: &FrameCodec) -> Option<Frame> {
    let id = response.request_id;
    let frame = match response.into_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to encode response for '{}': {}", function, e);
            return None;
        }
    };
    if codec.ensure_fits(frame.payload.len()).is_ok() {
        return Some(frame);
    }

    let too_large = HandlerError::ResultTooLarge {
        size: frame.payload.len(),
        max: codec.max_frame_size(),
    };
    warn!("Response for '{}' not sent: {}", function, too_large);
    match ResponseEnvelope::failure(id, &too_large).into_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to encode response for '{}': {}", function, e);
            None
        }
    }
}

/// Run the named callable on the blocking pool.
///
/// Returns `None` when an unsuppressed panic should end the session.
async fn dispatch(
    shared: &Shared,
    function: &str,
    args: Vec<Value>,
) -> Option<std::result::Result<Value, HandlerError>> {
    let handler = match shared.registry.get(function) {
        Ok(handler) => handler,
        Err(e) => return Some(Err(e)),
    };
    let suppress = shared.suppress.load(Ordering::Relaxed);
    let name = function.to_string();

    match tokio::task::spawn_blocking(move || handler::invoke(&handler, &name, args, suppress)).await {
        Ok(outcome) => Some(outcome),
        Err(e) if e.is_panic() => {
            let message = handler::panic_message(e.into_panic().as_ref());
            error!("Handler for '{}' panicked: {}; closing session", function, message);
            None
        }
        Err(e) => {
            error!("Handler for '{}' did not complete: {}", function, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_address() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = ServerWrapper::with_address("127.0.0.1", port).err().unwrap();
        assert!(matches!(err, Error::Bind { .. }));
        assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
    }

    #[test]
    fn test_ephemeral_port_resolved() {
        let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
        assert_ne!(server.port(), 0);
        assert!(!server.is_running());
    }

    #[test]
    fn test_stop_when_not_running_is_noop() {
        let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
        server.stop();
        server.stop_handle().stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_running_twice_rejected() {
        let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
        server.async_run(1).unwrap();
        assert!(server.is_running());
        assert!(matches!(server.async_run(1), Err(Error::AlreadyRunning)));
        assert!(matches!(server.run(), Err(Error::AlreadyRunning)));

        server.stop();
        assert!(!server.is_running());
        // Can be restarted after a stop
        server.async_run(2).unwrap();
        assert!(server.is_running());
    }

    #[test]
    fn test_stop_handle_outlives_server() {
        let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
        let handle = server.stop_handle();
        server.async_run(1).unwrap();
        assert!(handle.is_running());
        drop(server);
        assert!(!handle.is_running());
        handle.stop();
    }

    #[test]
    fn test_oversized_response_becomes_error() {
        let codec = FrameCodec::new().with_max_frame_size(1024);
        let id = Uuid::new_v4();

        let small = ResponseEnvelope::success(id, Value::Text("ok".into()));
        let frame = encode_response(small, "small", &codec).unwrap();
        assert_eq!(frame.frame_type, FrameType::Response);

        let big = ResponseEnvelope::success(id, Value::Text("x".repeat(4096)));
        let frame = encode_response(big, "big", &codec).unwrap();
        assert_eq!(frame.frame_type, FrameType::Error);
        let response: ResponseEnvelope = codec::decode(&frame.payload).unwrap();
        assert_eq!(response.request_id, id);
        let error = response.error.unwrap();
        assert_eq!(error.code, "HANDLER_ERROR");
        assert!(error.message.contains("1024"), "{}", error.message);
    }

    #[test]
    fn test_finished_run_leaves_newer_run_alone() {
        let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
        let first = server.shared.begin_running().unwrap();
        server.stop();
        assert!(first.is_cancelled());

        let second = server.shared.begin_running().unwrap();
        server.shared.finish(&first);
        assert!(server.is_running());
        assert!(!second.is_cancelled());

        server.shared.finish(&second);
        assert!(!server.is_running());
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_functions_sorted() {
        let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
        server.bind("square", |x: f64| x * x).unwrap();
        server
            .bind_fallible("divide", |a: f64, b: f64| {
                if b == 0.0 { Err("Division by zero") } else { Ok(a / b) }
            })
            .unwrap();
        assert!(matches!(
            server.bind("square", |x: i64| x),
            Err(Error::AlreadyBound(_))
        ));
        assert_eq!(server.functions(), vec!["divide", "square"]);
    }
}
