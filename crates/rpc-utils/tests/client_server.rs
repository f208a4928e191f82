//! End-to-end tests over loopback TCP.

use rpc_utils::{ClientConfig, ClientWrapper, ConnectionState, Error, ServerConfig, ServerWrapper, Value};
use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn bind_functions(server: &ServerWrapper) {
    server.bind("add", |a: f64, b: f64| a + b).unwrap();
    server
        .bind("greet", |name: String| format!("Hello, {name}!"))
        .unwrap();
    server
        .bind_fallible("divide", |a: f64, b: f64| {
            if b == 0.0 {
                Err("Division by zero")
            } else {
                Ok(a / b)
            }
        })
        .unwrap();
    server
        .bind("sleep_ms", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            ms
        })
        .unwrap();
    server
        .bind("explode", || -> i32 { panic!("kaboom") })
        .unwrap();
    server.bind("nothing", || ()).unwrap();
    server.bind("len", |text: String| text.len()).unwrap();
}

fn start_server() -> ServerWrapper {
    let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
    bind_functions(&server);
    server.async_run(2).unwrap();
    server
}

fn connect(server: &ServerWrapper) -> ClientWrapper {
    ClientWrapper::new("127.0.0.1", server.port(), 2000).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_call_matches_local_invocation() {
    let server = start_server();
    let client = connect(&server);

    assert!(client.is_connected());
    assert_eq!(client.get_connection_state(), ConnectionState::Connected);

    let sum: f64 = client.call("add", (10.5, 20.3)).unwrap();
    assert_eq!(sum, 10.5 + 20.3);

    let greeting: String = client.call("greet", ("World",)).unwrap();
    assert_eq!(greeting, "Hello, World!");

    let unit: Value = client.call("nothing", ()).unwrap();
    assert_eq!(unit, Value::Null);
}

#[test]
fn test_unbound_function_error_names_function() {
    let server = start_server();
    let client = connect(&server);

    let err = client.call::<f64, _>("no_such_function", ()).unwrap_err();
    assert_eq!(err.remote_code(), Some("NOT_FOUND"));
    assert!(err.to_string().contains("no_such_function"));
}

#[test]
fn test_divide_by_zero_keeps_server_alive() {
    let server = start_server();
    let client = connect(&server);

    let err = client.call::<f64, _>("divide", (10.0, 0.0)).unwrap_err();
    match &err {
        Error::Remote {
            function,
            code,
            message,
        } => {
            assert_eq!(function, "divide");
            assert_eq!(code, "HANDLER_ERROR");
            assert_eq!(message, "Division by zero");
        }
        other => panic!("unexpected error: {other}"),
    }

    let quotient: f64 = client.call("divide", (9.0, 3.0)).unwrap();
    assert_eq!(quotient, 3.0);
}

#[test]
fn test_argument_errors_are_reported() {
    let server = start_server();
    let client = connect(&server);

    let err = client.call::<f64, _>("add", (1.0,)).unwrap_err();
    assert_eq!(err.remote_code(), Some("INVALID_ARGUMENTS"));

    let err = client.call::<f64, _>("add", ("one", "two")).unwrap_err();
    assert_eq!(err.remote_code(), Some("INVALID_ARGUMENTS"));
}

#[test]
fn test_result_type_mismatch_is_decode_error() {
    let server = start_server();
    let client = connect(&server);

    let err = client.call::<f64, _>("greet", ("World",)).unwrap_err();
    assert!(matches!(err, Error::Decode { ref function, .. } if function == "greet"));
}

#[test]
fn test_timeout_is_distinguished() {
    let server = start_server();
    let client = connect(&server);

    client.set_timeout(100);
    assert_eq!(client.timeout(), Some(Duration::from_millis(100)));

    let err = client.call::<u64, _>("sleep_ms", (500u64,)).unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(err.function(), Some("sleep_ms"));
    assert_eq!(client.outstanding_calls(), 0);

    // The late response is discarded and the connection stays usable
    client.set_timeout(2000);
    let sum: f64 = client.call("add", (1.0, 2.0)).unwrap();
    assert_eq!(sum, 3.0);

    client.set_timeout(0);
    assert_eq!(client.timeout(), None);
}

#[test]
fn test_async_calls_resolve_before_wait_all_returns() {
    let server = start_server();
    let client = connect(&server);

    let slow = client.async_call("sleep_ms", (100u64,)).unwrap();
    let sum = client.async_call("add", (100.0, 200.0)).unwrap();
    let greeting = client.async_call("greet", ("async",)).unwrap();
    assert_eq!(slow.function(), "sleep_ms");

    client.wait_all_responses();
    assert_eq!(client.outstanding_calls(), 0);

    assert_eq!(slow.get::<u64>().unwrap(), 100);
    assert_eq!(sum.get::<f64>().unwrap(), 300.0);
    assert_eq!(greeting.wait().unwrap().decode::<String>().unwrap(), "Hello, async!");
}

#[test]
fn test_pending_call_can_be_awaited() {
    let server = start_server();
    let client = connect(&server);

    let pending = client.async_call("greet", ("future",)).unwrap();
    let payload = futures::executor::block_on(pending).unwrap();
    assert_eq!(payload.function(), "greet");
    assert_eq!(payload.decode::<String>().unwrap(), "Hello, future!");
}

#[test]
fn test_notifications_never_report_errors() {
    let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    server
        .bind("log_message", move |message: String| {
            sink.lock().unwrap().push(message);
        })
        .unwrap();
    server.async_run(1).unwrap();
    let client = connect(&server);

    client.send_notification("no_such_function", ());
    client.send_notification("log_message", (42,));
    client.send_notification("log_message", ("This is a test notification",));

    assert!(wait_until(|| received.lock().unwrap().len() == 1));
    assert_eq!(
        received.lock().unwrap()[0],
        "This is a test notification"
    );
    assert_eq!(client.outstanding_calls(), 0);
    assert!(client.is_connected());
}

#[test]
fn test_suppressed_panic_becomes_error_response() {
    let server = start_server();
    let client = connect(&server);

    let err = client.call::<i32, _>("explode", ()).unwrap_err();
    assert_eq!(err.remote_code(), Some("HANDLER_PANICKED"));
    assert!(err.to_string().contains("kaboom"));

    let sum: f64 = client.call("add", (2.0, 2.0)).unwrap();
    assert_eq!(sum, 4.0);
}

#[test]
fn test_unsuppressed_panic_drops_session() {
    let server = start_server();
    server.suppress_exceptions(false);
    let client = connect(&server);

    let err = client.call::<i32, _>("explode", ()).unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { .. }), "{err}");
    assert!(wait_until(|| !client.is_connected()));

    // Other clients are unaffected
    let other = connect(&server);
    let sum: f64 = other.call("add", (1.0, 1.0)).unwrap();
    assert_eq!(sum, 2.0);
}

#[test]
fn test_stop_disconnects_clients() {
    let server = start_server();
    let client = connect(&server);
    let _: f64 = client.call("add", (1.0, 1.0)).unwrap();

    server.stop();
    assert!(!server.is_running());
    assert!(wait_until(|| !client.is_connected()));
    assert_eq!(
        client.get_connection_state(),
        ConnectionState::Disconnected
    );

    let err = client.call::<f64, _>("add", (1.0, 1.0)).unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { .. }));

    // Stopping again is a no-op
    server.stop();
}

#[test]
fn test_close_all_sessions_keeps_accepting() {
    let server = start_server();
    let first = connect(&server);
    let second = connect(&server);
    assert!(wait_until(|| server.session_count() == 2));

    server.close_all_sessions();
    assert!(wait_until(|| !first.is_connected() && !second.is_connected()));
    assert!(wait_until(|| server.session_count() == 0));
    assert!(server.is_running());

    let third = connect(&server);
    let greeting: String = third.call("greet", ("again",)).unwrap();
    assert_eq!(greeting, "Hello, again!");
}

#[test]
fn test_blocking_run_stopped_from_another_thread() {
    let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
    bind_functions(&server);
    let port = server.port();
    let stop = server.stop_handle();

    let runner = thread::spawn(move || server.run());
    assert!(wait_until(|| stop.is_running()));

    let client = ClientWrapper::new("127.0.0.1", port, 2000).unwrap();
    let sum: f64 = client.call("add", (10.5, 20.3)).unwrap();
    assert_eq!(sum, 10.5 + 20.3);

    stop.stop();
    runner.join().unwrap().unwrap();
    assert!(!stop.is_running());
}

#[test]
fn test_shutdown_function_stops_blocking_run() {
    let server = ServerWrapper::with_address("127.0.0.1", 0).unwrap();
    let stop = server.stop_handle();
    server.bind("shutdown", move || stop.stop()).unwrap();
    let port = server.port();

    let runner = thread::spawn(move || server.run());
    let client = ClientWrapper::new("127.0.0.1", port, 2000).unwrap();

    let reply: Value = client.call("shutdown", ()).unwrap();
    assert_eq!(reply, Value::Null);
    runner.join().unwrap().unwrap();
}

#[test]
fn test_dropping_running_server_releases_listener() {
    let server = start_server();
    let port = server.port();
    let client = connect(&server);

    drop(server);

    assert!(wait_until(|| !client.is_connected()));
    assert!(wait_until(|| {
        matches!(
            ClientWrapper::new("127.0.0.1", port, 500),
            Err(Error::Connect { .. })
        )
    }));
}

#[test]
fn test_integer_arguments_accepted_for_float_parameters() {
    let server = start_server();
    let client = connect(&server);

    let sum: f64 = client.call("add", (1, 2)).unwrap();
    assert_eq!(sum, 3.0);
    let mixed: f64 = client.call("add", (10.5, 20)).unwrap();
    assert_eq!(mixed, 30.5);
}

#[test]
fn test_wait_after_peer_hangs_up_reports_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf);
    });

    let client = ClientWrapper::new("127.0.0.1", port, 2000).unwrap();
    let pending = client.async_call("sleep_ms", (200u64,)).unwrap();
    peer.join().unwrap();

    client.wait_all_responses();
    assert_eq!(client.outstanding_calls(), 0);
    let err = pending.get::<u64>().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { ref function } if function == "sleep_ms"), "{err}");
}

#[test]
fn test_pending_call_outliving_client_reports_connection_lost() {
    let server = start_server();
    let client = connect(&server);

    let pending = client.async_call("sleep_ms", (300u64,)).unwrap();
    drop(client);

    let err = pending.get::<u64>().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { .. }), "{err}");
}

#[test]
fn test_oversized_request_fails_only_that_call() {
    let server = start_server();
    let config = ClientConfig::default().max_frame_size(1024);
    let client = ClientWrapper::with_config("127.0.0.1", server.port(), config).unwrap();

    let in_flight = client.async_call("sleep_ms", (100u64,)).unwrap();
    let err = client.call::<usize, _>("len", ("x".repeat(4096),)).unwrap_err();
    assert!(matches!(err, Error::Send { ref function, .. } if function == "len"), "{err}");

    assert!(client.is_connected());
    assert_eq!(in_flight.get::<u64>().unwrap(), 100);
    let len: usize = client.call("len", ("x".repeat(16),)).unwrap();
    assert_eq!(len, 16);
}

#[test]
fn test_oversized_result_becomes_error_response() {
    let config = ServerConfig::default().max_frame_size(1024);
    let server = ServerWrapper::with_config("127.0.0.1", 0, config).unwrap();
    server.bind("repeat", |n: usize| "x".repeat(n)).unwrap();
    server.async_run(1).unwrap();
    let client = connect(&server);

    let err = client.call::<String, _>("repeat", (4096usize,)).unwrap_err();
    assert_eq!(err.remote_code(), Some("HANDLER_ERROR"), "{err}");

    assert!(client.is_connected());
    let small: String = client.call("repeat", (3usize,)).unwrap();
    assert_eq!(small, "xxx");
}

#[test]
fn test_wait_uses_timeout_from_issue_time() {
    let server = start_server();
    let client = connect(&server);

    let pending = client.async_call("sleep_ms", (300u64,)).unwrap();
    client.set_timeout(50);
    assert_eq!(pending.get::<u64>().unwrap(), 300);

    let err = client.call::<u64, _>("sleep_ms", (300u64,)).unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

#[test]
fn test_blocking_run_exit_leaves_restarted_server_running() {
    let server = Arc::new(ServerWrapper::with_address("127.0.0.1", 0).unwrap());
    bind_functions(&server);

    let runner = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };
    assert!(wait_until(|| server.is_running()));

    server.stop();
    server.async_run(1).unwrap();
    runner.join().unwrap().unwrap();

    assert!(server.is_running());
    let client = connect(&server);
    let sum: f64 = client.call("add", (1.0, 2.0)).unwrap();
    assert_eq!(sum, 3.0);
}
