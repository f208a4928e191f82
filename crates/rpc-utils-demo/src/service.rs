//! Functions exposed by the example server.

use rpc_utils::{ServerWrapper, logger};

/// Failures reported by the arithmetic functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    /// The divisor was zero.
    #[error("Division by zero")]
    DivisionByZero,
}

/// Name and signature of every function [`register_demo_functions`] binds.
pub const FUNCTIONS: &[(&str, &str)] = &[
    ("add", "add(f64, f64) -> f64"),
    ("subtract", "subtract(f64, f64) -> f64"),
    ("multiply", "multiply(f64, f64) -> f64"),
    ("divide", "divide(f64, f64) -> f64"),
    ("greet", "greet(String) -> String"),
    ("log_message", "log_message(String) -> ()"),
    ("square", "square(f64) -> f64"),
    ("shutdown", "shutdown() -> ()"),
];

/// Sum of `a` and `b`.
#[must_use]
pub fn add(a: f64, b: f64) -> f64 {
    logger::debug(format!("add({a}, {b})"));
    a + b
}

/// Difference of `a` and `b`.
#[must_use]
pub fn subtract(a: f64, b: f64) -> f64 {
    logger::debug(format!("subtract({a}, {b})"));
    a - b
}

/// Product of `a` and `b`.
#[must_use]
pub fn multiply(a: f64, b: f64) -> f64 {
    logger::debug(format!("multiply({a}, {b})"));
    a * b
}

/// Quotient of `a` and `b`.
///
/// # Errors
///
/// Returns [`ArithmeticError::DivisionByZero`] when `b` is zero.
pub fn divide(a: f64, b: f64) -> Result<f64, ArithmeticError> {
    logger::debug(format!("divide({a}, {b})"));
    if b == 0.0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    Ok(a / b)
}

/// Square of `x`.
#[must_use]
pub fn square(x: f64) -> f64 {
    logger::debug(format!("square({x})"));
    x * x
}

/// Greeting for `name`.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn greet(name: String) -> String {
    logger::debug(format!("greet({name})"));
    format!("Hello, {name}!")
}

/// Log a message sent by a client.
#[allow(clippy::needless_pass_by_value)]
pub fn log_message(message: String) {
    logger::info(format!("Received message: {message}"));
}

/// Bind every demo function on `server`, including `shutdown`, which stops
/// that server.
///
/// # Errors
///
/// Returns an error if any of the names is already bound.
pub fn register_demo_functions(server: &ServerWrapper) -> rpc_utils::Result<()> {
    server.bind("add", add)?;
    server.bind("subtract", subtract)?;
    server.bind("multiply", multiply)?;
    server.bind_fallible("divide", divide)?;
    server.bind("greet", greet)?;
    server.bind("log_message", log_message)?;
    server.bind("square", square)?;

    let stop = server.stop_handle();
    server.bind("shutdown", move || {
        logger::info("Shutdown requested via RPC");
        stop.stop();
    })?;

    Ok(())
}
