//! Walkthrough run by the example client against the demo service.

use crate::error::Error;
use rpc_utils::{ClientWrapper, Timer, logger};

const SEPARATOR: &str = "----------------------------------------";

/// Values observed while running the walkthrough.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    /// `add(10.5, 20.3)`
    pub sum: f64,
    /// `subtract(50.0, 20.0)`
    pub difference: f64,
    /// `multiply(5.0, 6.0)`
    pub product: f64,
    /// `square(7.0)`
    pub square: f64,
    /// `greet("World")`
    pub greeting: String,
    /// `add(100.0, 200.0)`, `multiply(10.0, 20.0)` and `square(15.0)`, issued
    /// together as async calls.
    pub async_results: [f64; 3],
    /// Error returned by `divide(10.0, 0.0)`, if any.
    pub divide_error: Option<String>,
}

fn timed<T>(label: &str, f: impl FnOnce() -> rpc_utils::Result<T>) -> Result<T, Error>
where
    T: std::fmt::Debug,
{
    let timer = Timer::start();
    let value = f()?;
    logger::info(format!(
        "{label} = {value:?} (took {:.3} ms)",
        timer.elapsed_ms()
    ));
    Ok(value)
}

/// Exercise every demo function through `client`.
///
/// # Errors
///
/// Returns the first call failure other than the expected division error.
pub fn run_scenario(client: &ClientWrapper) -> Result<ScenarioReport, Error> {
    logger::info(SEPARATOR);
    logger::info("Testing arithmetic operations:");
    let sum = timed("add(10.5, 20.3)", || client.call("add", (10.5, 20.3)))?;
    let difference = timed("subtract(50.0, 20.0)", || {
        client.call("subtract", (50.0, 20.0))
    })?;
    let product = timed("multiply(5.0, 6.0)", || client.call("multiply", (5.0, 6.0)))?;
    let square = timed("square(7.0)", || client.call("square", (7.0,)))?;

    logger::info(SEPARATOR);
    logger::info("Testing string operations:");
    let greeting: String = timed("greet(\"World\")", || client.call("greet", ("World",)))?;

    logger::info(SEPARATOR);
    logger::info("Testing async calls:");
    let timer = Timer::start();
    let first = client.async_call("add", (100.0, 200.0))?;
    let second = client.async_call("multiply", (10.0, 20.0))?;
    let third = client.async_call("square", (15.0,))?;
    let async_results = [first.get()?, second.get()?, third.get()?];
    logger::info("async_call results:");
    logger::info(format!("  add(100.0, 200.0) = {}", async_results[0]));
    logger::info(format!("  multiply(10.0, 20.0) = {}", async_results[1]));
    logger::info(format!("  square(15.0) = {}", async_results[2]));
    logger::info(format!(
        "  All async calls took {:.3} ms total",
        timer.elapsed_ms()
    ));

    logger::info(SEPARATOR);
    logger::info("Testing notifications:");
    client.send_notification("log_message", ("This is a test notification",));
    logger::info("Notification sent");

    logger::info(SEPARATOR);
    logger::info("Testing error handling:");
    let divide_error = match client.call::<f64, _>("divide", (10.0, 0.0)) {
        Ok(_) => {
            logger::error("Division by zero did not fail");
            None
        }
        Err(e) => {
            logger::info(format!("Caught expected error: {e}"));
            Some(e.to_string())
        }
    };

    logger::info(SEPARATOR);
    logger::info("Testing timeout:");
    client.set_timeout(1000);
    logger::info("Timeout set to 1000ms");

    logger::info(SEPARATOR);
    client.wait_all_responses();
    logger::info("All tests completed successfully!");

    Ok(ScenarioReport {
        sum,
        difference,
        product,
        square,
        greeting,
        async_results,
        divide_error,
    })
}
