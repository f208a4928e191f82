//! Advisory endpoint checks.
//!
//! These are deliberately lax: an IPv4 literal only has to have the right
//! shape, and a hostname only has to use hostname characters. Nothing in the
//! client or server calls them.

use regex::Regex;
use std::sync::LazyLock;

/// Port used by the demo programs when none is given.
pub const DEFAULT_PORT: u16 = 8080;

// Dotted quad, digits only, no range check
static IPV4_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}$").unwrap()
});

static HOSTNAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+$").unwrap());

/// Whether `host` looks like a dotted-quad address or a plain hostname.
///
/// No octet range check is done, so `"256.1.1.1"` passes.
#[must_use]
pub fn is_valid_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    IPV4_SHAPE.is_match(host) || HOSTNAME_CHARS.is_match(host)
}

/// Whether `port` is usable; only zero is rejected.
#[must_use]
pub const fn is_valid_port(port: u16) -> bool {
    port > 0
}

/// The default service port.
#[must_use]
pub const fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Standard message for a failed RPC function.
#[must_use]
pub fn format_error(function: &str, message: &str) -> String {
    format!("Error in RPC function '{function}': {message}")
}
