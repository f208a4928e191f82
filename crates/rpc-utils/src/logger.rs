//! Process-wide leveled logger.
//!
//! Messages go through `tracing`, so they interleave correctly with the
//! library's own diagnostics. The first message (or an explicit [`init`])
//! installs a global subscriber that prints
//! `[YYYY-MM-DD HH:MM:SS.mmm] [LEVEL] message` lines to stdout, in local time.
//! If the application already installed its own subscriber, that one is used
//! instead and only the threshold check below applies.

use chrono::Local;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Registry, reload};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const TARGET: &str = "rpc_utils::logger";

/// Severity of a log record, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug = 0,
    /// Normal operation.
    Info = 1,
    /// Something unexpected that did not stop the operation.
    Warning = 2,
    /// An operation failed.
    Error = 3,
}

impl LogLevel {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warning,
            _ => Self::Error,
        }
    }

    /// Upper-case name used in the output line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    /// Equivalent `tracing` filter.
    #[must_use]
    pub const fn to_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE | Level::DEBUG => Self::Debug,
            Level::INFO => Self::Info,
            Level::WARN => Self::Warning,
            Level::ERROR => Self::Error,
        }
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static RELOAD: OnceLock<Option<reload::Handle<LevelFilter, Registry>>> = OnceLock::new();

/// Install the global bracket-format subscriber.
///
/// Returns `true` if this logger owns the global subscriber. Calling it more
/// than once is harmless.
pub fn init() -> bool {
    RELOAD
        .get_or_init(|| {
            let (filter, handle) = reload::Layer::new(level().to_filter());
            let subscriber = tracing_subscriber::registry().with(filter).with(
                tracing_subscriber::fmt::layer()
                    .event_format(BracketFormat)
                    .with_writer(std::io::stdout),
            );
            tracing::subscriber::set_global_default(subscriber)
                .ok()
                .map(|()| handle)
        })
        .is_some()
}

/// Replace the process-wide threshold.
///
/// Also raises or lowers the library's internal diagnostics when this
/// logger owns the global subscriber.
pub fn set_level(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::Relaxed);
    if let Some(Some(handle)) = RELOAD.get() {
        let _ = handle.modify(|filter| *filter = level.to_filter());
    }
}

/// Current threshold.
#[must_use]
pub fn level() -> LogLevel {
    LogLevel::from_u8(THRESHOLD.load(Ordering::Relaxed))
}

/// Whether a record at `level` would be emitted.
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    level >= self::level()
}

/// Emit `message` at `level` if it passes the threshold.
pub fn log(level: LogLevel, message: impl AsRef<str>) {
    if !enabled(level) {
        return;
    }
    init();
    let message = message.as_ref();
    match level {
        LogLevel::Debug => tracing::debug!(target: TARGET, "{}", message),
        LogLevel::Info => tracing::info!(target: TARGET, "{}", message),
        LogLevel::Warning => tracing::warn!(target: TARGET, "{}", message),
        LogLevel::Error => tracing::error!(target: TARGET, "{}", message),
    }
}

/// Emit at [`LogLevel::Debug`].
pub fn debug(message: impl AsRef<str>) {
    log(LogLevel::Debug, message);
}

/// Emit at [`LogLevel::Info`].
pub fn info(message: impl AsRef<str>) {
    log(LogLevel::Info, message);
}

/// Emit at [`LogLevel::Warning`].
pub fn warning(message: impl AsRef<str>) {
    log(LogLevel::Warning, message);
}

/// Emit at [`LogLevel::Error`].
pub fn error(message: impl AsRef<str>) {
    log(LogLevel::Error, message);
}

/// `[timestamp] [LEVEL] fields` event formatter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketFormat;

impl<S, N> FormatEvent<S, N> for BracketFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = LogLevel::from(*event.metadata().level());
        write!(
            writer,
            "[{}] [{}] ",
            Local::now().format(TIMESTAMP_FORMAT),
            level
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
