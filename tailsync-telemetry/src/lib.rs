//! Tracing initialization for tailsync processes.
//!
//! Production and staging processes write JSON lines to daily rolling files, development
//! processes write pretty colored output to the terminal.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::{Error, Write};
use std::panic::PanicHookInfo;
use std::sync::{Once, OnceLock};

use tailsync_config::Environment;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field name identifying the replicated table in log lines.
const TABLE_KEY_IN_LOG: &str = "table";

/// Directory receiving the rolling log files.
const LOG_DIR: &str = "logs";

/// Maximum number of rolled log files kept on disk.
const MAX_LOG_FILES: usize = 5;

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Keeps buffered log lines alive until the process exits.
///
/// The [`LogFlusher::Flusher`] variant owns the [`WorkerGuard`] of the non blocking file writer,
/// dropping it flushes pending lines.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for tests.
///
/// Does nothing unless `ENABLE_TRACING` is set:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an environment the process counts as prod and would log to files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

static TABLE_NAME: OnceLock<String> = OnceLock::new();

/// Sets the table name injected into every JSON log line.
///
/// Only the first call has an effect.
pub fn set_global_table_name(table_name: String) {
    let _ = TABLE_NAME.set(table_name);
}

/// Returns the table name injected into JSON log lines, if one was set.
pub fn get_global_table_name() -> Option<&'static str> {
    TABLE_NAME.get().map(|s| s.as_str())
}

/// Adds the `table` field to a JSON log line.
///
/// Returns [`None`] when the line is not a JSON object or already carries the field.
fn inject_table_field(line: &str, table_name: &str) -> Option<String> {
    let serde_json::Value::Object(mut map) = serde_json::from_str::<serde_json::Value>(line).ok()?
    else {
        return None;
    };

    if map.contains_key(TABLE_KEY_IN_LOG) {
        return None;
    }

    map.insert(
        TABLE_KEY_IN_LOG.to_string(),
        serde_json::Value::String(table_name.to_string()),
    );

    let modified = serde_json::to_string(&map).ok()?;
    if line.ends_with('\n') {
        Some(format!("{modified}\n"))
    } else {
        Some(modified)
    }
}

/// Writer wrapper injecting the global table name into JSON log lines.
struct TableInjectingWriter<W> {
    inner: W,
}

impl<W> TableInjectingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Write for TableInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(table_name) = get_global_table_name()
            && let Ok(line) = std::str::from_utf8(buf)
            && let Some(output) = inject_table_field(line, table_name)
        {
            // The caller only knows about its own buffer.
            self.inner.write_all(output.as_bytes())?;
            return Ok(buf.len());
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for the application.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_for_table(app_name, None)
}

/// Initializes tracing, tagging every JSON log line with the replicated table name.
pub fn init_tracing_for_table(
    app_name: &str,
    table_name: Option<String>,
) -> Result<LogFlusher, TracingError> {
    if let Some(table_name) = table_name {
        set_global_table_name(table_name);
    }

    // Routes records of libraries using the `log` crate into tracing.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();

    // `RUST_LOG` wins over the default `info` level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || TableInjectingWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Replaces the panic hook so that panics end up in the log files, then chains to the
/// previous hook.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_table_into_json_lines() {
        let line = "{\"level\":\"INFO\",\"fields\":{\"message\":\"snapshot finished\"}}\n";

        let output = inject_table_field(line, "orders").unwrap();
        assert!(output.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value["table"], "orders");
        assert_eq!(value["level"], "INFO");
    }

    #[test]
    fn leaves_existing_table_field_and_plain_text_alone() {
        assert!(inject_table_field("{\"table\":\"users\"}", "orders").is_none());
        assert!(inject_table_field("plain text line", "orders").is_none());
        assert!(inject_table_field("[1, 2, 3]", "orders").is_none());
    }

    #[test]
    fn writer_passes_through_non_json_content() {
        let mut writer = TableInjectingWriter::new(Vec::new());

        writer.write_all(b"not json").unwrap();

        assert_eq!(writer.inner, b"not json");
    }
}
