//! Logging for capsync execution contexts
//!
//! Each context (coordinator, panel, page agent) runs in its own process and
//! writes its own daily-rotated file, `capsync-<context>.log`, under
//! `$XDG_STATE_HOME/capsync/` unless `[logging] directory` points elsewhere.

use crate::config::LoggingConfig;
use std::fmt;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self as tracing_fmt, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// The execution context a process is logging for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogContext {
    Coordinator,
    Panel,
    PageAgent,
}

impl LogContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogContext::Coordinator => "coordinator",
            LogContext::Panel => "panel",
            LogContext::PageAgent => "agent",
        }
    }

    /// Base file name; the appender adds a date suffix on rotation
    pub fn file_name(&self) -> String {
        format!("capsync-{}.log", self.as_str())
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initialize logging for one execution context
///
/// Sets up tracing with:
/// - A per-context file in the configured log directory
/// - Daily rotation through a non-blocking writer
/// - The configured level, overridable by `RUST_LOG`
pub fn init(config: &LoggingConfig, context: LogContext) -> crate::error::Result<LoggingGuard> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, context.file_name());
    // Writes happen on a worker thread; the guard flushes it on drop.
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Plain text with source locations; store and routing logs come from
    // several tasks, so thread ids are kept.
    let file_layer = tracing_fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::error::Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        context = %context,
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        context,
        _guard: guard,
    })
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Keeps the file writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    context: LogContext,
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl LoggingGuard {
    pub fn context(&self) -> LogContext {
        self.context
    }
}

/// Where a context's current log file lives
pub fn log_file_path(config: &LoggingConfig, context: LogContext) -> PathBuf {
    config.log_dir().join(context.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_context_has_its_own_file() {
        let config = LoggingConfig::default();
        let panel = log_file_path(&config, LogContext::Panel);
        let agent = log_file_path(&config, LogContext::PageAgent);
        assert!(panel.ends_with("capsync/capsync-panel.log"));
        assert!(agent.ends_with("capsync/capsync-agent.log"));
        assert_eq!(panel.parent(), agent.parent());
    }

    #[test]
    fn test_directory_override() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/tmp/capsync-logs")),
            ..Default::default()
        };
        assert_eq!(
            log_file_path(&config, LogContext::Coordinator),
            PathBuf::from("/tmp/capsync-logs/capsync-coordinator.log")
        );
    }

    #[test]
    fn test_init_test_is_repeatable() {
        init_test();
        init_test();
        tracing::debug!(context = %LogContext::Panel, "test logging still works");
    }
}
