//! Logging configuration

use std::str::FromStr;
use std::sync::LazyLock;
use tracing_subscriber::{
    fmt, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError, EnvFilter,
};

static HOSTNAME: LazyLock<String> = LazyLock::new(|| {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// Compact plus host name and resident memory at startup.
    Detailed,
    /// Needs the `json` feature; otherwise falls back to `Detailed`.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "detailed" => Ok(LogFormat::Detailed),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{}`", other)),
        }
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn memory_usage() -> String {
    use sysinfo::{Pid, System};

    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_process(pid);
    match system.process(pid) {
        Some(process) => format!("{:.1}M", process.memory() as f64 / (1024.0 * 1024.0)),
        None => "N/A".to_string(),
    }
}

pub fn hostname() -> &'static str {
    &HOSTNAME
}

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(format: LogFormat) -> Result<(), TryInitError> {
    dotenvy::dotenv().ok();
    match format {
        LogFormat::Compact => init_logger(),
        LogFormat::Detailed => init_logger_detailed(),
        #[cfg(feature = "json")]
        LogFormat::Json => init_logger_json(),
        #[cfg(not(feature = "json"))]
        LogFormat::Json => {
            init_logger_detailed()?;
            tracing::warn!("Built without the `json` feature, using detailed logs");
            Ok(())
        }
    }
}

pub fn init_logger() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .with_target(false)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .try_init()?;

    tracing::info!("Logger initialized");
    Ok(())
}

pub fn init_logger_detailed() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .compact(),
        )
        .try_init()?;

    tracing::info!(
        hostname = %hostname(),
        memory = %memory_usage(),
        "Logger initialized (detailed format)"
    );
    Ok(())
}

#[cfg(feature = "json")]
pub fn init_logger_json() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .try_init()?;

    tracing::info!(hostname = %hostname(), "Logger initialized (JSON format)");
    Ok(())
}

#[cfg(test)]
pub fn init_test_logger() {
    use tracing_subscriber::fmt::TestWriter;

    let _ = tracing_subscriber::registry()
        .with(env_filter("error"))
        .with(
            fmt::layer()
                .with_writer(TestWriter::default())
                .with_target(false)
                .with_ansi(false)
                .compact(),
        )
        .try_init();
}

/// Logs an event tagged with host name and current memory use.
#[macro_export]
macro_rules! log_with_context {
    ($level:ident, $($arg:tt)*) => {
        {
            tracing::$level!(
                hostname = %$crate::logger::hostname(),
                memory = %$crate::logger::memory_usage(),
                $($arg)*
            );
        }
    };
}
