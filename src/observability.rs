//! Log output setup for applications embedding the crate.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is
//! left to the application. [`init_tracing`] is a convenience for binaries and
//! tests that want the configured format without wiring `tracing-subscriber`
//! themselves.

use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

type Base = Layered<EnvFilter, Registry>;

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Install a global subscriber for `config`.
///
/// `RUST_LOG`, when set, replaces the configured level and filter.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingError> {
    let filter = build_env_filter(config);

    match (config.format, config.timestamps) {
        (LogFormat::Compact, true) => install(
            filter,
            fmt::layer::<Base>()
                .compact()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line),
        ),
        (LogFormat::Compact, false) => install(
            filter,
            fmt::layer::<Base>()
                .compact()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .without_time(),
        ),
        (LogFormat::Pretty, true) => install(
            filter,
            fmt::layer::<Base>()
                .pretty()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line),
        ),
        (LogFormat::Pretty, false) => install(
            filter,
            fmt::layer::<Base>()
                .pretty()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .without_time(),
        ),
        (LogFormat::Json, true) => install(
            filter,
            fmt::layer::<Base>()
                .json()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line),
        ),
        (LogFormat::Json, false) => install(
            filter,
            fmt::layer::<Base>()
                .json()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .without_time(),
        ),
    }
}

fn install<L>(filter: EnvFilter, fmt_layer: L) -> Result<(), TracingError>
where
    L: Layer<Base> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_str();

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        let combined = format!("{},{}", base_level, filter);
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        EnvFilter::new(base_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    fn logging(level: LogLevel, filter: Option<&str>) -> LoggingConfig {
        LoggingConfig {
            level,
            filter: filter.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_from_level() {
        temp_env::with_var_unset("RUST_LOG", || {
            let filter = build_env_filter(&logging(LogLevel::Warn, None));
            assert_eq!(filter.to_string(), "warn");
        });
    }

    #[test]
    fn test_filter_combines_directives() {
        temp_env::with_var_unset("RUST_LOG", || {
            let filter =
                build_env_filter(&logging(LogLevel::Info, Some("seekdb_search=debug")));
            let rendered = filter.to_string();
            assert!(rendered.contains("seekdb_search=debug"));
            assert!(rendered.contains("info"));
        });
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        temp_env::with_var("RUST_LOG", Some("trace"), || {
            let filter =
                build_env_filter(&logging(LogLevel::Error, Some("seekdb_search=debug")));
            assert_eq!(filter.to_string(), "trace");
        });
    }

    #[test]
    fn test_invalid_directive_falls_back_to_level() {
        temp_env::with_var_unset("RUST_LOG", || {
            let filter = build_env_filter(&logging(LogLevel::Debug, Some("seekdb_search=loudest")));
            assert_eq!(filter.to_string(), "debug");
        });
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig {
            format: LogFormat::Json,
            timestamps: false,
            ..Default::default()
        };
        // Another test may have installed a subscriber already.
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(TracingError::Init(_))));
    }
}
