use crate::config::ServerConfig;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    prelude::*,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "vdcgate";

/// Filter used when `RUST_LOG` is unset: `level` for the vdcgate crates,
/// warnings from everything else.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!(
        "vdcgate_server={level},vdcgate_transport={level},vdcgate_core={level},warn",
        level = level
    )
}

/// Console logging to stderr plus a daily rolling file under
/// `config.log_dir`, text or JSON lines depending on `config.log_json`.
pub fn init_logging(config: &ServerConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(if config.log_json { "json" } else { "log" })
        .build(&config.log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.log_level)));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr);

    let (text_file, json_file) = if config.log_json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(file_writer);
        (None, Some(layer))
    } else {
        let layer = fmt::layer()
            .with_ansi(false)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(file_writer);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_file)
        .with(json_file)
        .try_init()?;

    // flushes the file writer on drop; the gateway logs until exit
    std::mem::forget(guard);

    tracing::info!(
        dir = %config.log_dir.display(),
        level = %config.log_level,
        json = config.log_json,
        "Gateway logging started"
    );
    Ok(())
}

/// Console-only logging for tests; later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directives(Level::DEBUG))),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_follow_level() {
        let directives = default_directives(Level::DEBUG);
        assert_eq!(
            directives,
            "vdcgate_server=debug,vdcgate_transport=debug,vdcgate_core=debug,warn"
        );
        assert!(EnvFilter::try_new(&directives).is_ok());
        assert!(EnvFilter::try_new(default_directives(Level::TRACE)).is_ok());
    }
}
