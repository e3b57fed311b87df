use anyhow::Context;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging. RUST_LOG overrides `level` when set.
pub fn init_logger(level: &str, json_output: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {level:?}"))?;

    let registry = tracing_subscriber::registry().with(filter);

    match (json_output, log_file) {
        (true, Some(path)) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            registry.with(fmt::layer().json().with_writer(file)).try_init()?;
        }
        (true, None) => registry.with(fmt::layer().json()).try_init()?,
        (false, _) => registry.with(fmt::layer().pretty()).try_init()?,
    }

    Ok(())
}

/// Initialize logger from config
pub fn init_from_config(config: &crate::utils::config::LoggingConfig) -> anyhow::Result<()> {
    let json = config.output == "json";
    let log_file = (!config.file_path.is_empty()).then(|| Path::new(&config.file_path));
    init_logger(&config.level, json, log_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritable_log_file() {
        let result = init_logger("info", true, Some(Path::new("/nonexistent/dir/signals.log")));
        assert!(result.is_err());
    }
}
