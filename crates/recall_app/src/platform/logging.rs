//! Platform logging initialization for recall_app.
//!
//! stdout is reserved for the event stream, so terminal output goes to stderr.

use recall_logging::LogDestination;

use super::config::{LogConfig, LogTarget};

pub(crate) fn initialize(config: &LogConfig) {
    let destination = destination(config);
    if !recall_logging::initialize(destination, config.level.into()) {
        eprintln!("Warning: logging disabled, could not install logger");
    }
}

fn destination(config: &LogConfig) -> LogDestination {
    match config.target {
        LogTarget::Terminal => LogDestination::Terminal,
        LogTarget::File => LogDestination::File(config.file.clone()),
        LogTarget::Both => LogDestination::Both(config.file.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::platform::config::LogLevel;

    #[test]
    fn file_targets_carry_the_configured_path() {
        let config = LogConfig {
            target: LogTarget::Both,
            level: LogLevel::Warn,
            file: PathBuf::from("logs/recall.log"),
        };
        assert_eq!(
            destination(&config),
            LogDestination::Both(PathBuf::from("logs/recall.log"))
        );
    }
}
