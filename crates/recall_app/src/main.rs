use std::path::PathBuf;

mod platform;

const DEFAULT_CONFIG_PATH: &str = "recall.ron";

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    platform::run_app(&config_path)
}
