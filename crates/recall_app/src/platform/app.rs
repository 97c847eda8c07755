use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;

use anyhow::Context;
use recall_core::RuleStore;
use recall_engine::{EngineCommand, EngineCommands, EngineHandle};
use recall_logging::{recall_error, recall_info, recall_warn};

use super::host::parse_line;
use super::persistence::{load_taught_rules, RonRuleFile};
use super::{config, logging};

/// Runs the host bridge until stdin closes or the host sends `shutdown`.
///
/// Host messages are read as JSON lines from stdin; every pipeline event is
/// written as one JSON line to stdout.
pub fn run_app(config_path: &Path) -> anyhow::Result<()> {
    let config = config::load(config_path)?;
    logging::initialize(&config.log);
    recall_info!("Starting recall bridge with config {:?}", config_path);

    let rules = RuleStore::new(
        load_taught_rules(&config.data_dir),
        Box::new(RonRuleFile::new(config.data_dir.clone())),
    );
    let engine = EngineHandle::start(config.to_engine_config(), rules)
        .context("failed to start the capture engine")?;

    let commands = engine.commands();
    thread::Builder::new()
        .name("recall-stdin".to_string())
        .spawn(move || read_host_messages(io::stdin().lock(), &commands))
        .context("failed to start the stdin reader")?;

    let stdout = io::stdout();
    while let Some(event) = engine.recv() {
        let line = serde_json::to_string(&event).context("failed to encode event")?;
        let mut out = stdout.lock();
        if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
            recall_warn!("stdout closed, stopping");
            break;
        }
    }

    engine.shutdown();
    recall_info!("Recall bridge stopped");
    Ok(())
}

fn read_host_messages(input: impl BufRead, commands: &EngineCommands) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                recall_error!("Failed to read from stdin: {}", err);
                break;
            }
        };
        match parse_line(&line) {
            None => {}
            Some(Ok(command)) => {
                let stop = matches!(command, EngineCommand::Shutdown);
                if !commands.send(command) || stop {
                    return;
                }
            }
            Some(Err(err)) => recall_warn!("Ignoring host message: {}", err),
        }
    }
    commands.send(EngineCommand::Shutdown);
}
