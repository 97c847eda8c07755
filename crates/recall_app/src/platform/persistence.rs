use std::path::{Path, PathBuf};

use recall_core::{RulePersistence, RuleStoreError, StructuralSelector};
use recall_engine::{read_state_file, AtomicFileWriter};
use recall_logging::{recall_info, recall_warn};
use serde::{Deserialize, Serialize};

const RULES_FILENAME: &str = "taught_rules.ron";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedRules {
    /// Selectors in their textual form, e.g. `div.answer span.note`.
    rules: Vec<String>,
}

/// Keeps the taught rules in `{data_dir}/taught_rules.ron`.
#[derive(Debug)]
pub(crate) struct RonRuleFile {
    writer: AtomicFileWriter,
}

impl RonRuleFile {
    pub(crate) fn new(data_dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(data_dir),
        }
    }
}

impl RulePersistence for RonRuleFile {
    fn save(&mut self, rules: &[StructuralSelector]) -> Result<(), RuleStoreError> {
        let state = PersistedRules {
            rules: rules.iter().map(ToString::to_string).collect(),
        };
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(&state, pretty)
            .map_err(|err| RuleStoreError::Persist(err.to_string()))?;
        self.writer
            .write(RULES_FILENAME, content.as_bytes())
            .map_err(|err| RuleStoreError::Persist(err.to_string()))?;
        Ok(())
    }
}

/// Rules saved by a previous run. Unreadable files and entries are skipped.
pub(crate) fn load_taught_rules(data_dir: &Path) -> Vec<StructuralSelector> {
    let path = data_dir.join(RULES_FILENAME);
    let content = match read_state_file(&path) {
        Ok(Some(text)) => text,
        Ok(None) => return Vec::new(),
        Err(err) => {
            recall_warn!("Failed to read taught rules from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let state: PersistedRules = match ron::from_str(&content) {
        Ok(state) => state,
        Err(err) => {
            recall_warn!("Failed to parse taught rules from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let rules: Vec<StructuralSelector> = state
        .rules
        .iter()
        .filter_map(|raw| match StructuralSelector::parse(raw) {
            Ok(selector) => Some(selector),
            Err(err) => {
                recall_warn!("Dropping taught rule {:?}: {}", raw, err);
                None
            }
        })
        .collect();
    recall_info!("Loaded {} taught rules from {:?}", rules.len(), path);
    rules
}
