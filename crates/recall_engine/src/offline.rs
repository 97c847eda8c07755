use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use recall_core::DeliveryJob;
use recall_logging::{recall_info, recall_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::{ensure_data_dir, read_state_file, AtomicFileWriter, PersistError};

pub const DEFAULT_OFFLINE_CAPACITY: usize = 100;
const OFFLINE_FILENAME: &str = "offline_jobs.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub job: DeliveryJob,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("failed to encode offline records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bounded, durable ring of jobs that ran out of delivery attempts.
///
/// The file is rewritten on every change and the in-memory ring only moves
/// forward once the write succeeded. The oldest record is evicted when full.
#[derive(Debug)]
pub struct OfflineStore {
    writer: AtomicFileWriter,
    capacity: usize,
    records: Mutex<VecDeque<OfflineRecord>>,
}

impl OfflineStore {
    /// Opens the store in `dir`, loading records left by a previous run.
    ///
    /// An unreadable file is moved aside instead of being overwritten.
    pub fn open(dir: PathBuf, capacity: usize) -> Result<Self, OfflineError> {
        ensure_data_dir(&dir)?;
        let path = dir.join(OFFLINE_FILENAME);
        let mut records: VecDeque<OfflineRecord> = match read_state_file(&path)? {
            None => VecDeque::new(),
            Some(text) => match serde_json::from_str::<Vec<OfflineRecord>>(&text) {
                Ok(records) => records.into(),
                Err(err) => {
                    recall_warn!("Offline store {:?} is unreadable: {}", path, err);
                    quarantine(&path)?;
                    VecDeque::new()
                }
            },
        };

        let capacity = capacity.max(1);
        while records.len() > capacity {
            records.pop_front();
        }
        if !records.is_empty() {
            recall_info!("Loaded {} offline records from {:?}", records.len(), path);
        }

        Ok(Self {
            writer: AtomicFileWriter::new(dir),
            capacity,
            records: Mutex::new(records),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn records(&self) -> Vec<OfflineRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn path(&self) -> PathBuf {
        self.writer.dir().join(OFFLINE_FILENAME)
    }

    /// Appends a record; returns the evicted oldest record when the ring was full.
    pub fn spill(
        &self,
        job: DeliveryJob,
        now: DateTime<Utc>,
    ) -> Result<Option<OfflineRecord>, OfflineError> {
        let mut records = self.records.lock();
        let mut next = records.clone();
        next.push_back(OfflineRecord { job, saved_at: now });
        let evicted = if next.len() > self.capacity {
            next.pop_front()
        } else {
            None
        };
        self.write(&next)?;
        *records = next;
        if let Some(old) = &evicted {
            recall_warn!(
                "Offline store full, evicted {} saved at {}",
                old.job,
                old.saved_at
            );
        }
        Ok(evicted)
    }

    /// Empties the ring and hands back everything it held, oldest first.
    pub fn take_all(&self) -> Result<Vec<OfflineRecord>, OfflineError> {
        let mut records = self.records.lock();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.write(&VecDeque::new())?;
        Ok(records.drain(..).collect())
    }

    fn write(&self, records: &VecDeque<OfflineRecord>) -> Result<(), OfflineError> {
        let encoded = serde_json::to_vec_pretty(records)?;
        self.writer.write(OFFLINE_FILENAME, &encoded)?;
        Ok(())
    }
}

fn quarantine(path: &Path) -> Result<(), PersistError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let aside = path.with_extension(format!("json.corrupt-{stamp}"));
    fs::rename(path, &aside)?;
    recall_warn!("Moved unreadable offline store to {:?}", aside);
    Ok(())
}
