use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use finality_core::participant::ParticipantId;

/// A persisted permanent-failure flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRecord {
    pub participant: ParticipantId,
    pub name: String,
    pub reason: String,
    pub recorded_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Io(String),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Corrupt(e) => write!(f, "corrupt penalty file: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Durable storage for permanent-failure flags.
pub trait PenaltyStore {
    fn is_flagged(&self, participant: ParticipantId) -> bool;

    /// Flag a participant. Re-flagging keeps the original record.
    fn flag(&mut self, record: PenaltyRecord) -> Result<(), StoreError>;

    /// Remove a flag. Returns whether one was present.
    fn clear(&mut self, participant: ParticipantId) -> Result<bool, StoreError>;

    fn flagged_count(&self) -> usize;
}

/// Volatile store, used in tests and when no path is configured.
#[derive(Debug, Default)]
pub struct MemoryPenaltyStore {
    records: BTreeMap<ParticipantId, PenaltyRecord>,
}

impl MemoryPenaltyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, participant: ParticipantId) -> Option<&PenaltyRecord> {
        self.records.get(&participant)
    }
}

impl PenaltyStore for MemoryPenaltyStore {
    fn is_flagged(&self, participant: ParticipantId) -> bool {
        self.records.contains_key(&participant)
    }

    fn flag(&mut self, record: PenaltyRecord) -> Result<(), StoreError> {
        self.records.entry(record.participant).or_insert(record);
        Ok(())
    }

    fn clear(&mut self, participant: ParticipantId) -> Result<bool, StoreError> {
        Ok(self.records.remove(&participant).is_some())
    }

    fn flagged_count(&self) -> usize {
        self.records.len()
    }
}

/// JSON-file backed store. Every mutation rewrites the whole file through a
/// temp file and a rename.
#[derive(Debug)]
pub struct FilePenaltyStore {
    path: PathBuf,
    records: BTreeMap<ParticipantId, PenaltyRecord>,
}

impl FilePenaltyStore {
    /// Open the store at `path`, loading existing flags. A missing file is an
    /// empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let list: Vec<PenaltyRecord> = serde_json::from_str(&content)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                list.into_iter().map(|r| (r.participant, r)).collect()
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), flagged = records.len(), "Penalty store opened");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` to disk. The temp file is synced before the rename.
    fn persist(&self, records: &BTreeMap<ParticipantId, PenaltyRecord>) -> Result<(), StoreError> {
        let list: Vec<&PenaltyRecord> = records.values().collect();
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PenaltyStore for FilePenaltyStore {
    fn is_flagged(&self, participant: ParticipantId) -> bool {
        self.records.contains_key(&participant)
    }

    /// Memory only changes once the file has been written.
    fn flag(&mut self, record: PenaltyRecord) -> Result<(), StoreError> {
        if self.records.contains_key(&record.participant) {
            return Ok(());
        }
        let mut next = self.records.clone();
        next.insert(record.participant, record);
        self.persist(&next)?;
        self.records = next;
        Ok(())
    }

    fn clear(&mut self, participant: ParticipantId) -> Result<bool, StoreError> {
        if !self.records.contains_key(&participant) {
            return Ok(false);
        }
        let mut next = self.records.clone();
        next.remove(&participant);
        self.persist(&next)?;
        self.records = next;
        Ok(true)
    }

    fn flagged_count(&self) -> usize {
        self.records.len()
    }
}

/// Either backend, chosen at startup from configuration.
#[derive(Debug)]
pub enum AnyPenaltyStore {
    Memory(MemoryPenaltyStore),
    File(FilePenaltyStore),
}

impl PenaltyStore for AnyPenaltyStore {
    fn is_flagged(&self, participant: ParticipantId) -> bool {
        match self {
            Self::Memory(s) => s.is_flagged(participant),
            Self::File(s) => s.is_flagged(participant),
        }
    }

    fn flag(&mut self, record: PenaltyRecord) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.flag(record),
            Self::File(s) => s.flag(record),
        }
    }

    fn clear(&mut self, participant: ParticipantId) -> Result<bool, StoreError> {
        match self {
            Self::Memory(s) => s.clear(participant),
            Self::File(s) => s.clear(participant),
        }
    }

    fn flagged_count(&self) -> usize {
        match self {
            Self::Memory(s) => s.flagged_count(),
            Self::File(s) => s.flagged_count(),
        }
    }
}
