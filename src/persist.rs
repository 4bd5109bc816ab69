//! Durable snapshot persistence for the conflict set.
//!
//! Only the conflict keys and their declaration timestamps are durable.
//! Ally rosters, pending invites, grace clocks, and bypass votes are
//! deliberately transient: a restart keeps every conflict alive but
//! forgets in-flight negotiation, so parties re-vote and allies re-join.
//!
//! Two on-disk formats are accepted:
//! - the versioned document (`{"wars": .., "starts": ..}`) carrying
//!   explicit declaration timestamps, which is the only format written;
//! - the legacy flat mapping (`{"<initiator>": ["<target>", ..]}`) with
//!   no timing data, migrated on load by backdating every conflict one
//!   full grace duration so its grace is already elapsed.
//!
//! Corruption on load falls back to an empty state; a failed write never
//! rolls back the in-memory store.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictKey;
use crate::error::PersistError;

/// One persisted conflict: its key and declaration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictSeed {
    /// The ordered conflict key.
    pub key: ConflictKey,
    /// Declaration time to restore grace arithmetic from.
    pub declared_at: DateTime<Utc>,
}

/// Storage backend for conflict snapshots.
///
/// Implementations must not panic; all failure is reported through
/// [`PersistError`] and treated as non-fatal by the store.
pub trait SnapshotArchive: Send + Sync {
    /// Loads the persisted conflict set.
    ///
    /// Returns `Ok(None)` when no snapshot has ever been written. The
    /// `now` / `grace` pair feeds the legacy backdating rule.
    ///
    /// # Errors
    /// [`PersistError::Corrupt`] when a snapshot exists but matches no
    /// known format; [`PersistError::Io`] when it cannot be read.
    fn load(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Option<Vec<ConflictSeed>>, PersistError>;

    /// Replaces the snapshot with the given conflict set.
    ///
    /// # Errors
    /// [`PersistError::Io`] / [`PersistError::Encode`] on failure; the
    /// caller keeps its in-memory state either way.
    fn save(&self, seeds: &[ConflictSeed]) -> Result<(), PersistError>;
}

/// Versioned snapshot document. The write path always emits this shape.
#[derive(Debug, Serialize, Deserialize)]
struct VersionedSave {
    /// initiator -> set of targets.
    wars: BTreeMap<String, BTreeSet<String>>,
    /// "initiator:target" -> declaration epoch millis.
    #[serde(default)]
    starts: BTreeMap<String, i64>,
}

/// On-disk document, sniffed by shape.
///
/// `Versioned` is tried first. A legacy file cannot satisfy the required
/// `wars` field and falls through to the flat mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SaveDocument {
    Versioned(VersionedSave),
    Legacy(BTreeMap<String, BTreeSet<String>>),
}

impl SaveDocument {
    /// Decodes the document into conflict seeds, applying the legacy
    /// backdating migration where timing data is absent.
    fn into_seeds(
        self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Vec<ConflictSeed>, PersistError> {
        let backdated = now - grace;
        let (wars, starts) = match self {
            Self::Versioned(save) => (save.wars, save.starts),
            Self::Legacy(wars) => (wars, BTreeMap::new()),
        };

        let mut seeds = Vec::new();
        for (initiator, targets) in wars {
            let initiator = parse_principal(&initiator)?;
            for target in targets {
                let target = parse_principal(&target)?;
                let key = ConflictKey::new(initiator, target);
                let declared_at = match starts.get(&key.to_string()) {
                    Some(&millis) => millis_to_utc(millis)?,
                    // No timestamp recorded for this pair: treat its
                    // grace as already served across the restart.
                    None => backdated,
                };
                seeds.push(ConflictSeed { key, declared_at });
            }
        }
        seeds.sort_by_key(|seed| seed.key);
        Ok(seeds)
    }
}

fn parse_principal(raw: &str) -> Result<crate::principal::PrincipalId, PersistError> {
    raw.parse().map_err(|_| PersistError::Corrupt {
        reason: format!("invalid principal id in snapshot: {raw}"),
    })
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, PersistError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PersistError::Corrupt {
            reason: format!("declaration timestamp out of range: {millis}"),
        })
}

fn to_document(seeds: &[ConflictSeed]) -> VersionedSave {
    let mut wars: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut starts = BTreeMap::new();
    for seed in seeds {
        wars.entry(seed.key.initiator.to_string())
            .or_default()
            .insert(seed.key.target.to_string());
        starts.insert(seed.key.to_string(), seed.declared_at.timestamp_millis());
    }
    VersionedSave { wars, starts }
}

/// JSON file snapshot archive.
#[derive(Debug)]
pub struct JsonSnapshotArchive {
    path: PathBuf,
}

impl JsonSnapshotArchive {
    /// Creates an archive backed by the given file path. The file is
    /// created on the first save.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotArchive for JsonSnapshotArchive {
    fn load(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Option<Vec<ConflictSeed>>, PersistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::Io(e)),
        };

        let document: SaveDocument =
            serde_json::from_str(&raw).map_err(|e| PersistError::Corrupt {
                reason: e.to_string(),
            })?;
        document.into_seeds(now, grace).map(Some)
    }

    fn save(&self, seeds: &[ConflictSeed]) -> Result<(), PersistError> {
        let document = to_document(seeds);
        let json = serde_json::to_string_pretty(&document)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

/// In-memory snapshot archive for tests and ephemeral embedding.
///
/// Records every save and can be told to fail writes, which is how the
/// write-failure tolerance of the store is exercised.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    slot: Mutex<Option<Vec<ConflictSeed>>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryArchive {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last saved conflict set, if any.
    #[must_use]
    pub fn saved(&self) -> Option<Vec<ConflictSeed>> {
        self.slot.lock().map(|slot| slot.clone()).unwrap_or(None)
    }

    /// Makes subsequent saves fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Pre-loads the archive with a conflict set, as if restored from a
    /// previous run.
    pub fn preload(&self, seeds: Vec<ConflictSeed>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(seeds);
        }
    }
}

impl SnapshotArchive for MemoryArchive {
    fn load(
        &self,
        _now: DateTime<Utc>,
        _grace: Duration,
    ) -> Result<Option<Vec<ConflictSeed>>, PersistError> {
        Ok(self.slot.lock().map(|slot| slot.clone()).unwrap_or(None))
    }

    fn save(&self, seeds: &[ConflictSeed]) -> Result<(), PersistError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistError::Io(std::io::Error::other(
                "simulated write failure",
            )));
        }
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(seeds.to_vec());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
