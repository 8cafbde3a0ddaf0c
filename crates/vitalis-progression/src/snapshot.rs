//! Versioned progression snapshots.
//!
//! A snapshot is keyed by content names rather than numeric ids so saves
//! survive content edits that reorder the tables. Two encodings:
//!
//! - JSON, human-readable, with a migration chain for older versions
//! - bitcode, compact, behind a magic/version header
//!
//! Version history:
//!
//! - 1: `{ save_version, timestamp, unlocked, counters }`, flat counters only
//! - 2: `{ meta, unlocked_entries, tracked_stats }` with kills, items and
//!   research

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vitalis_core::fixed::{Fixed64, f64_to_fixed64};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a binary progression save.
pub const SAVE_MAGIC: u32 = 0x5117_A150;

/// Current save version. Increment when the layout changes and register a
/// migration step.
pub const SAVE_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SAVE_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("save from future version {0} (this build supports up to {SAVE_VERSION})")]
    FutureVersion(u32),
    #[error("save version missing")]
    MissingVersion,
    #[error("no migration path from version {from} to version {to}")]
    NoMigrationPath { from: u32, to: u32 },
    #[error("migration from version {from} failed: {reason}")]
    MigrationFailed { from: u32, reason: String },
}

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMeta {
    pub save_version: u32,
    /// Seconds since the Unix epoch at capture time.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedStats {
    #[serde(default)]
    pub counters: BTreeMap<String, Fixed64>,
    #[serde(default)]
    pub kills: BTreeMap<String, u32>,
    /// Item high-water marks keyed by resource name.
    #[serde(default)]
    pub items: BTreeMap<String, u32>,
    /// Completed research by tech name.
    #[serde(default)]
    pub research: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub meta: SaveMeta,
    /// Entry names in unlock order.
    pub unlocked_entries: Vec<String>,
    pub tracked_stats: TrackedStats,
}

impl ProgressSnapshot {
    pub fn new(timestamp: u64, unlocked_entries: Vec<String>, tracked_stats: TrackedStats) -> Self {
        Self {
            meta: SaveMeta {
                save_version: SAVE_VERSION,
                timestamp,
            },
            unlocked_entries,
            tracked_stats,
        }
    }
}

/// Seconds since the Unix epoch, or zero if the clock is before it.
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

// ---------------------------------------------------------------------------
// JSON codec
// ---------------------------------------------------------------------------

pub fn to_json(snapshot: &ProgressSnapshot) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Parse a JSON save of any supported version, migrating as needed.
pub fn from_json(data: &str) -> Result<ProgressSnapshot, SnapshotError> {
    let value: Value = serde_json::from_str(data)?;
    let version = detect_version(&value)?;
    if version > SAVE_VERSION {
        return Err(SnapshotError::FutureVersion(version));
    }
    let migrated = MigrationChain::standard().migrate(value, version, SAVE_VERSION)?;
    Ok(serde_json::from_value(migrated)?)
}

/// Version 2+ nests it under `meta`; version 1 kept it at the top level.
fn detect_version(value: &Value) -> Result<u32, SnapshotError> {
    let raw = value
        .pointer("/meta/save_version")
        .or_else(|| value.get("save_version"))
        .and_then(Value::as_u64)
        .ok_or(SnapshotError::MissingVersion)?;
    u32::try_from(raw).map_err(|_| SnapshotError::FutureVersion(u32::MAX))
}

// ---------------------------------------------------------------------------
// Binary codec
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct BinarySave {
    magic: u32,
    snapshot: ProgressSnapshot,
}

pub fn to_bytes(snapshot: &ProgressSnapshot) -> Result<Vec<u8>, SnapshotError> {
    let save = BinarySave {
        magic: SAVE_MAGIC,
        snapshot: snapshot.clone(),
    };
    bitcode::serialize(&save).map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Decode a binary save. Binary saves are only written at the current
/// version; older layouts must come through JSON.
pub fn from_bytes(data: &[u8]) -> Result<ProgressSnapshot, SnapshotError> {
    let save: BinarySave =
        bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    if save.magic != SAVE_MAGIC {
        return Err(SnapshotError::InvalidMagic(save.magic));
    }
    let version = save.snapshot.meta.save_version;
    if version > SAVE_VERSION {
        return Err(SnapshotError::FutureVersion(version));
    }
    if version < SAVE_VERSION {
        return Err(SnapshotError::NoMigrationPath {
            from: version,
            to: SAVE_VERSION,
        });
    }
    Ok(save.snapshot)
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// Transforms a JSON save from version N to N + 1.
pub type MigrationFn = fn(Value) -> Result<Value, SnapshotError>;

/// Migration steps keyed by source version.
pub struct MigrationChain {
    steps: BTreeMap<u32, MigrationFn>,
}

impl MigrationChain {
    pub fn new() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// Every step this build knows about.
    pub fn standard() -> Self {
        let mut chain = Self::new();
        chain.register(1, migrate_v1_to_v2);
        chain
    }

    pub fn register(&mut self, from_version: u32, step: MigrationFn) {
        self.steps.insert(from_version, step);
    }

    pub fn can_migrate(&self, from: u32, to: u32) -> bool {
        if from >= to {
            return from == to;
        }
        (from..to).all(|v| self.steps.contains_key(&v))
    }

    pub fn migrate(&self, mut value: Value, from: u32, to: u32) -> Result<Value, SnapshotError> {
        if from > to {
            return Err(SnapshotError::NoMigrationPath { from, to });
        }
        for version in from..to {
            let step = self
                .steps
                .get(&version)
                .ok_or(SnapshotError::NoMigrationPath { from, to })?;
            value = step(value)?;
            tracing::debug!(from = version, to = version + 1, "save migrated");
        }
        Ok(value)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl Default for MigrationChain {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct SaveV1 {
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    unlocked: Vec<String>,
    #[serde(default)]
    counters: BTreeMap<String, f64>,
}

/// Version 1 stored counters as plain floats at the top level.
fn migrate_v1_to_v2(value: Value) -> Result<Value, SnapshotError> {
    let old: SaveV1 = serde_json::from_value(value).map_err(|e| SnapshotError::MigrationFailed {
        from: 1,
        reason: e.to_string(),
    })?;
    let snapshot = ProgressSnapshot {
        meta: SaveMeta {
            save_version: 2,
            timestamp: old.timestamp,
        },
        unlocked_entries: old.unlocked,
        tracked_stats: TrackedStats {
            counters: old
                .counters
                .into_iter()
                .map(|(k, v)| (k, f64_to_fixed64(v).max(Fixed64::ZERO)))
                .collect(),
            ..TrackedStats::default()
        },
    };
    Ok(serde_json::to_value(snapshot)?)
}
