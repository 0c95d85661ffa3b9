//! SHA-256 hash-chained append-only log.
//!
//! Every entry's hash commits to its own canonical JSON representation and
//! to the previous entry's hash, so altering any entry (or deleting a
//! suffix) is detectable by replaying the chain. Physical storage is
//! abstracted behind [`LogBackend`] so the chain and hashing logic can be
//! exercised against an in-memory backend in tests without touching disk.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::domain::error::LogError;

/// The hash a freshly created log chains its first entry from: 64 zero
/// characters, matching the width of a hex-encoded SHA-256 digest.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single entry in the immutable log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub prev_hash: String,
    pub hash: String,
}

/// A rotation boundary marker written between segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentBoundary {
    segment_boundary: bool,
    last_hash: String,
}

/// Canonicalizes a value to a JSON string with recursively sorted object
/// keys and no insignificant whitespace, so identical logical content
/// always hashes to the same bytes.
fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: BTreeMap<String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::Value::Object(sorted.into_iter().collect())
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).expect("canonicalized value always serializes")
}

fn compute_hash(prev_hash: &str, canonical_body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical_body.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_body(entry: &LogEntry) -> serde_json::Value {
    serde_json::json!({
        "id": entry.id,
        "timestamp": entry.timestamp,
        "actor": entry.actor,
        "action": entry.action,
        "resource": entry.resource,
        "decision": entry.decision,
        "metadata": entry.metadata,
        "prev_hash": entry.prev_hash,
    })
}

/// Physical storage for the log's segments. [`FileLogBackend`] is the
/// production backend; [`MemoryLogBackend`] substitutes for it in tests
/// that want hash-chain behavior without touching the filesystem. Both
/// backends only ever do blocking work, so the trait stays synchronous;
/// [`ImmutableLog`] holds it behind a `tokio::sync::Mutex` like every
/// other piece of shared state in this crate.
pub trait LogBackend: Send + Sync {
    /// Append one already-serialized JSON line to the active segment.
    fn append_line(&mut self, line: &str) -> Result<(), LogError>;

    /// Close the active segment and begin a new one.
    fn rotate(&mut self) -> Result<(), LogError>;

    /// Every line across every segment, in write order, boundary
    /// markers included.
    fn read_all_lines(&self) -> Result<Vec<String>, LogError>;

    fn segment_count(&self) -> usize;
}

/// Append-only `.jsonl` file storage with rotation onto sibling files
/// (`path.0.jsonl`, `path.1.jsonl`, ...).
pub struct FileLogBackend {
    path: PathBuf,
    file: std::fs::File,
    segment_paths: Vec<PathBuf>,
}

impl FileLogBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            segment_paths: vec![path.clone()],
            path,
            file,
        })
    }
}

impl LogBackend for FileLogBackend {
    fn append_line(&mut self, line: &str) -> Result<(), LogError> {
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), LogError> {
        let segment_index = self.segment_paths.len();
        let next_path = self.path.with_extension(format!("{segment_index}.jsonl"));
        self.file = std::fs::OpenOptions::new().create(true).append(true).open(&next_path)?;
        self.segment_paths.push(next_path);
        Ok(())
    }

    fn read_all_lines(&self) -> Result<Vec<String>, LogError> {
        let mut lines = Vec::new();
        for segment in &self.segment_paths {
            if !segment.exists() {
                continue;
            }
            let content = std::fs::read_to_string(segment)?;
            lines.extend(content.lines().map(str::to_string));
        }
        Ok(lines)
    }

    fn segment_count(&self) -> usize {
        self.segment_paths.len()
    }
}

/// In-memory backend for tests: one `Vec<String>` per segment.
#[derive(Default)]
pub struct MemoryLogBackend {
    segments: Vec<Vec<String>>,
}

impl MemoryLogBackend {
    pub fn new() -> Self {
        Self {
            segments: vec![Vec::new()],
        }
    }
}

impl LogBackend for MemoryLogBackend {
    fn append_line(&mut self, line: &str) -> Result<(), LogError> {
        self.segments
            .last_mut()
            .expect("a memory backend always has at least one open segment")
            .push(line.to_string());
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), LogError> {
        self.segments.push(Vec::new());
        Ok(())
    }

    fn read_all_lines(&self) -> Result<Vec<String>, LogError> {
        Ok(self.segments.iter().flatten().cloned().collect())
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

struct ChainState<B: LogBackend> {
    backend: B,
    entries_in_segment: u64,
    last_hash: String,
    next_id: u64,
}

/// Append-only, hash-chained log over a pluggable [`LogBackend`].
pub struct ImmutableLog<B: LogBackend = FileLogBackend> {
    max_entries_per_segment: Option<u64>,
    state: Mutex<ChainState<B>>,
}

fn parse_lines(lines: &[String]) -> Result<Vec<LogEntry>, LogError> {
    let mut entries = Vec::new();
    for (line_no, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if serde_json::from_str::<SegmentBoundary>(line).is_ok() {
            continue;
        }
        let entry: LogEntry = serde_json::from_str(line).map_err(|_| LogError::Malformed {
            id: line_no as u64,
            reason: "entry did not parse as valid JSON".to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

impl ImmutableLog<FileLogBackend> {
    /// Open (creating if absent) a log rooted at `path`.
    pub fn open(path: impl AsRef<Path>, max_entries_per_segment: Option<u64>) -> Result<Self, LogError> {
        Self::from_backend(FileLogBackend::open(path)?, max_entries_per_segment)
    }
}

impl ImmutableLog<MemoryLogBackend> {
    /// Construct a log backed entirely by memory, for tests.
    pub fn in_memory(max_entries_per_segment: Option<u64>) -> Self {
        Self::from_backend(MemoryLogBackend::new(), max_entries_per_segment)
            .expect("a fresh in-memory backend never fails recovery")
    }
}

impl<B: LogBackend> ImmutableLog<B> {
    /// Build a log over any backend, recovering chain state from
    /// whatever entries it already contains.
    pub fn from_backend(backend: B, max_entries_per_segment: Option<u64>) -> Result<Self, LogError> {
        let lines = backend.read_all_lines()?;
        let entries = parse_lines(&lines)?;
        let (last_hash, next_id) = match entries.last() {
            Some(last) => (last.hash.clone(), last.id + 1),
            None => (GENESIS_HASH.to_string(), 0),
        };

        Ok(Self {
            max_entries_per_segment,
            state: Mutex::new(ChainState {
                backend,
                entries_in_segment: 0,
                last_hash,
                next_id,
            }),
        })
    }

    /// Append a new entry, returning the entry as actually persisted
    /// (with its assigned id, prev_hash and hash filled in).
    pub async fn append(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        decision: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
    ) -> Result<LogEntry, LogError> {
        let mut state = self.state.lock().await;

        let unsigned = LogEntry {
            id: state.next_id,
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            decision,
            metadata,
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };

        let canonical = canonical_json(&hash_body(&unsigned));
        let hash = compute_hash(&unsigned.prev_hash, &canonical);
        let entry = LogEntry { hash: hash.clone(), ..unsigned };

        let line = serde_json::to_string(&entry)?;
        state.backend.append_line(&line)?;

        state.last_hash = hash;
        state.next_id += 1;
        state.entries_in_segment += 1;

        if let Some(max) = self.max_entries_per_segment {
            if state.entries_in_segment >= max {
                let boundary = SegmentBoundary {
                    segment_boundary: true,
                    last_hash: state.last_hash.clone(),
                };
                let boundary_line = serde_json::to_string(&boundary)?;
                state.backend.append_line(&boundary_line)?;
                state.backend.rotate()?;
                state.entries_in_segment = 0;
            }
        }

        Ok(entry)
    }

    /// Replay the backend end to end and verify the hash chain holds.
    /// Returns the index of the first broken entry, if any.
    pub async fn verify_integrity(&self) -> Result<Option<u64>, LogError> {
        let state = self.state.lock().await;
        let lines = state.backend.read_all_lines()?;
        let entries = parse_lines(&lines)?;

        let mut expected_prev = GENESIS_HASH.to_string();
        for (position, entry) in entries.iter().enumerate() {
            if entry.prev_hash != expected_prev {
                return Ok(Some(position as u64));
            }
            let canonical = canonical_json(&hash_body(entry));
            let recomputed = compute_hash(&entry.prev_hash, &canonical);
            if recomputed != entry.hash {
                return Ok(Some(position as u64));
            }
            expected_prev = entry.hash.clone();
        }
        Ok(None)
    }

    /// Linear search across all segments for entries whose actor,
    /// action, or resource contains `query` as a substring.
    pub async fn search(&self, query: &str) -> Result<Vec<LogEntry>, LogError> {
        let state = self.state.lock().await;
        let lines = state.backend.read_all_lines()?;
        let entries = parse_lines(&lines)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.actor.contains(query) || entry.action.contains(query) || entry.resource.contains(query))
            .collect())
    }

    pub async fn len(&self) -> u64 {
        self.state.lock().await.next_id
    }

    pub async fn segment_count(&self) -> usize {
        self.state.lock().await.backend.segment_count()
    }
}

static SEQUENCE_FOR_TESTS: AtomicU64 = AtomicU64::new(0);
