use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::atomic::{AtomicJsonStore, ReadOutcome};
use super::error::{StoreError, StoreResult};

const CHUNK_BYTES: usize = 64;
const MAX_TRUNCATE_ATTEMPTS: usize = 256;

/// Recovery strategies, tried in `ORDER` until one yields a document that
/// parses and still carries the expected top-level key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    BalancedSpan,
    TruncateAndClose,
}

impl RepairStrategy {
    pub const ORDER: [RepairStrategy; 2] =
        [RepairStrategy::BalancedSpan, RepairStrategy::TruncateAndClose];

    pub fn name(&self) -> &'static str {
        match self {
            RepairStrategy::BalancedSpan => "balanced_span",
            RepairStrategy::TruncateAndClose => "truncate_and_close",
        }
    }

    pub fn attempt(&self, raw: &[u8], key: &str) -> Option<Value> {
        match self {
            RepairStrategy::BalancedSpan => balanced_span(raw, key),
            RepairStrategy::TruncateAndClose => truncate_and_close(raw, key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub value: Value,
    pub strategy: RepairStrategy,
    pub recovered_entries: usize,
}

pub fn recover_document(raw: &[u8], key: &str) -> Option<Recovery> {
    RepairStrategy::ORDER.iter().find_map(|strategy| {
        strategy.attempt(raw, key).map(|value| Recovery {
            recovered_entries: count_entries(&value, key),
            value,
            strategy: *strategy,
        })
    })
}

/// Number of entries under `key`: object members or array elements.
pub fn count_entries(value: &Value, key: &str) -> usize {
    match value.get(key) {
        Some(Value::Object(map)) => map.len(),
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    }
}

fn accept(candidate: &[u8], key: &str) -> Option<Value> {
    let value: Value = serde_json::from_slice(candidate).ok()?;
    if value.as_object()?.contains_key(key) {
        Some(value)
    } else {
        None
    }
}

/// Lexer state shared by both strategies; tracks strings and escapes so
/// braces inside string literals are ignored.
#[derive(Debug, Default, Clone)]
struct Scanner {
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Returns the byte when it is structural (outside any string).
    fn feed(&mut self, byte: u8) -> Option<u8> {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return None;
        }
        if byte == b'"' {
            self.in_string = true;
            return None;
        }
        Some(byte)
    }
}

fn balanced_span(raw: &[u8], key: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(offset) = raw[search_from..].iter().position(|b| *b == b'{') {
        let start = search_from + offset;
        let mut scanner = Scanner::default();
        let mut depth = 0usize;
        let mut closed_at = None;
        for (index, byte) in raw.iter().enumerate().skip(start) {
            match scanner.feed(*byte) {
                Some(b'{') | Some(b'[') => depth += 1,
                Some(b'}') | Some(b']') => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        closed_at = Some(index);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = closed_at?;
        if let Some(value) = accept(&raw[start..=end], key) {
            return Some(value);
        }
        search_from = start + 1;
    }
    None
}

fn truncate_and_close(raw: &[u8], key: &str) -> Option<Value> {
    for attempt in 0..MAX_TRUNCATE_ATTEMPTS {
        let cut = raw.len().checked_sub(attempt * CHUNK_BYTES)?;
        if cut == 0 {
            return None;
        }
        if let Some(candidate) = close_prefix(&raw[..cut]) {
            if let Some(value) = accept(&candidate, key) {
                return Some(value);
            }
        }
    }
    None
}

/// Closers that leave at most this many containers open end a whole entry of
/// the document root or of the keyed map/array directly below it.
const MAX_SNAPSHOT_DEPTH: usize = 2;

/// Snaps `prefix` back to the last closer that completes a top-level entry
/// and appends closers for whatever is still open at that point. Entries
/// cut anywhere inside are dropped whole.
fn close_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let start = prefix.iter().position(|b| *b == b'{')?;
    let mut scanner = Scanner::default();
    let mut stack: Vec<u8> = Vec::new();
    let mut snapshot: Option<(usize, Vec<u8>)> = None;
    for (index, byte) in prefix.iter().enumerate().skip(start) {
        match scanner.feed(*byte) {
            Some(b'{') => stack.push(b'}'),
            Some(b'[') => stack.push(b']'),
            Some(closer @ (b'}' | b']')) => {
                if stack.pop() != Some(closer) {
                    // mismatched nesting; nothing past here can be trusted
                    break;
                }
                if stack.len() <= MAX_SNAPSHOT_DEPTH {
                    snapshot = Some((index, stack.clone()));
                }
                if stack.is_empty() {
                    break;
                }
            }
            _ => {}
        }
    }
    let (end, open) = snapshot?;
    let mut candidate = prefix[start..=end].to_vec();
    candidate.extend(open.iter().rev());
    Some(candidate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Ok,
    Corrupted,
    NotFound,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Ok => "ok",
            DocumentStatus::Corrupted => "corrupted",
            DocumentStatus::NotFound => "not_found",
            DocumentStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub name: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub name: String,
    pub was_corrupted: bool,
    pub recovered_entry_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RepairStrategy>,
}

pub fn backup_name(name: &str, at: DateTime<Utc>) -> String {
    format!("{name}.corrupt-{}.bak", at.format("%Y%m%dT%H%M%SZ"))
}

impl AtomicJsonStore {
    /// Reports whether `name` parses, without touching it.
    pub async fn check_status(&self, name: &str) -> StatusReport {
        let _guard = self.locks().acquire(name).await;
        let (status, detail) = match self.fetch(name).await {
            ReadOutcome::Found(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(_) => (DocumentStatus::Ok, None),
                Err(err) => (DocumentStatus::Corrupted, Some(err.to_string())),
            },
            ReadOutcome::NotFound => (DocumentStatus::NotFound, None),
            ReadOutcome::Failed(err) => (DocumentStatus::Error, Some(err.to_string())),
        };
        StatusReport {
            name: name.to_string(),
            status,
            detail,
        }
    }

    /// Backs up and rewrites a corrupted document with the best recovery
    /// found for top-level `key`. A healthy document is left alone.
    pub async fn repair(&self, name: &str, key: &str) -> StoreResult<RepairReport> {
        let _guard = self.locks().acquire(name).await;
        let bytes = match self.fetch(name).await {
            ReadOutcome::Found(bytes) => bytes,
            ReadOutcome::NotFound => {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                })
            }
            ReadOutcome::Failed(err) => return Err(err),
        };
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
            return Ok(RepairReport {
                name: name.to_string(),
                was_corrupted: false,
                recovered_entry_count: count_entries(&value, key),
                backup_location: None,
                backup_name: None,
                strategy: None,
            });
        }

        let (backup, location) = self.backup_corrupted(name, &bytes).await?;
        let recovery = recover_document(&bytes, key).ok_or_else(|| StoreError::Corrupted {
            name: name.to_string(),
            message: format!("no recovery strategy produced a document with {key:?}"),
        })?;
        self.write_unlocked(name, &recovery.value).await?;
        info!(
            document = %name,
            backup = %backup,
            strategy = recovery.strategy.name(),
            entries = recovery.recovered_entries,
            "repaired corrupted document"
        );
        Ok(RepairReport {
            name: name.to_string(),
            was_corrupted: true,
            recovered_entry_count: recovery.recovered_entries,
            backup_location: Some(location),
            backup_name: Some(backup),
            strategy: Some(recovery.strategy),
        })
    }

    /// Uploads the raw bytes unmodified next to the document. Callers must
    /// not write repaired content when this fails.
    pub(crate) async fn backup_corrupted(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> StoreResult<(String, String)> {
        let backup = backup_name(name, Utc::now());
        if let Err(err) = self
            .call("backup", &backup, self.backend().upload(&backup, bytes))
            .await
        {
            warn!(document = %name, error = %err, "failed to back up corrupted document");
            return Err(err);
        }
        let location = self.backend().location(&backup);
        Ok((backup, location))
    }
}
