//! The lexical-entry, work-unit, and worker data model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A language plan: the config input that seeds work-unit generation
/// (spec §3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagePlan {
    pub language_code: String,
    pub estimated_entries: u64,
    pub alphabet_ranges: Vec<AlphabetRange>,
}

/// One `(start_prefix, end_prefix, weight)` slice of the lemma space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphabetRange {
    pub start_prefix: String,
    pub end_prefix: String,
    pub weight: f64,
}

/// A raw lexical record as produced by a [`crate`]-external extractor
/// plugin, before conversion. Missing/optional fields are defensively
/// defaulted by the converter, never propagated as null (spec §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub word: String,
    pub language: String,
    #[serde(default)]
    pub pos: Option<String>,
    #[serde(default)]
    pub definitions: Vec<String>,
    #[serde(default)]
    pub ipa: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub antonyms: Vec<String>,
    #[serde(default)]
    pub translations: Vec<String>,
    #[serde(default)]
    pub audio: Vec<String>,
    #[serde(default)]
    pub frequency_rank: Option<u32>,
}

/// Recognized `meta` keys and their contracts (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub lemma: String,
    pub pos: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipa: Option<String>,
    #[serde(default)]
    pub definitions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub antonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub translations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_rank: Option<u32>,
    pub source: String,
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
}

/// A relation to another entry, e.g. `("synonym_of", addr)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub relation_kind: String,
    pub target_address: Address,
}

/// One AQEA entry (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqeaEntry {
    pub address: Address,
    pub label: String,
    pub description: String,
    pub domain: String,
    pub meta: EntryMeta,
    #[serde(default)]
    pub relations: Vec<Relation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AqeaEntry {
    /// `label` must be non-empty and free of control characters (spec §3).
    pub fn validate_label(label: &str) -> bool {
        !label.is_empty() && !label.chars().any(|c| c.is_control())
    }
}

/// Work-unit lifecycle state (spec §3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkUnitStatus {
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
}

impl WorkUnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkUnitStatus::Pending => "pending",
            WorkUnitStatus::Assigned => "assigned",
            WorkUnitStatus::Processing => "processing",
            WorkUnitStatus::Completed => "completed",
            WorkUnitStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A lemma-prefix range work unit, the atomic unit of assignment
/// (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub work_id: String,
    pub language_code: String,
    pub source_name: String,
    pub range_start: String,
    pub range_end: String,
    pub estimated_entries: u64,
    pub status: WorkUnitStatus,
    #[serde(default)]
    pub assigned_worker: Option<String>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub entries_processed: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkUnit {
    /// Deterministic `work_id`: `"{source}_{lang}_{idx:02d}"` (spec §4.1).
    pub fn make_id(source: &str, lang: &str, idx: usize) -> String {
        format!("{source}_{lang}_{idx:02}")
    }

    pub fn new(
        source: &str,
        lang: &str,
        idx: usize,
        range_start: String,
        range_end: String,
        estimated_entries: u64,
    ) -> Self {
        Self {
            work_id: Self::make_id(source, lang, idx),
            language_code: lang.to_string(),
            source_name: source.to_string(),
            range_start,
            range_end,
            estimated_entries,
            status: WorkUnitStatus::Pending,
            assigned_worker: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            entries_processed: 0,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
        }
    }

    /// A lemma belongs to this unit iff `range_start <= lemma < succ(range_end)`
    /// under lexicographic order on the normalized lemma form (spec §3).
    pub fn contains_lemma(&self, lemma: &str) -> bool {
        lemma >= self.range_start.as_str() && lemma < self.range_end.as_str()
    }
}

/// Worker liveness state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Working => "working",
            WorkerStatus::Error => "error",
            WorkerStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "working" => Some(Self::Working),
            "error" => Some(Self::Error),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A registered worker (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub current_work_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub total_processed: u64,
    pub average_rate_per_minute: f64,
    pub registered_at: DateTime<Utc>,
}

/// Default heartbeat timeout (spec §3).
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 120;

impl WorkerRecord {
    /// A worker whose last heartbeat is older than `timeout_secs` is
    /// considered offline regardless of its last reported status.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_unit_id_is_deterministic() {
        assert_eq!(WorkUnit::make_id("wiktionary", "eng", 3), "wiktionary_eng_03");
    }

    #[test]
    fn contains_lemma_is_half_open() {
        let unit = WorkUnit::new("wiktionary", "eng", 0, "a".into(), "e".into(), 10);
        assert!(unit.contains_lemma("apple"));
        assert!(unit.contains_lemma("a"));
        assert!(!unit.contains_lemma("e"));
        assert!(!unit.contains_lemma("zebra"));
    }

    #[test]
    fn label_validation_rejects_empty_and_control_chars() {
        assert!(AqeaEntry::validate_label("apple"));
        assert!(!AqeaEntry::validate_label(""));
        assert!(!AqeaEntry::validate_label("app\u{0007}le"));
    }

    #[test]
    fn work_unit_status_roundtrips_through_strings() {
        for status in [
            WorkUnitStatus::Pending,
            WorkUnitStatus::Assigned,
            WorkUnitStatus::Processing,
            WorkUnitStatus::Completed,
            WorkUnitStatus::Failed,
        ] {
            assert_eq!(WorkUnitStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn worker_staleness_respects_timeout() {
        let now = Utc::now();
        let mut worker = WorkerRecord {
            worker_id: "w1".into(),
            status: WorkerStatus::Working,
            current_work_id: None,
            last_heartbeat: now - chrono::Duration::seconds(200),
            total_processed: 0,
            average_rate_per_minute: 0.0,
            registered_at: now,
        };
        assert!(worker.is_stale(now, HEARTBEAT_TIMEOUT_SECS));
        worker.last_heartbeat = now - chrono::Duration::seconds(10);
        assert!(!worker.is_stale(now, HEARTBEAT_TIMEOUT_SECS));
    }
}
