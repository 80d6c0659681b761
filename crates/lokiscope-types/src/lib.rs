//! Shared types for lokiscope
//!
//! This crate contains the data model passed between the query builder,
//! the store adapter and the log pipeline.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Query Input Types
// ============================================================================

/// Payload field that can be constrained to an exact value
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Accelerator,
    Origin,
    User,
    Facility,
    Severity,
}

impl FieldKey {
    pub const ALL: [FieldKey; 5] = [
        Self::Accelerator,
        Self::Origin,
        Self::User,
        Self::Facility,
        Self::Severity,
    ];

    /// Key name as it appears in the structured payload
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerator => "accelerator",
            Self::Origin => "origin",
            Self::User => "user",
            Self::Facility => "facility",
            Self::Severity => "severity",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact-value constraints on payload fields, at most one per key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldConstraints {
    values: BTreeMap<FieldKey, String>,
}

impl FieldConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the required value for a key, replacing any earlier one
    pub fn set(&mut self, key: FieldKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Builder-style variant of [`FieldConstraints::set`]
    pub fn with(mut self, key: FieldKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: FieldKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Whether a text pattern has to match or must not match
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    MustMatch,
    MustNotMatch,
}

/// Regex filter applied by the store to each raw line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMatchTerm {
    pub pattern: String,
    pub polarity: Polarity,
}

impl TextMatchTerm {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            polarity: Polarity::MustMatch,
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            polarity: Polarity::MustNotMatch,
        }
    }
}

/// Which built-in noise-exclusion terms go into the query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoiseFilters {
    pub changelog: bool,
    pub watcher: bool,
    pub putlog: bool,
}

impl NoiseFilters {
    /// No noise filtering at all
    pub fn none() -> Self {
        Self {
            changelog: false,
            watcher: false,
            putlog: false,
        }
    }
}

impl Default for NoiseFilters {
    fn default() -> Self {
        Self {
            changelog: true,
            watcher: true,
            putlog: true,
        }
    }
}

/// Time bounds for a query, as user tokens or resolved timestamps
///
/// `None` leaves the bound to the store (its default lookback, or now).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl TimeRange {
    pub fn new(from: Option<String>, to: Option<String>) -> Self {
        Self { from, to }
    }
}

/// Order in which the store delivers records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Direction {
    /// Newest first (the default)
    #[default]
    Backward,
    /// Oldest first
    Forward,
}

/// How records are retrieved from the store
///
/// Tailing has no direction: a live stream can only be read forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retrieval {
    OneShot { limit: u32, direction: Direction },
    Tail,
}

/// Rendering selected for the pipeline output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Fixed-width table rows
    #[default]
    Table,
    /// Store lines passed through untouched
    Raw,
    /// One pretty-printed object per record
    Json,
    /// One compact object per line
    Jsonl,
}

/// Line format requested from the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreEncoding {
    Default,
    Raw,
    Jsonl,
}

impl StoreEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Raw => "raw",
            Self::Jsonl => "jsonl",
        }
    }
}

impl From<OutputMode> for StoreEncoding {
    fn from(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Table => Self::Default,
            OutputMode::Raw => Self::Raw,
            OutputMode::Json | OutputMode::Jsonl => Self::Jsonl,
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// A decoded log line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Timestamp with the offset the store reported it in
    pub timestamp: DateTime<FixedOffset>,

    /// The timestamp exactly as the store printed it
    pub timestamp_text: String,

    /// Stream labels (empty when the store stripped them)
    pub labels: BTreeMap<String, String>,

    pub accelerator: String,
    pub origin: String,
    pub user: String,
    pub facility: String,
    pub severity: String,
    pub text: String,
}

impl LogRecord {
    /// Create a record with empty payload fields
    pub fn new(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            timestamp_text: timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            labels: BTreeMap::new(),
            accelerator: String::new(),
            origin: String::new(),
            user: String::new(),
            facility: String::new(),
            severity: String::new(),
            text: String::new(),
        }
    }

    /// Keep the store's own spelling of the timestamp
    pub fn with_timestamp_text(mut self, text: impl Into<String>) -> Self {
        self.timestamp_text = text.into();
        self
    }

    /// Value of a constrainable payload field
    pub fn field(&self, key: FieldKey) -> &str {
        match key {
            FieldKey::Accelerator => &self.accelerator,
            FieldKey::Origin => &self.origin,
            FieldKey::User => &self.user,
            FieldKey::Facility => &self.facility,
            FieldKey::Severity => &self.severity,
        }
    }

    /// Whether two records count as repetitions of each other
    pub fn repeats(&self, other: &LogRecord) -> bool {
        self.text == other.text && self.origin == other.origin && self.facility == other.facility
    }
}

/// A record, or a run of adjacent repeats folded into one
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompactedEntry {
    Single(LogRecord),
    Repeated { record: LogRecord, count: usize },
}

impl CompactedEntry {
    /// Build an entry for a run of `count` matching records
    pub fn from_run(record: LogRecord, count: usize) -> Self {
        if count > 1 {
            Self::Repeated { record, count }
        } else {
            Self::Single(record)
        }
    }

    /// The representative record
    pub fn record(&self) -> &LogRecord {
        match self {
            Self::Single(record) | Self::Repeated { record, .. } => record,
        }
    }

    /// Number of raw records this entry stands for
    pub fn count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Repeated { count, .. } => *count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2023-09-20T10:00:00Z").unwrap()
    }

    #[test]
    fn test_constraints_last_write_wins() {
        let mut constraints = FieldConstraints::new();
        constraints.set(FieldKey::Origin, "first");
        constraints.set(FieldKey::Origin, "second");
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints.get(FieldKey::Origin), Some("second"));
    }

    #[test]
    fn test_store_encoding_for_mode() {
        assert_eq!(StoreEncoding::from(OutputMode::Table), StoreEncoding::Default);
        assert_eq!(StoreEncoding::from(OutputMode::Raw), StoreEncoding::Raw);
        assert_eq!(StoreEncoding::from(OutputMode::Json), StoreEncoding::Jsonl);
        assert_eq!(StoreEncoding::from(OutputMode::Jsonl), StoreEncoding::Jsonl);
    }

    #[test]
    fn test_repeats_ignores_other_fields() {
        let mut a = LogRecord::new(ts());
        a.text = "beam lost".to_string();
        a.origin = "bpm".to_string();
        a.user = "alice".to_string();
        let mut b = a.clone();
        b.user = "bob".to_string();
        b.severity = "ERROR".to_string();
        assert!(a.repeats(&b));

        b.facility = "rf".to_string();
        assert!(!a.repeats(&b));
    }

    #[test]
    fn test_timestamp_text_defaults_to_rfc3339() {
        let record = LogRecord::new(ts());
        assert_eq!(record.timestamp_text, "2023-09-20T10:00:00+00:00");
        let record = record.with_timestamp_text("2023-09-20T10:00:00.50Z");
        assert_eq!(record.timestamp_text, "2023-09-20T10:00:00.50Z");
    }

    #[test]
    fn test_entry_from_run() {
        let record = LogRecord::new(ts());
        assert_eq!(CompactedEntry::from_run(record.clone(), 1).count(), 1);
        assert!(matches!(
            CompactedEntry::from_run(record, 3),
            CompactedEntry::Repeated { count: 3, .. }
        ));
    }
}
