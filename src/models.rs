//! Data models for harvested records and their persisted snapshots.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Record`]: One keyed set of named text fields (e.g. one article)
//! - [`Snapshot`]: The full keyed collection of records at a point in time
//! - [`ChangeSet`]: What a reconciliation added or updated
//! - [`Sentinel`]: The typed "nothing changed" marker for the latest-run output
//! - [`Schema`] and [`Delimiter`]: The on-disk column layout

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::HarvestError;

/// Key written in the key column of a sentinel row. Never a real locator.
pub const SENTINEL_KEY: &str = "__no_update__";

/// A keyed record: one article, one row in the snapshot file.
///
/// The key column is held in `key` and is not repeated inside `fields`.
/// Field order is preserved as produced, but comparisons go by field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Unique identifier, usually the canonical article URL.
    pub key: String,
    /// Named attributes in the order they were produced.
    pub fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter. Replaces an existing field of the same name.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Field-level comparison, key excluded. A missing field equals an empty one.
    pub fn differs_from(&self, other: &Record) -> bool {
        let mine = self.fields.iter().map(|(n, _)| n.as_str());
        let theirs = other.fields.iter().map(|(n, _)| n.as_str());
        mine.chain(theirs)
            .any(|name| self.get(name).unwrap_or("") != other.get(name).unwrap_or(""))
    }
}

/// The full keyed collection of records.
///
/// Backed by a `BTreeMap`, so iteration is ordered by key and serialization
/// is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: BTreeMap<String, Record>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Insert or replace by key. Returns the record previously stored there.
    pub(crate) fn insert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.key.clone(), record)
    }

    /// Key-indexed, field-level equality: same key set and no record differs.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.len() == other.len()
            && self.records.iter().all(|(key, mine)| match other.get(key) {
                Some(theirs) => !mine.differs_from(theirs),
                None => false,
            })
    }
}

impl FromIterator<Record> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

/// Result of one reconciliation. Built once, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Keys absent from the previous snapshot.
    pub added: BTreeSet<String>,
    /// Keys whose merged record differs from the previous one.
    pub updated: BTreeSet<String>,
    /// Incoming records that left the merged state as it was.
    pub unchanged: usize,
}

impl ChangeSet {
    /// `true` when nothing was added or updated.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }
}

/// Marker emitted in place of data when a run produced no durable change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub generated_at: DateTime<Utc>,
}

impl Sentinel {
    pub fn now() -> Self {
        Self {
            generated_at: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> String {
        self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Column separator of the snapshot file.
///
/// Each delimiter has a look-alike the sanitizer substitutes into field
/// values, so no value can ever split a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Comma,
    Pipe,
    Semicolon,
    Tab,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Pipe => '|',
            Delimiter::Semicolon => ';',
            Delimiter::Tab => '\t',
        }
    }

    /// Visually similar replacement used inside field values.
    pub fn lookalike(self) -> char {
        match self {
            Delimiter::Comma => '\u{201A}',
            Delimiter::Pipe => '\u{00A6}',
            Delimiter::Semicolon => '\u{037E}',
            Delimiter::Tab => ' ',
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Delimiter::Comma => "text/csv; charset=utf-8",
            Delimiter::Tab => "text/tab-separated-values; charset=utf-8",
            Delimiter::Pipe | Delimiter::Semicolon => "text/plain; charset=utf-8",
        }
    }
}

/// Column layout of the snapshot file: names in header order, plus which
/// column carries the record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    key_column: String,
}

impl Schema {
    pub fn new(columns: Vec<String>, key_column: impl Into<String>) -> Result<Self, HarvestError> {
        let key_column = key_column.into();
        if !columns.contains(&key_column) {
            return Err(HarvestError::Config(format!(
                "key column {key_column:?} is not one of the columns {columns:?}"
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(HarvestError::Config(format!("duplicate column {dup:?}")));
        }
        if let Some(bad) = columns
            .iter()
            .find(|c| c.trim().is_empty() || c.contains(['\n', '\r', '\u{FEFF}']))
        {
            return Err(HarvestError::Config(format!(
                "column name {bad:?} is empty or contains a line break or BOM"
            )));
        }
        // the no-update marker stamps its time into a non-key column
        if columns.len() < 2 {
            return Err(HarvestError::Config(format!(
                "schema needs at least one column besides {key_column:?}"
            )));
        }
        Ok(Self {
            columns,
            key_column,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Column names that would split into more than one header field.
    pub fn columns_containing(&self, delimiter: Delimiter) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(move |c| c.contains(delimiter.as_char()))
    }

    /// Keep only the fields this schema stores.
    pub fn project(&self, mut record: Record) -> Record {
        record
            .fields
            .retain(|(name, _)| *name != self.key_column && self.columns.contains(name));
        record
    }

    /// Non-key columns, in header order.
    pub fn value_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(move |c| *c != self.key_column)
    }

    /// Lay out a record's values in header order. Missing fields become empty.
    pub fn row<'a>(&'a self, record: &'a Record) -> Vec<&'a str> {
        self.columns
            .iter()
            .map(|c| {
                if *c == self.key_column {
                    record.key.as_str()
                } else {
                    record.get(c).unwrap_or("")
                }
            })
            .collect()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            columns: ["Title", "Text", "Category", "URL"]
                .into_iter()
                .map(String::from)
                .collect(),
            key_column: "URL".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_differs_from_ignores_field_order() {
        let a = Record::new("k").with_field("Title", "A").with_field("Text", "x");
        let b = Record::new("k").with_field("Text", "x").with_field("Title", "A");
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn test_differs_from_treats_missing_as_empty() {
        let a = Record::new("k").with_field("Title", "A").with_field("Text", "");
        let b = Record::new("k").with_field("Title", "A");
        assert!(!a.differs_from(&b));
        assert!(a.differs_from(&Record::new("k").with_field("Title", "B")));
    }

    #[test]
    fn test_same_content_requires_same_keys() {
        let a: Snapshot = [Record::new("k1").with_field("Title", "A")].into_iter().collect();
        let b: Snapshot = [Record::new("k2").with_field("Title", "A")].into_iter().collect();
        assert!(a.same_content(&a.clone()));
        assert!(!a.same_content(&b));
        assert!(!a.same_content(&Snapshot::new()));
    }

    #[test]
    fn test_schema_rejects_unknown_key_column() {
        let err = Schema::new(vec!["Title".into()], "URL").unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_schema_rejects_unusable_column_names() {
        for columns in [
            vec!["Title\nName", "URL"],
            vec!["\u{FEFF}Title", "URL"],
            vec!["", "URL"],
            vec!["URL"],
        ] {
            let columns = columns.into_iter().map(String::from).collect();
            let err = Schema::new(columns, "URL").unwrap_err();
            assert_eq!(err.kind(), "config_error");
        }
    }

    #[test]
    fn test_schema_reports_columns_containing_delimiter() {
        let schema = Schema::new(vec!["Title,Name".into(), "URL".into()], "URL").unwrap();
        assert_eq!(schema.columns_containing(Delimiter::Comma).collect::<Vec<_>>(), vec!["Title,Name"]);
        assert_eq!(schema.columns_containing(Delimiter::Pipe).count(), 0);
    }

    #[test]
    fn test_project_drops_fields_outside_schema() {
        let schema = Schema::new(vec!["Title".into(), "URL".into()], "URL").unwrap();
        let rec = Record::new("https://x/1")
            .with_field("Title", "A")
            .with_field("Text", "extra")
            .with_field("URL", "dup");
        let projected = schema.project(rec);
        assert_eq!(projected.fields, vec![("Title".to_string(), "A".to_string())]);
        assert_eq!(projected.key, "https://x/1");
    }

    #[test]
    fn test_schema_row_places_key() {
        let schema = Schema::default();
        let rec = Record::new("https://x/a").with_field("Title", "A");
        assert_eq!(schema.row(&rec), vec!["A", "", "", "https://x/a"]);
        assert_eq!(schema.value_columns().collect::<Vec<_>>(), vec!["Title", "Text", "Category"]);
    }
}
