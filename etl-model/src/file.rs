//! FILENAME: etl-model/src/file.rs
//! PURPOSE: File records: one uploaded file and its fields.
//! CONTEXT: A file record lists the raw columns reported by inspection, and,
//! after derived-field synthesis, the synthetic fields appended behind them.
//! `pivot_fields` is the view the pivot stacks across files.

use serde::{Deserialize, Serialize};

use crate::error::EtlResult;
use crate::field::{FieldOrigin, FileField, Purpose};
use crate::wide::WideToLongConfig;

/// Identity of a field inside one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub filename: String,
    pub alias: String,
}

/// State of the implied measurement value of a presence-only file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpliedMeasurementConfig {
    /// The measurement-time field the synthetic value was built for.
    pub mspan: FieldRef,
    pub field: FileField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub filename: String,
    pub enabled: bool,
    pub n_rows: u64,
    pub fields: Vec<FileField>,
    #[serde(default)]
    pub wide_to_long: Option<WideToLongConfig>,
    #[serde(default)]
    pub implied_mvalue: Option<ImpliedMeasurementConfig>,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, n_rows: u64, fields: Vec<FileField>) -> Self {
        FileRecord {
            filename: filename.into(),
            enabled: true,
            n_rows,
            fields,
            wide_to_long: None,
            implied_mvalue: None,
        }
    }

    /// Enabled fields that take part in the pivot. Raw value columns of a
    /// wide file are stacked into the synthetic value and are left out.
    pub fn pivot_fields(&self) -> impl Iterator<Item = &FileField> {
        let stacked = self.wide_to_long.is_some();
        self.fields.iter().filter(move |f| {
            f.enabled
                && !(stacked
                    && f.origin == FieldOrigin::Raw
                    && f.purpose() == Purpose::MeasurementValue)
        })
    }

    /// Enabled raw fields of `purpose`.
    pub fn raw_of_purpose(&self, purpose: Purpose) -> Vec<&FileField> {
        self.fields
            .iter()
            .filter(|f| f.enabled && f.origin == FieldOrigin::Raw && f.purpose() == purpose)
            .collect()
    }

    /// Pivot fields of `purpose`.
    pub fn of_purpose(&self, purpose: Purpose) -> Vec<&FileField> {
        self.pivot_fields().filter(|f| f.purpose() == purpose).collect()
    }

    pub fn first_of(&self, purpose: Purpose) -> Option<&FileField> {
        self.pivot_fields().find(|f| f.purpose() == purpose)
    }

    pub fn field_with_alias(&self, alias: &str) -> Option<&FileField> {
        self.pivot_fields().find(|f| f.alias == alias)
    }

    pub fn field_at(&self, header_idx: usize) -> Option<&FileField> {
        self.fields.iter().find(|f| f.header_idx == header_idx)
    }

    /// Header index for the next appended field.
    pub fn next_header_idx(&self) -> usize {
        self.fields.iter().map(|f| f.header_idx + 1).max().unwrap_or(0)
    }

    /// Drops synthetic fields of the given origins.
    pub fn strip_synthetic(&mut self, origins: &[FieldOrigin]) {
        self.fields.retain(|f| !origins.contains(&f.origin));
    }

    /// Renames every field aliased `old`, including the synthetic fields
    /// held by the derived-field configs. Returns whether anything changed.
    pub fn rename_alias(&mut self, old: &str, new_name: &str) -> EtlResult<bool> {
        let mut changed = false;

        if let Some(config) = &self.wide_to_long {
            let renamed = if config.mvalue == old {
                Some(config.rename_mvalue(new_name)?)
            } else if config.factor(old).is_some() {
                Some(config.rename_factor(old, new_name)?)
            } else {
                None
            };
            if let Some(renamed) = renamed {
                self.wide_to_long = Some(renamed);
                changed = true;
            }
        }

        if let Some(implied) = &mut self.implied_mvalue {
            if implied.field.alias == old {
                implied.field.alias = new_name.to_string();
                changed = true;
            }
            if implied.mspan.alias == old {
                implied.mspan.alias = new_name.to_string();
            }
        }

        for field in self.fields.iter_mut().filter(|f| f.alias == old) {
            field.alias = new_name.to_string();
            changed = true;
        }
        Ok(changed)
    }

    /// Sets `enabled` on every field aliased `alias`, including the synthetic
    /// fields held by the derived-field configs.
    pub fn set_alias_enabled(&mut self, alias: &str, enabled: bool) -> bool {
        let mut changed = false;
        if let Some(config) = &mut self.wide_to_long {
            if let Some(field) = config.fields.get_mut(alias) {
                changed |= field.enabled != enabled;
                field.enabled = enabled;
            }
        }
        if let Some(implied) = &mut self.implied_mvalue {
            if implied.field.alias == alias {
                changed |= implied.field.enabled != enabled;
                implied.field.enabled = enabled;
            }
        }
        for field in self.fields.iter_mut().filter(|f| f.alias == alias) {
            changed |= field.enabled != enabled;
            field.enabled = enabled;
        }
        changed
    }
}

/// All file records, in upload order, keyed by filename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRecords(Vec<FileRecord>);

impl FileRecords {
    pub fn new() -> Self {
        FileRecords(Vec::new())
    }

    pub fn get(&self, filename: &str) -> Option<&FileRecord> {
        self.0.iter().find(|r| r.filename == filename)
    }

    pub fn get_mut(&mut self, filename: &str) -> Option<&mut FileRecord> {
        self.0.iter_mut().find(|r| r.filename == filename)
    }

    /// Replaces the record with the same filename, or appends.
    pub fn insert(&mut self, record: FileRecord) {
        match self.get_mut(&record.filename) {
            Some(existing) => *existing = record,
            None => self.0.push(record),
        }
    }

    pub fn remove(&mut self, filename: &str) -> Option<FileRecord> {
        let pos = self.0.iter().position(|r| r.filename == filename)?;
        Some(self.0.remove(pos))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, FileRecord> {
        self.0.iter_mut()
    }

    pub fn as_slice(&self) -> &[FileRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<FileRecord>> for FileRecords {
    fn from(records: Vec<FileRecord>) -> Self {
        let mut out = FileRecords::new();
        for record in records {
            out.insert(record);
        }
        out
    }
}

impl<'a> IntoIterator for &'a FileRecords {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord::new(
            "a.csv",
            10,
            vec![
                FileField::new(0, "NPI", Purpose::Subject),
                FileField::new(1, "jan", Purpose::MeasurementValue),
                FileField::new(2, "feb", Purpose::MeasurementValue),
            ],
        )
    }

    #[test]
    fn test_pivot_fields_skip_stacked_columns() {
        let mut r = record();
        assert_eq!(r.of_purpose(Purpose::MeasurementValue).len(), 2);

        r.wide_to_long = Some(WideToLongConfig::new("value"));
        assert!(r.of_purpose(Purpose::MeasurementValue).is_empty());
        assert_eq!(r.raw_of_purpose(Purpose::MeasurementValue).len(), 2);
    }

    #[test]
    fn test_rename_reaches_wide_config() {
        let mut r = record();
        r.wide_to_long = Some(WideToLongConfig::new("value"));
        assert!(r.rename_alias("value", "nrx").unwrap());
        assert_eq!(r.wide_to_long.as_ref().unwrap().mvalue, "nrx");

        assert!(r.rename_alias("NPI", "npi").unwrap());
        assert!(r.field_with_alias("npi").is_some());
        assert!(!r.rename_alias("missing", "x").unwrap());
    }

    #[test]
    fn test_records_insert_replaces_by_filename() {
        let mut records = FileRecords::from(vec![record()]);
        let mut updated = record();
        updated.n_rows = 99;
        records.insert(updated);
        assert_eq!(records.len(), 1);
        assert_eq!(records.get("a.csv").unwrap().n_rows, 99);
        assert!(records.remove("a.csv").is_some());
        assert!(records.is_empty());
    }
}
