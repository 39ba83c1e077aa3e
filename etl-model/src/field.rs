//! FILENAME: etl-model/src/field.rs
//! PURPOSE: Per-file column metadata ("file fields").
//! CONTEXT: A file field is one column of an uploaded file as reported by the
//! inspection service, plus the user's edits (alias, purpose, format, ...).
//! The purpose decides which extra properties exist, so those live in the
//! tagged `PurposeProps` union: a quality never carries a time descriptor and
//! a measurement-time field always does.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ReducerDefaults;
use crate::span::Span;
use crate::time::TimeDescriptor;

/// Raw value -> display value.
pub type SymbolMap = BTreeMap<String, String>;

// ============================================================================
// PURPOSE & REDUCERS
// ============================================================================

/// The role a column plays in the canonical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Purpose {
    #[serde(rename = "subject")]
    Subject,
    #[serde(rename = "quality")]
    Quality,
    #[serde(rename = "mvalue")]
    MeasurementValue,
    #[serde(rename = "mcomp")]
    MeasurementComponent,
    #[serde(rename = "mspan")]
    MeasurementTime,
}

impl Purpose {
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "subject" => Some(Purpose::Subject),
            "quality" => Some(Purpose::Quality),
            "mvalue" | "measurement-value" => Some(Purpose::MeasurementValue),
            "mcomp" | "measurement-component" => Some(Purpose::MeasurementComponent),
            "mspan" | "measurement-time" => Some(Purpose::MeasurementTime),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Purpose::Subject => "subject",
            Purpose::Quality => "quality",
            Purpose::MeasurementValue => "mvalue",
            Purpose::MeasurementComponent => "mcomp",
            Purpose::MeasurementTime => "mspan",
        }
    }

    /// Purposes that may appear on more than one enabled field of a file.
    pub fn allows_many(&self) -> bool {
        matches!(self, Purpose::MeasurementComponent | Purpose::MeasurementValue)
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// How values are combined when a unit is aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reducer {
    Sum,
    Avg,
    Count,
    First,
    Last,
    Min,
    Max,
}

impl Default for Reducer {
    fn default() -> Self {
        Reducer::Sum
    }
}

/// Purpose-specific properties. Each variant carries exactly the props its
/// purpose requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all_fields = "kebab-case")]
pub enum PurposeProps {
    #[serde(rename = "subject")]
    Subject,
    #[serde(rename = "quality")]
    Quality { codomain_reducer: Reducer },
    #[serde(rename = "mvalue")]
    MeasurementValue {
        codomain_reducer: Reducer,
        slicing_reducer: Reducer,
    },
    #[serde(rename = "mcomp")]
    MeasurementComponent,
    #[serde(rename = "mspan")]
    MeasurementTime {
        time: TimeDescriptor,
        #[serde(default)]
        spans: Vec<Span>,
    },
}

impl PurposeProps {
    /// Fresh props for `purpose` seeded with the default reducers.
    pub fn with_defaults(purpose: Purpose, defaults: &ReducerDefaults) -> Self {
        match purpose {
            Purpose::Subject => PurposeProps::Subject,
            Purpose::Quality => PurposeProps::Quality {
                codomain_reducer: defaults.quality_codomain,
            },
            Purpose::MeasurementValue => PurposeProps::MeasurementValue {
                codomain_reducer: defaults.mvalue_codomain,
                slicing_reducer: defaults.mvalue_slicing,
            },
            Purpose::MeasurementComponent => PurposeProps::MeasurementComponent,
            Purpose::MeasurementTime => PurposeProps::MeasurementTime {
                time: TimeDescriptor::default(),
                spans: Vec::new(),
            },
        }
    }

    pub fn purpose(&self) -> Purpose {
        match self {
            PurposeProps::Subject => Purpose::Subject,
            PurposeProps::Quality { .. } => Purpose::Quality,
            PurposeProps::MeasurementValue { .. } => Purpose::MeasurementValue,
            PurposeProps::MeasurementComponent => Purpose::MeasurementComponent,
            PurposeProps::MeasurementTime { .. } => Purpose::MeasurementTime,
        }
    }

    /// Converts to another purpose. Props of the old variant that the new one
    /// does not have are dropped; props the new one needs are defaulted.
    pub fn convert(self, purpose: Purpose, defaults: &ReducerDefaults) -> Self {
        if self.purpose() == purpose {
            return self;
        }
        PurposeProps::with_defaults(purpose, defaults)
    }

    pub fn codomain_reducer(&self) -> Option<Reducer> {
        match self {
            PurposeProps::Quality { codomain_reducer }
            | PurposeProps::MeasurementValue { codomain_reducer, .. } => Some(*codomain_reducer),
            _ => None,
        }
    }

    pub fn slicing_reducer(&self) -> Option<Reducer> {
        match self {
            PurposeProps::MeasurementValue { slicing_reducer, .. } => Some(*slicing_reducer),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<&TimeDescriptor> {
        match self {
            PurposeProps::MeasurementTime { time, .. } => Some(time),
            _ => None,
        }
    }

    pub fn spans(&self) -> &[Span] {
        match self {
            PurposeProps::MeasurementTime { spans, .. } => spans,
            _ => &[],
        }
    }
}

// ============================================================================
// LEVELS
// ============================================================================

/// One distinct value of a column and how many rows carry it.
/// Serialized as the `[value, count]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Level(pub String, pub u64);

impl Level {
    pub fn new(value: impl Into<String>, count: u64) -> Self {
        Level(value.into(), count)
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn count(&self) -> u64 {
        self.1
    }
}

/// Sums counts of equal values, keeping first-seen order.
pub fn merge_levels<'a, I>(levels: I) -> Vec<Level>
where
    I: IntoIterator<Item = &'a Level>,
{
    let mut merged: Vec<Level> = Vec::new();
    let mut index: rustc_hash::FxHashMap<&'a str, usize> = rustc_hash::FxHashMap::default();
    for level in levels {
        match index.get(level.value()) {
            Some(&i) => merged[i].1 += level.count(),
            None => {
                index.insert(level.value(), merged.len());
                merged.push(level.clone());
            }
        }
    }
    merged
}

// ============================================================================
// FILE FIELD
// ============================================================================

/// Where a file field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FieldOrigin {
    /// A column read from the file.
    #[default]
    Raw,
    /// One factor of a wide-to-long transform.
    WideFactor,
    /// The stacked measurement value of a wide-to-long transform.
    WideValue,
    /// The constant measurement value of a presence-only file.
    Implied,
}

/// One column of a file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileField {
    /// Position in the file. Never changes.
    pub header_idx: usize,

    /// Column name as found in the file.
    pub header: String,

    /// User-editable name; fields are stacked across files by this key.
    #[serde(rename = "field-alias")]
    pub alias: String,

    pub enabled: bool,

    #[serde(flatten)]
    pub props: PurposeProps,

    #[serde(default)]
    pub levels: Vec<Level>,

    #[serde(default)]
    pub null_value: Option<String>,

    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub map_symbols: SymbolMap,

    #[serde(default)]
    pub origin: FieldOrigin,

    /// Props set through unrecognised edit keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl FileField {
    /// A raw, enabled field whose alias is its header.
    pub fn new(header_idx: usize, header: impl Into<String>, purpose: Purpose) -> Self {
        let header = header.into();
        FileField {
            header_idx,
            alias: header.clone(),
            header,
            enabled: true,
            props: PurposeProps::with_defaults(purpose, &ReducerDefaults::default()),
            levels: Vec::new(),
            null_value: None,
            format: None,
            map_symbols: SymbolMap::new(),
            origin: FieldOrigin::Raw,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_levels(mut self, levels: Vec<Level>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_origin(mut self, origin: FieldOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_time(mut self, time: TimeDescriptor) -> Self {
        if let PurposeProps::MeasurementTime { time: t, .. } = &mut self.props {
            *t = time;
        }
        self
    }

    pub fn purpose(&self) -> Purpose {
        self.props.purpose()
    }

    pub fn time(&self) -> Option<&TimeDescriptor> {
        self.props.time()
    }

    pub fn spans(&self) -> &[Span] {
        self.props.spans()
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin != FieldOrigin::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_conversion_swaps_props() {
        let defaults = ReducerDefaults::default();
        let props = PurposeProps::with_defaults(Purpose::Quality, &defaults);
        assert_eq!(props.codomain_reducer(), Some(Reducer::First));

        let props = props.convert(Purpose::MeasurementTime, &defaults);
        assert!(props.time().is_some());
        assert_eq!(props.codomain_reducer(), None);

        let props = props.convert(Purpose::MeasurementValue, &defaults);
        assert!(props.time().is_none());
        assert_eq!(props.slicing_reducer(), Some(Reducer::Sum));
    }

    #[test]
    fn test_merge_levels_sums_duplicates() {
        let levels = vec![Level::new("a", 2), Level::new("b", 1), Level::new("a", 3)];
        assert_eq!(merge_levels(&levels), vec![Level::new("a", 5), Level::new("b", 1)]);
    }

    #[test]
    fn test_file_field_serde_layout() {
        let field = FileField::new(2, "nrx", Purpose::MeasurementValue)
            .with_levels(vec![Level::new("10", 4)]);
        let json = serde_json::to_value(&field).unwrap();

        assert_eq!(json["field-alias"], "nrx");
        assert_eq!(json["purpose"], "mvalue");
        assert_eq!(json["codomain-reducer"], "SUM");
        assert_eq!(json["levels"][0][0], "10");

        let back: FileField = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }
}
