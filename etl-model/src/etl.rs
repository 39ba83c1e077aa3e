//! FILENAME: etl-model/src/etl.rs
//! PURPOSE: The canonical cross-file model (EtlFields, EtlUnits) and the
//! durable record of user edits that is replayed on top of every pivot.
//! CONTEXT: An EtlField stacks every file field sharing one alias; each
//! contributing file field is kept as a `Source` so per-file variance
//! (levels, formats, symbol tables) survives. EtlUnits group a subject with
//! the fields measured or described for it and are keyed by codomain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::field::{FileField, Level, Purpose, PurposeProps, Reducer, SymbolMap};
use crate::span::Span;
use crate::time::TimeDescriptor;

// ============================================================================
// FIELDS
// ============================================================================

/// One file field's contribution to an EtlField.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub filename: String,
    pub field: FileField,
}

impl Source {
    pub fn new(filename: impl Into<String>, field: FileField) -> Self {
        Source {
            filename: filename.into(),
            field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EtlField {
    pub name: String,

    #[serde(flatten)]
    pub props: PurposeProps,

    pub sources: Vec<Source>,

    /// Combined levels; only filled for derived fields.
    #[serde(default)]
    pub levels: Vec<Level>,

    #[serde(default)]
    pub map_symbols: SymbolMap,

    #[serde(default)]
    pub null_value_expansion: Option<String>,

    #[serde(default)]
    pub format: Option<String>,

    /// Synthesized from `__derivedFields` rather than stacked from files.
    #[serde(default)]
    pub derived: bool,
}

impl EtlField {
    pub fn new(name: impl Into<String>, props: PurposeProps) -> Self {
        EtlField {
            name: name.into(),
            props,
            sources: Vec::new(),
            levels: Vec::new(),
            map_symbols: SymbolMap::new(),
            null_value_expansion: None,
            format: None,
            derived: false,
        }
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

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.filename.as_str())
    }

    pub fn source_for(&self, filename: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.filename == filename)
    }
}

// ============================================================================
// UNITS
// ============================================================================

/// Component names of a measurement unit.
pub type Components = SmallVec<[String; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EtlUnit {
    Quality {
        subject: String,
        codomain: String,
        codomain_reducer: Reducer,
    },
    Measurement {
        subject: String,
        codomain: String,
        mspan: String,
        mcomps: Components,
        codomain_reducer: Reducer,
        slicing_reducer: Reducer,
    },
}

impl EtlUnit {
    pub fn subject(&self) -> &str {
        match self {
            EtlUnit::Quality { subject, .. } | EtlUnit::Measurement { subject, .. } => subject,
        }
    }

    pub fn codomain(&self) -> &str {
        match self {
            EtlUnit::Quality { codomain, .. } | EtlUnit::Measurement { codomain, .. } => codomain,
        }
    }

    pub fn mspan(&self) -> Option<&str> {
        match self {
            EtlUnit::Measurement { mspan, .. } => Some(mspan),
            EtlUnit::Quality { .. } => None,
        }
    }

    pub fn mcomps(&self) -> &[String] {
        match self {
            EtlUnit::Measurement { mcomps, .. } => mcomps,
            EtlUnit::Quality { .. } => &[],
        }
    }

    pub fn is_measurement(&self) -> bool {
        matches!(self, EtlUnit::Measurement { .. })
    }

    /// Non-subject fields of the unit: codomain, mspan, then components.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = vec![self.codomain()];
        fields.extend(self.mspan());
        fields.extend(self.mcomps().iter().map(String::as_str));
        fields
    }

    /// Whether `name` is one of the unit's non-subject fields.
    pub fn contains(&self, name: &str) -> bool {
        self.fields().contains(&name)
    }

    /// Renames every reference to `old`, subject included.
    pub fn rename_field(&mut self, old: &str, new_name: &str) {
        let swap = |s: &mut String| {
            if s == old {
                *s = new_name.to_string();
            }
        };
        match self {
            EtlUnit::Quality { subject, codomain, .. } => {
                swap(subject);
                swap(codomain);
            }
            EtlUnit::Measurement {
                subject,
                codomain,
                mspan,
                mcomps,
                ..
            } => {
                swap(subject);
                swap(codomain);
                swap(mspan);
                mcomps.iter_mut().for_each(swap);
            }
        }
    }

    pub fn set_reducers(&mut self, codomain: Option<Reducer>, slicing: Option<Reducer>) {
        match self {
            EtlUnit::Quality { codomain_reducer, .. } => {
                if let Some(r) = codomain {
                    *codomain_reducer = r;
                }
            }
            EtlUnit::Measurement {
                codomain_reducer,
                slicing_reducer,
                ..
            } => {
                if let Some(r) = codomain {
                    *codomain_reducer = r;
                }
                if let Some(r) = slicing {
                    *slicing_reducer = r;
                }
            }
        }
    }
}

/// The canonical model produced by pivot + reconcile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlObject {
    pub etl_fields: BTreeMap<String, EtlField>,
    pub etl_units: BTreeMap<String, EtlUnit>,
}

impl EtlObject {
    pub fn is_empty(&self) -> bool {
        self.etl_fields.is_empty() && self.etl_units.is_empty()
    }

    /// Units that list `name` as codomain, mspan or component.
    pub fn units_of(&self, name: &str) -> Vec<&EtlUnit> {
        self.etl_units.values().filter(|u| u.contains(name)).collect()
    }

    /// The unit `name` belongs to; the codomain's unit wins over shared
    /// mspan/component membership.
    pub fn unit_of(&self, name: &str) -> Option<&EtlUnit> {
        self.etl_units
            .get(name)
            .or_else(|| self.units_of(name).into_iter().next())
    }
}

// ============================================================================
// RECORDED EDITS
// ============================================================================

/// User-entered prop overrides for one EtlField. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value_expansion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_symbols: Option<SymbolMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codomain_reducer: Option<Reducer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slicing_reducer: Option<Reducer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeDescriptor>,
    /// Filenames in the order the user wants the sources listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sequence: Option<Vec<String>>,
}

impl FieldOverrides {
    pub fn is_empty(&self) -> bool {
        *self == FieldOverrides::default()
    }

    /// Props set in `other` replace ours.
    pub fn merge(&mut self, other: FieldOverrides) {
        macro_rules! take {
            ($($prop:ident),*) => {
                $(if other.$prop.is_some() { self.$prop = other.$prop; })*
            };
        }
        take!(
            format,
            null_value_expansion,
            map_symbols,
            codomain_reducer,
            slicing_reducer,
            time,
            source_sequence
        );
    }
}

/// How a derived field is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DerivedKind {
    /// A component with a constant value per file, attached to the
    /// measurement unit keyed `codomain`.
    ImpliedComponent { codomain: String },
    /// A quality with a constant value per file, for the subject `subject`.
    ImpliedQuality { subject: String },
}

impl DerivedKind {
    /// The field whose sources decide which files back the derived field.
    pub fn anchor(&self) -> &str {
        match self {
            DerivedKind::ImpliedComponent { codomain } => codomain,
            DerivedKind::ImpliedQuality { subject } => subject,
        }
    }

    pub fn purpose(&self) -> Purpose {
        match self {
            DerivedKind::ImpliedComponent { .. } => Purpose::MeasurementComponent,
            DerivedKind::ImpliedQuality { .. } => Purpose::Quality,
        }
    }

    pub fn rename_anchor(&mut self, old: &str, new_name: &str) {
        let anchor = match self {
            DerivedKind::ImpliedComponent { codomain } => codomain,
            DerivedKind::ImpliedQuality { subject } => subject,
        };
        if anchor == old {
            *anchor = new_name.to_string();
        }
    }
}

/// A synthetic field that does not originate from any file column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedField {
    pub kind: DerivedKind,
    /// Filename -> the constant value that file contributes.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// The field as last constructed.
    pub field: EtlField,
}

/// Durable record of user edits, replayed on top of every fresh pivot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EtlFieldChanges {
    #[serde(rename = "__derivedFields", default)]
    pub derived_fields: BTreeMap<String, DerivedField>,

    #[serde(flatten)]
    pub props: BTreeMap<String, FieldOverrides>,
}

impl EtlFieldChanges {
    pub fn is_derived(&self, name: &str) -> bool {
        self.derived_fields.contains_key(name)
    }

    pub fn overrides(&self, name: &str) -> Option<&FieldOverrides> {
        self.props.get(name)
    }

    /// Merges `overrides` into whatever is recorded for `name`.
    pub fn record(&mut self, name: impl Into<String>, overrides: FieldOverrides) {
        self.props.entry(name.into()).or_default().merge(overrides);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReducerDefaults;
    use smallvec::smallvec;

    fn measurement() -> EtlUnit {
        EtlUnit::Measurement {
            subject: "NPI".into(),
            codomain: "nrx".into(),
            mspan: "date".into(),
            mcomps: smallvec!["channel".to_string()],
            codomain_reducer: Reducer::Sum,
            slicing_reducer: Reducer::Sum,
        }
    }

    #[test]
    fn test_unit_membership() {
        let unit = measurement();
        assert_eq!(unit.fields(), vec!["nrx", "date", "channel"]);
        assert!(unit.contains("date"));
        assert!(!unit.contains("NPI"));
    }

    #[test]
    fn test_unit_rename() {
        let mut unit = measurement();
        unit.rename_field("channel", "route");
        unit.rename_field("NPI", "npi");
        assert_eq!(unit.mcomps(), &["route".to_string()]);
        assert_eq!(unit.subject(), "npi");
    }

    #[test]
    fn test_overrides_merge() {
        let mut base = FieldOverrides {
            format: Some("%Y".into()),
            codomain_reducer: Some(Reducer::Avg),
            ..FieldOverrides::default()
        };
        base.merge(FieldOverrides {
            format: Some("%Y-%m".into()),
            ..FieldOverrides::default()
        });
        assert_eq!(base.format.as_deref(), Some("%Y-%m"));
        assert_eq!(base.codomain_reducer, Some(Reducer::Avg));
        assert!(FieldOverrides::default().is_empty());
    }

    #[test]
    fn test_changes_persisted_layout() {
        let mut changes = EtlFieldChanges::default();
        changes.record(
            "nrx",
            FieldOverrides {
                codomain_reducer: Some(Reducer::Avg),
                ..FieldOverrides::default()
            },
        );
        changes.derived_fields.insert(
            "region".into(),
            DerivedField {
                kind: DerivedKind::ImpliedComponent {
                    codomain: "nrx".into(),
                },
                values: BTreeMap::from([("a.csv".to_string(), "east".to_string())]),
                field: EtlField::new(
                    "region",
                    PurposeProps::with_defaults(Purpose::MeasurementComponent, &ReducerDefaults::default()),
                ),
            },
        );

        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(json["nrx"]["codomainReducer"], "AVG");
        assert_eq!(json["__derivedFields"]["region"]["kind"]["kind"], "impliedComponent");

        let back: EtlFieldChanges = serde_json::from_value(json).unwrap();
        assert_eq!(back, changes);
    }

    #[test]
    fn test_unit_of_prefers_codomain() {
        let mut object = EtlObject::default();
        object.etl_units.insert("nrx".into(), measurement());
        object.etl_units.insert(
            "date".into(),
            EtlUnit::Quality {
                subject: "NPI".into(),
                codomain: "date".into(),
                codomain_reducer: Reducer::First,
            },
        );
        assert_eq!(object.unit_of("date").unwrap().codomain(), "date");
        assert_eq!(object.units_of("date").len(), 2);
        assert_eq!(object.unit_of("channel").unwrap().codomain(), "nrx");
    }
}
