//! FILENAME: etl-engine/src/derived.rs
//! PURPOSE: Construction of derived fields recorded in `__derivedFields`.
//! CONTEXT: A derived field has no file column behind it. Its sources mirror
//! the sources of the field it is anchored to (the measurement codomain for
//! an implied component, the subject for an implied quality), each carrying
//! the constant value that file contributes. The same construction runs
//! when the user creates the field and on every reconcile.

use std::collections::BTreeMap;

use etl_model::logging::log_debug;
use etl_model::{
    merge_levels, DerivedField, DerivedKind, EngineConfig, EtlError, EtlField, EtlObject,
    EtlResult, EtlUnit, FieldOrigin, FileField, ImpliedValueDefault, Level, Purpose,
    PurposeProps, Source,
};

/// The anchor's sources, ordered by filename, or `None` when the anchor is
/// gone (or no longer the right kind of field).
pub fn anchor_sources<'a>(kind: &DerivedKind, object: &'a EtlObject) -> Option<Vec<&'a Source>> {
    let anchor = match kind {
        DerivedKind::ImpliedComponent { codomain } => {
            object.etl_units.get(codomain).filter(|u| u.is_measurement())?;
            object.etl_fields.get(codomain)?
        }
        DerivedKind::ImpliedQuality { subject } => object
            .etl_fields
            .get(subject)
            .filter(|f| f.purpose() == Purpose::Subject)?,
    };
    let mut sources: Vec<&Source> = anchor.sources.iter().collect();
    sources.sort_by(|a, b| a.filename.cmp(&b.filename));
    Some(sources)
}

/// Checks that a derived field of `kind` can be created in `object`.
pub fn check_anchor(kind: &DerivedKind, object: &EtlObject) -> EtlResult<()> {
    let name = kind.anchor();
    let field = object
        .etl_fields
        .get(name)
        .ok_or_else(|| EtlError::UnknownField(name.to_string()))?;
    match kind {
        DerivedKind::ImpliedComponent { .. } if !object.etl_units.get(name).is_some_and(EtlUnit::is_measurement) => {
            Err(EtlError::InvalidState(format!("'{}' is not the codomain of a measurement unit", name)))
        }
        DerivedKind::ImpliedQuality { .. } if field.purpose() != Purpose::Subject => {
            Err(EtlError::InvalidState(format!("'{}' is not a subject", name)))
        }
        _ => Ok(()),
    }
}

/// Value a file gets when the user has not entered one.
pub fn default_value(field_name: &str, filename: &str, config: &EngineConfig) -> String {
    match config.implied_component_default {
        ImpliedValueDefault::Filename => filename.to_string(),
        ImpliedValueDefault::FieldName => field_name.to_string(),
    }
}

/// Rebuilds the derived field `name` against `object`.
///
/// Values recorded for files that still back the anchor are kept; newly
/// contributing files get the configured default. Returns `None` when the
/// anchor is gone.
pub fn build_derived(
    name: &str,
    derived: &DerivedField,
    object: &EtlObject,
    config: &EngineConfig,
) -> Option<DerivedField> {
    let anchors = anchor_sources(&derived.kind, object)?;
    let purpose = derived.kind.purpose();

    let mut values = BTreeMap::new();
    let mut sources = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        let value = derived
            .values
            .get(&anchor.filename)
            .cloned()
            .unwrap_or_else(|| default_value(name, &anchor.filename, config));
        let count: u64 = anchor.field.levels.iter().map(Level::count).sum();

        let mut field = FileField::new(anchor.field.header_idx, name, purpose)
            .with_origin(FieldOrigin::Implied)
            .with_levels(vec![Level::new(value.clone(), count)]);
        field.props = PurposeProps::with_defaults(purpose, &config.reducers);

        values.insert(anchor.filename.clone(), value);
        sources.push(Source::new(anchor.filename.clone(), field));
    }

    let mut field = EtlField::new(name, PurposeProps::with_defaults(purpose, &config.reducers));
    field.levels = merge_levels(sources.iter().flat_map(|s| s.field.levels.iter()));
    field.sources = sources;
    field.derived = true;

    log_debug!("RECONCILE", "derived '{}' built from {} file(s)", name, values.len());
    Some(DerivedField {
        kind: derived.kind.clone(),
        values,
        field,
    })
}

/// Inserts a built derived field into `object`, attaching it to its unit.
pub fn insert_derived(object: &mut EtlObject, derived: &DerivedField, config: &EngineConfig) {
    let name = derived.field.name.clone();
    match &derived.kind {
        DerivedKind::ImpliedComponent { codomain } => {
            if let Some(EtlUnit::Measurement { mcomps, .. }) = object.etl_units.get_mut(codomain) {
                if !mcomps.contains(&name) {
                    mcomps.push(name.clone());
                }
            }
        }
        DerivedKind::ImpliedQuality { subject } => {
            object.etl_units.insert(
                name.clone(),
                EtlUnit::Quality {
                    subject: subject.clone(),
                    codomain: name.clone(),
                    codomain_reducer: config.reducers.quality_codomain,
                },
            );
        }
    }
    object.etl_fields.insert(name, derived.field.clone());
}

/// A not yet built derived field of `kind`.
pub fn new_derived(name: &str, kind: DerivedKind, values: BTreeMap<String, String>, config: &EngineConfig) -> DerivedField {
    let props = PurposeProps::with_defaults(kind.purpose(), &config.reducers);
    let mut field = EtlField::new(name, props);
    field.derived = true;
    DerivedField { kind, values, field }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::pivot;
    use etl_model::FileRecord;

    fn object() -> EtlObject {
        let file = |name: &str| {
            FileRecord::new(
                name,
                5,
                vec![
                    FileField::new(0, "NPI", Purpose::Subject),
                    FileField::new(1, "date", Purpose::MeasurementTime),
                    FileField::new(2, "nrx", Purpose::MeasurementValue),
                ],
            )
        };
        pivot(&[file("b.csv"), file("a.csv")], &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_component_sources_follow_anchor_by_filename() {
        let object = object();
        let config = EngineConfig::default();
        let values = BTreeMap::from([("b.csv".to_string(), "mail".to_string())]);
        let derived = new_derived("channel", DerivedKind::ImpliedComponent { codomain: "nrx".into() }, values, &config);

        let built = build_derived("channel", &derived, &object, &config).unwrap();
        let files: Vec<&str> = built.field.filenames().collect();
        assert_eq!(files, vec!["a.csv", "b.csv"]);
        assert_eq!(built.values["a.csv"], "a.csv");
        assert_eq!(built.values["b.csv"], "mail");
        assert_eq!(built.field.sources[0].field.header_idx, 2);

        let mut object = object;
        insert_derived(&mut object, &built, &config);
        assert!(object.etl_units["nrx"].contains("channel"));
        assert!(object.etl_fields["channel"].derived);
    }

    #[test]
    fn test_quality_forms_its_own_unit() {
        let mut object = object();
        let config = EngineConfig {
            implied_component_default: ImpliedValueDefault::FieldName,
            ..EngineConfig::default()
        };
        let derived = new_derived("source", DerivedKind::ImpliedQuality { subject: "NPI".into() }, BTreeMap::new(), &config);
        let built = build_derived("source", &derived, &object, &config).unwrap();
        assert!(built.values.values().all(|v| v == "source"));

        insert_derived(&mut object, &built, &config);
        assert_eq!(object.etl_units["source"].subject(), "NPI");
    }

    #[test]
    fn test_missing_anchor() {
        let object = object();
        let config = EngineConfig::default();
        let kind = DerivedKind::ImpliedComponent { codomain: "trx".into() };
        assert!(matches!(check_anchor(&kind, &object), Err(EtlError::UnknownField(_))));

        let kind = DerivedKind::ImpliedComponent { codomain: "date".into() };
        assert!(matches!(check_anchor(&kind, &object), Err(EtlError::InvalidState(_))));

        let derived = new_derived("x", kind, BTreeMap::new(), &config);
        assert!(build_derived("x", &derived, &object, &config).is_none());
    }
}
