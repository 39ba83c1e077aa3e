//! FILENAME: etl-engine/src/pivot.rs
//! Pivot Engine - stacks same-named fields across files into the canonical model.
//!
//! Input is every FileRecord, already augmented by the wide-to-long and
//! implied-measurement builders.
//!
//! Algorithm:
//! 1. Keep enabled files and, within them, enabled pivot fields
//! 2. Group fields by alias; one Source per contributing file, in file order
//! 3. Build one EtlField per alias (purpose of the first source, reducers
//!    seeded from config, symbol tables merged, time spans unioned)
//! 4. Build unit fragments per file and merge them by codomain

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use etl_model::logging::{log_debug, log_enter, log_exit, log_warn};
use etl_model::{
    rebase_spans, union_all, Components, EngineConfig, EtlError, EtlField, EtlObject, EtlResult,
    EtlUnit, FileRecord, Purpose, PurposeProps, Source, Span, SymbolMap, TimeDescriptor,
};

/// Pivots `files` into EtlFields and EtlUnits.
///
/// Fails with `NoEnabledFiles` when no file is enabled.
pub fn pivot(files: &[FileRecord], config: &EngineConfig) -> EtlResult<EtlObject> {
    log_enter!("PIVOT", "pivot", "files={}", files.len());

    let enabled: Vec<&FileRecord> = files.iter().filter(|f| f.enabled).collect();
    if enabled.is_empty() {
        log_warn!("PIVOT", "pivot called with no enabled files");
        return Err(EtlError::NoEnabledFiles);
    }

    let etl_fields: BTreeMap<String, EtlField> = stack_sources(&enabled)
        .into_iter()
        .filter_map(|(name, sources)| build_etl_field(&name, sources, config).map(|f| (name, f)))
        .collect();
    let etl_units = build_units(&enabled, config);

    log_exit!("PIVOT", "pivot", "fields={} units={}", etl_fields.len(), etl_units.len());
    Ok(EtlObject {
        etl_fields,
        etl_units,
    })
}

// ============================================================================
// FIELDS
// ============================================================================

fn stack_sources(files: &[&FileRecord]) -> BTreeMap<String, Vec<Source>> {
    let mut stacked: BTreeMap<String, Vec<Source>> = BTreeMap::new();
    for file in files {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for field in file.pivot_fields() {
            if !seen.insert(field.alias.as_str()) {
                log_warn!(
                    "PIVOT",
                    "{}: alias '{}' used twice, header {} ignored",
                    file.filename,
                    field.alias,
                    field.header_idx
                );
                continue;
            }
            stacked
                .entry(field.alias.clone())
                .or_default()
                .push(Source::new(file.filename.clone(), field.clone()));
        }
    }
    stacked
}

/// Builds the canonical field for one alias from its sources.
pub fn build_etl_field(name: &str, sources: Vec<Source>, config: &EngineConfig) -> Option<EtlField> {
    let purpose = sources.first()?.field.purpose();
    for other in sources.iter().filter(|s| s.field.purpose() != purpose) {
        log_warn!(
            "PIVOT",
            "'{}' is {} in {} but {} in {}",
            name,
            other.field.purpose(),
            other.filename,
            purpose,
            sources[0].filename
        );
    }

    let props = match purpose {
        Purpose::MeasurementTime => {
            let (time, spans) = stack_time(name, &sources);
            PurposeProps::MeasurementTime { time, spans }
        }
        other => PurposeProps::with_defaults(other, &config.reducers),
    };

    let mut map_symbols = SymbolMap::new();
    for source in &sources {
        map_symbols.extend(source.field.map_symbols.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let mut field = EtlField::new(name, props);
    field.map_symbols = map_symbols;
    field.null_value_expansion = sources.iter().find_map(|s| s.field.null_value.clone());
    field.format = sources.iter().find_map(|s| s.field.format.clone());
    field.sources = sources;
    Some(field)
}

/// Time descriptor and unioned spans of a measurement-time field.
///
/// Spans of every source are re-expressed against the first source whose
/// reference resolves to a date; sources with another interval are left out.
fn stack_time(name: &str, sources: &[Source]) -> (TimeDescriptor, Vec<Span>) {
    let anchor = sources.iter().find_map(|s| {
        let time = s.field.time()?;
        time.reference_date(s.field.format.as_deref())?;
        Some(time)
    });
    let time = anchor
        .or_else(|| sources.iter().find_map(|s| s.field.time()))
        .cloned()
        .unwrap_or_default();

    let mut groups: Vec<Vec<Span>> = Vec::with_capacity(sources.len());
    for source in sources {
        let spans = source.field.spans();
        let Some(own) = source.field.time().filter(|_| !spans.is_empty()) else {
            continue;
        };
        let rebased = if own.reference == time.reference {
            Some(spans.to_vec())
        } else if own.interval.resolved() == time.interval.resolved() {
            rebase_spans(spans, own, &time.reference, source.field.format.as_deref())
        } else {
            None
        };
        match rebased {
            Some(rebased) => groups.push(rebased),
            None => log_debug!(
                "PIVOT",
                "'{}': spans from {} cannot be aligned, skipped",
                name,
                source.filename
            ),
        }
    }

    let spans = union_all(groups.iter().map(Vec::as_slice)).unwrap_or_else(|e| {
        log_warn!("PIVOT", "'{}': spans not combined: {}", name, e);
        Vec::new()
    });
    (time, spans)
}

// ============================================================================
// UNITS
// ============================================================================

fn build_units(files: &[&FileRecord], config: &EngineConfig) -> BTreeMap<String, EtlUnit> {
    let mut units: BTreeMap<String, EtlUnit> = BTreeMap::new();
    for file in files {
        for fragment in unit_fragments(file, config) {
            merge_fragment(&mut units, fragment, &file.filename);
        }
    }
    units
}

/// Units one file describes on its own.
fn unit_fragments(file: &FileRecord, config: &EngineConfig) -> Vec<EtlUnit> {
    let qualities = file.of_purpose(Purpose::Quality);
    let values = file.of_purpose(Purpose::MeasurementValue);
    if qualities.is_empty() && values.is_empty() {
        return Vec::new();
    }

    let Some(subject) = file.first_of(Purpose::Subject) else {
        log_warn!("PIVOT", "{}: no subject field, units skipped", file.filename);
        return Vec::new();
    };
    let mspan = file.first_of(Purpose::MeasurementTime);
    let mcomps: Components = file
        .of_purpose(Purpose::MeasurementComponent)
        .iter()
        .map(|f| f.alias.clone())
        .collect();

    let mut fragments = Vec::with_capacity(qualities.len() + values.len());
    for quality in qualities {
        fragments.push(EtlUnit::Quality {
            subject: subject.alias.clone(),
            codomain: quality.alias.clone(),
            codomain_reducer: config.reducers.quality_codomain,
        });
    }
    for value in values {
        let Some(mspan) = mspan else {
            log_warn!(
                "PIVOT",
                "{}: '{}' has no measurement-time field, unit skipped",
                file.filename,
                value.alias
            );
            continue;
        };
        fragments.push(EtlUnit::Measurement {
            subject: subject.alias.clone(),
            codomain: value.alias.clone(),
            mspan: mspan.alias.clone(),
            mcomps: mcomps.clone(),
            codomain_reducer: config.reducers.mvalue_codomain,
            slicing_reducer: config.reducers.mvalue_slicing,
        });
    }
    fragments
}

/// Unions a fragment into the units keyed by codomain. A later file only
/// appends its components to a measurement unit, names it shares with
/// earlier files included; everything else keeps the first file's values.
fn merge_fragment(units: &mut BTreeMap<String, EtlUnit>, fragment: EtlUnit, filename: &str) {
    let key = fragment.codomain().to_string();
    let Some(existing) = units.get_mut(&key) else {
        units.insert(key, fragment);
        return;
    };
    match (existing, fragment) {
        (EtlUnit::Measurement { mcomps, mspan, .. }, EtlUnit::Measurement { mcomps: more, mspan: other, .. }) => {
            if *mspan != other {
                log_debug!("PIVOT", "{}: unit '{}' keeps mspan '{}' over '{}'", filename, key, mspan, other);
            }
            mcomps.extend(more);
        }
        (EtlUnit::Quality { .. }, EtlUnit::Quality { .. }) => {}
        _ => log_warn!("PIVOT", "{}: '{}' is a quality in one file and a measurement in another", filename, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_model::{FieldEdit, FileField, Interval, IntervalUnit, Level, TimeEdit};
    use etl_model::update_field;

    fn date_field(idx: usize, months: &[&str]) -> FileField {
        let field = FileField::new(idx, "date", Purpose::MeasurementTime)
            .with_levels(months.iter().map(|m| Level::new(*m, 1)).collect())
            .with_format("%Y-%m");
        update_field(
            &field,
            FieldEdit::Time(TimeEdit::Interval(Interval::new(IntervalUnit::Month, 1))),
        )
        .unwrap()
        .field
    }

    fn file(name: &str, comps: &[&str], months: &[&str]) -> FileRecord {
        let mut fields = vec![
            FileField::new(0, "NPI", Purpose::Subject),
            FileField::new(1, "specialty", Purpose::Quality),
            FileField::new(2, "nrx", Purpose::MeasurementValue),
            date_field(3, months),
        ];
        for (i, c) in comps.iter().enumerate() {
            fields.push(FileField::new(4 + i, *c, Purpose::MeasurementComponent));
        }
        FileRecord::new(name, 100, fields)
    }

    #[test]
    fn test_two_files_pivot() {
        let files = vec![file("a.csv", &[], &["2024-01"]), file("b.csv", &[], &["2024-02"])];
        let object = pivot(&files, &EngineConfig::default()).unwrap();

        let names: Vec<&str> = object.etl_fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["NPI", "date", "nrx", "specialty"]);
        let units: Vec<&str> = object.etl_units.keys().map(String::as_str).collect();
        assert_eq!(units, vec!["nrx", "specialty"]);
        assert_eq!(object.etl_fields["NPI"].sources.len(), 2);
        assert_eq!(
            object.etl_fields["nrx"].props.codomain_reducer(),
            Some(etl_model::Reducer::Sum)
        );
    }

    #[test]
    fn test_time_spans_union_across_references() {
        let files = vec![file("a.csv", &[], &["2024-01"]), file("b.csv", &[], &["2024-02", "2024-03"])];
        let object = pivot(&files, &EngineConfig::default()).unwrap();
        let date = &object.etl_fields["date"];
        assert_eq!(date.spans(), &[Span::new(0, 3)]);
        assert_eq!(date.time().unwrap().reference.value.as_deref(), Some("2024-01"));
    }

    #[test]
    fn test_no_enabled_files() {
        let mut only = file("a.csv", &[], &[]);
        only.enabled = false;
        assert_eq!(pivot(&[only], &EngineConfig::default()), Err(EtlError::NoEnabledFiles));
        assert_eq!(pivot(&[], &EngineConfig::default()), Err(EtlError::NoEnabledFiles));
    }

    #[test]
    fn test_later_files_append_mcomps() {
        let files = vec![
            file("a.csv", &["channel"], &["2024-01"]),
            file("b.csv", &["channel", "payer"], &["2024-01"]),
        ];
        let object = pivot(&files, &EngineConfig::default()).unwrap();
        assert_eq!(
            object.etl_units["nrx"].mcomps(),
            &["channel".to_string(), "channel".to_string(), "payer".to_string()]
        );
    }

    #[test]
    fn test_disabled_source_is_dropped() {
        let mut files = vec![file("a.csv", &[], &["2024-01"]), file("b.csv", &[], &["2024-01"])];
        files[1].fields[1].enabled = false;
        let object = pivot(&files, &EngineConfig::default()).unwrap();
        let specialty = &object.etl_fields["specialty"];
        assert_eq!(specialty.sources.len(), 1);
        assert_eq!(specialty.sources[0].filename, "a.csv");
    }

    #[test]
    fn test_symbols_last_writer_wins() {
        let mut files = vec![file("a.csv", &[], &[]), file("b.csv", &[], &[])];
        files[0].fields[1].map_symbols.insert("IM".into(), "Internal".into());
        files[1].fields[1].map_symbols.insert("IM".into(), "Internal Medicine".into());
        files[1].fields[1].null_value = Some("NA".into());
        let object = pivot(&files, &EngineConfig::default()).unwrap();
        let specialty = &object.etl_fields["specialty"];
        assert_eq!(specialty.map_symbols["IM"], "Internal Medicine");
        assert_eq!(specialty.null_value_expansion.as_deref(), Some("NA"));
    }

    #[test]
    fn test_missing_mspan_skips_measurement_unit() {
        let mut files = vec![file("a.csv", &[], &[])];
        files[0].fields[3].enabled = false;
        let object = pivot(&files, &EngineConfig::default()).unwrap();
        assert!(object.etl_units.contains_key("specialty"));
        assert!(!object.etl_units.contains_key("nrx"));
        assert!(object.etl_fields.contains_key("nrx"));
    }
}
