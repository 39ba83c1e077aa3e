//! FILENAME: etl-model/src/update.rs
//! PURPOSE: Pure single-field edit application.
//! CONTEXT: `update_field` never touches the caller's field; it returns the
//! edited copy plus a flag telling the caller whether derived-field synthesis
//! (wide-to-long, implied measurement) has to run again before re-pivoting.

use serde_json::Value;

use crate::config::ReducerDefaults;
use crate::error::{EtlError, EtlResult};
use crate::field::{FileField, Purpose, PurposeProps};
use crate::logging::{log_debug, log_warn};
use crate::time::{derive_spans, Interval, IntervalUnit, TimeReference};

/// Edits to the nested time descriptor of a measurement-time field.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeEdit {
    Reference(TimeReference),
    Interval(Interval),
    IntervalUnit(Option<IntervalUnit>),
    IntervalCount(Option<u32>),
}

/// One user edit to a file field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    Enabled(bool),
    Alias(String),
    Purpose(Purpose),
    Format(Option<String>),
    NullValue(Option<String>),
    /// Adds `from -> to`, or removes `from` when `to` is `None`.
    MapSymbol { from: String, to: Option<String> },
    Time(TimeEdit),
    /// Any key the engine does not know; assigned verbatim into `extras`.
    Other { key: String, value: Value },
}

impl FieldEdit {
    /// Parses the string-keyed form used by the form layer.
    pub fn from_key_value(key: &str, value: Value) -> EtlResult<Self> {
        let invalid = |reason: &str| EtlError::InvalidEdit {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let edit = match key {
            "enabled" => FieldEdit::Enabled(value.as_bool().ok_or_else(|| invalid("expected a boolean"))?),
            "field-alias" => {
                let alias = value.as_str().ok_or_else(|| invalid("expected a string"))?;
                if alias.trim().is_empty() {
                    return Err(invalid("alias cannot be empty"));
                }
                FieldEdit::Alias(alias.to_string())
            }
            "purpose" => {
                let code = value.as_str().ok_or_else(|| invalid("expected a string"))?;
                FieldEdit::Purpose(Purpose::parse(code).ok_or_else(|| invalid("unknown purpose"))?)
            }
            "format" => FieldEdit::Format(optional_string(&value).map_err(|r| invalid(r))?),
            "null-value" => FieldEdit::NullValue(optional_string(&value).map_err(|r| invalid(r))?),
            "map-symbols.arrows" => {
                let (from, to) = match &value {
                    Value::Object(map) => (
                        map.get("from").and_then(Value::as_str),
                        map.get("to").cloned().unwrap_or(Value::Null),
                    ),
                    Value::Array(pair) if pair.len() == 2 => (pair[0].as_str(), pair[1].clone()),
                    _ => (None, Value::Null),
                };
                let from = from.ok_or_else(|| invalid("expected {from, to} or [from, to]"))?;
                FieldEdit::MapSymbol {
                    from: from.to_string(),
                    to: optional_string(&to).map_err(|r| invalid(r))?,
                }
            }
            "time.reference" => FieldEdit::Time(TimeEdit::Reference(
                serde_json::from_value(value).map_err(|e| invalid(&e.to_string()))?,
            )),
            "time.interval" => FieldEdit::Time(TimeEdit::Interval(
                serde_json::from_value(value).map_err(|e| invalid(&e.to_string()))?,
            )),
            "time.interval.unit" => {
                let unit = match optional_string(&value).map_err(|r| invalid(r))? {
                    Some(code) => Some(IntervalUnit::parse(&code).ok_or_else(|| invalid("unknown unit"))?),
                    None => None,
                };
                FieldEdit::Time(TimeEdit::IntervalUnit(unit))
            }
            "time.interval.count" => {
                let count = match &value {
                    Value::Null => None,
                    v => Some(
                        v.as_u64()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| invalid("expected a positive integer"))?,
                    ),
                };
                FieldEdit::Time(TimeEdit::IntervalCount(count))
            }
            other => FieldEdit::Other {
                key: other.to_string(),
                value,
            },
        };
        Ok(edit)
    }

    pub fn key(&self) -> &str {
        match self {
            FieldEdit::Enabled(_) => "enabled",
            FieldEdit::Alias(_) => "field-alias",
            FieldEdit::Purpose(_) => "purpose",
            FieldEdit::Format(_) => "format",
            FieldEdit::NullValue(_) => "null-value",
            FieldEdit::MapSymbol { .. } => "map-symbols.arrows",
            FieldEdit::Time(TimeEdit::Reference(_)) => "time.reference",
            FieldEdit::Time(TimeEdit::Interval(_)) => "time.interval",
            FieldEdit::Time(TimeEdit::IntervalUnit(_)) => "time.interval.unit",
            FieldEdit::Time(TimeEdit::IntervalCount(_)) => "time.interval.count",
            FieldEdit::Other { key, .. } => key,
        }
    }
}

fn optional_string(value: &Value) -> Result<Option<String>, &'static str> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err("expected a string or null"),
    }
}

/// The edited field and whether derived fields must be re-synthesized.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub field: FileField,
    pub stale_derived_fields: bool,
}

/// Applies one edit to a copy of `field`, seeding the reducers of a
/// retyped field from the built-in defaults.
pub fn update_field(field: &FileField, edit: FieldEdit) -> EtlResult<UpdateOutcome> {
    update_field_with(field, edit, &ReducerDefaults::default())
}

/// Applies one edit to a copy of `field`; a purpose change seeds reducers
/// from `defaults`.
pub fn update_field_with(
    field: &FileField,
    edit: FieldEdit,
    defaults: &ReducerDefaults,
) -> EtlResult<UpdateOutcome> {
    let mut field = field.clone();
    let mut stale_derived_fields = false;

    match edit {
        FieldEdit::Enabled(enabled) => {
            field.enabled = enabled;
            stale_derived_fields = true;
        }
        FieldEdit::Alias(alias) => {
            field.alias = alias;
            stale_derived_fields = true;
        }
        FieldEdit::Purpose(purpose) => {
            field.props = field.props.convert(purpose, defaults);
            refresh_spans(&mut field);
            stale_derived_fields = true;
        }
        FieldEdit::Format(format) => {
            field.format = format;
            refresh_spans(&mut field);
        }
        FieldEdit::NullValue(null_value) => {
            field.null_value = null_value;
            refresh_spans(&mut field);
        }
        FieldEdit::MapSymbol { from, to } => match to {
            Some(to) => {
                field.map_symbols.insert(from, to);
            }
            None => {
                field.map_symbols.remove(&from);
            }
        },
        FieldEdit::Time(time_edit) => {
            let key = FieldEdit::Time(time_edit.clone()).key().to_string();
            let PurposeProps::MeasurementTime { time, .. } = &mut field.props else {
                return Err(EtlError::InvalidEdit {
                    key,
                    reason: format!("field '{}' is not a measurement-time field", field.alias),
                });
            };
            match time_edit {
                TimeEdit::Reference(reference) => time.reference = reference,
                TimeEdit::Interval(interval) => time.interval = interval,
                TimeEdit::IntervalUnit(unit) => time.interval.unit = unit,
                TimeEdit::IntervalCount(count) => time.interval.count = count,
            }
            refresh_spans(&mut field);
        }
        FieldEdit::Other { key, value } => {
            log_warn!("UPDATE", "unknown key '{}' on field '{}', assigned directly", key, field.alias);
            field.extras.insert(key, value);
        }
    }

    Ok(UpdateOutcome {
        field,
        stale_derived_fields,
    })
}

/// Re-derives the spans of a measurement-time field from its raw levels.
/// Leaves the spans empty when the format or interval is incomplete.
pub fn refresh_spans(field: &mut FileField) {
    let alias = field.alias.clone();
    let PurposeProps::MeasurementTime { time, spans } = &mut field.props else {
        return;
    };
    match derive_spans(&field.levels, field.null_value.as_deref(), field.format.as_deref(), time) {
        Ok(derived) => {
            *spans = derived.spans;
            *time = derived.time;
        }
        Err(e) => {
            log_debug!("UPDATE", "spans for '{}' not derived: {}", alias, e);
            spans.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Level, Reducer};
    use crate::span::Span;
    use serde_json::json;

    #[test]
    fn test_purpose_change_uses_given_reducers() {
        let defaults = ReducerDefaults {
            mvalue_codomain: Reducer::Max,
            mvalue_slicing: Reducer::Avg,
            ..ReducerDefaults::default()
        };
        let field = FileField::new(1, "specialty", Purpose::Quality);
        let out = update_field_with(&field, FieldEdit::Purpose(Purpose::MeasurementValue), &defaults).unwrap();
        assert!(out.stale_derived_fields);
        assert_eq!(out.field.props.codomain_reducer(), Some(Reducer::Max));
        assert_eq!(out.field.props.slicing_reducer(), Some(Reducer::Avg));

        let out = update_field(&field, FieldEdit::Purpose(Purpose::MeasurementValue)).unwrap();
        assert_eq!(out.field.props.codomain_reducer(), Some(Reducer::Sum));
    }

    fn date_field() -> FileField {
        FileField::new(3, "date", Purpose::MeasurementTime)
            .with_levels(vec![Level::new("2024-01", 5), Level::new("2024-02", 5)])
    }

    #[test]
    fn test_alias_and_enabled_mark_stale() {
        let field = FileField::new(0, "NPI", Purpose::Subject);
        let outcome = update_field(&field, FieldEdit::Alias("npi".into())).unwrap();
        assert_eq!(outcome.field.alias, "npi");
        assert!(outcome.stale_derived_fields);
        // the input is untouched
        assert_eq!(field.alias, "NPI");

        let outcome = update_field(&field, FieldEdit::Enabled(false)).unwrap();
        assert!(!outcome.field.enabled);
        assert!(outcome.stale_derived_fields);
    }

    #[test]
    fn test_purpose_change_reshapes_props() {
        let field = FileField::new(1, "specialty", Purpose::Quality);
        let outcome = update_field(&field, FieldEdit::Purpose(Purpose::MeasurementValue)).unwrap();
        assert!(outcome.stale_derived_fields);
        assert_eq!(outcome.field.props.slicing_reducer(), Some(Reducer::Sum));

        let outcome = update_field(&outcome.field, FieldEdit::Purpose(Purpose::MeasurementTime)).unwrap();
        assert!(outcome.field.time().is_some());
        assert!(outcome.field.spans().is_empty());
    }

    #[test]
    fn test_format_derives_spans_only_when_interval_complete() {
        let outcome = update_field(&date_field(), FieldEdit::Format(Some("%Y-%m".into()))).unwrap();
        assert!(outcome.field.spans().is_empty());
        assert!(!outcome.stale_derived_fields);

        let outcome = update_field(&outcome.field, FieldEdit::Time(TimeEdit::IntervalUnit(Some(IntervalUnit::Month)))).unwrap();
        assert!(outcome.field.spans().is_empty());

        let outcome = update_field(&outcome.field, FieldEdit::Time(TimeEdit::IntervalCount(Some(1)))).unwrap();
        assert_eq!(outcome.field.spans(), &[Span::new(0, 2)]);
        assert_eq!(
            outcome.field.time().unwrap().reference.value.as_deref(),
            Some("2024-01")
        );
    }

    #[test]
    fn test_null_value_excluded_from_spans() {
        let field = date_field()
            .with_format("%Y-%m")
            .with_time(crate::time::TimeDescriptor::new(Interval::new(IntervalUnit::Month, 1)));
        let outcome = update_field(&field, FieldEdit::NullValue(Some("2024-02".into()))).unwrap();
        assert_eq!(outcome.field.spans(), &[Span::new(0, 1)]);
    }

    #[test]
    fn test_map_symbols_add_and_remove() {
        let field = FileField::new(1, "specialty", Purpose::Quality);
        let field = update_field(&field, FieldEdit::MapSymbol { from: "CARD".into(), to: Some("Cardiology".into()) })
            .unwrap()
            .field;
        assert_eq!(field.map_symbols.get("CARD").map(String::as_str), Some("Cardiology"));

        let field = update_field(&field, FieldEdit::MapSymbol { from: "CARD".into(), to: None })
            .unwrap()
            .field;
        assert!(field.map_symbols.is_empty());
    }

    #[test]
    fn test_time_edit_on_quality_is_rejected() {
        let field = FileField::new(1, "specialty", Purpose::Quality);
        let err = update_field(&field, FieldEdit::Time(TimeEdit::IntervalCount(Some(1)))).unwrap_err();
        assert!(matches!(err, EtlError::InvalidEdit { .. }));
    }

    #[test]
    fn test_unknown_key_is_assigned() {
        let edit = FieldEdit::from_key_value("display-width", json!(120)).unwrap();
        let field = FileField::new(0, "NPI", Purpose::Subject);
        let outcome = update_field(&field, edit).unwrap();
        assert_eq!(outcome.field.extras.get("display-width"), Some(&json!(120)));
        assert!(!outcome.stale_derived_fields);
    }

    #[test]
    fn test_parse_string_keys() {
        assert_eq!(
            FieldEdit::from_key_value("purpose", json!("mspan")).unwrap(),
            FieldEdit::Purpose(Purpose::MeasurementTime)
        );
        assert_eq!(
            FieldEdit::from_key_value("map-symbols.arrows", json!(["a", "A"])).unwrap(),
            FieldEdit::MapSymbol { from: "a".into(), to: Some("A".into()) }
        );
        assert_eq!(
            FieldEdit::from_key_value("time.interval.unit", json!("M")).unwrap(),
            FieldEdit::Time(TimeEdit::IntervalUnit(Some(IntervalUnit::Month)))
        );
        assert_eq!(
            FieldEdit::from_key_value("format", json!(null)).unwrap(),
            FieldEdit::Format(None)
        );
        assert!(FieldEdit::from_key_value("enabled", json!("yes")).is_err());
        assert!(FieldEdit::from_key_value("field-alias", json!("  ")).is_err());
        assert!(FieldEdit::from_key_value("purpose", json!("bogus")).is_err());
    }
}
