//! FILENAME: etl-engine/src/implied.rs
//! PURPOSE: Implied-Measurement synthesis for presence-only files.
//! CONTEXT: A file with a measurement-time column but no value column still
//! measures something: each row is one occurrence. The builder appends a
//! synthetic measurement value (constant "1" per row) tied to that time
//! field. The synthetic field is only rebuilt when the time field it was
//! built for changes, so the user's naming of it is not lost.

use etl_model::logging::{log_debug, log_info};
use etl_model::{
    suggest_free_name, EngineConfig, FieldOrigin, FieldRef, FileField, FileRecord,
    ImpliedMeasurementConfig, Level, Purpose, PurposeProps,
};

/// Re-synthesizes the implied measurement value of `file`.
pub fn build_implied_measurement(file: &FileRecord, config: &EngineConfig) -> FileRecord {
    let mut next = file.clone();
    next.strip_synthetic(&[FieldOrigin::Implied]);

    let has_values = !file.raw_of_purpose(Purpose::MeasurementValue).is_empty();
    let mspan = file
        .raw_of_purpose(Purpose::MeasurementTime)
        .first()
        .map(|f| FieldRef {
            filename: file.filename.clone(),
            alias: f.alias.clone(),
        });

    let Some(mspan) = mspan.filter(|_| !has_values) else {
        if next.implied_mvalue.take().is_some() {
            log_info!("IMPLIED", "{}: implied measurement removed", file.filename);
        }
        return next;
    };

    let implied = match &file.implied_mvalue {
        Some(existing) if existing.mspan == mspan => {
            log_debug!("IMPLIED", "{}: time field unchanged, keeping '{}'", file.filename, existing.field.alias);
            existing.clone()
        }
        _ => {
            let alias = suggest_unused_alias(&next, &config.implied_mvalue_name);
            log_info!("IMPLIED", "{}: '{}' implied by time field '{}'", file.filename, alias, mspan.alias);
            let mut field = FileField::new(0, alias, Purpose::MeasurementValue)
                .with_origin(FieldOrigin::Implied)
                .with_levels(vec![Level::new("1", file.n_rows)]);
            field.props = PurposeProps::with_defaults(Purpose::MeasurementValue, &config.reducers);
            ImpliedMeasurementConfig { mspan, field }
        }
    };

    let mut field = implied.field.clone();
    field.header_idx = next.next_header_idx();
    next.fields.push(field);
    next.implied_mvalue = Some(implied);
    next
}

fn suggest_unused_alias(file: &FileRecord, base: &str) -> String {
    let taken = |name: &str| file.fields.iter().any(|f| f.alias == name);
    if taken(base) {
        suggest_free_name(base, taken)
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence_file() -> FileRecord {
        FileRecord::new(
            "visits.csv",
            25,
            vec![
                FileField::new(0, "NPI", Purpose::Subject),
                FileField::new(1, "date", Purpose::MeasurementTime),
            ],
        )
    }

    #[test]
    fn test_adds_constant_value() {
        let built = build_implied_measurement(&presence_file(), &EngineConfig::default());
        let count = built.field_with_alias("count").unwrap();
        assert_eq!(count.origin, FieldOrigin::Implied);
        assert_eq!(count.levels, vec![Level::new("1", 25)]);
        assert_eq!(count.header_idx, 2);
        assert_eq!(built.implied_mvalue.as_ref().unwrap().mspan.alias, "date");
    }

    #[test]
    fn test_unchanged_time_field_keeps_user_naming() {
        let config = EngineConfig::default();
        let mut built = build_implied_measurement(&presence_file(), &config);
        built.rename_alias("count", "visits").unwrap();

        let rebuilt = build_implied_measurement(&built, &config);
        assert_eq!(rebuilt, built);
        assert!(rebuilt.field_with_alias("visits").is_some());
    }

    #[test]
    fn test_changed_time_field_rebuilds() {
        let config = EngineConfig::default();
        let mut built = build_implied_measurement(&presence_file(), &config);
        built.rename_alias("count", "visits").unwrap();
        built.fields[1].enabled = false;
        built.fields.push(FileField::new(3, "week", Purpose::MeasurementTime));

        let rebuilt = build_implied_measurement(&built, &config);
        assert_eq!(rebuilt.implied_mvalue.as_ref().unwrap().mspan.alias, "week");
        assert!(rebuilt.field_with_alias("count").is_some());
    }

    #[test]
    fn test_value_column_removes_implied() {
        let config = EngineConfig::default();
        let mut built = build_implied_measurement(&presence_file(), &config);
        built.fields.push(FileField::new(5, "nrx", Purpose::MeasurementValue));
        let rebuilt = build_implied_measurement(&built, &config);
        assert!(rebuilt.implied_mvalue.is_none());
        assert!(rebuilt.field_with_alias("count").is_none());
    }

    #[test]
    fn test_alias_collision_gets_free_name() {
        let mut file = presence_file();
        file.fields.push(FileField::new(2, "count", Purpose::Quality));
        let built = build_implied_measurement(&file, &EngineConfig::default());
        assert_eq!(built.implied_mvalue.as_ref().unwrap().field.alias, "count_1");
    }
}
