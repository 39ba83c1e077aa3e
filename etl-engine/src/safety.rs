//! FILENAME: etl-engine/src/safety.rs
//! PURPOSE: Rename and remove of canonical fields, checked against the unit graph.
//! CONTEXT: Neither operation edits the canonical model directly. They
//! return updated file records and/or recorded changes; the caller re-pivots
//! and reconciles. Conflicts are reported as fixable errors so the form
//! layer can offer a correction, and the inputs are never modified.

use std::collections::BTreeSet;

use etl_model::logging::{log_debug, log_enter, log_exit, log_info};
use etl_model::{
    suggest_free_name, EtlError, EtlFieldChanges, EtlObject, EtlResult, EtlUnit, FileRecords,
    Fix, Purpose,
};

/// Read-only view of the state the operations validate against.
#[derive(Debug, Clone, Copy)]
pub struct SafetyContext<'a> {
    pub file_records: &'a FileRecords,
    pub etl_object: &'a EtlObject,
    pub etl_field_changes: &'a EtlFieldChanges,
}

/// Updated inputs for the next pivot. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyOutcome {
    pub file_records: Option<FileRecords>,
    pub etl_field_changes: Option<EtlFieldChanges>,
}

impl SafetyOutcome {
    pub fn is_noop(&self) -> bool {
        self.file_records.is_none() && self.etl_field_changes.is_none()
    }
}

pub type RenameOutcome = SafetyOutcome;
pub type RemoveOutcome = SafetyOutcome;

// ============================================================================
// RENAME
// ============================================================================

/// Renames the canonical field `old` to `new_name`.
///
/// Fails (fixable) when `new_name` belongs to a field of another purpose,
/// when either name is a derived field and `new_name` is taken, or when some
/// file already has both names as separate fields.
pub fn rename_etl_field(old: &str, new_name: &str, ctx: SafetyContext<'_>) -> EtlResult<RenameOutcome> {
    log_enter!("SAFETY", "rename_etl_field", "{} -> {}", old, new_name);

    let field = ctx
        .etl_object
        .etl_fields
        .get(old)
        .ok_or_else(|| EtlError::UnknownField(old.to_string()))?;
    let new_name = new_name.trim();
    if new_name.is_empty() {
        return Err(EtlError::InvalidEdit {
            key: "field-alias".into(),
            reason: "a field name cannot be empty".into(),
        });
    }
    if new_name == old {
        return Ok(RenameOutcome::default());
    }

    let taken = |n: &str| {
        ctx.etl_object.etl_fields.contains_key(n) || ctx.etl_field_changes.is_derived(n)
    };
    if let Some(existing) = ctx.etl_object.etl_fields.get(new_name) {
        if existing.purpose() != field.purpose() {
            return Err(EtlError::fixable(
                format!(
                    "'{}' is already a {} field; '{}' is {}",
                    new_name,
                    existing.purpose(),
                    old,
                    field.purpose()
                ),
                Fix::for_field(old)
                    .conflicts_with(new_name)
                    .suggest(suggest_free_name(new_name, taken)),
            ));
        }
    }
    let old_derived = field.derived || ctx.etl_field_changes.is_derived(old);
    let new_derived = ctx.etl_field_changes.is_derived(new_name);
    if (old_derived || new_derived) && taken(new_name) {
        return Err(EtlError::fixable(
            format!("'{}' is already a field; derived fields cannot be merged", new_name),
            Fix::for_field(old)
                .conflicts_with(new_name)
                .suggest(suggest_free_name(new_name, taken)),
        ));
    }
    for file in ctx.file_records {
        let has_old = file.pivot_fields().any(|f| f.alias == old);
        let has_new = file.fields.iter().any(|f| f.alias == new_name);
        if has_old && has_new {
            return Err(EtlError::fixable(
                format!("'{}' and '{}' are separate fields in {}", old, new_name, file.filename),
                Fix::for_field(old)
                    .conflicts_with(new_name)
                    .in_file(file.filename.clone())
                    .suggest(suggest_free_name(new_name, taken)),
            ));
        }
    }

    let mut changes = ctx.etl_field_changes.clone();
    rename_in_changes(&mut changes, old, new_name);

    let outcome = if old_derived {
        log_info!("SAFETY", "derived '{}' renamed to '{}'", old, new_name);
        RenameOutcome {
            file_records: None,
            etl_field_changes: Some(changes),
        }
    } else {
        let mut records = ctx.file_records.clone();
        let mut renamed = 0;
        for file in records.iter_mut() {
            if file.rename_alias(old, new_name)? {
                renamed += 1;
            }
        }
        log_info!("SAFETY", "'{}' renamed to '{}' in {} file(s)", old, new_name, renamed);
        RenameOutcome {
            file_records: Some(records),
            etl_field_changes: Some(changes),
        }
    };

    log_exit!("SAFETY", "rename_etl_field");
    Ok(outcome)
}

/// Moves recorded overrides and derived-field references from `old` to `new_name`.
fn rename_in_changes(changes: &mut EtlFieldChanges, old: &str, new_name: &str) {
    if let Some(overrides) = changes.props.remove(old) {
        changes.record(new_name, overrides);
    }
    if let Some(mut derived) = changes.derived_fields.remove(old) {
        derived.field.name = new_name.to_string();
        for source in derived.field.sources.iter_mut() {
            source.field.alias = new_name.to_string();
            source.field.header = new_name.to_string();
        }
        changes.derived_fields.insert(new_name.to_string(), derived);
    }
    for derived in changes.derived_fields.values_mut() {
        derived.kind.rename_anchor(old, new_name);
    }
}

// ============================================================================
// REMOVE
// ============================================================================

/// Removes the canonical field `name`.
///
/// File fields are disabled rather than deleted. Removing a unit's codomain
/// or mspan removes the whole unit; an mspan shared by several units removes
/// all of them. Fails when no unit would be left afterwards, or when `name`
/// is a subject still used by units.
pub fn remove_etl_field(name: &str, ctx: SafetyContext<'_>) -> EtlResult<RemoveOutcome> {
    log_enter!("SAFETY", "remove_etl_field", "{}", name);

    let field = ctx
        .etl_object
        .etl_fields
        .get(name)
        .ok_or_else(|| EtlError::UnknownField(name.to_string()))?;

    if ctx.etl_field_changes.is_derived(name) {
        let mut changes = ctx.etl_field_changes.clone();
        changes.derived_fields.remove(name);
        changes.props.remove(name);
        log_info!("SAFETY", "derived '{}' removed", name);
        return Ok(RemoveOutcome {
            file_records: None,
            etl_field_changes: Some(changes),
        });
    }

    let units = &ctx.etl_object.etl_units;
    if field.purpose() == Purpose::Subject {
        let dependents: Vec<&str> = units
            .values()
            .filter(|u| u.subject() == name)
            .map(EtlUnit::codomain)
            .collect();
        if !dependents.is_empty() {
            return Err(EtlError::fixable(
                format!("'{}' is the subject of {}", name, dependents.join(", ")),
                Fix::for_field(name).conflicts_with(dependents[0]),
            ));
        }
    }

    let removed: Vec<&EtlUnit> = units
        .values()
        .filter(|u| u.codomain() == name || u.mspan() == Some(name))
        .collect();
    if let Some(unit) = ctx.etl_object.unit_of(name) {
        if units.len() == 1 || removed.len() == units.len() {
            return Err(EtlError::fixable(
                format!("removing '{}' would leave no units (it belongs to '{}')", name, unit.codomain()),
                Fix::for_field(name).conflicts_with(unit.codomain()),
            ));
        }
    }

    let mut records = ctx.file_records.clone();
    if removed.is_empty() {
        for file in records.iter_mut() {
            file.set_alias_enabled(name, false);
        }
        log_info!("SAFETY", "'{}' disabled in every file", name);
    } else {
        disable_units(&mut records, &removed);
    }

    let mut changes = ctx.etl_field_changes.clone();
    changes.props.remove(name);

    log_exit!("SAFETY", "remove_etl_field");
    Ok(RemoveOutcome {
        file_records: Some(records),
        etl_field_changes: Some(changes),
    })
}

/// Disables every field of `units`. Codomains go everywhere; an mspan or
/// component stays enabled in a file where another value still needs it.
fn disable_units(records: &mut FileRecords, units: &[&EtlUnit]) {
    let codomains: BTreeSet<&str> = units.iter().map(|u| u.codomain()).collect();
    let shared: BTreeSet<&str> = units
        .iter()
        .flat_map(|u| u.fields())
        .filter(|f| !codomains.contains(f))
        .collect();

    for file in records.iter_mut() {
        for codomain in &codomains {
            file.set_alias_enabled(codomain, false);
        }
        let still_measured = file
            .of_purpose(Purpose::MeasurementValue)
            .iter()
            .any(|f| !codomains.contains(f.alias.as_str()));
        if still_measured {
            log_debug!("SAFETY", "{}: time and components kept for remaining values", file.filename);
            continue;
        }
        for alias in &shared {
            file.set_alias_enabled(alias, false);
        }
    }
    log_info!("SAFETY", "unit(s) {:?} removed", codomains);
}
