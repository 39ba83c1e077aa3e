//! FILENAME: etl-engine/src/state.rs
//! PURPOSE: Explicit application state and the operations that move it forward.
//! CONTEXT: The state is the single atomic snapshot the engine works from:
//! file records, the canonical model computed from them, and the recorded
//! user edits. Every operation takes `&self` and returns a new state, so a
//! caller only ever persists a complete, consistent result.
//!
//! A full recompute runs derived-field synthesis on every file, pivots, and
//! replays the recorded edits through the whole reconciliation chain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use etl_model::logging::{log_enter, log_exit, log_info, log_warn};
use etl_model::{
    suggest_free_name, DerivedKind, EngineConfig, EtlError, EtlFieldChanges, EtlObject, EtlResult,
    FieldEdit, FieldOrigin, FieldOverrides, FileRecord, FileRecords, Fix, WideToLongConfig,
};
use etl_model::update_field_with;

use crate::derived::{check_anchor, new_derived};
use crate::implied::build_implied_measurement;
use crate::pivot::pivot;
use crate::reconcile::{Reconcile, Reconciled};
use crate::safety::{remove_etl_field, rename_etl_field, SafetyContext, SafetyOutcome};
use crate::wide_to_long::build_wide_to_long;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub file_records: FileRecords,
    pub etl_object: EtlObject,
    pub etl_field_changes: EtlFieldChanges,
    #[serde(skip)]
    pub config: EngineConfig,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        AppState {
            config,
            ..AppState::default()
        }
    }

    fn with_records(&self, file_records: FileRecords) -> Self {
        AppState {
            file_records,
            ..self.clone()
        }
    }

    fn safety_context(&self) -> SafetyContext<'_> {
        SafetyContext {
            file_records: &self.file_records,
            etl_object: &self.etl_object,
            etl_field_changes: &self.etl_field_changes,
        }
    }

    // ========================================================================
    // RECOMPUTE
    // ========================================================================

    /// Re-synthesizes derived file fields, pivots and reconciles.
    ///
    /// With no enabled file the model is empty and the recorded edits are
    /// kept untouched for when files come back.
    pub fn recompute(&self) -> EtlResult<Self> {
        log_enter!("STATE", "recompute", "files={}", self.file_records.len());

        let records: Vec<FileRecord> = self
            .file_records
            .iter()
            .map(|file| {
                let file = build_wide_to_long(file, None, &self.config);
                build_implied_measurement(&file, &self.config)
            })
            .collect();
        let file_records = FileRecords::from(records);

        let computed = match pivot(file_records.as_slice(), &self.config) {
            Ok(computed) => computed,
            Err(EtlError::NoEnabledFiles) => {
                log_info!("STATE", "no enabled files, model cleared");
                return Ok(AppState {
                    file_records,
                    etl_object: EtlObject::default(),
                    ..self.clone()
                });
            }
            Err(e) => return Err(e),
        };

        let Reconciled {
            etl_object,
            etl_field_changes,
        } = Reconcile::new(computed, self.etl_field_changes.clone(), &self.config)
            .run_all()
            .finish();

        log_exit!("STATE", "recompute", "fields={} units={}", etl_object.etl_fields.len(), etl_object.etl_units.len());
        Ok(AppState {
            file_records,
            etl_object,
            etl_field_changes,
            config: self.config.clone(),
        })
    }

    // ========================================================================
    // FILES
    // ========================================================================

    /// Adds (or replaces) a file and recomputes.
    pub fn add_file(&self, record: FileRecord) -> EtlResult<Self> {
        log_info!("STATE", "file '{}' added with {} field(s)", record.filename, record.fields.len());
        let mut records = self.file_records.clone();
        records.insert(record);
        self.with_records(records).recompute()
    }

    pub fn set_file_enabled(&self, filename: &str, enabled: bool) -> EtlResult<Self> {
        let mut records = self.file_records.clone();
        let file = records
            .get_mut(filename)
            .ok_or_else(|| EtlError::UnknownField(format!("file '{}'", filename)))?;
        file.enabled = enabled;
        self.with_records(records).recompute()
    }

    pub fn remove_file(&self, filename: &str) -> EtlResult<Self> {
        let mut records = self.file_records.clone();
        records
            .remove(filename)
            .ok_or_else(|| EtlError::UnknownField(format!("file '{}'", filename)))?;
        self.with_records(records).recompute()
    }

    /// Applies one edit to the field aliased `alias` in `filename`.
    ///
    /// Wide-to-long fields are edited through their configuration; the
    /// implied value through its own record. A full recompute follows.
    pub fn update_file_field(&self, filename: &str, alias: &str, edit: FieldEdit) -> EtlResult<Self> {
        let mut records = self.file_records.clone();
        let file = records
            .get_mut(filename)
            .ok_or_else(|| EtlError::UnknownField(format!("file '{}'", filename)))?;

        let wide_field = file
            .wide_to_long
            .as_ref()
            .filter(|w| w.field(alias).is_some());
        if let Some(wide) = wide_field {
            let (next, _) = wide.update_synthetic_field(alias, edit)?;
            file.wide_to_long = Some(next);
            return self.with_records(records).recompute();
        }

        if let Some(implied) = file.implied_mvalue.as_mut().filter(|i| i.field.alias == alias) {
            implied.field = update_field_with(&implied.field, edit, &self.config.reducers)?.field;
            return self.with_records(records).recompute();
        }

        let field = file
            .fields
            .iter_mut()
            .find(|f| f.alias == alias && f.origin == FieldOrigin::Raw)
            .ok_or_else(|| EtlError::UnknownField(format!("{} in file '{}'", alias, filename)))?;
        let outcome = update_field_with(field, edit, &self.config.reducers)?;
        *field = outcome.field;
        if outcome.stale_derived_fields {
            log_info!("STATE", "{}: '{}' edited, derived fields rebuilt", filename, alias);
        }
        self.with_records(records).recompute()
    }

    /// Edits the wide-to-long configuration of `filename`.
    ///
    /// `edit` receives the current configuration and the file's row count.
    pub fn edit_wide_to_long<F>(&self, filename: &str, edit: F) -> EtlResult<Self>
    where
        F: FnOnce(&WideToLongConfig, u64) -> EtlResult<WideToLongConfig>,
    {
        let mut records = self.file_records.clone();
        let file = records
            .get_mut(filename)
            .ok_or_else(|| EtlError::UnknownField(format!("file '{}'", filename)))?;
        let wide = file.wide_to_long.as_ref().ok_or_else(|| {
            EtlError::InvalidState(format!("file '{}' is not stacked", filename))
        })?;
        file.wide_to_long = Some(edit(wide, file.n_rows)?);
        self.with_records(records).recompute()
    }

    // ========================================================================
    // CANONICAL FIELDS
    // ========================================================================

    /// Records prop overrides for a canonical field and replays the
    /// override stages on the current model.
    pub fn set_field_props(&self, name: &str, overrides: FieldOverrides) -> EtlResult<Self> {
        if !self.etl_object.etl_fields.contains_key(name) {
            return Err(EtlError::UnknownField(name.to_string()));
        }
        let mut changes = self.etl_field_changes.clone();
        changes.record(name, overrides);

        let Reconciled {
            etl_object,
            etl_field_changes,
        } = Reconcile::new(self.etl_object.clone(), changes, &self.config)
            .apply_source_sequences()
            .apply_field_props()
            .set_global_span_ref()
            .finish();
        Ok(AppState {
            etl_object,
            etl_field_changes,
            ..self.clone()
        })
    }

    /// Creates a derived field. `values` holds per-file values; files
    /// without one get the configured default.
    pub fn add_derived_field(
        &self,
        name: &str,
        kind: DerivedKind,
        values: BTreeMap<String, String>,
    ) -> EtlResult<Self> {
        let taken = |n: &str| {
            self.etl_object.etl_fields.contains_key(n) || self.etl_field_changes.is_derived(n)
        };
        if taken(name) {
            return Err(EtlError::fixable(
                format!("'{}' is already a field", name),
                Fix::for_field(name)
                    .conflicts_with(name)
                    .suggest(suggest_free_name(name, taken)),
            ));
        }
        check_anchor(&kind, &self.etl_object)?;

        let mut changes = self.etl_field_changes.clone();
        changes
            .derived_fields
            .insert(name.to_string(), new_derived(name, kind, values, &self.config));

        let Reconciled {
            etl_object,
            etl_field_changes,
        } = Reconcile::new(self.etl_object.clone(), changes, &self.config)
            .add_derived_fields()
            .apply_field_props()
            .finish();
        log_info!("STATE", "derived '{}' added", name);
        Ok(AppState {
            etl_object,
            etl_field_changes,
            ..self.clone()
        })
    }

    pub fn rename_field(&self, old: &str, new_name: &str) -> EtlResult<Self> {
        let outcome = rename_etl_field(old, new_name, self.safety_context())?;
        self.apply_outcome(outcome)
    }

    pub fn remove_field(&self, name: &str) -> EtlResult<Self> {
        let outcome = remove_etl_field(name, self.safety_context())?;
        self.apply_outcome(outcome)
    }

    fn apply_outcome(&self, outcome: SafetyOutcome) -> EtlResult<Self> {
        if outcome.is_noop() {
            return Ok(self.clone());
        }
        let SafetyOutcome {
            file_records,
            etl_field_changes,
        } = outcome;
        let next = AppState {
            file_records: file_records.unwrap_or_else(|| self.file_records.clone()),
            etl_field_changes: etl_field_changes.unwrap_or_else(|| self.etl_field_changes.clone()),
            ..self.clone()
        };
        let recomputed = next.recompute()?;
        if recomputed.etl_object.etl_units.is_empty() && !self.etl_object.etl_units.is_empty() {
            log_warn!("STATE", "edit left the model without units");
        }
        Ok(recomputed)
    }
}
