//! FILENAME: etl-engine/src/reconcile.rs
//! PURPOSE: Replays recorded user edits on top of a fresh pivot.
//! CONTEXT: The chain runs six stages in order. Each stage takes the current
//! (object, changes) pair by value and returns the next one, so callers can
//! run the whole chain after a re-pivot or only the stages an edit needs:
//!
//! 1. remove_stale_prop_changes
//! 2. remove_stale_derived_fields
//! 3. add_derived_fields
//! 4. apply_source_sequences
//! 5. apply_field_props
//! 6. set_global_span_ref
//!
//! Running the full chain on its own output changes nothing.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use etl_model::logging::{log_debug, log_enter, log_exit, log_info, log_warn};
use etl_model::{
    derive_spans, rebase_delta, union_all, DerivedField, EngineConfig, EtlField, EtlFieldChanges,
    EtlObject, FieldOverrides, IntervalUnit, PurposeProps, Source, Span, TimeDescriptor,
    TimeReference,
};

use crate::derived::{anchor_sources, build_derived, insert_derived};

/// Format of the shared reference written by `set_global_span_ref`.
const REFERENCE_FORMAT: &str = "%Y-%m-%d";

/// Output of the chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    pub etl_object: EtlObject,
    pub etl_field_changes: EtlFieldChanges,
}

/// Fluent builder over the reconciliation stages.
#[derive(Debug, Clone)]
pub struct Reconcile<'a> {
    object: EtlObject,
    changes: EtlFieldChanges,
    config: &'a EngineConfig,
}

/// Runs the full chain.
pub fn reconcile(computed: EtlObject, changes: EtlFieldChanges, config: &EngineConfig) -> Reconciled {
    Reconcile::new(computed, changes, config).run_all().finish()
}

impl<'a> Reconcile<'a> {
    pub fn new(computed: EtlObject, changes: EtlFieldChanges, config: &'a EngineConfig) -> Self {
        Reconcile {
            object: computed,
            changes,
            config,
        }
    }

    pub fn run_all(self) -> Self {
        log_enter!("RECONCILE", "run_all", "fields={}", self.object.etl_fields.len());
        let out = self
            .remove_stale_prop_changes()
            .remove_stale_derived_fields()
            .add_derived_fields()
            .apply_source_sequences()
            .apply_field_props()
            .set_global_span_ref();
        log_exit!("RECONCILE", "run_all", "fields={}", out.object.etl_fields.len());
        out
    }

    pub fn finish(self) -> Reconciled {
        Reconciled {
            etl_object: self.object,
            etl_field_changes: self.changes,
        }
    }

    // ========================================================================
    // STAGE 1-3: RECORDED CHANGES
    // ========================================================================

    /// Drops overrides for fields that are neither pivoted nor derived.
    pub fn remove_stale_prop_changes(mut self) -> Self {
        let object = &self.object;
        let derived = &self.changes.derived_fields;
        self.changes.props.retain(|name, overrides| {
            let live = object.etl_fields.contains_key(name) || derived.contains_key(name);
            if !live {
                log_debug!("RECONCILE", "overrides for '{}' dropped", name);
            }
            live && !overrides.is_empty()
        });
        self
    }

    /// Drops derived fields whose anchor is gone or whose files no longer
    /// contribute, and re-indexes survivors against the fresh pivot.
    pub fn remove_stale_derived_fields(mut self) -> Self {
        let object = &self.object;
        let mut kept = BTreeMap::new();
        for (name, derived) in std::mem::take(&mut self.changes.derived_fields) {
            if object.etl_fields.get(&name).is_some_and(|f| !f.derived) {
                log_warn!("RECONCILE", "derived '{}' shadowed by a file field, dropped", name);
                continue;
            }
            let Some(anchors) = anchor_sources(&derived.kind, object) else {
                log_info!("RECONCILE", "derived '{}' lost its anchor '{}', dropped", name, derived.kind.anchor());
                continue;
            };
            let backed = derived.values.is_empty()
                || derived.values.keys().any(|f| anchors.iter().any(|a| a.filename == *f));
            if !backed {
                log_info!("RECONCILE", "derived '{}' has no contributing files, dropped", name);
                continue;
            }
            kept.insert(name, reindex(derived, &anchors));
        }
        self.changes.derived_fields = kept;
        self
    }

    /// Re-runs the construction of every recorded derived field and inserts
    /// the result into the fields and units.
    pub fn add_derived_fields(mut self) -> Self {
        let names: Vec<String> = self.changes.derived_fields.keys().cloned().collect();
        for name in names {
            let Some(recorded) = self.changes.derived_fields.get(&name) else {
                continue;
            };
            match build_derived(&name, recorded, &self.object, self.config) {
                Some(built) => {
                    insert_derived(&mut self.object, &built, self.config);
                    self.changes.derived_fields.insert(name, built);
                }
                None => {
                    log_warn!("RECONCILE", "derived '{}' could not be built", name);
                }
            }
        }
        self
    }

    // ========================================================================
    // STAGE 4-5: OVERRIDES
    // ========================================================================

    /// Orders sources by the recorded sequence, keeping only active files;
    /// files missing from the sequence follow in their current order.
    pub fn apply_source_sequences(mut self) -> Self {
        for (name, overrides) in &self.changes.props {
            let Some(sequence) = &overrides.source_sequence else {
                continue;
            };
            let Some(field) = self.object.etl_fields.get_mut(name) else {
                continue;
            };
            field.sources = sequenced(std::mem::take(&mut field.sources), sequence);
        }
        self
    }

    /// Merges recorded overrides on top of the computed fields; overrides
    /// win. Unit reducers follow their codomain field.
    pub fn apply_field_props(mut self) -> Self {
        for (name, overrides) in &self.changes.props {
            let Some(field) = self.object.etl_fields.get_mut(name) else {
                continue;
            };
            apply_overrides(field, overrides);
            if let Some(unit) = self.object.etl_units.get_mut(name) {
                unit.set_reducers(field.props.codomain_reducer(), field.props.slicing_reducer());
            }
        }
        self
    }

    // ========================================================================
    // STAGE 6: SHARED TIME ORIGIN
    // ========================================================================

    /// Re-expresses every measurement-time field against one reference per
    /// interval: bucket 0 at the earliest reference date among them.
    pub fn set_global_span_ref(mut self) -> Self {
        let mut groups: FxHashMap<(IntervalUnit, u32), Vec<String>> = FxHashMap::default();
        for (name, field) in &self.object.etl_fields {
            let Some(time) = field.time() else { continue };
            let Some(interval) = time.interval.resolved() else { continue };
            if time.reference_date(field.format.as_deref()).is_some() {
                groups.entry(interval).or_default().push(name.clone());
            }
        }

        for names in groups.into_values() {
            let earliest = names
                .iter()
                .filter_map(|n| {
                    let field = self.object.etl_fields.get(n)?;
                    field.time()?.reference_date(field.format.as_deref())
                })
                .min();
            let Some(earliest) = earliest else { continue };
            let target = TimeReference {
                idx: 0,
                value: Some(earliest.format(REFERENCE_FORMAT).to_string()),
                format: Some(REFERENCE_FORMAT.to_string()),
            };
            for name in &names {
                if let Some(field) = self.object.etl_fields.get_mut(name) {
                    rebase_field(field, &target);
                }
            }
        }
        self
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Restricts a derived field's values and sources to the anchor's files and
/// moves each source onto the anchor's current header index.
fn reindex(mut derived: DerivedField, anchors: &[&Source]) -> DerivedField {
    derived
        .values
        .retain(|filename, _| anchors.iter().any(|a| a.filename == *filename));
    derived
        .field
        .sources
        .retain(|s| anchors.iter().any(|a| a.filename == s.filename));
    for source in derived.field.sources.iter_mut() {
        if let Some(anchor) = anchors.iter().find(|a| a.filename == source.filename) {
            source.field.header_idx = anchor.field.header_idx;
        }
    }
    derived
}

fn sequenced(mut sources: Vec<Source>, sequence: &[String]) -> Vec<Source> {
    let mut ordered = Vec::with_capacity(sources.len());
    for filename in sequence {
        if let Some(pos) = sources.iter().position(|s| s.filename == *filename) {
            ordered.push(sources.remove(pos));
        }
    }
    ordered.extend(sources);
    ordered
}

fn apply_overrides(field: &mut EtlField, overrides: &FieldOverrides) {
    if let Some(format) = &overrides.format {
        field.format = Some(format.clone());
    }
    if let Some(null_value) = &overrides.null_value_expansion {
        field.null_value_expansion = Some(null_value.clone());
    }
    if let Some(symbols) = &overrides.map_symbols {
        field.map_symbols = symbols.clone();
    }
    match &mut field.props {
        PurposeProps::Quality { codomain_reducer } => {
            if let Some(r) = overrides.codomain_reducer {
                *codomain_reducer = r;
            }
        }
        PurposeProps::MeasurementValue {
            codomain_reducer,
            slicing_reducer,
        } => {
            if let Some(r) = overrides.codomain_reducer {
                *codomain_reducer = r;
            }
            if let Some(r) = overrides.slicing_reducer {
                *slicing_reducer = r;
            }
        }
        _ => {}
    }
    if let Some(time) = &overrides.time {
        retime_field(field, time);
    }
}

/// Re-derives a time field's spans from its sources under `time`.
/// Without any derivable source the field is left as it was.
fn retime_field(field: &mut EtlField, time: &TimeDescriptor) {
    let mut time = time.clone();
    let mut groups: Vec<Vec<Span>> = Vec::new();
    for source in &field.sources {
        let format = source.field.format.as_deref().or(field.format.as_deref());
        match derive_spans(&source.field.levels, source.field.null_value.as_deref(), format, &time) {
            Ok(derived) => {
                time = derived.time;
                groups.push(derived.spans);
            }
            Err(e) => log_debug!("RECONCILE", "'{}' from {}: {}", field.name, source.filename, e),
        }
    }
    if groups.is_empty() {
        log_debug!("RECONCILE", "'{}': time override has no derivable source", field.name);
        return;
    }
    let spans = union_all(groups.iter().map(Vec::as_slice)).unwrap_or_else(|e| {
        log_warn!("RECONCILE", "'{}': spans not combined: {}", field.name, e);
        Vec::new()
    });
    if let PurposeProps::MeasurementTime { time: t, spans: s } = &mut field.props {
        *t = time;
        *s = spans;
    }
}

fn rebase_field(field: &mut EtlField, target: &TimeReference) {
    let format = field.format.clone();
    let PurposeProps::MeasurementTime { time, spans } = &mut field.props else {
        return;
    };
    if time.reference == *target {
        return;
    }
    let Some(delta) = rebase_delta(time, target, format.as_deref()) else {
        return;
    };
    for span in spans.iter_mut() {
        *span = span.shifted(delta);
    }
    time.reference = target.clone();
}
