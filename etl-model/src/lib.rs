//! FILENAME: etl-model/src/lib.rs
//! PURPOSE: Main library entry point for the ETL data model.
//! CONTEXT: Shared types and leaf algorithms used by `etl-engine`.
//!
//! Layers:
//! - `field`, `file`: per-file column metadata (what the user uploaded)
//! - `etl`: the canonical cross-file model and the recorded user edits
//! - `span`, `time`: coverage ranges and how they are derived from dates
//! - `update`, `edit_state`, `wide`: single-field and wide-to-long edits

pub mod logging;

pub mod config;
pub mod edit_state;
pub mod error;
pub mod etl;
pub mod field;
pub mod file;
pub mod span;
pub mod time;
pub mod update;
pub mod wide;

// Re-export commonly used types at the crate root
pub use config::{EngineConfig, ImpliedValueDefault, NamePattern, ReducerDefaults, WideToLongDefaults};
pub use edit_state::{transition, Dirtiness, EditEvent, FieldEditSession, FieldEditState, Inclusion};
pub use error::{suggest_free_name, ErrorClass, EtlError, EtlResult, Fix};
pub use etl::{
    Components, DerivedField, DerivedKind, EtlField, EtlFieldChanges, EtlObject, EtlUnit,
    FieldOverrides, Source,
};
pub use field::{merge_levels, FieldOrigin, FileField, Level, Purpose, PurposeProps, Reducer, SymbolMap};
pub use file::{FieldRef, FileRecord, FileRecords, ImpliedMeasurementConfig};
pub use span::{
    combine, consolidate_spans, intersection, intersection_all, is_continuous, is_subset,
    union_all, Span,
};
pub use time::{
    derive_spans, parse_date, rebase_delta, rebase_spans, DerivedSpans, Interval, IntervalUnit,
    TimeDescriptor, TimeReference,
};
pub use update::{refresh_spans, update_field, update_field_with, FieldEdit, TimeEdit, UpdateOutcome};
pub use wide::{factor_levels, ArrowTable, Factor, WideToLongConfig};
