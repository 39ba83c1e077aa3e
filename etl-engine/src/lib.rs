//! FILENAME: etl-engine/src/lib.rs
//! Transformation engine over the ETL data model.
//!
//! This crate turns per-file column metadata into the canonical model and
//! keeps it consistent across edits. It depends on `etl-model` for every
//! shared type.
//!
//! Layers:
//! - `wide_to_long`, `implied`: derived file fields (before the pivot)
//! - `pivot`: stacking fields across files into EtlFields and EtlUnits
//! - `derived`, `reconcile`: replaying recorded edits onto a fresh pivot
//! - `safety`: rename/remove checked against the unit graph
//! - `state`: the application state that ties a recompute together

pub mod derived;
pub mod implied;
pub mod pivot;
pub mod reconcile;
pub mod safety;
pub mod state;
pub mod wide_to_long;


pub use derived::{anchor_sources, build_derived, check_anchor, insert_derived, new_derived};
pub use implied::build_implied_measurement;
pub use pivot::{build_etl_field, pivot};
pub use reconcile::{reconcile, Reconcile, Reconciled};
pub use safety::{remove_etl_field, rename_etl_field, RemoveOutcome, RenameOutcome, SafetyContext, SafetyOutcome};
pub use state::AppState;
pub use wide_to_long::{auto_arrows, build_wide_to_long};
