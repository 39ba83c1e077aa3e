//! FILENAME: etl-engine/src/wide_to_long.rs
//! PURPOSE: Wide-to-Long synthesis for files with several value columns.
//! CONTEXT: A file with more than one enabled measurement-value column is
//! stacked: the raw value columns leave the pivot and are replaced by one
//! synthetic field per factor plus a single stacked measurement value. The
//! factor configuration lives on the file record so user edits (factor
//! names, arrows, formats) survive every rebuild.
//!
//! The first time a file is stacked its factors come from the configured
//! name pattern, or, without one, a single component factor whose arrows map
//! each column to its own name.

use regex::Regex;

use etl_model::logging::{log_debug, log_enter, log_exit, log_info, log_warn};
use etl_model::{
    factor_levels, refresh_spans, ArrowTable, EngineConfig, EtlError, EtlResult, FieldOrigin,
    FileRecord, NamePattern, Purpose, WideToLongConfig, WideToLongDefaults,
};

const WIDE_ORIGINS: [FieldOrigin; 2] = [FieldOrigin::WideFactor, FieldOrigin::WideValue];

// ============================================================================
// NAME PATTERNS
// ============================================================================

/// Reads factor values out of wide column names.
///
/// Returns one arrow table per factor, in the order the pattern names them.
/// Columns the pattern does not match are left out of every table; factors
/// that match no column are dropped.
pub fn auto_arrows(pattern: &NamePattern, columns: &[String]) -> EtlResult<Vec<(String, ArrowTable)>> {
    let mut factors: Vec<(String, ArrowTable)> = match pattern {
        NamePattern::Regex { pattern } => {
            let re = Regex::new(pattern).map_err(|e| EtlError::Config(e.to_string()))?;
            let names: Vec<String> = re.capture_names().flatten().map(str::to_string).collect();
            if names.is_empty() {
                return Err(EtlError::Config(format!(
                    "name pattern '{}' has no named capture groups",
                    pattern
                )));
            }
            let mut factors: Vec<(String, ArrowTable)> =
                names.into_iter().map(|n| (n, ArrowTable::new())).collect();
            for column in columns {
                let Some(caps) = re.captures(column) else {
                    log_debug!("W2L", "column '{}' does not match '{}'", column, pattern);
                    continue;
                };
                for (name, arrows) in factors.iter_mut() {
                    if let Some(m) = caps.name(name) {
                        arrows.insert(column.clone(), m.as_str().to_string());
                    }
                }
            }
            factors
        }
        NamePattern::Delimited { delimiter, factors: names } => {
            if delimiter.is_empty() {
                return Err(EtlError::Config("empty name delimiter".into()));
            }
            let mut factors: Vec<(String, ArrowTable)> =
                names.iter().map(|n| (n.clone(), ArrowTable::new())).collect();
            for column in columns {
                let parts: Vec<&str> = column.split(delimiter.as_str()).collect();
                if parts.len() != factors.len() {
                    log_debug!("W2L", "column '{}' has {} parts, expected {}", column, parts.len(), factors.len());
                    continue;
                }
                for ((_, arrows), part) in factors.iter_mut().zip(parts) {
                    arrows.insert(column.clone(), part.trim().to_string());
                }
            }
            factors
        }
    };
    factors.retain(|(_, arrows)| !arrows.is_empty());
    Ok(factors)
}

/// One component factor mapping every column to its own name.
fn identity_factor(columns: &[String], defaults: &WideToLongDefaults) -> Vec<(String, ArrowTable)> {
    let arrows = columns.iter().map(|c| (c.clone(), c.clone())).collect();
    vec![(defaults.factor_name.clone(), arrows)]
}

/// Factors a fresh configuration would start with.
fn default_factors(columns: &[String], defaults: &WideToLongDefaults) -> Vec<(String, ArrowTable)> {
    let Some(pattern) = &defaults.name_pattern else {
        return identity_factor(columns, defaults);
    };
    match auto_arrows(pattern, columns) {
        Ok(factors) if !factors.is_empty() => factors,
        Ok(_) => identity_factor(columns, defaults),
        Err(e) => {
            log_warn!("W2L", "name pattern ignored: {}", e);
            identity_factor(columns, defaults)
        }
    }
}

fn default_config(
    filename: &str,
    columns: &[String],
    factors: &[(String, ArrowTable)],
    n_rows: u64,
    config: &EngineConfig,
) -> WideToLongConfig {
    let base = WideToLongConfig::new(config.wide_to_long.mvalue_name.clone()).with_columns(columns);
    factors.iter().fold(base, |wide, (name, arrows)| {
        match wide.add_factor(name.clone(), Purpose::MeasurementComponent, arrows.clone(), n_rows) {
            Ok(next) => next,
            Err(e) => {
                log_warn!("W2L", "{}: factor '{}' skipped: {}", filename, name, e);
                wide
            }
        }
    })
}

/// Brings an existing configuration up to date with the file's current
/// value columns. Arrows are kept; columns that gained no arrow yet take the
/// default factor's value when a factor of that name exists.
fn refresh_config(
    mut wide: WideToLongConfig,
    columns: &[String],
    defaults: &[(String, ArrowTable)],
    n_rows: u64,
) -> WideToLongConfig {
    wide.columns = columns.to_vec();
    for factor in wide.factors.iter_mut() {
        if let Some((_, fresh)) = defaults.iter().find(|(name, _)| *name == factor.name) {
            for column in columns {
                if !factor.arrows.contains_key(column) {
                    if let Some(value) = fresh.get(column) {
                        factor.arrows.insert(column.clone(), value.clone());
                    }
                }
            }
        }
        if let Some(field) = wide.fields.get_mut(&factor.name) {
            field.levels = factor_levels(&factor.arrows, Some(columns), n_rows);
            refresh_spans(field);
        }
    }
    wide
}

// ============================================================================
// BUILDER
// ============================================================================

/// Re-synthesizes the wide-to-long fields of `file`.
///
/// `previous` seeds the configuration when the file carries none (a file
/// that is re-uploaded keeps the factors it had). Files with fewer than two
/// enabled value columns lose their configuration and synthetic fields.
pub fn build_wide_to_long(
    file: &FileRecord,
    previous: Option<&WideToLongConfig>,
    config: &EngineConfig,
) -> FileRecord {
    log_enter!("W2L", "build_wide_to_long", "file={}", file.filename);

    let columns: Vec<String> = file
        .raw_of_purpose(Purpose::MeasurementValue)
        .iter()
        .map(|f| f.header.clone())
        .collect();

    let mut next = file.clone();
    next.strip_synthetic(&WIDE_ORIGINS);

    if columns.len() < 2 {
        if next.wide_to_long.take().is_some() {
            log_info!("W2L", "{}: {} value column(s), stacking removed", file.filename, columns.len());
        }
        log_exit!("W2L", "build_wide_to_long", "unstacked");
        return next;
    }

    let defaults = default_factors(&columns, &config.wide_to_long);
    let wide = match file.wide_to_long.as_ref().or(previous) {
        Some(existing) => existing.clone(),
        None => {
            log_info!("W2L", "{}: stacking {} value columns", file.filename, columns.len());
            default_config(&file.filename, &columns, &defaults, file.n_rows, config)
        }
    };
    let wide = refresh_config(wide, &columns, &defaults, file.n_rows);

    let aliases = wide
        .factors
        .iter()
        .map(|f| f.name.as_str())
        .chain(std::iter::once(wide.mvalue.as_str()));
    let mut header_idx = next.next_header_idx();
    let mut synthetic = Vec::new();
    for alias in aliases {
        if let Some(field) = wide.field(alias) {
            let mut field = field.clone();
            field.header_idx = header_idx;
            header_idx += 1;
            synthetic.push(field);
        }
    }
    next.fields.extend(synthetic);
    next.wide_to_long = Some(wide);

    log_exit!("W2L", "build_wide_to_long", "fields={}", next.fields.len());
    next
}
