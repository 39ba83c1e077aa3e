//! FILENAME: etl-model/src/wide.rs
//! PURPOSE: Wide-to-long configuration of a file with several value columns.
//! CONTEXT: Each factor is one dimension encoded in the wide column names
//! ("month", "metric", ...). Its arrow table maps every wide column to the
//! factor's value for that column. The config owns the synthetic fields it
//! produces (one per factor plus the stacked measurement value), keyed by
//! alias, so factor edits and field edits always change together.
//!
//! Every operation returns a new config.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{suggest_free_name, EtlError, EtlResult, Fix};
use crate::field::{merge_levels, FieldOrigin, FileField, Level, Purpose};
use crate::update::{refresh_spans, update_field, FieldEdit, UpdateOutcome};

/// Wide column name -> factor value.
pub type ArrowTable = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub purpose: Purpose,
    #[serde(default)]
    pub arrows: ArrowTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WideToLongConfig {
    /// Alias of the stacked measurement-value field.
    pub mvalue: String,
    pub factors: Vec<Factor>,
    /// Synthetic fields keyed by alias: one per factor, plus `mvalue`.
    pub fields: BTreeMap<String, FileField>,
    /// Wide value columns in file order; factor levels follow it.
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Levels of a factor: its distinct values, each counted once per file row
/// for every column that maps to it. `columns` restricts and orders the
/// columns considered; without it every arrow is used.
pub fn factor_levels(arrows: &ArrowTable, columns: Option<&[String]>, n_rows: u64) -> Vec<Level> {
    let levels: Vec<Level> = match columns {
        Some(columns) => columns
            .iter()
            .filter_map(|c| arrows.get(c))
            .map(|value| Level::new(value.clone(), n_rows))
            .collect(),
        None => arrows.values().map(|value| Level::new(value.clone(), n_rows)).collect(),
    };
    merge_levels(&levels)
}

fn check_factor_purpose(name: &str, purpose: Purpose) -> EtlResult<()> {
    match purpose {
        Purpose::MeasurementComponent | Purpose::MeasurementTime => Ok(()),
        other => Err(EtlError::InvalidEdit {
            key: "purpose".into(),
            reason: format!("factor '{}' cannot have purpose {}", name, other),
        }),
    }
}

impl WideToLongConfig {
    pub fn new(mvalue: impl Into<String>) -> Self {
        let mvalue = mvalue.into();
        let field = FileField::new(0, mvalue.clone(), Purpose::MeasurementValue)
            .with_origin(FieldOrigin::WideValue);
        let mut fields = BTreeMap::new();
        fields.insert(mvalue.clone(), field);
        WideToLongConfig {
            mvalue,
            factors: Vec::new(),
            fields,
            columns: Vec::new(),
        }
    }

    /// Sets the file order of the wide value columns.
    pub fn with_columns(mut self, columns: &[String]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    /// Levels of `arrows` in file column order; arrows for columns the
    /// file does not list follow in table order.
    fn levels_for(&self, arrows: &ArrowTable, n_rows: u64) -> Vec<Level> {
        let mut order: Vec<String> = self
            .columns
            .iter()
            .filter(|c| arrows.contains_key(c.as_str()))
            .cloned()
            .collect();
        order.extend(arrows.keys().filter(|k| !self.columns.contains(k)).cloned());
        factor_levels(arrows, Some(&order), n_rows)
    }

    pub fn factor(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|f| f.name == name)
    }

    pub fn field(&self, alias: &str) -> Option<&FileField> {
        self.fields.get(alias)
    }

    pub fn mvalue_field(&self) -> Option<&FileField> {
        self.fields.get(&self.mvalue)
    }

    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        if Some(name) == except {
            return false;
        }
        name == self.mvalue || self.factors.iter().any(|f| f.name == name)
    }

    fn collision(&self, field: &str, name: &str) -> EtlError {
        let suggestion = suggest_free_name(name, |n| self.name_taken(n, None));
        EtlError::fixable(
            format!("'{}' is already used by this wide-to-long transform", name),
            Fix::for_field(field).conflicts_with(name).suggest(suggestion),
        )
    }

    fn missing_factor(name: &str) -> EtlError {
        EtlError::UnknownField(format!("wide-to-long factor '{}'", name))
    }

    /// Adds a factor and its synthetic field.
    pub fn add_factor(
        &self,
        name: impl Into<String>,
        purpose: Purpose,
        arrows: ArrowTable,
        n_rows: u64,
    ) -> EtlResult<Self> {
        let name = name.into();
        check_factor_purpose(&name, purpose)?;
        if self.name_taken(&name, None) {
            return Err(self.collision(&name, &name));
        }

        let mut field = FileField::new(0, name.clone(), purpose)
            .with_origin(FieldOrigin::WideFactor)
            .with_levels(self.levels_for(&arrows, n_rows));
        refresh_spans(&mut field);

        let mut next = self.clone();
        next.factors.push(Factor {
            name: name.clone(),
            purpose,
            arrows,
        });
        next.fields.insert(name, field);
        Ok(next)
    }

    /// Removes a factor and its synthetic field.
    pub fn remove_factor(&self, name: &str) -> EtlResult<Self> {
        if self.factor(name).is_none() {
            return Err(Self::missing_factor(name));
        }
        let mut next = self.clone();
        next.factors.retain(|f| f.name != name);
        next.fields.remove(name);
        Ok(next)
    }

    /// Renames the stacked measurement value; only its synthetic field is re-keyed.
    pub fn rename_mvalue(&self, new_name: impl Into<String>) -> EtlResult<Self> {
        let new_name = new_name.into();
        if new_name == self.mvalue {
            return Ok(self.clone());
        }
        if self.name_taken(&new_name, Some(self.mvalue.as_str())) {
            return Err(self.collision(&self.mvalue, &new_name));
        }
        let mut next = self.clone();
        if let Some(mut field) = next.fields.remove(&self.mvalue) {
            field.alias = new_name.clone();
            next.fields.insert(new_name.clone(), field);
        }
        next.mvalue = new_name;
        Ok(next)
    }

    /// Renames a factor. Fails when the name belongs to another factor or
    /// to the stacked measurement value.
    pub fn rename_factor(&self, old: &str, new_name: impl Into<String>) -> EtlResult<Self> {
        let new_name = new_name.into();
        if self.factor(old).is_none() {
            return Err(Self::missing_factor(old));
        }
        if old == new_name {
            return Ok(self.clone());
        }
        if self.name_taken(&new_name, Some(old)) {
            return Err(self.collision(old, &new_name));
        }

        let mut next = self.clone();
        for factor in next.factors.iter_mut().filter(|f| f.name == old) {
            factor.name = new_name.clone();
        }
        if let Some(mut field) = next.fields.remove(old) {
            field.alias = new_name.clone();
            next.fields.insert(new_name, field);
        }
        Ok(next)
    }

    /// Replaces a factor's arrow table and recomputes its levels (and spans,
    /// for a measurement-time factor).
    pub fn set_arrows(&self, factor: &str, arrows: ArrowTable, n_rows: u64) -> EtlResult<Self> {
        if self.factor(factor).is_none() {
            return Err(Self::missing_factor(factor));
        }
        let levels = self.levels_for(&arrows, n_rows);
        let mut next = self.clone();
        if let Some(f) = next.factors.iter_mut().find(|f| f.name == factor) {
            f.arrows = arrows;
        }
        if let Some(field) = next.fields.get_mut(factor) {
            field.levels = levels;
            refresh_spans(field);
        }
        Ok(next)
    }

    /// Sets (or with `None` removes) one arrow of a factor.
    pub fn set_arrow(
        &self,
        factor: &str,
        column: impl Into<String>,
        value: Option<String>,
        n_rows: u64,
    ) -> EtlResult<Self> {
        let mut arrows = self
            .factor(factor)
            .ok_or_else(|| Self::missing_factor(factor))?
            .arrows
            .clone();
        let column = column.into();
        match value {
            Some(value) => {
                arrows.insert(column, value);
            }
            None => {
                arrows.remove(&column);
            }
        }
        self.set_arrows(factor, arrows, n_rows)
    }

    /// Edits one synthetic field. Alias edits go through the rename
    /// operations; a factor may only be a component or a time factor, and the
    /// stacked value cannot change purpose.
    pub fn update_synthetic_field(&self, alias: &str, edit: FieldEdit) -> EtlResult<(Self, bool)> {
        let is_mvalue = alias == self.mvalue;
        if !is_mvalue && self.factor(alias).is_none() {
            return Err(Self::missing_factor(alias));
        }

        match &edit {
            FieldEdit::Alias(new_name) => {
                let next = if is_mvalue {
                    self.rename_mvalue(new_name.clone())?
                } else {
                    self.rename_factor(alias, new_name.clone())?
                };
                return Ok((next, true));
            }
            FieldEdit::Purpose(purpose) => {
                if is_mvalue {
                    return Err(EtlError::InvalidEdit {
                        key: "purpose".into(),
                        reason: "the stacked measurement value keeps its purpose".into(),
                    });
                }
                check_factor_purpose(alias, *purpose)?;
            }
            _ => {}
        }

        let field = self.fields.get(alias).ok_or_else(|| Self::missing_factor(alias))?;
        let UpdateOutcome {
            field,
            stale_derived_fields,
        } = update_field(field, edit)?;

        let mut next = self.clone();
        if let Some(f) = next.factors.iter_mut().find(|f| f.name == alias) {
            f.purpose = field.purpose();
        }
        next.fields.insert(alias.to_string(), field);
        Ok((next, stale_derived_fields))
    }
}
