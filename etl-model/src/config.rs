//! FILENAME: etl-model/src/config.rs
//! PURPOSE: Engine configuration.
//! CONTEXT: Every field has a default so a partial (or empty) JSON document is
//! a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::{EtlError, EtlResult};
use crate::field::Reducer;

/// Reducers seeded onto freshly created fields and units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducerDefaults {
    #[serde(default = "default_quality_reducer")]
    pub quality_codomain: Reducer,
    #[serde(default = "default_sum")]
    pub mvalue_codomain: Reducer,
    #[serde(default = "default_sum")]
    pub mvalue_slicing: Reducer,
}

fn default_quality_reducer() -> Reducer {
    Reducer::First
}

fn default_sum() -> Reducer {
    Reducer::Sum
}

impl Default for ReducerDefaults {
    fn default() -> Self {
        ReducerDefaults {
            quality_codomain: Reducer::First,
            mvalue_codomain: Reducer::Sum,
            mvalue_slicing: Reducer::Sum,
        }
    }
}

/// How factor values are read out of wide column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NamePattern {
    /// Named capture groups; each group name is a factor name.
    Regex { pattern: String },
    /// The column name split on `delimiter`; part `i` is the value of `factors[i]`.
    Delimited { delimiter: String, factors: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WideToLongDefaults {
    /// Alias of the stacked measurement-value field.
    #[serde(default = "default_mvalue_name")]
    pub mvalue_name: String,

    /// Name of the single factor created when no name pattern applies.
    #[serde(default = "default_factor_name")]
    pub factor_name: String,

    #[serde(default)]
    pub name_pattern: Option<NamePattern>,
}

fn default_mvalue_name() -> String {
    "value".to_string()
}

fn default_factor_name() -> String {
    "metric".to_string()
}

impl Default for WideToLongDefaults {
    fn default() -> Self {
        WideToLongDefaults {
            mvalue_name: default_mvalue_name(),
            factor_name: default_factor_name(),
            name_pattern: None,
        }
    }
}

/// The value a newly contributing file gets in a derived implied field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ImpliedValueDefault {
    /// The file's name.
    #[default]
    Filename,
    /// The derived field's own name.
    FieldName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub reducers: ReducerDefaults,

    #[serde(default)]
    pub wide_to_long: WideToLongDefaults,

    /// Alias of a synthesized implied measurement value.
    #[serde(default = "default_implied_name")]
    pub implied_mvalue_name: String,

    #[serde(default)]
    pub implied_component_default: ImpliedValueDefault,
}

fn default_implied_name() -> String {
    "count".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            reducers: ReducerDefaults::default(),
            wide_to_long: WideToLongDefaults::default(),
            implied_mvalue_name: default_implied_name(),
            implied_component_default: ImpliedValueDefault::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EtlResult<Self> {
        serde_json::from_str(json).map_err(|e| EtlError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.reducers.quality_codomain, Reducer::First);
        assert_eq!(config.implied_mvalue_name, "count");
    }

    #[test]
    fn test_partial_document() {
        let config = EngineConfig::from_json_str(
            r#"{
                "reducers": { "mvalueCodomain": "AVG" },
                "wideToLong": {
                    "namePattern": { "kind": "delimited", "delimiter": "_", "factors": ["metric", "month"] }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.reducers.mvalue_codomain, Reducer::Avg);
        assert_eq!(config.reducers.quality_codomain, Reducer::First);
        assert_eq!(config.wide_to_long.mvalue_name, "value");
        assert!(matches!(
            config.wide_to_long.name_pattern,
            Some(NamePattern::Delimited { .. })
        ));
    }

    #[test]
    fn test_bad_document_is_config_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(EtlError::Config(_))
        ));
    }
}
