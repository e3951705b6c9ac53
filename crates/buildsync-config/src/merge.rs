//! Merging of builder and type fragments.
//!
//! Fragments from `builders` and `types` are merged into one accumulator.
//! `builder` overwrites, `test` and `slaveList` are replaced wholesale, and
//! `properties` accumulate key by key with later values winning. No other
//! field is accepted.

use crate::{ConfigError, ConfigResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawFragment {
    #[serde(default)]
    builder: Option<String>,
    #[serde(default)]
    test: Option<Vec<String>>,
    #[serde(default)]
    slave_list: Option<Vec<String>>,
    #[serde(default)]
    properties: Option<BTreeMap<String, String>>,
}

/// The result of merging one or more fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedFragment {
    /// Name of the builder on the remote service.
    pub builder: Option<String>,
    /// Path of the test to run.
    pub test: Option<Vec<String>>,
    pub slave_list: Option<Vec<String>>,
    pub properties: BTreeMap<String, String>,
}

impl MergedFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the fragment `value`; `field` names it in errors.
    pub fn merge(&mut self, field: &str, value: &Value) -> ConfigResult<()> {
        let fragment: RawFragment = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::invalid(field, e.to_string()))?;

        if let Some(builder) = fragment.builder {
            self.builder = Some(builder);
        }
        if let Some(test) = fragment.test {
            self.test = Some(test);
        }
        if let Some(slave_list) = fragment.slave_list {
            self.slave_list = Some(slave_list);
        }
        if let Some(properties) = fragment.properties {
            self.properties.extend(properties);
        }
        Ok(())
    }

    /// Merge `value` into a copy of this fragment.
    pub fn merged_with(&self, field: &str, value: &Value) -> ConfigResult<Self> {
        let mut merged = self.clone();
        merged.merge(field, value)?;
        Ok(merged)
    }
}
