//! Loading of the synchronization configuration document.
//!
//! The document looks like:
//!
//! ```json
//! {
//!     "buildRequestArgument": "build_request_id",
//!     "slaveArgument": "slavename",
//!     "repositoryGroups": {"webkit": {...}},
//!     "types": {"speedometer": {"test": ["Speedometer"], "properties": {...}}},
//!     "builders": {"iphone": {"builder": "iPhone-Tests", "slaveList": ["s1"]}},
//!     "testConfigurations": [{"builders": ["iphone"], "platforms": ["iOS"], "types": ["speedometer"]}],
//!     "buildConfigurations": [{"builders": ["iphone-build"], "platforms": ["iOS"]}]
//! }
//! ```
//!
//! Validation stops at the first problem found.

use crate::builder::BuilderConfiguration;
use crate::merge::MergedFragment;
use crate::repository_group::{RepositoryGroupConfig, parse_repository_group};
use crate::{ConfigError, ConfigResult};
use buildsync_core::{Catalog, Platform};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Settings shared by every builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfiguration {
    pub repository_groups: BTreeMap<String, RepositoryGroupConfig>,
    /// Property carrying the slave name, if builds are pinned to slaves.
    pub slave_argument: Option<String>,
    /// Property carrying the build request id.
    pub build_request_argument: String,
}

/// A fully resolved configuration.
#[derive(Debug, Clone)]
pub struct SyncConfiguration {
    pub common: Arc<CommonConfiguration>,
    /// One entry per remote builder, in order of first use.
    pub builders: Vec<BuilderConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    #[serde(default)]
    build_request_argument: Option<String>,
    #[serde(default)]
    slave_argument: Option<String>,
    #[serde(default)]
    repository_groups: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    types: BTreeMap<String, Value>,
    #[serde(default)]
    builders: BTreeMap<String, Value>,
    #[serde(default)]
    test_configurations: Vec<Value>,
    #[serde(default)]
    build_configurations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawConfigurationEntry {
    builders: Vec<String>,
    platforms: Vec<String>,
    #[serde(default)]
    types: Option<Vec<String>>,
}

struct ResolvedEntry {
    index: usize,
    types: Option<Vec<String>>,
    builder: MergedFragment,
    platform: Arc<Platform>,
}

/// Builders deduplicated by remote builder name.
struct BuilderTable<'a> {
    slave_argument: Option<&'a str>,
    builders: Vec<BuilderConfiguration>,
    index_by_name: HashMap<String, usize>,
}

impl<'a> BuilderTable<'a> {
    fn new(slave_argument: Option<&'a str>) -> Self {
        Self {
            slave_argument,
            builders: Vec::new(),
            index_by_name: HashMap::new(),
        }
    }

    fn ensure(&mut self, fragment: &MergedFragment) -> ConfigResult<&mut BuilderConfiguration> {
        let name = fragment
            .builder
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("builder".to_string()))?;

        let index = match self.index_by_name.get(name) {
            Some(index) => *index,
            None => {
                if fragment.slave_list.is_some() && self.slave_argument.is_none() {
                    return Err(ConfigError::MissingField(format!(
                        "slaveArgument (builder \"{name}\" specifies a slaveList)"
                    )));
                }
                debug!(builder = %name, "Adding builder");
                self.builders.push(BuilderConfiguration::new(
                    name,
                    fragment.slave_list.clone(),
                ));
                self.index_by_name
                    .insert(name.to_string(), self.builders.len() - 1);
                self.builders.len() - 1
            }
        };
        Ok(&mut self.builders[index])
    }
}

/// Read and load a configuration file.
pub fn load_configuration_file(
    path: impl AsRef<Path>,
    catalog: &dyn Catalog,
) -> ConfigResult<SyncConfiguration> {
    let content = std::fs::read_to_string(path)?;
    parse_configuration(&content, catalog)
}

/// Parse and load a configuration from JSON text.
pub fn parse_configuration(json: &str, catalog: &dyn Catalog) -> ConfigResult<SyncConfiguration> {
    let document: Value = serde_json::from_str(json)?;
    load_configuration(&document, catalog)
}

/// Validate a configuration document and resolve it against `catalog`.
pub fn load_configuration(
    document: &Value,
    catalog: &dyn Catalog,
) -> ConfigResult<SyncConfiguration> {
    let raw: RawDocument = serde_json::from_value(document.clone())
        .map_err(|e| ConfigError::invalid("configuration", e.to_string()))?;

    let build_request_argument = raw
        .build_request_argument
        .filter(|argument| !argument.is_empty())
        .ok_or_else(|| {
            ConfigError::MissingField(
                "buildRequestArgument must specify the name of the property used to store the build request ID"
                    .to_string(),
            )
        })?;

    let raw_groups = raw.repository_groups.ok_or_else(|| {
        ConfigError::MissingField(
            "repositoryGroups must specify a dictionary from the name to its definition".to_string(),
        )
    })?;
    let mut repository_groups = BTreeMap::new();
    for (name, group) in &raw_groups {
        repository_groups.insert(name.clone(), parse_repository_group(name, group, catalog)?);
    }

    let mut table = BuilderTable::new(raw.slave_argument.as_deref());

    for entry in resolve_builders_with_platforms(
        "test",
        &raw.test_configurations,
        &raw.builders,
        catalog,
    )? {
        let field = format!("testConfigurations[{}]", entry.index);
        let types = entry
            .types
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField(format!("{field}.types")))?;

        for type_name in types {
            let type_fragment = raw.types.get(type_name).ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "\"{type_name}\" is not a valid type in the configuration"
                ))
            })?;
            let merged = entry
                .builder
                .merged_with(&format!("types.{type_name}"), type_fragment)?;

            let test_path = merged.test.as_ref().ok_or_else(|| {
                ConfigError::MissingField(format!("test for type \"{type_name}\" in {field}"))
            })?;
            let test = catalog.test_by_path(test_path).ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "\"{}\" is not a valid test path in {field}",
                    test_path.join("\", \"")
                ))
            })?;

            table.ensure(&entry.builder)?.add_test_configuration(
                test,
                entry.platform.clone(),
                merged.properties,
            )?;
        }
    }

    for entry in resolve_builders_with_platforms(
        "build",
        &raw.build_configurations,
        &raw.builders,
        catalog,
    )? {
        let builder = table.ensure(&entry.builder)?;
        if builder.is_tester() {
            return Err(ConfigError::Conflict(format!(
                "the build configuration {} uses a tester: {}",
                entry.index, builder.builder_name
            )));
        }
        builder.add_build_configuration(entry.platform, entry.builder.properties.clone())?;
    }

    info!(
        builders = table.builders.len(),
        repository_groups = repository_groups.len(),
        "Loaded synchronization configuration"
    );

    Ok(SyncConfiguration {
        common: Arc::new(CommonConfiguration {
            repository_groups,
            slave_argument: raw.slave_argument.clone(),
            build_request_argument,
        }),
        builders: table.builders,
    })
}

/// Expand each configuration entry into one item per (builder, platform).
/// Indices are 1-based positions in the list.
fn resolve_builders_with_platforms(
    kind: &str,
    entries: &[Value],
    builders: &BTreeMap<String, Value>,
    catalog: &dyn Catalog,
) -> ConfigResult<Vec<ResolvedEntry>> {
    let mut resolved = Vec::new();
    for (position, entry) in entries.iter().enumerate() {
        let index = position + 1;
        let field = format!("{kind}Configurations[{index}]");
        let entry: RawConfigurationEntry = serde_json::from_value(entry.clone())
            .map_err(|e| ConfigError::invalid(&field, e.to_string()))?;

        for builder_key in &entry.builders {
            let fragment = builders.get(builder_key).ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "\"{builder_key}\" is not a valid builder in the configuration"
                ))
            })?;
            let mut builder = MergedFragment::new();
            builder.merge(&format!("builders.{builder_key}"), fragment)?;
            if builder.builder.is_none() {
                return Err(ConfigError::MissingField(format!(
                    "builder {builder_key} does not specify a remote builder name"
                )));
            }

            for platform_name in &entry.platforms {
                let platform = catalog.platform_by_name(platform_name).ok_or_else(|| {
                    ConfigError::InvalidReference(format!(
                        "{platform_name} is not a valid platform name"
                    ))
                })?;
                resolved.push(ResolvedEntry {
                    index,
                    types: entry.types.clone(),
                    builder: builder.clone(),
                    platform,
                });
            }
        }
    }
    Ok(resolved)
}
