//! Repository group parsing.
//!
//! A repository group names the repositories a commit set may contain and
//! describes how their revisions, patches and build roots become properties
//! of the builds sent to the remote service. Two templates exist: one used
//! when testing, and an optional one used when building a patched commit set.

use crate::{ConfigError, ConfigResult};
use buildsync_core::{Catalog, CommitSet, Repository, RepositoryId};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Condition guarding a conditional template option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyCondition {
    /// Some request in the same scheduling group builds the same commit set.
    Built,
}

/// One value in a repository group's property template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyTemplateOption {
    /// Sent as is.
    Literal(String),
    /// The revision of this repository in the commit set.
    Revision(Arc<Repository>),
    /// URL of the patch for this repository. Omitted when there is none.
    Patch(Arc<Repository>),
    /// JSON list of the commit set's root files. Omitted when there are none.
    Roots,
    /// `value` is sent only while `condition` holds.
    Conditional {
        condition: PropertyCondition,
        value: String,
    },
}

/// Property name to option, in property name order.
pub type PropertyTemplate = BTreeMap<String, PropertyTemplateOption>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryGroupEntry {
    pub repository: Arc<Repository>,
    pub accepts_patch: bool,
}

/// A validated repository group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryGroupConfig {
    pub name: String,
    pub description: Option<String>,
    pub accepts_roots: bool,
    /// Repositories in the order the document lists them.
    pub repositories: Vec<RepositoryGroupEntry>,
    pub test_properties: PropertyTemplate,
    /// Present only when the group accepts patches and roots.
    pub build_properties: Option<PropertyTemplate>,
}

impl RepositoryGroupConfig {
    /// The template used for a request: the build template for build
    /// requests, the test template otherwise.
    pub fn template_for(&self, is_build: bool) -> Option<&PropertyTemplate> {
        if is_build {
            self.build_properties.as_ref()
        } else {
            Some(&self.test_properties)
        }
    }

    /// Whether a commit set can be sent through this group: it must cover
    /// exactly the group's repositories, carry patches only where they are
    /// accepted, and carry roots only if the group accepts them.
    pub fn accepts(&self, commit_set: &CommitSet) -> bool {
        let repositories: HashSet<RepositoryId> = commit_set.repositories().collect();
        if repositories.len() != commit_set.items.len()
            || repositories.len() != self.repositories.len()
        {
            return false;
        }

        for entry in &self.repositories {
            let id = entry.repository.id;
            if !repositories.contains(&id) {
                return false;
            }
            if !entry.accepts_patch && commit_set.patch_for_repository(id).is_some() {
                return false;
            }
        }

        self.accepts_roots || commit_set.all_root_files().is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepositoryGroup {
    repositories: serde_json::Map<String, Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    accepts_roots: Option<bool>,
    test_properties: BTreeMap<String, Value>,
    #[serde(default)]
    build_properties: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepositoryOptions {
    #[serde(default)]
    accepts_patch: Option<bool>,
}

/// Parse and validate the repository group `name`.
pub fn parse_repository_group(
    name: &str,
    value: &Value,
    catalog: &dyn Catalog,
) -> ConfigResult<RepositoryGroupConfig> {
    let field = format!("repositoryGroups.{name}");
    let raw: RawRepositoryGroup = serde_json::from_value(value.clone())
        .map_err(|e| ConfigError::invalid(&field, e.to_string()))?;

    let mut repositories = Vec::new();
    for (repository_name, options) in &raw.repositories {
        let repository = catalog.repository_by_name(repository_name).ok_or_else(|| {
            ConfigError::InvalidReference(format!(
                "\"{repository_name}\" is not a valid repository name"
            ))
        })?;
        let options: RawRepositoryOptions = serde_json::from_value(options.clone())
            .map_err(|e| {
                ConfigError::invalid(format!("{field}.repositories.{repository_name}"), e.to_string())
            })?;
        repositories.push(RepositoryGroupEntry {
            repository,
            accepts_patch: options.accepts_patch.unwrap_or(false),
        });
    }
    if repositories.is_empty() {
        return Err(ConfigError::invalid(
            format!("{field}.repositories"),
            format!("repository group \"{name}\" does not specify any repository"),
        ));
    }

    let accepts_roots = raw.accepts_roots.unwrap_or(false);
    let test_properties =
        parse_test_properties(name, &field, accepts_roots, &repositories, &raw.test_properties)?;

    let build_properties = match &raw.build_properties {
        Some(properties) => Some(parse_build_properties(
            name,
            &field,
            accepts_roots,
            &repositories,
            properties,
        )?),
        None => None,
    };

    Ok(RepositoryGroupConfig {
        name: name.to_string(),
        description: raw.description,
        accepts_roots,
        repositories,
        test_properties,
        build_properties,
    })
}

fn parse_test_properties(
    name: &str,
    field: &str,
    accepts_roots: bool,
    repositories: &[RepositoryGroupEntry],
    properties: &BTreeMap<String, Value>,
) -> ConfigResult<PropertyTemplate> {
    let field = format!("{field}.testProperties");
    let mut revision_repositories = HashSet::new();
    let mut specifies_roots = false;

    let template = parse_property_template(name, &field, properties, |property, kind, value| {
        match kind {
            "patch" => Err(ConfigError::invalid(
                property,
                format!("repository group \"{name}\" specifies a patch in the properties for testing"),
            )),
            "revision" => {
                let repository = resolve_repository(name, property, repositories, value)?;
                if !revision_repositories.insert(repository.id) {
                    return Err(ConfigError::invalid(
                        property,
                        format!(
                            "repository group \"{name}\" specifies the revision of \"{}\" more than once",
                            repository.name
                        ),
                    ));
                }
                Ok(Some(PropertyTemplateOption::Revision(repository)))
            }
            "roots" => {
                if !accepts_roots {
                    return Err(ConfigError::invalid(
                        property,
                        format!(
                            "repository group \"{name}\" specifies roots in a property but it does not accept roots"
                        ),
                    ));
                }
                specifies_roots = true;
                Ok(Some(PropertyTemplateOption::Roots))
            }
            "ifBuilt" => Ok(Some(PropertyTemplateOption::Conditional {
                condition: PropertyCondition::Built,
                value: conditional_value(value),
            })),
            _ => Ok(None),
        }
    })?;

    if accepts_roots && !specifies_roots {
        return Err(ConfigError::invalid(
            &field,
            format!("repository group \"{name}\" accepts roots but does not specify roots in testProperties"),
        ));
    }
    if revision_repositories.len() != repositories.len() {
        return Err(ConfigError::invalid(
            &field,
            format!("repository group \"{name}\" does not use some of the repositories listed in testing"),
        ));
    }

    Ok(template)
}

fn parse_build_properties(
    name: &str,
    field: &str,
    accepts_roots: bool,
    repositories: &[RepositoryGroupEntry],
    properties: &BTreeMap<String, Value>,
) -> ConfigResult<PropertyTemplate> {
    let field = format!("{field}.buildProperties");
    let patch_accepting: HashSet<RepositoryId> = repositories
        .iter()
        .filter(|entry| entry.accepts_patch)
        .map(|entry| entry.repository.id)
        .collect();

    if patch_accepting.is_empty() {
        return Err(ConfigError::invalid(
            &field,
            format!(
                "repository group \"{name}\" specifies the properties for building but does not accept any patches"
            ),
        ));
    }
    if !accepts_roots {
        return Err(ConfigError::invalid(
            &field,
            format!(
                "repository group \"{name}\" specifies the properties for building but does not accept roots in testing"
            ),
        ));
    }

    let mut revision_repositories = HashSet::new();
    let mut patch_repositories: Vec<Arc<Repository>> = Vec::new();

    let template = parse_property_template(name, &field, properties, |property, kind, value| {
        if kind == "roots" {
            return Err(ConfigError::invalid(
                property,
                format!("repository group \"{name}\" specifies roots in the properties for building"),
            ));
        }
        let repository = resolve_repository(name, property, repositories, value)?;
        match kind {
            "patch" => {
                if !patch_accepting.contains(&repository.id) {
                    return Err(ConfigError::invalid(
                        property,
                        format!(
                            "repository group \"{name}\" specifies a patch for \"{}\" but it does not accept a patch",
                            repository.name
                        ),
                    ));
                }
                if patch_repositories.iter().any(|r| r.id == repository.id) {
                    return Err(ConfigError::invalid(
                        property,
                        format!(
                            "repository group \"{name}\" specifies the patch of \"{}\" more than once",
                            repository.name
                        ),
                    ));
                }
                patch_repositories.push(repository.clone());
                Ok(Some(PropertyTemplateOption::Patch(repository)))
            }
            "revision" => {
                revision_repositories.insert(repository.id);
                Ok(Some(PropertyTemplateOption::Revision(repository)))
            }
            _ => Ok(None),
        }
    })?;

    for repository in &patch_repositories {
        if !revision_repositories.contains(&repository.id) {
            return Err(ConfigError::invalid(
                &field,
                format!(
                    "repository group \"{name}\" specifies a patch for \"{}\" but does not specify a revision",
                    repository.name
                ),
            ));
        }
    }
    if patch_repositories.len() != patch_accepting.len() {
        return Err(ConfigError::invalid(
            &field,
            format!(
                "repository group \"{name}\" does not use some of the repositories listed in building a patch"
            ),
        ));
    }

    Ok(template)
}

/// Walk a property dictionary. Strings become literals; single-key
/// dictionaries are handed to `make_option` as `(field, type, value)`, which
/// returns `Ok(None)` for a type it does not know.
fn parse_property_template<F>(
    name: &str,
    field: &str,
    properties: &BTreeMap<String, Value>,
    mut make_option: F,
) -> ConfigResult<PropertyTemplate>
where
    F: FnMut(&str, &str, &Value) -> ConfigResult<Option<PropertyTemplateOption>>,
{
    let mut template = PropertyTemplate::new();
    for (property_name, value) in properties {
        let property = format!("{field}.{property_name}");
        let option = match value {
            Value::String(literal) => PropertyTemplateOption::Literal(literal.clone()),
            Value::Object(map) => {
                let mut entries = map.iter();
                let (kind, inner) = match (entries.next(), entries.next()) {
                    (Some(entry), None) => entry,
                    _ => {
                        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                        return Err(ConfigError::invalid(
                            &property,
                            format!(
                                "repository group \"{name}\" must specify exactly one type in property \"{property_name}\", found \"{}\"",
                                keys.join("\", \"")
                            ),
                        ));
                    }
                };
                make_option(&property, kind, inner)?.ok_or_else(|| {
                    ConfigError::invalid(
                        &property,
                        format!(
                            "repository group \"{name}\" specifies an invalid type \"{kind}\" in property \"{property_name}\""
                        ),
                    )
                })?
            }
            other => {
                return Err(ConfigError::invalid(
                    &property,
                    format!("repository group \"{name}\" uses an invalid value {other} in property \"{property_name}\""),
                ));
            }
        };
        template.insert(property_name.clone(), option);
    }
    Ok(template)
}

fn resolve_repository(
    name: &str,
    field: &str,
    repositories: &[RepositoryGroupEntry],
    value: &Value,
) -> ConfigResult<Arc<Repository>> {
    let repository_name = value.as_str().ok_or_else(|| {
        ConfigError::invalid(
            field,
            format!("repository group \"{name}\" must name a repository, found {value}"),
        )
    })?;
    repositories
        .iter()
        .find(|entry| entry.repository.name == repository_name)
        .map(|entry| entry.repository.clone())
        .ok_or_else(|| {
            ConfigError::InvalidReference(format!(
                "repository group \"{name}\" uses an invalid repository \"{repository_name}\""
            ))
        })
}

fn conditional_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
