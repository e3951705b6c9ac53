//! Resolved builder configurations.

use crate::{ConfigError, ConfigResult};
use buildsync_core::{BuildRequest, Platform, Test};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a builder does on the remote service. A builder has exactly one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderRole {
    /// Runs tests against already built or shipped products.
    Tester,
    /// Builds patched commit sets.
    Builder,
}

impl std::fmt::Display for BuilderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderRole::Tester => write!(f, "tester"),
            BuilderRole::Builder => write!(f, "builder"),
        }
    }
}

/// One (test, platform) combination a builder serves, with the static
/// properties sent along with every build of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// `None` for build configurations.
    pub test: Option<Arc<Test>>,
    pub platform: Arc<Platform>,
    pub properties: BTreeMap<String, String>,
}

impl Configuration {
    pub fn matches(&self, request: &BuildRequest) -> bool {
        self.platform.id == request.platform
            && self.test.as_ref().map(|test| test.id) == request.test
    }
}

/// Everything the configuration says about one remote builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfiguration {
    pub builder_name: String,
    /// Slaves builds may be pinned to, in preference order.
    pub slave_list: Option<Vec<String>>,
    role: Option<BuilderRole>,
    configurations: Vec<Configuration>,
}

impl BuilderConfiguration {
    pub fn new(builder_name: impl Into<String>, slave_list: Option<Vec<String>>) -> Self {
        Self {
            builder_name: builder_name.into(),
            slave_list,
            role: None,
            configurations: Vec::new(),
        }
    }

    pub fn role(&self) -> Option<BuilderRole> {
        self.role
    }

    pub fn is_tester(&self) -> bool {
        self.role == Some(BuilderRole::Tester)
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    pub fn test_configurations(&self) -> &[Configuration] {
        self.configurations_for(BuilderRole::Tester)
    }

    pub fn build_configurations(&self) -> &[Configuration] {
        self.configurations_for(BuilderRole::Builder)
    }

    fn configurations_for(&self, role: BuilderRole) -> &[Configuration] {
        if self.role == Some(role) {
            &self.configurations
        } else {
            &[]
        }
    }

    pub fn add_test_configuration(
        &mut self,
        test: Arc<Test>,
        platform: Arc<Platform>,
        properties: BTreeMap<String, String>,
    ) -> ConfigResult<()> {
        self.assume_role(BuilderRole::Tester)?;
        self.configurations.push(Configuration {
            test: Some(test),
            platform,
            properties,
        });
        Ok(())
    }

    pub fn add_build_configuration(
        &mut self,
        platform: Arc<Platform>,
        properties: BTreeMap<String, String>,
    ) -> ConfigResult<()> {
        self.assume_role(BuilderRole::Builder)?;
        self.configurations.push(Configuration {
            test: None,
            platform,
            properties,
        });
        Ok(())
    }

    fn assume_role(&mut self, role: BuilderRole) -> ConfigResult<()> {
        match self.role {
            Some(current) if current != role => Err(ConfigError::Conflict(format!(
                "builder \"{}\" is already used as a {current} and cannot be used as a {role}",
                self.builder_name
            ))),
            _ => {
                self.role = Some(role);
                Ok(())
            }
        }
    }
}
