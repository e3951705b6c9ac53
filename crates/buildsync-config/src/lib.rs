//! Configuration loading for buildsync.
//!
//! This crate handles:
//! - Repository groups and their property templates
//! - Merging of builder and type fragments
//! - Resolution of test and build configurations into per-builder settings

pub mod builder;
pub mod error;
pub mod loader;
pub mod merge;
pub mod repository_group;

pub use builder::{BuilderConfiguration, BuilderRole, Configuration};
pub use error::{ConfigError, ConfigResult};
pub use loader::{
    CommonConfiguration, SyncConfiguration, load_configuration, load_configuration_file,
    parse_configuration,
};
pub use merge::MergedFragment;
pub use repository_group::{
    PropertyCondition, PropertyTemplate, PropertyTemplateOption, RepositoryGroupConfig,
    RepositoryGroupEntry,
};
