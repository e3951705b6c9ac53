//! Lookup interfaces for domain objects.
//!
//! The loader and the synchronizers never reach for global tables. They are
//! handed one of these traits and treat the result as authoritative.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::{BuildRequest, Platform, Repository, Test};
use crate::id::{BuildRequestId, TestGroupId};
use crate::{Error, Result};

/// Lookups of the objects a configuration refers to by name.
pub trait Catalog: Send + Sync {
    /// Find a test by its full path from the root of the test tree.
    fn test_by_path(&self, path: &[String]) -> Option<Arc<Test>>;

    fn platform_by_name(&self, name: &str) -> Option<Arc<Platform>>;

    /// Find a top-level repository by name.
    fn repository_by_name(&self, name: &str) -> Option<Arc<Repository>>;
}

/// Lookup of build requests by id, used to correlate remote builds.
pub trait BuildRequestLookup: Send + Sync {
    fn build_request(&self, id: BuildRequestId) -> Option<Arc<BuildRequest>>;
}

/// Source of the build requests a synchronization cycle should consider.
pub trait BuildRequestSource: BuildRequestLookup {
    /// Unfinished test groups, each as its requests sorted by order.
    fn requests_by_test_group(&self) -> Vec<Vec<Arc<BuildRequest>>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogSnapshot {
    #[serde(default)]
    tests: Vec<Test>,
    #[serde(default)]
    platforms: Vec<Platform>,
    #[serde(default)]
    repositories: Vec<Repository>,
    #[serde(default)]
    build_requests: Vec<BuildRequest>,
}

/// Catalog of domain objects held in memory.
///
/// Used by the CLI, which loads it from a JSON snapshot exported by the
/// dashboard, and by tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    tests: Vec<Arc<Test>>,
    platforms: HashMap<String, Arc<Platform>>,
    repositories: HashMap<String, Arc<Repository>>,
    build_requests: BTreeMap<BuildRequestId, Arc<BuildRequest>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog snapshot of the form
    /// `{"tests": [...], "platforms": [...], "repositories": [...], "buildRequests": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: CatalogSnapshot = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for test in snapshot.tests {
            catalog.insert_test(test);
        }
        for platform in snapshot.platforms {
            catalog.insert_platform(platform);
        }
        for repository in snapshot.repositories {
            catalog.insert_repository(repository);
        }
        for request in snapshot.build_requests {
            if catalog.build_requests.contains_key(&request.id) {
                return Err(Error::InvalidInput(format!(
                    "build request {} appears more than once",
                    request.id
                )));
            }
            catalog.check_references(&request)?;
            catalog.insert_build_request(request);
        }
        Ok(catalog)
    }

    /// Every platform, test and repository `request` names must be known.
    fn check_references(&self, request: &BuildRequest) -> Result<()> {
        if !self.platforms.values().any(|platform| platform.id == request.platform) {
            return Err(Error::NotFound(format!(
                "platform {} of build request {}",
                request.platform, request.id
            )));
        }
        if let Some(test) = request.test {
            if !self.tests.iter().any(|known| known.id == test) {
                return Err(Error::NotFound(format!(
                    "test {test} of build request {}",
                    request.id
                )));
            }
        }
        for repository in request.commit_set.repositories() {
            if !self.repositories.values().any(|known| known.id == repository) {
                return Err(Error::NotFound(format!(
                    "repository {repository} of build request {}",
                    request.id
                )));
            }
        }
        Ok(())
    }

    pub fn insert_test(&mut self, test: Test) -> Arc<Test> {
        let test = Arc::new(test);
        self.tests.retain(|existing| existing.path != test.path);
        self.tests.push(test.clone());
        test
    }

    pub fn insert_platform(&mut self, platform: Platform) -> Arc<Platform> {
        let platform = Arc::new(platform);
        self.platforms.insert(platform.name.clone(), platform.clone());
        platform
    }

    pub fn insert_repository(&mut self, repository: Repository) -> Arc<Repository> {
        let repository = Arc::new(repository);
        self.repositories
            .insert(repository.name.clone(), repository.clone());
        repository
    }

    pub fn insert_build_request(&mut self, request: BuildRequest) -> Arc<BuildRequest> {
        let request = Arc::new(request);
        self.build_requests.insert(request.id, request.clone());
        request
    }

    pub fn build_requests(&self) -> impl Iterator<Item = &Arc<BuildRequest>> {
        self.build_requests.values()
    }
}

impl Catalog for InMemoryCatalog {
    fn test_by_path(&self, path: &[String]) -> Option<Arc<Test>> {
        self.tests.iter().find(|test| test.path == path).cloned()
    }

    fn platform_by_name(&self, name: &str) -> Option<Arc<Platform>> {
        self.platforms.get(name).cloned()
    }

    fn repository_by_name(&self, name: &str) -> Option<Arc<Repository>> {
        self.repositories.get(name).cloned()
    }
}

impl BuildRequestLookup for InMemoryCatalog {
    fn build_request(&self, id: BuildRequestId) -> Option<Arc<BuildRequest>> {
        self.build_requests.get(&id).cloned()
    }
}

impl BuildRequestSource for InMemoryCatalog {
    fn requests_by_test_group(&self) -> Vec<Vec<Arc<BuildRequest>>> {
        let mut groups: BTreeMap<TestGroupId, Vec<Arc<BuildRequest>>> = BTreeMap::new();
        for request in self.build_requests.values() {
            groups
                .entry(request.test_group_id)
                .or_default()
                .push(request.clone());
        }

        groups
            .into_values()
            .filter(|requests| requests.iter().any(|request| !request.has_finished()))
            .map(|mut requests| {
                requests.sort_by_key(|request| request.order);
                requests
            })
            .collect()
    }
}
