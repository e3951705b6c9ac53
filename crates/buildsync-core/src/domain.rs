//! Domain objects owned by the dashboard.
//!
//! These are read-only snapshots as far as synchronization is concerned. The
//! synchronizer never mutates them; status changes it detects are reported
//! back to the caller.

use serde::{Deserialize, Serialize};

use crate::id::{
    BuildRequestId, CommitSetId, PlatformId, RepositoryId, TestGroupId, TestId, UploadedFileId,
};

/// A test in the dashboard's test tree, identified by its path from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub id: TestId,
    /// Path of test names from the root, e.g. `["Speedometer", "Total"]`.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: PlatformId,
    pub name: String,
}

/// A top-level source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
}

/// A file uploaded to the dashboard: a patch or a build product root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: UploadedFileId,
    pub url: String,
}

/// The revision (and optional patch) of one repository in a commit set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSetItem {
    pub repository: RepositoryId,
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<UploadedFile>,
}

/// A bundle of revisions across repositories, plus the roots produced by
/// building it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSet {
    pub id: CommitSetId,
    pub items: Vec<CommitSetItem>,
    #[serde(default)]
    pub root_files: Vec<UploadedFile>,
}

impl CommitSet {
    pub fn repositories(&self) -> impl Iterator<Item = RepositoryId> + '_ {
        self.items.iter().map(|item| item.repository)
    }

    fn item_for(&self, repository: RepositoryId) -> Option<&CommitSetItem> {
        self.items.iter().find(|item| item.repository == repository)
    }

    pub fn revision_for_repository(&self, repository: RepositoryId) -> Option<&str> {
        self.item_for(repository).map(|item| item.revision.as_str())
    }

    pub fn patch_for_repository(&self, repository: RepositoryId) -> Option<&UploadedFile> {
        self.item_for(repository).and_then(|item| item.patch.as_ref())
    }

    pub fn all_root_files(&self) -> &[UploadedFile] {
        &self.root_files
    }
}

/// Lifecycle status of a build request as recorded by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildRequestStatus {
    Pending,
    Scheduled,
    Running,
    Failed,
    Completed,
    Canceled,
}

impl std::fmt::Display for BuildRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildRequestStatus::Pending => write!(f, "pending"),
            BuildRequestStatus::Scheduled => write!(f, "scheduled"),
            BuildRequestStatus::Running => write!(f, "running"),
            BuildRequestStatus::Failed => write!(f, "failed"),
            BuildRequestStatus::Completed => write!(f, "completed"),
            BuildRequestStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// A unit of work in a test group: either building a commit set or running
/// a test against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub id: BuildRequestId,
    pub test_group_id: TestGroupId,
    /// Position in the test group. Build requests use negative orders so
    /// they run before the tests that depend on them.
    pub order: i32,
    pub platform: PlatformId,
    /// `None` for build requests.
    #[serde(default)]
    pub test: Option<TestId>,
    pub commit_set: CommitSet,
    /// Name of the repository group the commit set was created against.
    pub repository_group: String,
    pub status: BuildRequestStatus,
}

impl BuildRequest {
    pub fn is_build(&self) -> bool {
        self.order < 0
    }

    pub fn is_pending(&self) -> bool {
        self.status == BuildRequestStatus::Pending
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == BuildRequestStatus::Scheduled
    }

    pub fn has_started(&self) -> bool {
        self.status != BuildRequestStatus::Pending
    }

    pub fn has_finished(&self) -> bool {
        matches!(
            self.status,
            BuildRequestStatus::Failed | BuildRequestStatus::Completed | BuildRequestStatus::Canceled
        )
    }
}
