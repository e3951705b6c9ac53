//! Fixtures shared by the scheduler tests.

use crate::remote::RemoteService;
use crate::syncer::BuilderSynchronizer;
use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use buildsync_core::{
    BuildRequest, BuildRequestId, BuildRequestStatus, CommitSet, CommitSetId, CommitSetItem,
    InMemoryCatalog, Platform, PlatformId, Repository, RepositoryId, Test, TestGroupId, TestId,
    UploadedFile, UploadedFileId,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const TEST_GROUP: u64 = 500;

const IOS: u64 = 1;
const WEBKIT: u64 = 2;
const IPHONE: u64 = 10;
const SPEEDOMETER: u64 = 20;

/// Remote with canned GET responses that records every request.
#[derive(Default)]
pub(crate) struct MockRemote {
    responses: Mutex<HashMap<String, Value>>,
    requested: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    fail_posts: AtomicBool,
}

impl MockRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, path: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), body);
    }

    pub(crate) fn fail_posts(&self) {
        self.fail_posts.store(true, Ordering::SeqCst);
    }

    pub(crate) fn requested_paths(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub(crate) fn posts(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn get_json(&self, path: &str) -> SyncResult<Value> {
        self.requested.lock().unwrap().push(path.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::Remote(format!("GET {path} returned 404 Not Found")))
    }

    async fn post_form_urlencoded(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> SyncResult<String> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(SyncError::Remote(format!("POST {path} returned 500")));
        }
        self.posts
            .lock()
            .unwrap()
            .push((path.to_string(), properties.clone()));
        Ok("OK".to_string())
    }

    fn url(&self, path: &str) -> String {
        format!("http://build.webkit.org{path}")
    }
}

pub(crate) fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.insert_repository(Repository {
        id: RepositoryId::new(IOS),
        name: "iOS".to_string(),
    });
    catalog.insert_repository(Repository {
        id: RepositoryId::new(WEBKIT),
        name: "WebKit".to_string(),
    });
    catalog.insert_platform(Platform {
        id: PlatformId::new(IPHONE),
        name: "iPhone".to_string(),
    });
    catalog.insert_test(Test {
        id: TestId::new(SPEEDOMETER),
        path: vec!["Speedometer".to_string()],
    });
    catalog
}

pub(crate) fn catalog_with(requests: Vec<BuildRequest>) -> InMemoryCatalog {
    let mut catalog = catalog();
    for request in requests {
        catalog.insert_build_request(request);
    }
    catalog
}

pub(crate) fn configuration() -> Value {
    json!({
        "buildRequestArgument": "build_request_id",
        "slaveArgument": "slavename",
        "repositoryGroups": {
            "ios-webkit": {
                "repositories": {"iOS": {}, "WebKit": {"acceptsPatch": true}},
                "acceptsRoots": true,
                "testProperties": {
                    "desired_image": {"revision": "iOS"},
                    "opensource": {"revision": "WebKit"},
                    "roots": {"roots": {}},
                    "checkbox": {"ifBuilt": "build-webkit"}
                },
                "buildProperties": {
                    "os": {"revision": "iOS"},
                    "wk": {"revision": "WebKit"},
                    "wk-patch": {"patch": "WebKit"}
                }
            },
            "ios-only": {
                "repositories": {"iOS": {}},
                "testProperties": {"desired_image": {"revision": "iOS"}}
            }
        },
        "types": {
            "speedometer": {"test": ["Speedometer"], "properties": {"test_name": "speedometer"}}
        },
        "builders": {
            "iphone-ab": {
                "builder": "ABTest-iPhone",
                "properties": {"forcescheduler": "ABTest-iPhone-RunBenchmark-Tests"}
            },
            "iphone-build": {
                "builder": "ABTest-iPhone-Builder",
                "properties": {"forcescheduler": "ABTest-iPhone-Build"}
            }
        },
        "testConfigurations": [
            {"builders": ["iphone-ab"], "platforms": ["iPhone"], "types": ["speedometer"]}
        ],
        "buildConfigurations": [
            {"builders": ["iphone-build"], "platforms": ["iPhone"]}
        ]
    })
}

/// All synchronizers of [`configuration`], the tester pinned to
/// `slave_list` if given.
pub(crate) fn synchronizers(
    remote: Arc<MockRemote>,
    slave_list: Option<Vec<&str>>,
) -> Vec<BuilderSynchronizer> {
    let mut document = configuration();
    if let Some(slaves) = slave_list {
        document["builders"]["iphone-ab"]["slaveList"] = json!(slaves);
    }
    load(remote, &document)
}

/// Synchronizers of `document`, resolved against [`catalog`].
pub(crate) fn load(remote: Arc<MockRemote>, document: &Value) -> Vec<BuilderSynchronizer> {
    BuilderSynchronizer::load(remote, document, &catalog()).unwrap()
}

/// The `ABTest-iPhone` tester.
pub(crate) fn tester(remote: Arc<MockRemote>, slave_list: Option<Vec<&str>>) -> BuilderSynchronizer {
    synchronizers(remote, slave_list)
        .into_iter()
        .find(|syncer| syncer.builder_name() == "ABTest-iPhone")
        .unwrap()
}

/// The `ABTest-iPhone-Builder` builder.
pub(crate) fn builder(remote: Arc<MockRemote>) -> BuilderSynchronizer {
    synchronizers(remote, None)
        .into_iter()
        .find(|syncer| syncer.builder_name() == "ABTest-iPhone-Builder")
        .unwrap()
}

pub(crate) fn webkit_patch() -> UploadedFile {
    UploadedFile {
        id: UploadedFileId::new(10),
        url: "/api/uploaded-file/10.patch".to_string(),
    }
}

/// A pending request on iPhone over iOS 13A452 and WebKit r197463. Requests
/// with a negative order are builds; the others run Speedometer.
pub(crate) fn build_request(id: u64, test_group: u64, order: i32) -> BuildRequest {
    BuildRequest {
        id: BuildRequestId::new(id),
        test_group_id: TestGroupId::new(test_group),
        order,
        platform: PlatformId::new(IPHONE),
        test: (order >= 0).then(|| TestId::new(SPEEDOMETER)),
        commit_set: CommitSet {
            id: CommitSetId::new(100),
            items: vec![
                CommitSetItem {
                    repository: RepositoryId::new(IOS),
                    revision: "13A452".to_string(),
                    patch: None,
                },
                CommitSetItem {
                    repository: RepositoryId::new(WEBKIT),
                    revision: "197463".to_string(),
                    patch: None,
                },
            ],
            root_files: Vec::new(),
        },
        repository_group: "ios-webkit".to_string(),
        status: BuildRequestStatus::Pending,
    }
}
