//! Synchronization of one remote builder.
//!
//! A [`BuilderSynchronizer`] knows what a builder can run. Polling it yields
//! a [`SyncCycle`]: the builder's current builds plus the slaves handed out
//! during this cycle. Scheduling goes through the cycle, so that a slave is
//! never given two builds before the remote has had a chance to list the
//! first one.

use crate::entry::RemoteBuildEntry;
use crate::remote::RemoteService;
use crate::{SyncError, SyncResult};
use buildsync_config::{
    BuilderConfiguration, CommonConfiguration, Configuration, RepositoryGroupConfig,
    SyncConfiguration,
};
use buildsync_core::{BuildRequest, BuildRequestId, BuildRequestLookup, Catalog};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns one remote builder's configurations.
pub struct BuilderSynchronizer {
    remote: Arc<dyn RemoteService>,
    config: BuilderConfiguration,
    common: Arc<CommonConfiguration>,
}

impl BuilderSynchronizer {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        config: BuilderConfiguration,
        common: Arc<CommonConfiguration>,
    ) -> Self {
        Self {
            remote,
            config,
            common,
        }
    }

    /// One synchronizer per builder of a loaded configuration.
    pub fn from_configuration(
        remote: Arc<dyn RemoteService>,
        configuration: SyncConfiguration,
    ) -> Vec<Self> {
        configuration
            .builders
            .into_iter()
            .map(|config| Self::new(remote.clone(), config, configuration.common.clone()))
            .collect()
    }

    /// Validate `document` and create its synchronizers.
    pub fn load(
        remote: Arc<dyn RemoteService>,
        document: &Value,
        catalog: &dyn Catalog,
    ) -> SyncResult<Vec<Self>> {
        let configuration = buildsync_config::load_configuration(document, catalog)?;
        Ok(Self::from_configuration(remote, configuration))
    }

    pub fn builder_name(&self) -> &str {
        &self.config.builder_name
    }

    pub fn slave_list(&self) -> Option<&[String]> {
        self.config.slave_list.as_deref()
    }

    pub fn is_tester(&self) -> bool {
        self.config.is_tester()
    }

    pub fn test_configurations(&self) -> &[Configuration] {
        self.config.test_configurations()
    }

    pub fn build_configurations(&self) -> &[Configuration] {
        self.config.build_configurations()
    }

    pub(crate) fn configurations(&self) -> &[Configuration] {
        self.config.configurations()
    }

    pub fn repository_groups(&self) -> &BTreeMap<String, RepositoryGroupConfig> {
        &self.common.repository_groups
    }

    pub fn slave_property_name(&self) -> Option<&str> {
        self.common.slave_argument.as_deref()
    }

    pub fn build_request_property_name(&self) -> &str {
        &self.common.build_request_argument
    }

    /// Whether some configuration serves the request's platform and test.
    pub fn matches_configuration(&self, request: &BuildRequest) -> bool {
        self.configurations()
            .iter()
            .any(|config| config.matches(request))
    }

    pub fn path_for_pending_builds_json(&self) -> String {
        format!("/json/builders/{}/pendingBuilds", self.escaped_name())
    }

    /// `selected` are build indices counted from the end, `-1` being the
    /// most recent build.
    pub fn path_for_build_json(&self, selected: &[i64]) -> String {
        let query: Vec<String> = selected
            .iter()
            .map(|index| format!("select={index}"))
            .collect();
        format!(
            "/json/builders/{}/builds/?{}",
            self.escaped_name(),
            query.join("&")
        )
    }

    pub fn path_for_force_build(&self) -> String {
        format!("/builders/{}/force", self.escaped_name())
    }

    pub fn url(&self) -> String {
        self.remote
            .url(&format!("/builders/{}/", self.escaped_name()))
    }

    pub fn url_for_build_number(&self, number: u64) -> String {
        self.remote
            .url(&format!("/builders/{}/builds/{number}", self.escaped_name()))
    }

    fn escaped_name(&self) -> String {
        urlencoding::encode(&self.config.builder_name).into_owned()
    }

    /// Fetch the pending builds and the `count` most recent builds, and start
    /// a new cycle on that snapshot.
    ///
    /// Entries are merged by build request id with recent builds taking
    /// precedence, so a request that went from pending to finished between
    /// the two requests shows up once, as finished.
    pub async fn pull_builds(&mut self, count: usize) -> SyncResult<SyncCycle<'_>> {
        let content = self
            .remote
            .get_json(&self.path_for_pending_builds_json())
            .await?;
        let pending = content.as_array().ok_or_else(|| {
            SyncError::Protocol(format!(
                "pending builds of \"{}\" is not a list",
                self.builder_name()
            ))
        })?;
        let syncer: &Self = self;
        let pending_entries = pending
            .iter()
            .map(|raw| RemoteBuildEntry::from_json(syncer, raw))
            .collect::<SyncResult<Vec<_>>>()?;

        let recent_entries = self.pull_recent_builds(count).await?;
        let entries = merge_entries(pending_entries, recent_entries);

        debug!(builder = %self.builder_name(), entries = entries.len(), "Pulled builds");
        Ok(self.cycle_with_entries(entries))
    }

    async fn pull_recent_builds(&self, count: usize) -> SyncResult<Vec<RemoteBuildEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let selected: Vec<i64> = (1..=count as i64).map(|i| -i).collect();
        let content = self
            .remote
            .get_json(&self.path_for_build_json(&selected))
            .await?;

        let mut entries = Vec::new();
        for index in &selected {
            let Some(raw) = content.get(index.to_string()) else {
                continue;
            };
            if raw.is_null() || raw.get("error").is_some() {
                continue;
            }
            entries.push(RemoteBuildEntry::from_json(self, raw)?);
        }
        Ok(entries)
    }

    /// Start a cycle on an already fetched snapshot.
    pub fn cycle_with_entries(&mut self, entries: Vec<RemoteBuildEntry>) -> SyncCycle<'_> {
        SyncCycle {
            syncer: self,
            entries,
            slaves_with_new_requests: HashSet::new(),
        }
    }
}

/// Merge `later` into `earlier` by build request id, keeping first-seen
/// order. Entries without an id are all kept.
fn merge_entries(
    earlier: Vec<RemoteBuildEntry>,
    later: Vec<RemoteBuildEntry>,
) -> Vec<RemoteBuildEntry> {
    let mut entries: Vec<RemoteBuildEntry> = Vec::new();
    let mut index_by_request: HashMap<BuildRequestId, usize> = HashMap::new();
    for entry in earlier.into_iter().chain(later) {
        match entry.build_request_id() {
            Some(id) => match index_by_request.get(&id) {
                Some(&index) => entries[index] = entry,
                None => {
                    index_by_request.insert(id, entries.len());
                    entries.push(entry);
                }
            },
            None => entries.push(entry),
        }
    }
    entries
}

/// A build handed to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBuild {
    pub builder_name: String,
    pub build_request_id: BuildRequestId,
    pub slave_name: Option<String>,
    /// The properties that were posted.
    pub properties: BTreeMap<String, String>,
    /// Body of the remote's response.
    pub response: String,
}

/// One synchronization pass over a builder.
///
/// Holds the snapshot taken by [`BuilderSynchronizer::pull_builds`] and the
/// slaves allocated since. The synchronizer stays borrowed for as long as the
/// cycle lives, so there is only ever one cycle per builder.
pub struct SyncCycle<'a> {
    syncer: &'a BuilderSynchronizer,
    entries: Vec<RemoteBuildEntry>,
    /// `None` stands for "some build without a named slave".
    slaves_with_new_requests: HashSet<Option<String>>,
}

impl<'a> SyncCycle<'a> {
    pub fn syncer(&self) -> &'a BuilderSynchronizer {
        self.syncer
    }

    pub fn entries(&self) -> &[RemoteBuildEntry] {
        &self.entries
    }

    pub fn entry_for_request(&self, id: BuildRequestId) -> Option<&RemoteBuildEntry> {
        self.entries
            .iter()
            .find(|entry| entry.build_request_id() == Some(id))
    }

    /// Slots handed out in this cycle.
    pub fn slaves_with_new_requests(&self) -> &HashSet<Option<String>> {
        &self.slaves_with_new_requests
    }

    /// Schedule `request` if the builder has room for it.
    ///
    /// Returns `Ok(None)` when the request does not belong on this builder or
    /// when no slave is free; the caller tries again next cycle.
    pub async fn schedule_request_in_group_if_available(
        &mut self,
        request: &BuildRequest,
        requests_in_group: &[Arc<BuildRequest>],
        preferred_slave: Option<&str>,
        lookup: &dyn BuildRequestLookup,
    ) -> SyncResult<Option<ScheduledBuild>> {
        let syncer = self.syncer;
        if !syncer.matches_configuration(request) {
            return Ok(None);
        }

        let mut used_slaves: HashSet<Option<String>> = HashSet::new();
        let mut has_unnamed_slave_in_use = false;
        for entry in &self.entries {
            let mut blocks = entry.is_pending();
            if entry.is_in_progress() {
                let in_progress = entry
                    .build_request_id()
                    .and_then(|id| lookup.build_request(id));
                if in_progress.is_none_or(|other| other.test_group_id != request.test_group_id) {
                    blocks = true;
                }
            }
            if blocks {
                if entry.slave_name().is_none() {
                    has_unnamed_slave_in_use = true;
                }
                used_slaves.insert(entry.slave_name().map(str::to_string));
            }
        }

        let slave_list = match syncer.slave_list() {
            Some(list) if !has_unnamed_slave_in_use => list,
            _ => {
                if !used_slaves.is_empty() || !self.slaves_with_new_requests.is_empty() {
                    debug!(builder = %syncer.builder_name(), request = %request.id, "Builder is busy");
                    return Ok(None);
                }
                return self.schedule_request(request, requests_in_group, None).await.map(Some);
            }
        };

        let is_available = |slave: &str| {
            let slot = Some(slave.to_string());
            !used_slaves.contains(&slot) && !self.slaves_with_new_requests.contains(&slot)
        };
        let chosen = match preferred_slave {
            Some(slave) => is_available(slave).then(|| slave.to_string()),
            None => slave_list
                .iter()
                .find(|slave| is_available(slave.as_str()))
                .cloned(),
        };

        match chosen {
            Some(slave) => self
                .schedule_request(request, requests_in_group, Some(slave))
                .await
                .map(Some),
            None => {
                debug!(
                    builder = %syncer.builder_name(),
                    request = %request.id,
                    preferred = ?preferred_slave,
                    "No slave available"
                );
                Ok(None)
            }
        }
    }

    /// Post `request` to the builder. The slot is marked taken before the
    /// request goes out.
    pub async fn schedule_request(
        &mut self,
        request: &BuildRequest,
        requests_in_group: &[Arc<BuildRequest>],
        slave_name: Option<String>,
    ) -> SyncResult<ScheduledBuild> {
        let syncer = self.syncer;
        if self.slaves_with_new_requests.contains(&slave_name) {
            return Err(SyncError::Config(format!(
                "slave {slave_name:?} of \"{}\" was already given a build in this cycle",
                syncer.builder_name()
            )));
        }

        let mut properties = syncer.properties_for_build_request(request, requests_in_group)?;
        if let Some(slave) = &slave_name {
            let argument = syncer.slave_property_name().ok_or_else(|| {
                SyncError::Config(format!(
                    "builder \"{}\" assigns slaves but no slaveArgument is configured",
                    syncer.builder_name()
                ))
            })?;
            properties.insert(argument.to_string(), slave.clone());
        }

        self.slaves_with_new_requests.insert(slave_name.clone());
        info!(
            builder = %syncer.builder_name(),
            request = %request.id,
            slave = ?slave_name,
            "Scheduling build request"
        );
        let response = syncer
            .remote
            .post_form_urlencoded(&syncer.path_for_force_build(), &properties)
            .await?;

        Ok(ScheduledBuild {
            builder_name: syncer.builder_name().to_string(),
            build_request_id: request.id,
            slave_name,
            properties,
            response,
        })
    }
}
