//! Periodic synchronization of every builder.

use crate::entry::StatusUpdate;
use crate::syncer::{BuilderSynchronizer, ScheduledBuild, SyncCycle};
use crate::{SyncError, SyncResult};
use buildsync_core::{BuildRequest, BuildRequestId, BuildRequestLookup, BuildRequestSource};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Number of recent builds fetched per builder and cycle.
    pub recent_build_count: usize,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            recent_build_count: 5,
            interval: Duration::from_secs(60),
        }
    }
}

/// A local build request whose status disagrees with the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub build_request_id: BuildRequestId,
    pub builder_name: String,
    pub update: StatusUpdate,
    pub url: String,
    /// When the remote started the build, for builds that have started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// A builder that could not be synchronized in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderFailure {
    pub builder_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub status_updates: Vec<StatusReport>,
    pub scheduled: Vec<ScheduledBuild>,
    pub failures: Vec<BuilderFailure>,
}

/// Drives all synchronizers against one source of build requests.
pub struct Poller {
    synchronizers: Vec<BuilderSynchronizer>,
    source: Arc<dyn BuildRequestSource>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(
        synchronizers: Vec<BuilderSynchronizer>,
        source: Arc<dyn BuildRequestSource>,
        config: PollerConfig,
    ) -> Self {
        Self {
            synchronizers,
            source,
            config,
        }
    }

    pub fn synchronizers(&self) -> &[BuilderSynchronizer] {
        &self.synchronizers
    }

    /// Run cycles until a fatal error occurs.
    pub async fn run(&mut self) -> SyncResult<()> {
        info!(
            builders = self.synchronizers.len(),
            interval = ?self.config.interval,
            "Starting poller"
        );

        loop {
            let report = self.run_cycle().await?;
            info!(
                updates = report.status_updates.len(),
                scheduled = report.scheduled.len(),
                failures = report.failures.len(),
                "Finished cycle"
            );
            sleep(self.config.interval).await;
        }
    }

    /// Pull every builder, report status changes, then offer each test
    /// group's next request to the builders that serve it until one takes it.
    ///
    /// A builder that fails is skipped for the rest of the cycle. Fatal
    /// errors abort the cycle.
    pub async fn run_cycle(&mut self) -> SyncResult<CycleReport> {
        let count = self.config.recent_build_count;
        let names: Vec<String> = self
            .synchronizers
            .iter()
            .map(|syncer| syncer.builder_name().to_string())
            .collect();
        let pulled = join_all(
            self.synchronizers
                .iter_mut()
                .map(|syncer| syncer.pull_builds(count)),
        )
        .await;

        let mut report = CycleReport::default();
        let mut cycles: Vec<SyncCycle<'_>> = Vec::new();
        for (name, result) in names.into_iter().zip(pulled) {
            match result {
                Ok(cycle) => cycles.push(cycle),
                Err(e) => record_failure(&mut report, name, e)?,
            }
        }

        let lookup: &dyn BuildRequestLookup = self.source.as_ref();
        for cycle in &cycles {
            report_status_updates(&mut report, cycle, lookup);
        }

        for group in self.source.requests_by_test_group() {
            let Some(position) = group.iter().position(|request| !request.has_finished()) else {
                continue;
            };
            let request = &group[position];
            if !request.is_pending()
                || cycles
                    .iter()
                    .any(|cycle| cycle.entry_for_request(request.id).is_some())
            {
                continue;
            }

            let candidates = candidate_builders(&cycles, request, &group[..position]);
            if candidates.is_empty() {
                debug!(request = %request.id, "No builder serves build request");
                continue;
            }

            for (index, preferred) in candidates {
                let cycle = &mut cycles[index];
                let builder_name = cycle.syncer().builder_name().to_string();
                match cycle
                    .schedule_request_in_group_if_available(request, &group, preferred.as_deref(), lookup)
                    .await
                {
                    Ok(Some(build)) => {
                        report.scheduled.push(build);
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => record_failure(&mut report, builder_name, e)?,
                }
            }
        }

        Ok(report)
    }
}

fn record_failure(report: &mut CycleReport, builder_name: String, error: SyncError) -> SyncResult<()> {
    if error.is_fatal() {
        return Err(error);
    }
    warn!(builder = %builder_name, error = %error, "Failed to synchronize builder");
    report.failures.push(BuilderFailure {
        builder_name,
        message: error.to_string(),
    });
    Ok(())
}

fn report_status_updates(report: &mut CycleReport, cycle: &SyncCycle<'_>, lookup: &dyn BuildRequestLookup) {
    for entry in cycle.entries() {
        let Some(request) = entry
            .build_request_id()
            .and_then(|id| lookup.build_request(id))
        else {
            continue;
        };
        if let Some(update) = entry.status_if_update_needed(&request) {
            info!(
                builder = %entry.builder_name(),
                request = %request.id,
                %update,
                "Build request status changed"
            );
            report.status_updates.push(StatusReport {
                build_request_id: request.id,
                builder_name: entry.builder_name().to_string(),
                update,
                url: entry.url().to_string(),
                started_at: entry.started_at(),
            });
        }
    }
}

/// Cycles to offer `request` to, in order, each with a preferred slave.
///
/// A group stays on the builder and slave of its closest earlier request
/// seen on a builder serving `request`. Otherwise every serving builder is
/// tried in configuration order.
fn candidate_builders(
    cycles: &[SyncCycle<'_>],
    request: &BuildRequest,
    earlier: &[Arc<BuildRequest>],
) -> Vec<(usize, Option<String>)> {
    let previous = earlier.iter().rev().find_map(|earlier| {
        cycles.iter().enumerate().find_map(|(index, cycle)| {
            let entry = cycle.entry_for_request(earlier.id)?;
            cycle
                .syncer()
                .matches_configuration(request)
                .then(|| (index, entry.slave_name().map(str::to_string)))
        })
    });
    match previous {
        Some(previous) => vec![previous],
        None => cycles
            .iter()
            .enumerate()
            .filter(|(_, cycle)| cycle.syncer().matches_configuration(request))
            .map(|(index, _)| (index, None))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MockRemote, TEST_GROUP, build_request, catalog_with, configuration, load, synchronizers,
    };
    use buildsync_core::BuildRequestStatus;
    use serde_json::json;

    const PENDING: &str = "/json/builders/ABTest-iPhone/pendingBuilds";
    const RECENT: &str = "/json/builders/ABTest-iPhone/builds/?select=-1&select=-2";
    const BUILDER_PENDING: &str = "/json/builders/ABTest-iPhone-Builder/pendingBuilds";
    const BUILDER_RECENT: &str = "/json/builders/ABTest-iPhone-Builder/builds/?select=-1&select=-2";

    fn config() -> PollerConfig {
        PollerConfig {
            recent_build_count: 2,
            interval: Duration::from_millis(10),
        }
    }

    fn idle(remote: &MockRemote) {
        remote.respond(PENDING, json!([]));
        remote.respond(RECENT, json!({}));
        remote.respond(BUILDER_PENDING, json!([]));
        remote.respond(BUILDER_RECENT, json!({}));
    }

    fn poller(remote: Arc<MockRemote>, slaves: Option<Vec<&str>>, requests: Vec<BuildRequest>) -> Poller {
        Poller::new(
            synchronizers(remote, slaves),
            Arc::new(catalog_with(requests)),
            config(),
        )
    }

    #[tokio::test]
    async fn test_schedules_first_pending_request_of_each_group() {
        let remote = MockRemote::new();
        idle(&remote);
        let mut poller = poller(
            remote.clone(),
            Some(vec!["s1", "s2"]),
            vec![
                build_request(1, TEST_GROUP, 0),
                build_request(2, TEST_GROUP, 1),
                build_request(3, TEST_GROUP + 1, 0),
            ],
        );

        let report = poller.run_cycle().await.unwrap();
        let scheduled: Vec<(u64, Option<&str>)> = report
            .scheduled
            .iter()
            .map(|build| (build.build_request_id.get(), build.slave_name.as_deref()))
            .collect();
        assert_eq!(scheduled, vec![(1, Some("s1")), (3, Some("s2"))]);
        assert!(report.failures.is_empty());
        assert_eq!(remote.posts().len(), 2);
    }

    #[tokio::test]
    async fn test_reports_status_updates_and_skips_correlated_requests() {
        let remote = MockRemote::new();
        idle(&remote);
        remote.respond(
            PENDING,
            json!([{"builderName": "ABTest-iPhone",
                    "properties": [["build_request_id", "1", ""], ["slavename", "s1", ""]]}]),
        );

        let mut poller = poller(
            remote.clone(),
            Some(vec!["s1", "s2"]),
            vec![build_request(1, TEST_GROUP, 0), build_request(2, TEST_GROUP, 1)],
        );
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(
            report.status_updates,
            vec![StatusReport {
                build_request_id: BuildRequestId::new(1),
                builder_name: "ABTest-iPhone".to_string(),
                update: StatusUpdate::Scheduled,
                url: "http://build.webkit.org/builders/ABTest-iPhone/".to_string(),
                started_at: None,
            }]
        );
        assert!(report.scheduled.is_empty());
        assert!(remote.posts().is_empty());
    }

    #[tokio::test]
    async fn test_next_request_prefers_slave_of_earlier_request() {
        let remote = MockRemote::new();
        idle(&remote);
        remote.respond(
            RECENT,
            json!({"-1": {"builderName": "ABTest-iPhone", "number": 3, "times": [1, 2],
                          "properties": [["build_request_id", "1", ""], ["slavename", "s2", ""]]}}),
        );

        let mut first = build_request(1, TEST_GROUP, 0);
        first.status = BuildRequestStatus::Completed;
        let mut poller = poller(
            remote.clone(),
            Some(vec!["s1", "s2"]),
            vec![first, build_request(2, TEST_GROUP, 1)],
        );
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].build_request_id, BuildRequestId::new(2));
        assert_eq!(report.scheduled[0].slave_name.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_running_request_reports_start_time() {
        let remote = MockRemote::new();
        idle(&remote);
        remote.respond(
            RECENT,
            json!({"-1": {"builderName": "ABTest-iPhone", "number": 4, "times": [1458704983, null],
                          "properties": [["build_request_id", "1", ""]]}}),
        );
        let mut first = build_request(1, TEST_GROUP, 0);
        first.status = BuildRequestStatus::Scheduled;
        let mut poller = poller(remote.clone(), None, vec![first]);
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.status_updates.len(), 1);
        assert_eq!(report.status_updates[0].update, StatusUpdate::Running);
        assert_eq!(
            report.status_updates[0].started_at.map(|at| at.timestamp()),
            Some(1458704983)
        );
    }

    const SECOND_PENDING: &str = "/json/builders/ABTest-iPhone-2/pendingBuilds";
    const SECOND_RECENT: &str = "/json/builders/ABTest-iPhone-2/builds/?select=-1&select=-2";

    /// Two testers serving the same configurations, both on slaves s1 and s2.
    fn two_testers(remote: Arc<MockRemote>, requests: Vec<BuildRequest>) -> Poller {
        let mut document = configuration();
        document["builders"]["iphone-ab"]["slaveList"] = json!(["s1", "s2"]);
        document["builders"]["iphone-ab-2"] = json!({
            "builder": "ABTest-iPhone-2",
            "slaveList": ["s1", "s2"],
            "properties": {"forcescheduler": "ABTest-iPhone-2-RunBenchmark-Tests"}
        });
        document["testConfigurations"][0]["builders"] = json!(["iphone-ab", "iphone-ab-2"]);
        idle(&remote);
        remote.respond(SECOND_PENDING, json!([]));
        remote.respond(SECOND_RECENT, json!({}));
        Poller::new(load(remote, &document), Arc::new(catalog_with(requests)), config())
    }

    #[tokio::test]
    async fn test_busy_builder_falls_back_to_another_serving_builder() {
        let remote = MockRemote::new();
        let mut poller = two_testers(remote.clone(), vec![build_request(1, TEST_GROUP, 0)]);
        // A pending build of something else, without a slave, keeps the first tester busy.
        remote.respond(
            PENDING,
            json!([{"builderName": "ABTest-iPhone", "properties": [["build_request_id", "99", ""]]}]),
        );

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].builder_name, "ABTest-iPhone-2");
        assert_eq!(report.scheduled[0].slave_name.as_deref(), Some("s1"));
        let posts = remote.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "/builders/ABTest-iPhone-2/force");
    }

    #[tokio::test]
    async fn test_group_stays_on_builder_of_earlier_request() {
        let remote = MockRemote::new();
        let mut first = build_request(1, TEST_GROUP, 0);
        first.status = BuildRequestStatus::Completed;
        let mut poller = two_testers(remote.clone(), vec![first, build_request(2, TEST_GROUP, 1)]);
        remote.respond(
            SECOND_RECENT,
            json!({"-1": {"builderName": "ABTest-iPhone-2", "number": 8, "times": [1, 2],
                          "properties": [["build_request_id", "1", ""], ["slavename", "s2", ""]]}}),
        );

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].build_request_id, BuildRequestId::new(2));
        assert_eq!(report.scheduled[0].builder_name, "ABTest-iPhone-2");
        assert_eq!(report.scheduled[0].slave_name.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_build_requests_go_to_the_builder() {
        let remote = MockRemote::new();
        idle(&remote);
        let mut poller = poller(
            remote.clone(),
            None,
            vec![build_request(1, TEST_GROUP, -1), build_request(2, TEST_GROUP, 0)],
        );
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].builder_name, "ABTest-iPhone-Builder");
        assert_eq!(remote.posts()[0].0, "/builders/ABTest-iPhone-Builder/force");
    }

    #[tokio::test]
    async fn test_failing_builder_does_not_stop_the_cycle() {
        let remote = MockRemote::new();
        remote.respond(BUILDER_PENDING, json!([]));
        remote.respond(BUILDER_RECENT, json!({}));
        let mut poller = poller(
            remote.clone(),
            None,
            vec![build_request(1, TEST_GROUP, -1), build_request(2, TEST_GROUP + 1, 0)],
        );
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].builder_name, "ABTest-iPhone");
        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].build_request_id, BuildRequestId::new(1));
    }

    #[tokio::test]
    async fn test_configuration_error_is_fatal() {
        let remote = MockRemote::new();
        idle(&remote);
        let mut request = build_request(1, TEST_GROUP, 0);
        request.repository_group = "safari".to_string();
        let mut poller = poller(remote.clone(), None, vec![request]);

        assert!(matches!(
            poller.run_cycle().await,
            Err(SyncError::Config(_))
        ));
        assert!(poller.run().await.is_err());
    }

    #[test]
    fn test_cycle_report_serializes() {
        let report = CycleReport {
            status_updates: vec![StatusReport {
                build_request_id: BuildRequestId::new(7),
                builder_name: "b1".to_string(),
                update: StatusUpdate::Running,
                url: "http://build.webkit.org/builders/b1/builds/1".to_string(),
                started_at: DateTime::from_timestamp(1458704983, 0),
            }],
            ..Default::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["statusUpdates"][0]["buildRequestId"], json!(7));
        assert_eq!(value["statusUpdates"][0]["startedAt"], json!("2016-03-23T03:49:43Z"));
        assert_eq!(value["statusUpdates"][0]["update"], json!("running"));
        assert_eq!(value["scheduled"], json!([]));
    }
}
