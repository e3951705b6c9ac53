//! Build properties sent to the remote service.

use crate::syncer::BuilderSynchronizer;
use crate::{SyncError, SyncResult};
use buildsync_config::{PropertyCondition, PropertyTemplateOption};
use buildsync_core::BuildRequest;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

impl BuilderSynchronizer {
    /// Properties of the force-build form for `request`.
    ///
    /// The matching configuration's static properties come first, then the
    /// repository group's template for the request's kind, then the build
    /// request id. The slave property is added by the caller when a slave is
    /// chosen.
    pub fn properties_for_build_request(
        &self,
        request: &BuildRequest,
        requests_in_group: &[Arc<BuildRequest>],
    ) -> SyncResult<BTreeMap<String, String>> {
        let configuration = self
            .configurations()
            .iter()
            .find(|config| config.matches(request))
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "build request {} has no matching configuration in \"{}\"",
                    request.id,
                    self.builder_name()
                ))
            })?;

        let group = self
            .repository_groups()
            .get(&request.repository_group)
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "build request {} uses an unsupported repository group \"{}\"",
                    request.id, request.repository_group
                ))
            })?;
        if !group.accepts(&request.commit_set) {
            return Err(SyncError::Config(format!(
                "commit set {} of build request {} is not compatible with repository group \"{}\"",
                request.commit_set.id, request.id, group.name
            )));
        }

        let template = group.template_for(request.is_build()).ok_or_else(|| {
            SyncError::Config(format!(
                "build request {} is a build but repository group \"{}\" has no build properties",
                request.id, group.name
            ))
        })?;

        let mut properties = configuration.properties.clone();
        for (name, option) in template {
            if let Some(value) = resolve_option(option, request, requests_in_group)? {
                properties.insert(name.clone(), value);
            }
        }
        properties.insert(
            self.build_request_property_name().to_string(),
            request.id.to_string(),
        );
        Ok(properties)
    }
}

fn resolve_option(
    option: &PropertyTemplateOption,
    request: &BuildRequest,
    requests_in_group: &[Arc<BuildRequest>],
) -> SyncResult<Option<String>> {
    let commit_set = &request.commit_set;
    let value = match option {
        PropertyTemplateOption::Literal(value) => Some(value.clone()),
        PropertyTemplateOption::Revision(repository) => {
            let revision = commit_set
                .revision_for_repository(repository.id)
                .ok_or_else(|| {
                    SyncError::Config(format!(
                        "commit set {} has no revision for \"{}\"",
                        commit_set.id, repository.name
                    ))
                })?;
            Some(revision.to_string())
        }
        PropertyTemplateOption::Patch(repository) => commit_set
            .patch_for_repository(repository.id)
            .map(|patch| patch.url.clone()),
        PropertyTemplateOption::Roots => {
            let roots = commit_set.all_root_files();
            if roots.is_empty() {
                None
            } else {
                let roots: Vec<_> = roots.iter().map(|file| json!({"url": file.url})).collect();
                Some(serde_json::Value::Array(roots).to_string())
            }
        }
        PropertyTemplateOption::Conditional { condition, value } => {
            let holds = match condition {
                PropertyCondition::Built => requests_in_group
                    .iter()
                    .any(|other| other.is_build() && other.commit_set.id == commit_set.id),
            };
            holds.then(|| value.clone())
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRemote, TEST_GROUP, build_request, builder, tester, webkit_patch};
    use buildsync_core::{CommitSetId, PlatformId, UploadedFile, UploadedFileId};

    #[test]
    fn test_test_properties() {
        let syncer = tester(MockRemote::new(), None);
        let request = build_request(16733, TEST_GROUP, 0);
        let properties = syncer
            .properties_for_build_request(&request, &[Arc::new(request.clone())])
            .unwrap();

        let expected: BTreeMap<String, String> = [
            ("forcescheduler", "ABTest-iPhone-RunBenchmark-Tests"),
            ("test_name", "speedometer"),
            ("desired_image", "13A452"),
            ("opensource", "197463"),
            ("build_request_id", "16733"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(properties, expected);
    }

    #[test]
    fn test_roots_and_built_condition() {
        let syncer = tester(MockRemote::new(), None);
        let build = build_request(700, TEST_GROUP, -1);
        let mut request = build_request(701, TEST_GROUP, 0);
        request.commit_set.root_files = vec![
            UploadedFile {
                id: UploadedFileId::new(1),
                url: "/api/uploaded-file/1.dat".to_string(),
            },
            UploadedFile {
                id: UploadedFileId::new(2),
                url: "/api/uploaded-file/2.dat".to_string(),
            },
        ];

        let alone = syncer
            .properties_for_build_request(&request, &[Arc::new(request.clone())])
            .unwrap();
        assert!(!alone.contains_key("checkbox"));
        assert_eq!(
            alone["roots"],
            r#"[{"url":"/api/uploaded-file/1.dat"},{"url":"/api/uploaded-file/2.dat"}]"#
        );

        let group = vec![Arc::new(build), Arc::new(request.clone())];
        let with_build = syncer.properties_for_build_request(&request, &group).unwrap();
        assert_eq!(with_build["checkbox"], "build-webkit");

        // A build of another commit set does not count.
        let mut other = build_request(702, TEST_GROUP, -1);
        other.commit_set.id = CommitSetId::new(999);
        let group = vec![Arc::new(other), Arc::new(request.clone())];
        let properties = syncer.properties_for_build_request(&request, &group).unwrap();
        assert!(!properties.contains_key("checkbox"));
    }

    #[test]
    fn test_build_properties() {
        let syncer = builder(MockRemote::new());
        let mut request = build_request(800, TEST_GROUP, -1);
        request.commit_set.items[1].patch = Some(webkit_patch());

        let properties = syncer
            .properties_for_build_request(&request, &[Arc::new(request.clone())])
            .unwrap();
        assert_eq!(properties["forcescheduler"], "ABTest-iPhone-Build");
        assert_eq!(properties["wk"], "197463");
        assert_eq!(properties["wk-patch"], "/api/uploaded-file/10.patch");
        assert_eq!(properties["os"], "13A452");
        assert_eq!(properties["build_request_id"], "800");
        assert!(!properties.contains_key("desired_image"));

        // Without a patch the property is omitted.
        request.commit_set.items[1].patch = None;
        let properties = syncer
            .properties_for_build_request(&request, &[Arc::new(request.clone())])
            .unwrap();
        assert!(!properties.contains_key("wk-patch"));
    }

    #[test]
    fn test_configuration_errors() {
        let syncer = tester(MockRemote::new(), None);
        let base = build_request(1, TEST_GROUP, 0);
        let check = |request: BuildRequest| {
            let result = syncer.properties_for_build_request(&request, &[Arc::new(request.clone())]);
            assert!(matches!(result, Err(SyncError::Config(_))), "{result:?}");
        };

        let mut request = base.clone();
        request.platform = PlatformId::new(999);
        check(request);

        let mut request = base.clone();
        request.repository_group = "safari".to_string();
        check(request);

        let mut request = base.clone();
        request.commit_set.items.pop();
        check(request);

        // Patches are only accepted on WebKit.
        let mut request = base.clone();
        request.commit_set.items[0].patch = Some(webkit_patch());
        check(request);
    }

    #[test]
    fn test_build_without_build_template_fails() {
        let syncer = builder(MockRemote::new());
        let mut request = build_request(1, TEST_GROUP, -1);
        request.repository_group = "ios-only".to_string();
        request.commit_set.items.truncate(1);
        let result = syncer.properties_for_build_request(&request, &[Arc::new(request.clone())]);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
