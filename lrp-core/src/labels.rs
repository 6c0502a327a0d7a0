//! Well-known labels and annotations
//!
//! These keys are the persisted contract other platform tooling reads, so
//! they never change between releases. Identity lives in labels so objects can
//! be found with a selector; the rest of the descriptor lives in annotations.
use crate::descriptor::LrpIdentifier;

pub const LABEL_GUID: &str = "cloudfoundry.org/guid";
pub const LABEL_VERSION: &str = "cloudfoundry.org/version";
pub const LABEL_SOURCE_TYPE: &str = "cloudfoundry.org/source_type";
pub const LABEL_APP_GUID: &str = "cloudfoundry.org/app_guid";
pub const LABEL_PROCESS_TYPE: &str = "cloudfoundry.org/process_type";
pub const LABEL_ORG_GUID: &str = "cloudfoundry.org/org_guid";
pub const LABEL_SPACE_GUID: &str = "cloudfoundry.org/space_guid";
pub const LABEL_TASK_NAME: &str = "cloudfoundry.org/task_name";

/// Source type of objects representing LRPs
pub const SOURCE_TYPE_APP: &str = "APP";
/// Source type of objects representing tasks
pub const SOURCE_TYPE_TASK: &str = "TASK";

pub const ANNOTATION_APP_NAME: &str = "cloudfoundry.org/application_name";
pub const ANNOTATION_APP_ID: &str = "cloudfoundry.org/application_id";
pub const ANNOTATION_VERSION: &str = "cloudfoundry.org/version";
pub const ANNOTATION_ORG_NAME: &str = "cloudfoundry.org/org_name";
pub const ANNOTATION_ORG_GUID: &str = "cloudfoundry.org/org_guid";
pub const ANNOTATION_SPACE_NAME: &str = "cloudfoundry.org/space_name";
pub const ANNOTATION_SPACE_GUID: &str = "cloudfoundry.org/space_guid";
pub const ANNOTATION_ROUTES: &str = "cloudfoundry.org/routes";
pub const ANNOTATION_ORIGINAL_REQUEST: &str = "cloudfoundry.org/original_request";
pub const ANNOTATION_LAST_UPDATED: &str = "cloudfoundry.org/last_updated";
pub const ANNOTATION_PROCESS_GUID: &str = "cloudfoundry.org/process_guid";
pub const ANNOTATION_COMPLETION_CALLBACK: &str = "cloudfoundry.org/completion_callback";
/// Sequence id of the newest migration applied to the object; absent means 0
pub const ANNOTATION_LATEST_MIGRATION: &str = "cloudfoundry.org/latest_migration";

/// Pod annotation selecting the container runtime's default seccomp profile
pub const ANNOTATION_SECCOMP: &str = "seccomp.security.alpha.kubernetes.io/pod";
pub const SECCOMP_RUNTIME_DEFAULT: &str = "runtime/default";

/// Label selector matching the object managing `id`
pub fn lrp_selector(id: &LrpIdentifier) -> String {
    format!(
        "{LABEL_GUID}={},{LABEL_VERSION}={},{LABEL_SOURCE_TYPE}={SOURCE_TYPE_APP}",
        id.guid, id.version
    )
}

/// Label selector matching the job running the task `guid`
pub fn task_selector(guid: &str) -> String {
    format!("{LABEL_GUID}={guid},{LABEL_SOURCE_TYPE}={SOURCE_TYPE_TASK}")
}

/// Label selector matching every object of a source type
pub fn source_type_selector(source_type: &str) -> String {
    format!("{LABEL_SOURCE_TYPE}={source_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrp_selector_pins_identity_and_source_type() {
        let id = LrpIdentifier::new("g1", "v1");
        assert_eq!(
            lrp_selector(&id),
            "cloudfoundry.org/guid=g1,cloudfoundry.org/version=v1,cloudfoundry.org/source_type=APP"
        );
    }

    #[test]
    fn task_selector_ignores_version() {
        assert_eq!(
            task_selector("t1"),
            "cloudfoundry.org/guid=t1,cloudfoundry.org/source_type=TASK"
        );
    }
}
