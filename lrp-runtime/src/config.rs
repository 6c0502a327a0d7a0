//! Runtime configuration
use lrp_core::convert::Settings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::ConflictBackoff;

/// Configuration of the workload engine
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Cluster-wide pull secret referenced by every pod
    pub registry_secret_name: String,
    /// Service account application pods run as
    pub application_service_account: String,
    pub allow_automount_service_account_token: bool,
    pub allow_run_image_as_root: bool,
    /// `minAvailable` of LRP disruption budgets, a count or a percentage
    pub default_min_available: String,
    /// Seconds before a store call is abandoned
    pub store_timeout: u64,
    pub conflict_retry: ConflictBackoff,
    pub events: EventReasons,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_secret_name: "default-image-pull-secret".to_owned(),
            application_service_account: "default".to_owned(),
            allow_automount_service_account_token: false,
            allow_run_image_as_root: false,
            default_min_available: "50%".to_owned(),
            store_timeout: 60,
            conflict_retry: ConflictBackoff::default(),
            events: EventReasons::default(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }

    /// Converter settings stamping `latest_migration` on rendered objects
    pub fn converter_settings(&self, latest_migration: u32) -> Settings {
        Settings {
            registry_secret_name: self.registry_secret_name.clone(),
            application_service_account: self.application_service_account.clone(),
            allow_automount_service_account_token: self.allow_automount_service_account_token,
            allow_run_image_as_root: self.allow_run_image_as_root,
            latest_migration,
        }
    }
}

/// Event reasons and messages instance classification looks for
///
/// These are emitted by the kubelet, scheduler and cluster autoscaler, and
/// are matched exactly (reasons) or as substrings (messages).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventReasons {
    /// Latest event of a pod being shut down
    pub killing: String,
    pub failed_scheduling: String,
    pub failed_scale_up: String,
    /// Message fragment of a scheduling failure caused by lack of memory
    pub insufficient_memory: String,
}

impl Default for EventReasons {
    fn default() -> Self {
        Self {
            killing: "Killing".to_owned(),
            failed_scheduling: "FailedScheduling".to_owned(),
            failed_scale_up: "NotTriggerScaleUp".to_owned(),
            insufficient_memory: "Insufficient memory".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(Config::from_yaml("{}").unwrap(), Config::default());
    }

    #[test]
    fn reads_camel_case_yaml() {
        let config = Config::from_yaml(
            r#"
registrySecretName: registry-creds
applicationServiceAccount: apps
allowRunImageAsRoot: true
defaultMinAvailable: "1"
storeTimeout: 30
conflictRetry:
  type: exponential
  minDelayMs: 5
  maxDelayMs: 200
  maxTimes: 3
events:
  insufficientMemory: "Insufficient memory"
"#,
        )
        .unwrap();
        assert_eq!(config.registry_secret_name, "registry-creds");
        assert!(config.allow_run_image_as_root);
        assert_eq!(config.default_min_available, "1");
        assert_eq!(config.store_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.conflict_retry,
            ConflictBackoff::Exponential {
                min_delay_ms: 5,
                max_delay_ms: 200,
                max_times: 3
            }
        );
        assert_eq!(config.events.killing, "Killing");
    }

    #[test]
    fn converter_settings_carry_the_migration_marker() {
        let settings = Config::default().converter_settings(7);
        assert_eq!(settings.latest_migration, 7);
        assert_eq!(settings.registry_secret_name, "default-image-pull-secret");
    }
}
