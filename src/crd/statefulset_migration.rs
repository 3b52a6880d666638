//! StatefulSetMigration Custom Resource Definition.
//!
//! Declares a live migration of a StatefulSet and its EBS-backed volumes from
//! a source cluster to a destination cluster. The controller drives the
//! resource through a phased state machine; data is preserved by detaching
//! and re-attaching the underlying EBS volumes, never by copying bytes.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default timeout for waiting on EBS volume detachment.
pub const DEFAULT_VOLUME_DETACH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default timeout for waiting on destination pod readiness.
pub const DEFAULT_POD_READY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// StatefulSetMigration declares a cross-cluster StatefulSet migration.
///
/// Example:
/// ```yaml
/// apiVersion: migration.example.com/v1alpha1
/// kind: StatefulSetMigration
/// metadata:
///   name: web-to-east2
/// spec:
///   migrationId: web-2024-07
///   sourceCluster:
///     kubeConfigSecret: source-kubeconfig
///   sourceNamespace: prod
///   statefulSetName: web
///   destCluster:
///     kubeConfigSecret: dest-kubeconfig
///   destNamespace: prod
///   storageClassMapping:
///     gp2: gp3
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "migration.example.com",
    version = "v1alpha1",
    kind = "StatefulSetMigration",
    plural = "statefulsetmigrations",
    shortname = "ssm",
    status = "StatefulSetMigrationStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Progress", "type":"integer", "jsonPath":".status.currentIndex"}"#,
    printcolumn = r#"{"name":"Total", "type":"integer", "jsonPath":".status.totalReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetMigrationSpec {
    /// Opaque unique identifier for this migration.
    pub migration_id: String,

    /// Reference to the source cluster kubeconfig.
    pub source_cluster: ClusterRef,

    /// Namespace of the StatefulSet in the source cluster.
    pub source_namespace: String,

    /// Name of the StatefulSet to migrate.
    pub stateful_set_name: String,

    /// Reference to the destination cluster kubeconfig.
    pub dest_cluster: ClusterRef,

    /// Namespace to migrate into in the destination cluster.
    pub dest_namespace: String,

    /// Downgrade non-critical pre-flight failures (missing headless service)
    /// to warnings.
    #[serde(default)]
    pub force: bool,

    /// Maps source StorageClass names to destination StorageClass names.
    /// Unmapped classes keep their source name.
    #[serde(default)]
    pub storage_class_mapping: BTreeMap<String, String>,

    /// Maximum time to wait for an EBS volume to detach (default: 5m).
    /// Go-style duration string, e.g. "90s", "5m", "1h30m".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_detach_timeout: Option<String>,

    /// Maximum time to wait for a destination pod to become Ready (default: 10m).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ready_timeout: Option<String>,

    /// Name of the volume claim template to migrate (default: "data").
    /// Exactly one template is supported per StatefulSet.
    #[serde(default = "default_claim_template")]
    pub claim_template_name: String,
}

impl StatefulSetMigrationSpec {
    /// Parsed volume detach timeout, falling back to the default.
    pub fn volume_detach_timeout(&self) -> Duration {
        self.volume_detach_timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_VOLUME_DETACH_TIMEOUT)
    }

    /// Parsed pod ready timeout, falling back to the default.
    pub fn pod_ready_timeout(&self) -> Duration {
        self.pod_ready_timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_POD_READY_TIMEOUT)
    }
}

/// Reference to a kubeconfig stored in a Secret in the local cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    /// Name of the Secret containing the kubeconfig.
    pub kube_config_secret: String,

    /// Key within the Secret holding the kubeconfig payload (default: "kubeconfig").
    #[serde(default = "default_kubeconfig_key")]
    pub kube_config_key: String,
}

fn default_kubeconfig_key() -> String {
    "kubeconfig".to_string()
}

fn default_claim_template() -> String {
    "data".to_string()
}

/// Status of a StatefulSetMigration. Written only by the controller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetMigrationStatus {
    /// Current phase of the migration lifecycle.
    #[serde(default)]
    pub phase: MigrationPhase,

    /// Index of the pod currently being migrated. Equals `totalReplicas`
    /// once the migrate loop is exhausted. Non-decreasing.
    #[serde(default)]
    pub current_index: i32,

    /// Total number of replicas to migrate, captured at pre-flight.
    #[serde(default)]
    pub total_replicas: i32,

    /// UID of the source StatefulSet, captured at pre-flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_stateful_set_uid: Option<String>,

    /// Headless service name of the source StatefulSet, captured at pre-flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// JSON snapshot of the source StatefulSet spec, captured during Freeze
    /// before the orphan delete. The source object cannot be re-read once it
    /// has been handed to the garbage collector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_spec: Option<String>,

    /// Names of source PersistentVolumes whose reclaim policy has been
    /// confirmed as Retain.
    #[serde(default)]
    pub preserved_volumes: Vec<String>,

    /// Per-index record of completed migrations. Dense; `migrated[k].index == k`.
    #[serde(default)]
    pub migrated: Vec<MigratedPod>,

    /// Conditions describing the migration's progress.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Last error message when `phase` is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the migration started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// When the migration reached a terminal phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

/// Record of one successfully migrated pod index.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigratedPod {
    /// StatefulSet pod index.
    pub index: i32,
    /// Pod name, `<statefulSetName>-<index>`.
    pub pod_name: String,
    /// EBS volume ID now bound in the destination cluster.
    pub volume_id: String,
    /// When this index completed.
    pub migrated_at: String,
}

/// MigrationPhase represents the current lifecycle phase of a migration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MigrationPhase {
    /// Created but not started.
    #[default]
    Pending,
    /// Pre-flight validation against both clusters is in progress.
    PreFlight,
    /// Source cluster is being prepared: reclaim policies patched, StatefulSet orphaned.
    Freeze,
    /// Pods are being migrated one index at a time.
    Migrate,
    /// Source-side cleanup is in progress.
    Finalize,
    /// Migration completed successfully. Terminal.
    Completed,
    /// Migration failed and requires operator intervention. Terminal.
    Failed,
}

impl MigrationPhase {
    /// Whether this phase admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Completed | MigrationPhase::Failed)
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationPhase::Pending => write!(f, "Pending"),
            MigrationPhase::PreFlight => write!(f, "PreFlight"),
            MigrationPhase::Freeze => write!(f, "Freeze"),
            MigrationPhase::Migrate => write!(f, "Migrate"),
            MigrationPhase::Finalize => write!(f, "Finalize"),
            MigrationPhase::Completed => write!(f, "Completed"),
            MigrationPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describes one aspect of the migration at a point in time.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the last transition.
    pub reason: String,
    /// Human-readable message with transition details.
    pub message: String,
    /// Last time the condition transitioned.
    pub last_transition_time: String,
}

impl Condition {
    /// Create a new condition.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
        }
    }
}

/// Parse a Go-style duration string ("90s", "5m", "1h30m", "250ms").
///
/// Returns `None` on empty input, unknown units, or a missing unit suffix.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut rest = input.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let value: u64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];
        let (parsed, consumed) = if rest.starts_with("ms") {
            (Duration::from_millis(value), 2)
        } else if rest.starts_with('h') {
            (Duration::from_secs(value.checked_mul(3600)?), 1)
        } else if rest.starts_with('m') {
            (Duration::from_secs(value.checked_mul(60)?), 1)
        } else if rest.starts_with('s') {
            (Duration::from_secs(value), 1)
        } else {
            return None;
        };
        total += parsed;
        rest = &rest[consumed..];
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(MigrationPhase::Pending.to_string(), "Pending");
        assert_eq!(MigrationPhase::PreFlight.to_string(), "PreFlight");
        assert_eq!(MigrationPhase::Freeze.to_string(), "Freeze");
        assert_eq!(MigrationPhase::Migrate.to_string(), "Migrate");
        assert_eq!(MigrationPhase::Finalize.to_string(), "Finalize");
        assert_eq!(MigrationPhase::Completed.to_string(), "Completed");
        assert_eq!(MigrationPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(MigrationPhase::default(), MigrationPhase::Pending);
    }

    #[test]
    fn test_phase_terminal() {
        assert!(MigrationPhase::Completed.is_terminal());
        assert!(MigrationPhase::Failed.is_terminal());
        assert!(!MigrationPhase::Pending.is_terminal());
        assert!(!MigrationPhase::Migrate.is_terminal());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5"), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("five minutes"), None);
    }

    #[test]
    fn test_spec_timeout_defaults() {
        let spec = minimal_spec();
        assert_eq!(spec.volume_detach_timeout(), DEFAULT_VOLUME_DETACH_TIMEOUT);
        assert_eq!(spec.pod_ready_timeout(), DEFAULT_POD_READY_TIMEOUT);
    }

    #[test]
    fn test_spec_timeout_overrides() {
        let mut spec = minimal_spec();
        spec.volume_detach_timeout = Some("30s".to_string());
        spec.pod_ready_timeout = Some("2m".to_string());
        assert_eq!(spec.volume_detach_timeout(), Duration::from_secs(30));
        assert_eq!(spec.pod_ready_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_spec_deserialization_defaults() {
        let json = r#"{
            "migrationId": "web-1",
            "sourceCluster": {"kubeConfigSecret": "src-kc"},
            "sourceNamespace": "prod",
            "statefulSetName": "web",
            "destCluster": {"kubeConfigSecret": "dst-kc", "kubeConfigKey": "config"},
            "destNamespace": "prod"
        }"#;
        let spec: StatefulSetMigrationSpec =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert_eq!(spec.source_cluster.kube_config_key, "kubeconfig");
        assert_eq!(spec.dest_cluster.kube_config_key, "config");
        assert_eq!(spec.claim_template_name, "data");
        assert!(!spec.force);
        assert!(spec.storage_class_mapping.is_empty());
    }

    #[test]
    fn test_status_roundtrip() {
        let status = StatefulSetMigrationStatus {
            phase: MigrationPhase::Migrate,
            current_index: 1,
            total_replicas: 3,
            source_stateful_set_uid: Some("uid-1".to_string()),
            preserved_volumes: vec!["pv-a".to_string(), "pv-b".to_string()],
            migrated: vec![MigratedPod {
                index: 0,
                pod_name: "web-0".to_string(),
                volume_id: "vol-a".to_string(),
                migrated_at: "2024-07-01T00:00:00Z".to_string(),
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&status).expect("serialization should succeed");
        let parsed: StatefulSetMigrationStatus =
            serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(parsed.phase, MigrationPhase::Migrate);
        assert_eq!(parsed.current_index, 1);
        assert_eq!(parsed.migrated.len(), 1);
        assert_eq!(parsed.migrated[0].pod_name, "web-0");
    }

    #[test]
    fn test_condition_new() {
        let c = Condition::new("PreFlight", true, "Passed", "All checks passed");
        assert_eq!(c.r#type, "PreFlight");
        assert_eq!(c.status, "True");
        assert_eq!(c.reason, "Passed");
        let c = Condition::new("Failed", false, "Conflict", "StatefulSet exists");
        assert_eq!(c.status, "False");
    }

    fn minimal_spec() -> StatefulSetMigrationSpec {
        StatefulSetMigrationSpec {
            migration_id: "m-1".to_string(),
            source_cluster: ClusterRef {
                kube_config_secret: "src".to_string(),
                kube_config_key: "kubeconfig".to_string(),
            },
            source_namespace: "prod".to_string(),
            stateful_set_name: "web".to_string(),
            dest_cluster: ClusterRef {
                kube_config_secret: "dst".to_string(),
                kube_config_key: "kubeconfig".to_string(),
            },
            dest_namespace: "prod".to_string(),
            force: false,
            storage_class_mapping: BTreeMap::new(),
            volume_detach_timeout: None,
            pod_ready_timeout: None,
            claim_template_name: "data".to_string(),
        }
    }
}
