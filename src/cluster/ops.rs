//! Typed operations against a remote cluster.
//!
//! Thin driver used by the migration phases: reclaim-policy patching, orphan
//! deletion, pod polling, and destination StatefulSet materialization. All
//! operations take the remote [`Client`] explicitly; nothing here touches the
//! local cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::controller::error::Error;

/// Annotation recording where a materialized StatefulSet came from.
pub const MIGRATED_FROM_ANNOTATION: &str = "migration.example.com/migrated-from";

/// Hard deadline for a deleted pod to disappear.
pub const POD_ABSENT_DEADLINE: Duration = Duration::from_secs(2 * 60);

const POD_ABSENT_POLL: Duration = Duration::from_secs(2);
const POD_READY_POLL: Duration = Duration::from_secs(5);

/// Set the reclaim policy of every PV bound to one of the StatefulSet's
/// claims to Retain, returning the PV names ordered by pod index.
///
/// Claims are matched by the `<template>-<stsName>-<index>` convention;
/// unbound claims are skipped. Idempotent: PVs already on Retain are
/// recorded but not patched again.
pub async fn patch_reclaim_to_retain(
    client: &Client,
    namespace: &str,
    claim_template: &str,
    sts_name: &str,
) -> Result<Vec<String>, Error> {
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let pvs: Api<PersistentVolume> = Api::all(client.clone());

    let mut preserved: Vec<(i32, String)> = Vec::new();
    for pvc in pvcs.list(&ListParams::default()).await?.items {
        let claim_name = pvc.name_any();
        let Some(index) = claim_index(&claim_name, claim_template, sts_name) else {
            continue;
        };
        let Some(volume_name) = pvc.spec.as_ref().and_then(|s| s.volume_name.clone()) else {
            continue;
        };
        if volume_name.is_empty() {
            continue;
        }

        let pv = match pvs.get(&volume_name).await {
            Ok(pv) => pv,
            Err(kube::Error::Api(e)) if e.code == 404 => continue,
            Err(e) => return Err(Error::Kube(e)),
        };

        let policy = pv
            .spec
            .as_ref()
            .and_then(|s| s.persistent_volume_reclaim_policy.as_deref());
        if policy != Some("Retain") {
            let patch = serde_json::json!({
                "spec": {"persistentVolumeReclaimPolicy": "Retain"}
            });
            pvs.patch(&volume_name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            info!(pv = %volume_name, claim = %claim_name, "Patched PV reclaim policy to Retain");
        }

        preserved.push((index, volume_name));
    }

    preserved.sort_by_key(|(index, _)| *index);
    Ok(preserved.into_iter().map(|(_, name)| name).collect())
}

/// Parse the pod index out of a claim name following the
/// `<template>-<stsName>-<index>` convention. Returns `None` for claims that
/// do not belong to the StatefulSet.
pub fn claim_index(claim_name: &str, claim_template: &str, sts_name: &str) -> Option<i32> {
    let prefix = format!("{}-{}-", claim_template, sts_name);
    claim_name.strip_prefix(&prefix)?.parse().ok()
}

/// Delete the StatefulSet leaving pods and claims in place.
/// An already-absent StatefulSet counts as success.
pub async fn orphan_statefulset(client: &Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Orphan),
        ..Default::default()
    };
    match api.delete(name, &params).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Delete a pod, tolerating one that is already gone.
pub async fn delete_pod(client: &Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Poll until the pod is gone, with a 2 minute hard deadline.
pub async fn wait_pod_absent(client: &Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let deadline = tokio::time::Instant::now() + POD_ABSENT_DEADLINE;

    loop {
        if api.get_opt(name).await?.is_none() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "pod {}/{} still present after {:?}",
                namespace, name, POD_ABSENT_DEADLINE
            )));
        }
        tokio::time::sleep(POD_ABSENT_POLL).await;
    }
}

/// Poll until the pod reports a `Ready=True` condition.
///
/// Read failures are treated as "not ready yet": during scale-up the pod may
/// not exist for a while.
pub async fn wait_pod_ready(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match api.get_opt(name).await {
            Ok(Some(pod)) if is_pod_ready(&pod) => return Ok(()),
            Ok(_) => {}
            Err(e) => debug!(pod = %name, error = %e, "Pod read failed, still waiting"),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "timeout waiting for pod {}/{} to be ready (waited {:?})",
                namespace, name, timeout
            )));
        }
        tokio::time::sleep(POD_READY_POLL).await;
    }
}

/// Whether a pod reports the `Ready=True` condition.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Build the destination StatefulSet from a snapshotted source spec.
///
/// The spec is carried over whole except: replicas start at 1 (index 0 must
/// be Ready before index 1 may exist), the pod template namespace is
/// rewritten, and metadata is fresh apart from a provenance annotation.
pub fn build_destination_statefulset(
    mut spec: StatefulSetSpec,
    name: &str,
    source_namespace: &str,
    dest_namespace: &str,
) -> StatefulSet {
    spec.replicas = Some(1);
    if let Some(meta) = spec.template.metadata.as_mut() {
        meta.namespace = Some(dest_namespace.to_string());
    }

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(dest_namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                MIGRATED_FROM_ANNOTATION.to_string(),
                format!("{}/{}", source_namespace, name),
            )])),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

/// Create the destination StatefulSet; an existing one counts as success so
/// a replayed reconcile converges.
pub async fn create_destination_statefulset(
    client: &Client,
    sts: &StatefulSet,
) -> Result<(), Error> {
    let namespace = sts.namespace().unwrap_or_default();
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    match api.create(&PostParams::default(), sts).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Scale a StatefulSet via merge patch on `spec.replicas`.
pub async fn scale_statefulset(
    client: &Client,
    namespace: &str,
    name: &str,
    replicas: i32,
) -> Result<(), Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({"spec": {"replicas": replicas}});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Best-effort delete of a source claim. Failures are logged and swallowed:
/// Retain on the PV means nothing is lost if the object lingers.
pub async fn gc_source_claim(client: &Client, namespace: &str, name: &str) {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => debug!(pvc = %name, "Deleted source PVC"),
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => warn!(pvc = %name, error = %e, "Failed to delete source PVC"),
    }
}

/// Best-effort delete of a source PV object. The physical volume survives
/// because the reclaim policy is Retain.
pub async fn gc_source_volume(client: &Client, name: &str) {
    let api: Api<PersistentVolume> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => debug!(pv = %name, "Deleted source PV"),
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => warn!(pv = %name, error = %e, "Failed to delete source PV"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus, PodTemplateSpec};

    #[test]
    fn test_claim_index() {
        assert_eq!(claim_index("data-web-0", "data", "web"), Some(0));
        assert_eq!(claim_index("data-web-12", "data", "web"), Some(12));
        assert_eq!(claim_index("data-web-abc", "data", "web"), None);
        assert_eq!(claim_index("data-other-0", "data", "web"), None);
        assert_eq!(claim_index("logs-web-0", "data", "web"), None);
        assert_eq!(claim_index("unrelated", "data", "web"), None);
    }

    #[test]
    fn test_is_pod_ready() {
        let ready = Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(is_pod_ready(&ready));

        let not_ready = Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!is_pod_ready(&not_ready));
        assert!(!is_pod_ready(&Pod::default()));
    }

    #[test]
    fn test_build_destination_statefulset() {
        let snapshot = StatefulSetSpec {
            replicas: Some(3),
            service_name: Some("web".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    namespace: Some("prod-src".to_string()),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        };

        let sts = build_destination_statefulset(snapshot, "web", "prod-src", "prod-dst");

        assert_eq!(sts.metadata.name.as_deref(), Some("web"));
        assert_eq!(sts.metadata.namespace.as_deref(), Some("prod-dst"));
        assert_eq!(
            sts.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(MIGRATED_FROM_ANNOTATION))
                .map(String::as_str),
            Some("prod-src/web")
        );

        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.service_name.as_deref(), Some("web"));
        assert_eq!(
            spec.template
                .metadata
                .as_ref()
                .and_then(|m| m.namespace.as_deref()),
            Some("prod-dst")
        );
    }
}
