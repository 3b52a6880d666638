//! PV/PVC translation for cross-cluster volume migration.
//!
//! Builds a destination PersistentVolume and a pre-bound
//! PersistentVolumeClaim that reference the same physical EBS volume as the
//! source pair. The destination PV name is deterministic so re-running the
//! translation after a partial failure converges on the same objects, and
//! the reclaim policy is forced to Retain so deleting the destination
//! objects can never destroy the volume.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    AWSElasticBlockStoreVolumeSource, CSIPersistentVolumeSource, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeSpec, VolumeNodeAffinity, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use thiserror::Error;

/// The only CSI driver whose volume handles are EBS volume IDs.
pub const EBS_CSI_DRIVER: &str = "ebs.csi.aws.com";

/// Standard topology zone label.
pub const TOPOLOGY_ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Pre-1.17 topology zone label, still present on older volumes.
pub const LEGACY_ZONE_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";

const MIGRATED_LABEL: &str = "migration.example.com/migrated";
const SOURCE_PV_LABEL: &str = "migration.example.com/source-pv";
const SOURCE_PVC_LABEL: &str = "migration.example.com/source-pvc";
const DEST_NAMESPACE_LABEL: &str = "migration.example.com/dest-namespace";
const DEST_PVC_LABEL: &str = "migration.example.com/dest-pvc";
const SOURCE_PV_UID_ANNOTATION: &str = "migration.example.com/source-pv-uid";
const SOURCE_PVC_UID_ANNOTATION: &str = "migration.example.com/source-pvc-uid";
const VOLUME_ID_ANNOTATION: &str = "migration.example.com/volume-id";

/// Errors from translation and validation.
#[derive(Error, Debug)]
pub enum TranslateError {
    /// The source PV uses a CSI driver other than the EBS driver.
    #[error("unsupported CSI driver: {driver} (expected ebs.csi.aws.com)")]
    UnsupportedDriver { driver: String },

    /// The source PV carries neither a CSI nor a legacy EBS volume source.
    #[error("PV {pv} does not have an EBS volume source (neither CSI nor AWSElasticBlockStore)")]
    NotBlockVolume { pv: String },

    /// The source object has no spec.
    #[error("{what} has no spec")]
    MissingSpec { what: String },

    /// The source PV is not bound to a claim.
    #[error("PV {pv} is not bound (phase: {phase})")]
    NotBound { pv: String, phase: String },
}

/// Configuration for a single PV/PVC translation.
#[derive(Clone, Debug, Default)]
pub struct TranslationConfig {
    /// Target namespace in the destination cluster.
    pub dest_namespace: String,

    /// Name of the claim in the destination cluster. For StatefulSets this
    /// follows `<claimTemplate>-<stsName>-<index>`.
    pub dest_pvc_name: String,

    /// Maps source StorageClass names to destination names; identity for
    /// unmapped classes.
    pub storage_class_mapping: BTreeMap<String, String>,

    /// Copy node affinity from the source PV. Zone-constrained volumes like
    /// EBS must land on nodes in the volume's zone.
    pub preserve_node_affinity: bool,
}

/// Translated objects for the destination cluster.
#[derive(Clone, Debug)]
pub struct TranslationResult {
    /// PersistentVolume to create in the destination cluster.
    pub pv: PersistentVolume,

    /// Pre-bound PersistentVolumeClaim to create in the destination cluster.
    pub pvc: PersistentVolumeClaim,

    /// EBS volume ID shared by source and destination.
    pub volume_id: String,

    /// Availability zone extracted from the source PV; may be empty.
    pub availability_zone: String,
}

/// Translate a source PV/PVC pair into the destination pair.
///
/// Pure function of its inputs: repeated calls produce structurally equal
/// output.
pub fn translate_pv(
    source_pv: &PersistentVolume,
    source_pvc: &PersistentVolumeClaim,
    config: &TranslationConfig,
) -> Result<TranslationResult, TranslateError> {
    let pv_spec = source_pv.spec.as_ref().ok_or(TranslateError::MissingSpec {
        what: "source PV".to_string(),
    })?;
    let pvc_spec = source_pvc.spec.as_ref().ok_or(TranslateError::MissingSpec {
        what: "source PVC".to_string(),
    })?;

    let volume_id = extract_volume_id(source_pv)?;
    let availability_zone = extract_availability_zone(source_pv);
    let dest_storage_class = dest_storage_class(
        pv_spec.storage_class_name.as_deref(),
        &config.storage_class_mapping,
    );

    // Deterministic name: re-running the migrate step after a crash recreates
    // the exact same object, so AlreadyExists can be treated as success.
    let dest_pv_name = format!("migrated-{}-{}", config.dest_namespace, config.dest_pvc_name);

    let capacity = pv_spec.capacity.as_ref().and_then(|c| {
        c.get("storage")
            .map(|q| BTreeMap::from([("storage".to_string(), q.clone())]))
    });

    let node_affinity = if config.preserve_node_affinity && pv_spec.node_affinity.is_some() {
        pv_spec.node_affinity.clone()
    } else if !availability_zone.is_empty() {
        Some(node_affinity_for_zone(&availability_zone))
    } else {
        None
    };

    let pv = PersistentVolume {
        metadata: ObjectMeta {
            name: Some(dest_pv_name.clone()),
            labels: Some(BTreeMap::from([
                (MIGRATED_LABEL.to_string(), "true".to_string()),
                (
                    SOURCE_PV_LABEL.to_string(),
                    source_pv.metadata.name.clone().unwrap_or_default(),
                ),
                (
                    DEST_NAMESPACE_LABEL.to_string(),
                    config.dest_namespace.clone(),
                ),
                (DEST_PVC_LABEL.to_string(), config.dest_pvc_name.clone()),
            ])),
            annotations: Some(BTreeMap::from([
                (
                    SOURCE_PV_UID_ANNOTATION.to_string(),
                    source_pv.metadata.uid.clone().unwrap_or_default(),
                ),
                (VOLUME_ID_ANNOTATION.to_string(), volume_id.clone()),
            ])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity,
            access_modes: pv_spec.access_modes.clone(),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            storage_class_name: if dest_storage_class.is_empty() {
                None
            } else {
                Some(dest_storage_class.clone())
            },
            claim_ref: Some(ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(config.dest_namespace.clone()),
                name: Some(config.dest_pvc_name.clone()),
                ..Default::default()
            }),
            csi: build_csi_source(pv_spec, &volume_id),
            aws_elastic_block_store: build_legacy_source(pv_spec, &volume_id),
            volume_mode: pv_spec.volume_mode.clone(),
            node_affinity,
            ..Default::default()
        }),
        status: None,
    };

    let storage_request = pvc_spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|req| req.get("storage"))
        .map(|q| BTreeMap::from([("storage".to_string(), q.clone())]));

    let pvc = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(config.dest_pvc_name.clone()),
            namespace: Some(config.dest_namespace.clone()),
            labels: Some(BTreeMap::from([
                (MIGRATED_LABEL.to_string(), "true".to_string()),
                (
                    SOURCE_PVC_LABEL.to_string(),
                    source_pvc.metadata.name.clone().unwrap_or_default(),
                ),
            ])),
            annotations: Some(BTreeMap::from([
                (
                    SOURCE_PVC_UID_ANNOTATION.to_string(),
                    source_pvc.metadata.uid.clone().unwrap_or_default(),
                ),
                (VOLUME_ID_ANNOTATION.to_string(), volume_id.clone()),
            ])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: pvc_spec.access_modes.clone(),
            resources: storage_request.map(|requests| VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            // Pre-bind both directions so the destination scheduler can
            // neither provision a fresh volume nor bind an unrelated one.
            volume_name: Some(dest_pv_name),
            storage_class_name: if dest_storage_class.is_empty() {
                None
            } else {
                Some(dest_storage_class)
            },
            volume_mode: pvc_spec.volume_mode.clone(),
            ..Default::default()
        }),
        status: None,
    };

    Ok(TranslationResult {
        pv,
        pvc,
        volume_id,
        availability_zone,
    })
}

/// Extract the EBS volume ID from a PV.
///
/// Modern CSI volumes carry the ID as the volume handle and must use the EBS
/// driver. Legacy `awsElasticBlockStore` volumes may carry a path format
/// (`aws://us-east-1a/vol-xxx`); only the final segment is the ID.
pub fn extract_volume_id(pv: &PersistentVolume) -> Result<String, TranslateError> {
    let name = pv.metadata.name.clone().unwrap_or_default();
    let spec = pv
        .spec
        .as_ref()
        .ok_or(TranslateError::NotBlockVolume { pv: name.clone() })?;

    if let Some(csi) = &spec.csi {
        if csi.driver != EBS_CSI_DRIVER {
            return Err(TranslateError::UnsupportedDriver {
                driver: csi.driver.clone(),
            });
        }
        return Ok(csi.volume_handle.clone());
    }

    if let Some(ebs) = &spec.aws_elastic_block_store {
        return Ok(crate::ebs::volume_id_from_handle(&ebs.volume_id).to_string());
    }

    Err(TranslateError::NotBlockVolume { pv: name })
}

/// Extract the availability zone from a PV's required node affinity terms,
/// falling back to the zone segment of a legacy `aws://<zone>/<id>` handle.
/// Returns an empty string when neither is present.
pub fn extract_availability_zone(pv: &PersistentVolume) -> String {
    let terms = pv
        .spec
        .as_ref()
        .and_then(|s| s.node_affinity.as_ref())
        .and_then(|a| a.required.as_ref())
        .map(|r| r.node_selector_terms.as_slice())
        .unwrap_or_default();

    for term in terms {
        for expr in term.match_expressions.as_deref().unwrap_or_default() {
            if expr.key == TOPOLOGY_ZONE_LABEL || expr.key == LEGACY_ZONE_LABEL {
                if let Some(zone) = expr.values.as_ref().and_then(|v| v.first()) {
                    return zone.clone();
                }
            }
        }
    }

    if let Some(ebs) = pv.spec.as_ref().and_then(|s| s.aws_elastic_block_store.as_ref()) {
        if let Some(rest) = ebs.volume_id.strip_prefix("aws://") {
            if let Some((zone, _)) = rest.split_once('/') {
                return zone.to_string();
            }
        }
    }

    String::new()
}

/// Node affinity constraining a volume to a single availability zone.
fn node_affinity_for_zone(zone: &str) -> VolumeNodeAffinity {
    VolumeNodeAffinity {
        required: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: TOPOLOGY_ZONE_LABEL.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![zone.to_string()]),
                }]),
                ..Default::default()
            }],
        }),
    }
}

fn build_csi_source(
    source: &PersistentVolumeSpec,
    volume_id: &str,
) -> Option<CSIPersistentVolumeSource> {
    source.csi.as_ref().map(|csi| CSIPersistentVolumeSource {
        driver: csi.driver.clone(),
        volume_handle: volume_id.to_string(),
        fs_type: csi.fs_type.clone(),
        read_only: csi.read_only,
        volume_attributes: csi.volume_attributes.clone(),
        ..Default::default()
    })
}

fn build_legacy_source(
    source: &PersistentVolumeSpec,
    volume_id: &str,
) -> Option<AWSElasticBlockStoreVolumeSource> {
    // CSI wins when both are somehow present
    if source.csi.is_some() {
        return None;
    }
    source
        .aws_elastic_block_store
        .as_ref()
        .map(|ebs| AWSElasticBlockStoreVolumeSource {
            volume_id: volume_id.to_string(),
            fs_type: ebs.fs_type.clone(),
            partition: ebs.partition,
            read_only: ebs.read_only,
        })
}

fn dest_storage_class(source: Option<&str>, mapping: &BTreeMap<String, String>) -> String {
    let source = source.unwrap_or_default();
    mapping
        .get(source)
        .cloned()
        .unwrap_or_else(|| source.to_string())
}

/// Claim name for a StatefulSet pod: `<volumeClaimTemplate>-<stsName>-<index>`.
pub fn pvc_name_for_pod(claim_template: &str, sts_name: &str, index: i32) -> String {
    format!("{}-{}-{}", claim_template, sts_name, index)
}

/// Validate that a PV is suitable for migration: bound, EBS-backed, and on
/// the supported driver.
pub fn validate_pv_for_migration(pv: &PersistentVolume) -> Result<(), TranslateError> {
    let name = pv.metadata.name.clone().unwrap_or_default();

    let phase = pv
        .status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_default();
    if phase != "Bound" {
        return Err(TranslateError::NotBound { pv: name, phase });
    }

    extract_volume_id(pv).map(|_| ())
}
