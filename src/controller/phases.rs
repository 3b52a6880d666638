//! Phase handlers for the migration state machine.
//!
//! One handler per active phase; each performs at most one meaningful
//! transition and asks the framework to requeue. The per-index migrate loop
//! is strictly sequential: StatefulSet semantics forbid pod `k+1` from
//! existing before pod `k` is Ready, so parallel migration is never safe.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Service,
};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use kube::runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crate::cluster::{ops, registry};
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Error;
use crate::controller::state_machine::{
    MigrationEvent, MigrationStateMachine, TransitionContext, TransitionResult,
};
use crate::controller::status::{now, upsert_condition};
use crate::crd::{
    Condition, MigratedPod, MigrationPhase, StatefulSetMigration, StatefulSetMigrationStatus,
};
use crate::ebs::{VolumeInfo, WaitOptions, DEFAULT_POLL_INTERVAL};
use crate::translate::{self, TranslationConfig};

const REQUEUE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Handle the Pending phase: record the start time and begin pre-flight.
pub async fn handle_pending(
    api: &Api<StatefulSetMigration>,
    migration: &StatefulSetMigration,
    ctx: &Context,
) -> Result<Action, Error> {
    let mut status = migration.status.clone().unwrap_or_default();

    status.phase = advance(&status, MigrationEvent::MigrationStarted)?;
    status.start_time = Some(now());

    ctx.publish_normal_event(
        migration,
        "Started",
        "PreFlight",
        Some("Starting pre-flight checks".to_string()),
    )
    .await;

    persist_status(api, &migration.name_any(), &status).await?;
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Handle the PreFlight phase: verify both clusters and capture source facts.
pub async fn handle_preflight(
    api: &Api<StatefulSetMigration>,
    migration: &StatefulSetMigration,
    ctx: &Context,
) -> Result<Action, Error> {
    let spec = &migration.spec;
    let mut status = migration.status.clone().unwrap_or_default();
    info!(migration = %spec.migration_id, "Running pre-flight checks");

    let source = ctx
        .source_client(migration)
        .await
        .map_err(|e| Error::Validation(format!("failed to connect to source cluster: {}", e)))?;
    let dest = ctx
        .dest_client(migration)
        .await
        .map_err(|e| {
            Error::Validation(format!("failed to connect to destination cluster: {}", e))
        })?;

    registry::test_connection(&source).await.map_err(|e| {
        Error::Validation(format!("source cluster connectivity check failed: {}", e))
    })?;
    registry::test_connection(&dest).await.map_err(|e| {
        Error::Validation(format!(
            "destination cluster connectivity check failed: {}",
            e
        ))
    })?;

    // Source StatefulSet must exist; capture its identity and shape.
    let sts_api: Api<StatefulSet> = Api::namespaced(source.clone(), &spec.source_namespace);
    let source_sts = sts_api
        .get_opt(&spec.stateful_set_name)
        .await?
        .ok_or_else(|| {
            Error::Validation(format!(
                "source StatefulSet {}/{} not found",
                spec.source_namespace, spec.stateful_set_name
            ))
        })?;

    status.source_stateful_set_uid = source_sts.metadata.uid.clone();
    status.total_replicas = source_sts
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    status.service_name = source_sts
        .spec
        .as_ref()
        .and_then(|s| s.service_name.clone())
        .filter(|s| !s.is_empty());

    // Destination namespace must exist.
    let ns_api: Api<Namespace> = Api::all(dest.clone());
    if ns_api.get_opt(&spec.dest_namespace).await?.is_none() {
        return Err(Error::Validation(format!(
            "destination namespace {:?} does not exist",
            spec.dest_namespace
        )));
    }

    // No StatefulSet of the same name may exist in the destination.
    let dest_sts_api: Api<StatefulSet> = Api::namespaced(dest.clone(), &spec.dest_namespace);
    if dest_sts_api
        .get_opt(&spec.stateful_set_name)
        .await?
        .is_some()
    {
        return Err(Error::Validation(format!(
            "StatefulSet {:?} already exists in destination namespace {:?}",
            spec.stateful_set_name, spec.dest_namespace
        )));
    }

    // The headless service must exist in the destination for pod DNS;
    // force downgrades its absence to a warning.
    if let Some(service_name) = &status.service_name {
        let svc_api: Api<Service> = Api::namespaced(dest.clone(), &spec.dest_namespace);
        if svc_api.get_opt(service_name).await?.is_none() {
            if spec.force {
                warn!(service = %service_name, "Headless service missing in destination, continuing (force)");
                ctx.publish_warning_event(
                    migration,
                    "MissingHeadlessService",
                    "PreFlight",
                    Some(format!(
                        "headless service {:?} not found in destination namespace; continuing because force=true",
                        service_name
                    )),
                )
                .await;
            } else {
                return Err(Error::Validation(format!(
                    "headless service {:?} not found in destination namespace (required for StatefulSet)",
                    service_name
                )));
            }
        }
    }

    info!(replicas = status.total_replicas, "Pre-flight checks passed");

    status.phase = advance(&status, MigrationEvent::ChecksPassed)?;
    upsert_condition(
        &mut status.conditions,
        Condition::new("PreFlight", true, "Passed", "All pre-flight checks passed"),
    );

    persist_status(api, &migration.name_any(), &status).await?;
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Handle the Freeze phase: snapshot the source spec, patch reclaim policies
/// to Retain, and orphan the source StatefulSet.
pub async fn handle_freeze(
    api: &Api<StatefulSetMigration>,
    migration: &StatefulSetMigration,
    ctx: &Context,
) -> Result<Action, Error> {
    let spec = &migration.spec;
    let mut status = migration.status.clone().unwrap_or_default();
    info!(migration = %spec.migration_id, "Freezing source cluster");

    let source = ctx.source_client(migration).await?;

    let sts_api: Api<StatefulSet> = Api::namespaced(source.clone(), &spec.source_namespace);
    let source_sts = sts_api
        .get_opt(&spec.stateful_set_name)
        .await?
        .ok_or_else(|| {
            Error::Precondition(format!(
                "source StatefulSet {}/{} disappeared before freeze",
                spec.source_namespace, spec.stateful_set_name
            ))
        })?;

    // A recreated StatefulSet with the same name is a different workload.
    if let (Some(expected), Some(actual)) =
        (&status.source_stateful_set_uid, &source_sts.metadata.uid)
    {
        if expected != actual {
            return Err(Error::Precondition(format!(
                "source StatefulSet UID changed ({} -> {}), refusing to migrate",
                expected, actual
            )));
        }
    }

    // Snapshot the spec before the orphan delete; afterwards the object is
    // in the hands of the garbage collector and cannot be re-read.
    let source_spec = source_sts.spec.clone().unwrap_or_default();
    status.source_spec = Some(serde_json::to_string(&source_spec)?);

    let preserved = ops::patch_reclaim_to_retain(
        &source,
        &spec.source_namespace,
        &spec.claim_template_name,
        &spec.stateful_set_name,
    )
    .await?;
    info!(pvs = ?preserved, "Patched PVs to Retain");
    status.preserved_volumes = preserved;

    ops::orphan_statefulset(&source, &spec.source_namespace, &spec.stateful_set_name).await?;
    info!(statefulset = %spec.stateful_set_name, "Orphaned source StatefulSet");

    status.phase = advance(&status, MigrationEvent::SourceFrozen)?;
    status.current_index = 0;
    upsert_condition(
        &mut status.conditions,
        Condition::new(
            "SourceFrozen",
            true,
            "Frozen",
            "Source cluster prepared for migration",
        ),
    );

    ctx.publish_normal_event(
        migration,
        "SourceFrozen",
        "Freeze",
        Some(format!(
            "{} volumes preserved, StatefulSet orphaned",
            status.preserved_volumes.len()
        )),
    )
    .await;

    persist_status(api, &migration.name_any(), &status).await?;
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Handle the Migrate phase: move one pod index per reconcile.
pub async fn handle_migrate(
    api: &Api<StatefulSetMigration>,
    migration: &StatefulSetMigration,
    ctx: &Context,
) -> Result<Action, Error> {
    let mut status = migration.status.clone().unwrap_or_default();

    if status.current_index >= status.total_replicas {
        info!("All pods migrated, moving to Finalize");
        status.phase = advance(&status, MigrationEvent::IndicesExhausted)?;
        persist_status(api, &migration.name_any(), &status).await?;
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    }

    let index = status.current_index;
    info!(index, "Migrating pod");

    let record = migrate_index(migration, &status, ctx, index).await?;

    // Committed as one status write: the migrated record and the index bump
    // land together or not at all.
    let next_phase = advance(&status, MigrationEvent::IndexMigrated)?;
    status.phase = next_phase;
    status.migrated.push(record.clone());
    status.current_index = index + 1;

    ctx.publish_normal_event(
        migration,
        "PodMigrated",
        "Migrate",
        Some(format!(
            "pod {} migrated ({}/{})",
            record.pod_name,
            status.current_index,
            status.total_replicas
        )),
    )
    .await;

    persist_status(api, &migration.name_any(), &status).await?;
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Migrate a single pod index from source to destination.
async fn migrate_index(
    migration: &StatefulSetMigration,
    status: &StatefulSetMigrationStatus,
    ctx: &Context,
    index: i32,
) -> Result<MigratedPod, Error> {
    let spec = &migration.spec;
    let source = ctx.source_client(migration).await?;
    let dest = ctx.dest_client(migration).await?;

    let pod_name = format!("{}-{}", spec.stateful_set_name, index);

    // Step 1: take the source pod down and wait for it to release its volume.
    info!(pod = %pod_name, "Deleting source pod");
    ops::delete_pod(&source, &spec.source_namespace, &pod_name).await?;
    ops::wait_pod_absent(&source, &spec.source_namespace, &pod_name).await?;

    // Step 2: resolve the claim by convention, then its bound volume.
    let pvc_name = translate::pvc_name_for_pod(
        &spec.claim_template_name,
        &spec.stateful_set_name,
        index,
    );
    let pvc_api: Api<PersistentVolumeClaim> =
        Api::namespaced(source.clone(), &spec.source_namespace);
    let source_pvc = pvc_api.get_opt(&pvc_name).await?.ok_or_else(|| {
        Error::Precondition(format!(
            "source PVC {}/{} not found",
            spec.source_namespace, pvc_name
        ))
    })?;

    let volume_name = source_pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.clone())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::Precondition(format!("source PVC {} has no bound volume", pvc_name))
        })?;

    let pv_api: Api<PersistentVolume> = Api::all(source.clone());
    let source_pv = pv_api.get_opt(&volume_name).await?.ok_or_else(|| {
        Error::Precondition(format!("source PV {} not found", volume_name))
    })?;

    // Step 3: EC2 is the authority on detachment; the PV phase is not.
    let volume_id = translate::extract_volume_id(&source_pv)?;
    info!(volume_id = %volume_id, timeout = ?spec.volume_detach_timeout(), "Waiting for volume detachment");
    let log_poll = |info: &VolumeInfo| {
        info!(volume_id = %info.volume_id, state = %info.state, "Volume state");
    };
    ctx.ebs
        .wait_for_available(
            &volume_id,
            WaitOptions {
                poll_interval: DEFAULT_POLL_INTERVAL,
                timeout: spec.volume_detach_timeout(),
                on_poll: Some(&log_poll),
            },
        )
        .await?;

    // Step 4: build the destination pair.
    let translated = translate::translate_pv(
        &source_pv,
        &source_pvc,
        &TranslationConfig {
            dest_namespace: spec.dest_namespace.clone(),
            dest_pvc_name: pvc_name.clone(),
            storage_class_mapping: spec.storage_class_mapping.clone(),
            preserve_node_affinity: true,
        },
    )?;

    // Step 5: create PV then PVC; AlreadyExists means a previous attempt got
    // this far and the deterministic names make the objects identical.
    info!(pvc = %pvc_name, "Creating PV/PVC in destination");
    let dest_pv_api: Api<PersistentVolume> = Api::all(dest.clone());
    match dest_pv_api
        .create(&PostParams::default(), &translated.pv)
        .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!(pv = ?translated.pv.metadata.name, "Destination PV already exists")
        }
        Err(e) => return Err(Error::Kube(e)),
    }

    let dest_pvc_api: Api<PersistentVolumeClaim> =
        Api::namespaced(dest.clone(), &spec.dest_namespace);
    match dest_pvc_api
        .create(&PostParams::default(), &translated.pvc)
        .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!(pvc = %pvc_name, "Destination PVC already exists")
        }
        Err(e) => return Err(Error::Kube(e)),
    }

    // Step 6: materialize the StatefulSet on index 0, scale afterwards.
    if index == 0 {
        info!("Creating StatefulSet in destination");
        create_destination_from_snapshot(&dest, migration, status).await?;
    } else {
        info!(replicas = index + 1, "Scaling StatefulSet in destination");
        ops::scale_statefulset(
            &dest,
            &spec.dest_namespace,
            &spec.stateful_set_name,
            index + 1,
        )
        .await?;
    }

    // Step 7: the next index may not start until this pod is Ready.
    info!(pod = %pod_name, "Waiting for pod to be ready in destination");
    ops::wait_pod_ready(
        &dest,
        &spec.dest_namespace,
        &pod_name,
        spec.pod_ready_timeout(),
    )
    .await?;

    info!(pod = %pod_name, "Pod migrated successfully");
    Ok(MigratedPod {
        index,
        pod_name,
        volume_id,
        migrated_at: now(),
    })
}

/// Re-create the StatefulSet in the destination from the spec snapshotted
/// during Freeze.
async fn create_destination_from_snapshot(
    dest: &Client,
    migration: &StatefulSetMigration,
    status: &StatefulSetMigrationStatus,
) -> Result<(), Error> {
    let snapshot = status.source_spec.as_deref().ok_or_else(|| {
        Error::Precondition(
            "source StatefulSet spec snapshot missing from status; freeze did not complete"
                .to_string(),
        )
    })?;
    let source_spec: StatefulSetSpec = serde_json::from_str(snapshot)?;

    let sts = ops::build_destination_statefulset(
        source_spec,
        &migration.spec.stateful_set_name,
        &migration.spec.source_namespace,
        &migration.spec.dest_namespace,
    );
    ops::create_destination_statefulset(dest, &sts).await
}

/// Handle the Finalize phase: best-effort removal of source-side claim and
/// volume objects. Retain guarantees the EBS volumes survive.
pub async fn handle_finalize(
    api: &Api<StatefulSetMigration>,
    migration: &StatefulSetMigration,
    ctx: &Context,
) -> Result<Action, Error> {
    let spec = &migration.spec;
    let mut status = migration.status.clone().unwrap_or_default();
    info!(migration = %spec.migration_id, "Finalizing migration");

    let source = ctx.source_client(migration).await?;

    for index in 0..status.total_replicas {
        let pvc_name = translate::pvc_name_for_pod(
            &spec.claim_template_name,
            &spec.stateful_set_name,
            index,
        );
        ops::gc_source_claim(&source, &spec.source_namespace, &pvc_name).await;
    }

    for pv_name in &status.preserved_volumes {
        ops::gc_source_volume(&source, pv_name).await;
    }

    status.phase = advance(&status, MigrationEvent::CleanupFinished)?;
    status.completion_time = Some(now());
    upsert_condition(
        &mut status.conditions,
        Condition::new(
            "Complete",
            true,
            "Completed",
            "Migration completed successfully",
        ),
    );

    ctx.publish_normal_event(
        migration,
        "Completed",
        "Finalize",
        Some(format!(
            "{} pods migrated to {}",
            status.total_replicas, spec.dest_namespace
        )),
    )
    .await;

    persist_status(api, &migration.name_any(), &status).await?;
    info!("Migration completed successfully");
    Ok(Action::await_change())
}

/// Move the migration to Failed with a human-readable reason. Terminal; any
/// partial destination state is left for the operator, which is safe because
/// the reclaim policy is Retain everywhere.
pub async fn fail_migration(
    api: &Api<StatefulSetMigration>,
    migration: &StatefulSetMigration,
    ctx: &Context,
    reason: &str,
) -> Result<Action, Error> {
    error!(reason = %reason, "Migration failed");

    let mut status = migration.status.clone().unwrap_or_default();
    status.phase = MigrationPhase::Failed;
    status.last_error = Some(reason.to_string());
    status.completion_time = Some(now());
    upsert_condition(
        &mut status.conditions,
        Condition::new("Failed", true, "Failed", reason),
    );

    persist_status(api, &migration.name_any(), &status).await?;

    ctx.publish_warning_event(
        migration,
        "MigrationFailed",
        "Migrating",
        Some(reason.to_string()),
    )
    .await;

    Ok(Action::await_change())
}

/// Commit a phase change through the transition table.
fn advance(
    status: &StatefulSetMigrationStatus,
    event: MigrationEvent,
) -> Result<MigrationPhase, Error> {
    let ctx = TransitionContext::new(status.current_index, status.total_replicas);
    match MigrationStateMachine::new().transition(&status.phase, event, &ctx) {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } => {
            debug!(from = %from, to = %to, "{}", description);
            Ok(to)
        }
        TransitionResult::GuardFailed { reason, .. } => Err(Error::Validation(format!(
            "illegal transition from {} on {}: {}",
            status.phase, event, reason
        ))),
        TransitionResult::InvalidTransition { current, event } => Err(Error::Validation(format!(
            "no transition from {} on {}",
            current, event
        ))),
    }
}

/// Write the status subresource via merge patch. The controller is the sole
/// status writer, so a merge carries no lost-update risk.
pub async fn persist_status(
    api: &Api<StatefulSetMigration>,
    name: &str,
    status: &StatefulSetMigrationStatus,
) -> Result<(), Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
