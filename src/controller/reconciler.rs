//! Reconciliation loop for StatefulSetMigration.
//!
//! Each invocation performs at most one meaningful transition and requeues.
//! Progress within a migration is serialized by the workqueue's key-wise
//! mutual exclusion; distinct migrations reconcile concurrently.

use std::sync::Arc;
use std::time::Duration;

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    controller::{context::Context, error::Error, phases},
    crd::{MigrationPhase, StatefulSetMigration},
};

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "migration-operator";

/// Finalizer guarding migrations against deletion mid-flight
pub const FINALIZER: &str = "migration.example.com/finalizer";

/// Reconcile a StatefulSetMigration
///
/// This is the main reconciliation function called by the controller.
/// It handles the full lifecycle: finalizer installation, phase dispatch,
/// and deletion.
pub async fn reconcile(
    obj: Arc<StatefulSetMigration>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling StatefulSetMigration");

    let api: Api<StatefulSetMigration> = Api::namespaced(ctx.client.clone(), &namespace);

    // Handle deletion
    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&api, &obj).await;
    }

    // Ensure finalizer is present
    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let phase = obj
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(MigrationPhase::Pending);

    info!(name = %name, phase = %phase, "Reconciling migration");

    let result = match phase {
        MigrationPhase::Pending => phases::handle_pending(&api, &obj, &ctx).await,
        MigrationPhase::PreFlight => phases::handle_preflight(&api, &obj, &ctx).await,
        MigrationPhase::Freeze => phases::handle_freeze(&api, &obj, &ctx).await,
        MigrationPhase::Migrate => phases::handle_migrate(&api, &obj, &ctx).await,
        MigrationPhase::Finalize => phases::handle_finalize(&api, &obj, &ctx).await,
        // Terminal phases: nothing to do until the operator acts
        MigrationPhase::Completed | MigrationPhase::Failed => return Ok(Action::await_change()),
    };

    match result {
        Ok(action) => Ok(action),
        // Transient errors go back to the framework for backoff; the phase
        // is re-entrant so the same step simply runs again.
        Err(e) if e.is_retryable() => {
            warn!(name = %name, error = %e, "Transient error, will retry");
            Err(e)
        }
        // Everything else is unrecoverable without operator intervention.
        Err(e) => phases::fail_migration(&api, &obj, &ctx, &e.to_string()).await,
    }
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<StatefulSetMigration>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(Duration::from_secs(300))
    }
}

/// Handle deletion of a StatefulSetMigration
///
/// No automatic rollback happens here: reversing data placement is an
/// operator decision. The finalizer is simply released.
async fn handle_deletion(
    api: &Api<StatefulSetMigration>,
    obj: &StatefulSetMigration,
) -> Result<Action, Error> {
    let name = obj.name_any();

    if obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Handling migration deletion");
        remove_finalizer(api, &name).await?;
    }

    Ok(Action::await_change())
}

/// Add finalizer to resource
async fn add_finalizer(api: &Api<StatefulSetMigration>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": [FINALIZER]
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Remove finalizer from resource
async fn remove_finalizer(api: &Api<StatefulSetMigration>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": null
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
