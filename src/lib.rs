//! migration-operator library crate
//!
//! This module exports the controller, CRD definitions, the PV translator,
//! the EBS waiter, and the multi-cluster client registry.

pub mod cluster;
pub mod controller;
pub mod crd;
pub mod ebs;
pub mod translate;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::reconciler::{error_policy, reconcile};
use crd::StatefulSetMigration;
use ebs::EbsClient;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration.
///
/// `any_semantic()`: more reliable resource discovery in test environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Run the operator controller (cluster-wide).
///
/// This is the main controller loop that watches StatefulSetMigration
/// resources and reconciles them. It can be called from main.rs or spawned
/// as a background task during integration tests.
pub async fn run_controller(client: Client, ebs: EbsClient) {
    run_controller_scoped(client, ebs, None).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches migrations in that
/// namespace. Use the scoped version for integration tests to enable
/// parallel test execution.
pub async fn run_controller_scoped(client: Client, ebs: EbsClient, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        "Starting controller for StatefulSetMigration resources (scope: {})",
        scope_msg
    );

    let ctx = Arc::new(Context::new(client.clone(), ebs));

    let migrations: Api<StatefulSetMigration> = scoped_api(client, namespace);

    Controller::new(migrations, default_watcher_config())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after deletion
                    // when watch events trigger reconciliation for a deleted
                    // object. Log those at debug level instead of error.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
