//! Shared context for the controller.
//!
//! Holds the local cluster client, the remote client registry, the EBS
//! client, and the event recorder identity passed to every reconcile.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};

use crate::cluster::ClusterRegistry;
use crate::controller::error::Error;
use crate::crd::StatefulSetMigration;
use crate::ebs::EbsClient;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "migration-operator";

/// Shared context for the controller
pub struct Context {
    /// Client for the local (management) cluster
    pub client: Client,
    /// Registry of remote cluster clients
    pub registry: ClusterRegistry,
    /// EBS client for volume state polling
    pub ebs: EbsClient,
    /// Event reporter identity
    reporter: Reporter,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, ebs: EbsClient) -> Self {
        Self {
            registry: ClusterRegistry::new(client.clone()),
            client,
            ebs,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Resolve the source cluster client for a migration
    pub async fn source_client(&self, migration: &StatefulSetMigration) -> Result<Client, Error> {
        let namespace = migration
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let cluster = &migration.spec.source_cluster;
        Ok(self
            .registry
            .client_for(
                &namespace,
                &cluster.kube_config_secret,
                Some(&cluster.kube_config_key),
            )
            .await?)
    }

    /// Resolve the destination cluster client for a migration
    pub async fn dest_client(&self, migration: &StatefulSetMigration) -> Result<Client, Error> {
        let namespace = migration
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let cluster = &migration.spec.dest_cluster;
        Ok(self
            .registry
            .client_for(
                &namespace,
                &cluster.kube_config_secret,
                Some(&cluster.kube_config_key),
            )
            .await?)
    }

    /// Publish a normal event for a StatefulSetMigration resource
    pub async fn publish_normal_event(
        &self,
        resource: &StatefulSetMigration,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a warning event for a StatefulSetMigration resource
    pub async fn publish_warning_event(
        &self,
        resource: &StatefulSetMigration,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}
