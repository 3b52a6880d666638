//! Custom Resource Definitions (CRDs) for migration-operator.
//!
//! - `StatefulSetMigration`: migrate a StatefulSet and its EBS-backed volumes
//!   from a source cluster to a destination cluster.

mod statefulset_migration;

pub use statefulset_migration::*;
