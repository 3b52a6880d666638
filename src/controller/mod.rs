//! Controller module for migration-operator.
//!
//! Contains the reconciliation loop, the phase handlers, the formal state
//! machine, error handling, and status management for StatefulSetMigration
//! resources.

pub mod context;
pub mod error;
pub mod phases;
pub mod reconciler;
pub mod state_machine;
pub mod status;
