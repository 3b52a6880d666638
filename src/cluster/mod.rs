//! Multi-cluster plumbing: remote client registry and typed operations
//! against a remote cluster.

pub mod ops;
pub mod registry;

pub use registry::{ClientKey, ClusterRegistry, RegistryError};
