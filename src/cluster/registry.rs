//! Multi-cluster client registry.
//!
//! Resolves kubeconfig Secrets in the local cluster into ready-to-use remote
//! clients and caches them across reconciles. Concurrent reconciles may race
//! on a cache miss; building the same client twice is harmless and the last
//! writer wins.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Default key within a kubeconfig Secret.
pub const DEFAULT_KUBECONFIG_KEY: &str = "kubeconfig";

/// Errors building or probing a remote cluster client.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The kubeconfig Secret does not exist in the local cluster.
    #[error("kubeconfig secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    /// The Secret exists but lacks the requested key.
    #[error("secret {namespace}/{name} does not contain key {key:?}")]
    KeyMissing {
        namespace: String,
        name: String,
        key: String,
    },

    /// The payload could not be parsed as a kubeconfig.
    #[error("failed to parse kubeconfig: {0}")]
    InvalidKubeconfig(String),

    /// A client could not be constructed from the parsed kubeconfig.
    #[error("failed to build client: {0}")]
    ClientBuild(String),

    /// The discovery probe against the remote cluster failed.
    #[error("failed to connect to cluster: {0}")]
    Unreachable(String),

    /// Reading the Secret from the local cluster failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Cache key for a remote cluster client.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ClientKey {
    /// Namespace of the kubeconfig Secret.
    pub namespace: String,
    /// Name of the kubeconfig Secret.
    pub secret: String,
    /// Key within the Secret.
    pub key: String,
}

impl ClientKey {
    /// Build a key, defaulting the secret key to `kubeconfig`.
    pub fn new(namespace: &str, secret: &str, key: Option<&str>) -> Self {
        let key = match key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => DEFAULT_KUBECONFIG_KEY.to_string(),
        };
        Self {
            namespace: namespace.to_string(),
            secret: secret.to_string(),
            key,
        }
    }
}

/// Registry of remote cluster clients keyed by kubeconfig Secret reference.
pub struct ClusterRegistry {
    local: Client,
    cache: RwLock<HashMap<ClientKey, Client>>,
}

impl ClusterRegistry {
    /// Create a registry backed by the local (management) cluster client.
    pub fn new(local: Client) -> Self {
        Self {
            local,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The local cluster client.
    pub fn local_client(&self) -> &Client {
        &self.local
    }

    /// Resolve a remote client for the kubeconfig stored at
    /// `namespace/secret_name[secret_key]`, reading through the cache.
    pub async fn client_for(
        &self,
        namespace: &str,
        secret_name: &str,
        secret_key: Option<&str>,
    ) -> Result<Client, RegistryError> {
        let key = ClientKey::new(namespace, secret_name, secret_key);

        {
            let cache = self.cache.read().await;
            if let Some(client) = cache.get(&key) {
                return Ok(client.clone());
            }
        }

        let kubeconfig = self.read_kubeconfig(&key).await?;
        let client = client_from_kubeconfig(kubeconfig).await?;

        debug!(
            namespace = %key.namespace,
            secret = %key.secret,
            key = %key.key,
            "Cached remote cluster client"
        );
        let mut cache = self.cache.write().await;
        cache.insert(key, client.clone());

        Ok(client)
    }

    /// Drop a single cached client, forcing a rebuild on next use.
    pub async fn invalidate(&self, key: &ClientKey) {
        let mut cache = self.cache.write().await;
        cache.remove(key);
    }

    /// Drop every cached client.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    async fn read_kubeconfig(&self, key: &ClientKey) -> Result<Kubeconfig, RegistryError> {
        let secrets: Api<Secret> = Api::namespaced(self.local.clone(), &key.namespace);
        let secret = match secrets.get(&key.secret).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(RegistryError::SecretNotFound {
                    namespace: key.namespace.clone(),
                    name: key.secret.clone(),
                });
            }
            Err(e) => return Err(RegistryError::Kube(e)),
        };

        let payload = secret
            .data
            .as_ref()
            .and_then(|d| d.get(&key.key))
            .ok_or_else(|| RegistryError::KeyMissing {
                namespace: key.namespace.clone(),
                name: key.secret.clone(),
                key: key.key.clone(),
            })?;

        let raw = std::str::from_utf8(&payload.0)
            .map_err(|e| RegistryError::InvalidKubeconfig(e.to_string()))?;
        Kubeconfig::from_yaml(raw).map_err(|e| RegistryError::InvalidKubeconfig(e.to_string()))
    }
}

/// Build a client from an already-parsed kubeconfig (default context).
pub async fn client_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Client, RegistryError> {
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| RegistryError::ClientBuild(e.to_string()))?;
    Client::try_from(config).map_err(|e| RegistryError::ClientBuild(e.to_string()))
}

/// Probe connectivity to a cluster by requesting the apiserver version.
pub async fn test_connection(client: &Client) -> Result<(), RegistryError> {
    client
        .apiserver_version()
        .await
        .map(|_| ())
        .map_err(|e| RegistryError::Unreachable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_defaults() {
        let key = ClientKey::new("default", "src-kubeconfig", None);
        assert_eq!(key.key, "kubeconfig");

        let key = ClientKey::new("default", "src-kubeconfig", Some(""));
        assert_eq!(key.key, "kubeconfig");

        let key = ClientKey::new("default", "src-kubeconfig", Some("config"));
        assert_eq!(key.key, "config");
    }

    #[test]
    fn test_client_key_equality() {
        let a = ClientKey::new("ns", "secret", None);
        let b = ClientKey::new("ns", "secret", Some("kubeconfig"));
        assert_eq!(a, b);

        let c = ClientKey::new("ns", "secret", Some("other"));
        assert_ne!(a, c);
    }
}
