//! Lazy, id-keyed registry of container host connections.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{HostEntry, DEFAULT_HOST_ID};
use crate::domain::ports::{ContainerHost, HostConnector};

/// One pool slot: either a live client or a connection that has not yet
/// succeeded and will be retried on access.
enum PoolEntry {
    Connected(Arc<dyn ContainerHost>),
    Deferred { url: Option<String> },
}

/// Registry of container hosts keyed by their configured id, with one
/// reserved pseudo-id for the default host.
///
/// Hosts that were unreachable at startup stay *deferred*: each `get`
/// retries the connection and returns `None` while it keeps failing.
/// `get` is called concurrently from all checker workers; a successful
/// connect never displaces a client another worker installed first.
pub struct HostPool {
    connector: Arc<dyn HostConnector>,
    entries: RwLock<HashMap<String, PoolEntry>>,
    default_id: String,
}

impl HostPool {
    /// Build the pool from the configured host list, attempting one
    /// connection per entry. Failures are logged and deferred.
    ///
    /// Default host selection: the entry flagged `default`, else the first
    /// configured entry, else a synthesized ambient-environment host.
    pub async fn connect(
        connector: Arc<dyn HostConnector>,
        hosts: &[HostEntry],
    ) -> DomainResult<Self> {
        let mut entries = HashMap::new();
        let mut default_id: Option<String> = None;
        let mut first_id: Option<String> = None;

        for host in hosts {
            if host.id == DEFAULT_HOST_ID {
                return Err(DomainError::ValidationFailed(format!(
                    "cannot use id {DEFAULT_HOST_ID} - reserved for default"
                )));
            }

            let entry = match connector.connect(host.url.as_deref()).await {
                Ok(client) => {
                    match client.info().await {
                        Ok(info) => tracing::info!(
                            host_id = %host.id,
                            engine = %info.name,
                            version = %info.server_version,
                            "connected to container engine"
                        ),
                        Err(err) => tracing::warn!(host_id = %host.id, error = %err,
                            "connected but engine info unavailable"),
                    }
                    PoolEntry::Connected(client)
                }
                Err(err) => {
                    tracing::error!(host_id = %host.id, error = %err,
                        "failed to connect to container host");
                    PoolEntry::Deferred {
                        url: host.url.clone(),
                    }
                }
            };
            entries.insert(host.id.clone(), entry);

            if first_id.is_none() {
                first_id = Some(host.id.clone());
            }
            if host.default {
                if default_id.is_some() {
                    return Err(DomainError::ValidationFailed(
                        "cannot have more than one default container host".to_string(),
                    ));
                }
                default_id = Some(host.id.clone());
            }
        }

        let default_id = match default_id.or(first_id) {
            Some(id) => {
                tracing::info!(host_id = %id, "default container host selected");
                id
            }
            None => {
                tracing::warn!("no container hosts configured: using ambient environment");
                let entry = match connector.connect(None).await {
                    Ok(client) => PoolEntry::Connected(client),
                    Err(err) => {
                        tracing::error!(error = %err, "ambient container host unreachable");
                        PoolEntry::Deferred { url: None }
                    }
                };
                entries.insert(DEFAULT_HOST_ID.to_string(), entry);
                DEFAULT_HOST_ID.to_string()
            }
        };

        Ok(Self {
            connector,
            entries: RwLock::new(entries),
            default_id,
        })
    }

    /// Whether a host with this id is configured at all.
    pub async fn has(&self, id: &str) -> bool {
        if id == DEFAULT_HOST_ID {
            return true;
        }
        self.entries.read().await.contains_key(id)
    }

    /// Client for the given id, driving a deferred entry towards
    /// connected. `None` while the host stays unreachable.
    ///
    /// Unknown ids are a configuration error surfaced to the caller.
    pub async fn get(&self, id: &str) -> DomainResult<Option<Arc<dyn ContainerHost>>> {
        let id = if id == DEFAULT_HOST_ID {
            self.default_id.as_str()
        } else {
            id
        };

        let url = {
            let entries = self.entries.read().await;
            match entries.get(id) {
                Some(PoolEntry::Connected(client)) => return Ok(Some(client.clone())),
                Some(PoolEntry::Deferred { url }) => url.clone(),
                None => return Err(DomainError::HostNotDefined(id.to_string())),
            }
        };

        // Connect outside the lock; concurrent callers may race here and
        // both succeed. Only the first writer installs its client, the
        // loser's connection is dropped.
        match self.connector.connect(url.as_deref()).await {
            Ok(client) => {
                let mut entries = self.entries.write().await;
                match entries.get(id) {
                    Some(PoolEntry::Connected(existing)) => Ok(Some(existing.clone())),
                    _ => {
                        entries.insert(id.to_string(), PoolEntry::Connected(client.clone()));
                        tracing::info!(host_id = id, "container host connected");
                        Ok(Some(client))
                    }
                }
            }
            Err(err) => {
                tracing::error!(host_id = id, error = %err, "failed to connect to container host");
                Ok(None)
            }
        }
    }

    /// Client for the default host.
    pub async fn get_default(&self) -> DomainResult<Option<Arc<dyn ContainerHost>>> {
        self.get(DEFAULT_HOST_ID).await
    }

    /// All configured ids, always including the default pseudo-id.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|id| id.as_str() != DEFAULT_HOST_ID)
            .cloned()
            .collect();
        ids.sort();
        ids.push(DEFAULT_HOST_ID.to_string());
        ids
    }

    /// Resolve the host assigned to a target, honoring the optional
    /// per-target host id.
    pub async fn for_target(
        &self,
        host_id: Option<&str>,
    ) -> DomainResult<Option<Arc<dyn ContainerHost>>> {
        match host_id {
            None => self.get_default().await,
            Some(id) if self.has(id).await => self.get(id).await,
            Some(id) => Err(DomainError::HostNotDefined(id.to_string())),
        }
    }
}
