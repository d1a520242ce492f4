//! Credential resolution for a single cluster.
//!
//! A cluster's credential is looked up through a fixed chain of strategies,
//! tried in order until one finds something:
//!
//! 1. the structured identity object the cluster references,
//! 2. a `credentiald` secret for the cluster's organization in the cluster's namespace,
//! 3. the same secret in the default credential namespace,
//! 4. the installation-wide default secret.
//!
//! A "not found" at any step moves on to the next one. Any other failure ends
//! resolution for that cluster.

pub mod secret;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ResolveError;
use crate::kubernetes::{SecretStore, ORGANIZATION_LABEL};
use crate::types::{ClusterIdentity, Credential, ObjectRef};

pub use secret::{credential_from_identity, credential_from_secret, value_from_secret};

pub const CREDENTIAL_DEFAULT_NAMESPACE: &str = "giantswarm";
pub const CREDENTIAL_DEFAULT_NAME: &str = "credential-default";
pub const CREDENTIAL_APP_LABEL: &str = "app";
pub const CREDENTIAL_APP: &str = "credentiald";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ClusterIdentity,
    OrganizationNamespace,
    DefaultNamespace,
    DefaultSecret,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ClusterIdentity => "cluster_identity",
            Strategy::OrganizationNamespace => "organization_namespace",
            Strategy::DefaultNamespace => "default_namespace",
            Strategy::DefaultSecret => "default_secret",
        }
    }
}

pub const RESOLUTION_CHAIN: [Strategy; 4] = [
    Strategy::ClusterIdentity,
    Strategy::OrganizationNamespace,
    Strategy::DefaultNamespace,
    Strategy::DefaultSecret,
];

#[derive(Debug, Clone)]
pub struct Resolved {
    pub credential: Credential,
    pub strategy: Strategy,
}

pub struct CredentialResolver<'a> {
    store: &'a dyn SecretStore,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(store: &'a dyn SecretStore) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, cluster: &ClusterIdentity) -> Result<Resolved, ResolveError> {
        for strategy in RESOLUTION_CHAIN {
            match self.attempt(strategy, cluster).await {
                Ok(Some(credential)) => {
                    debug!(
                        cluster = %cluster.name,
                        namespace = %cluster.namespace,
                        strategy = strategy.as_str(),
                        "resolved credential"
                    );
                    return Ok(Resolved { credential, strategy });
                }
                Ok(None) => continue,
                Err(e) if e.is_fall_through() => {
                    debug!(cluster = %cluster.name, strategy = strategy.as_str(), error = %e, "falling through");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ResolveError::NotFound {
            kind: "credential",
            object: ObjectRef::new(cluster.namespace.clone(), cluster.name.clone()),
        })
    }

    /// `Ok(None)` means the strategy does not apply to this cluster.
    async fn attempt(
        &self,
        strategy: Strategy,
        cluster: &ClusterIdentity,
    ) -> Result<Option<Credential>, ResolveError> {
        match strategy {
            Strategy::ClusterIdentity => self.from_cluster_identity(cluster).await,
            Strategy::OrganizationNamespace => self.from_organization_secret(cluster, &cluster.namespace).await,
            Strategy::DefaultNamespace => {
                self.from_organization_secret(cluster, CREDENTIAL_DEFAULT_NAMESPACE).await
            }
            Strategy::DefaultSecret => {
                let object = ObjectRef::new(CREDENTIAL_DEFAULT_NAMESPACE, CREDENTIAL_DEFAULT_NAME);
                let secret = self.store.get_secret(&object).await?;
                credential_from_secret(&secret).map(Some)
            }
        }
    }

    async fn from_cluster_identity(&self, cluster: &ClusterIdentity) -> Result<Option<Credential>, ResolveError> {
        let cluster_ref = ObjectRef::new(cluster.namespace.clone(), cluster.name.clone());
        let identity_ref = cluster
            .identity_ref
            .as_ref()
            .ok_or_else(|| ResolveError::MissingIdentityRef {
                cluster: cluster_ref.clone(),
            })?;

        let identity = self.store.get_identity(identity_ref).await?;
        let secret = self.store.get_secret(&identity.client_secret_ref).await?;
        let subscription_id = cluster
            .subscription_id
            .clone()
            .ok_or_else(|| ResolveError::MissingValue {
                key: "spec.subscriptionID".to_string(),
                object: cluster_ref,
            })?;

        credential_from_identity(&identity, &secret, subscription_id).map(Some)
    }

    async fn from_organization_secret(
        &self,
        cluster: &ClusterIdentity,
        namespace: &str,
    ) -> Result<Option<Credential>, ResolveError> {
        let Some(organization) = cluster.organization.as_deref() else {
            return Ok(None);
        };

        let labels = BTreeMap::from([
            (CREDENTIAL_APP_LABEL.to_string(), CREDENTIAL_APP.to_string()),
            (ORGANIZATION_LABEL.to_string(), organization.to_string()),
        ]);
        let secrets = self.store.list_secrets(namespace, &labels).await?;

        match secrets.as_slice() {
            [] => Ok(None),
            [secret] => credential_from_secret(secret).map(Some),
            _ => Err(ResolveError::TooManyCredentials {
                namespace: namespace.to_string(),
                organization: organization.to_string(),
                count: secrets.len(),
            }),
        }
    }
}
