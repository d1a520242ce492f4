use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

use crate::error::ResolveError;
use crate::types::{ClusterIdentity, ClusterIdentityObject, ObjectRef};

pub const ORGANIZATION_LABEL: &str = "giantswarm.io/organization";

const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";
const INFRASTRUCTURE_VERSION: &str = "v1beta1";

/// Where credentials and cluster metadata live.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Every cluster the collector should probe, across all namespaces.
    async fn list_clusters(&self) -> Result<Vec<ClusterIdentity>, ResolveError>;

    /// Structured identity object. `NotFound` when it does not exist.
    async fn get_identity(&self, object: &ObjectRef) -> Result<ClusterIdentityObject, ResolveError>;

    /// Secret by namespace and name. `NotFound` when it does not exist.
    async fn get_secret(&self, object: &ObjectRef) -> Result<Secret, ResolveError>;

    /// Secrets in `namespace` carrying every label in `labels`.
    async fn list_secrets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, ResolveError>;
}

/// Secret store backed by the management cluster's API server.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn infrastructure_resource(kind: &str) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind {
            group: INFRASTRUCTURE_GROUP.to_string(),
            version: INFRASTRUCTURE_VERSION.to_string(),
            kind: kind.to_string(),
        })
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn list_clusters(&self) -> Result<Vec<ClusterIdentity>, ResolveError> {
        let ar = Self::infrastructure_resource("AzureCluster");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

        let mut clusters = Vec::new();
        let mut params = ListParams::default();
        loop {
            let list = api.list(&params).await.map_err(|source| ResolveError::Api {
                object: ObjectRef::new("", ar.plural.clone()),
                source,
            })?;
            clusters.extend(list.items.iter().filter_map(cluster_identity_from_object));

            match list.metadata.continue_.filter(|c| !c.is_empty()) {
                Some(token) => params = ListParams::default().continue_token(&token),
                None => break,
            }
        }

        debug!(count = clusters.len(), "listed clusters");
        Ok(clusters)
    }

    async fn get_identity(&self, object: &ObjectRef) -> Result<ClusterIdentityObject, ResolveError> {
        let ar = Self::infrastructure_resource("AzureClusterIdentity");
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &object.namespace, &ar);
        let obj = api
            .get(&object.name)
            .await
            .map_err(|source| api_error("cluster identity", object, source))?;

        identity_from_object(&obj, object)
    }

    async fn get_secret(&self, object: &ObjectRef) -> Result<Secret, ResolveError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &object.namespace);
        api.get(&object.name)
            .await
            .map_err(|source| api_error("secret", object, source))
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, ResolveError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        let list = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|source| ResolveError::Api {
                object: ObjectRef::new(namespace, "secrets"),
                source,
            })?;
        Ok(list.items)
    }
}

fn api_error(kind: &'static str, object: &ObjectRef, source: kube::Error) -> ResolveError {
    match source {
        kube::Error::Api(ref ae) if ae.code == 404 => ResolveError::NotFound {
            kind,
            object: object.clone(),
        },
        source => ResolveError::Api {
            object: object.clone(),
            source,
        },
    }
}

fn spec_str<'a>(spec: &'a Value, key: &str) -> Option<&'a str> {
    spec.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Map an `AzureCluster` object to the identity the resolver works with.
pub fn cluster_identity_from_object(obj: &DynamicObject) -> Option<ClusterIdentity> {
    let name = obj.metadata.name.clone()?;
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    let spec = obj.data.get("spec").cloned().unwrap_or(Value::Null);

    let identity_ref = spec.get("identityRef").and_then(|r| {
        let name = spec_str(r, "name")?;
        let ns = spec_str(r, "namespace").unwrap_or(&namespace);
        Some(ObjectRef::new(ns, name))
    });

    Some(ClusterIdentity {
        organization: obj
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(ORGANIZATION_LABEL))
            .filter(|o| !o.is_empty())
            .cloned(),
        subscription_id: spec_str(&spec, "subscriptionID").map(str::to_string),
        identity_ref,
        name,
        namespace,
    })
}

fn identity_from_object(obj: &DynamicObject, object: &ObjectRef) -> Result<ClusterIdentityObject, ResolveError> {
    let missing = |key: &str| ResolveError::MissingValue {
        key: key.to_string(),
        object: object.clone(),
    };
    let spec = obj.data.get("spec").ok_or_else(|| missing("spec"))?;
    let secret = spec.get("clientSecret").ok_or_else(|| missing("spec.clientSecret"))?;

    Ok(ClusterIdentityObject {
        tenant_id: spec_str(spec, "tenantID").ok_or_else(|| missing("spec.tenantID"))?.to_string(),
        client_id: spec_str(spec, "clientID").ok_or_else(|| missing("spec.clientID"))?.to_string(),
        client_secret_ref: ObjectRef::new(
            spec_str(secret, "namespace").unwrap_or(&object.namespace),
            spec_str(secret, "name").ok_or_else(|| missing("spec.clientSecret.name"))?,
        ),
    })
}

/// In-memory store for tests. Records every lookup in call order.
#[derive(Debug, Default)]
pub struct MockSecretStore {
    clusters: Vec<ClusterIdentity>,
    identities: HashMap<ObjectRef, ClusterIdentityObject>,
    secrets: Vec<Secret>,
    failing_namespaces: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, cluster: ClusterIdentity) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn with_identity(mut self, object: ObjectRef, identity: ClusterIdentityObject) -> Self {
        self.identities.insert(object, identity);
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Every lookup in `namespace` fails with a 403 from the API server.
    pub fn with_failing_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.failing_namespaces.push(namespace.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_namespace(&self, object: &ObjectRef) -> Result<(), ResolveError> {
        if !self.failing_namespaces.contains(&object.namespace) {
            return Ok(());
        }
        Err(ResolveError::Api {
            object: object.clone(),
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }),
        })
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn list_clusters(&self) -> Result<Vec<ClusterIdentity>, ResolveError> {
        self.record("list_clusters".to_string());
        Ok(self.clusters.clone())
    }

    async fn get_identity(&self, object: &ObjectRef) -> Result<ClusterIdentityObject, ResolveError> {
        self.record(format!("get_identity {}", object));
        self.check_namespace(object)?;
        self.identities
            .get(object)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                kind: "cluster identity",
                object: object.clone(),
            })
    }

    async fn get_secret(&self, object: &ObjectRef) -> Result<Secret, ResolveError> {
        self.record(format!("get_secret {}", object));
        self.check_namespace(object)?;
        self.secrets
            .iter()
            .find(|s| {
                s.metadata.namespace.as_deref() == Some(object.namespace.as_str())
                    && s.metadata.name.as_deref() == Some(object.name.as_str())
            })
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                kind: "secret",
                object: object.clone(),
            })
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, ResolveError> {
        self.record(format!("list_secrets {}", namespace));
        self.check_namespace(&ObjectRef::new(namespace, "secrets"))?;
        Ok(self
            .secrets
            .iter()
            .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
            .filter(|s| {
                let secret_labels = s.metadata.labels.clone().unwrap_or_default();
                labels.iter().all(|(k, v)| secret_labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}
