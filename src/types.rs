use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use secrecy::SecretString;

/// Partner GUID used when a credential carries no partner ID. It was never
/// registered with the partner program.
pub const DEFAULT_PARTNER_ID: &str = "37f13270-5c7a-56ff-9211-8426baaeaabd";

#[derive(Debug, Clone)]
pub struct Config {
    pub gs_tenant_id: String,
    pub location: String,
    pub listen_address: SocketAddr,
    pub scrape_timeout: Duration,
    pub retry_attempts: u32,
    pub resource_manager_endpoint: String,
    pub active_directory_endpoint: String,
    pub operator_credential: Option<Credential>,
}

impl Config {
    /// Resource group probed for rate limit headers. It is never created.
    pub fn probe_resource_group(&self) -> String {
        format!("azure-collector-empty-rg-for-metrics-{}", self.location)
    }
}

/// Resolved access secret for one cloud account.
///
/// Re-resolved on every scrape so rotated secrets are picked up.
#[derive(Clone)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: SecretString,
    pub tenant_id: String,
    pub subscription_id: String,
    pub partner_id: String,
    pub single_tenant: bool,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .field("partner_id", &self.partner_id)
            .field("single_tenant", &self.single_tenant)
            .finish()
    }
}

/// Namespaced pointer to another object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub name: String,
    pub namespace: String,
    pub organization: Option<String>,
    pub subscription_id: Option<String>,
    /// Structured identity object. Absent on clusters that predate it.
    pub identity_ref: Option<ObjectRef>,
}

/// Structured identity object a cluster can point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentityObject {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret_ref: ObjectRef,
}

/// Everything needed to build a client set, plus its dedup key.
#[derive(Debug, Clone)]
pub struct ClientSetConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub tenant_id: String,
    pub subscription_id: String,
    pub gs_tenant_id: String,
    pub auxiliary_tenants: Vec<String>,
    /// `pid-<partner id>`, appended to the user agent.
    pub partner_id_tag: String,
}

impl ClientSetConfig {
    pub fn dedup_key(&self) -> &str {
        &self.subscription_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSample {
    pub policy_name: String,
    pub remaining: f64,
}

/// Calls the provider says it counted during a throttling incident.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredCallsSample {
    pub operation_group: String,
    pub measured_request_count: f64,
}
