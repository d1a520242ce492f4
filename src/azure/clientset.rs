use std::sync::Arc;

use tracing::debug;

use super::auth::{acquire_token, AccessToken, Authorizer};
use super::client::{ArmClient, RetryPolicy};
use crate::error::AuthError;
use crate::types::{ClientSetConfig, Config, Credential, DEFAULT_PARTNER_ID};

const RESOURCES_API_VERSION: &str = "2019-05-01";
const COMPUTE_API_VERSION: &str = "2019-07-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Single object.
    Get,
    /// Paged `{ value, nextLink }` collection.
    List,
}

/// One API call, bound to the client that will issue it.
#[derive(Clone)]
pub struct ArmRequest {
    pub client: ArmClient,
    pub url: String,
    pub kind: RequestKind,
}

/// Manages ARM resource groups.
#[derive(Clone)]
pub struct ResourceGroupsClient {
    arm: ArmClient,
}

impl ResourceGroupsClient {
    pub fn get(&self, name: &str) -> ArmRequest {
        ArmRequest {
            client: self.arm.clone(),
            url: self
                .arm
                .subscription_url(&format!("resourcegroups/{}", name), RESOURCES_API_VERSION),
            kind: RequestKind::Get,
        }
    }
}

/// Manages virtual machine scale set VMs.
#[derive(Clone)]
pub struct ScaleSetVmsClient {
    arm: ArmClient,
}

impl ScaleSetVmsClient {
    pub fn list(&self, resource_group: &str, scale_set: &str) -> ArmRequest {
        ArmRequest {
            client: self.arm.clone(),
            url: self.arm.subscription_url(
                &format!(
                    "resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines",
                    resource_group, scale_set
                ),
                COMPUTE_API_VERSION,
            ),
            kind: RequestKind::List,
        }
    }
}

/// Authenticated API clients for one subscription.
#[derive(Clone)]
pub struct ClientSet {
    config: ClientSetConfig,
    pub resource_groups: ResourceGroupsClient,
    pub scale_set_vms: ScaleSetVmsClient,
}

impl ClientSet {
    pub fn config(&self) -> &ClientSetConfig {
        &self.config
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub resource_manager: String,
    pub active_directory: String,
}

impl Endpoints {
    fn scope(&self) -> String {
        format!("{}/.default", self.resource_manager)
    }
}

/// Turns resolved credentials into client sets.
#[derive(Clone)]
pub struct ClientSetFactory {
    http: reqwest::Client,
    endpoints: Endpoints,
    gs_tenant_id: String,
    retry: RetryPolicy,
}

impl ClientSetFactory {
    pub fn new(http: reqwest::Client, endpoints: Endpoints, gs_tenant_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http,
            endpoints,
            gs_tenant_id: gs_tenant_id.into(),
            retry,
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        Self::new(
            http,
            Endpoints {
                resource_manager: config.resource_manager_endpoint.clone(),
                active_directory: config.active_directory_endpoint.clone(),
            },
            config.gs_tenant_id.clone(),
            RetryPolicy::default().with_attempts(config.retry_attempts),
        )
    }

    /// Derive the client set config. Credentials from a tenant other than the
    /// installation's get the installation tenant as auxiliary tenant, since
    /// the subscription they operate on belongs to it.
    pub fn config_for(&self, credential: &Credential) -> ClientSetConfig {
        let single_tenant = credential.single_tenant || credential.tenant_id == self.gs_tenant_id;
        let auxiliary_tenants = if single_tenant {
            Vec::new()
        } else {
            vec![self.gs_tenant_id.clone()]
        };
        let partner_id = if credential.partner_id.is_empty() {
            DEFAULT_PARTNER_ID
        } else {
            credential.partner_id.as_str()
        };

        ClientSetConfig {
            client_id: credential.client_id.clone(),
            client_secret: credential.client_secret.clone(),
            tenant_id: credential.tenant_id.clone(),
            subscription_id: credential.subscription_id.clone(),
            gs_tenant_id: self.gs_tenant_id.clone(),
            auxiliary_tenants,
            partner_id_tag: format!("pid-{}", partner_id),
        }
    }

    /// Acquire tokens and build the client set for one credential.
    pub async fn build(&self, credential: &Credential) -> Result<(ClientSetConfig, ClientSet), AuthError> {
        let config = self.config_for(credential);
        let authorizer = self.authorizer(&config).await?;
        debug!(
            clientid = %config.client_id,
            subscriptionid = %config.subscription_id,
            tenantid = %config.tenant_id,
            multi_tenant = authorizer.is_multi_tenant(),
            "built client set"
        );

        let arm = ArmClient::new(
            self.http.clone(),
            self.endpoints.resource_manager.clone(),
            config.subscription_id.clone(),
            Arc::new(authorizer),
            &config.partner_id_tag,
            self.retry.clone(),
        );

        let client_set = ClientSet {
            config: config.clone(),
            resource_groups: ResourceGroupsClient { arm: arm.clone() },
            scale_set_vms: ScaleSetVmsClient { arm },
        };
        Ok((config, client_set))
    }

    async fn authorizer(&self, config: &ClientSetConfig) -> Result<Authorizer, AuthError> {
        let primary = self.token(config, &config.tenant_id).await?;
        let mut auxiliary = Vec::with_capacity(config.auxiliary_tenants.len());
        for tenant_id in &config.auxiliary_tenants {
            auxiliary.push(self.token(config, tenant_id).await?);
        }

        Ok(Authorizer::new(primary, auxiliary))
    }

    async fn token(&self, config: &ClientSetConfig, tenant_id: &str) -> Result<AccessToken, AuthError> {
        acquire_token(
            &self.http,
            &self.endpoints.active_directory,
            tenant_id,
            &config.client_id,
            &config.client_secret,
            &self.endpoints.scope(),
        )
        .await
    }
}
