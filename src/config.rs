use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{Config, Credential};

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8000";
const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_ACTIVE_DIRECTORY_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_with_env(&SystemEnvironment)
}

pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<Config, ConfigError> {
    let gs_tenant_id = required(env, "GS_TENANT_ID")?;
    let location = required(env, "LOCATION")?;

    let listen_address = optional(env, "LISTEN_ADDRESS")
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
    let listen_address: SocketAddr = listen_address.parse().map_err(|_| ConfigError::Invalid {
        name: "LISTEN_ADDRESS",
        value: listen_address.clone(),
    })?;

    let scrape_timeout: u64 = parse_number(env, "SCRAPE_TIMEOUT_SECONDS", 30)?;
    if scrape_timeout == 0 {
        return Err(ConfigError::Invalid {
            name: "SCRAPE_TIMEOUT_SECONDS",
            value: "0".to_string(),
        });
    }
    let retry_attempts: u32 = parse_number(env, "RETRY_ATTEMPTS", 3)?;

    let resource_manager_endpoint = optional(env, "AZURE_RESOURCE_MANAGER_ENDPOINT")
        .unwrap_or_else(|| DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string());
    let active_directory_endpoint = optional(env, "AZURE_ACTIVE_DIRECTORY_ENDPOINT")
        .unwrap_or_else(|| DEFAULT_ACTIVE_DIRECTORY_ENDPOINT.to_string());

    Ok(Config {
        gs_tenant_id,
        location,
        listen_address,
        scrape_timeout: Duration::from_secs(scrape_timeout),
        retry_attempts,
        resource_manager_endpoint: resource_manager_endpoint.trim_end_matches('/').to_string(),
        active_directory_endpoint: active_directory_endpoint.trim_end_matches('/').to_string(),
        operator_credential: load_operator_credential(env)?,
    })
}

/// The operator's own credential is optional, but all four core values must
/// be given together.
fn load_operator_credential<E: EnvironmentProvider>(env: &E) -> Result<Option<Credential>, ConfigError> {
    const KEYS: [&str; 4] = [
        "AZURE_CLIENT_ID",
        "AZURE_CLIENT_SECRET",
        "AZURE_SUBSCRIPTION_ID",
        "AZURE_TENANT_ID",
    ];

    let values: Vec<Option<String>> = KEYS.iter().map(|k| optional(env, k)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    if let Some(idx) = values.iter().position(Option::is_none) {
        return Err(ConfigError::PartialOperatorCredential(KEYS[idx]));
    }

    let mut values = values.into_iter().flatten();
    let (Some(client_id), Some(client_secret), Some(subscription_id), Some(tenant_id)) =
        (values.next(), values.next(), values.next(), values.next())
    else {
        return Ok(None);
    };

    Ok(Some(Credential {
        client_id,
        client_secret: client_secret.into(),
        tenant_id,
        subscription_id,
        partner_id: optional(env, "AZURE_PARTNER_ID").unwrap_or_default(),
        single_tenant: false,
    }))
}

fn optional<E: EnvironmentProvider>(env: &E, key: &str) -> Option<String> {
    env.get_var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<E: EnvironmentProvider>(env: &E, key: &'static str) -> Result<String, ConfigError> {
    optional(env, key).ok_or(ConfigError::Missing(key))
}

fn parse_number<E: EnvironmentProvider, T: FromStr>(env: &E, key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(env, key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name: key, value: v }),
    }
}
