use std::collections::BTreeMap;

use azure_collector::credentials::secret::{
    CLIENT_ID_KEY, CLIENT_SECRET_KEY, PARTNER_ID_KEY, SINGLE_TENANT_LABEL, SUBSCRIPTION_ID_KEY, TENANT_ID_KEY,
};
use azure_collector::credentials::{CREDENTIAL_APP, CREDENTIAL_APP_LABEL};
use azure_collector::kubernetes::ORGANIZATION_LABEL;
use azure_collector::{
    dedup_first_seen, load_config_with_env, parse_measured_calls, parse_rate_limit_values, ClientSetCache,
    ClientSetConfig, ClusterIdentity, ConfigError, CredentialResolver, MockEnvironment, MockSecretStore,
    ResolveError, RetryPolicy, Strategy,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use reqwest::StatusCode;

fn credential_secret(namespace: &str, name: &str, organization: Option<&str>, subscription: &str) -> Secret {
    let mut labels = BTreeMap::from([(CREDENTIAL_APP_LABEL.to_string(), CREDENTIAL_APP.to_string())]);
    if let Some(org) = organization {
        labels.insert(ORGANIZATION_LABEL.to_string(), org.to_string());
    }
    let data = [
        (CLIENT_ID_KEY, format!("client-{}", name)),
        (CLIENT_SECRET_KEY, "secret".to_string()),
        (SUBSCRIPTION_ID_KEY, subscription.to_string()),
        (TENANT_ID_KEY, "customer-tenant".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
    .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

fn cluster(name: &str, namespace: &str, organization: Option<&str>) -> ClusterIdentity {
    ClusterIdentity {
        name: name.to_string(),
        namespace: namespace.to_string(),
        organization: organization.map(str::to_string),
        ..Default::default()
    }
}

#[test]
fn test_config_requires_tenant_and_location() {
    let err = load_config_with_env(&MockEnvironment::new().with_var("LOCATION", "westeurope")).unwrap_err();
    assert!(matches!(err, ConfigError::Missing("GS_TENANT_ID")));

    let config = load_config_with_env(
        &MockEnvironment::new()
            .with_var("GS_TENANT_ID", "gs-tenant")
            .with_var("LOCATION", "westeurope"),
    )
    .unwrap();
    assert_eq!(config.probe_resource_group(), "azure-collector-empty-rg-for-metrics-westeurope");
    assert!(config.operator_credential.is_none());
}

#[test]
fn test_rate_limit_header_examples() {
    let parse = parse_rate_limit_values([
        "Microsoft.Compute/DeleteVMScaleSet3Min;107,Microsoft.Compute/VmssQueuedVMOperations;4720",
    ]);
    let samples: Vec<_> = parse
        .samples
        .iter()
        .map(|s| (s.policy_name.as_str(), s.remaining))
        .collect();
    assert_eq!(
        samples,
        vec![
            ("Microsoft.Compute/DeleteVMScaleSet3Min", 107.0),
            ("Microsoft.Compute/VmssQueuedVMOperations", 4720.0),
        ]
    );

    let parse = parse_rate_limit_values(["BadPolicyNoSemicolon,Microsoft.Compute/DeleteVMScaleSet3Min;107"]);
    assert_eq!(parse.failure_count(), 1);
    assert_eq!(parse.samples.len(), 1);
}

#[test]
fn test_throttling_body_example() {
    let body = r#"{"error":{"details":[{"message":"{\"operationGroup\":\"X\",\"measuredRequestCount\":42}"}]}}"#;
    let samples = parse_measured_calls(body);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].operation_group, "X");
    assert_eq!(samples[0].measured_request_count, 42.0);
}

#[test]
fn test_retry_policy_is_narrowed_per_request() {
    let base = RetryPolicy::default();
    let narrowed = base.without(StatusCode::TOO_MANY_REQUESTS);

    assert!(base.retries(StatusCode::TOO_MANY_REQUESTS));
    assert!(!narrowed.retries(StatusCode::TOO_MANY_REQUESTS));
    // Narrowing twice is harmless.
    assert_eq!(narrowed.without(StatusCode::TOO_MANY_REQUESTS), narrowed);
}

#[tokio::test]
async fn test_resolution_order_across_fleet() {
    let store = MockSecretStore::new()
        .with_secret(credential_secret("org-acme", "acme", Some("acme"), "sub-1"))
        .with_secret(credential_secret("giantswarm", "globex", Some("globex"), "sub-2"))
        .with_secret(credential_secret("giantswarm", "credential-default", None, "sub-3"));
    let resolver = CredentialResolver::new(&store);

    let acme = resolver.resolve(&cluster("c1", "org-acme", Some("acme"))).await.unwrap();
    assert_eq!(acme.strategy, Strategy::OrganizationNamespace);
    assert_eq!(acme.credential.subscription_id, "sub-1");

    let globex = resolver.resolve(&cluster("c2", "org-globex", Some("globex"))).await.unwrap();
    assert_eq!(globex.strategy, Strategy::DefaultNamespace);
    assert_eq!(globex.credential.subscription_id, "sub-2");

    let legacy = resolver.resolve(&cluster("c3", "org-initech", None)).await.unwrap();
    assert_eq!(legacy.strategy, Strategy::DefaultSecret);
    assert_eq!(legacy.credential.subscription_id, "sub-3");
}

#[tokio::test]
async fn test_ambiguous_organization_is_reported() {
    let store = MockSecretStore::new()
        .with_secret(credential_secret("org-acme", "a", Some("acme"), "sub-1"))
        .with_secret(credential_secret("org-acme", "b", Some("acme"), "sub-1"))
        .with_secret(credential_secret("giantswarm", "credential-default", None, "sub-3"));

    let err = CredentialResolver::new(&store)
        .resolve(&cluster("c1", "org-acme", Some("acme")))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::TooManyCredentials { count: 2, .. }));
    assert!(!store.calls().iter().any(|c| c.starts_with("list_secrets giantswarm")));
}

#[tokio::test]
async fn test_optional_secret_fields() {
    let mut secret = credential_secret("org-acme", "acme", Some("acme"), "sub-1");
    if let Some(data) = secret.data.as_mut() {
        data.insert(PARTNER_ID_KEY.to_string(), ByteString(b"partner".to_vec()));
    }
    if let Some(labels) = secret.metadata.labels.as_mut() {
        labels.insert(SINGLE_TENANT_LABEL.to_string(), "true".to_string());
    }
    let store = MockSecretStore::new().with_secret(secret);

    let resolved = CredentialResolver::new(&store)
        .resolve(&cluster("c1", "org-acme", Some("acme")))
        .await
        .unwrap();
    assert_eq!(resolved.credential.partner_id, "partner");
    assert!(resolved.credential.single_tenant);
}

#[test]
fn test_n_identities_sharing_a_subscription_yield_one_client_set() {
    let config = |client_id: &str| ClientSetConfig {
        client_id: client_id.to_string(),
        client_secret: "secret".to_string().into(),
        tenant_id: "customer-tenant".to_string(),
        subscription_id: "shared-sub".to_string(),
        gs_tenant_id: "gs-tenant".to_string(),
        auxiliary_tenants: vec!["gs-tenant".to_string()],
        partner_id_tag: "pid-x".to_string(),
    };

    let identities: Vec<_> = (0..10)
        .map(|i| (cluster(&format!("c{}", i), "org-acme", Some("acme")), config(&format!("client-{}", i))))
        .collect();

    let unique = dedup_first_seen(identities.clone(), |(_, c)| c.subscription_id.clone());
    assert_eq!(unique.len(), 1);

    let cache = ClientSetCache::from_entries(identities.into_iter().map(|(id, c)| (id, c, ())));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("shared-sub").map(|e| e.identity.name.as_str()), Some("c0"));
}
