use k8s_openapi::api::core::v1::Secret;

use crate::error::ResolveError;
use crate::types::{ClusterIdentityObject, Credential, ObjectRef};

pub const CLIENT_ID_KEY: &str = "azure.azureoperator.clientid";
pub const CLIENT_SECRET_KEY: &str = "azure.azureoperator.clientsecret";
pub const SUBSCRIPTION_ID_KEY: &str = "azure.azureoperator.subscriptionid";
pub const TENANT_ID_KEY: &str = "azure.azureoperator.tenantid";
pub const PARTNER_ID_KEY: &str = "azure.azureoperator.partnerid";

/// Key holding the client secret referenced by a structured identity.
pub const IDENTITY_CLIENT_SECRET_KEY: &str = "clientSecret";

/// Presence of this label marks a service principal living in the
/// customer's own tenant.
pub const SINGLE_TENANT_LABEL: &str = "giantswarm.io/single-tenant-service-principal";

fn secret_ref(secret: &Secret) -> ObjectRef {
    ObjectRef::new(
        secret.metadata.namespace.clone().unwrap_or_default(),
        secret.metadata.name.clone().unwrap_or_default(),
    )
}

/// Read a string value from `data`, falling back to `stringData`.
pub fn value_from_secret(secret: &Secret, key: &str) -> Option<String> {
    if let Some(v) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(String::from_utf8_lossy(&v.0).into_owned());
    }
    secret.string_data.as_ref().and_then(|d| d.get(key)).cloned()
}

fn required_value(secret: &Secret, key: &str) -> Result<String, ResolveError> {
    value_from_secret(secret, key).ok_or_else(|| ResolveError::MissingValue {
        key: key.to_string(),
        object: secret_ref(secret),
    })
}

/// Decode a legacy credential secret.
pub fn credential_from_secret(secret: &Secret) -> Result<Credential, ResolveError> {
    let client_id = required_value(secret, CLIENT_ID_KEY)?;
    let client_secret = required_value(secret, CLIENT_SECRET_KEY)?;
    let subscription_id = required_value(secret, SUBSCRIPTION_ID_KEY)?;
    let tenant_id = required_value(secret, TENANT_ID_KEY)?;
    let partner_id = value_from_secret(secret, PARTNER_ID_KEY).unwrap_or_default();

    let single_tenant = secret
        .metadata
        .labels
        .as_ref()
        .map(|l| l.contains_key(SINGLE_TENANT_LABEL))
        .unwrap_or(false);

    Ok(Credential {
        client_id,
        client_secret: client_secret.into(),
        tenant_id,
        subscription_id,
        partner_id,
        single_tenant,
    })
}

/// Combine a structured identity with the secret it references.
pub fn credential_from_identity(
    identity: &ClusterIdentityObject,
    secret: &Secret,
    subscription_id: String,
) -> Result<Credential, ResolveError> {
    Ok(Credential {
        client_id: identity.client_id.clone(),
        client_secret: required_value(secret, IDENTITY_CLIENT_SECRET_KEY)?.into(),
        tenant_id: identity.tenant_id.clone(),
        subscription_id,
        partner_id: String::new(),
        single_tenant: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use secrecy::ExposeSecret;
    use std::collections::BTreeMap;

    fn secret_with(data: &[(&str, &str)], labels: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("credential-acme".to_string()),
                namespace: Some("org-acme".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    const FULL: [(&str, &str); 4] = [
        (CLIENT_ID_KEY, "client"),
        (CLIENT_SECRET_KEY, "secret"),
        (SUBSCRIPTION_ID_KEY, "sub"),
        (TENANT_ID_KEY, "tenant"),
    ];

    #[test]
    fn test_credential_from_secret() {
        let cred = credential_from_secret(&secret_with(&FULL, &[])).unwrap();
        assert_eq!(cred.client_id, "client");
        assert_eq!(cred.client_secret.expose_secret(), "secret");
        assert_eq!(cred.subscription_id, "sub");
        assert_eq!(cred.tenant_id, "tenant");
        assert_eq!(cred.partner_id, "");
        assert!(!cred.single_tenant);
    }

    #[test]
    fn test_optional_partner_and_single_tenant_label() {
        let mut data = FULL.to_vec();
        data.push((PARTNER_ID_KEY, "partner"));
        let cred = credential_from_secret(&secret_with(&data, &[(SINGLE_TENANT_LABEL, "")])).unwrap();
        assert_eq!(cred.partner_id, "partner");
        assert!(cred.single_tenant);
    }

    #[test]
    fn test_each_required_key_is_enforced() {
        for missing in [CLIENT_ID_KEY, CLIENT_SECRET_KEY, SUBSCRIPTION_ID_KEY, TENANT_ID_KEY] {
            let data: Vec<_> = FULL.iter().copied().filter(|(k, _)| *k != missing).collect();
            let err = credential_from_secret(&secret_with(&data, &[])).unwrap_err();
            match err {
                ResolveError::MissingValue { key, object } => {
                    assert_eq!(key, missing);
                    assert_eq!(object, ObjectRef::new("org-acme", "credential-acme"));
                }
                other => panic!("unexpected error for {}: {:?}", missing, other),
            }
        }
    }

    #[test]
    fn test_credential_from_identity() {
        let identity = ClusterIdentityObject {
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret_ref: ObjectRef::new("org-acme", "sp"),
        };
        let secret = secret_with(&[(IDENTITY_CLIENT_SECRET_KEY, "s3cr3t")], &[]);
        let cred = credential_from_identity(&identity, &secret, "sub".to_string()).unwrap();
        assert_eq!(cred.client_secret.expose_secret(), "s3cr3t");
        assert_eq!(cred.subscription_id, "sub");

        let empty = secret_with(&[], &[]);
        assert!(credential_from_identity(&identity, &empty, "sub".to_string()).is_err());
    }
}
