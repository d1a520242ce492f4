use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, AuthFailureReason};

/// AAD error code for a client secret past its end date.
const EXPIRED_SECRET_CODE: u64 = 7000222;

pub const AUXILIARY_AUTHORIZATION_HEADER: &str = "x-ms-authorization-auxiliary";

#[derive(Clone)]
pub struct AccessToken {
    pub tenant_id: String,
    secret: SecretString,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    fn bearer(&self) -> String {
        format!("Bearer {}", self.secret.expose_secret())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    error_codes: Vec<u64>,
}

/// Classify a rejected token request into a failure reason.
fn classify(status: StatusCode, body: &TokenErrorResponse) -> AuthFailureReason {
    if body.error_codes.contains(&EXPIRED_SECRET_CODE) {
        return AuthFailureReason::Expired;
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthFailureReason::Forbidden,
        StatusCode::BAD_REQUEST
            if matches!(body.error.as_str(), "invalid_client" | "unauthorized_client") =>
        {
            AuthFailureReason::Forbidden
        }
        _ => AuthFailureReason::Unknown,
    }
}

/// OAuth2 client credentials grant against `<authority>/<tenant>/oauth2/v2.0/token`.
pub async fn acquire_token(
    http: &reqwest::Client,
    authority: &str,
    tenant_id: &str,
    client_id: &str,
    client_secret: &SecretString,
    scope: &str,
) -> Result<AccessToken, AuthError> {
    let url = format!("{}/{}/oauth2/v2.0/token", authority, tenant_id);
    let transport = |source| AuthError::Transport {
        tenant_id: tenant_id.to_string(),
        source,
    };

    let response = http
        .post(&url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("scope", scope),
        ])
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let body: TokenErrorResponse = serde_json::from_str(&text).unwrap_or_default();
        let description = if body.error_description.is_empty() {
            text.clone()
        } else {
            body.error_description.clone()
        };
        return Err(AuthError::Rejected {
            tenant_id: tenant_id.to_string(),
            status,
            reason: classify(status, &body),
            description,
        });
    }

    let token: TokenResponse = response.json().await.map_err(transport)?;
    debug!(tenant = tenant_id, client = client_id, expires_in = token.expires_in, "acquired token");

    Ok(AccessToken {
        tenant_id: tenant_id.to_string(),
        secret: token.access_token.into(),
        expires_on: Utc::now() + Duration::seconds(token.expires_in),
    })
}

/// Bearer tokens for one credential: the primary tenant plus any auxiliary
/// tenants whose resources the credential operates on.
#[derive(Clone)]
pub struct Authorizer {
    primary: AccessToken,
    auxiliary: Vec<AccessToken>,
}

impl Authorizer {
    pub fn new(primary: AccessToken, auxiliary: Vec<AccessToken>) -> Self {
        Self { primary, auxiliary }
    }

    pub fn is_multi_tenant(&self) -> bool {
        !self.auxiliary.is_empty()
    }

    /// Attach the bearer tokens. A token that is not a valid header value
    /// fails the request rather than sending it without cross-tenant access.
    pub fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, InvalidHeaderValue> {
        let request = request.header(AUTHORIZATION, HeaderValue::from_str(&self.primary.bearer())?);
        if self.auxiliary.is_empty() {
            return Ok(request);
        }

        let aux = self
            .auxiliary
            .iter()
            .map(AccessToken::bearer)
            .collect::<Vec<_>>()
            .join(", ");
        Ok(request.header(AUXILIARY_AUTHORIZATION_HEADER, HeaderValue::from_str(&aux)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_expired_secret() {
        let body = TokenErrorResponse {
            error: "invalid_client".to_string(),
            error_description: "AADSTS7000222: The provided client secret keys are expired.".to_string(),
            error_codes: vec![EXPIRED_SECRET_CODE],
        };
        assert_eq!(classify(StatusCode::UNAUTHORIZED, &body), AuthFailureReason::Expired);
    }

    #[test]
    fn test_classify_forbidden_and_unknown() {
        let invalid = TokenErrorResponse {
            error: "invalid_client".to_string(),
            ..Default::default()
        };
        assert_eq!(classify(StatusCode::BAD_REQUEST, &invalid), AuthFailureReason::Forbidden);
        assert_eq!(
            classify(StatusCode::FORBIDDEN, &TokenErrorResponse::default()),
            AuthFailureReason::Forbidden
        );
        assert_eq!(
            classify(StatusCode::SERVICE_UNAVAILABLE, &TokenErrorResponse::default()),
            AuthFailureReason::Unknown
        );
    }

    #[tokio::test]
    async fn test_acquire_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tenant-a/oauth2/v2.0/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "client".into()),
                mockito::Matcher::UrlEncoded("scope".into(), "https://management.azure.com/.default".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer","expires_in":3599,"access_token":"tok-a"}"#)
            .create_async()
            .await;

        let token = acquire_token(
            &reqwest::Client::new(),
            &server.url(),
            "tenant-a",
            "client",
            &SecretString::from("secret"),
            "https://management.azure.com/.default",
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(token.tenant_id, "tenant-a");
        assert_eq!(token.bearer(), "Bearer tok-a");
        assert!(token.expires_on > Utc::now());
    }

    #[tokio::test]
    async fn test_acquire_token_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/tenant-a/oauth2/v2.0/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client","error_description":"AADSTS7000222: expired","error_codes":[7000222]}"#)
            .create_async()
            .await;

        let err = acquire_token(
            &reqwest::Client::new(),
            &server.url(),
            "tenant-a",
            "client",
            &SecretString::from("secret"),
            "scope",
        )
        .await
        .err()
        .unwrap();

        assert_eq!(err.reason(), AuthFailureReason::Expired);
        assert!(err.to_string().contains("AADSTS7000222"));
    }

    fn token(tenant_id: &str, secret: &str) -> AccessToken {
        AccessToken {
            tenant_id: tenant_id.to_string(),
            secret: SecretString::from(secret),
            expires_on: Utc::now() + Duration::seconds(3600),
        }
    }

    #[test]
    fn test_authorize_sets_auxiliary_header() {
        let authorizer = Authorizer::new(token("customer", "tok"), vec![token("gs", "aux")]);
        let request = authorizer
            .authorize(reqwest::Client::new().get("http://localhost/"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.headers()[AUTHORIZATION], "Bearer tok");
        assert_eq!(request.headers()[AUXILIARY_AUTHORIZATION_HEADER], "Bearer aux");
    }

    #[test]
    fn test_authorize_rejects_invalid_auxiliary_token() {
        let authorizer = Authorizer::new(token("customer", "tok"), vec![token("gs", "bad\ntoken")]);
        assert!(authorizer
            .authorize(reqwest::Client::new().get("http://localhost/"))
            .is_err());
    }
}
