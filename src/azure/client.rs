use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::StatusCode;
use tracing::debug;

use super::auth::Authorizer;
use crate::error::PollError;

const USER_AGENT_PREFIX: &str = concat!("azure-collector/", env!("CARGO_PKG_VERSION"));

/// Which responses the transport retries on its own, and how often.
///
/// Carried by value on every client so callers can narrow it per request
/// instead of touching anything shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    status_codes: Vec<StatusCode>,
    attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            status_codes: vec![
                StatusCode::REQUEST_TIMEOUT,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Copy of this policy that never retries `status`.
    pub fn without(&self, status: StatusCode) -> Self {
        Self {
            status_codes: self.status_codes.iter().copied().filter(|s| *s != status).collect(),
            ..self.clone()
        }
    }

    pub fn status_codes(&self) -> &[StatusCode] {
        &self.status_codes
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self, status: StatusCode) -> bool {
        self.status_codes.contains(&status)
    }
}

/// Raw response, returned for any status so callers can read headers of
/// error responses too.
#[derive(Debug)]
pub struct ArmResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Authenticated HTTP client for the resource manager API of one
/// subscription.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    base_url: String,
    subscription_id: String,
    authorizer: Arc<Authorizer>,
    user_agent: String,
    retry: RetryPolicy,
}

impl ArmClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        subscription_id: impl Into<String>,
        authorizer: Arc<Authorizer>,
        partner_id_tag: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            subscription_id: subscription_id.into(),
            authorizer,
            user_agent: format!("{} {}", USER_AGENT_PREFIX, partner_id_tag),
            retry,
        }
    }

    /// Same client with a different retry policy. Cheap, shares the
    /// connection pool and tokens.
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Absolute URL for a path below the subscription.
    pub fn subscription_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}/subscriptions/{}/{}?api-version={}",
            self.base_url,
            self.subscription_id,
            path.trim_start_matches('/'),
            api_version
        )
    }

    pub async fn get(&self, url: &str) -> Result<ArmResponse, PollError> {
        let mut attempt = 0;
        loop {
            let request = self
                .http
                .get(url)
                .header(USER_AGENT, &self.user_agent);
            let request = self
                .authorizer
                .authorize(request)
                .map_err(|source| PollError::Authorization {
                    url: url.to_string(),
                    source,
                })?;
            let response = request
                .send()
                .await
                .map_err(|source| PollError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status();
            if self.retry.retries(status) && attempt < self.retry.attempts {
                attempt += 1;
                debug!(url, %status, attempt, "retrying request");
                tokio::time::sleep(self.retry.backoff * attempt).await;
                continue;
            }

            let headers = response.headers().clone();
            let body = response.text().await.map_err(|source| PollError::Transport {
                url: url.to_string(),
                source,
            })?;

            return Ok(ArmResponse {
                url: url.to_string(),
                status,
                headers,
                body,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::testing::test_client;

    #[test]
    fn test_without_removes_only_that_status() {
        let policy = RetryPolicy::default();
        let stripped = policy.without(StatusCode::TOO_MANY_REQUESTS);

        assert!(policy.retries(StatusCode::TOO_MANY_REQUESTS));
        assert!(!stripped.retries(StatusCode::TOO_MANY_REQUESTS));
        assert!(stripped.retries(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(stripped.status_codes().len(), policy.status_codes().len() - 1);
        assert_eq!(stripped.attempts(), policy.attempts());
    }

    #[tokio::test]
    async fn test_get_retries_listed_statuses() {
        let mut server = mockito::Server::new_async().await;
        let client = test_client(
            &mut server,
            RetryPolicy::default().with_backoff(Duration::from_millis(1)).with_attempts(2),
        )
        .await;

        let flaky = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let response = client.get(&format!("{}/flaky", server.url())).await.unwrap();
        flaky.assert_async().await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_get_sends_auth_and_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let client = test_client(&mut server, RetryPolicy::default()).await;

        let mock = server
            .mock("GET", "/subscriptions/sub-1/resourcegroups/rg")
            .match_query(mockito::Matcher::UrlEncoded("api-version".into(), "2019-05-01".into()))
            .match_header("authorization", "Bearer tok")
            .match_header("user-agent", mockito::Matcher::Regex("pid-partner".to_string()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let url = client.subscription_url("/resourcegroups/rg", "2019-05-01");
        let response = client.get(&url).await.unwrap();
        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::OK);
    }
}
