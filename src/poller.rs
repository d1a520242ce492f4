use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::azure::{ArmRequest, ArmResponse, ClientSet, RequestKind};
use crate::error::PollError;
use crate::parsing::{parse_measured_calls, parse_rate_limit_values, HeaderParse};
use crate::types::MeasuredCallsSample;

const DEFAULT_PAGE_LIMIT: usize = 100;

/// What one polled request produced. Only built for successful, not found
/// and throttled responses; everything else is a `PollError`.
#[derive(Debug)]
pub struct PollOutcome<T> {
    pub records: Vec<T>,
    pub status: StatusCode,
    /// Headers of the last response seen, error responses included.
    pub headers: HeaderMap,
    pub throttled: bool,
    pub measured_calls: Vec<MeasuredCallsSample>,
}

impl<T> PollOutcome<T> {
    pub fn not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// Parsed `policy;remaining` pairs of header `name`, `None` if the
    /// response didn't carry it.
    pub fn rate_limits(&self, name: &str) -> Option<HeaderParse> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap_or_default())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(parse_rate_limit_values(values))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Deserialize, Default)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Runs list and get calls so that throttling is observed instead of
/// retried away. 429 is stripped from the retry policy of the client the
/// request is sent with; the client set's own clients are left alone.
#[derive(Debug, Clone)]
pub struct ThrottleAwarePoller {
    page_limit: usize,
}

impl Default for ThrottleAwarePoller {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl ThrottleAwarePoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub async fn poll<T: DeserializeOwned>(
        &self,
        client_set: &ClientSet,
        request: ArmRequest,
    ) -> Result<PollOutcome<T>, PollError> {
        let config = client_set.config();
        let client = request
            .client
            .with_retry(request.client.retry().without(StatusCode::TOO_MANY_REQUESTS));

        let mut records = Vec::new();
        let mut url = request.url;
        let mut pages = 0;
        loop {
            let response = client.get(&url).await?;
            pages += 1;

            match response.status {
                StatusCode::NOT_FOUND => {
                    debug!(clientid = %config.client_id, subscriptionid = %config.subscription_id, url = %response.url, "resource not found");
                    return Ok(outcome(records, response, false, Vec::new()));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let measured_calls = parse_measured_calls(&response.body);
                    warn!(
                        clientid = %config.client_id,
                        subscriptionid = %config.subscription_id,
                        tenantid = %config.tenant_id,
                        url = %response.url,
                        measured = measured_calls.len(),
                        "request throttled"
                    );
                    return Ok(outcome(records, response, true, measured_calls));
                }
                status if !status.is_success() => return Err(status_error(response)),
                _ => {}
            }

            match request.kind {
                RequestKind::Get => {
                    records.push(decode::<T>(&response)?);
                    return Ok(outcome(records, response, false, Vec::new()));
                }
                RequestKind::List => {
                    let page: Page<T> = decode(&response)?;
                    records.extend(page.value);
                    match page.next_link.filter(|link| !link.is_empty()) {
                        Some(next) if pages < self.page_limit => url = next,
                        Some(_) => {
                            warn!(subscriptionid = %config.subscription_id, pages, "page limit reached, truncating list");
                            return Ok(outcome(records, response, false, Vec::new()));
                        }
                        None => return Ok(outcome(records, response, false, Vec::new())),
                    }
                }
            }
        }
    }
}

fn outcome<T>(
    records: Vec<T>,
    response: ArmResponse,
    throttled: bool,
    measured_calls: Vec<MeasuredCallsSample>,
) -> PollOutcome<T> {
    PollOutcome {
        records,
        status: response.status,
        headers: response.headers,
        throttled,
        measured_calls,
    }
}

fn decode<T: DeserializeOwned>(response: &ArmResponse) -> Result<T, PollError> {
    serde_json::from_str(&response.body).map_err(|source| PollError::Decode {
        url: response.url.clone(),
        source,
    })
}

fn status_error(response: ArmResponse) -> PollError {
    let body: ErrorBody = serde_json::from_str(&response.body).unwrap_or_default();
    PollError::Status {
        method: "GET",
        url: response.url,
        status: response.status,
        code: body.error.code,
        message: body.error.message,
    }
}
