use serde::Deserialize;

use crate::types::{MeasuredCallsSample, RateLimitSample};

/// One value per throttling policy the request was subjected to.
pub const REMAINING_RESOURCE_HEADER: &str = "x-ms-ratelimit-remaining-resource";
pub const REMAINING_READS_HEADER: &str = "x-ms-ratelimit-remaining-subscription-reads";

/// Samples and rejected tokens from one or more rate limit header values.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HeaderParse {
    pub samples: Vec<RateLimitSample>,
    pub failures: Vec<String>,
}

impl HeaderParse {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Parse `policy;remaining` pairs, comma joined, e.g.
/// `Microsoft.Compute/DeleteVMScaleSet3Min;107,Microsoft.Compute/VmssQueuedVMOperations;4720`.
///
/// A token that doesn't split into two non-empty parts on its first `;`, or
/// whose count isn't a finite number, is recorded as a failure and skipped.
pub fn parse_rate_limit_values<'a, I>(values: I) -> HeaderParse
where
    I: IntoIterator<Item = &'a str>,
{
    let mut parse = HeaderParse::default();
    for value in values {
        for token in value.split(',') {
            match parse_token(token) {
                Some(sample) => parse.samples.push(sample),
                None => parse.failures.push(token.to_string()),
            }
        }
    }
    parse
}

fn parse_token(token: &str) -> Option<RateLimitSample> {
    let (name, count) = token.trim().split_once(';')?;
    let (name, count) = (name.trim(), count.trim());
    if name.is_empty() || count.is_empty() {
        return None;
    }
    let remaining = parse_count(count)?;

    Some(RateLimitSample {
        policy_name: name.to_string(),
        remaining,
    })
}

fn parse_count(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Remaining subscription reads, a single plain number.
pub fn parse_remaining_reads(value: &str) -> Option<f64> {
    parse_count(value.trim())
}

#[derive(Deserialize)]
struct ThrottlingBody {
    error: ThrottlingError,
}

#[derive(Deserialize)]
struct ThrottlingError {
    #[serde(default)]
    details: Vec<ThrottlingDetail>,
}

#[derive(Deserialize)]
struct ThrottlingDetail {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeasuredCalls {
    operation_group: String,
    measured_request_count: f64,
}

/// Best effort read of the measured call counts a throttled response carries
/// in `error.details[].message`, each message being JSON itself. Anything
/// that doesn't parse is dropped.
pub fn parse_measured_calls(body: &str) -> Vec<MeasuredCallsSample> {
    let Ok(parsed) = serde_json::from_str::<ThrottlingBody>(body) else {
        return Vec::new();
    };

    parsed
        .error
        .details
        .iter()
        .filter_map(|detail| serde_json::from_str::<MeasuredCalls>(&detail.message).ok())
        .map(|calls| MeasuredCallsSample {
            operation_group: calls.operation_group,
            measured_request_count: calls.measured_request_count,
        })
        .collect()
}
