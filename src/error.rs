use reqwest::StatusCode;
use thiserror::Error;

use crate::types::ObjectRef;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("operator credential is incomplete, {0} must be set")]
    PartialOperatorCredential(&'static str),
}

/// Errors from the secret store and from credential resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cluster {cluster} has no identity reference")]
    MissingIdentityRef { cluster: ObjectRef },
    #[error("{kind} {object} not found")]
    NotFound { kind: &'static str, object: ObjectRef },
    #[error("found {count} credential secrets in namespace {namespace:?} for organization {organization:?}, expected at most one")]
    TooManyCredentials {
        namespace: String,
        organization: String,
        count: usize,
    },
    #[error("missing value {key:?} in {object}")]
    MissingValue { key: String, object: ObjectRef },
    #[error("kubernetes api error for {object}: {source}")]
    Api {
        object: ObjectRef,
        #[source]
        source: kube::Error,
    },
}

impl ResolveError {
    /// Whether the next step of the resolution chain may be tried.
    pub fn is_fall_through(&self) -> bool {
        matches!(
            self,
            ResolveError::MissingIdentityRef { .. } | ResolveError::NotFound { .. }
        )
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::MissingIdentityRef { .. } | ResolveError::NotFound { .. } => "not_found",
            ResolveError::TooManyCredentials { .. } => "too_many_credentials",
            ResolveError::MissingValue { .. } => "missing_value",
            ResolveError::Api { .. } => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    Expired,
    Forbidden,
    Unknown,
}

impl AuthFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailureReason::Expired => "expired",
            AuthFailureReason::Forbidden => "forbidden",
            AuthFailureReason::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request for tenant {tenant_id} rejected with {status}: {description}")]
    Rejected {
        tenant_id: String,
        status: StatusCode,
        reason: AuthFailureReason,
        description: String,
    },
    #[error("token request for tenant {tenant_id} failed: {source}")]
    Transport {
        tenant_id: String,
        #[source]
        source: reqwest::Error,
    },
}

impl AuthError {
    pub fn reason(&self) -> AuthFailureReason {
        match self {
            AuthError::Rejected { reason, .. } => *reason,
            AuthError::Transport { .. } => AuthFailureReason::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{method} {url} returned {status}: {code} {message}")]
    Status {
        method: &'static str,
        url: String,
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cannot authorize request to {url}: {source}")]
    Authorization {
        url: String,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PollError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PollError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_throttled(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Reasons a whole scrape is abandoned. Everything else is recorded per
/// cluster or per credential and the scrape goes on.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("listing clusters failed: {0}")]
    Discovery(#[source] ResolveError),
    #[error("scrape did not finish within {0:?}")]
    Timeout(std::time::Duration),
}
