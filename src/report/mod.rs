use crate::error::AuthFailureReason;
use crate::types::{ClientSetConfig, MeasuredCallsSample, RateLimitSample};

/// Gauge value for one throttling policy of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySample {
    pub subscription_id: String,
    pub client_id: String,
    pub policy_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadsSample {
    pub subscription_id: String,
    pub client_id: String,
    pub remaining: f64,
}

/// Credential whose token could not be acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckFailure {
    pub client_id: String,
    pub subscription_id: String,
    pub tenant_id: String,
    pub reason: AuthFailureReason,
}

/// Cluster for which no usable credential was resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionFailure {
    pub cluster: String,
    pub namespace: String,
    pub reason: &'static str,
}

/// What the probes of one client set produced.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub subscription_id: String,
    pub client_id: String,
    pub vmss_limits: Vec<RateLimitSample>,
    pub vmss_measured: Vec<MeasuredCallsSample>,
    pub vmss_parse_errors: u64,
    pub reads: Option<f64>,
    pub reads_parse_errors: u64,
    /// Probes that failed with a provider error and were skipped.
    pub errors: usize,
    pub throttled: bool,
}

impl ProbeResult {
    pub fn new(config: &ClientSetConfig) -> Self {
        Self {
            subscription_id: config.subscription_id.clone(),
            client_id: config.client_id.clone(),
            ..Default::default()
        }
    }
}

/// Everything one scrape collected. Staged here and only published once
/// the whole scrape finished.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub clusters: usize,
    pub client_sets: usize,
    pub vmss_limits: Vec<PolicySample>,
    pub vmss_measured: Vec<PolicySample>,
    pub vmss_parse_errors: u64,
    pub reads: Vec<ReadsSample>,
    pub reads_parse_errors: u64,
    pub check_failures: Vec<CheckFailure>,
    pub resolution_failures: Vec<ResolutionFailure>,
    pub poll_errors: usize,
    pub throttled: usize,
}

impl ScrapeReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resolution_failure(&mut self, cluster: &str, namespace: &str, reason: &'static str) {
        self.resolution_failures.push(ResolutionFailure {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            reason,
        });
    }

    pub fn add_check_failure(&mut self, config: &ClientSetConfig, reason: AuthFailureReason) {
        self.check_failures.push(CheckFailure {
            client_id: config.client_id.clone(),
            subscription_id: config.subscription_id.clone(),
            tenant_id: config.tenant_id.clone(),
            reason,
        });
    }

    pub fn add_probe(&mut self, probe: ProbeResult) {
        let ProbeResult {
            subscription_id,
            client_id,
            vmss_limits,
            vmss_measured,
            vmss_parse_errors,
            reads,
            reads_parse_errors,
            errors,
            throttled,
        } = probe;

        let policy = |name: String, value: f64| PolicySample {
            subscription_id: subscription_id.clone(),
            client_id: client_id.clone(),
            policy_name: name,
            value,
        };
        self.vmss_limits
            .extend(vmss_limits.into_iter().map(|s| policy(s.policy_name, s.remaining)));
        self.vmss_measured.extend(
            vmss_measured
                .into_iter()
                .map(|s| policy(s.operation_group, s.measured_request_count)),
        );
        if let Some(remaining) = reads {
            self.reads.push(ReadsSample {
                subscription_id: subscription_id.clone(),
                client_id: client_id.clone(),
                remaining,
            });
        }
        self.vmss_parse_errors += vmss_parse_errors;
        self.reads_parse_errors += reads_parse_errors;
        self.poll_errors += errors;
        if throttled {
            self.throttled += 1;
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.check_failures.is_empty() || !self.resolution_failures.is_empty() || self.poll_errors > 0
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            cluster_count: self.clusters,
            client_set_count: self.client_sets,
            sample_count: self.vmss_limits.len() + self.vmss_measured.len() + self.reads.len(),
            parse_error_count: self.vmss_parse_errors + self.reads_parse_errors,
            check_failure_count: self.check_failures.len(),
            resolution_failure_count: self.resolution_failures.len(),
            poll_error_count: self.poll_errors,
            throttled_count: self.throttled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub cluster_count: usize,
    pub client_set_count: usize,
    pub sample_count: usize,
    pub parse_error_count: u64,
    pub check_failure_count: usize,
    pub resolution_failure_count: usize,
    pub poll_error_count: usize,
    pub throttled_count: usize,
}

impl ReportSummary {
    pub fn failure_count(&self) -> usize {
        self.check_failure_count + self.resolution_failure_count + self.poll_error_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientSetConfig {
        ClientSetConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string().into(),
            tenant_id: "tenant".to_string(),
            subscription_id: "sub-1".to_string(),
            gs_tenant_id: "gs-tenant".to_string(),
            auxiliary_tenants: Vec::new(),
            partner_id_tag: "pid-x".to_string(),
        }
    }

    #[test]
    fn test_add_probe_labels_samples() {
        let mut report = ScrapeReport::new();
        let mut probe = ProbeResult::new(&config());
        probe.vmss_limits.push(RateLimitSample {
            policy_name: "Microsoft.Compute/GetVMScaleSet3Min".to_string(),
            remaining: 197.0,
        });
        probe.vmss_measured.push(MeasuredCallsSample {
            operation_group: "X".to_string(),
            measured_request_count: 42.0,
        });
        probe.vmss_parse_errors = 1;
        probe.reads = Some(11999.0);
        probe.throttled = true;
        report.add_probe(probe);

        assert_eq!(
            report.vmss_limits,
            vec![PolicySample {
                subscription_id: "sub-1".to_string(),
                client_id: "client".to_string(),
                policy_name: "Microsoft.Compute/GetVMScaleSet3Min".to_string(),
                value: 197.0,
            }]
        );
        assert_eq!(report.vmss_measured[0].policy_name, "X");
        assert_eq!(report.reads[0].remaining, 11999.0);

        let summary = report.summary();
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.parse_error_count, 1);
        assert_eq!(summary.throttled_count, 1);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_failures_are_counted() {
        let mut report = ScrapeReport::new();
        report.add_resolution_failure("c1", "org-acme", "too_many_credentials");
        report.add_check_failure(&config(), AuthFailureReason::Expired);

        assert!(report.has_failures());
        assert_eq!(report.summary().failure_count(), 2);
        assert_eq!(report.check_failures[0].reason, AuthFailureReason::Expired);
    }
}
