use std::sync::{Arc, PoisonError, RwLock};

use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, Opts, Registry, TextEncoder};

use crate::report::ScrapeReport;

pub const METRICS_NAMESPACE: &str = "azure_operator";
const RATE_LIMIT_SUBSYSTEM: &str = "rate_limit";

fn opts(subsystem: &str, name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(METRICS_NAMESPACE).subsystem(subsystem)
}

/// Metric families exposed by the collector.
///
/// Labelled gauges only ever hold the samples of the last successful scrape,
/// and are empty after a failed one. Parse error counters accumulate across
/// scrapes. Publication and encoding exclude each other, so an encode never
/// sees a family between its reset and its last sample.
#[derive(Clone)]
pub struct CollectorMetrics {
    registry: Registry,
    publication: Arc<RwLock<()>>,
    pub vmss_instance_list: GaugeVec,
    pub vmss_measured: GaugeVec,
    pub vmss_parsing_errors: IntCounter,
    pub reads: GaugeVec,
    pub reads_parsing_errors: IntCounter,
    pub token_check_failed: GaugeVec,
    pub credential_resolution_failed: GaugeVec,
    pub scrape_success: Gauge,
}

impl CollectorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let vmss_instance_list = GaugeVec::new(
            opts(RATE_LIMIT_SUBSYSTEM, "vmss_instance_list", "Remaining number of VMSS VM list operations."),
            &["subscription", "clientid", "countername"],
        )?;
        registry.register(Box::new(vmss_instance_list.clone()))?;

        let vmss_measured = GaugeVec::new(
            opts(
                RATE_LIMIT_SUBSYSTEM,
                "vmss_measured",
                "Number of calls we are making as returned by the Azure APIs during a 429 incident.",
            ),
            &["subscription", "clientid", "countername"],
        )?;
        registry.register(Box::new(vmss_measured.clone()))?;

        let vmss_parsing_errors = IntCounter::with_opts(opts(
            RATE_LIMIT_SUBSYSTEM,
            "vmss_instance_list_parsing_errors",
            "Errors trying to parse the remaining requests from the response header",
        ))?;
        registry.register(Box::new(vmss_parsing_errors.clone()))?;

        let reads = GaugeVec::new(
            opts(RATE_LIMIT_SUBSYSTEM, "reads", "Remaining number of reads allowed."),
            &["subscription", "clientid"],
        )?;
        registry.register(Box::new(reads.clone()))?;

        let reads_parsing_errors = IntCounter::with_opts(opts(
            RATE_LIMIT_SUBSYSTEM,
            "reads_parsing_errors",
            "Errors trying to parse the remaining requests from the response header",
        ))?;
        registry.register(Box::new(reads_parsing_errors.clone()))?;

        let token_check_failed = GaugeVec::new(
            opts(
                "service_principal_token",
                "check_failed",
                "Unable to acquire a token for the service principal, by failure reason.",
            ),
            &["client_id", "subscription_id", "tenant_id", "reason"],
        )?;
        registry.register(Box::new(token_check_failed.clone()))?;

        let credential_resolution_failed = GaugeVec::new(
            opts(
                "credential",
                "resolution_failed",
                "Clusters for which no usable credential was found, by failure reason.",
            ),
            &["cluster", "namespace", "reason"],
        )?;
        registry.register(Box::new(credential_resolution_failed.clone()))?;

        let scrape_success = Gauge::with_opts(opts(
            "collector",
            "scrape_success",
            "Whether the last scrape completed before its deadline.",
        ))?;
        registry.register(Box::new(scrape_success.clone()))?;

        Ok(Self {
            registry,
            publication: Arc::new(RwLock::new(())),
            vmss_instance_list,
            vmss_measured,
            vmss_parsing_errors,
            reads,
            reads_parsing_errors,
            token_check_failed,
            credential_resolution_failed,
            scrape_success,
        })
    }

    /// Replace every labelled family with the samples of `report`.
    pub fn publish(&self, report: &ScrapeReport) {
        let _publication = self.publication.write().unwrap_or_else(PoisonError::into_inner);
        self.reset_samples();

        for s in &report.vmss_limits {
            self.vmss_instance_list
                .with_label_values(&[s.subscription_id.as_str(), s.client_id.as_str(), s.policy_name.as_str()])
                .set(s.value);
        }
        for s in &report.vmss_measured {
            self.vmss_measured
                .with_label_values(&[s.subscription_id.as_str(), s.client_id.as_str(), s.policy_name.as_str()])
                .set(s.value);
        }
        for s in &report.reads {
            self.reads
                .with_label_values(&[s.subscription_id.as_str(), s.client_id.as_str()])
                .set(s.remaining);
        }
        for f in &report.check_failures {
            self.token_check_failed
                .with_label_values(&[f.client_id.as_str(), f.subscription_id.as_str(), f.tenant_id.as_str(), f.reason.as_str()])
                .set(1.0);
        }
        for f in &report.resolution_failures {
            self.credential_resolution_failed
                .with_label_values(&[f.cluster.as_str(), f.namespace.as_str(), f.reason])
                .set(1.0);
        }

        self.vmss_parsing_errors.inc_by(report.vmss_parse_errors);
        self.reads_parsing_errors.inc_by(report.reads_parse_errors);
        self.scrape_success.set(1.0);
    }

    /// Drop every labelled sample and flag the scrape as failed. Counters
    /// keep their totals.
    pub fn mark_failed(&self) {
        let _publication = self.publication.write().unwrap_or_else(PoisonError::into_inner);
        self.reset_samples();
        self.scrape_success.set(0.0);
    }

    fn reset_samples(&self) {
        self.vmss_instance_list.reset();
        self.vmss_measured.reset();
        self.reads.reset();
        self.token_check_failed.reset();
        self.credential_resolution_failed.reset();
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let families = {
            let _publication = self.publication.read().unwrap_or_else(PoisonError::into_inner);
            self.registry.gather()
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
