use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::azure::{ClientSet, ClientSetFactory};
use crate::cache::{dedup_first_seen, ClientSetCache};
use crate::credentials::CredentialResolver;
use crate::error::ScrapeError;
use crate::kubernetes::SecretStore;
use crate::metrics::CollectorMetrics;
use crate::parsing::{parse_remaining_reads, REMAINING_READS_HEADER, REMAINING_RESOURCE_HEADER};
use crate::poller::ThrottleAwarePoller;
use crate::report::{ProbeResult, ReportSummary, ScrapeReport};
use crate::types::{ClientSetConfig, ClusterIdentity, Config, Credential};

/// Scale set that never exists. Listing its VMs costs a 404 but still
/// returns the rate limit headers of the list operation.
pub const PROBE_SCALE_SET: &str = "notfound";

/// Identity name the operator's own credential is filed under.
pub const OPERATOR_IDENTITY: &str = "operator";

/// Runs scrapes: discover clusters, resolve their credentials, build one
/// client set per subscription and probe each for rate limits.
pub struct Collector {
    store: Arc<dyn SecretStore>,
    factory: ClientSetFactory,
    poller: ThrottleAwarePoller,
    metrics: CollectorMetrics,
    operator_credential: Option<Credential>,
    probe_resource_group: String,
    scrape_timeout: Duration,
    scrape_lock: Mutex<()>,
}

impl Collector {
    pub fn new(
        config: &Config,
        store: Arc<dyn SecretStore>,
        factory: ClientSetFactory,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            store,
            factory,
            poller: ThrottleAwarePoller::new(),
            metrics: CollectorMetrics::new()?,
            operator_credential: config.operator_credential.clone(),
            probe_resource_group: config.probe_resource_group(),
            scrape_timeout: config.scrape_timeout,
            scrape_lock: Mutex::new(()),
        })
    }

    pub fn metrics(&self) -> &CollectorMetrics {
        &self.metrics
    }

    /// One scrape under the configured deadline. The report is published
    /// only if the scrape finished, otherwise all labelled samples are
    /// dropped and `scrape_success` drops to 0.
    pub async fn scrape(&self) -> Result<ReportSummary, ScrapeError> {
        let _guard = self.scrape_lock.lock().await;

        let result = match tokio::time::timeout(self.scrape_timeout, self.collect()).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::Timeout(self.scrape_timeout)),
        };

        match result {
            Ok(report) => {
                self.metrics.publish(&report);
                let summary = report.summary();
                info!(
                    clusters = summary.cluster_count,
                    client_sets = summary.client_set_count,
                    samples = summary.sample_count,
                    failures = summary.failure_count(),
                    throttled = summary.throttled_count,
                    "scrape finished"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, "scrape failed, dropping samples");
                self.metrics.mark_failed();
                Err(e)
            }
        }
    }

    /// Collect a report without publishing it.
    pub async fn collect(&self) -> Result<ScrapeReport, ScrapeError> {
        let clusters = self.store.list_clusters().await.map_err(ScrapeError::Discovery)?;
        let mut report = ScrapeReport::new();
        report.clusters = clusters.len();
        if clusters.is_empty() {
            debug!("no clusters found");
        }

        let mut credentials = self.resolve_all(clusters, &mut report).await;
        if let Some(operator) = &self.operator_credential {
            let identity = ClusterIdentity {
                name: OPERATOR_IDENTITY.to_string(),
                ..Default::default()
            };
            credentials.push((identity, operator.clone()));
        }

        // Duplicates are dropped before any token is requested for them.
        let unique = dedup_first_seen(credentials, |(_, credential)| credential.subscription_id.clone());
        let cache = self.build_all(unique, &mut report).await;
        report.client_sets = cache.len();

        let mut probes: FuturesUnordered<_> = cache
            .iter()
            .map(|entry| self.probe(&entry.config, &entry.client_set))
            .collect();
        while let Some(probe) = probes.next().await {
            report.add_probe(probe);
        }

        Ok(report)
    }

    async fn resolve_all(
        &self,
        clusters: Vec<ClusterIdentity>,
        report: &mut ScrapeReport,
    ) -> Vec<(ClusterIdentity, Credential)> {
        let resolver = CredentialResolver::new(self.store.as_ref());
        let resolver = &resolver;
        let mut resolving: FuturesUnordered<_> = clusters
            .into_iter()
            .map(|cluster| async move {
                let result = resolver.resolve(&cluster).await;
                (cluster, result)
            })
            .collect();

        let mut credentials = Vec::new();
        while let Some((cluster, result)) = resolving.next().await {
            match result {
                Ok(resolved) => credentials.push((cluster, resolved.credential)),
                Err(e) => {
                    warn!(
                        cluster = %cluster.name,
                        namespace = %cluster.namespace,
                        reason = e.reason(),
                        error = %e,
                        "failed to resolve credential"
                    );
                    report.add_resolution_failure(&cluster.name, &cluster.namespace, e.reason());
                }
            }
        }
        credentials
    }

    async fn build_all(
        &self,
        credentials: Vec<(ClusterIdentity, Credential)>,
        report: &mut ScrapeReport,
    ) -> ClientSetCache {
        let mut building: FuturesUnordered<_> = credentials
            .into_iter()
            .map(|(identity, credential)| async move {
                let result = self.factory.build(&credential).await;
                (identity, credential, result)
            })
            .collect();

        let mut cache = ClientSetCache::new();
        while let Some((identity, credential, result)) = building.next().await {
            match result {
                Ok((config, client_set)) => {
                    cache.insert(identity, config, client_set);
                }
                Err(e) => {
                    let config = self.factory.config_for(&credential);
                    warn!(
                        clientid = %config.client_id,
                        subscriptionid = %config.subscription_id,
                        tenantid = %config.tenant_id,
                        cluster = %identity.name,
                        reason = e.reason().as_str(),
                        error = %e,
                        "failed to build client set"
                    );
                    report.add_check_failure(&config, e.reason());
                }
            }
        }
        cache
    }

    async fn probe(&self, config: &ClientSetConfig, client_set: &ClientSet) -> ProbeResult {
        let mut result = ProbeResult::new(config);

        let request = client_set
            .scale_set_vms
            .list(&self.probe_resource_group, PROBE_SCALE_SET);
        match self.poller.poll::<serde_json::Value>(client_set, request).await {
            Ok(outcome) => {
                result.throttled |= outcome.throttled;
                match outcome.rate_limits(REMAINING_RESOURCE_HEADER) {
                    Some(parse) => {
                        for token in &parse.failures {
                            warn!(
                                clientid = %config.client_id,
                                subscriptionid = %config.subscription_id,
                                token = %token,
                                "unexpected limit in header, expected something like 'Microsoft.Compute/DeleteVMScaleSet3Min;107'"
                            );
                        }
                        result.vmss_parse_errors += parse.failure_count() as u64;
                        result.vmss_limits = parse.samples;
                    }
                    None => {
                        warn!(
                            clientid = %config.client_id,
                            subscriptionid = %config.subscription_id,
                            tenantid = %config.tenant_id,
                            header = REMAINING_RESOURCE_HEADER,
                            "header not found"
                        );
                        result.vmss_parse_errors += 1;
                    }
                }
                result.vmss_measured = outcome.measured_calls;
            }
            Err(e) => {
                warn!(
                    clientid = %config.client_id,
                    subscriptionid = %config.subscription_id,
                    tenantid = %config.tenant_id,
                    error = %e,
                    "error calling azure API, skipping"
                );
                result.errors += 1;
            }
        }

        let request = client_set.resource_groups.get(&self.probe_resource_group);
        match self.poller.poll::<serde_json::Value>(client_set, request).await {
            Ok(outcome) => {
                result.throttled |= outcome.throttled;
                match outcome.header(REMAINING_READS_HEADER).and_then(parse_remaining_reads) {
                    Some(remaining) => result.reads = Some(remaining),
                    None => {
                        warn!(
                            clientid = %config.client_id,
                            subscriptionid = %config.subscription_id,
                            value = ?outcome.header(REMAINING_READS_HEADER),
                            "could not parse remaining reads"
                        );
                        result.reads_parse_errors += 1;
                    }
                }
            }
            Err(e) => {
                warn!(
                    clientid = %config.client_id,
                    subscriptionid = %config.subscription_id,
                    tenantid = %config.tenant_id,
                    error = %e,
                    "error calling azure API, skipping"
                );
                result.errors += 1;
            }
        }

        result
    }
}
