// Public modules
pub mod types;
pub mod config;
pub mod error;
pub mod parsing;
pub mod kubernetes;
pub mod credentials;
pub mod azure;
pub mod cache;
pub mod poller;
pub mod report;
pub mod metrics;
pub mod collector;
pub mod server;

// Re-export commonly used items
pub use types::*;
pub use config::{load_config, load_config_with_env, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use error::{AuthError, AuthFailureReason, ConfigError, PollError, ResolveError, ScrapeError};
pub use parsing::{parse_measured_calls, parse_rate_limit_values, parse_remaining_reads, HeaderParse};
pub use kubernetes::{KubeSecretStore, MockSecretStore, SecretStore};
pub use credentials::{CredentialResolver, Resolved, Strategy, RESOLUTION_CHAIN};
pub use azure::{ClientSet, ClientSetFactory, RetryPolicy};
pub use cache::{dedup_first_seen, ClientSetCache};
pub use poller::{PollOutcome, ThrottleAwarePoller};
pub use report::{ReportSummary, ScrapeReport};
pub use metrics::CollectorMetrics;
pub use collector::Collector;
