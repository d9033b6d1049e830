//! Probe module for network diagnostics.
//!
//! Supports ping, web, throughput, DNS and SMS probes. A [`ProbeSuite`] runs
//! whichever of them are enabled and folds the outcomes into one
//! [`ProbeResult`].

mod dns;
mod http;
mod ping;
mod sms;

pub use dns::*;
pub use http::*;
pub use ping::*;
pub use sms::*;

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::{ProbeResult, PROBE_FAILED};
use crate::radio::LocationFix;
use crate::settings::Settings;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Fixed probe targets that the collector does not control.
#[derive(Debug, Clone)]
pub struct ProbeTargets {
    pub throughput_url: String,
    pub dns_domain: String,
    pub sms_number: String,
    pub sms_text: String,
}

/// Runs the diagnostic probes.
#[derive(Clone)]
pub struct ProbeSuite {
    targets: ProbeTargets,
    timeout: Duration,
    ping: PingProbe,
    sms_gateway: Arc<dyn SmsGateway>,
    delivery_reports: DeliveryReports,
}

impl ProbeSuite {
    pub fn new(
        targets: ProbeTargets,
        timeout: Duration,
        sms_gateway: Arc<dyn SmsGateway>,
        delivery_reports: DeliveryReports,
    ) -> Self {
        Self {
            targets,
            timeout,
            ping: PingProbe::new(timeout),
            sms_gateway,
            delivery_reports,
        }
    }

    /// Run every enabled probe once, one after another.
    ///
    /// Disabled probes are left as `None`; failed ones are recorded as -1.
    pub async fn run(&self, settings: &Settings, fix: Option<LocationFix>) -> ProbeResult {
        let captured_at = Utc::now();

        let throughput_kbps = gated(settings.throughput_included, "throughput", async {
            run_throughput_probe(&self.targets.throughput_url, self.timeout).await
        })
        .await;

        let ping_ms = if settings.ping_included {
            let outcome = self.ping.run(&settings.ping_host).await;
            tracing::debug!(
                "Ping {} via {}: {} ms",
                settings.ping_host,
                outcome.method,
                outcome.rtt_ms
            );
            Some(outcome.rtt_ms)
        } else {
            None
        };

        let dns_ms = gated(settings.dns_included, "dns", async {
            run_dns_probe(&self.targets.dns_domain, self.timeout).await
        })
        .await;

        let web_ms = gated(settings.web_included, "web", async {
            run_web_probe(&settings.web_url, self.timeout).await
        })
        .await;

        let sms_ms = gated(settings.sms_included, "sms", async {
            run_sms_probe(
                self.sms_gateway.as_ref(),
                &self.delivery_reports,
                &self.targets.sms_number,
                &self.targets.sms_text,
                SMS_DELIVERY_TIMEOUT,
            )
            .await
        })
        .await;

        ProbeResult {
            captured_at,
            latitude: fix.map(|f| f.latitude),
            longitude: fix.map(|f| f.longitude),
            ping_ms,
            web_ms,
            dns_ms,
            throughput_kbps,
            sms_ms,
        }
    }
}

/// Run `probe` if enabled, mapping failure to the -1 sentinel.
async fn gated<F>(enabled: bool, name: &str, probe: F) -> Option<i64>
where
    F: Future<Output = Result<i64, ProbeError>>,
{
    if !enabled {
        return None;
    }

    match probe.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("{} probe failed: {}", name, e);
            Some(PROBE_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> ProbeSuite {
        let targets = ProbeTargets {
            throughput_url: "http://127.0.0.1:1/".to_string(),
            dns_domain: "localhost".to_string(),
            sms_number: String::new(),
            sms_text: "hi".to_string(),
        };
        ProbeSuite::new(
            targets,
            Duration::from_secs(2),
            Arc::new(NoSmsGateway),
            DeliveryReports::default(),
        )
    }

    fn all_disabled() -> Settings {
        Settings {
            throughput_included: false,
            ping_included: false,
            web_included: false,
            dns_included: false,
            sms_included: false,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_probes_stay_absent() {
        let result = suite().run(&all_disabled(), None).await;
        assert_eq!(result.ping_ms, None);
        assert_eq!(result.web_ms, None);
        assert_eq!(result.dns_ms, None);
        assert_eq!(result.throughput_kbps, None);
        assert_eq!(result.sms_ms, None);
        assert!(!result.has_failed_run());
    }

    #[tokio::test]
    async fn test_enabled_failing_probes_are_sentinels() {
        let settings = Settings {
            throughput_included: true,
            sms_included: true,
            ..all_disabled()
        };
        let fix = LocationFix {
            latitude: 1.5,
            longitude: 2.5,
            captured_at: Utc::now(),
        };

        let result = suite().run(&settings, Some(fix)).await;
        assert_eq!(result.throughput_kbps, Some(PROBE_FAILED));
        assert_eq!(result.sms_ms, Some(PROBE_FAILED));
        assert_eq!(result.dns_ms, None);
        assert_eq!(result.latitude, Some(1.5));
        assert!(result.has_failed_run());
    }

    #[tokio::test]
    async fn test_dns_probe_enabled_resolves_localhost() {
        let settings = Settings {
            dns_included: true,
            ..all_disabled()
        };
        let result = suite().run(&settings, None).await;
        assert!(result.dns_ms.unwrap() >= 0);
    }
}
