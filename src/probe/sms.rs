//! SMS round-trip probe.
//!
//! The message is sent through an [`SmsGateway`] together with a correlation
//! token. The platform reports delivery by calling
//! [`DeliveryReports::confirm`] with that token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::ProbeError;

/// How long to wait for a delivery report.
pub const SMS_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Platform SMS primitive.
pub trait SmsGateway: Send + Sync {
    /// Send `body` to `destination`; delivery is later confirmed under `token`.
    fn send(&self, destination: &str, body: &str, token: &str) -> Result<(), ProbeError>;
}

/// Gateway for hosts that cannot send SMS.
pub struct NoSmsGateway;

impl SmsGateway for NoSmsGateway {
    fn send(&self, _destination: &str, _body: &str, _token: &str) -> Result<(), ProbeError> {
        Err(ProbeError::Unsupported("no SMS gateway on this host".to_string()))
    }
}

/// Pending delivery listeners keyed by correlation token.
#[derive(Clone, Default)]
pub struct DeliveryReports {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Instant>>>>,
}

impl DeliveryReports {
    fn register(&self, token: &str) -> oneshot::Receiver<Instant> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(token.to_string(), tx);
        rx
    }

    fn unregister(&self, token: &str) {
        self.pending.lock().unwrap().remove(token);
    }

    /// Deliver a confirmation for `token`. Returns false if nobody is waiting.
    pub fn confirm(&self, token: &str) -> bool {
        let sender = self.pending.lock().unwrap().remove(token);
        match sender {
            Some(tx) => tx.send(Instant::now()).is_ok(),
            None => false,
        }
    }

    /// Number of listeners still waiting.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Removes the listener however the probe ends, including cancellation.
struct Registration<'a> {
    reports: &'a DeliveryReports,
    token: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.reports.unregister(&self.token);
    }
}

fn next_token() -> String {
    let nonce: u64 = rand::random();
    let sequence = TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("sms-{:016x}-{}", nonce, sequence)
}

/// Send one message and return milliseconds until its delivery report.
pub async fn run_sms_probe(
    gateway: &dyn SmsGateway,
    reports: &DeliveryReports,
    destination: &str,
    body: &str,
    timeout: Duration,
) -> Result<i64, ProbeError> {
    if destination.trim().is_empty() {
        return Err(ProbeError::Config("SMS destination is empty".to_string()));
    }

    let token = next_token();
    let delivered = reports.register(&token);
    let _registration = Registration {
        reports,
        token: token.clone(),
    };

    let start = Instant::now();
    gateway.send(destination, body, &token)?;

    match tokio::time::timeout(timeout, delivered).await {
        Ok(Ok(delivered_at)) => Ok(delivered_at.saturating_duration_since(start).as_millis() as i64),
        Ok(Err(_)) => Err(ProbeError::Network("delivery listener dropped".to_string())),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Confirms every message after a short delay.
    struct LoopbackGateway {
        reports: DeliveryReports,
        sent: Mutex<Vec<String>>,
    }

    impl SmsGateway for LoopbackGateway {
        fn send(&self, destination: &str, _body: &str, token: &str) -> Result<(), ProbeError> {
            self.sent.lock().unwrap().push(destination.to_string());
            let reports = self.reports.clone();
            let token = token.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                reports.confirm(&token);
            });
            Ok(())
        }
    }

    /// Accepts messages but never reports delivery.
    struct SilentGateway;

    impl SmsGateway for SilentGateway {
        fn send(&self, _destination: &str, _body: &str, _token: &str) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_confirmation_measured() {
        let reports = DeliveryReports::default();
        let gateway = LoopbackGateway {
            reports: reports.clone(),
            sent: Mutex::new(Vec::new()),
        };

        let ms = run_sms_probe(&gateway, &reports, "+100", "hi", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(ms >= 20);
        assert_eq!(gateway.sent.lock().unwrap().as_slice(), ["+100".to_string()]);
        assert_eq!(reports.pending(), 0);
    }

    #[tokio::test]
    async fn test_timeout_unregisters_listener() {
        let reports = DeliveryReports::default();
        let result =
            run_sms_probe(&SilentGateway, &reports, "+100", "hi", Duration::from_millis(50)).await;

        assert!(matches!(result, Err(ProbeError::Timeout(_))));
        assert_eq!(reports.pending(), 0);
    }

    #[tokio::test]
    async fn test_empty_destination_fails_immediately() {
        let reports = DeliveryReports::default();
        let result = run_sms_probe(&SilentGateway, &reports, "  ", "hi", Duration::from_secs(5)).await;

        assert!(matches!(result, Err(ProbeError::Config(_))));
        assert_eq!(reports.pending(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_for_other_token_is_ignored() {
        let reports = DeliveryReports::default();
        assert!(!reports.confirm("sms-unknown"));

        tokio_test::assert_err!(
            run_sms_probe(&SilentGateway, &reports, "+100", "hi", Duration::from_millis(30)).await
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(next_token(), next_token());
    }
}
