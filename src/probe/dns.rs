//! DNS probe using the system resolver.

use std::time::{Duration, Instant};

use super::ProbeError;

/// Resolve `domain` and return the resolution time in milliseconds.
pub async fn run_dns_probe(domain: &str, timeout: Duration) -> Result<i64, ProbeError> {
    if domain.is_empty() {
        return Err(ProbeError::Config("empty domain".to_string()));
    }

    let start = Instant::now();

    let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((domain, 0)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?;

    let elapsed = start.elapsed().as_millis() as i64;

    if addrs.next().is_none() {
        return Err(ProbeError::Network(format!("No addresses found for {}", domain)));
    }

    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_localhost() {
        let ms = run_dns_probe("localhost", Duration::from_secs(2)).await.unwrap();
        assert!(ms >= 0);
    }

    #[tokio::test]
    async fn test_invalid_name_fails() {
        let result = run_dns_probe("name with spaces.invalid", Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_domain_fails() {
        assert!(run_dns_probe("", Duration::from_secs(1)).await.is_err());
    }
}
