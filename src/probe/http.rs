//! Web reachability and throughput probes.

use reqwest::StatusCode;
use std::time::{Duration, Instant};

use super::ProbeError;

fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))
}

fn map_request_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// Time until a GET to `address` answers with 200, in milliseconds.
pub async fn run_web_probe(address: &str, timeout: Duration) -> Result<i64, ProbeError> {
    let url = normalize_url(address);
    let client = build_client(timeout)?;

    let start = Instant::now();

    let response = tokio::time::timeout(timeout, client.get(&url).send())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| map_request_error(e, timeout))?;

    let elapsed = start.elapsed().as_millis() as i64;

    if response.status() != StatusCode::OK {
        return Err(ProbeError::Network(format!(
            "unexpected status {} from {}",
            response.status(),
            url
        )));
    }

    Ok(elapsed)
}

/// Download `address` in full and return the rate in KB/s.
///
/// Each body read is bounded by `timeout`. A transfer too fast to register a
/// whole millisecond is reported as 0.
pub async fn run_throughput_probe(address: &str, timeout: Duration) -> Result<i64, ProbeError> {
    let url = normalize_url(address);
    let client = build_client(timeout)?;

    let start = Instant::now();

    let mut response = tokio::time::timeout(timeout, client.get(&url).send())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| map_request_error(e, timeout))?
        .error_for_status()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let mut bytes_read: u64 = 0;
    loop {
        let chunk = tokio::time::timeout(timeout, response.chunk())
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
            .map_err(|e| map_request_error(e, timeout))?;

        match chunk {
            Some(chunk) => bytes_read += chunk.len() as u64,
            None => break,
        }
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;

    match throughput_kbps(bytes_read, elapsed_ms) {
        Some(rate) => Ok(rate),
        None => {
            tracing::debug!("Throughput transfer of {} bytes took under 1 ms", bytes_read);
            Ok(0)
        }
    }
}

/// KB/s for `bytes` transferred in `elapsed_ms`; `None` if no time elapsed.
pub fn throughput_kbps(bytes: u64, elapsed_ms: u64) -> Option<i64> {
    if elapsed_ms == 0 {
        return None;
    }
    let rate = (bytes as u128 * 1000) / (elapsed_ms as u128 * 1024);
    Some(rate.min(i64::MAX as u128) as i64)
}
