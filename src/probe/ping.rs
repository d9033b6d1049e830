//! Ping probe: ping binaries first, TCP connect timing as a fallback.
//!
//! Some platforms ship several ping binaries (or none that an unprivileged
//! process may run) and report misleading exit codes, so the output is
//! parsed regardless of how the process exited.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;
use crate::db::PROBE_FAILED;

/// Ping binaries tried in order.
pub const PING_CANDIDATES: &[&str] = &["/system/bin/ping", "/system/xbin/ping", "/bin/ping", "ping"];

/// Ports tried for the TCP connect fallback, in order.
pub const TCP_FALLBACK_PORTS: &[u16] = &[443, 80];

/// How a ping measurement was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingMethod {
    Binary(String),
    TcpConnect(u16),
    None,
}

impl fmt::Display for PingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingMethod::Binary(path) => write!(f, "ping:{}", path),
            PingMethod::TcpConnect(port) => write!(f, "tcp-connect:{}", port),
            PingMethod::None => f.write_str("none"),
        }
    }
}

/// Round-trip time in milliseconds (-1 on failure) and the method used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingOutcome {
    pub rtt_ms: i64,
    pub method: PingMethod,
}

/// Ping probe with configurable binary candidates and fallback ports.
#[derive(Debug, Clone)]
pub struct PingProbe {
    candidates: Vec<String>,
    fallback_ports: Vec<u16>,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            candidates: PING_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            fallback_ports: TCP_FALLBACK_PORTS.to_vec(),
            timeout,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_fallback_ports(mut self, ports: Vec<u16>) -> Self {
        self.fallback_ports = ports;
        self
    }

    /// Measure round-trip time to `host`.
    pub async fn run(&self, host: &str) -> PingOutcome {
        for path in &self.candidates {
            match run_ping_command(path, host, self.timeout).await {
                Ok(rtt_ms) => {
                    return PingOutcome {
                        rtt_ms,
                        method: PingMethod::Binary(path.clone()),
                    };
                }
                Err(e) => tracing::debug!("Ping via {} gave no time: {}", path, e),
            }
        }

        for &port in &self.fallback_ports {
            match tcp_connect_time(host, port, self.timeout).await {
                Ok(rtt_ms) => {
                    return PingOutcome {
                        rtt_ms,
                        method: PingMethod::TcpConnect(port),
                    };
                }
                Err(e) => tracing::debug!("TCP connect to {}:{} failed: {}", host, port, e),
            }
        }

        PingOutcome {
            rtt_ms: PROBE_FAILED,
            method: PingMethod::None,
        }
    }
}

/// Run one ping binary and parse its combined output.
async fn run_ping_command(path: &str, host: &str, timeout: Duration) -> Result<i64, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let child = Command::new(path)
        .args(["-c", "1", "-W", &timeout_secs.to_string(), host])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute {}: {}", path, e)))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    parse_ping_time(&combined).ok_or_else(|| {
        ProbeError::Command(format!(
            "no time in output (exit {:?}): {}",
            output.status.code(),
            combined.trim()
        ))
    })
}

/// Extract the first `time=<ms>` value, truncated to whole milliseconds.
fn parse_ping_time(output: &str) -> Option<i64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"time=(?P<val>[0-9.]+)").unwrap());

    let caps = re.captures(output)?;
    let ms = caps.name("val")?.as_str().parse::<f64>().ok()?;
    Some(ms.trunc() as i64)
}

/// Time a TCP handshake to `host:port` in milliseconds.
///
/// Name resolution happens before the clock starts.
async fn tcp_connect_time(host: &str, port: u16, timeout: Duration) -> Result<i64, ProbeError> {
    let addr = resolve(host, port, timeout).await?;

    tokio::task::spawn_blocking(move || {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ProbeError::Network(format!("Failed to create socket: {}", e)))?;

        let start = Instant::now();
        socket.connect_timeout(&addr.into(), timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut || e.kind() == std::io::ErrorKind::WouldBlock {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(format!("Failed to connect: {}", e))
            }
        })?;

        Ok(start.elapsed().as_millis() as i64)
    })
    .await
    .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?
}

/// Resolve `host` to a socket address, bounded by `timeout`.
async fn resolve(host: &str, port: u16, timeout: Duration) -> Result<SocketAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?;

    addrs
        .next()
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", host)))
}
