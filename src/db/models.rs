//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Radio access technology of the registered cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RadioTech {
    Gsm,
    Cdma,
    Wcdma,
    Lte,
    Nr,
}

impl RadioTech {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioTech::Gsm => "GSM",
            RadioTech::Cdma => "CDMA",
            RadioTech::Wcdma => "WCDMA",
            RadioTech::Lte => "LTE",
            RadioTech::Nr => "NR",
        }
    }
}

impl fmt::Display for RadioTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RadioTech {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GSM" => Ok(RadioTech::Gsm),
            "CDMA" => Ok(RadioTech::Cdma),
            "WCDMA" => Ok(RadioTech::Wcdma),
            "LTE" => Ok(RadioTech::Lte),
            // Older rows were written with the display label.
            "NR" | "NR (5G)" => Ok(RadioTech::Nr),
            other => Err(format!("unknown radio technology: {}", other)),
        }
    }
}

/// One radio/location observation.
///
/// Radio fields that do not apply to `technology` stay `None`. Zero is a
/// valid reading and is never used as a stand-in for "unavailable".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
    pub signal_level: Option<i32>,
    pub carrier: Option<String>,
    pub technology: Option<RadioTech>,
    pub tac: Option<i32>,
    pub plmn_id: Option<String>,
    pub arfcn: Option<i32>,
    pub rsrq: Option<i32>,
    pub rsrp: Option<i32>,
    pub rscp: Option<i32>,
    pub ec_no: Option<i32>,
    pub rx_lev: Option<i32>,
}

impl SampleRecord {
    /// A location-only sample with every radio field absent.
    pub fn location_only(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
            signal_level: None,
            carrier: None,
            technology: None,
            tac: None,
            plmn_id: None,
            arfcn: None,
            rsrq: None,
            rsrp: None,
            rscp: None,
            ec_no: None,
            rx_lev: None,
        }
    }
}

/// Value stored for a probe that ran but failed.
pub const PROBE_FAILED: i64 = -1;

/// One diagnostic-suite run.
///
/// `None` means the probe was toggled off for this run, `Some(-1)` means it
/// ran and failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub captured_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub ping_ms: Option<i64>,
    pub web_ms: Option<i64>,
    pub dns_ms: Option<i64>,
    pub throughput_kbps: Option<i64>,
    pub sms_ms: Option<i64>,
}

impl ProbeResult {
    /// True if any probe that ran reported failure.
    pub fn has_failed_run(&self) -> bool {
        [
            self.ping_ms,
            self.web_ms,
            self.dns_ms,
            self.throughput_kbps,
            self.sms_ms,
        ]
        .iter()
        .any(|v| *v == Some(PROBE_FAILED))
    }
}

/// A stored record together with its row id.
#[derive(Debug, Clone, PartialEq)]
pub struct Outboxed<T> {
    pub id: i64,
    pub record: T,
}

/// Unsent row counts for the status page.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PendingCounts {
    pub cell_measurements: i64,
    pub test_results: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_failed_run_ignores_disabled_probes() {
        let result = ProbeResult {
            ping_ms: Some(12),
            web_ms: None,
            dns_ms: Some(0),
            ..Default::default()
        };
        assert!(!result.has_failed_run());
    }

    #[test]
    fn test_has_failed_run_detects_sentinel() {
        let result = ProbeResult {
            ping_ms: Some(12),
            sms_ms: Some(PROBE_FAILED),
            ..Default::default()
        };
        assert!(result.has_failed_run());
    }

    #[test]
    fn test_radio_tech_parses_legacy_nr_label() {
        assert_eq!("NR (5G)".parse::<RadioTech>().unwrap(), RadioTech::Nr);
        assert_eq!(RadioTech::Wcdma.to_string(), "WCDMA");
        assert!("UMTS".parse::<RadioTech>().is_err());
    }
}
