//! Radio and location sampling.
//!
//! The platform supplies location fixes through a [`LocationFeed`] and the
//! registered cell through a [`RadioInfoSource`]. The [`Sampler`] combines the
//! two into a [`SampleRecord`].

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::db::{RadioTech, SampleRecord};

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("permission denied")]
    PermissionDenied,
}

/// One position report from the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

/// Latest-value channel for location fixes.
///
/// Fixes closer together than the minimum interval are dropped, mirroring a
/// platform location request with a minimum update interval.
#[derive(Clone)]
pub struct LocationFeed {
    tx: Arc<watch::Sender<Option<LocationFix>>>,
    min_interval_ms: Arc<AtomicU64>,
}

impl LocationFeed {
    pub fn new(min_interval: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            min_interval_ms: Arc::new(AtomicU64::new(min_interval.as_millis() as u64)),
        }
    }

    /// Offer a new fix. Returns false if it was dropped.
    pub fn publish(&self, fix: LocationFix) -> bool {
        let min = chrono::Duration::milliseconds(self.min_interval_ms.load(Ordering::Relaxed) as i64);
        self.tx.send_if_modified(|current| {
            if let Some(prev) = current {
                if fix.captured_at - prev.captured_at < min {
                    return false;
                }
            }
            *current = Some(fix);
            true
        })
    }

    /// Most recent accepted fix.
    pub fn latest(&self) -> Option<LocationFix> {
        *self.tx.borrow()
    }

    pub fn set_min_interval(&self, interval: Duration) {
        self.min_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Identity fields shared by every technology.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellIdentity {
    pub signal_level: Option<i32>,
    pub carrier: Option<String>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
}

impl CellIdentity {
    /// MCC+MNC, or `None` if either half is unknown.
    fn plmn_id(&self) -> Option<String> {
        match (&self.mcc, &self.mnc) {
            (Some(mcc), Some(mnc)) => Some(format!("{}{}", mcc, mnc)),
            _ => None,
        }
    }
}

/// Snapshot of the registered cell, one variant per technology.
#[derive(Debug, Clone, PartialEq)]
pub enum CellSnapshot {
    Gsm {
        identity: CellIdentity,
        arfcn: Option<i32>,
        rx_lev: Option<i32>,
    },
    Cdma {
        identity: CellIdentity,
        base_station_id: Option<i32>,
        cdma_dbm: Option<i32>,
    },
    Wcdma {
        identity: CellIdentity,
        lac: Option<i32>,
        uarfcn: Option<i32>,
        rscp: Option<i32>,
        ec_no: Option<i32>,
    },
    Lte {
        identity: CellIdentity,
        tac: Option<i32>,
        earfcn: Option<i32>,
        rsrq: Option<i32>,
        rsrp: Option<i32>,
    },
    Nr {
        identity: CellIdentity,
        tac: Option<i32>,
        nrarfcn: Option<i32>,
        ss_rsrq: Option<i32>,
        ss_rsrp: Option<i32>,
    },
}

impl CellSnapshot {
    pub fn technology(&self) -> RadioTech {
        match self {
            CellSnapshot::Gsm { .. } => RadioTech::Gsm,
            CellSnapshot::Cdma { .. } => RadioTech::Cdma,
            CellSnapshot::Wcdma { .. } => RadioTech::Wcdma,
            CellSnapshot::Lte { .. } => RadioTech::Lte,
            CellSnapshot::Nr { .. } => RadioTech::Nr,
        }
    }

    fn identity(&self) -> &CellIdentity {
        match self {
            CellSnapshot::Gsm { identity, .. }
            | CellSnapshot::Cdma { identity, .. }
            | CellSnapshot::Wcdma { identity, .. }
            | CellSnapshot::Lte { identity, .. }
            | CellSnapshot::Nr { identity, .. } => identity,
        }
    }

    /// Fill the radio fields of `record` for this technology only.
    pub fn apply_to(&self, record: &mut SampleRecord) {
        let identity = self.identity();
        record.technology = Some(self.technology());
        record.signal_level = identity.signal_level;
        record.carrier = identity.carrier.clone();

        match self {
            CellSnapshot::Gsm { arfcn, rx_lev, .. } => {
                record.plmn_id = identity.plmn_id();
                record.arfcn = *arfcn;
                record.rx_lev = *rx_lev;
            }
            CellSnapshot::Cdma {
                base_station_id,
                cdma_dbm,
                ..
            } => {
                record.tac = *base_station_id;
                record.rx_lev = *cdma_dbm;
            }
            CellSnapshot::Wcdma {
                lac,
                uarfcn,
                rscp,
                ec_no,
                ..
            } => {
                record.tac = *lac;
                record.plmn_id = identity.plmn_id();
                record.arfcn = *uarfcn;
                record.rscp = *rscp;
                record.ec_no = *ec_no;
            }
            CellSnapshot::Lte {
                tac,
                earfcn,
                rsrq,
                rsrp,
                ..
            } => {
                record.tac = *tac;
                record.plmn_id = identity.plmn_id();
                record.arfcn = *earfcn;
                record.rsrq = *rsrq;
                record.rsrp = *rsrp;
            }
            CellSnapshot::Nr {
                tac,
                nrarfcn,
                ss_rsrq,
                ss_rsrp,
                ..
            } => {
                record.tac = *tac;
                record.plmn_id = identity.plmn_id();
                record.arfcn = *nrarfcn;
                record.rsrq = *ss_rsrq;
                record.rsrp = *ss_rsrp;
            }
        }
    }
}

/// Platform access to the currently registered cell.
pub trait RadioInfoSource: Send + Sync {
    /// `Ok(None)` when no cell is registered.
    fn registered_cell(&self) -> Result<Option<CellSnapshot>, RadioError>;
}

/// Radio source for hosts without a modem.
pub struct NoRadio;

impl RadioInfoSource for NoRadio {
    fn registered_cell(&self) -> Result<Option<CellSnapshot>, RadioError> {
        Ok(None)
    }
}

/// Builds sample records from the latest fix and a radio snapshot.
#[derive(Clone)]
pub struct Sampler {
    location: LocationFeed,
    radio: Arc<dyn RadioInfoSource>,
}

impl Sampler {
    pub fn new(location: LocationFeed, radio: Arc<dyn RadioInfoSource>) -> Self {
        Self { location, radio }
    }

    pub fn location(&self) -> &LocationFeed {
        &self.location
    }

    /// Take one sample, or `None` when no location fix is available yet.
    ///
    /// Radio failures degrade to a location-only sample.
    pub fn sample(&self) -> Option<SampleRecord> {
        let fix = self.location.latest()?;
        let mut record = SampleRecord::location_only(fix.latitude, fix.longitude, Utc::now());

        match self.radio.registered_cell() {
            Ok(Some(cell)) => cell.apply_to(&mut record),
            Ok(None) => {}
            Err(e) => tracing::debug!("Radio snapshot unavailable: {}", e),
        }

        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fix_at(secs: i64) -> LocationFix {
        LocationFix {
            latitude: 35.7,
            longitude: 51.4,
            captured_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn identity() -> CellIdentity {
        CellIdentity {
            signal_level: Some(3),
            carrier: Some("Carrier".to_string()),
            mcc: Some("432".to_string()),
            mnc: Some("11".to_string()),
        }
    }

    struct FixedRadio(Result<Option<CellSnapshot>, ()>);

    impl RadioInfoSource for FixedRadio {
        fn registered_cell(&self) -> Result<Option<CellSnapshot>, RadioError> {
            self.0.clone().map_err(|_| RadioError::PermissionDenied)
        }
    }

    #[test]
    fn test_lte_fields_only() {
        let mut record = SampleRecord::location_only(0.0, 0.0, Utc::now());
        CellSnapshot::Lte {
            identity: identity(),
            tac: Some(0),
            earfcn: Some(1300),
            rsrq: Some(-10),
            rsrp: Some(-90),
        }
        .apply_to(&mut record);

        assert_eq!(record.technology, Some(RadioTech::Lte));
        assert_eq!(record.plmn_id.as_deref(), Some("43211"));
        assert_eq!(record.tac, Some(0));
        assert_eq!(record.rsrp, Some(-90));
        assert_eq!(record.rscp, None);
        assert_eq!(record.ec_no, None);
        assert_eq!(record.rx_lev, None);
    }

    #[test]
    fn test_cdma_has_no_plmn() {
        let mut record = SampleRecord::location_only(0.0, 0.0, Utc::now());
        CellSnapshot::Cdma {
            identity: identity(),
            base_station_id: Some(77),
            cdma_dbm: Some(-80),
        }
        .apply_to(&mut record);

        assert_eq!(record.plmn_id, None);
        assert_eq!(record.arfcn, None);
        assert_eq!(record.tac, Some(77));
        assert_eq!(record.rx_lev, Some(-80));
        assert_eq!(record.rsrq, None);
    }

    #[test]
    fn test_plmn_absent_when_mnc_unknown() {
        let mut record = SampleRecord::location_only(0.0, 0.0, Utc::now());
        CellSnapshot::Wcdma {
            identity: CellIdentity {
                mnc: None,
                ..identity()
            },
            lac: Some(5),
            uarfcn: Some(10700),
            rscp: Some(-100),
            ec_no: Some(-7),
        }
        .apply_to(&mut record);

        assert_eq!(record.plmn_id, None);
        assert_eq!(record.rscp, Some(-100));
        assert_eq!(record.ec_no, Some(-7));
        assert_eq!(record.rsrp, None);
    }

    #[test]
    fn test_feed_honors_min_interval() {
        let feed = LocationFeed::new(Duration::from_secs(30));
        assert!(feed.latest().is_none());
        assert!(feed.publish(fix_at(0)));
        assert!(!feed.publish(fix_at(10)));
        assert!(feed.publish(fix_at(30)));
        assert_eq!(feed.latest(), Some(fix_at(30)));

        feed.set_min_interval(Duration::from_secs(1));
        assert!(feed.publish(fix_at(31)));
    }

    #[test]
    fn test_sampler_requires_fix() {
        let feed = LocationFeed::new(Duration::from_secs(1));
        let sampler = Sampler::new(feed.clone(), Arc::new(NoRadio));
        assert!(sampler.sample().is_none());

        feed.publish(fix_at(0));
        let record = sampler.sample().unwrap();
        assert_eq!(record.latitude, 35.7);
        assert_eq!(record.technology, None);
    }

    #[test]
    fn test_permission_failure_yields_location_only_sample() {
        let feed = LocationFeed::new(Duration::from_secs(1));
        feed.publish(fix_at(0));
        let sampler = Sampler::new(feed, Arc::new(FixedRadio(Err(()))));

        let record = sampler.sample().unwrap();
        assert_eq!(record.technology, None);
        assert_eq!(record.signal_level, None);
    }

    #[test]
    fn test_sampler_uses_registered_cell() {
        let feed = LocationFeed::new(Duration::from_secs(1));
        feed.publish(fix_at(0));
        let cell = CellSnapshot::Gsm {
            identity: identity(),
            arfcn: Some(60),
            rx_lev: Some(-70),
        };
        let sampler = Sampler::new(feed, Arc::new(FixedRadio(Ok(Some(cell)))));

        let record = sampler.sample().unwrap();
        assert_eq!(record.technology, Some(RadioTech::Gsm));
        assert_eq!(record.tac, None);
        assert_eq!(record.rx_lev, Some(-70));
    }
}
