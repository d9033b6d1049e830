//! Runtime settings: routine intervals, probe targets and probe toggles.
//!
//! Settings start from built-in defaults, are overwritten by the collector's
//! configuration document and are persisted in the store so they survive
//! restarts. Routines hold a [`SettingsHandle`] and re-read it every tick.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::collector::RemoteConfig;
use crate::db::{DbError, Store};

const SETTINGS_KEY: &str = "settings";

/// Floor applied to every interval so a zero from the collector cannot spin a loop.
const MIN_INTERVAL_MS: u64 = 1_000;

const MINUTE_MS: u64 = 60_000;

/// Current interval and probe configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_ms: u64,
    pub sample_interval_ms: u64,
    pub test_interval_ms: u64,
    pub sync_interval_ms: u64,
    pub ping_host: String,
    pub web_url: String,
    pub throughput_included: bool,
    pub ping_included: bool,
    pub web_included: bool,
    pub dns_included: bool,
    pub sms_included: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60 * MINUTE_MS,
            sample_interval_ms: 30_000,
            test_interval_ms: 5 * MINUTE_MS,
            sync_interval_ms: 10 * MINUTE_MS,
            ping_host: "google.com".to_string(),
            web_url: "https://www.google.com".to_string(),
            throughput_included: true,
            ping_included: true,
            web_included: true,
            dns_included: true,
            sms_included: false,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        clamp_interval(self.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        clamp_interval(self.sample_interval_ms)
    }

    pub fn test_interval(&self) -> Duration {
        clamp_interval(self.test_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        clamp_interval(self.sync_interval_ms)
    }

    /// Overlay a collector configuration document.
    ///
    /// Intervals arrive in minutes. Empty target strings and absent toggles
    /// keep their current values.
    pub fn apply_remote(&mut self, remote: &RemoteConfig) {
        self.poll_interval_ms = remote.polling_interval.saturating_mul(MINUTE_MS);
        self.sample_interval_ms = remote.measurement_interval.saturating_mul(MINUTE_MS);
        self.sync_interval_ms = remote.server_sync_interval.saturating_mul(MINUTE_MS);
        self.test_interval_ms = remote.test_interval.saturating_mul(MINUTE_MS);

        if !remote.ping_url.is_empty() {
            self.ping_host = remote.ping_url.clone();
        }
        if !remote.web_url.is_empty() {
            self.web_url = remote.web_url.clone();
        }

        let toggles = [
            (remote.throughput_included, &mut self.throughput_included),
            (remote.ping_included, &mut self.ping_included),
            (remote.web_included, &mut self.web_included),
            (remote.dns_included, &mut self.dns_included),
            (remote.sms_included, &mut self.sms_included),
        ];
        for (value, slot) in toggles {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

fn clamp_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.max(MIN_INTERVAL_MS))
}

/// Shared, persisted handle to the current settings.
#[derive(Clone)]
pub struct SettingsHandle {
    store: Arc<Store>,
    current: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    /// Load persisted settings, falling back to defaults.
    pub fn load(store: Arc<Store>) -> Result<Self, DbError> {
        let settings = match store.get_setting(SETTINGS_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable stored settings: {}", e);
                Settings::default()
            }),
            None => Settings::default(),
        };

        Ok(Self {
            store,
            current: Arc::new(RwLock::new(settings)),
        })
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.current.read().unwrap().clone()
    }

    /// Apply `f` to the settings, persist the result and return it.
    pub fn update<F>(&self, f: F) -> Result<Settings, DbError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut current = self.current.write().unwrap();
        let mut next = current.clone();
        f(&mut next);

        self.store
            .put_setting(SETTINGS_KEY, &serde_json::to_string(&next)?)?;
        *current = next.clone();
        Ok(next)
    }
}
