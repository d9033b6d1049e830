//! Collector session: access token and device id.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::collector::{CollectorClient, CollectorError};
use crate::db::{DbError, Store};

const SESSION_KEY: &str = "session";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("login failed: {0}")]
    Login(#[from] CollectorError),
    #[error("session storage failed: {0}")]
    Storage(#[from] DbError),
}

/// Stored login state. Without a device id nothing is uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub device_id: Option<String>,
}

/// Persisted session, kept under a single settings key.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<Store>,
}

impl SessionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Current session; empty if never logged in or after logout.
    pub fn current(&self) -> Result<Session, DbError> {
        match self.store.get_setting(SESSION_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable stored session: {}", e);
                Session::default()
            })),
            None => Ok(Session::default()),
        }
    }

    pub fn save(&self, access_token: &str, device_id: &str) -> Result<Session, DbError> {
        let session = Session {
            access_token: Some(access_token.to_string()),
            device_id: Some(device_id.to_string()),
        };
        self.store
            .put_setting(SESSION_KEY, &serde_json::to_string(&session)?)?;
        Ok(session)
    }

    /// Forget the stored session (logout).
    pub fn clear(&self) -> Result<(), DbError> {
        self.store.delete_setting(SESSION_KEY)
    }

    /// Log in against the collector and persist the resulting session.
    ///
    /// A failed login leaves any previously stored session in place.
    pub async fn login(
        &self,
        collector: &CollectorClient,
        email: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        let creds = collector.login(email, password).await?;
        let session = self.save(&creds.access_token, &creds.device_id)?;
        tracing::info!("Logged in as device {}", creds.device_id);
        Ok(session)
    }
}
