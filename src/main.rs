//! SignalTrail - network diagnostics and telemetry sync agent.
//!
//! Periodically samples radio/location state, runs a suite of network
//! probes, stores both locally and uploads them to a remote collector.

mod collector;
mod config;
mod db;
mod probe;
mod radio;
mod scheduler;
mod session;
mod settings;
mod status;
mod sync;
mod web;

use collector::CollectorClient;
use config::AgentConfig;
use db::Store;
use probe::{DeliveryReports, NoSmsGateway, ProbeSuite, ProbeTargets};
use radio::{LocationFeed, LocationFix, NoRadio, Sampler};
use scheduler::{RoutineContext, Scheduler};
use session::SessionStore;
use settings::SettingsHandle;
use status::StatusBoard;
use sync::SyncClient;
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("signaltrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = AgentConfig::load();
    tracing::info!("Starting SignalTrail, collector at {}", cfg.server_url);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized (schema version {})", store.schema_version()?);

    let settings = SettingsHandle::load(store.clone())?;
    let sessions = SessionStore::new(store.clone());
    let collector = CollectorClient::new(&cfg.server_url, cfg.request_timeout)?;

    if sessions.current()?.device_id.is_none() {
        match (&cfg.email, &cfg.password) {
            (Some(email), Some(password)) => {
                if let Err(e) = sessions.login(&collector, email, password).await {
                    tracing::warn!("Login failed, uploads are paused until a login succeeds: {}", e);
                }
            }
            _ => tracing::warn!("No session and no credentials configured; uploads are paused"),
        }
    }

    // Platform collaborators
    let location = LocationFeed::new(settings.get().sample_interval());
    if let (Some(latitude), Some(longitude)) = (cfg.latitude, cfg.longitude) {
        location.publish(LocationFix {
            latitude,
            longitude,
            captured_at: chrono::Utc::now(),
        });
        tracing::info!("Using fixed position {}, {}", latitude, longitude);
    }
    let sampler = Sampler::new(location, Arc::new(NoRadio));

    let suite = ProbeSuite::new(
        ProbeTargets {
            throughput_url: cfg.throughput_url.clone(),
            dns_domain: cfg.dns_domain.clone(),
            sms_number: cfg.sms_number.clone(),
            sms_text: cfg.sms_text.clone(),
        },
        cfg.request_timeout,
        Arc::new(NoSmsGateway),
        DeliveryReports::default(),
    );

    let status = StatusBoard::new();
    let scheduler = Scheduler::new(RoutineContext {
        settings: settings.clone(),
        store: store.clone(),
        sampler,
        suite,
        sync: SyncClient::new(collector.clone(), store.clone(), sessions.clone()),
        collector: collector.clone(),
        status: status.clone(),
    });

    // Start scheduler
    scheduler.start().await;

    // Start web server
    let server = Server::new(
        cfg.http_port,
        AppState {
            store,
            settings,
            sessions,
            collector,
            scheduler: scheduler.clone(),
            status,
        },
    );
    server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    scheduler.shutdown().await;

    Ok(())
}
