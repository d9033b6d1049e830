//! Scheduler module for the four periodic routines.
//!
//! Poll fetches the collector configuration, Sample records radio/location
//! samples, Probe runs the diagnostic suite and Sync uploads the outboxes.
//! Sample, Probe and Sync keep the interval they were launched with; the poll
//! routine restarts whichever of them had its interval changed.

use crate::collector::CollectorClient;
use crate::db::Store;
use crate::probe::ProbeSuite;
use crate::radio::Sampler;
use crate::settings::{Settings, SettingsHandle};
use crate::status::{StatusBoard, StatusReporter};
use crate::sync::SyncClient;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinError, JoinHandle};

type TickResult = Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>;

/// One of the periodic routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Routine {
    Poll,
    Sample,
    Probe,
    Sync,
}

impl Routine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Routine::Poll => "poll",
            Routine::Sample => "sample",
            Routine::Probe => "probe",
            Routine::Sync => "sync",
        }
    }

    /// The settings interval that governs this routine.
    pub fn interval(&self, settings: &Settings) -> Duration {
        match self {
            Routine::Poll => settings.poll_interval(),
            Routine::Sample => settings.sample_interval(),
            Routine::Probe => settings.test_interval(),
            Routine::Sync => settings.sync_interval(),
        }
    }
}

/// Routines whose governing interval differs between `old` and `new`.
///
/// The poll routine re-reads its interval every cycle and is never listed.
pub fn changed_routines(old: &Settings, new: &Settings) -> Vec<Routine> {
    [Routine::Sample, Routine::Probe, Routine::Sync]
        .into_iter()
        .filter(|r| r.interval(old) != r.interval(new))
        .collect()
}

/// Everything a routine body needs.
#[derive(Clone)]
pub struct RoutineContext {
    pub settings: SettingsHandle,
    pub store: Arc<Store>,
    pub sampler: Sampler,
    pub suite: ProbeSuite,
    pub sync: SyncClient,
    pub collector: CollectorClient,
    pub status: StatusBoard,
}

/// A running routine as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineInfo {
    pub routine: Routine,
    pub generation: u64,
    pub interval_ms: u64,
}

struct RunningRoutine {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
    generation: u64,
    interval: Duration,
}

struct Inner {
    ctx: RoutineContext,
    running: Mutex<HashMap<Routine, RunningRoutine>>,
    generation: AtomicU64,
}

/// Owns the lifecycle of the routine tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(ctx: RoutineContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                running: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start all four routines.
    pub async fn start(&self) {
        tracing::info!("Starting scheduler");
        self.start_routines().await;
        self.start_polling().await;
    }

    /// Start the sample, probe and sync routines if they are not running.
    pub async fn start_routines(&self) {
        let mut running = self.inner.running.lock().await;
        for routine in [Routine::Sample, Routine::Probe, Routine::Sync] {
            if !running.contains_key(&routine) {
                self.launch(&mut running, routine);
            }
        }
    }

    /// Start the configuration poll routine if it is not running.
    pub async fn start_polling(&self) {
        let mut running = self.inner.running.lock().await;
        if !running.contains_key(&Routine::Poll) {
            self.launch(&mut running, Routine::Poll);
        }
    }

    /// Stop `routine`, wait for it to finish and launch it again with the
    /// current settings.
    ///
    /// Runs under the scheduler lock, so two instances never overlap. Must not
    /// be called from the routine's own tick.
    pub async fn restart(&self, routine: Routine) -> RoutineInfo {
        let mut running = self.inner.running.lock().await;

        if let Some(current) = running.remove(&routine) {
            stop_routine(routine, current).await;
        }

        self.launch(&mut running, routine)
    }

    /// Snapshot of the running routines.
    pub async fn routines(&self) -> Vec<RoutineInfo> {
        let running = self.inner.running.lock().await;
        let mut infos: Vec<RoutineInfo> = running
            .iter()
            .map(|(routine, r)| RoutineInfo {
                routine: *routine,
                generation: r.generation,
                interval_ms: r.interval.as_millis() as u64,
            })
            .collect();
        infos.sort_by_key(|i| i.routine);
        infos
    }

    /// Cancel every routine, waiting for in-flight ticks to wind down.
    pub async fn shutdown(&self) {
        let mut running = self.inner.running.lock().await;
        for (routine, current) in running.drain() {
            stop_routine(routine, current).await;
        }
        tracing::info!("Scheduler stopped");
    }

    fn launch(&self, running: &mut HashMap<Routine, RunningRoutine>, routine: Routine) -> RoutineInfo {
        let ctx = self.inner.ctx.clone();
        let interval = routine.interval(&ctx.settings.get());
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        if routine == Routine::Sample {
            ctx.sampler.location().set_min_interval(interval);
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(run_routine_loop(routine, interval, ctx, weak, stop_rx));

        tracing::info!(
            "Scheduler: started {} routine (generation {}, every {:?})",
            routine.as_str(),
            generation,
            interval
        );

        running.insert(
            routine,
            RunningRoutine {
                stop_tx,
                handle,
                generation,
                interval,
            },
        );

        RoutineInfo {
            routine,
            generation,
            interval_ms: interval.as_millis() as u64,
        }
    }
}

async fn stop_routine(routine: Routine, current: RunningRoutine) {
    let _ = current.stop_tx.send(());
    if let Err(e) = current.handle.await {
        tracing::error!("Routine {} ended abnormally: {}", routine.as_str(), e);
    }
    tracing::info!("Scheduler: stopped {} routine", routine.as_str());
}

/// Run body, sleep, repeat until stopped.
///
/// Each tick runs as its own task so a panic surfaces as a `JoinError`
/// instead of taking the routine down. On stop the in-flight tick is aborted
/// and awaited, so the loop only returns once no body of this routine is
/// still running.
async fn run_routine_loop(
    routine: Routine,
    interval: Duration,
    ctx: RoutineContext,
    scheduler: Weak<Inner>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let reporter = ctx.status.reporter(routine);

    loop {
        let mut tick = TickTask(tokio::spawn(run_tick(routine, ctx.clone(), scheduler.clone())));

        let outcome = tokio::select! {
            _ = stop_rx.recv() => {
                tick.cancel().await;
                break;
            }
            outcome = &mut tick.0 => outcome,
        };
        report(&reporter, outcome);

        let pause = match routine {
            Routine::Poll => ctx.settings.get().poll_interval(),
            _ => interval,
        };

        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Spawned tick body. Aborted if dropped while still running.
struct TickTask<T>(JoinHandle<T>);

impl<T> TickTask<T> {
    /// Abort the tick and wait until it has actually finished.
    async fn cancel(&mut self) {
        self.0.abort();
        if let Err(e) = (&mut self.0).await {
            if e.is_panic() {
                tracing::error!("Tick panicked while stopping: {}", e);
            }
        }
    }
}

impl<T> Drop for TickTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn report(reporter: &StatusReporter, outcome: Result<TickResult, JoinError>) {
    let name = reporter.routine().as_str();
    match outcome {
        Ok(Ok(detail)) => {
            if let Some(detail) = &detail {
                tracing::debug!("{} tick: {}", name, detail);
            }
            reporter.succeeded(detail);
        }
        Ok(Err(e)) => {
            tracing::warn!("{} tick failed: {}", name, e);
            reporter.failed(e.to_string());
        }
        Err(e) => {
            tracing::error!("{} tick aborted: {}", name, e);
            reporter.failed(format!("tick aborted: {}", e));
        }
    }
}

async fn run_tick(routine: Routine, ctx: RoutineContext, scheduler: Weak<Inner>) -> TickResult {
    match routine {
        Routine::Poll => poll_tick(&ctx, scheduler).await,
        Routine::Sample => sample_tick(&ctx),
        Routine::Probe => probe_tick(&ctx).await,
        Routine::Sync => sync_tick(&ctx).await,
    }
}

async fn poll_tick(ctx: &RoutineContext, scheduler: Weak<Inner>) -> TickResult {
    let remote = ctx.collector.fetch_config().await?;

    let old = ctx.settings.get();
    let new = ctx.settings.update(|s| s.apply_remote(&remote))?;
    let changed = changed_routines(&old, &new);

    if changed.is_empty() {
        return Ok(Some("configuration unchanged".to_string()));
    }

    if let Some(inner) = scheduler.upgrade() {
        let scheduler = Scheduler { inner };
        for routine in &changed {
            scheduler.restart(*routine).await;
        }
    }

    let names: Vec<&str> = changed.iter().map(|r| r.as_str()).collect();
    Ok(Some(format!("restarted {}", names.join(", "))))
}

fn sample_tick(ctx: &RoutineContext) -> TickResult {
    match ctx.sampler.sample() {
        Some(sample) => {
            let id = ctx.store.append_sample(&sample)?;
            Ok(Some(format!("stored sample {}", id)))
        }
        None => Ok(Some("waiting for a location fix".to_string())),
    }
}

async fn probe_tick(ctx: &RoutineContext) -> TickResult {
    let settings = ctx.settings.get();
    let fix = ctx.sampler.location().latest();

    let result = ctx.suite.run(&settings, fix).await;
    let id = ctx.store.append_probe_result(&result)?;

    if result.has_failed_run() {
        Ok(Some(format!("stored result {} with failed probes", id)))
    } else {
        Ok(Some(format!("stored result {}", id)))
    }
}

async fn sync_tick(ctx: &RoutineContext) -> TickResult {
    let report = ctx.sync.sync_once().await?;
    Ok(Some(format!(
        "uploaded {} samples and {} results",
        report.samples, report.probe_results
    )))
}
