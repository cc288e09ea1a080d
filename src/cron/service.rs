//! Cron service: job CRUD, persistence and the timer task.

use futures_util::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::schedule::{compute_next_run, validate_schedule};
use super::types::{
    CronJob, CronJobState, CronPayload, CronSchedule, CronStatus, CronStore, JobStatus, PayloadKind,
    CRON_STORE_VERSION,
};
use super::CronError;
use crate::utils::{now_ms, panic_message, short_id};

/// Longest the ticker sleeps before re-checking the store
const MAX_SLEEP: Duration = Duration::from_secs(60);

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send>>;

/// Invoked for every fired job; an `Err` marks the run as failed
pub type JobCallback = Arc<dyn Fn(CronJob) -> JobFuture + Send + Sync>;

/// Request to create a job
#[derive(Debug, Clone)]
pub struct AddJob {
    pub name: String,
    pub schedule: CronSchedule,
    pub message: String,
    pub deliver: bool,
    pub channel: Option<String>,
    pub to: Option<String>,
    pub delete_after_run: bool,
}

impl AddJob {
    pub fn new(name: impl Into<String>, schedule: CronSchedule, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule,
            message: message.into(),
            deliver: false,
            channel: None,
            to: None,
            delete_after_run: false,
        }
    }

    /// Deliver the agent's response to `channel`/`to`
    pub fn deliver_to(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.deliver = true;
        self.channel = Some(channel.into());
        self.to = Some(to.into());
        self
    }

    pub fn delete_after_run(mut self) -> Self {
        self.delete_after_run = true;
        self
    }
}

pub struct CronService {
    store_path: PathBuf,
    /// Lazily loaded from `store_path`
    store: Mutex<Option<CronStore>>,
    on_job: RwLock<Option<JobCallback>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    ticker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl CronService {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store_path: store_path.into(),
            store: Mutex::new(None),
            on_job: RwLock::new(None),
            wake: Notify::new(),
            shutdown,
            ticker: parking_lot::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Register the handler run for each fired job
    pub fn set_on_job<F, Fut>(&self, handler: F)
    where
        F: Fn(CronJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        let callback: JobCallback = Arc::new(move |job| Box::pin(handler(job)));
        *self.on_job.write() = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load the store, recompute next runs and start the ticker
    pub async fn start(self: &Arc<Self>) -> Result<(), CronError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let job_count = {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            let now = now_ms();
            for job in store.jobs.iter_mut().filter(|j| j.enabled) {
                job.state.next_run_at_ms = compute_next_run(&job.schedule, now);
            }
            if let Err(e) = save_store(&self.store_path, store).await {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
            store.jobs.len()
        };

        self.shutdown.send_replace(false);
        let rx = self.shutdown.subscribe();
        let handle = tokio::spawn(Arc::clone(self).run_ticker(rx));
        *self.ticker.lock() = Some(handle);

        info!("Cron service started with {} jobs", job_count);
        Ok(())
    }

    /// Stop the ticker and wait for it to exit
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        let handle = self.ticker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Cron ticker ended abnormally: {}", e);
            }
        }
        info!("Cron service stopped");
    }

    pub async fn add_job(&self, request: AddJob) -> Result<CronJob, CronError> {
        validate_schedule(&request.schedule)?;

        let now = now_ms();
        let next_run = compute_next_run(&request.schedule, now);
        if next_run.is_none() {
            warn!("Cron job '{}' has no future run time", request.name);
        }

        let job = CronJob {
            id: short_id(),
            name: request.name,
            enabled: true,
            schedule: request.schedule,
            payload: CronPayload {
                kind: PayloadKind::AgentTurn,
                message: request.message,
                deliver: request.deliver,
                channel: request.channel,
                to: request.to,
            },
            state: CronJobState {
                next_run_at_ms: next_run,
                ..Default::default()
            },
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run: request.delete_after_run,
        };

        {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            store.jobs.push(job.clone());
            if let Err(e) = save_store(&self.store_path, store).await {
                store.jobs.pop();
                return Err(e);
            }
        }
        self.wake.notify_one();

        info!("Cron: added job '{}' ({})", job.name, job.id);
        Ok(job)
    }

    /// Returns whether a job was removed
    pub async fn remove_job(&self, id: &str) -> Result<bool, CronError> {
        let removed = {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            let before = store.jobs.len();
            store.jobs.retain(|j| j.id != id);
            let removed = store.jobs.len() < before;
            if removed {
                save_store(&self.store_path, store).await?;
            }
            removed
        };

        if removed {
            self.wake.notify_one();
            info!("Cron: removed job {}", id);
        }
        Ok(removed)
    }

    /// Enable or disable a job, returning the updated job
    pub async fn enable_job(&self, id: &str, enabled: bool) -> Result<Option<CronJob>, CronError> {
        let updated = {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            let Some(job) = store.jobs.iter_mut().find(|j| j.id == id) else {
                return Ok(None);
            };
            let now = now_ms();
            job.enabled = enabled;
            job.updated_at_ms = now;
            job.state.next_run_at_ms = if enabled {
                compute_next_run(&job.schedule, now)
            } else {
                None
            };
            let updated = job.clone();
            save_store(&self.store_path, store).await?;
            updated
        };

        self.wake.notify_one();
        Ok(Some(updated))
    }

    /// Jobs ordered by next run, unscheduled last
    pub async fn list_jobs(&self, include_disabled: bool) -> Vec<CronJob> {
        let mut guard = self.store.lock().await;
        let store = self.loaded(&mut guard).await;
        let mut jobs: Vec<CronJob> = store
            .jobs
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(i64::MAX));
        jobs
    }

    pub async fn get_job(&self, id: &str) -> Option<CronJob> {
        let mut guard = self.store.lock().await;
        let store = self.loaded(&mut guard).await;
        store.jobs.iter().find(|j| j.id == id).cloned()
    }

    /// Run a job now. Disabled jobs only run with `force`.
    pub async fn run_job(&self, id: &str, force: bool) -> Result<bool, CronError> {
        let job = {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            match store.jobs.iter().find(|j| j.id == id) {
                Some(job) if force || job.enabled => job.clone(),
                _ => return Ok(false),
            }
        };

        self.execute_job(job).await;

        {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            save_store(&self.store_path, store).await?;
        }
        self.wake.notify_one();
        Ok(true)
    }

    pub async fn status(&self) -> CronStatus {
        let mut guard = self.store.lock().await;
        let store = self.loaded(&mut guard).await;
        CronStatus {
            enabled: self.is_running(),
            jobs: store.jobs.len(),
            next_wake_at_ms: earliest_run(store),
        }
    }

    async fn loaded<'a>(&self, slot: &'a mut Option<CronStore>) -> &'a mut CronStore {
        if slot.is_none() {
            *slot = Some(load_store(&self.store_path).await);
        }
        slot.get_or_insert_with(CronStore::default)
    }

    async fn next_wake(&self) -> Option<i64> {
        let mut guard = self.store.lock().await;
        let store = self.loaded(&mut guard).await;
        earliest_run(store)
    }

    async fn run_ticker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("Cron ticker started");
        loop {
            let delay = match self.next_wake().await {
                Some(at) => Duration::from_millis((at - now_ms()).max(0) as u64).min(MAX_SLEEP),
                None => MAX_SLEEP,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.run_due_jobs().await;
                }
                _ = self.wake.notified() => {
                    debug!("Cron ticker re-armed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Cron ticker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_due_jobs(&self) {
        let now = now_ms();
        let due: Vec<CronJob> = {
            let mut guard = self.store.lock().await;
            let store = self.loaded(&mut guard).await;
            store
                .jobs
                .iter()
                .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|at| at <= now))
                .cloned()
                .collect()
        };
        if due.is_empty() {
            return;
        }

        for job in due {
            self.execute_job(job).await;
        }

        let mut guard = self.store.lock().await;
        let store = self.loaded(&mut guard).await;
        if let Err(e) = save_store(&self.store_path, store).await {
            error!("Failed to save cron store: {}", e);
        }
    }

    /// Invoke the callback without holding the store lock, then record the outcome
    async fn execute_job(&self, job: CronJob) {
        let started = now_ms();
        info!("Cron: executing job '{}' ({})", job.name, job.id);

        let callback = self.on_job.read().clone();
        let (status, last_error) = match callback {
            Some(callback) => match AssertUnwindSafe(callback(job.clone())).catch_unwind().await {
                Ok(Ok(_)) => (JobStatus::Ok, None),
                Ok(Err(e)) => {
                    warn!("Cron job '{}' failed: {}", job.name, e);
                    (JobStatus::Error, Some(e.to_string()))
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    error!("Cron job '{}' panicked: {}", job.name, msg);
                    (JobStatus::Error, Some(format!("panicked: {}", msg)))
                }
            },
            None => {
                debug!("No cron handler registered, skipping job {}", job.id);
                (JobStatus::Skipped, None)
            }
        };

        let mut guard = self.store.lock().await;
        let store = self.loaded(&mut guard).await;
        record_run(store, &job.id, started, status, last_error);
    }
}

/// Apply a finished run to the stored job. A job removed meanwhile is left alone.
fn record_run(store: &mut CronStore, id: &str, started: i64, status: JobStatus, last_error: Option<String>) {
    let Some(idx) = store.jobs.iter().position(|j| j.id == id) else {
        return;
    };

    let job = &mut store.jobs[idx];
    job.state.last_run_at_ms = Some(started);
    job.state.last_status = Some(status);
    job.state.last_error = last_error;
    job.updated_at_ms = now_ms();

    let next_run = match &job.schedule {
        CronSchedule::At { .. } => {
            job.enabled = false;
            None
        }
        CronSchedule::Every { every_ms } => started.checked_add(*every_ms),
        CronSchedule::Cron { .. } => compute_next_run(&job.schedule, now_ms()),
    };
    job.state.next_run_at_ms = next_run;

    if matches!(job.schedule, CronSchedule::At { .. }) && job.delete_after_run {
        store.jobs.remove(idx);
    }
}

fn earliest_run(store: &CronStore) -> Option<i64> {
    store
        .jobs
        .iter()
        .filter(|j| j.enabled)
        .filter_map(|j| j.state.next_run_at_ms)
        .min()
}

/// Missing or unreadable stores start empty
async fn load_store(path: &Path) -> CronStore {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CronStore::default(),
        Err(e) => {
            warn!("Failed to read cron store {}: {}", path.display(), e);
            return CronStore::default();
        }
    };

    match serde_json::from_str::<CronStore>(&text) {
        Ok(store) => {
            if store.version > CRON_STORE_VERSION {
                warn!(
                    "Cron store version {} is newer than supported {}",
                    store.version, CRON_STORE_VERSION
                );
            }
            store
        }
        Err(e) => {
            warn!("Failed to parse cron store {}: {}", path.display(), e);
            CronStore::default()
        }
    }
}

/// Write via a temp file and rename so readers never see a partial store
async fn save_store(path: &Path, store: &CronStore) -> Result<(), CronError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, schedule: CronSchedule) -> CronJob {
        CronJob {
            id: id.into(),
            name: id.into(),
            enabled: true,
            schedule,
            payload: CronPayload::default(),
            state: CronJobState::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
            delete_after_run: false,
        }
    }

    #[test]
    fn test_record_run_one_shot() {
        let mut store = CronStore::default();
        store.jobs.push(job("keep", CronSchedule::At { at_ms: 5 }));
        let mut doomed = job("drop", CronSchedule::At { at_ms: 5 });
        doomed.delete_after_run = true;
        store.jobs.push(doomed);

        record_run(&mut store, "keep", 10, JobStatus::Ok, None);
        record_run(&mut store, "drop", 10, JobStatus::Ok, None);

        assert_eq!(store.jobs.len(), 1);
        assert!(!store.jobs[0].enabled);
        assert_eq!(store.jobs[0].state.next_run_at_ms, None);
        assert_eq!(store.jobs[0].state.last_run_at_ms, Some(10));
    }

    #[test]
    fn test_record_run_every_anchors_on_start() {
        let mut store = CronStore::default();
        store.jobs.push(job("tick", CronSchedule::Every { every_ms: 1000 }));

        record_run(&mut store, "tick", 5_000, JobStatus::Error, Some("boom".into()));

        let state = &store.jobs[0].state;
        assert_eq!(state.next_run_at_ms, Some(6_000));
        assert_eq!(state.last_status, Some(JobStatus::Error));
        assert_eq!(state.last_error.as_deref(), Some("boom"));
        assert!(store.jobs[0].enabled);
    }

    #[test]
    fn test_record_run_missing_job_is_noop() {
        let mut store = CronStore::default();
        record_run(&mut store, "ghost", 1, JobStatus::Ok, None);
        assert!(store.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cron").join("jobs.json");
        let mut store = CronStore::default();
        store.jobs.push(job("a", CronSchedule::every_secs(60)));

        save_store(&path, &store).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_store(&path).await, store);
    }

    #[tokio::test]
    async fn test_corrupt_store_loads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_store(&path).await.jobs.is_empty());
    }
}
