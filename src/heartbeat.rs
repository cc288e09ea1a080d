//! Heartbeat Service
//!
//! Periodically wakes the agent to work through `HEARTBEAT.md` in the
//! workspace. Ticks with an empty or missing file are skipped without
//! calling the agent.

use anyhow::anyhow;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::panic::AssertUnwindSafe;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::utils::panic_message;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Prompt sent to the agent on each heartbeat
pub const HEARTBEAT_PROMPT: &str = "Read HEARTBEAT.md in your workspace (if it exists).\n\
Follow any instructions or tasks listed there.\n\
If nothing needs attention, reply with just: HEARTBEAT_OK";

/// Agent reply meaning "nothing to do"
pub const HEARTBEAT_OK_TOKEN: &str = "HEARTBEAT_OK";

/// Placeholder checkbox lines that carry no task
const EMPTY_CHECKBOXES: [&str; 4] = ["- [ ]", "* [ ]", "- [x]", "* [x]"];

pub type HeartbeatFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;
pub type HeartbeatCallback = Arc<dyn Fn(String) -> HeartbeatFuture + Send + Sync>;

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// No actionable content, or no handler registered
    Skipped,
    /// Agent answered HEARTBEAT_OK
    NothingToDo,
    WorkDone,
    Failed(String),
}

/// True when the file has nothing but headings, comments and empty checkboxes
pub fn is_heartbeat_empty(content: Option<&str>) -> bool {
    let Some(content) = content else {
        return true;
    };
    content.lines().map(str::trim).all(|line| {
        line.is_empty() || line.starts_with('#') || line.starts_with("<!--") || EMPTY_CHECKBOXES.contains(&line)
    })
}

/// Matches HEARTBEAT_OK ignoring case and underscores
pub fn is_heartbeat_ok(response: &str) -> bool {
    let token = HEARTBEAT_OK_TOKEN.replace('_', "");
    response.to_uppercase().replace('_', "").contains(&token)
}

pub struct HeartbeatService {
    workspace: PathBuf,
    interval: Duration,
    enabled: bool,
    on_heartbeat: RwLock<Option<HeartbeatCallback>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatService {
    pub fn new(workspace: impl Into<PathBuf>, interval: Duration, enabled: bool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            workspace: workspace.into(),
            interval,
            enabled,
            on_heartbeat: RwLock::new(None),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn set_on_heartbeat<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let callback: HeartbeatCallback = Arc::new(move |prompt| Box::pin(handler(prompt)));
        *self.on_heartbeat.write() = Some(callback);
    }

    pub fn heartbeat_file(&self) -> PathBuf {
        self.workspace.join(HEARTBEAT_FILE)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawn the timer task. Does nothing when disabled or already running.
    pub fn start(self: &Arc<Self>) {
        if !self.enabled {
            info!("Heartbeat disabled");
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        self.shutdown.send_replace(false);
        let rx = self.shutdown.subscribe();
        *task = Some(tokio::spawn(Arc::clone(self).run_loop(rx)));
        info!("Heartbeat started (every {}s)", self.interval.as_secs());
    }

    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Heartbeat timer ended abnormally: {}", e);
            }
            info!("Heartbeat stopped");
        }
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let HeartbeatOutcome::Failed(e) = self.tick().await {
                        error!("Heartbeat error: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Run one heartbeat check
    pub async fn tick(&self) -> HeartbeatOutcome {
        let content = read_heartbeat_file(&self.heartbeat_file()).await;
        if is_heartbeat_empty(content.as_deref()) {
            debug!("Heartbeat: no tasks (HEARTBEAT.md empty)");
            return HeartbeatOutcome::Skipped;
        }

        let Some(callback) = self.on_heartbeat.read().clone() else {
            return HeartbeatOutcome::Skipped;
        };

        info!("Heartbeat: checking for tasks...");
        match run_callback(&callback).await {
            Ok(response) if is_heartbeat_ok(&response) => {
                info!("Heartbeat: OK (no action needed)");
                HeartbeatOutcome::NothingToDo
            }
            Ok(_) => {
                info!("Heartbeat: completed task");
                HeartbeatOutcome::WorkDone
            }
            Err(e) => HeartbeatOutcome::Failed(e.to_string()),
        }
    }

    /// Fire the heartbeat regardless of file content
    pub async fn trigger_now(&self) -> anyhow::Result<Option<String>> {
        let callback = self.on_heartbeat.read().clone();
        match callback {
            Some(callback) => Ok(Some(run_callback(&callback).await?)),
            None => Ok(None),
        }
    }
}

/// Invoke the handler; a panic becomes an error so the timer survives it
async fn run_callback(callback: &HeartbeatCallback) -> anyhow::Result<String> {
    let call = async { callback(HEARTBEAT_PROMPT.to_string()).await };
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

/// Unreadable files count as absent
async fn read_heartbeat_file(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_heartbeat_empty() {
        assert!(is_heartbeat_empty(None));
        assert!(is_heartbeat_empty(Some("")));
        assert!(is_heartbeat_empty(Some("# Tasks\n\n<!-- add tasks below -->\n- [ ]\n* [x]\n")));
        assert!(!is_heartbeat_empty(Some("# Tasks\n- [ ] water the plants\n")));
        assert!(!is_heartbeat_empty(Some("check the inbox")));
    }

    #[test]
    fn test_is_heartbeat_ok() {
        assert!(is_heartbeat_ok("HEARTBEAT_OK"));
        assert!(is_heartbeat_ok("all quiet. heartbeat ok"));
        assert!(is_heartbeat_ok("HeartbeatOK"));
        assert!(!is_heartbeat_ok("Watered the plants."));
    }
}
