use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

/// How long a replaced model server gets to exit after SIGTERM before the
/// whole process group is killed.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Handle to the one external model server instance.
///
/// The launcher script typically spawns the real inference engine as a
/// child, so teardown must cover the whole process group, not just the
/// direct child.
struct ServerProcess {
    child: Child,
    pid: u32,
    generation: u64,
}

impl ServerProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process group to exit.
    fn terminate(&mut self) {
        #[cfg(unix)]
        signal_group(self.pid, libc::SIGTERM);
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }

    /// Kill the process group outright and reap the direct child.
    async fn kill_tree(&mut self) {
        #[cfg(unix)]
        signal_group(self.pid, libc::SIGKILL);
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
        let _ = self.child.wait().await;
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: i32) {
    // Negative pid addresses the whole group; the child was spawned with
    // process_group(0) so its descendants share it.
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

/// Owns the lifecycle of the external model server: at most one process at a
/// time, replaced under a single lock, with generation-tagged readiness.
///
/// Readiness is "ready_generation equals the current generation". Bumping the
/// generation therefore makes the system not-ready without touching the flag,
/// and a prober left over from a superseded launch can only ever store a
/// generation that no longer compares equal.
pub struct Supervisor {
    process: Mutex<Option<ServerProcess>>,
    generation: AtomicU64,
    ready_generation: AtomicU64,
    launcher: PathBuf,
    log_dir: PathBuf,
    health_url: String,
    client: reqwest::Client,
}

impl Supervisor {
    pub fn new(launcher: PathBuf, log_dir: PathBuf, health_url: String) -> Self {
        Self {
            process: Mutex::new(None),
            generation: AtomicU64::new(0),
            ready_generation: AtomicU64::new(0),
            launcher,
            log_dir,
            health_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        let gen = self.generation.load(Ordering::SeqCst);
        gen != 0 && self.ready_generation.load(Ordering::SeqCst) == gen
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Record a healthy probe result for `generation`. Returns false when the
    /// launch has been superseded, in which case nothing is recorded.
    pub fn mark_ready(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        // A replace racing past the check above bumps the generation first,
        // so a stale store here can never compare equal in is_ready().
        self.ready_generation.store(generation, Ordering::SeqCst);
        true
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn health_url(&self) -> &str {
        &self.health_url
    }

    /// Replace the running model server with one bound to `artifact_path`.
    /// Returns immediately; teardown and launch happen on a spawned task.
    pub fn start_or_replace(self: Arc<Self>, artifact_path: PathBuf) {
        tokio::spawn(async move {
            self.replace_now(artifact_path).await;
        });
    }

    /// The teardown+launch critical section. Failures are logged, never
    /// returned: a missing launcher leaves the system not-running.
    pub(crate) async fn replace_now(self: Arc<Self>, artifact_path: PathBuf) {
        let mut slot = self.process.lock().await;

        // New generation first: in-flight chat requests observe not-ready
        // from this point on.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(mut old) = slot.take() {
            if old.is_alive() {
                info!(pid = old.pid, generation = old.generation, "terminating model server");
                old.terminate();
                if timeout(GRACE_PERIOD, old.child.wait()).await.is_err() {
                    warn!(pid = old.pid, "model server ignored SIGTERM, killing process tree");
                    old.kill_tree().await;
                }
            }
        }

        if !self.launcher.exists() {
            warn!(launcher = %self.launcher.display(), "launcher not found, model server not started");
            return;
        }

        match self.spawn_server(&artifact_path, generation) {
            Ok(proc) => {
                *slot = Some(proc);
                drop(slot);
                let sup = self.clone();
                tokio::spawn(async move {
                    crate::probe::probe_until_ready(sup, generation).await;
                });
            }
            Err(e) => warn!("failed to launch model server: {e:#}"),
        }
    }

    fn spawn_server(&self, artifact_path: &Path, generation: u64) -> Result<ServerProcess> {
        let abs = artifact_path
            .canonicalize()
            .unwrap_or_else(|_| artifact_path.to_path_buf());

        let mut cmd = Command::new(&self.launcher);
        cmd.arg(&abs)
            .stdin(Stdio::null())
            .stdout(Stdio::from(self.open_log("stdout.log")?))
            .stderr(Stdio::from(self.open_log("stderr.log")?));
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.launcher.display()))?;
        let pid = child.id().context("spawned model server has no pid")?;

        info!(pid, generation, artifact = %abs.display(), "model server launched");
        Ok(ServerProcess { child, pid, generation })
    }

    fn open_log(&self, name: &str) -> Result<std::fs::File> {
        std::fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(name);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))
    }

    /// Terminal cleanup: tear down the current model server if alive.
    pub async fn shutdown(&self) {
        let mut slot = self.process.lock().await;
        if let Some(mut proc) = slot.take() {
            if proc.is_alive() {
                info!(pid = proc.pid, "shutdown: terminating model server");
                proc.terminate();
                if timeout(GRACE_PERIOD, proc.child.wait()).await.is_err() {
                    proc.kill_tree().await;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[cfg(test)]
    async fn live_pid(&self) -> Option<u32> {
        let mut slot = self.process.lock().await;
        match slot.as_mut() {
            Some(proc) => {
                if proc.is_alive() {
                    Some(proc.pid)
                } else {
                    None
                }
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_supervisor(launcher: &str) -> Arc<Supervisor> {
        let log_dir = std::env::temp_dir().join(format!("gateway-test-logs-{}", std::process::id()));
        Arc::new(Supervisor::new(
            PathBuf::from(launcher),
            log_dir,
            // Nothing listens here; probes spin harmlessly in the background.
            "http://127.0.0.1:9/health".to_string(),
        ))
    }

    #[tokio::test]
    async fn not_ready_before_any_launch() {
        let sup = test_supervisor("/nonexistent/launcher.sh");
        assert!(!sup.is_ready());
        assert_eq!(sup.current_generation(), 0);
    }

    #[tokio::test]
    async fn stale_prober_cannot_mark_newer_generation_ready() {
        let sup = test_supervisor("/nonexistent/launcher.sh");
        let gen1 = sup.bump_generation();
        let gen2 = sup.bump_generation();

        // Probe result from the superseded launch arrives late.
        assert!(!sup.mark_ready(gen1));
        assert!(!sup.is_ready());

        assert!(sup.mark_ready(gen2));
        assert!(sup.is_ready());
    }

    #[tokio::test]
    async fn replace_clears_readiness_immediately() {
        let sup = test_supervisor("/nonexistent/launcher.sh");
        let gen1 = sup.bump_generation();
        assert!(sup.mark_ready(gen1));
        assert!(sup.is_ready());

        sup.bump_generation();
        assert!(!sup.is_ready());
    }

    #[tokio::test]
    async fn missing_launcher_leaves_system_not_running() {
        let sup = test_supervisor("/nonexistent/launcher.sh");
        sup.clone().replace_now(PathBuf::from("/tmp/model.gguf")).await;

        assert_eq!(sup.current_generation(), 1);
        assert!(!sup.is_ready());
        assert!(sup.live_pid().await.is_none());
    }

    #[cfg(unix)]
    fn write_fake_launcher(name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("gateway-launcher-{}-{name}.sh", std::process::id()));
        std::fs::write(&path, "#!/bin/sh\nsleep 60\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn replace_kills_previous_process() {
        let launcher = write_fake_launcher("replace");
        let sup = test_supervisor(launcher.to_str().unwrap());

        sup.clone().replace_now(PathBuf::from("/tmp/a.gguf")).await;
        let first = sup.live_pid().await.expect("first launch alive");

        sup.clone().replace_now(PathBuf::from("/tmp/b.gguf")).await;
        let second = sup.live_pid().await.expect("second launch alive");
        assert_ne!(first, second);

        sup.shutdown().await;
        assert!(sup.live_pid().await.is_none());
        let _ = std::fs::remove_file(&launcher);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_replaces_quiesce_to_one_process() {
        let launcher = write_fake_launcher("concurrent");
        let sup = test_supervisor(launcher.to_str().unwrap());

        tokio::join!(
            sup.clone().replace_now(PathBuf::from("/tmp/a.gguf")),
            sup.clone().replace_now(PathBuf::from("/tmp/b.gguf")),
            sup.clone().replace_now(PathBuf::from("/tmp/c.gguf")),
        );

        assert_eq!(sup.current_generation(), 3);
        assert!(sup.live_pid().await.is_some());

        sup.shutdown().await;
        assert!(sup.live_pid().await.is_none());
        let _ = std::fs::remove_file(&launcher);
    }
}
