// src/supervisor.rs
// Keeps exactly one worker process alive.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::SupervisorSettings;

/// How a worker run ended. `code` is `None` when the process was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
}

/// Starts one worker and resolves when it has exited.
#[async_trait]
pub trait WorkerLauncher: Send {
    async fn run_worker(&mut self) -> io::Result<WorkerExit>;
}

/// Flag the supervisor passes to its workers. A worker started with it exits once its
/// stdin pipe closes, which happens when the supervisor is gone however it died.
pub const SUPERVISED_FLAG: &str = "--supervised";

/// Runs `<program> [--config <path>] worker --supervised` as a child process.
/// The child's stdin is a pipe held open for as long as the child is awaited.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Re-invokes the running binary in worker mode.
    pub fn current_exe(config_path: Option<&std::path::Path>) -> io::Result<Self> {
        let mut args = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args.push("worker".to_string());
        args.push(SUPERVISED_FLAG.to_string());

        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn run_worker(&mut self) -> io::Result<WorkerExit> {
        // Dropping the future (supervisor shutdown) kills the child.
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let _parent_pipe = child.stdin.take();

        info!(pid = ?child.id(), "Worker started");
        let status = child.wait().await?;
        Ok(WorkerExit { code: status.code() })
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}

/// Delay before the next start. A worker that stayed up for `stable_after` is restarted
/// at once; one that died sooner is crash looping and waits with exponential backoff.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for RestartPolicy {
    fn from(settings: &SupervisorSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            stable_after: Duration::from_secs(settings.stable_after_secs),
        }
    }
}

impl RestartPolicy {
    /// Restart immediately, always.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            stable_after: Duration::ZERO,
        }
    }
}

struct Backoff {
    policy: RestartPolicy,
    next: Duration,
}

impl Backoff {
    fn new(policy: RestartPolicy) -> Self {
        let next = policy.initial_delay;
        Self { policy, next }
    }

    fn after_exit(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.policy.stable_after {
            self.next = self.policy.initial_delay;
            return Duration::ZERO;
        }

        let base = self.next;
        self.next = std::cmp::min(base * 2, self.policy.max_delay);

        // +/-15% jitter
        let base_ms = base.as_millis() as f64;
        let jitter = (rand::random::<f64>() * 0.3 - 0.15) * base_ms;
        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

pub struct Supervisor<L: WorkerLauncher> {
    launcher: L,
    policy: RestartPolicy,
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, policy: RestartPolicy) -> Self {
        Self { launcher, policy }
    }

    /// Launches workers until `shutdown` resolves. Returns how many were started.
    pub async fn run<F>(mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let mut backoff = Backoff::new(self.policy.clone());
        let mut launches = 0u64;

        loop {
            launches += 1;
            let started = Instant::now();

            let exit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping worker");
                    return launches;
                }
                exit = self.launcher.run_worker() => exit,
            };

            match exit {
                Ok(WorkerExit { code }) => warn!(worker = launches, code = ?code, "Worker {} died..", launches),
                Err(e) => error!(worker = launches, "Failed to start worker: {}", e),
            }

            let delay = backoff.after_exit(started.elapsed());
            if !delay.is_zero() {
                info!("Waiting {}ms before restarting worker", delay.as_millis());
                tokio::select! {
                    biased;
                    _ = &mut shutdown => return launches,
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::oneshot;

    /// Plays back exits, then signals the test and blocks like a healthy worker.
    struct ScriptedLauncher {
        exits: VecDeque<io::Result<WorkerExit>>,
        run_for: Duration,
        done: Option<oneshot::Sender<()>>,
    }

    impl ScriptedLauncher {
        fn new(exits: Vec<io::Result<WorkerExit>>, done: oneshot::Sender<()>) -> Self {
            Self {
                exits: exits.into(),
                run_for: Duration::ZERO,
                done: Some(done),
            }
        }
    }

    #[async_trait]
    impl WorkerLauncher for ScriptedLauncher {
        async fn run_worker(&mut self) -> io::Result<WorkerExit> {
            match self.exits.pop_front() {
                Some(exit) => {
                    sleep(self.run_for).await;
                    exit
                }
                None => {
                    if let Some(done) = self.done.take() {
                        let _ = done.send(());
                    }
                    std::future::pending().await
                }
            }
        }
    }

    fn exit(code: Option<i32>) -> io::Result<WorkerExit> {
        Ok(WorkerExit { code })
    }

    #[tokio::test]
    async fn restarts_after_any_exit() {
        let (done_tx, done_rx) = oneshot::channel();
        let launcher = ScriptedLauncher::new(
            vec![
                exit(Some(0)),
                exit(Some(1)),
                exit(None),
                Err(io::Error::new(io::ErrorKind::NotFound, "no such binary")),
            ],
            done_tx,
        );

        let launches = Supervisor::new(launcher, RestartPolicy::immediate())
            .run(async {
                let _ = done_rx.await;
            })
            .await;

        // four scripted exits plus the worker still running at shutdown
        assert_eq!(launches, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_loop_backs_off_within_bounds() {
        let (done_tx, done_rx) = oneshot::channel();
        let launcher = ScriptedLauncher::new(vec![exit(Some(1)), exit(Some(1)), exit(Some(1))], done_tx);
        let policy = RestartPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(800),
            stable_after: Duration::from_secs(10),
        };

        let started = Instant::now();
        let launches = Supervisor::new(launcher, policy)
            .run(async {
                let _ = done_rx.await;
            })
            .await;
        let elapsed = started.elapsed();

        assert_eq!(launches, 4);
        // 500 + 800 + 800 ms, each within +/-15%
        assert!(elapsed >= Duration::from_millis(1_785), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2_415), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn long_lived_worker_restarts_immediately() {
        let (done_tx, done_rx) = oneshot::channel();
        let mut launcher = ScriptedLauncher::new(vec![exit(Some(0)), exit(Some(0))], done_tx);
        launcher.run_for = Duration::from_secs(60);
        let policy = RestartPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            stable_after: Duration::from_secs(30),
        };

        let started = Instant::now();
        Supervisor::new(launcher, policy)
            .run(async {
                let _ = done_rx.await;
            })
            .await;

        // only the two worker lifetimes, no restart delay
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(120), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(121), "{elapsed:?}");
    }

    fn sh(script: &str) -> ProcessLauncher {
        ProcessLauncher::new(PathBuf::from("sh"), vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn child_exit_codes_are_reported() {
        assert_eq!(sh("exit 3").run_worker().await.unwrap(), WorkerExit { code: Some(3) });
        assert_eq!(sh("exit 0").run_worker().await.unwrap(), WorkerExit { code: Some(0) });
    }

    #[tokio::test]
    async fn child_killed_by_a_signal_has_no_code() {
        assert_eq!(sh("kill -9 $$").run_worker().await.unwrap(), WorkerExit { code: None });
    }

    #[tokio::test]
    async fn child_stdin_stays_open_while_it_runs() {
        // `read` only returns on EOF or a line; the supervisor never writes one.
        let result = tokio::time::timeout(Duration::from_millis(300), sh("read line; exit 7").run_worker()).await;
        assert!(result.is_err(), "child saw EOF early: {:?}", result);
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let mut launcher = ProcessLauncher::new(PathBuf::from("/nonexistent/ledger-payer"), Vec::new());
        assert!(launcher.run_worker().await.is_err());
    }

    #[test]
    fn current_exe_starts_a_supervised_worker() {
        let launcher = ProcessLauncher::current_exe(Some(std::path::Path::new("/etc/payer.json"))).unwrap();
        assert_eq!(launcher.args, vec!["--config", "/etc/payer.json", "worker", SUPERVISED_FLAG]);
    }

    #[tokio::test]
    async fn relaunches_real_child_processes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("launches");
        // first run fails, second one stays up
        let script = format!(
            "echo x >> '{0}'; [ $(wc -l < '{0}') -ge 2 ] && exec sleep 30; exit 1",
            log.display()
        );

        let launches = Supervisor::new(sh(&script), RestartPolicy::immediate())
            .run(async {
                loop {
                    let started = std::fs::read_to_string(&log).map(|s| s.lines().count()).unwrap_or(0);
                    if started >= 2 {
                        break;
                    }
                    sleep(Duration::from_millis(20)).await;
                }
            })
            .await;

        assert_eq!(launches, 2);
    }

    #[test]
    fn backoff_grows_caps_and_resets() {
        let mut backoff = Backoff::new(RestartPolicy {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(3_000),
            stable_after: Duration::from_secs(30),
        });
        let quick = Duration::from_millis(10);

        let within = |d: Duration, ms: u64| {
            let (lo, hi) = (ms * 85 / 100, ms * 115 / 100);
            (lo..=hi).contains(&(d.as_millis() as u64))
        };

        assert!(within(backoff.after_exit(quick), 1_000));
        assert!(within(backoff.after_exit(quick), 2_000));
        assert!(within(backoff.after_exit(quick), 3_000));
        assert!(within(backoff.after_exit(quick), 3_000));

        assert_eq!(backoff.after_exit(Duration::from_secs(31)), Duration::ZERO);
        assert!(within(backoff.after_exit(quick), 1_000));
    }
}
