//! Rebuild coalescing.
//!
//! Many producers (the startup scan, the `/rebuild` endpoint) may ask for a
//! site rebuild at about the same time. [`RebuildCoalescer`] folds them into
//! as few builder runs as possible while guaranteeing that every trigger is
//! followed by a build that starts after it:
//!
//! ```text
//!  trigger ──┐
//!  trigger ──┼──▶ leader: settle ─▶ build ─▶ settle ─▶ (pending?) ─▶ build ─▶ done
//!  trigger ──┘         ▲                        ▲
//!                      └── coalesced: set pending flag, return immediately
//! ```
//!
//! Never two builds at once. A failing or panicking builder is logged and the
//! coalescer stays usable.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RebuildError;

/// Default wait before a build so near-simultaneous triggers share it
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Default time limit for one builder run: 10 minutes
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// Site Builder
// =============================================================================

/// Something that regenerates the static site.
#[async_trait]
pub trait SiteBuilder: Send + Sync + 'static {
    /// Run one full build.
    async fn build(&self) -> Result<(), RebuildError>;
}

/// [`SiteBuilder`] that runs an external generator binary as
/// `{program} --source {source_dir} --destination {destination_dir}`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
    source_dir: PathBuf,
    destination_dir: PathBuf,
    timeout: Duration,
}

impl CommandBuilder {
    /// Create a builder with the default timeout.
    pub fn new(
        program: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }

    /// Set the time limit for one run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--source")
            .arg(&self.source_dir)
            .arg("--destination")
            .arg(&self.destination_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SiteBuilder for CommandBuilder {
    async fn build(&self) -> Result<(), RebuildError> {
        let program = self.program.display().to_string();

        let child = self.command().spawn().map_err(|e| RebuildError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        // Dropping the output future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| RebuildError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?,
            Err(_) => {
                return Err(RebuildError::TimedOut {
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
        warn!(program = %program, status = %output.status, stderr = %tail, "Builder exited unsuccessfully");
        Err(RebuildError::Failed {
            status: output.status.to_string(),
        })
    }
}

// =============================================================================
// Rebuild Coalescer
// =============================================================================

/// Result of [`RebuildCoalescer::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// This call ran the build loop
    Led {
        /// Builder runs started
        builds: usize,
        /// Builder runs that failed
        failures: usize,
    },

    /// A build was already running; it (or its follow-up) covers this call
    Coalesced,
}

#[derive(Debug, Default)]
struct CoalescerState {
    running: bool,
    pending: bool,
}

struct Inner {
    builder: Arc<dyn SiteBuilder>,
    state: Mutex<CoalescerState>,
}

/// Folds concurrent rebuild triggers into single builder runs.
///
/// Cheap to clone; clones share the running and pending flags. The settle
/// delay belongs to the handle: a loop waits for the delay of the handle
/// whose trigger started it.
#[derive(Clone)]
pub struct RebuildCoalescer {
    inner: Arc<Inner>,
    settle: Duration,
}

impl RebuildCoalescer {
    /// Create a coalescer with the default settle delay.
    pub fn new(builder: impl SiteBuilder) -> Self {
        Self::with_shared_builder(Arc::new(builder))
    }

    /// Create a coalescer around a shared builder.
    pub fn with_shared_builder(builder: Arc<dyn SiteBuilder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                builder,
                state: Mutex::new(CoalescerState::default()),
            }),
            settle: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Set the settle delay for loops led through this handle.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// The settle delay waited before each build.
    pub fn settle_delay(&self) -> Duration {
        self.settle
    }

    /// Whether a build loop is active.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// Request a rebuild.
    ///
    /// Returns [`RebuildOutcome::Coalesced`] immediately if a build loop is
    /// already active; that loop runs one more build after the current one.
    /// Otherwise this call leads: it waits for the loop to finish and returns
    /// how many builds ran. The loop runs in its own task, so dropping this
    /// future does not stop it.
    pub async fn trigger(&self) -> RebuildOutcome {
        {
            let mut state = self.inner.state.lock().await;
            state.pending = true;
            if state.running {
                debug!("Rebuild already running, coalescing trigger");
                return RebuildOutcome::Coalesced;
            }
            state.running = true;
        }

        let inner = Arc::clone(&self.inner);
        let settle = self.settle;
        match tokio::spawn(async move { inner.lead(settle).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Rebuild leader task failed");
                RebuildOutcome::Led {
                    builds: 0,
                    failures: 1,
                }
            }
        }
    }
}

impl Inner {
    async fn lead(&self, settle: Duration) -> RebuildOutcome {
        let mut builds = 0;
        let mut failures = 0;

        loop {
            tokio::time::sleep(settle).await;

            {
                let mut state = self.state.lock().await;
                if !state.pending {
                    state.running = false;
                    break;
                }
                state.pending = false;
            }

            builds += 1;
            info!(build = builds, "Starting site build");

            let builder = Arc::clone(&self.builder);
            let result = match tokio::spawn(async move { builder.build().await }).await {
                Ok(result) => result,
                Err(e) => Err(RebuildError::Panicked(e.to_string())),
            };

            match result {
                Ok(()) => info!(build = builds, "Site build finished"),
                Err(e) => {
                    failures += 1;
                    warn!(build = builds, error = %e, "Site build failed");
                }
            }
        }

        RebuildOutcome::Led { builds, failures }
    }
}

// =============================================================================
// Tests
// =============================================================================
