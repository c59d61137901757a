//! Process-wide registry and sweeper for cache managers.
//!
//! Managers do not run their own timers. They register with one
//! [`DormantCacheCleaner`], which evicts dormant entries from all of them on
//! a fixed interval and exposes manual "clean dormant" / "clean all"
//! triggers for admin tooling.
//!
//! # State machine
//!
//! ```text
//!            tick / manual trigger
//!   Idle ─────────────────────────► Sweeping
//!    ▲                                  │
//!    └──────── sweep complete ──────────┘
//!
//!   Idle | Sweeping ── shutdown() ──► Stopped   (terminal)
//! ```
//!
//! Sweeps are single-flight: a background tick that fires while a sweep is
//! running is skipped; a manual trigger waits for the running sweep and
//! then performs its own.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError, Weak};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use super::manager::ManagedCache;
use super::policy::CachePolicy;
use crate::lifecycle::Status;
use crate::lock::{mutex_lock, rw_read, rw_write};
use crate::telemetry;
use crate::{CacheError, Result};

const COMPONENT: &str = "dormant cache cleaner";

/// Observable state of the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanerState {
    Idle,
    Sweeping,
    Stopped,
}

impl CleanerState {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanerState::Idle => "idle",
            CleanerState::Sweeping => "sweeping",
            CleanerState::Stopped => "stopped",
        }
    }
}

/// Which eviction a sweep performs on every manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// `evict_dormant(now)`
    Dormant,
    /// `evict_all()`
    All,
}

impl SweepKind {
    fn as_str(self) -> &'static str {
        match self {
            SweepKind::Dormant => "dormant",
            SweepKind::All => "all",
        }
    }
}

/// A manager that failed during a sweep.
#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub cache: String,
    pub error: CacheError,
}

/// Outcome of one sweep over all registered managers.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub kind: SweepKind,
    /// Managers visited.
    pub managers: usize,
    /// Entries evicted across all managers.
    pub evicted: usize,
    /// Managers whose eviction failed, in visiting order.
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            managers: 0,
            evicted: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure encountered, if any.
    pub fn first_error(&self) -> Option<&CacheError> {
        self.failures.first().map(|f| &f.error)
    }

    /// `Ok(self)` if every manager was swept cleanly, otherwise the first
    /// failure.
    pub fn into_result(self) -> Result<Self> {
        match self.failures.first() {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(self),
        }
    }
}

/// Registry of cache managers with coordinated dormant-entry sweeping.
///
/// Construct one per process and pass it (as `Arc`) to whatever wires up
/// managers. The background task holds only a weak reference; dropping the
/// last `Arc` ends it.
pub struct DormantCacheCleaner {
    policy: CachePolicy,
    managers: RwLock<Vec<Arc<dyn ManagedCache>>>,
    sweep_lock: Mutex<()>,
    sweeping: AtomicBool,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DormantCacheCleaner {
    /// Create a cleaner without a background task.
    ///
    /// Sweeps only run when triggered. Fails if the policy is invalid.
    pub fn new(policy: CachePolicy) -> Result<Arc<Self>> {
        policy.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            policy,
            managers: RwLock::new(Vec::new()),
            sweep_lock: Mutex::new(()),
            sweeping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown,
            task: Mutex::new(None),
        }))
    }

    /// Create a cleaner and spawn its background sweep task on the current
    /// tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(policy: CachePolicy) -> Result<Arc<Self>> {
        let cleaner = Self::new(policy)?;
        cleaner.spawn_sweeper();
        Ok(cleaner)
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(sweep_loop(weak, self.policy, shutdown_rx));
        *mutex_lock(&self.task, COMPONENT, "spawn") = Some(handle);
        info!(
            clean_interval_ms = self.policy.clean_interval.as_millis() as u64,
            dormant_time_ms = self.policy.dormant_time.as_millis() as u64,
            "cache sweeper started"
        );
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn state(&self) -> CleanerState {
        if self.stopped.load(Ordering::Acquire) {
            CleanerState::Stopped
        } else if self.sweeping.load(Ordering::Acquire) {
            CleanerState::Sweeping
        } else {
            CleanerState::Idle
        }
    }

    /// Whether a background task was spawned and has not finished.
    pub fn is_running(&self) -> bool {
        mutex_lock(&self.task, COMPONENT, "is_running")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn ensure_running(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            CleanerState::Stopped => Err(CacheError::invalid_state(
                COMPONENT,
                CleanerState::Stopped.as_str(),
                operation,
            )),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Register a manager and initialise it.
    ///
    /// Idempotent: registering the same instance again returns `Ok(false)`.
    pub fn register(&self, manager: Arc<dyn ManagedCache>) -> Result<bool> {
        self.ensure_running("register")?;
        let mut managers = rw_write(&self.managers, COMPONENT, "register");
        if managers.iter().any(|m| same_manager(m, &manager)) {
            return Ok(false);
        }
        manager.initialize()?;
        debug!(cache = manager.name(), "cache registered");
        managers.push(manager);
        Ok(true)
    }

    /// Remove a manager from the registry. Does not destroy it.
    pub fn unregister(&self, manager: &Arc<dyn ManagedCache>) -> bool {
        let mut managers = rw_write(&self.managers, COMPONENT, "unregister");
        let before = managers.len();
        managers.retain(|m| !same_manager(m, manager));
        managers.len() != before
    }

    /// Append every registered manager to `out`.
    pub fn list_cache_managers(&self, out: &mut Vec<Arc<dyn ManagedCache>>) {
        out.extend(
            rw_read(&self.managers, COMPONENT, "list")
                .iter()
                .cloned(),
        );
    }

    /// Snapshot of the registered managers.
    pub fn managers(&self) -> Vec<Arc<dyn ManagedCache>> {
        let mut out = Vec::new();
        self.list_cache_managers(&mut out);
        out
    }

    // ------------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------------

    /// Evict dormant entries from every manager.
    ///
    /// Waits for a sweep already in progress. A failing manager does not
    /// stop the sweep; failures are collected in the report.
    pub fn clean_dormant_cache(&self) -> Result<SweepReport> {
        self.ensure_running("clean dormant cache")?;
        let guard = self.acquire_sweep();
        Ok(self.sweep(SweepKind::Dormant, guard))
    }

    /// Evict every entry from every manager.
    pub fn clean_all_cache(&self) -> Result<SweepReport> {
        self.ensure_running("clean all cache")?;
        let guard = self.acquire_sweep();
        Ok(self.sweep(SweepKind::All, guard))
    }

    /// Run a dormant sweep unless one is already running.
    ///
    /// This is what the background task does on every tick. Returns
    /// `Ok(None)` when the sweep was skipped.
    pub fn try_clean_dormant_cache(&self) -> Result<Option<SweepReport>> {
        self.ensure_running("clean dormant cache")?;
        let guard = match self.sweep_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                metrics::counter!(telemetry::SWEEPS_SKIPPED_TOTAL).increment(1);
                debug!("previous sweep still running, tick skipped");
                return Ok(None);
            }
        };
        Ok(Some(self.sweep(SweepKind::Dormant, guard)))
    }

    fn acquire_sweep(&self) -> MutexGuard<'_, ()> {
        mutex_lock(&self.sweep_lock, COMPONENT, "sweep")
    }

    #[instrument(skip(self, _guard))]
    fn sweep(&self, kind: SweepKind, _guard: MutexGuard<'_, ()>) -> SweepReport {
        self.sweeping.store(true, Ordering::Release);
        let now = Instant::now();
        let mut report = SweepReport::new(kind);

        for manager in self.managers() {
            if manager.status() == Status::Destroyed {
                debug!(cache = manager.name(), "dropping destroyed cache from registry");
                self.unregister(&manager);
                continue;
            }
            report.managers += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
                SweepKind::Dormant => manager.evict_dormant(now),
                SweepKind::All => manager.evict_all(),
            }));
            let error = match outcome {
                Ok(Ok(evicted)) => {
                    report.evicted += evicted;
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => CacheError::ManagerPanicked {
                    cache: manager.name().to_string(),
                    operation: "sweep",
                },
            };
            warn!(cache = manager.name(), error = %error, "cache sweep failed, continuing");
            report.failures.push(SweepFailure {
                cache: manager.name().to_string(),
                error,
            });
        }

        self.sweeping.store(false, Ordering::Release);
        let status = if report.is_success() { "ok" } else { "error" };
        metrics::counter!(telemetry::SWEEPS_TOTAL,
            "kind" => kind.as_str(),
            "status" => status,
        )
        .increment(1);
        debug!(
            managers = report.managers,
            evicted = report.evicted,
            failures = report.failures.len(),
            "sweep complete"
        );
        report
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop the cleaner. Terminal: no further ticks fire and manual
    /// triggers fail. A sweep in progress completes.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        info!("cache sweeper stopped");
    }

    /// Stop the cleaner and wait for the background task to exit.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let handle = mutex_lock(&self.task, COMPONENT, "shutdown").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "cache sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for DormantCacheCleaner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn same_manager(a: &Arc<dyn ManagedCache>, b: &Arc<dyn ManagedCache>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Background loop: one dormant sweep per `clean_interval`, starting one
/// interval after spawn. Each sweep runs on the blocking pool.
async fn sweep_loop(
    cleaner: Weak<DormantCacheCleaner>,
    policy: CachePolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let period = policy.clean_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(cleaner) = cleaner.upgrade() else {
                    break;
                };
                // Sweeps take blocking locks and run destroy hooks.
                let sweep =
                    tokio::task::spawn_blocking(move || cleaner.try_clean_dormant_cache());
                match sweep.await {
                    Ok(Ok(Some(report))) if !report.is_success() => {
                        warn!(
                            failures = report.failures.len(),
                            "scheduled sweep finished with failures"
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) => break,
                    Err(e) => warn!(error = %e, "scheduled sweep did not complete"),
                }
            }
        }
    }
    debug!("cache sweeper task exited");
}
