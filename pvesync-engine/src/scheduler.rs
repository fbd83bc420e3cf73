//! Pass scheduling.
//!
//! The mode is derived once from the configured intervals:
//!
//! | full interval | quick interval | mode |
//! |---|---|---|
//! | unset | unset | single run |
//! | set | unset | simple |
//! | any | set | combined (full defaults to 1 h) |
//!
//! Passes run one after another on the scheduler task, so a slow pass
//! delays the next tick instead of overlapping it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::engine::PassReport;
use crate::error::{EngineError, Result};

/// Full-sync interval used in combined mode when none is configured.
pub const DEFAULT_FULL_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One full pass, then exit
    SingleRun,
    /// Full pass now and every `full`
    Simple { full: Duration },
    /// Full pass now and every `full`, quick check every `quick`
    Combined { quick: Duration, full: Duration },
}

impl Mode {
    pub fn from_intervals(full: Option<Duration>, quick: Option<Duration>) -> Self {
        match (full, quick) {
            (full, Some(quick)) => Mode::Combined {
                quick,
                full: full.unwrap_or(DEFAULT_FULL_INTERVAL),
            },
            (Some(full), None) => Mode::Simple { full },
            (None, None) => Mode::SingleRun,
        }
    }
}

/// Something that can run passes.
#[async_trait]
pub trait PassRunner: Send + Sync {
    async fn full_pass(&self) -> Result<PassReport>;

    async fn quick_pass(&self) -> Result<PassReport>;
}

// =============================================================================
// Shutdown
// =============================================================================

/// Cooperative stop signal, observed between passes and operations.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half of [`Shutdown`].
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger and signal.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Shutdown { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once triggered. Never resolves if the trigger was dropped untripped.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct Scheduler {
    mode: Mode,
    shutdown: Shutdown,
}

impl Scheduler {
    pub fn new(mode: Mode, shutdown: Shutdown) -> Self {
        Self { mode, shutdown }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Drive `runner` until shutdown. Single-run returns the pass result;
    /// the looping modes log pass failures and keep going.
    pub async fn run<R: PassRunner + ?Sized>(&self, runner: &R) -> Result<()> {
        info!(mode = ?self.mode, "Scheduler starting");
        match self.mode {
            Mode::SingleRun => runner.full_pass().await.map(|_| ()),
            Mode::Simple { full } => {
                self.run_loop(runner, full, None).await;
                Ok(())
            }
            Mode::Combined { quick, full } => {
                self.run_loop(runner, full, Some(quick)).await;
                Ok(())
            }
        }
    }

    async fn run_loop<R: PassRunner + ?Sized>(&self, runner: &R, full: Duration, quick: Option<Duration>) {
        if self.shutdown.is_triggered() {
            return;
        }
        report("full", runner.full_pass().await);

        let mut full_ticks = ticker(full);
        let mut quick_ticks = quick.map(ticker);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("Shutdown requested, scheduler stopping");
                    break;
                }
                _ = full_ticks.tick() => {
                    report("full", runner.full_pass().await);
                    // A full pass covers whatever the next quick check would find.
                    if let Some(quick_ticks) = quick_ticks.as_mut() {
                        quick_ticks.reset();
                    }
                }
                _ = tick_optional(&mut quick_ticks) => {
                    report("quick", runner.quick_pass().await);
                }
            }
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick_optional(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn report(kind: &str, result: Result<PassReport>) {
    match result {
        Ok(report) => info!(
            pass = kind,
            seen = report.entities_seen,
            duration_ms = report.duration.as_millis() as u64,
            "Pass finished"
        ),
        Err(e) if e.is_auth() => error!(pass = kind, error = %e, "Pass aborted, authentication failed"),
        Err(EngineError::Provisioning(message)) => error!(pass = kind, error = %message, "Pass aborted"),
        Err(e) => warn!(pass = kind, error = %e, "Pass failed"),
    }
}
