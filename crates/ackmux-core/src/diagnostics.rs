//! Diagnostics snapshots and the reporter interface.
//!
//! A [`Snapshot`] is a read-only picture of the arbiter taken with
//! [`Arbiter::snapshot`][crate::arbiter::Arbiter::snapshot].  Reporters
//! render it periodically; nothing here feeds back into arbitration.

use std::fmt;
use std::time::Instant;

use ackmux_types::{AckermannDrive, Priority};
use serde::Serialize;
use tracing::{debug, info};

use crate::source::{LockSource, SourceHandle, VelocitySource};

/// Coarse health of the mux, for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// At least one velocity source is fresh and no lock is asserting.
    Ok,
    /// A lock is asserting.
    Locked,
    /// No velocity source is fresh.
    Idle,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Ok => write!(f, "ok"),
            HealthLevel::Locked => write!(f, "locked"),
            HealthLevel::Idle => write!(f, "idle"),
        }
    }
}

/// Status of one velocity source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityStatus {
    pub name: String,
    pub topic: String,
    pub priority: Priority,
    pub timeout_secs: f64,
    /// Seconds since the last update; `None` if never updated.
    pub age_secs: Option<f64>,
    pub stale: bool,
    pub masked: bool,
}

impl VelocityStatus {
    pub(crate) fn capture(source: &VelocitySource, lock_priority: Priority, now: Instant) -> Self {
        let handle = source.handle();
        Self {
            name: handle.name().to_string(),
            topic: handle.topic().to_string(),
            priority: handle.priority(),
            timeout_secs: handle.timeout().as_secs_f64(),
            age_secs: age_secs(handle, now),
            stale: source.is_stale(now),
            masked: source.is_masked(lock_priority, now),
        }
    }
}

/// Status of one lock source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockStatus {
    pub name: String,
    pub topic: String,
    pub priority: Priority,
    pub timeout_secs: f64,
    pub age_secs: Option<f64>,
    pub stale: bool,
    /// Raw flag from the last message.
    pub locked: bool,
    /// Whether the lock counts towards the effective lock priority.
    pub asserting: bool,
}

impl LockStatus {
    pub(crate) fn capture(source: &LockSource, now: Instant) -> Self {
        let handle = source.handle();
        Self {
            name: handle.name().to_string(),
            topic: handle.topic().to_string(),
            priority: handle.priority(),
            timeout_secs: handle.timeout().as_secs_f64(),
            age_secs: age_secs(handle, now),
            stale: source.is_stale(now),
            locked: source.is_locked(),
            asserting: source.is_asserting(now),
        }
    }
}

fn age_secs(handle: &SourceHandle, now: Instant) -> Option<f64> {
    handle.age(now).map(|age| age.as_secs_f64())
}

/// Arbitration state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub lock_priority: Priority,
    /// Name of the winning velocity source, if any.
    pub winner: Option<String>,
    pub last_forwarded: Option<AckermannDrive>,
    pub velocities: Vec<VelocityStatus>,
    pub locks: Vec<LockStatus>,
}

impl Snapshot {
    pub fn level(&self) -> HealthLevel {
        if self.lock_priority > 0 {
            HealthLevel::Locked
        } else if self.velocities.iter().all(|v| v.stale) {
            HealthLevel::Idle
        } else {
            HealthLevel::Ok
        }
    }

    pub fn fresh_velocity_count(&self) -> usize {
        self.velocities.iter().filter(|v| !v.stale).count()
    }
}

/// Something that renders snapshots, called on a fixed period.
pub trait DiagnosticsReporter: Send {
    fn report(&mut self, snapshot: &Snapshot);
}

/// Reports through `tracing`: one `info!` summary, one `debug!` per source.
#[derive(Debug, Default)]
pub struct LogReporter;

impl DiagnosticsReporter for LogReporter {
    fn report(&mut self, snapshot: &Snapshot) {
        info!(
            level = %snapshot.level(),
            lock_priority = snapshot.lock_priority,
            winner = snapshot.winner.as_deref().unwrap_or("NULL"),
            fresh = snapshot.fresh_velocity_count(),
            sources = snapshot.velocities.len(),
            locks = snapshot.locks.len(),
            "mux status"
        );
        for v in &snapshot.velocities {
            debug!(
                source = %v.name,
                topic = %v.topic,
                priority = v.priority,
                age = ?v.age_secs,
                timeout = v.timeout_secs,
                masked = v.masked,
                "velocity source"
            );
        }
        for l in &snapshot.locks {
            debug!(
                lock = %l.name,
                topic = %l.topic,
                priority = l.priority,
                age = ?l.age_secs,
                timeout = l.timeout_secs,
                locked = l.locked,
                asserting = l.asserting,
                "lock source"
            );
        }
    }
}
