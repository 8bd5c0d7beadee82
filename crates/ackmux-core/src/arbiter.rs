//! [`Arbiter`] – the priority-resolution core of the multiplexer.
//!
//! The arbiter owns every [`VelocitySource`] and [`LockSource`] and decides,
//! for each inbound drive command, whether the source that produced it may
//! drive the single [`OutputSink`].  The decision is evaluated in two steps:
//!
//! 1. **Lock priority** – the maximum priority among locks that are
//!    currently asserting, or `0` when none are.
//! 2. **Winner** – the first source, in configured order, with the strictly
//!    highest priority among the sources not masked by that lock priority.
//!
//! Nothing is cached between decisions: every call re-reads the handles and
//! re-evaluates staleness against the `now` it is given.
//!
//! Because the running maximum starts at `0` and comparisons are strict, a
//! velocity source configured with priority `0` can never win.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use ackmux_core::Arbiter;
//! use ackmux_types::{AckermannDrive, LockStalePolicy, MuxError, SourceDescriptor};
//!
//! let timeout = Duration::from_secs(1);
//! let mut arbiter = Arbiter::new(
//!     vec![
//!         SourceDescriptor::new("nav", "nav_vel", timeout, 1),
//!         SourceDescriptor::new("teleop", "teleop_vel", timeout, 5),
//!     ],
//!     vec![SourceDescriptor::new("e_stop", "e_stop", timeout, 10)],
//!     LockStalePolicy::Release,
//!     Box::new(|_: &AckermannDrive| Ok::<(), MuxError>(())),
//! )
//! .unwrap();
//!
//! let now = Instant::now();
//! arbiter.on_velocity_update("nav", AckermannDrive::new(0.5, 0.0), now).unwrap();
//! assert!(arbiter.has_priority("nav", now));
//!
//! arbiter.on_lock_update("e_stop", true, now).unwrap();
//! assert_eq!(arbiter.effective_lock_priority(now), 10);
//! assert!(!arbiter.has_priority("nav", now));
//! ```

use std::time::Instant;

use ackmux_types::{
    AckermannDrive, ConfigError, LockStalePolicy, MuxError, Priority, SourceDescriptor, SourceKind,
};
use tracing::{debug, info, instrument};

use crate::config::{MuxConfig, ensure_unique_names};
use crate::diagnostics::{LockStatus, Snapshot, VelocityStatus};
use crate::source::{LockSource, VelocitySource};

// ────────────────────────────────────────────────────────────────────────────
// Output sink
// ────────────────────────────────────────────────────────────────────────────

/// The single channel authorized commands are forwarded to.
///
/// Closures of the form `FnMut(&AckermannDrive) -> Result<(), MuxError>`
/// implement this trait, which keeps tests and small embeddings short.
pub trait OutputSink: Send {
    /// Emit `command` unchanged.
    ///
    /// # Errors
    ///
    /// [`MuxError::Output`] or [`MuxError::Channel`] when the command could
    /// not be delivered.
    fn forward(&mut self, command: &AckermannDrive) -> Result<(), MuxError>;
}

impl<F> OutputSink for F
where
    F: FnMut(&AckermannDrive) -> Result<(), MuxError> + Send,
{
    fn forward(&mut self, command: &AckermannDrive) -> Result<(), MuxError> {
        self(command)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Arbiter
// ────────────────────────────────────────────────────────────────────────────

/// Owns all sources and decides which velocity source may drive the output.
///
/// Source collections are fixed at construction.  Configured order is part
/// of the contract: it breaks ties between velocity sources of equal
/// priority.
pub struct Arbiter {
    velocities: Vec<VelocitySource>,
    locks: Vec<LockSource>,
    sink: Box<dyn OutputSink>,
    last_forwarded: Option<AckermannDrive>,
    // Winner seen by the most recent velocity decision.  Only used to log
    // hand-overs; never consulted when deciding.
    last_winner: Option<usize>,
}

impl Arbiter {
    /// Build an arbiter from ordered source lists.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyName`] or [`ConfigError::DuplicateName`] when the
    /// names within one kind are not unique and non-empty.
    pub fn new(
        velocities: Vec<SourceDescriptor>,
        locks: Vec<SourceDescriptor>,
        lock_stale_policy: LockStalePolicy,
        sink: Box<dyn OutputSink>,
    ) -> Result<Self, ConfigError> {
        ensure_unique_names(SourceKind::Velocity, &velocities)?;
        ensure_unique_names(SourceKind::Lock, &locks)?;

        Ok(Self {
            velocities: velocities.into_iter().map(VelocitySource::new).collect(),
            locks: locks
                .into_iter()
                .map(|d| LockSource::new(d, lock_stale_policy))
                .collect(),
            sink,
            last_forwarded: None,
            last_winner: None,
        })
    }

    /// Build an arbiter from a loaded [`MuxConfig`].
    pub fn from_config(config: &MuxConfig, sink: Box<dyn OutputSink>) -> Result<Self, ConfigError> {
        Self::new(
            config.topics.clone(),
            config.locks.clone(),
            config.lock_stale_policy,
            sink,
        )
    }

    pub fn velocity_sources(&self) -> &[VelocitySource] {
        &self.velocities
    }

    pub fn lock_sources(&self) -> &[LockSource] {
        &self.locks
    }

    /// The command most recently handed to the sink.
    pub fn last_forwarded(&self) -> Option<&AckermannDrive> {
        self.last_forwarded.as_ref()
    }

    // -----------------------------------------------------------------------
    // Decision functions
    // -----------------------------------------------------------------------

    /// Highest priority among locks asserting at `now`; `0` when none do.
    pub fn effective_lock_priority(&self, now: Instant) -> Priority {
        let mut priority: Priority = 0;
        for lock in &self.locks {
            if lock.is_asserting(now) && lock.priority() > priority {
                priority = lock.priority();
            }
        }
        priority
    }

    /// The velocity source currently authorized to drive the output.
    ///
    /// Returns `None` when no source is configured or every source is masked.
    pub fn winning_velocity_source(&self, now: Instant) -> Option<&VelocitySource> {
        self.winner_index(now).map(|i| &self.velocities[i])
    }

    /// `true` iff `name` is the winning velocity source at `now`.
    ///
    /// Unknown names never have priority.
    pub fn has_priority(&self, name: &str, now: Instant) -> bool {
        self.winning_velocity_source(now)
            .is_some_and(|winner| winner.name() == name)
    }

    fn winner_index(&self, now: Instant) -> Option<usize> {
        let lock_priority = self.effective_lock_priority(now);

        let mut best = None;
        let mut best_priority: Priority = 0;
        for (index, source) in self.velocities.iter().enumerate() {
            if !source.is_masked(lock_priority, now) && source.priority() > best_priority {
                best = Some(index);
                best_priority = source.priority();
            }
        }

        debug!(
            lock_priority,
            winner = best.map(|i| self.velocities[i].name()).unwrap_or("NULL"),
            "arbitration"
        );
        best
    }

    // -----------------------------------------------------------------------
    // Event entry points
    // -----------------------------------------------------------------------

    /// Apply a drive command received from `name` at `now`, then forward it
    /// if `name` holds priority.
    ///
    /// Returns `Ok(true)` when the command reached the sink and `Ok(false)`
    /// when it was suppressed.  A suppressed command is not an error.
    ///
    /// # Errors
    ///
    /// - [`MuxError::UnknownSource`] – `name` is not a configured velocity
    ///   source.
    /// - Any error returned by the [`OutputSink`].
    #[instrument(level = "debug", skip(self, command, now))]
    pub fn on_velocity_update(
        &mut self,
        name: &str,
        command: AckermannDrive,
        now: Instant,
    ) -> Result<bool, MuxError> {
        let index = self
            .velocities
            .iter()
            .position(|v| v.name() == name)
            .ok_or_else(|| MuxError::UnknownSource {
                kind: SourceKind::Velocity,
                name: name.to_string(),
            })?;
        self.velocities[index].touch(command, now);

        let winner = self.winner_index(now);
        self.log_handover(winner);

        if winner == Some(index) {
            self.forward(command)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Apply a lock flag received from `name` at `now`.
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownSource`] when `name` is not a configured lock.
    #[instrument(level = "debug", skip(self, now))]
    pub fn on_lock_update(&mut self, name: &str, locked: bool, now: Instant) -> Result<(), MuxError> {
        let lock = self
            .locks
            .iter_mut()
            .find(|l| l.name() == name)
            .ok_or_else(|| MuxError::UnknownSource {
                kind: SourceKind::Lock,
                name: name.to_string(),
            })?;

        if lock.is_locked() != locked {
            info!(lock = name, priority = lock.priority(), locked, "lock state changed");
        }
        lock.touch(locked, now);
        Ok(())
    }

    /// Hand `command` to the output sink unchanged.
    pub fn forward(&mut self, command: AckermannDrive) -> Result<(), MuxError> {
        self.sink.forward(&command)?;
        self.last_forwarded = Some(command);
        Ok(())
    }

    /// Read-only view of the arbitration state at `now`.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let lock_priority = self.effective_lock_priority(now);
        let winner = self.winning_velocity_source(now).map(|v| v.name().to_string());

        let velocities = self
            .velocities
            .iter()
            .map(|v| VelocityStatus::capture(v, lock_priority, now))
            .collect();
        let locks = self
            .locks
            .iter()
            .map(|l| LockStatus::capture(l, now))
            .collect();

        Snapshot {
            lock_priority,
            winner,
            last_forwarded: self.last_forwarded,
            velocities,
            locks,
        }
    }

    fn log_handover(&mut self, winner: Option<usize>) {
        if winner == self.last_winner {
            return;
        }
        match winner {
            Some(i) => info!(
                source = self.velocities[i].name(),
                priority = self.velocities[i].priority(),
                "velocity source took over the output"
            ),
            None => info!("no velocity source holds the output"),
        }
        self.last_winner = winner;
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("velocities", &self.velocities)
            .field("locks", &self.locks)
            .field("last_forwarded", &self.last_forwarded)
            .finish_non_exhaustive()
    }
}
