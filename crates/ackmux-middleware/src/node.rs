//! [`MuxNode`] – wires the topic bus, the arbiter and a diagnostics reporter.
//!
//! Each configured source gets its own task that listens on the source's
//! topic, stamps every message on receipt and hands it to the shared
//! [`Arbiter`].  A separate task snapshots the arbiter on a fixed period for
//! the [`DiagnosticsReporter`].
//!
//! The arbiter sits behind one [`Mutex`]: applying an update, deciding and
//! forwarding happen in a single critical section, and the lock is never
//! held across an `.await`.
//!
//! Messages of the wrong kind for a topic, and drive commands containing
//! non-finite values, are dropped here and never reach the arbiter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ackmux_core::{Arbiter, DiagnosticsReporter, MuxConfig};
use ackmux_types::{AckermannDrive, MuxError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn};

use crate::bus::{BusMessage, TopicBus, TopicReceiver};
use crate::sink::BusSink;

/// Lock the shared arbiter, recovering the guard if a previous holder
/// panicked.
pub fn lock_arbiter(arbiter: &Mutex<Arbiter>) -> MutexGuard<'_, Arbiter> {
    arbiter.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct Binding {
    name: String,
    topic: String,
}

/// A configured but not yet running multiplexer node.
pub struct MuxNode {
    arbiter: Arc<Mutex<Arbiter>>,
    bus: TopicBus,
    velocity_bindings: Vec<Binding>,
    lock_bindings: Vec<Binding>,
    output_topic: String,
    diagnostics_period: Duration,
    reporter: Box<dyn DiagnosticsReporter>,
}

impl MuxNode {
    /// Build the arbiter from `config` with a [`BusSink`] on the configured
    /// output topic.
    ///
    /// # Errors
    ///
    /// [`MuxError::Config`] if the source lists are inconsistent.
    pub fn new(
        config: &MuxConfig,
        bus: TopicBus,
        reporter: Box<dyn DiagnosticsReporter>,
    ) -> Result<Self, MuxError> {
        let sink = BusSink::new(bus.clone(), config.output_topic.clone());
        let arbiter = Arbiter::from_config(config, Box::new(sink))?;

        let bind = |d: &ackmux_types::SourceDescriptor| Binding {
            name: d.name.clone(),
            topic: d.topic.clone(),
        };

        Ok(Self {
            arbiter: Arc::new(Mutex::new(arbiter)),
            bus,
            velocity_bindings: config.topics.iter().map(bind).collect(),
            lock_bindings: config.locks.iter().map(bind).collect(),
            output_topic: config.output_topic.clone(),
            diagnostics_period: config.diagnostics_period,
            reporter,
        })
    }

    pub fn arbiter(&self) -> &Arc<Mutex<Arbiter>> {
        &self.arbiter
    }

    /// Subscribe every source to its topic and spawn the worker tasks.
    ///
    /// Subscriptions are in place when this returns, so messages published
    /// afterwards are not missed.  Must be called from within a Tokio
    /// runtime.
    pub fn start(self) -> RunningNode {
        let mut tasks = JoinSet::new();

        for binding in &self.velocity_bindings {
            let rx = self.bus.subscribe(&binding.topic);
            tasks.spawn(pump_velocity(self.arbiter.clone(), binding.name.clone(), rx));
        }
        for binding in &self.lock_bindings {
            let rx = self.bus.subscribe(&binding.topic);
            tasks.spawn(pump_lock(self.arbiter.clone(), binding.name.clone(), rx));
        }
        tasks.spawn(report_diagnostics(
            self.arbiter.clone(),
            self.diagnostics_period,
            self.reporter,
        ));

        info!(
            sources = self.velocity_bindings.len(),
            locks = self.lock_bindings.len(),
            output = %self.output_topic,
            "mux node started"
        );

        RunningNode {
            arbiter: self.arbiter,
            tasks,
        }
    }
}

/// Handle to a started node.
pub struct RunningNode {
    arbiter: Arc<Mutex<Arbiter>>,
    tasks: JoinSet<()>,
}

impl RunningNode {
    pub fn arbiter(&self) -> &Arc<Mutex<Arbiter>> {
        &self.arbiter
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped), then
    /// stop every task.
    pub async fn run_until(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let stop = *shutdown.borrow_and_update();
            if stop || shutdown.changed().await.is_err() {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Abort every worker task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        info!("mux node stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn pump_velocity(arbiter: Arc<Mutex<Arbiter>>, name: String, mut rx: TopicReceiver) {
    while let Some(message) = rx.recv().await {
        let Some(command) = velocity_command(&message) else {
            warn!(source = %name, topic = rx.topic(), ?message, "dropping malformed velocity message");
            continue;
        };
        apply_velocity(&arbiter, &name, command, Instant::now());
    }
    debug!(source = %name, "velocity topic closed");
}

/// The drive command carried by `message`, if it is a finite one.
fn velocity_command(message: &BusMessage) -> Option<AckermannDrive> {
    match message {
        BusMessage::Drive(command) if command.is_finite() => Some(*command),
        _ => None,
    }
}

/// The lock flag carried by `message`, if any.
fn lock_flag(message: &BusMessage) -> Option<bool> {
    match message {
        BusMessage::Lock(locked) => Some(*locked),
        BusMessage::Drive(_) => None,
    }
}

fn apply_velocity(arbiter: &Mutex<Arbiter>, name: &str, command: AckermannDrive, now: Instant) {
    match lock_arbiter(arbiter).on_velocity_update(name, command, now) {
        Ok(forwarded) => debug!(source = name, forwarded, "velocity update"),
        Err(e) => warn!(source = name, error = %e, "velocity update failed"),
    }
}

async fn pump_lock(arbiter: Arc<Mutex<Arbiter>>, name: String, mut rx: TopicReceiver) {
    while let Some(message) = rx.recv().await {
        let Some(locked) = lock_flag(&message) else {
            warn!(lock = %name, topic = rx.topic(), ?message, "dropping malformed lock message");
            continue;
        };
        if let Err(e) = lock_arbiter(&arbiter).on_lock_update(&name, locked, Instant::now()) {
            warn!(lock = %name, error = %e, "lock update failed");
        }
    }
    debug!(lock = %name, "lock topic closed");
}

async fn report_diagnostics(
    arbiter: Arc<Mutex<Arbiter>>,
    period: Duration,
    mut reporter: Box<dyn DiagnosticsReporter>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let _tick = info_span!("diagnostics").entered();
        let snapshot = lock_arbiter(&arbiter).snapshot(Instant::now());
        reporter.report(&snapshot);
    }
}
