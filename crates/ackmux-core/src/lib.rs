//! `ackmux-core` – Priority Arbitration
//!
//! Decides which of several competing drive-command producers may drive the
//! vehicle.  It does not move anything itself; it only says who may.
//!
//! # Modules
//!
//! - [`source`] – [`SourceHandle`][source::SourceHandle],
//!   [`VelocitySource`][source::VelocitySource] and
//!   [`LockSource`][source::LockSource]: per-producer liveness and payload
//!   state with lazily evaluated staleness.
//! - [`arbiter`] – [`Arbiter`][arbiter::Arbiter]: owns every source,
//!   computes the effective lock priority, picks the winning velocity source
//!   and forwards its commands to the [`OutputSink`][arbiter::OutputSink].
//! - [`diagnostics`] – [`Snapshot`][diagnostics::Snapshot] and the
//!   [`DiagnosticsReporter`][diagnostics::DiagnosticsReporter] interface,
//!   with a `tracing`-backed [`LogReporter`][diagnostics::LogReporter].
//! - [`config`] – [`MuxConfig`][config::MuxConfig]: TOML loading and
//!   fail-fast validation of the source lists.

pub mod arbiter;
pub mod config;
pub mod diagnostics;
pub mod source;

pub use arbiter::{Arbiter, OutputSink};
pub use config::{MuxConfig, MuxSettings};
pub use diagnostics::{DiagnosticsReporter, HealthLevel, LogReporter, Snapshot};
pub use source::{LockSource, SourceHandle, VelocitySource};
