//! Startup configuration – reads and validates the mux TOML file.
//!
//! ```toml
//! [mux]
//! output_topic = "cmd_vel_out"
//! diagnostics_period = 1.0
//! lock_stale_policy = "release"
//!
//! [[topics]]
//! name = "navigation"
//! topic = "nav_vel"
//! timeout = 0.5
//! priority = 10
//!
//! [[locks]]
//! name = "e_stop"
//! topic = "e_stop"
//! timeout = 1.0
//! priority = 255
//! ```
//!
//! The order of `[[topics]]` entries is significant: it breaks ties between
//! velocity sources of equal priority.  Every problem found here is fatal.
//!
//! Timeouts must be strictly positive.  A `timeout: 0.0` entry, which some
//! ROS mux configurations use to mean "never expires", is rejected; give
//! such sources a large finite timeout instead.
//!
//! No source may listen on the output topic, otherwise every forwarded
//! command would be fed back in as a fresh update.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use ackmux_types::{ConfigError, LockStalePolicy, Priority, SourceDescriptor, SourceKind};
use serde::Deserialize;
use tracing::warn;

/// Process-wide settings from the `[mux]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MuxSettings {
    /// Topic forwarded commands are published on.
    #[serde(default = "default_output_topic")]
    pub output_topic: String,

    /// Seconds between diagnostics snapshots.
    #[serde(default = "default_diagnostics_period")]
    pub diagnostics_period: f64,

    #[serde(default)]
    pub lock_stale_policy: LockStalePolicy,
}

fn default_output_topic() -> String {
    "cmd_vel_out".to_string()
}
fn default_diagnostics_period() -> f64 {
    1.0
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            output_topic: default_output_topic(),
            diagnostics_period: default_diagnostics_period(),
            lock_stale_policy: LockStalePolicy::default(),
        }
    }
}

/// A source entry as written in the file, before validation.
#[derive(Debug, Clone, Deserialize)]
struct RawSource {
    name: String,
    topic: String,
    timeout: f64,
    priority: i64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    mux: MuxSettings,
    #[serde(default)]
    topics: Vec<RawSource>,
    #[serde(default)]
    locks: Vec<RawSource>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxConfig {
    pub output_topic: String,
    pub diagnostics_period: Duration,
    pub lock_stale_policy: LockStalePolicy,
    /// Velocity sources in tie-break order.
    pub topics: Vec<SourceDescriptor>,
    pub locks: Vec<SourceDescriptor>,
}

impl MuxConfig {
    /// Read `path`, apply `ACKMUX_*` environment overrides and validate.
    ///
    /// Overrides are applied before validation, so an overridden output
    /// topic is checked like one written in the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_with_overrides(&raw, |key| std::env::var(key).ok())
    }

    /// Parse `raw`, apply overrides looked up through `var`, and validate.
    fn from_toml_with_overrides(
        raw: &str,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut parsed = parse_raw(raw)?;
        apply_overrides(&mut parsed.mux, var);
        validate(parsed)
    }

    /// Parse and validate a TOML document.  Environment overrides are not
    /// applied.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        validate(parse_raw(raw)?)
    }
}

fn parse_raw(raw: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Apply `ACKMUX_*` overrides, looked up through `var`, to `settings`.
///
/// | Variable | Field |
/// |---|---|
/// | `ACKMUX_OUTPUT_TOPIC` | `output_topic` |
/// | `ACKMUX_DIAGNOSTICS_PERIOD` | `diagnostics_period` |
/// | `ACKMUX_LOCK_STALE_POLICY` | `lock_stale_policy` |
///
/// Values that do not parse are ignored.
fn apply_overrides(settings: &mut MuxSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("ACKMUX_OUTPUT_TOPIC") {
        settings.output_topic = v;
    }
    if let Some(v) = var("ACKMUX_DIAGNOSTICS_PERIOD")
        && let Ok(period) = v.trim().parse::<f64>()
    {
        settings.diagnostics_period = period;
    }
    if let Some(v) = var("ACKMUX_LOCK_STALE_POLICY")
        && let Ok(policy) = v.parse::<LockStalePolicy>()
    {
        settings.lock_stale_policy = policy;
    }
}

fn validate(raw: RawConfig) -> Result<MuxConfig, ConfigError> {
    if raw.mux.output_topic.trim().is_empty() {
        return Err(ConfigError::EmptyOutputTopic);
    }
    let diagnostics_period = positive_duration(raw.mux.diagnostics_period)
        .ok_or(ConfigError::InvalidPeriod(raw.mux.diagnostics_period))?;

    let topics = validate_sources(SourceKind::Velocity, raw.topics)?;
    let locks = validate_sources(SourceKind::Lock, raw.locks)?;
    ensure_output_not_subscribed(&raw.mux.output_topic, SourceKind::Velocity, &topics)?;
    ensure_output_not_subscribed(&raw.mux.output_topic, SourceKind::Lock, &locks)?;

    if topics.is_empty() {
        warn!("no velocity sources configured; nothing will ever be forwarded");
    }

    Ok(MuxConfig {
        output_topic: raw.mux.output_topic,
        diagnostics_period,
        lock_stale_policy: raw.mux.lock_stale_policy,
        topics,
        locks,
    })
}

fn validate_sources(
    kind: SourceKind,
    raw: Vec<RawSource>,
) -> Result<Vec<SourceDescriptor>, ConfigError> {
    let mut out = Vec::with_capacity(raw.len());
    for (index, source) in raw.into_iter().enumerate() {
        if source.name.trim().is_empty() {
            return Err(ConfigError::EmptyName { kind, index });
        }
        if source.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic {
                kind,
                name: source.name,
            });
        }
        let Some(timeout) = positive_duration(source.timeout) else {
            return Err(ConfigError::InvalidTimeout {
                kind,
                name: source.name,
                value: source.timeout,
            });
        };
        let Ok(priority) = Priority::try_from(source.priority) else {
            return Err(ConfigError::PriorityOutOfRange {
                kind,
                name: source.name,
                value: source.priority,
            });
        };
        out.push(SourceDescriptor::new(source.name, source.topic, timeout, priority));
    }
    ensure_unique_names(kind, &out)?;
    Ok(out)
}

/// Reject empty or repeated names within one kind of source.
pub fn ensure_unique_names(
    kind: SourceKind,
    sources: &[SourceDescriptor],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            return Err(ConfigError::EmptyName { kind, index });
        }
        if !seen.insert(source.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                kind,
                name: source.name.clone(),
            });
        }
    }
    Ok(())
}

fn ensure_output_not_subscribed(
    output_topic: &str,
    kind: SourceKind,
    sources: &[SourceDescriptor],
) -> Result<(), ConfigError> {
    match sources.iter().find(|s| s.topic == output_topic) {
        Some(source) => Err(ConfigError::OutputTopicCollides {
            kind,
            name: source.name.clone(),
            topic: output_topic.to_string(),
        }),
        None => Ok(()),
    }
}

fn positive_duration(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
