//! Shared vocabulary for the Ackermann command multiplexer: the drive
//! command that flows through it, source descriptors, and the error types
//! every other crate returns.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Static priority of a source.  Higher wins.
pub type Priority = u8;

/// An Ackermann drive command, forwarded exactly as it was received.
///
/// The multiplexer never reads these values when deciding who may drive;
/// they are carried so the winning command can be re-emitted unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckermannDrive {
    /// Desired virtual angle in radians (left is positive).
    pub steering_angle: f32,
    /// Desired rate of change of the steering angle in rad/s.
    pub steering_angle_velocity: f32,
    /// Desired forward speed in m/s.
    pub speed: f32,
    /// Desired acceleration in m/s².
    pub acceleration: f32,
    /// Desired jerk in m/s³.
    pub jerk: f32,
}

impl AckermannDrive {
    /// A command with only speed and steering angle set.
    pub fn new(speed: f32, steering_angle: f32) -> Self {
        Self {
            speed,
            steering_angle,
            ..Self::default()
        }
    }

    /// `true` when every field is a finite number.  Transports use this to
    /// reject garbage before it reaches the arbiter.
    pub fn is_finite(&self) -> bool {
        [
            self.steering_angle,
            self.steering_angle_velocity,
            self.speed,
            self.acceleration,
            self.jerk,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// The two kinds of source the arbiter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Produces drive commands.
    Velocity,
    /// Produces a boolean suppression signal.
    Lock,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Velocity => write!(f, "velocity"),
            SourceKind::Lock => write!(f, "lock"),
        }
    }
}

/// What a lock that has gone silent does.
///
/// **Safety-relevant.**  With [`LockStalePolicy::Release`] an e-stop whose
/// publisher dies stops suppressing motion once its timeout elapses.
/// Integrators who need a dead lock to keep the vehicle stopped must select
/// [`LockStalePolicy::Engage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStalePolicy {
    /// Fail-open: a stale lock does not assert.
    #[default]
    Release,
    /// Fail-closed: a stale (or never heard from) lock asserts.
    Engage,
}

impl fmt::Display for LockStalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStalePolicy::Release => write!(f, "release"),
            LockStalePolicy::Engage => write!(f, "engage"),
        }
    }
}

impl std::str::FromStr for LockStalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(LockStalePolicy::Release),
            "engage" => Ok(LockStalePolicy::Engage),
            other => Err(format!("unknown lock stale policy '{other}'")),
        }
    }
}

/// A validated source definition, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Unique among sources of the same kind.
    pub name: String,
    /// Transport topic the source listens on.
    pub topic: String,
    /// Liveness window.
    pub timeout: Duration,
    pub priority: Priority,
}

impl SourceDescriptor {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        timeout: Duration,
        priority: Priority,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            timeout,
            priority,
        }
    }
}

/// Startup configuration problems.  All of them are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{kind} source #{index} has an empty name")]
    EmptyName { kind: SourceKind, index: usize },

    #[error("duplicate {kind} source name '{name}'")]
    DuplicateName { kind: SourceKind, name: String },

    #[error("{kind} source '{name}' has an empty topic")]
    EmptyTopic { kind: SourceKind, name: String },

    #[error("{kind} source '{name}' has invalid timeout {value}: expected a positive number of seconds")]
    InvalidTimeout {
        kind: SourceKind,
        name: String,
        value: f64,
    },

    #[error("{kind} source '{name}' has priority {value}, outside 0..=255")]
    PriorityOutOfRange {
        kind: SourceKind,
        name: String,
        value: i64,
    },

    #[error("invalid diagnostics period {0}: expected a positive number of seconds")]
    InvalidPeriod(f64),

    #[error("output topic must not be empty")]
    EmptyOutputTopic,

    #[error("{kind} source '{name}' listens on the output topic '{topic}'")]
    OutputTopicCollides {
        kind: SourceKind,
        name: String,
        topic: String,
    },
}

/// Runtime errors surfaced by the arbiter and its collaborators.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("unknown {kind} source '{name}'")]
    UnknownSource { kind: SourceKind, name: String },

    #[error("output sink rejected command: {0}")]
    Output(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_json_fills_missing_fields_with_zero() {
        let cmd: AckermannDrive =
            serde_json::from_str(r#"{"speed": 1.5, "steering_angle": -0.3}"#).unwrap();
        assert!((cmd.speed - 1.5).abs() < f32::EPSILON);
        assert!((cmd.steering_angle + 0.3).abs() < f32::EPSILON);
        assert_eq!(cmd.jerk, 0.0);
        assert_eq!(cmd, AckermannDrive::new(1.5, -0.3));
    }

    #[test]
    fn non_finite_commands_are_detected() {
        assert!(AckermannDrive::new(1.0, 0.2).is_finite());
        assert!(!AckermannDrive::new(f32::NAN, 0.0).is_finite());

        let mut cmd = AckermannDrive::default();
        cmd.jerk = f32::INFINITY;
        assert!(!cmd.is_finite());
    }

    #[test]
    fn lock_stale_policy_defaults_to_release() {
        assert_eq!(LockStalePolicy::default(), LockStalePolicy::Release);
    }

    #[test]
    fn lock_stale_policy_parses_case_insensitively() {
        assert_eq!("Engage".parse::<LockStalePolicy>(), Ok(LockStalePolicy::Engage));
        assert_eq!(" release ".parse::<LockStalePolicy>(), Ok(LockStalePolicy::Release));
        assert!("closed".parse::<LockStalePolicy>().is_err());
    }

    #[test]
    fn error_messages_name_the_source() {
        let err = ConfigError::DuplicateName {
            kind: SourceKind::Lock,
            name: "e_stop".into(),
        };
        assert_eq!(err.to_string(), "duplicate lock source name 'e_stop'");

        let err = MuxError::UnknownSource {
            kind: SourceKind::Velocity,
            name: "ghost".into(),
        };
        assert!(err.to_string().contains("velocity source 'ghost'"));

        let err: MuxError = ConfigError::InvalidPeriod(-1.0).into();
        assert!(err.to_string().contains("diagnostics period"));
    }
}
