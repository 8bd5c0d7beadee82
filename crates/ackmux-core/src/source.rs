//! Source handles – per-producer liveness and payload state.
//!
//! Every producer the [`Arbiter`][crate::arbiter::Arbiter] listens to is
//! represented by a [`SourceHandle`]: a name, a fixed priority, a liveness
//! timeout and the instant of the last received update.  A handle is
//! *stale* when it has never been updated or when its last update is older
//! than its timeout.
//!
//! Two concrete sources build on it:
//!
//! - [`VelocitySource`] – remembers the last drive command and answers
//!   whether a lock priority masks it.
//! - [`LockSource`] – remembers the last boolean lock flag and answers
//!   whether it is currently asserting.
//!
//! All predicates take `now` explicitly, so staleness is evaluated lazily and
//! deterministically against whatever clock the caller uses.

use std::time::{Duration, Instant};

use ackmux_types::{AckermannDrive, LockStalePolicy, Priority, SourceDescriptor};

// ────────────────────────────────────────────────────────────────────────────
// SourceHandle
// ────────────────────────────────────────────────────────────────────────────

/// Name, priority, timeout and last-update instant shared by every source.
///
/// Only the last-update instant ever changes after construction.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use ackmux_core::source::SourceHandle;
/// use ackmux_types::SourceDescriptor;
///
/// let mut handle = SourceHandle::new(SourceDescriptor::new(
///     "joystick", "joy_vel", Duration::from_millis(500), 100,
/// ));
/// let t0 = Instant::now();
/// assert!(handle.is_stale(t0));
///
/// handle.stamp(t0);
/// assert!(!handle.is_stale(t0 + Duration::from_millis(500)));
/// assert!(handle.is_stale(t0 + Duration::from_millis(501)));
/// ```
#[derive(Debug, Clone)]
pub struct SourceHandle {
    name: String,
    topic: String,
    priority: Priority,
    timeout: Duration,
    last_update: Option<Instant>,
}

impl SourceHandle {
    /// Build a handle that has never been updated.
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            name: descriptor.name,
            topic: descriptor.topic,
            priority: descriptor.priority,
            timeout: descriptor.timeout,
            last_update: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Instant of the most recent update, `None` if nothing was received yet.
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Time elapsed between the last update and `now`.
    ///
    /// An update stamped after `now` counts as zero age.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_update
            .map(|stamp| now.saturating_duration_since(stamp))
    }

    /// `true` when the source was never updated, or when
    /// `now - last_update > timeout`.  The boundary itself is still fresh.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.age(now) {
            Some(age) => age > self.timeout,
            None => true,
        }
    }

    /// Record that an update arrived at `now`.
    pub fn stamp(&mut self, now: Instant) {
        self.last_update = Some(now);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// VelocitySource
// ────────────────────────────────────────────────────────────────────────────

/// A producer of drive commands.
#[derive(Debug, Clone)]
pub struct VelocitySource {
    handle: SourceHandle,
    last_command: Option<AckermannDrive>,
}

impl VelocitySource {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            handle: SourceHandle::new(descriptor),
            last_command: None,
        }
    }

    pub fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn priority(&self) -> Priority {
        self.handle.priority()
    }

    pub fn last_command(&self) -> Option<&AckermannDrive> {
        self.last_command.as_ref()
    }

    /// Store `command` and refresh the liveness stamp.
    pub fn touch(&mut self, command: AckermannDrive, now: Instant) {
        self.last_command = Some(command);
        self.handle.stamp(now);
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.handle.is_stale(now)
    }

    /// Masked when stale, or when the priority is strictly below
    /// `lock_priority`.  A tie with the lock priority is not masked.
    pub fn is_masked(&self, lock_priority: Priority, now: Instant) -> bool {
        self.is_stale(now) || self.priority() < lock_priority
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LockSource
// ────────────────────────────────────────────────────────────────────────────

/// A producer of a boolean suppression signal (e-stop, supervisor override).
#[derive(Debug, Clone)]
pub struct LockSource {
    handle: SourceHandle,
    locked: bool,
    stale_policy: LockStalePolicy,
}

impl LockSource {
    pub fn new(descriptor: SourceDescriptor, stale_policy: LockStalePolicy) -> Self {
        Self {
            handle: SourceHandle::new(descriptor),
            locked: false,
            stale_policy,
        }
    }

    pub fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn priority(&self) -> Priority {
        self.handle.priority()
    }

    /// The raw flag from the last message, regardless of staleness.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn stale_policy(&self) -> LockStalePolicy {
        self.stale_policy
    }

    /// Store `locked` and refresh the liveness stamp.
    pub fn touch(&mut self, locked: bool, now: Instant) {
        self.locked = locked;
        self.handle.stamp(now);
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.handle.is_stale(now)
    }

    /// Whether this lock currently suppresses lower-priority sources.
    ///
    /// Under [`LockStalePolicy::Release`] a stale lock never asserts, so a
    /// lock that went silent cannot freeze the vehicle forever.  Under
    /// [`LockStalePolicy::Engage`] a stale lock always asserts.
    pub fn is_asserting(&self, now: Instant) -> bool {
        let stale = self.is_stale(now);
        match self.stale_policy {
            LockStalePolicy::Release => self.locked && !stale,
            LockStalePolicy::Engage => self.locked || stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn descriptor(name: &str, priority: Priority) -> SourceDescriptor {
        SourceDescriptor::new(name, format!("{name}_topic"), TIMEOUT, priority)
    }

    #[test]
    fn never_updated_handle_is_stale() {
        let handle = SourceHandle::new(descriptor("nav", 1));
        let now = Instant::now();
        assert!(handle.is_stale(now));
        assert!(handle.is_stale(now + Duration::from_secs(3600)));
        assert_eq!(handle.age(now), None);
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let mut handle = SourceHandle::new(descriptor("nav", 1));
        let t0 = Instant::now();
        handle.stamp(t0);

        assert!(!handle.is_stale(t0));
        assert!(!handle.is_stale(t0 + TIMEOUT));
        assert!(handle.is_stale(t0 + TIMEOUT + Duration::from_nanos(1)));
    }

    #[test]
    fn update_from_the_future_counts_as_fresh() {
        let mut handle = SourceHandle::new(descriptor("nav", 1));
        let t0 = Instant::now();
        handle.stamp(t0 + Duration::from_millis(10));

        assert_eq!(handle.age(t0), Some(Duration::ZERO));
        assert!(!handle.is_stale(t0));
    }

    #[test]
    fn touch_refreshes_stamp_and_payload() {
        let mut source = VelocitySource::new(descriptor("teleop", 5));
        let t0 = Instant::now();
        source.touch(AckermannDrive::new(1.0, 0.1), t0);

        let later = t0 + Duration::from_millis(400);
        source.touch(AckermannDrive::new(2.0, -0.1), later);

        assert_eq!(source.handle().last_update(), Some(later));
        assert_eq!(source.last_command(), Some(&AckermannDrive::new(2.0, -0.1)));
        assert!(!source.is_stale(later + TIMEOUT));
    }

    #[test]
    fn velocity_masked_strictly_below_lock_priority() {
        let mut source = VelocitySource::new(descriptor("teleop", 5));
        let t0 = Instant::now();
        source.touch(AckermannDrive::default(), t0);

        assert!(!source.is_masked(0, t0));
        assert!(!source.is_masked(4, t0));
        assert!(!source.is_masked(5, t0), "a tie with the lock must not mask");
        assert!(source.is_masked(6, t0));
    }

    #[test]
    fn stale_velocity_is_masked_even_without_locks() {
        let mut source = VelocitySource::new(descriptor("teleop", 5));
        assert!(source.is_masked(0, Instant::now()));

        let t0 = Instant::now();
        source.touch(AckermannDrive::default(), t0);
        assert!(source.is_masked(0, t0 + TIMEOUT * 2));
    }

    #[test]
    fn released_lock_asserts_only_while_locked_and_fresh() {
        let mut lock = LockSource::new(descriptor("e_stop", 255), LockStalePolicy::Release);
        let t0 = Instant::now();
        assert!(!lock.is_asserting(t0), "never-updated lock must not assert");

        lock.touch(true, t0);
        assert!(lock.is_asserting(t0));
        assert!(lock.is_asserting(t0 + TIMEOUT));
        assert!(!lock.is_asserting(t0 + TIMEOUT * 2), "stale lock releases");
        assert!(lock.is_locked(), "raw flag is unaffected by staleness");

        lock.touch(false, t0 + TIMEOUT);
        assert!(!lock.is_asserting(t0 + TIMEOUT));
    }

    #[test]
    fn engaged_lock_asserts_when_stale() {
        let mut lock = LockSource::new(descriptor("e_stop", 255), LockStalePolicy::Engage);
        let t0 = Instant::now();
        assert!(lock.is_asserting(t0), "never-updated lock asserts");

        lock.touch(false, t0);
        assert!(!lock.is_asserting(t0));
        assert!(lock.is_asserting(t0 + TIMEOUT * 2), "silent lock re-engages");

        lock.touch(true, t0);
        assert!(lock.is_asserting(t0));
    }
}
