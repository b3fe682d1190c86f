//! Trigger policy
//!
//! Decides when verification runs. A verification starts on a rising edge of
//! the sensor line (previous reading not "ON", current "ON") once the cooldown
//! has expired. Readings inside the cooldown are ignored, but the line state is
//! still recorded so the same physical trigger is not re-detected as a new
//! edge afterwards.
//!
//! ```text
//!   Idle --rising edge, now >= expiry--> Verifying
//!   Verifying --not real--> Idle
//!   Verifying --real--> Cooldown --now >= expiry--> Idle
//! ```

use crate::sensor::SensorReading;
use crate::types::Verdict;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    Idle,
    Verifying,
    Cooldown,
}

/// Why a reading did not start a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Cooldown has not expired yet
    Cooldown,
    /// "ON" while the line was already high
    NoEdge,
    /// "OFF" reading
    LineLow,
    /// A pending verification was abandoned by an "OFF" reading
    Abandoned,
}

/// What the caller should do with a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Run a new verification
    Verify,
    /// Re-run a pending verification with the new evidence
    Reverify,
    Ignore(IgnoreReason),
}

/// PIR edge detection and cooldown window
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    state: PolicyState,
    last_reading: Option<SensorReading>,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
}

impl TriggerPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: PolicyState::Idle,
            last_reading: None,
            cooldown,
            cooldown_until: None,
        }
    }

    /// Current state, resolving an expired cooldown
    pub fn state_at(&self, now: Instant) -> PolicyState {
        match self.state {
            PolicyState::Cooldown if !self.in_cooldown(now) => PolicyState::Idle,
            state => state,
        }
    }

    pub fn last_reading(&self) -> Option<SensorReading> {
        self.last_reading
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    /// True while `now` is strictly before the cooldown expiry
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(false, |until| now < until)
    }

    /// Feed one sensor reading
    pub fn on_reading(&mut self, reading: SensorReading, now: Instant) -> TriggerAction {
        let previous = self.last_reading.replace(reading);
        self.state = self.state_at(now);

        if self.state == PolicyState::Verifying {
            // Only reachable while a verification is pending
            return match reading {
                SensorReading::On => TriggerAction::Reverify,
                SensorReading::Off => {
                    self.state = PolicyState::Idle;
                    TriggerAction::Ignore(IgnoreReason::Abandoned)
                }
            };
        }

        if self.in_cooldown(now) {
            debug!(reading = reading.as_str(), "reading ignored during cooldown");
            return TriggerAction::Ignore(IgnoreReason::Cooldown);
        }

        match reading {
            SensorReading::On if previous != Some(SensorReading::On) => {
                self.state = PolicyState::Verifying;
                TriggerAction::Verify
            }
            SensorReading::On => TriggerAction::Ignore(IgnoreReason::NoEdge),
            SensorReading::Off => TriggerAction::Ignore(IgnoreReason::LineLow),
        }
    }

    /// Record the line level without acting on it, for readings that arrived
    /// while a verification was running
    pub fn record_line_state(&mut self, reading: SensorReading) {
        self.last_reading = Some(reading);
    }

    /// Apply the verdict of the running verification and return the new state
    pub fn resolve(&mut self, verdict: Verdict, now: Instant) -> PolicyState {
        self.state = match verdict {
            Verdict::Real => {
                self.cooldown_until = Some(now + self.cooldown);
                PolicyState::Cooldown
            }
            Verdict::NotReal => PolicyState::Idle,
            Verdict::Pending => PolicyState::Verifying,
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COOLDOWN: Duration = Duration::from_secs(5);

    #[test]
    fn test_rising_edge_starts_verification() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();

        assert_eq!(policy.on_reading(SensorReading::On, t0), TriggerAction::Verify);
        assert_eq!(policy.state_at(t0), PolicyState::Verifying);
        assert_eq!(policy.resolve(Verdict::NotReal, t0), PolicyState::Idle);

        // Still high: no new edge
        assert_eq!(
            policy.on_reading(SensorReading::On, t0),
            TriggerAction::Ignore(IgnoreReason::NoEdge)
        );
        assert_eq!(
            policy.on_reading(SensorReading::Off, t0),
            TriggerAction::Ignore(IgnoreReason::LineLow)
        );
        assert_eq!(policy.on_reading(SensorReading::On, t0), TriggerAction::Verify);
    }

    #[test]
    fn test_real_motion_starts_cooldown() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();

        policy.on_reading(SensorReading::On, t0);
        assert_eq!(policy.resolve(Verdict::Real, t0), PolicyState::Cooldown);
        assert_eq!(policy.cooldown_until(), Some(t0 + COOLDOWN));
        assert_eq!(policy.state_at(t0 + COOLDOWN), PolicyState::Idle);
    }

    #[test]
    fn test_edge_before_expiry_is_ignored_and_at_expiry_accepted() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();
        policy.on_reading(SensorReading::On, t0);
        policy.resolve(Verdict::Real, t0);

        let just_before = t0 + COOLDOWN - Duration::from_nanos(1);
        policy.on_reading(SensorReading::Off, just_before);
        assert_eq!(
            policy.on_reading(SensorReading::On, just_before),
            TriggerAction::Ignore(IgnoreReason::Cooldown)
        );

        policy.on_reading(SensorReading::Off, just_before);
        assert_eq!(
            policy.on_reading(SensorReading::On, t0 + COOLDOWN),
            TriggerAction::Verify
        );
    }

    #[test]
    fn test_line_state_recorded_during_cooldown() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();
        policy.on_reading(SensorReading::On, t0);
        policy.resolve(Verdict::Real, t0);

        // The line stays high through the cooldown: no spurious edge afterwards
        policy.on_reading(SensorReading::On, t0 + Duration::from_secs(1));
        assert_eq!(policy.last_reading(), Some(SensorReading::On));
        assert_eq!(
            policy.on_reading(SensorReading::On, t0 + COOLDOWN),
            TriggerAction::Ignore(IgnoreReason::NoEdge)
        );
    }

    #[test]
    fn test_rejected_trigger_does_not_start_cooldown() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();
        policy.on_reading(SensorReading::On, t0);
        policy.resolve(Verdict::NotReal, t0);
        assert!(!policy.in_cooldown(t0));
        assert_eq!(policy.cooldown_until(), None);
    }

    #[test]
    fn test_pending_verification_continues_and_can_be_abandoned() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();

        assert_eq!(policy.on_reading(SensorReading::On, t0), TriggerAction::Verify);
        assert_eq!(policy.resolve(Verdict::Pending, t0), PolicyState::Verifying);
        assert_eq!(policy.on_reading(SensorReading::On, t0), TriggerAction::Reverify);
        policy.resolve(Verdict::Pending, t0);
        assert_eq!(
            policy.on_reading(SensorReading::Off, t0),
            TriggerAction::Ignore(IgnoreReason::Abandoned)
        );
        assert_eq!(policy.state_at(t0), PolicyState::Idle);
    }

    #[test]
    fn test_recorded_line_state_suppresses_edge() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        let t0 = Instant::now();
        policy.on_reading(SensorReading::On, t0);
        policy.resolve(Verdict::NotReal, t0);

        policy.record_line_state(SensorReading::Off);
        policy.record_line_state(SensorReading::On);
        assert_eq!(policy.state_at(t0), PolicyState::Idle);
        assert_eq!(policy.last_reading(), Some(SensorReading::On));
        assert_eq!(
            policy.on_reading(SensorReading::On, t0),
            TriggerAction::Ignore(IgnoreReason::NoEdge)
        );
    }

    #[test]
    fn test_first_reading_on_counts_as_edge() {
        let mut policy = TriggerPolicy::new(COOLDOWN);
        assert_eq!(
            policy.on_reading(SensorReading::On, Instant::now()),
            TriggerAction::Verify
        );
    }
}
