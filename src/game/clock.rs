//! Match phase and replicated countdown

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::replication::{
    AuthorityError, Field, FieldKey, FieldUpdate, FieldValue, NetRole, Observers, Outbox,
    Replicable, Replicated,
};

use super::scoreboard::{Scoreboard, ScoreboardSnapshot};

/// Coarse session stage. Ordered: phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    WaitingToStart,
    InProgress,
    Cooldown,
}

impl Replicable for MatchPhase {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Phase(*self)
    }
}

/// Phase durations in seconds, as configured by the match controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchTimings {
    pub warmup: f32,
    pub match_time: f32,
    pub cooldown: f32,
}

impl Default for MatchTimings {
    fn default() -> Self {
        Self {
            warmup: 10.0,
            match_time: 120.0,
            cooldown: 10.0,
        }
    }
}

/// Result of an accepted phase change
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    pub phase: MatchPhase,
    /// Present only on the first entry into Cooldown
    pub final_standings: Option<ScoreboardSnapshot>,
}

/// Derives the countdown from phase and server time.
///
/// Countdown notifications fire only when the whole-second value changes.
#[derive(Debug)]
pub struct MatchClock {
    role: NetRole,
    phase: Replicated<MatchPhase>,
    warmup: Replicated<f32>,
    match_time: Replicated<f32>,
    cooldown: Replicated<f32>,
    last_notified: Option<u32>,
    final_standings_sent: bool,
    countdown_observers: Observers<u32>,
}

impl MatchClock {
    /// A clock entering WaitingToStart. Phases only move forward, so this is
    /// the one point where durations are fetched from the match configuration.
    pub fn new(role: NetRole, timings: &MatchTimings, outbox: Option<Outbox>) -> Self {
        let key = FieldKey::match_field;
        Self {
            role,
            phase: Replicated::new(key(Field::MatchPhase), MatchPhase::WaitingToStart, outbox.clone()),
            warmup: Replicated::new(key(Field::WarmupTime), timings.warmup, outbox.clone()),
            match_time: Replicated::new(key(Field::MatchTime), timings.match_time, outbox.clone()),
            cooldown: Replicated::new(key(Field::CooldownTime), timings.cooldown, outbox),
            last_notified: None,
            final_standings_sent: false,
            countdown_observers: Observers::new("countdown"),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        *self.phase.get()
    }

    pub fn subscribe_countdown<F>(&mut self, callback: F)
    where
        F: FnMut(&u32) -> anyhow::Result<()> + Send + 'static,
    {
        self.countdown_observers.subscribe(callback);
    }

    /// Duration of the current phase and the server time at which it ends
    fn phase_window(&self) -> (f64, f64) {
        let warmup = f64::from(*self.warmup.get());
        let match_time = f64::from(*self.match_time.get());
        let cooldown = f64::from(*self.cooldown.get());
        match self.phase() {
            MatchPhase::WaitingToStart => (warmup, warmup),
            MatchPhase::InProgress => (match_time, warmup + match_time),
            MatchPhase::Cooldown => (cooldown, warmup + match_time + cooldown),
        }
    }

    /// Seconds left in the current phase, clamped to `[0, phase duration]`
    pub fn countdown(&self, server_time: f64) -> f64 {
        let (duration, ends_at) = self.phase_window();
        (ends_at - server_time).clamp(0.0, duration.max(0.0))
    }

    /// Server time at which the current phase ends
    pub fn phase_ends_at(&self) -> f64 {
        self.phase_window().1
    }

    /// Re-evaluate the countdown. Returns the new whole-second value when it
    /// differs from the last one notified.
    pub fn tick(&mut self, server_time: f64) -> Option<u32> {
        let seconds = self.countdown(server_time).floor() as u32;
        if self.last_notified == Some(seconds) {
            return None;
        }
        self.last_notified = Some(seconds);
        self.countdown_observers.notify(&seconds);
        Some(seconds)
    }

    /// Advance to `phase`. Regressions and repeats are ignored (`Ok(None)`).
    ///
    /// Entering Cooldown yields the final standings once.
    pub fn set_phase(
        &mut self,
        phase: MatchPhase,
        scoreboard: &Scoreboard,
    ) -> Result<Option<PhaseTransition>, AuthorityError> {
        let auth = self.role.authority()?;
        if phase <= self.phase() {
            debug!(current = ?self.phase(), requested = ?phase, "Phase change ignored");
            return Ok(None);
        }

        self.phase.set(&auth, phase);
        self.last_notified = None;
        info!(phase = ?phase, "Match phase changed");

        let final_standings = match phase {
            MatchPhase::Cooldown if !self.final_standings_sent => {
                self.final_standings_sent = true;
                Some(scoreboard.snapshot())
            }
            _ => None,
        };

        Ok(Some(PhaseTransition {
            phase,
            final_standings,
        }))
    }

    pub fn replicated_fields(&self) -> Vec<FieldUpdate> {
        vec![
            self.phase.snapshot(),
            self.warmup.snapshot(),
            self.match_time.snapshot(),
            self.cooldown.snapshot(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn clock(timings: MatchTimings) -> MatchClock {
        MatchClock::new(NetRole::Authority, &timings, None)
    }

    #[test]
    fn countdown_notifies_on_whole_seconds() {
        let mut clock = clock(MatchTimings {
            warmup: 10.0,
            ..MatchTimings::default()
        });

        assert_eq!(clock.tick(3.4), Some(6));
        assert_eq!(clock.tick(3.9), None);
        assert_eq!(clock.tick(4.0), None);
        assert_eq!(clock.tick(5.0), Some(5));
        assert_eq!(clock.countdown(3.4).floor(), 6.0);
    }

    #[test]
    fn countdown_is_clamped_to_phase_duration() {
        let timings = MatchTimings {
            warmup: 10.0,
            match_time: 60.0,
            cooldown: 5.0,
        };
        let scoreboard = Scoreboard::new(NetRole::Authority, None);
        let mut clock = clock(timings);

        assert_eq!(clock.countdown(-5.0), 10.0);
        assert_eq!(clock.countdown(50.0), 0.0);

        clock
            .set_phase(MatchPhase::InProgress, &scoreboard)
            .unwrap();
        assert_eq!(clock.countdown(0.0), 60.0);
        assert_eq!(clock.countdown(40.0), 30.0);

        clock
            .set_phase(MatchPhase::Cooldown, &scoreboard)
            .unwrap();
        assert_eq!(clock.countdown(72.0), 3.0);
        assert_eq!(clock.countdown(100.0), 0.0);
    }

    #[test]
    fn phases_never_regress() {
        let timings = MatchTimings::default();
        let scoreboard = Scoreboard::new(NetRole::Authority, None);
        let mut clock = clock(timings);

        assert!(clock
            .set_phase(MatchPhase::InProgress, &scoreboard)
            .unwrap()
            .is_some());
        assert!(clock
            .set_phase(MatchPhase::WaitingToStart, &scoreboard)
            .unwrap()
            .is_none());
        assert_eq!(clock.phase(), MatchPhase::InProgress);
    }

    #[test]
    fn cooldown_reports_final_standings_once() {
        let timings = MatchTimings::default();
        let mut scoreboard = Scoreboard::new(NetRole::Authority, None);
        let winner = Uuid::new_v4();
        scoreboard.record_score(winner, 7).unwrap();
        let mut clock = clock(timings);

        let transition = clock
            .set_phase(MatchPhase::Cooldown, &scoreboard)
            .unwrap()
            .unwrap();
        let standings = transition.final_standings.unwrap();
        assert_eq!(standings.top_entities, vec![winner]);
        assert_eq!(standings.top_score, Some(7));

        assert!(clock
            .set_phase(MatchPhase::Cooldown, &scoreboard)
            .unwrap()
            .is_none());
    }

    #[test]
    fn phase_change_resets_countdown_notification() {
        let timings = MatchTimings {
            warmup: 10.0,
            match_time: 10.0,
            cooldown: 10.0,
        };
        let scoreboard = Scoreboard::new(NetRole::Authority, None);
        let mut clock = clock(timings);

        assert_eq!(clock.tick(10.0), Some(0));
        clock
            .set_phase(MatchPhase::InProgress, &scoreboard)
            .unwrap();
        assert_eq!(clock.tick(10.0), Some(10));
    }

    #[test]
    fn proxy_cannot_change_phase() {
        let timings = MatchTimings::default();
        let scoreboard = Scoreboard::new(NetRole::Authority, None);
        let mut clock = MatchClock::new(NetRole::SimulatedProxy, &timings, None);

        assert!(clock
            .set_phase(MatchPhase::InProgress, &scoreboard)
            .is_err());
        assert_eq!(clock.phase(), MatchPhase::WaitingToStart);
    }
}
