//! Cancelable one-shot timers keyed by the owning entity
//!
//! Timers are plain deadline entries owned by the match task. The tick loop
//! calls [`TimerQueue::advance`] with the current server time and handles
//! whatever fired; nothing is ever awaited.

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Ask the match controller to respawn an eliminated combatant
    Respawn,
    FireFinished,
    ReloadFinished,
    ThrowFinished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTimer {
    pub id: TimerId,
    pub owner: Uuid,
    pub kind: TimerKind,
    /// Server time (seconds) at which the timer fires
    pub deadline: f64,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    pending: Vec<ScheduledTimer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer `delay` seconds after `now`
    pub fn schedule(&mut self, owner: Uuid, kind: TimerKind, now: f64, delay: f64) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.pending.push(ScheduledTimer {
            id,
            owner,
            kind,
            deadline: now + delay.max(0.0),
        });
        id
    }

    /// Cancel a single timer, returns false if it already fired or never existed
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|t| t.id != id);
        self.pending.len() != before
    }

    /// Cancel every timer owned by an entity (called on teardown)
    pub fn cancel_owner(&mut self, owner: Uuid) -> usize {
        let before = self.pending.len();
        self.pending.retain(|t| t.owner != owner);
        before - self.pending.len()
    }

    /// Cancel an owner's timers of one kind
    pub fn cancel_kind(&mut self, owner: Uuid, kind: TimerKind) -> usize {
        let before = self.pending.len();
        self.pending.retain(|t| !(t.owner == owner && t.kind == kind));
        before - self.pending.len()
    }

    /// Remove and return every timer due at `now`, in deadline order
    pub fn advance(&mut self, now: f64) -> Vec<ScheduledTimer> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|t| t.deadline <= now);
        self.pending = pending;
        due.sort_by(|a, b| a.deadline.total_cmp(&b.deadline).then(a.id.cmp(&b.id)));
        due
    }

    pub fn pending_for(&self, owner: Uuid) -> impl Iterator<Item = &ScheduledTimer> {
        self.pending.iter().filter(move |t| t.owner == owner)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        let owner = Uuid::new_v4();
        timers.schedule(owner, TimerKind::Respawn, 0.0, 3.0);
        timers.schedule(owner, TimerKind::FireFinished, 0.0, 0.15);

        assert!(timers.advance(0.1).is_empty());
        let fired = timers.advance(5.0);
        let kinds: Vec<TimerKind> = fired.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TimerKind::FireFinished, TimerKind::Respawn]);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancelled_owner_timers_never_fire() {
        let mut timers = TimerQueue::new();
        let doomed = Uuid::new_v4();
        let survivor = Uuid::new_v4();
        timers.schedule(doomed, TimerKind::Respawn, 0.0, 3.0);
        timers.schedule(survivor, TimerKind::Respawn, 0.0, 3.0);

        assert_eq!(timers.cancel_owner(doomed), 1);

        let fired = timers.advance(10.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].owner, survivor);
    }

    #[test]
    fn cancel_single_timer() {
        let mut timers = TimerQueue::new();
        let id = timers.schedule(Uuid::new_v4(), TimerKind::ReloadFinished, 1.0, 2.0);
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(timers.advance(100.0).is_empty());
    }
}
