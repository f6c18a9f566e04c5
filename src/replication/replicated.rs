//! Replicated value wrapper with change detection

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game::clock::MatchPhase;
use crate::game::combat::CombatState;
use crate::game::weapon::WeaponDescriptor;

use super::authority::Authority;
use super::observers::Observers;

/// Who a replicated field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FieldOwner {
    Entity(Uuid),
    Match,
}

/// Replicated field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Health,
    MaxHealth,
    Score,
    Defeats,
    Eliminated,
    CombatState,
    EquippedWeapon,
    MagazineAmmo,
    CarriedAmmo,
    Grenades,
    MatchPhase,
    WarmupTime,
    MatchTime,
    CooldownTime,
    TopScorers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub owner: FieldOwner,
    pub field: Field,
}

impl FieldKey {
    pub fn entity(id: Uuid, field: Field) -> Self {
        Self {
            owner: FieldOwner::Entity(id),
            field,
        }
    }

    pub fn match_field(field: Field) -> Self {
        Self {
            owner: FieldOwner::Match,
            field,
        }
    }
}

/// Wire representation of a replicated value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Float(f32),
    Count(u32),
    Flag(bool),
    Combat(CombatState),
    Phase(MatchPhase),
    Weapon(Option<WeaponDescriptor>),
    Entities(Vec<Uuid>),
}

/// A single authoritative change, queued for remote observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub key: FieldKey,
    /// Per-field sequence number, strictly increasing
    pub seq: u64,
    pub value: FieldValue,
    /// Dispatched regardless of value equality
    pub forced: bool,
}

/// Types that can travel across the replication boundary
pub trait Replicable: Clone + PartialEq + Send + 'static {
    fn to_field_value(&self) -> FieldValue;
}

impl Replicable for f32 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }
}

impl Replicable for u32 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Count(*self)
    }
}

impl Replicable for bool {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Flag(*self)
    }
}

impl Replicable for Vec<Uuid> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Entities(self.clone())
    }
}

/// Sending half of the remote update queue.
///
/// Unbounded so the simulation step never waits on observers; the match task
/// drains the receiving half once per tick, preserving order.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<FieldUpdate>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FieldUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, update: FieldUpdate) {
        // Receiver gone means the match is shutting down
        let _ = self.tx.send(update);
    }
}

/// A value with automatic change dispatch to local and remote observers
#[derive(Debug)]
pub struct Replicated<T: Replicable> {
    key: FieldKey,
    value: T,
    seq: u64,
    observers: Observers<T>,
    outbox: Option<Outbox>,
}

impl<T: Replicable> Replicated<T> {
    pub fn new(key: FieldKey, value: T, outbox: Option<Outbox>) -> Self {
        Self {
            key,
            value,
            seq: 0,
            observers: Observers::new("replicated"),
            outbox,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn key(&self) -> FieldKey {
        self.key
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Register a local on-change callback
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&T) -> anyhow::Result<()> + Send + 'static,
    {
        self.observers.subscribe(callback);
    }

    /// Apply a new value, dispatching only if it differs from the current one.
    /// Returns whether a dispatch happened.
    pub fn set(&mut self, _auth: &Authority, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.dispatch(false);
        true
    }

    /// Apply a new value and dispatch unconditionally
    pub fn force_set(&mut self, _auth: &Authority, value: T) {
        self.value = value;
        self.dispatch(true);
    }

    /// Re-broadcast the current value without changing it
    pub fn rebroadcast(&mut self, _auth: &Authority) {
        self.dispatch(true);
    }

    /// Current value as a forced update, for full resynchronisation
    pub fn snapshot(&self) -> FieldUpdate {
        FieldUpdate {
            key: self.key,
            seq: self.seq,
            value: self.value.to_field_value(),
            forced: true,
        }
    }

    fn dispatch(&mut self, forced: bool) {
        self.seq += 1;
        self.observers.notify(&self.value);
        if let Some(outbox) = &self.outbox {
            outbox.push(FieldUpdate {
                key: self.key,
                seq: self.seq,
                value: self.value.to_field_value(),
                forced,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::authority::NetRole;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn health_field(outbox: Option<Outbox>) -> Replicated<f32> {
        Replicated::new(FieldKey::entity(Uuid::new_v4(), Field::Health), 100.0, outbox)
    }

    #[test]
    fn equal_value_is_suppressed() {
        let auth = NetRole::Authority.authority().unwrap();
        let (outbox, mut rx) = Outbox::channel();
        let mut health = health_field(Some(outbox));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        health.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(!health.set(&auth, 100.0));
        assert!(health.set(&auth, 80.0));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.value, FieldValue::Float(80.0));
        assert_eq!(update.seq, 1);
        assert!(!update.forced);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forced_dispatch_ignores_equality() {
        let auth = NetRole::Authority.authority().unwrap();
        let (outbox, mut rx) = Outbox::channel();
        let mut health = health_field(Some(outbox));

        health.force_set(&auth, 100.0);
        health.rebroadcast(&auth);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(first.forced && second.forced);
        assert_eq!((first.seq, second.seq), (1, 2));
    }

    #[test]
    fn updates_keep_per_field_order() {
        let auth = NetRole::Authority.authority().unwrap();
        let (outbox, mut rx) = Outbox::channel();
        let mut health = health_field(Some(outbox));

        for value in [90.0, 70.0, 40.0] {
            health.set(&auth, value);
        }

        let received: Vec<FieldValue> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|u| u.value)
            .collect();
        assert_eq!(
            received,
            vec![
                FieldValue::Float(90.0),
                FieldValue::Float(70.0),
                FieldValue::Float(40.0)
            ]
        );
    }
}
