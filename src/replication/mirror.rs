//! Observer-side copy of replicated fields

use std::collections::HashMap;

use tracing::debug;

use super::observers::Observers;
use super::replicated::{FieldKey, FieldUpdate, FieldValue};

#[derive(Debug, Clone)]
struct MirroredField {
    seq: u64,
    value: FieldValue,
}

/// Applies [`FieldUpdate`]s received from the authority.
///
/// Delivery may repeat an update; anything at or below the last applied
/// sequence of its field is discarded, so values never move backwards.
#[derive(Debug)]
pub struct ReplicaMirror {
    fields: HashMap<FieldKey, MirroredField>,
    observers: Observers<FieldUpdate>,
}

impl ReplicaMirror {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            observers: Observers::new("mirror"),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&FieldUpdate) -> anyhow::Result<()> + Send + 'static,
    {
        self.observers.subscribe(callback);
    }

    /// Apply an update, returns true if observers were notified
    pub fn apply(&mut self, update: FieldUpdate) -> bool {
        let changed = match self.fields.get(&update.key) {
            Some(current) if update.seq <= current.seq => {
                debug!(key = ?update.key, seq = update.seq, "Discarding stale update");
                return false;
            }
            Some(current) => current.value != update.value,
            None => true,
        };

        self.fields.insert(
            update.key,
            MirroredField {
                seq: update.seq,
                value: update.value.clone(),
            },
        );

        if changed || update.forced {
            self.observers.notify(&update);
            true
        } else {
            false
        }
    }

    pub fn get(&self, key: &FieldKey) -> Option<&FieldValue> {
        self.fields.get(key).map(|f| &f.value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for ReplicaMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::replicated::Field;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn update(key: FieldKey, seq: u64, health: f32, forced: bool) -> FieldUpdate {
        FieldUpdate {
            key,
            seq,
            value: FieldValue::Float(health),
            forced,
        }
    }

    #[test]
    fn duplicates_and_stale_updates_are_dropped() {
        let key = FieldKey::entity(Uuid::new_v4(), Field::Health);
        let mut mirror = ReplicaMirror::new();

        assert!(mirror.apply(update(key, 1, 90.0, false)));
        assert!(mirror.apply(update(key, 2, 60.0, false)));
        assert!(!mirror.apply(update(key, 2, 60.0, false)));
        assert!(!mirror.apply(update(key, 1, 90.0, false)));

        assert_eq!(mirror.get(&key), Some(&FieldValue::Float(60.0)));
    }

    #[test]
    fn forced_update_notifies_without_change() {
        let key = FieldKey::entity(Uuid::new_v4(), Field::Health);
        let seen = Arc::new(Mutex::new(0usize));
        let mut mirror = ReplicaMirror::new();
        let counter = seen.clone();
        mirror.subscribe(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        mirror.apply(update(key, 1, 50.0, false));
        assert!(!mirror.apply(update(key, 2, 50.0, false)));
        assert!(mirror.apply(update(key, 3, 50.0, true)));

        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn fields_are_sequenced_independently() {
        let entity = Uuid::new_v4();
        let health = FieldKey::entity(entity, Field::Health);
        let max_health = FieldKey::entity(entity, Field::MaxHealth);
        let mut mirror = ReplicaMirror::new();

        assert!(mirror.apply(update(health, 5, 10.0, false)));
        assert!(mirror.apply(update(max_health, 1, 100.0, false)));
        assert_eq!(mirror.len(), 2);
    }
}
