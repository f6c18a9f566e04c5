//! Combatant - authoritative health, score and elimination state

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::replication::{
    AuthorityError, Field, FieldKey, FieldUpdate, NetRole, Outbox, Replicated,
};

use super::combat::{ActionContext, CombatComponent, CombatState, Cue};
use super::timers::TimerId;
use super::weapon::{WeaponId, WeaponInventory};

/// Per-combatant tuning, taken from the match configuration
#[derive(Debug, Clone, Copy)]
pub struct CombatantConfig {
    pub max_health: f32,
    /// Seconds from elimination to respawn request
    pub respawn_delay: f64,
}

impl Default for CombatantConfig {
    fn default() -> Self {
        Self {
            max_health: 100.0,
            respawn_delay: 3.0,
        }
    }
}

/// Latest movement/look axes from the controlling client
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub forward: f32,
    pub right: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl MoveIntent {
    fn clamped(self) -> Self {
        Self {
            forward: self.forward.clamp(-1.0, 1.0),
            right: self.right.clamp(-1.0, 1.0),
            yaw: self.yaw,
            pitch: self.pitch.clamp(-90.0, 90.0),
        }
    }
}

/// Result of a damage application
#[derive(Debug, Clone, PartialEq)]
pub struct DamageOutcome {
    /// Health after clamping
    pub health: f32,
    /// True only for the hit that brought health to zero
    pub eliminated_now: bool,
    pub cue: Option<Cue>,
}

/// Side effects of entering the Eliminated state
#[derive(Debug, Clone, PartialEq)]
pub struct EliminationEffects {
    pub dropped_weapon: Option<WeaponId>,
    pub respawn_timer: TimerId,
    pub cue: Cue,
}

/// A combatant in the match
#[derive(Debug)]
pub struct Combatant {
    pub id: Uuid,
    pub display_name: String,
    role: NetRole,
    config: CombatantConfig,

    health: Replicated<f32>,
    max_health: Replicated<f32>,
    score: Replicated<u32>,
    defeats: Replicated<u32>,
    eliminated: Replicated<bool>,
    /// Zero health already reported for this life
    zero_health_reported: bool,

    movement_enabled: bool,
    collision_enabled: bool,
    crouched: bool,
    /// Dropped weapon the combatant is standing over
    overlapping_weapon: Option<WeaponId>,
    last_input_seq: u32,
    intent: MoveIntent,

    combat: CombatComponent,
}

impl Combatant {
    pub fn new(
        id: Uuid,
        display_name: String,
        role: NetRole,
        config: CombatantConfig,
        outbox: Option<Outbox>,
    ) -> Self {
        let key = |field| FieldKey::entity(id, field);
        Self {
            id,
            display_name,
            role,
            config,
            health: Replicated::new(key(Field::Health), config.max_health, outbox.clone()),
            max_health: Replicated::new(key(Field::MaxHealth), config.max_health, outbox.clone()),
            score: Replicated::new(key(Field::Score), 0, outbox.clone()),
            defeats: Replicated::new(key(Field::Defeats), 0, outbox.clone()),
            eliminated: Replicated::new(key(Field::Eliminated), false, outbox.clone()),
            zero_health_reported: false,
            movement_enabled: true,
            collision_enabled: true,
            crouched: false,
            overlapping_weapon: None,
            last_input_seq: 0,
            intent: MoveIntent::default(),
            combat: CombatComponent::new(id, outbox),
        }
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn health(&self) -> f32 {
        *self.health.get()
    }

    pub fn max_health(&self) -> f32 {
        *self.max_health.get()
    }

    pub fn score(&self) -> u32 {
        *self.score.get()
    }

    pub fn defeats(&self) -> u32 {
        *self.defeats.get()
    }

    pub fn is_eliminated(&self) -> bool {
        *self.eliminated.get()
    }

    pub fn movement_enabled(&self) -> bool {
        self.movement_enabled
    }

    pub fn collision_enabled(&self) -> bool {
        self.collision_enabled
    }

    pub fn is_crouched(&self) -> bool {
        self.crouched
    }

    pub fn combat(&self) -> &CombatComponent {
        &self.combat
    }

    pub fn combat_state(&self) -> CombatState {
        self.combat.state()
    }

    pub fn overlapping_weapon(&self) -> Option<WeaponId> {
        self.overlapping_weapon
    }

    pub fn last_input_seq(&self) -> u32 {
        self.last_input_seq
    }

    pub fn intent(&self) -> MoveIntent {
        self.intent
    }

    /// Accept movement axes. Stale sequence numbers and input while movement
    /// is revoked are dropped.
    pub fn apply_axes(&mut self, seq: u32, intent: MoveIntent) -> bool {
        if !self.movement_enabled || seq <= self.last_input_seq {
            return false;
        }
        self.last_input_seq = seq;
        self.intent = intent.clamped();
        true
    }

    pub fn set_overlapping_weapon(&mut self, weapon: Option<WeaponId>) {
        self.overlapping_weapon = weapon;
    }

    pub fn subscribe_health<F>(&mut self, callback: F)
    where
        F: FnMut(&f32) -> anyhow::Result<()> + Send + 'static,
    {
        self.health.subscribe(callback);
    }

    /// Apply damage, clamping health to `[0, max_health]`.
    ///
    /// Health is broadcast on every call, changed or not. The call that
    /// reaches zero reports `eliminated_now`; later calls at zero do not.
    pub fn apply_damage(&mut self, amount: f32) -> Result<DamageOutcome, AuthorityError> {
        let auth = self.role.authority()?;
        let max = self.max_health();
        let health = (self.health() - amount).clamp(0.0, max);
        self.health.force_set(&auth, health);

        let eliminated_now = health == 0.0 && !self.zero_health_reported;
        if health == 0.0 {
            self.zero_health_reported = true;
        }

        let cue = if health > 0.0 && amount > 0.0 && self.combat.state() == CombatState::Unoccupied {
            Some(Cue::HitReact)
        } else {
            None
        };

        Ok(DamageOutcome {
            health,
            eliminated_now,
            cue,
        })
    }

    pub fn set_score(&mut self, value: u32) -> Result<(), AuthorityError> {
        let auth = self.role.authority()?;
        self.score.set(&auth, value);
        Ok(())
    }

    pub fn add_score(&mut self, delta: u32) -> Result<u32, AuthorityError> {
        let score = self.score().saturating_add(delta);
        self.set_score(score)?;
        Ok(score)
    }

    pub fn add_defeat(&mut self) -> Result<u32, AuthorityError> {
        let auth = self.role.authority()?;
        let defeats = self.defeats().saturating_add(1);
        self.defeats.set(&auth, defeats);
        Ok(defeats)
    }

    /// Change max health, clamping current health into the new range
    pub fn set_max_health(&mut self, max_health: f32) -> Result<(), AuthorityError> {
        let auth = self.role.authority()?;
        let max_health = max_health.max(0.0);
        self.max_health.set(&auth, max_health);
        let health = self.health().min(max_health);
        self.health.set(&auth, health);
        Ok(())
    }

    /// Re-broadcast health and max health for a presentation refresh
    pub fn refresh_hud(&mut self) -> Result<(), AuthorityError> {
        let auth = self.role.authority()?;
        self.health.rebroadcast(&auth);
        self.max_health.rebroadcast(&auth);
        Ok(())
    }

    /// Enter the Eliminated state. Idempotent: `Ok(None)` if already eliminated.
    pub fn eliminate(
        &mut self,
        ctx: &mut ActionContext<'_>,
    ) -> Result<Option<EliminationEffects>, AuthorityError> {
        let auth = self.role.authority()?;
        let Some(elimination) = self.combat.eliminate(&auth, ctx, self.config.respawn_delay) else {
            debug!(combatant = %self.id, "Already eliminated");
            return Ok(None);
        };

        self.zero_health_reported = true;
        self.movement_enabled = false;
        self.collision_enabled = false;
        self.crouched = false;
        self.intent = MoveIntent::default();
        self.eliminated.force_set(&auth, true);

        info!(
            combatant = %self.id,
            dropped_weapon = ?elimination.dropped_weapon.map(|w| w.0),
            "Combatant eliminated"
        );

        Ok(Some(EliminationEffects {
            dropped_weapon: elimination.dropped_weapon,
            respawn_timer: elimination.respawn_timer,
            cue: Cue::Eliminated,
        }))
    }

    /// Reset for a new life
    pub fn respawn(&mut self) -> Result<(), AuthorityError> {
        let auth = self.role.authority()?;
        let max = self.max_health();
        self.health.force_set(&auth, max);
        self.eliminated.set(&auth, false);
        self.zero_health_reported = false;
        self.movement_enabled = true;
        self.collision_enabled = true;
        self.crouched = false;
        self.combat.reset(&auth);
        Ok(())
    }

    /// Toggle crouch. Ignored while movement is revoked.
    pub fn toggle_crouch(&mut self) -> bool {
        if !self.movement_enabled {
            return false;
        }
        self.crouched = !self.crouched;
        true
    }

    pub fn set_aiming(&mut self, aiming: bool) {
        self.combat.set_aiming(aiming);
    }

    pub fn set_fire_held(&mut self, held: bool) {
        self.combat.set_fire_held(held);
    }

    /// Server-side hand-off with no pickup check, used for starting weapons
    pub fn equip(
        &mut self,
        ctx: &mut ActionContext<'_>,
        weapon: WeaponId,
    ) -> Result<bool, AuthorityError> {
        let auth = self.role.authority()?;
        let equipped = self.combat.equip(&auth, ctx, weapon);
        if equipped && self.overlapping_weapon == Some(weapon) {
            self.overlapping_weapon = None;
        }
        Ok(equipped)
    }

    /// Equip whatever weapon the combatant is standing over. Client equips
    /// go through here only.
    pub fn equip_overlapping(&mut self, ctx: &mut ActionContext<'_>) -> Result<bool, AuthorityError> {
        match self.overlapping_weapon {
            Some(weapon) => self.equip(ctx, weapon),
            None => Ok(false),
        }
    }

    pub fn drop_weapon(
        &mut self,
        ctx: &mut ActionContext<'_>,
    ) -> Result<Option<WeaponId>, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.drop_weapon(&auth, ctx))
    }

    pub fn fire(&mut self, ctx: &mut ActionContext<'_>) -> Result<Option<Cue>, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.fire(&auth, ctx))
    }

    pub fn finish_fire(&mut self, ctx: &mut ActionContext<'_>) -> Result<Option<Cue>, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.finish_fire(&auth, ctx))
    }

    pub fn reload(&mut self, ctx: &mut ActionContext<'_>) -> Result<Option<Cue>, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.reload(&auth, ctx))
    }

    pub fn finish_reload(&mut self, ctx: &mut ActionContext<'_>) -> Result<Option<Cue>, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.finish_reload(&auth, ctx))
    }

    pub fn throw_grenade(&mut self, ctx: &mut ActionContext<'_>) -> Result<Option<Cue>, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.throw_grenade(&auth, ctx))
    }

    pub fn finish_throw(&mut self) -> Result<bool, AuthorityError> {
        let auth = self.role.authority()?;
        Ok(self.combat.finish_throw(&auth))
    }

    /// Every replicated field, for observer resynchronisation
    pub fn replicated_fields(&self) -> Vec<FieldUpdate> {
        let mut fields = vec![
            self.health.snapshot(),
            self.max_health.snapshot(),
            self.score.snapshot(),
            self.defeats.snapshot(),
            self.eliminated.snapshot(),
        ];
        fields.extend(self.combat.replicated_fields());
        fields
    }
}

/// Convenience for building an [`ActionContext`]
pub fn action_context<'a>(
    inventory: &'a mut WeaponInventory,
    timers: &'a mut super::timers::TimerQueue,
    now: f64,
) -> ActionContext<'a> {
    ActionContext {
        inventory,
        timers,
        now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::timers::{TimerKind, TimerQueue};
    use crate::game::weapon::WeaponType;
    use crate::replication::FieldValue;
    use std::sync::{Arc, Mutex};

    fn authoritative() -> Combatant {
        Combatant::new(
            Uuid::new_v4(),
            "Tester".to_string(),
            NetRole::Authority,
            CombatantConfig::default(),
            None,
        )
    }

    #[test]
    fn damage_clamps_to_health_range() {
        let mut combatant = authoritative();

        assert_eq!(combatant.apply_damage(30.0).unwrap().health, 70.0);
        assert_eq!(combatant.apply_damage(-50.0).unwrap().health, 100.0);
        assert_eq!(combatant.apply_damage(250.0).unwrap().health, 0.0);
    }

    #[test]
    fn zero_health_is_reported_once() {
        let mut combatant = authoritative();

        let lethal = combatant.apply_damage(100.0).unwrap();
        let overkill = combatant.apply_damage(10.0).unwrap();
        let again = combatant.apply_damage(0.0).unwrap();

        assert!(lethal.eliminated_now);
        assert!(!overkill.eliminated_now);
        assert!(!again.eliminated_now);
        assert_eq!(lethal.cue, None);
    }

    #[test]
    fn health_broadcasts_even_when_unchanged() {
        let (outbox, mut rx) = Outbox::channel();
        let mut combatant = Combatant::new(
            Uuid::new_v4(),
            "Tester".to_string(),
            NetRole::Authority,
            CombatantConfig::default(),
            Some(outbox),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        combatant.subscribe_health(move |h| {
            sink.lock().unwrap().push(*h);
            Ok(())
        });

        combatant.apply_damage(0.0).unwrap();
        combatant.apply_damage(0.0).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![100.0, 100.0]);
        let updates: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(updates.len(), 2);
        assert!(updates
            .iter()
            .all(|u| u.value == FieldValue::Float(100.0) && u.forced));
    }

    #[test]
    fn lowering_max_health_clamps_health() {
        let mut combatant = authoritative();

        combatant.set_max_health(60.0).unwrap();
        assert_eq!(combatant.max_health(), 60.0);
        assert_eq!(combatant.health(), 60.0);

        // Raising the cap leaves current health alone
        combatant.set_max_health(150.0).unwrap();
        assert_eq!(combatant.max_health(), 150.0);
        assert_eq!(combatant.health(), 60.0);
        assert_eq!(combatant.apply_damage(-500.0).unwrap().health, 150.0);
    }

    #[test]
    fn hud_refresh_rebroadcasts_unchanged_values() {
        let (outbox, mut rx) = Outbox::channel();
        let mut combatant = Combatant::new(
            Uuid::new_v4(),
            "Tester".to_string(),
            NetRole::Authority,
            CombatantConfig::default(),
            Some(outbox),
        );

        combatant.refresh_hud().unwrap();
        combatant.refresh_hud().unwrap();

        let updates: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let fields: Vec<Field> = updates.iter().map(|u| u.key.field).collect();
        assert_eq!(
            fields,
            vec![Field::Health, Field::MaxHealth, Field::Health, Field::MaxHealth]
        );
        assert!(updates
            .iter()
            .all(|u| u.forced && u.value == FieldValue::Float(100.0)));
        assert_eq!(updates[2].seq, updates[0].seq + 1);
    }

    #[test]
    fn non_lethal_hit_reacts_only_when_unoccupied() {
        let mut combatant = authoritative();
        assert_eq!(combatant.apply_damage(10.0).unwrap().cue, Some(Cue::HitReact));
        assert_eq!(combatant.apply_damage(0.0).unwrap().cue, None);
    }

    #[test]
    fn proxy_cannot_mutate() {
        let mut proxy = Combatant::new(
            Uuid::new_v4(),
            "Replica".to_string(),
            NetRole::SimulatedProxy,
            CombatantConfig::default(),
            None,
        );

        let err = proxy.apply_damage(10.0).unwrap_err();
        assert_eq!(
            err,
            AuthorityError::NotAuthority {
                role: NetRole::SimulatedProxy
            }
        );
        assert!(proxy.set_score(5).is_err());
        assert!(proxy.set_max_health(50.0).is_err());
        assert!(proxy.refresh_hud().is_err());
        assert_eq!(proxy.health(), 100.0);
        assert_eq!(proxy.score(), 0);
    }

    #[test]
    fn double_elimination_has_one_effect_set() {
        let mut combatant = authoritative();
        let mut inventory = WeaponInventory::new();
        let mut timers = TimerQueue::new();
        let rifle = inventory.spawn(WeaponType::AssaultRifle);
        let mut ctx = action_context(&mut inventory, &mut timers, 0.0);
        assert!(combatant.equip(&mut ctx, rifle).unwrap());

        let first = combatant.eliminate(&mut ctx).unwrap();
        let second = combatant.eliminate(&mut ctx).unwrap();

        let effects = first.expect("first elimination");
        assert_eq!(effects.dropped_weapon, Some(rifle));
        assert_eq!(effects.cue, Cue::Eliminated);
        assert!(second.is_none());
        assert!(!combatant.movement_enabled());
        assert!(!combatant.collision_enabled());
        assert!(combatant.is_eliminated());

        let respawns = timers
            .pending_for(combatant.id)
            .filter(|t| t.kind == TimerKind::Respawn)
            .count();
        assert_eq!(respawns, 1);
        assert_eq!(inventory.equipped_by(combatant.id), None);
    }

    #[test]
    fn respawn_restores_combatant() {
        let mut combatant = authoritative();
        let mut inventory = WeaponInventory::new();
        let mut timers = TimerQueue::new();
        combatant.apply_damage(100.0).unwrap();
        combatant
            .eliminate(&mut action_context(&mut inventory, &mut timers, 0.0))
            .unwrap();

        combatant.respawn().unwrap();

        assert_eq!(combatant.health(), 100.0);
        assert!(!combatant.is_eliminated());
        assert!(combatant.movement_enabled());
        assert_eq!(combatant.combat_state(), CombatState::Unoccupied);
        assert!(combatant.apply_damage(100.0).unwrap().eliminated_now);
    }

    #[test]
    fn stale_or_revoked_axes_are_dropped() {
        let mut combatant = authoritative();
        let intent = MoveIntent {
            forward: 3.0,
            right: -0.5,
            yaw: 45.0,
            pitch: 10.0,
        };

        assert!(combatant.apply_axes(2, intent));
        assert_eq!(combatant.intent().forward, 1.0);
        assert!(!combatant.apply_axes(1, MoveIntent::default()));
        assert_eq!(combatant.last_input_seq(), 2);

        let mut inventory = WeaponInventory::new();
        let mut timers = TimerQueue::new();
        combatant
            .eliminate(&mut action_context(&mut inventory, &mut timers, 0.0))
            .unwrap();
        assert!(!combatant.apply_axes(3, intent));
        assert_eq!(combatant.intent(), MoveIntent::default());
    }

    #[test]
    fn crouch_requires_movement() {
        let mut combatant = authoritative();
        assert!(combatant.toggle_crouch());
        assert!(combatant.is_crouched());

        let mut inventory = WeaponInventory::new();
        let mut timers = TimerQueue::new();
        combatant
            .eliminate(&mut action_context(&mut inventory, &mut timers, 0.0))
            .unwrap();
        assert!(!combatant.toggle_crouch());
        assert!(!combatant.is_crouched());
    }
}
