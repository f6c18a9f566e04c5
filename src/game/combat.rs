//! Combat state machine - firing, reloading, grenades, elimination

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::replication::{
    Authority, Field, FieldKey, FieldUpdate, FieldValue, Outbox, Replicable, Replicated,
};

use super::timers::{TimerId, TimerKind, TimerQueue};
use super::weapon::{WeaponDescriptor, WeaponId, WeaponInventory, WeaponType};

/// Seconds a grenade throw keeps the combatant busy
pub const GRENADE_THROW_DURATION: f64 = 0.8;

/// Grenades carried after each spawn
pub const STARTING_GRENADES: u32 = 4;

/// Permitted-action phase of a combatant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatState {
    Unoccupied,
    Firing,
    Reloading,
    ThrowingGrenade,
    /// Terminal until respawn
    Eliminated,
}

impl Replicable for CombatState {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Combat(*self)
    }
}

impl Replicable for Option<WeaponDescriptor> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Weapon(*self)
    }
}

/// Discrete events for the animation/audio layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum Cue {
    Fire { weapon_type: WeaponType, aiming: bool },
    Reload { section: String },
    HitReact,
    Eliminated,
    ThrowGrenade,
}

/// World state a combat action may touch
pub struct ActionContext<'a> {
    pub inventory: &'a mut WeaponInventory,
    pub timers: &'a mut TimerQueue,
    /// Current server time in seconds
    pub now: f64,
}

/// What happened when a combatant entered the Eliminated state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatElimination {
    /// Weapon returned to the world
    pub dropped_weapon: Option<WeaponId>,
    pub respawn_timer: TimerId,
}

/// Per-combatant combat component
#[derive(Debug)]
pub struct CombatComponent {
    owner: Uuid,
    state: Replicated<CombatState>,
    /// Non-owning handle into the world inventory
    equipped: Option<WeaponId>,
    equipped_weapon: Replicated<Option<WeaponDescriptor>>,
    magazine_ammo: Replicated<u32>,
    /// Carried ammo of the equipped weapon's type
    carried_ammo: Replicated<u32>,
    carried_by_type: HashMap<WeaponType, u32>,
    grenades: Replicated<u32>,
    aiming: bool,
    fire_held: bool,
}

impl CombatComponent {
    pub fn new(owner: Uuid, outbox: Option<Outbox>) -> Self {
        let key = |field| FieldKey::entity(owner, field);
        Self {
            owner,
            state: Replicated::new(key(Field::CombatState), CombatState::Unoccupied, outbox.clone()),
            equipped: None,
            equipped_weapon: Replicated::new(key(Field::EquippedWeapon), None, outbox.clone()),
            magazine_ammo: Replicated::new(key(Field::MagazineAmmo), 0, outbox.clone()),
            carried_ammo: Replicated::new(key(Field::CarriedAmmo), 0, outbox.clone()),
            carried_by_type: HashMap::new(),
            grenades: Replicated::new(key(Field::Grenades), STARTING_GRENADES, outbox),
            aiming: false,
            fire_held: false,
        }
    }

    pub fn state(&self) -> CombatState {
        *self.state.get()
    }

    pub fn equipped(&self) -> Option<WeaponId> {
        self.equipped
    }

    pub fn is_aiming(&self) -> bool {
        self.aiming
    }

    pub fn is_fire_held(&self) -> bool {
        self.fire_held
    }

    pub fn grenades(&self) -> u32 {
        *self.grenades.get()
    }

    pub fn magazine_ammo(&self) -> u32 {
        *self.magazine_ammo.get()
    }

    pub fn carried_ammo(&self) -> u32 {
        *self.carried_ammo.get()
    }

    pub fn carried_ammo_for(&self, weapon_type: WeaponType) -> u32 {
        self.carried_by_type.get(&weapon_type).copied().unwrap_or(0)
    }

    /// Aiming is ignored while eliminated
    pub fn set_aiming(&mut self, aiming: bool) {
        self.aiming = aiming && self.state() != CombatState::Eliminated;
    }

    pub fn set_fire_held(&mut self, held: bool) {
        self.fire_held = held && self.state() != CombatState::Eliminated;
    }

    pub fn subscribe_state<F>(&mut self, callback: F)
    where
        F: FnMut(&CombatState) -> anyhow::Result<()> + Send + 'static,
    {
        self.state.subscribe(callback);
    }

    /// Take a weapon from the world. Only from Unoccupied.
    pub fn equip(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>, weapon: WeaponId) -> bool {
        if self.state() != CombatState::Unoccupied {
            debug!(owner = %self.owner, state = ?self.state(), "Equip ignored");
            return false;
        }
        let Some(outcome) = ctx.inventory.equip(weapon, self.owner) else {
            return false;
        };
        if outcome.replaced.is_some() {
            debug!(owner = %self.owner, "Previous weapon dropped on equip");
        }
        let Some(weapon) = ctx.inventory.get(outcome.equipped) else {
            return false;
        };

        let carried = *self
            .carried_by_type
            .entry(weapon.weapon_type)
            .or_insert(weapon.stats.starting_carried_ammo);

        self.equipped = Some(weapon.id);
        self.equipped_weapon.set(auth, Some(weapon.descriptor()));
        self.magazine_ammo.set(auth, weapon.magazine_ammo);
        self.carried_ammo.set(auth, carried);
        true
    }

    /// Player-initiated drop. Only from Unoccupied.
    pub fn drop_weapon(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<WeaponId> {
        if self.state() != CombatState::Unoccupied {
            return None;
        }
        self.release_weapon(auth, ctx)
    }

    fn release_weapon(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<WeaponId> {
        self.equipped.take()?;
        let dropped = ctx.inventory.drop_from(self.owner);
        self.equipped_weapon.force_set(auth, None);
        self.magazine_ammo.set(auth, 0);
        self.carried_ammo.set(auth, 0);
        dropped
    }

    /// Fire one round. No-op unless Unoccupied with a loaded weapon.
    pub fn fire(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<Cue> {
        if self.state() != CombatState::Unoccupied {
            debug!(owner = %self.owner, state = ?self.state(), "Fire ignored");
            return None;
        }
        let weapon = ctx.inventory.get_mut(self.equipped?)?;
        if weapon.is_empty() {
            return None;
        }

        weapon.magazine_ammo -= 1;
        let rounds = weapon.magazine_ammo;
        let weapon_type = weapon.weapon_type;
        let delay = f64::from(weapon.stats.fire_delay);

        self.state.set(auth, CombatState::Firing);
        self.magazine_ammo.set(auth, rounds);
        ctx.timers
            .schedule(self.owner, TimerKind::FireFinished, ctx.now, delay);

        Some(Cue::Fire {
            weapon_type,
            aiming: self.aiming,
        })
    }

    /// Fire delay elapsed. Automatic weapons keep firing while the trigger is
    /// held; an empty magazine reloads if ammo is carried.
    pub fn finish_fire(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<Cue> {
        if self.state() != CombatState::Firing {
            return None;
        }
        self.state.set(auth, CombatState::Unoccupied);

        let weapon = ctx.inventory.get(self.equipped?)?;
        let (automatic, empty) = (weapon.stats.automatic, weapon.is_empty());
        if self.fire_held && automatic && !empty {
            self.fire(auth, ctx)
        } else if empty {
            self.reload(auth, ctx)
        } else {
            None
        }
    }

    /// Start a reload. No-op unless Unoccupied with ammo to load.
    pub fn reload(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<Cue> {
        if self.state() != CombatState::Unoccupied {
            debug!(owner = %self.owner, state = ?self.state(), "Reload ignored");
            return None;
        }
        let weapon = ctx.inventory.get(self.equipped?)?;
        if weapon.is_full() || self.carried_ammo_for(weapon.weapon_type) == 0 {
            return None;
        }
        let section = weapon.weapon_type.reload_section().to_string();
        let duration = f64::from(weapon.stats.reload_duration);

        self.state.set(auth, CombatState::Reloading);
        ctx.timers
            .schedule(self.owner, TimerKind::ReloadFinished, ctx.now, duration);

        Some(Cue::Reload { section })
    }

    /// Reload elapsed: move carried rounds into the magazine
    pub fn finish_reload(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<Cue> {
        if self.state() != CombatState::Reloading {
            return None;
        }
        self.state.set(auth, CombatState::Unoccupied);

        let weapon = ctx.inventory.get_mut(self.equipped?)?;
        let carried = self.carried_by_type.entry(weapon.weapon_type).or_insert(0);
        let loaded = weapon.missing_rounds().min(*carried);
        weapon.magazine_ammo += loaded;
        *carried -= loaded;

        let (rounds, remaining) = (weapon.magazine_ammo, *carried);
        self.magazine_ammo.set(auth, rounds);
        self.carried_ammo.set(auth, remaining);

        if self.fire_held {
            self.fire(auth, ctx)
        } else {
            None
        }
    }

    /// Throw a grenade. No-op unless Unoccupied, armed and carrying grenades.
    pub fn throw_grenade(&mut self, auth: &Authority, ctx: &mut ActionContext<'_>) -> Option<Cue> {
        if self.state() != CombatState::Unoccupied || self.equipped.is_none() {
            debug!(owner = %self.owner, state = ?self.state(), "Throw ignored");
            return None;
        }
        let grenades = self.grenades();
        if grenades == 0 {
            return None;
        }

        self.state.set(auth, CombatState::ThrowingGrenade);
        self.grenades.set(auth, grenades - 1);
        ctx.timers.schedule(
            self.owner,
            TimerKind::ThrowFinished,
            ctx.now,
            GRENADE_THROW_DURATION,
        );

        Some(Cue::ThrowGrenade)
    }

    pub fn finish_throw(&mut self, auth: &Authority) -> bool {
        if self.state() != CombatState::ThrowingGrenade {
            return false;
        }
        self.state.set(auth, CombatState::Unoccupied);
        true
    }

    /// Enter Eliminated from any state. Idempotent: only the first call
    /// drops the weapon and schedules the respawn timer.
    pub fn eliminate(
        &mut self,
        auth: &Authority,
        ctx: &mut ActionContext<'_>,
        respawn_delay: f64,
    ) -> Option<CombatElimination> {
        if self.state() == CombatState::Eliminated {
            return None;
        }

        for kind in [
            TimerKind::FireFinished,
            TimerKind::ReloadFinished,
            TimerKind::ThrowFinished,
        ] {
            ctx.timers.cancel_kind(self.owner, kind);
        }

        let dropped_weapon = self.release_weapon(auth, ctx);
        self.aiming = false;
        self.fire_held = false;
        self.state.force_set(auth, CombatState::Eliminated);

        let respawn_timer = ctx
            .timers
            .schedule(self.owner, TimerKind::Respawn, ctx.now, respawn_delay);

        Some(CombatElimination {
            dropped_weapon,
            respawn_timer,
        })
    }

    /// Respawn reset
    pub fn reset(&mut self, auth: &Authority) {
        self.aiming = false;
        self.fire_held = false;
        self.state.set(auth, CombatState::Unoccupied);
        self.grenades.set(auth, STARTING_GRENADES);
    }

    pub fn replicated_fields(&self) -> Vec<FieldUpdate> {
        vec![
            self.state.snapshot(),
            self.equipped_weapon.snapshot(),
            self.magazine_ammo.snapshot(),
            self.carried_ammo.snapshot(),
            self.grenades.snapshot(),
        ]
    }
}
