//! Weapons and the world-owned weapon inventory

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Handle to a weapon owned by the world inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeaponId(pub Uuid);

impl WeaponId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WeaponId {
    fn default() -> Self {
        Self::new()
    }
}

/// Weapon kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponType {
    AssaultRifle,
    RocketLauncher,
    Pistol,
    Smg,
    Shotgun,
    SniperRifle,
    GrenadeLauncher,
}

impl WeaponType {
    pub const ALL: [WeaponType; 7] = [
        WeaponType::AssaultRifle,
        WeaponType::RocketLauncher,
        WeaponType::Pistol,
        WeaponType::Smg,
        WeaponType::Shotgun,
        WeaponType::SniperRifle,
        WeaponType::GrenadeLauncher,
    ];

    /// Reload animation section consumed by the animation layer
    pub fn reload_section(self) -> &'static str {
        match self {
            WeaponType::AssaultRifle => "Rifle",
            WeaponType::RocketLauncher => "Rocket",
            WeaponType::Pistol => "Pistol",
            WeaponType::Smg => "SMG",
            WeaponType::Shotgun => "ShotGun",
            WeaponType::SniperRifle => "SniperRifle",
            WeaponType::GrenadeLauncher => "GrenadeLauncher",
        }
    }

    /// Explosive weapons deal radial damage with falloff
    pub fn is_explosive(self) -> bool {
        matches!(self, WeaponType::RocketLauncher | WeaponType::GrenadeLauncher)
    }
}

/// Weapon stats per weapon type
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Damage per hit (base damage for explosives)
    pub damage: f32,
    /// Seconds between shots
    pub fire_delay: f32,
    /// Keeps firing while the trigger is held
    pub automatic: bool,
    /// Rounds per magazine
    pub magazine_capacity: u32,
    /// Starting carried ammo for this weapon type
    pub starting_carried_ammo: u32,
    /// Reload time in seconds
    pub reload_duration: f32,
}

impl WeaponStats {
    pub fn for_type(weapon_type: WeaponType) -> Self {
        match weapon_type {
            WeaponType::AssaultRifle => Self {
                damage: 15.0,
                fire_delay: 0.15,
                automatic: true,
                magazine_capacity: 30,
                starting_carried_ammo: 60,
                reload_duration: 2.0,
            },
            WeaponType::RocketLauncher => Self {
                damage: 100.0,
                fire_delay: 1.0,
                automatic: false,
                magazine_capacity: 1,
                starting_carried_ammo: 4,
                reload_duration: 2.5,
            },
            WeaponType::Pistol => Self {
                damage: 20.0,
                fire_delay: 0.3,
                automatic: false,
                magazine_capacity: 12,
                starting_carried_ammo: 36,
                reload_duration: 1.2,
            },
            WeaponType::Smg => Self {
                damage: 8.0,
                fire_delay: 0.08,
                automatic: true,
                magazine_capacity: 40,
                starting_carried_ammo: 80,
                reload_duration: 1.8,
            },
            WeaponType::Shotgun => Self {
                damage: 60.0,
                fire_delay: 0.9,
                automatic: false,
                magazine_capacity: 6,
                starting_carried_ammo: 18,
                reload_duration: 2.4,
            },
            WeaponType::SniperRifle => Self {
                damage: 90.0,
                fire_delay: 1.5,
                automatic: false,
                magazine_capacity: 5,
                starting_carried_ammo: 10,
                reload_duration: 3.0,
            },
            WeaponType::GrenadeLauncher => Self {
                damage: 80.0,
                fire_delay: 0.8,
                automatic: false,
                magazine_capacity: 6,
                starting_carried_ammo: 12,
                reload_duration: 2.6,
            },
        }
    }
}

/// Radial damage with falloff between an inner and outer radius
#[derive(Debug, Clone, Copy)]
pub struct RadialDamage {
    pub base_damage: f32,
    pub minimum_damage: f32,
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub falloff: f32,
}

impl RadialDamage {
    pub fn for_explosive(base_damage: f32) -> Self {
        Self {
            base_damage,
            minimum_damage: 10.0,
            inner_radius: 200.0,
            outer_radius: 500.0,
            falloff: 1.0,
        }
    }

    /// Falloff profile for an explosive weapon type, `None` for hitscan types
    pub fn for_weapon(weapon_type: WeaponType) -> Option<Self> {
        weapon_type
            .is_explosive()
            .then(|| Self::for_explosive(WeaponStats::for_type(weapon_type).damage))
    }

    /// Damage at a distance from the blast origin
    pub fn damage_at(&self, distance: f32) -> f32 {
        let distance = distance.max(0.0);
        if distance <= self.inner_radius {
            return self.base_damage;
        }
        if distance > self.outer_radius {
            return 0.0;
        }
        let span = (self.outer_radius - self.inner_radius).max(f32::EPSILON);
        let t = ((self.outer_radius - distance) / span).powf(self.falloff);
        self.minimum_damage + (self.base_damage - self.minimum_damage) * t
    }
}

/// Presentation-facing weapon summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeaponDescriptor {
    pub id: WeaponId,
    pub weapon_type: WeaponType,
    pub magazine_capacity: u32,
}

/// Who currently holds a weapon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponHolder {
    /// Lying in the world, available for pickup
    Dropped,
    Equipped(Uuid),
}

#[derive(Debug, Clone)]
pub struct Weapon {
    pub id: WeaponId,
    pub weapon_type: WeaponType,
    pub stats: WeaponStats,
    pub magazine_ammo: u32,
    pub holder: WeaponHolder,
    /// Order in which the weapon was last left on the ground
    dropped_seq: u64,
}

impl Weapon {
    fn new(weapon_type: WeaponType) -> Self {
        let stats = WeaponStats::for_type(weapon_type);
        Self {
            id: WeaponId::new(),
            weapon_type,
            stats,
            magazine_ammo: stats.magazine_capacity,
            holder: WeaponHolder::Dropped,
            dropped_seq: 0,
        }
    }

    pub fn descriptor(&self) -> WeaponDescriptor {
        WeaponDescriptor {
            id: self.id,
            weapon_type: self.weapon_type,
            magazine_capacity: self.stats.magazine_capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.magazine_ammo == 0
    }

    pub fn is_full(&self) -> bool {
        self.magazine_ammo >= self.stats.magazine_capacity
    }

    pub fn missing_rounds(&self) -> u32 {
        self.stats.magazine_capacity.saturating_sub(self.magazine_ammo)
    }
}

/// Result of a successful equip handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquipOutcome {
    pub equipped: WeaponId,
    /// Weapon the owner was holding before, now dropped
    pub replaced: Option<WeaponId>,
}

/// Dropped weapons kept in the world before the oldest are cleared away
pub const DROPPED_WEAPON_LIMIT: usize = 32;

/// World-level weapon storage. Owns every weapon; combatants hold ids.
#[derive(Debug, Default)]
pub struct WeaponInventory {
    weapons: HashMap<WeaponId, Weapon>,
    /// Owner -> equipped weapon
    equipped: HashMap<Uuid, WeaponId>,
    drop_seq: u64,
}

impl WeaponInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a weapon into the world
    pub fn spawn(&mut self, weapon_type: WeaponType) -> WeaponId {
        let mut weapon = Weapon::new(weapon_type);
        weapon.dropped_seq = self.next_drop_seq();
        let id = weapon.id;
        self.weapons.insert(id, weapon);
        id
    }

    pub fn get(&self, id: WeaponId) -> Option<&Weapon> {
        self.weapons.get(&id)
    }

    pub fn get_mut(&mut self, id: WeaponId) -> Option<&mut Weapon> {
        self.weapons.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.weapons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weapons.is_empty()
    }

    pub fn dropped_count(&self) -> usize {
        self.weapons
            .values()
            .filter(|w| w.holder == WeaponHolder::Dropped)
            .count()
    }

    /// The weapon currently equipped by `owner`
    pub fn equipped_by(&self, owner: Uuid) -> Option<WeaponId> {
        self.equipped.get(&owner).copied()
    }

    /// Hand a dropped weapon to `owner`, dropping whatever they held before.
    ///
    /// Fails (returns `None`) if the weapon does not exist or is held by
    /// someone else.
    pub fn equip(&mut self, id: WeaponId, owner: Uuid) -> Option<EquipOutcome> {
        match self.weapons.get(&id).map(|w| w.holder) {
            Some(WeaponHolder::Dropped) => {}
            Some(WeaponHolder::Equipped(holder)) if holder == owner => {
                return Some(EquipOutcome {
                    equipped: id,
                    replaced: None,
                });
            }
            Some(WeaponHolder::Equipped(holder)) => {
                debug!(weapon_id = %id.0, holder = %holder, "Weapon already held");
                return None;
            }
            None => return None,
        }

        let replaced = self.drop_from(owner);
        if let Some(weapon) = self.weapons.get_mut(&id) {
            weapon.holder = WeaponHolder::Equipped(owner);
        }
        self.equipped.insert(owner, id);

        Some(EquipOutcome {
            equipped: id,
            replaced,
        })
    }

    /// Return `owner`'s weapon to the world
    pub fn drop_from(&mut self, owner: Uuid) -> Option<WeaponId> {
        let id = self.equipped.remove(&owner)?;
        let seq = self.next_drop_seq();
        if let Some(weapon) = self.weapons.get_mut(&id) {
            weapon.holder = WeaponHolder::Dropped;
            weapon.dropped_seq = seq;
        }
        Some(id)
    }

    /// Remove a weapon from the world entirely
    pub fn destroy(&mut self, id: WeaponId) -> Option<Weapon> {
        let weapon = self.weapons.remove(&id)?;
        if let WeaponHolder::Equipped(owner) = weapon.holder {
            self.equipped.remove(&owner);
        }
        Some(weapon)
    }

    /// Destroy the longest-dropped weapons until at most `limit` remain on
    /// the ground. Returns the destroyed ids.
    pub fn prune_dropped(&mut self, limit: usize) -> Vec<WeaponId> {
        let mut dropped: Vec<(u64, WeaponId)> = self
            .weapons
            .values()
            .filter(|w| w.holder == WeaponHolder::Dropped)
            .map(|w| (w.dropped_seq, w.id))
            .collect();
        if dropped.len() <= limit {
            return Vec::new();
        }

        dropped.sort_unstable_by_key(|(seq, _)| *seq);
        let excess = dropped.len() - limit;
        let destroyed: Vec<WeaponId> = dropped.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &destroyed {
            self.destroy(*id);
        }
        destroyed
    }

    fn next_drop_seq(&mut self) -> u64 {
        self.drop_seq += 1;
        self.drop_seq
    }
}
