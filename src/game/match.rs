//! Match state and authoritative tick loop

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::replication::{FieldUpdate, NetRole, Outbox};
use crate::util::time::{SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{
    Action, ClientMsg, CombatantSummary, MatchSnapshot, PlayerInfo, ServerMsg,
};

use super::clock::{MatchClock, MatchPhase, MatchTimings};
use super::combat::{ActionContext, Cue};
use super::combatant::{Combatant, CombatantConfig};
use super::scoreboard::Scoreboard;
use super::timers::{ScheduledTimer, TimerKind, TimerQueue};
use super::weapon::{RadialDamage, WeaponId, WeaponInventory, WeaponType, DROPPED_WEAPON_LIMIT};
use super::PlayerInput;

/// Match tuning, derived from configuration
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub timings: MatchTimings,
    pub combatant: CombatantConfig,
    pub max_players: usize,
    /// Hand every new life a random weapon
    pub starting_weapon: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            timings: MatchTimings::default(),
            combatant: CombatantConfig::default(),
            max_players: 16,
            starting_weapon: true,
        }
    }
}

/// How much damage a hit deals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DamageKind {
    Direct { amount: f32 },
    /// Explosion from an explosive weapon, `distance` from the blast origin
    Radial { weapon: WeaponType, distance: f32 },
}

impl DamageKind {
    /// Resolved damage, or `None` when the hit is malformed (negative or
    /// non-finite values, radial damage from a non-explosive weapon)
    pub fn amount(self) -> Option<f32> {
        let amount = match self {
            DamageKind::Direct { amount } => amount,
            DamageKind::Radial { weapon, distance } => {
                if !distance.is_finite() {
                    return None;
                }
                RadialDamage::for_weapon(weapon)?.damage_at(distance)
            }
        };
        (amount.is_finite() && amount >= 0.0).then_some(amount)
    }
}

/// A resolved hit, reported by the hit-detection collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageRequest {
    pub target: Uuid,
    #[serde(default)]
    pub instigator: Option<Uuid>,
    #[serde(flatten)]
    pub kind: DamageKind,
}

/// Everything the match task consumes
#[derive(Debug, Clone)]
pub enum MatchInput {
    Player(PlayerInput),
    Damage(DamageRequest),
    /// Pickup overlap began (`Some`) or ended (`None`)
    Overlap {
        combatant: Uuid,
        weapon: Option<WeaponId>,
    },
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<MatchInput>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    pub snapshot_rx: watch::Receiver<MatchSnapshot>,
    pub player_count: Arc<AtomicUsize>,
    pub max_players: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn latest_snapshot(&self) -> MatchSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    pub fn handles(&self) -> Vec<MatchHandle> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }

    /// Find a match with available slots that is not winding down
    pub fn find_available_match(&self) -> Option<MatchHandle> {
        self.matches
            .iter()
            .find(|entry| {
                let handle = entry.value();
                handle.player_count() < handle.max_players
                    && handle.snapshot_rx.borrow().phase != MatchPhase::Cooldown
            })
            .map(|entry| entry.value().clone())
    }

    /// Start a new match task; it removes itself from the registry when done
    pub fn spawn_match(self: &Arc<Self>, settings: MatchSettings) -> MatchHandle {
        let (game_match, handle) = GameMatch::new(Uuid::new_v4(), rand::random(), settings);
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        let id = handle.id;
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(&id);
        });

        handle
    }

    pub fn find_or_spawn(self: &Arc<Self>, settings: MatchSettings) -> MatchHandle {
        self.find_available_match()
            .unwrap_or_else(|| self.spawn_match(settings))
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match
pub struct GameMatch {
    id: Uuid,
    settings: MatchSettings,
    tick: u64,
    /// Server time of the last step, in seconds since the match started
    now: f64,
    rng: ChaCha8Rng,
    clock: MatchClock,
    scoreboard: Scoreboard,
    combatants: HashMap<Uuid, Combatant>,
    inventory: WeaponInventory,
    timers: TimerQueue,
    outbox: Outbox,
    updates_rx: mpsc::UnboundedReceiver<FieldUpdate>,
    input_rx: mpsc::Receiver<MatchInput>,
    events_tx: broadcast::Sender<ServerMsg>,
    snapshot_tx: watch::Sender<MatchSnapshot>,
    player_count: Arc<AtomicUsize>,
    /// Set once someone has joined; an emptied match then ends
    had_players: bool,
    ended: bool,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, seed: u64, settings: MatchSettings) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(1024);
        let (snapshot_tx, snapshot_rx) = watch::channel(MatchSnapshot::empty(id));
        let (outbox, updates_rx) = Outbox::channel();
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            input_tx,
            events_tx: events_tx.clone(),
            snapshot_rx,
            player_count: player_count.clone(),
            max_players: settings.max_players,
            created_at: chrono::Utc::now(),
        };

        let game_match = Self {
            id,
            settings,
            tick: 0,
            now: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock: MatchClock::new(NetRole::Authority, &settings.timings, Some(outbox.clone())),
            scoreboard: Scoreboard::new(NetRole::Authority, Some(outbox.clone())),
            combatants: HashMap::new(),
            inventory: WeaponInventory::new(),
            timers: TimerQueue::new(),
            outbox,
            updates_rx,
            input_rx,
            events_tx,
            snapshot_tx,
            player_count,
            had_players: false,
            ended: false,
        };

        (game_match, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> MatchPhase {
        self.clock.phase()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn combatant(&self, id: &Uuid) -> Option<&Combatant> {
        self.combatants.get(id)
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn inventory(&self) -> &WeaponInventory {
        &self.inventory
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Seconds since the match started, as of the last step
    pub fn server_time(&self) -> f64 {
        self.now
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(match_id = %self.id, "Match started");

        let tick_duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let snapshot_every = u64::from((SIMULATION_TPS / SNAPSHOT_TPS).max(1));
        let started = Instant::now();

        loop {
            tick_interval.tick().await;

            self.drain_inputs();
            // Skipped ticks must not slow the clock down
            self.step(started.elapsed().as_secs_f64());

            if self.tick % snapshot_every == 0 || self.ended {
                self.publish_snapshot();
            }

            if self.ended {
                break;
            }
        }

        let _ = self.events_tx.send(ServerMsg::MatchEnd {
            standings: self.scoreboard.snapshot(),
        });
        info!(match_id = %self.id, "Match ended");
    }

    /// Process all pending inputs
    pub fn drain_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            self.handle_input(input);
        }
    }

    pub fn handle_input(&mut self, input: MatchInput) {
        match input {
            MatchInput::Player(PlayerInput { user_id, msg, .. }) => match msg {
                ClientMsg::JoinMatch { display_name } => self.handle_join(user_id, display_name),
                ClientMsg::Action { action } => self.handle_action(user_id, action),
                ClientMsg::Axes { seq, intent } => {
                    if let Some(combatant) = self.combatants.get_mut(&user_id) {
                        combatant.apply_axes(seq, intent);
                    }
                }
                // Answered by the connection
                ClientMsg::Ping { .. } => {}
                ClientMsg::LeaveMatch => self.handle_leave(user_id),
            },
            MatchInput::Damage(request) => self.handle_damage(request),
            MatchInput::Overlap { combatant, weapon } => {
                if let Some(c) = self.combatants.get_mut(&combatant) {
                    c.set_overlapping_weapon(weapon);
                }
            }
        }
        self.flush_replication();
    }

    /// Advance the simulation by one tick, to server time `now`
    pub fn step(&mut self, now: f64) {
        self.tick += 1;
        self.now = self.now.max(now);
        let now = self.now;

        for timer in self.timers.advance(now) {
            self.fire_timer(timer, now);
        }

        self.advance_phase(now);

        if let Some(seconds) = self.clock.tick(now) {
            self.emit(ServerMsg::Countdown {
                phase: self.clock.phase(),
                seconds,
            });
        }

        if self.had_players && self.combatants.is_empty() {
            info!(match_id = %self.id, "All players left, ending match");
            self.ended = true;
        }

        self.flush_replication();
    }

    fn advance_phase(&mut self, now: f64) {
        if now < self.clock.phase_ends_at() {
            return;
        }
        let next = match self.clock.phase() {
            MatchPhase::WaitingToStart => MatchPhase::InProgress,
            MatchPhase::InProgress => MatchPhase::Cooldown,
            MatchPhase::Cooldown => {
                self.ended = true;
                return;
            }
        };

        match self.clock.set_phase(next, &self.scoreboard) {
            Ok(Some(transition)) => {
                self.emit(ServerMsg::MatchStateSet {
                    phase: transition.phase,
                });
                if let Some(standings) = transition.final_standings {
                    self.emit(ServerMsg::FinalStandings { standings });
                }
                if transition.phase == MatchPhase::Cooldown {
                    for combatant in self.combatants.values_mut() {
                        combatant.set_fire_held(false);
                        combatant.set_aiming(false);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(match_id = %self.id, error = %e, "Phase change rejected"),
        }
    }

    fn fire_timer(&mut self, timer: ScheduledTimer, now: f64) {
        let Some(combatant) = self.combatants.get_mut(&timer.owner) else {
            return;
        };
        let mut ctx = ActionContext {
            inventory: &mut self.inventory,
            timers: &mut self.timers,
            now,
        };

        let result = match timer.kind {
            TimerKind::Respawn => {
                let respawned = combatant.respawn().map(|()| None);
                if respawned.is_ok() && self.settings.starting_weapon {
                    let weapon = random_weapon(&mut self.rng, ctx.inventory);
                    if let Err(e) = combatant.equip(&mut ctx, weapon) {
                        warn!(error = %e, "Starting weapon rejected");
                    }
                }
                info!(match_id = %self.id, combatant = %timer.owner, "Combatant respawned");
                respawned
            }
            TimerKind::FireFinished => combatant.finish_fire(&mut ctx),
            TimerKind::ReloadFinished => combatant.finish_reload(&mut ctx),
            TimerKind::ThrowFinished => combatant.finish_throw().map(|_| None),
        };

        match result {
            Ok(Some(cue)) => self.emit_cue(timer.owner, cue),
            Ok(None) => {}
            Err(e) => warn!(match_id = %self.id, error = %e, "Timer action rejected"),
        }
    }

    /// Handle player join request
    fn handle_join(&mut self, user_id: Uuid, display_name: Option<String>) {
        if self.combatants.contains_key(&user_id) {
            warn!(user_id = %user_id, "Player already in match");
            return;
        }

        if self.combatants.len() >= self.settings.max_players {
            warn!(match_id = %self.id, user_id = %user_id, "Match full, join rejected");
            return;
        }

        let display_name =
            display_name.unwrap_or_else(|| format!("Player_{}", &user_id.to_string()[..8]));
        let mut combatant = Combatant::new(
            user_id,
            display_name.clone(),
            NetRole::Authority,
            self.settings.combatant,
            Some(self.outbox.clone()),
        );

        if self.settings.starting_weapon {
            let weapon = random_weapon(&mut self.rng, &mut self.inventory);
            let mut ctx = ActionContext {
                inventory: &mut self.inventory,
                timers: &mut self.timers,
                now: self.now,
            };
            if let Err(e) = combatant.equip(&mut ctx, weapon) {
                warn!(error = %e, "Starting weapon rejected");
            }
        }

        let mut fields = self.clock.replicated_fields();
        fields.extend(self.scoreboard.replicated_fields());
        for other in self.combatants.values() {
            fields.extend(other.replicated_fields());
        }
        fields.extend(combatant.replicated_fields());

        self.combatants.insert(user_id, combatant);
        self.had_players = true;
        self.player_count
            .store(self.combatants.len(), Ordering::Relaxed);

        self.emit(ServerMsg::PlayerJoined {
            player: PlayerInfo {
                user_id,
                display_name,
            },
        });
        self.emit(ServerMsg::MatchJoined {
            match_id: self.id,
            combatant_id: user_id,
            fields,
        });

        info!(
            match_id = %self.id,
            user_id = %user_id,
            player_count = self.combatants.len(),
            "Player joined match"
        );
    }

    /// Handle player leave: the combatant is destroyed and its timers cancelled
    fn handle_leave(&mut self, user_id: Uuid) {
        if self.combatants.remove(&user_id).is_none() {
            return;
        }
        let cancelled = self.timers.cancel_owner(user_id);
        self.inventory.drop_from(user_id);
        self.prune_dropped_weapons();
        self.player_count
            .store(self.combatants.len(), Ordering::Relaxed);

        self.emit(ServerMsg::PlayerLeft {
            user_id,
            reason: "disconnected".to_string(),
        });

        info!(
            match_id = %self.id,
            user_id = %user_id,
            cancelled_timers = cancelled,
            "Player left match"
        );
    }

    fn handle_action(&mut self, user_id: Uuid, action: Action) {
        if self.clock.phase() == MatchPhase::Cooldown {
            debug!(user_id = %user_id, ?action, "Gameplay disabled during cooldown");
            return;
        }
        let Some(combatant) = self.combatants.get_mut(&user_id) else {
            return;
        };
        let mut ctx = ActionContext {
            inventory: &mut self.inventory,
            timers: &mut self.timers,
            now: self.now,
        };

        let result = match action {
            Action::FirePressed => {
                combatant.set_fire_held(true);
                combatant.fire(&mut ctx)
            }
            Action::FireReleased => {
                combatant.set_fire_held(false);
                Ok(None)
            }
            Action::AimPressed => {
                combatant.set_aiming(true);
                Ok(None)
            }
            Action::AimReleased => {
                combatant.set_aiming(false);
                Ok(None)
            }
            Action::Reload => combatant.reload(&mut ctx),
            Action::ThrowGrenade => combatant.throw_grenade(&mut ctx),
            Action::Equip => match combatant.equip_overlapping(&mut ctx) {
                Ok(false) => {
                    debug!(user_id = %user_id, "Equip ignored");
                    Ok(None)
                }
                other => other.map(|_| None),
            },
            Action::Drop => combatant.drop_weapon(&mut ctx).map(|_| None),
            Action::Crouch => {
                combatant.toggle_crouch();
                Ok(None)
            }
        };

        match result {
            Ok(Some(cue)) => self.emit_cue(user_id, cue),
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Action rejected"),
        }

        if matches!(action, Action::Equip | Action::Drop) {
            self.prune_dropped_weapons();
        }
    }

    fn handle_damage(&mut self, request: DamageRequest) {
        if self.clock.phase() == MatchPhase::Cooldown {
            return;
        }
        let Some(amount) = request.kind.amount() else {
            warn!(target = %request.target, kind = ?request.kind, "Malformed damage ignored");
            return;
        };
        let Some(target) = self.combatants.get_mut(&request.target) else {
            debug!(target = %request.target, "Damage for unknown combatant");
            return;
        };

        let outcome = match target.apply_damage(amount) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target = %request.target, error = %e, "Damage rejected");
                return;
            }
        };

        if let Some(cue) = outcome.cue {
            self.emit_cue(request.target, cue);
        }
        if outcome.eliminated_now {
            self.eliminate(request.target, request.instigator);
        }
    }

    /// Credit the attacker, charge the victim and run the elimination
    fn eliminate(&mut self, victim: Uuid, attacker: Option<Uuid>) {
        if let Some(attacker_id) = attacker.filter(|a| *a != victim) {
            if let Some(attacker) = self.combatants.get_mut(&attacker_id) {
                match attacker.add_score(1) {
                    Ok(score) => {
                        if let Err(e) = self.scoreboard.record_score(attacker_id, score) {
                            warn!(error = %e, "Score update rejected");
                        }
                    }
                    Err(e) => warn!(error = %e, "Score update rejected"),
                }
            }
        }

        let now = self.server_time();
        let Some(combatant) = self.combatants.get_mut(&victim) else {
            return;
        };
        if let Err(e) = combatant.add_defeat() {
            warn!(error = %e, "Defeat update rejected");
        }

        let mut ctx = ActionContext {
            inventory: &mut self.inventory,
            timers: &mut self.timers,
            now,
        };
        match combatant.eliminate(&mut ctx) {
            Ok(Some(effects)) => {
                self.emit(ServerMsg::Eliminated { victim, attacker });
                self.emit_cue(victim, effects.cue);
                if effects.dropped_weapon.is_some() {
                    self.prune_dropped_weapons();
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Elimination rejected"),
        }
    }

    /// Clear the oldest weapons off the ground once too many pile up
    fn prune_dropped_weapons(&mut self) {
        let destroyed = self.inventory.prune_dropped(DROPPED_WEAPON_LIMIT);
        if destroyed.is_empty() {
            return;
        }
        for combatant in self.combatants.values_mut() {
            if combatant
                .overlapping_weapon()
                .is_some_and(|w| destroyed.contains(&w))
            {
                combatant.set_overlapping_weapon(None);
            }
        }
        debug!(match_id = %self.id, destroyed = destroyed.len(), "Pruned dropped weapons");
    }

    fn emit(&self, msg: ServerMsg) {
        // No subscribers is fine
        let _ = self.events_tx.send(msg);
    }

    fn emit_cue(&self, entity: Uuid, cue: Cue) {
        self.emit(ServerMsg::Cue { entity, cue });
    }

    /// Forward queued field updates to observers, in order
    fn flush_replication(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            let _ = self.events_tx.send(ServerMsg::Replicate { update });
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        let mut combatants: Vec<CombatantSummary> = self
            .combatants
            .values()
            .map(|c| CombatantSummary {
                user_id: c.id,
                display_name: c.display_name.clone(),
                health: c.health(),
                max_health: c.max_health(),
                score: c.score(),
                defeats: c.defeats(),
                eliminated: c.is_eliminated(),
                combat_state: c.combat_state(),
                equipped_weapon: c.combat().equipped(),
                last_input_seq: c.last_input_seq(),
            })
            .collect();
        combatants.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));

        let mut fields = self.clock.replicated_fields();
        fields.extend(self.scoreboard.replicated_fields());
        for combatant in self.combatants.values() {
            fields.extend(combatant.replicated_fields());
        }

        let now = self.server_time();
        MatchSnapshot {
            match_id: self.id,
            tick: self.tick,
            server_time: now,
            phase: self.clock.phase(),
            countdown: self.clock.countdown(now).floor() as u32,
            combatants,
            fields,
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

fn random_weapon(rng: &mut ChaCha8Rng, inventory: &mut WeaponInventory) -> WeaponId {
    let weapon_type = WeaponType::ALL[rng.gen_range(0..WeaponType::ALL.len())];
    inventory.spawn(weapon_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::CombatState;
    use crate::util::time::{tick_delta, unix_millis};

    fn settings() -> MatchSettings {
        MatchSettings {
            timings: MatchTimings {
                warmup: 1.0,
                match_time: 2.0,
                cooldown: 1.0,
            },
            starting_weapon: false,
            ..MatchSettings::default()
        }
    }

    fn player(user_id: Uuid, msg: ClientMsg) -> MatchInput {
        MatchInput::Player(PlayerInput {
            user_id,
            msg,
            received_at: unix_millis(),
        })
    }

    fn join(game: &mut GameMatch) -> Uuid {
        let id = Uuid::new_v4();
        game.handle_input(player(id, ClientMsg::JoinMatch { display_name: None }));
        id
    }

    fn run_for(game: &mut GameMatch, seconds: f64) {
        let ticks = (seconds / tick_delta()).round() as u64;
        for _ in 0..ticks {
            let now = game.server_time() + tick_delta();
            game.step(now);
        }
    }

    fn hit(target: Uuid, instigator: Option<Uuid>, amount: f32) -> MatchInput {
        MatchInput::Damage(DamageRequest {
            target,
            instigator,
            kind: DamageKind::Direct { amount },
        })
    }

    #[test]
    fn phases_follow_configured_timings() {
        let (mut game, _handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        join(&mut game);

        assert_eq!(game.phase(), MatchPhase::WaitingToStart);
        run_for(&mut game, 1.1);
        assert_eq!(game.phase(), MatchPhase::InProgress);
        run_for(&mut game, 2.0);
        assert_eq!(game.phase(), MatchPhase::Cooldown);
        run_for(&mut game, 1.0);
        assert!(game.is_ended());
    }

    #[test]
    fn lethal_hit_scores_and_schedules_respawn() {
        let (mut game, _handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        let attacker = join(&mut game);
        let victim = join(&mut game);

        game.handle_input(hit(victim, Some(attacker), 60.0));
        game.handle_input(hit(victim, Some(attacker), 60.0));
        game.handle_input(hit(victim, Some(attacker), 60.0));

        let victim_state = game.combatant(&victim).unwrap();
        assert!(victim_state.is_eliminated());
        assert_eq!(victim_state.defeats(), 1);
        assert_eq!(game.combatant(&attacker).unwrap().score(), 1);
        assert_eq!(game.scoreboard().top_entities(), &[attacker]);
        assert_eq!(game.timers().pending_for(victim).count(), 1);

        run_for(&mut game, 3.1);
        let victim_state = game.combatant(&victim).unwrap();
        assert!(!victim_state.is_eliminated());
        assert_eq!(victim_state.health(), 100.0);
        assert_eq!(victim_state.combat_state(), CombatState::Unoccupied);
    }

    #[test]
    fn leaving_cancels_pending_respawn() {
        let (mut game, _handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        let stayer = join(&mut game);
        let victim = join(&mut game);
        game.handle_input(hit(victim, None, 500.0));
        assert_eq!(game.timers().pending_for(victim).count(), 1);

        game.handle_input(player(victim, ClientMsg::LeaveMatch));

        assert_eq!(game.timers().pending_for(victim).count(), 0);
        run_for(&mut game, 4.0);
        assert!(game.combatant(&victim).is_none());
        assert!(game.combatant(&stayer).is_some());
    }

    #[test]
    fn fire_action_emits_cue_and_replication() {
        let (mut game, handle) = GameMatch::new(
            Uuid::new_v4(),
            7,
            MatchSettings {
                starting_weapon: true,
                ..settings()
            },
        );
        let mut events = handle.events_tx.subscribe();
        let shooter = join(&mut game);

        game.handle_input(player(
            shooter,
            ClientMsg::Action {
                action: Action::FirePressed,
            },
        ));

        let messages: Vec<ServerMsg> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMsg::Cue { entity, cue: Cue::Fire { .. } } if *entity == shooter
        )));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMsg::Replicate { .. })));
        assert_eq!(
            game.combatant(&shooter).unwrap().combat_state(),
            CombatState::Firing
        );
    }

    #[test]
    fn cooldown_emits_final_standings_once() {
        let (mut game, handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        let mut events = handle.events_tx.subscribe();
        let scorer = join(&mut game);
        let victim = join(&mut game);
        game.handle_input(hit(victim, Some(scorer), 100.0));

        run_for(&mut game, 3.5);

        let finals: Vec<ServerMsg> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|m| matches!(m, ServerMsg::FinalStandings { .. }))
            .collect();
        assert_eq!(finals.len(), 1);
        match &finals[0] {
            ServerMsg::FinalStandings { standings } => {
                assert_eq!(standings.top_entities, vec![scorer]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn full_match_rejects_join() {
        let (mut game, handle) = GameMatch::new(
            Uuid::new_v4(),
            1,
            MatchSettings {
                max_players: 1,
                ..settings()
            },
        );
        join(&mut game);
        let late = join(&mut game);

        assert!(game.combatant(&late).is_none());
        assert_eq!(handle.player_count(), 1);
    }

    #[test]
    fn radial_damage_uses_falloff() {
        let (mut game, _handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        let target = join(&mut game);

        game.handle_input(MatchInput::Damage(DamageRequest {
            target,
            instigator: None,
            kind: DamageKind::Radial {
                weapon: WeaponType::RocketLauncher,
                distance: 350.0,
            },
        }));

        assert_eq!(game.combatant(&target).unwrap().health(), 45.0);
    }

    #[test]
    fn radial_damage_from_hitscan_weapon_is_ignored() {
        let (mut game, _handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        let target = join(&mut game);

        game.handle_input(MatchInput::Damage(DamageRequest {
            target,
            instigator: None,
            kind: DamageKind::Radial {
                weapon: WeaponType::SniperRifle,
                distance: 0.0,
            },
        }));

        assert_eq!(game.combatant(&target).unwrap().health(), 100.0);
        assert_eq!(DamageKind::Direct { amount: f32::NAN }.amount(), None);
    }

    #[test]
    fn client_equip_requires_overlap() {
        let (mut game, _handle) = GameMatch::new(
            Uuid::new_v4(),
            3,
            MatchSettings {
                starting_weapon: true,
                ..settings()
            },
        );
        let victim = join(&mut game);
        let thief = join(&mut game);
        let thief_weapon = game.combatant(&thief).unwrap().combat().equipped();
        let dropped = game.combatant(&victim).unwrap().combat().equipped().unwrap();
        game.handle_input(hit(victim, None, 500.0));
        assert_eq!(game.inventory().equipped_by(victim), None);

        let equip = || {
            player(
                thief,
                ClientMsg::Action {
                    action: Action::Equip,
                },
            )
        };

        game.handle_input(equip());
        assert_eq!(game.combatant(&thief).unwrap().combat().equipped(), thief_weapon);
        assert_eq!(game.inventory().equipped_by(thief), thief_weapon);

        game.handle_input(MatchInput::Overlap {
            combatant: thief,
            weapon: Some(dropped),
        });
        game.handle_input(equip());
        assert_eq!(game.inventory().equipped_by(thief), Some(dropped));
        assert_eq!(game.combatant(&thief).unwrap().overlapping_weapon(), None);
    }

    #[test]
    fn dropped_weapons_stay_bounded_across_respawns() {
        let (mut game, _handle) = GameMatch::new(
            Uuid::new_v4(),
            5,
            MatchSettings {
                timings: MatchTimings {
                    warmup: 1.0,
                    match_time: 600.0,
                    cooldown: 1.0,
                },
                combatant: CombatantConfig {
                    respawn_delay: 0.1,
                    ..CombatantConfig::default()
                },
                starting_weapon: true,
                ..settings()
            },
        );
        let attacker = join(&mut game);
        let victim = join(&mut game);

        for _ in 0..DROPPED_WEAPON_LIMIT + 10 {
            game.handle_input(hit(victim, Some(attacker), 500.0));
            run_for(&mut game, 0.2);
        }

        assert_eq!(
            game.combatant(&attacker).unwrap().score() as usize,
            DROPPED_WEAPON_LIMIT + 10
        );
        assert!(game.inventory().dropped_count() <= DROPPED_WEAPON_LIMIT);
        assert!(game.inventory().len() <= DROPPED_WEAPON_LIMIT + 2);
        assert!(game.inventory().equipped_by(victim).is_some());
    }

    #[test]
    fn server_time_follows_step_time() {
        let (mut game, _handle) = GameMatch::new(Uuid::new_v4(), 1, settings());
        join(&mut game);

        game.step(0.5);
        game.step(2.0);

        assert_eq!(game.tick_count(), 2);
        assert_eq!(game.server_time(), 2.0);
        assert_eq!(game.phase(), MatchPhase::InProgress);
        assert_eq!(game.snapshot().countdown, 1);

        // Time never runs backwards
        game.step(1.0);
        assert_eq!(game.server_time(), 2.0);
    }

    #[tokio::test]
    async fn match_task_ends_when_players_leave() {
        let registry = Arc::new(MatchRegistry::new());
        let handle = registry.spawn_match(settings());
        let user_id = Uuid::new_v4();

        tokio_test::assert_ok!(
            handle
                .input_tx
                .send(player(user_id, ClientMsg::JoinMatch { display_name: None }))
                .await
        );
        tokio_test::assert_ok!(handle.input_tx.send(player(user_id, ClientMsg::LeaveMatch)).await);

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.get(&handle.id).is_some() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("match should end once empty");
    }
}
