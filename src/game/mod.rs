//! Game simulation modules

pub mod clock;
pub mod combat;
pub mod combatant;
pub mod r#match;
pub mod scoreboard;
pub mod timers;
pub mod weapon;

pub use clock::{MatchClock, MatchPhase, MatchTimings};
pub use combat::{CombatState, Cue};
pub use combatant::{Combatant, CombatantConfig, MoveIntent};
pub use r#match::{
    DamageKind, DamageRequest, GameMatch, MatchHandle, MatchInput, MatchRegistry, MatchSettings,
};
pub use scoreboard::{Scoreboard, ScoreboardSnapshot};
pub use weapon::{WeaponId, WeaponType};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}
