//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::clock::MatchPhase;
use crate::game::combat::{CombatState, Cue};
use crate::game::combatant::MoveIntent;
use crate::game::scoreboard::ScoreboardSnapshot;
use crate::game::weapon::WeaponId;
use crate::replication::FieldUpdate;

/// Discrete action events from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    FirePressed,
    FireReleased,
    AimPressed,
    AimReleased,
    Reload,
    ThrowGrenade,
    /// Pick up the weapon being overlapped
    Equip,
    Drop,
    Crouch,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Spawn into the match this connection was routed to
    JoinMatch {
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Discrete input
    Action { action: Action },

    /// Continuous movement and look axes
    Axes {
        /// Sequence number, stale values are dropped
        seq: u32,
        #[serde(flatten)]
        intent: MoveIntent,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        match_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of match join
    MatchJoined {
        match_id: Uuid,
        combatant_id: Uuid,
        /// Every replicated field at join time
        fields: Vec<FieldUpdate>,
    },

    /// Player joined the match
    PlayerJoined { player: PlayerInfo },

    /// Player left the match
    PlayerLeft { user_id: Uuid, reason: String },

    /// A replicated field changed
    Replicate { update: FieldUpdate },

    /// Animation/audio cue
    Cue { entity: Uuid, cue: Cue },

    /// Whole-second countdown change
    Countdown { phase: MatchPhase, seconds: u32 },

    /// Match phase changed
    MatchStateSet { phase: MatchPhase },

    /// A combatant was eliminated
    Eliminated {
        victim: Uuid,
        attacker: Option<Uuid>,
    },

    /// Sent once on entering Cooldown
    FinalStandings { standings: ScoreboardSnapshot },

    /// Full state for observers that fell behind
    Resync { snapshot: MatchSnapshot },

    /// Match has ended
    MatchEnd { standings: ScoreboardSnapshot },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player info for lobby/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Per-combatant summary for snapshots and the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatantSummary {
    pub user_id: Uuid,
    pub display_name: String,
    pub health: f32,
    pub max_health: f32,
    pub score: u32,
    pub defeats: u32,
    pub eliminated: bool,
    pub combat_state: CombatState,
    pub equipped_weapon: Option<WeaponId>,
    /// Last processed axes sequence
    pub last_input_seq: u32,
}

/// Complete match state at one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    pub tick: u64,
    /// Seconds since the match was created
    pub server_time: f64,
    pub phase: MatchPhase,
    pub countdown: u32,
    pub combatants: Vec<CombatantSummary>,
    /// Every replicated field, marked forced
    pub fields: Vec<FieldUpdate>,
}

impl MatchSnapshot {
    pub fn empty(match_id: Uuid) -> Self {
        Self {
            match_id,
            tick: 0,
            server_time: 0.0,
            phase: MatchPhase::WaitingToStart,
            countdown: 0,
            combatants: Vec::new(),
            fields: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_actions() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"action","action":{"action":"fire_pressed"}}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMsg::Action {
                action: Action::FirePressed
            }
        ));

        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"action","action":{"action":"equip"}}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMsg::Action {
                action: Action::Equip
            }
        ));
    }

    #[test]
    fn parses_axes() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"axes","seq":4,"forward":1.0,"right":0.0,"yaw":90.0,"pitch":-5.0}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::Axes { seq, intent } => {
                assert_eq!(seq, 4);
                assert_eq!(intent.yaw, 90.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cue_is_tagged() {
        let json = serde_json::to_value(ServerMsg::Cue {
            entity: Uuid::nil(),
            cue: Cue::HitReact,
        })
        .unwrap();
        assert_eq!(json["type"], "cue");
        assert_eq!(json["cue"]["cue"], "hit_react");
    }
}
