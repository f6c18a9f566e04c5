//! Leading-score tracking with ties

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::replication::{AuthorityError, Field, FieldKey, FieldUpdate, NetRole, Outbox, Replicated};

/// One row of the standings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub entity: Uuid,
    pub score: u32,
}

/// Point-in-time copy of the scoreboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardSnapshot {
    pub top_score: Option<u32>,
    pub top_entities: Vec<Uuid>,
    /// Every entity that ever scored, highest first
    pub standings: Vec<Standing>,
}

/// Tracks the top score and the set of entities tied for it.
///
/// Updated incrementally per score event; non-leading entities are never
/// ranked.
#[derive(Debug)]
pub struct Scoreboard {
    role: NetRole,
    scores: HashMap<Uuid, u32>,
    top_score: u32,
    /// Replicated top-scorer list, set semantics
    top_entities: Replicated<Vec<Uuid>>,
}

impl Scoreboard {
    pub fn new(role: NetRole, outbox: Option<Outbox>) -> Self {
        Self {
            role,
            scores: HashMap::new(),
            top_score: 0,
            top_entities: Replicated::new(
                FieldKey::match_field(Field::TopScorers),
                Vec::new(),
                outbox,
            ),
        }
    }

    /// Record an entity's new score. Returns whether the top set changed.
    pub fn record_score(&mut self, entity: Uuid, score: u32) -> Result<bool, AuthorityError> {
        let auth = self.role.authority()?;
        self.scores.insert(entity, score);

        let top = self.top_entities.get();
        let next = if top.is_empty() {
            self.top_score = score;
            Some(vec![entity])
        } else if score == self.top_score {
            if top.contains(&entity) {
                None
            } else {
                let mut tied = top.clone();
                tied.push(entity);
                Some(tied)
            }
        } else if score > self.top_score {
            self.top_score = score;
            Some(vec![entity])
        } else {
            None
        };

        Ok(match next {
            Some(entities) => self.top_entities.set(&auth, entities),
            None => false,
        })
    }

    pub fn top_score(&self) -> Option<u32> {
        (!self.top_entities.get().is_empty()).then_some(self.top_score)
    }

    pub fn top_entities(&self) -> &[Uuid] {
        self.top_entities.get()
    }

    pub fn score_of(&self, entity: &Uuid) -> Option<u32> {
        self.scores.get(entity).copied()
    }

    pub fn snapshot(&self) -> ScoreboardSnapshot {
        let mut standings: Vec<Standing> = self
            .scores
            .iter()
            .map(|(entity, score)| Standing {
                entity: *entity,
                score: *score,
            })
            .collect();
        standings.sort_by(|a, b| b.score.cmp(&a.score).then(a.entity.cmp(&b.entity)));

        ScoreboardSnapshot {
            top_score: self.top_score(),
            top_entities: self.top_entities.get().clone(),
            standings,
        }
    }

    pub fn replicated_fields(&self) -> Vec<FieldUpdate> {
        vec![self.top_entities.snapshot()]
    }
}
