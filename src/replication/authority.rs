//! Network roles and the authority proof token
//!
//! Only the authoritative instance of a holder may mutate replicated state.
//! Mutating entry points take an [`Authority`] token, which can only be
//! obtained from [`NetRole::authority`] on the `Authority` role.

use serde::{Deserialize, Serialize};

/// Role of a state holder in the client-server topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetRole {
    /// Server-side owner, the only writer
    Authority,
    /// Locally controlled replica (owning client)
    AutonomousProxy,
    /// Replica of someone else's state
    SimulatedProxy,
}

impl NetRole {
    /// Obtain the authority token, or reject the caller
    pub fn authority(self) -> Result<Authority, AuthorityError> {
        match self {
            NetRole::Authority => Ok(Authority { _private: () }),
            role => Err(AuthorityError::NotAuthority { role }),
        }
    }
}

/// Proof that the caller holds the authoritative role.
///
/// Cannot be constructed outside this module.
#[derive(Debug, Clone, Copy)]
pub struct Authority {
    _private: (),
}

/// Authority violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("Mutation rejected: caller has role {role:?}, authority required")]
    NotAuthority { role: NetRole },
}
