//! Authority checks and value replication

pub mod authority;
pub mod mirror;
pub mod observers;
pub mod replicated;

pub use authority::{Authority, AuthorityError, NetRole};
pub use mirror::ReplicaMirror;
pub use observers::Observers;
pub use replicated::{Field, FieldKey, FieldOwner, FieldUpdate, FieldValue, Outbox, Replicable, Replicated};
