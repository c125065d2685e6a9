//! Replicated record store
//!
//! Every participant owns a [`Replica`]: a local, always-readable copy of
//! the records it has loaded. Local writes apply immediately and are
//! published to the [`SyncHub`], which keeps history and forwards each
//! operation to the replicas that have loaded the target record. Fields
//! merge last-write-wins under a Lamport clock, list appends merge by
//! stamp order, so all replicas converge once delivery catches up.

pub mod clock;
pub mod hub;
pub mod ids;
pub mod record;
pub mod replica;

pub use clock::{LamportClock, Stamp};
pub use hub::SyncHub;
pub use ids::{AccountId, RecordId, ReplicaId};
pub use record::{Header, ListView, MapView, Member, Op, Owner, RecordKind, Role, Value};
pub use replica::Replica;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid record id: {0}")]
    InvalidId(String),

    #[error("Record {0} has not replicated locally yet")]
    NotLoaded(RecordId),

    #[error("Account {account} lacks {needed:?} access to record {record}")]
    PermissionDenied {
        account: AccountId,
        record: RecordId,
        needed: Role,
    },

    #[error("Record {record} is a {actual:?}, expected a {expected:?}")]
    WrongKind {
        record: RecordId,
        expected: RecordKind,
        actual: RecordKind,
    },
}
