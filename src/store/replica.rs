//! Per-participant replica of the record store

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::record::RecordState;
use super::{
    AccountId, Header, LamportClock, ListView, MapView, Member, Op, Owner, RecordId, RecordKind,
    ReplicaId, Role, Stamp, StoreError, SyncHub, Value,
};

struct ReplicaState {
    clock: LamportClock,
    records: HashMap<RecordId, RecordState>,
    /// Operations that arrived before their record
    pending: HashMap<RecordId, Vec<Op>>,
    /// Records already requested from the hub
    requested: HashSet<RecordId>,
}

impl ReplicaState {
    fn apply(&mut self, op: &Op) -> bool {
        self.clock.observe(op.stamp());

        match op {
            Op::Create {
                header,
                fields,
                items,
            } => {
                if self.records.contains_key(&header.id) {
                    return false;
                }
                let mut record = RecordState::from_create(header.clone(), fields, items);
                for queued in self.pending.remove(&header.id).unwrap_or_default() {
                    record.apply(&queued);
                }
                self.records.insert(header.id, record);
                true
            }
            _ => match self.records.get_mut(&op.record()) {
                Some(record) => record.apply(op),
                None => {
                    self.pending.entry(op.record()).or_default().push(op.clone());
                    false
                }
            },
        }
    }

    fn record(&self, id: RecordId, expected: RecordKind) -> Result<&RecordState, StoreError> {
        let record = self.records.get(&id).ok_or(StoreError::NotLoaded(id))?;
        if record.header.kind != expected {
            return Err(StoreError::WrongKind {
                record: id,
                expected,
                actual: record.header.kind,
            });
        }
        Ok(record)
    }

    fn role_of(&self, account: AccountId, id: RecordId) -> Result<Option<Role>, StoreError> {
        let record = self.records.get(&id).ok_or(StoreError::NotLoaded(id))?;
        match record.header.owner {
            Owner::Account(_) => Ok(record.group_role(account)),
            Owner::Group(group) => Ok(self
                .records
                .get(&group)
                .ok_or(StoreError::NotLoaded(group))?
                .group_role(account)),
        }
    }

    fn authorize(&self, account: AccountId, id: RecordId, needed: Role) -> Result<(), StoreError> {
        match self.role_of(account, id)? {
            Some(role) if role >= needed => Ok(()),
            _ => Err(StoreError::PermissionDenied {
                account,
                record: id,
                needed,
            }),
        }
    }
}

pub(crate) struct ReplicaInner {
    pub(crate) id: ReplicaId,
    account: AccountId,
    hub: Arc<SyncHub>,
    state: Mutex<ReplicaState>,
    version: watch::Sender<u64>,
}

impl ReplicaInner {
    /// Apply an operation forwarded by the hub
    pub(crate) fn receive(&self, op: Op) {
        let (changed, missing_owner) = {
            let mut state = self.state.lock();
            let changed = state.apply(&op);
            let missing_owner = match &op {
                Op::Create { header, .. } => match header.owner {
                    Owner::Group(group) if !state.records.contains_key(&group) => Some(group),
                    _ => None,
                },
                _ => None,
            };
            (changed, missing_owner)
        };

        trace!(replica_id = %self.id, record = %op.record(), changed, "Applied remote op");

        if changed {
            self.bump();
        }
        if let Some(group) = missing_owner {
            self.request(group);
        }
    }

    /// Ask the hub for a record not yet replicated here
    fn request(&self, id: RecordId) {
        let first_request = {
            let mut state = self.state.lock();
            !state.records.contains_key(&id) && state.requested.insert(id)
        };
        if first_request {
            debug!(replica_id = %self.id, record = %id, "Requesting record");
            self.hub.fetch(self.id, id);
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Request whatever a failed write was waiting for
    fn heal<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(StoreError::NotLoaded(id)) = &result {
            self.request(*id);
        }
        result
    }
}

impl Drop for ReplicaInner {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

/// A participant's local copy of the store.
///
/// Cloning is cheap; clones share the same replica.
#[derive(Clone)]
pub struct Replica {
    inner: Arc<ReplicaInner>,
}

impl Replica {
    /// Create a replica for `account` and attach it to the hub
    pub fn connect(hub: &Arc<SyncHub>, account: AccountId) -> Self {
        let id = ReplicaId::new();
        let (version, _) = watch::channel(0);
        let inner = Arc::new(ReplicaInner {
            id,
            account,
            hub: hub.clone(),
            state: Mutex::new(ReplicaState {
                clock: LamportClock::new(id),
                records: HashMap::new(),
                pending: HashMap::new(),
                requested: HashSet::new(),
            }),
            version,
        });
        hub.attach(&inner);
        debug!(replica_id = %id, account_id = %account, "Replica connected");
        Self { inner }
    }

    pub fn id(&self) -> ReplicaId {
        self.inner.id
    }

    pub fn account(&self) -> AccountId {
        self.inner.account
    }

    /// Apply a local operation, then publish it
    fn commit(&self, op: Op) {
        let id = op.record();
        {
            let mut state = self.inner.state.lock();
            state.apply(&op);
            state.requested.insert(id);
        }
        self.inner.hub.publish(self.inner.id, op);
        self.inner.bump();
    }

    fn create(
        &self,
        kind: RecordKind,
        owner: Owner,
        fields: Vec<(String, Value)>,
        items: Vec<Value>,
    ) -> RecordId {
        let header = Header {
            id: RecordId::new(),
            kind,
            owner,
            created_by: self.account(),
            created_at: self.inner.state.lock().clock.tick(),
        };
        let id = header.id;
        self.commit(Op::Create {
            header,
            fields,
            items,
        });
        id
    }

    /// Create an access-control group with the local account as admin
    pub fn create_group(&self) -> RecordId {
        self.create(
            RecordKind::Group,
            Owner::Account(self.account()),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Grant a role in a group. Requires admin.
    pub fn grant(&self, group: RecordId, member: Member, role: Role) -> Result<(), StoreError> {
        let stamp = self.checked_stamp(group, RecordKind::Group, Role::Admin)?;
        self.commit(Op::Grant {
            record: group,
            member,
            role,
            stamp,
        });
        Ok(())
    }

    /// Check access to `record`, then issue a stamp for the write
    fn checked_stamp(
        &self,
        record: RecordId,
        kind: RecordKind,
        needed: Role,
    ) -> Result<Stamp, StoreError> {
        let stamp = {
            let mut state = self.inner.state.lock();
            let check = state
                .record(record, kind)
                .and_then(|_| state.authorize(self.account(), record, needed));
            check.map(|_| state.clock.tick())
        };
        self.inner.heal(stamp)
    }

    fn authorize_owner(&self, group: RecordId) -> Result<(), StoreError> {
        self.checked_stamp(group, RecordKind::Group, Role::Writer)
            .map(|_| ())
    }

    /// Create a map owned by `group`. Requires writer on the group.
    pub fn create_map(
        &self,
        group: RecordId,
        fields: Vec<(String, Value)>,
    ) -> Result<RecordId, StoreError> {
        self.authorize_owner(group)?;
        Ok(self.create(RecordKind::Map, Owner::Group(group), fields, Vec::new()))
    }

    /// Create a list owned by `group`. Requires writer on the group.
    pub fn create_list(&self, group: RecordId, items: Vec<Value>) -> Result<RecordId, StoreError> {
        self.authorize_owner(group)?;
        Ok(self.create(RecordKind::List, Owner::Group(group), Vec::new(), items))
    }

    /// Set a map field. Requires writer.
    pub fn set(&self, record: RecordId, key: &str, value: Value) -> Result<(), StoreError> {
        let stamp = self.checked_stamp(record, RecordKind::Map, Role::Writer)?;
        self.commit(Op::Set {
            record,
            key: key.to_string(),
            value,
            stamp,
        });
        Ok(())
    }

    /// Append to a list. Requires writer.
    pub fn append(&self, list: RecordId, value: Value) -> Result<(), StoreError> {
        let stamp = self.checked_stamp(list, RecordKind::List, Role::Writer)?;
        self.commit(Op::Append {
            record: list,
            value,
            stamp,
        });
        Ok(())
    }

    /// Resolve a map. `Ok(None)` until it has replicated; the first miss
    /// requests it from the hub.
    pub fn map(&self, id: RecordId) -> Result<Option<MapView>, StoreError> {
        let found = {
            let state = self.inner.state.lock();
            match state.record(id, RecordKind::Map) {
                Ok(record) => Ok(Some(record.map_view())),
                Err(StoreError::NotLoaded(_)) => Ok(None),
                Err(e) => Err(e),
            }
        };
        if let Ok(None) = found {
            self.inner.request(id);
        }
        found
    }

    /// Resolve a list. Same loading rules as [`Replica::map`].
    pub fn list(&self, id: RecordId) -> Result<Option<ListView>, StoreError> {
        let found = {
            let state = self.inner.state.lock();
            match state.record(id, RecordKind::List) {
                Ok(record) => Ok(Some(record.list_view())),
                Err(StoreError::NotLoaded(_)) => Ok(None),
                Err(e) => Err(e),
            }
        };
        if let Ok(None) = found {
            self.inner.request(id);
        }
        found
    }

    /// Whether a record has replicated locally. Does not request it.
    pub fn is_loaded(&self, id: RecordId) -> bool {
        self.inner.state.lock().records.contains_key(&id)
    }

    /// Local account's role on a record, `None` if unknown or no access
    pub fn role_of(&self, record: RecordId) -> Option<Role> {
        let role = {
            let state = self.inner.state.lock();
            state.role_of(self.account(), record)
        };
        self.inner.heal(role).ok().flatten()
    }

    pub fn can_admin(&self, record: RecordId) -> bool {
        self.role_of(record) == Some(Role::Admin)
    }

    /// Change notifications. The value is a counter bumped on every
    /// applied local or remote change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }
}
