//! Record model: values, headers, operations and merge rules

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::{AccountId, RecordId, Stamp};

/// A field or list entry value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
    Ref(RecordId),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<RecordId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }
}

/// Kind of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Access-control scope
    Group,
    /// Key/value document
    Map,
    /// Ordered collection
    List,
}

/// Access level inside a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reader,
    Writer,
    Admin,
}

/// Who a group grant applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Member {
    Account(AccountId),
    /// Anyone holding the record id
    Everyone,
}

/// Record ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Groups are owned by the account that created them
    Account(AccountId),
    /// Maps and lists take their permissions from a group
    Group(RecordId),
}

/// Immutable record metadata
#[derive(Debug, Clone, Serialize)]
pub struct Header {
    pub id: RecordId,
    pub kind: RecordKind,
    pub owner: Owner,
    pub created_by: AccountId,
    #[serde(skip)]
    pub created_at: Stamp,
}

/// A replicated operation
#[derive(Debug, Clone)]
pub enum Op {
    Create {
        header: Header,
        fields: Vec<(String, Value)>,
        items: Vec<Value>,
    },
    Set {
        record: RecordId,
        key: String,
        value: Value,
        stamp: Stamp,
    },
    Append {
        record: RecordId,
        value: Value,
        stamp: Stamp,
    },
    Grant {
        record: RecordId,
        member: Member,
        role: Role,
        stamp: Stamp,
    },
}

impl Op {
    /// Record the operation targets
    pub fn record(&self) -> RecordId {
        match self {
            Op::Create { header, .. } => header.id,
            Op::Set { record, .. } | Op::Append { record, .. } | Op::Grant { record, .. } => *record,
        }
    }

    pub fn stamp(&self) -> Stamp {
        match self {
            Op::Create { header, .. } => header.created_at,
            Op::Set { stamp, .. } | Op::Append { stamp, .. } | Op::Grant { stamp, .. } => *stamp,
        }
    }
}

/// List entry key: the stamp of the op that inserted it, plus the position
/// inside that op (only `Create` inserts more than one entry).
type ItemKey = (Stamp, u32);

/// Merged state of one record
#[derive(Debug, Clone)]
pub(crate) struct RecordState {
    pub(crate) header: Header,
    fields: BTreeMap<String, (Stamp, Value)>,
    items: BTreeMap<ItemKey, Value>,
    members: HashMap<Member, (Stamp, Role)>,
}

impl RecordState {
    pub(crate) fn from_create(header: Header, fields: &[(String, Value)], items: &[Value]) -> Self {
        let stamp = header.created_at;
        let mut members = HashMap::new();
        if header.kind == RecordKind::Group {
            members.insert(Member::Account(header.created_by), (stamp, Role::Admin));
        }

        Self {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), (stamp, v.clone())))
                .collect(),
            items: items
                .iter()
                .enumerate()
                .map(|(i, v)| ((stamp, i as u32), v.clone()))
                .collect(),
            members,
            header,
        }
    }

    /// Merge an operation. Returns whether visible state changed.
    pub(crate) fn apply(&mut self, op: &Op) -> bool {
        match op {
            Op::Create { .. } => false,
            Op::Set {
                key, value, stamp, ..
            } => match self.fields.get(key) {
                Some((current, _)) if current >= stamp => false,
                _ => {
                    self.fields.insert(key.clone(), (*stamp, value.clone()));
                    true
                }
            },
            Op::Append { value, stamp, .. } => {
                self.items.insert((*stamp, 0), value.clone()).is_none()
            }
            Op::Grant {
                member,
                role,
                stamp,
                ..
            } => match self.members.get(member) {
                Some((current, _)) if current >= stamp => false,
                _ => {
                    self.members.insert(*member, (*stamp, *role));
                    true
                }
            },
        }
    }

    /// Role an account holds in this group
    pub(crate) fn group_role(&self, account: AccountId) -> Option<Role> {
        let own = self.members.get(&Member::Account(account)).map(|(_, r)| *r);
        let everyone = self.members.get(&Member::Everyone).map(|(_, r)| *r);
        own.max(everyone)
    }

    pub(crate) fn map_view(&self) -> MapView {
        MapView {
            header: self.header.clone(),
            fields: self
                .fields
                .iter()
                .map(|(k, (_, v))| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub(crate) fn list_view(&self) -> ListView {
        ListView {
            header: self.header.clone(),
            items: self.items.values().cloned().collect(),
        }
    }
}

/// Point-in-time view of a map record
#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub header: Header,
    pub fields: BTreeMap<String, Value>,
}

impl MapView {
    pub fn id(&self) -> RecordId {
        self.header.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_number)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    pub fn reference(&self, key: &str) -> Option<RecordId> {
        self.get(key).and_then(Value::as_ref_id)
    }
}

/// Point-in-time view of a list record, entries in merge order
#[derive(Debug, Clone, Serialize)]
pub struct ListView {
    pub header: Header,
    pub items: Vec<Value>,
}

impl ListView {
    /// Referenced record ids, in list order
    pub fn references(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.items.iter().filter_map(Value::as_ref_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LamportClock, ReplicaId};

    fn map_state(clock: &mut LamportClock) -> RecordState {
        let header = Header {
            id: RecordId::new(),
            kind: RecordKind::Map,
            owner: Owner::Group(RecordId::new()),
            created_by: AccountId::new(),
            created_at: clock.tick(),
        };
        RecordState::from_create(
            header,
            &[("status".to_string(), Value::Text("waiting".to_string()))],
            &[],
        )
    }

    #[test]
    fn later_stamp_wins_regardless_of_arrival_order() {
        let mut a = LamportClock::new(ReplicaId::new());
        let mut b = LamportClock::new(ReplicaId::new());
        let mut first = map_state(&mut a);
        let mut second = first.clone();

        let early = Op::Set {
            record: first.header.id,
            key: "status".into(),
            value: Value::Text("playing".into()),
            stamp: a.tick(),
        };
        b.observe(early.stamp());
        let late = Op::Set {
            record: first.header.id,
            key: "status".into(),
            value: Value::Text("ended".into()),
            stamp: b.tick(),
        };

        first.apply(&early);
        first.apply(&late);
        second.apply(&late);
        second.apply(&early);

        assert_eq!(first.map_view().text("status"), Some("ended"));
        assert_eq!(second.map_view().text("status"), Some("ended"));
    }

    #[test]
    fn duplicate_ops_are_no_ops() {
        let mut clock = LamportClock::new(ReplicaId::new());
        let mut state = map_state(&mut clock);
        let op = Op::Set {
            record: state.header.id,
            key: "status".into(),
            value: Value::Text("playing".into()),
            stamp: clock.tick(),
        };
        assert!(state.apply(&op));
        assert!(!state.apply(&op));
    }

    #[test]
    fn group_role_takes_the_stronger_grant() {
        let mut clock = LamportClock::new(ReplicaId::new());
        let creator = AccountId::new();
        let other = AccountId::new();
        let header = Header {
            id: RecordId::new(),
            kind: RecordKind::Group,
            owner: Owner::Account(creator),
            created_by: creator,
            created_at: clock.tick(),
        };
        let mut group = RecordState::from_create(header, &[], &[]);
        assert_eq!(group.group_role(creator), Some(Role::Admin));
        assert_eq!(group.group_role(other), None);

        group.apply(&Op::Grant {
            record: group.header.id,
            member: Member::Everyone,
            role: Role::Writer,
            stamp: clock.tick(),
        });
        assert_eq!(group.group_role(other), Some(Role::Writer));
        assert_eq!(group.group_role(creator), Some(Role::Admin));
    }
}
