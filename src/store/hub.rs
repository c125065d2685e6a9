//! Sync relay between replicas
//!
//! The hub keeps the operation history per record and forwards new
//! operations to every replica that registered interest in the target
//! record. It applies no merge logic of its own beyond dropping field
//! writes that a later write to the same field supersedes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use super::replica::ReplicaInner;
use super::{Op, RecordId, ReplicaId};

/// A connected replica
struct Peer {
    replica: Weak<ReplicaInner>,
    /// Records this replica has created or requested
    interest: HashSet<RecordId>,
    /// Operations in flight, in send order
    inbox: VecDeque<(Instant, Op)>,
}

#[derive(Default)]
struct HubState {
    history: HashMap<RecordId, Vec<Op>>,
    peers: HashMap<ReplicaId, Peer>,
}

/// Relay with a fixed one-way replication latency
pub struct SyncHub {
    latency: Duration,
    state: Mutex<HubState>,
}

impl SyncHub {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            state: Mutex::new(HubState::default()),
        })
    }

    pub(crate) fn attach(&self, replica: &Arc<ReplicaInner>) {
        self.state.lock().peers.insert(
            replica.id,
            Peer {
                replica: Arc::downgrade(replica),
                interest: HashSet::new(),
                inbox: VecDeque::new(),
            },
        );
    }

    pub(crate) fn detach(&self, replica: ReplicaId) {
        if self.state.lock().peers.remove(&replica).is_some() {
            debug!(replica_id = %replica, "Replica detached from hub");
        }
    }

    /// Record an operation and forward it to interested peers
    pub(crate) fn publish(&self, from: ReplicaId, op: Op) {
        let deliver_at = Instant::now() + self.latency;
        let record = op.record();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if matches!(op, Op::Create { .. }) {
            if let Some(peer) = state.peers.get_mut(&from) {
                peer.interest.insert(record);
            }
        }

        for (id, peer) in state.peers.iter_mut() {
            if *id != from && peer.interest.contains(&record) {
                peer.inbox.push_back((deliver_at, op.clone()));
            }
        }

        let history = state.history.entry(record).or_default();
        // Only the winning write of a field matters to late joiners.
        let previous = match &op {
            Op::Set { key, .. } => history
                .iter()
                .position(|old| matches!(old, Op::Set { key: k, .. } if k == key)),
            _ => None,
        };
        match previous {
            Some(i) => {
                if history[i].stamp() < op.stamp() {
                    history[i] = op;
                }
            }
            None => history.push(op),
        }
    }

    /// Register interest in a record and replay its history to the peer
    pub(crate) fn fetch(&self, replica: ReplicaId, record: RecordId) {
        let deliver_at = Instant::now() + self.latency;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(peer) = state.peers.get_mut(&replica) else {
            return;
        };
        if !peer.interest.insert(record) {
            return;
        }
        if let Some(ops) = state.history.get(&record) {
            peer.inbox
                .extend(ops.iter().map(|op| (deliver_at, op.clone())));
        }
    }

    /// Deliver every operation whose latency has elapsed
    pub fn deliver_due(&self) -> usize {
        self.deliver(Some(Instant::now()))
    }

    /// Deliver everything in flight, including operations queued as a
    /// consequence of earlier deliveries
    #[cfg(test)]
    pub fn deliver_all(&self) -> usize {
        self.deliver(None)
    }

    fn deliver(&self, cutoff: Option<Instant>) -> usize {
        let mut delivered = 0;

        loop {
            let batch: Vec<(Arc<ReplicaInner>, Vec<Op>)> = {
                let mut state = self.state.lock();
                state
                    .peers
                    .values_mut()
                    .filter_map(|peer| {
                        let mut ops = Vec::new();
                        while let Some((at, _)) = peer.inbox.front() {
                            if cutoff.is_some_and(|c| *at > c) {
                                break;
                            }
                            if let Some((_, op)) = peer.inbox.pop_front() {
                                ops.push(op);
                            }
                        }
                        if ops.is_empty() {
                            return None;
                        }
                        peer.replica.upgrade().map(|replica| (replica, ops))
                    })
                    .collect()
            };

            if batch.is_empty() {
                break;
            }

            for (replica, ops) in batch {
                delivered += ops.len();
                for op in ops {
                    replica.receive(op);
                }
            }
        }

        delivered
    }

    /// Run the delivery loop
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.deliver_due();
        }
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }
}
