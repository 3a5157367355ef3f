use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

struct Slot {
    seq: u64,
    cancel: watch::Sender<bool>,
}

/// Per-node mutual exclusion for transition requests.
///
/// A slot is created by `try_acquire` and removed when the returned
/// `NodeLease` drops. Removal checks the request sequence number, so a
/// request that outlives its node never frees a slot owned by a newer one.
#[derive(Default)]
pub(crate) struct InFlightTable {
    slots: Mutex<HashMap<String, Slot>>,
}

impl InFlightTable {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// On conflict returns the sequence number of the request holding the node.
    pub(crate) fn try_acquire(
        self: &Arc<Self>,
        node: &str,
        seq: u64,
    ) -> Result<(NodeLease, watch::Receiver<bool>), u64> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(node) {
            return Err(slot.seq);
        }

        let (cancel, cancelled) = watch::channel(false);
        slots.insert(node.to_string(), Slot { seq, cancel });

        let lease = NodeLease {
            table: Arc::clone(self),
            node: node.to_string(),
            seq,
        };
        Ok((lease, cancelled))
    }

    pub(crate) fn holder(&self, node: &str) -> Option<u64> {
        self.slots().get(node).map(|slot| slot.seq)
    }

    /// Signals the request holding `node`. The slot stays until its lease drops.
    pub(crate) fn cancel(&self, node: &str) -> bool {
        match self.slots().get(node) {
            Some(slot) => {
                slot.cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let slots = self.slots();
        for slot in slots.values() {
            slot.cancel.send_replace(true);
        }
        slots.len()
    }

    fn release(&self, node: &str, seq: u64) {
        let mut slots = self.slots();
        if slots.get(node).is_some_and(|slot| slot.seq == seq) {
            slots.remove(node);
        }
    }
}

pub(crate) struct NodeLease {
    table: Arc<InFlightTable>,
    node: String,
    seq: u64,
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        self.table.release(&self.node, self.seq);
    }
}
