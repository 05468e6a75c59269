//! Promise registry: every `get` in flight, keyed by logical slot.
//!
//! Slots come from a monotonically increasing counter and are never derived
//! from buffer addresses, so an address the allocator hands out again can
//! never alias a live entry. An entry is inserted before `get` returns to
//! the guest and removed exactly once, after the matching `callback` has
//! returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use regwatch_core::codec::Response;
use regwatch_core::{Address, ContinuationIndex, RegwatchError, Result, SlotId};

use crate::fetch::FetchError;
use crate::types::ChainId;

/// The spawned fetch behind a pending slot.
pub type FetchTask = JoinHandle<std::result::Result<Response, FetchError>>;

/// What the dispatcher needs to resume a chain once its fetch settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    /// Owning chain.
    pub chain: ChainId,
    /// Guest function to resume.
    pub continuation: ContinuationIndex,
    /// The chain's output future.
    pub output: Address,
    /// Context buffer carried to the next step.
    pub context: Address,
    /// Context buffer length.
    pub context_len: u32,
    /// The requested URL.
    pub url: String,
}

#[derive(Debug)]
struct Entry {
    step: PendingStep,
    /// Taken when delivery starts.
    task: Option<FetchTask>,
}

/// Registry of in-flight operations.
#[derive(Debug)]
pub struct PromiseRegistry {
    next: AtomicU32,
    pending: Mutex<HashMap<SlotId, Entry>>,
}

impl PromiseRegistry {
    /// Create an empty registry. Slots start at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a registry whose first slot is `first` (0 is skipped).
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Hand out a fresh slot. Wraps around without ever returning 0.
    pub fn next_slot(&self) -> SlotId {
        loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            if raw != 0 {
                return SlotId::new(raw);
            }
        }
    }

    /// Register `task` under `slot`.
    ///
    /// A live slot is never overwritten: the new task is aborted and
    /// `SlotCollision` returned.
    pub fn insert(&self, slot: SlotId, step: PendingStep, task: FetchTask) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&slot) {
            task.abort();
            return Err(RegwatchError::SlotCollision { slot });
        }
        debug!(%slot, chain = %step.chain, url = %step.url, "slot registered");
        pending.insert(
            slot,
            Entry {
                step,
                task: Some(task),
            },
        );
        Ok(())
    }

    /// Take the fetch task out of `slot` so `chain` can deliver its result.
    ///
    /// A slot owned by another chain is left untouched. The entry stays
    /// registered until [`remove`](Self::remove).
    pub fn begin_delivery(&self, slot: SlotId, chain: ChainId) -> Result<(PendingStep, FetchTask)> {
        let mut pending = self.pending.lock();
        let entry = pending
            .get_mut(&slot)
            .ok_or(RegwatchError::SlotNotFound { slot })?;
        if entry.step.chain != chain {
            return Err(RegwatchError::contract(format!(
                "{slot} belongs to {}, not {chain}",
                entry.step.chain
            )));
        }
        let task = entry.task.take().ok_or_else(|| {
            RegwatchError::contract(format!("{slot} is already being delivered"))
        })?;
        Ok((entry.step.clone(), task))
    }

    /// Remove a settled slot.
    pub fn remove(&self, slot: SlotId) -> Result<PendingStep> {
        let entry = self
            .pending
            .lock()
            .remove(&slot)
            .ok_or(RegwatchError::SlotNotFound { slot })?;
        if let Some(task) = entry.task {
            task.abort();
        }
        debug!(%slot, chain = %entry.step.chain, "slot removed");
        Ok(entry.step)
    }

    /// Drop every slot belonging to `chain`, aborting fetches not yet
    /// delivered. Returns how many slots were dropped.
    pub fn abort_chain(&self, chain: ChainId) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| {
            if entry.step.chain != chain {
                return true;
            }
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            false
        });
        before - pending.len()
    }

    /// Number of fetches of `chain` not yet handed to delivery.
    pub fn in_flight(&self, chain: ChainId) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|entry| entry.step.chain == chain && entry.task.is_some())
            .count()
    }

    /// Check whether `slot` is registered.
    pub fn contains(&self, slot: SlotId) -> bool {
        self.pending.lock().contains_key(&slot)
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Check whether no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for PromiseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(chain: ChainId) -> PendingStep {
        PendingStep {
            chain,
            continuation: ContinuationIndex::new(1),
            output: Address::new(8),
            context: Address::NULL,
            context_len: 0,
            url: "https://registry.example/v2/a/manifests/latest".to_string(),
        }
    }

    fn ready_task() -> FetchTask {
        tokio::spawn(async { Ok(Response::new(200)) })
    }

    #[test]
    fn slots_are_monotonic_and_skip_zero() {
        let registry = PromiseRegistry::starting_at(u32::MAX);
        assert_eq!(registry.next_slot(), SlotId::new(u32::MAX));
        assert_eq!(registry.next_slot(), SlotId::new(1));
        assert_eq!(registry.next_slot(), SlotId::new(2));
    }

    #[tokio::test]
    async fn insert_deliver_remove() {
        let registry = PromiseRegistry::new();
        let chain = ChainId::new();
        let slot = registry.next_slot();

        registry.insert(slot, step(chain), ready_task()).unwrap();
        assert!(registry.contains(slot));
        assert_eq!(registry.in_flight(chain), 1);

        let (pending, task) = registry.begin_delivery(slot, chain).unwrap();
        assert_eq!(pending, step(chain));
        assert_eq!(task.await.unwrap().unwrap().status, 200);
        assert_eq!(registry.in_flight(chain), 0);
        assert_eq!(registry.len(), 1);

        registry.remove(slot).unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn removing_twice_fails() {
        let registry = PromiseRegistry::new();
        let slot = registry.next_slot();
        registry
            .insert(slot, step(ChainId::new()), ready_task())
            .unwrap();

        registry.remove(slot).unwrap();
        let err = registry.remove(slot).unwrap_err();
        assert!(matches!(err, RegwatchError::SlotNotFound { .. }));
    }

    #[tokio::test]
    async fn live_slots_are_never_overwritten() {
        let registry = PromiseRegistry::new();
        let slot = SlotId::new(7);
        registry
            .insert(slot, step(ChainId::new()), ready_task())
            .unwrap();

        let err = registry
            .insert(slot, step(ChainId::new()), ready_task())
            .unwrap_err();
        assert_eq!(err.code(), "E201");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn delivery_happens_once() {
        let registry = PromiseRegistry::new();
        let chain = ChainId::new();
        let slot = registry.next_slot();
        registry.insert(slot, step(chain), ready_task()).unwrap();

        let _first = registry.begin_delivery(slot, chain).unwrap();
        let err = registry.begin_delivery(slot, chain).unwrap_err();
        assert!(matches!(err, RegwatchError::ContractViolation { .. }));

        let err = registry.begin_delivery(SlotId::new(999), chain).unwrap_err();
        assert!(matches!(err, RegwatchError::SlotNotFound { .. }));
    }

    #[tokio::test]
    async fn foreign_slots_are_not_delivered() {
        let registry = PromiseRegistry::new();
        let owner = ChainId::new();
        let slot = registry.next_slot();
        registry.insert(slot, step(owner), ready_task()).unwrap();

        let err = registry.begin_delivery(slot, ChainId::new()).unwrap_err();
        assert!(matches!(err, RegwatchError::ContractViolation { .. }));
        assert_eq!(registry.in_flight(owner), 1);
    }

    #[tokio::test]
    async fn abort_chain_only_touches_that_chain() {
        let registry = PromiseRegistry::new();
        let doomed = ChainId::new();
        let survivor = ChainId::new();

        for chain in [doomed, doomed, survivor] {
            let slot = registry.next_slot();
            registry.insert(slot, step(chain), ready_task()).unwrap();
        }

        assert_eq!(registry.abort_chain(doomed), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.in_flight(survivor), 1);
    }
}
