//! Per-object auxiliary attributes.
//!
//! Weak references and stable ids are bookkeeping that most objects never need, so they
//! live in a small list owned by the object instead of in dedicated fields or a global map.
//! Entries are kept sorted by [`AuxKind`] priority.
//!
//! The list is copy-on-write: readers clone the current `Arc<[AuxEntry]>` under a short read
//! lock and never observe a half-built list, writers serialize on a separate mutex, build a
//! new list and swap the head pointer.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};

use crate::types::WeakRefObject;

/// Source of stable ids. Starts high so ids never collide with small integers in output.
static NEXT_ID: AtomicU64 = AtomicU64::new(0x1_0000);

/// Kind of an auxiliary entry, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuxKind {
    Id,
    WeakRef,
}

#[derive(Debug, Clone)]
pub enum AuxEntry {
    /// Identity assigned on the first `id()` call.
    Id(u64),
    WeakRef(Weak<WeakRefObject>),
}

impl AuxEntry {
    #[must_use]
    pub fn kind(&self) -> AuxKind {
        match self {
            Self::Id(_) => AuxKind::Id,
            Self::WeakRef(_) => AuxKind::WeakRef,
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Id(_) => true,
            Self::WeakRef(weak) => weak.strong_count() > 0,
        }
    }
}

#[derive(Debug)]
pub struct AuxAttrs {
    head: RwLock<Arc<[AuxEntry]>>,
    writer: Mutex<()>,
}

impl Default for AuxAttrs {
    fn default() -> Self {
        Self::new()
    }
}

impl AuxAttrs {
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: RwLock::new(Arc::from(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// The current list. Never blocks on a writer building a new list.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[AuxEntry]> {
        self.head.read().clone()
    }

    /// First entry of `kind`.
    #[must_use]
    pub fn get(&self, kind: AuxKind) -> Option<AuxEntry> {
        self.snapshot().iter().find(|entry| entry.kind() == kind).cloned()
    }

    /// Inserts an entry after the existing entries of the same kind.
    pub fn attach(&self, entry: AuxEntry) {
        let _guard = self.writer.lock();
        self.publish(|entries| {
            let at = entries.partition_point(|e| e.kind() <= entry.kind());
            entries.insert(at, entry);
        });
    }

    /// Removes every entry of `kind`, returning how many were removed.
    pub fn detach(&self, kind: AuxKind) -> usize {
        let _guard = self.writer.lock();
        let mut removed = 0;
        self.publish(|entries| {
            let before = entries.len();
            entries.retain(|e| e.kind() != kind);
            removed = before - entries.len();
        });
        removed
    }

    /// Builds the new list from the current one and swaps it in. Callers hold `writer`.
    fn publish(&self, edit: impl FnOnce(&mut Vec<AuxEntry>)) {
        let mut entries: Vec<AuxEntry> = self.snapshot().iter().filter(|e| e.is_live()).cloned().collect();
        edit(&mut entries);
        *self.head.write() = Arc::from(entries);
    }

    /// The object's `id()`, assigned on first request.
    pub fn stable_id(&self) -> u64 {
        if let Some(AuxEntry::Id(id)) = self.get(AuxKind::Id) {
            return id;
        }
        let _guard = self.writer.lock();
        if let Some(AuxEntry::Id(id)) = self.get(AuxKind::Id) {
            return id;
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        self.publish(|entries| entries.insert(0, AuxEntry::Id(id)));
        id
    }

    pub fn add_weakref(&self, weakref: &Arc<WeakRefObject>) {
        self.attach(AuxEntry::WeakRef(Arc::downgrade(weakref)));
    }

    /// Live weak references to the object.
    #[must_use]
    pub fn weakrefs(&self) -> Vec<Arc<WeakRefObject>> {
        self.snapshot()
            .iter()
            .filter_map(|entry| match entry {
                AuxEntry::WeakRef(weak) => weak.upgrade(),
                AuxEntry::Id(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn weakref_count(&self) -> usize {
        let count = self.weakrefs().len();
        let dead = self
            .snapshot()
            .iter()
            .any(|entry| !entry.is_live());
        if dead {
            let _guard = self.writer.lock();
            self.publish(|_| {});
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{types::TypeInstance, types::builtin_types, value::Value};

    #[test]
    fn stable_id_is_assigned_once() {
        let aux = AuxAttrs::new();
        let first = aux.stable_id();
        assert_eq!(aux.stable_id(), first);
        assert_eq!(aux.snapshot().len(), 1);
        assert_ne!(AuxAttrs::new().stable_id(), first);
    }

    #[test]
    fn entries_stay_sorted_by_kind() {
        let obj = Value::Object(TypeInstance::new(builtin_types().object.clone()));
        let aux = AuxAttrs::new();
        let weak = WeakRefObject::new(&obj).unwrap();
        aux.add_weakref(&weak);
        aux.stable_id();
        let kinds: Vec<AuxKind> = aux.snapshot().iter().map(AuxEntry::kind).collect();
        assert_eq!(kinds, vec![AuxKind::Id, AuxKind::WeakRef]);
        assert_eq!(aux.detach(AuxKind::WeakRef), 1);
        assert!(aux.get(AuxKind::WeakRef).is_none());
    }

    #[test]
    fn dead_weakrefs_are_pruned() {
        let obj = Value::Object(TypeInstance::new(builtin_types().object.clone()));
        let aux = AuxAttrs::new();
        let kept = WeakRefObject::new(&obj).unwrap();
        aux.add_weakref(&kept);
        {
            let dropped = WeakRefObject::new(&obj).unwrap();
            aux.add_weakref(&dropped);
            assert_eq!(aux.weakref_count(), 2);
        }
        assert_eq!(aux.weakref_count(), 1);
        assert_eq!(aux.snapshot().len(), 1);
    }

    #[test]
    fn concurrent_ids_agree() {
        let aux = Arc::new(AuxAttrs::new());
        let ids: Vec<u64> = (0..8)
            .map(|_| {
                let aux = aux.clone();
                thread::spawn(move || aux.stable_id())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
