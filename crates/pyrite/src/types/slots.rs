//! Special-method slot cache.
//!
//! Looking up `__add__` or `__getattr__` walks the whole method resolution order, so each
//! class caches the result for every special method. A cache records the epoch of every
//! class it read from; it is current only while none of those epochs has moved. Mutating a
//! class dict or its bases bumps its epoch, which invalidates the caches of all subclasses
//! without having to visit them.

use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

use super::{ClassLike, DictRef};
use crate::value::Value;

/// Special methods resolved through the slot cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter, IntoStaticStr)]
pub enum SpecialMethod {
    #[strum(serialize = "__init__")]
    Init,
    #[strum(serialize = "__new__")]
    New,
    #[strum(serialize = "__call__")]
    Call,
    #[strum(serialize = "__getattribute__")]
    GetAttribute,
    #[strum(serialize = "__getattr__")]
    GetAttr,
    #[strum(serialize = "__setattr__")]
    SetAttr,
    #[strum(serialize = "__delattr__")]
    DelAttr,
    #[strum(serialize = "__get__")]
    Get,
    #[strum(serialize = "__set__")]
    Set,
    #[strum(serialize = "__delete__")]
    Delete,
    #[strum(serialize = "__repr__")]
    Repr,
    #[strum(serialize = "__str__")]
    Str,
    #[strum(serialize = "__hash__")]
    Hash,
    #[strum(serialize = "__eq__")]
    Eq,
    #[strum(serialize = "__ne__")]
    Ne,
    #[strum(serialize = "__lt__")]
    Lt,
    #[strum(serialize = "__le__")]
    Le,
    #[strum(serialize = "__gt__")]
    Gt,
    #[strum(serialize = "__ge__")]
    Ge,
    #[strum(serialize = "__len__")]
    Len,
    #[strum(serialize = "__nonzero__")]
    Nonzero,
    #[strum(serialize = "__iter__")]
    Iter,
    #[strum(serialize = "next")]
    Next,
    #[strum(serialize = "__contains__")]
    Contains,
    #[strum(serialize = "__getitem__")]
    GetItem,
    #[strum(serialize = "__setitem__")]
    SetItem,
    #[strum(serialize = "__delitem__")]
    DelItem,
    #[strum(serialize = "__add__")]
    Add,
    #[strum(serialize = "__radd__")]
    RAdd,
    #[strum(serialize = "__sub__")]
    Sub,
    #[strum(serialize = "__rsub__")]
    RSub,
    #[strum(serialize = "__mul__")]
    Mul,
    #[strum(serialize = "__rmul__")]
    RMul,
    #[strum(serialize = "__div__")]
    Div,
    #[strum(serialize = "__rdiv__")]
    RDiv,
    #[strum(serialize = "__truediv__")]
    TrueDiv,
    #[strum(serialize = "__rtruediv__")]
    RTrueDiv,
    #[strum(serialize = "__floordiv__")]
    FloorDiv,
    #[strum(serialize = "__rfloordiv__")]
    RFloorDiv,
    #[strum(serialize = "__mod__")]
    Mod,
    #[strum(serialize = "__rmod__")]
    RMod,
    #[strum(serialize = "__neg__")]
    Neg,
    #[strum(serialize = "__pos__")]
    Pos,
    #[strum(serialize = "__int__")]
    Int,
    #[strum(serialize = "__index__")]
    Index,
    #[strum(serialize = "__float__")]
    Float,
}

impl SpecialMethod {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Resolved special methods of one class plus the epochs they were resolved at.
///
/// The owning class is stamped by epoch only; holding it strongly would make the class
/// own itself.
#[derive(Debug)]
pub(crate) struct SlotCache {
    own_epoch: u64,
    stamps: SmallVec<[(ClassLike, u64); 8]>,
    methods: Box<[Option<Value>]>,
}

impl SlotCache {
    /// Resolves every special method over the owner's dict followed by `ancestors`.
    ///
    /// Epochs are sampled before the dicts are read: a concurrent mutation can only make the
    /// cache look stale, never make stale data look current.
    pub(crate) fn compute(own_epoch: u64, own: &DictRef, ancestors: &[ClassLike]) -> Self {
        let stamps = ancestors.iter().map(|cls| (cls.clone(), cls.epoch())).collect();
        let own = own.read().clone();
        let methods = SpecialMethod::iter()
            .map(|m| {
                own.get_str(m.name())
                    .or_else(|| ancestors.iter().find_map(|cls| cls.own_get(m.name())))
            })
            .collect();
        Self {
            own_epoch,
            stamps,
            methods,
        }
    }

    pub(crate) fn is_current(&self, own_epoch: u64) -> bool {
        self.own_epoch == own_epoch && self.stamps.iter().all(|(cls, epoch)| cls.epoch() == *epoch)
    }

    pub(crate) fn get(&self, method: SpecialMethod) -> Option<Value> {
        self.methods[method as usize].clone()
    }
}

/// Publication point for a class's slot cache.
///
/// Readers clone the `Arc` under a short read lock; recomputation swaps in a whole new
/// cache, so a reader sees either the old or the new table.
#[derive(Debug)]
pub(crate) struct SlotTable {
    cache: RwLock<Option<Arc<SlotCache>>>,
}

impl SlotTable {
    pub(crate) fn new() -> Self {
        Self {
            cache: RwLock::new(None),
        }
    }

    /// Returns the cached resolution of `method`, recomputing the table when stale.
    ///
    /// `own_epoch` must be sampled by the caller before `ancestors` is computed.
    pub(crate) fn lookup(
        &self,
        method: SpecialMethod,
        own_epoch: u64,
        own: &DictRef,
        ancestors: impl FnOnce() -> Vec<ClassLike>,
    ) -> Option<Value> {
        let cached = self.cache.read().clone();
        if let Some(cache) = cached
            && cache.is_current(own_epoch)
        {
            return cache.get(method);
        }
        let fresh = Arc::new(SlotCache::compute(own_epoch, own, &ancestors()));
        tracing::trace!(method = method.name(), "recomputed special method slots");
        let found = fresh.get(method);
        *self.cache.write() = Some(fresh);
        found
    }
}
