//! Builtin iterators over lists, tuples, strings, snapshots and the sequence protocol.

use std::sync::Arc;

use parking_lot::Mutex;

use super::ListRef;
use crate::{
    bytecode::Vm,
    exception::{ExcType, RunResult},
    value::{Str, Value},
};

pub type IterRef = Arc<PyIterator>;

#[derive(Debug)]
enum IterState {
    /// Reads the live list, so appends during iteration are seen.
    List { list: ListRef, index: usize },
    Tuple { items: Arc<[Value]>, index: usize },
    /// Byte offset of the next character.
    Str { s: Str, offset: usize },
    /// Dict keys and set members are copied when the iterator is created.
    Values { items: Vec<Value>, index: usize },
    /// `__getitem__` with 0, 1, 2, ... until `IndexError` or `StopIteration`.
    Sequence { target: Value, index: i64 },
    Exhausted,
}

#[derive(Debug)]
pub struct PyIterator {
    state: Mutex<IterState>,
}

impl PyIterator {
    fn with_state(state: IterState) -> Value {
        Value::Iterator(Arc::new(Self {
            state: Mutex::new(state),
        }))
    }

    #[must_use]
    pub fn list(list: ListRef) -> Value {
        Self::with_state(IterState::List { list, index: 0 })
    }

    #[must_use]
    pub fn tuple(items: Arc<[Value]>) -> Value {
        Self::with_state(IterState::Tuple { items, index: 0 })
    }

    #[must_use]
    pub fn string(s: Str) -> Value {
        Self::with_state(IterState::Str { s, offset: 0 })
    }

    #[must_use]
    pub fn values(items: Vec<Value>) -> Value {
        Self::with_state(IterState::Values { items, index: 0 })
    }

    #[must_use]
    pub fn sequence(target: Value) -> Value {
        Self::with_state(IterState::Sequence { target, index: 0 })
    }

    /// Advances the iterator. `Ok(None)` means exhausted; an exhausted iterator stays so.
    pub fn next(&self, vm: &mut Vm) -> RunResult<Option<Value>> {
        let mut state = self.state.lock();
        let item = match &mut *state {
            IterState::List { list, index } => {
                let item = list.read().get(*index).cloned();
                *index += 1;
                item
            }
            IterState::Tuple { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            IterState::Str { s, offset } => s[*offset..].chars().next().map(|c| {
                *offset += c.len_utf8();
                Value::str(c.encode_utf8(&mut [0; 4]))
            }),
            IterState::Values { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            IterState::Sequence { target, index } => {
                let (target, at) = (target.clone(), *index);
                // User `__getitem__` may touch this iterator again.
                drop(state);
                return self.next_from_sequence(vm, &target, at);
            }
            IterState::Exhausted => None,
        };
        if item.is_none() {
            *state = IterState::Exhausted;
        }
        Ok(item)
    }

    fn next_from_sequence(&self, vm: &mut Vm, target: &Value, at: i64) -> RunResult<Option<Value>> {
        match vm.get_item(target, &Value::Int(at)) {
            Ok(item) => {
                if let IterState::Sequence { index, .. } = &mut *self.state.lock() {
                    *index = at + 1;
                }
                Ok(Some(item))
            }
            Err(err) if err.matches_type(ExcType::IndexError) || err.matches_type(ExcType::StopIteration) => {
                *self.state.lock() = IterState::Exhausted;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
