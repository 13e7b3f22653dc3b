//! Execution frames.
//!
//! A frame is one activation of a code object: its fast locals, value stack, block stack
//! and instruction pointer, plus the namespaces it resolves names in. Frames are shared
//! (`Arc`) because tracebacks, generators and `sys._getframe`-style introspection keep them
//! alive after they stop running.
//!
//! The mutable execution state is moved out of the frame while the interpreter loop runs it
//! and put back when a generator suspends, so the loop works on plain owned data.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::{
    bytecode::Code,
    function::CellRef,
    types::DictRef,
    value::Value,
};

pub type FrameRef = Arc<Frame>;

/// Why a `finally` block is running, when it is not running because of an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Why {
    Return,
    Break,
    Continue,
}

/// Lifecycle of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Created, not yet entered.
    Fresh,
    Running,
    /// A generator frame stopped at `yield`.
    Suspended,
    Returned,
    /// Left by an uncaught exception.
    Raised,
    /// Popped from the call stack; the frame only lives on through references.
    Unwound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    Except,
    Finally,
}

/// An entry of the block stack set up by `SETUP_LOOP`, `SETUP_EXCEPT` or `SETUP_FINALLY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Jump target: loop exit, except clause or finally clause.
    pub handler: usize,
    /// Value stack depth when the block was entered.
    pub level: usize,
}

/// The state the interpreter loop owns while the frame runs.
#[derive(Debug)]
pub struct FrameState {
    pub fast: Vec<Option<Value>>,
    pub stack: Vec<Value>,
    pub blocks: SmallVec<[Block; 8]>,
    pub ip: usize,
}

impl FrameState {
    #[must_use]
    pub fn new(fast: Vec<Option<Value>>) -> Self {
        Self {
            fast,
            stack: Vec::new(),
            blocks: SmallVec::new(),
            ip: 0,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops TOS. An empty stack means the bytecode is malformed; `None` comes back and the
    /// caller reports an internal error.
    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    #[must_use]
    pub fn peek(&self, depth: usize) -> Option<&Value> {
        self.stack.len().checked_sub(depth + 1).and_then(|i| self.stack.get(i))
    }

    /// Pops the top `n` values, oldest first.
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<Value>> {
        let at = self.stack.len().checked_sub(n)?;
        Some(self.stack.split_off(at))
    }

    /// Pops values until the stack is `level` deep.
    pub fn unwind_to(&mut self, level: usize) {
        self.stack.truncate(level);
    }
}

#[derive(Debug)]
pub struct Frame {
    code: Arc<Code>,
    globals: DictRef,
    builtins: DictRef,
    /// `None` for optimized code, which keeps its locals in fast slots.
    locals: Option<DictRef>,
    /// Cellvars followed by freevars.
    cells: Box<[CellRef]>,
    back: RwLock<Option<FrameRef>>,
    status: Mutex<FrameStatus>,
    lasti: AtomicUsize,
    state: Mutex<Option<FrameState>>,
}

impl Frame {
    #[must_use]
    pub fn new(
        code: Arc<Code>,
        globals: DictRef,
        builtins: DictRef,
        locals: Option<DictRef>,
        cells: Vec<CellRef>,
        fast: Vec<Option<Value>>,
    ) -> FrameRef {
        Arc::new(Self {
            code,
            globals,
            builtins,
            locals,
            cells: cells.into_boxed_slice(),
            back: RwLock::new(None),
            status: Mutex::new(FrameStatus::Fresh),
            lasti: AtomicUsize::new(0),
            state: Mutex::new(Some(FrameState::new(fast))),
        })
    }

    /// Moves the execution state out for the interpreter loop. `None` while it is running.
    pub(crate) fn take_state(&self) -> Option<FrameState> {
        self.state.lock().take()
    }

    pub(crate) fn put_state(&self, state: FrameState) {
        *self.state.lock() = Some(state);
    }

    #[must_use]
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    #[must_use]
    pub fn globals(&self) -> &DictRef {
        &self.globals
    }

    #[must_use]
    pub fn builtins(&self) -> &DictRef {
        &self.builtins
    }

    #[must_use]
    pub fn locals(&self) -> Option<&DictRef> {
        self.locals.as_ref()
    }

    #[must_use]
    pub fn cells(&self) -> &[CellRef] {
        &self.cells
    }

    /// The calling frame, while this frame is on the call stack.
    #[must_use]
    pub fn back(&self) -> Option<FrameRef> {
        self.back.read().clone()
    }

    pub(crate) fn set_back(&self, back: Option<FrameRef>) {
        *self.back.write() = back;
    }

    #[must_use]
    pub fn status(&self) -> FrameStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: FrameStatus) {
        *self.status.lock() = status;
    }

    /// Offset of the last instruction started.
    #[must_use]
    pub fn lasti(&self) -> usize {
        self.lasti.load(Ordering::Relaxed)
    }

    pub(crate) fn set_lasti(&self, lasti: usize) {
        self.lasti.store(lasti, Ordering::Relaxed);
    }

    /// Source line of the last instruction started.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.code.line_for(self.lasti())
    }

    /// Reads a local by name: the locals dict for unoptimized frames, otherwise the fast
    /// slot of a suspended frame.
    #[must_use]
    pub fn local(&self, name: &str) -> Option<Value> {
        if let Some(locals) = &self.locals {
            return locals.read().get_str(name);
        }
        let index = self.code.varnames().iter().position(|v| v == name)?;
        self.state.lock().as_ref()?.fast.get(index).cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::CodeBuilder, types::Dict};

    #[test]
    fn stack_helpers() {
        let mut state = FrameState::new(Vec::new());
        state.push(Value::Int(1));
        state.push(Value::Int(2));
        state.push(Value::Int(3));
        assert_eq!(state.peek(0), Some(&Value::Int(3)));
        assert_eq!(state.peek(2), Some(&Value::Int(1)));
        assert_eq!(state.peek(3), None);
        assert_eq!(state.pop_n(2), Some(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(state.pop_n(2), None);
        state.unwind_to(0);
        assert!(state.pop().is_none());
    }

    #[test]
    fn fast_locals_are_visible_by_name() {
        let code = CodeBuilder::function("f", &["a", "b"]).build();
        let frame = Frame::new(
            code,
            Dict::new_ref(),
            Dict::new_ref(),
            None,
            Vec::new(),
            vec![Some(Value::Int(7)), None],
        );
        assert_eq!(frame.local("a"), Some(Value::Int(7)));
        assert_eq!(frame.local("b"), None);
        assert_eq!(frame.status(), FrameStatus::Fresh);
    }
}
