//! The interpreter loop.
//!
//! A [`Vm`] is the per-thread execution state: the chain of running frames, the call depth,
//! the exception currently being handled and the installed trace hooks. Every frame runs in
//! its own invocation of [`Vm::run_frame`], so a Python call is a Rust call; deep recursion
//! grows the native stack on demand through `stacker`.
//!
//! # Block stack
//!
//! `SETUP_LOOP`, `SETUP_EXCEPT` and `SETUP_FINALLY` push a [`Block`] recording the handler
//! offset and the value stack depth. A `return`, `break`, `continue` or exception unwinds the
//! block stack:
//!
//! * a loop block stops `break` (jump to the loop exit) and `continue` (jump to the target);
//! * an except block stops an exception and pushes `traceback, value, type`;
//! * a finally block stops everything. It pushes the exception triple, or the pending
//!   return value / continue target followed by a [`Why`] marker, and `END_FINALLY`
//!   resumes the pending unwind afterwards. A `return` or `raise` inside the finally body
//!   replaces the pending action.
//!
//! Internal errors are never stopped by except or finally blocks.

mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod format;

use std::sync::Arc;

use crate::{
    args::ArgValues,
    bytecode::{Code, CmpOp, Opcode},
    config::InterpreterConfig,
    descriptor,
    exception::{ExcType, PyException, RunError, RunResult},
    frame::{Block, BlockKind, Frame, FrameRef, FrameState, FrameStatus, Why},
    function::{Cell, CellRef, Function},
    interpreter::{self, Interpreter, InterpreterState},
    tracer::TraceHook,
    types::{Dict, DictRef},
    value::Value,
};

pub(crate) use binary::BinOp;

/// Remaining native stack below which a frame switches to a fresh segment.
const STACK_RED_ZONE: usize = 64 * 1024;
/// Size of each additional native stack segment.
const STACK_GROWTH: usize = 1024 * 1024;

/// How a frame is entered.
#[derive(Debug)]
pub enum Resume {
    /// First run of a fresh frame.
    Start,
    /// Generator resume; the value becomes the result of the pending `yield`.
    Send(Value),
    /// Generator resume raising the error at the pending `yield`.
    Throw(RunError),
}

/// How a frame stopped running.
#[derive(Debug)]
pub enum FrameExit {
    Return(Value),
    /// A generator frame suspended at `yield`.
    Yield(Value),
}

/// Non-sequential transfer of control within a frame.
#[derive(Debug)]
enum Unwind {
    Return(Value),
    Break,
    /// Absolute offset to continue at.
    Continue(usize),
    /// The flag says whether the current frame still has to be added to the traceback;
    /// re-raises keep the traceback as it is.
    Exception(RunError, bool),
}

#[derive(Debug)]
enum Step {
    Yield(Value),
    Unwind(Unwind),
}

/// Fetches a u8 operand, advancing the instruction pointer.
macro_rules! fetch_u8 {
    ($code:expr, $state:expr) => {{
        let byte = *$code.bytecode().get($state.ip).ok_or_else(truncated)?;
        $state.ip += 1;
        byte
    }};
}

/// Fetches a little-endian u16 operand.
macro_rules! fetch_u16 {
    ($code:expr, $state:expr) => {{
        let lo = fetch_u8!($code, $state);
        let hi = fetch_u8!($code, $state);
        u16::from_le_bytes([lo, hi])
    }};
}

/// Fetches a little-endian i16 jump offset and resolves it against the next instruction.
macro_rules! fetch_target {
    ($code:expr, $state:expr) => {{
        let lo = fetch_u8!($code, $state);
        let hi = fetch_u8!($code, $state);
        jump_target($state.ip, i16::from_le_bytes([lo, hi]))?
    }};
}

/// Pops TOS; an empty stack is malformed bytecode.
macro_rules! pop {
    ($state:expr) => {
        $state.pop().ok_or_else(stack_underflow)?
    };
}

fn truncated() -> RunError {
    RunError::internal("bytecode ends inside an instruction")
}

fn stack_underflow() -> RunError {
    RunError::internal("value stack underflow")
}

fn jump_target(ip: usize, offset: i16) -> RunResult<usize> {
    ip.checked_add_signed(isize::from(offset))
        .ok_or_else(|| RunError::internal("jump target out of range"))
}

/// Call-chain state of a [`Vm`] that is blocked in host code.
///
/// Host code re-entering the same interpreter on this thread continues from here: the call
/// depth, the calling frame, the handled exception and the hooks all carry over.
pub(crate) struct Handoff {
    depth: usize,
    frame: Option<FrameRef>,
    exc_info: Option<PyException>,
    tracer: Option<Arc<dyn TraceHook>>,
    profiler: Option<Arc<dyn TraceHook>>,
    /// Recorded by re-entrant runs; merged into the blocked `Vm` when the host call returns.
    pub(crate) warnings: Vec<PyException>,
}

/// Per-thread interpreter state.
#[derive(Debug)]
pub struct Vm {
    interp: Arc<InterpreterState>,
    frame: Option<FrameRef>,
    depth: usize,
    /// Nesting of sequence comparisons in progress.
    cmp_depth: usize,
    exc_info: Option<PyException>,
    tracer: Option<Arc<dyn TraceHook>>,
    profiler: Option<Arc<dyn TraceHook>>,
    warnings: Vec<PyException>,
}

impl Vm {
    #[must_use]
    pub fn new(interpreter: &Interpreter) -> Self {
        Self::from_state(interpreter.state().clone())
    }

    pub(crate) fn from_state(interp: Arc<InterpreterState>) -> Self {
        Self {
            interp,
            frame: None,
            depth: 0,
            cmp_depth: 0,
            exc_info: None,
            tracer: None,
            profiler: None,
            warnings: Vec::new(),
        }
    }

    /// A `Vm` continuing the call chain of a `Vm` blocked in host code.
    pub(crate) fn continuing(interp: Arc<InterpreterState>, handoff: &Handoff) -> Self {
        Self {
            interp,
            frame: handoff.frame.clone(),
            depth: handoff.depth,
            cmp_depth: 0,
            exc_info: handoff.exc_info.clone(),
            tracer: handoff.tracer.clone(),
            profiler: handoff.profiler.clone(),
            warnings: Vec::new(),
        }
    }

    /// Runs host code, publishing this `Vm`'s call chain for the duration of `f`.
    pub(crate) fn call_host<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let id = self.interp.id();
        interpreter::push_handoff(
            id,
            Handoff {
                depth: self.depth,
                frame: self.frame.clone(),
                exc_info: self.exc_info.clone(),
                tracer: self.tracer.clone(),
                profiler: self.profiler.clone(),
                warnings: Vec::new(),
            },
        );
        let result = f();
        if let Some(handoff) = interpreter::pop_handoff(id) {
            self.warnings.extend(handoff.warnings);
        }
        result
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<PyException> {
        std::mem::take(&mut self.warnings)
    }

    #[must_use]
    pub fn config(&self) -> &InterpreterConfig {
        self.interp.config()
    }

    /// The interpreter-wide builtins namespace.
    #[must_use]
    pub fn builtins(&self) -> &DictRef {
        self.interp.builtins()
    }

    /// The exception currently being handled, as `sys.exc_info()` reports it.
    #[must_use]
    pub fn exc_info(&self) -> Option<&PyException> {
        self.exc_info.as_ref()
    }

    /// The innermost running frame.
    #[must_use]
    pub fn current_frame(&self) -> Option<&FrameRef> {
        self.frame.as_ref()
    }

    /// Number of frames on the call stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Installs a hook receiving call, line, exception and return events.
    pub fn set_trace(&mut self, hook: Option<Arc<dyn TraceHook>>) {
        self.tracer = hook;
    }

    /// Installs a hook receiving call and return events.
    pub fn set_profile(&mut self, hook: Option<Arc<dyn TraceHook>>) {
        self.profiler = hook;
    }

    /// Warnings recorded under [`WarningPolicy::Record`](crate::config::WarningPolicy).
    #[must_use]
    pub fn warnings(&self) -> &[PyException] {
        &self.warnings
    }

    /// Runs module or class-body code in the given namespaces.
    ///
    /// `locals` defaults to `globals`, as for module code.
    pub fn run_code(&mut self, code: Arc<Code>, globals: DictRef, locals: Option<DictRef>) -> RunResult<Value> {
        let builtins = self.builtins_for(&globals);
        let locals = match locals {
            Some(locals) => Some(locals),
            None if code.is_optimized() => None,
            None => Some(globals.clone()),
        };
        let cells = code.cellvars().iter().map(|_| Cell::new(None)).collect();
        let fast = vec![None; code.varnames().len()];
        let frame = Frame::new(code, globals, builtins, locals, cells, fast);
        match self.run_frame(&frame, Resume::Start)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(RunError::internal("yield outside of a generator")),
        }
    }

    /// `getattr(obj, name)`
    pub fn get_attr(&mut self, obj: &Value, name: &str) -> RunResult<Value> {
        descriptor::get_attribute(self, obj, name)
    }

    /// `setattr(obj, name, value)`
    pub fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> RunResult<()> {
        descriptor::set_attribute(self, obj, name, Some(value))
    }

    /// `delattr(obj, name)`
    pub fn del_attr(&mut self, obj: &Value, name: &str) -> RunResult<()> {
        descriptor::delete_attribute(self, obj, name)
    }

    /// The builtins a frame with these globals resolves against: the globals'
    /// `__builtins__` mapping, then the calling frame's, then the interpreter's.
    pub(crate) fn builtins_for(&self, globals: &DictRef) -> DictRef {
        if let Some(Value::Dict(builtins)) = globals.read().get_str("__builtins__") {
            return builtins;
        }
        match &self.frame {
            Some(frame) => frame.builtins().clone(),
            None => self.builtins().clone(),
        }
    }

    /// Runs `frame` until it returns, raises or (for generator frames) yields.
    ///
    /// Maintains the call chain, the recursion depth and the handled-exception state, which
    /// is restored when the frame stops running so that it never leaks into the caller.
    pub(crate) fn run_frame(&mut self, frame: &FrameRef, resume: Resume) -> RunResult<FrameExit> {
        if self.depth >= self.config().recursion_limit {
            return Err(ExcType::RecursionError.error("maximum recursion depth exceeded"));
        }
        let Some(mut state) = frame.take_state() else {
            return Err(RunError::internal("frame entered while already running"));
        };

        self.depth += 1;
        let back = self.frame.replace(frame.clone());
        frame.set_back(back.clone());
        frame.set_status(FrameStatus::Running);
        let saved_exc = self.exc_info.clone();
        tracing::trace!(code = frame.code().name(), depth = self.depth, "push frame");
        self.fire_call(frame);

        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            self.execute(frame, &mut state, resume)
        });

        match &result {
            Ok(FrameExit::Yield(value)) => {
                frame.set_status(FrameStatus::Suspended);
                self.fire_return(frame, Some(value));
            }
            Ok(FrameExit::Return(value)) => {
                frame.set_status(FrameStatus::Returned);
                self.fire_return(frame, Some(value));
            }
            Err(_) => {
                frame.set_status(FrameStatus::Raised);
                self.fire_return(frame, None);
            }
        }
        if matches!(result, Ok(FrameExit::Yield(_))) {
            frame.set_back(None);
            frame.put_state(state);
        } else {
            frame.set_status(FrameStatus::Unwound);
        }

        self.exc_info = saved_exc;
        self.frame = back;
        self.depth -= 1;
        tracing::trace!(code = frame.code().name(), depth = self.depth, "pop frame");
        if self.depth == 0
            && let Err(err) = &result
        {
            tracing::debug!(error = %err, "uncaught exception left the outermost frame");
        }
        result
    }

    fn execute(&mut self, frame: &FrameRef, state: &mut FrameState, resume: Resume) -> RunResult<FrameExit> {
        let code = frame.code().clone();
        let mut pending = match resume {
            Resume::Start => None,
            Resume::Send(value) => {
                state.push(value);
                None
            }
            Resume::Throw(err) => Some(Unwind::Exception(err, true)),
        };
        let mut last_line = None;
        loop {
            if let Some(unwind) = pending.take()
                && let Some(value) = self.unwind(frame, state, unwind)?
            {
                return Ok(FrameExit::Return(value));
            }
            match self.run_instructions(frame, &code, state, &mut last_line) {
                Ok(Step::Yield(value)) => return Ok(FrameExit::Yield(value)),
                Ok(Step::Unwind(unwind)) => pending = Some(unwind),
                Err(err) => pending = Some(Unwind::Exception(err, true)),
            }
        }
    }

    /// Pops blocks until one stops `unwind`.
    ///
    /// Returns `Ok(None)` when a handler took over (the instruction pointer now points at
    /// it), `Ok(Some(value))` when the frame returns and `Err` when an exception leaves the
    /// frame.
    fn unwind(&mut self, frame: &FrameRef, state: &mut FrameState, unwind: Unwind) -> RunResult<Option<Value>> {
        let mut unwind = unwind;
        if let Unwind::Exception(err, add_traceback) = &mut unwind {
            match err {
                RunError::Internal(_) => return Err(std::mem::replace(err, RunError::internal(""))),
                RunError::Exc(exc) => {
                    if *add_traceback {
                        exc.add_traceback(frame, frame.line(), frame.lasti());
                    }
                    if let Some(tracer) = &self.tracer {
                        tracer.on_exception(frame, exc);
                    }
                }
            }
        }

        while let Some(block) = state.blocks.pop() {
            match (block.kind, unwind) {
                (BlockKind::Loop, Unwind::Continue(target)) => {
                    state.blocks.push(block);
                    state.ip = target;
                    return Ok(None);
                }
                (BlockKind::Loop, Unwind::Break) => {
                    state.unwind_to(block.level);
                    state.ip = block.handler;
                    return Ok(None);
                }
                (BlockKind::Except | BlockKind::Finally, Unwind::Exception(RunError::Exc(exc), _)) => {
                    state.unwind_to(block.level);
                    let mut exc = *exc;
                    if let Err(err) = exc.normalize(self) {
                        unwind = Unwind::Exception(err, false);
                        continue;
                    }
                    let traceback = exc.traceback().cloned().map_or(Value::None, Value::Traceback);
                    state.push(traceback);
                    state.push(exc.value().clone());
                    state.push(exc.typ().clone());
                    self.exc_info = Some(exc);
                    state.ip = block.handler;
                    return Ok(None);
                }
                (BlockKind::Finally, pending) => {
                    state.unwind_to(block.level);
                    match pending {
                        Unwind::Return(value) => {
                            state.push(value);
                            state.push(Value::Marker(Why::Return));
                        }
                        Unwind::Continue(target) => {
                            state.push(Value::Int(i64::try_from(target).map_err(|_| truncated())?));
                            state.push(Value::Marker(Why::Continue));
                        }
                        Unwind::Break => state.push(Value::Marker(Why::Break)),
                        Unwind::Exception(err, _) => return Err(err),
                    }
                    state.ip = block.handler;
                    return Ok(None);
                }
                (_, pending) => {
                    state.unwind_to(block.level);
                    unwind = pending;
                }
            }
        }

        match unwind {
            Unwind::Return(value) => Ok(Some(value)),
            Unwind::Exception(err, _) => Err(err),
            Unwind::Break | Unwind::Continue(_) => Err(RunError::internal("'break' or 'continue' outside loop")),
        }
    }

    fn push_block(&self, state: &mut FrameState, kind: BlockKind, handler: usize) -> RunResult<()> {
        if state.blocks.len() >= self.config().max_block_depth {
            return Err(ExcType::SystemError.error("too many statically nested blocks"));
        }
        let level = state.stack.len();
        state.blocks.push(Block { kind, handler, level });
        Ok(())
    }

    /// Executes instructions until a yield or a non-sequential unwind.
    fn run_instructions(
        &mut self,
        frame: &FrameRef,
        code: &Arc<Code>,
        state: &mut FrameState,
        last_line: &mut Option<u32>,
    ) -> RunResult<Step> {
        let trace_opcodes = self.config().trace_opcodes;
        loop {
            let start = state.ip;
            frame.set_lasti(start);
            let byte = fetch_u8!(code, state);
            let op = Opcode::from_repr(byte)
                .ok_or_else(|| RunError::internal(format!("invalid opcode {byte:#04x} at offset {start}")))?;
            if trace_opcodes {
                tracing::trace!(code = code.name(), offset = start, ?op, depth = state.stack.len(), "dispatch");
            }
            if let Some(tracer) = &self.tracer {
                let line = code.line_for(start);
                if trace_opcodes || *last_line != Some(line) {
                    *last_line = Some(line);
                    tracer.on_line(frame, line);
                }
            }

            match op {
                Opcode::Nop => {}
                Opcode::PopTop => {
                    pop!(state);
                }
                Opcode::RotTwo => {
                    let a = pop!(state);
                    let b = pop!(state);
                    state.push(a);
                    state.push(b);
                }
                Opcode::RotThree => {
                    let a = pop!(state);
                    let b = pop!(state);
                    let c = pop!(state);
                    state.push(a);
                    state.push(c);
                    state.push(b);
                }
                Opcode::DupTop => {
                    let top = state.peek(0).cloned().ok_or_else(stack_underflow)?;
                    state.push(top);
                }

                // === constants and names ===
                Opcode::LoadConst => {
                    let index = usize::from(fetch_u16!(code, state));
                    let value = code
                        .constant(index)
                        .ok_or_else(|| RunError::internal(format!("constant {index} out of range")))?;
                    state.push(value);
                }
                Opcode::LoadNone => state.push(Value::None),
                Opcode::LoadName => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let local = frame.locals().and_then(|locals| locals.read().get_str(&name));
                    let value = match local {
                        Some(value) => value,
                        None => lookup_global(frame, &name)
                            .ok_or_else(|| ExcType::NameError.error(format!("name '{name}' is not defined")))?,
                    };
                    state.push(value);
                }
                Opcode::StoreName => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let value = pop!(state);
                    locals_of(frame)?.write().set_str(&name, value);
                }
                Opcode::DeleteName => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    if locals_of(frame)?.write().remove_str(&name).is_none() {
                        return Err(ExcType::NameError.error(format!("name '{name}' is not defined")));
                    }
                }
                Opcode::LoadGlobal => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let value = lookup_global(frame, &name)
                        .ok_or_else(|| ExcType::NameError.error(format!("global name '{name}' is not defined")))?;
                    state.push(value);
                }
                Opcode::StoreGlobal => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let value = pop!(state);
                    frame.globals().write().set_str(&name, value);
                }
                Opcode::DeleteGlobal => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    if frame.globals().write().remove_str(&name).is_none() {
                        return Err(ExcType::NameError.error(format!("global name '{name}' is not defined")));
                    }
                }
                Opcode::LoadFast => {
                    let slot = usize::from(fetch_u16!(code, state));
                    match state.fast.get(slot) {
                        Some(Some(value)) => {
                            let value = value.clone();
                            state.push(value);
                        }
                        Some(None) => return Err(unbound_local(code, slot)),
                        None => return Err(RunError::internal(format!("fast slot {slot} out of range"))),
                    }
                }
                Opcode::StoreFast => {
                    let slot = usize::from(fetch_u16!(code, state));
                    let value = pop!(state);
                    *state
                        .fast
                        .get_mut(slot)
                        .ok_or_else(|| RunError::internal(format!("fast slot {slot} out of range")))? = Some(value);
                }
                Opcode::DeleteFast => {
                    let slot = usize::from(fetch_u16!(code, state));
                    let old = state.fast.get_mut(slot).and_then(Option::take);
                    if old.is_none() {
                        return Err(unbound_local(code, slot));
                    }
                }
                Opcode::LoadDeref => {
                    let index = usize::from(fetch_u16!(code, state));
                    let value = cell_at(frame, index)?.get().ok_or_else(|| unbound_cell(code, index))?;
                    state.push(value);
                }
                Opcode::StoreDeref => {
                    let index = usize::from(fetch_u16!(code, state));
                    let value = pop!(state);
                    cell_at(frame, index)?.set(Some(value));
                }
                Opcode::LoadClosure => {
                    let index = usize::from(fetch_u16!(code, state));
                    state.push(Value::Cell(cell_at(frame, index)?.clone()));
                }
                Opcode::LoadAttr => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let obj = pop!(state);
                    let value = self.get_attr(&obj, &name)?;
                    state.push(value);
                }
                Opcode::StoreAttr => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let obj = pop!(state);
                    let value = pop!(state);
                    self.set_attr(&obj, &name, value)?;
                }
                Opcode::DeleteAttr => {
                    let name = name_at(code, fetch_u16!(code, state))?;
                    let obj = pop!(state);
                    self.del_attr(&obj, &name)?;
                }
                Opcode::LoadLocals => state.push(Value::Dict(locals_of(frame)?.clone())),

                // === operators ===
                Opcode::UnaryNot => {
                    let value = pop!(state);
                    let truth = self.truthy(&value)?;
                    state.push(Value::Bool(!truth));
                }
                Opcode::UnaryNegative => {
                    let value = pop!(state);
                    state.push(self.negative(&value)?);
                }
                Opcode::UnaryPositive => {
                    let value = pop!(state);
                    state.push(self.positive(&value)?);
                }
                Opcode::BinaryAdd
                | Opcode::BinarySubtract
                | Opcode::BinaryMultiply
                | Opcode::BinaryDivide
                | Opcode::BinaryTrueDivide
                | Opcode::BinaryFloorDivide
                | Opcode::BinaryModulo => {
                    let rhs = pop!(state);
                    let lhs = pop!(state);
                    let op = BinOp::from_opcode(op).ok_or_else(|| RunError::internal("not a binary opcode"))?;
                    state.push(self.binary_op(op, &lhs, &rhs)?);
                }
                Opcode::BinarySubscr => {
                    let key = pop!(state);
                    let obj = pop!(state);
                    state.push(self.get_item(&obj, &key)?);
                }
                Opcode::StoreSubscr => {
                    let key = pop!(state);
                    let obj = pop!(state);
                    let value = pop!(state);
                    self.set_item(&obj, key, value)?;
                }
                Opcode::DeleteSubscr => {
                    let key = pop!(state);
                    let obj = pop!(state);
                    self.del_item(&obj, &key)?;
                }
                Opcode::CompareOp => {
                    let raw = fetch_u8!(code, state);
                    let cmp = CmpOp::from_repr(raw)
                        .ok_or_else(|| RunError::internal(format!("invalid comparison {raw}")))?;
                    let rhs = pop!(state);
                    let lhs = pop!(state);
                    state.push(self.compare(cmp, &lhs, &rhs)?);
                }

                // === containers ===
                Opcode::BuildTuple => {
                    let n = usize::from(fetch_u16!(code, state));
                    let items = state.pop_n(n).ok_or_else(stack_underflow)?;
                    state.push(Value::tuple(items));
                }
                Opcode::BuildList => {
                    let n = usize::from(fetch_u16!(code, state));
                    let items = state.pop_n(n).ok_or_else(stack_underflow)?;
                    state.push(Value::list(items));
                }
                Opcode::BuildMap => {
                    let n = usize::from(fetch_u16!(code, state));
                    let flat = state.pop_n(2 * n).ok_or_else(stack_underflow)?;
                    let mut items = flat.into_iter();
                    let pairs = std::iter::from_fn(|| Some((items.next()?, items.next()?)));
                    let dict = Dict::from_pairs(pairs.collect::<Vec<_>>())?;
                    state.push(Value::Dict(dict.into_ref()));
                }
                Opcode::UnpackSequence => {
                    let n = usize::from(fetch_u16!(code, state));
                    let seq = pop!(state);
                    let items = self.unpack_sequence(&seq, n)?;
                    state.stack.extend(items.into_iter().rev());
                }

                // === functions and classes ===
                Opcode::MakeFunction => {
                    let n = usize::from(fetch_u16!(code, state));
                    let body = pop_code(state)?;
                    let defaults = state.pop_n(n).ok_or_else(stack_underflow)?;
                    let func = Function::new(body, frame.globals().clone(), defaults, Vec::new());
                    state.push(Value::Function(func));
                }
                Opcode::MakeClosure => {
                    let n = usize::from(fetch_u16!(code, state));
                    let body = pop_code(state)?;
                    let cells = closure_cells(&pop!(state))?;
                    let defaults = state.pop_n(n).ok_or_else(stack_underflow)?;
                    if cells.len() != body.freevars().len() {
                        return Err(RunError::internal(format!(
                            "{} expects {} closure cells, got {}",
                            body.name(),
                            body.freevars().len(),
                            cells.len()
                        )));
                    }
                    let func = Function::new(body, frame.globals().clone(), defaults, cells);
                    state.push(Value::Function(func));
                }
                Opcode::CallFunction
                | Opcode::CallFunctionVar
                | Opcode::CallFunctionKw
                | Opcode::CallFunctionVarKw => {
                    let arg = fetch_u16!(code, state);
                    let (callee, args) = self.collect_call_args(state, op, arg)?;
                    let result = self.call(&callee, args)?;
                    state.push(result);
                }
                Opcode::BuildClass => {
                    let dict = pop!(state);
                    let bases = pop!(state);
                    let name = pop!(state);
                    let class = self.build_class(frame, name, bases, dict)?;
                    state.push(class);
                }
                Opcode::ReturnValue => {
                    let value = pop!(state);
                    return Ok(Step::Unwind(Unwind::Return(value)));
                }
                Opcode::YieldValue => {
                    let value = pop!(state);
                    return Ok(Step::Yield(value));
                }

                // === control flow ===
                Opcode::Jump => state.ip = fetch_target!(code, state),
                Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                    let target = fetch_target!(code, state);
                    let value = pop!(state);
                    if self.truthy(&value)? == (op == Opcode::PopJumpIfTrue) {
                        state.ip = target;
                    }
                }
                Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                    let target = fetch_target!(code, state);
                    let value = state.peek(0).cloned().ok_or_else(stack_underflow)?;
                    if self.truthy(&value)? == (op == Opcode::JumpIfTrueOrPop) {
                        state.ip = target;
                    } else {
                        pop!(state);
                    }
                }
                Opcode::ForIter => {
                    let target = fetch_target!(code, state);
                    let iter = state.peek(0).cloned().ok_or_else(stack_underflow)?;
                    match self.next_item(&iter)? {
                        Some(item) => state.push(item),
                        None => {
                            pop!(state);
                            state.ip = target;
                        }
                    }
                }
                Opcode::GetIter => {
                    let value = pop!(state);
                    state.push(self.get_iter(&value)?);
                }

                // === blocks ===
                Opcode::SetupLoop => {
                    let target = fetch_target!(code, state);
                    self.push_block(state, BlockKind::Loop, target)?;
                }
                Opcode::SetupExcept => {
                    let target = fetch_target!(code, state);
                    self.push_block(state, BlockKind::Except, target)?;
                }
                Opcode::SetupFinally => {
                    let target = fetch_target!(code, state);
                    self.push_block(state, BlockKind::Finally, target)?;
                }
                Opcode::PopBlock => {
                    let block = state
                        .blocks
                        .pop()
                        .ok_or_else(|| RunError::internal("POP_BLOCK with an empty block stack"))?;
                    state.unwind_to(block.level);
                }
                Opcode::BreakLoop => return Ok(Step::Unwind(Unwind::Break)),
                Opcode::ContinueLoop => {
                    let target = fetch_target!(code, state);
                    return Ok(Step::Unwind(Unwind::Continue(target)));
                }
                Opcode::EndFinally => {
                    if let Some(unwind) = self.end_finally(state)? {
                        return Ok(Step::Unwind(unwind));
                    }
                }
                Opcode::RaiseVarargs => {
                    let argc = fetch_u8!(code, state);
                    return Ok(Step::Unwind(self.raise_varargs(state, argc)?));
                }
            }
        }
    }

    fn fire_call(&self, frame: &FrameRef) {
        for hook in [&self.tracer, &self.profiler].into_iter().flatten() {
            hook.on_call(frame, self.depth);
        }
    }

    fn fire_return(&self, frame: &FrameRef, value: Option<&Value>) {
        for hook in [&self.tracer, &self.profiler].into_iter().flatten() {
            hook.on_return(frame, value);
        }
    }

    /// Calls `callable` from native code with positional arguments only.
    pub(crate) fn call_args(&mut self, callable: &Value, args: Vec<Value>) -> RunResult<Value> {
        self.call(callable, ArgValues::new(args))
    }
}

fn name_at(code: &Code, index: u16) -> RunResult<crate::value::Str> {
    code.name_at(usize::from(index))
        .ok_or_else(|| RunError::internal(format!("name {index} out of range")))
}

fn lookup_global(frame: &Frame, name: &str) -> Option<Value> {
    frame
        .globals()
        .read()
        .get_str(name)
        .or_else(|| frame.builtins().read().get_str(name))
}

fn locals_of(frame: &Frame) -> RunResult<&DictRef> {
    frame
        .locals()
        .ok_or_else(|| RunError::internal("name opcode in a frame without a locals dict"))
}

fn cell_at(frame: &Frame, index: usize) -> RunResult<&CellRef> {
    frame
        .cells()
        .get(index)
        .ok_or_else(|| RunError::internal(format!("cell {index} out of range")))
}

fn unbound_local(code: &Code, slot: usize) -> RunError {
    let name = code.varnames().get(slot).map_or("?", String::as_str);
    ExcType::UnboundLocalError.error(format!("local variable '{name}' referenced before assignment"))
}

fn unbound_cell(code: &Code, index: usize) -> RunError {
    let cellvars = code.cellvars().len();
    if index < cellvars {
        ExcType::UnboundLocalError.error(format!(
            "local variable '{}' referenced before assignment",
            code.cellvars()[index]
        ))
    } else {
        let name = code.freevars().get(index - cellvars).map_or("?", String::as_str);
        ExcType::NameError.error(format!(
            "free variable '{name}' referenced before assignment in enclosing scope"
        ))
    }
}

fn pop_code(state: &mut FrameState) -> RunResult<Arc<Code>> {
    match state.pop() {
        Some(Value::Code(code)) => Ok(code),
        Some(other) => Err(RunError::internal(format!(
            "expected a code object, found '{}'",
            other.type_name()
        ))),
        None => Err(stack_underflow()),
    }
}

fn closure_cells(value: &Value) -> RunResult<Vec<CellRef>> {
    let Value::Tuple(items) = value else {
        return Err(RunError::internal("closure must be a tuple of cells"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Cell(cell) => Ok(cell.clone()),
            _ => Err(RunError::internal("closure must be a tuple of cells")),
        })
        .collect()
}
