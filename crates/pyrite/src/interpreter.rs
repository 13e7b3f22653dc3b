//! The embedding entry point.
//!
//! An [`Interpreter`] is shared state: the configuration and the builtins namespace. Code
//! runs on a [`Vm`], which holds the per-thread call chain and handled-exception state.
//! [`Interpreter::with_vm`] hands out the calling thread's `Vm`, creating it on first use, so
//! concurrent threads never see each other's frames.

use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use ahash::AHashMap;

use crate::{
    args::ArgValues,
    builtins::builtins_dict,
    bytecode::{Code, Vm, vm::Handoff},
    config::{ConfigError, InterpreterConfig},
    exception::PyException,
    types::{Dict, DictRef},
    value::{Str, Value},
};

static NEXT_INTERPRETER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Idle `Vm`s of this thread, one per interpreter.
    static THREAD_VMS: RefCell<AHashMap<u64, Vm>> = RefCell::new(AHashMap::new());
    /// Call chains of `Vm`s blocked in host code, innermost last.
    static HANDOFFS: RefCell<AHashMap<u64, Vec<Handoff>>> = RefCell::new(AHashMap::new());
}

pub(crate) fn push_handoff(id: u64, handoff: Handoff) {
    HANDOFFS.with(|handoffs| handoffs.borrow_mut().entry(id).or_default().push(handoff));
}

pub(crate) fn pop_handoff(id: u64) -> Option<Handoff> {
    HANDOFFS.with(|handoffs| handoffs.borrow_mut().get_mut(&id)?.pop())
}

/// State shared by every thread running code for one interpreter.
#[derive(Debug)]
pub struct InterpreterState {
    id: u64,
    config: InterpreterConfig,
    builtins: DictRef,
}

impl InterpreterState {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    #[must_use]
    pub fn builtins(&self) -> &DictRef {
        &self.builtins
    }
}

#[derive(Debug, Clone)]
pub struct Interpreter(Arc<InterpreterState>);

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: InterpreterConfig) -> Self {
        let id = NEXT_INTERPRETER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, recursion_limit = config.recursion_limit, "interpreter created");
        Self(Arc::new(InterpreterState {
            id,
            config,
            builtins: builtins_dict().into_ref(),
        }))
    }

    #[must_use]
    pub fn state(&self) -> &Arc<InterpreterState> {
        &self.0
    }

    #[must_use]
    pub fn config(&self) -> &InterpreterConfig {
        self.0.config()
    }

    #[must_use]
    pub fn builtins(&self) -> &DictRef {
        self.0.builtins()
    }

    /// A fresh module namespace with `__name__` set.
    #[must_use]
    pub fn new_globals(&self, name: &str) -> DictRef {
        let mut globals = Dict::new();
        globals.set_str("__name__", Value::str(name));
        globals.set_str("__builtins__", Value::Dict(self.0.builtins.clone()));
        globals.into_ref()
    }

    /// Runs `f` on this thread's `Vm`.
    ///
    /// The `Vm` is checked out for the duration of `f`. Host code called from inside `f`
    /// that re-enters the interpreter continues the same call chain, so the recursion limit,
    /// hooks and handled exception still apply. Any other nested call gets an empty `Vm`.
    pub fn with_vm<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> R {
        let id = self.0.id;
        if let Some(mut handoff) = pop_handoff(id) {
            let mut vm = Vm::continuing(self.0.clone(), &handoff);
            let result = f(&mut vm);
            handoff.warnings.extend(vm.take_warnings());
            push_handoff(id, handoff);
            return result;
        }
        let mut vm = THREAD_VMS
            .with(|vms| vms.borrow_mut().remove(&id))
            .unwrap_or_else(|| Vm::from_state(self.0.clone()));
        let result = f(&mut vm);
        if vm.depth() == 0 {
            THREAD_VMS.with(|vms| {
                vms.borrow_mut().entry(id).or_insert(vm);
            });
        }
        result
    }

    /// Executes a module-level code object in `globals`.
    pub fn run(&self, code: Arc<Code>, globals: &DictRef) -> Result<Value, PyException> {
        self.with_vm(|vm| {
            vm.run_code(code, globals.clone(), None)
                .map_err(|err| finish(vm, err.into_exception()))
        })
    }

    /// Calls a Python callable from host code.
    pub fn call(&self, callable: &Value, args: Vec<Value>, kwargs: Vec<(Str, Value)>) -> Result<Value, PyException> {
        self.with_vm(|vm| {
            vm.call(callable, ArgValues::with_kwargs(args, kwargs))
                .map_err(|err| finish(vm, err.into_exception()))
        })
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::build(InterpreterConfig::default())
    }
}

/// Normalizes an exception leaving the outermost frame.
fn finish(vm: &mut Vm, mut exc: PyException) -> PyException {
    if let Err(err) = exc.normalize(vm) {
        exc = err.into_exception();
    }
    tracing::debug!(exception = %exc.message(), "uncaught exception");
    exc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_RECURSION_LIMIT;

    #[test]
    fn invalid_config_is_rejected() {
        let config = InterpreterConfig::default().with_recursion_limit(MIN_RECURSION_LIMIT - 1);
        assert!(matches!(Interpreter::new(config), Err(ConfigError::RecursionLimit(_))));
    }

    #[test]
    fn nested_vm_is_separate() {
        let interp = Interpreter::default();
        let nested_depth = interp.with_vm(|outer| {
            let outer_ptr: *const Vm = outer;
            interp.with_vm(|inner| {
                let inner_ptr: *const Vm = inner;
                assert_ne!(outer_ptr, inner_ptr);
                inner.depth()
            })
        });
        assert_eq!(nested_depth, 0);
    }

    #[test]
    fn globals_see_builtins() {
        let interp = Interpreter::default();
        let globals = interp.new_globals("__main__");
        assert!(globals.read().contains_str("__builtins__"));
        assert_eq!(globals.read().get_str("__name__"), Some(Value::str("__main__")));
    }
}
