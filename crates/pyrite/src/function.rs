//! Callable objects: user functions, bound methods, native builtins and closure cells.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{
    args::ArgValues,
    bytecode::{Code, Vm},
    exception::RunResult,
    types::{Dict, DictRef},
    value::{Str, Value},
};

/// A function object created by `MAKE_FUNCTION`/`MAKE_CLOSURE`.
///
/// Holds the code to run, the globals it was defined in, default values for its trailing
/// positional parameters and the cells captured from enclosing scopes. The cells are in the
/// same order as the code's free variables.
#[derive(Debug)]
pub struct Function {
    code: Arc<Code>,
    globals: DictRef,
    name: RwLock<Str>,
    defaults: RwLock<Arc<[Value]>>,
    closure: Arc<[CellRef]>,
    /// Function attributes (`f.x = 1`).
    dict: DictRef,
    doc: RwLock<Value>,
}

impl Function {
    #[must_use]
    pub fn new(code: Arc<Code>, globals: DictRef, defaults: Vec<Value>, closure: Vec<CellRef>) -> Arc<Self> {
        let doc = code.docstring().map_or(Value::None, Value::str);
        Arc::new(Self {
            name: RwLock::new(Arc::from(code.name())),
            code,
            globals,
            defaults: RwLock::new(Arc::from(defaults)),
            closure: Arc::from(closure),
            dict: Dict::new_ref(),
            doc: RwLock::new(doc),
        })
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
    pub fn name(&self) -> Str {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Str) {
        *self.name.write() = name;
    }

    #[must_use]
    pub fn defaults(&self) -> Arc<[Value]> {
        self.defaults.read().clone()
    }

    pub fn set_defaults(&self, defaults: Vec<Value>) {
        *self.defaults.write() = Arc::from(defaults);
    }

    #[must_use]
    pub fn closure(&self) -> &Arc<[CellRef]> {
        &self.closure
    }

    #[must_use]
    pub fn dict(&self) -> &DictRef {
        &self.dict
    }

    #[must_use]
    pub fn doc(&self) -> Value {
        self.doc.read().clone()
    }

    pub fn set_doc(&self, doc: Value) {
        *self.doc.write() = doc;
    }
}

/// A shared variable captured by a nested function.
#[derive(Debug, Default)]
pub struct Cell {
    value: RwLock<Option<Value>>,
}

pub type CellRef = Arc<Cell>;

impl Cell {
    #[must_use]
    pub fn new(value: Option<Value>) -> CellRef {
        Arc::new(Self {
            value: RwLock::new(value),
        })
    }

    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.value.read().clone()
    }

    pub fn set(&self, value: Option<Value>) {
        *self.value.write() = value;
    }
}

/// A callable paired with the object it was retrieved from.
///
/// Calling it prepends the receiver to the positional arguments. For classmethods the
/// receiver is the class.
#[derive(Debug)]
pub struct BoundMethod {
    func: Value,
    receiver: Value,
}

impl BoundMethod {
    #[must_use]
    pub fn new(func: Value, receiver: Value) -> Value {
        Value::BoundMethod(Arc::new(Self { func, receiver }))
    }

    #[must_use]
    pub fn func(&self) -> &Value {
        &self.func
    }

    #[must_use]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    #[must_use]
    pub fn name(&self) -> Str {
        match &self.func {
            Value::Function(f) => f.name(),
            Value::Builtin(b) => b.name().clone(),
            other => other.type_name(),
        }
    }
}

/// Signature of natively implemented callables.
pub type NativeFn = Arc<dyn Fn(&mut Vm, ArgValues) -> RunResult<Value> + Send + Sync>;

/// A function implemented in Rust.
///
/// Method builtins (`binds_self`) stored in a type's dict behave like plain functions
/// under the descriptor protocol: fetched through an instance they bind it as the first
/// argument.
pub struct BuiltinFunction {
    name: Str,
    func: NativeFn,
    binds_self: bool,
}

impl BuiltinFunction {
    /// A free-standing builtin such as `len`.
    pub fn function(
        name: &str,
        func: impl Fn(&mut Vm, ArgValues) -> RunResult<Value> + Send + Sync + 'static,
    ) -> Value {
        Value::Builtin(Arc::new(Self {
            name: Arc::from(name),
            func: Arc::new(func),
            binds_self: false,
        }))
    }

    /// A builtin stored on a type that binds its receiver when accessed through an instance.
    pub fn method(
        name: &str,
        func: impl Fn(&mut Vm, ArgValues) -> RunResult<Value> + Send + Sync + 'static,
    ) -> Value {
        Value::Builtin(Arc::new(Self {
            name: Arc::from(name),
            func: Arc::new(func),
            binds_self: true,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &Str {
        &self.name
    }

    #[must_use]
    pub fn binds_self(&self) -> bool {
        self.binds_self
    }

    pub fn call(&self, vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
        (self.func)(vm, args)
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("binds_self", &self.binds_self)
            .finish_non_exhaustive()
    }
}
