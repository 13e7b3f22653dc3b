//! The call protocol.
//!
//! [`Vm::call`] is the single entry point for invoking any callable value. User functions
//! bind their arguments into a fresh frame (or a generator wrapping it), types go through
//! `__new__` and `__init__`, classic classes create an instance and run `__init__`, and
//! everything else dispatches to `__call__`.

use std::sync::Arc;

use super::{FrameExit, Resume, Vm, stack_underflow};
use crate::{
    args::ArgValues,
    bytecode::Opcode,
    config::WarningPolicy,
    descriptor,
    exception::{ExcType, RunError, RunResult},
    frame::{Frame, FrameRef, FrameState},
    function::{Cell, CellRef, Function},
    signature::Signature,
    types::{ClassLike, ClassRef, ClassicInstance, Dict, Generator, SpecialMethod, TypeRef, builtin_types},
    value::{Str, Value},
};

impl Vm {
    /// Calls `callable` with positional and keyword arguments.
    pub fn call(&mut self, callable: &Value, args: ArgValues) -> RunResult<Value> {
        match callable {
            Value::Function(func) => self.call_function(func, args),
            Value::BoundMethod(method) => {
                let args = args.prepend(method.receiver().clone());
                self.call(method.func(), args)
            }
            Value::Builtin(builtin) => builtin.call(self, args),
            Value::Type(t) => {
                let meta = t.metatype();
                if Arc::ptr_eq(&meta, &builtin_types().type_) {
                    return self.call_type(t, args);
                }
                match meta.slot(SpecialMethod::Call) {
                    Some(call) => self.call(&call, args.prepend(callable.clone())),
                    None => Err(ExcType::type_error_not_callable(meta.name())),
                }
            }
            Value::Class(cls) => self.call_classic(cls, args),
            other => match self.call_special_args(other, SpecialMethod::Call, args)? {
                Some(result) => Ok(result),
                None => Err(ExcType::type_error_not_callable(other.type_name())),
            },
        }
    }

    /// Runs a user function: binds the arguments, sets up cells and either runs the frame or
    /// wraps it in a generator.
    fn call_function(&mut self, func: &Arc<Function>, args: ArgValues) -> RunResult<Value> {
        let code = func.code().clone();
        let defaults = func.defaults();
        let fast = Signature::from_code(&code).bind(&defaults, args)?;

        let mut cells: Vec<CellRef> = Vec::with_capacity(code.cellvars().len() + func.closure().len());
        for name in code.cellvars() {
            let initial = code
                .varnames()
                .iter()
                .position(|v| v == name)
                .and_then(|slot| fast.get(slot).cloned().flatten());
            cells.push(Cell::new(initial));
        }
        cells.extend(func.closure().iter().cloned());

        let locals = if code.is_optimized() {
            None
        } else {
            let mut locals = Dict::new();
            for (name, value) in code.varnames().iter().zip(&fast) {
                if let Some(value) = value {
                    locals.set_str(name, value.clone());
                }
            }
            Some(locals.into_ref())
        };
        let globals = func.globals().clone();
        let builtins = self.builtins_for(&globals);
        let frame = Frame::new(code.clone(), globals, builtins, locals, cells, fast);
        if code.is_generator() {
            return Ok(Value::Generator(Generator::new(frame)));
        }
        match self.run_frame(&frame, Resume::Start)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(RunError::internal("yield from a non-generator frame")),
        }
    }

    /// `T(*args, **kwargs)` for types whose metatype is `type`: `__new__`, then `__init__`
    /// when the result is an instance of `T`.
    pub(crate) fn call_type(&mut self, t: &TypeRef, args: ArgValues) -> RunResult<Value> {
        if Arc::ptr_eq(t, &builtin_types().type_) && args.args.len() == 1 && args.kwargs.is_empty() {
            return Ok(Value::Type(args.args[0].type_of()));
        }
        let new = match t.lookup("__new__") {
            Some(Value::StaticMethod(sm)) => sm.func().clone(),
            Some(other) => other,
            None => return Err(ExcType::type_error(format!("cannot create '{}' instances", t.name()))),
        };
        let instance = self.call(&new, args.clone().prepend(Value::Type(t.clone())))?;
        if instance.class_of().is_subclass(&ClassLike::Type(t.clone())) {
            self.run_init(&instance, args)?;
        }
        Ok(instance)
    }

    /// Instantiates a classic class. A class without `__init__` accepts no arguments.
    fn call_classic(&mut self, cls: &ClassRef, args: ArgValues) -> RunResult<Value> {
        let instance = Value::Instance(ClassicInstance::new(cls.clone()));
        match cls.lookup("__init__") {
            Some(init) => {
                let owner = ClassLike::Classic(cls.clone());
                let bound = descriptor::descr_get(self, &init, Some(&instance), &owner)?;
                let result = self.call(&bound, args)?;
                check_init_result(&result)?;
            }
            None if args.count() > 0 => {
                return Err(ExcType::type_error("this constructor takes no arguments"));
            }
            None => {}
        }
        Ok(instance)
    }

    fn run_init(&mut self, instance: &Value, args: ArgValues) -> RunResult<()> {
        if let Some(result) = self.call_special_args(instance, SpecialMethod::Init, args)? {
            check_init_result(&result)?;
        }
        Ok(())
    }

    /// Pops the callee and its arguments for the `CALL_FUNCTION*` family.
    ///
    /// The operand's low byte counts positional values and the high byte keyword pairs.
    /// The `*args` iterable and the `**kwargs` mapping, when present, sit on top of them.
    pub(super) fn collect_call_args(
        &mut self,
        state: &mut FrameState,
        op: Opcode,
        arg: u16,
    ) -> RunResult<(Value, ArgValues)> {
        let [npos, nkw] = arg.to_le_bytes();
        let kw_mapping = match op {
            Opcode::CallFunctionKw | Opcode::CallFunctionVarKw => Some(state.pop().ok_or_else(stack_underflow)?),
            _ => None,
        };
        let star = match op {
            Opcode::CallFunctionVar | Opcode::CallFunctionVarKw => Some(state.pop().ok_or_else(stack_underflow)?),
            _ => None,
        };
        let flat = state.pop_n(2 * usize::from(nkw)).ok_or_else(stack_underflow)?;
        let mut kwargs: Vec<(Str, Value)> = Vec::with_capacity(usize::from(nkw));
        for pair in flat.chunks_exact(2) {
            let Value::Str(key) = &pair[0] else {
                return Err(RunError::internal("keyword name is not a string"));
            };
            kwargs.push((key.clone(), pair[1].clone()));
        }
        let mut positional = state.pop_n(usize::from(npos)).ok_or_else(stack_underflow)?;
        let callee = state.pop().ok_or_else(stack_underflow)?;

        if let Some(star) = star {
            match &star {
                Value::Tuple(items) => positional.extend(items.iter().cloned()),
                Value::List(items) => positional.extend(items.read().iter().cloned()),
                other => {
                    let items = self.iterate(other).map_err(|err| {
                        if err.matches_type(ExcType::TypeError) {
                            ExcType::type_error(format!(
                                "{} argument after * must be a sequence, not {}",
                                describe_callable(&callee),
                                other.type_name()
                            ))
                        } else {
                            err
                        }
                    })?;
                    positional.extend(items);
                }
            }
        }
        if let Some(mapping) = kw_mapping {
            let Value::Dict(dict) = &mapping else {
                return Err(ExcType::type_error(format!(
                    "{} argument after ** must be a mapping, not {}",
                    describe_callable(&callee),
                    mapping.type_name()
                )));
            };
            let items = dict.read().items();
            for (key, value) in items {
                let Value::Str(key) = key else {
                    return Err(ExcType::type_error(format!(
                        "{} keywords must be strings",
                        describe_callable(&callee)
                    )));
                };
                if kwargs.iter().any(|(existing, _)| *existing == key) {
                    return Err(ExcType::type_error(format!(
                        "{} got multiple values for keyword argument '{key}'",
                        describe_callable(&callee)
                    )));
                }
                kwargs.push((key, value));
            }
        }
        Ok((callee, ArgValues::with_kwargs(positional, kwargs)))
    }

    /// Calls the special method `method` on `value` with positional arguments.
    ///
    /// Special methods are resolved on the class, never on the instance. Returns `Ok(None)`
    /// when the class does not define the method.
    pub fn call_special(&mut self, value: &Value, method: SpecialMethod, args: Vec<Value>) -> RunResult<Option<Value>> {
        self.call_special_args(value, method, ArgValues::new(args))
    }

    pub(crate) fn call_special_args(
        &mut self,
        value: &Value,
        method: SpecialMethod,
        args: ArgValues,
    ) -> RunResult<Option<Value>> {
        let class = value.class_of();
        let Some(attr) = class.slot(method) else {
            return Ok(None);
        };
        let result = match &attr {
            Value::Function(_) => self.call(&attr, args.prepend(value.clone()))?,
            Value::Builtin(builtin) if builtin.binds_self() => builtin.call(self, args.prepend(value.clone()))?,
            _ => {
                let bound = descriptor::descr_get(self, &attr, Some(value), &class)?;
                self.call(&bound, args)?
            }
        };
        Ok(Some(result))
    }

    /// `BUILD_CLASS`: picks the metaclass and calls it with `(name, bases, dict)`.
    ///
    /// The metaclass is `__metaclass__` from the class body, else the class of the first
    /// base, else the module's `__metaclass__`, else the classic class constructor.
    pub(super) fn build_class(&mut self, frame: &FrameRef, name: Value, bases: Value, dict: Value) -> RunResult<Value> {
        let (Value::Str(_), Value::Tuple(base_items), Value::Dict(namespace)) = (&name, &bases, &dict) else {
            return Err(RunError::internal("BUILD_CLASS expects a name, a tuple of bases and a dict"));
        };
        let module = frame.globals().read().get_str("__name__");
        if let Some(module) = module {
            let mut namespace = namespace.write();
            if !namespace.contains_str("__module__") {
                namespace.set_str("__module__", module);
            }
        }

        let declared = namespace.read().get_str("__metaclass__");
        let module_meta = frame.globals().read().get_str("__metaclass__");
        let meta = match (declared, base_items.first(), module_meta) {
            (Some(meta), _, _) => meta,
            (None, Some(first), _) => Value::Type(first.type_of()),
            (None, None, Some(meta)) => meta,
            (None, None, None) => Value::Type(builtin_types().classobj.clone()),
        };
        tracing::trace!(class = %name.str_builtin(), metaclass = %meta.repr_builtin(), "build class");
        self.call(&meta, ArgValues::new(vec![name, bases, dict]))
    }

    /// Reports a warning according to the configured policy.
    pub fn warn(&mut self, category: ExcType, message: &str) -> RunResult<()> {
        let policy = match category {
            ExcType::DeprecationWarning => self.config().deprecation_warnings,
            _ => WarningPolicy::Record,
        };
        match policy {
            WarningPolicy::Ignore => Ok(()),
            WarningPolicy::Record => {
                tracing::warn!(%category, text = message, "warning");
                self.warnings.push(category.new(message));
                Ok(())
            }
            WarningPolicy::Error => Err(category.error(message)),
        }
    }
}

fn check_init_result(result: &Value) -> RunResult<()> {
    if result.is_none() {
        Ok(())
    } else {
        Err(ExcType::type_error(format!(
            "__init__() should return None, not '{}'",
            result.type_name()
        )))
    }
}

/// `f()`, `C constructor` or `x object`, as call errors name the callee.
fn describe_callable(callee: &Value) -> String {
    match callee {
        Value::Function(f) => format!("{}()", f.name()),
        Value::BoundMethod(m) => format!("{}()", m.name()),
        Value::Builtin(b) => format!("{}()", b.name()),
        Value::Class(c) => format!("{} constructor", c.name()),
        Value::Type(t) => format!("{}()", t.name()),
        other => format!("{} object", other.type_name()),
    }
}
