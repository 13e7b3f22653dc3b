//! Exception representation, raising rules and tracebacks.
//!
//! A raised exception is the `(type, value, traceback)` triple carried by [`PyException`].
//! Internally raised errors start out unnormalized: the type is known but the value may be
//! a bare message or argument tuple. Normalization instantiates the class lazily, the first
//! time user code can observe the value (an `except` clause, `exc_info`, the public API).

use std::{
    borrow::Cow,
    fmt::{self, Display, Write},
    sync::Arc,
};

use parking_lot::RwLock;
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{
    args::ArgValues,
    bytecode::Vm,
    frame::FrameRef,
    types::{ClassLike, Dict, DictRef, TypeRef, builtin_types},
    value::{Str, Value},
};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Built-in exception classes.
///
/// Declaration order guarantees every class appears after its base, so the built-in type
/// table can be created by iterating the variants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, EnumCount,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    /// Thrown into a generator by `close()`.
    GeneratorExit,
    Exception,
    StopIteration,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    AssertionError,
    AttributeError,
    ImportError,
    LookupError,
    IndexError,
    KeyError,
    NameError,
    UnboundLocalError,
    RuntimeError,
    NotImplementedError,
    /// Raised when the frame depth exceeds the configured recursion limit.
    RecursionError,
    /// Interpreter invariant failures surfaced to user code.
    SystemError,
    TypeError,
    ValueError,
    /// Faults raised by host code invoked through the interop layer.
    InteropError,
    Warning,
    DeprecationWarning,
    RuntimeWarning,
    UserWarning,
}

impl ExcType {
    /// The direct base class, `None` only for `BaseException`.
    #[must_use]
    pub fn base(self) -> Option<Self> {
        Some(match self {
            Self::BaseException => return None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => Self::BaseException,
            Self::OverflowError | Self::ZeroDivisionError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::UnboundLocalError => Self::NameError,
            Self::NotImplementedError | Self::RecursionError => Self::RuntimeError,
            Self::DeprecationWarning | Self::RuntimeWarning | Self::UserWarning => Self::Warning,
            _ => Self::Exception,
        })
    }

    /// Returns true if `self` would be caught by `except handler:`.
    #[must_use]
    pub fn is_subclass_of(self, handler: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc) = current {
            if exc == handler {
                return true;
            }
            current = exc.base();
        }
        false
    }

    /// The built-in type object for this exception class.
    #[must_use]
    pub fn type_ref(self) -> TypeRef {
        builtin_types().exception(self)
    }

    /// Creates an unnormalized exception of this class carrying a message.
    #[must_use]
    pub fn new(self, msg: impl Display) -> PyException {
        PyException::new(
            Value::Type(self.type_ref()),
            Value::Str(msg.to_string().into()),
            None,
        )
    }

    /// Creates a runtime error of this class carrying a message.
    #[must_use]
    pub fn error(self, msg: impl Display) -> RunError {
        self.new(msg).into()
    }

    #[must_use]
    pub fn type_error(msg: impl Display) -> RunError {
        Self::TypeError.error(msg)
    }

    #[must_use]
    pub fn value_error(msg: impl Display) -> RunError {
        Self::ValueError.error(msg)
    }

    #[must_use]
    pub fn attribute_error(type_name: impl Display, attr: &str) -> RunError {
        Self::AttributeError.error(format!("'{type_name}' object has no attribute '{attr}'"))
    }

    #[must_use]
    pub fn type_error_not_callable(type_name: impl Display) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub fn type_error_not_iterable(type_name: impl Display) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    #[must_use]
    pub fn type_error_unhashable(type_name: impl Display) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    /// `name() takes no arguments (N given)` for zero-parameter callables.
    #[must_use]
    pub fn type_error_no_args(name: &str, actual: usize) -> RunError {
        Self::type_error(format!("{name}() takes no arguments ({actual} given)"))
    }

    /// Arity error for native callables with a fixed argument count.
    #[must_use]
    pub fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        Self::type_error(format!(
            "{name}() takes exactly {expected} {} ({actual} given)",
            plural_arguments(expected)
        ))
    }

    #[must_use]
    pub fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        Self::type_error(format!(
            "{name}() takes at least {min} {} ({actual} given)",
            plural_arguments(min)
        ))
    }

    #[must_use]
    pub fn type_error_at_most(name: &str, max: usize, actual: usize) -> RunError {
        Self::type_error(format!(
            "{name}() takes at most {max} {} ({actual} given)",
            plural_arguments(max)
        ))
    }

    #[must_use]
    pub fn key_error(key: &Value) -> RunError {
        PyException::new(
            Value::Type(Self::KeyError.type_ref()),
            Value::Tuple(Arc::from(vec![key.clone()])),
            None,
        )
        .into()
    }

    #[must_use]
    pub fn zero_division() -> RunError {
        Self::ZeroDivisionError.error("integer division or modulo by zero")
    }
}

pub(crate) fn plural_arguments(count: usize) -> &'static str {
    if count == 1 { "argument" } else { "arguments" }
}

/// Error returned by every fallible interpreter operation.
#[derive(Debug, Clone)]
pub enum RunError {
    /// Catchable Python exception.
    Exc(Box<PyException>),
    /// Interpreter bug, not caused by user code. Never caught by `except` clauses.
    Internal(Cow<'static, str>),
}

impl From<PyException> for RunError {
    fn from(exc: PyException) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Converts to the public exception form; internal errors become `SystemError`.
    #[must_use]
    pub fn into_exception(self) -> PyException {
        match self {
            Self::Exc(exc) => *exc,
            Self::Internal(msg) => ExcType::SystemError.new(format!("internal interpreter error: {msg}")),
        }
    }

    /// Returns true if this is an exception whose class derives from `exc_type`.
    #[must_use]
    pub fn matches_type(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(exc) => exc.is_instance_of(exc_type),
            Self::Internal(_) => false,
        }
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exc(exc) => Display::fmt(exc, f),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// Instance of a built-in exception class or of a user type derived from one.
#[derive(Debug)]
pub struct ExceptionObject {
    class: TypeRef,
    args: RwLock<Arc<[Value]>>,
    dict: DictRef,
}

pub type ExceptionRef = Arc<ExceptionObject>;

impl ExceptionObject {
    #[must_use]
    pub fn new(class: TypeRef, args: Vec<Value>) -> ExceptionRef {
        Arc::new(Self {
            class,
            args: RwLock::new(Arc::from(args)),
            dict: Dict::new_ref(),
        })
    }

    #[must_use]
    pub fn class(&self) -> &TypeRef {
        &self.class
    }

    #[must_use]
    pub fn args(&self) -> Arc<[Value]> {
        self.args.read().clone()
    }

    pub fn set_args(&self, args: Vec<Value>) {
        *self.args.write() = Arc::from(args);
    }

    #[must_use]
    pub fn dict(&self) -> &DictRef {
        &self.dict
    }

    /// `str(exc)`: empty for no args, the single arg's str, or the args tuple's repr.
    #[must_use]
    pub fn message(&self) -> String {
        let args = self.args();
        match &*args {
            [] => String::new(),
            [single] => single.str_builtin(),
            many => Value::Tuple(Arc::from(many.to_vec())).repr_builtin(),
        }
    }
}

/// One frame of a traceback chain.
///
/// The head of the chain is the outermost frame the exception passed through; `next` leads
/// toward the frame where it was raised.
#[derive(Debug)]
pub struct Traceback {
    frame: FrameRef,
    line: u32,
    lasti: usize,
    next: Option<Arc<Traceback>>,
}

impl Traceback {
    #[must_use]
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn lasti(&self) -> usize {
        self.lasti
    }

    #[must_use]
    pub fn next(&self) -> Option<&Arc<Self>> {
        self.next.as_ref()
    }

    /// Iterates entries from outermost to innermost.
    pub fn iter(self: &Arc<Self>) -> impl Iterator<Item = &Arc<Self>> {
        std::iter::successors(Some(self), |tb| tb.next.as_ref())
    }
}

/// A raised exception: class, value and traceback.
#[derive(Debug, Clone)]
pub struct PyException {
    typ: Value,
    value: Value,
    traceback: Option<Arc<Traceback>>,
    normalized: bool,
}

impl PyException {
    /// Builds an unnormalized triple without validating it.
    #[must_use]
    pub fn new(typ: Value, value: Value, traceback: Option<Arc<Traceback>>) -> Self {
        Self {
            typ,
            value,
            traceback,
            normalized: false,
        }
    }

    /// Wraps an already constructed exception instance.
    #[must_use]
    pub fn from_instance(instance: Value) -> Self {
        Self {
            typ: instance.class_of().to_value(),
            value: instance,
            traceback: None,
            normalized: true,
        }
    }

    /// `StopIteration` carrying a generator's return value.
    #[must_use]
    pub fn stop_iteration(value: Value) -> Self {
        let args = if matches!(value, Value::None) { vec![] } else { vec![value] };
        Self::from_instance(Value::Exception(ExceptionObject::new(
            ExcType::StopIteration.type_ref(),
            args,
        )))
    }

    #[must_use]
    pub fn typ(&self) -> &Value {
        &self.typ
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn traceback(&self) -> Option<&Arc<Traceback>> {
        self.traceback.as_ref()
    }

    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// The exception class, when the type slot holds one.
    #[must_use]
    pub fn exc_class(&self) -> Option<ClassLike> {
        ClassLike::from_value(&self.typ)
    }

    /// Returns true if the exception's class derives from the built-in `exc_type`.
    #[must_use]
    pub fn is_instance_of(&self, exc_type: ExcType) -> bool {
        self.exc_class()
            .is_some_and(|cls| cls.is_subclass(&ClassLike::Type(exc_type.type_ref())))
    }

    /// Records that the exception passed through `frame` at `line`.
    pub fn add_traceback(&mut self, frame: &FrameRef, line: u32, lasti: usize) {
        self.traceback = Some(Arc::new(Traceback {
            frame: frame.clone(),
            line,
            lasti,
            next: self.traceback.take(),
        }));
    }

    /// Handler matching for `except` clauses.
    ///
    /// `handler` may be a class or an arbitrarily nested tuple of classes.
    #[must_use]
    pub fn matches(&self, handler: &Value) -> bool {
        self.exc_class().is_some_and(|cls| class_matches(&cls, handler))
    }

    /// Instantiates the value if needed so that `value` is an instance of `typ`.
    ///
    /// Idempotent: once normalized the triple is left untouched. A value that is already an
    /// instance of the class is passed through; `None` means no arguments, a tuple is spread
    /// as the argument list and anything else becomes the single argument.
    pub fn normalize(&mut self, vm: &mut Vm) -> RunResult<()> {
        if self.normalized {
            return Ok(());
        }
        let Some(cls) = self.exc_class() else {
            self.normalized = true;
            return Ok(());
        };
        if !self.value.class_of().is_subclass(&cls) {
            let args = match &self.value {
                Value::None => Vec::new(),
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let instance = vm.call(&self.typ, ArgValues::new(args))?;
            if !instance.class_of().is_subclass(&cls) {
                return Err(ExcType::type_error(format!(
                    "calling {} should have returned an instance of BaseException, not {}",
                    cls.name(),
                    instance.type_name()
                )));
            }
            self.value = instance;
        }
        self.normalized = true;
        Ok(())
    }

    /// Builds the exception for a `raise` statement.
    ///
    /// `typ == None` re-raises the exception currently being handled. A tuple type is
    /// replaced by its first element, recursively. An instance type takes the value role
    /// and then must not be accompanied by a separate value.
    pub fn do_raise(vm: &mut Vm, typ: Value, value: Value, traceback: Value) -> RunResult<Self> {
        if matches!(typ, Value::None) {
            return vm
                .exc_info()
                .cloned()
                .ok_or_else(|| ExcType::value_error("no exception to reraise"));
        }
        let traceback = match traceback {
            Value::None => None,
            Value::Traceback(tb) => Some(tb),
            _ => return Err(ExcType::type_error("raise: arg 3 must be a traceback or None")),
        };

        let mut typ = typ;
        while let Value::Tuple(items) = &typ {
            match items.first() {
                Some(first) => typ = first.clone(),
                None => break,
            }
        }

        if is_exception_class(&typ) {
            let mut exc = Self::new(typ, value, traceback);
            exc.normalize(vm)?;
            Ok(exc)
        } else if is_exception_instance(&typ) {
            if !matches!(value, Value::None) {
                return Err(ExcType::type_error("instance exception may not have a separate value"));
            }
            let mut exc = Self::from_instance(typ);
            exc.traceback = traceback;
            Ok(exc)
        } else {
            Err(ExcType::type_error(format!(
                "exceptions must be old-style classes or derived from BaseException, not {}",
                typ.type_name()
            )))
        }
    }

    /// Human readable message without running user code.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.value {
            Value::None => String::new(),
            Value::Exception(exc) => exc.message(),
            Value::Str(s) => s.to_string(),
            Value::Tuple(items) if items.len() == 1 => items[0].str_builtin(),
            other => other.str_builtin(),
        }
    }

    /// Formats the traceback in the familiar "most recent call last" layout.
    #[must_use]
    pub fn format_traceback(&self) -> String {
        let mut out = String::new();
        if let Some(tb) = &self.traceback {
            out.push_str("Traceback (most recent call last):\n");
            for entry in tb.iter() {
                let code = entry.frame.code();
                let _ = writeln!(
                    out,
                    "  File \"{}\", line {}, in {}",
                    code.filename(),
                    entry.line,
                    code.name()
                );
            }
        }
        let _ = write!(out, "{self}");
        out
    }
}

impl Display for PyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: Str = self
            .exc_class()
            .map_or_else(|| self.typ.type_name(), |cls| cls.name());
        let message = self.message();
        if message.is_empty() {
            write!(f, "{name}")
        } else {
            write!(f, "{name}: {message}")
        }
    }
}

pub(crate) fn class_matches(cls: &ClassLike, handler: &Value) -> bool {
    match handler {
        Value::Tuple(items) => items.iter().any(|item| class_matches(cls, item)),
        other => ClassLike::from_value(other).is_some_and(|handler| cls.is_subclass(&handler)),
    }
}

/// Classic classes and types deriving from `BaseException` may be raised.
pub(crate) fn is_exception_class(value: &Value) -> bool {
    match value {
        Value::Class(_) => true,
        Value::Type(t) => t.exc_type().is_some(),
        _ => false,
    }
}

pub(crate) fn is_exception_instance(value: &Value) -> bool {
    matches!(value, Value::Exception(_) | Value::Instance(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_follows_bases() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::UnboundLocalError.is_subclass_of(ExcType::NameError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::GeneratorExit.is_subclass_of(ExcType::Exception));
        assert!(ExcType::DeprecationWarning.is_subclass_of(ExcType::Exception));
    }

    #[test]
    fn unnormalized_message_display() {
        let exc = ExcType::TypeError.new("bad operand");
        assert!(!exc.is_normalized());
        assert_eq!(exc.to_string(), "TypeError: bad operand");
        assert!(exc.is_instance_of(ExcType::Exception));
        assert!(!exc.is_instance_of(ExcType::ValueError));
    }

    #[test]
    fn tuple_handlers_match_recursively() {
        let exc = ExcType::KeyError.new("k");
        let handler = Value::Tuple(Arc::from(vec![
            Value::Type(ExcType::ValueError.type_ref()),
            Value::Tuple(Arc::from(vec![Value::Type(ExcType::LookupError.type_ref())])),
        ]));
        assert!(exc.matches(&handler));
        assert!(!exc.matches(&Value::Type(ExcType::ValueError.type_ref())));
    }

    #[test]
    fn stop_iteration_is_normalized_with_value() {
        let exc = PyException::stop_iteration(Value::Int(3));
        assert!(exc.is_normalized());
        let Value::Exception(obj) = exc.value() else {
            panic!("expected exception instance");
        };
        assert_eq!(&*obj.args(), &[Value::Int(3)]);
    }
}
