//! The universal runtime value.
//!
//! Every Python-visible object is a `Value`. Scalars are stored inline, everything with
//! identity lives behind an `Arc` so that clones share the object. Shared mutable state is
//! guarded by `parking_lot` locks, which makes `Value: Send + Sync` and lets one object graph
//! be used from several interpreter threads.

use std::{fmt, fmt::Write, sync::Arc};

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use parking_lot::RwLock;

use crate::{
    bytecode::Code,
    descriptor::{ClassMethod, NativeDescriptor, Property, StaticMethod, Super},
    exception::{ExceptionRef, Traceback},
    frame::{FrameRef, Why},
    function::{BoundMethod, BuiltinFunction, CellRef, Function},
    interop::ForeignRef,
    types::{
        ClassLike, ClassRef, DictRef, GeneratorRef, InstanceRef, IterRef, ListRef, ObjectRef, SetRef, TypeRef,
        WeakRefObject, builtin_types,
    },
};

/// Immutable shared string.
pub type Str = Arc<str>;

/// Nesting bound for the builtin repr (elided with `...` beyond it) and builtin equality
/// (deferred to the VM beyond it).
const MAX_NESTING: usize = 24;

#[derive(Clone)]
pub enum Value {
    None,
    NotImplemented,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range. Results that fit are normalized back to `Int`.
    Long(Arc<BigInt>),
    Float(f64),
    Str(Str),
    Bytes(Arc<[u8]>),
    Tuple(Arc<[Value]>),
    List(ListRef),
    Dict(DictRef),
    Set(SetRef),
    Function(Arc<Function>),
    BoundMethod(Arc<BoundMethod>),
    Builtin(Arc<BuiltinFunction>),
    StaticMethod(Arc<StaticMethod>),
    ClassMethod(Arc<ClassMethod>),
    Property(Arc<Property>),
    Descriptor(Arc<NativeDescriptor>),
    Super(Arc<Super>),
    /// Classic (old-style) class.
    Class(ClassRef),
    /// Instance of a classic class.
    Instance(InstanceRef),
    /// New-style type object.
    Type(TypeRef),
    /// Instance of a user-defined new-style type.
    Object(ObjectRef),
    Exception(ExceptionRef),
    Code(Arc<Code>),
    Frame(FrameRef),
    Traceback(Arc<Traceback>),
    Cell(CellRef),
    Generator(GeneratorRef),
    Iterator(IterRef),
    WeakRef(Arc<WeakRefObject>),
    /// Host object exposed through reflection.
    Foreign(ForeignRef),
    /// Unwinding marker pushed on the value stack while a `finally` block runs.
    #[doc(hidden)]
    Marker(Why),
}

impl Value {
    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }

    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(Arc::from(items))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::new(RwLock::new(items)))
    }

    /// Wraps a big integer, demoting to `Int` when it fits.
    #[must_use]
    pub fn from_bigint(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::Long(Arc::new(value)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The runtime type, as `type(x)` reports it.
    #[must_use]
    pub fn type_of(&self) -> TypeRef {
        let types = builtin_types();
        let t = match self {
            Self::None => &types.none,
            Self::NotImplemented => &types.not_implemented,
            Self::Bool(_) => &types.bool,
            Self::Int(_) => &types.int,
            Self::Long(_) => &types.long,
            Self::Float(_) => &types.float,
            Self::Str(_) => &types.str,
            Self::Bytes(_) => &types.bytes,
            Self::Tuple(_) => &types.tuple,
            Self::List(_) => &types.list,
            Self::Dict(_) => &types.dict,
            Self::Set(_) => &types.set,
            Self::Function(_) => &types.function,
            Self::BoundMethod(_) => &types.method,
            Self::Builtin(_) => &types.builtin_function,
            Self::StaticMethod(_) => &types.staticmethod,
            Self::ClassMethod(_) => &types.classmethod,
            Self::Property(_) => &types.property,
            Self::Descriptor(_) => &types.getset_descriptor,
            Self::Super(_) => &types.super_,
            Self::Class(_) => &types.classobj,
            Self::Instance(_) => &types.instance,
            Self::Type(t) => return t.metatype(),
            Self::Object(o) => return o.class().clone(),
            Self::Exception(e) => return e.class().clone(),
            Self::Code(_) => &types.code,
            Self::Frame(_) => &types.frame,
            Self::Traceback(_) => &types.traceback,
            Self::Cell(_) => &types.cell,
            Self::Generator(_) => &types.generator,
            Self::Iterator(_) => &types.iterator,
            Self::WeakRef(_) => &types.weakref,
            Self::Foreign(f) => return f.class().clone(),
            Self::Marker(_) => &types.object,
        };
        t.clone()
    }

    /// The class used for attribute lookup and `isinstance`: the classic class for classic
    /// instances, the runtime type otherwise.
    #[must_use]
    pub fn class_of(&self) -> ClassLike {
        match self {
            Self::Instance(inst) => ClassLike::Classic(inst.class()),
            other => ClassLike::Type(other.type_of()),
        }
    }

    /// Name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> Str {
        match self {
            Self::Instance(_) => Arc::from("instance"),
            other => other.type_of().name(),
        }
    }

    /// Address identifying the underlying object, zero for inline scalars.
    #[must_use]
    pub(crate) fn addr(&self) -> usize {
        fn ptr<T: ?Sized>(arc: &Arc<T>) -> usize {
            Arc::as_ptr(arc).cast::<()>() as usize
        }
        match self {
            Self::None | Self::NotImplemented | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Marker(_) => 0,
            Self::Long(v) => ptr(v),
            Self::Str(v) => ptr(v),
            Self::Bytes(v) => ptr(v),
            Self::Tuple(v) => ptr(v),
            Self::List(v) => ptr(v),
            Self::Dict(v) => ptr(v),
            Self::Set(v) => ptr(v),
            Self::Function(v) => ptr(v),
            Self::BoundMethod(v) => ptr(v),
            Self::Builtin(v) => ptr(v),
            Self::StaticMethod(v) => ptr(v),
            Self::ClassMethod(v) => ptr(v),
            Self::Property(v) => ptr(v),
            Self::Descriptor(v) => ptr(v),
            Self::Super(v) => ptr(v),
            Self::Class(v) => ptr(v),
            Self::Instance(v) => ptr(v),
            Self::Type(v) => ptr(v),
            Self::Object(v) => ptr(v),
            Self::Exception(v) => ptr(v),
            Self::Code(v) => ptr(v),
            Self::Frame(v) => ptr(v),
            Self::Traceback(v) => ptr(v),
            Self::Cell(v) => ptr(v),
            Self::Generator(v) => ptr(v),
            Self::Iterator(v) => ptr(v),
            Self::WeakRef(v) => ptr(v),
            Self::Foreign(v) => ptr(v),
        }
    }

    /// Identity comparison (`is`).
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::NotImplemented, Self::NotImplemented) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Marker(a), Self::Marker(b)) => a == b,
            _ => {
                std::mem::discriminant(self) == std::mem::discriminant(other)
                    && self.addr() != 0
                    && self.addr() == other.addr()
            }
        }
    }

    /// Truthiness for values that do not need user code; `None` means dispatch is required.
    #[must_use]
    pub fn truthy_builtin(&self) -> Option<bool> {
        Some(match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Long(big) => !big.is_zero(),
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::List(items) => !items.read().is_empty(),
            Self::Dict(dict) => !dict.read().is_empty(),
            Self::Set(set) => !set.read().is_empty(),
            Self::Instance(_) | Self::Object(_) | Self::Foreign(_) => return None,
            _ => true,
        })
    }

    /// Equality for values with structural semantics; `None` means user dispatch is required.
    ///
    /// Containers nested deeper than the builtin bound (including self-referencing ones) also
    /// give `None`, leaving the VM to compare them under its recursion limit.
    #[must_use]
    pub fn builtin_eq(&self, other: &Self) -> Option<bool> {
        self.eq_within(other, 0)
    }

    pub(crate) fn eq_within(&self, other: &Self, depth: usize) -> Option<bool> {
        if depth > MAX_NESTING {
            return None;
        }
        match (self, other) {
            (Self::Instance(_) | Self::Object(_) | Self::Foreign(_), _)
            | (_, Self::Instance(_) | Self::Object(_) | Self::Foreign(_)) => return None,
            _ => {}
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Some(a == b);
        }
        Some(match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => return seq_eq(a, b, depth + 1),
            (Self::List(a), Self::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Some(true);
                }
                let (a, b) = (a.read().clone(), b.read().clone());
                return seq_eq(&a, &b, depth + 1);
            }
            (Self::Dict(a), Self::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Some(true);
                }
                let (a, b) = (a.read().clone(), b.read().clone());
                return a.eq_within(&b, depth + 1);
            }
            (Self::Set(a), Self::Set(b)) => Arc::ptr_eq(a, b) || a.read().builtin_eq(&b.read()),
            _ => self.is(other),
        })
    }

    /// Numeric view used for cross-type comparison.
    pub(crate) fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::Long(big) => Some(Number::Big(big.clone())),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// `str(x)` for values that need no user code.
    #[must_use]
    pub fn str_builtin(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(exc) => exc.message(),
            other => other.repr_builtin(),
        }
    }

    /// `repr(x)` for values that need no user code.
    #[must_use]
    pub fn repr_builtin(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_NESTING {
            out.push_str("...");
            return;
        }
        let _ = match self {
            Self::None => write!(out, "None"),
            Self::NotImplemented => write!(out, "NotImplemented"),
            Self::Bool(true) => write!(out, "True"),
            Self::Bool(false) => write!(out, "False"),
            Self::Int(i) => write!(out, "{i}"),
            Self::Long(big) => write!(out, "{big}L"),
            Self::Float(f) => write!(out, "{}", float_repr(*f)),
            Self::Str(s) => write!(out, "{}", string_repr(s)),
            Self::Bytes(b) => write!(out, "b{}", string_repr(&String::from_utf8_lossy(b))),
            Self::Tuple(items) => {
                out.push('(');
                write_items(out, items, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                write!(out, ")")
            }
            Self::List(items) => {
                let items = items.read().clone();
                out.push('[');
                write_items(out, &items, depth);
                write!(out, "]")
            }
            Self::Dict(dict) => {
                let entries = dict.read().items();
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                write!(out, "}}")
            }
            Self::Set(set) => {
                let items = set.read().values();
                out.push_str("set([");
                write_items(out, &items, depth);
                write!(out, "])")
            }
            Self::Function(f) => write!(out, "<function {} at {:#x}>", f.name(), self.addr()),
            Self::BoundMethod(m) => write!(out, "<bound method {}>", m.name()),
            Self::Builtin(b) => write!(out, "<built-in function {}>", b.name()),
            Self::Type(t) if t.is_builtin() => write!(out, "<type '{}'>", t.name()),
            Self::Type(t) => write!(out, "<class '{}'>", t.name()),
            Self::Class(c) => write!(out, "<class {} at {:#x}>", c.name(), self.addr()),
            Self::Instance(inst) => write!(out, "<{} instance at {:#x}>", inst.class().name(), self.addr()),
            Self::Object(o) => write!(out, "<{} object at {:#x}>", o.class().name(), self.addr()),
            Self::Exception(exc) => {
                let args = exc.args();
                out.push_str(&exc.class().name());
                out.push('(');
                write_items(out, &args, depth);
                if args.len() == 1 {
                    out.push(',');
                }
                write!(out, ")")
            }
            Self::Code(code) => write!(out, "<code object {} at {:#x}>", code.name(), self.addr()),
            Self::Foreign(f) => write!(out, "<{} host object at {:#x}>", f.class().name(), self.addr()),
            Self::Marker(why) => write!(out, "<unwind {why:?}>"),
            other => write!(out, "<{} object at {:#x}>", other.type_name(), other.addr()),
        };
    }
}

fn write_items(out: &mut String, items: &[Value], depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1);
    }
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> Option<bool> {
    if a.len() != b.len() {
        return Some(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.eq_within(y, depth)? {
            return Some(false);
        }
    }
    Some(true)
}

/// Python 2 style float repr: integral values keep a trailing `.0`.
#[must_use]
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[must_use]
pub(crate) fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Numeric operand view shared by comparison and arithmetic.
#[derive(Debug, Clone)]
pub(crate) enum Number {
    Int(i64),
    Big(Arc<BigInt>),
    Float(f64),
}

impl Number {
    pub(crate) fn to_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Big(big) => big.to_f64().unwrap_or(f64::INFINITY),
            Self::Float(f) => *f,
        }
    }

    pub(crate) fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Big(big) => Some((**big).clone()),
            Self::Float(_) => None,
        }
    }

    pub(crate) fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(_), _) | (_, Self::Float(_)) => self.to_f64().partial_cmp(&other.to_f64()),
            _ => Some(self.to_bigint()?.cmp(&other.to_bigint()?)),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(std::cmp::Ordering::Equal)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.builtin_eq(other).unwrap_or_else(|| self.is(other))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr_builtin())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<TypeRef> for Value {
    fn from(t: TypeRef) -> Self {
        Self::Type(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_eq!(Value::from_bigint(BigInt::from(5)), Value::Int(5));
        assert_ne!(Value::Int(1), Value::str("1"));
    }

    #[test]
    fn repr_matches_python_two() {
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr_builtin(), "(1,)");
        assert_eq!(Value::Float(2.0).repr_builtin(), "2.0");
        assert_eq!(Value::str("it's").repr_builtin(), "\"it's\"");
        assert_eq!(
            Value::list(vec![Value::None, Value::Bool(false)]).repr_builtin(),
            "[None, False]"
        );
    }

    #[test]
    fn identity_is_pointer_based() {
        let a = Value::list(vec![]);
        let b = a.clone();
        assert!(a.is(&b));
        assert!(!a.is(&Value::list(vec![])));
        assert_eq!(a, Value::list(vec![]));
    }

    #[test]
    fn type_names() {
        assert_eq!(&*Value::Int(3).type_name(), "int");
        assert_eq!(&*Value::None.type_name(), "NoneType");
        assert_eq!(&*Value::tuple(vec![]).type_name(), "tuple");
    }
}
