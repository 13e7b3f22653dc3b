//! The host bridge.
//!
//! Host classes describe themselves through [`HostClass`]: a name, a list of methods, fields
//! and constructors, each working on [`HostValue`]s. [`reflect::register_host_class`] turns a
//! description into a [`PyType`](crate::types::PyType) once per description, and host objects
//! cross into the interpreter as [`ForeignObject`] values of that type.
//!
//! Conversions are explicit in both directions: [`convert::wrap`] is total, while
//! [`convert::adapt`] either produces the requested [`HostKind`] or a [`ConversionError`].

mod convert;
mod reflect;

use std::{any::Any, fmt, sync::Arc};

use strum::{Display, IntoStaticStr};

pub use convert::{adapt, unwrap, wrap};
pub use reflect::{reflect_type, register_host_class, registered_class};

use crate::{aux_attrs::AuxAttrs, exception::PyException, types::TypeRef};

/// Opaque host object state.
pub type HostHandle = Arc<dyn Any + Send + Sync>;

/// Host-side method body. The receiver is `None` for static methods.
pub type HostFn = Arc<dyn Fn(Option<&HostHandle>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync>;

pub type HostCtor = Arc<dyn Fn(&[HostValue]) -> Result<HostHandle, HostError> + Send + Sync>;
pub type HostFieldGet = Arc<dyn Fn(&HostHandle) -> HostValue + Send + Sync>;
pub type HostFieldSet = Arc<dyn Fn(&HostHandle, HostValue) -> Result<(), HostError> + Send + Sync>;

/// The kinds of value a host signature can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum HostKind {
    /// `void` on returns, `null` on arguments.
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Object,
    /// Accepts whatever converts naturally.
    Any,
}

/// A value on the host side of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<HostValue>),
    Object(HostObject),
}

impl HostValue {
    #[must_use]
    pub fn kind(&self) -> HostKind {
        match self {
            Self::None => HostKind::None,
            Self::Bool(_) => HostKind::Bool,
            Self::Int(_) => HostKind::Int,
            Self::Float(_) => HostKind::Float,
            Self::Str(_) => HostKind::Str,
            Self::Bytes(_) => HostKind::Bytes,
            Self::List(_) => HostKind::List,
            Self::Object(_) => HostKind::Object,
        }
    }
}

/// A host object together with the class describing it.
#[derive(Clone)]
pub struct HostObject {
    class: Arc<dyn HostClass>,
    handle: HostHandle,
}

impl HostObject {
    #[must_use]
    pub fn new(class: Arc<dyn HostClass>, handle: HostHandle) -> Self {
        Self { class, handle }
    }

    #[must_use]
    pub fn class(&self) -> &Arc<dyn HostClass> {
        &self.class
    }

    #[must_use]
    pub fn handle(&self) -> &HostHandle {
        &self.handle
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref()
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} host object>", self.class.name())
    }
}

/// Failure reported by host code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("host code panicked: {0}")]
    Panicked(String),
    /// An exception from re-entering the interpreter, passed through unchanged.
    #[error("{0}")]
    Raised(PyException),
}

impl From<PyException> for HostError {
    fn from(exc: PyException) -> Self {
        Self::Raised(exc)
    }
}

/// A value that cannot be adapted to the requested host kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("expected {expected}, got '{found}'")]
    Mismatch { expected: HostKind, found: String },
    #[error("value out of range for {0}")]
    Overflow(HostKind),
    #[error("'{0}' objects cannot cross into host code")]
    Unsupported(String),
    #[error("cannot convert a list that contains itself")]
    Cyclic,
}

pub struct HostMethod {
    pub name: String,
    pub params: Vec<HostKind>,
    pub returns: HostKind,
    pub is_static: bool,
    pub invoke: HostFn,
}

impl HostMethod {
    #[must_use]
    pub fn new(
        name: &str,
        params: Vec<HostKind>,
        returns: HostKind,
        invoke: impl Fn(Option<&HostHandle>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_owned(),
            params,
            returns,
            is_static: false,
            invoke: Arc::new(invoke),
        }
    }

    #[must_use]
    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

pub struct HostField {
    pub name: String,
    pub kind: HostKind,
    pub get: HostFieldGet,
    /// `None` for final fields.
    pub set: Option<HostFieldSet>,
}

pub struct HostConstructor {
    pub params: Vec<HostKind>,
    pub invoke: HostCtor,
}

/// Reflective description of a host class.
pub trait HostClass: Send + Sync {
    fn name(&self) -> &str;

    fn methods(&self) -> Vec<HostMethod>;

    fn fields(&self) -> Vec<HostField> {
        Vec::new()
    }

    /// Overloads are told apart by arity, then by which signature the arguments adapt to.
    fn constructors(&self) -> Vec<HostConstructor> {
        Vec::new()
    }
}

/// A [`HostClass`] assembled from closures.
#[derive(Default)]
pub struct HostClassDef {
    name: String,
    methods: Vec<(String, Vec<HostKind>, HostKind, bool, HostFn)>,
    fields: Vec<(String, HostKind, HostFieldGet, Option<HostFieldSet>)>,
    constructors: Vec<(Vec<HostKind>, HostCtor)>,
}

impl HostClassDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn method(
        mut self,
        name: &str,
        params: Vec<HostKind>,
        returns: HostKind,
        invoke: impl Fn(Option<&HostHandle>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) -> Self {
        self.methods
            .push((name.to_owned(), params, returns, false, Arc::new(invoke)));
        self
    }

    #[must_use]
    pub fn static_method(
        mut self,
        name: &str,
        params: Vec<HostKind>,
        returns: HostKind,
        invoke: impl Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) -> Self {
        let invoke: HostFn = Arc::new(move |_: Option<&HostHandle>, args: &[HostValue]| invoke(args));
        self.methods.push((name.to_owned(), params, returns, true, invoke));
        self
    }

    #[must_use]
    pub fn field(
        mut self,
        name: &str,
        kind: HostKind,
        get: impl Fn(&HostHandle) -> HostValue + Send + Sync + 'static,
        set: Option<HostFieldSet>,
    ) -> Self {
        self.fields.push((name.to_owned(), kind, Arc::new(get), set));
        self
    }

    #[must_use]
    pub fn constructor(
        mut self,
        params: Vec<HostKind>,
        invoke: impl Fn(&[HostValue]) -> Result<HostHandle, HostError> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push((params, Arc::new(invoke)));
        self
    }
}

impl HostClass for HostClassDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> Vec<HostMethod> {
        self.methods
            .iter()
            .map(|(name, params, returns, is_static, invoke)| HostMethod {
                name: name.clone(),
                params: params.clone(),
                returns: *returns,
                is_static: *is_static,
                invoke: invoke.clone(),
            })
            .collect()
    }

    fn fields(&self) -> Vec<HostField> {
        self.fields
            .iter()
            .map(|(name, kind, get, set)| HostField {
                name: name.clone(),
                kind: *kind,
                get: get.clone(),
                set: set.clone(),
            })
            .collect()
    }

    fn constructors(&self) -> Vec<HostConstructor> {
        self.constructors
            .iter()
            .map(|(params, invoke)| HostConstructor {
                params: params.clone(),
                invoke: invoke.clone(),
            })
            .collect()
    }
}

/// A host object living inside the interpreter.
pub struct ForeignObject {
    class: TypeRef,
    host: HostObject,
    aux: AuxAttrs,
}

pub type ForeignRef = Arc<ForeignObject>;

impl ForeignObject {
    #[must_use]
    pub fn new(class: TypeRef, host: HostObject) -> ForeignRef {
        Arc::new(Self {
            class,
            host,
            aux: AuxAttrs::new(),
        })
    }

    /// The reflected type.
    #[must_use]
    pub fn class(&self) -> &TypeRef {
        &self.class
    }

    #[must_use]
    pub fn host(&self) -> &HostObject {
        &self.host
    }

    #[must_use]
    pub fn aux(&self) -> &AuxAttrs {
        &self.aux
    }
}

impl fmt::Debug for ForeignObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObject")
            .field("class", &self.class.name())
            .finish_non_exhaustive()
    }
}
