//! Runtime object types.
//!
//! Containers, the two class lineages (classic classes and new-style types), the builtin
//! type registry and the iterator/generator objects that the interpreter loop drives.
pub mod builtin_types;
pub mod class;
pub mod class_like;
pub mod dict;
pub mod generator;
pub mod iter;
pub mod long_int;
pub mod mro;
mod native;
pub mod set;
pub mod slots;
pub mod r#type;
pub mod weakref;

use std::sync::Arc;

use parking_lot::RwLock;

pub use builtin_types::{BuiltinTypes, builtin_types};
pub use class::{ClassRef, ClassicClass, ClassicInstance, InstanceRef};
pub use class_like::ClassLike;
pub use dict::{Dict, DictRef};
pub use generator::{Generator, GeneratorRef, GeneratorState};
pub use iter::{IterRef, PyIterator};
pub use r#type::{ObjectRef, PyType, TypeFlags, TypeInstance, TypeRef};
pub use set::{Set, SetRef};
pub use slots::SpecialMethod;
pub use weakref::WeakRefObject;

/// Shared mutable list storage.
pub type ListRef = Arc<RwLock<Vec<crate::value::Value>>>;
