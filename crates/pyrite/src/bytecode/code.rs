//! Code objects: immutable compiled bytecode plus the metadata needed to run it.

use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::value::{Str, Value};

bitflags! {
    /// Code object flags, numbered as in CPython 2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CodeFlags: u32 {
        /// Locals live in fast slots instead of a dict.
        const OPTIMIZED = 0x01;
        /// A fresh locals dict is created for every frame.
        const NEWLOCALS = 0x02;
        const VARARGS = 0x04;
        const VARKEYWORDS = 0x08;
        const NESTED = 0x10;
        /// Calling the function returns a generator instead of running it.
        const GENERATOR = 0x20;
    }
}

/// Compile-time constant stored in a code object's constant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Long(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Constant>),
    Code(Arc<Code>),
}

impl Constant {
    fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Long(big) => Value::from_bigint(big.clone()),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::str(s),
            Self::Bytes(b) => Value::Bytes(Arc::from(b.as_slice())),
            Self::Tuple(items) => Value::tuple(items.iter().map(Self::to_value).collect()),
            Self::Code(code) => Value::Code(code.clone()),
        }
    }
}

impl From<i64> for Constant {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<Arc<Code>> for Constant {
    fn from(code: Arc<Code>) -> Self {
        Self::Code(code)
    }
}

/// Maps a bytecode offset to the source line that starts there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// Compiled code for a function, class body or module.
///
/// Code objects are immutable and shared by every function and frame created from them.
/// Constant values and name strings are materialized lazily on first use.
#[derive(Debug, Serialize, Deserialize)]
pub struct Code {
    pub(crate) name: String,
    pub(crate) filename: String,
    pub(crate) first_line: u32,
    pub(crate) doc: Option<String>,
    /// Number of named positional parameters.
    pub(crate) argcount: usize,
    /// Parameters, then `*args`/`**kwargs` names, then other locals.
    pub(crate) varnames: Vec<String>,
    pub(crate) cellvars: Vec<String>,
    pub(crate) freevars: Vec<String>,
    /// Attribute and global names referenced by operand index.
    pub(crate) names: Vec<String>,
    pub(crate) consts: Vec<Constant>,
    pub(crate) flags: CodeFlags,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) lines: Vec<LineEntry>,
    #[serde(skip)]
    const_values: OnceLock<Box<[Value]>>,
    #[serde(skip)]
    name_values: OnceLock<Box<[Str]>>,
}

impl Code {
    #[expect(clippy::too_many_arguments, reason = "constructed only by CodeBuilder")]
    pub(crate) fn new(
        name: String,
        filename: String,
        first_line: u32,
        doc: Option<String>,
        argcount: usize,
        varnames: Vec<String>,
        cellvars: Vec<String>,
        freevars: Vec<String>,
        names: Vec<String>,
        consts: Vec<Constant>,
        flags: CodeFlags,
        bytecode: Vec<u8>,
        lines: Vec<LineEntry>,
    ) -> Self {
        Self {
            name,
            filename,
            first_line,
            doc,
            argcount,
            varnames,
            cellvars,
            freevars,
            names,
            consts,
            flags,
            bytecode,
            lines,
            const_values: OnceLock::new(),
            name_values: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    #[must_use]
    pub fn docstring(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    #[must_use]
    pub fn argcount(&self) -> usize {
        self.argcount
    }

    #[must_use]
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    #[must_use]
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    #[must_use]
    pub fn freevars(&self) -> &[String] {
        &self.freevars
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn has_varargs(&self) -> bool {
        self.flags.contains(CodeFlags::VARARGS)
    }

    #[must_use]
    pub fn has_varkwargs(&self) -> bool {
        self.flags.contains(CodeFlags::VARKEYWORDS)
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Frames of optimized code keep locals in fast slots.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.flags.contains(CodeFlags::OPTIMIZED)
    }

    /// Constant `index` as a runtime value.
    #[must_use]
    pub fn constant(&self, index: usize) -> Option<Value> {
        self.const_values
            .get_or_init(|| self.consts.iter().map(Constant::to_value).collect())
            .get(index)
            .cloned()
    }

    #[must_use]
    pub fn name_at(&self, index: usize) -> Option<Str> {
        self.name_values
            .get_or_init(|| self.names.iter().map(|n| Str::from(n.as_str())).collect())
            .get(index)
            .cloned()
    }

    /// The source line of the instruction at `offset`.
    #[must_use]
    pub fn line_for(&self, offset: usize) -> u32 {
        let idx = self.lines.partition_point(|entry| entry.offset as usize <= offset);
        match idx {
            0 => self.first_line,
            n => self.lines[n - 1].line,
        }
    }

    /// Encodes the code object with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decodes a code object produced by [`Code::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
