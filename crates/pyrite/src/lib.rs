//! An embeddable Python 2 era object model and bytecode interpreter core.
//!
//! The crate executes code objects produced by an external compiler (or assembled with
//! [`CodeBuilder`]) against a runtime that keeps both class systems of the era: classic
//! classes with depth-first attribute lookup and new-style types with C3 linearization,
//! descriptors and metaclasses. Host objects join the object model through the
//! [`interop`] bridge.
//!
//! ```no_run
//! use pyrite::{CodeBuilder, Interpreter, Opcode, Value};
//!
//! let interp = Interpreter::default();
//! let mut code = CodeBuilder::module("<demo>");
//! code.load_const(42_i64);
//! code.emit(Opcode::ReturnValue);
//! let globals = interp.new_globals("__main__");
//! let result = interp.run(code.build(), &globals);
//! assert_eq!(result.ok(), Some(Value::Int(42)));
//! ```

pub mod args;
pub mod aux_attrs;
pub mod builtins;
pub mod bytecode;
pub mod config;
pub mod descriptor;
pub mod exception;
pub mod frame;
pub mod function;
pub mod interop;
pub mod interpreter;
pub mod py_hash;
pub mod signature;
pub mod tracer;
pub mod types;
pub mod value;

pub use crate::{
    args::ArgValues,
    bytecode::{Code, CodeBuilder, Opcode, Vm},
    config::{ConfigError, InterpreterConfig, WarningPolicy},
    exception::{ExcType, PyException, RunError, RunResult},
    interop::{HostClass, HostClassDef, HostKind, HostValue},
    interpreter::Interpreter,
    tracer::{LogTracer, RecordingTracer, TraceEvent, TraceHook},
    types::{ClassLike, builtin_types},
    value::Value,
};
