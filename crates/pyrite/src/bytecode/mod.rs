//! Bytecode: code objects, the instruction set, the assembler and the interpreter loop.

pub mod builder;
pub mod code;
pub mod op;
pub mod vm;

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, CodeFlags, Constant, LineEntry};
pub use op::{CmpOp, Opcode, Operand};
pub use vm::{FrameExit, Resume, Vm};
