//! Builder for assembling code objects.
//!
//! `CodeBuilder` encodes opcodes and operands, patches forward jumps and records the line
//! table. It is the programmatic front end for embedders and tests; there is no source
//! compiler in this crate.

use std::sync::Arc;

use super::{
    code::{Code, CodeFlags, Constant, LineEntry},
    op::{CmpOp, Opcode, Operand},
};

/// Builder for emitting bytecode.
///
/// Parameters are fixed at construction and occupy the first local slots, followed by the
/// `*args` and `**kwargs` slots, so `with_varargs`/`with_varkwargs` must be called before any
/// other local is registered.
///
/// # Usage
///
/// ```ignore
/// let mut b = CodeBuilder::function("f", &["x"]);
/// let x = b.local("x");
/// b.emit_u16(Opcode::LoadFast, x);
/// let skip = b.emit_jump(Opcode::PopJumpIfFalse);
/// b.load_const(1);
/// b.emit(Opcode::ReturnValue);
/// b.patch_jump(skip);
/// b.load_const(0);
/// b.emit(Opcode::ReturnValue);
/// let code = b.build();
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
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
    current_line: Option<u32>,
    recorded_line: Option<u32>,
}

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "forward jumps must be patched"]
pub struct JumpLabel(usize);

impl CodeBuilder {
    fn with_flags(name: &str, flags: CodeFlags) -> Self {
        Self {
            name: name.to_owned(),
            filename: "<pyrite>".to_owned(),
            first_line: 1,
            doc: None,
            argcount: 0,
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            names: Vec::new(),
            consts: Vec::new(),
            flags,
            bytecode: Vec::new(),
            lines: Vec::new(),
            current_line: None,
            recorded_line: None,
        }
    }

    /// Code for a function whose locals live in fast slots.
    #[must_use]
    pub fn function(name: &str, params: &[&str]) -> Self {
        let mut builder = Self::with_flags(name, CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        builder.varnames = params.iter().map(|p| (*p).to_owned()).collect();
        builder.argcount = params.len();
        builder
    }

    /// Module-level code: names resolve through the globals dict.
    #[must_use]
    pub fn module(name: &str) -> Self {
        Self::with_flags(name, CodeFlags::empty())
    }

    /// Class body code: runs with a fresh locals dict that becomes the class namespace.
    #[must_use]
    pub fn class_body(name: &str) -> Self {
        Self::with_flags(name, CodeFlags::NEWLOCALS)
    }

    /// Adds a `*args` parameter.
    ///
    /// # Panics
    ///
    /// Panics if locals beyond the parameters were already registered.
    #[must_use]
    pub fn with_varargs(mut self, name: &str) -> Self {
        assert!(
            !self.has_extra_locals(),
            "varargs must be declared before other locals"
        );
        self.varnames.push(name.to_owned());
        self.flags |= CodeFlags::VARARGS;
        self
    }

    /// Adds a `**kwargs` parameter.
    ///
    /// # Panics
    ///
    /// Panics if locals beyond the parameters were already registered.
    #[must_use]
    pub fn with_varkwargs(mut self, name: &str) -> Self {
        assert!(
            !self.has_extra_locals(),
            "varkwargs must be declared before other locals"
        );
        self.varnames.push(name.to_owned());
        self.flags |= CodeFlags::VARKEYWORDS;
        self
    }

    #[must_use]
    pub fn generator(mut self) -> Self {
        self.flags |= CodeFlags::GENERATOR;
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = filename.to_owned();
        self
    }

    #[must_use]
    pub fn with_first_line(mut self, line: u32) -> Self {
        self.first_line = line;
        self
    }

    #[must_use]
    pub fn with_doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_owned());
        self
    }

    fn has_extra_locals(&self) -> bool {
        let mut fixed = self.argcount;
        if self.flags.contains(CodeFlags::VARARGS) {
            fixed += 1;
        }
        if self.flags.contains(CodeFlags::VARKEYWORDS) {
            fixed += 1;
        }
        self.varnames.len() > fixed
    }

    /// Returns the fast slot of a local, registering it on first use.
    pub fn local(&mut self, name: &str) -> u16 {
        intern(&mut self.varnames, name)
    }

    /// Returns the index of a name used by attribute and global opcodes.
    pub fn name(&mut self, name: &str) -> u16 {
        intern(&mut self.names, name)
    }

    /// Declares a variable captured by nested functions and returns its cell index.
    pub fn cellvar(&mut self, name: &str) -> u16 {
        assert!(self.freevars.is_empty(), "cellvars must be declared before freevars");
        intern(&mut self.cellvars, name)
    }

    /// Declares a variable captured from an enclosing scope and returns its cell index.
    ///
    /// Cell indexes continue after the cellvars.
    pub fn freevar(&mut self, name: &str) -> u16 {
        let index = usize::from(intern(&mut self.freevars, name)) + self.cellvars.len();
        u16::try_from(index).expect("too many cell variables")
    }

    /// Adds a constant to the pool and returns its index.
    pub fn constant(&mut self, value: impl Into<Constant>) -> u16 {
        self.consts.push(value.into());
        u16::try_from(self.consts.len() - 1).expect("constant pool exceeds u16")
    }

    /// Sets the source line for subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = Some(line);
    }

    fn start_instruction(&mut self) {
        if let Some(line) = self.current_line
            && self.recorded_line != Some(line)
        {
            let offset = u32::try_from(self.bytecode.len()).expect("bytecode exceeds u32");
            self.lines.push(LineEntry { offset, line });
            self.recorded_line = Some(line);
        }
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.operand(), Operand::None, "{op} takes an operand");
        self.start_instruction();
        self.bytecode.push(op as u8);
    }

    /// Emits an instruction with a u8 operand.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        debug_assert_eq!(op.operand(), Operand::U8, "{op} does not take a u8 operand");
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
    }

    /// Emits an instruction with a u16 operand.
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        debug_assert_eq!(op.operand(), Operand::U16, "{op} does not take a u16 operand");
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emits a forward jump, returning a label to patch once the target is known.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert_eq!(op.operand(), Operand::Jump, "{op} is not a jump");
        self.start_instruction();
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0_i16.to_le_bytes());
        label
    }

    /// Points a forward jump at the current offset.
    ///
    /// # Panics
    ///
    /// Panics if the distance does not fit in an `i16`.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let offset = relative_offset(label.0, self.bytecode.len());
        self.bytecode[label.0 + 1..label.0 + 3].copy_from_slice(&offset.to_le_bytes());
    }

    /// Emits a jump to a known (usually earlier) offset.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        debug_assert_eq!(op.operand(), Operand::Jump, "{op} is not a jump");
        self.start_instruction();
        let offset = relative_offset(self.bytecode.len(), target);
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
    }

    /// Returns the current bytecode offset, used as a backward jump target.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    pub fn load_const(&mut self, value: impl Into<Constant>) {
        let index = self.constant(value);
        self.emit_u16(Opcode::LoadConst, index);
    }

    pub fn load_fast(&mut self, name: &str) {
        let slot = self.local(name);
        self.emit_u16(Opcode::LoadFast, slot);
    }

    pub fn store_fast(&mut self, name: &str) {
        let slot = self.local(name);
        self.emit_u16(Opcode::StoreFast, slot);
    }

    pub fn load_name(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_u16(Opcode::LoadName, index);
    }

    pub fn store_name(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_u16(Opcode::StoreName, index);
    }

    pub fn load_global(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_u16(Opcode::LoadGlobal, index);
    }

    pub fn load_attr(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_u16(Opcode::LoadAttr, index);
    }

    pub fn store_attr(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_u16(Opcode::StoreAttr, index);
    }

    pub fn compare(&mut self, op: CmpOp) {
        self.emit_u8(Opcode::CompareOp, op as u8);
    }

    /// Emits `CallFunction` for `positional` arguments and `keywords` name/value pairs.
    pub fn call(&mut self, positional: u8, keywords: u8) {
        self.emit_u16(Opcode::CallFunction, u16::from_le_bytes([positional, keywords]));
    }

    /// Finishes the code object.
    #[must_use]
    pub fn build(mut self) -> Arc<Code> {
        if !self.freevars.is_empty() {
            self.flags |= CodeFlags::NESTED;
        }
        Arc::new(Code::new(
            self.name,
            self.filename,
            self.first_line,
            self.doc,
            self.argcount,
            self.varnames,
            self.cellvars,
            self.freevars,
            self.names,
            self.consts,
            self.flags,
            self.bytecode,
            self.lines,
        ))
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u16 {
    let index = match table.iter().position(|n| n == name) {
        Some(index) => index,
        None => {
            table.push(name.to_owned());
            table.len() - 1
        }
    };
    u16::try_from(index).expect("name table exceeds u16")
}

/// Offset from the end of the 3-byte jump at `at` to `target`.
fn relative_offset(at: usize, target: usize) -> i16 {
    let at = i64::try_from(at).expect("bytecode offset exceeds i64");
    let target = i64::try_from(target).expect("bytecode target exceeds i64");
    i16::try_from(target - at - 3).expect("jump offset exceeds i16 range; code object too large")
}
