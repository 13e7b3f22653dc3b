//! Opcode definitions.
//!
//! Each instruction is one opcode byte followed by an operand whose width depends on the
//! opcode: none, a `u8`, a little-endian `u16`, or a little-endian `i16` jump offset measured
//! from the end of the instruction.

use strum::{Display, FromRepr, IntoStaticStr};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
pub enum Opcode {
    // === stack manipulation ===
    Nop,
    PopTop,
    /// Swaps TOS and TOS1.
    RotTwo,
    /// Lifts TOS1 and TOS2 one position up, moving TOS down to position three.
    RotThree,
    DupTop,

    // === constants and names (u16 operand) ===
    LoadConst,
    LoadNone,
    /// Unoptimized name lookup: locals dict, globals, builtins.
    LoadName,
    StoreName,
    DeleteName,
    /// Globals then builtins.
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    /// Fast local by slot index.
    LoadFast,
    StoreFast,
    DeleteFast,
    /// Cell contents; the operand indexes cellvars followed by freevars.
    LoadDeref,
    StoreDeref,
    /// Pushes the cell object itself, for building closures.
    LoadClosure,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    /// Pushes the frame's locals dict (class bodies).
    LoadLocals,

    // === operators ===
    UnaryNot,
    UnaryNegative,
    UnaryPositive,
    BinaryAdd,
    BinarySubtract,
    BinaryMultiply,
    /// Classic division: floor for integers, true division for floats.
    BinaryDivide,
    BinaryTrueDivide,
    BinaryFloorDivide,
    BinaryModulo,
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,
    /// u8 operand: a `CmpOp`.
    CompareOp,

    // === containers (u16 operand: item count) ===
    BuildTuple,
    BuildList,
    /// Pops `2 * n` values pushed as key, value pairs.
    BuildMap,
    UnpackSequence,

    // === functions and classes ===
    /// u16 operand: number of default values below the code object.
    MakeFunction,
    /// Like `MakeFunction` with a tuple of cells between the code and the defaults.
    MakeClosure,
    /// u16 operand: low byte positional count, high byte keyword pair count.
    CallFunction,
    /// `CallFunction` followed by a `*args` iterable.
    CallFunctionVar,
    /// `CallFunction` followed by a `**kwargs` mapping.
    CallFunctionKw,
    /// `CallFunction` followed by `*args` and `**kwargs`.
    CallFunctionVarKw,
    /// Pops the methods dict, bases tuple and name, pushes the new class.
    BuildClass,
    ReturnValue,
    YieldValue,

    // === control flow (i16 relative operand) ===
    Jump,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    /// Pushes the next item, or pops the iterator and jumps when exhausted.
    ForIter,
    GetIter,

    // === blocks ===
    SetupLoop,
    SetupExcept,
    SetupFinally,
    PopBlock,
    BreakLoop,
    /// i16 operand: jump target of the enclosing loop's continue point.
    ContinueLoop,
    /// Finishes a `finally` or unmatched `except` clause, resuming any pending unwind.
    EndFinally,
    /// u8 operand: number of raise arguments (0 to 3).
    RaiseVarargs,
}

/// Operand encoding of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    U8,
    U16,
    Jump,
}

impl Opcode {
    #[must_use]
    pub fn operand(self) -> Operand {
        match self {
            Self::LoadConst
            | Self::LoadName
            | Self::StoreName
            | Self::DeleteName
            | Self::LoadGlobal
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadFast
            | Self::StoreFast
            | Self::DeleteFast
            | Self::LoadDeref
            | Self::StoreDeref
            | Self::LoadClosure
            | Self::LoadAttr
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::BuildTuple
            | Self::BuildList
            | Self::BuildMap
            | Self::UnpackSequence
            | Self::MakeFunction
            | Self::MakeClosure
            | Self::CallFunction
            | Self::CallFunctionVar
            | Self::CallFunctionKw
            | Self::CallFunctionVarKw => Operand::U16,
            Self::CompareOp | Self::RaiseVarargs => Operand::U8,
            Self::Jump
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::ForIter
            | Self::SetupLoop
            | Self::SetupExcept
            | Self::SetupFinally
            | Self::ContinueLoop => Operand::Jump,
            _ => Operand::None,
        }
    }

    /// Encoded instruction length in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self.operand() {
            Operand::None => 1,
            Operand::U8 => 2,
            Operand::U16 | Operand::Jump => 3,
        }
    }
}

/// Comparison selector for `CompareOp`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    /// Exception class match used by `except` clauses.
    ExcMatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_bytes() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_repr(Opcode::RaiseVarargs as u8), Some(Opcode::RaiseVarargs));
    }

    #[test]
    fn sizes_follow_operands() {
        assert_eq!(Opcode::PopTop.size(), 1);
        assert_eq!(Opcode::CompareOp.size(), 2);
        assert_eq!(Opcode::LoadFast.size(), 3);
        assert_eq!(Opcode::SetupExcept.size(), 3);
    }
}
