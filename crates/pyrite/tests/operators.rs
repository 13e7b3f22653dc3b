//! Sequence repetition and comparison of self-referencing containers.

use pretty_assertions::{assert_eq, assert_ne};
use pyrite::{CodeBuilder, Interpreter, InterpreterConfig, Opcode, PyException, Value, bytecode::CmpOp};

fn run(m: CodeBuilder) -> Result<Value, PyException> {
    let interp = Interpreter::default();
    let globals = interp.new_globals("__main__");
    interp.run(m.build(), &globals)
}

#[test]
fn repeating_an_empty_list_returns_at_once() {
    // return [] * (1 << 62)
    let mut m = CodeBuilder::module("repeat");
    m.emit_u16(Opcode::BuildList, 0);
    m.load_const(1_i64 << 62);
    m.emit(Opcode::BinaryMultiply);
    m.emit(Opcode::ReturnValue);
    assert_eq!(run(m).unwrap().repr_builtin(), "[]");
}

#[test]
fn oversized_repetition_is_an_overflow_error() {
    // return "ab" * (1 << 61)
    let mut m = CodeBuilder::module("repeat");
    m.load_const("ab");
    m.load_const(1_i64 << 61);
    m.emit(Opcode::BinaryMultiply);
    m.emit(Opcode::ReturnValue);
    assert_eq!(
        run(m).unwrap_err().to_string(),
        "OverflowError: repeated sequence is too long"
    );

    // return (1, 2) * (1 << 40)
    let mut m = CodeBuilder::module("repeat");
    m.load_const(1_i64);
    m.load_const(2_i64);
    m.emit_u16(Opcode::BuildTuple, 2);
    m.load_const(1_i64 << 40);
    m.emit(Opcode::BinaryMultiply);
    m.emit(Opcode::ReturnValue);
    assert_eq!(
        run(m).unwrap_err().to_string(),
        "OverflowError: repeated sequence is too long"
    );
}

#[test]
fn small_repetition_still_works() {
    let mut m = CodeBuilder::module("repeat");
    m.load_const(3_i64);
    m.load_const("ab");
    m.emit(Opcode::BinaryMultiply);
    m.emit(Opcode::ReturnValue);
    assert_eq!(run(m).unwrap(), Value::str("ababab"));
}

/// A list holding itself.
fn self_containing_list() -> Value {
    let list = Value::list(Vec::new());
    if let Value::List(items) = &list {
        items.write().push(list.clone());
    }
    list
}

fn break_cycle(list: &Value) {
    if let Value::List(items) = list {
        items.write().clear();
    }
}

#[test]
fn comparing_self_containing_lists_raises() {
    let interp = Interpreter::new(InterpreterConfig::default().with_recursion_limit(50)).unwrap();
    let (a, b) = (self_containing_list(), self_containing_list());

    assert_ne!(a, b, "builtin equality gives up on unbounded nesting");
    let err = interp
        .with_vm(|vm| vm.rich_compare(CmpOp::Eq, &a, &b))
        .unwrap_err();
    assert_eq!(err.to_string(), "RuntimeError: maximum recursion depth exceeded in cmp");

    let same = interp.with_vm(|vm| vm.rich_compare(CmpOp::Eq, &a, &a)).unwrap();
    assert_eq!(same, Value::Bool(true), "identical containers compare equal without recursing");

    break_cycle(&a);
    break_cycle(&b);
}
