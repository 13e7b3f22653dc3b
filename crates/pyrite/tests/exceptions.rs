//! Raising, matching, finally blocks and tracebacks.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use pyrite::{Code, CodeBuilder, ExcType, Interpreter, Opcode, PyException, Value, bytecode::CmpOp, types::DictRef};

fn run(code: Arc<Code>) -> (Result<Value, PyException>, DictRef) {
    let interp = Interpreter::default();
    let globals = interp.new_globals("__main__");
    let result = interp.run(code, &globals);
    (result, globals)
}

/// `raise <exc>(<message>)`
fn emit_raise(b: &mut CodeBuilder, exc: &str, message: &str) {
    b.load_name(exc);
    b.load_const(message);
    b.call(1, 0);
    b.emit_u8(Opcode::RaiseVarargs, 1);
}

/// ```text
/// try:
///     raise ValueError("boom")
/// except <handler>, e:
///     return e.args[0]
/// return "no error"
/// ```
fn try_except(handler: &[&str]) -> Arc<Code> {
    let mut m = CodeBuilder::module("try_except");
    let setup = m.emit_jump(Opcode::SetupExcept);
    emit_raise(&mut m, "ValueError", "boom");
    m.emit(Opcode::PopBlock);
    let done = m.emit_jump(Opcode::Jump);

    m.patch_jump(setup);
    m.emit(Opcode::DupTop);
    for name in handler {
        m.load_name(name);
    }
    if handler.len() > 1 {
        m.emit_u16(Opcode::BuildTuple, u16::try_from(handler.len()).unwrap());
    }
    m.compare(CmpOp::ExcMatch);
    let no_match = m.emit_jump(Opcode::PopJumpIfFalse);
    m.emit(Opcode::PopTop);
    m.store_name("e");
    m.emit(Opcode::PopTop);
    m.load_name("e");
    m.load_attr("args");
    m.load_const(0_i64);
    m.emit(Opcode::BinarySubscr);
    m.emit(Opcode::ReturnValue);
    m.patch_jump(no_match);
    m.emit(Opcode::EndFinally);

    m.patch_jump(done);
    m.load_const("no error");
    m.emit(Opcode::ReturnValue);
    m.build()
}

#[test]
fn matching_handler_catches() {
    let (result, _) = run(try_except(&["ValueError"]));
    assert_eq!(result.unwrap(), Value::str("boom"));

    let (result, _) = run(try_except(&["Exception"]));
    assert_eq!(result.unwrap(), Value::str("boom"), "handlers match subclasses");

    let (result, _) = run(try_except(&["KeyError", "ValueError"]));
    assert_eq!(result.unwrap(), Value::str("boom"), "handlers match tuples");
}

#[test]
fn unmatched_exception_propagates_unchanged() {
    let (result, _) = run(try_except(&["KeyError"]));
    let err = result.unwrap_err();
    assert!(err.is_instance_of(ExcType::ValueError));
    assert_eq!(err.to_string(), "ValueError: boom");
}

#[test]
fn return_in_finally_replaces_pending_return() {
    // try: return "body"
    // finally: return "finally"
    let mut m = CodeBuilder::module("finally_return");
    let setup = m.emit_jump(Opcode::SetupFinally);
    m.load_const("body");
    m.emit(Opcode::ReturnValue);
    m.emit(Opcode::PopBlock);
    m.emit(Opcode::LoadNone);
    m.patch_jump(setup);
    m.load_const("finally");
    m.emit(Opcode::ReturnValue);
    m.emit(Opcode::EndFinally);

    let (result, _) = run(m.build());
    assert_eq!(result.unwrap(), Value::str("finally"));
}

#[test]
fn finally_runs_and_reraises() {
    // try: raise KeyError("k")
    // finally: ran = "yes"
    let mut m = CodeBuilder::module("finally_raise");
    let setup = m.emit_jump(Opcode::SetupFinally);
    emit_raise(&mut m, "KeyError", "k");
    m.emit(Opcode::PopBlock);
    m.emit(Opcode::LoadNone);
    m.patch_jump(setup);
    m.load_const("yes");
    m.store_name("ran");
    m.emit(Opcode::EndFinally);
    m.emit(Opcode::LoadNone);
    m.emit(Opcode::ReturnValue);

    let (result, globals) = run(m.build());
    assert!(result.unwrap_err().is_instance_of(ExcType::KeyError));
    assert_eq!(globals.read().get_str("ran"), Some(Value::str("yes")));
}

#[test]
fn raise_validates_its_arguments() {
    // raise ValueError("x"), "extra"
    let mut m = CodeBuilder::module("bad_raise");
    m.load_name("ValueError");
    m.load_const("x");
    m.call(1, 0);
    m.load_const("extra");
    m.emit_u8(Opcode::RaiseVarargs, 2);
    let (result, _) = run(m.build());
    assert_eq!(
        result.unwrap_err().to_string(),
        "TypeError: instance exception may not have a separate value"
    );

    // raise 42
    let mut m = CodeBuilder::module("raise_int");
    m.load_const(42_i64);
    m.emit_u8(Opcode::RaiseVarargs, 1);
    let (result, _) = run(m.build());
    assert_eq!(
        result.unwrap_err().to_string(),
        "TypeError: exceptions must be old-style classes or derived from BaseException, not int"
    );

    // raise (KeyError, ValueError), "first wins"
    let mut m = CodeBuilder::module("raise_tuple");
    m.load_name("KeyError");
    m.load_name("ValueError");
    m.emit_u16(Opcode::BuildTuple, 2);
    m.load_const("first wins");
    m.emit_u8(Opcode::RaiseVarargs, 2);
    let (result, _) = run(m.build());
    assert!(result.unwrap_err().is_instance_of(ExcType::KeyError));
}

#[test]
fn bare_raise_without_active_exception() {
    let mut m = CodeBuilder::module("bare");
    m.emit_u8(Opcode::RaiseVarargs, 0);
    let (result, _) = run(m.build());
    assert_eq!(result.unwrap_err().to_string(), "ValueError: no exception to reraise");
}

#[test]
fn traceback_runs_outermost_to_innermost() {
    // line 3 of fail(): raise RuntimeError("deep")
    // line 10 of the module: fail()
    let mut fail = CodeBuilder::function("fail", &[]).with_first_line(2);
    fail.set_line(3);
    emit_raise(&mut fail, "RuntimeError", "deep");

    let mut m = CodeBuilder::module("<module>").with_filename("tb.py");
    m.set_line(9);
    m.load_const(fail.build());
    m.emit_u16(Opcode::MakeFunction, 0);
    m.store_name("fail");
    m.set_line(10);
    m.load_name("fail");
    m.call(0, 0);
    m.emit(Opcode::ReturnValue);

    let (result, _) = run(m.build());
    let err = result.unwrap_err();
    let lines: Vec<(String, u32)> = err
        .traceback()
        .unwrap()
        .iter()
        .map(|tb| (tb.frame().code().name().to_owned(), tb.line()))
        .collect();
    assert_eq!(lines, [("<module>".to_owned(), 10), ("fail".to_owned(), 3)]);
    assert!(err.format_traceback().ends_with("RuntimeError: deep"));
}

#[test]
fn handled_exception_does_not_leak_to_the_caller() {
    let interp = Interpreter::default();
    let globals = interp.new_globals("__main__");
    interp.run(try_except(&["ValueError"]), &globals).unwrap();
    interp.with_vm(|vm| assert!(vm.exc_info().is_none()));
}

/// `name = name + 1`
fn emit_increment(b: &mut CodeBuilder, name: &str) {
    b.load_name(name);
    b.load_const(1_i64);
    b.emit(Opcode::BinaryAdd);
    b.store_name(name);
}

/// ```text
/// for i in [0, 1, 2, 3]:
///     try:
///         <body>
///     finally:
///         finals = finals + 1
///     reached = reached + 1
/// return (i, finals, reached)
/// ```
///
/// `body` is emitted with the loop's start offset, for `continue`.
fn loop_with_finally(body: impl FnOnce(&mut CodeBuilder, usize)) -> Arc<Code> {
    let mut m = CodeBuilder::module("loop_finally");
    for counter in ["finals", "reached"] {
        m.load_const(0_i64);
        m.store_name(counter);
    }
    let setup_loop = m.emit_jump(Opcode::SetupLoop);
    for i in 0..4_i64 {
        m.load_const(i);
    }
    m.emit_u16(Opcode::BuildList, 4);
    m.emit(Opcode::GetIter);
    let start = m.current_offset();
    let exhausted = m.emit_jump(Opcode::ForIter);
    m.store_name("i");

    let setup_finally = m.emit_jump(Opcode::SetupFinally);
    body(&mut m, start);
    m.emit(Opcode::PopBlock);
    m.emit(Opcode::LoadNone);
    m.patch_jump(setup_finally);
    emit_increment(&mut m, "finals");
    m.emit(Opcode::EndFinally);

    emit_increment(&mut m, "reached");
    m.emit_jump_to(Opcode::Jump, start);

    m.patch_jump(exhausted);
    m.emit(Opcode::PopBlock);
    m.patch_jump(setup_loop);
    for name in ["i", "finals", "reached"] {
        m.load_name(name);
    }
    m.emit_u16(Opcode::BuildTuple, 3);
    m.emit(Opcode::ReturnValue);
    m.build()
}

#[test]
fn break_runs_finally_then_leaves_the_loop() {
    // if i == 2: break
    let code = loop_with_finally(|m, _| {
        m.load_name("i");
        m.load_const(2_i64);
        m.compare(CmpOp::Eq);
        let skip = m.emit_jump(Opcode::PopJumpIfFalse);
        m.emit(Opcode::BreakLoop);
        m.patch_jump(skip);
    });
    let (result, _) = run(code);
    assert_eq!(
        result.unwrap(),
        Value::tuple(vec![Value::Int(2), Value::Int(3), Value::Int(2)]),
        "the breaking iteration runs its finally but skips the rest of the body"
    );
}

#[test]
fn continue_runs_finally_on_every_iteration() {
    // continue
    let code = loop_with_finally(|m, start| m.emit_jump_to(Opcode::ContinueLoop, start));
    let (result, _) = run(code);
    assert_eq!(
        result.unwrap(),
        Value::tuple(vec![Value::Int(3), Value::Int(4), Value::Int(0)])
    );
}

fn exception_args(value: &Value) -> Vec<Value> {
    match value {
        Value::Exception(exc) => exc.args().to_vec(),
        other => panic!("exception instance expected, got {}", other.type_name()),
    }
}

#[test]
fn normalizing_twice_keeps_the_first_instance() {
    let interp = Interpreter::default();
    let mut exc = PyException::new(
        Value::Type(ExcType::ValueError.type_ref()),
        Value::tuple(vec![Value::Int(1), Value::Int(2)]),
        None,
    );
    assert!(!exc.is_normalized());

    interp.with_vm(|vm| exc.normalize(vm)).unwrap();
    assert!(exc.is_normalized());
    let first = exc.value().clone();
    assert_eq!(exception_args(&first), [Value::Int(1), Value::Int(2)], "a tuple value spreads into args");

    interp.with_vm(|vm| exc.normalize(vm)).unwrap();
    assert!(exc.value().is(&first));
    assert_eq!(exc.to_string(), "ValueError: (1, 2)");
}

#[test]
fn raise_with_a_tuple_value_builds_the_instance_from_it() {
    // try: raise ValueError, (1, 2)
    // except ValueError, e: return (e.args, str(e))
    let mut m = CodeBuilder::module("raise_pair");
    let setup = m.emit_jump(Opcode::SetupExcept);
    m.load_name("ValueError");
    m.load_const(1_i64);
    m.load_const(2_i64);
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit_u8(Opcode::RaiseVarargs, 2);
    m.emit(Opcode::PopBlock);
    let done = m.emit_jump(Opcode::Jump);

    m.patch_jump(setup);
    m.emit(Opcode::PopTop);
    m.store_name("e");
    m.emit(Opcode::PopTop);
    m.load_name("e");
    m.load_attr("args");
    m.load_name("str");
    m.load_name("e");
    m.call(1, 0);
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    m.patch_jump(done);
    m.emit(Opcode::LoadNone);
    m.emit(Opcode::ReturnValue);

    let (result, globals) = run(m.build());
    assert_eq!(
        result.unwrap(),
        Value::tuple(vec![
            Value::tuple(vec![Value::Int(1), Value::Int(2)]),
            Value::str("(1, 2)")
        ])
    );
    let e = globals.read().get_str("e").unwrap();
    assert_eq!(e.type_name().to_string(), "ValueError");
}
