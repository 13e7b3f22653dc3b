//! Argument binding, closures, recursion limits and the builtins reached through calls.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use pyrite::{
    ArgValues, Code, CodeBuilder, ExcType, Interpreter, InterpreterConfig, Opcode, Value, WarningPolicy,
    bytecode::CmpOp, function::Function,
};

fn function(interp: &Interpreter, code: Arc<Code>, defaults: Vec<Value>) -> Value {
    Value::Function(Function::new(code, interp.new_globals("calls"), defaults, Vec::new()))
}

fn builtin(interp: &Interpreter, name: &str) -> Value {
    interp.builtins().read().get_str(name).unwrap()
}

/// `def f(a, b=2, *rest, **kw): return (a, b, rest, kw)`
fn collect_args() -> Arc<Code> {
    let mut b = CodeBuilder::function("f", &["a", "b"]).with_varargs("rest").with_varkwargs("kw");
    for name in ["a", "b", "rest", "kw"] {
        b.load_fast(name);
    }
    b.emit_u16(Opcode::BuildTuple, 4);
    b.emit(Opcode::ReturnValue);
    b.build()
}

/// `def f(n): return 0 if n == 0 else f(n - 1) + 1`, stored as global `f` by the module.
fn countdown_module(n: i64) -> Arc<Code> {
    let mut f = CodeBuilder::function("f", &["n"]);
    f.load_fast("n");
    f.load_const(0_i64);
    f.compare(CmpOp::Eq);
    let recurse = f.emit_jump(Opcode::PopJumpIfFalse);
    f.load_const(0_i64);
    f.emit(Opcode::ReturnValue);
    f.patch_jump(recurse);
    f.load_global("f");
    f.load_fast("n");
    f.load_const(1_i64);
    f.emit(Opcode::BinarySubtract);
    f.call(1, 0);
    f.load_const(1_i64);
    f.emit(Opcode::BinaryAdd);
    f.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("countdown");
    m.load_const(f.build());
    m.emit_u16(Opcode::MakeFunction, 0);
    m.store_name("f");
    m.load_name("f");
    m.load_const(n);
    m.call(1, 0);
    m.emit(Opcode::ReturnValue);
    m.build()
}

#[test]
fn defaults_varargs_and_keywords_bind() {
    let interp = Interpreter::default();
    let f = function(&interp, collect_args(), vec![Value::Int(2)]);

    let result = interp
        .call(&f, vec![Value::Int(1)], vec![(Arc::from("c"), Value::Int(3))])
        .unwrap();
    assert_eq!(result.repr_builtin(), "(1, 2, (), {'c': 3})");

    let result = interp
        .call(&f, vec![Value::Int(1), Value::Int(5), Value::Int(6), Value::Int(7)], vec![])
        .unwrap();
    assert_eq!(result.repr_builtin(), "(1, 5, (6, 7), {})");
}

#[test]
fn binder_errors_name_the_function() {
    let interp = Interpreter::default();
    let f = function(&interp, collect_args(), vec![Value::Int(2)]);

    let err = interp.call(&f, vec![], vec![]).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: f() takes at least 1 argument (0 given)");

    let err = interp
        .call(&f, vec![Value::Int(1)], vec![(Arc::from("a"), Value::Int(1))])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "TypeError: f() got multiple values for argument 'a' (given by position and by name)"
    );

    let mut g = CodeBuilder::function("g", &["x"]);
    g.emit(Opcode::LoadNone);
    g.emit(Opcode::ReturnValue);
    let g = function(&interp, g.build(), vec![]);
    let err = interp.call(&g, vec![Value::Int(1), Value::Int(2)], vec![]).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: g() takes exactly 1 argument (2 given)");
    let err = interp.call(&g, vec![], vec![(Arc::from("y"), Value::Int(1))]).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: g() got an unexpected keyword argument 'y'");
}

#[test]
fn closures_share_cells() {
    // def make_adder(x):
    //     def add(y): return x + y
    //     return add
    let mut add = CodeBuilder::function("add", &["y"]);
    let x = add.freevar("x");
    add.emit_u16(Opcode::LoadDeref, x);
    add.load_fast("y");
    add.emit(Opcode::BinaryAdd);
    add.emit(Opcode::ReturnValue);

    let mut make = CodeBuilder::function("make_adder", &["x"]);
    let cell = make.cellvar("x");
    make.emit_u16(Opcode::LoadClosure, cell);
    make.emit_u16(Opcode::BuildTuple, 1);
    make.load_const(add.build());
    make.emit_u16(Opcode::MakeClosure, 0);
    make.emit(Opcode::ReturnValue);

    let interp = Interpreter::default();
    let make = function(&interp, make.build(), vec![]);
    let add_ten = interp.call(&make, vec![Value::Int(10)], vec![]).unwrap();
    assert_eq!(interp.call(&add_ten, vec![Value::Int(5)], vec![]).unwrap(), Value::Int(15));
}

#[test]
fn deep_recursion_within_the_limit_succeeds() {
    let interp = Interpreter::new(InterpreterConfig::default().with_recursion_limit(5000)).unwrap();
    let globals = interp.new_globals("__main__");
    let result = interp.run(countdown_module(3000), &globals).unwrap();
    assert_eq!(result, Value::Int(3000));
}

#[test]
fn exceeding_the_recursion_limit_raises() {
    let interp = Interpreter::new(InterpreterConfig::default().with_recursion_limit(50)).unwrap();
    let globals = interp.new_globals("__main__");
    let err = interp.run(countdown_module(100), &globals).unwrap_err();
    assert!(err.is_instance_of(ExcType::RecursionError));
    assert!(err.is_instance_of(ExcType::RuntimeError), "RecursionError derives from RuntimeError");
    assert_eq!(err.to_string(), "RecursionError: maximum recursion depth exceeded");

    // The limit is per call chain; the thread's Vm is usable afterwards.
    let result = interp.run(countdown_module(10), &globals).unwrap();
    assert_eq!(result, Value::Int(10));
}

#[test]
fn float_index_warns_according_to_policy() {
    let interp = Interpreter::default();
    let range = builtin(&interp, "range");
    interp.with_vm(|vm| {
        let before = vm.warnings().len();
        let result = vm.call(&range, ArgValues::new(vec![Value::Float(3.0)])).unwrap();
        assert_eq!(result.repr_builtin(), "[0, 1, 2]");
        assert_eq!(vm.warnings().len(), before + 1);
        assert!(vm.warnings()[before].is_instance_of(ExcType::DeprecationWarning));
    });

    let strict =
        Interpreter::new(InterpreterConfig::default().with_deprecation_warnings(WarningPolicy::Error)).unwrap();
    let range = builtin(&strict, "range");
    let err = strict.call(&range, vec![Value::Float(3.0)], vec![]).unwrap_err();
    assert_eq!(err.to_string(), "DeprecationWarning: integer argument expected, got float");
}

#[test]
fn attribute_builtins() {
    let interp = Interpreter::default();
    let getattr = builtin(&interp, "getattr");
    let hasattr = builtin(&interp, "hasattr");
    let obj = Value::Int(1);

    let missing = interp
        .call(&getattr, vec![obj.clone(), Value::str("nope"), Value::str("fallback")], vec![])
        .unwrap();
    assert_eq!(missing, Value::str("fallback"));
    assert_eq!(
        interp.call(&hasattr, vec![obj.clone(), Value::str("nope")], vec![]).unwrap(),
        Value::Bool(false)
    );
    let err = interp.call(&getattr, vec![obj, Value::Int(3)], vec![]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "TypeError: getattr(): attribute name must be string, not 'int'"
    );
}

#[test]
fn ids_are_stable_and_distinct() {
    let interp = Interpreter::default();
    let id = builtin(&interp, "id");
    let object = builtin(&interp, "object");
    let a = interp.call(&object, vec![], vec![]).unwrap();
    let b = interp.call(&object, vec![], vec![]).unwrap();

    let first = interp.call(&id, vec![a.clone()], vec![]).unwrap();
    let again = interp.call(&id, vec![a], vec![]).unwrap();
    let other = interp.call(&id, vec![b], vec![]).unwrap();
    assert_eq!(first, again);
    assert_ne!(first, other);
}
