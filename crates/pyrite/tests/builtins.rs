//! Builtins that inspect objects: type checks, weak references and `callable`.

use std::sync::Arc;

use parking_lot::RwLock;
use pretty_assertions::assert_eq;
use pyrite::{
    Interpreter, Value,
    types::{ClassicClass, Dict},
};

fn builtin(interp: &Interpreter, name: &str) -> Value {
    interp.builtins().read().get_str(name).unwrap()
}

fn call(interp: &Interpreter, name: &str, args: Vec<Value>) -> Value {
    interp.call(&builtin(interp, name), args, vec![]).unwrap()
}

fn new_style(interp: &Interpreter, name: &str, bases: Vec<Value>) -> Value {
    call(
        interp,
        "type",
        vec![Value::str(name), Value::tuple(bases), Value::Dict(Arc::new(RwLock::new(Dict::new())))],
    )
}

fn classic(name: &str) -> Value {
    Value::Class(ClassicClass::new(name, Vec::new(), Arc::new(RwLock::new(Dict::new()))))
}

#[test]
fn isinstance_accepts_types_classes_and_tuples() {
    let interp = Interpreter::default();
    let int = builtin(&interp, "int");
    let str_ = builtin(&interp, "str");

    assert_eq!(call(&interp, "isinstance", vec![Value::Bool(true), int.clone()]), Value::Bool(true));
    assert_eq!(
        call(
            &interp,
            "isinstance",
            vec![Value::Int(1), Value::tuple(vec![str_.clone(), Value::tuple(vec![int])])]
        ),
        Value::Bool(true)
    );
    assert_eq!(call(&interp, "isinstance", vec![Value::Int(1), str_]), Value::Bool(false));

    let old = classic("Old");
    let instance = interp.call(&old, vec![], vec![]).unwrap();
    assert_eq!(call(&interp, "isinstance", vec![instance, old]), Value::Bool(true));

    let err = interp
        .call(&builtin(&interp, "isinstance"), vec![Value::Int(1), Value::Int(3)], vec![])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "TypeError: isinstance() arg 2 must be a class, type, or tuple of classes and types"
    );
}

#[test]
fn issubclass_walks_the_bases() {
    let interp = Interpreter::default();
    let base = new_style(&interp, "Base", vec![]);
    let derived = new_style(&interp, "Derived", vec![base.clone()]);
    let object = builtin(&interp, "object");

    assert_eq!(call(&interp, "issubclass", vec![derived.clone(), base.clone()]), Value::Bool(true));
    assert_eq!(call(&interp, "issubclass", vec![derived.clone(), object]), Value::Bool(true));
    assert_eq!(call(&interp, "issubclass", vec![base, derived]), Value::Bool(false));

    let err = interp
        .call(&builtin(&interp, "issubclass"), vec![Value::Int(1), classic("Old")], vec![])
        .unwrap_err();
    assert_eq!(err.to_string(), "TypeError: issubclass() arg 1 must be a class");
}

#[test]
fn weak_references_do_not_keep_objects_alive() {
    let interp = Interpreter::default();
    let obj = call(&interp, "object", vec![]);
    let weak = call(&interp, "weakref", vec![obj.clone()]);

    assert!(interp.call(&weak, vec![], vec![]).unwrap().is(&obj));
    assert_eq!(call(&interp, "getweakrefcount", vec![obj.clone()]), Value::Int(1));

    drop(obj);
    assert_eq!(interp.call(&weak, vec![], vec![]).unwrap(), Value::None);
}

#[test]
fn immediates_cannot_be_weakly_referenced() {
    let interp = Interpreter::default();
    let err = interp
        .call(&builtin(&interp, "weakref"), vec![Value::Int(5)], vec![])
        .unwrap_err();
    assert_eq!(err.to_string(), "TypeError: cannot create weak reference to 'int' object");
    assert_eq!(call(&interp, "getweakrefcount", vec![Value::Int(5)]), Value::Int(0));
}

#[test]
fn callable_reports_what_can_be_called() {
    let interp = Interpreter::default();
    let old = classic("Old");
    let instance = interp.call(&old, vec![], vec![]).unwrap();

    assert_eq!(call(&interp, "callable", vec![builtin(&interp, "len")]), Value::Bool(true));
    assert_eq!(call(&interp, "callable", vec![old]), Value::Bool(true));
    assert_eq!(call(&interp, "callable", vec![instance]), Value::Bool(false));
    assert_eq!(call(&interp, "callable", vec![Value::str("x")]), Value::Bool(false));
}

#[test]
fn list_pop_normalizes_its_index() {
    let interp = Interpreter::default();
    let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let pop = call(&interp, "getattr", vec![list.clone(), Value::str("pop")]);

    assert_eq!(interp.call(&pop, vec![Value::Int(-3)], vec![]).unwrap(), Value::Int(1));
    assert_eq!(interp.call(&pop, vec![], vec![]).unwrap(), Value::Int(3));
    let err = interp.call(&pop, vec![Value::Int(5)], vec![]).unwrap_err();
    assert_eq!(err.to_string(), "IndexError: pop index out of range");
    assert_eq!(list.repr_builtin(), "[2]");
}
