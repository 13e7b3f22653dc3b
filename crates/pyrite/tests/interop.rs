//! Host classes seen from the interpreter: reflection, bean properties, overloads and faults.

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use pyrite::{
    ArgValues, ExcType, HostClass, HostClassDef, HostKind, HostValue, Interpreter, InterpreterConfig, Opcode,
    RecordingTracer, TraceEvent, TraceHook, Value,
    bytecode::{CmpOp, CodeBuilder},
    function::Function,
    interop::{HostError, HostHandle, HostObject, adapt, register_host_class, registered_class, wrap},
    types::TypeRef,
};

#[derive(Debug, Default)]
struct Counter {
    count: Mutex<i64>,
}

fn counter(handle: Option<&HostHandle>) -> Result<&Counter, HostError> {
    handle
        .and_then(|h| h.downcast_ref::<Counter>())
        .ok_or_else(|| HostError::Failed("not a Counter".to_owned()))
}

fn int_arg(args: &[HostValue], index: usize) -> i64 {
    match args.get(index) {
        Some(HostValue::Int(i)) => *i,
        _ => 0,
    }
}

fn counter_class() -> HostClassDef {
    HostClassDef::new("Counter")
        .constructor(vec![], |_| Ok(Arc::new(Counter::default()) as HostHandle))
        .constructor(vec![HostKind::Int], |args| {
            Ok(Arc::new(Counter {
                count: Mutex::new(int_arg(args, 0)),
            }) as HostHandle)
        })
        .method("getCount", vec![], HostKind::Int, |h, _| {
            Ok(HostValue::Int(*counter(h)?.count.lock()))
        })
        .method("setCount", vec![HostKind::Int], HostKind::None, |h, args| {
            *counter(h)?.count.lock() = int_arg(args, 0);
            Ok(HostValue::None)
        })
        .method("isZero", vec![], HostKind::Bool, |h, _| {
            Ok(HostValue::Bool(*counter(h)?.count.lock() == 0))
        })
        .method("add", vec![HostKind::Int], HostKind::Int, |h, args| {
            let mut count = counter(h)?.count.lock();
            *count += int_arg(args, 0);
            Ok(HostValue::Int(*count))
        })
        .method("add", vec![HostKind::Int, HostKind::Int], HostKind::Int, |h, args| {
            let mut count = counter(h)?.count.lock();
            *count += int_arg(args, 0) * int_arg(args, 1);
            Ok(HostValue::Int(*count))
        })
        .method("describe", vec![HostKind::Str], HostKind::Str, |h, args| {
            let prefix = match args.first() {
                Some(HostValue::Str(s)) => s.clone(),
                _ => String::new(),
            };
            Ok(HostValue::Str(format!("{prefix}{}", counter(h)?.count.lock())))
        })
        .method("explode", vec![], HostKind::None, |_, _| panic!("counter jammed"))
        .static_method("limit", vec![], HostKind::Int, |_| Ok(HostValue::Int(99)))
        .field("label", HostKind::Str, |_| HostValue::Str("tally".to_owned()), None)
}

static COUNTER: LazyLock<Arc<dyn HostClass>> = LazyLock::new(|| Arc::new(counter_class()));

fn counter_type() -> TypeRef {
    register_host_class(COUNTER.clone())
}

fn new_counter(vm: &mut pyrite::Vm, args: Vec<Value>) -> Value {
    vm.call(&Value::Type(counter_type()), ArgValues::new(args)).unwrap()
}

fn call_method(vm: &mut pyrite::Vm, obj: &Value, name: &str, args: Vec<Value>) -> pyrite::RunResult<Value> {
    let method = vm.get_attr(obj, name)?;
    vm.call(&method, ArgValues::new(args))
}

#[test]
fn classes_are_reflected_once() {
    let first = counter_type();
    let second = counter_type();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(registered_class(&COUNTER).is_some_and(|t| Arc::ptr_eq(&t, &first)));
    assert_eq!(&*first.name(), "Counter");
}

#[test]
fn same_named_classes_get_their_own_types() {
    let other: Arc<dyn HostClass> = Arc::new(
        HostClassDef::new("Counter").static_method("limit", vec![], HostKind::Int, |_| Ok(HostValue::Int(7))),
    );
    let other_type = register_host_class(other.clone());
    assert!(!Arc::ptr_eq(&other_type, &counter_type()));
    assert!(registered_class(&other).is_some_and(|t| Arc::ptr_eq(&t, &other_type)));

    let interp = Interpreter::default();
    interp.with_vm(|vm| {
        let limit = vm.get_attr(&Value::Type(other_type), "limit").unwrap();
        assert_eq!(vm.call(&limit, ArgValues::empty()).unwrap(), Value::Int(7));
        let limit = vm.get_attr(&Value::Type(counter_type()), "limit").unwrap();
        assert_eq!(vm.call(&limit, ArgValues::empty()).unwrap(), Value::Int(99));
    });
}

#[test]
fn constructors_and_overloads_dispatch_by_arity() {
    let interp = Interpreter::default();
    interp.with_vm(|vm| {
        let empty = new_counter(vm, vec![]);
        let five = new_counter(vm, vec![Value::Int(5)]);
        assert_eq!(call_method(vm, &empty, "getCount", vec![]).unwrap(), Value::Int(0));
        assert_eq!(call_method(vm, &five, "add", vec![Value::Int(2)]).unwrap(), Value::Int(7));
        assert_eq!(
            call_method(vm, &five, "add", vec![Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(13)
        );
        assert_eq!(
            call_method(vm, &five, "describe", vec![Value::str("n=")]).unwrap(),
            Value::str("n=13")
        );
        let err = call_method(vm, &five, "add", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: no overload of add() takes 0 arguments");
    });
}

#[test]
fn bean_properties_read_and_write_through_accessors() {
    let interp = Interpreter::default();
    interp.with_vm(|vm| {
        let obj = new_counter(vm, vec![Value::Int(3)]);
        assert_eq!(vm.get_attr(&obj, "count").unwrap(), Value::Int(3));
        assert_eq!(vm.get_attr(&obj, "zero").unwrap(), Value::Bool(false));

        vm.set_attr(&obj, "count", Value::Int(0)).unwrap();
        assert_eq!(vm.get_attr(&obj, "zero").unwrap(), Value::Bool(true));

        vm.set_attr(&obj, "count", Value::Bool(true)).unwrap();
        assert_eq!(vm.get_attr(&obj, "count").unwrap(), Value::Int(1), "bool widens to int");

        let err = vm.set_attr(&obj, "count", Value::str("many")).unwrap_err();
        assert!(err.matches_type(ExcType::TypeError));
        assert_eq!(err.to_string(), "TypeError: expected int, got 'str'");
    });
}

#[test]
fn fields_and_static_methods() {
    let interp = Interpreter::default();
    interp.with_vm(|vm| {
        let obj = new_counter(vm, vec![]);
        assert_eq!(vm.get_attr(&obj, "label").unwrap(), Value::str("tally"));
        assert!(vm.set_attr(&obj, "label", Value::str("other")).is_err(), "final fields are read-only");

        let limit = vm.get_attr(&Value::Type(counter_type()), "limit").unwrap();
        assert_eq!(vm.call(&limit, ArgValues::empty()).unwrap(), Value::Int(99));
        assert_eq!(call_method(vm, &obj, "limit", vec![]).unwrap(), Value::Int(99));
    });
}

#[test]
fn host_panics_surface_as_interop_errors() {
    let interp = Interpreter::default();
    interp.with_vm(|vm| {
        let obj = new_counter(vm, vec![]);
        let err = call_method(vm, &obj, "explode", vec![]).unwrap_err();
        assert!(err.matches_type(ExcType::InteropError));
        assert_eq!(err.to_string(), "InteropError: host code panicked: counter jammed");
        // The object stays usable.
        assert_eq!(call_method(vm, &obj, "getCount", vec![]).unwrap(), Value::Int(0));
    });
}

#[test]
fn wrapped_host_objects_share_the_reflected_type() {
    let class = COUNTER.clone();
    let handle: HostHandle = Arc::new(Counter::default());
    let value = wrap(HostValue::Object(HostObject::new(class, handle)));
    let Value::Foreign(foreign) = &value else {
        panic!("expected a foreign object");
    };
    assert!(Arc::ptr_eq(foreign.class(), &counter_type()));
    assert_eq!(value.type_name().to_string(), "Counter");
}

/// `def f(n): return 0 if n == 0 else Reenter.go(n - 1) + 1`, where the host method `go`
/// calls `f` back through [`Interpreter::call`].
fn reentrant_function(interp: &Interpreter) -> Value {
    let target: Arc<Mutex<Option<Value>>> = Arc::default();
    let host = {
        let (interp, target) = (interp.clone(), target.clone());
        HostClassDef::new("Reenter").static_method("go", vec![HostKind::Int], HostKind::Int, move |args| {
            let f = target
                .lock()
                .clone()
                .ok_or_else(|| HostError::Failed("callback not installed".to_owned()))?;
            let result = interp.call(&f, vec![wrap(args[0].clone())], vec![])?;
            Ok(adapt(&result, HostKind::Int)?)
        })
    };
    let globals = interp.new_globals("reenter");
    globals
        .write()
        .set_str("Reenter", Value::Type(register_host_class(Arc::new(host))));

    let mut f = CodeBuilder::function("f", &["n"]);
    f.load_fast("n");
    f.load_const(0_i64);
    f.compare(CmpOp::Eq);
    let recurse = f.emit_jump(Opcode::PopJumpIfFalse);
    f.load_const(0_i64);
    f.emit(Opcode::ReturnValue);
    f.patch_jump(recurse);
    f.load_global("Reenter");
    f.load_attr("go");
    f.load_fast("n");
    f.load_const(1_i64);
    f.emit(Opcode::BinarySubtract);
    f.call(1, 0);
    f.load_const(1_i64);
    f.emit(Opcode::BinaryAdd);
    f.emit(Opcode::ReturnValue);

    let f = Value::Function(Function::new(f.build(), globals, Vec::new(), Vec::new()));
    *target.lock() = Some(f.clone());
    f
}

#[test]
fn host_callbacks_continue_the_call_chain() {
    let interp = Interpreter::default();
    let f = reentrant_function(&interp);
    let tracer = Arc::new(RecordingTracer::new());
    let result = interp.with_vm(|vm| {
        vm.set_trace(Some(tracer.clone() as Arc<dyn TraceHook>));
        let result = vm.call(&f, ArgValues::new(vec![Value::Int(2)]));
        vm.set_trace(None);
        result
    });
    assert_eq!(result.unwrap(), Value::Int(2));

    let depths: Vec<usize> = tracer
        .events()
        .into_iter()
        .filter_map(|event| match event {
            TraceEvent::Call { name, depth } if name == "f" => Some(depth),
            _ => None,
        })
        .collect();
    assert_eq!(depths, [1, 2, 3], "re-entered frames see the hook and keep counting depth");
}

#[test]
fn recursion_through_host_code_hits_the_limit() {
    let interp = Interpreter::new(InterpreterConfig::default().with_recursion_limit(20)).unwrap();
    let f = reentrant_function(&interp);
    assert_eq!(interp.call(&f, vec![Value::Int(5)], vec![]).unwrap(), Value::Int(5));

    let err = interp.call(&f, vec![Value::Int(200)], vec![]).unwrap_err();
    assert!(err.is_instance_of(ExcType::RecursionError));
    assert_eq!(err.to_string(), "RecursionError: maximum recursion depth exceeded");
}
