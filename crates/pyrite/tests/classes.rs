//! Class statements, attribute lookup order and descriptors, driven through assembled code.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use pyrite::{Code, CodeBuilder, ExcType, Interpreter, Opcode, Value, bytecode::CmpOp, types::DictRef};

/// Emits `name = class name(*bases): body` into module code.
fn emit_class(m: &mut CodeBuilder, name: &str, bases: &[&str], body: Arc<Code>) {
    m.load_const(name);
    for base in bases {
        m.load_name(base);
    }
    m.emit_u16(Opcode::BuildTuple, u16::try_from(bases.len()).unwrap());
    m.load_const(body);
    m.emit_u16(Opcode::MakeFunction, 0);
    m.call(0, 0);
    m.emit(Opcode::BuildClass);
    m.store_name(name);
}

/// A class body binding each `(name, function)` pair and then the given constants.
fn class_body(name: &str, methods: Vec<(&str, Arc<Code>)>, attrs: &[(&str, &str)]) -> Arc<Code> {
    let mut b = CodeBuilder::class_body(name);
    for (method, code) in methods {
        b.load_const(code);
        b.emit_u16(Opcode::MakeFunction, 0);
        b.store_name(method);
    }
    for (attr, value) in attrs {
        b.load_const(*value);
        b.store_name(attr);
    }
    b.emit(Opcode::LoadLocals);
    b.emit(Opcode::ReturnValue);
    b.build()
}

/// `def name(self): return value`
fn returns_const(name: &str, value: &str) -> Arc<Code> {
    let mut b = CodeBuilder::function(name, &["self"]);
    b.load_const(value);
    b.emit(Opcode::ReturnValue);
    b.build()
}

fn run_module(m: CodeBuilder) -> (Interpreter, DictRef, Value) {
    let interp = Interpreter::default();
    let globals = interp.new_globals("__main__");
    let result = interp.run(m.build(), &globals).unwrap();
    (interp, globals, result)
}

fn global(globals: &DictRef, name: &str) -> Value {
    globals.read().get_str(name).unwrap()
}

/// Returns `name().attr` from module code.
fn emit_instance_attr(m: &mut CodeBuilder, class: &str, attr: &str) {
    m.load_name(class);
    m.call(0, 0);
    m.load_attr(attr);
}

#[test]
fn subclass_method_overrides_and_calls_base() {
    // class Animal(object):
    //     def speak(self): return "..."
    //     def name(self): return "animal"
    // class Dog(Animal):
    //     def speak(self): return Animal.speak(self) + " woof"
    let mut dog_speak = CodeBuilder::function("speak", &["self"]);
    dog_speak.load_global("Animal");
    dog_speak.load_attr("speak");
    dog_speak.load_fast("self");
    dog_speak.call(1, 0);
    dog_speak.load_const(" woof");
    dog_speak.emit(Opcode::BinaryAdd);
    dog_speak.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("animals");
    emit_class(
        &mut m,
        "Animal",
        &["object"],
        class_body(
            "Animal",
            vec![("speak", returns_const("speak", "...")), ("name", returns_const("name", "animal"))],
            &[],
        ),
    );
    emit_class(&mut m, "Dog", &["Animal"], class_body("Dog", vec![("speak", dog_speak.build())], &[]));
    m.load_name("Dog");
    m.call(0, 0);
    m.store_name("d");
    m.load_name("d");
    m.load_attr("speak");
    m.call(0, 0);
    m.load_name("d");
    m.load_attr("name");
    m.call(0, 0);
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    let (interp, globals, result) = run_module(m);
    assert_eq!(result, Value::tuple(vec![Value::str("... woof"), Value::str("animal")]));

    let dog = global(&globals, "Dog");
    let animal = global(&globals, "Animal");
    let issubclass = interp.builtins().read().get_str("issubclass").unwrap();
    assert_eq!(interp.call(&issubclass, vec![dog.clone(), animal], vec![]).unwrap(), Value::Bool(true));

    let builtin = |name: &str| interp.builtins().read().get_str(name).unwrap();
    interp
        .call(&builtin("delattr"), vec![dog.clone(), Value::str("speak")], vec![])
        .unwrap();
    let speak = interp
        .call(&builtin("getattr"), vec![global(&globals, "d"), Value::str("speak")], vec![])
        .unwrap();
    assert_eq!(
        interp.call(&speak, vec![], vec![]).unwrap(),
        Value::str("..."),
        "deleting the override falls back to the base method"
    );

    let Value::Type(dog) = dog else {
        panic!("new-style class expected");
    };
    let mro: Vec<String> = dog.mro().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(mro, ["Dog", "Animal", "object"]);
    assert_eq!(
        global(&globals, "d").type_name().to_string(),
        "Dog",
        "instances report their class name"
    );
}

#[test]
fn classic_diamond_is_depth_first_and_new_style_is_c3() {
    // class A: x = "A"       class B(A): pass
    // class C(A): x = "C"    class D(B, C): pass
    // The same shape rooted at object instead of nothing.
    let mut m = CodeBuilder::module("diamond");
    for (suffix, root) in [("", &[][..]), ("N", &["object"][..])] {
        let a = format!("A{suffix}");
        let b = format!("B{suffix}");
        let c = format!("C{suffix}");
        let d = format!("D{suffix}");
        emit_class(&mut m, &a, root, class_body(&a, vec![], &[("x", "A")]));
        emit_class(&mut m, &b, &[a.as_str()], class_body(&b, vec![], &[]));
        emit_class(&mut m, &c, &[a.as_str()], class_body(&c, vec![], &[("x", "C")]));
        emit_class(&mut m, &d, &[b.as_str(), c.as_str()], class_body(&d, vec![], &[]));
        emit_instance_attr(&mut m, &d, "x");
    }
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    let (_, globals, result) = run_module(m);
    assert_eq!(result, Value::tuple(vec![Value::str("A"), Value::str("C")]));
    assert!(matches!(global(&globals, "D"), Value::Class(_)));
    assert!(matches!(global(&globals, "DN"), Value::Type(_)));
}

#[test]
fn data_descriptor_beats_instance_dict_which_beats_method() {
    // class P(object):
    //     def get(self): return "property"
    //     value = property(get)
    //     def method(self): return "method"
    // p = P(); p.__dict__["value"] = "dict"; p.__dict__["method"] = "dict"
    let mut body = CodeBuilder::class_body("P");
    body.load_const(returns_const("get", "property"));
    body.emit_u16(Opcode::MakeFunction, 0);
    body.store_name("get");
    body.load_name("property");
    body.load_name("get");
    body.call(1, 0);
    body.store_name("value");
    body.load_const(returns_const("method", "method"));
    body.emit_u16(Opcode::MakeFunction, 0);
    body.store_name("method");
    body.emit(Opcode::LoadLocals);
    body.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("descr");
    emit_class(&mut m, "P", &["object"], body.build());
    m.load_name("P");
    m.call(0, 0);
    m.store_name("p");
    for key in ["value", "method"] {
        m.load_const("dict");
        m.load_name("p");
        m.load_attr("__dict__");
        m.load_const(key);
        m.emit(Opcode::StoreSubscr);
    }
    m.load_name("p");
    m.load_attr("value");
    m.load_name("p");
    m.load_attr("method");
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    let (_, _, result) = run_module(m);
    assert_eq!(result, Value::tuple(vec![Value::str("property"), Value::str("dict")]));
}

#[test]
fn getattr_hook_runs_only_for_missing_attributes() {
    // class G:
    //     present = "present"
    //     def __getattr__(self, name): return name + "!"
    let mut hook = CodeBuilder::function("__getattr__", &["self", "name"]);
    hook.load_fast("name");
    hook.load_const("!");
    hook.emit(Opcode::BinaryAdd);
    hook.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("hooks");
    emit_class(
        &mut m,
        "G",
        &[],
        class_body("G", vec![("__getattr__", hook.build())], &[("present", "present")]),
    );
    emit_instance_attr(&mut m, "G", "present");
    emit_instance_attr(&mut m, "G", "missing");
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    let (_, _, result) = run_module(m);
    assert_eq!(result, Value::tuple(vec![Value::str("present"), Value::str("missing!")]));
}

#[test]
fn duplicate_bases_are_rejected() {
    let mut m = CodeBuilder::module("dup");
    emit_class(&mut m, "A", &["object"], class_body("A", vec![], &[]));
    emit_class(&mut m, "B", &["A", "A"], class_body("B", vec![], &[]));
    m.emit(Opcode::LoadNone);
    m.emit(Opcode::ReturnValue);

    let interp = Interpreter::default();
    let globals = interp.new_globals("__main__");
    let err = interp.run(m.build(), &globals).unwrap_err();
    assert!(err.is_instance_of(ExcType::TypeError));
    assert_eq!(err.to_string(), "TypeError: duplicate base class A");
}

#[test]
fn three_argument_type_builds_a_class() {
    // T = type("T", (object,), {"x": "tx"}); T().x == "tx"
    let mut m = CodeBuilder::module("dynamic");
    m.load_name("type");
    m.load_const("T");
    m.load_name("object");
    m.emit_u16(Opcode::BuildTuple, 1);
    m.load_const("x");
    m.load_const("tx");
    m.emit_u16(Opcode::BuildMap, 1);
    m.call(3, 0);
    m.store_name("T");
    emit_instance_attr(&mut m, "T", "x");
    m.load_name("T");
    m.load_attr("__name__");
    m.load_const("T");
    m.compare(CmpOp::Eq);
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    let (_, globals, result) = run_module(m);
    assert_eq!(result, Value::tuple(vec![Value::str("tx"), Value::Bool(true)]));
    assert!(matches!(global(&globals, "T"), Value::Type(_)));
}

/// Binds `code` as a function under `name` inside a class body or module.
fn emit_def(b: &mut CodeBuilder, name: &str, code: Arc<Code>) {
    b.load_const(code);
    b.emit_u16(Opcode::MakeFunction, 0);
    b.store_name(name);
}

/// `name = wrapper(name)`
fn emit_wrap(b: &mut CodeBuilder, name: &str, wrapper: &str) {
    b.load_name(wrapper);
    b.load_name(name);
    b.call(1, 0);
    b.store_name(name);
}

#[test]
fn super_skips_to_the_next_class_in_the_mro() {
    // class A(object):
    //     def who(self): return "A"
    // class B(A):
    //     def who(self): return super(B, self).who() + "B"
    let mut who = CodeBuilder::function("who", &["self"]);
    who.load_global("super");
    who.load_global("B");
    who.load_fast("self");
    who.call(2, 0);
    who.load_attr("who");
    who.call(0, 0);
    who.load_const("B");
    who.emit(Opcode::BinaryAdd);
    who.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("supers");
    emit_class(&mut m, "A", &["object"], class_body("A", vec![("who", returns_const("who", "A"))], &[]));
    emit_class(&mut m, "B", &["A"], class_body("B", vec![("who", who.build())], &[]));
    m.load_name("B");
    m.call(0, 0);
    m.load_attr("who");
    m.call(0, 0);
    m.emit(Opcode::ReturnValue);

    let (_, _, result) = run_module(m);
    assert_eq!(result, Value::str("AB"));
}

#[test]
fn classmethod_and_staticmethod_bind_through_subclasses() {
    // class A(object):
    //     def make(cls): return cls.__name__
    //     make = classmethod(make)
    //     def twice(x): return x + x
    //     twice = staticmethod(twice)
    // class B(A): pass
    // return (A.make(), B.make(), B().make(), A.twice("s"), B().twice("t"))
    let mut make = CodeBuilder::function("make", &["cls"]);
    make.load_fast("cls");
    make.load_attr("__name__");
    make.emit(Opcode::ReturnValue);
    let mut twice = CodeBuilder::function("twice", &["x"]);
    twice.load_fast("x");
    twice.load_fast("x");
    twice.emit(Opcode::BinaryAdd);
    twice.emit(Opcode::ReturnValue);

    let mut body = CodeBuilder::class_body("A");
    emit_def(&mut body, "make", make.build());
    emit_wrap(&mut body, "make", "classmethod");
    emit_def(&mut body, "twice", twice.build());
    emit_wrap(&mut body, "twice", "staticmethod");
    body.emit(Opcode::LoadLocals);
    body.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("binding");
    emit_class(&mut m, "A", &["object"], body.build());
    emit_class(&mut m, "B", &["A"], class_body("B", vec![], &[]));
    for receiver in ["A", "B"] {
        m.load_name(receiver);
        m.load_attr("make");
        m.call(0, 0);
    }
    emit_instance_attr(&mut m, "B", "make");
    m.call(0, 0);
    m.load_name("A");
    m.load_attr("twice");
    m.load_const("s");
    m.call(1, 0);
    emit_instance_attr(&mut m, "B", "twice");
    m.load_const("t");
    m.call(1, 0);
    m.emit_u16(Opcode::BuildTuple, 5);
    m.emit(Opcode::ReturnValue);

    let (_, _, result) = run_module(m);
    assert_eq!(
        result,
        Value::tuple(["A", "B", "B", "ss", "tt"].into_iter().map(Value::str).collect())
    );
}

#[test]
fn slots_reject_undeclared_attributes() {
    // class S(object): __slots__ = "x"
    // s = S(); s.x = "stored"; return s.x
    let mut m = CodeBuilder::module("slots");
    emit_class(&mut m, "S", &["object"], class_body("S", vec![], &[("__slots__", "x")]));
    m.load_name("S");
    m.call(0, 0);
    m.store_name("s");
    m.load_const("stored");
    m.load_name("s");
    m.store_attr("x");
    m.load_name("s");
    m.load_attr("x");
    m.emit(Opcode::ReturnValue);

    let (interp, globals, result) = run_module(m);
    assert_eq!(result, Value::str("stored"));

    // s.z = "nope"
    let mut m = CodeBuilder::module("slots");
    m.load_const("nope");
    m.load_name("s");
    m.store_attr("z");
    m.emit(Opcode::LoadNone);
    m.emit(Opcode::ReturnValue);
    let err = interp.run(m.build(), &globals).unwrap_err();
    assert!(err.is_instance_of(ExcType::AttributeError));
    assert_eq!(err.to_string(), "AttributeError: 'S' object has no attribute 'z'");
}

#[test]
fn metaclass_in_the_class_body_wins() {
    // class M:
    //     __metaclass__ = type
    //     x = "m"
    let mut body = CodeBuilder::class_body("M");
    body.load_name("type");
    body.store_name("__metaclass__");
    body.load_const("m");
    body.store_name("x");
    body.emit(Opcode::LoadLocals);
    body.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("meta");
    emit_class(&mut m, "M", &[], body.build());
    emit_instance_attr(&mut m, "M", "x");
    m.emit(Opcode::ReturnValue);

    let (_, globals, result) = run_module(m);
    assert_eq!(result, Value::str("m"));
    let Value::Type(t) = global(&globals, "M") else {
        panic!("__metaclass__ = type should give a new-style class");
    };
    let mro: Vec<String> = t.mro().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(mro, ["M", "object"]);
}

#[test]
fn classic_bases_can_be_rebound() {
    // class A: x = "A"    class B: x = "B"    class C(A): pass
    // c = C()
    let mut m = CodeBuilder::module("rebase");
    emit_class(&mut m, "A", &[], class_body("A", vec![], &[("x", "A")]));
    emit_class(&mut m, "B", &[], class_body("B", vec![], &[("x", "B")]));
    emit_class(&mut m, "C", &["A"], class_body("C", vec![], &[]));
    m.load_name("C");
    m.call(0, 0);
    m.store_name("c");
    m.load_name("c");
    m.load_attr("x");
    m.emit(Opcode::ReturnValue);

    let (interp, globals, result) = run_module(m);
    assert_eq!(result, Value::str("A"));

    let setattr = interp.builtins().read().get_str("setattr").unwrap();
    let rebind = |class: &str, bases: Vec<Value>| {
        interp.call(
            &setattr,
            vec![global(&globals, class), Value::str("__bases__"), Value::tuple(bases)],
            vec![],
        )
    };

    // setattr(C, "__bases__", (B,))
    let mut m = CodeBuilder::module("rebase");
    m.load_name("setattr");
    m.load_name("C");
    m.load_const("__bases__");
    m.load_name("B");
    m.emit_u16(Opcode::BuildTuple, 1);
    m.call(3, 0);
    m.emit(Opcode::PopTop);
    m.load_name("c");
    m.load_attr("x");
    m.emit(Opcode::ReturnValue);
    assert_eq!(
        interp.run(m.build(), &globals).unwrap(),
        Value::str("B"),
        "existing instances see the new bases"
    );

    let err = rebind("B", vec![global(&globals, "C")]).unwrap_err();
    assert_eq!(err.to_string(), "ValueError: a __bases__ item causes an inheritance cycle");
    let err = rebind("C", vec![Value::Int(1)]).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: __bases__ items must be classes");
}

#[test]
fn hooks_added_to_an_ancestor_reach_existing_subclasses() {
    // class A(object): pass
    // class B(A): pass
    // b = B()
    let mut m = CodeBuilder::module("late_hooks");
    emit_class(&mut m, "A", &["object"], class_body("A", vec![], &[]));
    emit_class(&mut m, "B", &["A"], class_body("B", vec![], &[]));
    m.load_name("B");
    m.call(0, 0);
    m.store_name("b");
    m.emit(Opcode::LoadNone);
    m.emit(Opcode::ReturnValue);
    let (interp, globals, _) = run_module(m);

    let builtin = |name: &str| interp.builtins().read().get_str(name).unwrap();
    let b = global(&globals, "b");
    assert_eq!(
        interp.call(&builtin("callable"), vec![b.clone()], vec![]).unwrap(),
        Value::Bool(false)
    );
    let err = interp
        .call(&builtin("getattr"), vec![b.clone(), Value::str("missing")], vec![])
        .unwrap_err();
    assert_eq!(err.to_string(), "AttributeError: 'B' object has no attribute 'missing'");

    // def call(self): return "called"
    // def lookup(self, name): return name + "?"
    // A.__call__ = call; A.__getattr__ = lookup
    // return (b(), b.missing)
    let mut lookup = CodeBuilder::function("lookup", &["self", "name"]);
    lookup.load_fast("name");
    lookup.load_const("?");
    lookup.emit(Opcode::BinaryAdd);
    lookup.emit(Opcode::ReturnValue);

    let mut m = CodeBuilder::module("late_hooks");
    emit_def(&mut m, "call", returns_const("call", "called"));
    emit_def(&mut m, "lookup", lookup.build());
    for (hook, function) in [("__call__", "call"), ("__getattr__", "lookup")] {
        m.load_name(function);
        m.load_name("A");
        m.store_attr(hook);
    }
    m.load_name("b");
    m.call(0, 0);
    m.load_name("b");
    m.load_attr("missing");
    m.emit_u16(Opcode::BuildTuple, 2);
    m.emit(Opcode::ReturnValue);

    let result = interp.run(m.build(), &globals).unwrap();
    assert_eq!(result, Value::tuple(vec![Value::str("called"), Value::str("missing?")]));
    assert_eq!(
        interp.call(&builtin("callable"), vec![b], vec![]).unwrap(),
        Value::Bool(true)
    );
}
