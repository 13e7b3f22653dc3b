//! Host class reflection.
//!
//! A host class is reflected once per description. Methods become builtin callables that adapt
//! their arguments to the declared [`HostKind`]s, choosing among overloads by arity and then
//! by the first signature the arguments adapt to. Fields and bean properties become data
//! descriptors.
//!
//! Bean properties follow the usual naming rules: `getX()` with a non-void return and
//! `isX()` returning `bool` are getters, `setX(v)` returning void is a setter, and `X` is
//! decapitalized unless it starts with two capitals (`getURL` gives `URL`). A method or field
//! already named like the property wins over it, and a setter whose parameter kind differs
//! from the getter's return kind is dropped.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, LazyLock},
};

use ahash::AHashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{
    ConversionError, ForeignObject, HostClass, HostError, HostFieldGet, HostFieldSet, HostFn, HostKind, HostMethod,
    HostObject, HostValue, adapt, wrap,
};
use crate::{
    args::ArgValues,
    bytecode::Vm,
    descriptor::{Getter, NativeDescriptor, Setter, StaticMethod},
    exception::{ExcType, RunError, RunResult},
    function::BuiltinFunction,
    types::{Dict, PyType, TypeRef, builtin_types},
    value::Value,
};

/// Reflected types keyed by the address of their host class description. The type keeps
/// the description alive, so an address is never reused while its entry exists.
static HOST_TYPES: LazyLock<RwLock<AHashMap<usize, TypeRef>>> = LazyLock::new(RwLock::default);

fn class_key(class: &Arc<dyn HostClass>) -> usize {
    Arc::as_ptr(class).cast::<()>() as usize
}

/// Returns the type reflecting `class`, reflecting it on first use.
///
/// Registration is by identity: two distinct descriptions sharing a name get two types.
pub fn register_host_class(class: Arc<dyn HostClass>) -> TypeRef {
    if let Some(t) = registered_class(&class) {
        return t;
    }
    let key = class_key(&class);
    let mut registry = HOST_TYPES.write();
    // Another thread may have won the race between the two locks.
    if let Some(t) = registry.get(&key) {
        return t.clone();
    }
    let t = reflect_type(class);
    registry.insert(key, t.clone());
    t
}

/// The already reflected type for `class`.
#[must_use]
pub fn registered_class(class: &Arc<dyn HostClass>) -> Option<TypeRef> {
    HOST_TYPES.read().get(&class_key(class)).cloned()
}

/// Builds a type for `class` without registering it.
pub fn reflect_type(class: Arc<dyn HostClass>) -> TypeRef {
    let class_name: Arc<str> = Arc::from(class.name());
    let mut dict = Dict::new();

    let mut grouped: IndexMap<String, Vec<HostMethod>> = IndexMap::new();
    for method in class.methods() {
        grouped.entry(method.name.clone()).or_default().push(method);
    }
    let mut beans = BeanCollector::default();
    for (name, overloads) in &grouped {
        for method in overloads {
            beans.consider(method);
        }
        dict.set_str(name, method_callable(&class_name, name, overloads));
    }

    let fields = class.fields();
    for field in &fields {
        let descr = field_descriptor(&class_name, &field.name, field.kind, field.get.clone(), field.set.clone());
        dict.set_str(&field.name, descr);
    }

    let mut property_count = 0;
    for (name, property) in beans.finish() {
        if dict.contains_str(&name) {
            continue;
        }
        dict.set_str(&name, property.into_descriptor(&class_name, &name));
        property_count += 1;
    }

    dict.set_str("__new__", constructor(&class));
    tracing::debug!(
        class = %class_name,
        methods = grouped.len(),
        fields = fields.len(),
        properties = property_count,
        "reflected host class"
    );
    PyType::new_host(&class_name, &builtin_types().object, dict, class)
}

/// Picks the overload whose arity matches and whose parameters `args` adapt to.
fn select_overload<'a>(
    name: &str,
    signatures: impl IntoIterator<Item = &'a [HostKind]>,
    args: &[Value],
) -> RunResult<(usize, Vec<HostValue>)> {
    let mut first_error = None;
    let mut arities = Vec::new();
    for (index, params) in signatures.into_iter().enumerate() {
        arities.push(params.len());
        if params.len() != args.len() {
            continue;
        }
        match args
            .iter()
            .zip(params)
            .map(|(arg, kind)| adapt(arg, *kind))
            .collect::<Result<Vec<_>, ConversionError>>()
        {
            Ok(adapted) => return Ok((index, adapted)),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(RunError::from(err));
    }
    Err(match arities.as_slice() {
        [single] => ExcType::type_error_arg_count(name, *single, args.len()),
        _ => ExcType::type_error(format!(
            "no overload of {name}() takes {} {}",
            args.len(),
            crate::exception::plural_arguments(args.len())
        )),
    })
}

/// Runs host code, turning host errors and panics into interpreter exceptions.
///
/// Host code may re-enter the interpreter; it then continues `vm`'s call chain.
fn guarded<T>(vm: &mut Vm, class: &str, member: &str, call: impl FnOnce() -> Result<T, HostError>) -> RunResult<T> {
    match vm.call_host(|| panic::catch_unwind(AssertUnwindSafe(call))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(host_error(err)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(class, member, panic = %message, "host code panicked");
            Err(host_error(HostError::Panicked(message)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn host_error(err: HostError) -> RunError {
    match err {
        HostError::Conversion(err) => RunError::from(err),
        HostError::Raised(exc) => RunError::from(exc),
        other => ExcType::InteropError.error(other),
    }
}

fn receiver_object<'a>(class: &str, member: &str, receiver: &'a Value) -> RunResult<&'a HostObject> {
    match receiver {
        Value::Foreign(obj) if obj.host().class().name() == class => Ok(obj.host()),
        other => Err(ExcType::type_error(format!(
            "descriptor '{member}' requires a '{class}' object but received a '{}'",
            other.type_name()
        ))),
    }
}

fn method_callable(class: &Arc<str>, name: &str, overloads: &[HostMethod]) -> Value {
    let is_static = overloads.iter().all(|m| m.is_static);
    let signatures: Vec<(Vec<HostKind>, bool, HostFn)> = overloads
        .iter()
        .map(|m| (m.params.clone(), m.is_static, m.invoke.clone()))
        .collect();
    let class = class.clone();
    let method_name: Arc<str> = Arc::from(name);
    let call = move |vm: &mut Vm, args: ArgValues| -> RunResult<Value> {
        let (receiver, rest) = if is_static {
            (None, args)
        } else {
            let (receiver, rest) = args.split_self(&method_name)?;
            (Some(receiver), rest)
        };
        if !rest.kwargs.is_empty() {
            return Err(ExcType::type_error(format!("{method_name}() takes no keyword arguments")));
        }
        let handle = match &receiver {
            Some(receiver) => Some(receiver_object(&class, &method_name, receiver)?.handle()),
            None => None,
        };
        let (index, host_args) = select_overload(
            &method_name,
            signatures.iter().map(|(params, _, _)| params.as_slice()),
            &rest.args,
        )?;
        let (_, overload_static, invoke) = &signatures[index];
        let handle = if *overload_static { None } else { handle };
        let result = guarded(vm, &class, &method_name, || invoke(handle, &host_args))?;
        Ok(wrap(result))
    };
    if is_static {
        StaticMethod::new(BuiltinFunction::function(name, call))
    } else {
        BuiltinFunction::method(name, call)
    }
}

fn field_descriptor(
    class: &Arc<str>,
    name: &str,
    kind: HostKind,
    get: HostFieldGet,
    set: Option<HostFieldSet>,
) -> Value {
    let owner = class.clone();
    let member: Arc<str> = Arc::from(name);
    let getter: Getter = {
        let (owner, member) = (owner.clone(), member.clone());
        Arc::new(move |vm: &mut Vm, obj: &Value| {
            let host = receiver_object(&owner, &member, obj)?;
            let value = guarded(vm, &owner, &member, || Ok(get(host.handle())))?;
            Ok(wrap(value))
        })
    };
    let setter: Option<Setter> = set.map(|set| -> Setter {
        let (owner, member) = (owner.clone(), member.clone());
        Arc::new(move |vm: &mut Vm, obj: &Value, value: Option<Value>| {
            let host = receiver_object(&owner, &member, obj)?;
            let Some(value) = value else {
                return Err(ExcType::type_error(format!("can't delete host field '{member}'")));
            };
            let value = adapt(&value, kind)?;
            guarded(vm, &owner, &member, || set(host.handle(), value))
        })
    });
    NativeDescriptor::from_accessors(class, name, getter, setter)
}

/// `__new__` for a host class, dispatching among its constructors.
fn constructor(class: &Arc<dyn HostClass>) -> Value {
    let class = class.clone();
    let ctors: Vec<_> = class.constructors().into_iter().map(|c| (c.params, c.invoke)).collect();
    let call = move |vm: &mut Vm, args: ArgValues| -> RunResult<Value> {
        let (cls, rest) = args.split_self("__new__")?;
        let Value::Type(cls) = cls else {
            return Err(ExcType::type_error("host __new__ requires a type"));
        };
        if ctors.is_empty() {
            return Err(ExcType::type_error(format!("can't instantiate host class '{}'", class.name())));
        }
        if !rest.kwargs.is_empty() {
            return Err(ExcType::type_error(format!("{}() takes no keyword arguments", class.name())));
        }
        let (index, host_args) = select_overload(class.name(), ctors.iter().map(|(p, _)| p.as_slice()), &rest.args)?;
        let invoke = &ctors[index].1;
        let handle = guarded(vm, class.name(), "__init__", || invoke(&host_args))?;
        Ok(Value::Foreign(ForeignObject::new(cls, HostObject::new(class.clone(), handle))))
    };
    StaticMethod::new(BuiltinFunction::function("__new__", call))
}

/// `X` in `getX`, decapitalized, or `None` when `rest` cannot name a property.
fn property_name(rest: &str) -> Option<String> {
    let mut chars = rest.chars();
    let first = chars.next()?;
    if first.is_lowercase() {
        return None;
    }
    if chars.next().is_some_and(char::is_uppercase) && first.is_uppercase() {
        return Some(rest.to_owned());
    }
    Some(first.to_lowercase().chain(rest[first.len_utf8()..].chars()).collect())
}

#[derive(Default)]
struct BeanProperty {
    getter: Option<(HostKind, HostFn)>,
    /// Every `setX` overload; one is kept once the getter is known.
    setters: Vec<(HostKind, HostFn)>,
}

#[derive(Default)]
struct BeanCollector {
    properties: IndexMap<String, BeanProperty>,
}

impl BeanCollector {
    fn consider(&mut self, method: &HostMethod) {
        if method.is_static {
            return;
        }
        let name = method.name.as_str();
        if let Some(rest) = name.strip_prefix("get")
            && method.params.is_empty()
            && method.returns != HostKind::None
            && let Some(prop) = property_name(rest)
        {
            let entry = self.properties.entry(prop).or_default();
            // `isX` takes precedence over `getX` for booleans.
            if entry.getter.is_none() {
                entry.getter = Some((method.returns, method.invoke.clone()));
            }
        } else if let Some(rest) = name.strip_prefix("is")
            && method.params.is_empty()
            && method.returns == HostKind::Bool
            && let Some(prop) = property_name(rest)
        {
            let entry = self.properties.entry(prop).or_default();
            entry.getter = Some((method.returns, method.invoke.clone()));
        } else if let Some(rest) = name.strip_prefix("set")
            && let [param] = method.params.as_slice()
            && method.returns == HostKind::None
            && let Some(prop) = property_name(rest)
        {
            let entry = self.properties.entry(prop).or_default();
            entry.setters.push((*param, method.invoke.clone()));
        }
    }

    fn finish(self) -> impl Iterator<Item = (String, ResolvedProperty)> {
        self.properties.into_iter().map(|(name, prop)| {
            let setter = match &prop.getter {
                Some((kind, _)) => prop.setters.into_iter().find(|(param, _)| param == kind),
                None => prop.setters.into_iter().next(),
            };
            (
                name,
                ResolvedProperty {
                    getter: prop.getter,
                    setter,
                },
            )
        })
    }
}

struct ResolvedProperty {
    getter: Option<(HostKind, HostFn)>,
    setter: Option<(HostKind, HostFn)>,
}

impl ResolvedProperty {
    fn into_descriptor(self, class: &Arc<str>, name: &str) -> Value {
        let member: Arc<str> = Arc::from(name);
        let getter: Getter = match self.getter {
            Some((_, invoke)) => {
                let (owner, member) = (class.clone(), member.clone());
                Arc::new(move |vm: &mut Vm, obj: &Value| {
                    let host = receiver_object(&owner, &member, obj)?;
                    let value = guarded(vm, &owner, &member, || invoke(Some(host.handle()), &[]))?;
                    Ok(wrap(value))
                })
            }
            None => {
                let member = member.clone();
                Arc::new(move |_: &mut Vm, _: &Value| {
                    Err(ExcType::AttributeError.error(format!("'{member}' is a write-only attribute")))
                })
            }
        };
        let setter = self.setter.map(|(kind, invoke)| -> Setter {
            let (owner, member) = (class.clone(), member.clone());
            Arc::new(move |vm: &mut Vm, obj: &Value, value: Option<Value>| {
                let host = receiver_object(&owner, &member, obj)?;
                let Some(value) = value else {
                    return Err(ExcType::type_error(format!("can't delete bean property '{member}'")));
                };
                let value = adapt(&value, kind)?;
                guarded(vm, &owner, &member, || invoke(Some(host.handle()), &[value]).map(drop))
            })
        });
        NativeDescriptor::from_accessors(class, name, getter, setter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names_decapitalize() {
        assert_eq!(property_name("Name").as_deref(), Some("name"));
        assert_eq!(property_name("URL").as_deref(), Some("URL"));
        assert_eq!(property_name("X").as_deref(), Some("x"));
        assert_eq!(property_name("ter"), None);
        assert_eq!(property_name(""), None);
    }

    #[test]
    fn overloads_are_chosen_by_arity_then_kind() {
        let sigs: [&[HostKind]; 3] = [&[HostKind::Int], &[HostKind::Str], &[HostKind::Int, HostKind::Int]];
        let (index, _) = select_overload("f", sigs, &[Value::str("a")]).unwrap();
        assert_eq!(index, 1);
        let (index, _) = select_overload("f", sigs, &[Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(index, 2);
        let err = select_overload("f", sigs, &[]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: no overload of f() takes 0 arguments");
    }

    #[test]
    fn panics_become_interop_errors() {
        let mut vm = Vm::new(&crate::Interpreter::default());
        let err = guarded::<()>(&mut vm, "Box", "open", || panic!("lid stuck")).unwrap_err();
        assert_eq!(err.to_string(), "InteropError: host code panicked: lid stuck");
    }
}
