//! Function signatures and the argument binding algorithm.
//!
//! Binding maps the positional values and keyword pairs of a call onto the parameter slots of
//! a code object, producing the initial fast-locals vector of the new frame.
//!
//! # Slot layout
//!
//! ```text
//! [params...][*args?][**kwargs?][other locals...]
//! ```

use crate::{
    args::ArgValues,
    bytecode::Code,
    exception::{ExcType, RunError, RunResult, plural_arguments},
    types::Dict,
    value::{Str, Value},
};

/// Parameter structure of a code object.
///
/// Default values are not part of the signature; they live on the function object and
/// cover the trailing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature<'a> {
    name: &'a str,
    params: &'a [String],
    var_args: Option<&'a str>,
    var_kwargs: Option<&'a str>,
    slots: usize,
}

impl<'a> Signature<'a> {
    #[must_use]
    pub fn from_code(code: &'a Code) -> Self {
        let params = &code.varnames()[..code.argcount()];
        let mut next = code.argcount();
        let var_args = code.has_varargs().then(|| {
            next += 1;
            code.varnames()[next - 1].as_str()
        });
        let var_kwargs = code.has_varkwargs().then(|| code.varnames()[next].as_str());
        Self {
            name: code.name(),
            params,
            var_args,
            var_kwargs,
            slots: code.varnames().len(),
        }
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Binds call arguments to parameter slots.
    ///
    /// Surplus positional values go to `*args` when present. Keywords fill the named
    /// parameter or land in `**kwargs`. Missing trailing parameters take their defaults;
    /// every remaining hole is an error. The error message distinguishes "exactly",
    /// "at least" and "at most", and whether a duplicate came by position or by name.
    pub fn bind(&self, defaults: &[Value], args: ArgValues) -> RunResult<Vec<Option<Value>>> {
        let ArgValues { args: positional, kwargs } = args;
        let argcount = self.params.len();
        let given = positional.len();
        let has_kwargs = !kwargs.is_empty();

        if argcount == 0 && self.var_args.is_none() && self.var_kwargs.is_none() && given + kwargs.len() > 0 {
            return Err(ExcType::type_error_no_args(self.name, given + kwargs.len()));
        }
        if given > argcount && self.var_args.is_none() {
            let bound = if defaults.is_empty() { "exactly" } else { "at most" };
            return Err(self.arity_error(bound, argcount, given, has_kwargs));
        }

        let mut fast: Vec<Option<Value>> = vec![None; self.slots];
        let mut positional = positional.into_iter();
        for slot in fast.iter_mut().take(argcount.min(given)) {
            *slot = positional.next();
        }
        let mut next_slot = argcount;
        if self.var_args.is_some() {
            fast[next_slot] = Some(Value::tuple(positional.collect()));
            next_slot += 1;
        }

        let mut extra = self.var_kwargs.map(|_| Dict::new());
        for (key, value) in kwargs {
            match self.params.iter().position(|p| p.as_str() == &*key) {
                Some(index) => {
                    if fast[index].is_some() {
                        return Err(if index < given {
                            ExcType::type_error(format!(
                                "{}() got multiple values for argument '{key}' (given by position and by name)",
                                self.name
                            ))
                        } else {
                            self.duplicate_keyword(&key)
                        });
                    }
                    fast[index] = Some(value);
                }
                None => match &mut extra {
                    Some(dict) => {
                        if dict.set_str(&key, value).is_some() {
                            return Err(self.duplicate_keyword(&key));
                        }
                    }
                    None => {
                        return Err(ExcType::type_error(format!(
                            "{}() got an unexpected keyword argument '{key}'",
                            self.name
                        )));
                    }
                },
            }
        }
        if let Some(dict) = extra {
            fast[next_slot] = Some(Value::Dict(dict.into_ref()));
        }

        if given < argcount {
            let first_default = argcount.saturating_sub(defaults.len());
            if fast[..first_default].iter().any(Option::is_none) {
                let provided = fast[..argcount].iter().filter(|s| s.is_some()).count();
                let bound = if self.var_args.is_some() || !defaults.is_empty() {
                    "at least"
                } else {
                    "exactly"
                };
                return Err(self.arity_error(bound, first_default, provided, has_kwargs));
            }
            let skipped = defaults.len().saturating_sub(argcount);
            for (slot, default) in fast[first_default..argcount].iter_mut().zip(&defaults[skipped..]) {
                if slot.is_none() {
                    *slot = Some(default.clone());
                }
            }
        }
        Ok(fast)
    }

    fn arity_error(&self, bound: &str, expected: usize, given: usize, has_kwargs: bool) -> RunError {
        let kind = if has_kwargs { "non-keyword " } else { "" };
        ExcType::type_error(format!(
            "{}() takes {bound} {expected} {kind}{} ({given} given)",
            self.name,
            plural_arguments(expected)
        ))
    }

    fn duplicate_keyword(&self, key: &Str) -> RunError {
        ExcType::type_error(format!(
            "{}() got multiple values for keyword argument '{key}'",
            self.name
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::{CodeBuilder, Opcode};

    fn code(params: &[&str], var_args: bool, var_kwargs: bool) -> Arc<Code> {
        let mut builder = CodeBuilder::function("f", params);
        if var_args {
            builder = builder.with_varargs("args");
        }
        if var_kwargs {
            builder = builder.with_varkwargs("kw");
        }
        builder.local("tmp");
        builder.emit(Opcode::LoadLocals);
        builder.emit(Opcode::ReturnValue);
        builder.build()
    }

    fn message(err: RunError) -> String {
        err.to_string()
    }

    fn kw(name: &str, value: i64) -> (Str, Value) {
        (Arc::from(name), Value::Int(value))
    }

    #[test]
    fn positional_and_defaults() {
        let code = code(&["a", "b", "c"], false, false);
        let sig = Signature::from_code(&code);
        let fast = sig
            .bind(&[Value::Int(20), Value::Int(30)], ArgValues::new(vec![Value::Int(1)]))
            .unwrap();
        assert_eq!(fast, vec![Some(Value::Int(1)), Some(Value::Int(20)), Some(Value::Int(30)), None]);
    }

    #[test]
    fn keywords_fill_named_slots() {
        let code = code(&["a", "b"], false, false);
        let sig = Signature::from_code(&code);
        let fast = sig
            .bind(&[], ArgValues::with_kwargs(vec![], vec![kw("b", 2), kw("a", 1)]))
            .unwrap();
        assert_eq!(fast[..2], [Some(Value::Int(1)), Some(Value::Int(2))]);
    }

    #[test]
    fn surplus_goes_to_varargs_and_varkwargs() {
        let code = code(&["a"], true, true);
        let sig = Signature::from_code(&code);
        let fast = sig
            .bind(
                &[],
                ArgValues::with_kwargs(vec![Value::Int(1), Value::Int(2), Value::Int(3)], vec![kw("z", 9)]),
            )
            .unwrap();
        assert_eq!(fast[0], Some(Value::Int(1)));
        assert_eq!(fast[1], Some(Value::tuple(vec![Value::Int(2), Value::Int(3)])));
        let Some(Value::Dict(extra)) = &fast[2] else {
            panic!("expected kwargs dict");
        };
        assert_eq!(extra.read().get_str("z"), Some(Value::Int(9)));
    }

    #[test]
    fn too_many_positional() {
        let code = code(&["a", "b"], false, false);
        let sig = Signature::from_code(&code);
        let err = sig
            .bind(&[], ArgValues::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
            .unwrap_err();
        assert_eq!(message(err), "TypeError: f() takes exactly 2 arguments (3 given)");

        let err = sig
            .bind(&[Value::None], ArgValues::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
            .unwrap_err();
        assert_eq!(message(err), "TypeError: f() takes at most 2 arguments (3 given)");
    }

    #[test]
    fn missing_arguments() {
        let fixed = code(&["a", "b"], false, false);
        let sig = Signature::from_code(&fixed);
        let err = sig.bind(&[], ArgValues::new(vec![Value::Int(1)])).unwrap_err();
        assert_eq!(message(err), "TypeError: f() takes exactly 2 arguments (1 given)");

        let err = sig
            .bind(&[], ArgValues::with_kwargs(vec![], vec![kw("b", 1)]))
            .unwrap_err();
        assert_eq!(message(err), "TypeError: f() takes exactly 2 non-keyword arguments (1 given)");

        let varargs = code(&["a", "b"], true, false);
        let sig = Signature::from_code(&varargs);
        let err = sig.bind(&[], ArgValues::new(vec![])).unwrap_err();
        assert_eq!(message(err), "TypeError: f() takes at least 2 arguments (0 given)");
    }

    #[test]
    fn duplicate_binding_messages() {
        let code = code(&["a", "b"], false, false);
        let sig = Signature::from_code(&code);
        let err = sig
            .bind(&[], ArgValues::with_kwargs(vec![Value::Int(1)], vec![kw("a", 2)]))
            .unwrap_err();
        assert_eq!(
            message(err),
            "TypeError: f() got multiple values for argument 'a' (given by position and by name)"
        );

        let err = sig
            .bind(&[], ArgValues::with_kwargs(vec![], vec![kw("b", 1), kw("b", 2)]))
            .unwrap_err();
        assert_eq!(message(err), "TypeError: f() got multiple values for keyword argument 'b'");
    }

    #[test]
    fn unexpected_keyword() {
        let code = code(&["a"], false, false);
        let sig = Signature::from_code(&code);
        let err = sig
            .bind(&[], ArgValues::with_kwargs(vec![Value::Int(1)], vec![kw("q", 1)]))
            .unwrap_err();
        assert_eq!(message(err), "TypeError: f() got an unexpected keyword argument 'q'");
    }

    #[test]
    fn zero_parameter_function() {
        let code = code(&[], false, false);
        let sig = Signature::from_code(&code);
        let err = sig.bind(&[], ArgValues::new(vec![Value::Int(1)])).unwrap_err();
        assert_eq!(message(err), "TypeError: f() takes no arguments (1 given)");
    }
}
