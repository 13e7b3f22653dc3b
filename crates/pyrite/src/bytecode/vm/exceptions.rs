//! `RAISE_VARARGS` and `END_FINALLY`.

use super::{Unwind, Vm, stack_underflow};
use crate::{
    exception::{ExcType, PyException, RunError, RunResult},
    frame::{FrameState, Why},
    value::Value,
};

impl Vm {
    /// Builds the exception raised by `raise`, `raise T`, `raise T, V` or `raise T, V, TB`.
    ///
    /// A bare `raise` re-raises the handled exception with its traceback untouched; every
    /// other form gets the current frame added to its traceback by the unwinder.
    pub(super) fn raise_varargs(&mut self, state: &mut FrameState, argc: u8) -> RunResult<Unwind> {
        let (typ, value, traceback) = match argc {
            0 => {
                let exc = PyException::do_raise(self, Value::None, Value::None, Value::None)?;
                return Ok(Unwind::Exception(exc.into(), false));
            }
            1 => (state.pop().ok_or_else(stack_underflow)?, Value::None, Value::None),
            2 => {
                let value = state.pop().ok_or_else(stack_underflow)?;
                (state.pop().ok_or_else(stack_underflow)?, value, Value::None)
            }
            3 => {
                let traceback = state.pop().ok_or_else(stack_underflow)?;
                let value = state.pop().ok_or_else(stack_underflow)?;
                (state.pop().ok_or_else(stack_underflow)?, value, traceback)
            }
            n => return Err(RunError::internal(format!("RAISE_VARARGS with {n} arguments"))),
        };
        let exc = PyException::do_raise(self, typ, value, traceback)?;
        Ok(Unwind::Exception(exc.into(), true))
    }

    /// Finishes a `finally` clause or an `except` clause that did not match.
    ///
    /// TOS says why the block ran: `None` for normal completion, an unwind marker for a
    /// pending `return`/`break`/`continue`, or an exception class followed by its value and
    /// traceback. The pending action resumes; an exception is re-raised as it was.
    pub(super) fn end_finally(&mut self, state: &mut FrameState) -> RunResult<Option<Unwind>> {
        match state.pop().ok_or_else(stack_underflow)? {
            Value::None => Ok(None),
            Value::Marker(Why::Return) => {
                let value = state.pop().ok_or_else(stack_underflow)?;
                Ok(Some(Unwind::Return(value)))
            }
            Value::Marker(Why::Break) => Ok(Some(Unwind::Break)),
            Value::Marker(Why::Continue) => match state.pop().ok_or_else(stack_underflow)? {
                Value::Int(target) => {
                    let target = usize::try_from(target).map_err(|_| RunError::internal("negative continue target"))?;
                    Ok(Some(Unwind::Continue(target)))
                }
                _ => Err(RunError::internal("continue marker without a target")),
            },
            typ @ (Value::Class(_) | Value::Type(_)) => {
                let value = state.pop().ok_or_else(stack_underflow)?;
                let traceback = match state.pop().ok_or_else(stack_underflow)? {
                    Value::Traceback(tb) => Some(tb),
                    _ => None,
                };
                let exc = PyException::new(typ, value, traceback);
                Ok(Some(Unwind::Exception(exc.into(), false)))
            }
            other => Err(ExcType::SystemError.error(format!(
                "'finally' pops bad exception of type '{}'",
                other.type_name()
            ))),
        }
    }
}
