//! Generators: frames of generator-flagged code driven one yield at a time.
//!
//! Calling a generator function binds the arguments into a fresh frame and wraps it in a
//! [`Generator`] without running it. Every drive re-enters the interpreter loop with the
//! frame's saved value stack, block stack and instruction pointer, and runs until the next
//! `yield`, a return or an exception. A generator that returned or raised is finished;
//! driving it again raises `StopIteration` every time.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    bytecode::{FrameExit, Resume, Vm},
    exception::{ExcType, PyException, RunResult},
    frame::FrameRef,
    value::Value,
};

pub type GeneratorRef = Arc<Generator>;

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created but never driven.
    New,
    /// Currently executing; re-entrant drives are rejected.
    Running,
    /// Stopped at a `yield`.
    Suspended,
    /// Returned or raised.
    Finished,
}

/// Outcome of a single drive.
#[derive(Debug)]
pub(crate) enum GenStep {
    Yielded(Value),
    Returned(Value),
}

#[derive(Debug)]
pub struct Generator {
    frame: FrameRef,
    state: Mutex<GeneratorState>,
}

impl Generator {
    #[must_use]
    pub fn new(frame: FrameRef) -> GeneratorRef {
        Arc::new(Self {
            frame,
            state: Mutex::new(GeneratorState::New),
        })
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    #[must_use]
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.frame.code().name()
    }

    pub(crate) fn resume(&self, vm: &mut Vm, resume: Resume) -> RunResult<GenStep> {
        let resume = {
            let mut state = self.state.lock();
            let resume = match *state {
                GeneratorState::Running => {
                    return Err(ExcType::value_error("generator already executing"));
                }
                GeneratorState::Finished => {
                    return match resume {
                        Resume::Throw(err) => Err(err),
                        _ => Ok(GenStep::Returned(Value::None)),
                    };
                }
                GeneratorState::New => match resume {
                    Resume::Send(value) if !value.is_none() => {
                        return Err(ExcType::type_error(
                            "can't send non-None value to a just-started generator",
                        ));
                    }
                    Resume::Throw(err) => {
                        *state = GeneratorState::Finished;
                        return Err(err);
                    }
                    _ => Resume::Start,
                },
                GeneratorState::Suspended => resume,
            };
            *state = GeneratorState::Running;
            resume
        };
        let result = vm.run_frame(&self.frame, resume);
        let mut state = self.state.lock();
        match result {
            Ok(FrameExit::Yield(value)) => {
                *state = GeneratorState::Suspended;
                Ok(GenStep::Yielded(value))
            }
            Ok(FrameExit::Return(value)) => {
                *state = GeneratorState::Finished;
                Ok(GenStep::Returned(value))
            }
            Err(err) => {
                *state = GeneratorState::Finished;
                Err(err)
            }
        }
    }

    /// `gen.send(value)`: resumes with `value` as the result of the pending `yield`.
    pub fn send(&self, vm: &mut Vm, value: Value) -> RunResult<Value> {
        match self.resume(vm, Resume::Send(value))? {
            GenStep::Yielded(value) => Ok(value),
            GenStep::Returned(value) => Err(PyException::stop_iteration(value).into()),
        }
    }

    /// `gen.next()`
    pub fn next(&self, vm: &mut Vm) -> RunResult<Value> {
        self.send(vm, Value::None)
    }

    /// Like [`Generator::next`] but reports exhaustion as `None` instead of `StopIteration`.
    pub(crate) fn next_item(&self, vm: &mut Vm) -> RunResult<Option<Value>> {
        match self.resume(vm, Resume::Send(Value::None))? {
            GenStep::Yielded(value) => Ok(Some(value)),
            GenStep::Returned(_) => Ok(None),
        }
    }

    /// `gen.throw(type, value, tb)`: raises the exception at the suspended `yield`.
    pub fn throw(&self, vm: &mut Vm, exc: PyException) -> RunResult<Value> {
        match self.resume(vm, Resume::Throw(exc.into()))? {
            GenStep::Yielded(value) => Ok(value),
            GenStep::Returned(value) => Err(PyException::stop_iteration(value).into()),
        }
    }

    /// `gen.close()`: throws `GeneratorExit` and expects the generator to finish.
    pub fn close(&self, vm: &mut Vm) -> RunResult<()> {
        {
            let mut state = self.state.lock();
            if matches!(*state, GeneratorState::New | GeneratorState::Finished) {
                *state = GeneratorState::Finished;
                return Ok(());
            }
        }
        let exit = PyException::new(Value::Type(ExcType::GeneratorExit.type_ref()), Value::None, None);
        match self.resume(vm, Resume::Throw(exit.into())) {
            Ok(GenStep::Yielded(_)) => Err(ExcType::RuntimeError.error("generator ignored GeneratorExit")),
            Ok(GenStep::Returned(_)) => Ok(()),
            Err(err) if err.matches_type(ExcType::GeneratorExit) || err.matches_type(ExcType::StopIteration) => {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
