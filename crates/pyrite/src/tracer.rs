//! Trace and profile hooks.
//!
//! A [`TraceHook`] observes frame execution: entering a frame, reaching a new source line,
//! an exception passing through a frame and leaving a frame. Hooks are installed on a
//! [`Vm`](crate::bytecode::Vm) at runtime with `set_trace` (all events) or `set_profile`
//! (call and return only) and are shared, so every method takes `&self`.
//!
//! | Hook | Purpose |
//! |------|---------|
//! | [`LogTracer`] | Forwards events to `tracing` at trace level |
//! | [`RecordingTracer`] | Records events for assertions and post-mortem inspection |
//!
//! Hooks fire even when the frame faults: `on_exception` for every frame the exception
//! passes through and `on_return` with no value when it leaves the frame.

use std::fmt;

use parking_lot::Mutex;

use crate::{exception::PyException, frame::FrameRef, value::Value};

/// Observed execution event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A frame was entered (first run or generator resume).
    Call {
        /// Name of the code object.
        name: String,
        /// Call depth including the entered frame.
        depth: usize,
    },
    Line {
        name: String,
        line: u32,
    },
    /// An exception passed through a frame.
    Exception {
        name: String,
        /// `Type: message` rendering of the exception.
        exception: String,
    },
    Return {
        name: String,
        /// `repr` of the returned value, `None` when the frame left by an exception.
        value: Option<String>,
    },
}

/// Hook points invoked by the interpreter loop. Every method defaults to a no-op.
pub trait TraceHook: fmt::Debug + Send + Sync {
    fn on_call(&self, _frame: &FrameRef, _depth: usize) {}

    /// Called before the first instruction of each new line, or before every instruction
    /// when opcode tracing is enabled in the configuration.
    fn on_line(&self, _frame: &FrameRef, _line: u32) {}

    fn on_exception(&self, _frame: &FrameRef, _exc: &PyException) {}

    /// `value` is `None` when the frame is left by an exception.
    fn on_return(&self, _frame: &FrameRef, _value: Option<&Value>) {}
}

/// Forwards hook events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl TraceHook for LogTracer {
    fn on_call(&self, frame: &FrameRef, depth: usize) {
        tracing::trace!(code = frame.code().name(), depth, "call");
    }

    fn on_line(&self, frame: &FrameRef, line: u32) {
        tracing::trace!(code = frame.code().name(), line, "line");
    }

    fn on_exception(&self, frame: &FrameRef, exc: &PyException) {
        tracing::trace!(code = frame.code().name(), exception = %exc, "exception");
    }

    fn on_return(&self, frame: &FrameRef, value: Option<&Value>) {
        tracing::trace!(code = frame.code().name(), value = ?value, "return");
    }
}

/// Records every event, up to an optional limit.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<TraceEvent>>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Mutex::new(Vec::with_capacity(limit.min(1024))),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    fn record(&self, event: TraceEvent) {
        let mut events = self.events.lock();
        if self.limit.is_none_or(|limit| events.len() < limit) {
            events.push(event);
        }
    }
}

impl TraceHook for RecordingTracer {
    fn on_call(&self, frame: &FrameRef, depth: usize) {
        self.record(TraceEvent::Call {
            name: frame.code().name().to_owned(),
            depth,
        });
    }

    fn on_line(&self, frame: &FrameRef, line: u32) {
        self.record(TraceEvent::Line {
            name: frame.code().name().to_owned(),
            line,
        });
    }

    fn on_exception(&self, frame: &FrameRef, exc: &PyException) {
        self.record(TraceEvent::Exception {
            name: frame.code().name().to_owned(),
            exception: exc.to_string(),
        });
    }

    fn on_return(&self, frame: &FrameRef, value: Option<&Value>) {
        self.record(TraceEvent::Return {
            name: frame.code().name().to_owned(),
            value: value.map(Value::repr_builtin),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::CodeBuilder, frame::Frame, types::Dict};

    #[test]
    fn limit_caps_recording() {
        let frame = Frame::new(
            CodeBuilder::module("m").build(),
            Dict::new_ref(),
            Dict::new_ref(),
            Some(Dict::new_ref()),
            Vec::new(),
            Vec::new(),
        );
        let tracer = RecordingTracer::with_limit(2);
        tracer.on_call(&frame, 1);
        tracer.on_line(&frame, 3);
        tracer.on_return(&frame, Some(&Value::Int(1)));
        assert_eq!(tracer.event_count(), 2);
        assert_eq!(
            tracer.events()[1],
            TraceEvent::Line {
                name: "m".to_owned(),
                line: 3
            }
        );
    }
}
