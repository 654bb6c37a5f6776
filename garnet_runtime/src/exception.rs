//! Language exceptions and call-stack locations.
//!
//! The dispatch core consumes three constructors — type error, interpreter
//! error, no-method error — and attaches location snapshots to whatever it
//! surfaces. Exceptions are ordinary heap objects so they flow through
//! operand stacks and rescue handlers like any other value.

use crate::Runtime;
use garnet_core::{Symbol, Value};
use smallvec::SmallVec;

/// One frame of a call-stack snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub method: Symbol,
    pub file: Symbol,
    pub ip: u32,
}

impl Location {
    pub fn new(method: Symbol, file: Symbol, ip: u32) -> Location {
        Location { method, file, ip }
    }
}

/// Extra payload of a type error.
#[derive(Debug, Clone)]
pub struct TypeErrorInfo {
    pub expected: &'static str,
    pub object: Value,
    pub reason: String,
}

/// Body of an exception heap object.
#[derive(Debug, Clone)]
pub struct ExceptionBody {
    pub message: String,
    pub locations: SmallVec<[Location; 4]>,
    pub type_error: Option<TypeErrorInfo>,
}

impl ExceptionBody {
    pub fn new(message: impl Into<String>) -> ExceptionBody {
        ExceptionBody {
            message: message.into(),
            locations: SmallVec::new(),
            type_error: None,
        }
    }

    pub fn mark(&self, tracer: &mut dyn FnMut(Value)) {
        if let Some(info) = &self.type_error {
            tracer(info.object);
        }
    }
}

/// Build a type-error exception: `(expected type, offending object, reason)`.
pub fn make_type_error(
    runtime: &mut Runtime,
    expected: &'static str,
    object: Value,
    reason: impl Into<String>,
) -> Value {
    let reason = reason.into();
    let class = runtime.classes.well_known().type_error;
    let mut body = ExceptionBody::new(format!("{reason} (expected {expected})"));
    body.type_error = Some(TypeErrorInfo {
        expected,
        object,
        reason,
    });
    runtime.heap.alloc_exception(class, body)
}

/// Build a generic interpreter-error exception for an unidentified host
/// failure.
pub fn make_interpreter_error(runtime: &mut Runtime, message: impl Into<String>) -> Value {
    let class = runtime.classes.well_known().interpreter_error;
    runtime
        .heap
        .alloc_exception(class, ExceptionBody::new(message))
}

/// Build the no-method exception raised by the default `method_missing`.
pub fn make_no_method_error(runtime: &mut Runtime, name: Symbol, recv: Value, private: bool) -> Value {
    let class = runtime.classes.well_known().no_method_error;
    let recv_class = runtime.classes.name_of(runtime.class_of(recv));
    let message = if private {
        format!("private method '{name}' called for an instance of {recv_class}")
    } else {
        format!("undefined method '{name}' for an instance of {recv_class}")
    };
    runtime
        .heap
        .alloc_exception(class, ExceptionBody::new(message))
}

/// Build the name-error exception for a failed constant resolution.
pub fn make_name_error(runtime: &mut Runtime, name: Symbol) -> Value {
    let class = runtime.classes.well_known().name_error;
    runtime.heap.alloc_exception(
        class,
        ExceptionBody::new(format!("uninitialized constant {name}")),
    )
}

/// Locations recorded on an exception, if it is one.
pub fn exception_locations(runtime: &Runtime, exception: Value) -> Option<Vec<Location>> {
    match &runtime.heap.get(exception)?.kind {
        crate::heap::ObjectKind::Exception(body) => Some(body.locations.to_vec()),
        _ => None,
    }
}

/// Attach a call-stack snapshot to an exception. Returns false if the value
/// is not an exception object.
pub fn attach_locations(
    runtime: &mut Runtime,
    exception: Value,
    locations: impl IntoIterator<Item = Location>,
) -> bool {
    match runtime.heap.get_mut(exception).map(|object| &mut object.kind) {
        Some(crate::heap::ObjectKind::Exception(body)) => {
            body.locations.extend(locations);
            true
        }
        _ => false,
    }
}

/// Message of an exception object, for tests and reporting.
pub fn exception_message(runtime: &Runtime, exception: Value) -> Option<String> {
    match &runtime.heap.get(exception)?.kind {
        crate::heap::ObjectKind::Exception(body) => Some(body.message.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_error_payload() {
        let mut runtime = Runtime::bootstrap();
        let offender = Value::fixnum(5);
        let exc = make_type_error(&mut runtime, "Array", offender, "no implicit conversion");

        let class = runtime.class_of(exc);
        assert_eq!(class, runtime.classes.well_known().type_error);
        let message = exception_message(&runtime, exc).unwrap();
        assert!(message.contains("no implicit conversion"));
        assert!(message.contains("Array"));
    }

    #[test]
    fn test_attach_locations() {
        let mut runtime = Runtime::bootstrap();
        let exc = make_interpreter_error(&mut runtime, "boom");
        assert_eq!(exception_locations(&runtime, exc).unwrap().len(), 0);

        let loc = Location::new(Symbol::intern("main"), Symbol::intern("(test)"), 7);
        assert!(attach_locations(&mut runtime, exc, [loc]));
        assert_eq!(exception_locations(&runtime, exc).unwrap(), vec![loc]);
    }

    #[test]
    fn test_attach_to_non_exception() {
        let mut runtime = Runtime::bootstrap();
        let not_exc = Value::fixnum(1);
        assert!(!attach_locations(&mut runtime, not_exc, []));
    }
}
