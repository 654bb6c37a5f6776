//! Collector cooperation.
//!
//! The core never collects; it only reports. Three seams exist:
//!
//! - the machine code's reference-slot array
//!   ([`crate::machine_code::MachineCode::mark_references`]),
//! - `NativeObject::mark` on installed sites (receiver descriptors and
//!   resolved methods are registry ids and `Arc`s, so only genuine heap
//!   values are reported),
//! - [`mark_compile_request`] for queued JIT work.

use crate::jit::CompileRequest;
use garnet_core::Value;

/// A mark visitor supplied by the collector.
pub trait Tracer {
    fn trace(&mut self, value: Value);
}

/// Collects traced references; the test collector.
#[derive(Debug, Default)]
pub struct CollectingTracer {
    pub seen: Vec<Value>,
}

impl Tracer for CollectingTracer {
    fn trace(&mut self, value: Value) {
        self.seen.push(value);
    }
}

/// Trace the heap references a pending compile request keeps alive.
pub fn mark_compile_request(request: &CompileRequest, tracer: &mut dyn Tracer) {
    tracer.trace(request.block_env);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_tracer() {
        let mut tracer = CollectingTracer::default();
        tracer.trace(Value::fixnum(1));
        tracer.trace(Value::reference(3));
        assert_eq!(tracer.seen.len(), 2);
    }
}
