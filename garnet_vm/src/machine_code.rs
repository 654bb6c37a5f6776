//! The prepared, directly-dispatchable form of a method body.
//!
//! The preparer rewrites a compiled code's symbolic stream into this object:
//! handler tokens in the header words, biased register operands, literal
//! references and site handles in the operand words. Which operand words hold
//! heap references is recorded in the reference-slot array — the single
//! interface the collector uses to trace the stream.

use crate::call_site::CallSite;
use crate::constant_cache::ConstantCache;
use crate::gc::Tracer;
use crate::stats::Measurement;
use crate::unwind::UnwindSite;
use garnet_compiler::CompiledCode;
use garnet_core::{Symbol, Value};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Nil-id source; every machine code gets a distinct id so tagged nils can
/// name their origin.
static NEXT_NIL_ID: AtomicU32 = AtomicU32::new(1);

/// A prepared method body.
///
/// The stream is immutable after preparation. Sites referenced from operand
/// words are rewritable in place (they carry their own interior state); the
/// machine code owns them through the tables below, keyed by the ip of the
/// installing instruction.
pub struct MachineCode {
    pub name: Symbol,
    pub file: Symbol,

    /// Serial of the compiled code this was prepared from.
    pub serial: u64,

    /// Declared operand-stack depth; register indices in the stream are
    /// biased by this.
    pub stack_size: usize,

    /// Register count above the operand stack.
    pub local_count: usize,

    /// Distinct id for nil tagging.
    pub nil_id: u32,

    /// The dispatch-ready stream.
    pub stream: Box<[u64]>,

    /// Offsets into the stream whose words hold heap references.
    pub references: Box<[usize]>,

    pub call_site_count: usize,
    pub constant_cache_count: usize,
    pub unwind_site_count: usize,

    call_sites: FxHashMap<u32, Arc<CallSite>>,
    constant_caches: FxHashMap<u32, Arc<ConstantCache>>,
    unwind_sites: FxHashMap<u32, Arc<UnwindSite>>,
    measurements: Vec<Arc<Measurement>>,

    /// The compiled code this was prepared from (debug and reporting).
    pub code: Arc<CompiledCode>,
}

impl MachineCode {
    pub fn next_nil_id() -> u32 {
        NEXT_NIL_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Total frame slot count: operand stack plus registers.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.stack_size + self.local_count
    }

    /// The call site installed at `ip`, if any.
    #[inline]
    pub fn call_site(&self, ip: u32) -> Option<&Arc<CallSite>> {
        self.call_sites.get(&ip)
    }

    #[inline]
    pub fn constant_cache(&self, ip: u32) -> Option<&Arc<ConstantCache>> {
        self.constant_caches.get(&ip)
    }

    #[inline]
    pub fn unwind_site(&self, ip: u32) -> Option<&Arc<UnwindSite>> {
        self.unwind_sites.get(&ip)
    }

    #[inline]
    pub fn measurement(&self, index: usize) -> Option<&Arc<Measurement>> {
        self.measurements.get(index)
    }

    pub fn call_sites(&self) -> impl Iterator<Item = &Arc<CallSite>> {
        self.call_sites.values()
    }

    /// Trace every reference-slot word. This is the collector's one window
    /// into the prepared stream; site-internal references are reported by the
    /// sites themselves when the collector reaches them through these slots.
    pub fn mark_references(&self, tracer: &mut dyn Tracer) {
        for &slot in self.references.iter() {
            tracer.trace(Value::from_raw(self.stream[slot]));
        }
    }

    pub(crate) fn builder(code: &Arc<CompiledCode>) -> MachineCodeBuilder {
        MachineCodeBuilder {
            stream: code.opcodes.to_vec(),
            references: Vec::new(),
            call_sites: FxHashMap::default(),
            constant_caches: FxHashMap::default(),
            unwind_sites: FxHashMap::default(),
            measurements: Vec::new(),
            nil_id: MachineCode::next_nil_id(),
            code: code.clone(),
        }
    }
}

/// Scratch for the preparer. The machine code is published only when the
/// preparer finishes; a failed preparation leaves nothing behind.
pub(crate) struct MachineCodeBuilder {
    pub stream: Vec<u64>,
    pub references: Vec<usize>,
    pub call_sites: FxHashMap<u32, Arc<CallSite>>,
    pub constant_caches: FxHashMap<u32, Arc<ConstantCache>>,
    pub unwind_sites: FxHashMap<u32, Arc<UnwindSite>>,
    pub measurements: Vec<Arc<Measurement>>,
    pub nil_id: u32,
    pub code: Arc<CompiledCode>,
}

impl MachineCodeBuilder {
    pub fn finish(self) -> Arc<MachineCode> {
        let call_site_count = self.call_sites.len();
        let constant_cache_count = self.constant_caches.len();
        let unwind_site_count = self.unwind_sites.len();
        Arc::new(MachineCode {
            name: self.code.name,
            file: self.code.file,
            serial: self.code.serial,
            stack_size: self.code.stack_size,
            local_count: self.code.local_count,
            nil_id: self.nil_id,
            stream: self.stream.into_boxed_slice(),
            references: self.references.into_boxed_slice(),
            call_site_count,
            constant_cache_count,
            unwind_site_count,
            call_sites: self.call_sites,
            constant_caches: self.constant_caches,
            unwind_sites: self.unwind_sites,
            measurements: self.measurements,
            code: self.code,
        })
    }
}
