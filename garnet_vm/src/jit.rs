//! The JIT compile-request queue.
//!
//! Inline caches hand hot methods here; the background compiler (an external
//! collaborator — a stub worker in this crate) drains the list in FIFO order
//! and signals any waiter attached to a request. Duplicate requests for the
//! same `(code, receiver class)` coalesce onto the already-queued request.

use garnet_compiler::CompiledCode;
use garnet_core::Value;
use garnet_runtime::ClassId;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// A one-shot notification sink for a synchronous compile request. The
/// request holds it non-owning in spirit: the waiting executor owns its end
/// and discards it after the wait.
pub struct Waiter {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    pub fn new() -> Arc<Waiter> {
        Arc::new(Waiter {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Block until signaled.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Block until signaled or the timeout elapses. Returns true if signaled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.cond.wait_for(&mut done, timeout);
        }
        *done
    }

    pub fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }
}

/// One pending or in-flight background compilation.
pub struct CompileRequest {
    pub code: Arc<CompiledCode>,
    pub receiver_class: Option<ClassId>,
    /// Block environment handle, nil when this is not a block request.
    pub block_env: Value,
    pub is_block: bool,
    /// Hit count snapshot at enqueue time.
    pub hits: u64,
    waiter: Mutex<Option<Arc<Waiter>>>,
    compiled: AtomicBool,
}

impl CompileRequest {
    fn new(
        code: Arc<CompiledCode>,
        receiver_class: Option<ClassId>,
        block_env: Value,
        is_block: bool,
        hits: u64,
    ) -> Arc<CompileRequest> {
        Arc::new(CompileRequest {
            code,
            receiver_class,
            block_env,
            is_block,
            hits,
            waiter: Mutex::new(None),
            compiled: AtomicBool::new(false),
        })
    }

    pub fn set_waiter(&self, waiter: Arc<Waiter>) {
        *self.waiter.lock() = Some(waiter);
    }

    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.compiled.load(Ordering::Acquire)
    }

    /// Mark done and wake the waiter, if any.
    pub fn finish(&self) {
        self.compiled.store(true, Ordering::Release);
        if let Some(waiter) = self.waiter.lock().take() {
            waiter.signal();
        }
    }
}

/// Coalescing key: one request per `(code, receiver class)`.
fn request_key(code: &Arc<CompiledCode>, receiver_class: Option<ClassId>) -> (u64, Option<ClassId>) {
    (code.serial, receiver_class)
}

struct CompileList {
    queue: VecDeque<Arc<CompileRequest>>,
    pending: FxHashMap<(u64, Option<ClassId>), Arc<CompileRequest>>,
}

/// The process JIT module: pending-compilation bookkeeping and the toggles
/// the hot path reads.
pub struct Jit {
    list: Mutex<CompileList>,
    list_signal: Condvar,

    available: AtomicBool,
    enabled: AtomicBool,
    sync: AtomicBool,

    /// Compile threshold inline caches compare hit counts against.
    threshold: u64,

    properties: RwLock<FxHashMap<String, String>>,

    /// Method-table update bracket. Held exclusive between
    /// `start_method_update` and `end_method_update`; the worker takes it
    /// shared around each compilation so in-flight requests never observe a
    /// half-updated table.
    update_flag: Mutex<bool>,
    update_signal: Condvar,
}

impl Jit {
    pub fn new(threshold: u64) -> Arc<Jit> {
        Arc::new(Jit {
            list: Mutex::new(CompileList {
                queue: VecDeque::new(),
                pending: FxHashMap::default(),
            }),
            list_signal: Condvar::new(),
            available: AtomicBool::new(true),
            enabled: AtomicBool::new(false),
            sync: AtomicBool::new(false),
            threshold,
            properties: RwLock::new(FxHashMap::default()),
            update_flag: Mutex::new(false),
            update_signal: Condvar::new(),
        })
    }

    // =========================================================================
    // Hot-path reads
    // =========================================================================

    /// Hit count at which inline caches promote methods to compilation.
    #[inline(always)]
    pub fn compile_threshold(&self) -> u64 {
        self.threshold
    }

    #[inline]
    pub fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn sync_set(&self, flag: bool) {
        self.sync.store(flag, Ordering::Release);
    }

    pub fn sync_get(&self) -> bool {
        self.sync.load(Ordering::Acquire)
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.write().insert(key.into(), value.into());
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Enqueue a compilation without blocking. Duplicate `(code, receiver
    /// class)` requests return the already-queued request.
    pub fn compile_soon(
        &self,
        code: Arc<CompiledCode>,
        receiver_class: Option<ClassId>,
        block_env: Value,
        is_block: bool,
        hits: u64,
    ) -> Arc<CompileRequest> {
        let key = request_key(&code, receiver_class);
        let mut list = self.list.lock();
        if let Some(existing) = list.pending.get(&key) {
            return existing.clone();
        }
        let request = CompileRequest::new(code, receiver_class, block_env, is_block, hits);
        list.pending.insert(key, request.clone());
        list.queue.push_back(request.clone());
        self.list_signal.notify_one();
        request
    }

    /// Primitive entry point. In synchronous mode, attaches a waiter and
    /// blocks until the background compiler signals completion; otherwise
    /// returns after enqueueing.
    pub fn compile(
        &self,
        code: Arc<CompiledCode>,
        receiver_class: Option<ClassId>,
        block_env: Value,
    ) -> Arc<CompileRequest> {
        let is_block = !block_env.is_nil();
        let request = self.compile_soon(code, receiver_class, block_env, is_block, 0);
        if self.sync_get() && self.enabled() && !request.is_compiled() {
            let waiter = Waiter::new();
            request.set_waiter(waiter.clone());
            if request.is_compiled() {
                // The worker may have finished between the check and the
                // attach; the waiter would never be signaled.
                return request;
            }
            waiter.wait();
        }
        request
    }

    /// Remove a pending request before the compiler picks it up. Returns
    /// true if it was still queued.
    pub fn cancel(&self, request: &Arc<CompileRequest>) -> bool {
        let mut list = self.list.lock();
        let key = request_key(&request.code, request.receiver_class);
        let was_queued = list
            .queue
            .iter()
            .position(|queued| Arc::ptr_eq(queued, request));
        if let Some(index) = was_queued {
            list.queue.remove(index);
            list.pending.remove(&key);
            true
        } else {
            false
        }
    }

    /// Pending request count, for diagnostics.
    pub fn pending_count(&self) -> usize {
        self.list.lock().queue.len()
    }

    // =========================================================================
    // Method-update bracket
    // =========================================================================

    /// Begin a method-table mutation. Blocks until in-flight compilations
    /// drain past their table reads.
    pub fn start_method_update(&self) {
        let mut updating = self.update_flag.lock();
        while *updating {
            self.update_signal.wait(&mut updating);
        }
        *updating = true;
    }

    pub fn end_method_update(&self) {
        let mut updating = self.update_flag.lock();
        *updating = false;
        self.update_signal.notify_all();
    }

    fn wait_for_update_window(&self) {
        let mut updating = self.update_flag.lock();
        while *updating {
            self.update_signal.wait(&mut updating);
        }
    }

    // =========================================================================
    // Worker
    // =========================================================================

    /// Flip the enabled flag and start the background compiler.
    ///
    /// The worker here is the collaborator stub: it drains requests in FIFO
    /// order, respects the method-update bracket, marks each request
    /// compiled, and signals waiters. It holds only a weak handle, so
    /// dropping the last `Arc<Jit>` shuts it down.
    pub fn enable(self: &Arc<Jit>) {
        if self.enabled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak: Weak<Jit> = Arc::downgrade(self);
        std::thread::Builder::new()
            .name("garnet-jit".into())
            .spawn(move || worker_loop(weak))
            .expect("spawning the jit worker");
    }
}

fn worker_loop(jit: Weak<Jit>) {
    loop {
        let Some(jit) = jit.upgrade() else { return };

        let request = {
            let mut list = jit.list.lock();
            match list.queue.pop_front() {
                Some(request) => {
                    let key = request_key(&request.code, request.receiver_class);
                    list.pending.remove(&key);
                    Some(request)
                }
                None => {
                    // Park briefly; a bounded wait keeps shutdown prompt once
                    // the owning state drops its handle.
                    jit.list_signal
                        .wait_for(&mut list, Duration::from_millis(50));
                    None
                }
            }
        };

        if let Some(request) = request {
            jit.wait_for_update_window();
            // Code generation is the external collaborator; bookkeeping ends
            // here.
            request.finish();
        }

        if !jit.enabled() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_compiler::BytecodeBuilder;

    fn code(name: &str) -> Arc<CompiledCode> {
        let mut b = BytecodeBuilder::new(name);
        b.ret();
        Arc::new(b.finish())
    }

    #[test]
    fn test_compile_soon_is_fifo() {
        let jit = Jit::new(10);
        let a = jit.compile_soon(code("a"), None, Value::nil(), false, 1);
        let b = jit.compile_soon(code("b"), None, Value::nil(), false, 2);
        let list = jit.list.lock();
        assert_eq!(list.queue.len(), 2);
        assert!(Arc::ptr_eq(&list.queue[0], &a));
        assert!(Arc::ptr_eq(&list.queue[1], &b));
    }

    #[test]
    fn test_duplicate_requests_coalesce() {
        let jit = Jit::new(10);
        let shared = code("shared");
        let klass = Some(ClassId::from_index(1));
        let first = jit.compile_soon(shared.clone(), klass, Value::nil(), false, 1);
        let second = jit.compile_soon(shared.clone(), klass, Value::nil(), false, 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(jit.pending_count(), 1);

        // A different receiver class is a different request.
        let third = jit.compile_soon(shared, Some(ClassId::from_index(2)), Value::nil(), false, 1);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(jit.pending_count(), 2);
    }

    #[test]
    fn test_cancel_pending() {
        let jit = Jit::new(10);
        let request = jit.compile_soon(code("c"), None, Value::nil(), false, 1);
        assert!(jit.cancel(&request));
        assert!(!jit.cancel(&request));
        assert_eq!(jit.pending_count(), 0);
    }

    #[test]
    fn test_sync_toggle() {
        let jit = Jit::new(10);
        assert!(!jit.sync_get());
        jit.sync_set(true);
        assert!(jit.sync_get());
    }

    #[test]
    fn test_worker_drains_and_signals() {
        let jit = Jit::new(10);
        jit.enable();
        let request = jit.compile_soon(code("hot"), None, Value::nil(), false, 10);
        let waiter = Waiter::new();
        request.set_waiter(waiter.clone());
        if !request.is_compiled() {
            assert!(waiter.wait_for(Duration::from_secs(5)), "worker never signaled");
        }
        assert!(request.is_compiled());
    }

    #[test]
    fn test_synchronous_compile_blocks_until_done() {
        let jit = Jit::new(10);
        jit.enable();
        jit.sync_set(true);
        let request = jit.compile(code("sync"), None, Value::nil());
        assert!(request.is_compiled());
    }

    #[test]
    fn test_method_update_bracket() {
        let jit = Jit::new(10);
        jit.start_method_update();
        // Re-entering from another thread must wait until we end.
        let jit2 = jit.clone();
        let handle = std::thread::spawn(move || {
            jit2.start_method_update();
            jit2.end_method_update();
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        jit.end_method_update();
        handle.join().unwrap();
    }
}
