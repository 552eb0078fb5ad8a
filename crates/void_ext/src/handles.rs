//! Handle table
//!
//! Every engine object pointer held by host code is recorded here together
//! with its lifetime regime. Slot ids are generation-tagged so a stale id is
//! detected instead of dereferenced. Slots live in fixed-size chunks that
//! never move, so reads of a committed slot are lock-free acquire loads;
//! only allocation and scope bookkeeping take a lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};

// ============================================================================
// Ids and regimes
// ============================================================================

/// Opaque, generation-tagged id of one tracked handle
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// An id that never refers to a live slot
    pub const DANGLING: SlotId = SlotId { index: u32::MAX, generation: 0 };

    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DANGLING {
            write!(f, "SlotId(dangling)")
        } else {
            write!(f, "SlotId({}v{})", self.index, self.generation)
        }
    }
}

/// Identifier of a handle scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Root scope for handles whose lifetime the engine controls
    pub const ENGINE: ScopeId = ScopeId(0);

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Lifetime regime of a tracked handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    /// Host holds one strong reference; release decrements
    RefCounted,
    /// Host owns the object; release frees it
    Exclusive,
    /// Valid only while the scope lives; release forgets it
    Borrowed(ScopeId),
    /// Process-wide; never freed by the host
    Singleton,
}

impl Regime {
    /// Whether releasing this handle must reach the engine
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::RefCounted | Self::Exclusive)
    }

    fn encode(self) -> u64 {
        match self {
            Self::RefCounted => 0,
            Self::Exclusive => 1,
            Self::Singleton => 2,
            Self::Borrowed(scope) => scope.0 << 2 | 3,
        }
    }

    fn decode(raw: u64) -> Self {
        match raw & 3 {
            0 => Self::RefCounted,
            1 => Self::Exclusive,
            2 => Self::Singleton,
            _ => Self::Borrowed(ScopeId(raw >> 2)),
        }
    }
}

/// Performs the engine side of a release
pub trait Releaser: Send + Sync {
    /// Drop the host's claim on `handle` according to `regime`
    fn release(&self, handle: usize, regime: Regime);
}

// ============================================================================
// Slots
// ============================================================================

const CHUNK_SIZE: usize = 256;
const MAX_CHUNKS: usize = 4096;

const STATUS_FREE: u64 = 0;
const STATUS_LIVE: u64 = 1;

#[inline]
fn state(generation: u32, status: u64) -> u64 {
    (generation as u64) << 32 | status
}

#[derive(Default)]
struct Slot {
    /// generation << 32 | status
    state: AtomicU64,
    handle: AtomicUsize,
    regime: AtomicU64,
    /// Insertion order, for teardown
    seq: AtomicU64,
}

struct Allocator {
    free_list: Vec<u32>,
    next_fresh: u32,
}

struct ScopeRecord {
    thread: ThreadId,
    slots: Vec<SlotId>,
}

#[derive(Default)]
struct Scopes {
    records: HashMap<ScopeId, ScopeRecord>,
    stacks: HashMap<ThreadId, Vec<ScopeId>>,
}

/// Outcome of [`HandleTable::teardown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Owned handles released through the engine
    pub released: usize,
    /// Borrowed handles still alive
    pub leaked_borrowed: usize,
    /// Singleton handles dropped from the table
    pub singletons: usize,
}

/// Generation-tagged table of engine handles
pub struct HandleTable {
    chunks: Box<[OnceLock<Box<[Slot]>>]>,
    allocator: Mutex<Allocator>,
    scopes: Mutex<Scopes>,
    live: AtomicUsize,
    next_seq: AtomicU64,
    next_scope: AtomicU64,
    torn_down: AtomicBool,
    releaser: Box<dyn Releaser>,
}

impl HandleTable {
    /// Create an empty table releasing through `releaser`
    pub fn new(releaser: Box<dyn Releaser>) -> Self {
        let chunks = (0..MAX_CHUNKS).map(|_| OnceLock::new()).collect::<Vec<_>>().into_boxed_slice();
        Self {
            chunks,
            allocator: Mutex::new(Allocator { free_list: Vec::new(), next_fresh: 0 }),
            scopes: Mutex::new(Scopes::default()),
            live: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            next_scope: AtomicU64::new(1),
            torn_down: AtomicBool::new(false),
            releaser,
        }
    }

    /// The process-wide table used by every object wrapper
    pub fn global() -> &'static HandleTable {
        static GLOBAL: OnceLock<HandleTable> = OnceLock::new();
        GLOBAL.get_or_init(|| HandleTable::new(Box::new(crate::obj::EngineReleaser)))
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        let index = index as usize;
        let chunk = self.chunks.get(index / CHUNK_SIZE)?.get()?;
        chunk.get(index % CHUNK_SIZE)
    }

    fn slot_or_grow(&self, index: u32) -> &Slot {
        let index = index as usize;
        let chunk = match self.chunks.get(index / CHUNK_SIZE) {
            Some(chunk) => chunk,
            None => panic!("handle table exhausted ({} slots)", MAX_CHUNKS * CHUNK_SIZE),
        };
        let chunk = chunk.get_or_init(|| (0..CHUNK_SIZE).map(|_| Slot::default()).collect());
        &chunk[index % CHUNK_SIZE]
    }

    // ========== Tracking ==========

    /// Record a new handle under `regime`
    ///
    /// Borrowed handles must be tracked on the thread that owns their scope;
    /// the engine scope accepts handles from any thread.
    pub fn track(&self, handle: usize, regime: Regime) -> Result<SlotId> {
        if let Regime::Borrowed(scope) = regime {
            if scope != ScopeId::ENGINE {
                self.check_scope_thread(scope)?;
            }
        }

        let index = {
            let mut allocator = self.allocator.lock();
            match allocator.free_list.pop() {
                Some(index) => index,
                None => {
                    let index = allocator.next_fresh;
                    allocator.next_fresh += 1;
                    index
                }
            }
        };

        let slot = self.slot_or_grow(index);
        let generation = (slot.state.load(Ordering::Acquire) >> 32) as u32;
        slot.handle.store(handle, Ordering::Relaxed);
        slot.regime.store(regime.encode(), Ordering::Relaxed);
        slot.seq.store(self.next_seq.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        slot.state.store(state(generation, STATUS_LIVE), Ordering::Release);

        let id = SlotId { index, generation };
        if let Regime::Borrowed(scope) = regime {
            if scope != ScopeId::ENGINE {
                if let Some(record) = self.scopes.lock().records.get_mut(&scope) {
                    record.slots.push(id);
                }
            }
        }

        self.live.fetch_add(1, Ordering::Relaxed);
        self.torn_down.store(false, Ordering::Relaxed);
        Ok(id)
    }

    /// The raw handle behind a live slot
    pub fn get(&self, id: SlotId) -> Result<usize> {
        let slot = self.slot(id.index).ok_or(BridgeError::UseAfterFree(id))?;
        let expected = state(id.generation, STATUS_LIVE);
        if slot.state.load(Ordering::Acquire) != expected {
            return Err(BridgeError::UseAfterFree(id));
        }
        let handle = slot.handle.load(Ordering::Acquire);
        // A concurrent release bumps the generation, so re-checking is enough.
        if slot.state.load(Ordering::Acquire) != expected {
            return Err(BridgeError::UseAfterFree(id));
        }
        Ok(handle)
    }

    /// Regime of a live slot
    pub fn regime(&self, id: SlotId) -> Result<Regime> {
        let slot = self.slot(id.index).ok_or(BridgeError::UseAfterFree(id))?;
        let expected = state(id.generation, STATUS_LIVE);
        if slot.state.load(Ordering::Acquire) != expected {
            return Err(BridgeError::UseAfterFree(id));
        }
        let regime = Regime::decode(slot.regime.load(Ordering::Acquire));
        if slot.state.load(Ordering::Acquire) != expected {
            return Err(BridgeError::UseAfterFree(id));
        }
        Ok(regime)
    }

    /// Whether `id` still refers to a live slot
    pub fn is_live(&self, id: SlotId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of live handles
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Free the slot without touching the engine, returning its handle
    fn retire(&self, id: SlotId) -> Result<(usize, Regime)> {
        let slot = self.slot(id.index).ok_or(BridgeError::UseAfterFree(id))?;
        let live = state(id.generation, STATUS_LIVE);
        let freed = state(id.generation.wrapping_add(1), STATUS_FREE);
        if slot
            .state
            .compare_exchange(live, freed, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::DoubleRelease(id));
        }

        let handle = slot.handle.load(Ordering::Acquire);
        let regime = Regime::decode(slot.regime.load(Ordering::Acquire));

        if let Regime::Borrowed(scope) = regime {
            if scope != ScopeId::ENGINE {
                if let Some(record) = self.scopes.lock().records.get_mut(&scope) {
                    record.slots.retain(|s| *s != id);
                }
            }
        }

        self.allocator.lock().free_list.push(id.index);
        self.live.fetch_sub(1, Ordering::Relaxed);
        Ok((handle, regime))
    }

    /// Release a handle according to its regime
    ///
    /// A second release of the same id is reported and returns
    /// [`BridgeError::DoubleRelease`]; it never reaches the engine. After
    /// [`teardown`](Self::teardown), stale releases are ignored.
    pub fn release(&self, id: SlotId) -> Result<()> {
        if id == SlotId::DANGLING {
            return Err(BridgeError::UseAfterFree(id));
        }
        match self.retire(id) {
            Ok((handle, regime)) => {
                self.releaser.release(handle, regime);
                Ok(())
            }
            Err(_) if self.torn_down.load(Ordering::Relaxed) => Ok(()),
            Err(err) => {
                log::error!("Double release of engine handle {:?}", id);
                Err(err)
            }
        }
    }

    /// Stop tracking a handle without releasing it, returning the raw handle
    ///
    /// Used when ownership moves back to the engine.
    pub fn forget(&self, id: SlotId) -> Result<usize> {
        self.retire(id).map(|(handle, _)| handle).map_err(|err| match err {
            BridgeError::DoubleRelease(id) => BridgeError::UseAfterFree(id),
            other => other,
        })
    }

    /// Re-track a live handle under a different regime, keeping its handle
    pub fn retrack(&self, id: SlotId, regime: Regime) -> Result<SlotId> {
        let handle = self.forget(id)?;
        self.track(handle, regime)
    }

    // ========== Scopes ==========

    fn check_scope_thread(&self, scope: ScopeId) -> Result<()> {
        let scopes = self.scopes.lock();
        let current = thread::current().id();
        match scopes.records.get(&scope) {
            Some(record) if record.thread == current => Ok(()),
            _ => Err(BridgeError::ScopeMismatch {
                expected: self.innermost_locked(&scopes, current),
                found: scope,
            }),
        }
    }

    fn innermost_locked(&self, scopes: &Scopes, thread: ThreadId) -> ScopeId {
        scopes
            .stacks
            .get(&thread)
            .and_then(|stack| stack.last().copied())
            .unwrap_or(ScopeId::ENGINE)
    }

    /// Innermost open scope on the calling thread
    pub fn current_scope(&self) -> ScopeId {
        let scopes = self.scopes.lock();
        self.innermost_locked(&scopes, thread::current().id())
    }

    /// Open a nested scope on the calling thread
    pub fn scope_enter(&self) -> ScopeId {
        let id = ScopeId(self.next_scope.fetch_add(1, Ordering::Relaxed));
        let thread = thread::current().id();
        let mut scopes = self.scopes.lock();
        scopes.records.insert(id, ScopeRecord { thread, slots: Vec::new() });
        scopes.stacks.entry(thread).or_default().push(id);
        id
    }

    /// Close the innermost scope, releasing every handle still bound to it
    pub fn scope_exit(&self, scope: ScopeId) -> Result<usize> {
        let thread = thread::current().id();
        let slots = {
            let mut scopes = self.scopes.lock();
            let innermost = self.innermost_locked(&scopes, thread);
            if innermost != scope || scope == ScopeId::ENGINE {
                return Err(BridgeError::ScopeMismatch { expected: innermost, found: scope });
            }
            if let Some(stack) = scopes.stacks.get_mut(&thread) {
                stack.pop();
                if stack.is_empty() {
                    scopes.stacks.remove(&thread);
                }
            }
            scopes.records.remove(&scope).map(|r| r.slots).unwrap_or_default()
        };

        let mut released = 0;
        for id in slots.into_iter().rev() {
            if self.release(id).is_ok() {
                released += 1;
            }
        }
        Ok(released)
    }

    // ========== Teardown ==========

    /// Release everything still tracked, newest first
    ///
    /// Owned handles go through the releaser; borrowed handles still alive
    /// indicate a bug and are reported when `report_leaks` is set.
    pub fn teardown(&self, report_leaks: bool) -> TeardownReport {
        let upper = self.allocator.lock().next_fresh;
        let mut live: Vec<(u64, SlotId)> = Vec::new();
        for index in 0..upper {
            let Some(slot) = self.slot(index) else { continue };
            let raw = slot.state.load(Ordering::Acquire);
            if raw & 0xffff_ffff == STATUS_LIVE {
                let id = SlotId { index, generation: (raw >> 32) as u32 };
                live.push((slot.seq.load(Ordering::Relaxed), id));
            }
        }
        live.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut report = TeardownReport::default();
        for (_, id) in live {
            match self.retire(id) {
                Ok((handle, regime)) if regime.is_owned() => {
                    self.releaser.release(handle, regime);
                    report.released += 1;
                }
                Ok((handle, Regime::Borrowed(scope))) => {
                    if report_leaks {
                        log::warn!("Borrowed handle {:#x} outlived its scope {:?}", handle, scope);
                    }
                    report.leaked_borrowed += 1;
                }
                Ok(_) => report.singletons += 1,
                Err(_) => {}
            }
        }

        self.scopes.lock().records.clear();
        self.scopes.lock().stacks.clear();
        self.torn_down.store(true, Ordering::Relaxed);

        log::debug!(
            "Handle table torn down: {} released, {} borrowed leaked, {} singletons",
            report.released,
            report.leaked_borrowed,
            report.singletons
        );
        report
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable").field("live", &self.live_count()).finish()
    }
}

// ============================================================================
// Scope guard
// ============================================================================

/// RAII scope: handles borrowed into it are released when it drops
pub struct HandleScope {
    id: ScopeId,
    table: &'static HandleTable,
    // Scopes are bound to the thread that opened them.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl HandleScope {
    /// Open a scope on the global table
    pub fn new() -> Self {
        Self::in_table(HandleTable::global())
    }

    /// Open a scope on a specific table
    pub fn in_table(table: &'static HandleTable) -> Self {
        Self { id: table.scope_enter(), table, _not_send: std::marker::PhantomData }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn table(&self) -> &'static HandleTable {
        self.table
    }

    /// Track a handle as borrowed for the life of this scope
    pub fn track(&self, handle: usize) -> Result<SlotId> {
        self.table.track(handle, Regime::Borrowed(self.id))
    }
}

impl Default for HandleScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HandleScope {
    fn drop(&mut self) {
        if let Err(err) = self.table.scope_exit(self.id) {
            log::error!("Handle scope closed out of order: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Counting {
        released: Mutex<Vec<(usize, Regime)>>,
    }

    struct Shared(Arc<Counting>);

    impl Releaser for Shared {
        fn release(&self, handle: usize, regime: Regime) {
            self.0.released.lock().push((handle, regime));
        }
    }

    fn table() -> (&'static HandleTable, Arc<Counting>) {
        let counting = Arc::new(Counting::default());
        let table = Box::leak(Box::new(HandleTable::new(Box::new(Shared(counting.clone())))));
        (table, counting)
    }

    #[test]
    fn test_track_get_release() {
        let (table, counting) = table();
        let id = table.track(0x1000, Regime::Exclusive).unwrap();
        assert_eq!(table.get(id).unwrap(), 0x1000);
        assert_eq!(table.live_count(), 1);

        table.release(id).unwrap();
        assert_eq!(table.live_count(), 0);
        assert_eq!(*counting.released.lock(), vec![(0x1000, Regime::Exclusive)]);
        assert_eq!(table.get(id), Err(BridgeError::UseAfterFree(id)));
    }

    #[test]
    fn test_double_release_is_detected() {
        let (table, counting) = table();
        let id = table.track(0x2000, Regime::RefCounted).unwrap();
        table.release(id).unwrap();
        assert_eq!(table.release(id), Err(BridgeError::DoubleRelease(id)));
        assert_eq!(counting.released.lock().len(), 1);
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let (table, _) = table();
        let first = table.track(1, Regime::Exclusive).unwrap();
        table.release(first).unwrap();
        let second = table.track(2, Regime::Exclusive).unwrap();

        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(table.get(first).is_err());
        assert_eq!(table.get(second).unwrap(), 2);
    }

    #[test]
    fn test_scope_exit_releases_borrowed() {
        let (table, counting) = table();
        let outer = table.scope_enter();
        let a = table.track(10, Regime::Borrowed(outer)).unwrap();
        let inner = table.scope_enter();
        let b = table.track(20, Regime::Borrowed(inner)).unwrap();

        assert_eq!(
            table.scope_exit(outer),
            Err(BridgeError::ScopeMismatch { expected: inner, found: outer })
        );
        assert_eq!(table.scope_exit(inner), Ok(1));
        assert!(!table.is_live(b));
        assert!(table.is_live(a));
        assert_eq!(table.scope_exit(outer), Ok(1));
        assert_eq!(table.live_count(), 0);
        assert_eq!(counting.released.lock().len(), 2);
    }

    #[test]
    fn test_borrow_into_foreign_scope_fails() {
        let (table, _) = table();
        let scope = table.scope_enter();
        let result = thread::spawn(move || table.track(1, Regime::Borrowed(scope))).join().unwrap();
        assert!(matches!(result, Err(BridgeError::ScopeMismatch { .. })));
        table.scope_exit(scope).unwrap();
    }

    #[test]
    fn test_teardown_reverse_order() {
        let (table, counting) = table();
        table.track(1, Regime::RefCounted).unwrap();
        let stale = table.track(2, Regime::Exclusive).unwrap();
        table.track(3, Regime::Singleton).unwrap();
        table.track(4, Regime::Borrowed(ScopeId::ENGINE)).unwrap();
        table.track(5, Regime::Exclusive).unwrap();

        let report = table.teardown(false);
        assert_eq!(report, TeardownReport { released: 3, leaked_borrowed: 1, singletons: 1 });
        let order: Vec<usize> = counting.released.lock().iter().map(|(h, _)| *h).collect();
        assert_eq!(order, vec![5, 2, 1]);
        assert_eq!(table.live_count(), 0);

        // Releases racing teardown are ignored.
        assert_eq!(table.release(stale), Ok(()));
    }

    #[test]
    fn test_concurrent_release_happens_once() {
        let (table, counting) = table();
        let id = table.track(7, Regime::RefCounted).unwrap();
        let handles: Vec<_> = (0..8).map(|_| thread::spawn(move || table.release(id).is_ok())).collect();
        let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(successes, 1);
        assert_eq!(counting.released.lock().len(), 1);
    }

    #[test]
    fn test_retrack_changes_regime() {
        let (table, counting) = table();
        let id = table.track(9, Regime::Exclusive).unwrap();
        let moved = table.retrack(id, Regime::Borrowed(ScopeId::ENGINE)).unwrap();
        assert!(!table.is_live(id));
        assert_eq!(table.regime(moved).unwrap(), Regime::Borrowed(ScopeId::ENGINE));
        table.release(moved).unwrap();
        assert!(counting.released.lock().iter().all(|(_, r)| *r == Regime::Borrowed(ScopeId::ENGINE)));
    }
}
