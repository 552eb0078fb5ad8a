//! Call frame
//!
//! Scratch memory for one outbound pointer call. Arguments are pushed in
//! declaration order into a bump arena; the arena stays alive until the frame
//! closes, so every pointer handed to the engine remains valid for the whole
//! call. Arenas are pooled per thread and reset on close.
//!
//! ```ignore
//! let mut frame = CallFrame::open();
//! frame.push_value(41i64)?;
//! frame.invoke::<i64>(|args, ret| unsafe { bind_ptrcall(method, object, args, ret) })?;
//! let answer: i64 = frame.finish()?;
//! ```

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use bumpalo::Bump;
use void_ext_sys::{ConstTypePtr, TypePtr};

use crate::error::{BridgeError, Result};
use crate::meta::FfiType;

/// Arenas kept per thread for reuse
const POOL_LIMIT: usize = 8;

thread_local! {
    static ARENAS: RefCell<Vec<Bump>> = const { RefCell::new(Vec::new()) };
    static STATS: Cell<FrameStats> = const { Cell::new(FrameStats { opened: 0, closed: 0 }) };
}

/// Frames opened and closed on the calling thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub opened: u64,
    pub closed: u64,
}

/// Counters for the calling thread
pub fn frame_stats() -> FrameStats {
    STATS.with(Cell::get)
}

fn bump_stats(f: impl FnOnce(&mut FrameStats)) {
    STATS.with(|cell| {
        let mut stats = cell.get();
        f(&mut stats);
        cell.set(stats);
    });
}

struct ReturnSlot {
    ptr: *mut u8,
    ty: TypeId,
    destroy: unsafe fn(*mut u8),
}

unsafe fn drop_thunk<T>(ptr: *mut u8) {
    ptr::drop_in_place(ptr as *mut T);
}

unsafe fn destroy_return<R: FfiType>(ptr: *mut u8) {
    // Adopting and dropping runs whatever release the value owes the engine.
    if let Ok(value) = R::from_ffi(ptr::read(ptr as *const R::Ffi)) {
        drop(value);
    }
}

/// One outbound call's argument buffer and return slot
///
/// Single-threaded and single-use: after [`invoke`](Self::invoke) the frame
/// is sealed and further pushes fail with [`BridgeError::FrameSealed`].
pub struct CallFrame<'f> {
    arena: Bump,
    args: Vec<ConstTypePtr>,
    drops: Vec<(unsafe fn(*mut u8), *mut u8)>,
    ret: Option<ReturnSlot>,
    sealed: bool,
    _borrows: PhantomData<&'f ()>,
    _not_send: PhantomData<*const ()>,
}

impl<'f> CallFrame<'f> {
    /// Open a frame on a pooled arena
    pub fn open() -> Self {
        let arena = ARENAS.with(|pool| pool.borrow_mut().pop()).unwrap_or_default();
        bump_stats(|s| s.opened += 1);
        Self {
            arena,
            args: Vec::new(),
            drops: Vec::new(),
            ret: None,
            sealed: false,
            _borrows: PhantomData,
            _not_send: PhantomData,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.sealed {
            Err(BridgeError::FrameSealed)
        } else {
            Ok(())
        }
    }

    /// Number of pushed argument slots
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether the frame has been handed to the engine
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    // ========== Pushing ==========

    /// Copy a plain value into the arena and push a pointer to it
    pub fn push_value<T: Copy + 'static>(&mut self, value: T) -> Result<()> {
        self.check_open()?;
        let slot: &mut T = self.arena.alloc(value);
        self.args.push(slot as *const T as ConstTypePtr);
        Ok(())
    }

    /// Push a pointer to storage that outlives the frame
    pub fn push_ref<T>(&mut self, value: &'f T) -> Result<()> {
        self.check_open()?;
        self.args.push(value as *const T as ConstTypePtr);
        Ok(())
    }

    /// Move a value into the arena; it is dropped when the frame closes
    pub fn push_owned<T: 'static>(&mut self, value: T) -> Result<()> {
        self.check_open()?;
        let slot = self.arena.alloc(value) as *mut T;
        if mem::needs_drop::<T>() {
            self.drops.push((drop_thunk::<T>, slot as *mut u8));
        }
        self.args.push(slot as ConstTypePtr);
        Ok(())
    }

    // ========== Invocation ==========

    /// Seal the frame and hand its argument array and return slot to `call`
    ///
    /// The argument array is null when nothing was pushed; the return slot
    /// is null when `R` has no storage.
    pub fn invoke<R: FfiType>(&mut self, call: impl FnOnce(*const ConstTypePtr, TypePtr)) -> Result<()> {
        self.check_open()?;
        self.sealed = true;

        let args = if self.args.is_empty() { ptr::null() } else { self.args.as_ptr() };
        if mem::size_of::<R::Ffi>() == 0 {
            call(args, ptr::null_mut());
            self.ret = Some(ReturnSlot {
                ptr: NonNull::<R::Ffi>::dangling().as_ptr() as *mut u8,
                ty: TypeId::of::<R>(),
                destroy: destroy_return::<R>,
            });
        } else {
            let slot = self.arena.alloc(MaybeUninit::<R::Ffi>::uninit()) as *mut MaybeUninit<R::Ffi> as *mut u8;
            call(args, slot as TypePtr);
            self.ret = Some(ReturnSlot { ptr: slot, ty: TypeId::of::<R>(), destroy: destroy_return::<R> });
        }
        Ok(())
    }

    /// Take the value the engine wrote into the return slot
    ///
    /// Fails before [`invoke`](Self::invoke), on a second read, and when `R`
    /// differs from the type the slot was assigned for.
    pub fn read_return<R: FfiType>(&mut self) -> Result<R> {
        match self.ret.take() {
            Some(slot) if slot.ty == TypeId::of::<R>() => unsafe { R::from_ffi(ptr::read(slot.ptr as *const R::Ffi)) },
            Some(slot) => {
                self.ret = Some(slot);
                Err(BridgeError::ReturnSlotUnwritten)
            }
            None => Err(BridgeError::ReturnSlotUnwritten),
        }
    }

    /// Read the return value and close the frame
    pub fn finish<R: FfiType>(mut self) -> Result<R> {
        let value = self.read_return::<R>();
        self.close();
        value
    }

    /// Close the frame, releasing everything it still holds
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.ret.take() {
            unsafe { (slot.destroy)(slot.ptr) };
        }
        for (drop_fn, ptr) in self.drops.drain(..).rev() {
            unsafe { drop_fn(ptr) };
        }
        self.args.clear();

        let mut arena = mem::take(&mut self.arena);
        arena.reset();
        ARENAS.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < POOL_LIMIT {
                pool.push(arena);
            }
        });
        bump_stats(|s| s.closed += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    struct Counted(Rc<Cell<u32>>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_push_invoke_finish() {
        let mut frame = CallFrame::open();
        frame.push_value(40i64).unwrap();
        frame.push_value(2i64).unwrap();
        assert_eq!(frame.len(), 2);

        frame
            .invoke::<i64>(|args, ret| unsafe {
                let a = *(*args as *const i64);
                let b = *(*args.add(1) as *const i64);
                ptr::write(ret as *mut i64, a + b);
            })
            .unwrap();
        assert_eq!(frame.finish::<i64>().unwrap(), 42);
    }

    #[test]
    fn test_empty_frame_passes_null_args() {
        let mut frame = CallFrame::open();
        let mut saw_null = false;
        frame
            .invoke::<bool>(|args, ret| unsafe {
                saw_null = args.is_null();
                ptr::write(ret as *mut u8, 1);
            })
            .unwrap();
        assert!(saw_null);
        assert!(frame.finish::<bool>().unwrap());
    }

    #[test]
    fn test_unit_return_slot_is_null() {
        let mut frame = CallFrame::open();
        let mut ret_null = false;
        frame.invoke::<()>(|_, ret| ret_null = ret.is_null()).unwrap();
        assert!(ret_null);
        frame.finish::<()>().unwrap();
    }

    #[test]
    fn test_push_after_invoke_is_sealed() {
        let mut frame = CallFrame::open();
        frame.invoke::<()>(|_, _| {}).unwrap();
        assert!(frame.is_sealed());
        assert_eq!(frame.push_value(1i64), Err(BridgeError::FrameSealed));
        assert_eq!(frame.invoke::<()>(|_, _| {}), Err(BridgeError::FrameSealed));
    }

    #[test]
    fn test_return_read_rules() {
        let mut frame = CallFrame::open();
        assert_eq!(frame.read_return::<i64>(), Err(BridgeError::ReturnSlotUnwritten));

        frame.invoke::<i64>(|_, ret| unsafe { ptr::write(ret as *mut i64, 7) }).unwrap();
        assert_eq!(frame.read_return::<f64>(), Err(BridgeError::ReturnSlotUnwritten));
        assert_eq!(frame.read_return::<i64>(), Ok(7));
        assert_eq!(frame.read_return::<i64>(), Err(BridgeError::ReturnSlotUnwritten));
    }

    #[test]
    fn test_owned_pushes_dropped_on_close() {
        let drops = Rc::new(Cell::new(0));
        let mut frame = CallFrame::open();
        frame.push_owned(Counted(drops.clone())).unwrap();
        frame.push_owned(Counted(drops.clone())).unwrap();
        assert_eq!(drops.get(), 0);
        frame.close();
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_every_frame_closed_once() {
        let before = frame_stats();
        {
            let outer = CallFrame::open();
            let inner = CallFrame::open();
            drop(inner);
            outer.close();
        }
        let after = frame_stats();
        assert_eq!(after.opened - before.opened, 2);
        assert_eq!(after.closed - before.closed, 2);
    }

    #[test]
    fn test_borrowed_push_points_at_caller_storage() {
        let value = 99i64;
        let mut frame = CallFrame::open();
        frame.push_ref(&value).unwrap();
        let mut seen = 0;
        frame
            .invoke::<()>(|args, _| unsafe {
                assert_eq!(*args as *const i64, &value as *const i64);
                seen = *(*args as *const i64);
            })
            .unwrap();
        assert_eq!(seen, 99);
    }
}
