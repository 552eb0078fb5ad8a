//! Tracked object handles

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;

use void_ext_sys::{
    interface, library, ConstTypePtr, ObjectId, ObjectPtr, OpaqueStringName, StringNamePtr, VariantType, TRUE,
};

use super::{destroy, init_ref, reference, unreference, EngineClass, Inherits, Object};
use crate::builtin::{Callable, StringName, Variant};
use crate::call;
use crate::class;
use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;
use crate::handles::{HandleTable, Regime, ScopeId, SlotId};
use crate::meta::{typed_from, variant_from, ArgList, FfiType, FromVariant, ToArg, ToVariant};
use crate::registry;

/// Handle to an engine object of class `T`
///
/// Each handle owns one table slot. Dropping it releases the slot according
/// to its regime: a ref-counted object loses one reference, an exclusively
/// owned object is destroyed, a borrowed or singleton object is left alone.
///
/// Handles are bound to the thread that made them: `Gd` is neither `Send`
/// nor `Sync`, even for exclusive and ref-counted objects the engine would
/// let threads share. Pass the instance id across threads and resolve it
/// with [`Gd::from_instance_id`] on the receiving side.
pub struct Gd<T: EngineClass> {
    slot: Cell<SlotId>,
    id: ObjectId,
    _marker: PhantomData<*const T>,
}

impl<T: EngineClass> Gd<T> {
    // ========== Creation ==========

    /// Construct a new `T`
    ///
    /// Ref-counted objects start with one reference held by this handle;
    /// anything else is owned exclusively until handed to the engine.
    pub fn construct() -> Result<Self> {
        let ptr = registry::construct_raw(T::CLASS_NAME)?;
        let regime = if registry::is_ref_counted(ptr) {
            if let Err(err) = init_ref(ptr) {
                destroy(ptr);
                return Err(err);
            }
            Regime::RefCounted
        } else {
            Regime::Exclusive
        };
        Self::track(ptr, regime)
    }

    /// The engine singleton of class `T`
    pub fn singleton() -> Result<Self> {
        let ptr = registry::singleton_raw(T::CLASS_NAME)?;
        Self::track(ptr, Regime::Singleton)
    }

    /// New handle to the live object with instance id `id`
    ///
    /// Ref-counted objects gain a reference; anything else is borrowed from
    /// the engine.
    pub fn from_instance_id(id: ObjectId) -> Result<Self> {
        let ptr = unsafe { (interface().object_get_instance_from_id)(id) };
        if ptr.is_null() {
            return Err(BridgeError::UseAfterFree(SlotId::DANGLING));
        }
        unsafe { Self::from_borrowed_ptr(ptr) }
    }

    fn track(ptr: ObjectPtr, regime: Regime) -> Result<Self> {
        let id = unsafe { (interface().object_get_instance_id)(ptr) };
        let slot = HandleTable::global().track(ptr as usize, regime)?;
        Ok(Self { slot: Cell::new(slot), id, _marker: PhantomData })
    }

    /// Adopt an object from a return slot; a reference travels with it
    ///
    /// # Safety
    /// `ptr` must be null or a live engine object.
    pub(crate) unsafe fn from_owned_ptr(ptr: ObjectPtr) -> Result<Self> {
        let ref_counted = !ptr.is_null() && registry::is_ref_counted(ptr);
        if let Err(err) = check_class::<T>(ptr) {
            if ref_counted && unreference(ptr).unwrap_or(false) {
                destroy(ptr);
            }
            return Err(err);
        }
        let regime = if ref_counted { Regime::RefCounted } else { Regime::Borrowed(ScopeId::ENGINE) };
        Self::track(ptr, regime)
    }

    /// Track an object lent through an argument slot or a variant
    ///
    /// # Safety
    /// `ptr` must be null or a live engine object.
    pub(crate) unsafe fn from_borrowed_ptr(ptr: ObjectPtr) -> Result<Self> {
        check_class::<T>(ptr)?;
        if registry::is_ref_counted(ptr) {
            reference(ptr)?;
            Self::track(ptr, Regime::RefCounted)
        } else {
            Self::track(ptr, Regime::Borrowed(ScopeId::ENGINE))
        }
    }

    // ========== Access ==========

    /// Table slot owned by this handle
    pub fn slot(&self) -> SlotId {
        self.slot.get()
    }

    /// Lifetime regime of this handle
    pub fn regime(&self) -> Result<Regime> {
        HandleTable::global().regime(self.slot())
    }

    /// Raw object pointer, checked against the engine's instance registry
    pub fn raw(&self) -> Result<ObjectPtr> {
        let slot = self.slot();
        let ptr = HandleTable::global().get(slot)? as ObjectPtr;
        let current = unsafe { (interface().object_get_instance_from_id)(self.id) };
        if current != ptr {
            return Err(BridgeError::UseAfterFree(slot));
        }
        Ok(ptr)
    }

    /// Whether the object is still alive
    pub fn is_instance_valid(&self) -> bool {
        self.raw().is_ok()
    }

    /// Engine instance id, stable for the object's lifetime
    pub fn instance_id(&self) -> Result<ObjectId> {
        self.raw().map(|_| self.id)
    }

    /// Dynamic class name, which may be more derived than `T`
    pub fn get_class(&self) -> Result<String> {
        Ok(class_name_of(self.raw()?).to_string())
    }

    /// Variant holding this object
    ///
    /// Fails with `UseAfterFree` once the object is gone, where
    /// [`to_variant`](ToVariant::to_variant) reports the error and yields nil.
    pub fn try_to_variant(&self) -> Result<Variant> {
        self.raw()?;
        Ok(variant_from(self))
    }

    // ========== Casts ==========

    /// Reinterpret as `U` if the object is one
    pub fn try_cast<U: EngineClass>(self) -> std::result::Result<Gd<U>, Self> {
        match self.raw() {
            Ok(ptr) if check_class::<U>(ptr).is_ok() => Ok(self.retype()),
            _ => Err(self),
        }
    }

    /// View as an ancestor class
    pub fn upcast<U: EngineClass>(self) -> Gd<U>
    where
        T: Inherits<U>,
    {
        self.retype()
    }

    fn retype<U: EngineClass>(self) -> Gd<U> {
        let this = ManuallyDrop::new(self);
        Gd { slot: Cell::new(this.slot()), id: this.id, _marker: PhantomData }
    }

    // ========== Ownership ==========

    /// Destroy the object now
    ///
    /// Ref-counted objects are never destroyed directly; for them this only
    /// drops the handle's reference.
    pub fn free(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        let table = HandleTable::global();
        let slot = this.slot();
        match table.regime(slot)? {
            Regime::Borrowed(_) => {
                let ptr = this.raw()?;
                table.forget(slot)?;
                destroy(ptr);
                Ok(())
            }
            Regime::Exclusive | Regime::RefCounted | Regime::Singleton => table.release(slot),
        }
    }

    /// The engine now owns the object; dropping this handle leaves it alone
    pub(crate) fn demote(&self) -> Result<()> {
        let table = HandleTable::global();
        if table.regime(self.slot())? == Regime::Exclusive {
            let slot = table.retrack(self.slot(), Regime::Borrowed(ScopeId::ENGINE))?;
            self.slot.set(slot);
        }
        Ok(())
    }

    // ========== Calls ==========

    /// Pointer call of `class.method` on this object
    pub(crate) fn ptrcall<'f, A, R>(&self, class: &str, method: &str, args: A) -> Result<R>
    where
        A: ArgList<'f>,
        R: FfiType,
    {
        let bind = registry::bind_method(class, method)?;
        call::ptrcall(bind, self.raw()?, args)
    }

    fn object_varcall(&self, method: &str, args: &[Variant]) -> Result<Variant> {
        let bind = registry::bind_method(Object::CLASS_NAME, method)?;
        call::varcall(bind, self.raw()?, method, args)
    }

    /// Call any method by name, including script and host methods
    pub fn call(&self, method: &str, args: &[Variant]) -> Result<Variant> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(StringName::from(method).to_variant());
        argv.extend(args.iter().cloned());
        self.object_varcall("call", &argv)
    }

    pub fn has_method(&self, method: &str) -> Result<bool> {
        self.ptrcall(Object::CLASS_NAME, "has_method", (StringName::from(method),))
    }

    // ========== Properties ==========

    /// Read property `name` through the engine's keyed access
    pub fn get_property(&self, name: &str) -> Result<Variant> {
        let object = self.try_to_variant()?;
        self.check_property(name)?;
        let (value, valid) = object.get_keyed(&StringName::from(name).to_variant());
        if valid {
            Ok(value)
        } else {
            Err(self.no_such_property(name))
        }
    }

    /// Write property `name`
    ///
    /// The property must exist; a value the object rejects fails with the
    /// property's current type as the expected one.
    pub fn set_property(&self, name: &str, value: &Variant) -> Result<()> {
        let current = self.get_property(name)?;
        let mut object = self.try_to_variant()?;
        if object.set_keyed(&StringName::from(name).to_variant(), value) {
            Ok(())
        } else {
            Err(BridgeError::wrong_type(current.get_type(), value.get_type()))
        }
    }

    fn check_property(&self, name: &str) -> Result<()> {
        let class = self.get_class()?;
        match class::has_property(&class, name) {
            Some(false) => Err(BridgeError::NoSuchProperty { class, property: name.to_owned() }),
            _ => Ok(()),
        }
    }

    fn no_such_property(&self, name: &str) -> BridgeError {
        BridgeError::NoSuchProperty {
            class: self.get_class().unwrap_or_else(|_| T::CLASS_NAME.to_owned()),
            property: name.to_owned(),
        }
    }

    /// Emit `signal` with `args`
    pub fn emit_signal(&self, signal: &str, args: &[Variant]) -> Result<()> {
        call::object_emit(self.raw()?, &StringName::from(signal), args)
    }

    /// Connect `callable` to `signal`
    pub fn connect(&self, signal: &str, callable: &Callable) -> Result<()> {
        call::object_connect(self.raw()?, &StringName::from(signal), callable, 0)
    }
}

/// Dynamic class name of a live object
pub(crate) fn class_name_of(ptr: ObjectPtr) -> StringName {
    let mut raw = MaybeUninit::<OpaqueStringName>::uninit();
    let ok = unsafe { (interface().object_get_class_name)(ptr, library(), raw.as_mut_ptr() as StringNamePtr) };
    if ok == TRUE {
        unsafe { StringName::from_opaque(raw.assume_init()) }
    } else {
        StringName::default()
    }
}

fn check_class<T: EngineClass>(ptr: ObjectPtr) -> Result<()> {
    if ptr.is_null() {
        return Err(BridgeError::wrong_type(VariantType::Object, VariantType::Nil));
    }
    if T::CLASS_NAME == Object::CLASS_NAME {
        return Ok(());
    }
    let tag = registry::class_tag(T::CLASS_NAME)?;
    if unsafe { (interface().object_cast_to)(ptr, tag) }.is_null() {
        Err(BridgeError::ClassMismatch {
            expected: T::CLASS_NAME.to_owned(),
            found: class_name_of(ptr).to_string(),
        })
    } else {
        Ok(())
    }
}

impl<T: EngineClass> Clone for Gd<T> {
    /// Another handle to the same object
    ///
    /// Clones of a ref-counted handle hold their own reference. Clones of an
    /// exclusive handle only borrow; the original stays the owner.
    fn clone(&self) -> Self {
        let table = HandleTable::global();
        let slot = self.slot();
        let cloned = match (table.get(slot), table.regime(slot)) {
            (Ok(handle), Ok(regime)) => {
                let regime = match regime {
                    Regime::RefCounted if reference(handle as ObjectPtr).is_ok() => Regime::RefCounted,
                    Regime::Singleton => Regime::Singleton,
                    Regime::Borrowed(scope) => Regime::Borrowed(scope),
                    _ => Regime::Borrowed(ScopeId::ENGINE),
                };
                table.track(handle, regime).unwrap_or(SlotId::DANGLING)
            }
            _ => SlotId::DANGLING,
        };
        Self { slot: Cell::new(cloned), id: self.id, _marker: PhantomData }
    }
}

impl<T: EngineClass> Drop for Gd<T> {
    fn drop(&mut self) {
        let slot = self.slot();
        if slot != SlotId::DANGLING {
            let _ = HandleTable::global().release(slot);
        }
    }
}

impl<T: EngineClass> PartialEq for Gd<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: EngineClass> Eq for Gd<T> {}

impl<T: EngineClass> fmt::Debug for Gd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gd<{}>(#{})", T::CLASS_NAME, self.id)
    }
}

// ============================================================================
// Marshalling
// ============================================================================

impl<T: EngineClass> FfiType for Gd<T> {
    type Ffi = ObjectPtr;
    const VARIANT_TYPE: VariantType = VariantType::Object;

    fn class_name() -> &'static str {
        T::CLASS_NAME
    }

    /// The engine receives the handle's claim: its reference or ownership
    fn into_ffi(self) -> ObjectPtr {
        let this = ManuallyDrop::new(self);
        match HandleTable::global().forget(this.slot()) {
            Ok(handle) => handle as ObjectPtr,
            Err(_) => ptr::null_mut(),
        }
    }

    fn as_arg(&self) -> ObjectPtr {
        self.raw().unwrap_or(ptr::null_mut())
    }

    unsafe fn from_ffi(ffi: ObjectPtr) -> Result<Self> {
        Self::from_owned_ptr(ffi)
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Self::from_borrowed_ptr(*(ptr as *const ObjectPtr))
    }

    unsafe fn from_variant_ffi(ffi: ObjectPtr) -> Result<Self> {
        Self::from_borrowed_ptr(ffi)
    }

    fn ffi_default() -> ObjectPtr {
        ptr::null_mut()
    }
}

impl<T: EngineClass> FfiType for Option<Gd<T>> {
    type Ffi = ObjectPtr;
    const VARIANT_TYPE: VariantType = VariantType::Object;

    fn class_name() -> &'static str {
        T::CLASS_NAME
    }

    fn into_ffi(self) -> ObjectPtr {
        self.map_or(ptr::null_mut(), Gd::into_ffi)
    }

    fn as_arg(&self) -> ObjectPtr {
        self.as_ref().map_or(ptr::null_mut(), Gd::as_arg)
    }

    unsafe fn from_ffi(ffi: ObjectPtr) -> Result<Self> {
        if ffi.is_null() {
            Ok(None)
        } else {
            Gd::from_owned_ptr(ffi).map(Some)
        }
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        let object = *(ptr as *const ObjectPtr);
        if object.is_null() {
            Ok(None)
        } else {
            Gd::from_borrowed_ptr(object).map(Some)
        }
    }

    unsafe fn from_variant_ffi(ffi: ObjectPtr) -> Result<Self> {
        if ffi.is_null() {
            Ok(None)
        } else {
            Gd::from_borrowed_ptr(ffi).map(Some)
        }
    }

    fn ffi_default() -> ObjectPtr {
        ptr::null_mut()
    }
}

impl<T: EngineClass> ToVariant for Gd<T> {
    fn to_variant(&self) -> Variant {
        self.try_to_variant().unwrap_or_else(|err| {
            log::error!("{self:?} converted to nil: {err}");
            Variant::nil()
        })
    }
}

impl<T: EngineClass> FromVariant for Gd<T> {
    fn from_variant(variant: &Variant) -> Result<Self> {
        typed_from(variant)
    }

    /// A null object is empty, the same as nil
    fn from_variant_opt(variant: &Variant) -> Result<Option<Self>> {
        if variant.is_nil() {
            Ok(None)
        } else {
            typed_from::<Option<Self>>(variant)
        }
    }
}

impl<'f, T: EngineClass> ToArg<'f> for &'f Gd<T> {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_value(self.raw()?)
    }
}
