//! Host-defined classes
//!
//! A host class is a Rust type the engine sees as a subclass of an engine
//! class. The engine allocates the base object; the host value lives next to
//! it in an [`InstanceStorage`] and is reached through the instance pointer
//! the engine passes to every callback.
//!
//! ```ignore
//! struct Counter {
//!     base: Base<Node>,
//!     count: i64,
//! }
//!
//! impl HostClass for Counter {
//!     const NAME: &'static str = "Counter";
//!     type Base = Node;
//!
//!     fn init(base: Base<Node>) -> Self {
//!         Self { base, count: 0 }
//!     }
//!
//!     fn register(builder: &mut ClassBuilder<Self>) {
//!         builder
//!             .method("increment", |this: &mut Self, (by,): (i64,)| {
//!                 this.count += by;
//!                 this.count
//!             })
//!             .signal("changed", &[("count", VariantType::Int)]);
//!     }
//! }
//! ```

mod builder;
mod callbacks;
mod register;
mod storage;

use std::cell::{Ref, RefMut};
use std::fmt;
use std::marker::PhantomData;

use void_ext_sys::{interface, ClassInstancePtr, InitLevel, ObjectId, ObjectPtr};

use crate::error::{BridgeError, Result};
use crate::obj::{EngineClass, Gd, Inherits};

pub use builder::{ClassBuilder, PropertyHint, MAX_VIRTUALS};
pub use register::{
    is_registered, live_instances, register_class, registered_classes, unregister_all, unregister_class,
};
pub(crate) use register::has_property;
pub(crate) use storage::InstanceStorage;

/// A Rust type exposed to the engine as a class
pub trait HostClass: Sized + 'static {
    /// Engine-visible class name; unique across the engine
    const NAME: &'static str;

    /// Level at which the class is registered
    const INIT_LEVEL: InitLevel = InitLevel::Scene;

    /// Abstract classes are registered but cannot be instantiated
    const ABSTRACT: bool = false;

    /// Parent class
    type Base: EngineClass;

    /// Build the host value for a freshly allocated base object
    fn init(base: Base<Self::Base>) -> Self;

    /// Declare methods, properties, signals and virtual overrides
    fn register(_builder: &mut ClassBuilder<Self>) {}

    /// Engine notification
    fn notification(&mut self, _what: i32) {}

    /// Text the engine prints for the object; `None` keeps the default
    fn to_string(&self) -> Option<String> {
        None
    }
}

impl<T: HostClass> EngineClass for T {
    const CLASS_NAME: &'static str = T::NAME;
    const ENGINE_BASE: &'static str = <T::Base as EngineClass>::ENGINE_BASE;
    type Parent = T::Base;
}

unsafe impl<T, B> Inherits<B> for T
where
    T: HostClass,
    B: EngineClass,
    T::Base: Inherits<B>,
{
}

// ============================================================================
// Base
// ============================================================================

/// The engine object a host instance extends
///
/// Stored inside the host value. It does not keep the object alive; the
/// object owns the host value, not the other way round.
pub struct Base<B: EngineClass> {
    ptr: ObjectPtr,
    id: ObjectId,
    _marker: PhantomData<*const B>,
}

impl<B: EngineClass> Base<B> {
    pub(crate) fn new(ptr: ObjectPtr, id: ObjectId) -> Self {
        Self { ptr, id, _marker: PhantomData }
    }

    /// Handle to the base object
    pub fn to_gd(&self) -> Result<Gd<B>> {
        unsafe { Gd::from_borrowed_ptr(self.ptr) }
    }

    pub fn instance_id(&self) -> ObjectId {
        self.id
    }
}

impl<B: EngineClass> fmt::Debug for Base<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base<{}>(#{})", B::CLASS_NAME, self.id)
    }
}

// ============================================================================
// Instance access
// ============================================================================

/// Run `f` on the host value behind an engine instance pointer
///
/// Fails with [`BridgeError::InstanceBusy`] if the value is already borrowed,
/// which happens when a callback re-enters the same instance.
pub(crate) fn with_instance_mut<T, R>(instance: ClassInstancePtr, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R>
where
    T: HostClass,
{
    let storage = unsafe { InstanceStorage::<T>::from_instance(instance)? };
    let mut value = storage.value.try_borrow_mut().map_err(|_| BridgeError::InstanceBusy { class: T::NAME })?;
    f(&mut value)
}

/// Shared-borrow variant of [`with_instance_mut`]
pub(crate) fn with_instance<T, R>(instance: ClassInstancePtr, f: impl FnOnce(&T) -> Result<R>) -> Result<R>
where
    T: HostClass,
{
    let storage = unsafe { InstanceStorage::<T>::from_instance(instance)? };
    let value = storage.value.try_borrow().map_err(|_| BridgeError::InstanceBusy { class: T::NAME })?;
    f(&value)
}

impl<T: HostClass> Gd<T> {
    /// Construct through the engine, so the engine runs [`HostClass::init`]
    pub fn new_instance() -> Result<Self> {
        Self::construct()
    }

    fn storage(&self) -> Result<&InstanceStorage<T>> {
        let ptr = self.raw()?;
        let instance = unsafe { (interface().object_get_instance)(ptr) };
        unsafe { InstanceStorage::<T>::from_instance(instance) }
    }

    /// Shared access to the host value
    pub fn bind(&self) -> Result<Ref<'_, T>> {
        self.storage()?.value.try_borrow().map_err(|_| BridgeError::InstanceBusy { class: T::NAME })
    }

    /// Exclusive access to the host value
    pub fn bind_mut(&self) -> Result<RefMut<'_, T>> {
        self.storage()?.value.try_borrow_mut().map_err(|_| BridgeError::InstanceBusy { class: T::NAME })
    }
}
