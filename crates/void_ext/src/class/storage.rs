//! Per-instance storage of host values

use std::any::TypeId;
use std::cell::RefCell;

use void_ext_sys::{CallErrorKind, ClassInstancePtr, ObjectPtr};

use super::{register, HostClass};
use crate::error::{BridgeError, Result};
use crate::handles::SlotId;

/// Type-erased prefix of every [`InstanceStorage`]
#[repr(C)]
pub(crate) struct InstanceHeader {
    pub type_id: TypeId,
    pub class_id: u32,
}

/// What the engine's instance pointer points at
#[repr(C)]
pub(crate) struct InstanceStorage<T: HostClass> {
    pub header: InstanceHeader,
    pub base: ObjectPtr,
    /// Borrowed slot of the base object, released with the instance
    pub base_slot: SlotId,
    pub value: RefCell<T>,
}

impl<T: HostClass> InstanceStorage<T> {
    pub fn new(class_id: u32, base: ObjectPtr, base_slot: SlotId, value: T) -> Box<Self> {
        Box::new(Self {
            header: InstanceHeader { type_id: TypeId::of::<T>(), class_id },
            base,
            base_slot,
            value: RefCell::new(value),
        })
    }

    /// Typed view of an instance pointer
    ///
    /// # Safety
    /// `instance` must be null or a pointer produced by this module for an
    /// object that is still alive.
    pub unsafe fn from_instance<'a>(instance: ClassInstancePtr) -> Result<&'a Self> {
        let Some(header) = header_of(instance) else {
            return Err(BridgeError::CallError {
                method: T::NAME.to_owned(),
                kind: CallErrorKind::InstanceIsNull,
                argument: 0,
                expected: 0,
            });
        };
        if header.type_id != TypeId::of::<T>() {
            return Err(BridgeError::ClassMismatch {
                expected: T::NAME.to_owned(),
                found: register::class_name(header.class_id).unwrap_or("<unregistered>").to_owned(),
            });
        }
        Ok(&*(instance as *const Self))
    }
}

/// Header of any instance, without knowing its type
///
/// # Safety
/// As for [`InstanceStorage::from_instance`].
pub(crate) unsafe fn header_of<'a>(instance: ClassInstancePtr) -> Option<&'a InstanceHeader> {
    (instance as *const InstanceHeader).as_ref()
}
