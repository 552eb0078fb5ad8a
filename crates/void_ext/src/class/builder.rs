//! Declaring the members of a host class

use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use void_ext_sys::{
    ClassInstancePtr, ConstTypePtr, TypePtr, VariantType, METHOD_FLAGS_DEFAULT, METHOD_FLAG_CONST, PROPERTY_HINT_ENUM,
    PROPERTY_HINT_NONE, PROPERTY_HINT_RANGE, PROPERTY_USAGE_DEFAULT,
};

use super::{with_instance, with_instance_mut, HostClass};
use crate::builtin::Variant;
use crate::error::{BridgeError, Result};
use crate::meta::{write_default, write_return, FfiType, FromVariant, ParamInfo, ParamList, ToVariant};
use crate::obj::find_virtual;

/// Most virtual overrides one class may declare
pub const MAX_VIRTUALS: usize = 32;

pub(crate) type PtrcallFn = dyn Fn(ClassInstancePtr, *const ConstTypePtr, TypePtr) -> Result<()> + Send + Sync;
pub(crate) type VarcallFn = dyn Fn(ClassInstancePtr, &[&Variant]) -> Result<Variant> + Send + Sync;
pub(crate) type GetterFn = dyn Fn(ClassInstancePtr) -> Result<Variant> + Send + Sync;
pub(crate) type SetterFn = dyn Fn(ClassInstancePtr, &Variant) -> Result<()> + Send + Sync;

pub(crate) struct MethodEntry {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub ret: Option<ParamInfo>,
    pub flags: u32,
    pub ptrcall: Box<PtrcallFn>,
    pub varcall: Box<VarcallFn>,
    /// Fills the return slot when the host fails
    pub write_default: unsafe fn(TypePtr),
}

pub(crate) struct PropertyEntry {
    pub name: String,
    pub info: ParamInfo,
    pub hint: PropertyHint,
    pub get: Box<GetterFn>,
    pub set: Box<SetterFn>,
}

pub(crate) struct SignalEntry {
    pub name: String,
    pub params: Vec<(String, VariantType)>,
}

pub(crate) struct VirtualEntry {
    /// Engine name, with its leading underscore
    pub name: String,
    pub call: Box<PtrcallFn>,
    pub write_default: unsafe fn(TypePtr),
}

/// Everything a class declared, validated
pub(crate) struct ClassMembers {
    pub methods: Vec<MethodEntry>,
    pub properties: Vec<PropertyEntry>,
    pub signals: Vec<SignalEntry>,
    pub virtuals: Vec<VirtualEntry>,
}

/// Editor hint attached to a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyHint {
    pub hint: u32,
    pub hint_string: String,
    pub usage: u32,
}

impl PropertyHint {
    pub fn none() -> Self {
        Self { hint: PROPERTY_HINT_NONE, hint_string: String::new(), usage: PROPERTY_USAGE_DEFAULT }
    }

    /// Numeric range, edited with a slider
    pub fn range(min: f64, max: f64, step: f64) -> Self {
        Self { hint: PROPERTY_HINT_RANGE, hint_string: format!("{min},{max},{step}"), ..Self::none() }
    }

    /// One of a fixed list of names
    pub fn enumeration(names: &[&str]) -> Self {
        Self { hint: PROPERTY_HINT_ENUM, hint_string: names.join(","), ..Self::none() }
    }

    pub fn with_usage(mut self, usage: u32) -> Self {
        self.usage = usage;
        self
    }
}

impl Default for PropertyHint {
    fn default() -> Self {
        Self::none()
    }
}

/// Declared return of a callable member; `None` for `()`
fn return_info<R: FfiType>() -> Option<ParamInfo> {
    if size_of::<R::Ffi>() == 0 {
        None
    } else {
        Some(ParamInfo::of::<R>())
    }
}

/// `process` and `_process` both name the engine's `_process`
fn virtual_name(name: &str) -> String {
    if name.starts_with('_') {
        name.to_owned()
    } else {
        format!("_{name}")
    }
}

// ============================================================================
// ClassBuilder
// ============================================================================

/// Collects the members of `T` during [`HostClass::register`]
///
/// Declaration errors are collected and reported when registration
/// finishes; the first one fails the registration.
pub struct ClassBuilder<T: HostClass> {
    methods: Vec<MethodEntry>,
    properties: Vec<PropertyEntry>,
    signals: Vec<SignalEntry>,
    virtuals: Vec<VirtualEntry>,
    errors: Vec<BridgeError>,
    _marker: PhantomData<fn(T)>,
}

impl<T: HostClass> ClassBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            methods: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            virtuals: Vec::new(),
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn conflict(&mut self, member: &str) {
        self.errors.push(BridgeError::RegistrationConflict(format!("{}.{}", T::NAME, member)));
    }

    // ========== Methods ==========

    /// Method callable from the engine and from scripts
    pub fn method<P, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        P: ParamList,
        R: FfiType + ToVariant,
        F: Fn(&mut T, P) -> R + Send + Sync + 'static,
    {
        self.method_result(name, move |this: &mut T, args: P| Ok(f(this, args)))
    }

    /// Method whose body can fail
    ///
    /// An `Err` is reported to the engine's error sink and the caller
    /// receives the default value of `R`.
    pub fn method_result<P, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        P: ParamList,
        R: FfiType + ToVariant,
        F: Fn(&mut T, P) -> Result<R> + Send + Sync + 'static,
    {
        self.push_method::<P, R, F>(name, METHOD_FLAGS_DEFAULT, f)
    }

    /// Method that only reads the instance
    pub fn const_method<P, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        P: ParamList,
        R: FfiType + ToVariant,
        F: Fn(&T, P) -> R + Send + Sync + 'static,
    {
        self.push_method::<P, R, _>(name, METHOD_FLAGS_DEFAULT | METHOD_FLAG_CONST, move |this: &mut T, args: P| {
            Ok(f(this, args))
        })
    }

    fn push_method<P, R, F>(&mut self, name: &str, flags: u32, f: F) -> &mut Self
    where
        P: ParamList,
        R: FfiType + ToVariant,
        F: Fn(&mut T, P) -> Result<R> + Send + Sync + 'static,
    {
        if self.methods.iter().any(|m| m.name == name) {
            self.conflict(name);
            return self;
        }

        let f = Arc::new(f);
        let by_ptr = Arc::clone(&f);
        let ptrcall = move |instance: ClassInstancePtr, args: *const ConstTypePtr, ret: TypePtr| -> Result<()> {
            let params = unsafe { P::from_args(args)? };
            let value = with_instance_mut::<T, _>(instance, |this| by_ptr(this, params))?;
            unsafe { write_return(ret, value) };
            Ok(())
        };
        let varcall = move |instance: ClassInstancePtr, args: &[&Variant]| -> Result<Variant> {
            let params = P::from_variants(args)?;
            let value = with_instance_mut::<T, _>(instance, |this| f(this, params))?;
            Ok(value.to_variant())
        };

        self.methods.push(MethodEntry {
            name: name.to_owned(),
            params: P::param_infos(),
            ret: return_info::<R>(),
            flags,
            ptrcall: Box::new(ptrcall),
            varcall: Box::new(varcall),
            write_default: write_default::<R>,
        });
        self
    }

    // ========== Properties ==========

    /// Property read and written through host accessors
    pub fn property<V, G, S>(&mut self, name: &str, getter: G, setter: S) -> &mut Self
    where
        V: FfiType + ToVariant + FromVariant,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.property_hinted(name, PropertyHint::none(), getter, setter)
    }

    /// Property with an editor hint
    pub fn property_hinted<V, G, S>(&mut self, name: &str, hint: PropertyHint, getter: G, setter: S) -> &mut Self
    where
        V: FfiType + ToVariant + FromVariant,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        if self.properties.iter().any(|p| p.name == name) {
            self.conflict(name);
            return self;
        }

        let get = move |instance: ClassInstancePtr| -> Result<Variant> {
            with_instance::<T, _>(instance, |this| Ok(getter(this).to_variant()))
        };
        let set = move |instance: ClassInstancePtr, value: &Variant| -> Result<()> {
            let value = V::from_variant(value)?;
            with_instance_mut::<T, _>(instance, |this| {
                setter(this, value);
                Ok(())
            })
        };

        self.properties.push(PropertyEntry {
            name: name.to_owned(),
            info: ParamInfo::of::<V>(),
            hint,
            get: Box::new(get),
            set: Box::new(set),
        });
        self
    }

    // ========== Signals ==========

    /// Signal with named, typed parameters
    pub fn signal(&mut self, name: &str, params: &[(&str, VariantType)]) -> &mut Self {
        if self.signals.iter().any(|s| s.name == name) {
            self.conflict(name);
            return self;
        }
        self.signals.push(SignalEntry {
            name: name.to_owned(),
            params: params.iter().map(|(n, ty)| ((*n).to_owned(), *ty)).collect(),
        });
        self
    }

    // ========== Virtuals ==========

    /// Override a virtual method of an ancestor
    ///
    /// The override must match the declared parameter and return types
    /// exactly; anything else fails registration with
    /// [`BridgeError::VirtualMismatch`].
    pub fn virtual_method<P, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        P: ParamList,
        R: FfiType,
        F: Fn(&mut T, P) -> R + Send + Sync + 'static,
    {
        let name = virtual_name(name);
        let params: Vec<VariantType> = P::param_infos().iter().map(|p| p.ty).collect();
        let ret = return_info::<R>().map(|p| p.ty);
        let matches = match find_virtual::<T::Base>(&name) {
            Some(signature) => signature.args == params.as_slice() && signature.ret == ret,
            None => false,
        };
        if !matches {
            self.errors.push(BridgeError::VirtualMismatch { class: T::NAME.to_owned(), method: name });
            return self;
        }
        if self.virtuals.iter().any(|v| v.name == name) {
            self.conflict(&name);
            return self;
        }

        let call = move |instance: ClassInstancePtr, args: *const ConstTypePtr, ret: TypePtr| -> Result<()> {
            let params = unsafe { P::from_args(args)? };
            let value = with_instance_mut::<T, _>(instance, |this| Ok(f(this, params)))?;
            unsafe { write_return(ret, value) };
            Ok(())
        };
        self.virtuals.push(VirtualEntry { name, call: Box::new(call), write_default: write_default::<R> });
        self
    }

    // ========== Finishing ==========

    pub(crate) fn finish(self) -> Result<ClassMembers> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if self.virtuals.len() > MAX_VIRTUALS {
            return Err(BridgeError::TooManyVirtuals { class: T::NAME.to_owned(), count: self.virtuals.len() });
        }
        Ok(ClassMembers {
            methods: self.methods,
            properties: self.properties,
            signals: self.signals,
            virtuals: self.virtuals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_name_normalized() {
        assert_eq!(virtual_name("process"), "_process");
        assert_eq!(virtual_name("_ready"), "_ready");
    }

    #[test]
    fn test_unit_return_has_no_info() {
        assert!(return_info::<()>().is_none());
        assert_eq!(return_info::<i64>().map(|p| p.ty), Some(VariantType::Int));
        assert_eq!(return_info::<Variant>().map(|p| p.ty), Some(VariantType::Nil));
    }

    #[test]
    fn test_range_hint_string() {
        let hint = PropertyHint::range(0.0, 10.0, 0.5);
        assert_eq!(hint.hint, PROPERTY_HINT_RANGE);
        assert_eq!(hint.hint_string, "0,10,0.5");
        assert_eq!(PropertyHint::enumeration(&["Low", "High"]).hint_string, "Low,High");
    }
}
