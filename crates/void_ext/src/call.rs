//! Outbound method calls
//!
//! Two calling conventions reach an engine method bind. A pointer call passes
//! typed storage and is fast; a vararg call passes variants and reports
//! failures through the engine's call-error structure.

use std::ptr;

use void_ext_sys::{interface, CallErrorKind, ConstVariantPtr, FfiCallError, ObjectPtr};

use crate::builtin::{Callable, StringName, Variant};
use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;
use crate::meta::{ArgList, FfiType, ToVariant};
use crate::registry::{self, MethodBind};

/// Pointer call of `bind` on `object`
///
/// Arguments are pushed into a call frame in declaration order; the return
/// slot is uninitialized until the engine writes it.
pub fn ptrcall<'f, A, R>(bind: MethodBind, object: ObjectPtr, args: A) -> Result<R>
where
    A: ArgList<'f>,
    R: FfiType,
{
    if object.is_null() {
        return Err(BridgeError::CallError {
            method: format!("{bind:?}"),
            kind: CallErrorKind::InstanceIsNull,
            argument: 0,
            expected: 0,
        });
    }
    let mut frame = CallFrame::open();
    args.push_all(&mut frame)?;
    let iface = interface();
    frame.invoke::<R>(|argv, ret| unsafe { (iface.object_method_bind_ptrcall)(bind.as_ptr(), object, argv, ret) })?;
    frame.finish()
}

/// Vararg call of `bind` on `object`
///
/// `method` names the call in errors.
pub fn varcall(bind: MethodBind, object: ObjectPtr, method: &str, args: &[Variant]) -> Result<Variant> {
    let argv: Vec<ConstVariantPtr> = args.iter().map(Variant::sys).collect();
    let argv_ptr = if argv.is_empty() { ptr::null() } else { argv.as_ptr() };
    let mut error = FfiCallError::OK;
    let ret = unsafe {
        Variant::new_with(|ret| {
            (interface().object_method_bind_call)(bind.as_ptr(), object, argv_ptr, argv.len() as i64, ret, &mut error)
        })
    };
    if error.is_ok() {
        Ok(ret)
    } else {
        Err(BridgeError::from_call_error(method, &error))
    }
}

fn check_code(method: &str, code: i64) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(BridgeError::EngineError { method: method.to_owned(), code })
    }
}

/// `Object.connect` on a raw object
pub(crate) fn object_connect(object: ObjectPtr, signal: &StringName, callable: &Callable, flags: i64) -> Result<()> {
    let bind = registry::bind_method("Object", "connect")?;
    let code: i64 = ptrcall(bind, object, (signal, callable, flags))?;
    check_code("Object.connect", code)
}

/// `Object.emit_signal` on a raw object
pub(crate) fn object_emit(object: ObjectPtr, signal: &StringName, args: &[Variant]) -> Result<()> {
    let bind = registry::bind_method("Object", "emit_signal")?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(signal.to_variant());
    argv.extend(args.iter().cloned());
    let ret = varcall(bind, object, "Object.emit_signal", &argv)?;
    check_code("Object.emit_signal", ret.to::<i64>().unwrap_or(0))
}
