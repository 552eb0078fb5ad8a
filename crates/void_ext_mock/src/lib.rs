//! In-process mock engine
//!
//! Implements every interface function the bridge resolves, over plain Rust
//! data structures, so the bridge can be exercised end to end without an
//! engine binary. Objects and counters are per thread; the class database
//! is process-wide.

pub mod builtins;
pub mod dispatch;
pub mod harness;
pub mod interface;
pub mod methods;
pub mod stats;
pub mod value;
pub mod world;

pub use dispatch::{
    call_object_method as call_method, call_virtual, connect, construct, destroy, emit, get_property, notify,
    object_to_string, property_list, ptrcall_ext, set_property, varcall_ext, virtual_for, ERR_INVALID_PARAMETER,
    ERR_UNAVAILABLE, OK,
};
pub use harness::{exclusive, library_token, load_extension, EntryFn, LoadedExtension};
pub use interface::{engine_version, get_proc_address, hide_symbol, reveal_all, set_engine_version};
pub use stats::{errors, reports, reset_stats, stats, Reported, Severity, Stats};
pub use value::{intern, name_of, CallableData, MockVariant, PackedData, Slot, Value};
pub use world::{
    class_of, class_shape, connection_count, ext_class, instance_of, live_objects, object_exists, refcount,
    registered_classes, with_object, ClassShape, ExtProperty, ExtSignal,
};

/// Call a method of a registered extension class through its pointer-call entry
///
/// `None` when the class or method is unknown or the argument count differs.
pub fn ptrcall_method(ptr: usize, method: &str, args: &[Value]) -> Option<Value> {
    let class = world::class_of(ptr)?;
    let ext = world::find_ext_method(&class, method)?;
    dispatch::ptrcall_ext(&ext, world::instance_of(ptr), args)
}
