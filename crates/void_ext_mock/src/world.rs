//! Object world and class database
//!
//! Objects live in a thread-local world so tests running in parallel never
//! see each other's objects. The extension class database is process-wide,
//! as in a real engine; tests register distinct class names.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use void_ext_sys::*;

use crate::value::CallableData;

// ============================================================================
// Engine classes
// ============================================================================

/// Signature of an engine virtual method
#[derive(Debug, Clone, Copy)]
pub struct VirtualInfo {
    pub name: &'static str,
    pub args: &'static [VariantType],
    pub ret: Option<VariantType>,
}

/// A class built into the engine
#[derive(Debug)]
pub struct EngineClassInfo {
    pub name: &'static str,
    pub parent: Option<&'static str>,
    pub ref_counted: bool,
    pub instantiable: bool,
    pub signals: &'static [&'static str],
    pub virtuals: &'static [VirtualInfo],
}

pub static ENGINE_CLASSES: &[EngineClassInfo] = &[
    EngineClassInfo {
        name: "Object",
        parent: None,
        ref_counted: false,
        instantiable: true,
        signals: &["script_changed"],
        virtuals: &[],
    },
    EngineClassInfo {
        name: "RefCounted",
        parent: Some("Object"),
        ref_counted: true,
        instantiable: true,
        signals: &[],
        virtuals: &[],
    },
    EngineClassInfo {
        name: "Node",
        parent: Some("Object"),
        ref_counted: false,
        instantiable: true,
        signals: &["ready", "renamed", "tree_entered"],
        virtuals: &[
            VirtualInfo { name: "_process", args: &[VariantType::Float], ret: None },
            VirtualInfo { name: "_physics_process", args: &[VariantType::Float], ret: None },
            VirtualInfo { name: "_ready", args: &[], ret: None },
            VirtualInfo { name: "_enter_tree", args: &[], ret: None },
            VirtualInfo { name: "_exit_tree", args: &[], ret: None },
            VirtualInfo {
                name: "_get_configuration_warnings",
                args: &[],
                ret: Some(VariantType::PackedStringArray),
            },
        ],
    },
    EngineClassInfo {
        name: "Node2D",
        parent: Some("Node"),
        ref_counted: false,
        instantiable: true,
        signals: &[],
        virtuals: &[],
    },
    EngineClassInfo {
        name: "Resource",
        parent: Some("RefCounted"),
        ref_counted: true,
        instantiable: true,
        signals: &["changed"],
        virtuals: &[VirtualInfo { name: "_setup_local_to_scene", args: &[], ret: None }],
    },
    EngineClassInfo {
        name: "Engine",
        parent: Some("Object"),
        ref_counted: false,
        instantiable: false,
        signals: &[],
        virtuals: &[],
    },
];

pub fn engine_class(name: &str) -> Option<&'static EngineClassInfo> {
    ENGINE_CLASSES.iter().find(|c| c.name == name)
}

// ============================================================================
// Extension class database
// ============================================================================

/// Inbound callbacks of a registered class
#[derive(Debug, Clone, Copy)]
pub struct Callbacks {
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub set: Option<ClassSetFn>,
    pub get: Option<ClassGetFn>,
    pub get_property_list: Option<ClassGetPropertyListFn>,
    pub free_property_list: Option<ClassFreePropertyListFn>,
    pub notification: Option<ClassNotificationFn>,
    pub to_string: Option<ClassToStringFn>,
    pub create_instance: Option<ClassCreateInstanceFn>,
    pub free_instance: Option<ClassFreeInstanceFn>,
    pub get_virtual: Option<ClassGetVirtualFn>,
    pub userdata: usize,
}

impl Callbacks {
    pub(crate) fn from_info(info: &FfiClassCreationInfo) -> Self {
        Self {
            is_virtual: info.is_virtual != 0,
            is_abstract: info.is_abstract != 0,
            set: info.set_func,
            get: info.get_func,
            get_property_list: info.get_property_list_func,
            free_property_list: info.free_property_list_func,
            notification: info.notification_func,
            to_string: info.to_string_func,
            create_instance: info.create_instance_func,
            free_instance: info.free_instance_func,
            get_virtual: info.get_virtual_func,
            userdata: info.class_userdata as usize,
        }
    }
}

/// A method registered by an extension
#[derive(Debug, Clone)]
pub struct ExtMethod {
    pub name: String,
    pub userdata: usize,
    pub call: Option<ClassMethodCallFn>,
    pub ptrcall: Option<ClassMethodPtrCallFn>,
    pub flags: u32,
    pub ret: Option<VariantType>,
    pub args: Vec<VariantType>,
    pub arg_names: Vec<String>,
}

/// A property registered by an extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtProperty {
    pub name: String,
    pub ty: VariantType,
    pub class_name: String,
    pub hint: u32,
    pub hint_string: String,
    pub usage: u32,
}

/// A signal registered by an extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtSignal {
    pub name: String,
    pub args: Vec<(String, VariantType)>,
}

/// A class registered by an extension
#[derive(Debug, Clone)]
pub struct ExtClass {
    pub name: String,
    pub parent: String,
    pub library: usize,
    pub callbacks: Callbacks,
    pub methods: Vec<ExtMethod>,
    pub properties: Vec<ExtProperty>,
    pub signals: Vec<ExtSignal>,
}

impl ExtClass {
    pub fn method(&self, name: &str) -> Option<&ExtMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Observable shape of a registered class, for comparing registrations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassShape {
    pub parent: String,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub methods: Vec<(String, Vec<VariantType>, Option<VariantType>, u32)>,
    pub properties: Vec<ExtProperty>,
    pub signals: Vec<ExtSignal>,
    pub has_create: bool,
    pub has_free: bool,
    pub has_get_virtual: bool,
}

fn classdb() -> &'static Mutex<HashMap<String, ExtClass>> {
    static CLASSDB: OnceLock<Mutex<HashMap<String, ExtClass>>> = OnceLock::new();
    CLASSDB.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn with_classdb<R>(f: impl FnOnce(&mut HashMap<String, ExtClass>) -> R) -> R {
    f(&mut classdb().lock())
}

/// A registered class, cloned out of the database
pub fn ext_class(name: &str) -> Option<ExtClass> {
    classdb().lock().get(name).cloned()
}

/// Names of every registered extension class, sorted
pub fn registered_classes() -> Vec<String> {
    let mut names: Vec<String> = classdb().lock().keys().cloned().collect();
    names.sort();
    names
}

/// Shape of a registered class
pub fn class_shape(name: &str) -> Option<ClassShape> {
    let class = ext_class(name)?;
    Some(ClassShape {
        parent: class.parent,
        is_virtual: class.callbacks.is_virtual,
        is_abstract: class.callbacks.is_abstract,
        methods: class
            .methods
            .iter()
            .map(|m| (m.name.clone(), m.args.clone(), m.ret, m.flags))
            .collect(),
        properties: class.properties,
        signals: class.signals,
        has_create: class.callbacks.create_instance.is_some(),
        has_free: class.callbacks.free_instance.is_some(),
        has_get_virtual: class.callbacks.get_virtual.is_some(),
    })
}

/// Whether any class (engine or extension) has this name
pub fn class_exists(name: &str) -> bool {
    engine_class(name).is_some() || classdb().lock().contains_key(name)
}

/// Direct parent of a class
pub fn parent_of(name: &str) -> Option<String> {
    if let Some(class) = engine_class(name) {
        return class.parent.map(str::to_owned);
    }
    classdb().lock().get(name).map(|c| c.parent.clone())
}

/// Whether `class` is `ancestor` or derives from it
pub fn inherits(class: &str, ancestor: &str) -> bool {
    let mut current = Some(class.to_owned());
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        current = parent_of(&name);
    }
    false
}

/// Closest built-in ancestor of a class (the class itself if built in)
pub fn nearest_engine_class(name: &str) -> Option<&'static EngineClassInfo> {
    let mut current = Some(name.to_owned());
    while let Some(name) = current {
        if let Some(class) = engine_class(&name) {
            return Some(class);
        }
        current = parent_of(&name);
    }
    None
}

/// Closest extension class in the chain of `name`, with its callbacks
pub fn nearest_ext_class(name: &str) -> Option<ExtClass> {
    let mut current = Some(name.to_owned());
    while let Some(name) = current {
        if let Some(class) = ext_class(&name) {
            return Some(class);
        }
        current = parent_of(&name);
    }
    None
}

/// Find an extension method along the chain of `class`
pub fn find_ext_method(class: &str, method: &str) -> Option<ExtMethod> {
    let mut current = Some(class.to_owned());
    while let Some(name) = current {
        if let Some(found) = ext_class(&name).and_then(|c| c.method(method).cloned()) {
            return Some(found);
        }
        current = parent_of(&name);
    }
    None
}

/// Whether `signal` is declared along the chain of `class`
pub fn has_signal(class: &str, signal: &str) -> bool {
    let mut current = Some(class.to_owned());
    while let Some(name) = current {
        if let Some(engine) = engine_class(&name) {
            if engine.signals.contains(&signal) {
                return true;
            }
        } else if let Some(ext) = ext_class(&name) {
            if ext.signals.iter().any(|s| s.name == signal) {
                return true;
            }
        }
        current = parent_of(&name);
    }
    false
}

/// Engine virtual signature visible from `class`
pub fn find_virtual(class: &str, name: &str) -> Option<VirtualInfo> {
    let mut current = Some(class.to_owned());
    while let Some(class_name) = current {
        if let Some(engine) = engine_class(&class_name) {
            if let Some(info) = engine.virtuals.iter().find(|v| v.name == name) {
                return Some(*info);
            }
        }
        current = parent_of(&class_name);
    }
    None
}

// ============================================================================
// Objects
// ============================================================================

/// One engine object
#[derive(Debug)]
pub struct MockObject {
    pub id: u64,
    pub class: String,
    pub refcount: Option<i64>,
    pub instance: usize,
    pub name: String,
    pub position: (f32, f32),
    pub rotation: f64,
    pub children: Vec<usize>,
    pub resource_name: String,
    pub connections: Vec<(String, CallableData)>,
}

#[derive(Default)]
struct World {
    objects: HashMap<usize, MockObject>,
    by_id: HashMap<u64, usize>,
    singletons: HashMap<String, usize>,
}

thread_local! {
    static WORLD: RefCell<World> = RefCell::new(World::default());
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a built-in object of `class` without running any extension hook
pub(crate) fn spawn(class: &'static EngineClassInfo) -> usize {
    let ptr = Box::into_raw(Box::new(0u64)) as usize;
    let id = NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed);
    let object = MockObject {
        id,
        class: class.name.to_owned(),
        refcount: if inherits(class.name, "RefCounted") { Some(0) } else { None },
        instance: 0,
        name: String::new(),
        position: (0.0, 0.0),
        rotation: 0.0,
        children: Vec::new(),
        resource_name: String::new(),
        connections: Vec::new(),
    };
    WORLD.with(|w| {
        let mut w = w.borrow_mut();
        w.by_id.insert(id, ptr);
        w.objects.insert(ptr, object);
    });
    crate::stats::bump(|s| s.objects_constructed += 1);
    ptr
}

/// Remove an object from the world; the caller drops it
pub(crate) fn take(ptr: usize) -> Option<MockObject> {
    let object = WORLD.with(|w| {
        let mut w = w.borrow_mut();
        let object = w.objects.remove(&ptr)?;
        w.by_id.remove(&object.id);
        w.singletons.retain(|_, p| *p != ptr);
        Some(object)
    })?;
    unsafe { drop(Box::from_raw(ptr as *mut u64)) };
    Some(object)
}

/// Run `f` on a live object
pub fn with_object<R>(ptr: usize, f: impl FnOnce(&mut MockObject) -> R) -> Option<R> {
    WORLD.with(|w| w.borrow_mut().objects.get_mut(&ptr).map(f))
}

pub fn object_exists(ptr: usize) -> bool {
    WORLD.with(|w| w.borrow().objects.contains_key(&ptr))
}

pub fn ptr_from_id(id: u64) -> Option<usize> {
    WORLD.with(|w| w.borrow().by_id.get(&id).copied())
}

/// Number of live objects on this thread
pub fn live_objects() -> usize {
    WORLD.with(|w| w.borrow().objects.len())
}

pub(crate) fn singleton(name: &str) -> Option<usize> {
    if let Some(ptr) = WORLD.with(|w| w.borrow().singletons.get(name).copied()) {
        return Some(ptr);
    }
    let class = engine_class(name)?;
    if name != "Engine" {
        return None;
    }
    let ptr = spawn(class);
    WORLD.with(|w| w.borrow_mut().singletons.insert(name.to_owned(), ptr));
    Some(ptr)
}

/// Class name of a live object
pub fn class_of(ptr: usize) -> Option<String> {
    with_object(ptr, |o| o.class.clone())
}

/// Current reference count of a ref-counted object
pub fn refcount(ptr: usize) -> Option<i64> {
    with_object(ptr, |o| o.refcount).flatten()
}

/// Number of connections to `signal` on an object
pub fn connection_count(ptr: usize, signal: &str) -> usize {
    with_object(ptr, |o| o.connections.iter().filter(|(s, _)| s == signal).count()).unwrap_or(0)
}

/// Host instance attached to an object
pub fn instance_of(ptr: usize) -> usize {
    with_object(ptr, |o| o.instance).unwrap_or(0)
}

/// Engine object id of a live object
pub fn id_of(ptr: usize) -> Option<u64> {
    with_object(ptr, |o| o.id)
}
