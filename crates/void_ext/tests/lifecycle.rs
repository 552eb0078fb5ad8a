//! Loading, initialization levels and unloading

mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use common::engine;
use parking_lot::Mutex;
use void_ext::class;
use void_ext::handles::{HandleScope, HandleTable, Regime};
use void_ext::prelude::*;
use void_ext::version::EngineVersion;
use void_ext_mock as mock;

#[test]
fn test_load_initializes_every_level() {
    let engine = engine();
    assert_eq!(engine.extension.initialized_levels(), InitLevel::ALL);
    let min = EngineVersion::MINIMUM;
    assert_eq!(engine.extension.minimum_version(), (min.major, min.minor, min.patch));
}

#[test]
fn test_unload_unregisters_everything() {
    let engine = engine();
    let node = Gd::<Node2D>::construct().unwrap();
    let ptr = common::ptr_of(&node);
    std::mem::forget(node);
    assert!(!mock::registered_classes().is_empty());

    assert_eq!(NodePath::from("a/b").name_count(), 2);
    assert!(void_ext::builtin::cached_builtin_method_count() > 0);

    let _lock = engine.unload();
    assert_eq!(void_ext::builtin::cached_builtin_method_count(), 0);
    assert!(mock::registered_classes().is_empty());
    assert!(class::registered_classes().is_empty());
    assert_eq!(HandleTable::global().live_count(), 0);
    assert!(!mock::object_exists(ptr));
}

#[test]
fn test_reload_registers_identical_shapes() {
    let first = engine();
    let shapes: Vec<_> = ["MyNode", "Counter", "Shape"].map(|n| mock::class_shape(n).unwrap()).into();
    drop(first.unload());

    let _second = engine();
    let again: Vec<_> = ["MyNode", "Counter", "Shape"].map(|n| mock::class_shape(n).unwrap()).into();
    assert_eq!(shapes, again);
}

#[test]
fn test_scope_releases_borrowed_handles() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let ptr = common::ptr_of(&node);
    let baseline = HandleTable::global().live_count();

    {
        let scope = HandleScope::new();
        let slot = scope.track(ptr).unwrap();
        assert_eq!(HandleTable::global().regime(slot).unwrap(), Regime::Borrowed(scope.id()));
        assert_eq!(HandleTable::global().current_scope(), scope.id());
        assert_eq!(HandleTable::global().live_count(), baseline + 1);
    }

    // Borrowed handles never reach the engine.
    assert_eq!(HandleTable::global().live_count(), baseline);
    assert!(mock::object_exists(ptr));
    assert!(node.is_instance_valid());
}

// ============================================================================
// Level hooks
// ============================================================================

static EVENTS: Mutex<Vec<(bool, InitLevel)>> = Mutex::new(Vec::new());
static GAUGE_AT_SERVERS: AtomicBool = AtomicBool::new(false);

/// Class asking for the core level
struct Gauge {
    base: Base<Object>,
}

impl HostClass for Gauge {
    const NAME: &'static str = "Gauge";
    const INIT_LEVEL: InitLevel = InitLevel::Core;
    type Base = Object;

    fn init(base: Base<Object>) -> Self {
        Self { base }
    }
}

struct LevelLibrary;

impl ExtensionLibrary for LevelLibrary {
    fn config() -> ExtensionConfig {
        ExtensionConfig { minimum_init_level: InitLevel::Servers, ..ExtensionConfig::default() }
    }

    fn register_classes(registrar: &mut ClassRegistrar) {
        registrar.add::<Gauge>();
    }

    fn on_init(level: InitLevel) {
        if level == InitLevel::Servers {
            GAUGE_AT_SERVERS.store(class::is_registered("Gauge"), Ordering::SeqCst);
        }
        EVENTS.lock().push((true, level));
    }

    fn on_deinit(level: InitLevel) {
        EVENTS.lock().push((false, level));
    }
}

void_ext::ext_entry_point!(level_library_init, LevelLibrary);

#[test]
fn test_level_hooks_and_effective_level() {
    let _lock = mock::exclusive();
    mock::reset_stats();
    EVENTS.lock().clear();

    let extension = mock::load_extension(level_library_init).unwrap();
    assert_eq!(
        *EVENTS.lock(),
        vec![(true, InitLevel::Servers), (true, InitLevel::Scene), (true, InitLevel::Editor)]
    );
    assert!(GAUGE_AT_SERVERS.load(Ordering::SeqCst));
    assert!(mock::ext_class("Gauge").is_some());

    EVENTS.lock().clear();
    extension.unload();
    assert_eq!(
        *EVENTS.lock(),
        vec![(false, InitLevel::Editor), (false, InitLevel::Scene), (false, InitLevel::Servers)]
    );
    assert!(mock::ext_class("Gauge").is_none());
    assert!(!class::is_registered("Gauge"));
}
