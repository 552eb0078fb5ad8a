//! Outbound calls: host code constructing and driving engine objects

mod common;

use common::{engine, ptr_of};
use void_ext::frame::frame_stats;
use void_ext::handles::{HandleTable, Regime, ScopeId};
use void_ext::obj::Engine as EngineSingleton;
use void_ext::prelude::*;
use void_ext::registry;
use void_ext_mock as mock;

#[test]
fn test_exclusive_object_destroyed_on_drop() {
    let _engine = engine();
    let baseline = HandleTable::global().live_count();

    let node = Gd::<Node2D>::construct().unwrap();
    assert_eq!(node.regime().unwrap(), Regime::Exclusive);
    let ptr = ptr_of(&node);
    assert!(mock::object_exists(ptr));
    assert_eq!(HandleTable::global().live_count(), baseline + 1);

    drop(node);
    assert!(!mock::object_exists(ptr));
    assert_eq!(mock::stats().objects_destroyed, 1);
    assert_eq!(HandleTable::global().live_count(), baseline);
}

#[test]
fn test_ref_counted_clone_and_drop() {
    let _engine = engine();

    let resource = Gd::<Resource>::construct().unwrap();
    let ptr = ptr_of(&resource);
    assert_eq!(resource.regime().unwrap(), Regime::RefCounted);
    assert!(mock::refcount(ptr).unwrap() >= 1);

    let before = mock::stats();
    let copy = resource.clone();
    assert_eq!(copy, resource);
    assert_eq!(mock::refcount(ptr), Some(2));

    drop(resource);
    drop(copy);
    let after = mock::stats();
    assert_eq!(after.ref_decrements - before.ref_decrements, 2);
    assert_eq!(after.objects_destroyed, 1);
    assert!(!mock::object_exists(ptr));
}

#[test]
fn test_node2d_facades() {
    let _engine = engine();
    let node = Gd::<Node2D>::construct().unwrap();

    node.set_position(Vector2::new(3.0, -4.5)).unwrap();
    assert_eq!(node.get_position().unwrap(), Vector2::new(3.0, -4.5));

    node.rotate(0.5).unwrap();
    node.rotate(0.25).unwrap();
    assert!((node.get_rotation().unwrap() - 0.75).abs() < 1e-9);

    node.set_name("Player").unwrap();
    assert_eq!(node.get_name().unwrap().to_string(), "Player");
    assert_eq!(node.get_class().unwrap(), "Node2D");
}

#[test]
fn test_zero_argument_ptrcall_passes_null_array() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();

    let before = mock::stats().null_arg_ptrcalls;
    assert_eq!(node.get_child_count().unwrap(), 0);
    assert_eq!(mock::stats().null_arg_ptrcalls, before + 1);
}

#[test]
fn test_add_child_hands_ownership_to_parent() {
    let _engine = engine();
    let parent = Gd::<Node>::construct().unwrap();
    let child = Gd::<Node2D>::construct().unwrap();
    let child_ptr = ptr_of(&child);

    parent.add_child(&child).unwrap();
    assert!(matches!(child.regime().unwrap(), Regime::Borrowed(_)));
    assert_eq!(parent.get_child_count().unwrap(), 1);

    let fetched = parent.get_child(0).unwrap().unwrap();
    assert_eq!(fetched.get_class().unwrap(), "Node2D");
    assert!(parent.get_child(5).unwrap().is_none());

    // The child goes with its parent, not with its own handle.
    drop(child);
    drop(fetched);
    assert!(mock::object_exists(child_ptr));
    drop(parent);
    assert!(!mock::object_exists(child_ptr));
    assert_eq!(mock::stats().objects_destroyed, 2);
}

#[test]
fn test_method_binds_are_cached() {
    let _engine = engine();
    let first = registry::bind_method("Node2D", "set_position").unwrap();
    let cached = registry::cached_bind_count();

    let second = registry::bind_method("Node2D", "set_position").unwrap();
    assert_eq!(first, second);
    assert_eq!(registry::cached_bind_count(), cached);
}

#[test]
fn test_unknown_method_and_class() {
    let _engine = engine();

    let err = registry::bind_method("Node2D", "does_not_exist").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchMethod);

    let err = registry::construct_raw("NoSuchThing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchClass);
}

#[test]
fn test_engine_singleton() {
    let _engine = engine();
    let singleton = Gd::<EngineSingleton>::singleton().unwrap();
    assert_eq!(singleton.regime().unwrap(), Regime::Singleton);
    assert_eq!(singleton.physics_ticks_per_second().unwrap(), 60);
    assert!((singleton.frames_per_second().unwrap() - 60.0).abs() < f64::EPSILON);

    let (major, _, _) = mock::engine_version();
    let info = singleton.version_info().unwrap();
    assert_eq!(info.get("major").unwrap().to::<i64>().unwrap(), major as i64);

    // Singletons survive their handles.
    let ptr = ptr_of(&singleton);
    drop(singleton);
    assert!(mock::object_exists(ptr));
}

#[test]
fn test_singleton_cache_follows_replacement() {
    let _engine = engine();
    let first = Gd::<EngineSingleton>::singleton().unwrap();
    let first_id = first.instance_id().unwrap();
    assert_eq!(registry::cached_singleton_id("Engine"), Some(first_id));

    // The engine drops its singleton and publishes a fresh one.
    mock::destroy(ptr_of(&first));
    assert!(!first.is_instance_valid());

    let second = Gd::<EngineSingleton>::singleton().unwrap();
    let second_id = second.instance_id().unwrap();
    assert_ne!(first_id, second_id);
    assert_eq!(registry::cached_singleton_id("Engine"), Some(second_id));
    assert_eq!(second.physics_ticks_per_second().unwrap(), 60);
}

#[test]
fn test_engine_is_not_constructible() {
    let _engine = engine();
    assert!(Gd::<EngineSingleton>::construct().is_err());
}

#[test]
fn test_use_after_free() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let observer = node.clone();
    assert!(observer.is_instance_valid());

    node.free().unwrap();
    assert!(!observer.is_instance_valid());
    let err = observer.get_child_count().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UseAfterFree);
}

#[test]
fn test_freed_handle_does_not_become_a_variant() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let alias = node.clone();
    node.free().unwrap();

    let err = alias.try_to_variant().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UseAfterFree);

    mock::reset_stats();
    assert!(alias.to_variant().is_nil());
    assert!(mock::errors().iter().any(|e| e.mentions("converted to nil")));
}

#[test]
fn test_handle_from_instance_id() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let id = node.instance_id().unwrap();

    let again = Gd::<Node>::from_instance_id(id).unwrap();
    assert_eq!(again, node);
    assert_eq!(again.regime().unwrap(), Regime::Borrowed(ScopeId::ENGINE));
    drop(again);
    assert!(node.is_instance_valid());

    node.free().unwrap();
    let err = Gd::<Node>::from_instance_id(id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UseAfterFree);
}

#[test]
fn test_cast_checks_dynamic_class() {
    let _engine = engine();
    let node = Gd::<Node2D>::construct().unwrap().upcast::<Node>();
    let node = node.try_cast::<Resource>().unwrap_err();
    let node2d = node.try_cast::<Node2D>().unwrap();
    node2d.set_position(Vector2::ONE).unwrap();
}

#[test]
fn test_dynamic_call_by_name() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    assert!(node.has_method("add_child").unwrap());
    assert!(!node.has_method("fly").unwrap());

    let id = node.call("get_instance_id", &[]).unwrap();
    assert_eq!(id.to::<i64>().unwrap() as u64, node.instance_id().unwrap());

    let err = node.call("fly", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallError);
}

#[test]
fn test_resource_duplicate_returns_owned_reference() {
    let _engine = engine();
    let original = Gd::<Resource>::construct().unwrap();
    original.set_resource_name("sword").unwrap();

    let copy = original.duplicate(false).unwrap();
    assert_ne!(copy, original);
    assert_eq!(copy.resource_name().unwrap().to_string(), "sword");
    assert_eq!(mock::refcount(ptr_of(&copy)), Some(1));
}

#[test]
fn test_frames_are_balanced() {
    let _engine = engine();
    let node = Gd::<Node2D>::construct().unwrap();
    node.set_position(Vector2::ZERO).unwrap();
    let _ = node.get_position().unwrap();
    let _ = node.call("fly", &[]);

    let stats = frame_stats();
    assert!(stats.opened > 0);
    assert_eq!(stats.opened, stats.closed);
}

#[test]
fn test_native_struct_size() {
    let _engine = engine();
    assert_eq!(void_ext::registry::native_struct_size("ObjectID"), 8);
    assert_eq!(void_ext::registry::native_struct_size("NoSuchStruct"), 0);
}
