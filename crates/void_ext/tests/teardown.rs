//! Handles still alive when the library unloads

mod common;

use std::mem;

use common::{engine, ptr_of};
use void_ext::handles::HandleTable;
use void_ext::prelude::*;
use void_ext_mock::{self as mock, Severity};

#[test]
fn test_leaked_handles_released_at_unload() {
    let engine = engine();
    let node = Gd::<Node2D>::construct().unwrap();
    let resource = Gd::<Resource>::construct().unwrap();
    let (node_ptr, resource_ptr) = (ptr_of(&node), ptr_of(&resource));
    mem::forget(node);
    mem::forget(resource.clone());
    mem::forget(resource);
    assert_eq!(mock::refcount(resource_ptr), Some(2));

    let _lock = engine.unload();
    assert_eq!(HandleTable::global().live_count(), 0);
    assert!(!mock::object_exists(node_ptr));
    assert!(!mock::object_exists(resource_ptr));

    let stats = mock::stats();
    assert_eq!(stats.ref_increments, stats.ref_decrements);
    assert_eq!(stats.objects_constructed, stats.objects_destroyed);
}

#[test]
fn test_balanced_traffic_without_leaks() {
    let engine = engine();
    {
        let resource = Gd::<Resource>::construct().unwrap();
        let copies: Vec<_> = (0..4).map(|_| resource.clone()).collect();
        assert_eq!(resource.reference_count().unwrap(), 5);
        drop(copies);
        let node = Gd::<Node>::construct().unwrap();
        node.add_child(&Gd::<Node2D>::construct().unwrap()).unwrap();
    }

    let _lock = engine.unload();
    let stats = mock::stats();
    assert_eq!(stats.ref_increments, stats.ref_decrements);
    assert_eq!(stats.objects_constructed, stats.objects_destroyed);
    assert_eq!(stats.callables_created, stats.callables_freed);
    assert!(mock::errors().is_empty(), "{:?}", mock::errors());
}

#[test]
fn test_leaked_host_instance_freed_before_its_class() {
    let engine = engine();
    let node = Gd::<common::MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);
    mem::forget(node);
    assert_eq!(void_ext::class::live_instances("MyNode"), 1);

    let _lock = engine.unload();
    assert!(!mock::object_exists(ptr));
    assert!(!mock::reports().iter().any(|r| r.mentions("outlive")));
    assert!(!mock::reports().iter().any(|r| r.severity == Severity::Warning && r.mentions("Borrowed handle")));
}
