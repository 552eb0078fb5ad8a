//! Signals and callables

mod common;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use common::{engine, ptr_of, MyNode};
use void_ext::builtin::callable_table_len;
use void_ext::prelude::*;
use void_ext_mock::{self as mock, Value};

/// Callable storing its first integer argument into `seen`
fn recorder(seen: &Arc<AtomicI64>) -> Callable {
    let seen = Arc::clone(seen);
    Callable::from_fn("record", move |args| {
        let value = args.first().map_or(Ok(-1), |v| v.to::<i64>())?;
        seen.store(value, Ordering::SeqCst);
        Ok(Variant::nil())
    })
}

#[test]
fn test_host_signal_reaches_host_callable() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);
    let seen = Arc::new(AtomicI64::new(0));

    node.connect("done", &recorder(&seen)).unwrap();
    assert_eq!(mock::connection_count(ptr, "done"), 1);

    mock::ptrcall_method(ptr, "announce", &[Value::Int(5)]).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    assert!(mock::errors().is_empty());
}

#[test]
fn test_emit_from_host() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let seen = Arc::new(AtomicI64::new(0));
    node.connect("renamed", &recorder(&seen)).unwrap();

    node.emit_signal("renamed", &[9i64.to_variant()]).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 9);

    let signal = Signal::new(&node, "renamed").unwrap();
    assert_eq!(signal.name().to_string(), "renamed");
    assert_eq!(signal.object_id(), node.instance_id().unwrap());
    signal.emit(&[11i64.to_variant()]).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 11);
}

#[test]
fn test_unknown_signal_is_an_error() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let seen = Arc::new(AtomicI64::new(0));

    let err = node.connect("exploded", &recorder(&seen)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallError);
    let err = node.emit_signal("exploded", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallError);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_callable_is_reported_once() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let failing = Callable::from_fn("failing", |_args| panic!("listener broke"));
    node.connect("ready", &failing).unwrap();
    mock::reset_stats();

    node.emit_signal("ready", &[]).unwrap();
    let errors = mock::errors();
    assert!(errors.iter().any(|e| e.mentions("listener broke")));
    assert!(errors.iter().filter(|e| e.mentions("listener broke")).count() == 1);
}

#[test]
fn test_custom_callable_call() {
    let _engine = engine();
    let sum = Callable::from_fn("sum", |args| {
        let mut total = 0i64;
        for arg in args {
            total += arg.to::<i64>()?;
        }
        Ok(total.to_variant())
    });
    assert!(sum.is_valid());
    assert!(sum.is_custom());

    let result = sum.call(&[1i64.to_variant(), 2i64.to_variant(), 3i64.to_variant()]).unwrap();
    assert_eq!(result.to::<i64>().unwrap(), 6);

    let err = sum.call(&["x".to_variant()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallError);
}

#[test]
fn test_callable_freed_with_last_copy() {
    let _engine = engine();
    let before_len = callable_table_len();
    let before = mock::stats();

    let callable = Callable::from_fn("noop", |_| Ok(Variant::nil()));
    let copy = callable.clone();
    assert_eq!(callable, copy);
    assert_eq!(callable_table_len(), before_len + 1);

    drop(callable);
    assert_eq!(callable_table_len(), before_len + 1);
    drop(copy);
    assert_eq!(callable_table_len(), before_len);

    let after = mock::stats();
    assert_eq!(after.callables_created - before.callables_created, 1);
    assert_eq!(after.callables_freed - before.callables_freed, 1);
}

#[test]
fn test_instance_method_callable() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let bump = Callable::from_instance_method(&node, "bump", |this: &mut MyNode, args| {
        let by = args.first().map_or(Ok(1), |v| v.to::<i64>())?;
        this.hits += by;
        Ok(this.hits.to_variant())
    })
    .unwrap();
    assert_eq!(bump.object_id(), node.instance_id().unwrap());

    assert_eq!(bump.call(&[4i64.to_variant()]).unwrap().to::<i64>().unwrap(), 4);
    assert_eq!(node.bind().unwrap().hits, 4);

    node.free().unwrap();
    assert!(!bump.is_valid());
    assert!(bump.call(&[]).is_err());
}

#[test]
fn test_object_method_callable() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ping = Callable::from_object_method(&node, "ping").unwrap();
    assert!(!ping.is_custom());
    assert_eq!(ping.method_name().to_string(), "ping");
    assert_eq!(ping.object_id(), node.instance_id().unwrap());

    let result = ping.call(&[41i64.to_variant()]).unwrap();
    assert_eq!(result.to::<i64>().unwrap(), 42);
}
