//! Host classes as the engine sees them

mod common;

use common::{engine, ptr_of, Counter, MyNode, Shape};
use void_ext::class::{self, live_instances};
use void_ext::obj::EngineClass;
use void_ext::prelude::*;
use void_ext::sys::{CallErrorKind, METHOD_FLAG_CONST, PROPERTY_HINT_RANGE};
use void_ext_mock::{self as mock, Value};

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_registered_class_shape() {
    let _engine = engine();
    let shape = mock::class_shape("MyNode").unwrap();
    assert_eq!(shape.parent, "Node2D");
    assert!(!shape.is_abstract);
    assert!(shape.has_create && shape.has_free && shape.has_get_virtual);

    let ping = shape.methods.iter().find(|m| m.0 == "ping").unwrap();
    assert_eq!(ping.1, vec![VariantType::Int]);
    assert_eq!(ping.2, Some(VariantType::Int));

    let hit = shape.methods.iter().find(|m| m.0 == "hit").unwrap();
    assert!(hit.1.is_empty());

    let set_label = shape.methods.iter().find(|m| m.0 == "set_label").unwrap();
    assert_eq!(set_label.1, vec![VariantType::String]);
    assert_eq!(set_label.2, None);

    let label = shape.methods.iter().find(|m| m.0 == "label").unwrap();
    assert_ne!(label.3 & METHOD_FLAG_CONST, 0);

    let speed = shape.properties.iter().find(|p| p.name == "speed").unwrap();
    assert_eq!(speed.ty, VariantType::Float);
    assert_eq!(speed.hint, PROPERTY_HINT_RANGE);
    assert_eq!(speed.hint_string, "0,10,0.5");

    assert_eq!(shape.signals.len(), 1);
    assert_eq!(shape.signals[0].name, "done");
    assert_eq!(shape.signals[0].args, vec![("result".to_owned(), VariantType::Int)]);
}

#[test]
fn test_every_library_class_is_registered() {
    let _engine = engine();
    assert_eq!(class::registered_classes(), vec!["MyNode", "Counter", "Shape"]);
    for name in ["MyNode", "Counter", "Shape"] {
        assert!(class::is_registered(name));
        assert!(mock::ext_class(name).is_some());
    }
    assert!(mock::class_shape("Shape").unwrap().is_abstract);
}

#[test]
fn test_duplicate_registration_conflicts() {
    let _engine = engine();
    let err = class::register_class::<MyNode>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RegistrationConflict);
    assert_eq!(class::registered_classes().iter().filter(|n| **n == "MyNode").count(), 1);
}

struct WrongSignature {
    base: Base<Node>,
}

impl HostClass for WrongSignature {
    const NAME: &'static str = "WrongSignature";
    type Base = Node;

    fn init(base: Base<Node>) -> Self {
        Self { base }
    }

    fn register(builder: &mut ClassBuilder<Self>) {
        builder.virtual_method("_process", |_this: &mut Self, (): ()| {});
    }
}

struct UnknownVirtual {
    base: Base<Node>,
}

impl HostClass for UnknownVirtual {
    const NAME: &'static str = "UnknownVirtual";
    type Base = Node;

    fn init(base: Base<Node>) -> Self {
        Self { base }
    }

    fn register(builder: &mut ClassBuilder<Self>) {
        builder.virtual_method("_fly", |_this: &mut Self, (): ()| {});
    }
}

#[test]
fn test_virtual_mismatch_is_rejected() {
    let _engine = engine();
    for err in [
        class::register_class::<WrongSignature>().unwrap_err(),
        class::register_class::<UnknownVirtual>().unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::VirtualMismatch);
    }
    assert!(!class::is_registered("WrongSignature"));
    assert!(mock::ext_class("UnknownVirtual").is_none());
}

struct DoubleMethod {
    base: Base<Object>,
}

impl HostClass for DoubleMethod {
    const NAME: &'static str = "DoubleMethod";
    type Base = Object;

    fn init(base: Base<Object>) -> Self {
        Self { base }
    }

    fn register(builder: &mut ClassBuilder<Self>) {
        builder
            .method("go", |_this: &mut Self, (): ()| 1i64)
            .method("go", |_this: &mut Self, (): ()| 2i64);
    }
}

#[test]
fn test_duplicate_member_conflicts() {
    let _engine = engine();
    let err = class::register_class::<DoubleMethod>().unwrap_err();
    assert_eq!(err, BridgeError::RegistrationConflict("DoubleMethod.go".into()));
}

/// A class the engine has never heard of
struct Phantom;

impl EngineClass for Phantom {
    const CLASS_NAME: &'static str = "Phantom";
    const ENGINE_BASE: &'static str = "Phantom";
    type Parent = Object;
}

struct Orphan {
    base: Base<Phantom>,
}

impl HostClass for Orphan {
    const NAME: &'static str = "Orphan";
    type Base = Phantom;

    fn init(base: Base<Phantom>) -> Self {
        Self { base }
    }
}

#[test]
fn test_unknown_parent_is_rejected() {
    let _engine = engine();
    let err = class::register_class::<Orphan>().unwrap_err();
    assert_eq!(err, BridgeError::NoSuchClass("Phantom".into()));
}

struct PanicsInRegister {
    base: Base<Object>,
}

impl HostClass for PanicsInRegister {
    const NAME: &'static str = "PanicsInRegister";
    type Base = Object;

    fn init(base: Base<Object>) -> Self {
        Self { base }
    }

    fn register(_builder: &mut ClassBuilder<Self>) {
        panic!("cannot describe myself");
    }
}

#[test]
fn test_panicking_register_is_contained() {
    let _engine = engine();
    let err = class::register_class::<PanicsInRegister>().unwrap_err();
    assert_eq!(err, BridgeError::HostPanic("cannot describe myself".into()));
    assert!(!class::is_registered("PanicsInRegister"));
}

// ============================================================================
// Instances
// ============================================================================

#[test]
fn test_instance_lifecycle() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    assert_eq!(node.get_class().unwrap(), "MyNode");
    assert_eq!(live_instances("MyNode"), 1);
    assert_eq!(node.bind().unwrap().speed, 1.0);

    // Engine facades of the base class work on the host class.
    node.set_position(Vector2::new(1.0, 1.0)).unwrap();
    assert_eq!(node.get_position().unwrap(), Vector2::new(1.0, 1.0));

    drop(node);
    assert_eq!(live_instances("MyNode"), 0);
}

#[test]
fn test_engine_constructs_host_instance() {
    let _engine = engine();
    let ptr = mock::construct("MyNode");
    assert_ne!(ptr, 0);
    assert_ne!(mock::instance_of(ptr), 0);
    assert_eq!(live_instances("MyNode"), 1);

    mock::destroy(ptr);
    assert_eq!(live_instances("MyNode"), 0);
}

#[test]
fn test_virtual_dispatch() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);

    assert!(mock::virtual_for(ptr, "_process").is_some());
    assert!(mock::virtual_for(ptr, "_ready").is_some());
    assert!(mock::virtual_for(ptr, "_unknown").is_none());
    assert!(mock::virtual_for(ptr, "_exit_tree").is_none());

    mock::call_virtual(ptr, "_process", &[Value::Float(0.25)]).unwrap();
    mock::call_virtual(ptr, "_process", &[Value::Float(0.5)]).unwrap();
    mock::call_virtual(ptr, "_ready", &[]).unwrap();

    let this = node.bind().unwrap();
    assert_eq!(this.processed, 0.75);
    assert!(this.ready);
}

#[test]
fn test_method_ptrcall_and_varcall() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);

    let pinged = mock::ptrcall_method(ptr, "ping", &[Value::Int(41)]).unwrap();
    assert_eq!(pinged.as_int(), Some(42));
    let pinged = mock::call_method(ptr, "ping", &[Value::Int(41)]).unwrap();
    assert_eq!(pinged.as_int(), Some(42));

    mock::call_method(ptr, "hit", &[]).unwrap();
    mock::ptrcall_method(ptr, "hit", &[]).unwrap();
    assert_eq!(node.bind().unwrap().hits, 2);

    mock::ptrcall_method(ptr, "set_label", &[Value::string("hero")]).unwrap();
    assert_eq!(mock::call_method(ptr, "label", &[]).unwrap().as_text().as_deref(), Some("hero"));

    let described = mock::call_method(ptr, "describe", &[Value::Int(7)]).unwrap();
    assert_eq!(described.as_text().as_deref(), Some("7"));

    // From the host side, through the engine's dynamic call.
    assert_eq!(node.call("ping", &[1i64.to_variant()]).unwrap().to::<i64>().unwrap(), 2);
    assert!(mock::errors().is_empty());
}

#[test]
fn test_argument_count_mismatch_is_not_invoked() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);

    assert!(mock::ptrcall_method(ptr, "hit", &[Value::Int(1)]).is_none());
    let err = mock::call_method(ptr, "hit", &[Value::Int(1)]).unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::TooManyArguments);
    let err = mock::call_method(ptr, "ping", &[]).unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::TooFewArguments);
    assert_eq!(err.expected, 1);

    assert_eq!(node.bind().unwrap().hits, 0);
    assert!(mock::errors().is_empty());
}

#[test]
fn test_wrong_argument_type() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let err = mock::call_method(ptr_of(&node), "ping", &[Value::string("x")]).unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InvalidArgument);
    assert_eq!(err.argument, 0);
    assert!(mock::errors().is_empty());
}

#[test]
fn test_failing_method_returns_default() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);
    mock::reset_stats();

    let result = mock::ptrcall_method(ptr, "explode", &[]).unwrap();
    assert_eq!(result.as_int(), Some(0));
    let errors = mock::errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].mentions("explode"));

    let result = mock::ptrcall_method(ptr, "refuse", &[]).unwrap();
    assert_eq!(result.as_bool(), Some(false));
    assert_eq!(mock::errors().len(), 2);
    assert!(mock::errors()[1].mentions("refused"));

    // The instance survives and keeps answering.
    assert_eq!(mock::ptrcall_method(ptr, "ping", &[Value::Int(1)]).unwrap().as_int(), Some(2));
}

#[test]
fn test_failing_method_through_varcall() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    mock::reset_stats();

    let err = mock::call_method(ptr_of(&node), "explode", &[]).unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InvalidMethod);
    assert_eq!(mock::errors().len(), 1);
}

#[test]
fn test_properties() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);

    assert_eq!(mock::get_property(ptr, "hits").unwrap().as_int(), Some(0));
    assert!(mock::set_property(ptr, "hits", Value::Int(9)));
    assert_eq!(node.bind().unwrap().hits, 9);
    assert!(mock::set_property(ptr, "speed", Value::Float(2.5)));
    assert_eq!(mock::get_property(ptr, "speed").unwrap().as_float(), Some(2.5));

    assert!(mock::get_property(ptr, "missing").is_none());
    assert!(!mock::set_property(ptr, "missing", Value::Int(1)));

    let names: Vec<String> = mock::property_list(ptr).into_iter().map(|p| p.name).collect();
    assert_eq!(names, ["hits", "speed"]);
}

#[test]
fn test_property_type_mismatch_is_rejected() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    mock::reset_stats();

    assert!(!mock::set_property(ptr_of(&node), "hits", Value::string("many")));
    assert_eq!(node.bind().unwrap().hits, 0);
    assert_eq!(mock::errors().len(), 1);
}

#[test]
fn test_property_access_from_host() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    node.set_property("hits", &7i64.to_variant()).unwrap();
    assert_eq!(node.get_property("hits").unwrap().to::<i64>().unwrap(), 7);
    assert_eq!(node.bind().unwrap().hits, 7);

    let err = node.get_property("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchProperty);
    let err = node.set_property("missing", &1i64.to_variant()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchProperty);

    mock::reset_stats();
    let err = node.set_property("hits", &"many".to_variant()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongVariantType);
    assert_eq!(mock::errors().len(), 1);
    assert_eq!(node.bind().unwrap().hits, 7);

    let plain = Gd::<Node>::construct().unwrap();
    assert_eq!(plain.get_property("speed").unwrap_err().kind(), ErrorKind::NoSuchProperty);
}

#[test]
fn test_notification_and_to_string() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);

    mock::notify(ptr, 42);
    mock::notify(ptr, 7);
    assert!(node.bind().unwrap().notifications.ends_with(&[42, 7]));

    node.bind_mut().unwrap().hits = 3;
    assert_eq!(mock::object_to_string(ptr), "MyNode(hits=3)");
}

#[test]
fn test_abstract_class_cannot_be_instantiated() {
    let _engine = engine();
    assert_eq!(mock::construct("Shape"), 0);
    assert!(mock::errors().iter().any(|e| e.mentions("abstract")));

    let err = Gd::<Shape>::new_instance().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchClass);
    assert_eq!(live_instances("Shape"), 0);
}

#[test]
fn test_ref_counted_host_class() {
    let _engine = engine();
    let counter = Gd::<Counter>::new_instance().unwrap();
    let ptr = ptr_of(&counter);
    assert_eq!(mock::refcount(ptr), Some(1));

    assert_eq!(mock::ptrcall_method(ptr, "increment", &[Value::Int(5)]).unwrap().as_int(), Some(5));
    assert_eq!(mock::get_property(ptr, "count").unwrap().as_int(), Some(5));
    counter.bind_mut().unwrap().count += 1;
    assert_eq!(counter.bind().unwrap().count, 6);

    let other = counter.clone();
    assert_eq!(counter.reference_count().unwrap(), 2);
    drop(counter);
    drop(other);
    assert!(!mock::object_exists(ptr));
    assert_eq!(live_instances("Counter"), 0);
}

#[test]
fn test_reentrant_borrow_is_refused() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let _held = node.bind_mut().unwrap();
    let err = node.bind().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
