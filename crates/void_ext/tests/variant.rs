//! Variant values crossing the boundary

mod common;

use common::{engine, ptr_of, MyNode};
use void_ext::builtin::{PackedInt32Array, PackedStringArray};
use void_ext::prelude::*;
use void_ext::sys::VariantOperator;
use void_ext_mock::{self as mock, Value};

#[test]
fn test_dictionary_keyed_access() {
    let _engine = engine();
    let mut dict = Dictionary::new();
    dict.insert("a", 1i64);
    let mut variant = dict.to_variant();
    assert_eq!(variant.get_type(), VariantType::Dictionary);

    let (value, found) = variant.get_keyed(&"a".to_variant());
    assert!(found);
    assert_eq!(value.to::<i64>().unwrap(), 1);

    let (value, found) = variant.get_keyed(&"missing".to_variant());
    assert!(!found);
    assert!(value.is_nil());

    assert!(variant.set_keyed(&"b".to_variant(), &2i64.to_variant()));
    let dict = variant.to::<Dictionary>().unwrap();
    assert_eq!(dict.len(), 2);
    assert_eq!(dict.get("b").unwrap().to::<i64>().unwrap(), 2);
}

#[test]
fn test_keyed_access_on_plain_value_is_invalid() {
    let _engine = engine();
    let (value, found) = 7i64.to_variant().get_keyed(&"x".to_variant());
    assert!(!found);
    assert!(value.is_nil());
}

#[test]
fn test_scalars_round_trip() {
    let _engine = engine();
    assert!(true.to_variant().to::<bool>().unwrap());
    assert_eq!((-42i64).to_variant().to::<i64>().unwrap(), -42);
    assert_eq!(7i32.to_variant().get_type(), VariantType::Int);
    assert_eq!(2.5f64.to_variant().to::<f64>().unwrap(), 2.5);
    assert_eq!(Vector2::new(1.0, 2.0).to_variant().to::<Vector2>().unwrap(), Vector2::new(1.0, 2.0));
    assert!(().to_variant().is_nil());
    assert!(Variant::nil().is_nil());
}

#[test]
fn test_strings_round_trip() {
    let _engine = engine();
    let text = "héllo wörld";
    let variant = text.to_variant();
    assert_eq!(variant.get_type(), VariantType::String);
    assert_eq!(variant.to::<String>().unwrap(), text);
    assert_eq!(variant.to::<GString>().unwrap().to_string(), text);

    let name = StringName::from("ready");
    assert_eq!(name.to_variant().get_type(), VariantType::StringName);
    assert_eq!(name.to_variant().to::<StringName>().unwrap(), name);
    assert_eq!(StringName::from("ready"), name);
}

#[test]
fn test_narrow_integer_out_of_range() {
    let _engine = engine();
    let err = 300i64.to_variant().to::<u8>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(200i64.to_variant().to::<u8>().unwrap(), 200);
}

#[test]
fn test_wrong_type_conversion() {
    let _engine = engine();
    let err = "five".to_variant().to::<i64>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongVariantType);
    assert!(Variant::nil().to::<Option<i64>>().unwrap().is_none());
}

#[test]
fn test_clone_is_independent() {
    let _engine = engine();
    let original = Array::from_values(&[1i64, 2]).unwrap().to_variant();
    let copy = original.clone();
    assert_eq!(copy.get_type(), VariantType::Array);
    drop(original);
    assert_eq!(copy.to::<Array>().unwrap().len(), 2);
}

#[test]
fn test_stringify_and_booleanize() {
    let _engine = engine();
    assert_eq!(12i64.to_variant().stringify(), "12");
    assert_eq!(Variant::nil().stringify(), "<null>");
    assert!(!Variant::nil().booleanize());
    assert!(!0i64.to_variant().booleanize());
    assert!("x".to_variant().booleanize());
}

#[test]
fn test_hash_follows_value() {
    let _engine = engine();
    assert_eq!("same".to_variant().hash_code(), "same".to_variant().hash_code());
    assert_ne!("same".to_variant().hash_code(), "other".to_variant().hash_code());
}

#[test]
fn test_evaluate_comparison() {
    let _engine = engine();
    let less = 1i64.to_variant().evaluate(VariantOperator::Less, &2i64.to_variant()).unwrap();
    assert!(less.to::<bool>().unwrap());
    let equal = 3i64.to_variant().evaluate(VariantOperator::Equal, &3i64.to_variant()).unwrap();
    assert!(equal.to::<bool>().unwrap());
    assert!("a".to_variant().evaluate(VariantOperator::Less, &1i64.to_variant()).is_none());
}

#[test]
fn test_dynamic_builtin_call() {
    let _engine = engine();
    let length = "four".to_variant().call("length", &[]).unwrap();
    assert_eq!(length.to::<i64>().unwrap(), 4);

    let err = "four".to_variant().call("explode", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallError);

    let text = Variant::call_static(VariantType::String, "num_int64", &[17i64.to_variant()]).unwrap();
    assert_eq!(text.to::<String>().unwrap(), "17");
}

#[test]
fn test_unpack_closed_sum() {
    let _engine = engine();
    assert_eq!(Variant::nil().unpack(), VariantValue::Nil);
    assert_eq!(5i64.to_variant().unpack(), VariantValue::Int(5));
    assert_eq!(true.to_variant().unpack(), VariantValue::Bool(true));
    assert_eq!(Vector2::ONE.to_variant().unpack(), VariantValue::Vector2(Vector2::ONE));
}

#[test]
fn test_packed_arrays() {
    let _engine = engine();
    let mut numbers = PackedInt32Array::from_slice(&[1, 2, 3]).unwrap();
    numbers.push(4).unwrap();
    assert_eq!(numbers.len(), 4);
    assert_eq!(numbers.get(3), Some(4));
    let back = numbers.to_variant().to::<PackedInt32Array>().unwrap();
    assert_eq!(back.to_vec(), vec![1, 2, 3, 4]);

    let words = PackedStringArray::from_slice(&[GString::from("a"), GString::from("b")]).unwrap();
    let words: Vec<String> = words.iter().map(|s| s.to_string()).collect();
    assert_eq!(words, ["a", "b"]);
}

#[test]
fn test_typed_array_rejects_other_types() {
    let _engine = engine();
    let mut ints = Array::new_typed(VariantType::Int, "");
    assert!(ints.is_typed());
    ints.push(1i64).unwrap();
    assert!(ints.push("one").is_err());
    assert_eq!(ints.len(), 1);
}

#[test]
fn test_node_path_structure() {
    let _engine = engine();
    let path = NodePath::from("/root/Level/Player:position:x");
    assert!(path.is_absolute());
    assert_eq!(path.name_count(), 3);
    assert_eq!(path.name(2).unwrap().to_string(), "Player");
    assert_eq!(path.subname_count(), 2);
    assert_eq!(path.subname(0).unwrap().to_string(), "position");
    assert!(path.name(3).is_err());
    assert_eq!(path.to_string(), "/root/Level/Player:position:x");

    let relative = NodePath::from("Sprite");
    assert!(!relative.is_absolute());
    assert_eq!(relative.subname_count(), 0);
    assert_ne!(path, relative);
}

#[test]
fn test_null_object_converts_to_none() {
    let _engine = engine();
    let node = Gd::<Node>::construct().unwrap();
    let missing = node.call("get_child", &[3i64.to_variant()]).unwrap();
    assert_eq!(missing.get_type(), VariantType::Object);
    assert!(!missing.is_nil());

    assert!(missing.to::<Option<Gd<Node>>>().unwrap().is_none());
    assert_eq!(missing.to::<Gd<Node>>().unwrap_err().kind(), ErrorKind::WrongVariantType);
}

#[test]
fn test_optional_object_parameter_agrees_across_call_paths() {
    let _engine = engine();
    let node = Gd::<MyNode>::new_instance().unwrap();
    let ptr = ptr_of(&node);
    let target = Gd::<Node>::construct().unwrap();

    let through_ptrcall = mock::ptrcall_method(ptr, "has_target", &[Value::Object(0)]).unwrap();
    let through_varcall = mock::call_method(ptr, "has_target", &[Value::Object(0)]).unwrap();
    assert_eq!(through_ptrcall.as_bool(), Some(false));
    assert_eq!(through_varcall.as_bool(), Some(false));

    let present = mock::call_method(ptr, "has_target", &[Value::Object(ptr_of(&target))]).unwrap();
    assert_eq!(present.as_bool(), Some(true));
    assert!(mock::errors().is_empty());
}
