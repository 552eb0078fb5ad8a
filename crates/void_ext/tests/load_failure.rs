//! Entry point failures leave the engine untouched

mod common;

use common::{engine, test_library_init};
use void_ext::init::LOAD_FAILED;
use void_ext_mock as mock;

#[test]
fn test_missing_symbol_fails_load() {
    let _lock = mock::exclusive();
    mock::reset_stats();
    mock::hide_symbol("variant_call");

    let code = mock::load_extension(test_library_init).map(|_| ()).unwrap_err();
    assert_eq!(code, LOAD_FAILED);
    assert!(mock::ext_class("MyNode").is_none());

    mock::reveal_all();
}

#[test]
fn test_incompatible_engine_fails_load() {
    let _lock = mock::exclusive();
    mock::reset_stats();
    mock::set_engine_version(3, 5, 1);

    let code = mock::load_extension(test_library_init).map(|_| ()).unwrap_err();
    assert_eq!(code, LOAD_FAILED);
    assert!(mock::errors().iter().any(|e| e.mentions("3.5.1")));
    assert!(mock::registered_classes().is_empty());

    mock::set_engine_version(4, 3, 0);
}

#[test]
fn test_load_recovers_after_failure() {
    {
        let _lock = mock::exclusive();
        mock::hide_symbol("object_destroy");
        assert!(mock::load_extension(test_library_init).is_err());
        mock::reveal_all();
    }

    let _engine = engine();
    assert!(mock::ext_class("MyNode").is_some());
}
