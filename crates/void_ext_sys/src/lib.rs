//! # Void Extension Sys
//!
//! Raw C ABI of the engine extension interface:
//!
//! - Opaque pointer aliases and `#[repr(C)]` structures
//! - The variant tag enumeration and the call-error structure
//! - The engine interface table, bound by name through the resolver
//! - The builtin lifecycle table (constructors, destructors, conversions)
//!
//! Nothing in this crate is safe to use directly; `void_ext` builds the
//! ownership model on top.

pub mod builtins;
pub mod error;
pub mod interface;
pub mod types;

pub use builtins::{builtins, has_lifecycle, install_builtins, try_builtins, BuiltinTable, BuiltinTypeFns};
pub use error::{LoadError, Result};
pub use interface::{install, interface, is_loaded, library, try_interface, EngineInterface, GetProcAddressFn, InterfaceFn};
pub use types::*;
