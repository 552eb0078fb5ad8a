//! # void_ext - Extension Bridge Core
//!
//! Lets Rust code extend an engine through its C extension interface: call
//! engine objects, exchange values with the engine, and publish Rust types
//! as engine classes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  entry point  ┌─────────────────┐
//! │     Engine      │──────────────▶│      init       │  levels, config, logging
//! └───────┬─────────┘               └────────┬────────┘
//!         │ upcalls                          │ register
//!         ▼                                  ▼
//! ┌─────────────────┐               ┌─────────────────┐
//! │ class callbacks │◀──────────────│  class builder  │
//! └───────┬─────────┘               └─────────────────┘
//!         │ host values
//!         ▼
//! ┌─────────────────┐  method binds ┌─────────────────┐
//! │   Gd<T> / obj   │──────────────▶│ registry / call │──▶ CallFrame ──▶ engine
//! └───────┬─────────┘               └─────────────────┘
//!         │
//!         ▼
//! ┌─────────────────┐
//! │  HandleTable    │  every engine pointer the host holds
//! └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use void_ext::prelude::*;
//!
//! struct Spinner {
//!     base: Base<Node2D>,
//!     speed: f64,
//! }
//!
//! impl HostClass for Spinner {
//!     const NAME: &'static str = "Spinner";
//!     type Base = Node2D;
//!
//!     fn init(base: Base<Node2D>) -> Self {
//!         Self { base, speed: 1.0 }
//!     }
//!
//!     fn register(builder: &mut ClassBuilder<Self>) {
//!         builder
//!             .property("speed", |this: &Self| this.speed, |this: &mut Self, v: f64| this.speed = v)
//!             .virtual_method("_process", |this: &mut Self, (delta,): (f64,)| {
//!                 if let Ok(node) = this.base.to_gd() {
//!                     let _ = node.rotate(this.speed * delta);
//!                 }
//!             });
//!     }
//! }
//!
//! struct Game;
//!
//! impl ExtensionLibrary for Game {
//!     fn register_classes(registrar: &mut ClassRegistrar) {
//!         registrar.add::<Spinner>();
//!     }
//! }
//!
//! ext_entry_point!(game_library_init, Game);
//! ```

pub mod builtin;
pub mod call;
pub mod class;
pub mod config;
pub mod error;
pub mod frame;
pub mod handles;
pub mod init;
pub mod logging;
pub mod meta;
pub mod obj;
pub mod registry;
pub mod version;

mod guard;

pub use void_ext_sys as sys;

pub use error::{BridgeError, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::builtin::{
        Array, Callable, Color, Dictionary, GString, NodePath, Signal, StringName, Variant, VariantValue, Vector2,
        Vector3,
    };
    pub use crate::class::{Base, ClassBuilder, HostClass, PropertyHint};
    pub use crate::config::ExtensionConfig;
    pub use crate::error::{BridgeError, ErrorKind, Result};
    pub use crate::ext_entry_point;
    pub use crate::handles::HandleScope;
    pub use crate::init::{ClassRegistrar, ExtensionLibrary};
    pub use crate::meta::{FromVariant, ToVariant};
    pub use crate::obj::{EngineClass, Gd, Inherits, Node, Node2D, Object, RefCounted, Resource};
    pub use void_ext_sys::{InitLevel, VariantType};
}
