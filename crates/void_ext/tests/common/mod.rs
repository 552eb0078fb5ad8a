//! Test extension library shared by the integration tests

#![allow(dead_code)]

use parking_lot::MutexGuard;
use void_ext::prelude::*;
use void_ext_mock as mock;

// ============================================================================
// Host classes
// ============================================================================

/// Node2D subclass with one of each member kind
#[derive(Debug)]
pub struct MyNode {
    base: Base<Node2D>,
    pub hits: i64,
    pub speed: f64,
    pub processed: f64,
    pub ready: bool,
    pub label: String,
    pub notifications: Vec<i32>,
}

impl HostClass for MyNode {
    const NAME: &'static str = "MyNode";
    type Base = Node2D;

    fn init(base: Base<Node2D>) -> Self {
        Self {
            base,
            hits: 0,
            speed: 1.0,
            processed: 0.0,
            ready: false,
            label: String::new(),
            notifications: Vec::new(),
        }
    }

    fn register(builder: &mut ClassBuilder<Self>) {
        builder
            .method("ping", |_this: &mut Self, (x,): (i64,)| x + 1)
            .method("hit", |this: &mut Self, (): ()| {
                this.hits += 1;
                this.hits
            })
            .method_result("explode", |_this: &mut Self, (): ()| -> Result<i64> {
                panic!("explode failed on purpose")
            })
            .method_result("refuse", |_this: &mut Self, (): ()| -> Result<bool> {
                Err(BridgeError::Config("refused".into()))
            })
            .method("set_label", |this: &mut Self, (text,): (GString,)| {
                this.label = text.to_string();
            })
            .const_method("label", |this: &Self, (): ()| GString::from(this.label.as_str()))
            .method_result("announce", |this: &mut Self, (value,): (i64,)| -> Result<()> {
                this.base.to_gd()?.emit_signal("done", &[value.to_variant()])
            })
            .method("has_target", |_this: &mut Self, (target,): (Option<Gd<Node>>,)| target.is_some())
            .method("describe", |_this: &mut Self, (value,): (Variant,)| GString::from(value.stringify().as_str()))
            .property("hits", |this: &Self| this.hits, |this: &mut Self, v: i64| this.hits = v)
            .property_hinted(
                "speed",
                PropertyHint::range(0.0, 10.0, 0.5),
                |this: &Self| this.speed,
                |this: &mut Self, v: f64| this.speed = v,
            )
            .signal("done", &[("result", VariantType::Int)])
            .virtual_method("_process", |this: &mut Self, (delta,): (f64,)| {
                this.processed += delta;
            })
            .virtual_method("ready", |this: &mut Self, (): ()| {
                this.ready = true;
            });
    }

    fn notification(&mut self, what: i32) {
        self.notifications.push(what);
    }

    fn to_string(&self) -> Option<String> {
        Some(format!("MyNode(hits={})", self.hits))
    }
}

/// Ref-counted host class
pub struct Counter {
    base: Base<RefCounted>,
    pub count: i64,
}

impl HostClass for Counter {
    const NAME: &'static str = "Counter";
    type Base = RefCounted;

    fn init(base: Base<RefCounted>) -> Self {
        Self { base, count: 0 }
    }

    fn register(builder: &mut ClassBuilder<Self>) {
        builder
            .method("increment", |this: &mut Self, (by,): (i64,)| {
                this.count += by;
                this.count
            })
            .property("count", |this: &Self| this.count, |this: &mut Self, v: i64| this.count = v);
    }
}

/// Abstract host class; registered but never instantiated
pub struct Shape {
    base: Base<Resource>,
}

impl HostClass for Shape {
    const NAME: &'static str = "Shape";
    const ABSTRACT: bool = true;
    type Base = Resource;

    fn init(base: Base<Resource>) -> Self {
        Self { base }
    }
}

// ============================================================================
// Library
// ============================================================================

pub struct TestLibrary;

impl ExtensionLibrary for TestLibrary {
    fn config() -> ExtensionConfig {
        ExtensionConfig { log_filter: "debug".into(), ..ExtensionConfig::default() }
    }

    fn register_classes(registrar: &mut ClassRegistrar) {
        registrar.add::<MyNode>().add::<Counter>().add::<Shape>();
    }
}

void_ext::ext_entry_point!(test_library_init, TestLibrary);

/// A loaded test library with exclusive use of the process-wide state
///
/// Field order matters: the library unloads before the lock is released.
pub struct Engine {
    pub extension: mock::LoadedExtension,
    lock: MutexGuard<'static, ()>,
}

impl Engine {
    /// Unload the library; exclusive use lasts until the returned guard drops
    pub fn unload(self) -> MutexGuard<'static, ()> {
        self.extension.unload();
        self.lock
    }
}

/// Load the test library into the mock engine
pub fn engine() -> Engine {
    let lock = mock::exclusive();
    mock::reset_stats();
    mock::reveal_all();
    let extension = match mock::load_extension(test_library_init) {
        Ok(extension) => extension,
        Err(code) => panic!("test library failed to load with code {code}: {:?}", mock::errors()),
    };
    Engine { extension, lock }
}

/// Raw pointer of a handle, for driving the mock engine directly
pub fn ptr_of<T: EngineClass>(object: &Gd<T>) -> usize {
    object.raw().expect("live handle") as usize
}
