//! Engine classes the bridge knows statically
//!
//! Each marker type names one engine class. Facade methods are available on
//! `Gd<T>` for every `T` deriving from the class that declares them.

use void_ext_sys::VariantType;

use super::{EngineClass, Gd, Inherits, VirtualSignature};
use crate::builtin::{Dictionary, GString, Rid, StringName, Vector2};
use crate::error::Result;

macro_rules! engine_class {
    (
        $(#[$attr:meta])*
        $name:ident : $parent:ident,
        ancestors [$($ancestor:ident),*],
        virtuals [$($virtual:expr),* $(,)?]
    ) => {
        $(#[$attr])*
        #[derive(Debug)]
        pub struct $name {
            _private: (),
        }

        impl EngineClass for $name {
            const CLASS_NAME: &'static str = stringify!($name);
            const ENGINE_BASE: &'static str = stringify!($name);
            const VIRTUALS: &'static [VirtualSignature] = &[$($virtual),*];
            type Parent = $parent;
        }

        unsafe impl Inherits<$name> for $name {}
        $( unsafe impl Inherits<$ancestor> for $name {} )*
    };
}

const fn virtual_fn(name: &'static str, args: &'static [VariantType], ret: Option<VariantType>) -> VirtualSignature {
    VirtualSignature { name, args, ret }
}

engine_class!(
    /// Root of every engine class
    Object: Object,
    ancestors [],
    virtuals []
);

engine_class!(
    /// Object freed when its last reference goes away
    RefCounted: Object,
    ancestors [Object],
    virtuals []
);

engine_class!(
    /// Scene tree element
    Node: Object,
    ancestors [Object],
    virtuals [
        virtual_fn("_process", &[VariantType::Float], None),
        virtual_fn("_physics_process", &[VariantType::Float], None),
        virtual_fn("_ready", &[], None),
        virtual_fn("_enter_tree", &[], None),
        virtual_fn("_exit_tree", &[], None),
        virtual_fn("_get_configuration_warnings", &[], Some(VariantType::PackedStringArray)),
    ]
);

engine_class!(
    /// Node with a 2D transform
    Node2D: Node,
    ancestors [Node, Object],
    virtuals []
);

engine_class!(
    /// Shareable data container
    Resource: RefCounted,
    ancestors [RefCounted, Object],
    virtuals [virtual_fn("_setup_local_to_scene", &[], None)]
);

engine_class!(
    /// Engine-wide settings and queries; only available as a singleton
    Engine: Object,
    ancestors [Object],
    virtuals []
);

// ============================================================================
// Facades
// ============================================================================

impl<T: Inherits<RefCounted>> Gd<T> {
    /// Current reference count, as the engine sees it
    pub fn reference_count(&self) -> Result<i64> {
        self.ptrcall(RefCounted::CLASS_NAME, "get_reference_count", ())
    }
}

impl<T: Inherits<Node>> Gd<T> {
    pub fn set_name(&self, name: &str) -> Result<()> {
        self.ptrcall(Node::CLASS_NAME, "set_name", (GString::from(name),))
    }

    pub fn get_name(&self) -> Result<StringName> {
        self.ptrcall(Node::CLASS_NAME, "get_name", ())
    }

    /// Add `child` under this node
    ///
    /// The parent takes ownership: a handle that owned the child now only
    /// borrows it.
    pub fn add_child<C: Inherits<Node>>(&self, child: &Gd<C>) -> Result<()> {
        self.ptrcall::<_, ()>(Node::CLASS_NAME, "add_child", (child,))?;
        child.demote()
    }

    pub fn get_child_count(&self) -> Result<i64> {
        self.ptrcall(Node::CLASS_NAME, "get_child_count", ())
    }

    /// Child at `index`, if there is one
    pub fn get_child(&self, index: i64) -> Result<Option<Gd<Node>>> {
        self.ptrcall(Node::CLASS_NAME, "get_child", (index,))
    }
}

impl<T: Inherits<Node2D>> Gd<T> {
    pub fn set_position(&self, position: Vector2) -> Result<()> {
        self.ptrcall(Node2D::CLASS_NAME, "set_position", (position,))
    }

    pub fn get_position(&self) -> Result<Vector2> {
        self.ptrcall(Node2D::CLASS_NAME, "get_position", ())
    }

    /// Rotate by `radians`
    pub fn rotate(&self, radians: f64) -> Result<()> {
        self.ptrcall(Node2D::CLASS_NAME, "rotate", (radians,))
    }

    pub fn get_rotation(&self) -> Result<f64> {
        self.ptrcall(Node2D::CLASS_NAME, "get_rotation", ())
    }
}

impl<T: Inherits<Resource>> Gd<T> {
    pub fn set_resource_name(&self, name: &str) -> Result<()> {
        self.ptrcall(Resource::CLASS_NAME, "set_name", (GString::from(name),))
    }

    pub fn resource_name(&self) -> Result<GString> {
        self.ptrcall(Resource::CLASS_NAME, "get_name", ())
    }

    /// Copy of this resource; the new handle holds its only reference
    pub fn duplicate(&self, deep: bool) -> Result<Gd<Resource>> {
        self.ptrcall(Resource::CLASS_NAME, "duplicate", (deep,))
    }

    pub fn rid(&self) -> Result<Rid> {
        self.ptrcall(Resource::CLASS_NAME, "get_rid", ())
    }
}

impl Gd<Engine> {
    pub fn physics_ticks_per_second(&self) -> Result<i64> {
        self.ptrcall(Engine::CLASS_NAME, "get_physics_ticks_per_second", ())
    }

    pub fn frames_per_second(&self) -> Result<f64> {
        self.ptrcall(Engine::CLASS_NAME, "get_frames_per_second", ())
    }

    /// Engine version as a dictionary of `major`, `minor`, `patch` and friends
    pub fn version_info(&self) -> Result<Dictionary> {
        self.ptrcall(Engine::CLASS_NAME, "get_version_info", ())
    }
}
