/// Handle of a class registered with the [`crate::TypeManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Opaque method identity used to parameterize method-pointer types.
///
/// The runtime side mints these; the type system only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodToken(pub u32);

/// What the type system needs to know about a named class or interface.
///
/// `super_class` drives the `common_type` join; unresolved classes have no
/// usable hierarchy and join to the system object type.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    /// Constant-pool token the class was resolved from, for diagnostics and
    /// linkage-error payloads.
    pub cp_token: u32,
    pub is_resolved: bool,
    pub is_interface: bool,
    pub is_final: bool,
    /// Static initializer not yet run; accesses must emit `InitType`.
    pub needs_init: bool,
    pub super_class: Option<ClassId>,
}

impl ClassInfo {
    pub fn resolved(name: impl Into<String>, cp_token: u32) -> Self {
        Self {
            name: name.into(),
            cp_token,
            is_resolved: true,
            is_interface: false,
            is_final: false,
            needs_init: false,
            super_class: None,
        }
    }

    pub fn unresolved(name: impl Into<String>, cp_token: u32) -> Self {
        Self {
            is_resolved: false,
            ..Self::resolved(name, cp_token)
        }
    }

    pub fn with_super(mut self, super_class: ClassId) -> Self {
        self.super_class = Some(super_class);
        self
    }

    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self
    }

    pub fn final_class(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn needing_init(mut self) -> Self {
        self.needs_init = true;
        self
    }
}
