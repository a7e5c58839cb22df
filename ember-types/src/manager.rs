use hashbrown::HashMap;

use crate::{ClassId, ClassInfo, MethodToken, StackKind, Ty, TypeKind};

/// Owner and interner of every type in one compilation session.
///
/// Primitive singletons are created up front; parameterized types are
/// deduplicated on construction, so `Ty` ids compare by identity.
#[derive(Debug)]
pub struct TypeManager {
    kinds: Vec<TypeKind>,
    interner: HashMap<TypeKind, Ty>,
    classes: Vec<ClassInfo>,
    lazy_resolution: bool,
}

macro_rules! singleton_accessors {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        $(pub fn $fn_name(&self) -> Ty {
            self.interner[&TypeKind::$kind]
        })*
    };
}

impl TypeManager {
    pub fn new(lazy_resolution: bool) -> Self {
        let mut tm = Self {
            kinds: Vec::with_capacity(64),
            interner: HashMap::new(),
            classes: Vec::new(),
            lazy_resolution,
        };
        // Singletons, interned eagerly so accessors are infallible lookups.
        for kind in [
            TypeKind::Void,
            TypeKind::Tau,
            TypeKind::Boolean,
            TypeKind::Char,
            TypeKind::Int8,
            TypeKind::Int16,
            TypeKind::Int32,
            TypeKind::Int64,
            TypeKind::UInt8,
            TypeKind::UInt16,
            TypeKind::UInt32,
            TypeKind::UInt64,
            TypeKind::Single,
            TypeKind::Double,
            TypeKind::IntPtr,
            TypeKind::UIntPtr,
            TypeKind::Offset,
            TypeKind::NullObject,
            TypeKind::SystemObject,
            TypeKind::SystemString,
            TypeKind::SystemClass,
            TypeKind::UnresolvedObject,
        ] {
            tm.intern(kind);
        }
        tm
    }

    pub fn is_lazy_resolution_mode(&self) -> bool {
        self.lazy_resolution
    }

    pub fn intern(&mut self, kind: TypeKind) -> Ty {
        if let Some(&ty) = self.interner.get(&kind) {
            return ty;
        }
        let ty = Ty(self.kinds.len() as u32);
        self.kinds.push(kind);
        self.interner.insert(kind, ty);
        ty
    }

    pub fn kind(&self, ty: Ty) -> TypeKind {
        self.kinds[ty.index()]
    }

    pub fn num_types(&self) -> usize {
        self.kinds.len()
    }

    singleton_accessors! {
        void_type => Void,
        tau_type => Tau,
        boolean_type => Boolean,
        char_type => Char,
        int8_type => Int8,
        int16_type => Int16,
        int32_type => Int32,
        int64_type => Int64,
        uint8_type => UInt8,
        uint16_type => UInt16,
        uint32_type => UInt32,
        uint64_type => UInt64,
        single_type => Single,
        double_type => Double,
        int_ptr_type => IntPtr,
        uint_ptr_type => UIntPtr,
        offset_type => Offset,
        null_object_type => NullObject,
        system_object_type => SystemObject,
        system_string_type => SystemString,
        system_class_type => SystemClass,
        unresolved_object_type => UnresolvedObject,
    }

    //
    // class registry
    //

    pub fn register_class(&mut self, info: ClassInfo) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(info);
        id
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.index()]
    }

    pub fn object_type(&mut self, class: ClassId) -> Ty {
        if self.classes[class.index()].is_resolved {
            self.intern(TypeKind::Object(class))
        } else {
            self.unresolved_object_type()
        }
    }

    //
    // parameterized factories
    //

    pub fn array_type(&mut self, elem: Ty) -> Ty {
        self.intern(TypeKind::Array { elem })
    }

    pub fn managed_ptr_type(&mut self, pointee: Ty) -> Ty {
        self.intern(TypeKind::ManagedPtr { pointee })
    }

    pub fn unmanaged_ptr_type(&mut self, pointee: Ty) -> Ty {
        self.intern(TypeKind::UnmanagedPtr { pointee })
    }

    pub fn method_ptr_type(&mut self, method: MethodToken) -> Ty {
        self.intern(TypeKind::MethodPtr(method))
    }

    pub fn unresolved_method_ptr_type(&mut self, enclosing: ClassId, cp_index: u32) -> Ty {
        self.intern(TypeKind::UnresolvedMethodPtr {
            enclosing,
            cp_index,
        })
    }

    pub fn vtable_ptr_type(&mut self, of: Ty) -> Ty {
        debug_assert!(self.is_object(of));
        self.intern(TypeKind::VTablePtr(of))
    }

    /// Heap-compressed form of a reference type. Idempotent.
    pub fn compress_type(&mut self, ty: Ty) -> Ty {
        match self.kind(ty) {
            TypeKind::Compressed(_) => ty,
            _ => {
                debug_assert!(self.is_object(ty));
                self.intern(TypeKind::Compressed(ty))
            }
        }
    }

    pub fn uncompress_type(&mut self, ty: Ty) -> Ty {
        match self.kind(ty) {
            TypeKind::Compressed(inner) => inner,
            _ => ty,
        }
    }

    /// Coerce a declared type to its operand-stack form: sub-int numerics
    /// widen to `Int32`, compressed references uncompress.
    pub fn to_internal_type(&mut self, ty: Ty) -> Ty {
        match self.kind(ty) {
            TypeKind::Boolean
            | TypeKind::Char
            | TypeKind::Int8
            | TypeKind::Int16
            | TypeKind::UInt8
            | TypeKind::UInt16 => self.int32_type(),
            TypeKind::Compressed(inner) => inner,
            _ => ty,
        }
    }

    //
    // predicates
    //

    pub fn is_object(&self, ty: Ty) -> bool {
        matches!(
            self.kind(ty),
            TypeKind::NullObject
                | TypeKind::SystemObject
                | TypeKind::SystemString
                | TypeKind::SystemClass
                | TypeKind::UnresolvedObject
                | TypeKind::Object(_)
                | TypeKind::Array { .. }
        )
    }

    pub fn is_array(&self, ty: Ty) -> bool {
        matches!(self.kind(ty), TypeKind::Array { .. })
    }

    pub fn array_elem(&self, ty: Ty) -> Option<Ty> {
        match self.kind(ty) {
            TypeKind::Array { elem } => Some(elem),
            _ => None,
        }
    }

    pub fn is_null_object(&self, ty: Ty) -> bool {
        self.kind(ty) == TypeKind::NullObject
    }

    pub fn is_unresolved(&self, ty: Ty) -> bool {
        matches!(
            self.kind(ty),
            TypeKind::UnresolvedObject | TypeKind::UnresolvedMethodPtr { .. }
        )
    }

    pub fn is_compressed(&self, ty: Ty) -> bool {
        matches!(self.kind(ty), TypeKind::Compressed(_))
    }

    pub fn is_ptr(&self, ty: Ty) -> bool {
        matches!(
            self.kind(ty),
            TypeKind::ManagedPtr { .. } | TypeKind::UnmanagedPtr { .. }
        )
    }

    pub fn is_unmanaged_ptr(&self, ty: Ty) -> bool {
        matches!(self.kind(ty), TypeKind::UnmanagedPtr { .. })
    }

    pub fn is_integer(&self, ty: Ty) -> bool {
        matches!(
            self.kind(ty),
            TypeKind::Boolean
                | TypeKind::Char
                | TypeKind::Int8
                | TypeKind::Int16
                | TypeKind::Int32
                | TypeKind::Int64
                | TypeKind::UInt8
                | TypeKind::UInt16
                | TypeKind::UInt32
                | TypeKind::UInt64
                | TypeKind::IntPtr
                | TypeKind::UIntPtr
        )
    }

    pub fn is_floating_point(&self, ty: Ty) -> bool {
        matches!(self.kind(ty), TypeKind::Single | TypeKind::Double)
    }

    pub fn is_interface(&self, ty: Ty) -> bool {
        match self.kind(ty) {
            TypeKind::Object(c) => self.class(c).is_interface,
            _ => false,
        }
    }

    pub fn is_final_class(&self, ty: Ty) -> bool {
        match self.kind(ty) {
            TypeKind::Object(c) => self.class(c).is_final,
            TypeKind::Array { .. } => false,
            _ => false,
        }
    }

    /// Stack/local slot category for a value of this type, if it can live
    /// on the modeled stack at all.
    pub fn stack_kind(&self, ty: Ty) -> Option<StackKind> {
        Some(match self.kind(ty) {
            TypeKind::Boolean
            | TypeKind::Char
            | TypeKind::Int8
            | TypeKind::Int16
            | TypeKind::Int32
            | TypeKind::UInt8
            | TypeKind::UInt16
            | TypeKind::UInt32 => StackKind::Int,
            TypeKind::Int64 | TypeKind::UInt64 => StackKind::Long,
            TypeKind::Single => StackKind::Float,
            TypeKind::Double => StackKind::Dbl,
            TypeKind::NullObject
            | TypeKind::SystemObject
            | TypeKind::SystemString
            | TypeKind::SystemClass
            | TypeKind::UnresolvedObject
            | TypeKind::Object(_)
            | TypeKind::Array { .. }
            | TypeKind::Compressed(_) => StackKind::Ref,
            TypeKind::IntPtr | TypeKind::UIntPtr => StackKind::RetAddr,
            _ => return None,
        })
    }

    //
    // the join lattice
    //

    /// Least common supertype of `a` and `b`, or `None` when the values are
    /// incompatible (the merged slot then dies). Associative and
    /// commutative over the finite lattice.
    pub fn common_type(&mut self, a: Ty, b: Ty) -> Option<Ty> {
        if a == b {
            return Some(a);
        }
        let (ka, kb) = (self.kind(a), self.kind(b));

        // null is below every object type
        if ka == TypeKind::NullObject && self.is_object(b) {
            return Some(b);
        }
        if kb == TypeKind::NullObject && self.is_object(a) {
            return Some(a);
        }

        if self.is_object(a) && self.is_object(b) {
            return Some(self.join_objects(a, b));
        }

        match (ka, kb) {
            (TypeKind::Compressed(ia), TypeKind::Compressed(ib)) => {
                let joined = self.common_type(ia, ib)?;
                Some(self.compress_type(joined))
            }
            // distinct sub-int numerics share the 32-bit stack slot
            _ if self.stack_kind(a) == Some(StackKind::Int)
                && self.stack_kind(b) == Some(StackKind::Int) =>
            {
                Some(self.int32_type())
            }
            (TypeKind::IntPtr, TypeKind::IntPtr) => Some(a),
            _ => None,
        }
    }

    fn join_objects(&mut self, a: Ty, b: Ty) -> Ty {
        match (self.kind(a), self.kind(b)) {
            (TypeKind::Array { elem: ea }, TypeKind::Array { elem: eb }) => {
                // covariant join for reference elements, root otherwise
                if self.is_object(ea) && self.is_object(eb) {
                    match self.common_type(ea, eb) {
                        Some(e) => self.array_type(e),
                        None => self.system_object_type(),
                    }
                } else {
                    self.system_object_type()
                }
            }
            (TypeKind::Object(ca), TypeKind::Object(cb)) => {
                match self.common_ancestor(ca, cb) {
                    Some(c) => self.object_type(c),
                    None => self.system_object_type(),
                }
            }
            _ => self.system_object_type(),
        }
    }

    fn common_ancestor(&self, a: ClassId, b: ClassId) -> Option<ClassId> {
        if !self.class(a).is_resolved || !self.class(b).is_resolved {
            return None;
        }
        let mut seen = Vec::new();
        let mut cur = Some(a);
        while let Some(c) = cur {
            seen.push(c);
            cur = self.class(c).super_class;
        }
        let mut cur = Some(b);
        while let Some(c) = cur {
            if seen.contains(&c) {
                return Some(c);
            }
            cur = self.class(c).super_class;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> (TypeManager, Ty, Ty, Ty) {
        let mut tm = TypeManager::new(false);
        let base = tm.register_class(ClassInfo::resolved("Base", 1));
        let left = tm.register_class(ClassInfo::resolved("Left", 2).with_super(base));
        let right = tm.register_class(ClassInfo::resolved("Right", 3).with_super(base));
        let base_ty = tm.object_type(base);
        let left_ty = tm.object_type(left);
        let right_ty = tm.object_type(right);
        (tm, base_ty, left_ty, right_ty)
    }

    #[test]
    fn interning_dedups() {
        let mut tm = TypeManager::new(false);
        let i32t = tm.int32_type();
        let a1 = tm.array_type(i32t);
        let a2 = tm.array_type(i32t);
        assert_eq!(a1, a2);
        assert_ne!(a1, i32t);
    }

    #[test]
    fn unsigned_widths_are_distinct_singletons() {
        let tm = TypeManager::new(false);
        let widths = [
            tm.uint8_type(),
            tm.uint16_type(),
            tm.uint32_type(),
            tm.uint64_type(),
        ];
        for (i, &a) in widths.iter().enumerate() {
            assert!(tm.is_integer(a));
            for &b in &widths[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(tm.kind(widths[0]), TypeKind::UInt8);
        assert_eq!(tm.kind(widths[2]), TypeKind::UInt32);
        assert_eq!(tm.kind(widths[3]), TypeKind::UInt64);
    }

    #[test]
    fn join_walks_class_hierarchy() {
        let (mut tm, base_ty, left_ty, right_ty) = hierarchy();
        assert_eq!(tm.common_type(left_ty, right_ty), Some(base_ty));
        assert_eq!(tm.common_type(left_ty, base_ty), Some(base_ty));
        assert_eq!(tm.common_type(left_ty, left_ty), Some(left_ty));
    }

    #[test]
    fn null_is_bottom_of_objects() {
        let (mut tm, _, left_ty, _) = hierarchy();
        let null = tm.null_object_type();
        assert_eq!(tm.common_type(null, left_ty), Some(left_ty));
        assert_eq!(tm.common_type(left_ty, null), Some(left_ty));
    }

    #[test]
    fn unrelated_objects_join_to_root() {
        let (mut tm, _, left_ty, _) = hierarchy();
        let lone = tm.register_class(ClassInfo::resolved("Lone", 9));
        let lone_ty = tm.object_type(lone);
        let root = tm.system_object_type();
        assert_eq!(tm.common_type(left_ty, lone_ty), Some(root));
        let string = tm.system_string_type();
        assert_eq!(tm.common_type(string, left_ty), Some(root));
    }

    #[test]
    fn arrays_join_covariantly() {
        let (mut tm, base_ty, left_ty, right_ty) = hierarchy();
        let arr_l = tm.array_type(left_ty);
        let arr_r = tm.array_type(right_ty);
        let arr_b = tm.array_type(base_ty);
        assert_eq!(tm.common_type(arr_l, arr_r), Some(arr_b));
        let arr_i = {
            let t = tm.int32_type();
            tm.array_type(t)
        };
        let root = tm.system_object_type();
        assert_eq!(tm.common_type(arr_l, arr_i), Some(root));
    }

    #[test]
    fn incompatible_kinds_kill_the_slot() {
        let (mut tm, _, left_ty, _) = hierarchy();
        let i32t = tm.int32_type();
        let f32t = tm.single_type();
        assert_eq!(tm.common_type(i32t, left_ty), None);
        assert_eq!(tm.common_type(i32t, f32t), None);
    }

    #[test]
    fn sub_int_slots_widen() {
        let mut tm = TypeManager::new(false);
        let (b, i16t, i32t) = (tm.boolean_type(), tm.int16_type(), tm.int32_type());
        assert_eq!(tm.common_type(b, i16t), Some(i32t));
        assert_eq!(tm.to_internal_type(b), i32t);
    }

    #[test]
    fn compression_round_trip() {
        let (mut tm, base_ty, ..) = hierarchy();
        let c = tm.compress_type(base_ty);
        assert!(tm.is_compressed(c));
        assert_eq!(tm.compress_type(c), c);
        assert_eq!(tm.uncompress_type(c), base_ty);
    }

    #[test]
    fn unresolved_classes_yield_unresolved_object() {
        let mut tm = TypeManager::new(false);
        let c = tm.register_class(ClassInfo::unresolved("Mystery", 7));
        assert_eq!(tm.object_type(c), tm.unresolved_object_type());
    }
}
