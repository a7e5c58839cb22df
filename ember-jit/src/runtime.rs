//! Callback surface between the compiler core and the managed runtime.
//!
//! The core only ever sees resolved descriptors and interned types; how the
//! runtime resolves constant-pool entries (class loading, linking, access
//! checks) is its own business. Every resolver returns `None` on failure
//! and the core lowers the failure into runtime-deferred throw code.

use ember_ir::{FieldId, MethodId, VmHelperId};
use ember_types::{ClassId, Ty, TypeManager};

/// One entry of the declared exception-handler table.
#[derive(Debug, Clone, Copy)]
pub struct HandlerRecord {
    pub try_begin: u32,
    pub try_end: u32,
    pub handler_pc: u32,
    /// Constant-pool token of the caught class; 0 catches everything.
    pub class_token: u32,
}

/// The method being compiled.
#[derive(Debug, Clone)]
pub struct MethodDesc {
    pub id: MethodId,
    pub name: String,
    pub parent_class: ClassId,
    pub parent_ty: Ty,
    pub code: Vec<u8>,
    pub max_stack: u32,
    pub max_locals: u32,
    pub is_static: bool,
    pub is_synchronized: bool,
    /// Declared strict floating point.
    pub is_strict: bool,
    /// Parameter types in declaration order, receiver included for
    /// instance methods. `None` marks a parameter whose type failed to
    /// resolve; the linkage error fires at its use.
    pub param_tys: Vec<Option<Ty>>,
    /// `None` when the return type failed to resolve.
    pub ret_ty: Option<Ty>,
    pub handlers: Vec<HandlerRecord>,
}

impl MethodDesc {
    pub fn num_params(&self) -> u32 {
        self.param_tys.len() as u32
    }
}

/// A resolved callee, as much of it as call lowering needs.
#[derive(Debug, Clone)]
pub struct MethodRef {
    pub id: MethodId,
    pub name: String,
    pub class_name: String,
    pub parent_ty: Ty,
    /// Receiver included for instance methods.
    pub num_params: u32,
    pub ret_ty: Option<Ty>,
    pub is_static: bool,
    /// Dispatches through the vtable; final and private methods do not.
    pub is_virtual: bool,
    pub is_native: bool,
    /// Method descriptor string, `(...)R` form.
    pub signature: String,
}

/// A resolved field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDesc {
    pub id: FieldId,
    pub ty: Ty,
    pub parent_class: ClassId,
    pub parent_ty: Ty,
    pub is_static: bool,
}

/// Literal classes a single-slot or double-slot constant-pool load can
/// produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstLiteral {
    I4(i32),
    I8(i64),
    Single(f32),
    Double(f64),
    /// Interned string reference; loads lower to `LdRef` on the token.
    String { token: u32 },
    /// Class object reference.
    Class { token: u32 },
}

/// Resolution and policy callbacks into the managed runtime.
///
/// One compilation owns one implementation; calls may block while the
/// runtime loads classes. All type construction funnels through the
/// supplied [`TypeManager`], so descriptors hand back interned ids.
pub trait CompilationInterface {
    fn get_static_field(
        &mut self,
        tm: &mut TypeManager,
        cp_index: u32,
        for_write: bool,
    ) -> Option<FieldDesc>;

    fn get_nonstatic_field(
        &mut self,
        tm: &mut TypeManager,
        cp_index: u32,
        for_write: bool,
    ) -> Option<FieldDesc>;

    /// Declared type of a field reference, resolvable even when the field
    /// itself is not.
    fn get_field_type(&mut self, tm: &mut TypeManager, cp_index: u32) -> Option<Ty>;

    fn get_virtual_method(&mut self, tm: &mut TypeManager, cp_index: u32) -> Option<MethodRef>;

    fn get_special_method(&mut self, tm: &mut TypeManager, cp_index: u32) -> Option<MethodRef>;

    fn get_static_method(&mut self, tm: &mut TypeManager, cp_index: u32) -> Option<MethodRef>;

    fn get_interface_method(&mut self, tm: &mut TypeManager, cp_index: u32)
        -> Option<MethodRef>;

    /// Named class reference. Never fails; an unresolvable entry yields the
    /// unresolved-object type. `resolve_new_check` asks the runtime to also
    /// verify the class is instantiable.
    fn get_named_type(&mut self, tm: &mut TypeManager, cp_index: u32, resolve_new_check: bool)
        -> Ty;

    fn get_constant_type(&mut self, tm: &mut TypeManager, cp_index: u32) -> Ty;

    fn get_constant_value(&mut self, cp_index: u32) -> Option<ConstLiteral>;

    /// Method descriptor string for a call-site token.
    fn get_signature_string(&mut self, cp_index: u32) -> String;

    /// Most-derived override of `target` on receiver class `on`, when the
    /// runtime can prove it. Default: no refinement.
    fn get_overriding_method(
        &mut self,
        _tm: &mut TypeManager,
        _on: Ty,
        _target: &MethodRef,
    ) -> Option<MethodRef> {
        None
    }

    fn needs_write_barriers(&self) -> bool;

    fn are_references_compressed(&self) -> bool;

    fn is_lazy_resolution_mode(&self) -> bool;

    /// Diagnostic name of a runtime helper.
    fn get_runtime_helper_name(&self, id: VmHelperId) -> String {
        id.to_string()
    }
}

/// Argument counting over a method descriptor string, `(...)R` form.
/// Receiver not included.
pub fn num_args_by_signature(sig: &str) -> u32 {
    let mut n = 0;
    let bytes = sig.as_bytes();
    debug_assert_eq!(bytes.first(), Some(&b'('));
    let mut i = 1;
    while i < bytes.len() && bytes[i] != b')' {
        match bytes[i] {
            b'L' => {
                while bytes[i] != b';' {
                    i += 1;
                }
                n += 1;
            }
            b'[' => {
                // dimensions contribute nothing by themselves
                i += 1;
                continue;
            }
            _ => n += 1,
        }
        i += 1;
    }
    n
}

/// Type of the descriptor element starting at `at`; returns the type and
/// the number of bytes consumed.
pub fn type_by_descriptor(
    tm: &mut TypeManager,
    sig: &str,
    at: usize,
) -> Option<(Ty, usize)> {
    let bytes = sig.as_bytes();
    let mut i = at;
    let mut dims = 0usize;
    while *bytes.get(i)? == b'[' {
        dims += 1;
        i += 1;
    }
    let (mut ty, mut used) = match *bytes.get(i)? {
        b'B' => (tm.int8_type(), 1),
        b'C' => (tm.char_type(), 1),
        b'D' => (tm.double_type(), 1),
        b'F' => (tm.single_type(), 1),
        b'I' => (tm.int32_type(), 1),
        b'J' => (tm.int64_type(), 1),
        b'S' => (tm.int16_type(), 1),
        b'Z' => (tm.boolean_type(), 1),
        b'V' => (tm.void_type(), 1),
        b'L' => {
            let mut j = i + 1;
            while *bytes.get(j)? != b';' {
                j += 1;
            }
            // without a resolved class the best we have is the unresolved
            // object type; lazy sessions resolve at the use point
            (tm.unresolved_object_type(), j - i + 1)
        }
        _ => return None,
    };
    used += dims;
    for _ in 0..dims {
        ty = tm.array_type(ty);
    }
    Some((ty, used + (i - at) - dims))
}

/// Return type encoded by a method descriptor string.
pub fn ret_type_by_signature(tm: &mut TypeManager, sig: &str) -> Option<Ty> {
    let close = sig.find(')')?;
    type_by_descriptor(tm, sig, close + 1).map(|(ty, _)| ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_arg_counts() {
        assert_eq!(num_args_by_signature("()V"), 0);
        assert_eq!(num_args_by_signature("(IJ)V"), 2);
        assert_eq!(num_args_by_signature("(Ljava/lang/String;I)V"), 2);
        assert_eq!(num_args_by_signature("([[I[Ljava/lang/Object;)I"), 2);
    }

    #[test]
    fn signature_ret_types() {
        let mut tm = TypeManager::new(false);
        assert_eq!(ret_type_by_signature(&mut tm, "()V"), Some(tm.void_type()));
        assert_eq!(
            ret_type_by_signature(&mut tm, "(I)J"),
            Some(tm.int64_type())
        );
        let i32t = tm.int32_type();
        let arr = tm.array_type(i32t);
        assert_eq!(ret_type_by_signature(&mut tm, "()[I"), Some(arr));
        assert_eq!(
            ret_type_by_signature(&mut tm, "()Ljava/lang/String;"),
            Some(tm.unresolved_object_type())
        );
    }
}
