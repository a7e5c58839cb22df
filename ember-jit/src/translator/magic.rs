//! Raw-memory "magic" classes and named runtime-helper classes.
//!
//! Calls on the magic unboxed types never dispatch through the object
//! model; they lower directly to pointer arithmetic, comparisons and
//! indirect memory access on machine-word types. A second class exposes
//! named runtime helpers (monitor operations, allocation, GC TLS access)
//! as ordinary static methods.

use ember_ir::{CmpOp, Modifier, OpndId, VmHelperId};
use ember_types::{Ty, TypeKind, TypeManager};

use super::Translator;
use crate::error::Result;

const MAGIC_PACKAGE: &str = "org/vmmagic/unboxed/";
const HELPER_CLASS: &str = "ember/rt/VMHelpers";

pub(super) fn is_vm_magic_class(name: &str) -> bool {
    name.starts_with(MAGIC_PACKAGE)
}

pub(super) fn is_vm_helper_class(name: &str) -> bool {
    name == HELPER_CLASS
}

/// Magic class references translate to machine-word types: addresses and
/// words become pointer-sized unsigned ints, offsets stay signed.
pub(super) fn convert_vm_magic_type(tm: &mut TypeManager, ty: Ty) -> Option<Ty> {
    let class = match tm.kind(ty) {
        TypeKind::Object(c) => c,
        TypeKind::Array { elem } => {
            let converted = convert_vm_magic_type(tm, elem)?;
            return Some(tm.array_type(converted));
        }
        _ => return None,
    };
    let name = tm.class(class).name.clone();
    let short = name.strip_prefix(MAGIC_PACKAGE)?;
    Some(match short {
        "Address" | "Word" | "Extent" => tm.uint_ptr_type(),
        "Offset" => tm.int_ptr_type(),
        "ObjectReference" => tm.system_object_type(),
        _ => return None,
    })
}

impl Translator<'_> {
    /// Lower a call on a magic class. The method name fully determines the
    /// operation.
    pub(super) fn gen_vm_magic(
        &mut self,
        mname: &str,
        args: &[OpndId],
        magic_ret_ty: Ty,
    ) -> Result<()> {
        let ret_ty = convert_vm_magic_type(self.tm, magic_ret_ty).unwrap_or(magic_ret_ty);
        let i32t = self.builder.types.i32;
        let uintptr = self.builder.types.uint_ptr;
        let m = Modifier::arith();

        // constants of the word type
        let word_const = match mname {
            "max" => Some(-1i64),
            "one" => Some(1),
            "zero" | "nullReference" => Some(0),
            _ => None,
        };
        if let Some(c) = word_const {
            let raw = self.builder.gen_ld_constant(uintptr, ember_ir::ConstValue::Offset(c));
            let r = if ret_ty == uintptr {
                raw
            } else {
                self.builder.gen_conv(ret_ty, m, raw)
            };
            self.push(r);
            return Ok(());
        }

        if mname == "prefetch" {
            self.builder.gen_prefetch(args[0]);
            return Ok(());
        }

        // constructors from and to primitives are conversions
        if matches!(
            mname,
            "fromLong"
                | "fromIntSignExtend"
                | "fromIntZeroExtend"
                | "fromObject"
                | "toAddress"
                | "toObjectReference"
                | "toInt"
                | "toLong"
                | "toObjectRef"
                | "toWord"
                | "toObject"
                | "toExtent"
                | "toOffset"
        ) {
            debug_assert_eq!(args.len(), 1);
            let src_ty = self.builder.opnd_ty(args[0]);
            let r = if src_ty == ret_ty {
                self.builder.gen_copy(args[0])
            } else if (self.tm.is_object(src_ty) && self.tm.is_unmanaged_ptr(ret_ty))
                || (self.tm.is_object(ret_ty) && self.tm.is_unmanaged_ptr(src_ty))
            {
                self.builder.gen_conv_unmanaged(ret_ty, m, args[0])
            } else if mname == "fromIntZeroExtend" {
                self.builder.gen_conv_ze(ret_ty, m, args[0])
            } else {
                self.builder.gen_conv(ret_ty, m, args[0])
            };
            self.push(r);
            return Ok(());
        }

        // one-argument tests
        let is_test = match mname {
            "isZero" | "isNull" => Some(0i64),
            "isMax" => Some(-1),
            _ => None,
        };
        if let Some(c) = is_test {
            debug_assert_eq!(args.len(), 1);
            let arg_ty = self.builder.opnd_ty(args[0]);
            let cval = self.builder.gen_ld_constant(arg_ty, ember_ir::ConstValue::Offset(c));
            let r = self.builder.gen_cmp(i32t, CmpOp::Eq, args[0], cval);
            self.push(r);
            return Ok(());
        }

        // two-argument comparisons; unsigned by default, `s`-prefixed
        // variants signed
        let cmp = match mname {
            "EQ" | "equals" => Some((CmpOp::Eq, false)),
            "NE" => Some((CmpOp::NeUn, false)),
            "GE" => Some((CmpOp::GteUn, false)),
            "GT" => Some((CmpOp::GtUn, false)),
            "LE" => Some((CmpOp::GteUn, true)),
            "LT" => Some((CmpOp::GtUn, true)),
            "sGE" => Some((CmpOp::Gte, false)),
            "sGT" => Some((CmpOp::Gt, false)),
            "sLE" => Some((CmpOp::Gte, true)),
            "sLT" => Some((CmpOp::Gt, true)),
            _ => None,
        };
        if let Some((op, commute)) = cmp {
            debug_assert_eq!(args.len(), 2);
            let (a, b) = if commute {
                (args[1], args[0])
            } else {
                (args[0], args[1])
            };
            let r = self.builder.gen_cmp(i32t, op, a, b);
            self.push(r);
            return Ok(());
        }

        // pointer / word arithmetic
        match mname {
            "plus" => {
                let r = if self.tm.is_ptr(ret_ty) {
                    self.builder.gen_add_scaled_index(args[0], args[1])
                } else {
                    self.builder.gen_add(ret_ty, m, args[0], args[1])
                };
                self.push(r);
            }
            "minus" => {
                let r = if self.tm.is_ptr(ret_ty) {
                    let neg = self.builder.gen_neg(self.builder.types.int_ptr, args[1]);
                    self.builder.gen_add_scaled_index(args[0], neg)
                } else {
                    self.builder.gen_sub(ret_ty, m, args[0], args[1])
                };
                self.push(r);
            }
            "diff" => {
                let r = self.builder.gen_sub(ret_ty, m, args[0], args[1]);
                self.push(r);
            }
            "and" => {
                let r = self.builder.gen_and(ret_ty, args[0], args[1]);
                self.push(r);
            }
            "or" => {
                let r = self.builder.gen_or(ret_ty, args[0], args[1]);
                self.push(r);
            }
            "xor" => {
                let r = self.builder.gen_xor(ret_ty, args[0], args[1]);
                self.push(r);
            }
            "not" => {
                let r = self.builder.gen_not(ret_ty, args[0]);
                self.push(r);
            }
            "lsh" => {
                let r = self.builder.gen_shl(ret_ty, m, args[0], args[1]);
                self.push(r);
            }
            "rshl" => {
                let sm = m.with_signed(ember_ir::SignedOp::Unsigned);
                let r = self.builder.gen_shr(ret_ty, sm, args[0], args[1]);
                self.push(r);
            }
            "rsha" => {
                let r = self.builder.gen_shr(ret_ty, m, args[0], args[1]);
                self.push(r);
            }
            // raw memory access through the address value
            "loadObjectReference" | "loadAddress" | "loadWord" | "loadInt" | "loadShort"
            | "loadChar" | "loadByte" | "loadLong" | "loadFloat" | "loadDouble" => {
                let loaded_ty = self.magic_load_ty(mname);
                let tau = self.builder.gen_tau_unsafe();
                let r = self
                    .builder
                    .gen_tau_ld_ind(Modifier::none(), loaded_ty, args[0], tau, tau);
                self.push(r);
            }
            "prepareInt" | "prepareWord" | "prepareAddress" | "prepareObjectReference" => {
                let loaded_ty = self.magic_load_ty(mname);
                let tau = self.builder.gen_tau_unsafe();
                let r = self
                    .builder
                    .gen_tau_ld_ind(Modifier::none(), loaded_ty, args[0], tau, tau);
                self.push(r);
            }
            "store" => {
                debug_assert_eq!(args.len(), 2);
                let value_ty = self.builder.opnd_ty(args[1]);
                let tau = self.builder.gen_tau_unsafe();
                self.builder
                    .gen_tau_st_ind(Modifier::none(), value_ty, args[1], args[0], tau, tau, tau);
            }
            "attempt" => {
                // compare-and-exchange on the addressed word
                debug_assert_eq!(args.len(), 3);
                let r = self.builder.gen_jit_helper_call(
                    ember_ir::JitHelperId::LockedCompareAndExchange,
                    i32t,
                    args,
                );
                self.push(r);
            }
            _ => {
                // every magic method is known; an unknown name is a front
                // end bug
                debug_assert!(false, "unknown magic method {mname}");
            }
        }
        Ok(())
    }

    fn magic_load_ty(&mut self, mname: &str) -> Ty {
        match mname {
            "loadByte" => self.tm.int8_type(),
            "loadShort" => self.tm.int16_type(),
            "loadChar" => self.tm.char_type(),
            "loadInt" | "prepareInt" => self.builder.types.i32,
            "loadLong" => self.builder.types.i64,
            "loadFloat" => self.builder.types.single,
            "loadDouble" => self.builder.types.double,
            "loadObjectReference" | "prepareObjectReference" => self.builder.types.sys_obj,
            _ => self.builder.types.uint_ptr,
        }
    }

    /// Named helper-class methods map straight onto runtime helper ids.
    /// Returns false for names with no registered helper; the caller then
    /// emits an ordinary call.
    pub(super) fn gen_vm_helper(
        &mut self,
        mname: &str,
        args: &[OpndId],
        ret_ty: Ty,
    ) -> Result<bool> {
        let ret_ty = convert_vm_magic_type(self.tm, ret_ty).unwrap_or(ret_ty);
        let void = self.builder.types.void;
        let helper = match mname {
            "getTlsBaseAddress" => VmHelperId::GcGetTlsBase,
            "newResolvedUsingAllocHandleAndSize" => VmHelperId::NewResolvedUsingAllocHandle,
            "newVectorUsingAllocHandle" => VmHelperId::NewVectorUsingVtable,
            "monitorEnter" => VmHelperId::MonitorEnter,
            "monitorExit" => VmHelperId::MonitorExit,
            "writeBarrier" => VmHelperId::GcHeapWriteRef,
            "getInterfaceVTable" => VmHelperId::GetInterfaceVtable,
            "checkCast" => VmHelperId::CheckCast,
            "instanceOf" => VmHelperId::InstanceOf,
            "getIdentityHashCode" => VmHelperId::GetIdentityHashcode,
            _ => return Ok(false),
        };
        let dst = self.builder.gen_vm_helper_call(helper, ret_ty, args);
        if ret_ty != void {
            self.push(dst);
        }
        Ok(true)
    }
}
