//! The IR builder: lowers semantic operations into typed instructions,
//! applying translation-time CSE and simplification and threading tau
//! witnesses through checked operations.
//!
//! Every `gen_*` follows one template: propagate copies through the
//! sources, probe the CSE table, offer the simplifier a shot, then emit and
//! record. Emission appends to the instruction chain of the current label
//! and stamps bytecode offsets for later mapping.

mod calls;
mod cse;
mod mem;
mod simplify;

pub use cse::{operation_code, CseKey, CseTable};

use ember_ir::{
    AutoCompressOp, CmpOp, ConstValue, DefArgOp, InstFactory, InstId, Modifier, Opcode, OpndId,
    Payload, SystemExceptionId, ThrowOp, BC_OFFSET_UNSET,
};
#[cfg(test)]
use ember_ir::StrictOp;
use ember_types::{Ty, TypeManager};
use tracing::trace;

use crate::config::IrBuilderFlags;

/// Frequently used singleton types, resolved once.
#[derive(Debug, Clone, Copy)]
pub struct CommonTypes {
    pub void: Ty,
    pub tau: Ty,
    pub i32: Ty,
    pub i64: Ty,
    pub single: Ty,
    pub double: Ty,
    pub int_ptr: Ty,
    pub uint_ptr: Ty,
    pub offset: Ty,
    pub null_obj: Ty,
    pub sys_obj: Ty,
    pub sys_class: Ty,
    pub uint16: Ty,
}

impl CommonTypes {
    pub fn new(tm: &TypeManager) -> Self {
        Self {
            void: tm.void_type(),
            tau: tm.tau_type(),
            i32: tm.int32_type(),
            i64: tm.int64_type(),
            single: tm.single_type(),
            double: tm.double_type(),
            int_ptr: tm.int_ptr_type(),
            uint_ptr: tm.uint_ptr_type(),
            offset: tm.offset_type(),
            null_obj: tm.null_object_type(),
            sys_obj: tm.system_object_type(),
            sys_class: tm.system_class_type(),
            uint16: tm.uint16_type(),
        }
    }
}

/// Instruction-building front half of the translator.
pub struct IrBuilder {
    pub flags: IrBuilderFlags,
    pub factory: InstFactory,
    pub types: CommonTypes,
    cse: CseTable,
    current_label: Option<InstId>,
    current_tail: Option<InstId>,
    entry_label: Option<InstId>,
    tau_method_safe: Option<OpndId>,
    offset: u32,
}

impl IrBuilder {
    pub fn new(flags: IrBuilderFlags, tm: &TypeManager) -> Self {
        Self {
            flags,
            factory: InstFactory::new(tm),
            types: CommonTypes::new(tm),
            cse: CseTable::new(),
            current_label: None,
            current_tail: None,
            entry_label: None,
            tau_method_safe: None,
            offset: 0,
        }
    }

    pub fn set_bc_offset(&mut self, offset: u32) {
        self.offset = offset;
    }

    pub fn bc_offset(&self) -> u32 {
        self.offset
    }

    pub fn current_label(&self) -> Option<InstId> {
        self.current_label
    }

    pub fn last_generated_inst(&self) -> Option<InstId> {
        self.current_tail
    }

    pub fn kill_cse(&mut self) {
        self.cse.kill();
    }

    pub fn num_cse_hits(&self) -> u32 {
        self.cse.num_cse
    }

    //
    // label management
    //

    fn stamp_label_bc(&mut self, label: InstId) {
        let inst = self.factory.arena_mut().inst_mut(label);
        if inst.bc_offset == BC_OFFSET_UNSET {
            inst.bc_offset = self.offset;
        }
    }

    /// Close the hashing scope and continue emission under `label`.
    pub fn gen_label(&mut self, label: InstId) {
        self.cse.kill();
        self.current_label = Some(label);
        self.current_tail = Some(self.factory.arena().chain_tail(label));
        self.stamp_label_bc(label);
        trace!(label = ?self.factory.arena().inst(label).label_id(), "open block");
    }

    /// Continue under `label` without closing the hashing scope; values
    /// flowing over a fall-through edge stay available.
    pub fn gen_fall_through_label(&mut self, label: InstId) {
        self.current_label = Some(label);
        self.current_tail = Some(self.factory.arena().chain_tail(label));
        self.stamp_label_bc(label);
    }

    pub fn create_label(&mut self) -> InstId {
        let label = self.factory.make_label();
        self.current_label = Some(label);
        self.current_tail = Some(label);
        self.stamp_label_bc(label);
        label
    }

    pub fn create_labels(&mut self, n: u32) -> Vec<InstId> {
        (0..n).map(|_| self.factory.make_label()).collect()
    }

    pub fn gen_method_entry_label(&mut self, method: ember_ir::MethodId) -> InstId {
        let label = self.factory.make_method_entry_label(method);
        self.factory.arena_mut().inst_mut(label).bc_offset = 0;
        self.current_label = Some(label);
        self.current_tail = Some(label);
        self.entry_label = Some(label);
        label
    }

    //
    // appending
    //

    fn append(&mut self, inst: InstId) -> InstId {
        let label = self.current_label.expect("no open block");
        self.stamp_label_bc(label);
        self.factory.arena_mut().inst_mut(inst).bc_offset = self.offset;
        let tail = self.current_tail.expect("no open block");
        self.factory.arena_mut().link_after(tail, inst);
        self.current_tail = Some(inst);
        inst
    }

    fn emit(
        &mut self,
        op: Opcode,
        modifier: Modifier,
        ty: Ty,
        srcs: Vec<OpndId>,
        payload: Payload,
    ) -> OpndId {
        let dst = self.factory.create_ssa_tmp(ty);
        let inst = self.factory.make(op, modifier, ty, dst, srcs, payload);
        self.append(inst);
        dst
    }

    fn emit_void(
        &mut self,
        op: Opcode,
        modifier: Modifier,
        srcs: Vec<OpndId>,
        payload: Payload,
    ) -> InstId {
        let inst = self
            .factory
            .make(op, modifier, self.types.void, OpndId::NULL, srcs, payload);
        self.append(inst)
    }

    //
    // copy propagation and CSE plumbing
    //

    /// Sources of new instructions see through pure copies.
    pub fn propagate_copy(&self, mut op: OpndId) -> OpndId {
        loop {
            if op.is_null() {
                return op;
            }
            let def = match self.factory.arena().opnd(op).def {
                Some(d) => d,
                None => return op,
            };
            let inst = self.factory.arena().inst(def);
            if inst.op == Opcode::Copy {
                op = inst.src(0);
            } else {
                return op;
            }
        }
    }

    fn dst_of(&self, inst: InstId) -> OpndId {
        self.factory.arena().inst(inst).dst
    }

    fn lookup(&mut self, key: CseKey) -> Option<OpndId> {
        if !self.flags.do_cse {
            return None;
        }
        self.cse.lookup(key).map(|inst| self.dst_of(inst))
    }

    fn insert(&mut self, key: CseKey, dst: OpndId) {
        if !self.flags.do_cse {
            return;
        }
        if let Some(inst) = self.factory.arena().opnd(dst).def {
            self.cse.insert(key, inst);
        }
    }

    fn insert_inst(&mut self, key: CseKey, inst: InstId) {
        if self.flags.do_cse {
            self.cse.insert(key, inst);
        }
    }

    fn code(&self, op: Opcode, ty: Ty, modifier: Modifier) -> u64 {
        operation_code(op, ty, modifier)
    }

    pub(crate) fn opnd_ty(&self, op: OpndId) -> Ty {
        self.factory.arena().opnd(op).ty
    }

    pub(crate) fn def_of(&self, op: OpndId) -> Option<&ember_ir::Inst> {
        let def = self.factory.arena().opnd(op).def?;
        Some(self.factory.arena().inst(def))
    }

    /// Constant payload of the operand's defining instruction, if any.
    pub(crate) fn const_of(&self, op: OpndId) -> Option<ConstValue> {
        match self.def_of(op) {
            Some(inst) if inst.op == Opcode::LdConstant => inst.const_value().copied(),
            _ => None,
        }
    }

    //
    // arithmetic
    //

    pub fn gen_add(&mut self, ty: Ty, modifier: Modifier, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::Add, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_add(ty, modifier, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::Add, modifier, ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_sub(&mut self, ty: Ty, modifier: Modifier, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::Sub, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_sub(ty, modifier, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::Sub, modifier, ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_mul(&mut self, ty: Ty, modifier: Modifier, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::Mul, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_mul(ty, modifier, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::Mul, modifier, ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_mulhi(&mut self, ty: Ty, modifier: Modifier, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::MulHi, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self.emit(Opcode::MulHi, modifier, ty, vec![src1, src2], Payload::None);
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    /// Division checks its divisor; the check folds to `tauSafe` for
    /// non-integer or provably non-zero divisors.
    pub fn gen_div(&mut self, tm: &mut TypeManager, ty: Ty, modifier: Modifier, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::TauDiv, ty, modifier);
        // the tau does not participate in the key
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let tau_div_ok = if tm.is_integer(self.opnd_ty(src2)) {
            self.gen_tau_check_zero(src2)
        } else {
            self.gen_tau_safe()
        };
        let dst = self
            .simplify_div(ty, modifier, src1, src2)
            .unwrap_or_else(|| {
                self.emit(
                    Opcode::TauDiv,
                    modifier,
                    ty,
                    vec![src1, src2, tau_div_ok],
                    Payload::None,
                )
            });
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_rem(&mut self, tm: &mut TypeManager, ty: Ty, modifier: Modifier, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::TauRem, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let tau_div_ok = if tm.is_integer(self.opnd_ty(src2)) {
            self.gen_tau_check_zero(src2)
        } else {
            self.gen_tau_safe()
        };
        let dst = self.emit(
            Opcode::TauRem,
            modifier,
            ty,
            vec![src1, src2, tau_div_ok],
            Payload::None,
        );
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_neg(&mut self, ty: Ty, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::Neg, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
            return dst;
        }
        let dst = self
            .simplify_neg(ty, src)
            .unwrap_or_else(|| self.emit(Opcode::Neg, Modifier::none(), ty, vec![src], Payload::None));
        self.insert(CseKey::with1(code, src.id()), dst);
        dst
    }

    pub fn gen_and(&mut self, ty: Ty, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::And, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_and(ty, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::And, Modifier::none(), ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_or(&mut self, ty: Ty, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::Or, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_or(ty, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::Or, Modifier::none(), ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_xor(&mut self, ty: Ty, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::Xor, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_xor(ty, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::Xor, Modifier::none(), ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_not(&mut self, ty: Ty, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::Not, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
            return dst;
        }
        let dst = self
            .simplify_not(ty, src)
            .unwrap_or_else(|| self.emit(Opcode::Not, Modifier::none(), ty, vec![src], Payload::None));
        self.insert(CseKey::with1(code, src.id()), dst);
        dst
    }

    pub fn gen_select(&mut self, ty: Ty, cond: OpndId, src1: OpndId, src2: OpndId) -> OpndId {
        let cond = self.propagate_copy(cond);
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::Select, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with3(code, cond.id(), src1.id(), src2.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::Select,
            Modifier::none(),
            ty,
            vec![cond, src1, src2],
            Payload::None,
        );
        self.insert(CseKey::with3(code, cond.id(), src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_min(&mut self, tm: &mut TypeManager, ty: Ty, src1: OpndId, src2: OpndId) -> OpndId {
        self.gen_min_max(tm, ty, src1, src2, true)
    }

    pub fn gen_max(&mut self, tm: &mut TypeManager, ty: Ty, src1: OpndId, src2: OpndId) -> OpndId {
        self.gen_min_max(tm, ty, src1, src2, false)
    }

    fn gen_min_max(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        src1: OpndId,
        src2: OpndId,
        is_min: bool,
    ) -> OpndId {
        let fp = tm.is_floating_point(ty);
        if self.flags.gen_min_max_abs && (!fp || self.flags.gen_fmin_max_abs) {
            let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
            let op = if is_min { Opcode::Min } else { Opcode::Max };
            let code = self.code(op, ty, Modifier::none());
            if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
                return dst;
            }
            let dst = self.emit(op, Modifier::none(), ty, vec![src1, src2], Payload::None);
            self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
            return dst;
        }
        // hand-build: compare and select, with NaN and signed-zero care for
        // floats
        let i32t = self.types.i32;
        if !fp {
            let (lo, hi) = if is_min { (src1, src2) } else { (src2, src1) };
            let cmp = self.gen_cmp(i32t, CmpOp::Gt, hi, lo);
            return self.gen_select(ty, cmp, src1, src2);
        }
        let nan = self.gen_cmp(i32t, CmpOp::NeUn, src1, src1);
        let zero = if ty == self.types.single {
            self.gen_ld_constant_single(0.0)
        } else {
            self.gen_ld_constant_double(0.0)
        };
        let a_zero = self.gen_cmp(i32t, CmpOp::Eq, src1, zero);
        let b_zero = self.gen_cmp(i32t, CmpOp::Eq, src2, zero);
        let both_zero = self.gen_and(i32t, a_zero, b_zero);
        // compares cannot tell the signed zeros apart, but arithmetic can:
        // -(-a - b) lands on the minimum zero, a + b on the maximum one
        let m = Modifier::arith();
        let zeros_pick = if is_min {
            let neg_a = self.gen_neg(ty, src1);
            let diff = self.gen_sub(ty, m, neg_a, src2);
            self.gen_neg(ty, diff)
        } else {
            self.gen_add(ty, m, src1, src2)
        };
        let (lo, hi) = if is_min { (src1, src2) } else { (src2, src1) };
        let cmp = self.gen_cmp(i32t, CmpOp::Gt, hi, lo);
        let simple = self.gen_select(ty, cmp, src1, src2);
        let zero_or_simple = self.gen_select(ty, both_zero, zeros_pick, simple);
        self.gen_select(ty, nan, src1, zero_or_simple)
    }

    pub fn gen_abs(&mut self, tm: &mut TypeManager, ty: Ty, src: OpndId) -> OpndId {
        let fp = tm.is_floating_point(ty);
        if self.flags.gen_min_max_abs && (!fp || self.flags.gen_fmin_max_abs) {
            let src = self.propagate_copy(src);
            let code = self.code(Opcode::Abs, ty, Modifier::none());
            if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
                return dst;
            }
            let dst = self.emit(Opcode::Abs, Modifier::none(), ty, vec![src], Payload::None);
            self.insert(CseKey::with1(code, src.id()), dst);
            return dst;
        }
        let i32t = self.types.i32;
        let zero = match () {
            _ if ty == self.types.i64 => self.gen_ld_constant_i8(0),
            _ if ty == self.types.single => self.gen_ld_constant_single(0.0),
            _ if ty == self.types.double => self.gen_ld_constant_double(0.0),
            _ => self.gen_ld_constant_i4(0),
        };
        let neg = self.gen_neg(ty, src);
        let is_neg = self.gen_cmp(i32t, CmpOp::Gt, zero, src);
        self.gen_select(ty, is_neg, neg, src)
    }

    //
    // shifts
    //

    pub fn gen_shl(&mut self, ty: Ty, modifier: Modifier, value: OpndId, amount: OpndId) -> OpndId {
        let (value, amount) = (self.propagate_copy(value), self.propagate_copy(amount));
        let code = self.code(Opcode::Shl, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, value.id(), amount.id())) {
            return dst;
        }
        let dst = self
            .simplify_shift(Opcode::Shl, ty, modifier, value, amount)
            .unwrap_or_else(|| {
                self.emit(Opcode::Shl, modifier, ty, vec![value, amount], Payload::None)
            });
        self.insert(CseKey::with2(code, value.id(), amount.id()), dst);
        dst
    }

    pub fn gen_shr(&mut self, ty: Ty, modifier: Modifier, value: OpndId, amount: OpndId) -> OpndId {
        let (value, amount) = (self.propagate_copy(value), self.propagate_copy(amount));
        let code = self.code(Opcode::Shr, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, value.id(), amount.id())) {
            return dst;
        }
        let dst = self
            .simplify_shift(Opcode::Shr, ty, modifier, value, amount)
            .unwrap_or_else(|| {
                self.emit(Opcode::Shr, modifier, ty, vec![value, amount], Payload::None)
            });
        self.insert(CseKey::with2(code, value.id(), amount.id()), dst);
        dst
    }

    pub fn gen_shladd(&mut self, ty: Ty, value: OpndId, amount: OpndId, addto: OpndId) -> OpndId {
        let value = self.propagate_copy(value);
        let (amount, addto) = (self.propagate_copy(amount), self.propagate_copy(addto));
        let code = self.code(Opcode::Shladd, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with3(code, value.id(), amount.id(), addto.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::Shladd,
            Modifier::none(),
            ty,
            vec![value, amount, addto],
            Payload::None,
        );
        self.insert(CseKey::with3(code, value.id(), amount.id(), addto.id()), dst);
        dst
    }

    //
    // conversion & comparison
    //

    pub fn gen_conv(&mut self, ty: Ty, modifier: Modifier, src: OpndId) -> OpndId {
        self.gen_conv_kind(Opcode::Conv, ty, modifier, src)
    }

    pub fn gen_conv_ze(&mut self, ty: Ty, modifier: Modifier, src: OpndId) -> OpndId {
        self.gen_conv_kind(Opcode::ConvZE, ty, modifier, src)
    }

    pub fn gen_conv_unmanaged(&mut self, ty: Ty, modifier: Modifier, src: OpndId) -> OpndId {
        self.gen_conv_kind(Opcode::ConvUnmanaged, ty, modifier, src)
    }

    fn gen_conv_kind(&mut self, op: Opcode, ty: Ty, modifier: Modifier, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(op, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
            return dst;
        }
        let dst = self
            .simplify_conv(op, ty, modifier, src)
            .unwrap_or_else(|| self.emit(op, modifier, ty, vec![src], Payload::None));
        self.insert(CseKey::with1(code, src.id()), dst);
        dst
    }

    pub fn gen_cmp(&mut self, dst_ty: Ty, cmp: CmpOp, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let modifier = Modifier::from(cmp);
        let code = self.code(Opcode::Cmp, dst_ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self
            .simplify_cmp(dst_ty, cmp, src1, src2)
            .unwrap_or_else(|| self.emit(Opcode::Cmp, modifier, dst_ty, vec![src1, src2], Payload::None));
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    /// Three-way comparison: `(s1 cmp s2) ? 1 : (s2 cmp s1) ? -1 : 0`.
    pub fn gen_cmp3(&mut self, dst_ty: Ty, cmp: CmpOp, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let modifier = Modifier::from(cmp);
        let code = self.code(Opcode::Cmp3, dst_ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let dst = self.emit(Opcode::Cmp3, modifier, dst_ty, vec![src1, src2], Payload::None);
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    //
    // control transfer
    //

    pub fn gen_branch2(&mut self, cmp: CmpOp, target: InstId, src1: OpndId, src2: OpndId) {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let label = self.label_of(target);
        self.emit_void(
            Opcode::Branch,
            Modifier::from(cmp),
            vec![src1, src2],
            Payload::Branch { target: label },
        );
    }

    pub fn gen_branch1(&mut self, cmp: CmpOp, target: InstId, src: OpndId) {
        let src = self.propagate_copy(src);
        let label = self.label_of(target);
        self.emit_void(
            Opcode::Branch,
            Modifier::from(cmp),
            vec![src],
            Payload::Branch { target: label },
        );
    }

    fn label_of(&self, label_inst: InstId) -> ember_ir::LabelId {
        self.factory
            .arena()
            .inst(label_inst)
            .label_id()
            .expect("branch target must be a label")
    }

    pub fn gen_jump(&mut self, target: InstId) {
        let label = self.label_of(target);
        self.emit_void(
            Opcode::Jump,
            Modifier::none(),
            Vec::new(),
            Payload::Branch { target: label },
        );
    }

    pub fn gen_jsr(&mut self, target: InstId) {
        let label = self.label_of(target);
        self.emit_void(
            Opcode::Jsr,
            Modifier::none(),
            Vec::new(),
            Payload::Branch { target: label },
        );
    }

    pub fn gen_ret(&mut self, src: OpndId) {
        let src = self.propagate_copy(src);
        self.emit_void(Opcode::Ret, Modifier::none(), vec![src], Payload::None);
    }

    /// The return-address value a subroutine entry receives.
    pub fn gen_save_ret(&mut self) -> OpndId {
        self.emit(
            Opcode::SaveRet,
            Modifier::none(),
            self.types.int_ptr,
            Vec::new(),
            Payload::None,
        )
    }

    pub fn gen_switch(&mut self, targets: &[InstId], default: InstId, src: OpndId) {
        let src = self.propagate_copy(src);
        let labels: Vec<_> = targets.iter().map(|&t| self.label_of(t)).collect();
        let default = self.label_of(default);
        self.emit_void(
            Opcode::Switch,
            Modifier::none(),
            vec![src],
            Payload::Switch {
                targets: labels.into_boxed_slice(),
                default,
            },
        );
    }

    pub fn gen_return(&mut self, src: OpndId) {
        let src = self.propagate_copy(src);
        self.emit_void(Opcode::Return, Modifier::none(), vec![src], Payload::None);
    }

    pub fn gen_return_void(&mut self) {
        self.emit_void(Opcode::Return, Modifier::none(), Vec::new(), Payload::None);
    }

    pub fn gen_catch(&mut self, exception_ty: Ty) -> OpndId {
        self.emit(
            Opcode::Catch,
            Modifier::none(),
            exception_ty,
            Vec::new(),
            Payload::None,
        )
    }

    pub fn gen_throw(&mut self, throw_op: ThrowOp, exception: OpndId) {
        let exception = self.propagate_copy(exception);
        self.emit_void(
            Opcode::Throw,
            Modifier::none().with_throw(throw_op),
            vec![exception],
            Payload::None,
        );
    }

    /// Marks a point whose exception edge must stay distinct; backward
    /// branches emit one so loop headers keep precise dispatch.
    pub fn gen_pseudo_throw(&mut self) {
        self.emit_void(
            Opcode::PseudoThrow,
            Modifier::none(),
            Vec::new(),
            Payload::None,
        );
    }

    pub fn gen_throw_system_exception(&mut self, id: SystemExceptionId) {
        self.emit_void(
            Opcode::ThrowSystemException,
            Modifier::none(),
            Vec::new(),
            Payload::SystemException(id),
        );
    }

    pub fn gen_throw_linking_exception(&mut self, cp_index: u32, operation: u8) {
        self.emit_void(
            Opcode::ThrowLinkingException,
            Modifier::none(),
            Vec::new(),
            Payload::LinkError {
                cp_index,
                operation,
            },
        );
    }

    //
    // constants and variables
    //

    pub fn gen_ld_constant(&mut self, ty: Ty, value: ConstValue) -> OpndId {
        let code = self.code(Opcode::LdConstant, ty, Modifier::none());
        let (lo, hi) = value.key_bits();
        if let Some(dst) = self.lookup(CseKey::with2(code, lo, hi)) {
            return dst;
        }
        let dst = self.emit(Opcode::LdConstant, Modifier::none(), ty, Vec::new(), Payload::Const(value));
        self.insert(CseKey::with2(code, lo, hi), dst);
        dst
    }

    pub fn gen_ld_constant_i4(&mut self, v: i32) -> OpndId {
        let ty = self.types.i32;
        self.gen_ld_constant(ty, ConstValue::I4(v))
    }

    pub fn gen_ld_constant_i8(&mut self, v: i64) -> OpndId {
        let ty = self.types.i64;
        self.gen_ld_constant(ty, ConstValue::I8(v))
    }

    pub fn gen_ld_constant_single(&mut self, v: f32) -> OpndId {
        let ty = self.types.single;
        self.gen_ld_constant(ty, ConstValue::Single(v))
    }

    pub fn gen_ld_constant_double(&mut self, v: f64) -> OpndId {
        let ty = self.types.double;
        self.gen_ld_constant(ty, ConstValue::Double(v))
    }

    pub fn gen_ld_null(&mut self) -> OpndId {
        let ty = self.types.null_obj;
        self.gen_ld_constant(ty, ConstValue::NullRef)
    }

    /// String or class reference from the constant pool.
    pub fn gen_ld_ref(&mut self, ty: Ty, token: u32) -> OpndId {
        let modifier = if self.flags.compressed_references {
            Modifier::none().with_autocompress(AutoCompressOp::Yes)
        } else {
            Modifier::none()
        };
        let code = self.code(Opcode::LdRef, ty, modifier);
        if let Some(dst) = self.lookup(CseKey::with1(code, token)) {
            return dst;
        }
        let dst = self.emit(
            Opcode::LdRef,
            modifier,
            ty,
            Vec::new(),
            Payload::Token { cp_index: token },
        );
        self.insert(CseKey::with1(code, token), dst);
        dst
    }

    pub fn gen_ld_var(&mut self, ty: Ty, var: OpndId) -> OpndId {
        debug_assert!(self.factory.arena().opnd(var).is_var());
        let code = self.code(Opcode::LdVar, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, var.id())) {
            return dst;
        }
        let dst = self.emit(Opcode::LdVar, Modifier::none(), ty, vec![var], Payload::None);
        self.insert(CseKey::with1(code, var.id()), dst);
        dst
    }

    pub fn gen_ld_var_addr(&mut self, tm: &mut TypeManager, var: OpndId) -> OpndId {
        let ty = self.opnd_ty(var);
        let ptr = tm.managed_ptr_type(ty);
        self.emit(Opcode::LdVarAddr, Modifier::none(), ptr, vec![var], Payload::None)
    }

    pub fn gen_st_var(&mut self, var: OpndId, src: OpndId) {
        let src = self.propagate_copy(src);
        let ty = self.opnd_ty(var);
        // the stored-to variable may have stale loads hashed
        let code = self.code(Opcode::LdVar, ty, Modifier::none());
        self.cse.remove(CseKey::with1(code, var.id()));
        let inst = self.factory.make_st_var(var, src);
        self.append(inst);
    }

    pub fn gen_var_def(&mut self, ty: Ty, pinned: bool) -> OpndId {
        self.factory.create_var(ty, pinned)
    }

    /// Formal parameter definition. The modifier carries the non-null and
    /// exact-type facts; consumers that need witnesses materialize them.
    pub fn gen_arg_def(&mut self, defarg: DefArgOp, ty: Ty) -> OpndId {
        let modifier = Modifier::none().with_defarg(defarg);
        let dst = self.factory.create_ssa_tmp(ty);
        let inst = self.factory.make_def_arg(modifier, ty, dst);
        self.append(inst);
        dst
    }

    pub fn gen_phi(&mut self, args: &[OpndId]) -> OpndId {
        let args: Vec<_> = args.iter().map(|&a| self.propagate_copy(a)).collect();
        let ty = self.opnd_ty(args[0]);
        self.emit(Opcode::Phi, Modifier::none(), ty, args, Payload::None)
    }

    pub fn gen_tau_pi(&mut self, src: OpndId, tau: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let tau = self.propagate_copy(tau);
        let dst = self.factory.create_pi(src);
        let ty = self.opnd_ty(src);
        let inst = self.factory.make_tau_pi(Modifier::none(), ty, dst, src, tau);
        self.append(inst);
        dst
    }

    pub fn gen_copy(&mut self, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let ty = self.opnd_ty(src);
        self.emit(Opcode::Copy, Modifier::none(), ty, vec![src], Payload::None)
    }

    pub fn gen_prefetch(&mut self, addr: OpndId) {
        let addr = self.propagate_copy(addr);
        self.emit_void(Opcode::Prefetch, Modifier::none(), vec![addr], Payload::None);
    }

    //
    // tau witnesses
    //

    pub fn gen_tau_safe(&mut self) -> OpndId {
        let code = self.code(Opcode::TauSafe, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::new(code)) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauSafe, Modifier::none(), tau, Vec::new(), Payload::None);
        self.insert(CseKey::new(code), dst);
        dst
    }

    pub fn gen_tau_unsafe(&mut self) -> OpndId {
        let code = self.code(Opcode::TauUnsafe, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::new(code)) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauUnsafe, Modifier::none(), tau, Vec::new(), Payload::None);
        self.insert(CseKey::new(code), dst);
        dst
    }

    /// The once-per-method safety point, hoisted into the entry block right
    /// after the argument definitions and reused thereafter.
    pub fn gen_tau_method_safe(&mut self) -> OpndId {
        if let Some(dst) = self.tau_method_safe {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.factory.create_ssa_tmp(tau);
        let inst = self.factory.make_tau_method_safe(Modifier::none(), tau, dst);
        let entry = self.entry_label.expect("method entry not open yet");
        // find the first instruction after the DefArg prologue
        let mut insert_after = entry;
        let mut cur = self.factory.arena().inst(entry).next();
        while let Some(i) = cur {
            if self.factory.arena().inst(i).op != Opcode::DefArg {
                break;
            }
            insert_after = i;
            cur = self.factory.arena().inst(i).next();
        }
        self.factory.arena_mut().link_after(insert_after, inst);
        if self.current_tail == Some(insert_after) {
            self.current_tail = Some(inst);
        }
        self.tau_method_safe = Some(dst);
        dst
    }

    pub fn gen_tau_and(&mut self, src1: OpndId, src2: OpndId) -> OpndId {
        let (mut src1, mut src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        if src1.id() > src2.id() {
            std::mem::swap(&mut src1, &mut src2);
        }
        let code = self.code(Opcode::TauAnd, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauAnd, Modifier::none(), tau, vec![src1, src2], Payload::None);
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    pub fn gen_tau_has_type(&mut self, src: OpndId, has_ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::TauHasType, has_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src.id(), has_ty.id())) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(
            Opcode::TauHasType,
            Modifier::none(),
            tau,
            vec![src],
            Payload::TypeOp(has_ty),
        );
        self.insert(CseKey::with2(code, src.id(), has_ty.id()), dst);
        dst
    }

    /// `tauHasType` plus a copy-conversion of the receiver when its static
    /// type is unresolved; `src` is updated in place.
    pub fn gen_tau_has_type_with_conv(
        &mut self,
        tm: &mut TypeManager,
        src: &mut OpndId,
        has_ty: Ty,
    ) -> OpndId {
        let res = self.gen_tau_has_type(*src, has_ty);
        if tm.is_unresolved(self.opnd_ty(*src)) {
            *src = self.gen_conv(has_ty, Modifier::arith(), *src);
        }
        res
    }

    pub fn gen_tau_has_exact_type(&mut self, src: OpndId, has_ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::TauHasExactType, has_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src.id(), has_ty.id())) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(
            Opcode::TauHasExactType,
            Modifier::none(),
            tau,
            vec![src],
            Payload::TypeOp(has_ty),
        );
        self.insert(CseKey::with2(code, src.id(), has_ty.id()), dst);
        dst
    }

    pub fn gen_tau_is_non_null(&mut self, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        // shares the null-check key: a later explicit check folds away
        let code = self.code(Opcode::TauCheckNull, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauIsNonNull, Modifier::none(), tau, vec![src], Payload::None);
        self.insert(CseKey::with1(code, src.id()), dst);
        dst
    }

    //
    // checks
    //

    pub fn gen_tau_check_null(&mut self, base: OpndId) -> OpndId {
        let base = self.propagate_copy(base);
        if !self.flags.expand_null_checks {
            // without explicit checks there is nothing to witness
            return self.gen_tau_unsafe();
        }
        let code = self.code(Opcode::TauCheckNull, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, base.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_check_null(base) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauCheckNull, Modifier::none(), tau, vec![base], Payload::None);
        self.insert(CseKey::with1(code, base.id()), dst);
        // a successful null check also proves the base's class initialized
        let init_code = self.code(Opcode::InitType, self.types.tau, Modifier::none());
        let base_ty = self.opnd_ty(base);
        self.insert(CseKey::with1(init_code, base_ty.id()), dst);
        dst
    }

    pub fn gen_tau_check_zero(&mut self, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::TauCheckZero, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_check_zero(src) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauCheckZero, Modifier::none(), tau, vec![src], Payload::None);
        self.insert(CseKey::with1(code, src.id()), dst);
        dst
    }

    pub fn gen_tau_check_div_opnds(&mut self, src1: OpndId, src2: OpndId) -> OpndId {
        let (src1, src2) = (self.propagate_copy(src1), self.propagate_copy(src2));
        let code = self.code(Opcode::TauCheckDivOpnds, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src1.id(), src2.id())) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(
            Opcode::TauCheckDivOpnds,
            Modifier::none(),
            tau,
            vec![src1, src2],
            Payload::None,
        );
        self.insert(CseKey::with2(code, src1.id(), src2.id()), dst);
        dst
    }

    /// Bounds check against an array; also hashed on the array so repeated
    /// accesses at the same index fold.
    pub fn gen_tau_check_bounds(
        &mut self,
        array: OpndId,
        index: OpndId,
        tau_null_checked: OpndId,
    ) -> OpndId {
        if self.flags.suppress_check_bounds {
            return self.gen_tau_unsafe();
        }
        let (array, index) = (self.propagate_copy(array), self.propagate_copy(index));
        let code = self.code(Opcode::TauCheckBounds, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, array.id(), index.id())) {
            return dst;
        }
        let array_ty = self.opnd_ty(array);
        let tau_array_type = self.gen_tau_has_type(array, array_ty);
        let len = self.gen_tau_array_len(array, tau_null_checked, tau_array_type);
        let dst = self.gen_tau_check_bounds_ub(len, index);
        self.insert(CseKey::with2(code, array.id(), index.id()), dst);
        dst
    }

    pub fn gen_tau_check_bounds_ub(&mut self, ub: OpndId, index: OpndId) -> OpndId {
        let (ub, index) = (self.propagate_copy(ub), self.propagate_copy(index));
        let code = self.code(Opcode::TauCheckBounds, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, ub.id(), index.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_check_bounds(ub, index) {
            self.insert(CseKey::with2(code, ub.id(), index.id()), dst);
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(
            Opcode::TauCheckBounds,
            Modifier::none(),
            tau,
            vec![ub, index],
            Payload::None,
        );
        self.insert(CseKey::with2(code, ub.id(), index.id()), dst);
        dst
    }

    pub fn gen_tau_check_elem_type(
        &mut self,
        array: OpndId,
        src: OpndId,
        tau_null_checked: OpndId,
        tau_is_array: OpndId,
    ) -> OpndId {
        if !self.flags.expand_elem_type_checks {
            return self.gen_tau_unsafe();
        }
        let (array, src) = (self.propagate_copy(array), self.propagate_copy(src));
        let code = self.code(Opcode::TauCheckElemType, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, array.id(), src.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_check_elem_type(array, src) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(
            Opcode::TauCheckElemType,
            Modifier::none(),
            tau,
            vec![array, src, tau_null_checked, tau_is_array],
            Payload::None,
        );
        self.insert(CseKey::with2(code, array.id(), src.id()), dst);
        dst
    }

    pub fn gen_tau_check_finite(&mut self, src: OpndId) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::TauCheckFinite, self.types.tau, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, src.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_check_finite(src) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(Opcode::TauCheckFinite, Modifier::none(), tau, vec![src], Payload::None);
        self.insert(CseKey::with1(code, src.id()), dst);
        dst
    }

    pub fn gen_check_finite(&mut self, src: OpndId) -> OpndId {
        self.gen_tau_check_finite(src);
        src
    }

    //
    // array length
    //

    pub fn gen_array_len(&mut self, array: OpndId) -> OpndId {
        let array = self.propagate_copy(array);
        let tau_null = self.gen_tau_check_null(array);
        let array_ty = self.opnd_ty(array);
        let tau_type = self.gen_tau_has_type(array, array_ty);
        self.gen_tau_array_len(array, tau_null, tau_type)
    }

    pub fn gen_tau_array_len(
        &mut self,
        array: OpndId,
        tau_null_checked: OpndId,
        tau_base_type_checked: OpndId,
    ) -> OpndId {
        let array = self.propagate_copy(array);
        let i32t = self.types.i32;
        let code = self.code(Opcode::TauArrayLen, i32t, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, array.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_array_len(array) {
            self.insert(CseKey::with1(code, array.id()), dst);
            return dst;
        }
        let dst = self.emit(
            Opcode::TauArrayLen,
            Modifier::none(),
            i32t,
            vec![array, tau_null_checked, tau_base_type_checked],
            Payload::None,
        );
        self.insert(CseKey::with1(code, array.id()), dst);
        dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::TypeManager;

    fn builder(tm: &TypeManager) -> IrBuilder {
        let mut b = IrBuilder::new(IrBuilderFlags::default(), tm);
        let label = b.factory.make_label();
        b.gen_label(label);
        b
    }

    #[test]
    fn cse_merges_pure_ops_within_a_block() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let i32t = b.types.i32;
        let x = b.factory.create_ssa_tmp(i32t);
        let y = b.factory.create_ssa_tmp(i32t);
        let m = Modifier::arith();
        let first = b.gen_add(i32t, m, x, y);
        let second = b.gen_add(i32t, m, x, y);
        assert_eq!(first, second);

        // a new block closes the hashing scope
        let label = b.factory.make_label();
        b.gen_label(label);
        let third = b.gen_add(i32t, m, x, y);
        assert_ne!(first, third);
    }

    #[test]
    fn different_modifiers_never_merge() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let i32t = b.types.i32;
        let x = b.factory.create_ssa_tmp(i32t);
        let y = b.factory.create_ssa_tmp(i32t);
        let plain = b.gen_add(i32t, Modifier::arith(), x, y);
        let strict = b.gen_add(
            i32t,
            Modifier::arith().with_strict(StrictOp::Strict),
            x,
            y,
        );
        assert_ne!(plain, strict);
    }

    #[test]
    fn add_zero_simplifies_away() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let i32t = b.types.i32;
        let x = b.factory.create_ssa_tmp(i32t);
        let zero = b.gen_ld_constant_i4(0);
        let sum = b.gen_add(i32t, Modifier::arith(), x, zero);
        assert_eq!(sum, x);
        let diff = b.gen_sub(i32t, Modifier::arith(), x, x);
        assert_eq!(b.const_of(diff).and_then(|c| c.as_i4()), Some(0));
    }

    #[test]
    fn null_check_of_fresh_allocation_folds_to_tau_safe() {
        let mut tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let i32t = b.types.i32;
        let size = b.gen_ld_constant_i4(3);
        let array = b.gen_new_array(&mut tm, i32t, size);
        let tau = b.gen_tau_check_null(array);
        assert_eq!(
            b.def_of(tau).map(|i| i.op),
            Some(Opcode::TauSafe),
            "fresh allocations need no null check"
        );
        // and the array length folds to the allocation size
        let len = b.gen_array_len(array);
        assert_eq!(len, size);
    }

    #[test]
    fn repeated_null_checks_fold_into_one() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let obj = b.factory.create_ssa_tmp(tm.system_object_type());
        let t1 = b.gen_tau_check_null(obj);
        let t2 = b.gen_tau_check_null(obj);
        assert_eq!(t1, t2);
    }

    #[test]
    fn tau_and_sorts_its_sources() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let obj1 = b.factory.create_ssa_tmp(tm.system_object_type());
        let obj2 = b.factory.create_ssa_tmp(tm.system_object_type());
        let ta = b.gen_tau_is_non_null(obj1);
        let tb = b.gen_tau_is_non_null(obj2);
        let and1 = b.gen_tau_and(ta, tb);
        let and2 = b.gen_tau_and(tb, ta);
        assert_eq!(and1, and2);
    }

    #[test]
    fn copy_propagation_sees_through_copies() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let x = b.gen_ld_constant_i4(9);
        let c1 = b.gen_copy(x);
        let c2 = b.gen_copy(c1);
        assert_eq!(b.propagate_copy(c2), x);
    }

    #[test]
    fn shifts_by_zero_vanish() {
        let tm = TypeManager::new(false);
        let mut b = builder(&tm);
        let i32t = b.types.i32;
        let x = b.factory.create_ssa_tmp(i32t);
        let zero = b.gen_ld_constant_i4(0);
        let shifted = b.gen_shl(i32t, Modifier::arith(), x, zero);
        assert_eq!(shifted, x);
        // a masked count folds modulo the width
        let thirty_two = b.gen_ld_constant_i4(32);
        let wrapped = b.gen_shl(i32t, Modifier::arith(), x, thirty_two);
        assert_eq!(wrapped, x);
    }

    #[test]
    fn method_safe_hoists_after_def_args() {
        let tm = TypeManager::new(false);
        let mut b = IrBuilder::new(IrBuilderFlags::default(), &tm);
        let entry = b.gen_method_entry_label(ember_ir::MethodId(1));
        let obj = tm.system_object_type();
        b.gen_arg_def(DefArgOp::NonNullThis, obj);
        b.gen_arg_def(DefArgOp::None, tm.int32_type());
        // some body instruction first, then the request
        b.gen_ld_constant_i4(5);
        let tau = b.gen_tau_method_safe();
        let ops: Vec<Opcode> = b
            .factory
            .arena()
            .chain(entry)
            .map(|i| b.factory.arena().inst(i).op)
            .collect();
        assert_eq!(
            ops,
            vec![
                Opcode::MethodEntryLabel,
                Opcode::DefArg,
                Opcode::DefArg,
                Opcode::TauMethodSafe,
                Opcode::LdConstant,
            ]
        );
        // reused thereafter
        assert_eq!(b.gen_tau_method_safe(), tau);
    }

    #[test]
    fn suppressed_bounds_checks_yield_unsafe_tau() {
        let mut tm = TypeManager::new(false);
        let flags = IrBuilderFlags {
            suppress_check_bounds: true,
            ..IrBuilderFlags::default()
        };
        let mut b = IrBuilder::new(flags, &tm);
        let label = b.factory.make_label();
        b.gen_label(label);
        let i32t = b.types.i32;
        let size = b.gen_ld_constant_i4(8);
        let array = b.gen_new_array(&mut tm, i32t, size);
        let index = b.factory.create_ssa_tmp(i32t);
        let tau_null = b.gen_tau_check_null(array);
        let tau = b.gen_tau_check_bounds(array, index, tau_null);
        assert_eq!(b.def_of(tau).map(|i| i.op), Some(Opcode::TauUnsafe));
    }
}
