//! Translation-time peephole simplification.
//!
//! Each rule either returns an already-existing (or freshly folded)
//! operand, or `None` to let the caller emit normally. Rules never drop an
//! observable side effect; checks fold only when the guarded property is
//! proved, never when it is merely unknown.

use ember_ir::{CmpOp, ConstValue, DefArgOp, Modifier, Opcode, OpndId, OverflowOp, StrictOp};
use ember_types::Ty;

use super::IrBuilder;

impl IrBuilder {
    fn on(&self) -> bool {
        self.flags.do_simplify
    }

    fn is_i32(&self, ty: Ty) -> bool {
        ty == self.types.i32
    }

    fn is_i64(&self, ty: Ty) -> bool {
        ty == self.types.i64
    }

    fn is_int_ty(&self, ty: Ty) -> bool {
        self.is_i32(ty) || self.is_i64(ty)
    }

    fn int_const(&self, op: OpndId) -> Option<i64> {
        self.const_of(op).and_then(|c| c.as_int())
    }

    fn make_int(&mut self, ty: Ty, v: i64) -> OpndId {
        if self.is_i64(ty) {
            self.gen_ld_constant_i8(v)
        } else {
            self.gen_ld_constant_i4(v as i32)
        }
    }

    /// Values that cannot be null by construction. Parameters flagged
    /// non-null keep their explicit checks; only fresh allocations and
    /// caught exceptions fold.
    pub(crate) fn is_non_null_opnd(&self, op: OpndId) -> bool {
        match self.def_of(op) {
            Some(inst) => match inst.op {
                Opcode::NewObj
                | Opcode::NewArray
                | Opcode::NewMultiArray
                | Opcode::LdRef
                | Opcode::Catch => true,
                Opcode::VmHelperCall => matches!(
                    inst.payload,
                    ember_ir::Payload::VmHelper(
                        ember_ir::VmHelperId::NewResolvedUsingAllocHandle
                            | ember_ir::VmHelperId::NewVectorUsingVtable
                    )
                ),
                _ => false,
            },
            None => false,
        }
    }

    /// Values whose dynamic type equals their static type.
    pub(crate) fn is_exact_type_opnd(&self, op: OpndId) -> bool {
        match self.def_of(op) {
            Some(inst) => match inst.op {
                Opcode::NewObj | Opcode::NewArray | Opcode::NewMultiArray => true,
                Opcode::DefArg => matches!(
                    inst.modifier.defarg(),
                    DefArgOp::ExactType | DefArgOp::NonNullExactType
                ),
                _ => false,
            },
            None => false,
        }
    }

    fn no_overflow_check(m: Modifier) -> bool {
        m.overflow() == OverflowOp::None
    }

    //
    // arithmetic
    //

    pub(super) fn simplify_add(
        &mut self,
        ty: Ty,
        m: Modifier,
        a: OpndId,
        b: OpndId,
    ) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) || !Self::no_overflow_check(m) {
            return None;
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) => Some(self.make_int(ty, wrap(ty == self.types.i32, x.wrapping_add(y)))),
            (Some(0), None) => Some(b),
            (None, Some(0)) => Some(a),
            _ => None,
        }
    }

    pub(super) fn simplify_sub(
        &mut self,
        ty: Ty,
        m: Modifier,
        a: OpndId,
        b: OpndId,
    ) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) || !Self::no_overflow_check(m) {
            return None;
        }
        if a == b && m.strict() == StrictOp::NonStrict {
            return Some(self.make_int(ty, 0));
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) => Some(self.make_int(ty, wrap(ty == self.types.i32, x.wrapping_sub(y)))),
            (None, Some(0)) => Some(a),
            _ => None,
        }
    }

    pub(super) fn simplify_mul(
        &mut self,
        ty: Ty,
        m: Modifier,
        a: OpndId,
        b: OpndId,
    ) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) || !Self::no_overflow_check(m) {
            return None;
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) => Some(self.make_int(ty, wrap(ty == self.types.i32, x.wrapping_mul(y)))),
            (Some(1), None) => Some(b),
            (None, Some(1)) => Some(a),
            (Some(0), None) | (None, Some(0)) => Some(self.make_int(ty, 0)),
            _ => None,
        }
    }

    pub(super) fn simplify_div(
        &mut self,
        ty: Ty,
        _m: Modifier,
        a: OpndId,
        b: OpndId,
    ) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) {
            return None;
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) if y != 0 && !(y == -1 && x == i64::MIN) => {
                Some(self.make_int(ty, wrap(ty == self.types.i32, x.wrapping_div(y))))
            }
            (None, Some(1)) => Some(a),
            _ => None,
        }
    }

    pub(super) fn simplify_neg(&mut self, ty: Ty, src: OpndId) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        // -(-x) => x
        if let Some(inst) = self.def_of(src) {
            if inst.op == Opcode::Neg {
                return Some(inst.src(0));
            }
        }
        if self.is_int_ty(ty) {
            if let Some(x) = self.int_const(src) {
                return Some(self.make_int(ty, wrap(ty == self.types.i32, x.wrapping_neg())));
            }
        }
        None
    }

    pub(super) fn simplify_and(&mut self, ty: Ty, a: OpndId, b: OpndId) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) {
            return None;
        }
        if a == b {
            return Some(a);
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) => Some(self.make_int(ty, x & y)),
            (Some(0), _) | (_, Some(0)) => Some(self.make_int(ty, 0)),
            (Some(-1), None) => Some(b),
            (None, Some(-1)) => Some(a),
            _ => None,
        }
    }

    pub(super) fn simplify_or(&mut self, ty: Ty, a: OpndId, b: OpndId) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) {
            return None;
        }
        if a == b {
            return Some(a);
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) => Some(self.make_int(ty, x | y)),
            (Some(0), None) => Some(b),
            (None, Some(0)) => Some(a),
            _ => None,
        }
    }

    pub(super) fn simplify_xor(&mut self, ty: Ty, a: OpndId, b: OpndId) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) {
            return None;
        }
        if a == b {
            return Some(self.make_int(ty, 0));
        }
        match (self.int_const(a), self.int_const(b)) {
            (Some(x), Some(y)) => Some(self.make_int(ty, x ^ y)),
            (Some(0), None) => Some(b),
            (None, Some(0)) => Some(a),
            _ => None,
        }
    }

    pub(super) fn simplify_not(&mut self, ty: Ty, src: OpndId) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        if let Some(inst) = self.def_of(src) {
            if inst.op == Opcode::Not {
                return Some(inst.src(0));
            }
        }
        if self.is_int_ty(ty) {
            if let Some(x) = self.int_const(src) {
                return Some(self.make_int(ty, !x));
            }
        }
        None
    }

    pub(super) fn simplify_shift(
        &mut self,
        op: Opcode,
        ty: Ty,
        m: Modifier,
        value: OpndId,
        amount: OpndId,
    ) -> Option<OpndId> {
        if !self.on() || !self.is_int_ty(ty) {
            return None;
        }
        let width_mask = if self.is_i64(ty) { 63 } else { 31 };
        let amount_const = self.int_const(amount).map(|c| (c & width_mask) as u32);
        if amount_const == Some(0) {
            return Some(value);
        }
        let value_const = self.int_const(value)?;
        let sh = amount_const?;
        let folded = match op {
            Opcode::Shl => value_const.wrapping_shl(sh),
            Opcode::Shr if m.signed() == ember_ir::SignedOp::Signed => value_const.wrapping_shr(sh),
            Opcode::Shr => {
                if self.is_i64(ty) {
                    ((value_const as u64) >> sh) as i64
                } else {
                    ((value_const as u32) >> sh) as i64
                }
            }
            _ => return None,
        };
        Some(self.make_int(ty, wrap(ty == self.types.i32, folded)))
    }

    //
    // conversion & comparison
    //

    pub(super) fn simplify_conv(
        &mut self,
        op: Opcode,
        ty: Ty,
        m: Modifier,
        src: OpndId,
    ) -> Option<OpndId> {
        if !self.on() || op != Opcode::Conv || !Self::no_overflow_check(m) {
            return None;
        }
        let src_ty = self.opnd_ty(src);
        if src_ty == ty {
            return Some(src);
        }
        // two chained int widenings collapse into one
        if self.is_i64(ty) {
            if let Some(inst) = self.def_of(src) {
                if inst.op == Opcode::Conv
                    && self.is_i32(inst.ty)
                    && self.is_i32(self.opnd_ty(inst.src(0)))
                {
                    let origin = inst.src(0);
                    return Some(self.gen_conv(ty, m, origin));
                }
            }
        }
        match (self.const_of(src), self.is_i64(ty), self.is_i32(ty)) {
            (Some(ConstValue::I4(v)), true, _) => Some(self.gen_ld_constant_i8(v as i64)),
            (Some(ConstValue::I8(v)), _, true) => Some(self.gen_ld_constant_i4(v as i32)),
            _ => None,
        }
    }

    pub(super) fn simplify_cmp(
        &mut self,
        _dst_ty: Ty,
        cmp: CmpOp,
        a: OpndId,
        b: OpndId,
    ) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        let a_ty = self.opnd_ty(a);
        let int_like = self.is_int_ty(a_ty) || a_ty == self.types.int_ptr;
        // identical integer operands have a fixed ordering; floats do not
        // (NaN breaks reflexivity)
        if a == b && int_like {
            let v = match cmp {
                CmpOp::Eq | CmpOp::Gte | CmpOp::GteUn => 1,
                CmpOp::NeUn | CmpOp::Gt | CmpOp::GtUn => 0,
                CmpOp::Zero | CmpOp::NonZero => return None,
            };
            return Some(self.gen_ld_constant_i4(v));
        }
        if int_like {
            if let (Some(x), Some(y)) = (self.int_const(a), self.int_const(b)) {
                let v = match cmp {
                    CmpOp::Eq => x == y,
                    CmpOp::NeUn => x != y,
                    CmpOp::Gt => x > y,
                    CmpOp::Gte => x >= y,
                    CmpOp::GtUn => (x as u64) > (y as u64),
                    CmpOp::GteUn => (x as u64) >= (y as u64),
                    CmpOp::Zero | CmpOp::NonZero => return None,
                };
                return Some(self.gen_ld_constant_i4(v as i32));
            }
        }
        None
    }

    //
    // checks
    //

    pub(super) fn simplify_tau_check_null(&mut self, base: OpndId) -> Option<OpndId> {
        // always worth running: the builder emits null checks redundantly
        if self.is_non_null_opnd(base) {
            return Some(self.gen_tau_safe());
        }
        None
    }

    pub(super) fn simplify_tau_check_zero(&mut self, src: OpndId) -> Option<OpndId> {
        match self.int_const(src) {
            Some(v) if v != 0 => Some(self.gen_tau_safe()),
            _ => None,
        }
    }

    pub(super) fn simplify_tau_check_bounds(&mut self, ub: OpndId, index: OpndId) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        match (self.int_const(ub), self.int_const(index)) {
            (Some(ub), Some(i)) if 0 <= i && i < ub => Some(self.gen_tau_safe()),
            _ => None,
        }
    }

    pub(super) fn simplify_tau_check_elem_type(
        &mut self,
        _array: OpndId,
        src: OpndId,
    ) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        // storing null never violates the element type
        if matches!(self.const_of(src), Some(c) if c.is_null()) {
            return Some(self.gen_tau_safe());
        }
        None
    }

    pub(super) fn simplify_tau_check_finite(&mut self, src: OpndId) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        match self.const_of(src) {
            Some(ConstValue::Single(v)) if v.is_finite() => Some(self.gen_tau_safe()),
            Some(ConstValue::Double(v)) if v.is_finite() => Some(self.gen_tau_safe()),
            _ => None,
        }
    }

    pub(super) fn simplify_tau_check_cast(&mut self, src: OpndId, ty: Ty) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        if matches!(self.const_of(src), Some(c) if c.is_null()) {
            return Some(self.gen_tau_safe());
        }
        // the declared type is an upper bound; an equal target always holds
        if self.opnd_ty(src) == ty {
            return Some(self.gen_tau_safe());
        }
        None
    }

    pub(super) fn simplify_instance_of(&mut self, src: OpndId, ty: Ty) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        if matches!(self.const_of(src), Some(c) if c.is_null()) {
            return Some(self.gen_ld_constant_i4(0));
        }
        if self.is_exact_type_opnd(src) && self.opnd_ty(src) == ty {
            return Some(self.gen_ld_constant_i4(1));
        }
        None
    }

    /// Length of a freshly constructed array is its allocation size.
    pub(super) fn simplify_tau_array_len(&mut self, array: OpndId) -> Option<OpndId> {
        if !self.on() {
            return None;
        }
        match self.def_of(array) {
            Some(inst) if inst.op == Opcode::NewArray => Some(inst.src(0)),
            _ => None,
        }
    }
}

/// Truncate a folded value to 32 bits when the type says so.
fn wrap(is_32: bool, v: i64) -> i64 {
    if is_32 {
        v as i32 as i64
    } else {
        v
    }
}
