use ember_types::{Ty, TypeManager};
use hashbrown::HashMap;

use crate::{
    ConstValue, FieldId, Inst, InstId, IrArena, JitHelperId, LabelId, MethodId, Modifier, Opcode,
    Opnd, OpndId, OpndKind, Payload, SystemExceptionId, VmHelperId, BC_OFFSET_UNSET,
};

/// Creates and owns all operands and instructions of one compilation.
///
/// One named `make_*` constructor exists per opcode; all of them funnel
/// through [`InstFactory::make`], which validates operand counts always and
/// operand types in debug builds. Construction never fails; malformed
/// requests are programmer errors and assert. Ids are monotonically
/// increasing and reset with the factory.
#[derive(Debug)]
pub struct InstFactory {
    arena: IrArena,
    void_ty: Ty,
    tau_ty: Ty,
    next_label: u32,
}

/// Named constructors for the fixed-shape value-producing tags.
macro_rules! value_factories {
    ($($fn_name:ident => $opcode:ident ( $($src:ident),* )),* $(,)?) => {
        $(pub fn $fn_name(
            &mut self,
            modifier: Modifier,
            ty: Ty,
            dst: OpndId
            $(, $src: OpndId)*
        ) -> InstId {
            self.make(Opcode::$opcode, modifier, ty, dst, vec![$($src),*], Payload::None)
        })*
    };
}

/// Named constructors for the fixed-shape pure-effect tags; `ty` is the
/// operated-on type (stores), or the void type for control transfers.
macro_rules! effect_factories {
    ($($fn_name:ident => $opcode:ident ( $($src:ident),* )),* $(,)?) => {
        $(pub fn $fn_name(
            &mut self,
            modifier: Modifier,
            ty: Ty
            $(, $src: OpndId)*
        ) -> InstId {
            self.make(Opcode::$opcode, modifier, ty, OpndId::NULL, vec![$($src),*], Payload::None)
        })*
    };
}

impl InstFactory {
    pub fn new(tm: &TypeManager) -> Self {
        Self {
            arena: IrArena::new(tm.void_type()),
            void_ty: tm.void_type(),
            tau_ty: tm.tau_type(),
            next_label: 0,
        }
    }

    pub fn arena(&self) -> &IrArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut IrArena {
        &mut self.arena
    }

    pub fn into_arena(self) -> IrArena {
        self.arena
    }

    pub fn num_labels(&self) -> u32 {
        self.next_label
    }

    //
    // operands
    //

    /// Fresh SSA temporary; a `Void` type yields the shared null sentinel.
    pub fn create_ssa_tmp(&mut self, ty: Ty) -> OpndId {
        if ty == self.void_ty {
            return OpndId::NULL;
        }
        self.arena.push_opnd(Opnd {
            id: OpndId::NULL,
            ty,
            kind: OpndKind::SsaTmp,
            def: None,
        })
    }

    pub fn create_var(&mut self, ty: Ty, pinned: bool) -> OpndId {
        self.arena.push_opnd(Opnd {
            id: OpndId::NULL,
            ty,
            kind: OpndKind::Var { pinned },
            def: None,
        })
    }

    pub fn create_ssa_var(&mut self, var: OpndId, version: u32) -> OpndId {
        debug_assert!(self.arena.opnd(var).is_var());
        let ty = self.arena.opnd(var).ty;
        self.arena.push_opnd(Opnd {
            id: OpndId::NULL,
            ty,
            kind: OpndKind::SsaVar { var, version },
            def: None,
        })
    }

    /// Refinement operand aliasing `base` for range-split uses.
    pub fn create_pi(&mut self, base: OpndId) -> OpndId {
        let ty = self.arena.opnd(base).ty;
        self.arena.push_opnd(Opnd {
            id: OpndId::NULL,
            ty,
            kind: OpndKind::Pi { base },
            def: None,
        })
    }

    //
    // the shared constructor funnel
    //

    /// Build one instruction. Validates the operand count for fixed-arity
    /// tags and, in debug builds, the operand types (tau positions, tau
    /// results, variable operands). Every named `make_*` delegates here.
    pub fn make(
        &mut self,
        op: Opcode,
        modifier: Modifier,
        ty: Ty,
        dst: OpndId,
        srcs: Vec<OpndId>,
        payload: Payload,
    ) -> InstId {
        if let Some(arity) = fixed_arity(op) {
            debug_assert_eq!(
                srcs.len(),
                arity,
                "operand count mismatch for {op}",
            );
        }
        #[cfg(debug_assertions)]
        self.validate_operand_types(op, ty, dst, &srcs);
        let id = self.arena.push_inst(Inst {
            op,
            modifier,
            ty,
            dst,
            srcs,
            bc_offset: BC_OFFSET_UNSET,
            payload,
            prev: None,
            next: None,
            node: None,
        });
        if !dst.is_null() {
            let opnd = self.arena.opnd_mut(dst);
            match opnd.kind {
                // vars collect multiple definitions; only the first sticks
                OpndKind::Var { .. } => {
                    if opnd.def.is_none() {
                        opnd.def = Some(id);
                    }
                }
                _ => {
                    debug_assert!(opnd.def.is_none(), "SSA value redefined");
                    opnd.def = Some(id);
                }
            }
        }
        id
    }

    /// Debug-build type validation: tau-consuming tags take tau witnesses
    /// in their tau positions and plain values elsewhere; tau-producing
    /// tags yield tau-typed results; variable load/store go through
    /// variable operands.
    #[cfg(debug_assertions)]
    fn validate_operand_types(&self, op: Opcode, ty: Ty, dst: OpndId, srcs: &[OpndId]) {
        if op.produces_tau() {
            debug_assert_eq!(ty, self.tau_ty, "{op} must produce a tau witness");
        }
        if let Some(range) = tau_src_positions(op, srcs.len()) {
            for (i, &src) in srcs.iter().enumerate() {
                let is_tau = self.arena.opnd(src).ty == self.tau_ty;
                if range.contains(&i) {
                    debug_assert!(is_tau, "{op} source {i} must be a tau witness");
                } else {
                    debug_assert!(!is_tau, "{op} source {i} must not be a tau witness");
                }
            }
        }
        match op {
            Opcode::StVar => {
                debug_assert!(self.arena.opnd(dst).is_var(), "StVar writes a variable");
            }
            Opcode::LdVar | Opcode::LdVarAddr => {
                debug_assert!(
                    self.arena.opnd(srcs[0]).is_var(),
                    "{op} reads a variable"
                );
            }
            _ => {}
        }
    }

    //
    // labels
    //

    fn fresh_label(&mut self) -> LabelId {
        let l = LabelId(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn make_label(&mut self) -> InstId {
        let l = self.fresh_label();
        self.make(
            Opcode::Label,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::Label(l),
        )
    }

    pub fn make_method_entry_label(&mut self, method: MethodId) -> InstId {
        let l = self.fresh_label();
        self.make(
            Opcode::MethodEntryLabel,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::MethodEntryLabel { label: l, method },
        )
    }

    pub fn make_catch_label(&mut self, order: u32, exception_ty: Ty) -> InstId {
        let l = self.fresh_label();
        self.make(
            Opcode::CatchLabel,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::CatchLabel {
                label: l,
                order,
                exception_ty,
            },
        )
    }

    pub fn make_dispatch_label(&mut self) -> InstId {
        let l = self.fresh_label();
        self.make(
            Opcode::DispatchLabel,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::DispatchLabel(l),
        )
    }

    //
    // per-opcode constructors, fixed shapes
    //

    value_factories! {
        make_add => Add(src1, src2),
        make_sub => Sub(src1, src2),
        make_mul => Mul(src1, src2),
        make_mulhi => MulHi(src1, src2),
        make_min => Min(src1, src2),
        make_max => Max(src1, src2),
        make_abs => Abs(src),
        make_neg => Neg(src),
        make_and => And(src1, src2),
        make_or => Or(src1, src2),
        make_xor => Xor(src1, src2),
        make_not => Not(src),
        make_select => Select(cond, src1, src2),
        make_shl => Shl(value, amount),
        make_shr => Shr(value, amount),
        make_shladd => Shladd(value, amount, addto),
        make_cmp => Cmp(src1, src2),
        make_cmp3 => Cmp3(src1, src2),
        make_conv => Conv(src),
        make_conv_ze => ConvZE(src),
        make_conv_unmanaged => ConvUnmanaged(src),
        make_copy => Copy(src),
        make_ld_var => LdVar(var),
        make_ld_var_addr => LdVarAddr(var),
        make_def_arg => DefArg(),
        make_catch => Catch(),
        make_save_ret => SaveRet(),
        make_tau_div => TauDiv(src1, src2, tau_div_ok),
        make_tau_rem => TauRem(src1, src2, tau_div_ok),
        make_tau_ld_ind => TauLdInd(ptr, tau_non_null, tau_in_range),
        make_tau_ld_elem => TauLdElem(array, index, tau_non_null, tau_in_range),
        make_tau_array_len => TauArrayLen(array, tau_non_null, tau_base_type),
        make_add_scaled_index => AddScaledIndex(ptr, index),
        make_add_offset => AddOffset(refr, offset),
        make_add_offset_plus_heapbase => AddOffsetPlusHeapbase(refr, offset),
        make_tau_check_null => TauCheckNull(base),
        make_tau_check_zero => TauCheckZero(src),
        make_tau_check_div_opnds => TauCheckDivOpnds(src1, src2),
        make_tau_check_bounds => TauCheckBounds(ub, index),
        make_tau_check_finite => TauCheckFinite(src),
        make_tau_check_elem_type => TauCheckElemType(array, src, tau_non_null, tau_is_array),
        make_tau_safe => TauSafe(),
        make_tau_unsafe => TauUnsafe(),
        make_tau_method_safe => TauMethodSafe(),
        make_tau_is_non_null => TauIsNonNull(src),
        make_tau_pi => TauPi(src, tau),
        make_compress_ref => CompressRef(src),
        make_uncompress_ref => UncompressRef(src),
        make_ld_lock_addr => LdLockAddr(obj),
        make_balanced_monitor_enter => BalancedMonitorEnter(obj, lock_addr),
        make_opt_balanced_monitor_enter => OptBalancedMonitorEnter(obj, lock_addr),
        make_inc_rec_count => IncRecCount(obj, old_lock),
    }

    effect_factories! {
        make_ret => Ret(src),
        make_throw => Throw(exception),
        make_pseudo_throw => PseudoThrow(),
        make_monitor_enter => MonitorEnter(obj, tau_non_null),
        make_monitor_exit => MonitorExit(obj, tau_non_null),
        make_monitor_enter_fence => MonitorEnterFence(obj),
        make_monitor_exit_fence => MonitorExitFence(obj),
        make_balanced_monitor_exit => BalancedMonitorExit(obj, lock_addr, old_value),
        make_opt_balanced_monitor_exit => OptBalancedMonitorExit(obj, lock_addr, old_value),
        make_prefetch => Prefetch(addr),
        make_tau_st_ind => TauStInd(src, ptr, tau_non_null, tau_in_range, tau_elem_type),
        make_tau_st_elem => TauStElem(src, array, index, tau_non_null, tau_in_range, tau_elem_type),
        make_tau_st_ref => TauStRef(src, base, ptr, tau_non_null, tau_in_range, tau_elem_type),
    }

    //
    // per-opcode constructors, payload carriers
    //

    pub fn make_st_var(&mut self, var: OpndId, src: OpndId) -> InstId {
        let ty = self.arena.opnd(var).ty;
        self.make(Opcode::StVar, Modifier::none(), ty, var, vec![src], Payload::None)
    }

    pub fn make_branch(&mut self, modifier: Modifier, target: LabelId, srcs: Vec<OpndId>) -> InstId {
        self.make(
            Opcode::Branch,
            modifier,
            self.void_ty,
            OpndId::NULL,
            srcs,
            Payload::Branch { target },
        )
    }

    pub fn make_jump(&mut self, target: LabelId) -> InstId {
        self.make(
            Opcode::Jump,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::Branch { target },
        )
    }

    pub fn make_jsr(&mut self, target: LabelId) -> InstId {
        self.make(
            Opcode::Jsr,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::Branch { target },
        )
    }

    pub fn make_switch(&mut self, src: OpndId, targets: Box<[LabelId]>, default: LabelId) -> InstId {
        self.make(
            Opcode::Switch,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            vec![src],
            Payload::Switch { targets, default },
        )
    }

    pub fn make_return(&mut self, src: Option<OpndId>) -> InstId {
        self.make(
            Opcode::Return,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            src.into_iter().collect(),
            Payload::None,
        )
    }

    pub fn make_throw_system_exception(&mut self, id: SystemExceptionId) -> InstId {
        self.make(
            Opcode::ThrowSystemException,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::SystemException(id),
        )
    }

    pub fn make_throw_linking_exception(&mut self, cp_index: u32, operation: u8) -> InstId {
        self.make(
            Opcode::ThrowLinkingException,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::LinkError {
                cp_index,
                operation,
            },
        )
    }

    pub fn make_ld_const(&mut self, ty: Ty, value: ConstValue) -> (InstId, OpndId) {
        let dst = self.create_ssa_tmp(ty);
        let inst = self.make(
            Opcode::LdConstant,
            Modifier::none(),
            ty,
            dst,
            Vec::new(),
            Payload::Const(value),
        );
        (inst, dst)
    }

    pub fn make_ld_ref(&mut self, modifier: Modifier, ty: Ty, dst: OpndId, cp_index: u32) -> InstId {
        self.make(Opcode::LdRef, modifier, ty, dst, Vec::new(), Payload::Token { cp_index })
    }

    pub fn make_ld_static(&mut self, modifier: Modifier, ty: Ty, dst: OpndId, field: FieldId) -> InstId {
        self.make(Opcode::LdStatic, modifier, ty, dst, Vec::new(), Payload::Field(field))
    }

    pub fn make_ld_static_addr(&mut self, ty: Ty, dst: OpndId, field: FieldId) -> InstId {
        self.make(
            Opcode::LdStaticAddr,
            Modifier::none(),
            ty,
            dst,
            Vec::new(),
            Payload::Field(field),
        )
    }

    pub fn make_ld_field_addr(&mut self, ty: Ty, dst: OpndId, base: OpndId, field: FieldId) -> InstId {
        self.make(
            Opcode::LdFieldAddr,
            Modifier::none(),
            ty,
            dst,
            vec![base],
            Payload::Field(field),
        )
    }

    pub fn make_ld_elem_addr(
        &mut self,
        ty: Ty,
        dst: OpndId,
        array: OpndId,
        index: OpndId,
        elem_ty: Ty,
    ) -> InstId {
        self.make(
            Opcode::LdElemAddr,
            Modifier::none(),
            ty,
            dst,
            vec![array, index],
            Payload::TypeOp(elem_ty),
        )
    }

    pub fn make_ld_array_base_addr(
        &mut self,
        ty: Ty,
        dst: OpndId,
        array: OpndId,
        elem_ty: Ty,
    ) -> InstId {
        self.make(
            Opcode::LdArrayBaseAddr,
            Modifier::none(),
            ty,
            dst,
            vec![array],
            Payload::TypeOp(elem_ty),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_tau_ld_field(
        &mut self,
        modifier: Modifier,
        ty: Ty,
        dst: OpndId,
        base: OpndId,
        tau_non_null: OpndId,
        tau_in_range: OpndId,
        field: FieldId,
    ) -> InstId {
        self.make(
            Opcode::TauLdField,
            modifier,
            ty,
            dst,
            vec![base, tau_non_null, tau_in_range],
            Payload::Field(field),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_tau_st_field(
        &mut self,
        modifier: Modifier,
        ty: Ty,
        src: OpndId,
        base: OpndId,
        tau_non_null: OpndId,
        tau_in_range: OpndId,
        tau_elem_type: OpndId,
        field: FieldId,
    ) -> InstId {
        self.make(
            Opcode::TauStField,
            modifier,
            ty,
            OpndId::NULL,
            vec![src, base, tau_non_null, tau_in_range, tau_elem_type],
            Payload::Field(field),
        )
    }

    pub fn make_st_static(&mut self, modifier: Modifier, ty: Ty, src: OpndId, field: FieldId) -> InstId {
        self.make(
            Opcode::StStatic,
            modifier,
            ty,
            OpndId::NULL,
            vec![src],
            Payload::Field(field),
        )
    }

    pub fn make_ld_fun_addr(&mut self, ty: Ty, dst: OpndId, method: MethodId) -> InstId {
        self.make(
            Opcode::LdFunAddr,
            Modifier::none(),
            ty,
            dst,
            Vec::new(),
            Payload::Method(method),
        )
    }

    pub fn make_ld_fun_addr_slot(&mut self, ty: Ty, dst: OpndId, method: MethodId) -> InstId {
        self.make(
            Opcode::LdFunAddrSlot,
            Modifier::none(),
            ty,
            dst,
            Vec::new(),
            Payload::Method(method),
        )
    }

    pub fn make_get_vtable_addr(&mut self, ty: Ty, dst: OpndId, of: Ty) -> InstId {
        self.make(
            Opcode::GetVTableAddr,
            Modifier::none(),
            ty,
            dst,
            Vec::new(),
            Payload::TypeOp(of),
        )
    }

    pub fn make_tau_ld_vtable_addr(
        &mut self,
        ty: Ty,
        dst: OpndId,
        base: OpndId,
        tau_non_null: OpndId,
        of: Ty,
    ) -> InstId {
        self.make(
            Opcode::TauLdVTableAddr,
            Modifier::none(),
            ty,
            dst,
            vec![base, tau_non_null],
            Payload::TypeOp(of),
        )
    }

    pub fn make_tau_ld_virt_fun_addr_slot(
        &mut self,
        ty: Ty,
        dst: OpndId,
        vtable: OpndId,
        tau_ok: OpndId,
        method: MethodId,
    ) -> InstId {
        self.make(
            Opcode::TauLdVirtFunAddrSlot,
            Modifier::none(),
            ty,
            dst,
            vec![vtable, tau_ok],
            Payload::Method(method),
        )
    }

    pub fn make_get_class_obj(&mut self, ty: Ty, dst: OpndId, of: Ty) -> InstId {
        self.make(
            Opcode::GetClassObj,
            Modifier::none(),
            ty,
            dst,
            Vec::new(),
            Payload::TypeOp(of),
        )
    }

    pub fn make_init_type(&mut self, ty: Ty) -> InstId {
        self.make(
            Opcode::InitType,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::TypeOp(ty),
        )
    }

    pub fn make_type_monitor_enter(&mut self, ty: Ty) -> InstId {
        self.make(
            Opcode::TypeMonitorEnter,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::TypeOp(ty),
        )
    }

    pub fn make_type_monitor_exit(&mut self, ty: Ty) -> InstId {
        self.make(
            Opcode::TypeMonitorExit,
            Modifier::none(),
            self.void_ty,
            OpndId::NULL,
            Vec::new(),
            Payload::TypeOp(ty),
        )
    }

    pub fn make_tau_has_type(&mut self, dst: OpndId, src: OpndId, has: Ty) -> InstId {
        let tau = self.tau_ty;
        self.make(
            Opcode::TauHasType,
            Modifier::none(),
            tau,
            dst,
            vec![src],
            Payload::TypeOp(has),
        )
    }

    pub fn make_tau_has_exact_type(&mut self, dst: OpndId, src: OpndId, has: Ty) -> InstId {
        let tau = self.tau_ty;
        self.make(
            Opcode::TauHasExactType,
            Modifier::none(),
            tau,
            dst,
            vec![src],
            Payload::TypeOp(has),
        )
    }

    pub fn make_tau_check_cast(
        &mut self,
        dst: OpndId,
        src: OpndId,
        tau_non_null: OpndId,
        cast: Ty,
    ) -> InstId {
        let tau = self.tau_ty;
        self.make(
            Opcode::TauCheckCast,
            Modifier::none(),
            tau,
            dst,
            vec![src, tau_non_null],
            Payload::TypeOp(cast),
        )
    }

    pub fn make_tau_static_cast(
        &mut self,
        ty: Ty,
        dst: OpndId,
        src: OpndId,
        tau_checked_cast: OpndId,
        cast: Ty,
    ) -> InstId {
        self.make(
            Opcode::TauStaticCast,
            Modifier::none(),
            ty,
            dst,
            vec![src, tau_checked_cast],
            Payload::TypeOp(cast),
        )
    }

    pub fn make_tau_as_type(&mut self, ty: Ty, dst: OpndId, src: OpndId) -> InstId {
        self.make(
            Opcode::TauAsType,
            Modifier::none(),
            ty,
            dst,
            vec![src],
            Payload::TypeOp(ty),
        )
    }

    pub fn make_tau_instance_of(&mut self, ty: Ty, dst: OpndId, src: OpndId, of: Ty) -> InstId {
        self.make(
            Opcode::TauInstanceOf,
            Modifier::none(),
            ty,
            dst,
            vec![src],
            Payload::TypeOp(of),
        )
    }

    pub fn make_new_obj(&mut self, ty: Ty, dst: OpndId) -> InstId {
        self.make(Opcode::NewObj, Modifier::none(), ty, dst, Vec::new(), Payload::None)
    }

    pub fn make_new_array(&mut self, ty: Ty, dst: OpndId, num_elems: OpndId, elem_ty: Ty) -> InstId {
        self.make(
            Opcode::NewArray,
            Modifier::none(),
            ty,
            dst,
            vec![num_elems],
            Payload::TypeOp(elem_ty),
        )
    }

    pub fn make_new_multi_array(&mut self, ty: Ty, dst: OpndId, dims: Vec<OpndId>) -> InstId {
        self.make(Opcode::NewMultiArray, Modifier::none(), ty, dst, dims, Payload::None)
    }

    pub fn make_phi(&mut self, ty: Ty, dst: OpndId, srcs: Vec<OpndId>) -> InstId {
        self.make(Opcode::Phi, Modifier::none(), ty, dst, srcs, Payload::None)
    }

    pub fn make_tau_and(&mut self, dst: OpndId, srcs: Vec<OpndId>) -> InstId {
        let tau = self.tau_ty;
        self.make(Opcode::TauAnd, Modifier::none(), tau, dst, srcs, Payload::None)
    }

    /// Direct call; sources are the two tau witnesses followed by the
    /// arguments.
    pub fn make_direct_call(
        &mut self,
        ty: Ty,
        dst: OpndId,
        srcs: Vec<OpndId>,
        method: MethodId,
    ) -> InstId {
        self.make(Opcode::DirectCall, Modifier::none(), ty, dst, srcs, Payload::Method(method))
    }

    pub fn make_tau_virtual_call(
        &mut self,
        ty: Ty,
        dst: OpndId,
        srcs: Vec<OpndId>,
        method: MethodId,
    ) -> InstId {
        self.make(
            Opcode::TauVirtualCall,
            Modifier::none(),
            ty,
            dst,
            srcs,
            Payload::Method(method),
        )
    }

    /// Indirect call; sources are the callee address, the two tau
    /// witnesses, then the arguments.
    pub fn make_indirect_call(&mut self, ty: Ty, dst: OpndId, srcs: Vec<OpndId>) -> InstId {
        self.make(Opcode::IndirectCall, Modifier::none(), ty, dst, srcs, Payload::None)
    }

    pub fn make_indirect_memory_call(&mut self, ty: Ty, dst: OpndId, srcs: Vec<OpndId>) -> InstId {
        self.make(
            Opcode::IndirectMemoryCall,
            Modifier::none(),
            ty,
            dst,
            srcs,
            Payload::None,
        )
    }

    pub fn make_jit_helper_call(
        &mut self,
        ty: Ty,
        dst: OpndId,
        args: Vec<OpndId>,
        helper: JitHelperId,
    ) -> InstId {
        self.make(
            Opcode::JitHelperCall,
            Modifier::none(),
            ty,
            dst,
            args,
            Payload::JitHelper(helper),
        )
    }

    pub fn make_vm_helper_call(
        &mut self,
        ty: Ty,
        dst: OpndId,
        args: Vec<OpndId>,
        helper: VmHelperId,
    ) -> InstId {
        self.make(
            Opcode::VmHelperCall,
            Modifier::none(),
            ty,
            dst,
            args,
            Payload::VmHelper(helper),
        )
    }

    pub fn make_ld_field_offset(&mut self, ty: Ty, dst: OpndId, field: FieldId, plus_heapbase: bool) -> InstId {
        let op = if plus_heapbase {
            Opcode::LdFieldOffsetPlusHeapbase
        } else {
            Opcode::LdFieldOffset
        };
        self.make(op, Modifier::none(), ty, dst, Vec::new(), Payload::Field(field))
    }

    pub fn make_ld_array_base_offset(&mut self, ty: Ty, dst: OpndId, elem_ty: Ty, plus_heapbase: bool) -> InstId {
        let op = if plus_heapbase {
            Opcode::LdArrayBaseOffsetPlusHeapbase
        } else {
            Opcode::LdArrayBaseOffset
        };
        self.make(op, Modifier::none(), ty, dst, Vec::new(), Payload::TypeOp(elem_ty))
    }

    pub fn make_ld_array_len_offset(&mut self, ty: Ty, dst: OpndId, elem_ty: Ty, plus_heapbase: bool) -> InstId {
        let op = if plus_heapbase {
            Opcode::LdArrayLenOffsetPlusHeapbase
        } else {
            Opcode::LdArrayLenOffset
        };
        self.make(op, Modifier::none(), ty, dst, Vec::new(), Payload::TypeOp(elem_ty))
    }

    /// Deep copy with source renaming; the destination is duplicated into a
    /// fresh SSA temporary. Variable-arity source vectors are copied into
    /// fresh storage, so later mutation of the original cannot disturb the
    /// clone.
    pub fn clone_inst(&mut self, src: InstId, rename: &HashMap<OpndId, OpndId>) -> InstId {
        let original = self.arena.inst(src).clone();
        let srcs: Vec<OpndId> = original
            .srcs
            .iter()
            .map(|s| rename.get(s).copied().unwrap_or(*s))
            .collect();
        let dst = if original.dst.is_null() {
            OpndId::NULL
        } else if self.arena.opnd(original.dst).is_var() {
            // stores keep writing their variable; only SSA values split
            original.dst
        } else {
            let dst_ty = self.arena.opnd(original.dst).ty;
            self.create_ssa_tmp(dst_ty)
        };
        let id = self.make(
            original.op,
            original.modifier,
            original.ty,
            dst,
            srcs,
            original.payload,
        );
        self.arena.inst_mut(id).bc_offset = original.bc_offset;
        id
    }
}

/// Operand counts for the fixed-arity tags; `None` means flexible.
fn fixed_arity(op: Opcode) -> Option<usize> {
    use Opcode::*;
    Some(match op {
        Label | MethodEntryLabel | CatchLabel | DispatchLabel | LdConstant | LdRef | LdStatic
        | LdStaticAddr | LdFunAddr | LdFunAddrSlot | GetVTableAddr | GetClassObj
        | LdFieldOffset | LdFieldOffsetPlusHeapbase | LdArrayBaseOffset
        | LdArrayBaseOffsetPlusHeapbase | LdArrayLenOffset | LdArrayLenOffsetPlusHeapbase
        | NewObj | InitType | TypeMonitorEnter | TypeMonitorExit | ThrowSystemException
        | ThrowLinkingException | PseudoThrow | Catch | Jump | Jsr | SaveRet | DefArg
        | TauSafe | TauMethodSafe | TauUnsafe => 0,
        Neg | Abs | Not | Conv | ConvZE | ConvUnmanaged | Copy | LdVar | LdVarAddr | StVar
        | Throw | Ret | TauCheckNull | TauCheckZero | TauCheckFinite | TauIsNonNull
        | CompressRef | UncompressRef | NewArray | Switch | LdLockAddr | Prefetch
        | TauHasType | TauHasExactType | TauInstanceOf | TauAsType | MonitorEnterFence
        | MonitorExitFence | LdArrayBaseAddr | StStatic => 1,
        LdFieldAddr => 1,
        Add | Sub | Mul | MulHi | Min | Max | And | Or | Xor | Shl | Shr | Cmp | Cmp3
        | AddScaledIndex | AddOffset | AddOffsetPlusHeapbase | TauCheckDivOpnds
        | TauCheckBounds | MonitorEnter | MonitorExit | TauCheckCast | TauStaticCast
        | TauLdVTableAddr | TauLdVirtFunAddr | TauLdVirtFunAddrSlot | BalancedMonitorEnter
        | OptBalancedMonitorEnter | IncRecCount | TauPi | LdElemAddr => 2,
        TauDiv | TauRem | Select | Shladd | TauLdInd | TauLdField | TauArrayLen
        | BalancedMonitorExit | OptBalancedMonitorExit => 3,
        TauLdElem | TauCheckElemType => 4,
        TauStInd | TauStField => 5,
        TauStElem | TauStRef => 6,
        // branches take one or two sources, returns zero or one,
        // calls/phi/switch-likes are variadic
        Branch | Return | Phi | TauAnd | DirectCall | TauVirtualCall | IndirectCall
        | IndirectMemoryCall | JitHelperCall | VmHelperCall | NewMultiArray => return None,
    })
}

/// Positions within the source vector that must hold tau witnesses, with
/// every other position required to hold a plain value. `None` leaves the
/// tag unconstrained.
#[cfg(debug_assertions)]
fn tau_src_positions(op: Opcode, num_srcs: usize) -> Option<std::ops::Range<usize>> {
    use Opcode::*;
    Some(match op {
        TauDiv | TauRem => 2..3,
        TauLdInd | TauLdField | TauArrayLen => 1..3,
        TauLdElem => 2..4,
        TauStInd | TauStField => 2..5,
        TauStElem | TauStRef => 3..6,
        TauCheckElemType => 2..4,
        TauCheckCast | TauStaticCast | TauPi | TauLdVTableAddr | TauLdVirtFunAddr
        | TauLdVirtFunAddrSlot | MonitorEnter | MonitorExit => 1..2,
        TauAnd => 0..num_srcs,
        DirectCall | TauVirtualCall => 0..2,
        IndirectCall | IndirectMemoryCall => 1..3,
        // checks and witnesses over plain values only
        TauCheckNull | TauCheckZero | TauCheckDivOpnds | TauCheckBounds | TauCheckFinite
        | TauIsNonNull | TauHasType | TauHasExactType | TauInstanceOf | TauAsType => 0..0,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::TypeManager;

    #[test]
    fn void_results_share_the_sentinel() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        assert_eq!(f.create_ssa_tmp(tm.void_type()), OpndId::NULL);
        let a = f.create_ssa_tmp(tm.int32_type());
        let b = f.create_ssa_tmp(tm.int32_type());
        assert_ne!(a, b);
    }

    #[test]
    fn make_records_the_definition() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let i32t = tm.int32_type();
        let (inst, dst) = f.make_ld_const(i32t, ConstValue::I4(7));
        assert_eq!(f.arena().opnd(dst).def, Some(inst));
        assert_eq!(
            f.arena().inst(inst).const_value(),
            Some(&ConstValue::I4(7))
        );
    }

    #[test]
    fn labels_are_numbered() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let l0 = f.make_label();
        let l1 = f.make_label();
        assert_eq!(f.arena().inst(l0).label_id(), Some(LabelId(0)));
        assert_eq!(f.arena().inst(l1).label_id(), Some(LabelId(1)));
        assert_eq!(f.num_labels(), 2);
    }

    #[test]
    fn named_factories_build_their_opcode() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let i32t = tm.int32_type();
        let tau = tm.tau_type();
        let (_, a) = f.make_ld_const(i32t, ConstValue::I4(1));
        let (_, b) = f.make_ld_const(i32t, ConstValue::I4(2));

        let dst = f.create_ssa_tmp(i32t);
        let add = f.make_add(Modifier::arith(), i32t, dst, a, b);
        assert_eq!(f.arena().inst(add).op, Opcode::Add);
        assert_eq!(f.arena().inst(add).srcs, vec![a, b]);

        let t = f.create_ssa_tmp(tau);
        let check = f.make_tau_check_zero(Modifier::none(), tau, t, b);
        assert_eq!(f.arena().inst(check).op, Opcode::TauCheckZero);

        let q = f.create_ssa_tmp(i32t);
        let div = f.make_tau_div(Modifier::arith(), i32t, q, a, b, t);
        assert_eq!(f.arena().inst(div).op, Opcode::TauDiv);
        assert_eq!(f.arena().inst(div).src(2), t);

        let var = f.create_var(i32t, false);
        let st = f.make_st_var(var, q);
        assert_eq!(f.arena().inst(st).op, Opcode::StVar);
        assert_eq!(f.arena().inst(st).dst, var);

        let ret = f.make_return(Some(q));
        assert_eq!(f.arena().inst(ret).op, Opcode::Return);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "must be a tau witness")]
    fn tau_positions_are_type_checked() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let i32t = tm.int32_type();
        let (_, a) = f.make_ld_const(i32t, ConstValue::I4(1));
        let (_, b) = f.make_ld_const(i32t, ConstValue::I4(2));
        let dst = f.create_ssa_tmp(i32t);
        // the divisor check slot takes a tau witness, not an integer
        f.make_tau_div(Modifier::arith(), i32t, dst, a, b, b);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "must produce a tau witness")]
    fn checks_must_yield_tau_results() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let i32t = tm.int32_type();
        let (_, a) = f.make_ld_const(i32t, ConstValue::I4(1));
        let dst = f.create_ssa_tmp(i32t);
        f.make_tau_check_null(Modifier::none(), i32t, dst, a);
    }

    #[test]
    fn clone_renames_sources_and_refreshes_dst() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let i32t = tm.int32_type();
        let (_, a) = f.make_ld_const(i32t, ConstValue::I4(1));
        let (_, b) = f.make_ld_const(i32t, ConstValue::I4(2));
        let dst = f.create_ssa_tmp(i32t);
        let add = f.make_add(Modifier::arith(), i32t, dst, a, b);

        let (_, c) = f.make_ld_const(i32t, ConstValue::I4(3));
        let mut rename = HashMap::new();
        rename.insert(a, c);
        let cloned = f.clone_inst(add, &rename);

        let inst = f.arena().inst(cloned);
        assert_eq!(inst.srcs, vec![c, b]);
        assert_ne!(inst.dst, dst);
        assert_eq!(f.arena().opnd(inst.dst).def, Some(cloned));
        // the original is untouched
        assert_eq!(f.arena().inst(add).srcs, vec![a, b]);
    }
}
