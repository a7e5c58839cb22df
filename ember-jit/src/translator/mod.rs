//! Second pass: replay the prepass state at every offset and lower each
//! bytecode into IR through the builder, reconciling the modeled operand
//! stack with named variables at block boundaries.

mod arrayinit;
mod flowgraph;
mod magic;

pub use flowgraph::FlowGraphBuilder;

use ember_bytecode::{BytecodeVisitor, FlowInfo, Instr, Step};
use ember_ir::{CmpOp, DefArgOp, InstId, Modifier, Opcode, OpndId, SignedOp, StrictOp, ThrowOp};
use ember_types::{StackKind, Ty, TypeManager};
use hashbrown::HashMap;
use tracing::debug;

use crate::builder::IrBuilder;
use crate::config::TranslatorFlags;
use crate::error::{CompileError, Result};
use crate::prepass::{ExcRef, PrepassResult, SlotVar, StateInfo};
use crate::runtime::{
    num_args_by_signature, ret_type_by_signature, CompilationInterface, ConstLiteral, MethodDesc,
    MethodRef,
};

/// Raw opcode bytes recorded in linkage-error payloads.
mod bc_op {
    use ember_bytecode::RawOpcode;

    pub const GETSTATIC: u8 = RawOpcode::GetStatic as u8;
    pub const PUTSTATIC: u8 = RawOpcode::PutStatic as u8;
    pub const GETFIELD: u8 = RawOpcode::GetField as u8;
    pub const PUTFIELD: u8 = RawOpcode::PutField as u8;
    pub const INVOKEVIRTUAL: u8 = RawOpcode::InvokeVirtual as u8;
    pub const INVOKESPECIAL: u8 = RawOpcode::InvokeSpecial as u8;
    pub const INVOKESTATIC: u8 = RawOpcode::InvokeStatic as u8;
    pub const INVOKEINTERFACE: u8 = RawOpcode::InvokeInterface as u8;
    pub const NEW: u8 = RawOpcode::New as u8;
    pub const ANEWARRAY: u8 = RawOpcode::ANewArray as u8;
    pub const CHECKCAST: u8 = RawOpcode::CheckCast as u8;
    pub const INSTANCEOF: u8 = RawOpcode::InstanceOf as u8;
    pub const MULTIANEWARRAY: u8 = RawOpcode::MultiANewArray as u8;
}

/// The byte-code translator for one method.
pub struct Translator<'a> {
    tm: &'a mut TypeManager,
    ci: &'a mut dyn CompilationInterface,
    method: &'a MethodDesc,
    flags: TranslatorFlags,
    pub builder: IrBuilder,
    pub cfg: FlowGraphBuilder,
    pub pre: PrepassResult,

    state: StateInfo,
    opnd_stack: Vec<OpndId>,
    labels: Vec<InstId>,
    next_label: usize,
    last_instruction_was_a_branch: bool,
    current_offset: u32,
    num_vars: u32,

    // method-level synchronization state for balanced lowering
    lock_addr: Option<OpndId>,
    old_lock_value: Option<OpndId>,

    ret_offsets: HashMap<u32, InstId>,
    jsr_entry_offsets: HashMap<u32, InstId>,
    /// `(subroutine entry store, ret)` pairs for the later JSR conversion.
    pub jsr_entry_map: Vec<(InstId, InstId)>,
}

impl<'a> Translator<'a> {
    pub fn new(
        tm: &'a mut TypeManager,
        ci: &'a mut dyn CompilationInterface,
        method: &'a MethodDesc,
        flags: TranslatorFlags,
        mut builder: IrBuilder,
        mut pre: PrepassResult,
    ) -> Self {
        let num_vars = pre.num_vars();
        let mut cfg = FlowGraphBuilder::new();

        // prolog block
        let entry = builder.gen_method_entry_label(method.id);
        cfg.gen_block(entry, &mut builder.factory);

        pre.create_multiple_def_var_opnds(&mut builder.factory);

        let mut labels = builder.create_labels(pre.num_labels());
        labels.push(builder.factory.make_label()); // spare terminal label

        let max_depth = pre.max_stack_depth().max(num_vars) + 1;
        let mut translator = Self {
            state: StateInfo::with_capacity(max_depth as usize),
            opnd_stack: Vec::with_capacity(method.max_stack as usize + 1),
            labels,
            next_label: 0,
            last_instruction_was_a_branch: false,
            current_offset: 0,
            num_vars,
            lock_addr: None,
            old_lock_value: None,
            ret_offsets: HashMap::new(),
            jsr_entry_offsets: HashMap::new(),
            jsr_entry_map: Vec::new(),
            tm,
            ci,
            method,
            flags,
            builder,
            cfg,
            pre,
        };
        translator.state.stack_depth = num_vars;
        translator.init_args();
        if translator.method.is_synchronized {
            translator.gen_sync_prologue();
        }
        if let Some(token) = translator.pre.problem_type_token() {
            // a poisoned handler table replaces the whole body
            translator.linking_exception(token, bc_op::CHECKCAST);
        }
        translator
    }

    fn init_args(&mut self) {
        let mut j = 0u32;
        for i in 0..self.method.num_params() {
            let declared = self.method.param_tys[i as usize];
            let mut ty = declared.unwrap_or_else(|| self.tm.null_object_type());
            if let Some(converted) = magic::convert_vm_magic_type(self.tm, ty) {
                ty = converted;
            }
            let defarg = if i == 0 && !self.method.is_static {
                DefArgOp::NonNullThis
            } else {
                DefArgOp::None
            };
            let arg = self.builder.gen_arg_def(defarg, ty);
            let kind = self.tm.stack_kind(ty).unwrap_or(StackKind::Ref);
            if let Some(var) = self.get_var_opnd_st_var(j, arg) {
                self.builder.gen_st_var(var, arg);
            }
            if let Some(inc) = self.pre.get_var_inc(0, j) {
                self.state.stack[j as usize].vars = Some(SlotVar::new(inc));
            }
            j += if kind.is_category2() { 2 } else { 1 };
        }
    }

    fn gen_sync_prologue(&mut self) {
        if self.method.is_static {
            let cls = self
                .builder
                .gen_get_class_obj(self.tm, self.method.parent_ty);
            self.push(cls);
        } else {
            self.gen_ld_var_op(0);
        }
        self.gen_method_monitor_enter();
    }

    //
    // operand stack
    //

    fn push(&mut self, opnd: OpndId) {
        debug_assert!(!opnd.is_null());
        self.opnd_stack.push(opnd);
    }

    fn top(&mut self) -> Result<OpndId> {
        self.opnd_stack
            .last()
            .copied()
            .ok_or(CompileError::StackUnderflow {
                offset: self.current_offset,
            })
    }

    fn pop(&mut self) -> Result<OpndId> {
        self.opnd_stack.pop().ok_or(CompileError::StackUnderflow {
            offset: self.current_offset,
        })
    }

    fn pop_args(&mut self, n: u32) -> Result<Vec<OpndId>> {
        let mut args = vec![OpndId::NULL; n as usize];
        for i in (0..n as usize).rev() {
            args[i] = self.pop()?;
        }
        Ok(args)
    }

    fn is_category2(&self, opnd: OpndId) -> bool {
        let ty = self.builder.opnd_ty(opnd);
        matches!(self.tm.stack_kind(ty), Some(k) if k.is_category2())
    }

    /// Spill every live stack value into its slot variable at the end of a
    /// block; a value that is already the load of the same variable needs
    /// no store.
    fn check_stack(&mut self) -> Result<()> {
        for i in (0..self.opnd_stack.len()).rev() {
            let opnd = self.opnd_stack.pop().expect("counted");
            let index = self.num_vars + i as u32;
            if let Some(var) = self.get_var_opnd_st_var(index, opnd) {
                let trivial = matches!(
                    self.builder.def_of(opnd),
                    Some(inst) if inst.op == Opcode::LdVar && inst.src(0) == var
                );
                if !trivial {
                    self.builder.gen_st_var(var, opnd);
                }
            }
        }
        Ok(())
    }

    //
    // locals
    //

    fn get_var_opnd_ld_var(&mut self, index: u32) -> Result<OpndId> {
        let slot = self
            .state
            .stack
            .get(index as usize)
            .ok_or(CompileError::InvalidLocal {
                index,
                offset: self.current_offset,
            })?;
        let vars = slot.vars.as_ref().ok_or(CompileError::InvalidLocal {
            index,
            offset: self.current_offset,
        })?;
        let primary = vars.primary();
        Ok(self
            .pre
            .incs
            .get_or_create_opnd(primary, &mut self.builder.factory))
    }

    /// Variable to store into at `(current offset, index)`, or `None` when
    /// the single-definition value itself serves as the slot's content.
    fn get_var_opnd_st_var(&mut self, index: u32, opnd: OpndId) -> Option<OpndId> {
        let inc = self.pre.get_var_inc(self.current_offset, index)?;
        self.state.stack[index as usize].vars = Some(SlotVar::new(inc));
        match self.pre.incs.opnd(inc) {
            Some(var) if self.builder.factory.arena().opnd(var).is_var() => Some(var),
            Some(_) => None,
            None => {
                let ty = self.builder.opnd_ty(opnd);
                let internal = self.tm.to_internal_type(ty);
                self.state.stack[index as usize].ty = Some(internal);
                self.pre.incs.set_tmp_opnd(inc, opnd);
                None
            }
        }
    }

    fn gen_ld_var_op(&mut self, index: u32) {
        let var = match self.get_var_opnd_ld_var(index) {
            Ok(v) => v,
            Err(_) => return,
        };
        let opnd = if self.builder.factory.arena().opnd(var).is_var() {
            let ty = self.builder.opnd_ty(var);
            self.builder.gen_ld_var(ty, var)
        } else {
            var
        };
        self.push(opnd);
    }

    fn gen_st_var_op(&mut self, index: u32) -> Result<()> {
        let src = self.pop()?;
        if let Some(var) = self.get_var_opnd_st_var(index, src) {
            self.builder.gen_st_var(var, src);
        }
        Ok(())
    }

    //
    // labels and block boundaries
    //

    fn label_inst(&self, offset: u32) -> Result<InstId> {
        let id = self.pre.label_id(offset)?;
        Ok(self.labels[id as usize])
    }

    fn take_next_label(&mut self) -> InstId {
        let label = self.labels[self.next_label];
        self.next_label += 1;
        label
    }

    /// Block-boundary work on reaching a label offset: close the previous
    /// block, restore the recorded entry state, open the new block (catch
    /// labels included) and reload live stack slots.
    fn on_offset(&mut self, pc: u32) -> Result<()> {
        self.builder.set_bc_offset(pc);
        self.current_offset = pc;
        if !self.pre.is_label(pc) {
            return Ok(());
        }
        if !self.pre.code_visited.get(pc as usize) {
            // dead code: burn its label id and let the parser sweep on
            self.next_label += 1;
            return Ok(());
        }

        if !self.last_instruction_was_a_branch {
            self.check_stack()?;
        }
        self.last_instruction_was_a_branch = false;

        let recorded = self
            .pre
            .state_table
            .get(pc)
            .ok_or(CompileError::MissingLabel { offset: pc })?;
        self.state.flags = recorded.flags;
        self.state.stack_depth = recorded.stack_depth;
        self.state.exceptions = recorded.exceptions.clone();
        for i in 0..recorded.stack_depth as usize {
            self.state.stack[i] = recorded.stack[i].clone();
        }

        let label_inst = self.take_next_label();
        let mut catch_labels: Vec<InstId> = Vec::new();
        let mut handler_exception_ty: Option<Ty> = None;
        let mut region = None;

        let exceptions = self.state.exceptions.clone();
        for exc in &exceptions {
            match *exc {
                ExcRef::Block(b) => {
                    if self.pre.regions.block(b).dispatch_label.is_none() {
                        let (_, dl) = self.cfg.create_dispatch_node(&mut self.builder.factory);
                        self.pre.regions.block_mut(b).dispatch_label = Some(dl);
                    }
                    let covers = self.pre.regions.block(b).has_offset(pc);
                    if covers {
                        region = match region {
                            None => Some(b),
                            Some(prev) => {
                                // keep the innermost covering region
                                let (pb, nb) =
                                    (self.pre.regions.block(prev), self.pre.regions.block(b));
                                if nb.end - nb.begin < pb.end - pb.begin {
                                    Some(b)
                                } else {
                                    Some(prev)
                                }
                            }
                        };
                    }
                }
                ExcRef::Handler(h) => {
                    let (order, exc_ty) = {
                        let handler = self.pre.regions.handler(h);
                        (handler.order, handler.exception_ty)
                    };
                    handler_exception_ty = Some(match handler_exception_ty {
                        None => exc_ty,
                        Some(prev) => self
                            .tm
                            .common_type(prev, exc_ty)
                            .unwrap_or_else(|| self.tm.system_object_type()),
                    });
                    let catch_label = self.builder.factory.make_catch_label(order, exc_ty);
                    self.pre.regions.handler_mut(h).label = Some(catch_label);
                    catch_labels.push(catch_label);
                }
            }
        }

        let is_catch_handler = !catch_labels.is_empty();
        if is_catch_handler {
            for catch_label in catch_labels {
                self.builder.gen_label(catch_label);
                let node = self.cfg.gen_block(catch_label, &mut self.builder.factory);
                if let Some(r) = region {
                    self.cfg.set_block_region(node, r);
                }
            }
            self.builder.gen_label(label_inst);
            let node = self.cfg.gen_block(label_inst, &mut self.builder.factory);
            if let Some(r) = region {
                self.cfg.set_block_region(node, r);
            }
        } else {
            if self.state.is_fall_through_label() {
                self.builder.gen_fall_through_label(label_inst);
            } else {
                self.builder.gen_label(label_inst);
                self.opnd_stack.clear();
            }
            let node = self.cfg.gen_block(label_inst, &mut self.builder.factory);
            if let Some(r) = region {
                self.cfg.set_block_region(node, r);
            }
        }

        if is_catch_handler {
            debug_assert!(self.state.is_catch_label());
            debug_assert_eq!(self.state.stack_depth, self.num_vars + 1);
            let exc_ty = self.state.stack[self.num_vars as usize]
                .ty
                .or(handler_exception_ty)
                .unwrap_or_else(|| self.tm.system_object_type());
            let caught = self.builder.gen_catch(exc_ty);
            self.push(caught);
        } else {
            for k in self.num_vars..self.state.stack_depth {
                self.gen_ld_var_op(k);
            }
        }
        if self.state.is_subroutine_entry() {
            let ret = self.builder.gen_save_ret();
            self.push(ret);
        }
        // the modeled stack and the recorded entry depth must agree
        debug_assert_eq!(
            self.opnd_stack.len() as u32 + self.num_vars,
            self.state.stack_depth + u32::from(self.state.is_subroutine_entry()),
        );
        Ok(())
    }

    /// Open a fresh fall-through block mid-expansion.
    fn new_fallthrough_block(&mut self) {
        let label = self.builder.create_label();
        self.builder.gen_fall_through_label(label);
        self.cfg
            .gen_block_after_current(label, &mut self.builder.factory);
    }

    //
    // shared op shapes
    //

    fn arith_mod(&self) -> Modifier {
        Modifier::arith()
    }

    fn fp_mod(&self) -> Modifier {
        if self.method.is_strict {
            Modifier::arith().with_strict(StrictOp::Strict)
        } else {
            Modifier::arith()
        }
    }

    fn gen_add_op(&mut self, ty: Ty, m: Modifier) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let r = self.builder.gen_add(ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_sub_op(&mut self, ty: Ty, m: Modifier) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let r = self.builder.gen_sub(ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_mul_op(&mut self, ty: Ty, m: Modifier) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let r = self.builder.gen_mul(ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_div_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let m = Modifier::arith().with_signed(SignedOp::Signed);
        let r = self.builder.gen_div(self.tm, ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_rem_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let m = Modifier::arith().with_signed(SignedOp::Signed);
        let r = self.builder.gen_rem(self.tm, ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_fp_div_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let m = self.fp_mod();
        let r = self.builder.gen_div(self.tm, ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_fp_rem_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let m = self.fp_mod();
        let r = self.builder.gen_rem(self.tm, ty, m, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_neg_op(&mut self, ty: Ty) -> Result<()> {
        let src = self.pop()?;
        let r = self.builder.gen_neg(ty, src);
        self.push(r);
        Ok(())
    }

    fn gen_and_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let r = self.builder.gen_and(ty, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_or_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let r = self.builder.gen_or(ty, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_xor_op(&mut self, ty: Ty) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let r = self.builder.gen_xor(ty, src1, src2);
        self.push(r);
        Ok(())
    }

    fn gen_shl_op(&mut self, ty: Ty) -> Result<()> {
        let amount = self.pop()?;
        let value = self.pop()?;
        let m = Modifier::arith(); // shift counts are masked by default
        let r = self.builder.gen_shl(ty, m, value, amount);
        self.push(r);
        Ok(())
    }

    fn gen_shr_op(&mut self, ty: Ty, signed: SignedOp) -> Result<()> {
        let amount = self.pop()?;
        let value = self.pop()?;
        let m = Modifier::arith().with_signed(signed);
        let r = self.builder.gen_shr(ty, m, value, amount);
        self.push(r);
        Ok(())
    }

    fn gen_conv_op(&mut self, to: Ty) -> Result<()> {
        let src = self.pop()?;
        let r = self.builder.gen_conv(to, self.arith_mod(), src);
        self.push(r);
        Ok(())
    }

    /// Truncating int conversion: narrow, then widen back to the stack
    /// type.
    fn gen_trunc_op(&mut self, narrow: Ty) -> Result<()> {
        let src = self.pop()?;
        let m = self.arith_mod();
        let narrowed = self.builder.gen_conv(narrow, m, src);
        let i32t = self.builder.types.i32;
        let r = self.builder.gen_conv(i32t, m, narrowed);
        self.push(r);
        Ok(())
    }

    /// `1` if greater, `-1` if lesser (or unordered per `cmp`), else `0`.
    fn gen_three_way_cmp(&mut self, cmp: CmpOp, negate_of_swap: bool) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        let i32t = self.builder.types.i32;
        let r = if negate_of_swap {
            // x cmpl y == -(y cmpg x): routes NaN to the negative side
            let swapped = self.builder.gen_cmp3(i32t, cmp, src2, src1);
            self.builder.gen_neg(i32t, swapped)
        } else {
            self.builder.gen_cmp3(i32t, cmp, src1, src2)
        };
        self.push(r);
        Ok(())
    }

    //
    // branches
    //

    fn branch_prologue(&mut self, target: u32, next: u32) -> Result<bool> {
        if target == next {
            return Ok(false);
        }
        if target < next {
            self.builder.gen_pseudo_throw();
        }
        self.last_instruction_was_a_branch = true;
        self.check_stack()?;
        Ok(true)
    }

    fn gen_if_zero(&mut self, cmp: CmpOp, target: u32, next: u32) -> Result<()> {
        let src = self.pop()?;
        if !self.branch_prologue(target, next)? {
            return Ok(());
        }
        let label = self.label_inst(target)?;
        self.builder.gen_branch1(cmp, label, src);
        Ok(())
    }

    fn gen_if_rel_zero(&mut self, cmp: CmpOp, commute: bool, target: u32, next: u32) -> Result<()> {
        let src = self.pop()?;
        if !self.branch_prologue(target, next)? {
            return Ok(());
        }
        let zero = self.builder.gen_ld_constant_i4(0);
        let label = self.label_inst(target)?;
        if commute {
            self.builder.gen_branch2(cmp, label, zero, src);
        } else {
            self.builder.gen_branch2(cmp, label, src, zero);
        }
        Ok(())
    }

    fn gen_if2(&mut self, cmp: CmpOp, commute: bool, target: u32, next: u32) -> Result<()> {
        let src2 = self.pop()?;
        let src1 = self.pop()?;
        if !self.branch_prologue(target, next)? {
            return Ok(());
        }
        let label = self.label_inst(target)?;
        if commute {
            self.builder.gen_branch2(cmp, label, src2, src1);
        } else {
            self.builder.gen_branch2(cmp, label, src1, src2);
        }
        Ok(())
    }

    fn gen_goto(&mut self, target: u32, next: u32) -> Result<()> {
        if !self.branch_prologue(target, next)? {
            return Ok(());
        }
        let label = self.label_inst(target)?;
        self.builder.gen_jump(label);
        Ok(())
    }

    //
    // returns & synchronization epilogues
    //

    fn gen_method_monitor_enter(&mut self) {
        if self.flags.ignore_sync {
            let _ = self.pop();
            return;
        }
        if self.flags.sync_as_enter_fence {
            if let Ok(obj) = self.pop() {
                self.builder.gen_monitor_enter_fence(obj);
            }
            return;
        }
        if !self.flags.balanced_sync {
            if let Ok(obj) = self.pop() {
                self.builder.gen_monitor_enter(obj);
            }
            return;
        }
        debug_assert!(self.lock_addr.is_none() && self.old_lock_value.is_none());
        if let Ok(obj) = self.pop() {
            let lock_addr = self.builder.gen_ld_lock_addr(self.tm, obj);
            let old = self.builder.gen_balanced_monitor_enter(obj, lock_addr);
            self.lock_addr = Some(lock_addr);
            self.old_lock_value = Some(old);
        }
    }

    fn gen_method_monitor_exit(&mut self) {
        if self.flags.ignore_sync || self.flags.sync_as_enter_fence {
            let _ = self.pop();
            return;
        }
        if !self.flags.balanced_sync {
            if let Ok(obj) = self.pop() {
                self.builder.gen_monitor_exit(obj);
            }
            return;
        }
        let (lock_addr, old) = (
            self.lock_addr.expect("balanced enter first"),
            self.old_lock_value.expect("balanced enter first"),
        );
        if let Ok(obj) = self.pop() {
            self.builder.gen_balanced_monitor_exit(obj, lock_addr, old);
        }
    }

    fn gen_sync_epilogue(&mut self) {
        // fresh block so the monitor-exit's exception edge stays separate
        // from the method body
        let label = self.builder.create_label();
        self.cfg
            .gen_block_after_current(label, &mut self.builder.factory);
        if self.method.is_static {
            let cls = self
                .builder
                .gen_get_class_obj(self.tm, self.method.parent_ty);
            self.push(cls);
        } else {
            self.gen_ld_var_op(0);
        }
        self.gen_method_monitor_exit();
    }

    fn gen_return_value(&mut self) -> Result<()> {
        let ret = self.pop()?;
        if self.method.is_synchronized {
            self.gen_sync_epilogue();
        }
        self.builder.gen_return(ret);
        self.opnd_stack.clear();
        self.open_after_return_block();
        Ok(())
    }

    fn gen_return_void_op(&mut self) {
        if self.method.is_synchronized {
            self.gen_sync_epilogue();
        }
        self.builder.gen_return_void();
        self.opnd_stack.clear();
        self.open_after_return_block();
    }

    fn open_after_return_block(&mut self) {
        // nothing follows a transfer that ends the method body
        if self.current_offset as usize + 1 >= self.method.code.len() {
            return;
        }
        let label = self.builder.create_label();
        self.cfg
            .gen_block_after_current(label, &mut self.builder.factory);
    }

    //
    // constant pool
    //

    fn linking_exception(&mut self, cp_index: u32, operation: u8) {
        self.builder.gen_throw_linking_exception(cp_index, operation);
    }

    fn ldc(&mut self, cp_index: u32) -> Result<()> {
        let value = self.ci.get_constant_value(cp_index);
        let r = match value {
            Some(ConstLiteral::I4(v)) => self.builder.gen_ld_constant_i4(v),
            Some(ConstLiteral::I8(v)) => self.builder.gen_ld_constant_i8(v),
            Some(ConstLiteral::Single(v)) => self.builder.gen_ld_constant_single(v),
            Some(ConstLiteral::Double(v)) => self.builder.gen_ld_constant_double(v),
            Some(ConstLiteral::String { token }) => {
                let ty = self.tm.system_string_type();
                self.builder.gen_ld_ref(ty, token)
            }
            Some(ConstLiteral::Class { token }) => {
                let ty = self.tm.system_class_type();
                self.builder.gen_ld_ref(ty, token)
            }
            None => {
                return Err(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })
            }
        };
        self.push(r);
        Ok(())
    }

    fn field_ty_or_unresolved(&mut self, cp_index: u32) -> Ty {
        self.ci
            .get_field_type(self.tm, cp_index)
            .unwrap_or_else(|| self.tm.unresolved_object_type())
    }

    fn getstatic(&mut self, cp_index: u32) -> Result<()> {
        let field = self
            .ci
            .get_static_field(self.tm, cp_index, false)
            .filter(|f| f.is_static);
        let r = match field {
            Some(f) => self
                .builder
                .gen_ld_static(self.tm, f.ty, f, self.method.parent_ty),
            None => {
                if !self.tm.is_lazy_resolution_mode() {
                    self.linking_exception(cp_index, bc_op::GETSTATIC);
                }
                let ty = self.field_ty_or_unresolved(cp_index);
                self.builder
                    .gen_ld_static_with_resolve(self.tm, ty, self.method.parent_ty, cp_index)
            }
        };
        self.push(r);
        Ok(())
    }

    fn putstatic(&mut self, cp_index: u32) -> Result<()> {
        let src = self.pop()?;
        let field = self
            .ci
            .get_static_field(self.tm, cp_index, true)
            .filter(|f| f.is_static);
        match field {
            Some(f) => {
                self.builder
                    .gen_st_static(self.tm, f.ty, f, src, self.method.parent_ty);
            }
            None => {
                if !self.tm.is_lazy_resolution_mode() {
                    self.linking_exception(cp_index, bc_op::PUTSTATIC);
                }
                let ty = self.field_ty_or_unresolved(cp_index);
                self.builder.gen_st_static_with_resolve(
                    self.tm,
                    ty,
                    self.method.parent_ty,
                    cp_index,
                    src,
                );
            }
        }
        Ok(())
    }

    fn getfield(&mut self, cp_index: u32) -> Result<()> {
        let base = self.pop()?;
        let field = self
            .ci
            .get_nonstatic_field(self.tm, cp_index, false)
            .filter(|f| !f.is_static);
        let r = match field {
            Some(f) => self.builder.gen_ld_field(self.tm, f.ty, base, f),
            None => {
                if !self.tm.is_lazy_resolution_mode() {
                    self.linking_exception(cp_index, bc_op::GETFIELD);
                }
                let ty = self.field_ty_or_unresolved(cp_index);
                self.builder.gen_ld_field_with_resolve(
                    self.tm,
                    ty,
                    base,
                    self.method.parent_ty,
                    cp_index,
                )
            }
        };
        self.push(r);
        Ok(())
    }

    fn putfield(&mut self, cp_index: u32) -> Result<()> {
        let src = self.pop()?;
        let base = self.pop()?;
        let field = self
            .ci
            .get_nonstatic_field(self.tm, cp_index, true)
            .filter(|f| !f.is_static);
        match field {
            Some(f) => {
                self.builder.gen_st_field(self.tm, f.ty, base, f, src);
            }
            None => {
                if !self.tm.is_lazy_resolution_mode() {
                    self.linking_exception(cp_index, bc_op::PUTFIELD);
                }
                let ty = self.field_ty_or_unresolved(cp_index);
                self.builder.gen_st_field_with_resolve(
                    self.tm,
                    ty,
                    base,
                    self.method.parent_ty,
                    cp_index,
                    src,
                );
            }
        }
        Ok(())
    }

    //
    // array access
    //

    fn gen_array_load(&mut self, elem_ty: Ty) -> Result<()> {
        let index = self.pop()?;
        let array = self.pop()?;
        let r = self.builder.gen_ld_elem(self.tm, elem_ty, array, index);
        self.push(r);
        Ok(())
    }

    fn gen_type_array_load(&mut self) -> Result<()> {
        let index = self.pop()?;
        let array = self.pop()?;
        let array_ty = self.builder.opnd_ty(array);
        let elem_ty = self
            .tm
            .array_elem(array_ty)
            .unwrap_or_else(|| self.tm.system_object_type());
        let r = self.builder.gen_ld_elem(self.tm, elem_ty, array, index);
        self.push(r);
        Ok(())
    }

    fn gen_array_store(&mut self, elem_ty: Ty) -> Result<()> {
        let src = self.pop()?;
        let index = self.pop()?;
        let array = self.pop()?;
        self.builder.gen_st_elem(self.tm, elem_ty, array, index, src);
        Ok(())
    }

    fn gen_type_array_store(&mut self) -> Result<()> {
        let src = self.pop()?;
        let index = self.pop()?;
        let array = self.pop()?;
        let array_ty = self.builder.opnd_ty(array);
        let elem_ty = self
            .tm
            .array_elem(array_ty)
            .unwrap_or_else(|| self.tm.system_object_type());
        self.builder.gen_st_elem(self.tm, elem_ty, array, index, src);
        Ok(())
    }

    //
    // calls
    //

    fn push_result(&mut self, ret_ty: Ty, dst: OpndId) {
        if ret_ty != self.builder.types.void {
            self.push(dst);
        }
    }

    fn resolved_ret_ty(&mut self, m: &MethodRef, cp_index: u32) -> Ty {
        match m.ret_ty {
            Some(t) => t,
            None => {
                // resolvable later inside the callee; model as null object
                let sig = self.ci.get_signature_string(cp_index);
                ret_type_by_signature(self.tm, &sig)
                    .unwrap_or_else(|| self.tm.null_object_type())
            }
        }
    }

    fn invokevirtual(&mut self, cp_index: u32) -> Result<()> {
        let resolved = self.ci.get_virtual_method(self.tm, cp_index);
        let mut m = match resolved {
            Some(m) => m,
            None => return self.gen_call_with_resolve(bc_op::INVOKEVIRTUAL, cp_index),
        };
        let args = self.pop_args(m.num_params)?;
        if magic::is_vm_magic_class(&m.class_name) {
            let ret = m.ret_ty.unwrap_or(self.builder.types.void);
            let name = m.name.clone();
            return self.gen_vm_magic(&name, &args, ret);
        }
        let tau_null = self.builder.gen_tau_check_null(args[0]);
        // refine through the receiver's known type when possible
        let this_ty = self.builder.opnd_ty(args[0]);
        if m.parent_ty != this_ty
            && !self.tm.is_null_object(this_ty)
            && !self.tm.is_unresolved(this_ty)
            && !self.tm.is_interface(this_ty)
        {
            if let Some(overriding) = self.ci.get_overriding_method(self.tm, this_ty, &m) {
                m = overriding;
            }
        }
        let ret_ty = self.resolved_ret_ty(&m, cp_index);
        let dst = self
            .builder
            .gen_tau_virtual_call(self.tm, &m, ret_ty, Some(tau_null), None, &args);
        self.push_result(ret_ty, dst);
        Ok(())
    }

    fn invokespecial(&mut self, cp_index: u32) -> Result<()> {
        let m = match self.ci.get_special_method(self.tm, cp_index) {
            Some(m) => m,
            None => return self.gen_call_with_resolve(bc_op::INVOKESPECIAL, cp_index),
        };
        let args = self.pop_args(m.num_params)?;
        let tau_null = self.builder.gen_tau_check_null(args[0]);
        let ret_ty = m.ret_ty.unwrap_or_else(|| self.tm.null_object_type());
        let dst = self
            .builder
            .gen_direct_call(self.tm, &m, ret_ty, Some(tau_null), None, &args);
        self.push_result(ret_ty, dst);
        Ok(())
    }

    fn invokestatic(&mut self, cp_index: u32) -> Result<()> {
        let m = match self.ci.get_static_method(self.tm, cp_index) {
            Some(m) => m,
            None => return self.gen_call_with_resolve(bc_op::INVOKESTATIC, cp_index),
        };
        let args = self.pop_args(m.num_params)?;
        let ret_ty = m.ret_ty.unwrap_or_else(|| self.tm.null_object_type());
        if self.flags.gen_min_max_abs && self.gen_min_max(&m, &args)? {
            return Ok(());
        }
        self.gen_invoke_static(&m, args, ret_ty)
    }

    fn gen_invoke_static(
        &mut self,
        m: &MethodRef,
        args: Vec<OpndId>,
        ret_ty: Ty,
    ) -> Result<()> {
        if magic::is_vm_magic_class(&m.class_name) {
            let name = m.name.clone();
            return self.gen_vm_magic(&name, &args, ret_ty);
        }
        if magic::is_vm_helper_class(&m.class_name) && !m.is_native {
            let name = m.name.clone();
            if self.gen_vm_helper(&name, &args, ret_ty)? {
                return Ok(());
            }
        }
        let tau_null = self.builder.gen_tau_safe();
        let mut ret_ty = ret_ty;
        if let Some(converted) = magic::convert_vm_magic_type(self.tm, ret_ty) {
            ret_ty = converted;
        }
        let dst = self
            .builder
            .gen_direct_call(self.tm, m, ret_ty, Some(tau_null), None, &args);
        self.push_result(ret_ty, dst);
        Ok(())
    }

    fn invokeinterface(&mut self, cp_index: u32) -> Result<()> {
        let m = match self.ci.get_interface_method(self.tm, cp_index) {
            Some(m) => m,
            None => return self.gen_call_with_resolve(bc_op::INVOKEINTERFACE, cp_index),
        };
        let args = self.pop_args(m.num_params)?;
        let tau_null = self.builder.gen_tau_check_null(args[0]);
        let ret_ty = self.resolved_ret_ty(&m, cp_index);
        let dst = self
            .builder
            .gen_tau_virtual_call(self.tm, &m, ret_ty, Some(tau_null), None, &args);
        self.push_result(ret_ty, dst);
        Ok(())
    }

    /// Unresolved call site: in a non-lazy session, throw; in any case
    /// lower to a resolve-and-dispatch helper so a lazily-resolving run
    /// still executes.
    fn gen_call_with_resolve(&mut self, bc: u8, cp_index: u32) -> Result<()> {
        if !self.tm.is_lazy_resolution_mode() {
            self.linking_exception(cp_index, bc);
        }
        let is_static = bc == bc_op::INVOKESTATIC;
        let sig = self.ci.get_signature_string(cp_index);
        let num_args = num_args_by_signature(&sig) + u32::from(!is_static);
        let args = self.pop_args(num_args)?;
        let ret_ty = ret_type_by_signature(self.tm, &sig)
            .unwrap_or_else(|| self.tm.unresolved_object_type());
        let tau_null = if is_static {
            self.builder.gen_tau_safe()
        } else {
            self.builder.gen_tau_check_null(args[0])
        };
        let dst = self.builder.gen_indirect_call_with_resolve(
            self.tm,
            ret_ty,
            Some(tau_null),
            None,
            &args,
            self.method.parent_ty,
            self.method.parent_class,
            bc,
            cp_index,
        );
        self.push_result(ret_ty, dst);
        Ok(())
    }

    /// `java/lang/Math` min/max/abs inline to dedicated sequences.
    fn gen_min_max(&mut self, m: &MethodRef, args: &[OpndId]) -> Result<bool> {
        if m.class_name != "java/lang/Math" {
            return Ok(false);
        }
        match (m.name.as_str(), args.len()) {
            ("min", 2) => {
                let ty = self.builder.opnd_ty(args[0]);
                let r = self.builder.gen_min(self.tm, ty, args[0], args[1]);
                self.push(r);
                Ok(true)
            }
            ("max", 2) => {
                let ty = self.builder.opnd_ty(args[0]);
                let r = self.builder.gen_max(self.tm, ty, args[0], args[1]);
                self.push(r);
                Ok(true)
            }
            ("abs", 1) => {
                let ty = self.builder.opnd_ty(args[0]);
                let r = self.builder.gen_abs(self.tm, ty, args[0]);
                self.push(r);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    //
    // allocation and type tests
    //

    fn new_obj(&mut self, cp_index: u32) -> Result<()> {
        let ty = self.ci.get_named_type(self.tm, cp_index, true);
        let r = if self.tm.is_unresolved(ty) {
            if !self.tm.is_lazy_resolution_mode() {
                self.linking_exception(cp_index, bc_op::NEW);
            }
            self.builder
                .gen_new_obj_with_resolve(self.tm, self.method.parent_ty, cp_index)
        } else {
            self.builder.gen_new_obj(ty)
        };
        self.push(r);
        Ok(())
    }

    fn new_array(&mut self, elem_code: u8, pc: u32, code: &[u8]) -> Result<Step> {
        let elem_ty = match elem_code {
            4 => self.tm.boolean_type(),
            5 => self.tm.char_type(),
            6 => self.tm.single_type(),
            7 => self.tm.double_type(),
            8 => self.tm.int8_type(),
            9 => self.tm.int16_type(),
            10 => self.tm.int32_type(),
            11 => self.tm.int64_type(),
            _ => {
                return Err(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })
            }
        };
        let num = self.pop()?;
        let array = self.builder.gen_new_array(self.tm, elem_ty, num);
        self.push(array);
        if self.flags.opt_array_init {
            let consumed = self.check_for_array_initializer(array, code, pc + 2)?;
            return Ok(Step::Skip(consumed));
        }
        Ok(Step::Continue)
    }

    fn anewarray(&mut self, cp_index: u32) -> Result<()> {
        let elem_ty = self.ci.get_named_type(self.tm, cp_index, false);
        let size = self.pop()?;
        let r = if self.tm.is_unresolved(elem_ty) {
            if !self.tm.is_lazy_resolution_mode() {
                self.linking_exception(cp_index, bc_op::ANEWARRAY);
            }
            self.builder.gen_new_array_with_resolve(
                self.tm,
                elem_ty,
                size,
                self.method.parent_ty,
                cp_index,
            )
        } else {
            self.builder.gen_new_array(self.tm, elem_ty, size)
        };
        self.push(r);
        Ok(())
    }

    fn multianewarray(&mut self, cp_index: u32, dims: u8) -> Result<()> {
        let array_ty = self.ci.get_named_type(self.tm, cp_index, false);
        let counts = self.pop_args(dims as u32)?;
        let r = if self.tm.is_unresolved(array_ty) {
            if !self.tm.is_lazy_resolution_mode() {
                self.linking_exception(cp_index, bc_op::MULTIANEWARRAY);
            }
            self.builder.gen_multianewarray_with_resolve(
                self.tm,
                array_ty,
                self.method.parent_ty,
                cp_index,
                &counts,
            )
        } else {
            self.builder.gen_multianewarray(array_ty, &counts)
        };
        self.push(r);
        Ok(())
    }

    fn checkcast(&mut self, cp_index: u32) -> Result<()> {
        let ty = self.ci.get_named_type(self.tm, cp_index, false);
        let obj = self.pop()?;
        let r = if self.tm.is_unresolved(ty) {
            if !self.tm.is_lazy_resolution_mode() {
                self.linking_exception(cp_index, bc_op::CHECKCAST);
            }
            self.builder
                .gen_cast_with_resolve(self.tm, obj, ty, self.method.parent_ty, cp_index)
        } else {
            self.builder.gen_cast(obj, ty)
        };
        self.push(r);
        Ok(())
    }

    fn instance_of(&mut self, cp_index: u32) -> Result<()> {
        let ty = self.ci.get_named_type(self.tm, cp_index, false);
        let src = self.pop()?;
        let src_ty = self.builder.opnd_ty(src);
        let r = if self.tm.is_unresolved(ty) {
            if !self.tm.is_lazy_resolution_mode() {
                self.linking_exception(cp_index, bc_op::INSTANCEOF);
            }
            self.builder
                .gen_instance_of_with_resolve(self.tm, src, self.method.parent_ty, cp_index)
        } else if !self.tm.is_unresolved(src_ty)
            && !self.tm.is_interface(src_ty)
            && !self.builder.is_exact_type_opnd(src)
            && self.tm.is_final_class(ty)
        {
            // final target class: branch on a direct vtable comparison,
            // something the straight-line simplifier cannot produce
            self.gen_final_class_instance_of(src, src_ty, ty)
        } else {
            self.builder.gen_instance_of(src, ty)
        };
        self.push(r);
        Ok(())
    }

    /// Tear down into the pieces the session packages up.
    pub fn finish(
        self,
    ) -> (
        IrBuilder,
        FlowGraphBuilder,
        PrepassResult,
        Vec<(InstId, InstId)>,
    ) {
        (self.builder, self.cfg, self.pre, self.jsr_entry_map)
    }

    fn gen_final_class_instance_of(&mut self, src: OpndId, src_ty: Ty, target: Ty) -> OpndId {
        let i32t = self.builder.types.i32;
        let obj_is_null = self.builder.create_label();
        let exit = self.builder.create_label();
        let res_var = self.builder.gen_var_def(i32t, false);

        self.new_fallthrough_block();
        let null = self.builder.gen_ld_null();
        self.builder.gen_branch2(CmpOp::Eq, obj_is_null, null, src);

        self.new_fallthrough_block();
        let tau_safe = self.builder.gen_tau_safe();
        let dynamic = self.builder.gen_tau_ld_vtable(self.tm, src, tau_safe, src_ty);
        let wanted = self.builder.gen_get_vtable(self.tm, target);
        let cmp = self.builder.gen_cmp(i32t, CmpOp::Eq, wanted, dynamic);
        self.builder.gen_st_var(res_var, cmp);
        self.builder.gen_jump(exit);

        self.builder.gen_label(obj_is_null);
        self.cfg
            .gen_block_after_current(obj_is_null, &mut self.builder.factory);
        let zero = self.builder.gen_ld_constant_i4(0);
        self.builder.gen_st_var(res_var, zero);
        self.builder.gen_jump(exit);

        self.builder.gen_label(exit);
        self.cfg
            .gen_block_after_current(exit, &mut self.builder.factory);
        self.builder.gen_ld_var(i32t, res_var)
    }
}

impl BytecodeVisitor for Translator<'_> {
    type Error = CompileError;

    fn parse_init(&mut self) {
        debug!(method = %self.method.name, "translation started");
    }

    fn parse_done(&mut self) -> Result<()> {
        // pair every ret with its subroutine entry for the JSR conversion
        for (&ret_offset, &ret_inst) in &self.ret_offsets {
            let entry_offset = self
                .pre
                .ret_to_entry
                .get(&ret_offset)
                .copied()
                .ok_or(CompileError::DanglingRet { offset: ret_offset })?;
            let entry_inst = self
                .jsr_entry_offsets
                .get(&entry_offset)
                .copied()
                .ok_or(CompileError::DanglingRet { offset: ret_offset })?;
            self.jsr_entry_map.push((entry_inst, ret_inst));
        }
        debug!(
            insts = self.builder.factory.arena().num_insts(),
            "translation finished"
        );
        Ok(())
    }

    fn skip_parsing(&self) -> bool {
        self.pre.problem_type_token().is_some()
    }

    fn visit(&mut self, pc: u32, instr: &Instr<'_>, _flow: &mut FlowInfo) -> Result<Step> {
        self.on_offset(pc)?;
        if !self.pre.code_visited.get(pc as usize) {
            // dead bytecode is decoded but not translated
            return Ok(Step::Continue);
        }

        let i32t = self.builder.types.i32;
        let i64t = self.builder.types.i64;
        let f32t = self.builder.types.single;
        let f64t = self.builder.types.double;
        let mut step = Step::Continue;

        match *instr {
            Instr::Nop => {}
            Instr::AConstNull => {
                let r = self.builder.gen_ld_null();
                self.push(r);
            }
            Instr::IConst(v) => {
                let r = self.builder.gen_ld_constant_i4(v);
                self.push(r);
            }
            Instr::LConst(v) => {
                let r = self.builder.gen_ld_constant_i8(v);
                self.push(r);
            }
            Instr::FConst(v) => {
                let r = self.builder.gen_ld_constant_single(v);
                self.push(r);
            }
            Instr::DConst(v) => {
                let r = self.builder.gen_ld_constant_double(v);
                self.push(r);
            }
            Instr::Ldc(cp) | Instr::Ldc2(cp) => self.ldc(cp)?,

            Instr::ILoad(v) | Instr::LLoad(v) | Instr::FLoad(v) | Instr::DLoad(v)
            | Instr::ALoad(v) => self.gen_ld_var_op(v as u32),

            Instr::IStore(v) | Instr::LStore(v) | Instr::FStore(v) | Instr::DStore(v)
            | Instr::AStore(v) => self.gen_st_var_op(v as u32)?,

            Instr::IaLoad => self.gen_array_load(i32t)?,
            Instr::LaLoad => self.gen_array_load(i64t)?,
            Instr::FaLoad => self.gen_array_load(f32t)?,
            Instr::DaLoad => self.gen_array_load(f64t)?,
            Instr::AaLoad => self.gen_type_array_load()?,
            Instr::BaLoad => {
                let t = self.tm.int8_type();
                self.gen_array_load(t)?
            }
            Instr::CaLoad => {
                let t = self.tm.char_type();
                self.gen_array_load(t)?
            }
            Instr::SaLoad => {
                let t = self.tm.int16_type();
                self.gen_array_load(t)?
            }

            Instr::IaStore => self.gen_array_store(i32t)?,
            Instr::LaStore => self.gen_array_store(i64t)?,
            Instr::FaStore => self.gen_array_store(f32t)?,
            Instr::DaStore => self.gen_array_store(f64t)?,
            Instr::AaStore => self.gen_type_array_store()?,
            Instr::BaStore => {
                let t = self.tm.int8_type();
                self.gen_array_store(t)?
            }
            Instr::CaStore => {
                let t = self.tm.char_type();
                self.gen_array_store(t)?
            }
            Instr::SaStore => {
                let t = self.tm.int16_type();
                self.gen_array_store(t)?
            }

            Instr::Pop => {
                self.pop()?;
            }
            Instr::Pop2 => {
                let top = self.pop()?;
                if !self.is_category2(top) {
                    self.pop()?;
                }
            }
            Instr::Dup => {
                let top = self.top()?;
                self.push(top);
            }
            Instr::DupX1 => {
                let o1 = self.pop()?;
                let o2 = self.pop()?;
                self.push(o1);
                self.push(o2);
                self.push(o1);
            }
            Instr::DupX2 => {
                let o1 = self.pop()?;
                let o2 = self.pop()?;
                if self.is_category2(o2) {
                    self.push(o1);
                    self.push(o2);
                    self.push(o1);
                } else {
                    let o3 = self.pop()?;
                    self.push(o1);
                    self.push(o3);
                    self.push(o2);
                    self.push(o1);
                }
            }
            Instr::Dup2 => {
                let o1 = self.pop()?;
                if self.is_category2(o1) {
                    self.push(o1);
                    self.push(o1);
                } else {
                    let o2 = self.pop()?;
                    self.push(o2);
                    self.push(o1);
                    self.push(o2);
                    self.push(o1);
                }
            }
            Instr::Dup2X1 => {
                let o1 = self.pop()?;
                let o2 = self.pop()?;
                if self.is_category2(o1) {
                    self.push(o1);
                    self.push(o2);
                    self.push(o1);
                } else {
                    let o3 = self.pop()?;
                    self.push(o2);
                    self.push(o1);
                    self.push(o3);
                    self.push(o2);
                    self.push(o1);
                }
            }
            Instr::Dup2X2 => {
                let o1 = self.pop()?;
                let o2 = self.pop()?;
                if self.is_category2(o1) {
                    if self.is_category2(o2) {
                        self.push(o1);
                        self.push(o2);
                        self.push(o1);
                    } else {
                        let o3 = self.pop()?;
                        self.push(o1);
                        self.push(o3);
                        self.push(o2);
                        self.push(o1);
                    }
                } else {
                    let o3 = self.pop()?;
                    if self.is_category2(o3) {
                        self.push(o2);
                        self.push(o1);
                        self.push(o3);
                        self.push(o2);
                        self.push(o1);
                    } else {
                        let o4 = self.pop()?;
                        self.push(o2);
                        self.push(o1);
                        self.push(o4);
                        self.push(o3);
                        self.push(o2);
                        self.push(o1);
                    }
                }
            }
            Instr::Swap => {
                let o1 = self.pop()?;
                let o2 = self.pop()?;
                self.push(o1);
                self.push(o2);
            }

            Instr::IAdd => self.gen_add_op(i32t, self.arith_mod())?,
            Instr::LAdd => self.gen_add_op(i64t, self.arith_mod())?,
            Instr::FAdd => self.gen_add_op(f32t, self.fp_mod())?,
            Instr::DAdd => self.gen_add_op(f64t, self.fp_mod())?,
            Instr::ISub => self.gen_sub_op(i32t, self.arith_mod())?,
            Instr::LSub => self.gen_sub_op(i64t, self.arith_mod())?,
            Instr::FSub => self.gen_sub_op(f32t, self.fp_mod())?,
            Instr::DSub => self.gen_sub_op(f64t, self.fp_mod())?,
            Instr::IMul => self.gen_mul_op(i32t, self.arith_mod())?,
            Instr::LMul => self.gen_mul_op(i64t, self.arith_mod())?,
            Instr::FMul => self.gen_mul_op(f32t, self.fp_mod())?,
            Instr::DMul => self.gen_mul_op(f64t, self.fp_mod())?,
            Instr::IDiv => self.gen_div_op(i32t)?,
            Instr::LDiv => self.gen_div_op(i64t)?,
            Instr::FDiv => self.gen_fp_div_op(f32t)?,
            Instr::DDiv => self.gen_fp_div_op(f64t)?,
            Instr::IRem => self.gen_rem_op(i32t)?,
            Instr::LRem => self.gen_rem_op(i64t)?,
            Instr::FRem => self.gen_fp_rem_op(f32t)?,
            Instr::DRem => self.gen_fp_rem_op(f64t)?,
            Instr::INeg => self.gen_neg_op(i32t)?,
            Instr::LNeg => self.gen_neg_op(i64t)?,
            Instr::FNeg => self.gen_neg_op(f32t)?,
            Instr::DNeg => self.gen_neg_op(f64t)?,
            Instr::IShl => self.gen_shl_op(i32t)?,
            Instr::LShl => self.gen_shl_op(i64t)?,
            Instr::IShr => self.gen_shr_op(i32t, SignedOp::Signed)?,
            Instr::LShr => self.gen_shr_op(i64t, SignedOp::Signed)?,
            Instr::IUshr => self.gen_shr_op(i32t, SignedOp::Unsigned)?,
            Instr::LUshr => self.gen_shr_op(i64t, SignedOp::Unsigned)?,
            Instr::IAnd => self.gen_and_op(i32t)?,
            Instr::LAnd => self.gen_and_op(i64t)?,
            Instr::IOr => self.gen_or_op(i32t)?,
            Instr::LOr => self.gen_or_op(i64t)?,
            Instr::IXor => self.gen_xor_op(i32t)?,
            Instr::LXor => self.gen_xor_op(i64t)?,

            Instr::IInc { var, delta } => {
                // loads and stores the same variable; the prepass marked it
                // multiply-defined, so it always materializes
                let var_opnd = self.get_var_opnd_ld_var(var as u32)?;
                let loaded = if self.builder.factory.arena().opnd(var_opnd).is_var() {
                    self.builder.gen_ld_var(i32t, var_opnd)
                } else {
                    var_opnd
                };
                let amount = self.builder.gen_ld_constant_i4(delta);
                let m = self.arith_mod();
                let sum = self.builder.gen_add(i32t, m, loaded, amount);
                if self.builder.factory.arena().opnd(var_opnd).is_var() {
                    self.builder.gen_st_var(var_opnd, sum);
                }
            }

            Instr::I2l => self.gen_conv_op(i64t)?,
            Instr::I2f => self.gen_conv_op(f32t)?,
            Instr::I2d => self.gen_conv_op(f64t)?,
            Instr::L2i => self.gen_conv_op(i32t)?,
            Instr::L2f => self.gen_conv_op(f32t)?,
            Instr::L2d => self.gen_conv_op(f64t)?,
            Instr::F2i => self.gen_conv_op(i32t)?,
            Instr::F2l => self.gen_conv_op(i64t)?,
            Instr::F2d => self.gen_conv_op(f64t)?,
            Instr::D2i => self.gen_conv_op(i32t)?,
            Instr::D2l => self.gen_conv_op(i64t)?,
            Instr::D2f => self.gen_conv_op(f32t)?,
            Instr::I2b => {
                let t = self.tm.int8_type();
                self.gen_trunc_op(t)?
            }
            Instr::I2c => {
                let t = self.tm.char_type();
                self.gen_trunc_op(t)?
            }
            Instr::I2s => {
                let t = self.tm.int16_type();
                self.gen_trunc_op(t)?
            }

            Instr::LCmp => self.gen_three_way_cmp(CmpOp::Gt, false)?,
            Instr::FCmpL | Instr::DCmpL => self.gen_three_way_cmp(CmpOp::GtUn, true)?,
            Instr::FCmpG | Instr::DCmpG => self.gen_three_way_cmp(CmpOp::GtUn, false)?,

            Instr::IfEq { target, next } => self.gen_if_zero(CmpOp::Zero, target, next)?,
            Instr::IfNe { target, next } => self.gen_if_zero(CmpOp::NonZero, target, next)?,
            Instr::IfLt { target, next } => self.gen_if_rel_zero(CmpOp::Gt, true, target, next)?,
            Instr::IfGe { target, next } => {
                self.gen_if_rel_zero(CmpOp::Gte, false, target, next)?
            }
            Instr::IfGt { target, next } => self.gen_if_rel_zero(CmpOp::Gt, false, target, next)?,
            Instr::IfLe { target, next } => self.gen_if_rel_zero(CmpOp::Gte, true, target, next)?,
            Instr::IfICmpEq { target, next } => self.gen_if2(CmpOp::Eq, false, target, next)?,
            Instr::IfICmpNe { target, next } => self.gen_if2(CmpOp::NeUn, false, target, next)?,
            Instr::IfICmpLt { target, next } => self.gen_if2(CmpOp::Gt, true, target, next)?,
            Instr::IfICmpGe { target, next } => self.gen_if2(CmpOp::Gte, false, target, next)?,
            Instr::IfICmpGt { target, next } => self.gen_if2(CmpOp::Gt, false, target, next)?,
            Instr::IfICmpLe { target, next } => self.gen_if2(CmpOp::Gte, true, target, next)?,
            Instr::IfACmpEq { target, next } => self.gen_if2(CmpOp::Eq, false, target, next)?,
            Instr::IfACmpNe { target, next } => self.gen_if2(CmpOp::NeUn, false, target, next)?,
            Instr::IfNull { target, next } => self.gen_if_zero(CmpOp::Zero, target, next)?,
            Instr::IfNonNull { target, next } => {
                self.gen_if_zero(CmpOp::NonZero, target, next)?
            }
            Instr::Goto { target, next } => self.gen_goto(target, next)?,

            Instr::Jsr { target, next } => {
                if target < next {
                    self.builder.gen_pseudo_throw();
                }
                self.last_instruction_was_a_branch = true;
                self.check_stack()?;
                let label = self.label_inst(target)?;
                self.builder.gen_jsr(label);
            }
            Instr::Ret { var } => {
                self.last_instruction_was_a_branch = true;
                self.check_stack()?;
                let addr = self.get_var_opnd_ld_var(var as u32)?;
                self.builder.gen_ret(addr);
                if let Some(inst) = self.builder.last_generated_inst() {
                    self.ret_offsets.insert(pc, inst);
                }
            }

            Instr::TableSwitch(ref sw) => {
                let opnd = self.pop()?;
                self.last_instruction_was_a_branch = true;
                self.check_stack()?;
                let bias = self.builder.gen_ld_constant_i4(sw.low());
                let m = self.arith_mod();
                let shifted = self.builder.gen_sub(i32t, m, opnd, bias);
                let mut labels = Vec::with_capacity(sw.num_targets() as usize);
                for t in sw.targets() {
                    labels.push(self.label_inst(t)?);
                }
                let default = self.label_inst(sw.default_target())?;
                self.builder.gen_switch(&labels, default, shifted);
            }
            Instr::LookupSwitch(ref sw) => {
                let opnd = self.pop()?;
                self.last_instruction_was_a_branch = true;
                self.check_stack()?;
                // a chain of equality branches, one expansion block per case
                for (key, target) in sw.targets() {
                    let value = self.builder.gen_ld_constant_i4(key);
                    let label = self.label_inst(target)?;
                    self.builder.gen_branch2(CmpOp::Eq, label, opnd, value);
                    let cont = self.builder.create_label();
                    self.cfg
                        .gen_block_after_current(cont, &mut self.builder.factory);
                }
                let default = self.label_inst(sw.default_target())?;
                self.builder.gen_jump(default);
            }

            Instr::IReturn
            | Instr::LReturn
            | Instr::FReturn
            | Instr::DReturn
            | Instr::AReturn => self.gen_return_value()?,
            Instr::Return => self.gen_return_void_op(),

            Instr::GetStatic(cp) => self.getstatic(cp)?,
            Instr::PutStatic(cp) => self.putstatic(cp)?,
            Instr::GetField(cp) => self.getfield(cp)?,
            Instr::PutField(cp) => self.putfield(cp)?,

            Instr::InvokeVirtual(cp) => self.invokevirtual(cp)?,
            Instr::InvokeSpecial(cp) => self.invokespecial(cp)?,
            Instr::InvokeStatic(cp) => self.invokestatic(cp)?,
            Instr::InvokeInterface { cp_index, .. } => self.invokeinterface(cp_index)?,

            Instr::New(cp) => self.new_obj(cp)?,
            Instr::NewArray(code_byte) => {
                let method = self.method;
                step = self.new_array(code_byte, pc, &method.code)?;
            }
            Instr::ANewArray(cp) => self.anewarray(cp)?,
            Instr::ArrayLength => {
                let array = self.pop()?;
                let r = self.builder.gen_array_len(array);
                self.push(r);
            }
            Instr::AThrow => {
                self.last_instruction_was_a_branch = true;
                let exc = self.pop()?;
                self.builder.gen_throw(ThrowOp::Normal, exc);
                self.open_after_return_block();
            }
            Instr::CheckCast(cp) => self.checkcast(cp)?,
            Instr::InstanceOf(cp) => self.instance_of(cp)?,
            Instr::MonitorEnter => {
                let obj = self.pop()?;
                if self.flags.ignore_sync {
                    // dropped
                } else if self.flags.sync_as_enter_fence {
                    self.builder.gen_monitor_enter_fence(obj);
                } else {
                    self.builder.gen_monitor_enter(obj);
                }
            }
            Instr::MonitorExit => {
                let obj = self.pop()?;
                if self.flags.ignore_sync || self.flags.sync_as_enter_fence {
                    // dropped
                } else {
                    self.builder.gen_monitor_exit(obj);
                }
            }
            Instr::MultiANewArray { cp_index, dims } => self.multianewarray(cp_index, dims)?,
        }

        if self.pre.is_subroutine_entry(pc) {
            if let Some(inst) = self.builder.last_generated_inst() {
                self.jsr_entry_offsets.insert(pc, inst);
            }
        }
        Ok(step)
    }
}
