//! Label prepass: an abstract interpretation over the bytecode that
//! discovers basic-block boundaries, models locals and operand stack at
//! every offset, merges types and variable incarnations across joins, and
//! normalizes exception-handler regions.
//!
//! Runs as the first of the two parser passes, in flow mode: a linear sweep
//! until the first unconditional transfer, then a worklist of branch
//! targets. Merges that generalize a recorded state re-queue the offset.

mod exc;
mod state;
mod vars;

pub use exc::{CatchBlock, CatchBlockId, CatchHandler, ExcRef, ExcRegions, HandlerId};
pub use state::{SlotFlags, SlotInfo, StateFlags, StateInfo, StateTable};
pub use vars::{SlotVar, VarIncId, VarIncs};

use ember_bytecode::{BitSet, BytecodeVisitor, FlowInfo, Instr, Step};
use ember_ir::InstFactory;
use ember_types::{StackKind, Ty, TypeManager};
use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::error::{CompileError, Result};
use crate::runtime::{
    num_args_by_signature, ret_type_by_signature, CompilationInterface, MethodDesc,
};

/// The prepass over one method body.
pub struct LabelPrepass<'a> {
    tm: &'a mut TypeManager,
    ci: &'a mut dyn CompilationInterface,
    method: &'a MethodDesc,

    /// Working state replayed along the walk.
    pub state: StateInfo,
    pub state_table: StateTable,
    pub incs: VarIncs,
    pub regions: ExcRegions,

    local_vars: HashMap<u64, VarIncId>,
    labels: BitSet,
    subroutines: BitSet,
    label_offsets: Vec<u32>,
    num_labels: u32,
    block_count: u32,
    num_vars: u32,
    num_stack: u32,
    is_fall_thru_label: bool,
    has_jsr_labels: bool,
    current_offset: u32,

    /// subroutine entry offset -> offsets following each of its `jsr`s
    jsr_entries: HashMap<u32, Vec<u32>>,
    /// `ret` offset -> subroutine entry offset
    pub ret_to_entry: HashMap<u32, u32>,

    problem_token: Option<u32>,
}

impl<'a> LabelPrepass<'a> {
    pub fn new(
        tm: &'a mut TypeManager,
        ci: &'a mut dyn CompilationInterface,
        method: &'a MethodDesc,
    ) -> Self {
        let code_len = method.code.len();
        let num_vars = method.max_locals;
        let num_stack = method.max_stack + 1;
        let mut prepass = Self {
            state: StateInfo::with_capacity((num_vars + num_stack) as usize),
            state_table: StateTable::new(num_vars, num_stack),
            incs: VarIncs::new(),
            regions: ExcRegions::new(),
            local_vars: HashMap::new(),
            labels: BitSet::new(code_len + 1),
            subroutines: BitSet::new(code_len + 1),
            label_offsets: Vec::new(),
            num_labels: 0,
            block_count: 0,
            num_vars,
            num_stack,
            is_fall_thru_label: true,
            has_jsr_labels: false,
            current_offset: 0,
            jsr_entries: HashMap::new(),
            ret_to_entry: HashMap::new(),
            problem_token: None,
            tm,
            ci,
            method,
        };
        prepass.state.stack_depth = num_vars;

        prepass.parse_exception_handlers();

        if prepass.problem_token.is_none() {
            prepass.init_arg_slots();
        }
        prepass
    }

    //
    // public queries used by the translator
    //

    pub fn is_label(&self, offset: u32) -> bool {
        self.labels.get(offset as usize)
    }

    pub fn is_subroutine_entry(&self, offset: u32) -> bool {
        self.subroutines.get(offset as usize)
    }

    pub fn has_jsr_labels(&self) -> bool {
        self.has_jsr_labels
    }

    pub fn num_labels(&self) -> u32 {
        self.num_labels
    }

    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    pub fn num_stack(&self) -> u32 {
        self.num_stack
    }

    /// Dense id of a discovered label offset.
    pub fn label_id(&self, offset: u32) -> Result<u32> {
        self.label_offsets
            .binary_search(&offset)
            .map(|i| i as u32)
            .map_err(|_| CompileError::MissingLabel { offset })
    }

    pub fn all_exception_types_resolved(&self) -> bool {
        self.problem_token.is_none()
    }

    pub fn problem_type_token(&self) -> Option<u32> {
        self.problem_token
    }

    pub fn get_var_inc(&self, offset: u32, index: u32) -> Option<VarIncId> {
        self.local_vars.get(&self.slot_key(offset, index)).copied()
    }

    pub fn get_or_create_var_inc(&mut self, offset: u32, index: u32, ty: Ty) -> VarIncId {
        let key = self.slot_key(offset, index);
        if let Some(&inc) = self.local_vars.get(&key) {
            return inc;
        }
        let inc = self.incs.create(offset, ty);
        self.local_vars.insert(key, inc);
        inc
    }

    /// Materialize variable operands for every multiply-defined
    /// incarnation; runs after the pass, before translation.
    pub fn create_multiple_def_var_opnds(&mut self, factory: &mut InstFactory) {
        self.incs.create_multiple_def_opnds(factory);
    }

    pub fn stack_kind(&self, ty: Ty) -> Option<StackKind> {
        self.tm.stack_kind(ty)
    }

    fn slot_key(&self, offset: u32, index: u32) -> u64 {
        offset as u64 * (self.num_vars + self.num_stack) as u64 + index as u64
    }

    //
    // construction helpers
    //

    fn init_arg_slots(&mut self) {
        let mut j = 0u32;
        for i in 0..self.method.num_params() {
            let declared = self.method.param_tys[i as usize];
            // an unresolved parameter type only fails at its use point
            let ty = declared.unwrap_or_else(|| self.tm.null_object_type());
            let internal = self.tm.to_internal_type(ty);
            let inc = self.get_or_create_var_inc(0, j, internal);
            let slot = &mut self.state.stack[j as usize];
            slot.ty = Some(internal);
            slot.vars = Some(SlotVar::new(inc));
            let kind = self.tm.stack_kind(internal);
            j += if matches!(kind, Some(k) if k.is_category2()) {
                2
            } else {
                1
            };
        }
        // seed the entry state; nothing is queued yet, so merges cannot
        // retrigger anything
        let mut scratch = FlowInfo::new(self.method.code.len().max(1));
        let state = self.state.clone();
        self.state_table.set_state_info(
            &state,
            0,
            false,
            false,
            &self.regions,
            &mut self.incs,
            self.tm,
            &mut scratch,
        );
    }

    fn parse_exception_handlers(&mut self) {
        let handlers = self.method.handlers.clone();
        let mut prev_block: Option<CatchBlockId> = None;
        for (index, rec) in handlers.iter().enumerate() {
            if !self.add_exception_record(
                rec.try_begin,
                rec.try_end,
                rec.handler_pc,
                rec.class_token,
                index as u32,
                &mut prev_block,
            ) {
                debug!(token = rec.class_token, "unresolved catch type");
                self.problem_token = Some(rec.class_token);
                return;
            }
        }
        debug_assert!(self.regions.check_nesting());
    }

    /// One declared exception-table record; splits existing regions so the
    /// final set is properly nested. Returns false when the catch type
    /// cannot be resolved in a non-lazy session.
    fn add_exception_record(
        &mut self,
        begin: u32,
        end: u32,
        handler_pc: u32,
        class_token: u32,
        exc_table_index: u32,
        prev_block: &mut Option<CatchBlockId>,
    ) -> bool {
        self.set_label(handler_pc);
        self.set_label(begin);
        self.set_label(end);

        let exception_ty = if class_token != 0 {
            let ty = self.ci.get_named_type(self.tm, class_token, false);
            if self.tm.is_unresolved(ty) && !self.tm.is_lazy_resolution_mode() {
                return false;
            }
            ty
        } else {
            // catch-all entries dispatch on the root object type
            self.tm.system_object_type()
        };

        if let Some(prev) = *prev_block {
            if self.regions.block(prev).same_range(begin, end) {
                self.add_handler_for_block(prev, handler_pc, exception_ty);
                return true;
            }
        }

        self.state_table.create(begin, None);

        // split every existing region a bound of the new one cuts through,
        // so regions end up nested
        let mut i = 0;
        while i < self.regions.table.len() {
            let block_id = self.regions.table[i];
            if self.regions.block(block_id).offset_splits(begin) {
                self.split_block_at(block_id, begin, i);
            }
            let block_id = self.regions.table[i];
            if self.regions.block(block_id).offset_splits(end) {
                self.state_table.create(end, None);
                self.split_block_at(block_id, end, i);
            }
            i += 1;
        }

        if handler_pc > begin && handler_pc < end {
            // a region catching its own handler would hang a loop off the
            // dispatch node; cut it at the handler entry instead
            let first = self.regions.new_block(begin, handler_pc, exc_table_index, None);
            self.attach_block_to_state(begin, first);
            self.add_handler_for_block(first, handler_pc, exception_ty);
            let second = self.regions.new_block(handler_pc, end, exc_table_index, None);
            self.state_table.create(handler_pc, None);
            self.attach_block_to_state(handler_pc, second);
            self.add_handler_for_block(second, handler_pc, exception_ty);
            *prev_block = Some(second);
        } else {
            let block = self.regions.new_block(begin, end, exc_table_index, None);
            self.attach_block_to_state(begin, block);
            self.add_handler_for_block(block, handler_pc, exception_ty);
            *prev_block = Some(block);
        }
        true
    }

    fn attach_block_to_state(&mut self, offset: u32, block: CatchBlockId) {
        let state = self.state_table.create(offset, None);
        let r = ExcRef::Block(block);
        if !state.exceptions.contains(&r) {
            state.exceptions.push(r);
        }
    }

    /// Cut `block` at `offset`; the suffix becomes a new region with copies
    /// of the same handlers, inserted before the original in table order.
    fn split_block_at(&mut self, block: CatchBlockId, offset: u32, at: usize) {
        let (end, exc_index, handlers) = {
            let b = self.regions.block(block);
            (b.end, b.exc_table_index, b.handlers.clone())
        };
        let suffix = self.regions.new_block(offset, end, exc_index, Some(at));
        self.attach_block_to_state(offset, suffix);
        self.regions.block_mut(block).end = offset;
        for h in handlers {
            let (begin, ty) = {
                let h = self.regions.handler(h);
                (h.begin, h.exception_ty)
            };
            self.add_handler_for_block(suffix, begin, ty);
        }
    }

    /// Register a handler on a region and thread the caught exception into
    /// the handler's entry state.
    fn add_handler_for_block(&mut self, block: CatchBlockId, handler_pc: u32, exception_ty: Ty) {
        debug_assert!(!self.tm.is_unresolved(exception_ty) || self.tm.is_lazy_resolution_mode());
        let handler = self.regions.add_handler(block, handler_pc, exception_ty);

        let num_vars = self.num_vars;
        let state = self.state_table.create(handler_pc, Some(num_vars));
        let r = ExcRef::Handler(handler);
        if !state.exceptions.contains(&r) {
            state.exceptions.push(r);
        }
        let slot_ty;
        if state.stack_depth != num_vars {
            // a previous handler already pushed the exception slot
            let prev_ty = state.top().ty;
            let merged = match prev_ty {
                Some(t) if t != exception_ty => {
                    let joined = self
                        .tm
                        .common_type(exception_ty, t)
                        .unwrap_or_else(|| self.tm.system_object_type());
                    Some(joined)
                }
                other => other.or(Some(exception_ty)),
            };
            let top = state.top();
            top.ty = merged;
            top.flags.remove(SlotFlags::EXACT_TYPE);
            slot_ty = merged.expect("handler slot must have a type");
        } else {
            let slot = state.push(exception_ty);
            slot.flags.insert(SlotFlags::NON_NULL);
            slot_ty = exception_ty;
        }
        let depth = self.state_table.get(handler_pc).unwrap().stack_depth;
        let inc = self.get_or_create_var_inc(handler_pc, depth - 1, slot_ty);
        let state = self.state_table.get_mut(handler_pc).unwrap();
        state.stack[depth as usize - 1].vars = Some(SlotVar::new(inc));
        state.flags.insert(StateFlags::CATCH_LABEL);
    }

    //
    // per-offset bookkeeping
    //

    fn set_label(&mut self, offset: u32) {
        if self.labels.get(offset as usize) {
            return;
        }
        trace!(offset, id = self.num_labels, "set label");
        self.labels.set(offset as usize, true);
        self.num_labels += 1;
    }

    fn on_offset(&mut self, offset: u32, flow: &mut FlowInfo) {
        self.current_offset = offset;
        if offset == 0 {
            self.restore_state(0, flow);
        }
        if !self.labels.get(offset as usize) {
            return;
        }
        if flow.linear_done {
            self.restore_state(offset, flow);
        }
        self.set_stack_vars();
        if !flow.linear_done {
            let fall_thru = self.is_fall_thru_label;
            self.propagate_state_info(offset, fall_thru, flow);
            self.is_fall_thru_label = true;
        }
        trace!(offset, block = self.block_count, "basic block");
        self.block_count += 1;
        flow.mark_visited(offset);
        self.restore_state(offset, flow);
        if self.state.is_subroutine_entry() {
            let ty = self.tm.system_object_type();
            let slot = self.state.push(ty);
            slot.jsr_label_offset = offset;
        }
    }

    fn restore_state(&mut self, offset: u32, flow: &mut FlowInfo) {
        self.state_table.restore(&mut self.state, offset);
        // entering a covered range exposes its handlers: seed their entry
        // states with the current locals and queue them
        let mut handler_offsets = Vec::new();
        for exc in &self.state.exceptions {
            if let ExcRef::Block(b) = exc {
                let block = self.regions.block(*b);
                if block.begin <= offset && offset < block.end {
                    for &h in &block.handlers {
                        handler_offsets.push(self.regions.handler(h).begin);
                    }
                }
            }
        }
        for h in handler_offsets {
            flow.push(h);
            let state = self.state.clone();
            self.state_table.set_state_info(
                &state,
                h,
                false,
                true,
                &self.regions,
                &mut self.incs,
                self.tm,
                flow,
            );
        }
    }

    fn propagate_state_info(&mut self, offset: u32, is_fall_thru: bool, flow: &mut FlowInfo) {
        self.set_label(offset);
        let state = self.state.clone();
        self.state_table.set_state_info(
            &state,
            offset,
            is_fall_thru,
            false,
            &self.regions,
            &mut self.incs,
            self.tm,
            flow,
        );
    }

    /// A branch target already walked linearly but carrying no recorded
    /// state would lose this path's merges; start the walk over.
    fn check_target_for_restart(&mut self, target: u32, flow: &mut FlowInfo) {
        if flow.code_visited.get(target as usize) && self.state_table.get(target).is_none() {
            debug!(target, "restarting walk to pick up unmerged state");
            flow.restart();
        }
    }

    /// Give every live stack slot a variable incarnation keyed by the
    /// current offset, merging with any incarnations already recorded.
    fn set_stack_vars(&mut self) {
        let depth = self.state.stack_depth;
        for i in self.num_vars..depth {
            let (ty, primary) = {
                let slot = &self.state.stack[i as usize];
                let ty = slot.ty.expect("live stack slot must be typed");
                (ty, slot.vars.as_ref().map(|v| v.primary()))
            };
            let var = self.get_or_create_var_inc(self.current_offset, i, ty);
            match primary {
                Some(prev) => {
                    self.incs.link_and_merge(prev, var, self.tm);
                    self.incs.set_multiple_defs(var);
                }
                None => {
                    self.state.stack[i as usize].vars = Some(SlotVar::new(var));
                }
            }
        }
    }

    fn propagate_local_var_to_handlers(&mut self, index: u32, flow: &mut FlowInfo) {
        debug_assert!(index < self.num_vars);
        let mut targets = Vec::new();
        for exc in &self.state.exceptions {
            if let ExcRef::Block(b) = exc {
                for &h in &self.regions.block(*b).handlers {
                    targets.push(self.regions.handler(h).begin);
                }
            }
        }
        let in_slot = self.state.stack[index as usize].clone();
        for offset in targets {
            self.state_table.merge_local_slot(
                &in_slot,
                offset,
                index,
                &mut self.incs,
                self.tm,
                flow,
            );
        }
    }

    //
    // modeled stack operations
    //

    fn push_type(&mut self, ty: Ty) {
        self.state.push(ty);
    }

    fn push_type_var(&mut self, ty: Ty, var_number: u32) {
        self.state.push(ty).set_var_number(var_number);
    }

    fn pop_type(&mut self) -> Result<SlotInfo> {
        if self.state.stack_depth <= self.num_vars {
            return Err(CompileError::StackUnderflow {
                offset: self.current_offset,
            });
        }
        self.state.stack_depth -= 1;
        Ok(self.state.stack[self.state.stack_depth as usize].clone())
    }

    fn pop_and_check(&mut self, expect: Ty) -> Result<SlotInfo> {
        let slot = self.pop_type()?;
        let ok = match slot.ty {
            Some(t) => {
                t == expect || self.tm.stack_kind(t) == self.tm.stack_kind(expect)
            }
            None => false,
        };
        if !ok {
            return Err(CompileError::StackTypeMismatch {
                offset: self.current_offset,
            });
        }
        Ok(slot)
    }

    fn pop_and_check_kind(&mut self, expect: StackKind) -> Result<SlotInfo> {
        let slot = self.pop_type()?;
        let ok = matches!(slot.ty, Some(t) if self.tm.stack_kind(t) == Some(expect));
        if !ok {
            return Err(CompileError::StackTypeMismatch {
                offset: self.current_offset,
            });
        }
        Ok(slot)
    }

    fn is_category2(&self, slot: &SlotInfo) -> bool {
        matches!(
            slot.ty.and_then(|t| self.tm.stack_kind(t)),
            Some(k) if k.is_category2()
        )
    }

    //
    // shared operation shapes
    //

    fn gen_load(&mut self, ty: Ty, index: u32) -> Result<()> {
        let slot = &self.state.stack[index as usize];
        debug_assert_eq!(
            slot.ty.and_then(|t| self.tm.stack_kind(t)),
            self.tm.stack_kind(ty)
        );
        let jsr_off = slot.jsr_label_offset;
        let vars = slot.vars.clone();
        if let Some(mut v) = vars {
            v.merge_incarnations(&mut self.incs, self.tm);
            self.state.stack[index as usize].vars = Some(v);
        }
        self.push_type_var(ty, index);
        self.state.top().jsr_label_offset = jsr_off;
        Ok(())
    }

    fn gen_type_load(&mut self, index: u32) -> Result<()> {
        let slot = &self.state.stack[index as usize];
        let mut ty = slot.ty.ok_or(CompileError::InvalidLocal {
            index,
            offset: self.current_offset,
        })?;
        let jsr_off = slot.jsr_label_offset;
        let vars = slot.vars.clone();
        if let Some(mut v) = vars {
            v.merge_incarnations(&mut self.incs, self.tm);
            ty = self.incs.declared_ty(v.primary());
            self.state.stack[index as usize].vars = Some(v);
        }
        self.push_type_var(ty, index);
        self.state.top().jsr_label_offset = jsr_off;
        Ok(())
    }

    fn gen_store(&mut self, ty: Ty, index: u32, offset: u32, flow: &mut FlowInfo) -> Result<()> {
        let top_jsr = self.state.top().jsr_label_offset;
        self.pop_and_check(ty)?;
        let inc = self.get_or_create_var_inc(offset, index, ty);
        let slot = &mut self.state.stack[index as usize];
        slot.ty = Some(ty);
        slot.flags = SlotFlags::empty();
        slot.vars = Some(SlotVar::new(inc));
        slot.jsr_label_offset = top_jsr;
        self.propagate_local_var_to_handlers(index, flow);
        Ok(())
    }

    fn gen_type_store(&mut self, index: u32, offset: u32, flow: &mut FlowInfo) -> Result<()> {
        let popped = self.pop_type()?;
        let ty = popped.ty.ok_or(CompileError::StackTypeMismatch {
            offset: self.current_offset,
        })?;
        let inc = self.get_or_create_var_inc(offset, index, ty);
        let declared = self.incs.declared_ty(inc);
        let joined = self
            .tm
            .common_type(ty, declared)
            .unwrap_or_else(|| self.tm.system_object_type());
        self.incs.set_declared_ty(inc, joined);
        let slot = &mut self.state.stack[index as usize];
        slot.ty = Some(ty);
        slot.flags = popped.flags;
        slot.vars = Some(SlotVar::new(inc));
        slot.jsr_label_offset = popped.jsr_label_offset;
        self.propagate_local_var_to_handlers(index, flow);
        Ok(())
    }

    fn gen_array_load(&mut self, ty: Ty) -> Result<()> {
        let i32t = self.tm.int32_type();
        self.pop_and_check(i32t)?;
        self.pop_and_check_kind(StackKind::Ref)?;
        self.push_type(ty);
        Ok(())
    }

    fn gen_type_array_load(&mut self) -> Result<()> {
        let i32t = self.tm.int32_type();
        self.pop_and_check(i32t)?;
        let arr = self.pop_type()?;
        let ty = match arr.ty.map(|t| (t, self.tm.array_elem(t))) {
            Some((_, Some(elem))) => elem,
            Some((t, None))
                if self.tm.is_null_object(t) || self.tm.is_unresolved(t) =>
            {
                t
            }
            _ => {
                return Err(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })
            }
        };
        self.push_type(ty);
        Ok(())
    }

    fn gen_array_store(&mut self, ty: Ty) -> Result<()> {
        let i32t = self.tm.int32_type();
        self.pop_and_check(ty)?;
        self.pop_and_check(i32t)?;
        self.pop_and_check_kind(StackKind::Ref)?;
        Ok(())
    }

    fn gen_type_array_store(&mut self) -> Result<()> {
        let i32t = self.tm.int32_type();
        self.pop_type()?;
        self.pop_and_check(i32t)?;
        self.pop_and_check_kind(StackKind::Ref)?;
        Ok(())
    }

    fn gen_binary(&mut self, ty: Ty) -> Result<()> {
        self.pop_and_check(ty)?;
        self.pop_and_check(ty)?;
        self.push_type(ty);
        Ok(())
    }

    fn gen_unary(&mut self, ty: Ty) -> Result<()> {
        self.pop_and_check(ty)?;
        self.push_type(ty);
        Ok(())
    }

    fn gen_shift(&mut self, ty: Ty) -> Result<()> {
        let i32t = self.tm.int32_type();
        self.pop_and_check(i32t)?;
        self.pop_and_check(ty)?;
        self.push_type(ty);
        Ok(())
    }

    fn gen_conv(&mut self, from: Ty, to: Ty) -> Result<()> {
        self.pop_and_check(from)?;
        self.push_type(to);
        Ok(())
    }

    fn gen_compare(&mut self, ty: Ty) -> Result<()> {
        self.pop_and_check(ty)?;
        self.pop_and_check(ty)?;
        let i32t = self.tm.int32_type();
        self.push_type(i32t);
        Ok(())
    }

    //
    // control flow
    //

    fn branch(
        &mut self,
        target: u32,
        next: u32,
        pops: &[StackKind],
        flow: &mut FlowInfo,
    ) -> Result<()> {
        for &kind in pops {
            self.pop_and_check_kind(kind)?;
        }
        self.set_stack_vars();
        self.check_target_for_restart(target, flow);
        self.propagate_state_info(target, false, flow);
        self.set_label(next);
        self.is_fall_thru_label = target > next;
        Ok(())
    }

    fn goto(&mut self, target: u32, flow: &mut FlowInfo) {
        self.set_stack_vars();
        self.check_target_for_restart(target, flow);
        self.propagate_state_info(target, false, flow);
    }

    fn jsr(&mut self, target: u32, next: u32, flow: &mut FlowInfo) {
        self.state_table
            .create(target, None)
            .flags
            .insert(StateFlags::SUBROUTINE_ENTRY);
        self.subroutines.set(target as usize, true);
        self.has_jsr_labels = true;
        self.set_stack_vars();
        self.propagate_state_info(target, false, flow);
        self.propagate_state_info(next, false, flow);
        self.jsr_entries.entry(target).or_default().push(next);
        flow.mark_unvisited(target);
    }

    fn ret(&mut self, var: u16, flow: &mut FlowInfo) -> Result<()> {
        let slot = &self.state.stack[var as usize];
        let inc = slot
            .vars
            .as_ref()
            .map(|v| v.primary())
            .ok_or(CompileError::DanglingRet {
                offset: self.current_offset,
            })?;
        self.incs.set_multiple_defs(inc);
        self.set_stack_vars();
        let entry = self.state.stack[var as usize].jsr_label_offset;
        self.state.clean_finally_info(entry);
        debug_assert!(self
            .ret_to_entry
            .get(&self.current_offset)
            .map_or(true, |&e| e == entry));
        self.ret_to_entry.insert(self.current_offset, entry);
        let nexts = self.jsr_entries.get(&entry).cloned().unwrap_or_default();
        for next in nexts {
            let state = self.state.clone();
            self.state_table.set_state_from_finally(
                &state,
                next,
                &mut self.incs,
                self.tm,
                flow,
            );
            flow.push(next);
        }
        Ok(())
    }

    //
    // constant-pool operations
    //

    fn ldc(&mut self, cp_index: u32) -> Result<()> {
        let ty = self.ci.get_constant_type(self.tm, cp_index);
        use ember_types::TypeKind;
        match self.tm.kind(ty) {
            TypeKind::SystemString | TypeKind::SystemClass => self.push_type(ty),
            TypeKind::Int32 => {
                let t = self.tm.int32_type();
                self.push_type(t)
            }
            TypeKind::Single => {
                let t = self.tm.single_type();
                self.push_type(t)
            }
            _ => {
                return Err(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })
            }
        }
        Ok(())
    }

    fn ldc2(&mut self, cp_index: u32) -> Result<()> {
        let ty = self.ci.get_constant_type(self.tm, cp_index);
        use ember_types::TypeKind;
        match self.tm.kind(ty) {
            TypeKind::Int64 => {
                let t = self.tm.int64_type();
                self.push_type(t)
            }
            TypeKind::Double => {
                let t = self.tm.double_type();
                self.push_type(t)
            }
            _ => {
                return Err(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })
            }
        }
        Ok(())
    }

    fn get_static(&mut self, cp_index: u32) -> Result<()> {
        let field_ty = self
            .ci
            .get_static_field(self.tm, cp_index, false)
            .filter(|f| f.is_static)
            .map(|f| f.ty)
            .or_else(|| self.ci.get_field_type(self.tm, cp_index))
            .unwrap_or_else(|| self.tm.unresolved_object_type());
        let internal = self.tm.to_internal_type(field_ty);
        self.push_type(internal);
        Ok(())
    }

    fn put_static(&mut self, cp_index: u32) -> Result<()> {
        let field = self.ci.get_static_field(self.tm, cp_index, true);
        match field.map(|f| f.ty) {
            Some(ty) => {
                let kind = self.tm.stack_kind(ty).ok_or(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })?;
                self.pop_and_check_kind(kind)?;
            }
            // the translator emits the linkage throw; just keep the model
            None => {
                self.pop_type()?;
            }
        }
        Ok(())
    }

    fn get_field(&mut self, cp_index: u32) -> Result<()> {
        self.pop_and_check_kind(StackKind::Ref)?;
        let field_ty = self
            .ci
            .get_nonstatic_field(self.tm, cp_index, false)
            .map(|f| f.ty)
            .or_else(|| self.ci.get_field_type(self.tm, cp_index))
            .unwrap_or_else(|| self.tm.unresolved_object_type());
        let internal = self.tm.to_internal_type(field_ty);
        self.push_type(internal);
        Ok(())
    }

    fn put_field(&mut self, cp_index: u32) -> Result<()> {
        let field = self.ci.get_nonstatic_field(self.tm, cp_index, true);
        match field.map(|f| f.ty) {
            Some(ty) => {
                let kind = self.tm.stack_kind(ty).ok_or(CompileError::StackTypeMismatch {
                    offset: self.current_offset,
                })?;
                self.pop_and_check_kind(kind)?;
            }
            None => {
                self.pop_type()?;
            }
        }
        self.pop_and_check_kind(StackKind::Ref)?;
        Ok(())
    }

    fn invoke(&mut self, resolved: Option<crate::runtime::MethodRef>, cp_index: u32, pops_receiver_on_fail: bool) -> Result<()> {
        match resolved {
            Some(m) => {
                for _ in 0..m.num_params {
                    self.pop_type()?;
                }
                match m.ret_ty {
                    Some(ret) if ret == self.tm.void_type() => {}
                    Some(ret) => {
                        let internal = self.tm.to_internal_type(ret);
                        self.push_type(internal);
                    }
                    // unresolved return types surface as null objects; the
                    // callee resolves or throws
                    None => {
                        let t = self.tm.null_object_type();
                        self.push_type(t);
                    }
                }
            }
            None => {
                if pops_receiver_on_fail {
                    self.pop_type()?;
                }
                let sig = self.ci.get_signature_string(cp_index);
                self.pseudo_invoke(&sig)?;
            }
        }
        Ok(())
    }

    fn pseudo_invoke(&mut self, sig: &str) -> Result<()> {
        for _ in 0..num_args_by_signature(sig) {
            self.pop_type()?;
        }
        let ret = ret_type_by_signature(self.tm, sig)
            .unwrap_or_else(|| self.tm.unresolved_object_type());
        if ret != self.tm.void_type() {
            let internal = self.tm.to_internal_type(ret);
            self.push_type(internal);
        }
        Ok(())
    }

    fn new_array_elem_type(&mut self, code: u8) -> Option<Ty> {
        Some(match code {
            4 => self.tm.boolean_type(),
            5 => self.tm.char_type(),
            6 => self.tm.single_type(),
            7 => self.tm.double_type(),
            8 => self.tm.int8_type(),
            9 => self.tm.int16_type(),
            10 => self.tm.int32_type(),
            11 => self.tm.int64_type(),
            _ => return None,
        })
    }
}

/// Everything the prepass computed, detached from the runtime borrows so
/// the translator can consult it while driving the builder.
#[derive(Debug)]
pub struct PrepassResult {
    pub state_table: StateTable,
    pub incs: VarIncs,
    pub regions: ExcRegions,
    pub ret_to_entry: HashMap<u32, u32>,
    pub code_visited: BitSet,
    labels: BitSet,
    subroutines: BitSet,
    label_offsets: Vec<u32>,
    local_vars: HashMap<u64, VarIncId>,
    num_labels: u32,
    num_vars: u32,
    num_stack: u32,
    has_jsr_labels: bool,
    problem_token: Option<u32>,
}

impl PrepassResult {
    pub fn is_label(&self, offset: u32) -> bool {
        self.labels.get(offset as usize)
    }

    pub fn is_subroutine_entry(&self, offset: u32) -> bool {
        self.subroutines.get(offset as usize)
    }

    pub fn label_id(&self, offset: u32) -> Result<u32> {
        self.label_offsets
            .binary_search(&offset)
            .map(|i| i as u32)
            .map_err(|_| CompileError::MissingLabel { offset })
    }

    pub fn num_labels(&self) -> u32 {
        self.num_labels
    }

    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    pub fn max_stack_depth(&self) -> u32 {
        self.state_table.max_depth()
    }

    pub fn has_jsr_labels(&self) -> bool {
        self.has_jsr_labels
    }

    pub fn all_exception_types_resolved(&self) -> bool {
        self.problem_token.is_none()
    }

    pub fn problem_type_token(&self) -> Option<u32> {
        self.problem_token
    }

    pub fn get_var_inc(&self, offset: u32, index: u32) -> Option<VarIncId> {
        let key = offset as u64 * (self.num_vars + self.num_stack) as u64 + index as u64;
        self.local_vars.get(&key).copied()
    }

    pub fn create_multiple_def_var_opnds(&mut self, factory: &mut InstFactory) {
        self.incs.create_multiple_def_opnds(factory);
    }
}

impl LabelPrepass<'_> {
    /// Detach the computed tables from the runtime borrows.
    pub fn finish(self, flow: FlowInfo) -> PrepassResult {
        PrepassResult {
            state_table: self.state_table,
            incs: self.incs,
            regions: self.regions,
            ret_to_entry: self.ret_to_entry,
            code_visited: flow.code_visited,
            labels: self.labels,
            subroutines: self.subroutines,
            label_offsets: self.label_offsets,
            local_vars: self.local_vars,
            num_labels: self.num_labels,
            num_vars: self.num_vars,
            num_stack: self.num_stack,
            has_jsr_labels: self.has_jsr_labels,
            problem_token: self.problem_token,
        }
    }
}

impl BytecodeVisitor for LabelPrepass<'_> {
    type Error = CompileError;

    fn parse_init(&mut self) {
        debug!(
            method = %self.method.name,
            code_len = self.method.code.len(),
            "prepass started"
        );
    }

    fn parse_done(&mut self) -> Result<()> {
        self.label_offsets = self.labels.iter().map(|b| b as u32).collect();
        debug!(
            labels = self.num_labels,
            blocks = self.block_count,
            "prepass finished"
        );
        Ok(())
    }

    fn skip_parsing(&self) -> bool {
        self.problem_token.is_some()
    }

    fn visit(&mut self, pc: u32, instr: &Instr<'_>, flow: &mut FlowInfo) -> Result<Step> {
        self.on_offset(pc, flow);

        let i32t = self.tm.int32_type();
        let i64t = self.tm.int64_type();
        let f32t = self.tm.single_type();
        let f64t = self.tm.double_type();

        match *instr {
            Instr::Nop => {}
            Instr::AConstNull => {
                let t = self.tm.null_object_type();
                self.push_type(t);
            }
            Instr::IConst(_) => self.push_type(i32t),
            Instr::LConst(_) => self.push_type(i64t),
            Instr::FConst(_) => self.push_type(f32t),
            Instr::DConst(_) => self.push_type(f64t),
            Instr::Ldc(cp) => self.ldc(cp)?,
            Instr::Ldc2(cp) => self.ldc2(cp)?,

            Instr::ILoad(v) => self.gen_load(i32t, v as u32)?,
            Instr::LLoad(v) => self.gen_load(i64t, v as u32)?,
            Instr::FLoad(v) => self.gen_load(f32t, v as u32)?,
            Instr::DLoad(v) => self.gen_load(f64t, v as u32)?,
            Instr::ALoad(v) => self.gen_type_load(v as u32)?,

            Instr::IaLoad | Instr::BaLoad | Instr::CaLoad | Instr::SaLoad => {
                self.gen_array_load(i32t)?
            }
            Instr::LaLoad => self.gen_array_load(i64t)?,
            Instr::FaLoad => self.gen_array_load(f32t)?,
            Instr::DaLoad => self.gen_array_load(f64t)?,
            Instr::AaLoad => self.gen_type_array_load()?,

            Instr::IStore(v) => self.gen_store(i32t, v as u32, pc, flow)?,
            Instr::LStore(v) => self.gen_store(i64t, v as u32, pc, flow)?,
            Instr::FStore(v) => self.gen_store(f32t, v as u32, pc, flow)?,
            Instr::DStore(v) => self.gen_store(f64t, v as u32, pc, flow)?,
            Instr::AStore(v) => self.gen_type_store(v as u32, pc, flow)?,

            Instr::IaStore | Instr::BaStore | Instr::CaStore | Instr::SaStore => {
                self.gen_array_store(i32t)?
            }
            Instr::LaStore => self.gen_array_store(i64t)?,
            Instr::FaStore => self.gen_array_store(f32t)?,
            Instr::DaStore => self.gen_array_store(f64t)?,
            Instr::AaStore => self.gen_type_array_store()?,

            Instr::Pop => {
                self.pop_type()?;
            }
            Instr::Pop2 => {
                let top = self.pop_type()?;
                if !self.is_category2(&top) {
                    self.pop_type()?;
                }
            }
            Instr::Dup => {
                let top = self.state.top().clone();
                self.state.push_slot(top);
            }
            Instr::DupX1 => {
                let o1 = self.pop_type()?;
                let o2 = self.pop_type()?;
                self.state.push_slot(o1.clone());
                self.state.push_slot(o2);
                self.state.push_slot(o1);
            }
            Instr::DupX2 => {
                let o1 = self.pop_type()?;
                let o2 = self.pop_type()?;
                if self.is_category2(&o2) {
                    self.state.push_slot(o1.clone());
                    self.state.push_slot(o2);
                    self.state.push_slot(o1);
                } else {
                    let o3 = self.pop_type()?;
                    self.state.push_slot(o1.clone());
                    self.state.push_slot(o3);
                    self.state.push_slot(o2);
                    self.state.push_slot(o1);
                }
            }
            Instr::Dup2 => {
                let o1 = self.pop_type()?;
                if self.is_category2(&o1) {
                    self.state.push_slot(o1.clone());
                    self.state.push_slot(o1);
                } else {
                    let o2 = self.pop_type()?;
                    self.state.push_slot(o2.clone());
                    self.state.push_slot(o1.clone());
                    self.state.push_slot(o2);
                    self.state.push_slot(o1);
                }
            }
            Instr::Dup2X1 => {
                let o1 = self.pop_type()?;
                let o2 = self.pop_type()?;
                if self.is_category2(&o1) {
                    self.state.push_slot(o1.clone());
                    self.state.push_slot(o2);
                    self.state.push_slot(o1);
                } else {
                    let o3 = self.pop_type()?;
                    self.state.push_slot(o2.clone());
                    self.state.push_slot(o1.clone());
                    self.state.push_slot(o3);
                    self.state.push_slot(o2);
                    self.state.push_slot(o1);
                }
            }
            Instr::Dup2X2 => {
                let o1 = self.pop_type()?;
                let o2 = self.pop_type()?;
                if self.is_category2(&o1) {
                    if self.is_category2(&o2) {
                        self.state.push_slot(o1.clone());
                        self.state.push_slot(o2);
                        self.state.push_slot(o1);
                    } else {
                        let o3 = self.pop_type()?;
                        self.state.push_slot(o1.clone());
                        self.state.push_slot(o3);
                        self.state.push_slot(o2);
                        self.state.push_slot(o1);
                    }
                } else {
                    debug_assert!(!self.is_category2(&o2));
                    let o3 = self.pop_type()?;
                    if self.is_category2(&o3) {
                        self.state.push_slot(o2.clone());
                        self.state.push_slot(o1.clone());
                        self.state.push_slot(o3);
                        self.state.push_slot(o2);
                        self.state.push_slot(o1);
                    } else {
                        let o4 = self.pop_type()?;
                        self.state.push_slot(o2.clone());
                        self.state.push_slot(o1.clone());
                        self.state.push_slot(o4);
                        self.state.push_slot(o3);
                        self.state.push_slot(o2);
                        self.state.push_slot(o1);
                    }
                }
            }
            Instr::Swap => {
                let o1 = self.pop_type()?;
                let o2 = self.pop_type()?;
                self.state.push_slot(o1);
                self.state.push_slot(o2);
            }

            Instr::IAdd | Instr::ISub | Instr::IMul | Instr::IDiv | Instr::IRem
            | Instr::IAnd | Instr::IOr | Instr::IXor => self.gen_binary(i32t)?,
            Instr::LAdd | Instr::LSub | Instr::LMul | Instr::LDiv | Instr::LRem
            | Instr::LAnd | Instr::LOr | Instr::LXor => self.gen_binary(i64t)?,
            Instr::FAdd | Instr::FSub | Instr::FMul | Instr::FDiv | Instr::FRem => {
                self.gen_binary(f32t)?
            }
            Instr::DAdd | Instr::DSub | Instr::DMul | Instr::DDiv | Instr::DRem => {
                self.gen_binary(f64t)?
            }
            Instr::INeg => self.gen_unary(i32t)?,
            Instr::LNeg => self.gen_unary(i64t)?,
            Instr::FNeg => self.gen_unary(f32t)?,
            Instr::DNeg => self.gen_unary(f64t)?,
            Instr::IShl | Instr::IShr | Instr::IUshr => self.gen_shift(i32t)?,
            Instr::LShl | Instr::LShr | Instr::LUshr => self.gen_shift(i64t)?,
            Instr::IInc { var, .. } => {
                if let Some(v) = &self.state.stack[var as usize].vars {
                    let inc = v.primary();
                    self.incs.set_multiple_defs(inc);
                }
            }

            Instr::I2l => self.gen_conv(i32t, i64t)?,
            Instr::I2f => self.gen_conv(i32t, f32t)?,
            Instr::I2d => self.gen_conv(i32t, f64t)?,
            Instr::L2i => self.gen_conv(i64t, i32t)?,
            Instr::L2f => self.gen_conv(i64t, f32t)?,
            Instr::L2d => self.gen_conv(i64t, f64t)?,
            Instr::F2i => self.gen_conv(f32t, i32t)?,
            Instr::F2l => self.gen_conv(f32t, i64t)?,
            Instr::F2d => self.gen_conv(f32t, f64t)?,
            Instr::D2i => self.gen_conv(f64t, i32t)?,
            Instr::D2l => self.gen_conv(f64t, i64t)?,
            Instr::D2f => self.gen_conv(f64t, f32t)?,
            Instr::I2b | Instr::I2c | Instr::I2s => self.gen_conv(i32t, i32t)?,

            Instr::LCmp => self.gen_compare(i64t)?,
            Instr::FCmpL | Instr::FCmpG => self.gen_compare(f32t)?,
            Instr::DCmpL | Instr::DCmpG => self.gen_compare(f64t)?,

            Instr::IfEq { target, next }
            | Instr::IfNe { target, next }
            | Instr::IfLt { target, next }
            | Instr::IfGe { target, next }
            | Instr::IfGt { target, next }
            | Instr::IfLe { target, next } => {
                self.branch(target, next, &[StackKind::Int], flow)?
            }
            Instr::IfICmpEq { target, next }
            | Instr::IfICmpNe { target, next }
            | Instr::IfICmpLt { target, next }
            | Instr::IfICmpGe { target, next }
            | Instr::IfICmpGt { target, next }
            | Instr::IfICmpLe { target, next } => {
                self.branch(target, next, &[StackKind::Int, StackKind::Int], flow)?
            }
            Instr::IfACmpEq { target, next } | Instr::IfACmpNe { target, next } => {
                self.branch(target, next, &[StackKind::Ref, StackKind::Ref], flow)?
            }
            Instr::IfNull { target, next } | Instr::IfNonNull { target, next } => {
                self.branch(target, next, &[StackKind::Ref], flow)?
            }
            Instr::Goto { target, .. } => self.goto(target, flow),
            Instr::Jsr { target, next } => self.jsr(target, next, flow),
            Instr::Ret { var } => self.ret(var, flow)?,

            Instr::TableSwitch(ref sw) => {
                self.pop_and_check(i32t)?;
                self.set_stack_vars();
                for t in sw.targets() {
                    self.propagate_state_info(t, false, flow);
                }
                self.propagate_state_info(sw.default_target(), false, flow);
            }
            Instr::LookupSwitch(ref sw) => {
                self.pop_and_check(i32t)?;
                self.set_stack_vars();
                for (_, t) in sw.targets() {
                    self.propagate_state_info(t, false, flow);
                }
                self.propagate_state_info(sw.default_target(), false, flow);
            }

            Instr::IReturn => {
                self.pop_and_check(i32t)?;
            }
            Instr::LReturn => {
                self.pop_and_check(i64t)?;
            }
            Instr::FReturn => {
                self.pop_and_check(f32t)?;
            }
            Instr::DReturn => {
                self.pop_and_check(f64t)?;
            }
            Instr::AReturn => {
                self.pop_and_check_kind(StackKind::Ref)?;
            }
            Instr::Return => {}

            Instr::GetStatic(cp) => self.get_static(cp)?,
            Instr::PutStatic(cp) => self.put_static(cp)?,
            Instr::GetField(cp) => self.get_field(cp)?,
            Instr::PutField(cp) => self.put_field(cp)?,

            Instr::InvokeVirtual(cp) => {
                let m = self.ci.get_virtual_method(self.tm, cp);
                self.invoke(m, cp, true)?;
            }
            Instr::InvokeSpecial(cp) => {
                let m = self.ci.get_special_method(self.tm, cp);
                self.invoke(m, cp, true)?;
            }
            Instr::InvokeStatic(cp) => {
                let m = self.ci.get_static_method(self.tm, cp);
                self.invoke(m, cp, false)?;
            }
            Instr::InvokeInterface { cp_index, .. } => {
                let m = self.ci.get_interface_method(self.tm, cp_index);
                self.invoke(m, cp_index, true)?;
            }

            Instr::New(cp) => {
                let ty = self.ci.get_named_type(self.tm, cp, true);
                let slot = self.state.push(ty);
                slot.flags.insert(SlotFlags::NON_NULL | SlotFlags::EXACT_TYPE);
            }
            Instr::NewArray(code) => {
                self.pop_and_check(i32t)?;
                let elem = self.new_array_elem_type(code).ok_or(
                    CompileError::StackTypeMismatch {
                        offset: self.current_offset,
                    },
                )?;
                let arr = self.tm.array_type(elem);
                let slot = self.state.push(arr);
                slot.flags.insert(SlotFlags::NON_NULL | SlotFlags::EXACT_TYPE);
            }
            Instr::ANewArray(cp) => {
                self.pop_and_check(i32t)?;
                let elem = self.ci.get_named_type(self.tm, cp, false);
                let arr = self.tm.array_type(elem);
                let slot = self.state.push(arr);
                slot.flags.insert(SlotFlags::NON_NULL | SlotFlags::EXACT_TYPE);
            }
            Instr::ArrayLength => {
                self.pop_and_check_kind(StackKind::Ref)?;
                self.push_type(i32t);
            }
            Instr::AThrow => {
                self.pop_and_check_kind(StackKind::Ref)?;
            }
            Instr::CheckCast(cp) => {
                let top = self.state.top().clone();
                let skip = matches!(top.ty, Some(t) if self.tm.is_null_object(t))
                    && top.vars.is_none();
                if !skip {
                    let ty = self.ci.get_named_type(self.tm, cp, false);
                    self.pop_and_check_kind(StackKind::Ref)?;
                    self.push_type(ty);
                }
            }
            Instr::InstanceOf(_) => {
                self.pop_type()?;
                self.push_type(i32t);
            }
            Instr::MonitorEnter | Instr::MonitorExit => {
                self.pop_and_check_kind(StackKind::Ref)?;
            }
            Instr::MultiANewArray { cp_index, dims } => {
                for _ in 0..dims {
                    self.pop_and_check(i32t)?;
                }
                let ty = self.ci.get_named_type(self.tm, cp_index, false);
                self.push_type(ty);
            }
        }
        Ok(Step::Continue)
    }
}

