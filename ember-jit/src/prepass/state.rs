use bitflags::bitflags;
use ember_bytecode::FlowInfo;
use ember_types::{Ty, TypeManager};
use hashbrown::HashMap;
use tracing::trace;

use super::exc::{ExcRef, ExcRegions};
use super::vars::{SlotVar, VarIncs};

bitflags! {
    /// Per-slot facts tracked by the prepass.
    pub struct SlotFlags: u16 {
        const VAR_NUMBER_SET   = 0x01;
        const NON_NULL         = 0x02;
        const EXACT_TYPE       = 0x04;
        const CHANGE_STATE     = 0x08;
        /// Stack value consumed by a real use, not only spilled.
        const STACK_OPND_ALIVE = 0x10;
        const STACK_OPND_SAVED = 0x20;
    }
}

bitflags! {
    /// Per-block-entry facts.
    pub struct StateFlags: u8 {
        const CATCH_LABEL      = 0x01;
        const SUBROUTINE_ENTRY = 0x02;
        const FALL_THROUGH     = 0x04;
        const VISITED          = 0x08;
    }
}

/// Modeled content of one local or operand-stack slot.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub ty: Option<Ty>,
    pub var_number: u32,
    pub flags: SlotFlags,
    pub vars: Option<SlotVar>,
    /// Subroutine entry offset when this slot holds a return address.
    pub jsr_label_offset: u32,
}

impl Default for SlotInfo {
    fn default() -> Self {
        Self {
            ty: None,
            var_number: 0,
            flags: SlotFlags::empty(),
            vars: None,
            jsr_label_offset: 0,
        }
    }
}

impl SlotInfo {
    pub fn of_type(ty: Ty) -> Self {
        Self {
            ty: Some(ty),
            ..Self::default()
        }
    }

    pub fn set_var_number(&mut self, n: u32) {
        self.var_number = n;
        self.flags.insert(SlotFlags::VAR_NUMBER_SET);
    }

    pub fn is_non_null(&self) -> bool {
        self.flags.contains(SlotFlags::NON_NULL)
    }

    pub fn is_exact_type(&self) -> bool {
        self.flags.contains(SlotFlags::EXACT_TYPE)
    }
}

/// Typed model of locals and operand stack at one point.
///
/// Slots `0..num_vars` are the local array; the operand stack grows above
/// it, so `stack_depth` counts both.
#[derive(Debug, Clone, Default)]
pub struct StateInfo {
    pub flags: StateFlags,
    pub stack_depth: u32,
    pub stack: Vec<SlotInfo>,
    pub exceptions: Vec<ExcRef>,
}

impl Default for StateFlags {
    fn default() -> Self {
        StateFlags::empty()
    }
}

impl StateInfo {
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            flags: StateFlags::empty(),
            stack_depth: 0,
            stack: vec![SlotInfo::default(); slots],
            exceptions: Vec::new(),
        }
    }

    pub fn is_catch_label(&self) -> bool {
        self.flags.contains(StateFlags::CATCH_LABEL)
    }

    pub fn is_subroutine_entry(&self) -> bool {
        self.flags.contains(StateFlags::SUBROUTINE_ENTRY)
    }

    pub fn is_fall_through_label(&self) -> bool {
        self.flags.contains(StateFlags::FALL_THROUGH)
    }

    fn ensure_slot(&mut self, i: usize) -> &mut SlotInfo {
        if self.stack.len() <= i {
            self.stack.resize_with(i + 1, SlotInfo::default);
        }
        &mut self.stack[i]
    }

    /// Push a type onto the modeled operand stack.
    pub fn push(&mut self, ty: Ty) -> &mut SlotInfo {
        let depth = self.stack_depth as usize;
        self.stack_depth += 1;
        let slot = self.ensure_slot(depth);
        *slot = SlotInfo::of_type(ty);
        slot
    }

    pub fn push_slot(&mut self, slot: SlotInfo) {
        let depth = self.stack_depth as usize;
        self.stack_depth += 1;
        let dst = self.ensure_slot(depth);
        *dst = slot;
        dst.jsr_label_offset = 0;
    }

    pub fn top(&mut self) -> &mut SlotInfo {
        let depth = self.stack_depth as usize;
        &mut self.stack[depth - 1]
    }

    /// Kill every slot still holding a return address of the subroutine
    /// entered at `entry`; the subroutine is done with them.
    pub fn clean_finally_info(&mut self, entry: u32) {
        for slot in &mut self.stack[..self.stack_depth as usize] {
            if slot.jsr_label_offset == entry {
                *slot = SlotInfo::default();
            }
        }
    }
}

/// Recorded block-entry states keyed by bytecode offset, plus the merge
/// rules applied when several paths reach one offset.
#[derive(Debug)]
pub struct StateTable {
    states: HashMap<u32, StateInfo>,
    max_depth: u32,
    num_vars: u32,
}

impl StateTable {
    pub fn new(num_vars: u32, num_stack: u32) -> Self {
        Self {
            states: HashMap::new(),
            max_depth: num_vars + num_stack,
            num_vars,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn get(&self, offset: u32) -> Option<&StateInfo> {
        self.states.get(&offset)
    }

    pub fn get_mut(&mut self, offset: u32) -> Option<&mut StateInfo> {
        self.states.get_mut(&offset)
    }

    /// Ensure a state exists at `offset`; optionally seed its stack depth.
    pub fn create(&mut self, offset: u32, stack_depth: Option<u32>) -> &mut StateInfo {
        let state = self.states.entry(offset).or_default();
        if let Some(depth) = stack_depth {
            if state.stack.is_empty() {
                state.stack = vec![SlotInfo::default(); depth as usize + 1];
                state.stack_depth = depth;
            }
        }
        state
    }

    /// Merge the working state into the recorded state at a successor
    /// offset. Any strict change re-queues the offset via `flow`.
    pub fn set_state_info(
        &mut self,
        in_state: &StateInfo,
        offset: u32,
        is_fall_thru: bool,
        vars_only: bool,
        regions: &ExcRegions,
        incs: &mut VarIncs,
        tm: &mut TypeManager,
        flow: &mut FlowInfo,
    ) {
        trace!(offset, depth = in_state.stack_depth, "merge state");
        let state = self.states.entry(offset).or_default();
        if is_fall_thru && !state.flags.contains(StateFlags::VISITED) {
            state.flags.insert(StateFlags::FALL_THROUGH);
        } else if !is_fall_thru {
            state.flags.remove(StateFlags::FALL_THROUGH);
        }

        self.set_stack_info(in_state, offset, true, !vars_only, incs, tm, flow);

        let state = self.states.get_mut(&offset).expect("state just created");
        if !state.flags.contains(StateFlags::VISITED) {
            state.flags.insert(StateFlags::VISITED);
            // attach every region covering this offset, once, in table order
            for &block_id in &regions.table {
                if regions.block(block_id).has_offset(offset) {
                    let r = ExcRef::Block(block_id);
                    if !state.exceptions.contains(&r) {
                        state.exceptions.push(r);
                    }
                }
            }
        }
    }

    /// Slot-wise merge of `in_state` into the recorded state.
    pub fn set_stack_info(
        &mut self,
        in_state: &StateInfo,
        offset: u32,
        include_vars: bool,
        include_stack: bool,
        incs: &mut VarIncs,
        tm: &mut TypeManager,
        flow: &mut FlowInfo,
    ) {
        let depth = in_state.stack_depth;
        if depth == 0 {
            return;
        }
        if self.max_depth < depth {
            self.max_depth = depth;
        }
        let num_vars = self.num_vars;
        let from = if include_vars { 0 } else { num_vars } as usize;
        let to = if include_stack { depth } else { num_vars } as usize;

        let state = self.states.get_mut(&offset).expect("state must exist");
        let visited = state.flags.contains(StateFlags::VISITED);
        if state.stack.is_empty() {
            state.stack = vec![SlotInfo::default(); depth as usize + 1];
            for i in from..to {
                state.stack[i] = in_state.stack[i].clone();
            }
            state.stack_depth = to as u32;
            return;
        }

        let recorded_depth = state.stack_depth as usize;
        if state.stack.len() < to {
            state.stack.resize_with(to, SlotInfo::default);
        }
        for i in from..to {
            let in_slot = &in_state.stack[i];
            let slot = &mut state.stack[i];
            if i < recorded_depth {
                merge_slots(slot, in_slot, visited, offset, i < num_vars as usize, incs, tm, flow);
            } else {
                rewrite_slots(slot, in_slot, offset, i < num_vars as usize, incs, tm);
            }
        }
        if include_stack {
            let state = self.states.get_mut(&offset).unwrap();
            if (state.stack_depth as usize) < depth as usize {
                state.stack_depth = depth;
                flow.mark_unvisited(offset);
            }
        }
    }

    /// Propagation from a subroutine's `ret` to the instruction following
    /// its `jsr`: objects defined inside the subroutine become live at the
    /// return-to offset, so empty recorded slots are rewritten rather than
    /// merged.
    pub fn set_state_from_finally(
        &mut self,
        in_state: &StateInfo,
        offset: u32,
        incs: &mut VarIncs,
        tm: &mut TypeManager,
        flow: &mut FlowInfo,
    ) {
        let depth = in_state.stack_depth;
        if depth == 0 {
            return;
        }
        if self.max_depth < depth {
            self.max_depth = depth;
        }
        let num_vars = self.num_vars as usize;
        let state = self.states.entry(offset).or_default();
        let visited = state.flags.contains(StateFlags::VISITED);
        if state.stack.len() < depth as usize {
            state.stack.resize_with(depth as usize, SlotInfo::default);
        }
        state.stack_depth = depth;
        for i in 0..depth as usize {
            let in_slot = &in_state.stack[i];
            let slot = &mut state.stack[i];
            match (slot.ty, in_slot.ty) {
                (None, Some(_)) => {
                    rewrite_slots(slot, in_slot, offset, i < num_vars, incs, tm);
                    flow.mark_unvisited(offset);
                }
                (_, None) => continue,
                _ => merge_slots(slot, in_slot, visited, offset, i < num_vars, incs, tm, flow),
            }
        }
    }

    /// Merge one local slot into the state recorded at `offset` (used to
    /// keep handler entry states current while walking their try region).
    pub fn merge_local_slot(
        &mut self,
        in_slot: &SlotInfo,
        offset: u32,
        index: u32,
        incs: &mut VarIncs,
        tm: &mut TypeManager,
        flow: &mut FlowInfo,
    ) {
        let num_vars = self.num_vars as usize;
        if let Some(state) = self.states.get_mut(&offset) {
            let visited = state.flags.contains(StateFlags::VISITED);
            if state.stack.len() <= index as usize {
                state.stack.resize_with(index as usize + 1, SlotInfo::default);
            }
            merge_slots(
                &mut state.stack[index as usize],
                in_slot,
                visited,
                offset,
                (index as usize) < num_vars,
                incs,
                tm,
                flow,
            );
        }
    }

    /// Copy the recorded state at `offset` back into the working state.
    pub fn restore(&self, working: &mut StateInfo, offset: u32) {
        let state = self
            .states
            .get(&offset)
            .expect("restore at an offset with no recorded state");
        debug_assert!(!state.stack.is_empty() || state.stack_depth == 0);
        working.flags = state.flags;
        working.stack_depth = state.stack_depth;
        for i in 0..state.stack_depth as usize {
            working.ensure_slot(i);
            working.stack[i] = state.stack[i].clone();
        }
        working.exceptions = state.exceptions.clone();
    }
}

/// Merge one incoming slot into a recorded slot.
#[allow(clippy::too_many_arguments)]
fn merge_slots(
    slot: &mut SlotInfo,
    in_slot: &SlotInfo,
    state_visited: bool,
    offset: u32,
    is_var: bool,
    incs: &mut VarIncs,
    tm: &mut TypeManager,
    flow: &mut FlowInfo,
) {
    if !state_visited && slot.ty.is_none() && slot.vars.is_none() {
        // first visit: copy verbatim
        *slot = in_slot.clone();
        return;
    }

    slot.jsr_label_offset = in_slot.jsr_label_offset;
    slot.flags &= in_slot.flags;

    // a slot tracked with vars on one path and without on the other dies
    if slot.vars.is_some() != in_slot.vars.is_some() {
        let had_type = slot.ty.is_some();
        slot.ty = None;
        slot.vars = None;
        if had_type {
            flow.mark_unvisited(offset);
        }
        return;
    }

    let (in_ty, ty) = match (in_slot.ty, slot.ty) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            debug_assert!(slot.vars.is_none() && in_slot.vars.is_none());
            if slot.ty.is_some() {
                flow.mark_unvisited(offset);
            }
            slot.ty = None;
            return;
        }
    };

    match tm.common_type(in_ty, ty) {
        Some(new_ty) => {
            if let (Some(vars), Some(in_vars)) = (&mut slot.vars, &in_slot.vars) {
                if vars.add_incarnations(in_vars, offset) {
                    flow.mark_unvisited(offset);
                }
                if !is_var {
                    vars.merge_incarnations(incs, tm);
                }
            }
            slot.ty = Some(new_ty);
            if ty != new_ty {
                flow.mark_unvisited(offset);
            }
        }
        None => {
            slot.vars = None;
            slot.ty = None;
            flow.mark_unvisited(offset);
        }
    }
}

/// Overwrite a recorded slot beyond the previously recorded depth.
fn rewrite_slots(
    slot: &mut SlotInfo,
    in_slot: &SlotInfo,
    offset: u32,
    is_var: bool,
    incs: &mut VarIncs,
    tm: &mut TypeManager,
) {
    slot.ty = in_slot.ty;
    if let Some(in_vars) = &in_slot.vars {
        match &mut slot.vars {
            Some(vars) => {
                vars.add_incarnations(in_vars, offset);
            }
            None => {
                let mut vars = SlotVar::new(in_vars.primary());
                vars.add_incarnations(in_vars, offset);
                slot.vars = Some(vars);
            }
        }
        if !is_var {
            if let Some(vars) = &mut slot.vars {
                vars.merge_incarnations(incs, tm);
            }
        }
    }
    slot.flags = in_slot.flags;
    slot.jsr_label_offset = in_slot.jsr_label_offset;
}
