use ember_types::Ty;

use crate::{DataId, Inst, InstId, Opnd, OpndId, OpndKind};

/// Per-compilation owner of every instruction, operand and data blob.
///
/// Everything is held by value in flat vectors and addressed by typed ids;
/// cross-references between instructions and operands are ids resolved
/// through the arena, so the object graph has no owning cycles. Dropping
/// the arena frees the whole compilation in one pass.
#[derive(Debug)]
pub struct IrArena {
    insts: Vec<Inst>,
    opnds: Vec<Opnd>,
    data: Vec<Box<[u8]>>,
}

impl IrArena {
    pub fn new(void_ty: Ty) -> Self {
        let mut arena = Self {
            insts: Vec::with_capacity(64),
            opnds: Vec::with_capacity(64),
            data: Vec::new(),
        };
        // the shared sentinel destination of void-result instructions
        arena.opnds.push(Opnd {
            id: OpndId::NULL,
            ty: void_ty,
            kind: OpndKind::Null,
            def: None,
        });
        arena
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn num_opnds(&self) -> usize {
        self.opnds.len()
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    pub fn opnd(&self, id: OpndId) -> &Opnd {
        &self.opnds[id.index()]
    }

    pub fn opnd_mut(&mut self, id: OpndId) -> &mut Opnd {
        &mut self.opnds[id.index()]
    }

    pub(crate) fn push_inst(&mut self, inst: Inst) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    pub(crate) fn push_opnd(&mut self, mut opnd: Opnd) -> OpndId {
        let id = OpndId(self.opnds.len() as u32);
        opnd.id = id;
        self.opnds.push(opnd);
        id
    }

    pub fn intern_data(&mut self, bytes: Box<[u8]>) -> DataId {
        let id = DataId(self.data.len() as u32);
        self.data.push(bytes);
        id
    }

    pub fn data(&self, id: DataId) -> &[u8] {
        &self.data[id.index()]
    }

    //
    // intrusive instruction chains
    //

    /// Append `inst` directly after `prev` in its chain.
    pub fn link_after(&mut self, prev: InstId, inst: InstId) {
        debug_assert_ne!(prev, inst);
        let old_next = self.inst(prev).next;
        self.inst_mut(prev).next = Some(inst);
        let i = self.inst_mut(inst);
        i.prev = Some(prev);
        i.next = old_next;
        if let Some(n) = old_next {
            self.inst_mut(n).prev = Some(inst);
        }
    }

    /// Insert `inst` directly before `next` in its chain.
    pub fn link_before(&mut self, next: InstId, inst: InstId) {
        let old_prev = self.inst(next).prev.expect("cannot insert before a chain head");
        self.link_after(old_prev, inst);
    }

    /// Last instruction of the chain starting at `head`.
    pub fn chain_tail(&self, head: InstId) -> InstId {
        let mut cur = head;
        while let Some(next) = self.inst(cur).next {
            cur = next;
        }
        cur
    }

    /// Walk a chain from `head` inclusive.
    pub fn chain(&self, head: InstId) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            cur: Some(head),
        }
    }
}

/// Forward iterator over an instruction chain.
pub struct ChainIter<'a> {
    arena: &'a IrArena,
    cur: Option<InstId>,
}

impl Iterator for ChainIter<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<InstId> {
        let cur = self.cur?;
        self.cur = self.arena.inst(cur).next;
        Some(cur)
    }
}
