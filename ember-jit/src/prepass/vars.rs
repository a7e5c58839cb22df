use ember_ir::{InstFactory, OpndId, OpndKind};
use ember_types::{Ty, TypeManager};

/// Handle of one variable incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarIncId(u32);

impl VarIncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One definition of a named local slot: where it was defined, its declared
/// type, and the lazily materialized operand. Incarnations merged at
/// control-flow joins are linked into a chain that shares one declared type
/// and one operand.
#[derive(Debug)]
struct VarInc {
    /// Defining bytecode offset, `-1` once multiple definitions merge.
    defining_offset: i64,
    declared_ty: Ty,
    opnd: Option<OpndId>,
    prev: Option<VarIncId>,
    next: Option<VarIncId>,
}

/// Store of every incarnation created by the prepass.
#[derive(Debug, Default)]
pub struct VarIncs {
    incs: Vec<VarInc>,
}

impl VarIncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, offset: u32, ty: Ty) -> VarIncId {
        let id = VarIncId(self.incs.len() as u32);
        self.incs.push(VarInc {
            defining_offset: offset as i64,
            declared_ty: ty,
            opnd: None,
            prev: None,
            next: None,
        });
        id
    }

    pub fn declared_ty(&self, id: VarIncId) -> Ty {
        self.incs[id.index()].declared_ty
    }

    pub fn set_declared_ty(&mut self, id: VarIncId, ty: Ty) {
        self.incs[id.index()].declared_ty = ty;
    }

    pub fn set_multiple_defs(&mut self, id: VarIncId) {
        self.incs[id.index()].defining_offset = -1;
    }

    pub fn has_multiple_defs(&self, id: VarIncId) -> bool {
        self.incs[id.index()].defining_offset < 0
    }

    pub fn opnd(&self, id: VarIncId) -> Option<OpndId> {
        self.incs[id.index()].opnd
    }

    fn chain_head(&self, id: VarIncId) -> VarIncId {
        let mut cur = id;
        while let Some(prev) = self.incs[cur.index()].prev {
            cur = prev;
        }
        cur
    }

    fn chain_tail(&self, id: VarIncId) -> VarIncId {
        let mut cur = id;
        while let Some(next) = self.incs[cur.index()].next {
            cur = next;
        }
        cur
    }

    /// Every member of `id`'s chain, head first.
    pub fn chain(&self, id: VarIncId) -> Vec<VarIncId> {
        let mut out = Vec::new();
        let mut cur = Some(self.chain_head(id));
        while let Some(c) = cur {
            out.push(c);
            cur = self.incs[c.index()].next;
        }
        out
    }

    fn same_chain(&self, a: VarIncId, b: VarIncId) -> bool {
        self.chain_head(a) == self.chain_head(b)
    }

    /// Link two chains into one. No-op when already linked.
    pub fn link(&mut self, a: VarIncId, b: VarIncId) {
        if self.same_chain(a, b) {
            return;
        }
        let tail = self.chain_tail(a);
        let head = self.chain_head(b);
        self.incs[tail.index()].next = Some(head);
        self.incs[head.index()].prev = Some(tail);
        // a chain shares one materialized operand
        let opnd = self
            .chain(a)
            .into_iter()
            .find_map(|c| self.incs[c.index()].opnd);
        if let Some(op) = opnd {
            self.set_chain_opnd(a, op);
        }
    }

    /// Assign a declared type to every member of the chain.
    pub fn set_common_type(&mut self, id: VarIncId, ty: Ty) {
        for c in self.chain(id) {
            self.incs[c.index()].declared_ty = ty;
        }
    }

    /// Join the declared types of the whole chain and assign the result.
    pub fn merge_chain(&mut self, id: VarIncId, tm: &mut TypeManager) {
        let members = self.chain(id);
        let mut common = self.incs[members[0].index()].declared_ty;
        for &m in &members[1..] {
            let ty = self.incs[m.index()].declared_ty;
            common = match tm.common_type(common, ty) {
                Some(t) => t,
                // incompatible only for untyped merges the state table
                // already rejected; keep the first type
                None => common,
            };
        }
        for m in members {
            self.incs[m.index()].declared_ty = common;
        }
    }

    /// Link two chains and give them a joined declared type.
    pub fn link_and_merge(&mut self, a: VarIncId, b: VarIncId, tm: &mut TypeManager) {
        self.link(a, b);
        self.merge_chain(a, tm);
    }

    fn set_chain_opnd(&mut self, id: VarIncId, opnd: OpndId) {
        for c in self.chain(id) {
            self.incs[c.index()].opnd = Some(opnd);
        }
    }

    /// Record a single-definition value directly; loads then reuse it
    /// without materializing a variable.
    pub fn set_tmp_opnd(&mut self, id: VarIncId, opnd: OpndId) {
        debug_assert!(!self.has_multiple_defs(id));
        self.set_chain_opnd(id, opnd);
    }

    /// Operand for the chain, creating a variable operand on first use.
    pub fn get_or_create_opnd(&mut self, id: VarIncId, factory: &mut InstFactory) -> OpndId {
        if let Some(op) = self.incs[id.index()].opnd {
            return op;
        }
        let ty = self.incs[id.index()].declared_ty;
        let var = factory.create_var(ty, false);
        self.set_chain_opnd(id, var);
        var
    }

    /// Materialize variable operands for every incarnation that collected
    /// multiple definitions; single-definition temporaries stay as they
    /// are.
    pub fn create_multiple_def_opnds(&mut self, factory: &mut InstFactory) {
        for i in 0..self.incs.len() {
            let id = VarIncId(i as u32);
            if !self.has_multiple_defs(id) {
                continue;
            }
            let needs_var = match self.incs[i].opnd {
                None => true,
                Some(op) => !matches!(
                    factory.arena().opnd(op).kind,
                    OpndKind::Var { .. }
                ),
            };
            if needs_var {
                let ty = self.incs[i].declared_ty;
                let var = factory.create_var(ty, false);
                self.set_chain_opnd(id, var);
            }
        }
    }
}

/// Incarnation list attached to one stack or local slot at one offset.
///
/// The first entry is the primary incarnation loads resolve through;
/// merging at joins appends any novel incarnations and reports whether the
/// list changed so the offset can be re-queued.
#[derive(Debug, Clone)]
pub struct SlotVar {
    entries: Vec<(VarIncId, u32)>,
}

impl SlotVar {
    pub fn new(primary: VarIncId) -> Self {
        Self {
            entries: vec![(primary, 0)],
        }
    }

    pub fn primary(&self) -> VarIncId {
        self.entries[0].0
    }

    pub fn entries(&self) -> &[(VarIncId, u32)] {
        &self.entries
    }

    /// Append any incarnation of `other` not already present, recording the
    /// merge offset for diagnostics. True when the list grew.
    pub fn add_incarnations(&mut self, other: &SlotVar, link_offset: u32) -> bool {
        let mut added = false;
        for &(inc, _) in &other.entries {
            if !self.entries.iter().any(|&(have, _)| have == inc) {
                self.entries.push((inc, link_offset));
                added = true;
            }
        }
        added
    }

    /// Collapse the listed incarnations into a single chain sharing a
    /// joined declared type.
    pub fn merge_incarnations(&mut self, incs: &mut VarIncs, tm: &mut TypeManager) {
        let primary = self.primary();
        for &(inc, _) in &self.entries[1..] {
            incs.link(primary, inc);
        }
        incs.merge_chain(primary, tm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::{ClassInfo, TypeManager};

    #[test]
    fn chains_share_type_and_opnd() {
        let mut tm = TypeManager::new(false);
        let base = tm.register_class(ClassInfo::resolved("Base", 1));
        let left = tm.register_class(ClassInfo::resolved("Left", 2).with_super(base));
        let base_ty = tm.object_type(base);
        let left_ty = tm.object_type(left);

        let mut incs = VarIncs::new();
        let a = incs.create(0, left_ty);
        let b = incs.create(8, base_ty);
        incs.link_and_merge(a, b, &mut tm);
        assert_eq!(incs.declared_ty(a), base_ty);
        assert_eq!(incs.declared_ty(b), base_ty);

        let mut factory = InstFactory::new(&tm);
        let op = incs.get_or_create_opnd(b, &mut factory);
        assert_eq!(incs.opnd(a), Some(op));
    }

    #[test]
    fn slot_var_dedups_by_identity() {
        let mut tm = TypeManager::new(false);
        let i32t = tm.int32_type();
        let mut incs = VarIncs::new();
        let a = incs.create(0, i32t);
        let b = incs.create(4, i32t);

        let mut sv = SlotVar::new(a);
        let other = SlotVar::new(b);
        assert!(sv.add_incarnations(&other, 12));
        assert!(!sv.add_incarnations(&other, 16));
        assert_eq!(sv.entries().len(), 2);
        assert_eq!(sv.primary(), a);
    }

    #[test]
    fn multiple_def_incarnations_get_vars() {
        let tm = TypeManager::new(false);
        let mut incs = VarIncs::new();
        let single = incs.create(0, tm.int32_type());
        let multi = incs.create(4, tm.int32_type());
        incs.set_multiple_defs(multi);

        let mut factory = InstFactory::new(&tm);
        incs.create_multiple_def_opnds(&mut factory);
        assert!(incs.opnd(single).is_none());
        let var = incs.opnd(multi).unwrap();
        assert!(factory.arena().opnd(var).is_var());
    }
}
