use crate::{InstId, IrArena, Opcode};

/// Node handle into a [`ControlFlowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Ordinary block: a label followed by instructions.
    Block,
    /// Exception-propagation merge point; carries only its label.
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Unconditional,
    /// Branch taken / switch case matched / handler matched.
    True,
    /// Branch fall-through / switch default / handler not matched.
    False,
    /// Block to its covering dispatch node.
    Catch,
    /// Unhandled propagation out of a dispatch node.
    Exception,
}

/// One CFG node. Its instruction list is the intrusive chain hanging off
/// `label` in the arena.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub label: InstId,
    succs: Vec<(NodeId, EdgeKind)>,
}

impl Node {
    pub fn succs(&self) -> &[(NodeId, EdgeKind)] {
        &self.succs
    }
}

/// Rooted directed graph of block and dispatch nodes.
///
/// Block nodes keep a layout order (the order blocks were opened, with
/// explicit after-current insertion for expansion blocks); fall-through
/// edges follow it.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    nodes: Vec<Node>,
    layout: Vec<NodeId>,
    entry: Option<NodeId>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Block nodes in layout order; dispatch nodes are not laid out.
    pub fn layout(&self) -> &[NodeId] {
        &self.layout
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    fn push_node(&mut self, kind: NodeKind, label: InstId, arena: &mut IrArena) -> NodeId {
        debug_assert!(arena.inst(label).op.is_label());
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            label,
            succs: Vec::new(),
        });
        arena.inst_mut(label).node = Some(id);
        id
    }

    /// Append a block at the end of the layout.
    pub fn add_block_ordered(&mut self, label: InstId, arena: &mut IrArena) -> NodeId {
        let id = self.push_node(NodeKind::Block, label, arena);
        self.layout.push(id);
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Insert a block immediately after `after` in layout order.
    pub fn add_block_after(&mut self, after: NodeId, label: InstId, arena: &mut IrArena) -> NodeId {
        let id = self.push_node(NodeKind::Block, label, arena);
        let at = self
            .layout
            .iter()
            .position(|&n| n == after)
            .expect("after-node not in layout");
        self.layout.insert(at + 1, id);
        id
    }

    pub fn add_dispatch(&mut self, label: InstId, arena: &mut IrArena) -> NodeId {
        debug_assert_eq!(arena.inst(label).op, Opcode::DispatchLabel);
        self.push_node(NodeKind::Dispatch, label, arena)
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        debug_assert!(
            kind != EdgeKind::Catch || self.node(to).kind == NodeKind::Dispatch,
            "catch edges end at dispatch nodes"
        );
        let succs = &mut self.nodes[from.index()].succs;
        if !succs.contains(&(to, kind)) {
            succs.push((to, kind));
        }
    }

    /// Last instruction of a node's chain.
    pub fn last_inst(&self, id: NodeId, arena: &IrArena) -> InstId {
        arena.chain_tail(self.node(id).label)
    }

    /// Number of instructions in a node, label included.
    pub fn node_len(&self, id: NodeId, arena: &IrArena) -> usize {
        arena.chain(self.node(id).label).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstFactory;
    use ember_types::TypeManager;

    #[test]
    fn layout_insertion() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let mut cfg = ControlFlowGraph::new();
        let a = f.make_label();
        let b = f.make_label();
        let c = f.make_label();
        let na = cfg.add_block_ordered(a, f.arena_mut());
        let nb = cfg.add_block_ordered(b, f.arena_mut());
        let nc = cfg.add_block_after(na, c, f.arena_mut());
        assert_eq!(cfg.layout(), &[na, nc, nb]);
        assert_eq!(cfg.entry(), Some(na));
        assert_eq!(f.arena().inst(c).node(), Some(nc));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        let mut cfg = ControlFlowGraph::new();
        let a = f.make_label();
        let b = f.make_label();
        let na = cfg.add_block_ordered(a, f.arena_mut());
        let nb = cfg.add_block_ordered(b, f.arena_mut());
        cfg.add_edge(na, nb, EdgeKind::True);
        cfg.add_edge(na, nb, EdgeKind::True);
        cfg.add_edge(na, nb, EdgeKind::False);
        assert_eq!(cfg.node(na).succs().len(), 2);
    }
}
