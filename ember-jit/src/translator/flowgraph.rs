//! Open-block management during translation and the final edge pass.

use ember_ir::{
    ControlFlowGraph, EdgeKind, InstFactory, InstId, LabelId, NodeId, NodeKind, Opcode, Payload,
};
use hashbrown::HashMap;
use tracing::debug;

use crate::prepass::{CatchBlockId, ExcRegions};

/// Builds the control-flow graph alongside translation: tracks the open
/// block, inserts expansion blocks, allocates dispatch nodes, then stitches
/// every edge once the instruction stream is complete.
#[derive(Debug)]
pub struct FlowGraphBuilder {
    cfg: ControlFlowGraph,
    current: Option<NodeId>,
    /// Innermost try region covering each block node.
    block_regions: HashMap<NodeId, CatchBlockId>,
}

impl FlowGraphBuilder {
    pub fn new() -> Self {
        Self {
            cfg: ControlFlowGraph::new(),
            current: None,
            block_regions: HashMap::new(),
        }
    }

    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    /// Finalize the current block and open a new one headed by `label`.
    pub fn gen_block(&mut self, label: InstId, factory: &mut InstFactory) -> NodeId {
        let node = self.cfg.add_block_ordered(label, factory.arena_mut());
        self.current = Some(node);
        node
    }

    /// Insert a block right after the open one in layout order (switch
    /// expansion and return epilogues).
    pub fn gen_block_after_current(&mut self, label: InstId, factory: &mut InstFactory) -> NodeId {
        let node = match self.current {
            Some(cur) => self.cfg.add_block_after(cur, label, factory.arena_mut()),
            None => self.cfg.add_block_ordered(label, factory.arena_mut()),
        };
        self.current = Some(node);
        node
    }

    pub fn create_dispatch_node(&mut self, factory: &mut InstFactory) -> (NodeId, InstId) {
        let label = factory.make_dispatch_label();
        let node = self.cfg.add_dispatch(label, factory.arena_mut());
        (node, label)
    }

    /// Remember the innermost region covering a block.
    pub fn set_block_region(&mut self, node: NodeId, region: CatchBlockId) {
        self.block_regions.entry(node).or_insert(region);
    }

    /// Compute the edge set. Blocks not ended by an explicit terminator
    /// fall through to the next block in layout order; covered blocks gain
    /// a catch edge to their region's dispatch node, which fans out to the
    /// handlers in declared order.
    pub fn build(mut self, factory: &InstFactory, regions: &ExcRegions) -> ControlFlowGraph {
        let arena = factory.arena();
        let label_nodes: HashMap<LabelId, NodeId> = self
            .cfg
            .nodes()
            .filter_map(|n| {
                arena
                    .inst(self.cfg.node(n).label)
                    .label_id()
                    .map(|l| (l, n))
            })
            .collect();
        let node_of = |l: LabelId| -> NodeId {
            *label_nodes.get(&l).expect("branch to an unplaced label")
        };

        let layout: Vec<NodeId> = self.cfg.layout().to_vec();
        for (i, &node) in layout.iter().enumerate() {
            let next = layout.get(i + 1).copied();
            let last = self.cfg.last_inst(node, arena);
            let last_inst = arena.inst(last);
            match (last_inst.op, &last_inst.payload) {
                (Opcode::Jump, Payload::Branch { target })
                | (Opcode::Jsr, Payload::Branch { target }) => {
                    self.cfg.add_edge(node, node_of(*target), EdgeKind::Unconditional);
                }
                (Opcode::Branch, Payload::Branch { target }) => {
                    self.cfg.add_edge(node, node_of(*target), EdgeKind::True);
                    if let Some(next) = next {
                        self.cfg.add_edge(node, next, EdgeKind::False);
                    }
                }
                (Opcode::Switch, Payload::Switch { targets, default }) => {
                    for &t in targets.iter() {
                        self.cfg.add_edge(node, node_of(t), EdgeKind::True);
                    }
                    self.cfg.add_edge(node, node_of(*default), EdgeKind::False);
                }
                (Opcode::Return, _)
                | (Opcode::Throw, _)
                | (Opcode::ThrowSystemException, _)
                | (Opcode::ThrowLinkingException, _)
                // a `ret` transfers through its address; the JSR inline
                // pass adds the real edges later
                | (Opcode::Ret, _) => {}
                _ => {
                    // fall-through, pseudo-throw included
                    if let Some(next) = next {
                        self.cfg.add_edge(node, next, EdgeKind::Unconditional);
                    }
                }
            }
        }

        // exception edges: block -> dispatch -> handlers, innermost first
        for (&node, &region) in &self.block_regions {
            let block = regions.block(region);
            let dispatch_label = match block.dispatch_label {
                Some(l) => l,
                None => continue,
            };
            let dispatch = arena.inst(dispatch_label).node().expect("dispatch placed");
            debug_assert_eq!(self.cfg.node(dispatch).kind, NodeKind::Dispatch);
            self.cfg.add_edge(node, dispatch, EdgeKind::Catch);
        }
        for &region_id in &regions.table {
            let block = regions.block(region_id);
            let dispatch_label = match block.dispatch_label {
                Some(l) => l,
                None => continue,
            };
            let dispatch = arena.inst(dispatch_label).node().expect("dispatch placed");
            for &h in &block.handlers {
                let handler = regions.handler(h);
                if let Some(label) = handler.label {
                    if let Some(target) = arena.inst(label).node() {
                        self.cfg.add_edge(dispatch, target, EdgeKind::True);
                    }
                }
            }
            // unmatched exceptions propagate to the enclosing region
            if let Some(outer) = enclosing_region(regions, region_id) {
                if let Some(outer_label) = regions.block(outer).dispatch_label {
                    if let Some(outer_node) = arena.inst(outer_label).node() {
                        self.cfg.add_edge(dispatch, outer_node, EdgeKind::Exception);
                    }
                }
            }
        }
        debug!(
            nodes = self.cfg.num_nodes(),
            blocks = self.cfg.layout().len(),
            "flow graph built"
        );
        self.cfg
    }
}

impl Default for FlowGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest region strictly containing `inner`.
fn enclosing_region(regions: &ExcRegions, inner: CatchBlockId) -> Option<CatchBlockId> {
    let b = regions.block(inner);
    regions
        .table
        .iter()
        .copied()
        .filter(|&o| {
            let ob = regions.block(o);
            o != inner
                && ob.begin <= b.begin
                && b.end <= ob.end
                && (ob.begin, ob.end) != (b.begin, b.end)
        })
        .min_by_key(|&o| {
            let ob = regions.block(o);
            ob.end - ob.begin
        })
}
