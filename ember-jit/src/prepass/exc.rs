use ember_ir::InstId;
use ember_types::Ty;
use itertools::Itertools;

/// Handle of a normalized try region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatchBlockId(u32);

impl CatchBlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of one catch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

impl HandlerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A contiguous `[begin, end)` bytecode range whose exceptions dispatch to
/// an ordered handler list. After normalization regions never partially
/// overlap.
#[derive(Debug)]
pub struct CatchBlock {
    pub region_id: u32,
    pub begin: u32,
    pub end: u32,
    /// Index of the declared exception-table entry this region descends
    /// from; splits reuse their parent's index.
    pub exc_table_index: u32,
    pub handlers: Vec<HandlerId>,
    /// Label of the region's dispatch node, set during translation.
    pub dispatch_label: Option<InstId>,
}

impl CatchBlock {
    pub fn has_offset(&self, offset: u32) -> bool {
        self.begin <= offset && offset < self.end
    }

    /// True when cutting at `offset` leaves two non-empty halves.
    pub fn offset_splits(&self, offset: u32) -> bool {
        self.begin < offset && offset + 1 < self.end
    }

    pub fn same_range(&self, begin: u32, end: u32) -> bool {
        self.begin == begin && self.end == end
    }
}

/// One catch handler: entry offset, caught type, position among its
/// region's handlers.
#[derive(Debug)]
pub struct CatchHandler {
    pub region_id: u32,
    pub begin: u32,
    pub exception_ty: Ty,
    pub order: u32,
    /// Catch-label instruction, set during translation.
    pub label: Option<InstId>,
}

/// All normalized exception regions of one method.
#[derive(Debug, Default)]
pub struct ExcRegions {
    blocks: Vec<CatchBlock>,
    handlers: Vec<CatchHandler>,
    /// Region list in declared-then-split order; drives nesting checks and
    /// state attachment.
    pub table: Vec<CatchBlockId>,
    next_region_id: u32,
}

impl ExcRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: CatchBlockId) -> &CatchBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: CatchBlockId) -> &mut CatchBlock {
        &mut self.blocks[id.index()]
    }

    pub fn handler(&self, id: HandlerId) -> &CatchHandler {
        &self.handlers[id.index()]
    }

    pub fn handler_mut(&mut self, id: HandlerId) -> &mut CatchHandler {
        &mut self.handlers[id.index()]
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_region_id;
        self.next_region_id += 1;
        id
    }

    /// New region covering `[begin, end)`, inserted at `at` in table order
    /// (or appended).
    pub fn new_block(
        &mut self,
        begin: u32,
        end: u32,
        exc_table_index: u32,
        at: Option<usize>,
    ) -> CatchBlockId {
        let region_id = self.next_id();
        let id = CatchBlockId(self.blocks.len() as u32);
        self.blocks.push(CatchBlock {
            region_id,
            begin,
            end,
            exc_table_index,
            handlers: Vec::new(),
            dispatch_label: None,
        });
        match at {
            Some(i) => self.table.insert(i, id),
            None => self.table.push(id),
        }
        id
    }

    /// Append a handler to a region, assigning the next order index.
    pub fn add_handler(&mut self, block: CatchBlockId, begin: u32, exception_ty: Ty) -> HandlerId {
        let region_id = self.next_id();
        let order = self.blocks[block.index()].handlers.len() as u32;
        let id = HandlerId(self.handlers.len() as u32);
        self.handlers.push(CatchHandler {
            region_id,
            begin,
            exception_ty,
            order,
            label: None,
        });
        self.blocks[block.index()].handlers.push(id);
        id
    }

    /// Regions are properly nested once normalization is done: any two are
    /// disjoint or one contains the other. Debug builds verify this.
    pub fn check_nesting(&self) -> bool {
        self.table.iter().tuple_combinations().all(|(&a, &b)| {
            let (a, b) = (self.block(a), self.block(b));
            let disjoint = a.end <= b.begin || b.end <= a.begin;
            let a_in_b = b.begin <= a.begin && a.end <= b.end;
            let b_in_a = a.begin <= b.begin && b.end <= a.end;
            disjoint || a_in_b || b_in_a
        })
    }
}

/// Region references attached to a block-entry state, in attachment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcRef {
    Block(CatchBlockId),
    Handler(HandlerId),
}
