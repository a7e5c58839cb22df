use std::collections::VecDeque;

use crate::{instruction_length, BitSet, BytecodeError, Instr};

/// What a visitor asks the driver to do after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Advance to the next instruction as usual.
    Continue,
    /// Advance, then skip the given number of extra bytes beyond the
    /// instruction's own encoding. Used when a visitor absorbs a following
    /// pattern itself (array-initializer recognition).
    Skip(u32),
}

/// How the driver walks the method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// One sweep in layout order. The translator runs in this mode and
    /// skips opcodes the prepass never reached.
    Linear,
    /// Layout order until the first unconditional transfer, then a worklist
    /// of branch targets. The prepass runs in this mode; merges at joins may
    /// re-queue offsets by clearing their visited bit.
    Flow,
}

/// Worklist state shared between the driver and a flow-mode visitor.
///
/// `visited` marks label offsets whose recorded state is up to date; the
/// driver only pops unvisited offsets, and the visitor clears bits whenever
/// a merge changes recorded state. `code_visited` marks every opcode offset
/// reached by any path and outlives the pass (the translator consults it to
/// skip dead code).
#[derive(Debug)]
pub struct FlowInfo {
    queue: VecDeque<u32>,
    pub visited: BitSet,
    pub code_visited: BitSet,
    /// True when the current offset was reached by a worklist pop rather
    /// than by falling through from the previous instruction. Visitors use
    /// this to choose between restoring recorded state and merging the
    /// flowing state.
    pub linear_done: bool,
}

impl FlowInfo {
    pub fn new(code_len: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            visited: BitSet::new(code_len),
            code_visited: BitSet::new(code_len),
            linear_done: false,
        }
    }

    /// Queue an offset for a later flow-mode visit.
    pub fn push(&mut self, offset: u32) {
        self.queue.push_back(offset);
    }

    /// Force `offset` to be re-processed when next popped.
    pub fn mark_unvisited(&mut self, offset: u32) {
        self.visited.set(offset as usize, false);
    }

    pub fn mark_visited(&mut self, offset: u32) {
        self.visited.set(offset as usize, true);
    }

    pub fn is_visited(&self, offset: u32) -> bool {
        self.visited.get(offset as usize)
    }

    /// Restart the whole walk from the method entry with merge state kept.
    pub fn restart(&mut self) {
        self.visited.clear();
        self.queue.push_back(0);
    }

    fn pop_unvisited(&mut self) -> Option<u32> {
        while let Some(offset) = self.queue.pop_front() {
            if !self.visited.get(offset as usize) {
                return Some(offset);
            }
        }
        None
    }
}

/// Receiver for decoded instructions, one call per reached opcode per pass.
pub trait BytecodeVisitor {
    /// Error type surfaced out of [`Parser::parse`].
    type Error: From<BytecodeError>;

    fn parse_init(&mut self) {}

    fn parse_done(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// A visitor constructed in a poisoned state (unresolvable handler
    /// types) can opt out of the walk entirely.
    fn skip_parsing(&self) -> bool {
        false
    }

    fn visit(&mut self, pc: u32, instr: &Instr<'_>, flow: &mut FlowInfo)
        -> Result<Step, Self::Error>;
}

/// Drives a [`BytecodeVisitor`] over a method body.
///
/// The parser owns byte-level decoding; visitors only ever see [`Instr`]
/// values. Both translation passes share one parser so each visits every
/// reachable opcode exactly once.
#[derive(Debug, Clone, Copy)]
pub struct Parser<'a> {
    code: &'a [u8],
}

impl<'a> Parser<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code }
    }

    pub fn code(&self) -> &'a [u8] {
        self.code
    }

    pub fn parse<V: BytecodeVisitor>(
        &self,
        visitor: &mut V,
        mode: PassMode,
        flow: &mut FlowInfo,
    ) -> Result<(), V::Error> {
        visitor.parse_init();
        if visitor.skip_parsing() {
            return visitor.parse_done();
        }

        let mut pc = 0u32;
        while (pc as usize) < self.code.len() {
            let len = instruction_length(self.code, pc).ok_or(BytecodeError::UnknownOpcode {
                opcode: self.code[pc as usize],
                offset: pc,
            })?;
            let instr = Instr::decode(self.code, pc, len)?;

            if mode == PassMode::Flow {
                flow.code_visited.set(pc as usize, true);
                let mut targets = Vec::new();
                instr.branch_targets(&mut targets);
                for t in targets {
                    flow.push(t);
                }
            }

            let step = visitor.visit(pc, &instr, flow)?;
            let consumed = match step {
                Step::Continue => len,
                Step::Skip(extra) => len + extra,
            };

            if mode == PassMode::Flow && instr.ends_linear_flow() {
                match flow.pop_unvisited() {
                    Some(next) => {
                        pc = next;
                        flow.linear_done = true;
                    }
                    None => break,
                }
            } else {
                // Conditional branches keep walking the fall-through path;
                // their targets wait in the queue.
                pc += consumed;
                flow.linear_done = false;
            }
        }
        visitor.parse_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        pcs: Vec<u32>,
        done: bool,
    }

    impl BytecodeVisitor for Trace {
        type Error = BytecodeError;

        fn visit(
            &mut self,
            pc: u32,
            _instr: &Instr<'_>,
            flow: &mut FlowInfo,
        ) -> Result<Step, BytecodeError> {
            self.pcs.push(pc);
            // pretend every offset's state settles on first contact
            flow.mark_visited(pc);
            Ok(Step::Continue)
        }

        fn parse_done(&mut self) -> Result<(), BytecodeError> {
            self.done = true;
            Ok(())
        }
    }

    #[test]
    fn linear_mode_sweeps_everything() {
        // iconst_0; istore_1; iload_1; ireturn
        let code = [0x03, 0x3c, 0x1b, 0xac];
        let mut v = Trace::default();
        let mut flow = FlowInfo::new(code.len());
        Parser::new(&code)
            .parse(&mut v, PassMode::Linear, &mut flow)
            .unwrap();
        assert_eq!(v.pcs, vec![0, 1, 2, 3]);
        assert!(v.done);
    }

    #[test]
    fn flow_mode_follows_branches() {
        // 0: goto 4; 3: iconst_0 (dead); 4: return
        let code = [0xa7, 0x00, 0x04, 0x03, 0xb1];
        let mut v = Trace::default();
        let mut flow = FlowInfo::new(code.len());
        Parser::new(&code)
            .parse(&mut v, PassMode::Flow, &mut flow)
            .unwrap();
        assert_eq!(v.pcs, vec![0, 4]);
        assert!(flow.code_visited.get(0));
        assert!(flow.code_visited.get(4));
        assert!(!flow.code_visited.get(3));
    }

    #[test]
    fn flow_mode_requeues_unvisited_targets() {
        // 0: ifeq +6 (-> 6); 3: goto 7 (3 bytes); 6: return; 7: return
        let code = [0x99, 0x00, 0x06, 0xa7, 0x00, 0x04, 0xb1, 0xb1];
        let mut v = Trace::default();
        let mut flow = FlowInfo::new(code.len());
        Parser::new(&code)
            .parse(&mut v, PassMode::Flow, &mut flow)
            .unwrap();
        assert_eq!(v.pcs, vec![0, 3, 6, 7]);
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let code = [0xba, 0x00, 0x00];
        let mut v = Trace::default();
        let mut flow = FlowInfo::new(code.len());
        let err = Parser::new(&code)
            .parse(&mut v, PassMode::Linear, &mut flow)
            .unwrap_err();
        assert!(matches!(err, BytecodeError::UnknownOpcode { .. }));
    }
}
