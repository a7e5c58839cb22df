//! Typed SSA instruction model of the Ember JIT.
//!
//! Instructions, operands and blocks live by value in a per-compilation
//! [`IrArena`] and reference each other through typed ids, so the IR forms
//! no ownership cycles. The [`InstFactory`] is the only way to create them;
//! the [`ControlFlowGraph`] arranges label-headed instruction chains into
//! block and dispatch nodes.

mod arena;
mod cfg;
mod const_value;
mod factory;
mod inst;
mod modifier;
mod opcode;
mod opnd;

pub use arena::{ChainIter, IrArena};
pub use cfg::{ControlFlowGraph, EdgeKind, Node, NodeId, NodeKind};
pub use const_value::{ConstValue, DataId};
pub use factory::InstFactory;
pub use inst::{
    FieldId, Inst, InstId, JitHelperId, LabelId, MethodId, Payload, SystemExceptionId,
    VmHelperId, BC_OFFSET_UNSET,
};
pub use modifier::{
    AutoCompressOp, CmpOp, DefArgOp, ExceptionOp, Modifier, OverflowOp, ShiftMaskOp, SignedOp,
    StrictOp, ThrowOp,
};
pub use opcode::Opcode;
pub use opnd::{Opnd, OpndId, OpndKind};

use static_assertions::const_assert;

// operand records stay small enough to treat as plain values
const_assert!(std::mem::size_of::<Opnd>() <= 32);
