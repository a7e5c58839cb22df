use ember_types::Ty;
use strum::Display;

use crate::{ConstValue, Modifier, NodeId, Opcode, OpndId};

/// Instruction handle into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

/// Label handle; labels number blocks, not instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub(crate) u32);

impl LabelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Runtime field descriptor handle, minted by the compilation interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub u32);

/// Runtime method descriptor handle, minted by the compilation interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Helpers implemented by the JIT runtime stubs.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JitHelperId {
    InitializeArray,
    ArrayCopyDirect,
    ArrayCopyReverse,
    LockedCompareAndExchange,
    StringCompareTo,
    StringIndexOf,
    StringRegionMatches,
}

/// Helpers implemented by the managed runtime proper.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmHelperId {
    GetInvokeStaticAddrWithResolve,
    GetInvokeVirtualAddrWithResolve,
    GetInvokeSpecialAddrWithResolve,
    GetInvokeInterfaceAddrWithResolve,
    GetNonStaticFieldOffsetWithResolve,
    GetStaticFieldAddrWithResolve,
    InitializeClassWithResolve,
    ThrowLinkingException,
    MonitorEnter,
    MonitorExit,
    GcGetTlsBase,
    GcHeapWriteRef,
    NewResolvedUsingAllocHandle,
    NewVectorUsingVtable,
    GetInterfaceVtable,
    CheckCast,
    InstanceOf,
    GetIdentityHashcode,
}

/// Exceptions the emitted code may raise through dedicated throw stubs.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemExceptionId {
    NullPointer,
    DivideByZero,
    IndexOutOfBounds,
    NegativeArraySize,
    ArrayStore,
    ClassCast,
    FiniteNumber,
}

/// Per-variant extra data.
///
/// The fixed fields of [`Inst`] (opcode, modifier, result type, operands)
/// cover most tags; everything else lives here so the instruction stays one
/// flat struct in the arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Label(LabelId),
    /// Catch labels order handlers within their dispatch fan-out.
    CatchLabel { label: LabelId, order: u32, exception_ty: Ty },
    MethodEntryLabel { label: LabelId, method: MethodId },
    DispatchLabel(LabelId),
    Branch { target: LabelId },
    Switch { targets: Box<[LabelId]>, default: LabelId },
    Const(ConstValue),
    Field(FieldId),
    Method(MethodId),
    /// Checked or target type when it differs from the result type.
    TypeOp(Ty),
    /// Constant-pool token (string/class reference loads).
    Token { cp_index: u32 },
    /// Deferred linkage failure: the bytecode operation that failed and the
    /// token it failed on.
    LinkError { cp_index: u32, operation: u8 },
    SystemException(SystemExceptionId),
    JitHelper(JitHelperId),
    VmHelper(VmHelperId),
}

/// Bytecode offset value meaning "not mapped yet".
pub const BC_OFFSET_UNSET: u32 = u32::MAX;

/// One IR instruction.
///
/// Lives in the arena; block membership is the intrusive `prev`/`next`
/// chain hanging off a label instruction.
#[derive(Debug, Clone)]
pub struct Inst {
    pub op: Opcode,
    pub modifier: Modifier,
    /// Result type; `Void` for pure effects.
    pub ty: Ty,
    pub dst: OpndId,
    pub srcs: Vec<OpndId>,
    pub bc_offset: u32,
    pub payload: Payload,
    pub(crate) prev: Option<InstId>,
    pub(crate) next: Option<InstId>,
    /// Back-pointer from a label to its CFG node.
    pub(crate) node: Option<NodeId>,
}

impl Inst {
    pub fn src(&self, i: usize) -> OpndId {
        self.srcs[i]
    }

    pub fn num_srcs(&self) -> usize {
        self.srcs.len()
    }

    pub fn next(&self) -> Option<InstId> {
        self.next
    }

    pub fn prev(&self) -> Option<InstId> {
        self.prev
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn label_id(&self) -> Option<LabelId> {
        match self.payload {
            Payload::Label(l)
            | Payload::CatchLabel { label: l, .. }
            | Payload::MethodEntryLabel { label: l, .. }
            | Payload::DispatchLabel(l) => Some(l),
            _ => None,
        }
    }

    pub fn branch_target(&self) -> Option<LabelId> {
        match self.payload {
            Payload::Branch { target } => Some(target),
            _ => None,
        }
    }

    pub fn const_value(&self) -> Option<&ConstValue> {
        match &self.payload {
            Payload::Const(v) => Some(v),
            _ => None,
        }
    }
}
