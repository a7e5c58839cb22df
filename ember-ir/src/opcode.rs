use strum::{Display, EnumCount};

/// Tags of the typed IR.
///
/// A closed set; every instruction carries exactly one. The `Tau*` group
/// produces or consumes proof witnesses for elided runtime checks. Opcodes
/// prefixed `Tau` that are not checks take at least one tau source proving
/// the safety of the access they perform.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumCount)]
#[allow(missing_docs)]
pub enum Opcode {
    // arithmetic
    Add,
    Sub,
    Mul,
    MulHi,
    Neg,
    Min,
    Max,
    Abs,
    TauDiv,
    TauRem,
    // bitwise
    And,
    Or,
    Xor,
    Not,
    // selection
    Select,
    // shifts
    Shl,
    Shr,
    Shladd,
    // comparison
    Cmp,
    Cmp3,
    // conversion
    Conv,
    ConvZE,
    ConvUnmanaged,
    // control flow
    Branch,
    Jump,
    Switch,
    Jsr,
    Ret,
    SaveRet,
    Return,
    Throw,
    PseudoThrow,
    ThrowSystemException,
    ThrowLinkingException,
    Catch,
    // labels
    Label,
    MethodEntryLabel,
    CatchLabel,
    DispatchLabel,
    // moves & definitions
    Copy,
    DefArg,
    Phi,
    TauPi,
    LdConstant,
    LdRef,
    LdVar,
    LdVarAddr,
    StVar,
    // memory access
    TauLdInd,
    TauLdField,
    LdStatic,
    TauLdElem,
    LdFieldAddr,
    LdStaticAddr,
    LdElemAddr,
    LdFunAddr,
    LdFunAddrSlot,
    GetVTableAddr,
    TauLdVTableAddr,
    TauLdVirtFunAddr,
    TauLdVirtFunAddrSlot,
    GetClassObj,
    TauArrayLen,
    LdArrayBaseAddr,
    AddScaledIndex,
    TauStInd,
    TauStField,
    StStatic,
    TauStElem,
    TauStRef,
    // compressed references
    CompressRef,
    UncompressRef,
    LdFieldOffset,
    LdFieldOffsetPlusHeapbase,
    LdArrayBaseOffset,
    LdArrayBaseOffsetPlusHeapbase,
    LdArrayLenOffset,
    LdArrayLenOffsetPlusHeapbase,
    AddOffset,
    AddOffsetPlusHeapbase,
    // calls
    DirectCall,
    TauVirtualCall,
    IndirectCall,
    IndirectMemoryCall,
    JitHelperCall,
    VmHelperCall,
    // allocation
    NewObj,
    NewArray,
    NewMultiArray,
    // type system
    TauCheckCast,
    TauStaticCast,
    TauAsType,
    TauInstanceOf,
    InitType,
    // checks
    TauCheckNull,
    TauCheckZero,
    TauCheckDivOpnds,
    TauCheckBounds,
    TauCheckElemType,
    TauCheckFinite,
    // tau witnesses
    TauSafe,
    TauMethodSafe,
    TauUnsafe,
    TauAnd,
    TauHasType,
    TauHasExactType,
    TauIsNonNull,
    // synchronization
    MonitorEnter,
    MonitorExit,
    TypeMonitorEnter,
    TypeMonitorExit,
    LdLockAddr,
    BalancedMonitorEnter,
    BalancedMonitorExit,
    OptBalancedMonitorEnter,
    OptBalancedMonitorExit,
    MonitorEnterFence,
    MonitorExitFence,
    IncRecCount,
    // misc
    Prefetch,
}

impl Opcode {
    /// Labels start blocks; everything else lives inside one.
    pub fn is_label(self) -> bool {
        matches!(
            self,
            Opcode::Label
                | Opcode::MethodEntryLabel
                | Opcode::CatchLabel
                | Opcode::DispatchLabel
        )
    }

    /// Last instruction of a block with explicit successors.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Branch
                | Opcode::Jump
                | Opcode::Switch
                | Opcode::Jsr
                | Opcode::Ret
                | Opcode::Return
                | Opcode::Throw
                | Opcode::PseudoThrow
                | Opcode::ThrowSystemException
                | Opcode::ThrowLinkingException
        )
    }

    /// Conservative side-effect predicate; CSE refuses to merge these and
    /// the simplifier refuses to drop them.
    pub fn has_side_effect(self) -> bool {
        matches!(
            self,
            Opcode::DirectCall
                | Opcode::TauVirtualCall
                | Opcode::IndirectCall
                | Opcode::IndirectMemoryCall
                | Opcode::JitHelperCall
                | Opcode::VmHelperCall
                | Opcode::NewObj
                | Opcode::NewArray
                | Opcode::NewMultiArray
                | Opcode::TauStInd
                | Opcode::TauStField
                | Opcode::StStatic
                | Opcode::TauStElem
                | Opcode::TauStRef
                | Opcode::StVar
                | Opcode::MonitorEnter
                | Opcode::MonitorExit
                | Opcode::TypeMonitorEnter
                | Opcode::TypeMonitorExit
                | Opcode::BalancedMonitorEnter
                | Opcode::BalancedMonitorExit
                | Opcode::OptBalancedMonitorEnter
                | Opcode::OptBalancedMonitorExit
                | Opcode::MonitorEnterFence
                | Opcode::MonitorExitFence
                | Opcode::IncRecCount
                | Opcode::InitType
                | Opcode::Prefetch
        ) || self.is_terminator()
            || self.is_check()
    }

    /// Runtime-check instructions producing a tau witness.
    pub fn is_check(self) -> bool {
        matches!(
            self,
            Opcode::TauCheckNull
                | Opcode::TauCheckZero
                | Opcode::TauCheckDivOpnds
                | Opcode::TauCheckBounds
                | Opcode::TauCheckElemType
                | Opcode::TauCheckFinite
                | Opcode::TauCheckCast
        )
    }

    /// Instructions whose result is a tau witness.
    pub fn produces_tau(self) -> bool {
        self.is_check()
            || matches!(
                self,
                Opcode::TauSafe
                    | Opcode::TauMethodSafe
                    | Opcode::TauUnsafe
                    | Opcode::TauAnd
                    | Opcode::TauHasType
                    | Opcode::TauHasExactType
                    | Opcode::TauIsNonNull
            )
    }

    /// Variable-arity instructions; their source vectors are cloned into
    /// fresh storage by [`crate::InstFactory::clone_inst`].
    pub fn is_variadic(self) -> bool {
        matches!(
            self,
            Opcode::Phi
                | Opcode::Switch
                | Opcode::DirectCall
                | Opcode::TauVirtualCall
                | Opcode::IndirectCall
                | Opcode::IndirectMemoryCall
                | Opcode::JitHelperCall
                | Opcode::VmHelperCall
                | Opcode::NewMultiArray
                | Opcode::TauAnd
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount as _;

    #[test]
    fn labels_are_not_terminators() {
        assert!(Opcode::Label.is_label());
        assert!(!Opcode::Label.is_terminator());
        assert!(Opcode::Jump.is_terminator());
        assert!(Opcode::Switch.is_variadic());
    }

    #[test]
    fn checks_produce_tau() {
        assert!(Opcode::TauCheckNull.produces_tau());
        assert!(Opcode::TauCheckBounds.has_side_effect());
        assert!(!Opcode::Add.has_side_effect());
    }

    #[test]
    fn opcode_fits_a_byte() {
        // CSE keys pack the opcode into 8 bits
        assert!(Opcode::COUNT <= 256);
    }
}
