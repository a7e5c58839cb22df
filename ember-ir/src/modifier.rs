/// Comparison predicate carried by `Cmp`, `Cmp3` and `Branch`.
///
/// The unsigned variants double as the unordered-float forms: an `_Un`
/// comparison on floats succeeds when either input is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CmpOp {
    Eq = 1,
    NeUn = 2,
    Gt = 3,
    Gte = 4,
    GtUn = 5,
    GteUn = 6,
    /// Single-operand test against zero / null.
    Zero = 7,
    NonZero = 8,
}

impl CmpOp {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            1 => CmpOp::Eq,
            2 => CmpOp::NeUn,
            3 => CmpOp::Gt,
            4 => CmpOp::Gte,
            5 => CmpOp::GtUn,
            6 => CmpOp::GteUn,
            7 => CmpOp::Zero,
            8 => CmpOp::NonZero,
            _ => return None,
        })
    }

    /// Predicate testing the same relation with operands swapped.
    pub fn swapped(self) -> Self {
        match self {
            CmpOp::Gt => CmpOp::Gt,
            CmpOp::Gte => CmpOp::Gte,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignedOp {
    #[default]
    Signed,
    Unsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverflowOp {
    #[default]
    None,
    CheckSigned,
    CheckUnsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExceptionOp {
    #[default]
    Never,
    Maybe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShiftMaskOp {
    /// Shift count masked to the operand width, bytecode semantics.
    #[default]
    Masked,
    Unmasked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrictOp {
    #[default]
    NonStrict,
    /// Strict FP: no contraction, no widened intermediates.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AutoCompressOp {
    #[default]
    No,
    /// Load/store transparently compresses or uncompresses the heap value.
    Yes,
}

/// Facts attached to an argument definition at method entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DefArgOp {
    #[default]
    None,
    /// The receiver of an instance method is never null.
    NonNullThis,
    ExactType,
    NonNullExactType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThrowOp {
    #[default]
    Normal,
    /// Rethrow of a caught value, no new stack trace.
    NoStackTrace,
}

/// Per-instruction policy bitpack.
///
/// Multi-bit fields packed into a `u32` with typed accessors; the packing
/// participates verbatim in CSE keys, so two instructions with different
/// policies never merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifier {
    bits: u32,
}

const SIGNED_SHIFT: u32 = 0; // 1 bit
const OVERFLOW_SHIFT: u32 = 1; // 2 bits
const EXCEPTION_SHIFT: u32 = 3; // 1 bit
const SHIFT_MASK_SHIFT: u32 = 4; // 1 bit
const STRICT_SHIFT: u32 = 5; // 1 bit
const AUTOCOMPRESS_SHIFT: u32 = 6; // 1 bit
const DEFARG_SHIFT: u32 = 7; // 2 bits
const THROW_SHIFT: u32 = 9; // 1 bit
const CMP_SHIFT: u32 = 10; // 4 bits

impl Modifier {
    pub fn none() -> Self {
        Self::default()
    }

    /// The stock arithmetic policy: wraparound, no exceptions, non-strict.
    pub fn arith() -> Self {
        Self::none()
    }

    pub fn bits(self) -> u32 {
        self.bits
    }

    fn field(self, shift: u32, width: u32) -> u32 {
        (self.bits >> shift) & ((1 << width) - 1)
    }

    fn with_field(mut self, shift: u32, width: u32, value: u32) -> Self {
        debug_assert!(value < (1 << width));
        self.bits = (self.bits & !(((1 << width) - 1) << shift)) | (value << shift);
        self
    }

    pub fn signed(self) -> SignedOp {
        if self.field(SIGNED_SHIFT, 1) == 0 {
            SignedOp::Signed
        } else {
            SignedOp::Unsigned
        }
    }

    pub fn with_signed(self, v: SignedOp) -> Self {
        self.with_field(SIGNED_SHIFT, 1, v as u32)
    }

    pub fn overflow(self) -> OverflowOp {
        match self.field(OVERFLOW_SHIFT, 2) {
            0 => OverflowOp::None,
            1 => OverflowOp::CheckSigned,
            _ => OverflowOp::CheckUnsigned,
        }
    }

    pub fn with_overflow(self, v: OverflowOp) -> Self {
        self.with_field(OVERFLOW_SHIFT, 2, v as u32)
    }

    pub fn exception(self) -> ExceptionOp {
        if self.field(EXCEPTION_SHIFT, 1) == 0 {
            ExceptionOp::Never
        } else {
            ExceptionOp::Maybe
        }
    }

    pub fn with_exception(self, v: ExceptionOp) -> Self {
        self.with_field(EXCEPTION_SHIFT, 1, v as u32)
    }

    pub fn shift_mask(self) -> ShiftMaskOp {
        if self.field(SHIFT_MASK_SHIFT, 1) == 0 {
            ShiftMaskOp::Masked
        } else {
            ShiftMaskOp::Unmasked
        }
    }

    pub fn with_shift_mask(self, v: ShiftMaskOp) -> Self {
        self.with_field(SHIFT_MASK_SHIFT, 1, v as u32)
    }

    pub fn strict(self) -> StrictOp {
        if self.field(STRICT_SHIFT, 1) == 0 {
            StrictOp::NonStrict
        } else {
            StrictOp::Strict
        }
    }

    pub fn with_strict(self, v: StrictOp) -> Self {
        self.with_field(STRICT_SHIFT, 1, v as u32)
    }

    pub fn autocompress(self) -> AutoCompressOp {
        if self.field(AUTOCOMPRESS_SHIFT, 1) == 0 {
            AutoCompressOp::No
        } else {
            AutoCompressOp::Yes
        }
    }

    pub fn with_autocompress(self, v: AutoCompressOp) -> Self {
        self.with_field(AUTOCOMPRESS_SHIFT, 1, v as u32)
    }

    pub fn defarg(self) -> DefArgOp {
        match self.field(DEFARG_SHIFT, 2) {
            0 => DefArgOp::None,
            1 => DefArgOp::NonNullThis,
            2 => DefArgOp::ExactType,
            _ => DefArgOp::NonNullExactType,
        }
    }

    pub fn with_defarg(self, v: DefArgOp) -> Self {
        self.with_field(DEFARG_SHIFT, 2, v as u32)
    }

    pub fn throw_op(self) -> ThrowOp {
        if self.field(THROW_SHIFT, 1) == 0 {
            ThrowOp::Normal
        } else {
            ThrowOp::NoStackTrace
        }
    }

    pub fn with_throw(self, v: ThrowOp) -> Self {
        self.with_field(THROW_SHIFT, 1, v as u32)
    }

    pub fn cmp(self) -> Option<CmpOp> {
        CmpOp::from_bits(self.field(CMP_SHIFT, 4))
    }

    pub fn with_cmp(self, v: CmpOp) -> Self {
        self.with_field(CMP_SHIFT, 4, v as u32)
    }
}

impl From<CmpOp> for Modifier {
    fn from(v: CmpOp) -> Self {
        Modifier::none().with_cmp(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_independent() {
        let m = Modifier::none()
            .with_signed(SignedOp::Unsigned)
            .with_overflow(OverflowOp::CheckSigned)
            .with_strict(StrictOp::Strict)
            .with_cmp(CmpOp::GteUn);
        assert_eq!(m.signed(), SignedOp::Unsigned);
        assert_eq!(m.overflow(), OverflowOp::CheckSigned);
        assert_eq!(m.strict(), StrictOp::Strict);
        assert_eq!(m.cmp(), Some(CmpOp::GteUn));
        assert_eq!(m.exception(), ExceptionOp::Never);
        assert_eq!(m.defarg(), DefArgOp::None);

        let cleared = m.with_overflow(OverflowOp::None);
        assert_eq!(cleared.overflow(), OverflowOp::None);
        assert_eq!(cleared.cmp(), Some(CmpOp::GteUn));
    }

    #[test]
    fn default_has_no_cmp() {
        assert_eq!(Modifier::none().cmp(), None);
        assert_eq!(Modifier::none().bits(), 0);
    }
}
