use thiserror::Error;

/// Decode failures.
///
/// Anything here means the method body is malformed; callers abort the whole
/// compilation. A verifier upstream should have rejected the class file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// An opcode byte outside the defined instruction set.
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u32 },

    /// The instruction's operands run past the end of the method body.
    #[error("instruction at offset {offset} is truncated")]
    TruncatedInstruction { offset: u32 },

    /// `wide` may only prefix local-variable access opcodes and `iinc`.
    #[error("wide prefix applied to opcode {opcode:#04x} at offset {offset}")]
    BadWideTarget { opcode: u8, offset: u32 },

    /// A switch payload whose target table is inconsistent with its header.
    #[error("malformed switch at offset {offset}")]
    MalformedSwitch { offset: u32 },

    /// A branch or switch target outside the method body.
    #[error("branch target {target} out of range at offset {offset}")]
    TargetOutOfRange { offset: u32, target: i64 },
}
