use ember_bytecode::BytecodeError;
use thiserror::Error;

/// Failures that abort a compilation session.
///
/// These are programmer or input-corruption errors — a verified method body
/// can never produce them. Resolution failures are deliberately absent: an
/// unresolved class, field or method is a runtime condition and is lowered
/// into the IR as a linkage-exception throw instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: u32 },

    #[error("operand stack exceeds declared maximum at offset {offset}")]
    StackOverflow { offset: u32 },

    #[error("modeled stack holds the wrong value kind at offset {offset}")]
    StackTypeMismatch { offset: u32 },

    #[error("local variable index {index} out of range at offset {offset}")]
    InvalidLocal { index: u32, offset: u32 },

    #[error("offset {offset} is not a recorded block boundary")]
    MissingLabel { offset: u32 },

    #[error("subroutine return at offset {offset} has no matching jsr")]
    DanglingRet { offset: u32 },
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
