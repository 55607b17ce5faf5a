use std::io;
use thiserror::Error;

/// Structural corruption found while scanning or rewriting one method's bytecode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("unknown opcode 0x{opcode:02x} at {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("instruction at {offset} runs past the end of code ({code_length} bytes)")]
    Truncated { offset: usize, code_length: usize },

    #[error("malformed switch at {offset}: {reason}")]
    MalformedSwitch { offset: usize, reason: &'static str },

    #[error("branch at {offset} targets {target}, which is not an instruction boundary")]
    BadBranchTarget { offset: usize, target: i64 },

    #[error("branch at {offset} needs offset {delta}, which does not fit a short branch")]
    BranchOverflow { offset: usize, delta: i64 },

    #[error("code length {0} exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    #[error("bytecode offset {0} is not an instruction boundary")]
    NotAnInstruction(usize),

    #[error("malformed {0} attribute")]
    BadAttribute(&'static str),

    #[error(transparent)]
    Format(#[from] ClassFormatError),
}

/// The class bytes can not be decoded structurally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("invalid magic 0x{0:08x}")]
    InvalidMagic(u32),

    #[error("unexpected end of class data at {0}")]
    UnexpectedEof(usize),

    #[error("invalid constant pool tag {tag} at index {index}")]
    InvalidConstantPoolTag { tag: u8, index: u16 },

    #[error("constant pool index {0} does not hold the expected entry")]
    InvalidIndex(u16),

    #[error("method {0} has no Code attribute")]
    NoCode(String),

    #[error("invalid stack map frame type {0}")]
    InvalidFrameType(u8),

    #[error("invalid verification type tag {0}")]
    InvalidVerificationType(u8),
}

/// Invariant violations in the constant pool fragment builder. These are programming errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("unsupported constant pool tag {0} in fragment")]
    UnsupportedTag(u8),

    #[error("operand {operand} of entry {entry} points outside its fragment")]
    OperandOutOfRange { entry: usize, operand: u32 },

    #[error("utf8 entry {0} is longer than 65535 bytes")]
    Utf8TooLong(usize),

    #[error("constant pool would grow past 65535 entries")]
    PoolOverflow,

    #[error("fragment {fragment} has no call {call}")]
    MissingCall { fragment: String, call: usize },
}

/// Failure to produce a replacement classfile for a single class.
#[derive(Error, Debug)]
pub enum InstrError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("scan of {method} failed: {source}")]
    Scan {
        method: String,
        #[source]
        source: ScanError,
    },

    #[error(transparent)]
    Format(#[from] ClassFormatError),

    #[error(transparent)]
    Fragment(#[from] FragmentError),
}

impl InstrError {
    pub fn scan(method: impl Into<String>, source: ScanError) -> Self {
        InstrError::Scan { method: method.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, InstrError>;
