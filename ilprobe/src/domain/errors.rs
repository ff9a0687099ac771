//! Structured error types for ilprobe
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Propagation classes:
//! - [`ChannelError`]: fatal to initialization
//! - [`MetadataError`], [`InstrumentError`]: per method, degrade to pass-through
//! - [`ThreadIdentityError`]: per call, degrades to the unknown-thread sentinel

use super::types::{FunctionId, IlOffset, MethodToken, ModuleId};
use ilprobe_common::ProbeKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Analysis engine unavailable at {address} (gave up after {waited_ms}ms)")]
    Unavailable { address: String, waited_ms: u64 },

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Unresolved metadata for {function}: {reason}")]
    UnresolvedMetadata { function: FunctionId, reason: String },

    #[error("Dynamic method {0} is not supported")]
    UnsupportedDynamicMethod(FunctionId),

    #[error("Failed to install body for {module} method {token}: {reason}")]
    SetBodyFailed { module: ModuleId, token: MethodToken, reason: String },
}

/// Why a rewrite was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("empty method body")]
    EmptyBody,

    #[error("unknown opcode 0x{opcode:x} at {offset}")]
    UnknownOpcode { offset: IlOffset, opcode: u16 },

    #[error("instruction at {0} runs past the end of the code")]
    TruncatedInstruction(IlOffset),

    #[error("prefix at {0} is not followed by an instruction")]
    DanglingPrefix(IlOffset),

    #[error("branch at {offset} targets {target}, which is not an instruction boundary")]
    BadBranchTarget { offset: IlOffset, target: i64 },

    #[error("control falls off the end of the code after {0}")]
    FallsOffEnd(IlOffset),

    #[error("exception clause {index} boundary {offset} is not an instruction boundary")]
    MisalignedClause { index: usize, offset: u32 },

    #[error("exception clause {index} has an empty range")]
    EmptyClause { index: usize },

    #[error("evaluation stack underflow at {0}")]
    StackUnderflow(IlOffset),

    #[error("evaluation stack depth {depth} at {offset} exceeds declared max {max}")]
    StackOverflow { offset: IlOffset, depth: u32, max: u32 },

    #[error("inconsistent stack depth at {offset}: {first} vs {second}")]
    InconsistentStack { offset: IlOffset, first: u32, second: u32 },

    #[error("exception clause {index} no longer nests as before")]
    ClauseNesting { index: usize },

    #[error("no calli signature for {0:?} probe")]
    MissingProbeSignature(ProbeKind),

    #[error("no calli signature for the thread accessor")]
    MissingThreadSignature,

    #[error("probe code between the tail call at {0} and its ret")]
    SplitTailCall(IlOffset),

    #[error("layout check failed at {offset}: expected {expected}, got {actual}")]
    LayoutMismatch { offset: IlOffset, expected: u32, actual: u32 },

    #[error("rewritten method exceeds format limits ({0})")]
    TooLarge(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("Instrumentation rejected for method {token}: {reason}")]
    Rejected { token: MethodToken, reason: RejectReason },
}

impl InstrumentError {
    /// The underlying reason
    #[must_use]
    pub fn reason(&self) -> &RejectReason {
        match self {
            Self::Rejected { reason, .. } => reason,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadIdentityError {
    #[error("Thread identity unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue { var: &'static str, value: String, reason: String },

    #[error("Unknown probe kind {0:?}")]
    UnknownProbeKind(String),
}
