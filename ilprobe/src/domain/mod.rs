//! Domain model for ilprobe
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{
    AppDomainId, AssemblyId, ClassId, FunctionId, GcHandleId, HResult, IlOffset, MethodToken,
    ModuleId, ObjectId, ReJitId, SigToken, ThreadId, ThreadToken,
};

pub use errors::{
    ChannelError, ConfigError, InstrumentError, MetadataError, RejectReason, ThreadIdentityError,
};
