//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a module handle
//! where a function handle is expected, and make callback signatures readable.

use std::fmt;

use ilprobe_common::UNKNOWN_THREAD;

/// Runtime handle of a function being compiled
///
/// Opaque to this crate; only meaningful to the runtime that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FN:0x{:x}", self.0)
    }
}

/// Runtime handle of a loaded module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MOD:0x{:x}", self.0)
    }
}

/// Metadata token of a method definition (table 0x06)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodToken(pub u32);

impl MethodToken {
    /// Token value reinterpreted as the `int32` passed to probes
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_probe_arg(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for MethodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Standalone signature token usable as a `calli` operand (table 0x11)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigToken(pub u32);

/// Stable identifier of the logical thread, passed to probes by value
///
/// [`ThreadToken::UNKNOWN`] is the sentinel used when the runtime cannot
/// report the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(pub u64);

impl ThreadToken {
    /// Sentinel for "unknown thread"
    pub const UNKNOWN: ThreadToken = ThreadToken(UNKNOWN_THREAD);

    /// Returns true unless this is the sentinel
    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    /// Value reinterpreted as the `int64` passed to probes
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_probe_arg(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "THREAD:{}", self.0)
        } else {
            write!(f, "THREAD:unknown")
        }
    }
}

/// Offset into a method's IL code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IlOffset(pub u32);

impl IlOffset {
    /// Offset as an index into the code buffer
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Offset reinterpreted as the `int32` passed to probes
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_probe_arg(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for IlOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}", self.0)
    }
}

// Runtime handles that only appear on the callback surface.

/// Application domain handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppDomainId(pub u64);

/// Assembly handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssemblyId(pub u64);

/// Class handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u64);

/// Managed thread handle (the runtime's, not the probe argument)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

/// Managed object handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

/// Re-JIT request handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReJitId(pub u64);

/// GC handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandleId(pub u64);

/// Status code reported by the runtime alongside "finished" events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const S_FALSE: HResult = HResult(1);
    /// 0x80004005
    pub const E_FAIL: HResult = HResult(-2_147_467_259);

    #[must_use]
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_token_sentinel() {
        assert!(!ThreadToken::UNKNOWN.is_known());
        assert!(ThreadToken(7).is_known());
        assert_eq!(ThreadToken::UNKNOWN.as_probe_arg(), -1);
        assert_eq!(ThreadToken::UNKNOWN.to_string(), "THREAD:unknown");
        assert_eq!(ThreadToken(42).to_string(), "THREAD:42");
    }

    #[test]
    fn test_offset_display() {
        assert_eq!(IlOffset(0x1a).to_string(), "IL_001a");
        assert_eq!(IlOffset(5).index(), 5);
    }

    #[test]
    fn test_method_token_probe_arg() {
        assert_eq!(MethodToken(0x0600_0001).as_probe_arg(), 0x0600_0001);
        assert_eq!(MethodToken(0x0600_0001).to_string(), "0x06000001");
    }
}
