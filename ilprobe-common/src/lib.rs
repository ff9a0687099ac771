//! # Shared Wire Definitions (Profiler ↔ Analysis Engine)
//!
//! Defines the constants and data layouts shared between the in-process
//! profiler and the out-of-process analysis engine. Everything here is part
//! of the probe channel contract: both sides must agree on it byte for byte.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────────┬─────────┬──────────────────────────┐
//! │ len: u32 LE  │ tag: u8 │ payload: len - 1 bytes   │
//! └──────────────┴─────────┴──────────────────────────┘
//! ```
//!
//! `len` counts the tag byte plus the payload.
//!
//! ## Key Types
//!
//! - [`ProbeKind`] - Enumerated probe entry points and their fixed arity
//! - [`ProbeEntry`] - One (kind, arity, address) row of the handshake response
//! - [`ProbeKindSet`] - Bitmask of probe kinds (capabilities, policy)

#![no_std]

// ============================================================================
// Protocol Constants
// ============================================================================

/// Magic number opening every handshake request ("ILPR" little-endian)
pub const PROTOCOL_MAGIC: u32 = 0x5250_4C49;

/// Protocol version spoken by this build
///
/// The engine must answer with exactly this version; anything else is a
/// protocol mismatch.
pub const PROTOCOL_VERSION: u16 = 1;

/// Size of the frame length prefix in bytes
pub const FRAME_LEN_PREFIX: usize = 4;

/// Maximum value of the length prefix (tag + payload)
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// **Handshake request**: profiler → engine
///
/// Payload: magic `u32`, version `u16`, capabilities `u32`, pid `u32`
pub const TAG_HANDSHAKE_REQUEST: u8 = 1;

/// **Handshake response**: engine → profiler
///
/// Payload: version `u16`, count `u16`, then `count` [`ProbeEntry`] rows
pub const TAG_HANDSHAKE_RESPONSE: u8 = 2;

/// **Shutdown notice**: profiler → engine, empty payload
pub const TAG_SHUTDOWN: u8 = 3;

/// **Shutdown acknowledgement**: engine → profiler, empty payload
pub const TAG_SHUTDOWN_ACK: u8 = 4;

/// Handshake request payload size in bytes
pub const HANDSHAKE_REQUEST_LEN: usize = 14;

/// Handshake response payload header size (version + count)
pub const HANDSHAKE_RESPONSE_HEADER_LEN: usize = 4;

/// Encoded size of one [`ProbeEntry`]
pub const PROBE_ENTRY_LEN: usize = 12;

/// Thread argument passed to probes when the logical thread is unknown
pub const UNKNOWN_THREAD: u64 = u64::MAX;

// ============================================================================
// Probe Kinds
// ============================================================================

/// Probe entry point kinds
///
/// The discriminant is the wire code used in [`ProbeEntry::kind`]. The arity
/// of each kind is fixed and never renegotiated per call.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeKind {
    MethodEnter = 1,
    MethodLeave = 2,
    BranchTaken = 3,
    BranchNotTaken = 4,
    Call = 5,
    CallVirtual = 6,
    Return = 7,
    FieldRead = 8,
    FieldWrite = 9,
    ElementRead = 10,
    ElementWrite = 11,
    StackPush = 12,
    StackPop = 13,
    Throw = 14,
}

impl ProbeKind {
    /// Every probe kind, in wire-code order
    pub const ALL: [ProbeKind; 14] = [
        ProbeKind::MethodEnter,
        ProbeKind::MethodLeave,
        ProbeKind::BranchTaken,
        ProbeKind::BranchNotTaken,
        ProbeKind::Call,
        ProbeKind::CallVirtual,
        ProbeKind::Return,
        ProbeKind::FieldRead,
        ProbeKind::FieldWrite,
        ProbeKind::ElementRead,
        ProbeKind::ElementWrite,
        ProbeKind::StackPush,
        ProbeKind::StackPop,
        ProbeKind::Throw,
    ];

    /// Wire code
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decode a wire code
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::MethodEnter),
            2 => Some(Self::MethodLeave),
            3 => Some(Self::BranchTaken),
            4 => Some(Self::BranchNotTaken),
            5 => Some(Self::Call),
            6 => Some(Self::CallVirtual),
            7 => Some(Self::Return),
            8 => Some(Self::FieldRead),
            9 => Some(Self::FieldWrite),
            10 => Some(Self::ElementRead),
            11 => Some(Self::ElementWrite),
            12 => Some(Self::StackPush),
            13 => Some(Self::StackPop),
            14 => Some(Self::Throw),
            _ => None,
        }
    }

    /// Number of by-value arguments the probe takes
    ///
    /// The native address pushed for `calli` is not counted.
    ///
    /// - `MethodEnter`: method token, thread
    /// - `MethodLeave`: method token, offset, thread
    /// - `Call`, `CallVirtual`, `Return`: callee token, offset, thread
    /// - `FieldRead`, `FieldWrite`: field token, offset, thread
    /// - everything else: offset (or branch target), thread
    #[must_use]
    pub const fn arity(self) -> u8 {
        match self {
            Self::MethodLeave
            | Self::Call
            | Self::CallVirtual
            | Self::Return
            | Self::FieldRead
            | Self::FieldWrite => 3,
            Self::MethodEnter
            | Self::BranchTaken
            | Self::BranchNotTaken
            | Self::ElementRead
            | Self::ElementWrite
            | Self::StackPush
            | Self::StackPop
            | Self::Throw => 2,
        }
    }

    /// Snake-case name, used in configuration and exported probe symbols
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MethodEnter => "method_enter",
            Self::MethodLeave => "method_leave",
            Self::BranchTaken => "branch_taken",
            Self::BranchNotTaken => "branch_not_taken",
            Self::Call => "call",
            Self::CallVirtual => "call_virtual",
            Self::Return => "return",
            Self::FieldRead => "field_read",
            Self::FieldWrite => "field_write",
            Self::ElementRead => "element_read",
            Self::ElementWrite => "element_write",
            Self::StackPush => "stack_push",
            Self::StackPop => "stack_pop",
            Self::Throw => "throw",
        }
    }

    /// Look up a kind by its snake-case name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Bit used for this kind in a [`ProbeKindSet`]
    #[must_use]
    pub const fn bit(self) -> u32 {
        1 << (self as u16)
    }
}

/// Bitmask of probe kinds
///
/// Sent as the capability field of the handshake request and used as the
/// instrumentation policy on the profiler side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProbeKindSet(pub u32);

impl ProbeKindSet {
    /// Empty set
    pub const EMPTY: ProbeKindSet = ProbeKindSet(0);

    /// Set containing every kind
    #[must_use]
    pub const fn all() -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < ProbeKind::ALL.len() {
            bits |= ProbeKind::ALL[i].bit();
            i += 1;
        }
        ProbeKindSet(bits)
    }

    /// Whether `kind` is a member
    #[must_use]
    pub const fn contains(self, kind: ProbeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Copy of the set with `kind` added
    #[must_use]
    pub const fn with(self, kind: ProbeKind) -> Self {
        ProbeKindSet(self.0 | kind.bit())
    }

    /// Copy of the set with `kind` removed
    #[must_use]
    pub const fn without(self, kind: ProbeKind) -> Self {
        ProbeKindSet(self.0 & !kind.bit())
    }

    /// Number of members
    #[must_use]
    pub const fn len(self) -> usize {
        (self.0 & Self::all().0).count_ones() as usize
    }

    /// Whether the set has no members
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Iterate members in wire-code order
    pub fn iter(self) -> impl Iterator<Item = ProbeKind> {
        ProbeKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

// ============================================================================
// Shared Data Structures
// ============================================================================

/// One row of the handshake response
///
/// **Wire layout** (12 bytes, little-endian):
/// `kind: u16`, `arity: u8`, `reserved: u8`, `address: u64`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEntry {
    /// Probe kind wire code (see [`ProbeKind`])
    pub kind: u16,

    /// Number of by-value arguments the engine expects
    ///
    /// Must equal [`ProbeKind::arity`] for the kind.
    pub arity: u8,

    /// Reserved, written as zero
    #[allow(clippy::pub_underscore_fields)]
    pub _reserved: u8,

    /// Native entry point address of the probe
    pub address: u64,
}

impl ProbeEntry {
    /// Build an entry for `kind` with its canonical arity
    #[must_use]
    pub const fn new(kind: ProbeKind, address: u64) -> Self {
        Self { kind: kind.code(), arity: kind.arity(), _reserved: 0, address }
    }

    /// Encode to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PROBE_ENTRY_LEN] {
        let mut out = [0u8; PROBE_ENTRY_LEN];
        out[0..2].copy_from_slice(&self.kind.to_le_bytes());
        out[2] = self.arity;
        out[3] = self._reserved;
        out[4..12].copy_from_slice(&self.address.to_le_bytes());
        out
    }

    /// Decode from wire bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8; PROBE_ENTRY_LEN]) -> Self {
        let mut address = [0u8; 8];
        address.copy_from_slice(&bytes[4..12]);
        Self {
            kind: u16::from_le_bytes([bytes[0], bytes[1]]),
            arity: bytes[2],
            _reserved: bytes[3],
            address: u64::from_le_bytes(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_round_trip() {
        for kind in ProbeKind::ALL {
            assert_eq!(ProbeKind::from_code(kind.code()), Some(kind));
            assert_eq!(ProbeKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ProbeKind::from_code(0), None);
        assert_eq!(ProbeKind::from_code(15), None);
    }

    #[test]
    fn test_kind_set() {
        let set = ProbeKindSet::EMPTY.with(ProbeKind::Call).with(ProbeKind::Throw);
        assert!(set.contains(ProbeKind::Call));
        assert!(!set.contains(ProbeKind::Return));
        assert_eq!(set.len(), 2);
        assert_eq!(ProbeKindSet::all().len(), ProbeKind::ALL.len());
        assert!(set.without(ProbeKind::Call).without(ProbeKind::Throw).is_empty());
    }

    #[test]
    fn test_probe_entry_layout() {
        let entry = ProbeEntry::new(ProbeKind::FieldWrite, 0x7f00_dead_beef);
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[0..2], &[9, 0]);
        assert_eq!(bytes[2], 3);
        assert_eq!(ProbeEntry::from_bytes(&bytes), entry);
    }
}
