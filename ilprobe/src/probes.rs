//! Negotiated probe table
//!
//! Immutable after construction. The only ways to obtain one are a successful
//! handshake ([`crate::channel::ProbeChannel::exchange_probe_table`]) or an
//! explicit [`ProbeTable::fabricate`] for offline tooling and tests, so an
//! [`crate::instrument::Instrumenter`] can never run against a partial table.

use std::collections::BTreeMap;

use ilprobe_common::{ProbeEntry, ProbeKind, ProbeKindSet};

use crate::domain::ChannelError;

/// Base of the synthetic address range used by [`ProbeTable::synthetic`]
pub const SYNTHETIC_PROBE_BASE: u64 = 0x7f00_0000_1000;

/// Mapping from probe kind to native entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTable {
    addresses: BTreeMap<ProbeKind, u64>,
}

impl ProbeTable {
    /// Validate handshake rows against the kinds this side asked for
    ///
    /// Unknown codes, arity disagreement and missing kinds are protocol
    /// mismatches. Duplicates and null addresses are malformed.
    pub(crate) fn from_entries(
        entries: &[ProbeEntry],
        required: ProbeKindSet,
    ) -> Result<Self, ChannelError> {
        let mut addresses = BTreeMap::new();
        for entry in entries {
            let kind = ProbeKind::from_code(entry.kind).ok_or_else(|| {
                ChannelError::ProtocolMismatch(format!("unknown probe kind code {}", entry.kind))
            })?;
            if entry.arity != kind.arity() {
                return Err(ChannelError::ProtocolMismatch(format!(
                    "{} probe has arity {}, expected {}",
                    kind.name(),
                    entry.arity,
                    kind.arity()
                )));
            }
            if entry.address == 0 {
                return Err(ChannelError::MalformedMessage(format!(
                    "null address for {} probe",
                    kind.name()
                )));
            }
            if addresses.insert(kind, entry.address).is_some() {
                return Err(ChannelError::MalformedMessage(format!(
                    "duplicate entry for {} probe",
                    kind.name()
                )));
            }
        }

        let missing: Vec<&str> =
            required.iter().filter(|kind| !addresses.contains_key(kind)).map(ProbeKind::name).collect();
        if !missing.is_empty() {
            return Err(ChannelError::ProtocolMismatch(format!(
                "engine did not supply probes: {}",
                missing.join(", ")
            )));
        }

        Ok(Self { addresses })
    }

    /// Build a table without a handshake
    ///
    /// Intended for offline rewriting and tests. Null addresses are dropped.
    #[must_use]
    pub fn fabricate(addresses: impl IntoIterator<Item = (ProbeKind, u64)>) -> Self {
        Self { addresses: addresses.into_iter().filter(|(_, address)| *address != 0).collect() }
    }

    /// Fabricated table covering every kind with recognizable fake addresses
    #[must_use]
    pub fn synthetic() -> Self {
        Self::fabricate(ProbeKind::ALL.map(|kind| (kind, synthetic_address(kind))))
    }

    /// Entry point for `kind`
    #[must_use]
    pub fn address(&self, kind: ProbeKind) -> Option<u64> {
        self.addresses.get(&kind).copied()
    }

    /// Kinds present in the table
    #[must_use]
    pub fn kinds(&self) -> ProbeKindSet {
        self.addresses.keys().fold(ProbeKindSet::EMPTY, |set, kind| set.with(*kind))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Rows in wire-code order
    pub fn iter(&self) -> impl Iterator<Item = (ProbeKind, u64)> + '_ {
        self.addresses.iter().map(|(kind, address)| (*kind, *address))
    }
}

/// Fake address for `kind` in the synthetic range
#[must_use]
pub fn synthetic_address(kind: ProbeKind) -> u64 {
    SYNTHETIC_PROBE_BASE + u64::from(kind.code()) * 0x10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_entries() -> Vec<ProbeEntry> {
        ProbeKind::ALL.iter().map(|kind| ProbeEntry::new(*kind, synthetic_address(*kind))).collect()
    }

    #[test]
    fn test_accepts_complete_table() {
        let table = ProbeTable::from_entries(&full_entries(), ProbeKindSet::all()).unwrap();
        assert_eq!(table.len(), ProbeKind::ALL.len());
        assert_eq!(table.address(ProbeKind::Throw), Some(SYNTHETIC_PROBE_BASE + 14 * 0x10));
        assert_eq!(table, ProbeTable::synthetic());
    }

    #[test]
    fn test_missing_kind_is_mismatch() {
        let mut entries = full_entries();
        entries.retain(|e| e.kind != ProbeKind::Return.code());
        let err = ProbeTable::from_entries(&entries, ProbeKindSet::all()).unwrap_err();
        assert!(matches!(err, ChannelError::ProtocolMismatch(ref m) if m.contains("return")));

        let partial = ProbeKindSet::all().without(ProbeKind::Return);
        assert!(ProbeTable::from_entries(&entries, partial).is_ok());
    }

    #[test]
    fn test_arity_and_unknown_code_are_mismatch() {
        let mut entries = full_entries();
        entries[0].arity = 5;
        assert!(matches!(
            ProbeTable::from_entries(&entries, ProbeKindSet::all()),
            Err(ChannelError::ProtocolMismatch(_))
        ));

        let mut entries = full_entries();
        entries.push(ProbeEntry { kind: 99, arity: 2, _reserved: 0, address: 1 });
        assert!(matches!(
            ProbeTable::from_entries(&entries, ProbeKindSet::all()),
            Err(ChannelError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn test_duplicates_and_null_are_malformed() {
        let mut entries = full_entries();
        entries.push(ProbeEntry::new(ProbeKind::Call, 0x1234));
        assert!(matches!(
            ProbeTable::from_entries(&entries, ProbeKindSet::all()),
            Err(ChannelError::MalformedMessage(_))
        ));

        let mut entries = full_entries();
        entries[3].address = 0;
        assert!(matches!(
            ProbeTable::from_entries(&entries, ProbeKindSet::all()),
            Err(ChannelError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_fabricate_partial() {
        let table = ProbeTable::fabricate([(ProbeKind::MethodEnter, 0x10), (ProbeKind::Call, 0)]);
        assert_eq!(table.kinds(), ProbeKindSet::EMPTY.with(ProbeKind::MethodEnter));
    }
}
