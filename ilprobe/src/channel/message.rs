//! Typed handshake and shutdown messages

use ilprobe_common::{
    ProbeEntry, ProbeKindSet, HANDSHAKE_REQUEST_LEN, HANDSHAKE_RESPONSE_HEADER_LEN, PROBE_ENTRY_LEN,
    PROTOCOL_MAGIC, PROTOCOL_VERSION,
};

use crate::domain::ChannelError;

/// Handshake request payload (tag 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u16,
    pub capabilities: ProbeKindSet,
    pub pid: u32,
}

impl HandshakeRequest {
    /// Request for this build's protocol version
    #[must_use]
    pub fn new(capabilities: ProbeKindSet, pid: u32) -> Self {
        Self { version: PROTOCOL_VERSION, capabilities, pid }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_REQUEST_LEN);
        out.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.capabilities.0.to_le_bytes());
        out.extend_from_slice(&self.pid.to_le_bytes());
        out
    }

    /// Decode a request payload
    ///
    /// # Errors
    /// Returns [`ChannelError::MalformedMessage`] on a length or magic mismatch
    pub fn decode(payload: &[u8]) -> Result<Self, ChannelError> {
        if payload.len() != HANDSHAKE_REQUEST_LEN {
            return Err(ChannelError::MalformedMessage(format!(
                "handshake request of {} bytes, expected {HANDSHAKE_REQUEST_LEN}",
                payload.len()
            )));
        }
        let magic = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if magic != PROTOCOL_MAGIC {
            return Err(ChannelError::MalformedMessage(format!("bad magic 0x{magic:08x}")));
        }
        Ok(Self {
            version: u16::from_le_bytes([payload[4], payload[5]]),
            capabilities: ProbeKindSet(u32::from_le_bytes([
                payload[6], payload[7], payload[8], payload[9],
            ])),
            pid: u32::from_le_bytes([payload[10], payload[11], payload[12], payload[13]]),
        })
    }
}

/// Handshake response payload (tag 2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub version: u16,
    pub entries: Vec<ProbeEntry>,
}

impl HandshakeResponse {
    /// Encode a response
    ///
    /// # Errors
    /// Returns [`ChannelError::MalformedMessage`] for more than `u16::MAX` entries
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let count = u16::try_from(self.entries.len())
            .map_err(|_| ChannelError::MalformedMessage("too many probe entries".to_string()))?;
        let mut out =
            Vec::with_capacity(HANDSHAKE_RESPONSE_HEADER_LEN + self.entries.len() * PROBE_ENTRY_LEN);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        Ok(out)
    }

    /// Decode a response payload
    ///
    /// The version is checked before the entries: a peer speaking another
    /// version may use another entry layout.
    ///
    /// # Errors
    /// Returns [`ChannelError::ProtocolMismatch`] for another protocol
    /// version, [`ChannelError::MalformedMessage`] on any length mismatch
    pub fn decode(payload: &[u8]) -> Result<Self, ChannelError> {
        if payload.len() < HANDSHAKE_RESPONSE_HEADER_LEN {
            return Err(ChannelError::MalformedMessage(format!(
                "handshake response of {} bytes",
                payload.len()
            )));
        }
        let version = u16::from_le_bytes([payload[0], payload[1]]);
        if version != PROTOCOL_VERSION {
            return Err(ChannelError::ProtocolMismatch(format!(
                "engine speaks protocol version {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        let count = usize::from(u16::from_le_bytes([payload[2], payload[3]]));
        let expected = HANDSHAKE_RESPONSE_HEADER_LEN + count * PROBE_ENTRY_LEN;
        if payload.len() != expected {
            return Err(ChannelError::MalformedMessage(format!(
                "handshake response of {} bytes for {count} entries, expected {expected}",
                payload.len()
            )));
        }
        let entries = payload[HANDSHAKE_RESPONSE_HEADER_LEN..]
            .chunks_exact(PROBE_ENTRY_LEN)
            .map(|chunk| {
                let mut row = [0u8; PROBE_ENTRY_LEN];
                row.copy_from_slice(chunk);
                ProbeEntry::from_bytes(&row)
            })
            .collect();
        Ok(Self { version, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilprobe_common::ProbeKind;

    #[test]
    fn test_request_layout() {
        let request = HandshakeRequest::new(ProbeKindSet::EMPTY.with(ProbeKind::Call), 4242);
        let bytes = request.encode();
        assert_eq!(bytes.len(), HANDSHAKE_REQUEST_LEN);
        assert_eq!(&bytes[0..4], b"ILPR");
        assert_eq!(HandshakeRequest::decode(&bytes).unwrap(), request);

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(HandshakeRequest::decode(&bad), Err(ChannelError::MalformedMessage(_))));
    }

    #[test]
    fn test_response_version_and_length() {
        let response = HandshakeResponse {
            version: PROTOCOL_VERSION,
            entries: vec![ProbeEntry::new(ProbeKind::Throw, 0x1000)],
        };
        let mut bytes = response.encode().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(HandshakeResponse::decode(&bytes).unwrap(), response);

        bytes.push(0);
        assert!(matches!(HandshakeResponse::decode(&bytes), Err(ChannelError::MalformedMessage(_))));

        bytes[0] = 9;
        assert!(matches!(HandshakeResponse::decode(&bytes), Err(ChannelError::ProtocolMismatch(_))));
    }
}
