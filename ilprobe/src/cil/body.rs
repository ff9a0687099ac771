//! # IL Method Body Format
//!
//! Parses and emits the ECMA-335 (II.25.4) method body layout:
//!
//! ```text
//! ┌────────────────────┬──────────────┬─────┬──────────────────────────┐
//! │ tiny (1B) / fat    │ IL code      │ pad │ extra sections (EH ...)  │
//! │ header (12B)       │              │ →4B │ small or fat clauses     │
//! └────────────────────┴──────────────┴─────┴──────────────────────────┘
//! ```
//!
//! Parsing accepts tiny and fat headers and both clause encodings.
//! Encoding always produces a fat header and fat clauses, which the runtime
//! accepts for any method.

use thiserror::Error;

const TINY_FORMAT: u8 = 0x2;
const FAT_FORMAT: u16 = 0x3;
const FORMAT_MASK: u8 = 0x3;
const FLAG_MORE_SECTS: u16 = 0x8;
const FLAG_INIT_LOCALS: u16 = 0x10;
const FAT_HEADER_DWORDS: u16 = 3;
const FAT_HEADER_LEN: usize = 12;
const TINY_MAX_STACK: u16 = 8;

const SECT_EH_TABLE: u8 = 0x1;
const SECT_KIND_MASK: u8 = 0x3F;
const SECT_FAT_FORMAT: u8 = 0x40;
const SECT_MORE_SECTS: u8 = 0x80;
const SMALL_CLAUSE_LEN: usize = 12;
const FAT_CLAUSE_LEN: usize = 24;
const MAX_FAT_SECTION_LEN: usize = 0x00FF_FFFF;

const CLAUSE_EXCEPTION: u32 = 0x0;
const CLAUSE_FILTER: u32 = 0x1;
const CLAUSE_FINALLY: u32 = 0x2;
const CLAUSE_FAULT: u32 = 0x4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    #[error("method body is empty")]
    Empty,

    #[error("unrecognized header format 0x{0:x}")]
    BadHeader(u8),

    #[error("method body truncated: {0}")]
    Truncated(&'static str),

    #[error("unknown exception clause flags 0x{0:x}")]
    UnknownClauseKind(u32),

    #[error("method body too large to encode: {0}")]
    TooLarge(&'static str),
}

/// Handler kind of an exception clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    /// Typed catch; holds the class token
    Catch(u32),
    /// Filtered catch; holds the offset of the filter block
    Filter(u32),
    Finally,
    Fault,
}

/// One exception-handling region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionClause {
    pub kind: ClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl ExceptionClause {
    /// Exclusive end of the protected range
    #[must_use]
    pub fn try_end(&self) -> u32 {
        self.try_offset.saturating_add(self.try_length)
    }

    /// Exclusive end of the handler range
    #[must_use]
    pub fn handler_end(&self) -> u32 {
        self.handler_offset.saturating_add(self.handler_length)
    }

    /// Offset of the filter block, if any
    #[must_use]
    pub fn filter_offset(&self) -> Option<u32> {
        match self.kind {
            ClauseKind::Filter(offset) => Some(offset),
            _ => None,
        }
    }

    fn flags_and_extra(&self) -> (u32, u32) {
        match self.kind {
            ClauseKind::Catch(token) => (CLAUSE_EXCEPTION, token),
            ClauseKind::Filter(offset) => (CLAUSE_FILTER, offset),
            ClauseKind::Finally => (CLAUSE_FINALLY, 0),
            ClauseKind::Fault => (CLAUSE_FAULT, 0),
        }
    }

    fn from_parts(
        flags: u32,
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        extra: u32,
    ) -> Result<Self, BodyError> {
        let kind = match flags {
            CLAUSE_EXCEPTION => ClauseKind::Catch(extra),
            CLAUSE_FILTER => ClauseKind::Filter(extra),
            CLAUSE_FINALLY => ClauseKind::Finally,
            CLAUSE_FAULT => ClauseKind::Fault,
            other => return Err(BodyError::UnknownClauseKind(other)),
        };
        Ok(Self { kind, try_offset, try_length, handler_offset, handler_length })
    }
}

/// A decoded method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    pub max_stack: u16,
    pub init_locals: bool,
    /// `StandAloneSig` token of the locals signature, 0 when there are none
    pub local_sig_token: u32,
    pub code: Vec<u8>,
    pub clauses: Vec<ExceptionClause>,
}

struct Reader<'a> {
    raw: &'a [u8],
}

impl Reader<'_> {
    fn bytes(&self, at: usize, len: usize, what: &'static str) -> Result<&[u8], BodyError> {
        at.checked_add(len)
            .and_then(|end| self.raw.get(at..end))
            .ok_or(BodyError::Truncated(what))
    }

    fn u8(&self, at: usize, what: &'static str) -> Result<u8, BodyError> {
        Ok(self.bytes(at, 1, what)?[0])
    }

    fn u16(&self, at: usize, what: &'static str) -> Result<u16, BodyError> {
        let b = self.bytes(at, 2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u24(&self, at: usize, what: &'static str) -> Result<u32, BodyError> {
        let b = self.bytes(at, 3, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn u32(&self, at: usize, what: &'static str) -> Result<u32, BodyError> {
        let b = self.bytes(at, 4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

impl MethodBody {
    /// Decode a raw method body as handed over by the runtime
    ///
    /// # Errors
    /// Returns an error if the header is unknown or any part is truncated
    pub fn parse(raw: &[u8]) -> Result<Self, BodyError> {
        let reader = Reader { raw };
        let first = *raw.first().ok_or(BodyError::Empty)?;

        match first & FORMAT_MASK {
            TINY_FORMAT => {
                let size = usize::from(first >> 2);
                let code = reader.bytes(1, size, "tiny code")?.to_vec();
                Ok(Self {
                    max_stack: TINY_MAX_STACK,
                    init_locals: false,
                    local_sig_token: 0,
                    code,
                    clauses: Vec::new(),
                })
            }
            0x3 => Self::parse_fat(&reader),
            other => Err(BodyError::BadHeader(other)),
        }
    }

    fn parse_fat(reader: &Reader<'_>) -> Result<Self, BodyError> {
        let flags_and_size = reader.u16(0, "fat header")?;
        let flags = flags_and_size & 0x0FFF;
        let header_len = usize::from(flags_and_size >> 12) * 4;
        if header_len < FAT_HEADER_LEN {
            return Err(BodyError::Truncated("fat header size"));
        }
        let max_stack = reader.u16(2, "max stack")?;
        let code_size = reader.u32(4, "code size")? as usize;
        let local_sig_token = reader.u32(8, "locals token")?;
        let code = reader.bytes(header_len, code_size, "fat code")?.to_vec();

        let mut clauses = Vec::new();
        let mut more = flags & FLAG_MORE_SECTS != 0;
        let mut pos = align4(header_len + code_size);
        while more {
            let kind = reader.u8(pos, "section header")?;
            let fat = kind & SECT_FAT_FORMAT != 0;
            let (data_size, clause_len) = if fat {
                (reader.u24(pos + 1, "section size")? as usize, FAT_CLAUSE_LEN)
            } else {
                (usize::from(reader.u8(pos + 1, "section size")?), SMALL_CLAUSE_LEN)
            };
            if data_size < 4 {
                return Err(BodyError::Truncated("section size"));
            }
            reader.bytes(pos, data_size, "section data")?;

            if kind & SECT_KIND_MASK == SECT_EH_TABLE {
                let count = (data_size - 4) / clause_len;
                for i in 0..count {
                    let at = pos + 4 + i * clause_len;
                    let clause = if fat {
                        ExceptionClause::from_parts(
                            reader.u32(at, "clause")?,
                            reader.u32(at + 4, "clause")?,
                            reader.u32(at + 8, "clause")?,
                            reader.u32(at + 12, "clause")?,
                            reader.u32(at + 16, "clause")?,
                            reader.u32(at + 20, "clause")?,
                        )?
                    } else {
                        ExceptionClause::from_parts(
                            u32::from(reader.u16(at, "clause")?),
                            u32::from(reader.u16(at + 2, "clause")?),
                            u32::from(reader.u8(at + 4, "clause")?),
                            u32::from(reader.u16(at + 5, "clause")?),
                            u32::from(reader.u8(at + 7, "clause")?),
                            reader.u32(at + 8, "clause")?,
                        )?
                    };
                    clauses.push(clause);
                }
            }

            more = kind & SECT_MORE_SECTS != 0;
            pos = align4(pos + data_size);
        }

        Ok(Self {
            max_stack,
            init_locals: flags & FLAG_INIT_LOCALS != 0,
            local_sig_token,
            code,
            clauses,
        })
    }

    /// Encode with a fat header and, when there are clauses, one fat EH section
    ///
    /// # Errors
    /// Returns an error if the code or clause table exceeds the format limits
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Result<Vec<u8>, BodyError> {
        let code_size =
            u32::try_from(self.code.len()).map_err(|_| BodyError::TooLarge("code size"))?;
        let section_len = 4 + self.clauses.len() * FAT_CLAUSE_LEN;
        if section_len > MAX_FAT_SECTION_LEN {
            return Err(BodyError::TooLarge("exception clause table"));
        }

        let mut flags = FAT_FORMAT;
        if !self.clauses.is_empty() {
            flags |= FLAG_MORE_SECTS;
        }
        if self.init_locals {
            flags |= FLAG_INIT_LOCALS;
        }

        let mut out = Vec::with_capacity(FAT_HEADER_LEN + self.code.len() + section_len + 3);
        out.extend_from_slice(&(flags | (FAT_HEADER_DWORDS << 12)).to_le_bytes());
        out.extend_from_slice(&self.max_stack.to_le_bytes());
        out.extend_from_slice(&code_size.to_le_bytes());
        out.extend_from_slice(&self.local_sig_token.to_le_bytes());
        out.extend_from_slice(&self.code);

        if !self.clauses.is_empty() {
            out.resize(align4(out.len()), 0);
            out.push(SECT_EH_TABLE | SECT_FAT_FORMAT);
            out.extend_from_slice(&(section_len as u32).to_le_bytes()[..3]);
            for clause in &self.clauses {
                let (kind_flags, extra) = clause.flags_and_extra();
                for value in [
                    kind_flags,
                    clause.try_offset,
                    clause.try_length,
                    clause.handler_offset,
                    clause.handler_length,
                    extra,
                ] {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tiny_body() {
        // tiny header: size 2 → (2 << 2) | 0x2
        let body = MethodBody::parse(&[0x0A, 0x00, 0x2A]).unwrap();
        assert_eq!(body.code, vec![0x00, 0x2A]);
        assert_eq!(body.max_stack, 8);
        assert!(body.clauses.is_empty());
    }

    #[test]
    fn test_parse_tiny_truncated() {
        assert_eq!(MethodBody::parse(&[0x0E, 0x00]), Err(BodyError::Truncated("tiny code")));
        assert_eq!(MethodBody::parse(&[]), Err(BodyError::Empty));
        assert_eq!(MethodBody::parse(&[0x01]), Err(BodyError::BadHeader(1)));
    }

    #[test]
    fn test_parse_fat_with_small_clauses() {
        let mut raw = vec![0x1B, 0x30, 0x02, 0x00];
        raw.extend_from_slice(&6u32.to_le_bytes());
        raw.extend_from_slice(&0x1100_0001u32.to_le_bytes());
        // try { nop; leave.s +1 } finally { endfinally } ret
        raw.extend_from_slice(&[0x00, 0xDE, 0x01, 0xDC, 0x2A, 0x00]);
        raw.resize(20, 0);
        // small EH section with one finally clause
        raw.extend_from_slice(&[0x01, 16, 0, 0]);
        raw.extend_from_slice(&2u16.to_le_bytes());
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.push(3);
        raw.extend_from_slice(&3u16.to_le_bytes());
        raw.push(1);
        raw.extend_from_slice(&0u32.to_le_bytes());

        let body = MethodBody::parse(&raw).unwrap();
        assert!(body.init_locals);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.local_sig_token, 0x1100_0001);
        assert_eq!(body.code.len(), 6);
        assert_eq!(
            body.clauses,
            vec![ExceptionClause {
                kind: ClauseKind::Finally,
                try_offset: 0,
                try_length: 3,
                handler_offset: 3,
                handler_length: 1,
            }]
        );
    }

    #[test]
    fn test_encode_then_parse_preserves_clauses() {
        let body = MethodBody {
            max_stack: 3,
            init_locals: true,
            local_sig_token: 0x1100_0004,
            code: vec![0x00, 0x00, 0x00, 0x2A, 0x26, 0xDE, 0x00],
            clauses: vec![ExceptionClause {
                kind: ClauseKind::Catch(0x0100_0002),
                try_offset: 0,
                try_length: 4,
                handler_offset: 4,
                handler_length: 3,
            }],
        };
        let raw = body.encode().unwrap();
        // header(12) + code(7) + pad(1) + section(4 + 24)
        assert_eq!(raw.len(), 48);
        assert_eq!(MethodBody::parse(&raw).unwrap(), body);
    }

    #[test]
    fn test_unknown_clause_kind() {
        let err = ExceptionClause::from_parts(8, 0, 1, 1, 1, 0).unwrap_err();
        assert_eq!(err, BodyError::UnknownClauseKind(8));
    }
}
