//! Boundary index over the original code
//!
//! Groups each instruction with its prefixes into a [`Unit`]. Unit starts
//! (plus the end of the code) are the only offsets where probes may be
//! inserted, branches may land, and exception clauses may begin or end.

use std::collections::HashMap;

use crate::cil::{decode_at, DecodeError, ExceptionClause, FlowControl, Instruction};
use crate::cil::opcodes::op;
use crate::domain::{IlOffset, RejectReason};

/// An instruction together with the prefixes fused to it
#[derive(Debug, Clone)]
pub struct Unit {
    /// Offset of the first prefix, or of the instruction when unprefixed
    pub offset: u32,
    pub prefixes: Vec<Instruction>,
    pub instruction: Instruction,
}

impl Unit {
    /// Offset just past the instruction
    #[must_use]
    pub fn end(&self) -> u32 {
        self.instruction.end()
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.end() - self.offset
    }

    #[must_use]
    pub fn has_prefix(&self, value: u16) -> bool {
        self.prefixes.iter().any(|p| p.opcode.value == value)
    }

    /// Opcode value of the instruction proper
    #[must_use]
    pub fn value(&self) -> u16 {
        self.instruction.opcode.value
    }

    /// Whether control can continue to the next unit
    #[must_use]
    pub fn falls_through(&self) -> bool {
        match self.instruction.opcode.flow {
            FlowControl::Branch | FlowControl::Return | FlowControl::Throw => false,
            FlowControl::Call => self.value() != op::JMP,
            FlowControl::Next | FlowControl::Break | FlowControl::CondBranch | FlowControl::Meta => {
                true
            }
        }
    }
}

/// Validated unit index of one method body
#[derive(Debug)]
pub struct Scan {
    pub units: Vec<Unit>,
    pub code_len: u32,
    starts: HashMap<u32, usize>,
}

impl Scan {
    /// Index of the unit starting at `offset`
    #[must_use]
    pub fn unit_at(&self, offset: u32) -> Option<usize> {
        self.starts.get(&offset).copied()
    }

    /// Unit a branch target resolves to
    #[must_use]
    pub fn target_unit(&self, target: i64) -> Option<usize> {
        u32::try_from(target).ok().and_then(|t| self.unit_at(t))
    }

    /// Whether `offset` is a unit start or the end of the code
    #[must_use]
    pub fn is_boundary(&self, offset: u32) -> bool {
        offset == self.code_len || self.starts.contains_key(&offset)
    }
}

/// Decode and validate `code` with its exception clauses
///
/// # Errors
/// Returns the first structural defect found
pub fn scan(code: &[u8], clauses: &[ExceptionClause]) -> Result<Scan, RejectReason> {
    if code.is_empty() {
        return Err(RejectReason::EmptyBody);
    }
    let code_len = u32::try_from(code.len()).map_err(|_| RejectReason::TooLarge("code size"))?;

    let mut units = Vec::new();
    let mut prefixes = Vec::new();
    let mut unit_offset = 0u32;
    let mut offset = 0u32;
    while offset < code_len {
        let instruction = decode_at(code, offset).map_err(|e| match e {
            DecodeError::UnknownOpcode { offset, value } => {
                RejectReason::UnknownOpcode { offset: IlOffset(offset), opcode: value }
            }
            DecodeError::Truncated(offset) => RejectReason::TruncatedInstruction(IlOffset(offset)),
        })?;
        if prefixes.is_empty() {
            unit_offset = offset;
        }
        offset = instruction.end();
        if instruction.opcode.is_prefix() {
            prefixes.push(instruction);
        } else {
            units.push(Unit {
                offset: unit_offset,
                prefixes: std::mem::take(&mut prefixes),
                instruction,
            });
        }
    }
    if !prefixes.is_empty() {
        return Err(RejectReason::DanglingPrefix(IlOffset(unit_offset)));
    }

    let starts = units.iter().enumerate().map(|(i, u)| (u.offset, i)).collect();
    let scan = Scan { units, code_len, starts };

    for unit in &scan.units {
        for target in unit.instruction.targets() {
            if scan.target_unit(target).is_none() {
                return Err(RejectReason::BadBranchTarget {
                    offset: IlOffset(unit.instruction.offset),
                    target,
                });
            }
        }
    }

    if let Some(last) = scan.units.last() {
        if last.falls_through() {
            return Err(RejectReason::FallsOffEnd(IlOffset(last.instruction.offset)));
        }
    }

    for (index, clause) in clauses.iter().enumerate() {
        if clause.try_length == 0 || clause.handler_length == 0 {
            return Err(RejectReason::EmptyClause { index });
        }
        let mut edges =
            vec![clause.try_offset, clause.try_end(), clause.handler_offset, clause.handler_end()];
        edges.extend(clause.filter_offset());
        for edge in edges {
            if edge > code_len || !scan.is_boundary(edge) {
                return Err(RejectReason::MisalignedClause { index, offset: edge });
            }
        }
        // handlers and filters must begin on an instruction
        if clause.try_offset == code_len
            || clause.handler_offset == code_len
            || clause.filter_offset() == Some(code_len)
        {
            return Err(RejectReason::MisalignedClause { index, offset: code_len });
        }
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cil::ClauseKind;

    #[test]
    fn test_prefix_is_fused() {
        // ldarg.0 ; tail. call 0x0A000001 ; ret
        let code = [0x02, 0xFE, 0x14, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        let scan = scan(&code, &[]).unwrap();
        assert_eq!(scan.units.len(), 3);
        assert_eq!(scan.units[1].offset, 1);
        assert_eq!(scan.units[1].instruction.offset, 3);
        assert!(scan.units[1].has_prefix(op::TAIL));
        assert!(!scan.is_boundary(3));
        assert!(scan.is_boundary(9));
    }

    #[test]
    fn test_rejects_structural_defects() {
        assert_eq!(scan(&[], &[]).unwrap_err(), RejectReason::EmptyBody);
        assert_eq!(
            scan(&[0xFE, 0x14], &[]).unwrap_err(),
            RejectReason::DanglingPrefix(IlOffset(0))
        );
        assert_eq!(scan(&[0x00], &[]).unwrap_err(), RejectReason::FallsOffEnd(IlOffset(0)));
        // br.s into the middle of ldc.i4
        let code = [0x2B, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert_eq!(
            scan(&code, &[]).unwrap_err(),
            RejectReason::BadBranchTarget { offset: IlOffset(0), target: 3 }
        );
    }

    #[test]
    fn test_rejects_misaligned_clause() {
        // ldc.i4 0 ; pop ; leave.s +0 ; ret
        let code = [0x20, 0, 0, 0, 0, 0x26, 0xDE, 0x00, 0x2A];
        let clause = ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 1,
            try_length: 7,
            handler_offset: 8,
            handler_length: 1,
        };
        assert_eq!(
            scan(&code, &[clause]).unwrap_err(),
            RejectReason::MisalignedClause { index: 0, offset: 1 }
        );

        let empty = ExceptionClause { try_offset: 0, try_length: 0, ..clause };
        assert_eq!(scan(&code, &[empty]).unwrap_err(), RejectReason::EmptyClause { index: 0 });
    }
}
