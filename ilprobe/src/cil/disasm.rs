//! Instruction decoding and listing
//!
//! Decodes one opcode (prefixes are separate instructions here) with its
//! operand. Branch operands are resolved to absolute targets, measured from
//! the end of the instruction as ECMA-335 specifies.

use std::fmt;

use super::opcodes::{self, OpCode, OperandKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode 0x{value:x} at IL_{offset:04x}")]
    UnknownOpcode { offset: u32, value: u16 },

    #[error("instruction at IL_{0:04x} is truncated")]
    Truncated(u32),
}

/// Decoded operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i64),
    Real(f64),
    Var(u16),
    Token(u32),
    /// Absolute branch target (may lie outside the code for corrupt input)
    Target(i64),
    /// Absolute `switch` targets
    Switch(Vec<i64>),
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: &'static OpCode,
    pub operand: Operand,
    /// Encoded length including opcode and operand bytes
    pub len: u32,
}

impl Instruction {
    /// Offset of the first byte after this instruction
    #[must_use]
    pub fn end(&self) -> u32 {
        self.offset + self.len
    }

    /// Branch targets (single for branches, many for `switch`)
    #[must_use]
    pub fn targets(&self) -> Vec<i64> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Token operand, if any
    #[must_use]
    pub fn token(&self) -> Option<u32> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode.name)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int(value) => write!(f, " {value}"),
            Operand::Real(value) => write!(f, " {value}"),
            Operand::Var(index) => write!(f, " V_{index}"),
            Operand::Token(token) => write!(f, " 0x{token:08x}"),
            Operand::Target(target) => write!(f, " IL_{target:04x}"),
            Operand::Switch(targets) => {
                let labels: Vec<String> = targets.iter().map(|t| format!("IL_{t:04x}")).collect();
                write!(f, " ({})", labels.join(", "))
            }
        }
    }
}

fn slice(code: &[u8], at: usize, len: usize, offset: u32) -> Result<&[u8], DecodeError> {
    at.checked_add(len)
        .and_then(|end| code.get(at..end))
        .ok_or(DecodeError::Truncated(offset))
}

fn read_i32(code: &[u8], at: usize, offset: u32) -> Result<i32, DecodeError> {
    let b = slice(code, at, 4, offset)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decode the instruction starting at `offset`
///
/// # Errors
/// Returns an error on an unknown opcode or when the operand is cut off
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn decode_at(code: &[u8], offset: u32) -> Result<Instruction, DecodeError> {
    let start = offset as usize;
    let opcode = opcodes::decode(code, start).map_err(|value| match value {
        Some(value) => DecodeError::UnknownOpcode { offset, value },
        None => DecodeError::Truncated(offset),
    })?;
    let at = start + opcode.size();

    let (operand, operand_len) = match opcode.operand {
        OperandKind::None => (Operand::None, 0),
        OperandKind::ShortVar => (Operand::Var(u16::from(slice(code, at, 1, offset)?[0])), 1),
        OperandKind::Var => {
            let b = slice(code, at, 2, offset)?;
            (Operand::Var(u16::from_le_bytes([b[0], b[1]])), 2)
        }
        OperandKind::ShortI => {
            (Operand::Int(i64::from(i8::from_le_bytes([slice(code, at, 1, offset)?[0]]))), 1)
        }
        OperandKind::I => (Operand::Int(i64::from(read_i32(code, at, offset)?)), 4),
        OperandKind::I8 => {
            let b = slice(code, at, 8, offset)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            (Operand::Int(i64::from_le_bytes(raw)), 8)
        }
        OperandKind::ShortR => {
            let b = slice(code, at, 4, offset)?;
            (Operand::Real(f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))), 4)
        }
        OperandKind::R => {
            let b = slice(code, at, 8, offset)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            (Operand::Real(f64::from_le_bytes(raw)), 8)
        }
        OperandKind::ShortBrTarget => {
            let disp = i8::from_le_bytes([slice(code, at, 1, offset)?[0]]);
            let end = i64::from(offset) + (opcode.size() + 1) as i64;
            (Operand::Target(end + i64::from(disp)), 1)
        }
        OperandKind::BrTarget => {
            let disp = read_i32(code, at, offset)?;
            let end = i64::from(offset) + (opcode.size() + 4) as i64;
            (Operand::Target(end + i64::from(disp)), 4)
        }
        OperandKind::Token => {
            (Operand::Token(u32::from_le_bytes(read_i32(code, at, offset)?.to_le_bytes())), 4)
        }
        OperandKind::Switch => {
            let count = u32::from_le_bytes(read_i32(code, at, offset)?.to_le_bytes()) as usize;
            let table_len = count
                .checked_mul(4)
                .and_then(|n| n.checked_add(4))
                .ok_or(DecodeError::Truncated(offset))?;
            slice(code, at, table_len, offset)?;
            let end = i64::from(offset) + (opcode.size() + table_len) as i64;
            let mut targets = Vec::with_capacity(count);
            for i in 0..count {
                targets.push(end + i64::from(read_i32(code, at + 4 + i * 4, offset)?));
            }
            (Operand::Switch(targets), table_len)
        }
    };

    Ok(Instruction { offset, opcode, operand, len: (opcode.size() + operand_len) as u32 })
}

/// Decode a whole code buffer
///
/// # Errors
/// Returns the first decoding error encountered
#[allow(clippy::cast_possible_truncation)]
pub fn disassemble(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut out = Vec::new();
    let mut offset = 0u32;
    while (offset as usize) < code.len() {
        let instruction = decode_at(code, offset)?;
        offset = instruction.end();
        out.push(instruction);
    }
    Ok(out)
}

/// Render a listing, one instruction per line
#[must_use]
pub fn listing(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instruction in instructions {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
    out
}
