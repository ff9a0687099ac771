//! CIL bytecode primitives
//!
//! - [`opcodes`]: opcode table (encoding, operand kind, flow, stack behaviour)
//! - [`disasm`]: single-instruction decoder and listings
//! - [`body`]: method body header and exception clause codec

pub mod body;
pub mod disasm;
pub mod opcodes;

pub use body::{BodyError, ClauseKind, ExceptionClause, MethodBody};
pub use disasm::{decode_at, disassemble, listing, DecodeError, Instruction, Operand};
pub use opcodes::{FlowControl, OpCode, OperandKind, Stack};
