//! # CIL Opcode Table
//!
//! Static description of every ECMA-335 opcode: encoding, operand kind,
//! control-flow class and fixed stack behaviour. Two-byte opcodes are stored
//! with their `0xFE` prefix in the high byte (`ceq` is `0xFE01`).
//!
//! Stack behaviour is [`Stack::Var`] for opcodes whose pops/pushes depend on
//! a signature (`call`, `callvirt`, `calli`, `newobj`, `ret`); the scanner
//! resolves those from call-site effects gathered by the descriptor builder.

use std::sync::OnceLock;

/// Operand encoding following the opcode bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// `uint8` local/argument index
    ShortVar,
    /// `uint16` local/argument index
    Var,
    /// `int8` immediate (also `unaligned.` alignment, `no.` flags)
    ShortI,
    /// `int32` immediate
    I,
    /// `int64` immediate
    I8,
    /// `float32` immediate
    ShortR,
    /// `float64` immediate
    R,
    /// `int8` branch displacement
    ShortBrTarget,
    /// `int32` branch displacement
    BrTarget,
    /// metadata token
    Token,
    /// `uint32` count followed by `count` `int32` displacements
    Switch,
}

impl OperandKind {
    /// Operand size in bytes, `None` for `switch`
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::ShortVar | Self::ShortI | Self::ShortBrTarget => Some(1),
            Self::Var => Some(2),
            Self::I | Self::ShortR | Self::BrTarget | Self::Token => Some(4),
            Self::I8 | Self::R => Some(8),
            Self::Switch => None,
        }
    }
}

/// Control-flow class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Next,
    Break,
    Branch,
    CondBranch,
    Call,
    Return,
    Throw,
    /// Instruction prefix
    Meta,
}

/// Number of stack slots popped or pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Fixed(u8),
    Var,
}

/// One opcode definition
#[derive(Debug, PartialEq, Eq)]
pub struct OpCode {
    pub name: &'static str,
    pub value: u16,
    pub operand: OperandKind,
    pub flow: FlowControl,
    pub pops: Stack,
    pub pushes: Stack,
}

impl OpCode {
    /// Encoded size of the opcode itself (1 or 2 bytes)
    #[must_use]
    pub const fn size(&self) -> usize {
        if self.value > 0xFF {
            2
        } else {
            1
        }
    }

    /// Whether this opcode is an instruction prefix
    #[must_use]
    pub fn is_prefix(&self) -> bool {
        self.flow == FlowControl::Meta
    }

    /// Append the opcode bytes to `out`
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, out: &mut Vec<u8>) {
        if self.value > 0xFF {
            out.push((self.value >> 8) as u8);
        }
        out.push(self.value as u8);
    }
}

/// Opcode values the instrumenter matches on or emits
pub mod op {
    pub const LDC_I4: u16 = 0x20;
    pub const LDC_I8: u16 = 0x21;
    pub const JMP: u16 = 0x27;
    pub const CALL: u16 = 0x28;
    pub const CALLI: u16 = 0x29;
    pub const RET: u16 = 0x2A;
    pub const BR_S: u16 = 0x2B;
    pub const BLT_UN_S: u16 = 0x37;
    pub const BR: u16 = 0x38;
    pub const SWITCH: u16 = 0x45;
    pub const CALLVIRT: u16 = 0x6F;
    pub const NEWOBJ: u16 = 0x73;
    pub const THROW: u16 = 0x7A;
    pub const CONV_I: u16 = 0xD3;
    pub const ENDFINALLY: u16 = 0xDC;
    pub const LEAVE: u16 = 0xDD;
    pub const LEAVE_S: u16 = 0xDE;
    pub const ENDFILTER: u16 = 0xFE11;
    pub const TAIL: u16 = 0xFE14;
    pub const RETHROW: u16 = 0xFE1A;

    /// Two-byte opcode escape
    pub const PREFIX_FE: u8 = 0xFE;
}

/// Long form of a short branch opcode
#[must_use]
pub const fn long_form(value: u16) -> Option<u16> {
    match value {
        op::BR_S..=op::BLT_UN_S => Some(value + (op::BR - op::BR_S)),
        op::LEAVE_S => Some(op::LEAVE),
        _ => None,
    }
}

use FlowControl as F;
use OperandKind as O;
use Stack::{Fixed, Var};

const fn def(
    name: &'static str,
    value: u16,
    operand: OperandKind,
    flow: FlowControl,
    pops: Stack,
    pushes: Stack,
) -> OpCode {
    OpCode { name, value, operand, flow, pops, pushes }
}

const N0: Stack = Fixed(0);
const N1: Stack = Fixed(1);
const N2: Stack = Fixed(2);
const N3: Stack = Fixed(3);

/// Every defined opcode
pub static OPCODES: &[OpCode] = &[
    def("nop", 0x00, O::None, F::Next, N0, N0),
    def("break", 0x01, O::None, F::Break, N0, N0),
    def("ldarg.0", 0x02, O::None, F::Next, N0, N1),
    def("ldarg.1", 0x03, O::None, F::Next, N0, N1),
    def("ldarg.2", 0x04, O::None, F::Next, N0, N1),
    def("ldarg.3", 0x05, O::None, F::Next, N0, N1),
    def("ldloc.0", 0x06, O::None, F::Next, N0, N1),
    def("ldloc.1", 0x07, O::None, F::Next, N0, N1),
    def("ldloc.2", 0x08, O::None, F::Next, N0, N1),
    def("ldloc.3", 0x09, O::None, F::Next, N0, N1),
    def("stloc.0", 0x0A, O::None, F::Next, N1, N0),
    def("stloc.1", 0x0B, O::None, F::Next, N1, N0),
    def("stloc.2", 0x0C, O::None, F::Next, N1, N0),
    def("stloc.3", 0x0D, O::None, F::Next, N1, N0),
    def("ldarg.s", 0x0E, O::ShortVar, F::Next, N0, N1),
    def("ldarga.s", 0x0F, O::ShortVar, F::Next, N0, N1),
    def("starg.s", 0x10, O::ShortVar, F::Next, N1, N0),
    def("ldloc.s", 0x11, O::ShortVar, F::Next, N0, N1),
    def("ldloca.s", 0x12, O::ShortVar, F::Next, N0, N1),
    def("stloc.s", 0x13, O::ShortVar, F::Next, N1, N0),
    def("ldnull", 0x14, O::None, F::Next, N0, N1),
    def("ldc.i4.m1", 0x15, O::None, F::Next, N0, N1),
    def("ldc.i4.0", 0x16, O::None, F::Next, N0, N1),
    def("ldc.i4.1", 0x17, O::None, F::Next, N0, N1),
    def("ldc.i4.2", 0x18, O::None, F::Next, N0, N1),
    def("ldc.i4.3", 0x19, O::None, F::Next, N0, N1),
    def("ldc.i4.4", 0x1A, O::None, F::Next, N0, N1),
    def("ldc.i4.5", 0x1B, O::None, F::Next, N0, N1),
    def("ldc.i4.6", 0x1C, O::None, F::Next, N0, N1),
    def("ldc.i4.7", 0x1D, O::None, F::Next, N0, N1),
    def("ldc.i4.8", 0x1E, O::None, F::Next, N0, N1),
    def("ldc.i4.s", 0x1F, O::ShortI, F::Next, N0, N1),
    def("ldc.i4", 0x20, O::I, F::Next, N0, N1),
    def("ldc.i8", 0x21, O::I8, F::Next, N0, N1),
    def("ldc.r4", 0x22, O::ShortR, F::Next, N0, N1),
    def("ldc.r8", 0x23, O::R, F::Next, N0, N1),
    def("dup", 0x25, O::None, F::Next, N1, N2),
    def("pop", 0x26, O::None, F::Next, N1, N0),
    def("jmp", 0x27, O::Token, F::Call, N0, N0),
    def("call", 0x28, O::Token, F::Call, Var, Var),
    def("calli", 0x29, O::Token, F::Call, Var, Var),
    def("ret", 0x2A, O::None, F::Return, Var, N0),
    def("br.s", 0x2B, O::ShortBrTarget, F::Branch, N0, N0),
    def("brfalse.s", 0x2C, O::ShortBrTarget, F::CondBranch, N1, N0),
    def("brtrue.s", 0x2D, O::ShortBrTarget, F::CondBranch, N1, N0),
    def("beq.s", 0x2E, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("bge.s", 0x2F, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("bgt.s", 0x30, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("ble.s", 0x31, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("blt.s", 0x32, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("bne.un.s", 0x33, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("bge.un.s", 0x34, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("bgt.un.s", 0x35, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("ble.un.s", 0x36, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("blt.un.s", 0x37, O::ShortBrTarget, F::CondBranch, N2, N0),
    def("br", 0x38, O::BrTarget, F::Branch, N0, N0),
    def("brfalse", 0x39, O::BrTarget, F::CondBranch, N1, N0),
    def("brtrue", 0x3A, O::BrTarget, F::CondBranch, N1, N0),
    def("beq", 0x3B, O::BrTarget, F::CondBranch, N2, N0),
    def("bge", 0x3C, O::BrTarget, F::CondBranch, N2, N0),
    def("bgt", 0x3D, O::BrTarget, F::CondBranch, N2, N0),
    def("ble", 0x3E, O::BrTarget, F::CondBranch, N2, N0),
    def("blt", 0x3F, O::BrTarget, F::CondBranch, N2, N0),
    def("bne.un", 0x40, O::BrTarget, F::CondBranch, N2, N0),
    def("bge.un", 0x41, O::BrTarget, F::CondBranch, N2, N0),
    def("bgt.un", 0x42, O::BrTarget, F::CondBranch, N2, N0),
    def("ble.un", 0x43, O::BrTarget, F::CondBranch, N2, N0),
    def("blt.un", 0x44, O::BrTarget, F::CondBranch, N2, N0),
    def("switch", 0x45, O::Switch, F::CondBranch, N1, N0),
    def("ldind.i1", 0x46, O::None, F::Next, N1, N1),
    def("ldind.u1", 0x47, O::None, F::Next, N1, N1),
    def("ldind.i2", 0x48, O::None, F::Next, N1, N1),
    def("ldind.u2", 0x49, O::None, F::Next, N1, N1),
    def("ldind.i4", 0x4A, O::None, F::Next, N1, N1),
    def("ldind.u4", 0x4B, O::None, F::Next, N1, N1),
    def("ldind.i8", 0x4C, O::None, F::Next, N1, N1),
    def("ldind.i", 0x4D, O::None, F::Next, N1, N1),
    def("ldind.r4", 0x4E, O::None, F::Next, N1, N1),
    def("ldind.r8", 0x4F, O::None, F::Next, N1, N1),
    def("ldind.ref", 0x50, O::None, F::Next, N1, N1),
    def("stind.ref", 0x51, O::None, F::Next, N2, N0),
    def("stind.i1", 0x52, O::None, F::Next, N2, N0),
    def("stind.i2", 0x53, O::None, F::Next, N2, N0),
    def("stind.i4", 0x54, O::None, F::Next, N2, N0),
    def("stind.i8", 0x55, O::None, F::Next, N2, N0),
    def("stind.r4", 0x56, O::None, F::Next, N2, N0),
    def("stind.r8", 0x57, O::None, F::Next, N2, N0),
    def("add", 0x58, O::None, F::Next, N2, N1),
    def("sub", 0x59, O::None, F::Next, N2, N1),
    def("mul", 0x5A, O::None, F::Next, N2, N1),
    def("div", 0x5B, O::None, F::Next, N2, N1),
    def("div.un", 0x5C, O::None, F::Next, N2, N1),
    def("rem", 0x5D, O::None, F::Next, N2, N1),
    def("rem.un", 0x5E, O::None, F::Next, N2, N1),
    def("and", 0x5F, O::None, F::Next, N2, N1),
    def("or", 0x60, O::None, F::Next, N2, N1),
    def("xor", 0x61, O::None, F::Next, N2, N1),
    def("shl", 0x62, O::None, F::Next, N2, N1),
    def("shr", 0x63, O::None, F::Next, N2, N1),
    def("shr.un", 0x64, O::None, F::Next, N2, N1),
    def("neg", 0x65, O::None, F::Next, N1, N1),
    def("not", 0x66, O::None, F::Next, N1, N1),
    def("conv.i1", 0x67, O::None, F::Next, N1, N1),
    def("conv.i2", 0x68, O::None, F::Next, N1, N1),
    def("conv.i4", 0x69, O::None, F::Next, N1, N1),
    def("conv.i8", 0x6A, O::None, F::Next, N1, N1),
    def("conv.r4", 0x6B, O::None, F::Next, N1, N1),
    def("conv.r8", 0x6C, O::None, F::Next, N1, N1),
    def("conv.u4", 0x6D, O::None, F::Next, N1, N1),
    def("conv.u8", 0x6E, O::None, F::Next, N1, N1),
    def("callvirt", 0x6F, O::Token, F::Call, Var, Var),
    def("cpobj", 0x70, O::Token, F::Next, N2, N0),
    def("ldobj", 0x71, O::Token, F::Next, N1, N1),
    def("ldstr", 0x72, O::Token, F::Next, N0, N1),
    def("newobj", 0x73, O::Token, F::Call, Var, N1),
    def("castclass", 0x74, O::Token, F::Next, N1, N1),
    def("isinst", 0x75, O::Token, F::Next, N1, N1),
    def("conv.r.un", 0x76, O::None, F::Next, N1, N1),
    def("unbox", 0x79, O::Token, F::Next, N1, N1),
    def("throw", 0x7A, O::None, F::Throw, N1, N0),
    def("ldfld", 0x7B, O::Token, F::Next, N1, N1),
    def("ldflda", 0x7C, O::Token, F::Next, N1, N1),
    def("stfld", 0x7D, O::Token, F::Next, N2, N0),
    def("ldsfld", 0x7E, O::Token, F::Next, N0, N1),
    def("ldsflda", 0x7F, O::Token, F::Next, N0, N1),
    def("stsfld", 0x80, O::Token, F::Next, N1, N0),
    def("stobj", 0x81, O::Token, F::Next, N2, N0),
    def("conv.ovf.i1.un", 0x82, O::None, F::Next, N1, N1),
    def("conv.ovf.i2.un", 0x83, O::None, F::Next, N1, N1),
    def("conv.ovf.i4.un", 0x84, O::None, F::Next, N1, N1),
    def("conv.ovf.i8.un", 0x85, O::None, F::Next, N1, N1),
    def("conv.ovf.u1.un", 0x86, O::None, F::Next, N1, N1),
    def("conv.ovf.u2.un", 0x87, O::None, F::Next, N1, N1),
    def("conv.ovf.u4.un", 0x88, O::None, F::Next, N1, N1),
    def("conv.ovf.u8.un", 0x89, O::None, F::Next, N1, N1),
    def("conv.ovf.i.un", 0x8A, O::None, F::Next, N1, N1),
    def("conv.ovf.u.un", 0x8B, O::None, F::Next, N1, N1),
    def("box", 0x8C, O::Token, F::Next, N1, N1),
    def("newarr", 0x8D, O::Token, F::Next, N1, N1),
    def("ldlen", 0x8E, O::None, F::Next, N1, N1),
    def("ldelema", 0x8F, O::Token, F::Next, N2, N1),
    def("ldelem.i1", 0x90, O::None, F::Next, N2, N1),
    def("ldelem.u1", 0x91, O::None, F::Next, N2, N1),
    def("ldelem.i2", 0x92, O::None, F::Next, N2, N1),
    def("ldelem.u2", 0x93, O::None, F::Next, N2, N1),
    def("ldelem.i4", 0x94, O::None, F::Next, N2, N1),
    def("ldelem.u4", 0x95, O::None, F::Next, N2, N1),
    def("ldelem.i8", 0x96, O::None, F::Next, N2, N1),
    def("ldelem.i", 0x97, O::None, F::Next, N2, N1),
    def("ldelem.r4", 0x98, O::None, F::Next, N2, N1),
    def("ldelem.r8", 0x99, O::None, F::Next, N2, N1),
    def("ldelem.ref", 0x9A, O::None, F::Next, N2, N1),
    def("stelem.i", 0x9B, O::None, F::Next, N3, N0),
    def("stelem.i1", 0x9C, O::None, F::Next, N3, N0),
    def("stelem.i2", 0x9D, O::None, F::Next, N3, N0),
    def("stelem.i4", 0x9E, O::None, F::Next, N3, N0),
    def("stelem.i8", 0x9F, O::None, F::Next, N3, N0),
    def("stelem.r4", 0xA0, O::None, F::Next, N3, N0),
    def("stelem.r8", 0xA1, O::None, F::Next, N3, N0),
    def("stelem.ref", 0xA2, O::None, F::Next, N3, N0),
    def("ldelem", 0xA3, O::Token, F::Next, N2, N1),
    def("stelem", 0xA4, O::Token, F::Next, N3, N0),
    def("unbox.any", 0xA5, O::Token, F::Next, N1, N1),
    def("conv.ovf.i1", 0xB3, O::None, F::Next, N1, N1),
    def("conv.ovf.u1", 0xB4, O::None, F::Next, N1, N1),
    def("conv.ovf.i2", 0xB5, O::None, F::Next, N1, N1),
    def("conv.ovf.u2", 0xB6, O::None, F::Next, N1, N1),
    def("conv.ovf.i4", 0xB7, O::None, F::Next, N1, N1),
    def("conv.ovf.u4", 0xB8, O::None, F::Next, N1, N1),
    def("conv.ovf.i8", 0xB9, O::None, F::Next, N1, N1),
    def("conv.ovf.u8", 0xBA, O::None, F::Next, N1, N1),
    def("refanyval", 0xC2, O::Token, F::Next, N1, N1),
    def("ckfinite", 0xC3, O::None, F::Next, N1, N1),
    def("mkrefany", 0xC6, O::Token, F::Next, N1, N1),
    def("ldtoken", 0xD0, O::Token, F::Next, N0, N1),
    def("conv.u2", 0xD1, O::None, F::Next, N1, N1),
    def("conv.u1", 0xD2, O::None, F::Next, N1, N1),
    def("conv.i", 0xD3, O::None, F::Next, N1, N1),
    def("conv.ovf.i", 0xD4, O::None, F::Next, N1, N1),
    def("conv.ovf.u", 0xD5, O::None, F::Next, N1, N1),
    def("add.ovf", 0xD6, O::None, F::Next, N2, N1),
    def("add.ovf.un", 0xD7, O::None, F::Next, N2, N1),
    def("mul.ovf", 0xD8, O::None, F::Next, N2, N1),
    def("mul.ovf.un", 0xD9, O::None, F::Next, N2, N1),
    def("sub.ovf", 0xDA, O::None, F::Next, N2, N1),
    def("sub.ovf.un", 0xDB, O::None, F::Next, N2, N1),
    def("endfinally", 0xDC, O::None, F::Return, N0, N0),
    def("leave", 0xDD, O::BrTarget, F::Branch, N0, N0),
    def("leave.s", 0xDE, O::ShortBrTarget, F::Branch, N0, N0),
    def("stind.i", 0xDF, O::None, F::Next, N2, N0),
    def("conv.u", 0xE0, O::None, F::Next, N1, N1),
    def("arglist", 0xFE00, O::None, F::Next, N0, N1),
    def("ceq", 0xFE01, O::None, F::Next, N2, N1),
    def("cgt", 0xFE02, O::None, F::Next, N2, N1),
    def("cgt.un", 0xFE03, O::None, F::Next, N2, N1),
    def("clt", 0xFE04, O::None, F::Next, N2, N1),
    def("clt.un", 0xFE05, O::None, F::Next, N2, N1),
    def("ldftn", 0xFE06, O::Token, F::Next, N0, N1),
    def("ldvirtftn", 0xFE07, O::Token, F::Next, N1, N1),
    def("ldarg", 0xFE09, O::Var, F::Next, N0, N1),
    def("ldarga", 0xFE0A, O::Var, F::Next, N0, N1),
    def("starg", 0xFE0B, O::Var, F::Next, N1, N0),
    def("ldloc", 0xFE0C, O::Var, F::Next, N0, N1),
    def("ldloca", 0xFE0D, O::Var, F::Next, N0, N1),
    def("stloc", 0xFE0E, O::Var, F::Next, N1, N0),
    def("localloc", 0xFE0F, O::None, F::Next, N1, N1),
    def("endfilter", 0xFE11, O::None, F::Return, N1, N0),
    def("unaligned.", 0xFE12, O::ShortI, F::Meta, N0, N0),
    def("volatile.", 0xFE13, O::None, F::Meta, N0, N0),
    def("tail.", 0xFE14, O::None, F::Meta, N0, N0),
    def("initobj", 0xFE15, O::Token, F::Next, N1, N0),
    def("constrained.", 0xFE16, O::Token, F::Meta, N0, N0),
    def("cpblk", 0xFE17, O::None, F::Next, N3, N0),
    def("initblk", 0xFE18, O::None, F::Next, N3, N0),
    def("no.", 0xFE19, O::ShortI, F::Meta, N0, N0),
    def("rethrow", 0xFE1A, O::None, F::Throw, N0, N0),
    def("sizeof", 0xFE1C, O::Token, F::Next, N0, N1),
    def("refanytype", 0xFE1D, O::None, F::Next, N1, N1),
    def("readonly.", 0xFE1E, O::None, F::Meta, N0, N0),
];

struct Index {
    one_byte: [Option<&'static OpCode>; 256],
    two_byte: [Option<&'static OpCode>; 256],
}

fn index() -> &'static Index {
    static INDEX: OnceLock<Index> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut index = Index { one_byte: [None; 256], two_byte: [None; 256] };
        for opcode in OPCODES {
            let low = usize::from(opcode.value & 0xFF);
            if opcode.value > 0xFF {
                index.two_byte[low] = Some(opcode);
            } else {
                index.one_byte[low] = Some(opcode);
            }
        }
        index
    })
}

/// Look up an opcode by value (`0xFE`-prefixed values for two-byte opcodes)
#[must_use]
pub fn by_value(value: u16) -> Option<&'static OpCode> {
    let low = usize::from(value & 0xFF);
    match value >> 8 {
        0 => index().one_byte[low],
        0xFE => index().two_byte[low],
        _ => None,
    }
}

/// Decode the opcode starting at `code[at]`
///
/// Returns the definition, or the raw value that failed to decode.
pub fn decode(code: &[u8], at: usize) -> Result<&'static OpCode, Option<u16>> {
    let first = *code.get(at).ok_or(None)?;
    if first == op::PREFIX_FE {
        let second = *code.get(at + 1).ok_or(None)?;
        let value = u16::from_be_bytes([first, second]);
        by_value(value).ok_or(Some(value))
    } else {
        by_value(u16::from(first)).ok_or(Some(u16::from(first)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_unique_values() {
        let mut seen = std::collections::HashSet::new();
        for opcode in OPCODES {
            assert!(seen.insert(opcode.value), "duplicate opcode {}", opcode.name);
        }
        assert_eq!(OPCODES.len(), 219);
    }

    #[test]
    fn test_decode_one_and_two_byte() {
        assert_eq!(decode(&[0x2A], 0).map(|o| o.name), Ok("ret"));
        assert_eq!(decode(&[0xFE, 0x01], 0).map(|o| o.name), Ok("ceq"));
        assert_eq!(decode(&[0x24], 0).map(|o| o.name), Err(Some(0x24)));
        assert_eq!(decode(&[0xFE], 0).map(|o| o.name), Err(None));
        assert_eq!(decode(&[], 0).map(|o| o.name), Err(None));
    }

    #[test]
    fn test_long_forms() {
        assert_eq!(long_form(op::BR_S), Some(op::BR));
        assert_eq!(by_value(long_form(0x2D).unwrap()).unwrap().name, "brtrue");
        assert_eq!(by_value(long_form(0x37).unwrap()).unwrap().name, "blt.un");
        assert_eq!(long_form(op::LEAVE_S), Some(op::LEAVE));
        assert_eq!(long_form(op::BR), None);
    }

    #[test]
    fn test_encode_two_byte() {
        let mut out = Vec::new();
        by_value(op::TAIL).unwrap().encode(&mut out);
        by_value(op::RET).unwrap().encode(&mut out);
        assert_eq!(out, vec![0xFE, 0x14, 0x2A]);
    }
}
