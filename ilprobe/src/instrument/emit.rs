//! Byte emission of the rewritten code

use crate::cil::opcodes::{self, op};
use crate::cil::{Instruction, Operand};
use crate::domain::{IlOffset, RejectReason, SigToken};

use super::layout::Layout;
use super::plan::{Plan, ProbeArg, ProbeCall};
use super::scan::Scan;

fn push_opcode(out: &mut Vec<u8>, value: u16, at: &Instruction) -> Result<(), RejectReason> {
    let opcode = opcodes::by_value(value)
        .ok_or(RejectReason::UnknownOpcode { offset: IlOffset(at.offset), opcode: value })?;
    opcode.encode(out);
    Ok(())
}

/// `ldc.i8 <address>` ; `conv.i` ; `calli <signature>`
#[allow(clippy::cast_possible_truncation)]
fn push_indirect_call(out: &mut Vec<u8>, address: u64, signature: SigToken) {
    out.push(op::LDC_I8 as u8);
    out.extend_from_slice(&address.to_le_bytes());
    out.push(op::CONV_I as u8);
    out.push(op::CALLI as u8);
    out.extend_from_slice(&signature.0.to_le_bytes());
}

#[allow(clippy::cast_possible_truncation)]
fn push_arg(out: &mut Vec<u8>, arg: ProbeArg) {
    match arg {
        ProbeArg::I4(value) => {
            out.push(op::LDC_I4 as u8);
            out.extend_from_slice(&value.to_le_bytes());
        }
        ProbeArg::I8(value) => {
            out.push(op::LDC_I8 as u8);
            out.extend_from_slice(&value.to_le_bytes());
        }
        ProbeArg::Thread { address, signature } => push_indirect_call(out, address, signature),
    }
}

/// Append one probe call sequence
pub fn emit_call(out: &mut Vec<u8>, call: &ProbeCall) {
    for arg in &call.args {
        push_arg(out, *arg);
    }
    push_indirect_call(out, call.address, call.signature);
}

fn displacement(
    layout: &Layout,
    scan: &Scan,
    target: i64,
    next: usize,
    at: &Instruction,
) -> Result<i64, RejectReason> {
    let landing = scan
        .target_unit(target)
        .map(|unit| layout.landings[unit])
        .ok_or(RejectReason::BadBranchTarget { offset: IlOffset(at.offset), target })?;
    let next = i64::try_from(next).map_err(|_| RejectReason::TooLarge("code size"))?;
    Ok(i64::from(landing) - next)
}

fn emit_instruction(
    out: &mut Vec<u8>,
    code: &[u8],
    scan: &Scan,
    layout: &Layout,
    index: usize,
) -> Result<(), RejectReason> {
    let instruction = &scan.units[index].instruction;
    let overflow = || RejectReason::TooLarge("branch displacement");
    match &instruction.operand {
        Operand::Target(target) if layout.widened[index] => {
            let long = opcodes::long_form(instruction.opcode.value).ok_or(
                RejectReason::UnknownOpcode {
                    offset: IlOffset(instruction.offset),
                    opcode: instruction.opcode.value,
                },
            )?;
            push_opcode(out, long, instruction)?;
            let disp = displacement(layout, scan, *target, out.len() + 4, instruction)?;
            out.extend_from_slice(&i32::try_from(disp).map_err(|_| overflow())?.to_le_bytes());
        }
        Operand::Target(target) => {
            push_opcode(out, instruction.opcode.value, instruction)?;
            let short = instruction.opcode.operand.fixed_size() == Some(1);
            let width = if short { 1 } else { 4 };
            let disp = displacement(layout, scan, *target, out.len() + width, instruction)?;
            if short {
                out.extend_from_slice(&i8::try_from(disp).map_err(|_| overflow())?.to_le_bytes());
            } else {
                out.extend_from_slice(&i32::try_from(disp).map_err(|_| overflow())?.to_le_bytes());
            }
        }
        Operand::Switch(targets) => {
            push_opcode(out, instruction.opcode.value, instruction)?;
            let count = u32::try_from(targets.len()).map_err(|_| overflow())?;
            out.extend_from_slice(&count.to_le_bytes());
            let next = out.len() + targets.len() * 4;
            for target in targets {
                let disp = displacement(layout, scan, *target, next, instruction)?;
                out.extend_from_slice(&i32::try_from(disp).map_err(|_| overflow())?.to_le_bytes());
            }
        }
        _ => {
            let range = instruction.offset as usize..instruction.end() as usize;
            out.extend_from_slice(&code[range]);
        }
    }
    Ok(())
}

/// Produce the rewritten code buffer
///
/// # Errors
/// Returns an error if the emitted bytes disagree with the layout
pub fn emit(
    code: &[u8],
    scan: &Scan,
    plan: &Plan,
    layout: &Layout,
) -> Result<Vec<u8>, RejectReason> {
    let mut out = Vec::with_capacity(layout.code_len as usize);
    for call in &plan.prologue {
        emit_call(&mut out, call);
    }
    for (index, unit) in scan.units.iter().enumerate() {
        for call in &plan.before[index] {
            emit_call(&mut out, call);
        }
        out.extend_from_slice(&code[unit.offset as usize..unit.instruction.offset as usize]);
        emit_instruction(&mut out, code, scan, layout, index)?;
        for call in &plan.after[index] {
            emit_call(&mut out, call);
        }
    }

    let actual = u32::try_from(out.len()).map_err(|_| RejectReason::TooLarge("code size"))?;
    if actual != layout.code_len {
        return Err(RejectReason::LayoutMismatch {
            offset: IlOffset(scan.code_len),
            expected: layout.code_len,
            actual,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cil::{disassemble, Operand};
    use crate::instrument::plan::Placement;
    use ilprobe_common::ProbeKind;

    #[test]
    fn test_probe_call_bytes() {
        let call = ProbeCall {
            kind: ProbeKind::Throw,
            placement: Placement::Before,
            site: IlOffset(4),
            args: vec![ProbeArg::I4(4), ProbeArg::I8(-1)],
            address: 0x7f00_0000_10e0,
            signature: SigToken(0x1100_010E),
        };
        let mut out = Vec::new();
        emit_call(&mut out, &call);
        assert_eq!(out.len() as u32, call.encoded_len());

        let listing: Vec<String> =
            disassemble(&out).unwrap().iter().map(|i| i.opcode.name.to_string()).collect();
        assert_eq!(listing, vec!["ldc.i4", "ldc.i8", "ldc.i8", "conv.i", "calli"]);
        assert_eq!(&out[out.len() - 4..], &0x1100_010Eu32.to_le_bytes());
    }

    #[test]
    fn test_thread_argument_calls_the_accessor() {
        let thread = ProbeArg::Thread { address: 0x7f00_0000_1000, signature: SigToken(0x1100_0100) };
        let call = ProbeCall {
            kind: ProbeKind::MethodEnter,
            placement: Placement::Prologue,
            site: IlOffset(0),
            args: vec![ProbeArg::I4(0x0600_0001), thread],
            address: 0x7f00_0000_1010,
            signature: SigToken(0x1100_0101),
        };
        let mut out = Vec::new();
        emit_call(&mut out, &call);
        assert_eq!(out.len(), 35);
        assert_eq!(out.len() as u32, call.encoded_len());

        let instructions = disassemble(&out).unwrap();
        let names: Vec<&str> = instructions.iter().map(|i| i.opcode.name).collect();
        assert_eq!(
            names,
            vec!["ldc.i4", "ldc.i8", "conv.i", "calli", "ldc.i8", "conv.i", "calli"]
        );
        assert_eq!(instructions[1].operand, Operand::Int(0x7f00_0000_1000));
        assert_eq!(instructions[3].operand, Operand::Token(0x1100_0100));
    }
}
