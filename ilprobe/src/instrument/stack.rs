//! Evaluation-stack depth estimate
//!
//! Worklist data flow over the unit graph. Entry depths: 0 at method entry
//! and `finally`/`fault` handlers, 1 at `catch` handlers and filter blocks.
//! Call-like instructions take their effect from the descriptor's
//! pre-fetched call sites; an unresolved call site leaves its successors
//! unknown rather than failing.

use crate::cil::opcodes::op;
use crate::cil::{ClauseKind, FlowControl, Operand, Stack};
use crate::descriptor::MethodDescriptor;
use crate::domain::{IlOffset, RejectReason};

use super::scan::{Scan, Unit};

/// Entry depth per unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEstimate {
    /// `None` for unreachable units or units behind an unresolved call site
    pub depths: Vec<Option<u32>>,
    /// Deepest stack seen at any boundary
    pub peak: u32,
}

fn effect(unit: &Unit, descriptor: &MethodDescriptor) -> Option<(u32, u32)> {
    let opcode = unit.instruction.opcode;
    if opcode.value == op::RET {
        return Some((u32::from(descriptor.returns_value), 0));
    }
    match (opcode.pops, opcode.pushes) {
        (Stack::Fixed(pops), Stack::Fixed(pushes)) => Some((u32::from(pops), u32::from(pushes))),
        _ => {
            let Operand::Token(token) = unit.instruction.operand else {
                return None;
            };
            descriptor
                .call_sites
                .get(&token)
                .map(|e| (u32::from(e.pops), u32::from(e.pushes)))
        }
    }
}

struct Worklist<'a> {
    scan: &'a Scan,
    depths: Vec<Option<u32>>,
    pending: Vec<usize>,
}

impl Worklist<'_> {
    fn merge(&mut self, unit: usize, depth: u32) -> Result<(), RejectReason> {
        match self.depths[unit] {
            None => {
                self.depths[unit] = Some(depth);
                self.pending.push(unit);
                Ok(())
            }
            Some(existing) if existing == depth => Ok(()),
            Some(existing) => Err(RejectReason::InconsistentStack {
                offset: IlOffset(self.scan.units[unit].offset),
                first: existing,
                second: depth,
            }),
        }
    }

    fn seed(&mut self, offset: u32, depth: u32) -> Result<(), RejectReason> {
        match self.scan.unit_at(offset) {
            Some(unit) => self.merge(unit, depth),
            None => Ok(()),
        }
    }
}

/// Estimate entry depths for every reachable unit
///
/// # Errors
/// Returns an error on underflow, on exceeding the declared max stack, or
/// when two paths reach a unit with different depths
pub fn estimate(scan: &Scan, descriptor: &MethodDescriptor) -> Result<StackEstimate, RejectReason> {
    let max = u32::from(descriptor.max_stack);
    let mut work = Worklist { scan, depths: vec![None; scan.units.len()], pending: Vec::new() };

    work.seed(0, 0)?;
    for clause in &descriptor.clauses {
        match clause.kind {
            ClauseKind::Finally | ClauseKind::Fault => work.seed(clause.handler_offset, 0)?,
            ClauseKind::Catch(_) => work.seed(clause.handler_offset, 1)?,
            ClauseKind::Filter(filter) => {
                work.seed(filter, 1)?;
                work.seed(clause.handler_offset, 1)?;
            }
        }
    }

    let mut peak = 0;
    while let Some(index) = work.pending.pop() {
        let unit = &scan.units[index];
        let at = IlOffset(unit.instruction.offset);
        let Some(depth) = work.depths[index] else {
            continue;
        };
        if depth > max {
            return Err(RejectReason::StackOverflow { offset: at, depth, max });
        }
        let Some((pops, pushes)) = effect(unit, descriptor) else {
            continue;
        };
        let after = depth.checked_sub(pops).ok_or(RejectReason::StackUnderflow(at))? + pushes;
        if after > max {
            return Err(RejectReason::StackOverflow { offset: at, depth: after, max });
        }
        peak = peak.max(depth).max(after);

        let value = unit.instruction.opcode.value;
        let exit_depth = if value == op::LEAVE || value == op::LEAVE_S { 0 } else { after };
        if matches!(unit.instruction.opcode.flow, FlowControl::Branch | FlowControl::CondBranch) {
            for target in unit.instruction.targets() {
                if let Some(successor) = scan.target_unit(target) {
                    work.merge(successor, exit_depth)?;
                }
            }
        }
        if unit.falls_through() && index + 1 < scan.units.len() {
            work.merge(index + 1, after)?;
        }
    }

    Ok(StackEstimate { depths: work.depths, peak })
}
