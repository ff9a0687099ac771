//! New code layout and short-branch widening
//!
//! Positions every unit in the rewritten code. A short branch whose new
//! displacement no longer fits in `i8` is widened to its long form; since
//! widening only grows the code, iterating until nothing changes terminates.

use crate::cil::{Operand, OperandKind};
use crate::domain::RejectReason;

use super::plan::Plan;
use super::scan::Scan;

/// Bytes added by turning a short branch into its long form
pub const WIDENING_GROWTH: u32 = 3;

/// Landing points of the original boundaries in the new code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub prologue: u32,
    /// New offset of each unit's landing point (start of its `Before` probes)
    pub landings: Vec<u32>,
    /// New offset of each unit's first byte (prefix or instruction)
    pub starts: Vec<u32>,
    pub widened: Vec<bool>,
    pub code_len: u32,
}

impl Layout {
    /// Translate an original boundary
    #[must_use]
    pub fn map(&self, scan: &Scan, original: u32) -> Option<u32> {
        if original == scan.code_len {
            Some(self.code_len)
        } else {
            scan.unit_at(original).map(|unit| self.landings[unit])
        }
    }

    /// Encoded size of unit `index` in the new code
    #[must_use]
    pub fn unit_size(&self, scan: &Scan, index: usize) -> u32 {
        scan.units[index].size() + if self.widened[index] { WIDENING_GROWTH } else { 0 }
    }

    /// Number of widened branches
    #[must_use]
    pub fn widened_count(&self) -> usize {
        self.widened.iter().filter(|w| **w).count()
    }
}

fn place(scan: &Scan, plan: &Plan, widened: &[bool]) -> Result<Layout, RejectReason> {
    let too_large = || RejectReason::TooLarge("code size");
    let limit = u64::try_from(i32::MAX).map_err(|_| too_large())?;
    let narrow = |value: u64| {
        if value > limit {
            Err(too_large())
        } else {
            u32::try_from(value).map_err(|_| too_large())
        }
    };

    let prologue = plan.prologue_len();
    let mut landings = Vec::with_capacity(scan.units.len());
    let mut starts = Vec::with_capacity(scan.units.len());
    let mut pos = u64::from(prologue);
    for (index, unit) in scan.units.iter().enumerate() {
        landings.push(narrow(pos)?);
        pos += u64::from(plan.before_len(index));
        starts.push(narrow(pos)?);
        pos += u64::from(unit.size());
        if widened[index] {
            pos += u64::from(WIDENING_GROWTH);
        }
        pos += u64::from(plan.after_len(index));
    }

    Ok(Layout { prologue, landings, starts, widened: widened.to_vec(), code_len: narrow(pos)? })
}

/// Lay out the rewritten code, widening short branches as needed
///
/// # Errors
/// Returns an error if the rewritten code would exceed the format limits
pub fn layout(scan: &Scan, plan: &Plan) -> Result<Layout, RejectReason> {
    let mut widened = vec![false; scan.units.len()];
    loop {
        let current = place(scan, plan, &widened)?;
        let mut changed = false;
        for (index, unit) in scan.units.iter().enumerate() {
            if widened[index] || unit.instruction.opcode.operand != OperandKind::ShortBrTarget {
                continue;
            }
            let Operand::Target(target) = unit.instruction.operand else {
                continue;
            };
            let Some(target_unit) = scan.target_unit(target) else {
                continue;
            };
            let next = i64::from(current.starts[index]) + i64::from(unit.size());
            let displacement = i64::from(current.landings[target_unit]) - next;
            if i8::try_from(displacement).is_err() {
                widened[index] = true;
                changed = true;
            }
        }
        if !changed {
            return Ok(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IlOffset, SigToken};
    use crate::instrument::plan::{Placement, ProbeArg, ProbeCall};
    use crate::instrument::scan::scan;
    use ilprobe_common::ProbeKind;

    fn call(kind: ProbeKind) -> ProbeCall {
        ProbeCall {
            kind,
            placement: Placement::Before,
            site: IlOffset(0),
            args: vec![ProbeArg::I4(0), ProbeArg::I8(0)],
            address: 1,
            signature: SigToken(1),
        }
    }

    #[test]
    fn test_no_probes_keeps_offsets() {
        let code = [0x00, 0x2B, 0xFD, 0x2A];
        let scan = scan(&code, &[]).unwrap();
        let plan = Plan { prologue: vec![], before: vec![vec![]; 3], after: vec![vec![]; 3] };
        let layout = layout(&scan, &plan).unwrap();
        assert_eq!(layout.landings, vec![0, 1, 3]);
        assert_eq!(layout.code_len, 4);
        assert_eq!(layout.widened_count(), 0);
    }

    #[test]
    fn test_widens_when_probes_push_target_away() {
        // br.s +8 ; 8 x nop ; ret, with a probe before every nop
        let mut code = vec![0x2B, 0x08];
        code.extend_from_slice(&[0x00; 8]);
        code.push(0x2A);
        let scan = scan(&code, &[]).unwrap();
        let mut plan = Plan { prologue: vec![], before: vec![vec![]; 10], after: vec![vec![]; 10] };
        for i in 1..9 {
            plan.before[i] = vec![call(ProbeKind::StackPush)];
        }
        let layout = layout(&scan, &plan).unwrap();
        assert!(layout.widened[0]);
        // 8 probes of 29 bytes plus 3 bytes of widening
        assert_eq!(layout.map(&scan, 10), Some(10 + 8 * 29 + 3));
        assert_eq!(layout.map(&scan, 11), Some(layout.code_len));
        assert_eq!(layout.map(&scan, 5), Some(5 + 3 + 3 * 29));
    }
}
