//! Independent check of a finished rewrite
//!
//! Re-derives every landing point as
//! `original + prologue + growth strictly before`, then decodes the emitted
//! code to confirm that each original instruction sits where the formula
//! says, that branches land on the re-derived points, that no probe code
//! separates a tail call from its `ret`, and that remapped exception
//! clauses keep their shape.

use std::collections::HashMap;

use crate::cil::opcodes::{self, op};
use crate::cil::{disassemble, ExceptionClause, Instruction};
use crate::domain::{IlOffset, RejectReason};

use super::layout::{Layout, WIDENING_GROWTH};
use super::plan::Plan;
use super::scan::Scan;

fn mismatch(offset: u32, expected: u64, actual: u64) -> RejectReason {
    RejectReason::LayoutMismatch {
        offset: IlOffset(offset),
        expected: u32::try_from(expected).unwrap_or(u32::MAX),
        actual: u32::try_from(actual).unwrap_or(u32::MAX),
    }
}

/// Landing points from the growth formula, plus the expected code length
fn expected_landings(scan: &Scan, plan: &Plan, layout: &Layout) -> (Vec<u64>, u64) {
    let prologue = u64::from(plan.prologue_len());
    let mut growth = 0u64;
    let mut landings = Vec::with_capacity(scan.units.len());
    for (index, unit) in scan.units.iter().enumerate() {
        landings.push(u64::from(unit.offset) + prologue + growth);
        growth += u64::from(plan.before_len(index)) + u64::from(plan.after_len(index));
        if layout.widened[index] {
            growth += u64::from(WIDENING_GROWTH);
        }
    }
    (landings, u64::from(scan.code_len) + prologue + growth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Before,
    After,
    Equal,
    Contains,
    Within,
    Overlaps,
}

fn relation(a: (u32, u32), b: (u32, u32)) -> Relation {
    if a == b {
        Relation::Equal
    } else if a.1 <= b.0 {
        Relation::Before
    } else if b.1 <= a.0 {
        Relation::After
    } else if a.0 <= b.0 && b.1 <= a.1 {
        Relation::Contains
    } else if b.0 <= a.0 && a.1 <= b.1 {
        Relation::Within
    } else {
        Relation::Overlaps
    }
}

/// (clause index, range) for every protected, handler and filter range
fn ranges(clauses: &[ExceptionClause]) -> Vec<(usize, (u32, u32))> {
    let mut out = Vec::new();
    for (index, clause) in clauses.iter().enumerate() {
        out.push((index, (clause.try_offset, clause.try_end())));
        out.push((index, (clause.handler_offset, clause.handler_end())));
        if let Some(filter) = clause.filter_offset() {
            out.push((index, (filter, clause.handler_offset)));
        }
    }
    out
}

fn check_clauses(
    original: &[ExceptionClause],
    rewritten: &[ExceptionClause],
    code_len: u32,
) -> Result<(), RejectReason> {
    if original.len() != rewritten.len() {
        return Err(RejectReason::ClauseNesting { index: original.len().min(rewritten.len()) });
    }
    for (index, clause) in rewritten.iter().enumerate() {
        if clause.try_length == 0 || clause.handler_length == 0 {
            return Err(RejectReason::EmptyClause { index });
        }
        for end in [clause.try_end(), clause.handler_end()] {
            if end > code_len {
                return Err(RejectReason::MisalignedClause { index, offset: end });
            }
        }
    }

    let before = ranges(original);
    let after = ranges(rewritten);
    for (i, (index, old_a)) in before.iter().enumerate() {
        for (j, (_, old_b)) in before.iter().enumerate().skip(i + 1) {
            if relation(*old_a, *old_b) != relation(after[i].1, after[j].1) {
                return Err(RejectReason::ClauseNesting { index: *index });
            }
        }
    }
    Ok(())
}

/// Verify a rewrite
///
/// # Errors
/// Returns the first disagreement found
#[allow(clippy::cast_possible_truncation)]
pub fn validate(
    code: &[u8],
    scan: &Scan,
    plan: &Plan,
    layout: &Layout,
    new_code: &[u8],
    original_clauses: &[ExceptionClause],
    new_clauses: &[ExceptionClause],
) -> Result<(), RejectReason> {
    let (landings, expected_len) = expected_landings(scan, plan, layout);

    let mut previous = None;
    for (index, unit) in scan.units.iter().enumerate() {
        let actual = u64::from(layout.landings[index]);
        if actual != landings[index] || previous.is_some_and(|p| p >= actual) {
            return Err(mismatch(unit.offset, landings[index], actual));
        }
        previous = Some(actual);
    }
    if u64::try_from(new_code.len()).ok() != Some(expected_len) {
        return Err(mismatch(scan.code_len, expected_len, new_code.len() as u64));
    }

    let decoded: HashMap<u32, Instruction> = disassemble(new_code)
        .map_err(|_| mismatch(0, expected_len, 0))?
        .into_iter()
        .map(|i| (i.offset, i))
        .collect();

    for (index, unit) in scan.units.iter().enumerate() {
        let prefix_len = u64::from(unit.instruction.offset - unit.offset);
        let start = landings[index] + u64::from(plan.before_len(index));
        let old_prefix = code.get(unit.offset as usize..unit.instruction.offset as usize);
        let new_prefix = new_code.get(start as usize..(start + prefix_len) as usize);
        if old_prefix.is_none() || old_prefix != new_prefix {
            return Err(mismatch(unit.offset, start, start));
        }

        let at = start + prefix_len;
        let original = unit.instruction.opcode.value;
        let expected_value = if layout.widened[index] {
            opcodes::long_form(original).unwrap_or(original)
        } else {
            original
        };
        let found = u32::try_from(at).ok().and_then(|at| decoded.get(&at));
        let Some(found) = found.filter(|f| f.opcode.value == expected_value) else {
            return Err(mismatch(unit.instruction.offset, u64::from(expected_value), at));
        };

        if unit.has_prefix(op::TAIL) {
            let next_before = if index + 1 < scan.units.len() { plan.before_len(index + 1) } else { 0 };
            if plan.after_len(index) + next_before > 0 {
                return Err(RejectReason::SplitTailCall(IlOffset(unit.offset)));
            }
        }

        for (old, new) in unit.instruction.targets().into_iter().zip(found.targets()) {
            let expected = scan.target_unit(old).map_or(u64::MAX, |t| landings[t]);
            if u64::try_from(new).ok() != Some(expected) {
                return Err(mismatch(unit.instruction.offset, expected, new.unsigned_abs()));
            }
        }
    }

    let new_len = u32::try_from(new_code.len()).map_err(|_| RejectReason::TooLarge("code size"))?;
    check_clauses(original_clauses, new_clauses, new_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cil::ClauseKind;

    fn clause(try_offset: u32, try_length: u32, handler_offset: u32, handler_length: u32) -> ExceptionClause {
        ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
        }
    }

    #[test]
    fn test_code_between_tail_call_and_ret_is_rejected() {
        use crate::domain::SigToken;
        use crate::instrument::plan::{Placement, ProbeArg, ProbeCall};
        use crate::instrument::{emit, layout, scan};
        use ilprobe_common::ProbeKind;

        // tail. call 0x0A000001 ; ret
        let code = [0xFE, 0x14, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        let scan = scan::scan(&code, &[]).unwrap();
        assert_eq!(scan.units.len(), 2);
        let leave = ProbeCall {
            kind: ProbeKind::MethodLeave,
            placement: Placement::Before,
            site: IlOffset(7),
            args: vec![ProbeArg::I4(1), ProbeArg::I4(7), ProbeArg::I8(-1)],
            address: 0x1000,
            signature: SigToken(0x1100_0102),
        };
        let plan = Plan { prologue: vec![], before: vec![vec![], vec![leave]], after: vec![vec![], vec![]] };
        let layout = layout::layout(&scan, &plan).unwrap();
        let new_code = emit::emit(&code, &scan, &plan, &layout).unwrap();

        assert_eq!(
            validate(&code, &scan, &plan, &layout, &new_code, &[], &[]).unwrap_err(),
            RejectReason::SplitTailCall(IlOffset(0))
        );
    }

    #[test]
    fn test_relations() {
        assert_eq!(relation((0, 4), (4, 8)), Relation::Before);
        assert_eq!(relation((0, 8), (2, 4)), Relation::Contains);
        assert_eq!(relation((2, 4), (0, 8)), Relation::Within);
        assert_eq!(relation((0, 4), (2, 8)), Relation::Overlaps);
        assert_eq!(relation((1, 2), (1, 2)), Relation::Equal);
    }

    #[test]
    fn test_clause_shape_checks() {
        let original = [clause(0, 10, 10, 4), clause(2, 4, 6, 2)];
        let good = [clause(30, 40, 70, 4), clause(35, 10, 45, 5)];
        assert!(check_clauses(&original, &good, 80).is_ok());

        let escaped = [clause(30, 40, 70, 4), clause(35, 10, 75, 5)];
        assert_eq!(
            check_clauses(&original, &escaped, 80).unwrap_err(),
            RejectReason::ClauseNesting { index: 0 }
        );
        assert_eq!(
            check_clauses(&original, &good, 72).unwrap_err(),
            RejectReason::MisalignedClause { index: 0, offset: 74 }
        );
        let empty = [clause(30, 0, 70, 4), clause(35, 10, 45, 5)];
        assert_eq!(
            check_clauses(&original, &empty, 80).unwrap_err(),
            RejectReason::EmptyClause { index: 0 }
        );
    }
}
