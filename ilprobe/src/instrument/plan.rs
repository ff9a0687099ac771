//! Probe site selection
//!
//! Decides which probe calls surround each unit and what they carry.
//! Every call is one push per argument, then `ldc.i8 <address>`, `conv.i`,
//! `calli <sig>`: it pops its arguments and the address and pushes nothing.
//! Constants are pushed with `ldc.i4`/`ldc.i8`; the thread argument is
//! itself a `calli` to the thread accessor entry point, evaluated each time
//! the probe runs.

use ilprobe_common::{ProbeKind, ProbeKindSet};

use crate::cil::opcodes::op;
use crate::cil::{FlowControl, Operand};
use crate::descriptor::MethodDescriptor;
use crate::domain::{IlOffset, RejectReason, SigToken};
use crate::probes::ProbeTable;
use crate::thread::ThreadEntry;

use super::scan::{Scan, Unit};

/// `ldc.i8 <address>` + `conv.i` + `calli <token>`
pub const CALL_SEQUENCE_LEN: u32 = 9 + 1 + 5;

/// One by-value probe argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeArg {
    I4(i32),
    I8(i64),
    /// `int64` returned by the thread accessor at `address` when the probe runs
    Thread { address: u64, signature: SigToken },
}

impl ProbeArg {
    /// Bytes of the sequence that pushes it
    #[must_use]
    pub fn encoded_len(self) -> u32 {
        match self {
            Self::I4(_) => 5,
            Self::I8(_) => 9,
            Self::Thread { .. } => CALL_SEQUENCE_LEN,
        }
    }

    /// Constant value, `None` for arguments computed at run time
    #[must_use]
    pub fn value(self) -> Option<i64> {
        match self {
            Self::I4(v) => Some(i64::from(v)),
            Self::I8(v) => Some(v),
            Self::Thread { .. } => None,
        }
    }
}

/// Where a probe call sits relative to its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Method prologue, never a branch landing point
    Prologue,
    /// Ahead of the unit; branches to the unit run it
    Before,
    /// On the fall-through edge; branches to the next unit skip it
    After,
}

impl Placement {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Prologue => "prologue",
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// A planned probe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCall {
    pub kind: ProbeKind,
    pub placement: Placement,
    /// Original offset of the instruction the probe reports on
    pub site: IlOffset,
    pub args: Vec<ProbeArg>,
    pub address: u64,
    pub signature: SigToken,
}

impl ProbeCall {
    #[must_use]
    pub fn encoded_len(&self) -> u32 {
        self.args.iter().map(|a| a.encoded_len()).sum::<u32>() + CALL_SEQUENCE_LEN
    }

    /// Stack slots the sequence occupies at its deepest point
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn stack_depth(&self) -> u32 {
        self.args.len() as u32 + 1
    }
}

/// Probe calls for a whole method, indexed by unit
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub prologue: Vec<ProbeCall>,
    pub before: Vec<Vec<ProbeCall>>,
    pub after: Vec<Vec<ProbeCall>>,
}

fn total(calls: &[ProbeCall]) -> u32 {
    calls.iter().map(ProbeCall::encoded_len).sum()
}

impl Plan {
    #[must_use]
    pub fn prologue_len(&self) -> u32 {
        total(&self.prologue)
    }

    #[must_use]
    pub fn before_len(&self, unit: usize) -> u32 {
        total(&self.before[unit])
    }

    #[must_use]
    pub fn after_len(&self, unit: usize) -> u32 {
        total(&self.after[unit])
    }

    /// All calls in emission order
    pub fn calls(&self) -> impl Iterator<Item = &ProbeCall> {
        self.prologue.iter().chain(
            self.before.iter().zip(&self.after).flat_map(|(before, after)| before.iter().chain(after)),
        )
    }

    /// Extra stack the deepest probe sequence needs, 0 when nothing is emitted
    #[must_use]
    pub fn max_probe_depth(&self) -> u32 {
        self.calls().map(ProbeCall::stack_depth).max().unwrap_or(0)
    }
}

fn before_kind(unit: &Unit) -> Option<ProbeKind> {
    let kind = match unit.value() {
        op::RET | op::JMP => ProbeKind::MethodLeave,
        op::BR | op::BR_S | op::LEAVE | op::LEAVE_S => ProbeKind::BranchTaken,
        op::CALL | op::NEWOBJ => ProbeKind::Call,
        op::CALLVIRT => ProbeKind::CallVirtual,
        op::THROW | op::RETHROW => ProbeKind::Throw,
        _ => {
            let name = unit.instruction.opcode.name;
            if name.starts_with("ldfld") || name.starts_with("ldsfld") {
                ProbeKind::FieldRead
            } else if name == "stfld" || name == "stsfld" {
                ProbeKind::FieldWrite
            } else if name.starts_with("ldelem") {
                ProbeKind::ElementRead
            } else if name.starts_with("stelem") {
                ProbeKind::ElementWrite
            } else if name.starts_with("ldloc") || name.starts_with("ldarg") {
                ProbeKind::StackPush
            } else if name.starts_with("stloc") || name.starts_with("starg") || name == "pop" {
                ProbeKind::StackPop
            } else {
                return None;
            }
        }
    };
    Some(kind)
}

fn after_kind(unit: &Unit) -> Option<ProbeKind> {
    match unit.value() {
        op::CALL | op::CALLVIRT | op::NEWOBJ if !unit.has_prefix(op::TAIL) => Some(ProbeKind::Return),
        op::SWITCH => None,
        _ if unit.instruction.opcode.flow == FlowControl::CondBranch => {
            Some(ProbeKind::BranchNotTaken)
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn args_for(kind: ProbeKind, unit: &Unit, method: &MethodDescriptor, thread: ProbeArg) -> Vec<ProbeArg> {
    let offset = ProbeArg::I4(IlOffset(unit.instruction.offset).as_probe_arg());
    let token = match unit.instruction.operand {
        Operand::Token(token) => ProbeArg::I4(token as i32),
        _ => ProbeArg::I4(0),
    };
    let target = match unit.instruction.operand {
        Operand::Target(target) => ProbeArg::I4(target as i32),
        _ => ProbeArg::I4(0),
    };
    match kind {
        ProbeKind::MethodEnter => vec![ProbeArg::I4(method.token.as_probe_arg()), thread],
        ProbeKind::MethodLeave => vec![ProbeArg::I4(method.token.as_probe_arg()), offset, thread],
        ProbeKind::BranchTaken | ProbeKind::BranchNotTaken => vec![target, thread],
        ProbeKind::Call
        | ProbeKind::CallVirtual
        | ProbeKind::Return
        | ProbeKind::FieldRead
        | ProbeKind::FieldWrite => vec![token, offset, thread],
        ProbeKind::ElementRead
        | ProbeKind::ElementWrite
        | ProbeKind::StackPush
        | ProbeKind::StackPop
        | ProbeKind::Throw => vec![offset, thread],
    }
}

struct Planner<'a> {
    method: &'a MethodDescriptor,
    probes: &'a ProbeTable,
    policy: ProbeKindSet,
    thread: ThreadEntry,
}

impl Planner<'_> {
    fn thread_arg(&self) -> Result<ProbeArg, RejectReason> {
        let signature = self.method.thread_signature.ok_or(RejectReason::MissingThreadSignature)?;
        Ok(ProbeArg::Thread { address: self.thread.0, signature })
    }

    fn call(
        &self,
        kind: ProbeKind,
        placement: Placement,
        site: IlOffset,
        args: Vec<ProbeArg>,
    ) -> Result<Option<ProbeCall>, RejectReason> {
        if !self.policy.contains(kind) {
            return Ok(None);
        }
        let Some(address) = self.probes.address(kind) else {
            return Ok(None);
        };
        let signature = *self
            .method
            .probe_signatures
            .get(&kind)
            .ok_or(RejectReason::MissingProbeSignature(kind))?;
        debug_assert_eq!(args.len(), usize::from(kind.arity()));
        Ok(Some(ProbeCall { kind, placement, site, args, address, signature }))
    }

    fn unit_call(
        &self,
        kind: Option<ProbeKind>,
        placement: Placement,
        unit: &Unit,
    ) -> Result<Vec<ProbeCall>, RejectReason> {
        let Some(kind) = kind.filter(|kind| self.policy.contains(*kind)) else {
            return Ok(Vec::new());
        };
        let args = args_for(kind, unit, self.method, self.thread_arg()?);
        Ok(self
            .call(kind, placement, IlOffset(unit.instruction.offset), args)?
            .into_iter()
            .collect())
    }
}

/// Select probe calls for every unit of `scan`
///
/// # Errors
/// Returns an error if an enabled kind has no `calli` signature
pub fn plan(
    scan: &Scan,
    method: &MethodDescriptor,
    probes: &ProbeTable,
    policy: ProbeKindSet,
    thread: ThreadEntry,
) -> Result<Plan, RejectReason> {
    let planner = Planner { method, probes, policy, thread };

    let prologue = if policy.contains(ProbeKind::MethodEnter) {
        let enter_args = vec![ProbeArg::I4(method.token.as_probe_arg()), planner.thread_arg()?];
        planner
            .call(ProbeKind::MethodEnter, Placement::Prologue, IlOffset(0), enter_args)?
            .into_iter()
            .collect()
    } else {
        Vec::new()
    };

    let mut before = Vec::with_capacity(scan.units.len());
    let mut after = Vec::with_capacity(scan.units.len());
    for (index, unit) in scan.units.iter().enumerate() {
        // a tail call must be immediately followed by its ret
        let follows_tail_call = index > 0 && scan.units[index - 1].has_prefix(op::TAIL);
        let mut calls = if follows_tail_call {
            Vec::new()
        } else {
            planner.unit_call(before_kind(unit), Placement::Before, unit)?
        };
        if unit.has_prefix(op::TAIL) {
            if let Some(ret) = scan.units.get(index + 1).filter(|next| next.value() == op::RET) {
                calls.extend(planner.unit_call(Some(ProbeKind::MethodLeave), Placement::Before, ret)?);
            }
        }
        before.push(calls);
        after.push(planner.unit_call(after_kind(unit), Placement::After, unit)?);
    }

    Ok(Plan { prologue, before, after })
}
