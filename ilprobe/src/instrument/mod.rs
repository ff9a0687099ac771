//! # Instrumentation Engine
//!
//! Rewrites one method body so that it calls the negotiated probes.
//!
//! ```text
//! MethodDescriptor ──► scan ──► stack ──► plan ──► layout ──► emit ──► validate
//!                     units    depths    probe    landing    bytes    re-derive
//!                                        calls    points              + decode
//! ```
//!
//! Every stage either succeeds or yields a [`RejectReason`]; a rejected
//! method is handed back untouched ([`Instrumentation::Unmodified`]), never
//! partially rewritten. The engine holds no mutable state, so one
//! [`Instrumenter`] serves every compiling thread at once.

mod emit;
mod layout;
mod plan;
mod scan;
mod stack;
mod validate;

use std::sync::Arc;

use ilprobe_common::ProbeKindSet;
use log::debug;

use crate::cil::{BodyError, ClauseKind, ExceptionClause, MethodBody};
use crate::descriptor::MethodDescriptor;
use crate::domain::{InstrumentError, MethodToken, RejectReason};
use crate::probes::ProbeTable;
use crate::thread::ThreadEntry;

pub use plan::{Placement, ProbeArg, ProbeCall};

/// Original boundary → landing point in the rewritten code
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetMap {
    entries: Vec<(u32, u32)>,
}

impl OffsetMap {
    /// Landing point of an original boundary
    #[must_use]
    pub fn translate(&self, original: u32) -> Option<u32> {
        self.entries
            .binary_search_by_key(&original, |(old, _)| *old)
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// Pairs in increasing original order, ending with the end of the code
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A placed probe call, for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSite {
    pub call: ProbeCall,
    /// Offset of the call sequence in the rewritten code
    pub new_offset: u32,
}

/// Result of a successful rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedMethod {
    pub token: MethodToken,
    /// Thread accessor the probe sequences call
    pub thread_entry: ThreadEntry,
    pub code: Vec<u8>,
    pub clauses: Vec<ExceptionClause>,
    pub original_max_stack: u16,
    pub max_stack: u16,
    /// Deepest evaluation stack the original code reaches, as estimated
    pub original_peak_depth: u32,
    pub offset_map: OffsetMap,
    pub probes: Vec<ProbeSite>,
    pub widened_branches: usize,
    body: Vec<u8>,
}

impl InstrumentedMethod {
    /// Encoded method body (fat header, code, clauses) ready to install
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Outcome of [`Instrumenter::instrument`]
#[derive(Debug, Clone)]
pub enum Instrumentation {
    Rewritten(InstrumentedMethod),
    /// The rewrite was refused; the descriptor is returned as it came in
    Unmodified {
        descriptor: Box<MethodDescriptor>,
        error: InstrumentError,
    },
}

impl Instrumentation {
    /// Body to hand back to the runtime
    #[must_use]
    pub fn body(&self) -> &[u8] {
        match self {
            Self::Rewritten(method) => method.body(),
            Self::Unmodified { descriptor, .. } => descriptor.raw_body(),
        }
    }

    #[must_use]
    pub fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten(_))
    }
}

/// Rewrites method bodies against an immutable probe table
///
/// `Send + Sync`; share it behind an `Arc` across compiling threads.
pub struct Instrumenter {
    probes: Arc<ProbeTable>,
    thread_entry: ThreadEntry,
    policy: ProbeKindSet,
}

impl Instrumenter {
    /// Engine emitting the kinds in `policy` that `probes` provides
    ///
    /// Probe sequences obtain their thread argument by calling `thread_entry`.
    #[must_use]
    pub fn new(probes: Arc<ProbeTable>, thread_entry: ThreadEntry, policy: ProbeKindSet) -> Self {
        let policy = ProbeKindSet(policy.0 & probes.kinds().0);
        Self { probes, thread_entry, policy }
    }

    /// Kinds this engine emits
    #[must_use]
    pub fn policy(&self) -> ProbeKindSet {
        self.policy
    }

    #[must_use]
    pub fn probe_table(&self) -> &ProbeTable {
        &self.probes
    }

    /// Rewrite, handing the descriptor back untouched on rejection
    #[must_use]
    pub fn instrument(&self, descriptor: MethodDescriptor) -> Instrumentation {
        match self.rewrite(&descriptor) {
            Ok(method) => Instrumentation::Rewritten(method),
            Err(error) => {
                debug!("{error}");
                Instrumentation::Unmodified { descriptor: Box::new(descriptor), error }
            }
        }
    }

    /// Rewrite one method
    ///
    /// # Errors
    /// Returns [`InstrumentError::Rejected`] if the body is malformed or the
    /// rewrite cannot be proven consistent
    pub fn rewrite(
        &self,
        descriptor: &MethodDescriptor,
    ) -> Result<InstrumentedMethod, InstrumentError> {
        self.try_rewrite(descriptor)
            .map_err(|reason| InstrumentError::Rejected { token: descriptor.token, reason })
    }

    fn try_rewrite(&self, descriptor: &MethodDescriptor) -> Result<InstrumentedMethod, RejectReason> {
        let scan = scan::scan(&descriptor.code, &descriptor.clauses)?;
        let estimate = stack::estimate(&scan, descriptor)?;
        let plan = plan::plan(&scan, descriptor, &self.probes, self.policy, self.thread_entry)?;
        let layout = layout::layout(&scan, &plan)?;
        let code = emit::emit(&descriptor.code, &scan, &plan, &layout)?;

        let clauses = descriptor
            .clauses
            .iter()
            .enumerate()
            .map(|(index, clause)| remap_clause(index, clause, &scan, &layout))
            .collect::<Result<Vec<_>, _>>()?;

        validate::validate(
            &descriptor.code,
            &scan,
            &plan,
            &layout,
            &code,
            &descriptor.clauses,
            &clauses,
        )?;

        let max_stack = u16::try_from(u32::from(descriptor.max_stack) + plan.max_probe_depth())
            .map_err(|_| RejectReason::TooLarge("max stack"))?;

        let mut offset_map: Vec<(u32, u32)> =
            scan.units.iter().zip(&layout.landings).map(|(u, l)| (u.offset, *l)).collect();
        offset_map.push((scan.code_len, layout.code_len));

        let probes = placed_probes(&plan, &layout);
        let body = MethodBody {
            max_stack,
            init_locals: descriptor.init_locals,
            local_sig_token: descriptor.local_sig_token,
            code,
            clauses,
        };
        let encoded = body.encode().map_err(|e| match e {
            BodyError::TooLarge(what) => RejectReason::TooLarge(what),
            _ => RejectReason::TooLarge("method body"),
        })?;

        debug!(
            "rewrote {}: {} -> {} bytes, {} probes, {} widened, max stack {} -> {}",
            descriptor.token,
            descriptor.code.len(),
            body.code.len(),
            probes.len(),
            layout.widened_count(),
            descriptor.max_stack,
            max_stack
        );

        Ok(InstrumentedMethod {
            token: descriptor.token,
            thread_entry: self.thread_entry,
            code: body.code,
            clauses: body.clauses,
            original_max_stack: descriptor.max_stack,
            max_stack,
            original_peak_depth: estimate.peak,
            offset_map: OffsetMap { entries: offset_map },
            probes,
            widened_branches: layout.widened_count(),
            body: encoded,
        })
    }
}

fn remap_clause(
    index: usize,
    clause: &ExceptionClause,
    scan: &scan::Scan,
    layout: &layout::Layout,
) -> Result<ExceptionClause, RejectReason> {
    let map = |offset: u32| {
        layout.map(scan, offset).ok_or(RejectReason::MisalignedClause { index, offset })
    };
    let try_offset = map(clause.try_offset)?;
    let try_end = map(clause.try_end())?;
    let handler_offset = map(clause.handler_offset)?;
    let handler_end = map(clause.handler_end())?;
    let kind = match clause.kind {
        ClauseKind::Filter(filter) => ClauseKind::Filter(map(filter)?),
        other => other,
    };
    let length = |start: u32, end: u32| {
        end.checked_sub(start)
            .filter(|length| *length > 0)
            .ok_or(RejectReason::EmptyClause { index })
    };
    Ok(ExceptionClause {
        kind,
        try_offset,
        try_length: length(try_offset, try_end)?,
        handler_offset,
        handler_length: length(handler_offset, handler_end)?,
    })
}

fn placed_probes(plan: &plan::Plan, layout: &layout::Layout) -> Vec<ProbeSite> {
    let mut sites = Vec::new();
    let mut at = 0;
    for call in &plan.prologue {
        sites.push(ProbeSite { call: call.clone(), new_offset: at });
        at += call.encoded_len();
    }
    for (index, (before, after)) in plan.before.iter().zip(&plan.after).enumerate() {
        let mut at = layout.landings[index];
        for call in before {
            sites.push(ProbeSite { call: call.clone(), new_offset: at });
            at += call.encoded_len();
        }
        let end = layout.landings.get(index + 1).copied().unwrap_or(layout.code_len);
        let mut at = end - plan.after_len(index);
        for call in after {
            sites.push(ProbeSite { call: call.clone(), new_offset: at });
            at += call.encoded_len();
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cil::disassemble;
    use crate::descriptor::{FunctionInfo, MethodSignature, StackEffect};
    use crate::domain::{FunctionId, ModuleId, SigToken};
    use ilprobe_common::ProbeKind;

    fn fat(code: &[u8], max_stack: u16, clauses: Vec<ExceptionClause>) -> Vec<u8> {
        MethodBody {
            max_stack,
            init_locals: true,
            local_sig_token: 0x1100_0001,
            code: code.to_vec(),
            clauses,
        }
        .encode()
        .unwrap()
    }

    fn describe(raw: Vec<u8>) -> MethodDescriptor {
        let mut d = MethodDescriptor::from_raw_body(
            FunctionId(1),
            FunctionInfo { module: ModuleId(1), token: MethodToken(0x0600_0007) },
            MethodSignature { arg_count: 1, local_count: 1, returns_value: false },
            raw,
        )
        .unwrap();
        for kind in ProbeKind::ALL {
            d.probe_signatures.insert(kind, SigToken(0x1100_0100 + u32::from(kind.code())));
        }
        d.thread_signature = Some(SigToken(0x1100_0100));
        d
    }

    fn engine(policy: ProbeKindSet) -> Instrumenter {
        Instrumenter::new(Arc::new(ProbeTable::synthetic()), ThreadEntry::synthetic(), policy)
    }

    #[test]
    fn test_backward_branch_to_entry_skips_prologue() {
        // IL_0000: ldarg.0 ; IL_0001: brtrue.s IL_0000 ; IL_0003: ret
        let d = describe(fat(&[0x02, 0x2D, 0xFD, 0x2A], 1, vec![]));
        let policy = ProbeKindSet::EMPTY.with(ProbeKind::MethodEnter);
        let method = engine(policy).rewrite(&d).unwrap();

        // ldc.i4 token + accessor call + probe call
        assert_eq!(method.offset_map.translate(0), Some(35));
        let instrs = disassemble(&method.code).unwrap();
        let branch = instrs.iter().find(|i| i.opcode.name == "brtrue.s").unwrap();
        assert_eq!(branch.targets(), vec![35]);
        assert_eq!(method.max_stack, 1 + 3);
        assert_eq!(method.thread_entry, ThreadEntry::synthetic());
    }

    #[test]
    fn test_clause_remap_and_after_probe_placement() {
        // try { call 0x0A000001 ; leave.s IL_0008 } finally { endfinally } IL_0008: ret
        let code = [0x28, 0x01, 0x00, 0x00, 0x0A, 0xDE, 0x01, 0xDC, 0x2A];
        let clause = ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 0,
            try_length: 7,
            handler_offset: 7,
            handler_length: 1,
        };
        let mut d = describe(fat(&code, 1, vec![clause]));
        d.call_sites.insert(0x0A00_0001, StackEffect { pops: 0, pushes: 0 });
        let policy = ProbeKindSet::EMPTY.with(ProbeKind::Return);
        let method = engine(policy).rewrite(&d).unwrap();

        // the Return probe sits on the call's fall-through, inside the try
        let ret = &method.probes[0];
        assert_eq!(ret.call.placement, Placement::After);
        assert_eq!(ret.new_offset, 5);
        let grown = ret.call.encoded_len();
        assert_eq!(grown, 40);
        let new = method.clauses[0];
        assert_eq!(new.try_offset, 0);
        assert_eq!(new.try_length, 7 + grown);
        assert_eq!(new.handler_offset, 7 + grown);
        assert_eq!(new.handler_length, 1);
        assert_eq!(MethodBody::parse(method.body()).unwrap().clauses, method.clauses);
    }

    #[test]
    fn test_rejection_returns_descriptor_untouched() {
        let raw = fat(&[0x02, 0x00], 1, vec![]);
        let d = describe(raw.clone());
        let outcome = engine(ProbeKindSet::all()).instrument(d);
        assert!(!outcome.is_rewritten());
        assert_eq!(outcome.body(), raw.as_slice());
        let Instrumentation::Unmodified { error, .. } = outcome else { unreachable!() };
        assert_eq!(error.reason(), &RejectReason::FallsOffEnd(crate::domain::IlOffset(1)));
    }

    #[test]
    fn test_thread_argument_is_resolved_at_run_time() {
        let d = describe(fat(&[0x2A], 1, vec![]));
        let method = engine(ProbeKindSet::EMPTY.with(ProbeKind::MethodEnter)).rewrite(&d).unwrap();
        let thread = method.probes[0].call.args[1];
        assert_eq!(
            thread,
            ProbeArg::Thread { address: ThreadEntry::synthetic().0, signature: SigToken(0x1100_0100) }
        );
        assert_eq!(thread.value(), None);
    }

    #[test]
    fn test_missing_thread_signature_is_rejected() {
        let mut d = describe(fat(&[0x2A], 1, vec![]));
        d.thread_signature = None;
        let err = engine(ProbeKindSet::all()).rewrite(&d).unwrap_err();
        assert_eq!(err.reason(), &RejectReason::MissingThreadSignature);

        // nothing to emit, nothing to call
        let method = engine(ProbeKindSet::EMPTY).rewrite(&d).unwrap();
        assert!(method.probes.is_empty());
    }

    #[test]
    fn test_empty_remapped_clause_is_rejected() {
        let d = describe(fat(&[0x00, 0x00, 0x2A], 1, vec![]));
        let scan = scan::scan(&d.code, &[]).unwrap();
        let plan = plan::plan(
            &scan,
            &d,
            &ProbeTable::synthetic(),
            ProbeKindSet::EMPTY,
            ThreadEntry::synthetic(),
        )
        .unwrap();
        let layout = layout::layout(&scan, &plan).unwrap();
        let empty = ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 1,
            try_length: 0,
            handler_offset: 2,
            handler_length: 1,
        };
        assert_eq!(
            remap_clause(0, &empty, &scan, &layout).unwrap_err(),
            RejectReason::EmptyClause { index: 0 }
        );
    }

    #[test]
    fn test_policy_is_limited_to_table() {
        let table = ProbeTable::fabricate([(ProbeKind::Throw, 0x10)]);
        let engine = Instrumenter::new(Arc::new(table), ThreadEntry::synthetic(), ProbeKindSet::all());
        assert_eq!(engine.policy(), ProbeKindSet::EMPTY.with(ProbeKind::Throw));
    }
}
