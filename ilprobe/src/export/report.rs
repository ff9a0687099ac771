//! JSON report of one rewritten method

use std::io::Write;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cil::{ClauseKind, ExceptionClause};
use crate::instrument::{InstrumentedMethod, ProbeSite};

/// One placed probe call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSiteRecord {
    pub kind: String,
    pub placement: String,
    /// Original offset of the instruction reported on
    pub site: u32,
    /// Offset of the call sequence in the rewritten code
    pub new_offset: u32,
    /// Constant arguments; `None` where the value is read when the probe runs
    pub args: Vec<Option<i64>>,
    /// Native probe address, hex
    pub address: String,
}

impl From<&ProbeSite> for ProbeSiteRecord {
    fn from(site: &ProbeSite) -> Self {
        Self {
            kind: site.call.kind.name().to_string(),
            placement: site.call.placement.name().to_string(),
            site: site.call.site.0,
            new_offset: site.new_offset,
            args: site.call.args.iter().map(|arg| arg.value()).collect(),
            address: format!("0x{:x}", site.call.address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub original: u32,
    pub rewritten: u32,
}

/// Exception clause after remapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseRecord {
    pub kind: String,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filter_offset: Option<u32>,
}

impl From<&ExceptionClause> for ClauseRecord {
    fn from(clause: &ExceptionClause) -> Self {
        let kind = match clause.kind {
            ClauseKind::Catch(token) => format!("catch 0x{token:08x}"),
            ClauseKind::Filter(_) => "filter".to_string(),
            ClauseKind::Finally => "finally".to_string(),
            ClauseKind::Fault => "fault".to_string(),
        };
        Self {
            kind,
            try_offset: clause.try_offset,
            try_length: clause.try_length,
            handler_offset: clause.handler_offset,
            handler_length: clause.handler_length,
            filter_offset: clause.filter_offset(),
        }
    }
}

/// Everything known about one rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationReport {
    pub method_token: String,
    /// Thread accessor entry point called for thread arguments, hex
    pub thread_entry: String,
    pub original_code_size: u32,
    pub new_code_size: usize,
    pub original_max_stack: u16,
    pub max_stack: u16,
    pub original_peak_depth: u32,
    pub widened_branches: usize,
    pub probes: Vec<ProbeSiteRecord>,
    pub offset_map: Vec<OffsetRecord>,
    pub clauses: Vec<ClauseRecord>,
}

impl InstrumentationReport {
    #[must_use]
    pub fn from_method(method: &InstrumentedMethod) -> Self {
        let offset_map: Vec<OffsetRecord> = method
            .offset_map
            .iter()
            .map(|(original, rewritten)| OffsetRecord { original, rewritten })
            .collect();
        Self {
            method_token: method.token.to_string(),
            thread_entry: format!("0x{:x}", method.thread_entry.0),
            original_code_size: offset_map.last().map_or(0, |entry| entry.original),
            new_code_size: method.code.len(),
            original_max_stack: method.original_max_stack,
            max_stack: method.max_stack,
            original_peak_depth: method.original_peak_depth,
            widened_branches: method.widened_branches,
            probes: method.probes.iter().map(ProbeSiteRecord::from).collect(),
            offset_map,
            clauses: method.clauses.iter().map(ClauseRecord::from).collect(),
        }
    }

    /// Write the report as pretty-printed JSON
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn export<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, self).context("Failed to serialize report")?;
        writeln!(writer).context("Failed to write report")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FunctionInfo, MethodDescriptor, MethodSignature};
    use crate::domain::{FunctionId, MethodToken, ModuleId, SigToken};
    use crate::instrument::Instrumenter;
    use crate::probes::ProbeTable;
    use crate::thread::ThreadEntry;
    use ilprobe_common::{ProbeKind, ProbeKindSet};
    use std::sync::Arc;

    fn instrumented() -> InstrumentedMethod {
        // nop ; ret
        let mut descriptor = MethodDescriptor::from_raw_body(
            FunctionId(1),
            FunctionInfo { module: ModuleId(1), token: MethodToken(0x0600_0003) },
            MethodSignature { arg_count: 0, local_count: 0, returns_value: false },
            vec![0x0A, 0x00, 0x2A],
        )
        .unwrap();
        descriptor.probe_signatures.insert(ProbeKind::MethodEnter, SigToken(0x1100_0101));
        descriptor.thread_signature = Some(SigToken(0x1100_0100));
        let instrumenter = Instrumenter::new(
            Arc::new(ProbeTable::synthetic()),
            ThreadEntry(0x5000),
            ProbeKindSet::EMPTY.with(ProbeKind::MethodEnter),
        );
        instrumenter.rewrite(&descriptor).unwrap()
    }

    #[test]
    fn test_report_contents() {
        let report = InstrumentationReport::from_method(&instrumented());
        assert_eq!(report.method_token, "0x06000003");
        assert_eq!(report.thread_entry, "0x5000");
        assert_eq!(report.original_code_size, 2);
        // ldc.i4 + accessor call + probe call
        assert_eq!(report.new_code_size, 2 + 35);
        assert_eq!(report.probes.len(), 1);
        assert_eq!(report.probes[0].kind, "method_enter");
        assert_eq!(report.probes[0].args, vec![Some(0x0600_0003), None]);
        assert_eq!(report.offset_map.first(), Some(&OffsetRecord { original: 0, rewritten: 35 }));
    }

    #[test]
    fn test_export_creates_valid_json() {
        let report = InstrumentationReport::from_method(&instrumented());
        let mut buffer = Vec::new();
        report.export(&mut buffer).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed["method_token"], "0x06000003");
        assert!(parsed["offset_map"].is_array());
        let back: InstrumentationReport = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(back, report);
    }
}
