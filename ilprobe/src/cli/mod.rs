//! Command-line front end: argument definitions and subcommand runners

pub mod args;

pub use args::{Args, Command, EngineArgs, InstrumentArgs};

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::cil::{self, ExceptionClause, MethodBody};
use crate::config::parse_probe_kinds;
use crate::descriptor::{FunctionInfo, InMemorySource, MethodDescriptorBuilder, MethodSignature};
use crate::domain::{FunctionId, MethodToken, ModuleId};
use crate::engine::{EngineOptions, SessionOptions};
use crate::export::InstrumentationReport;
use crate::instrument::{Instrumentation, Instrumenter};
use crate::probes::ProbeTable;
use crate::thread::ThreadEntry;

const OFFLINE_FUNCTION: FunctionId = FunctionId(1);
const OFFLINE_MODULE: ModuleId = ModuleId(1);

fn read_body(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read method body: {}", path.display()))
}

fn format_clauses(clauses: &[ExceptionClause]) -> String {
    let mut out = String::new();
    for (index, clause) in clauses.iter().enumerate() {
        let kind = match clause.kind {
            cil::ClauseKind::Catch(token) => format!("catch 0x{token:08x}"),
            cil::ClauseKind::Filter(offset) => format!("filter IL_{offset:04x}"),
            cil::ClauseKind::Finally => "finally".to_string(),
            cil::ClauseKind::Fault => "fault".to_string(),
        };
        out.push_str(&format!(
            "  [{index}] try IL_{:04x}..IL_{:04x} handler IL_{:04x}..IL_{:04x} {kind}\n",
            clause.try_offset,
            clause.try_end(),
            clause.handler_offset,
            clause.handler_end()
        ));
    }
    out
}

/// `ilprobe disasm`
///
/// # Errors
/// Returns an error if the body cannot be read, parsed or decoded
pub fn run_disasm(path: &Path) -> Result<()> {
    let raw = read_body(path)?;
    let body = MethodBody::parse(&raw).context("Failed to parse method body")?;
    let instructions = cil::disassemble(&body.code).context("Failed to decode IL")?;

    println!(
        "max_stack={} init_locals={} locals=0x{:08x} code_size={} clauses={}",
        body.max_stack,
        body.init_locals,
        body.local_sig_token,
        body.code.len(),
        body.clauses.len()
    );
    print!("{}", cil::listing(&instructions));
    if !body.clauses.is_empty() {
        println!("exception clauses:");
        print!("{}", format_clauses(&body.clauses));
    }
    Ok(())
}

/// `ilprobe instrument`
///
/// # Errors
/// Returns an error if the body cannot be read or the rewrite is rejected
pub fn run_instrument(args: &InstrumentArgs) -> Result<()> {
    let raw = read_body(&args.body)?;
    let policy = parse_probe_kinds(&args.probes)?;
    let info = FunctionInfo { module: OFFLINE_MODULE, token: MethodToken(args.token) };
    let signature = MethodSignature {
        arg_count: args.arg_count,
        local_count: 0,
        returns_value: args.returns_value,
    };
    let source = InMemorySource::new().with_method(OFFLINE_FUNCTION, info, signature, raw);

    let thread_entry = args.thread_entry.map_or_else(ThreadEntry::synthetic, ThreadEntry);
    let instrumenter = Instrumenter::new(Arc::new(ProbeTable::synthetic()), thread_entry, policy);
    let descriptor = MethodDescriptorBuilder::new(&source, instrumenter.policy())
        .describe(OFFLINE_FUNCTION)
        .context("Failed to describe method")?;

    if !args.quiet {
        let before = cil::disassemble(&descriptor.code).context("Failed to decode IL")?;
        println!("--- original ({} bytes)", descriptor.code.len());
        print!("{}", cil::listing(&before));
    }

    let method = match instrumenter.instrument(descriptor) {
        Instrumentation::Rewritten(method) => method,
        Instrumentation::Unmodified { error, .. } => bail!("{error}"),
    };

    if !args.quiet {
        let after = cil::disassemble(&method.code).context("Failed to decode rewritten IL")?;
        println!(
            "--- rewritten ({} bytes, {} probes, {} widened branches, max_stack {} -> {})",
            method.code.len(),
            method.probes.len(),
            method.widened_branches,
            method.original_max_stack,
            method.max_stack
        );
        print!("{}", cil::listing(&after));
        if !method.clauses.is_empty() {
            println!("exception clauses:");
            print!("{}", format_clauses(&method.clauses));
        }
    }

    if let Some(output) = &args.output {
        std::fs::write(output, method.body())
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("saved: {}", output.display());
    }
    if let Some(export) = &args.export {
        let file = File::create(export).context("Failed to create report file")?;
        InstrumentationReport::from_method(&method)
            .export(BufWriter::new(file))
            .context("Failed to export report")?;
        println!("saved: {}", export.display());
    }
    Ok(())
}

/// Engine settings from `ilprobe engine` arguments
#[must_use]
pub fn engine_options(args: &EngineArgs) -> EngineOptions {
    EngineOptions {
        socket_path: args.socket.clone(),
        probe_library: args.probe_library.clone(),
        session: SessionOptions { acknowledge_shutdown: !args.no_ack },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cil::ClauseKind;

    #[test]
    fn test_format_clauses() {
        let clauses = [ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 0,
            try_length: 4,
            handler_offset: 4,
            handler_length: 2,
        }];
        assert_eq!(
            format_clauses(&clauses),
            "  [0] try IL_0000..IL_0004 handler IL_0004..IL_0006 finally\n"
        );
    }

    #[test]
    fn test_instrument_writes_body_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.bin");
        // tiny header: nop ; ret
        std::fs::write(&body, [0x0A, 0x00, 0x2A]).unwrap();
        let args = InstrumentArgs {
            body,
            token: 0x0600_0001,
            probes: "method_enter".to_string(),
            arg_count: 0,
            returns_value: false,
            thread_entry: Some(0x3000),
            output: Some(dir.path().join("out.bin")),
            export: Some(dir.path().join("report.json")),
            quiet: true,
        };
        run_instrument(&args).unwrap();

        let rewritten = MethodBody::parse(&std::fs::read(dir.path().join("out.bin")).unwrap()).unwrap();
        assert_eq!(rewritten.code.len(), 35 + 2);
        let report: InstrumentationReport =
            serde_json::from_slice(&std::fs::read(dir.path().join("report.json")).unwrap()).unwrap();
        assert_eq!(report.thread_entry, "0x3000");
    }

    #[test]
    fn test_rejected_rewrite_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.bin");
        // ret with a value that was never pushed
        std::fs::write(&body, [0x06, 0x2A]).unwrap();
        let args = InstrumentArgs {
            body,
            token: 0x0600_0001,
            probes: "all".to_string(),
            arg_count: 0,
            returns_value: true,
            thread_entry: None,
            output: None,
            export: None,
            quiet: true,
        };
        let err = run_instrument(&args).unwrap_err().to_string();
        assert!(err.contains("rejected"));
    }

    #[test]
    fn test_engine_options() {
        let args = EngineArgs {
            socket: "/tmp/x.sock".into(),
            probe_library: None,
            no_ack: true,
        };
        assert!(!engine_options(&args).session.acknowledge_shutdown);
    }
}
