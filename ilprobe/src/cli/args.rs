//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::channel::DEFAULT_SOCKET_PATH;

#[derive(Parser)]
#[command(
    name = "ilprobe",
    about = "Offline tooling and stub engine for the IL probe profiler",
    after_help = "\
EXAMPLES:
    ilprobe disasm body.bin                          Show a raw method body
    ilprobe instrument body.bin --probes call,return Rewrite against synthetic probes
    ilprobe engine --socket /tmp/ilprobe.sock        Serve handshakes for profilers"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Disassemble a raw IL method body (header, code, exception clauses)
    Disasm {
        /// File holding the raw method body
        #[arg(value_name = "BODY")]
        body: PathBuf,
    },
    /// Rewrite a raw method body against a fabricated probe table
    Instrument(InstrumentArgs),
    /// Run a stub analysis engine endpoint
    Engine(EngineArgs),
}

#[derive(ClapArgs)]
pub struct InstrumentArgs {
    /// File holding the raw method body
    #[arg(value_name = "BODY")]
    pub body: PathBuf,

    /// Method definition token passed to probes (decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0x06000001", value_parser = parse_token)]
    pub token: u32,

    /// Probe kinds to emit: `all` or a comma-separated list
    #[arg(long, default_value = "all")]
    pub probes: String,

    /// Argument count, including `this`
    #[arg(long, default_value = "0")]
    pub arg_count: u16,

    /// Whether the method returns a value
    #[arg(long)]
    pub returns_value: bool,

    /// Address of the thread accessor probe sequences call (default: synthetic)
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    pub thread_entry: Option<u64>,

    /// Write the rewritten method body to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Export a JSON report of the rewrite
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Suppress the before/after listings
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ClapArgs)]
pub struct EngineArgs {
    /// Unix socket to listen on
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Shared library exporting `ilprobe_probe_<kind>` functions
    #[arg(long, value_name = "LIB")]
    pub probe_library: Option<PathBuf>,

    /// Never acknowledge shutdown notices
    #[arg(long)]
    pub no_ack: bool,
}

/// Parse a metadata token written in decimal or `0x` hex
pub fn parse_token(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid token {value:?}: {e}"))
}

/// Parse a native address written in decimal or `0x` hex
pub fn parse_address(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    match parsed {
        Ok(0) => Err("address must be non-zero".to_string()),
        Ok(address) => Ok(address),
        Err(e) => Err(format!("invalid address {value:?}: {e}")),
    }
}
