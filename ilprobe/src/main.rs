//! # ilprobe - Main Entry Point
//!
//! Offline tooling around the profiler core:
//! - **disasm**: show a raw IL method body
//! - **instrument**: rewrite a body against synthetic probes and inspect the result
//! - **engine**: stub analysis engine answering profiler handshakes

use anyhow::Result;
use clap::Parser;

use ilprobe::cli::{engine_options, run_disasm, run_instrument, Args, Command};
use ilprobe::engine::run_engine;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("unknown probe kind") || msg.contains("invalid value") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Disasm { body } => run_disasm(&body),
        Command::Instrument(args) => run_instrument(&args),
        Command::Engine(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_engine(engine_options(&args)))
        }
    }
}
