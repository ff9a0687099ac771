//! # Stub Analysis Engine
//!
//! A minimal out-of-process peer for the probe channel: it answers handshakes
//! with a probe table and acknowledges shutdown notices. It does not record
//! probe events; it exists so the profiler can be brought up end to end.
//!
//! Probe addresses come either from a native probe library (exported
//! `ilprobe_probe_<kind>` symbols, see [`symbols`]) or from the synthetic
//! range of [`ProbeTable::synthetic`].

pub mod server;
pub mod symbols;

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::channel::DEFAULT_SOCKET_PATH;
use crate::preflight;
use crate::probes::ProbeTable;

pub use server::{serve_session, EngineServer, SessionOptions, SessionSummary};
pub use symbols::{probe_symbol_name, resolve_probe_library};

/// Engine endpoint settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub socket_path: PathBuf,
    pub probe_library: Option<PathBuf>,
    pub session: SessionOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            probe_library: None,
            session: SessionOptions::default(),
        }
    }
}

/// Probe table the engine will serve
///
/// # Errors
/// Returns an error if the probe library cannot be resolved
pub fn load_probe_table(options: &EngineOptions) -> Result<ProbeTable> {
    match &options.probe_library {
        Some(path) => {
            preflight::check_probe_library(path)?;
            resolve_probe_library(path)
        }
        None => Ok(ProbeTable::synthetic()),
    }
}

/// Run the engine until Ctrl+C
///
/// # Errors
/// Returns an error if pre-flight checks fail or the socket cannot be served
pub async fn run_engine(options: EngineOptions) -> Result<()> {
    preflight::run_preflight_checks(&options.socket_path)?;
    let table = load_probe_table(&options)?;

    let server = EngineServer::bind(&options.socket_path, table, options.session)?;
    info!(
        "Engine listening on {} with {} probes{}",
        server.socket_path().display(),
        server.probe_table().len(),
        if options.session.acknowledge_shutdown { "" } else { " (not acknowledging shutdown)" }
    );
    for (kind, address) in server.probe_table().iter() {
        info!("  {:<18} 0x{address:x}", kind.name());
    }

    let sessions = server
        .run(async {
            // an error here means no signal handler; stop serving
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Engine stopped")?;
    eprintln!("engine: {sessions} session(s) served");
    Ok(())
}
