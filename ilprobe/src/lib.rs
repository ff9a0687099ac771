//! # ilprobe - JIT-time CIL Instrumentation Profiler
//!
//! ilprobe rewrites managed methods at the moment the runtime is about to
//! JIT-compile them, inserting calls to native probe functions. The probes
//! belong to an out-of-process analysis engine, which reconstructs
//! per-thread execution traces from the events they report.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Managed Host Process                        │
//! │                                                                 │
//! │  runtime ── JIT compilation started ──▶ ┌──────────────────┐    │
//! │                                         │     Profiler     │    │
//! │                                         │    (dispatch)    │    │
//! │                                         └────────┬─────────┘    │
//! │                                                  │              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────▼────────┐     │
//! │  │  Metadata    │──▶│  Descriptor  │──▶│   Instrumenter   │     │
//! │  │   Source     │   │   Builder    │   │ (scan → emit →   │     │
//! │  └──────────────┘   └──────────────┘   │    validate)     │     │
//! │         ▲                              └─────────┬────────┘     │
//! │         └──────── rewritten body ◀───────────────┘              │
//! │                                                                 │
//! │  ┌──────────────┐   probe table (once)                          │
//! │  │ ProbeChannel │◀──────────────────────────────┐               │
//! │  └──────┬───────┘                               │               │
//! └─────────┼───────────────────────────────────────┼───────────────┘
//!           │ Unix socket, framed                   │
//!           ▼                                       │
//! ┌─────────────────────────────────────────────────┴───────────────┐
//! │               Analysis Engine (out of process)                  │
//! │        handshake → probe addresses ; shutdown → ack             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core
//!
//! - [`instrument`]: the rewrite pipeline
//!   - `scan`: instruction units (prefixes fused), boundaries, clause checks
//!   - `stack`: evaluation-stack depth estimate
//!   - `plan` / `layout` / `emit`: probe placement, landing points, branch widening
//!   - `validate`: independent re-derivation of the layout on the emitted code
//! - [`descriptor`]: everything the rewrite needs, fetched up front
//! - [`channel`]: handshake and shutdown with the analysis engine
//! - [`probes`]: the negotiated probe table
//! - [`thread`]: current logical thread for probe arguments
//! - [`dispatch`]: the runtime callback surface and the [`dispatch::Profiler`]
//!
//! ### Support
//!
//! - [`cil`]: opcode table, decoder, method body codec
//! - [`domain`]: newtypes and error enums
//! - [`config`]: `ILPROBE_*` environment configuration
//! - [`engine`]: stub analysis engine endpoint
//! - [`export`]: JSON reports of rewrites
//! - [`preflight`]: engine socket checks
//! - [`cli`]: the `ilprobe` binary's arguments and subcommands
//!
//! ## Failure Model
//!
//! - Channel and handshake failures are fatal to initialization: no
//!   instrumentation without a complete probe table.
//! - Metadata and rewrite failures are per method: the method runs
//!   unobserved with its original body.
//! - An unavailable thread identity becomes the unknown-thread sentinel.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Serve probe tables to profilers
//! ilprobe engine --socket /tmp/ilprobe.sock
//!
//! # Inspect what a rewrite does to a method body
//! ilprobe instrument body.bin --probes method_enter,call --export report.json
//! ```

// Expose modules for testing
pub mod channel;
pub mod cil;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod export;
pub mod instrument;
pub mod preflight;
pub mod probes;
pub mod thread;
