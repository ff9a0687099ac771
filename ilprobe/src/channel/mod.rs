//! # Probe Channel
//!
//! The single session with the out-of-process analysis engine.
//!
//! ```text
//! profiler                                   engine
//!    │ ── connect (retry until deadline) ──►   │
//!    │ ── HandshakeRequest (tag 1) ────────►   │
//!    │ ◄─ HandshakeResponse (tag 2) ────────   │   → ProbeTable
//!    │          ... process lifetime ...       │
//!    │ ── Shutdown (tag 3) ────────────────►   │
//!    │ ◄─ ShutdownAck (tag 4, bounded wait) ─  │
//! ```
//!
//! All calls block the calling thread and are bounded by timeouts from
//! [`ChannelConfig`]. There is no reconnection: a broken channel disables
//! instrumentation for the process.

pub mod frame;
pub mod message;
pub mod transport;

use std::fmt;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use ilprobe_common::{
    ProbeKindSet, TAG_HANDSHAKE_REQUEST, TAG_HANDSHAKE_RESPONSE, TAG_SHUTDOWN, TAG_SHUTDOWN_ACK,
};
use log::{info, warn};

use crate::domain::ChannelError;
use crate::probes::ProbeTable;

pub use frame::{encode_frame, parse_header, read_frame, split_body, write_frame, Frame};
pub use message::{HandshakeRequest, HandshakeResponse};

/// Well-known engine address
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/ilprobe.sock";

/// Transport address and timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub socket_path: PathBuf,
    /// Retry window for `connect`
    pub connect_timeout: Duration,
    /// Per-operation read/write timeout during the handshake
    pub io_timeout: Duration,
    /// Bounded wait for the shutdown acknowledgement
    pub shutdown_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            connect_timeout: Duration::from_millis(2000),
            io_timeout: Duration::from_millis(2000),
            shutdown_timeout: Duration::from_millis(1000),
        }
    }
}

/// How the shutdown exchange ended; every variant released the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Acknowledged,
    /// No acknowledgement within the shutdown timeout
    TimedOut,
    /// The engine hung up without acknowledging
    PeerClosed,
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::TimedOut => write!(f, "timed out"),
            Self::PeerClosed => write!(f, "peer closed"),
        }
    }
}

/// Connected session with the analysis engine
pub struct ProbeChannel {
    stream: UnixStream,
    config: ChannelConfig,
}

impl ProbeChannel {
    /// Open the transport
    ///
    /// # Errors
    /// Returns [`ChannelError::Unavailable`] if no engine is listening within
    /// the connect window
    pub fn connect(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let stream = transport::connect_with_retry(&config.socket_path, config.connect_timeout)?;
        transport::set_timeouts(&stream, config.io_timeout)?;
        info!("✓ Connected to analysis engine at {}", config.socket_path.display());
        Ok(Self { stream, config: config.clone() })
    }

    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Negotiate probe addresses
    ///
    /// `capabilities` are the kinds this side can emit; the engine must
    /// supply an entry for each of them.
    ///
    /// # Errors
    /// Returns [`ChannelError::ProtocolMismatch`] for an incompatible peer,
    /// [`ChannelError::MalformedMessage`] on framing or content violations
    pub fn exchange_probe_table(
        &mut self,
        capabilities: ProbeKindSet,
    ) -> Result<ProbeTable, ChannelError> {
        let request = HandshakeRequest::new(capabilities, std::process::id());
        write_frame(&mut self.stream, TAG_HANDSHAKE_REQUEST, &request.encode())?;

        let frame = read_frame(&mut self.stream)?;
        if frame.tag != TAG_HANDSHAKE_RESPONSE {
            return Err(ChannelError::MalformedMessage(format!(
                "expected handshake response, got tag {}",
                frame.tag
            )));
        }
        let response = HandshakeResponse::decode(&frame.payload)?;
        let table = ProbeTable::from_entries(&response.entries, capabilities)?;
        info!("✓ Negotiated {} probe entry points (protocol v{})", table.len(), response.version);
        Ok(table)
    }

    /// Send the termination notice and wait, bounded, for the acknowledgement
    ///
    /// Consumes the channel; the transport is released on every path. A
    /// missing acknowledgement is logged, not an error.
    ///
    /// # Errors
    /// Returns an error only if the engine answers with something other than
    /// an acknowledgement, or the transport fails in a way other than a
    /// timeout or hang-up
    pub fn shutdown(mut self) -> Result<ShutdownOutcome, ChannelError> {
        let result = self.exchange_shutdown();
        // the peer may already be gone
        let _ = self.stream.shutdown(Shutdown::Both);
        drop(self.stream);

        match &result {
            Ok(ShutdownOutcome::Acknowledged) => info!("✓ Analysis engine acknowledged shutdown"),
            Ok(ShutdownOutcome::TimedOut) => warn!(
                "Analysis engine did not acknowledge shutdown within {}ms",
                self.config.shutdown_timeout.as_millis()
            ),
            Ok(ShutdownOutcome::PeerClosed) => {
                warn!("Analysis engine closed the channel without acknowledging shutdown");
            }
            Err(e) => warn!("Probe channel shutdown failed: {e}"),
        }
        result
    }

    fn exchange_shutdown(&mut self) -> Result<ShutdownOutcome, ChannelError> {
        transport::set_timeouts(&self.stream, self.config.shutdown_timeout)?;
        match write_frame(&mut self.stream, TAG_SHUTDOWN, &[]) {
            Ok(()) => {}
            Err(ChannelError::Io(e)) if transport::is_timeout(&e) => {
                return Ok(ShutdownOutcome::TimedOut)
            }
            Err(ChannelError::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(ShutdownOutcome::PeerClosed)
            }
            Err(e) => return Err(e),
        }

        match frame::read_frame_or_eof(&mut self.stream) {
            Ok(Some(frame)) if frame.tag == TAG_SHUTDOWN_ACK && frame.payload.is_empty() => {
                Ok(ShutdownOutcome::Acknowledged)
            }
            Ok(Some(frame)) => Err(ChannelError::MalformedMessage(format!(
                "expected shutdown acknowledgement, got tag {} with {} payload bytes",
                frame.tag,
                frame.payload.len()
            ))),
            Ok(None) => Ok(ShutdownOutcome::PeerClosed),
            Err(ChannelError::Io(e)) if transport::is_timeout(&e) => Ok(ShutdownOutcome::TimedOut),
            Err(ChannelError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                Ok(ShutdownOutcome::PeerClosed)
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for ProbeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeChannel").field("socket", &self.config.socket_path).finish()
    }
}
