//! Async engine endpoint speaking the probe channel protocol

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ilprobe_common::{
    ProbeEntry, ProbeKindSet, FRAME_LEN_PREFIX, PROTOCOL_VERSION, TAG_HANDSHAKE_REQUEST,
    TAG_HANDSHAKE_RESPONSE, TAG_SHUTDOWN, TAG_SHUTDOWN_ACK,
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;

use crate::channel::{encode_frame, parse_header, split_body, Frame, HandshakeRequest, HandshakeResponse};
use crate::domain::ChannelError;
use crate::probes::ProbeTable;

/// Per-session behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Answer shutdown notices; when false the engine stays silent until
    /// the profiler hangs up
    pub acknowledge_shutdown: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { acknowledge_shutdown: true }
    }
}

/// What happened during one profiler session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub pid: Option<u32>,
    pub capabilities: ProbeKindSet,
    pub entries_sent: usize,
    pub shutdown_received: bool,
    pub shutdown_acknowledged: bool,
}

async fn read_frame_or_eof<R>(reader: &mut R) -> Result<Option<Frame>, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_LEN_PREFIX];
    let mut filled = 0;
    while filled < FRAME_LEN_PREFIX {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ChannelError::MalformedMessage("connection closed mid-frame".to_string()));
        }
        filled += n;
    }
    let len = parse_header(header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ChannelError::MalformedMessage("connection closed mid-frame".to_string())
        } else {
            ChannelError::Io(e)
        }
    })?;
    split_body(body).map(Some)
}

async fn write_frame<W>(writer: &mut W, tag: u8, payload: &[u8]) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(tag, payload)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Rows of `table` answering a request for `capabilities`
#[must_use]
pub fn response_entries(table: &ProbeTable, capabilities: ProbeKindSet) -> Vec<ProbeEntry> {
    table
        .iter()
        .filter(|(kind, _)| capabilities.contains(*kind))
        .map(|(kind, address)| ProbeEntry::new(kind, address))
        .collect()
}

/// Serve one profiler session until it shuts down or hangs up
///
/// # Errors
/// Returns an error on transport failures or frames the engine does not
/// understand
pub async fn serve_session<S>(
    stream: &mut S,
    table: &ProbeTable,
    options: SessionOptions,
) -> Result<SessionSummary, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut summary = SessionSummary::default();
    while let Some(frame) = read_frame_or_eof(stream).await? {
        match frame.tag {
            TAG_HANDSHAKE_REQUEST => {
                let request = HandshakeRequest::decode(&frame.payload)?;
                if request.version != PROTOCOL_VERSION {
                    warn!(
                        "pid {} speaks protocol version {}, answering with {PROTOCOL_VERSION}",
                        request.pid, request.version
                    );
                }
                let response = HandshakeResponse {
                    version: PROTOCOL_VERSION,
                    entries: response_entries(table, request.capabilities),
                };
                write_frame(stream, TAG_HANDSHAKE_RESPONSE, &response.encode()?).await?;
                info!(
                    "handshake from pid {}: {} of {} requested probes supplied",
                    request.pid,
                    response.entries.len(),
                    request.capabilities.len()
                );
                summary.pid = Some(request.pid);
                summary.capabilities = request.capabilities;
                summary.entries_sent = response.entries.len();
            }
            TAG_SHUTDOWN if !summary.shutdown_received => {
                summary.shutdown_received = true;
                if options.acknowledge_shutdown {
                    write_frame(stream, TAG_SHUTDOWN_ACK, &[]).await?;
                    summary.shutdown_acknowledged = true;
                    break;
                }
                debug!("shutdown notice left unacknowledged");
            }
            tag => {
                return Err(ChannelError::MalformedMessage(format!(
                    "unexpected tag {tag} from profiler"
                )))
            }
        }
    }
    Ok(summary)
}

/// Listening engine endpoint
///
/// The socket file is removed when the server is dropped.
pub struct EngineServer {
    listener: UnixListener,
    socket_path: PathBuf,
    table: Arc<ProbeTable>,
    options: SessionOptions,
}

impl EngineServer {
    /// Bind the listening socket; must be called inside a tokio runtime
    ///
    /// # Errors
    /// Returns an error if the socket cannot be bound
    pub fn bind(socket_path: &Path, table: ProbeTable, options: SessionOptions) -> Result<Self> {
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind engine socket {}", socket_path.display()))?;
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            table: Arc::new(table),
            options,
        })
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    #[must_use]
    pub fn probe_table(&self) -> &ProbeTable {
        &self.table
    }

    /// Accept and serve exactly one session
    ///
    /// # Errors
    /// Returns an error if accepting fails or the session breaks the protocol
    pub async fn accept_one(&self) -> Result<SessionSummary> {
        let (mut stream, _) = self.listener.accept().await.context("Failed to accept profiler")?;
        let summary = serve_session(&mut stream, &self.table, self.options).await?;
        Ok(summary)
    }

    /// Serve sessions concurrently until `shutdown` resolves
    ///
    /// Returns the number of sessions accepted.
    ///
    /// # Errors
    /// Returns an error if the listener fails
    pub async fn run<F>(&self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = 0u64;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (mut stream, _) = accepted.context("Failed to accept profiler")?;
                    sessions += 1;
                    let table = Arc::clone(&self.table);
                    let options = self.options;
                    tokio::spawn(async move {
                        match serve_session(&mut stream, &table, options).await {
                            Ok(summary) => info!(
                                "session {sessions} closed (pid {:?}, shutdown acknowledged: {})",
                                summary.pid, summary.shutdown_acknowledged
                            ),
                            Err(e) => warn!("session {sessions} failed: {e}"),
                        }
                    });
                }
                () = &mut shutdown => break,
            }
        }
        Ok(sessions)
    }
}

impl Drop for EngineServer {
    fn drop(&mut self) {
        // may already be gone
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
