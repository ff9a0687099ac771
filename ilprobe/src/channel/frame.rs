//! Length-prefixed framing
//!
//! `len: u32 LE` (tag + payload), `tag: u8`, payload. Shared by the blocking
//! profiler side and the async engine endpoint, so the pure encode/parse
//! helpers are kept apart from the `Read`/`Write` ones.

use std::io::{self, Read, Write};

use ilprobe_common::{FRAME_LEN_PREFIX, MAX_FRAME_LEN};

use crate::domain::ChannelError;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// Encode a frame
///
/// # Errors
/// Returns [`ChannelError::MalformedMessage`] if the payload is too large
pub fn encode_frame(tag: u8, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
    let len = u32::try_from(payload.len() + 1)
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            ChannelError::MalformedMessage(format!("payload of {} bytes too large", payload.len()))
        })?;
    let mut out = Vec::with_capacity(FRAME_LEN_PREFIX + payload.len() + 1);
    out.extend_from_slice(&len.to_le_bytes());
    out.push(tag);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Validate a length prefix, returning the number of bytes that follow it
///
/// # Errors
/// Returns [`ChannelError::MalformedMessage`] for 0 or oversize lengths
pub fn parse_header(header: [u8; FRAME_LEN_PREFIX]) -> Result<usize, ChannelError> {
    let len = u32::from_le_bytes(header);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(ChannelError::MalformedMessage(format!("invalid frame length {len}")));
    }
    usize::try_from(len).map_err(|_| ChannelError::MalformedMessage(format!("frame length {len}")))
}

/// Split a frame body (everything after the prefix) into tag and payload
///
/// # Errors
/// Returns [`ChannelError::MalformedMessage`] for an empty body
pub fn split_body(mut body: Vec<u8>) -> Result<Frame, ChannelError> {
    if body.is_empty() {
        return Err(ChannelError::MalformedMessage("frame without tag".to_string()));
    }
    let payload = body.split_off(1);
    Ok(Frame { tag: body[0], payload })
}

fn closed(e: io::Error) -> ChannelError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ChannelError::MalformedMessage("connection closed mid-frame".to_string())
    } else {
        ChannelError::Io(e)
    }
}

/// Read one frame
///
/// # Errors
/// Returns [`ChannelError::MalformedMessage`] on framing violations or EOF,
/// [`ChannelError::Io`] on transport errors including timeouts
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, ChannelError> {
    read_frame_or_eof(reader)?.ok_or_else(|| {
        ChannelError::MalformedMessage("connection closed before a frame".to_string())
    })
}

/// Read one frame, or `None` if the peer closed cleanly before it began
///
/// # Errors
/// Same as [`read_frame`], except for EOF at a frame boundary
pub fn read_frame_or_eof<R: Read>(reader: &mut R) -> Result<Option<Frame>, ChannelError> {
    let mut first = [0u8; 1];
    loop {
        match reader.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }
    let mut rest = [0u8; FRAME_LEN_PREFIX - 1];
    reader.read_exact(&mut rest).map_err(closed)?;
    let len = parse_header([first[0], rest[0], rest[1], rest[2]])?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(closed)?;
    split_body(body).map(Some)
}

/// Write one frame
///
/// # Errors
/// Returns an error if the payload is too large or the write fails
pub fn write_frame<W: Write>(writer: &mut W, tag: u8, payload: &[u8]) -> Result<(), ChannelError> {
    let frame = encode_frame(tag, payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
