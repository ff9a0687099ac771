//! Unix domain socket transport with a bounded connect window

use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::domain::ChannelError;

/// Pause between connection attempts
pub const RETRY_INTERVAL: Duration = Duration::from_millis(50);

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Connect to `path`, retrying until `timeout` has elapsed
///
/// # Errors
/// Returns [`ChannelError::Unavailable`] if no listener accepted in time
pub fn connect_with_retry(path: &Path, timeout: Duration) -> Result<UnixStream, ChannelError> {
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match UnixStream::connect(path) {
            Ok(stream) => {
                debug!("connected to {} after {attempts} attempt(s)", path.display());
                return Ok(stream);
            }
            Err(e) => {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    debug!("last connect error for {}: {e}", path.display());
                    return Err(ChannelError::Unavailable {
                        address: path.display().to_string(),
                        waited_ms: millis(elapsed),
                    });
                }
                thread::sleep(RETRY_INTERVAL.min(timeout - elapsed));
            }
        }
    }
}

/// Shortest read or write timeout ever applied
pub const MIN_IO_TIMEOUT: Duration = Duration::from_millis(1);

/// Apply read and write timeouts, never less than [`MIN_IO_TIMEOUT`]
///
/// The socket is never left blocking.
///
/// # Errors
/// Returns an error if the socket rejects the options
pub fn set_timeouts(stream: &UnixStream, timeout: Duration) -> io::Result<()> {
    let timeout = Some(timeout.max(MIN_IO_TIMEOUT));
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)
}

/// Whether an I/O error is a read or write timeout
#[must_use]
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nobody.sock");
        let started = Instant::now();
        let err = connect_with_retry(&path, Duration::from_millis(120)).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(
            matches!(err, ChannelError::Unavailable { waited_ms, .. } if waited_ms >= 120)
        );
    }

    #[test]
    fn test_zero_timeout_never_blocks() {
        let (a, _b) = UnixStream::pair().unwrap();
        set_timeouts(&a, Duration::ZERO).unwrap();
        assert_eq!(a.read_timeout().unwrap(), Some(MIN_IO_TIMEOUT));
        assert_eq!(a.write_timeout().unwrap(), Some(MIN_IO_TIMEOUT));

        set_timeouts(&a, Duration::from_millis(250)).unwrap();
        assert_eq!(a.read_timeout().unwrap(), Some(Duration::from_millis(250)));
    }
}
