//! Thread/identity accessor
//!
//! Resolves the identifier of the current logical thread that probes
//! receive by value. The accessor is installed once per process and
//! exposed to instrumented code as a native entry point
//! ([`ilprobe_current_thread`]): every probe sequence calls it for its
//! thread argument, so the id is the one of the thread running the
//! method, not the one that compiled it. A failed lookup degrades to
//! [`ThreadToken::UNKNOWN`].

// gettid(2) through libc, exported entry point
#![allow(unsafe_code)]

use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use crate::domain::{ThreadIdentityError, ThreadToken};
use crate::probes::SYNTHETIC_PROBE_BASE;

/// Source of the current logical thread identifier
pub trait ThreadIdentity: Send + Sync {
    /// Identifier of the calling thread
    ///
    /// # Errors
    /// Returns an error when called outside a runtime-managed thread context
    fn current(&self) -> Result<ThreadToken, ThreadIdentityError>;
}

/// Native OS thread id of the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct OsThreadIdentity;

impl ThreadIdentity for OsThreadIdentity {
    #[cfg(target_os = "linux")]
    fn current(&self) -> Result<ThreadToken, ThreadIdentityError> {
        // SAFETY: gettid takes no arguments and cannot fail on Linux
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        u64::try_from(tid)
            .ok()
            .filter(|tid| *tid != 0)
            .map(ThreadToken)
            .ok_or_else(|| ThreadIdentityError::Unavailable(format!("gettid returned {tid}")))
    }

    #[cfg(not(target_os = "linux"))]
    fn current(&self) -> Result<ThreadToken, ThreadIdentityError> {
        Err(ThreadIdentityError::Unavailable("no native thread id on this platform".to_string()))
    }
}

/// Accessor backed by a closure, for hosts that track logical threads
pub struct FnThreadIdentity<F>(pub F);

impl<F> ThreadIdentity for FnThreadIdentity<F>
where
    F: Fn() -> Result<ThreadToken, ThreadIdentityError> + Send + Sync,
{
    fn current(&self) -> Result<ThreadToken, ThreadIdentityError> {
        (self.0)()
    }
}

/// Current thread, or the sentinel when the accessor fails
pub fn resolve(identity: &dyn ThreadIdentity) -> ThreadToken {
    match identity.current() {
        Ok(token) => token,
        Err(e) => {
            debug!("{e}, using {}", ThreadToken::UNKNOWN);
            ThreadToken::UNKNOWN
        }
    }
}

// ============================================================================
// Native entry point
// ============================================================================

static ACCESSOR: OnceLock<Arc<dyn ThreadIdentity>> = OnceLock::new();

/// Address of the function instrumented code calls for its thread argument
///
/// The callee takes no arguments and returns the thread as `int64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadEntry(pub u64);

impl ThreadEntry {
    /// [`ilprobe_current_thread`] in this process
    #[must_use]
    pub fn native() -> Self {
        let entry: extern "C" fn() -> i64 = ilprobe_current_thread;
        Self(entry as usize as u64)
    }

    /// Recognizable fake address for offline rewrites, below the probe range
    #[must_use]
    pub fn synthetic() -> Self {
        Self(SYNTHETIC_PROBE_BASE)
    }
}

/// Install the process-wide accessor behind [`ilprobe_current_thread`]
///
/// The first installed accessor stays for the life of the process.
pub fn install(identity: Arc<dyn ThreadIdentity>) -> ThreadEntry {
    if ACCESSOR.set(identity).is_err() {
        warn!("thread accessor already installed, keeping the first one");
    }
    ThreadEntry::native()
}

fn thread_arg(identity: Option<&Arc<dyn ThreadIdentity>>) -> i64 {
    identity.map_or(ThreadToken::UNKNOWN, |identity| resolve(identity.as_ref())).as_probe_arg()
}

/// Thread argument of the calling thread, as probes receive it
///
/// Returns the unknown-thread sentinel before [`install`] or when the
/// accessor fails.
#[no_mangle]
pub extern "C" fn ilprobe_current_thread() -> i64 {
    thread_arg(ACCESSOR.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_os_thread_ids_differ_between_threads() {
        let here = OsThreadIdentity.current().unwrap();
        let there = std::thread::spawn(|| OsThreadIdentity.current().unwrap()).join().unwrap();
        assert!(here.is_known());
        assert_ne!(here, there);
    }

    #[test]
    fn test_failure_resolves_to_sentinel() {
        let failing =
            FnThreadIdentity(|| Err(ThreadIdentityError::Unavailable("detached".to_string())));
        assert_eq!(resolve(&failing), ThreadToken::UNKNOWN);

        let fixed = FnThreadIdentity(|| Ok(ThreadToken(7)));
        assert_eq!(resolve(&fixed), ThreadToken(7));
    }

    #[test]
    fn test_entry_point_argument() {
        assert_eq!(thread_arg(None), -1);

        let failing: Arc<dyn ThreadIdentity> =
            Arc::new(FnThreadIdentity(|| Err(ThreadIdentityError::Unavailable("gc".to_string()))));
        assert_eq!(thread_arg(Some(&failing)), -1);

        let fixed: Arc<dyn ThreadIdentity> = Arc::new(FnThreadIdentity(|| Ok(ThreadToken(12))));
        assert_eq!(thread_arg(Some(&fixed)), 12);
    }

    #[test]
    fn test_native_entry_is_stable() {
        assert_ne!(ThreadEntry::native().0, 0);
        assert_eq!(ThreadEntry::native(), ThreadEntry::native());
        assert_ne!(ThreadEntry::synthetic(), ThreadEntry::native());
    }
}
