//! Profiler configuration from the host process environment
//!
//! The profiler is loaded into a managed host process, so it has no argv of
//! its own; everything comes from `ILPROBE_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use ilprobe_common::{ProbeKind, ProbeKindSet};

use crate::channel::ChannelConfig;
use crate::domain::ConfigError;

pub const ENV_SOCKET: &str = "ILPROBE_SOCKET";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "ILPROBE_CONNECT_TIMEOUT_MS";
pub const ENV_IO_TIMEOUT_MS: &str = "ILPROBE_IO_TIMEOUT_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "ILPROBE_SHUTDOWN_TIMEOUT_MS";
pub const ENV_PROBES: &str = "ILPROBE_PROBES";
pub const ENV_LOG: &str = "ILPROBE_LOG";

/// Everything the profiler needs at initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    pub channel: ChannelConfig,
    /// Probe kinds to emit
    pub policy: ProbeKindSet,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self { channel: ChannelConfig::default(), policy: ProbeKindSet::all() }
    }
}

impl ProfilerConfig {
    /// Load from the process environment
    ///
    /// # Errors
    /// Returns [`ConfigError`] for unparsable values
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup
    ///
    /// # Errors
    /// Returns [`ConfigError`] for unparsable values
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_SOCKET).filter(|p| !p.trim().is_empty()) {
            config.channel.socket_path = PathBuf::from(path.trim());
        }
        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.channel.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_IO_TIMEOUT_MS) {
            config.channel.io_timeout = parse_millis(ENV_IO_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            config.channel.shutdown_timeout = parse_millis(ENV_SHUTDOWN_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_PROBES) {
            config.policy = parse_probe_kinds(&value)?;
        }
        Ok(config)
    }
}

/// Positive millisecond count; zero would disable the bound
fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue { var, value: value.to_string(), reason };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid("must be at least 1".to_string())),
        Ok(millis) => Ok(Duration::from_millis(millis)),
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Parse `all` or a comma-separated list of probe kind names
///
/// # Errors
/// Returns [`ConfigError::UnknownProbeKind`] for an unrecognized name
pub fn parse_probe_kinds(value: &str) -> Result<ProbeKindSet, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("all") {
        return Ok(ProbeKindSet::all());
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .try_fold(ProbeKindSet::EMPTY, |set, name| {
            ProbeKind::from_name(&name.to_ascii_lowercase())
                .map(|kind| set.with(kind))
                .ok_or_else(|| ConfigError::UnknownProbeKind(name.to_string()))
        })
}

/// Install the logger for a host-embedded profiler
///
/// Honors `ILPROBE_LOG` (same syntax as `RUST_LOG`, default `info`).
/// Returns false if the host already installed a logger.
pub fn init_logging() -> bool {
    let env = env_logger::Env::new().filter_or(ENV_LOG, "info");
    env_logger::Builder::from_env(env).format_timestamp_millis().try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ProfilerConfig::default());
        assert_eq!(config.channel.socket_path, PathBuf::from("/tmp/ilprobe.sock"));
        assert_eq!(config.channel.shutdown_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_overrides() {
        let config = ProfilerConfig::from_lookup(lookup(&[
            (ENV_SOCKET, "/run/engine.sock"),
            (ENV_CONNECT_TIMEOUT_MS, "250"),
            (ENV_PROBES, "method_enter, Branch_Taken"),
        ]))
        .unwrap();
        assert_eq!(config.channel.socket_path, PathBuf::from("/run/engine.sock"));
        assert_eq!(config.channel.connect_timeout, Duration::from_millis(250));
        assert_eq!(
            config.policy,
            ProbeKindSet::EMPTY.with(ProbeKind::MethodEnter).with(ProbeKind::BranchTaken)
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = ProfilerConfig::from_lookup(lookup(&[(ENV_IO_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: ENV_IO_TIMEOUT_MS, .. }));

        for var in [ENV_CONNECT_TIMEOUT_MS, ENV_IO_TIMEOUT_MS, ENV_SHUTDOWN_TIMEOUT_MS] {
            let err = ProfilerConfig::from_lookup(lookup(&[(var, "0")])).unwrap_err();
            assert!(
                matches!(
                    err,
                    ConfigError::InvalidValue { var: v, ref reason, .. }
                        if v == var && reason.contains("at least 1")
                ),
                "got {err}"
            );
        }

        let err = parse_probe_kinds("call,gc_alloc").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProbeKind(ref name) if name == "gc_alloc"));
        assert_eq!(parse_probe_kinds("ALL").unwrap(), ProbeKindSet::all());
    }
}
