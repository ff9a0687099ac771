//! The profiler: initialization, per-method instrumentation, shutdown

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, error, info, warn};

use super::{CallbackStatus, ProfilerCallback};
use crate::channel::ProbeChannel;
use crate::config::ProfilerConfig;
use crate::descriptor::{MetadataSource, MethodDescriptorBuilder};
use crate::domain::{ChannelError, FunctionId, MetadataError};
use crate::instrument::{Instrumentation, Instrumenter};
use crate::probes::ProbeTable;
use crate::thread::{self, OsThreadIdentity, ThreadIdentity};

/// Snapshot of the per-method counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilerStats {
    /// Compilation events seen after initialization
    pub compilations: u64,
    pub instrumented: u64,
    /// Rewrite refused, original body kept
    pub passed_through: u64,
    /// Metadata could not be resolved
    pub unresolved: u64,
    /// Runtime refused the rewritten body
    pub install_failed: u64,
    /// Compilation events before the probe table existed
    pub deferred: u64,
    pub dynamic_skipped: u64,
    pub probes_emitted: u64,
    pub widened_branches: u64,
}

impl ProfilerStats {
    /// Share of described methods that were rewritten
    ///
    /// Returns 100.0 if nothing has been compiled yet.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for percentages
    pub fn coverage(&self) -> f64 {
        if self.compilations == 0 {
            return 100.0;
        }
        (self.instrumented as f64 / self.compilations as f64) * 100.0
    }
}

#[derive(Default)]
struct Counters {
    compilations: AtomicU64,
    instrumented: AtomicU64,
    passed_through: AtomicU64,
    unresolved: AtomicU64,
    install_failed: AtomicU64,
    deferred: AtomicU64,
    dynamic_skipped: AtomicU64,
    probes_emitted: AtomicU64,
    widened_branches: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Profiler wired to the runtime's callback surface
///
/// The [`Instrumenter`] only comes into existence once a probe table does,
/// so no compilation event can be rewritten against a missing or partial
/// table.
pub struct Profiler<S: MetadataSource> {
    config: ProfilerConfig,
    source: S,
    threads: Arc<dyn ThreadIdentity>,
    instrumenter: OnceLock<Instrumenter>,
    channel: Mutex<Option<ProbeChannel>>,
    shut_down: AtomicBool,
    counters: Counters,
}

impl<S: MetadataSource> Profiler<S> {
    /// Uninitialized profiler using native thread ids
    #[must_use]
    pub fn new(config: ProfilerConfig, source: S) -> Self {
        Self {
            config,
            source,
            threads: Arc::new(OsThreadIdentity),
            instrumenter: OnceLock::new(),
            channel: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Replace the thread accessor; only the first initialization in a process installs one
    #[must_use]
    pub fn with_thread_identity(mut self, threads: Arc<dyn ThreadIdentity>) -> Self {
        self.threads = threads;
        self
    }

    /// Initialize against an already-available probe table, without a channel
    ///
    /// Returns false if the profiler was already initialized.
    pub fn initialize_with_table(&self, table: ProbeTable) -> bool {
        if self.is_initialized() {
            return false;
        }
        let thread_entry = thread::install(Arc::clone(&self.threads));
        let instrumenter = Instrumenter::new(Arc::new(table), thread_entry, self.config.policy);
        self.instrumenter.set(instrumenter).is_ok()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.instrumenter.get().is_some()
    }

    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// The metadata source this profiler installs bodies through
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn stats(&self) -> ProfilerStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ProfilerStats {
            compilations: load(&c.compilations),
            instrumented: load(&c.instrumented),
            passed_through: load(&c.passed_through),
            unresolved: load(&c.unresolved),
            install_failed: load(&c.install_failed),
            deferred: load(&c.deferred),
            dynamic_skipped: load(&c.dynamic_skipped),
            probes_emitted: load(&c.probes_emitted),
            widened_branches: load(&c.widened_branches),
        }
    }

    fn connect_and_negotiate(&self) -> Result<ProbeTable, ChannelError> {
        let mut channel = ProbeChannel::connect(&self.config.channel)?;
        let table = channel.exchange_probe_table(self.config.policy)?;
        if let Ok(mut slot) = self.channel.lock() {
            *slot = Some(channel);
        }
        Ok(table)
    }

    fn instrument_method(&self, instrumenter: &Instrumenter, function: FunctionId) {
        let counters = &self.counters;
        bump(&counters.compilations);

        let builder = MethodDescriptorBuilder::new(&self.source, instrumenter.policy());
        let descriptor = match builder.describe(function) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("{e}");
                bump(&counters.unresolved);
                return;
            }
        };
        let (module, token) = (descriptor.module, descriptor.token);

        match instrumenter.instrument(descriptor) {
            Instrumentation::Rewritten(method) => {
                if let Err(e) = self.source.set_method_body(module, token, method.body()) {
                    let e = MetadataError::SetBodyFailed { module, token, reason: format!("{e:#}") };
                    warn!("{e}");
                    bump(&counters.install_failed);
                    return;
                }
                debug!(
                    "instrumented {function} {token}: {} probes, {} -> {} bytes",
                    method.probes.len(),
                    method.offset_map.iter().last().map_or(0, |(old, _)| old),
                    method.code.len()
                );
                bump(&counters.instrumented);
                counters.probes_emitted.fetch_add(method.probes.len() as u64, Ordering::Relaxed);
                counters
                    .widened_branches
                    .fetch_add(method.widened_branches as u64, Ordering::Relaxed);
            }
            Instrumentation::Unmodified { error, .. } => {
                debug!("{function} left unmodified: {error}");
                bump(&counters.passed_through);
            }
        }
    }
}

impl<S: MetadataSource> ProfilerCallback for Profiler<S> {
    fn initialize(&self) -> CallbackStatus {
        if self.is_initialized() {
            return CallbackStatus::Ok;
        }
        info!(
            "Initializing instrumentation (engine: {}, probes: {} kinds)",
            self.config.channel.socket_path.display(),
            self.config.policy.len()
        );
        let table = match self.connect_and_negotiate() {
            Ok(table) => table,
            Err(e) => {
                error!("Instrumentation disabled: {e}");
                return CallbackStatus::Failed;
            }
        };
        self.initialize_with_table(table);
        if let Some(instrumenter) = self.instrumenter.get() {
            info!("✓ Instrumentation ready ({} probe kinds enabled)", instrumenter.policy().len());
        }
        CallbackStatus::Ok
    }

    fn jit_compilation_started(&self, function: FunctionId, _is_safe_to_block: bool) -> CallbackStatus {
        let Some(instrumenter) = self.instrumenter.get() else {
            debug!("{function} compiled before the probe table exists, not instrumented");
            bump(&self.counters.deferred);
            return CallbackStatus::Deferred;
        };
        self.instrument_method(instrumenter, function);
        CallbackStatus::Ok
    }

    fn dynamic_method_jit_compilation_started(
        &self,
        function: FunctionId,
        _is_safe_to_block: bool,
        il_header: &[u8],
    ) -> CallbackStatus {
        debug!(
            "{} ({} header bytes)",
            MetadataError::UnsupportedDynamicMethod(function),
            il_header.len()
        );
        bump(&self.counters.dynamic_skipped);
        CallbackStatus::Ok
    }

    fn shutdown(&self) -> CallbackStatus {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return CallbackStatus::Ok;
        }
        let channel = match self.channel.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(channel) = channel {
            match channel.shutdown() {
                Ok(outcome) => debug!("probe channel shutdown: {outcome}"),
                Err(e) => warn!("Probe channel closed uncleanly: {e}"),
            }
        }
        display_statistics(&self.stats());
        CallbackStatus::Ok
    }
}

/// Print the end-of-process summary
pub fn display_statistics(stats: &ProfilerStats) {
    info!(
        "stats: compilations={} instrumented={} passed_through={} unresolved={} \
         install_failed={} deferred={} dynamic_skipped={}",
        stats.compilations,
        stats.instrumented,
        stats.passed_through,
        stats.unresolved,
        stats.install_failed,
        stats.deferred,
        stats.dynamic_skipped
    );
    info!(
        "stats: probes_emitted={} widened_branches={} coverage={:.1}%",
        stats.probes_emitted,
        stats.widened_branches,
        stats.coverage()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FunctionInfo, InMemorySource, MethodSignature};
    use crate::domain::{MethodToken, ModuleId, ThreadToken};
    use crate::thread::FnThreadIdentity;

    const FUNCTION: FunctionId = FunctionId(0x40);
    const INFO: FunctionInfo = FunctionInfo { module: ModuleId(2), token: MethodToken(0x0600_0007) };
    const SIG: MethodSignature = MethodSignature { arg_count: 0, local_count: 0, returns_value: false };

    fn profiler(source: InMemorySource) -> Profiler<InMemorySource> {
        Profiler::new(ProfilerConfig::default(), source)
            .with_thread_identity(Arc::new(FnThreadIdentity(|| Ok(ThreadToken(9)))))
    }

    fn source_with(raw: Vec<u8>) -> InMemorySource {
        InMemorySource::new().with_method(FUNCTION, INFO, SIG, raw)
    }

    #[test]
    fn test_compilation_before_initialize_is_deferred() {
        // nop ; ret
        let profiler = profiler(source_with(vec![0x0A, 0x00, 0x2A]));
        assert_eq!(profiler.jit_compilation_started(FUNCTION, true), CallbackStatus::Deferred);
        assert!(profiler.source().installed_body(INFO.module, INFO.token).is_none());
        assert_eq!(profiler.stats().deferred, 1);
        assert_eq!(profiler.stats().compilations, 0);
    }

    #[test]
    fn test_compilation_installs_rewritten_body() {
        let profiler = profiler(source_with(vec![0x0A, 0x00, 0x2A]));
        assert!(profiler.initialize_with_table(ProbeTable::synthetic()));
        assert!(!profiler.initialize_with_table(ProbeTable::synthetic()));

        assert_eq!(profiler.jit_compilation_started(FUNCTION, true), CallbackStatus::Ok);
        let installed = profiler.source().installed_body(INFO.module, INFO.token).unwrap();
        // fat header
        assert_eq!(installed[0] & 0x3, 0x3);
        let stats = profiler.stats();
        assert_eq!(stats.instrumented, 1);
        // MethodEnter and MethodLeave
        assert_eq!(stats.probes_emitted, 2);
    }

    #[test]
    fn test_per_method_failures_never_fail_compilation() {
        // br.s to offset 100: outside the code
        let profiler = profiler(source_with(vec![0x0A, 0x2B, 0x62]));
        profiler.initialize_with_table(ProbeTable::synthetic());

        assert_eq!(profiler.jit_compilation_started(FUNCTION, true), CallbackStatus::Ok);
        assert_eq!(profiler.jit_compilation_started(FunctionId(0xdead), true), CallbackStatus::Ok);

        let stats = profiler.stats();
        assert_eq!(stats.passed_through, 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.instrumented, 0);
        assert!(profiler.source().installed_body(INFO.module, INFO.token).is_none());
    }

    #[test]
    fn test_dynamic_methods_are_counted_not_rewritten() {
        let profiler = profiler(InMemorySource::new());
        profiler.initialize_with_table(ProbeTable::synthetic());
        let status = profiler.dynamic_method_jit_compilation_started(FunctionId(1), false, &[0x06]);
        assert_eq!(status, CallbackStatus::Ok);
        assert_eq!(profiler.stats().dynamic_skipped, 1);
    }

    #[test]
    fn test_initialize_without_engine_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ProfilerConfig::default();
        config.channel.socket_path = dir.path().join("absent.sock");
        config.channel.connect_timeout = std::time::Duration::from_millis(60);
        let profiler = Profiler::new(config, InMemorySource::new());

        assert_eq!(profiler.initialize(), CallbackStatus::Failed);
        assert!(!profiler.is_initialized());
        assert_eq!(profiler.shutdown(), CallbackStatus::Ok);
        assert_eq!(profiler.shutdown(), CallbackStatus::Ok);
    }

    #[test]
    fn test_coverage() {
        assert!((ProfilerStats::default().coverage() - 100.0).abs() < f64::EPSILON);
        let stats = ProfilerStats { compilations: 4, instrumented: 3, ..ProfilerStats::default() };
        assert!((stats.coverage() - 75.0).abs() < f64::EPSILON);
    }
}
