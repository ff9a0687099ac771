//! # Runtime Callback Surface
//!
//! [`ProfilerCallback`] mirrors the runtime's profiling callback contract.
//! Every event has a default implementation returning
//! [`CallbackStatus::Ok`]; an implementor overrides only the events it acts
//! on. [`Profiler`] acts on initialization, JIT compilation and shutdown.

mod profiler;

use std::fmt;

use crate::domain::{
    AppDomainId, AssemblyId, ClassId, FunctionId, GcHandleId, HResult, ModuleId, ObjectId,
    ReJitId, ThreadId,
};

pub use profiler::{Profiler, ProfilerStats};

/// Answer to a runtime callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Continue normally
    Ok,
    /// Not acted on yet; the runtime proceeds without this component
    Deferred,
    /// Hard failure (initialization only)
    Failed,
}

impl CallbackStatus {
    /// HRESULT-style code (`S_OK`, `S_FALSE`, `E_FAIL`)
    #[must_use]
    pub fn hresult(self) -> HResult {
        match self {
            Self::Ok => HResult::S_OK,
            Self::Deferred => HResult::S_FALSE,
            Self::Failed => HResult::E_FAIL,
        }
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Deferred => write!(f, "deferred"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// GC generation bounds passed with a collection start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    Induced,
    Other,
}

/// Runtime-to-managed transition reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    Call,
    Return,
}

/// Runtime suspension reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    Other,
    ForGc,
    ForAppDomainShutdown,
    ForCodePitching,
    ForShutdown,
    ForInprocDebugger,
    ForGcPrep,
    ForReJit,
}

/// The runtime's profiling callback contract
///
/// Default bodies acknowledge the event and do nothing else. Handles are
/// opaque runtime identifiers; no event carries pointers into the managed
/// heap.
#[allow(unused_variables)]
pub trait ProfilerCallback: Send + Sync {
    // ------------------------------------------------------------------
    // Startup / shutdown
    // ------------------------------------------------------------------

    fn initialize(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn initialize_for_attach(&self, client_data: &[u8]) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn profiler_attach_complete(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn profiler_detach_succeeded(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn shutdown(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Application domains, assemblies, modules, classes
    // ------------------------------------------------------------------

    fn app_domain_creation_started(&self, app_domain: AppDomainId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn app_domain_creation_finished(&self, app_domain: AppDomainId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn app_domain_shutdown_started(&self, app_domain: AppDomainId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn app_domain_shutdown_finished(&self, app_domain: AppDomainId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn assembly_load_started(&self, assembly: AssemblyId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn assembly_load_finished(&self, assembly: AssemblyId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn assembly_unload_started(&self, assembly: AssemblyId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn assembly_unload_finished(&self, assembly: AssemblyId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn module_load_started(&self, module: ModuleId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn module_load_finished(&self, module: ModuleId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn module_unload_started(&self, module: ModuleId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn module_unload_finished(&self, module: ModuleId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn module_attached_to_assembly(&self, module: ModuleId, assembly: AssemblyId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn module_in_memory_symbols_updated(&self, module: ModuleId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn class_load_started(&self, class: ClassId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn class_load_finished(&self, class: ClassId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn class_unload_started(&self, class: ClassId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn class_unload_finished(&self, class: ClassId, status: HResult) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn function_unload_started(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn get_assembly_references(&self, assembly_path: &str) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // JIT compilation
    // ------------------------------------------------------------------

    fn jit_compilation_started(&self, function: FunctionId, is_safe_to_block: bool) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn jit_compilation_finished(
        &self,
        function: FunctionId,
        status: HResult,
        is_safe_to_block: bool,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn jit_cached_function_search_started(&self, function: FunctionId) -> (CallbackStatus, bool) {
        // use the cached (precompiled) image
        (CallbackStatus::Ok, true)
    }
    fn jit_cached_function_search_finished(&self, function: FunctionId, found: bool) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn jit_function_pitched(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn jit_inlining(&self, caller: FunctionId, callee: FunctionId) -> (CallbackStatus, bool) {
        (CallbackStatus::Ok, true)
    }
    fn dynamic_method_jit_compilation_started(
        &self,
        function: FunctionId,
        is_safe_to_block: bool,
        il_header: &[u8],
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn dynamic_method_jit_compilation_finished(
        &self,
        function: FunctionId,
        status: HResult,
        is_safe_to_block: bool,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn rejit_compilation_started(
        &self,
        function: FunctionId,
        rejit: ReJitId,
        is_safe_to_block: bool,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn get_rejit_parameters(&self, module: ModuleId, method: u32) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn rejit_compilation_finished(
        &self,
        function: FunctionId,
        rejit: ReJitId,
        status: HResult,
        is_safe_to_block: bool,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn rejit_error(
        &self,
        module: ModuleId,
        method: u32,
        function: FunctionId,
        status: HResult,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    fn thread_created(&self, thread: ThreadId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn thread_destroyed(&self, thread: ThreadId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn thread_assigned_to_os_thread(&self, thread: ThreadId, os_thread: u32) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn thread_name_changed(&self, thread: ThreadId, name: &str) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Remoting
    // ------------------------------------------------------------------

    fn remoting_client_invocation_started(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_client_sending_message(&self, is_async: bool) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_client_receiving_reply(&self, is_async: bool) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_client_invocation_finished(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_server_receiving_message(&self, is_async: bool) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_server_invocation_started(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_server_invocation_returned(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn remoting_server_sending_reply(&self, is_async: bool) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn unmanaged_to_managed_transition(
        &self,
        function: FunctionId,
        reason: TransitionReason,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn managed_to_unmanaged_transition(
        &self,
        function: FunctionId,
        reason: TransitionReason,
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Runtime suspension
    // ------------------------------------------------------------------

    fn runtime_suspend_started(&self, reason: SuspendReason) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn runtime_suspend_finished(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn runtime_suspend_aborted(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn runtime_resume_started(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn runtime_resume_finished(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn runtime_thread_suspended(&self, thread: ThreadId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn runtime_thread_resumed(&self, thread: ThreadId) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Garbage collection and heap
    // ------------------------------------------------------------------

    fn garbage_collection_started(&self, generations: &[bool], reason: GcReason) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn garbage_collection_finished(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn moved_references(
        &self,
        old_starts: &[ObjectId],
        new_starts: &[ObjectId],
        lengths: &[u64],
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn moved_references2(
        &self,
        old_starts: &[ObjectId],
        new_starts: &[ObjectId],
        lengths: &[u64],
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn surviving_references(&self, starts: &[ObjectId], lengths: &[u64]) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn surviving_references2(&self, starts: &[ObjectId], lengths: &[u64]) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn object_allocated(&self, object: ObjectId, class: ClassId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn objects_allocated_by_class(&self, classes: &[ClassId], counts: &[u64]) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn object_references(
        &self,
        object: ObjectId,
        class: ClassId,
        references: &[ObjectId],
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn root_references(&self, roots: &[ObjectId]) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn root_references2(&self, roots: &[ObjectId], root_ids: &[u64]) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn finalizeable_object_queued(&self, critical: bool, object: ObjectId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn handle_created(&self, handle: GcHandleId, initial_object: ObjectId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn handle_destroyed(&self, handle: GcHandleId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn conditional_weak_table_element_references(
        &self,
        keys: &[ObjectId],
        values: &[ObjectId],
    ) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    fn exception_thrown(&self, object: ObjectId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_search_function_enter(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_search_function_leave(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_search_filter_enter(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_search_filter_leave(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_search_catcher_found(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_os_handler_enter(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_os_handler_leave(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_unwind_function_enter(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_unwind_function_leave(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_unwind_finally_enter(&self, function: FunctionId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_unwind_finally_leave(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_catcher_enter(&self, function: FunctionId, object: ObjectId) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_catcher_leave(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_clr_catcher_found(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn exception_clr_catcher_execute(&self) -> CallbackStatus {
        CallbackStatus::Ok
    }

    // ------------------------------------------------------------------
    // COM interop
    // ------------------------------------------------------------------

    fn com_classic_vtable_created(&self, class: ClassId, slots: u32) -> CallbackStatus {
        CallbackStatus::Ok
    }
    fn com_classic_vtable_destroyed(&self, class: ClassId) -> CallbackStatus {
        CallbackStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;
    impl ProfilerCallback for Silent {}

    #[test]
    fn test_status_codes() {
        assert_eq!(CallbackStatus::Ok.hresult(), HResult(0));
        assert_eq!(CallbackStatus::Deferred.hresult(), HResult(1));
        assert_eq!(CallbackStatus::Failed.hresult().0 as u32, 0x8000_4005);
    }

    #[test]
    fn test_default_events_acknowledge() {
        let silent = Silent;
        assert_eq!(silent.garbage_collection_started(&[true, false], GcReason::Induced), CallbackStatus::Ok);
        assert_eq!(silent.exception_thrown(ObjectId(0x10)), CallbackStatus::Ok);
        assert_eq!(silent.remoting_client_invocation_started(), CallbackStatus::Ok);
        assert_eq!(silent.jit_inlining(FunctionId(1), FunctionId(2)), (CallbackStatus::Ok, true));
        assert_eq!(silent.jit_compilation_started(FunctionId(3), true), CallbackStatus::Ok);
    }
}
