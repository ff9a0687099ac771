//! # Method Descriptor Builder
//!
//! Turns a runtime compilation handle into a self-contained
//! [`MethodDescriptor`]. Every runtime query happens here, up front, so the
//! rewrite never calls back into the runtime mid-flight:
//!
//! 1. function identity (module, method token)
//! 2. raw IL method body (header, code, exception clauses)
//! 3. signature summary (argument/local counts, return value)
//! 4. one `calli` signature token per enabled probe kind, plus one for the
//!    thread accessor entry point
//! 5. stack effect of every call-site token the body references
//!
//! Any missing piece is [`MetadataError::UnresolvedMetadata`]; the caller
//! leaves such methods unmodified.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use ilprobe_common::{ProbeKind, ProbeKindSet};
use log::debug;

use crate::cil::{self, ExceptionClause, FlowControl, MethodBody};
use crate::domain::{FunctionId, MetadataError, MethodToken, ModuleId, SigToken};

/// Identity of a compiled function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    pub module: ModuleId,
    pub token: MethodToken,
}

/// Signature summary of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSignature {
    /// Argument count, including `this` for instance methods
    pub arg_count: u16,
    pub local_count: u16,
    pub returns_value: bool,
}

/// Stack effect of one call-like instruction as a whole
///
/// For `newobj`, `pops` excludes `this` and `pushes` is 1. For `calli`,
/// `pops` includes the function pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u16,
    pub pushes: u16,
}

/// Runtime queries needed to describe a method
///
/// Implemented over the runtime's profiling interface in production and by
/// [`InMemorySource`] for tooling and tests.
pub trait MetadataSource: Send + Sync {
    /// Resolve module and token of a function
    ///
    /// # Errors
    /// Returns an error if the runtime does not know the function
    fn function_info(&self, function: FunctionId) -> Result<FunctionInfo>;

    /// Raw IL method body (header included)
    ///
    /// # Errors
    /// Returns an error if the body is unavailable
    fn method_body(&self, module: ModuleId, token: MethodToken) -> Result<Vec<u8>>;

    /// Signature summary
    ///
    /// # Errors
    /// Returns an error if the signature cannot be decoded
    fn signature(&self, module: ModuleId, token: MethodToken) -> Result<MethodSignature>;

    /// `StandAloneSig` token in `module` describing the probe's native signature
    ///
    /// # Errors
    /// Returns an error if the signature cannot be defined in the module
    fn probe_signature(&self, module: ModuleId, kind: ProbeKind) -> Result<SigToken>;

    /// `StandAloneSig` token for the thread accessor: no arguments, returns `int64`
    ///
    /// # Errors
    /// Returns an error if the signature cannot be defined in the module
    fn thread_signature(&self, module: ModuleId) -> Result<SigToken>;

    /// Stack effect of a call-site token, `None` if it cannot be resolved
    fn call_site_effect(&self, module: ModuleId, token: u32) -> Option<StackEffect>;

    /// Install a rewritten body
    ///
    /// # Errors
    /// Returns an error if the runtime refuses the body
    fn set_method_body(&self, module: ModuleId, token: MethodToken, body: &[u8]) -> Result<()>;
}

/// Self-contained snapshot of one method for one rewrite pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub function: FunctionId,
    pub module: ModuleId,
    pub token: MethodToken,
    pub code: Vec<u8>,
    pub arg_count: u16,
    pub local_count: u16,
    pub returns_value: bool,
    pub max_stack: u16,
    pub init_locals: bool,
    pub local_sig_token: u32,
    pub clauses: Vec<ExceptionClause>,
    pub probe_signatures: HashMap<ProbeKind, SigToken>,
    /// `calli` signature of the thread accessor, fetched when any probe is enabled
    pub thread_signature: Option<SigToken>,
    pub call_sites: HashMap<u32, StackEffect>,
    raw_body: Vec<u8>,
}

impl MethodDescriptor {
    /// Assemble a descriptor from an already-fetched raw body
    ///
    /// # Errors
    /// Returns an error if the raw body cannot be parsed
    pub fn from_raw_body(
        function: FunctionId,
        info: FunctionInfo,
        signature: MethodSignature,
        raw_body: Vec<u8>,
    ) -> Result<Self, cil::BodyError> {
        let body = MethodBody::parse(&raw_body)?;
        Ok(Self {
            function,
            module: info.module,
            token: info.token,
            code: body.code,
            arg_count: signature.arg_count,
            local_count: signature.local_count,
            returns_value: signature.returns_value,
            max_stack: body.max_stack,
            init_locals: body.init_locals,
            local_sig_token: body.local_sig_token,
            clauses: body.clauses,
            probe_signatures: HashMap::new(),
            thread_signature: None,
            call_sites: HashMap::new(),
            raw_body,
        })
    }

    /// The body exactly as the runtime handed it over
    #[must_use]
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// Tokens referenced by call-like instructions, in first-use order
    ///
    /// Undecodable code yields the tokens seen before the failure; the
    /// engine rejects such bodies on its own scan.
    #[must_use]
    pub fn call_site_tokens(&self) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut tokens = Vec::new();
        let mut offset = 0u32;
        while (offset as usize) < self.code.len() {
            let Ok(instruction) = cil::decode_at(&self.code, offset) else {
                break;
            };
            if instruction.opcode.flow == FlowControl::Call {
                if let Some(token) = instruction.token() {
                    if seen.insert(token) {
                        tokens.push(token);
                    }
                }
            }
            offset = instruction.end();
        }
        tokens
    }
}

/// Builds descriptors against a [`MetadataSource`]
pub struct MethodDescriptorBuilder<'a, S: MetadataSource + ?Sized> {
    source: &'a S,
    probe_kinds: ProbeKindSet,
}

impl<'a, S: MetadataSource + ?Sized> MethodDescriptorBuilder<'a, S> {
    /// Builder fetching `calli` signatures for every kind in `probe_kinds`
    #[must_use]
    pub fn new(source: &'a S, probe_kinds: ProbeKindSet) -> Self {
        Self { source, probe_kinds }
    }

    /// Describe the function behind a compilation handle
    ///
    /// # Errors
    /// Returns [`MetadataError::UnresolvedMetadata`] if any query fails
    pub fn describe(&self, function: FunctionId) -> Result<MethodDescriptor, MetadataError> {
        let unresolved = |reason: String| MetadataError::UnresolvedMetadata { function, reason };

        let info = self.source.function_info(function).map_err(|e| unresolved(format!("{e:#}")))?;
        let raw = self
            .source
            .method_body(info.module, info.token)
            .map_err(|e| unresolved(format!("method body: {e:#}")))?;
        let signature = self
            .source
            .signature(info.module, info.token)
            .map_err(|e| unresolved(format!("signature: {e:#}")))?;

        let mut descriptor = MethodDescriptor::from_raw_body(function, info, signature, raw)
            .map_err(|e| unresolved(e.to_string()))?;

        for kind in self.probe_kinds.iter() {
            let sig = self
                .source
                .probe_signature(info.module, kind)
                .map_err(|e| unresolved(format!("{} probe signature: {e:#}", kind.name())))?;
            descriptor.probe_signatures.insert(kind, sig);
        }
        if !self.probe_kinds.is_empty() {
            let sig = self
                .source
                .thread_signature(info.module)
                .map_err(|e| unresolved(format!("thread accessor signature: {e:#}")))?;
            descriptor.thread_signature = Some(sig);
        }

        for token in descriptor.call_site_tokens() {
            if let Some(effect) = self.source.call_site_effect(info.module, token) {
                descriptor.call_sites.insert(token, effect);
            }
        }

        debug!(
            "described {} {} {}: {} bytes, {} clauses, {} call sites",
            function,
            info.module,
            info.token,
            descriptor.code.len(),
            descriptor.clauses.len(),
            descriptor.call_sites.len()
        );
        Ok(descriptor)
    }
}

struct StoredMethod {
    info: FunctionInfo,
    raw_body: Vec<u8>,
    signature: MethodSignature,
}

/// In-memory [`MetadataSource`] for offline tooling and tests
///
/// Probe signature tokens are synthesized as `0x1100_0100 + kind code`;
/// the thread accessor's is `0x1100_0100` itself.
#[derive(Default)]
pub struct InMemorySource {
    methods: HashMap<FunctionId, StoredMethod>,
    call_sites: HashMap<u32, StackEffect>,
    without_probe_signatures: bool,
    installed: Mutex<HashMap<(ModuleId, MethodToken), Vec<u8>>>,
}

impl InMemorySource {
    /// Empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method
    #[must_use]
    pub fn with_method(
        mut self,
        function: FunctionId,
        info: FunctionInfo,
        signature: MethodSignature,
        raw_body: Vec<u8>,
    ) -> Self {
        self.methods.insert(function, StoredMethod { info, raw_body, signature });
        self
    }

    /// Register the stack effect of a call-site token
    #[must_use]
    pub fn with_call_site(mut self, token: u32, effect: StackEffect) -> Self {
        self.call_sites.insert(token, effect);
        self
    }

    /// Make every probe signature query fail
    #[must_use]
    pub fn without_probe_signatures(mut self) -> Self {
        self.without_probe_signatures = true;
        self
    }

    /// Body installed through [`MetadataSource::set_method_body`], if any
    #[must_use]
    pub fn installed_body(&self, module: ModuleId, token: MethodToken) -> Option<Vec<u8>> {
        self.installed.lock().ok()?.get(&(module, token)).cloned()
    }

    fn stored(&self, module: ModuleId, token: MethodToken) -> Result<&StoredMethod> {
        self.methods
            .values()
            .find(|m| m.info.module == module && m.info.token == token)
            .ok_or_else(|| anyhow!("no method {token} in {module}"))
    }
}

impl MetadataSource for InMemorySource {
    fn function_info(&self, function: FunctionId) -> Result<FunctionInfo> {
        self.methods.get(&function).map(|m| m.info).ok_or_else(|| anyhow!("unknown {function}"))
    }

    fn method_body(&self, module: ModuleId, token: MethodToken) -> Result<Vec<u8>> {
        Ok(self.stored(module, token)?.raw_body.clone())
    }

    fn signature(&self, module: ModuleId, token: MethodToken) -> Result<MethodSignature> {
        Ok(self.stored(module, token)?.signature)
    }

    fn probe_signature(&self, _module: ModuleId, kind: ProbeKind) -> Result<SigToken> {
        if self.without_probe_signatures {
            bail!("signature emission disabled");
        }
        Ok(SigToken(0x1100_0100 + u32::from(kind.code())))
    }

    fn thread_signature(&self, _module: ModuleId) -> Result<SigToken> {
        if self.without_probe_signatures {
            bail!("signature emission disabled");
        }
        Ok(SigToken(0x1100_0100))
    }

    fn call_site_effect(&self, _module: ModuleId, token: u32) -> Option<StackEffect> {
        self.call_sites.get(&token).copied()
    }

    fn set_method_body(&self, module: ModuleId, token: MethodToken, body: &[u8]) -> Result<()> {
        let mut installed = self.installed.lock().map_err(|_| anyhow!("install lock poisoned"))?;
        installed.insert((module, token), body.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNCTION: FunctionId = FunctionId(0x10);
    const INFO: FunctionInfo = FunctionInfo { module: ModuleId(1), token: MethodToken(0x0600_0001) };
    const SIG: MethodSignature = MethodSignature { arg_count: 1, local_count: 0, returns_value: false };

    fn tiny(code: &[u8]) -> Vec<u8> {
        let mut raw = vec![u8::try_from(code.len() << 2).unwrap() | 0x2];
        raw.extend_from_slice(code);
        raw
    }

    #[test]
    fn test_describe_collects_everything_up_front() {
        // ldarg.0 ; call 0x0A000001 ; callvirt 0x0A000002 ; call 0x0A000001 ; ret
        let code = [
            0x02, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x6F, 0x02, 0x00, 0x00, 0x0A, 0x28, 0x01, 0x00, 0x00,
            0x0A, 0x2A,
        ];
        let source = InMemorySource::new()
            .with_method(FUNCTION, INFO, SIG, tiny(&code))
            .with_call_site(0x0A00_0001, StackEffect { pops: 1, pushes: 1 });
        let kinds = ProbeKindSet::EMPTY.with(ProbeKind::Call).with(ProbeKind::MethodEnter);

        let descriptor = MethodDescriptorBuilder::new(&source, kinds).describe(FUNCTION).unwrap();

        assert_eq!(descriptor.token, INFO.token);
        assert_eq!(descriptor.code, code.to_vec());
        assert_eq!(descriptor.max_stack, 8);
        assert_eq!(descriptor.call_site_tokens(), vec![0x0A00_0001, 0x0A00_0002]);
        assert_eq!(descriptor.call_sites.len(), 1);
        assert_eq!(descriptor.probe_signatures.len(), 2);
        assert_eq!(descriptor.probe_signatures[&ProbeKind::Call], SigToken(0x1100_0105));
        assert_eq!(descriptor.thread_signature, Some(SigToken(0x1100_0100)));
        assert_eq!(descriptor.raw_body(), tiny(&code).as_slice());
    }

    #[test]
    fn test_unknown_function_is_unresolved() {
        let source = InMemorySource::new();
        let err = MethodDescriptorBuilder::new(&source, ProbeKindSet::all())
            .describe(FUNCTION)
            .unwrap_err();
        assert!(matches!(err, MetadataError::UnresolvedMetadata { function, .. } if function == FUNCTION));
    }

    #[test]
    fn test_malformed_body_is_unresolved() {
        let source = InMemorySource::new().with_method(FUNCTION, INFO, SIG, vec![0x0E, 0x00]);
        let err = MethodDescriptorBuilder::new(&source, ProbeKindSet::all())
            .describe(FUNCTION)
            .unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_missing_probe_signature_is_unresolved() {
        let source = InMemorySource::new()
            .with_method(FUNCTION, INFO, SIG, tiny(&[0x2A]))
            .without_probe_signatures();
        let err = MethodDescriptorBuilder::new(&source, ProbeKindSet::all())
            .describe(FUNCTION)
            .unwrap_err();
        assert!(err.to_string().contains("method_enter probe signature"));
    }

    #[test]
    fn test_no_probes_needs_no_thread_signature() {
        let source = InMemorySource::new()
            .with_method(FUNCTION, INFO, SIG, tiny(&[0x2A]))
            .without_probe_signatures();
        let descriptor =
            MethodDescriptorBuilder::new(&source, ProbeKindSet::EMPTY).describe(FUNCTION).unwrap();
        assert!(descriptor.probe_signatures.is_empty());
        assert_eq!(descriptor.thread_signature, None);
    }
}
