//! Probe entry points exported by a native probe library
//!
//! A probe library exports one C-ABI function per kind, named
//! `ilprobe_probe_<kind>` (for example `ilprobe_probe_method_enter`). The
//! addresses are the symbol values in the file; the engine serving them is
//! expected to have mapped the library at its link-time base.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ilprobe_common::ProbeKind;
use log::{debug, warn};
use object::{Object, ObjectSymbol};

use crate::probes::ProbeTable;

/// Prefix of exported probe symbols
pub const PROBE_SYMBOL_PREFIX: &str = "ilprobe_probe_";

/// Exported symbol name of a probe kind
#[must_use]
pub fn probe_symbol_name(kind: ProbeKind) -> String {
    format!("{PROBE_SYMBOL_PREFIX}{}", kind.name())
}

/// Resolve the probe table exported by the library at `path`
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or exports no
/// probe symbols
pub fn resolve_probe_library(path: &Path) -> Result<ProbeTable> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read probe library: {}", path.display()))?;
    let table = resolve_from_bytes(&data)
        .with_context(|| format!("Failed to resolve probes in {}", path.display()))?;
    debug!("resolved {} probes from {}", table.len(), path.display());
    Ok(table)
}

/// Same as [`resolve_probe_library`] on an in-memory image
///
/// # Errors
/// Returns an error if the image cannot be parsed or exports no probe symbols
pub fn resolve_from_bytes(data: &[u8]) -> Result<ProbeTable> {
    let obj = object::File::parse(data).context("Failed to parse object file")?;

    let mut found = Vec::new();
    for symbol in obj.symbols().chain(obj.dynamic_symbols()) {
        if symbol.is_undefined() || symbol.address() == 0 {
            continue;
        }
        let Ok(name) = symbol.name() else { continue };
        let Some(kind_name) = name.strip_prefix(PROBE_SYMBOL_PREFIX) else { continue };
        match ProbeKind::from_name(kind_name) {
            Some(kind) if !found.iter().any(|(k, _)| *k == kind) => {
                found.push((kind, symbol.address()));
            }
            Some(_) => {}
            None => warn!("ignoring unknown probe symbol {name}"),
        }
    }

    if found.is_empty() {
        bail!("no {PROBE_SYMBOL_PREFIX}* symbols exported");
    }
    Ok(ProbeTable::fabricate(found))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(unsafe_code)]
    #[no_mangle]
    pub extern "C" fn ilprobe_probe_throw(_offset: i32, _thread: i64) {}

    #[test]
    fn test_symbol_names() {
        assert_eq!(probe_symbol_name(ProbeKind::MethodEnter), "ilprobe_probe_method_enter");
        assert_eq!(probe_symbol_name(ProbeKind::BranchNotTaken), "ilprobe_probe_branch_not_taken");
    }

    #[test]
    fn test_not_an_object_file() {
        let err = resolve_from_bytes(b"definitely not elf").unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_missing_library() {
        let err = resolve_probe_library(Path::new("/nonexistent/libprobes.so")).unwrap_err();
        assert!(err.to_string().contains("Failed to read probe library"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolves_exported_probe_from_test_binary() {
        // keep the export referenced
        std::hint::black_box(ilprobe_probe_throw as extern "C" fn(i32, i64));
        let exe = std::env::current_exe().unwrap();
        let table = resolve_probe_library(&exe).unwrap();
        assert!(table.address(ProbeKind::Throw).is_some());
    }
}
