//! Host functions satisfying the guest's declared imports.
//!
//! An [`ImportTable`] maps `(module, name)` pairs to one of a fixed set of
//! [`ImportShim`] behaviours. The table is closed: instantiating a module that
//! declares an import missing from the table fails, as does any import whose
//! wasm signature differs from the shim's.

use std::collections::BTreeMap;

use tracing::{debug, error, trace};
use wasmtime::{Caller, Linker, Module};

use crate::{
    TRACE_TARGET_GUEST,
    internal::state::HostState,
    memory::{Address, GuestMemory},
};

/// Import module used by the guest build for every host function.
pub const IMPORT_MODULE: &str = "env";

/// Callback return value telling the guest to keep going.
const CONTINUE: u32 = 0;

/// Addresses reported by the `__heap_base` and `__data_end` shims. They must
/// match the values the guest was linked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    pub heap_base: u32,
    pub data_end: u32,
}

impl HeapLayout {
    pub const DEFAULT_ADDRESS: u32 = 1024 * 1024;
}

impl Default for HeapLayout {
    fn default() -> Self {
        Self {
            heap_base: Self::DEFAULT_ADDRESS,
            data_end: Self::DEFAULT_ADDRESS,
        }
    }
}

/// Host behaviour bound to one guest import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportShim {
    /// `() -> ()`; logs and returns to the guest.
    Abort,
    /// `(assertion, file, line, function) -> ()`; fields are logged as-is.
    AssertFail,
    /// `(log_type, message) -> ()`; `message` is a NUL-terminated guest string.
    LogCallback,
    /// `(payload, bytes, offset, position, length) -> ()`.
    ParseCallback,
    /// `(payload, progress) -> u32`; always asks the guest to continue.
    ProgressCallback,
    /// `(payload) -> u32`; always asks the guest to continue.
    QueryProgressCallback,
    /// `(requested) -> u32`; reports success, growth is left to `memory.grow`.
    ResizeHeap,
    /// `() -> u32`; returns a fixed value.
    Constant(u32),
}

impl ImportShim {
    fn define(
        self,
        linker: &mut Linker<HostState>,
        module: &str,
        name: &str,
    ) -> anyhow::Result<()> {
        match self {
            Self::Abort => linker.func_wrap(module, name, |caller: Caller<'_, HostState>| {
                error!(
                    target: TRACE_TARGET_GUEST,
                    instance = caller.data().instance_id,
                    "guest called abort"
                );
            }),
            Self::AssertFail => linker.func_wrap(
                module,
                name,
                |caller: Caller<'_, HostState>,
                 assertion: u32,
                 file: u32,
                 line: u32,
                 function: u32| {
                    error!(
                        target: TRACE_TARGET_GUEST,
                        instance = caller.data().instance_id,
                        assertion,
                        file,
                        line,
                        function,
                        "guest assertion failed"
                    );
                },
            ),
            Self::LogCallback => linker.func_wrap(
                module,
                name,
                |mut caller: Caller<'_, HostState>, log_type: u32, message: u32| {
                    let instance = caller.data().instance_id;
                    match guest_c_string(&mut caller, Address::new(message)) {
                        Some(text) => debug!(
                            target: TRACE_TARGET_GUEST,
                            instance,
                            log_type,
                            message = %text,
                            "guest log"
                        ),
                        None => debug!(
                            target: TRACE_TARGET_GUEST,
                            instance,
                            log_type,
                            message_addr = message,
                            "guest log"
                        ),
                    }
                },
            ),
            Self::ParseCallback => linker.func_wrap(
                module,
                name,
                |caller: Caller<'_, HostState>,
                 payload: u32,
                 bytes: u32,
                 offset: u32,
                 position: u32,
                 length: u32| {
                    trace!(
                        target: TRACE_TARGET_GUEST,
                        instance = caller.data().instance_id,
                        payload,
                        bytes,
                        offset,
                        position,
                        length,
                        "guest parse callback"
                    );
                },
            ),
            Self::ProgressCallback => linker.func_wrap(
                module,
                name,
                |caller: Caller<'_, HostState>, payload: u32, progress: u32| -> u32 {
                    trace!(
                        target: TRACE_TARGET_GUEST,
                        instance = caller.data().instance_id,
                        payload,
                        progress,
                        "guest progress"
                    );
                    CONTINUE
                },
            ),
            Self::QueryProgressCallback => linker.func_wrap(
                module,
                name,
                |caller: Caller<'_, HostState>, payload: u32| -> u32 {
                    trace!(
                        target: TRACE_TARGET_GUEST,
                        instance = caller.data().instance_id,
                        payload,
                        "guest query progress"
                    );
                    CONTINUE
                },
            ),
            Self::ResizeHeap => linker.func_wrap(
                module,
                name,
                |caller: Caller<'_, HostState>, requested: u32| -> u32 {
                    trace!(
                        target: TRACE_TARGET_GUEST,
                        instance = caller.data().instance_id,
                        requested,
                        "guest heap resize request"
                    );
                    0
                },
            ),
            Self::Constant(value) => {
                linker.func_wrap(module, name, move |_caller: Caller<'_, HostState>| value)
            }
        }?;
        Ok(())
    }
}

/// Best-effort decode of a guest string for diagnostics.
fn guest_c_string(caller: &mut Caller<'_, HostState>, addr: Address) -> Option<String> {
    let export = caller.data().memory_export.clone();
    let memory = caller.get_export(&export)?.into_memory()?;
    GuestMemory::new(memory).read_c_string(&*caller, addr).ok()
}

/// Capability registry of host imports keyed by `(module, name)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    entries: BTreeMap<(String, String), ImportShim>,
}

impl ImportTable {
    /// The imports a tree-sitter guest build declares.
    #[must_use]
    pub fn standard(layout: HeapLayout) -> Self {
        Self::default()
            .with(IMPORT_MODULE, "abort", ImportShim::Abort)
            .with(IMPORT_MODULE, "__assert_fail", ImportShim::AssertFail)
            .with(IMPORT_MODULE, "tree_sitter_log_callback", ImportShim::LogCallback)
            .with(
                IMPORT_MODULE,
                "tree_sitter_parse_callback",
                ImportShim::ParseCallback,
            )
            .with(
                IMPORT_MODULE,
                "tree_sitter_progress_callback",
                ImportShim::ProgressCallback,
            )
            .with(
                IMPORT_MODULE,
                "tree_sitter_query_progress_callback",
                ImportShim::QueryProgressCallback,
            )
            .with(IMPORT_MODULE, "emscripten_resize_heap", ImportShim::ResizeHeap)
            .with(
                IMPORT_MODULE,
                "__heap_base",
                ImportShim::Constant(layout.heap_base),
            )
            .with(
                IMPORT_MODULE,
                "__data_end",
                ImportShim::Constant(layout.data_end),
            )
    }

    /// Binds `(module, name)` to `shim`, replacing any previous binding.
    #[must_use]
    pub fn with(
        mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        shim: ImportShim,
    ) -> Self {
        self.entries.insert((module.into(), name.into()), shim);
        self
    }

    #[must_use]
    pub fn get(&self, module: &str, name: &str) -> Option<ImportShim> {
        self.entries
            .get(&(module.to_string(), name.to_string()))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, ImportShim)> {
        self.entries
            .iter()
            .map(|((module, name), shim)| (module.as_str(), name.as_str(), *shim))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Imports declared by `module` that this table does not provide, as
    /// `module::name`.
    pub(crate) fn unresolved(&self, module: &Module) -> Vec<String> {
        module
            .imports()
            .filter(|import| self.get(import.module(), import.name()).is_none())
            .map(|import| format!("{}::{}", import.module(), import.name()))
            .collect()
    }

    pub(crate) fn define(&self, linker: &mut Linker<HostState>) -> anyhow::Result<()> {
        for (module, name, shim) in self.iter() {
            shim.define(linker, module, name)?;
        }
        Ok(())
    }
}
