use wasmtime::{ExternType, Module};

use crate::error::{Error, Result};

/// Exported function and its wasm signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFunction {
    pub name: String,
    pub params: Vec<String>,
    pub results: Vec<String>,
}

/// Exported linear memory, sizes in 64 KiB pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedMemory {
    pub name: String,
    pub minimum_pages: u64,
    pub maximum_pages: Option<u64>,
    pub is_64: bool,
    pub is_shared: bool,
}

/// Kind of item an import expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    Func,
    Memory,
    Table,
    Global,
    /// Any other extern, such as an exception tag.
    Other,
}

impl From<&ExternType> for ImportKind {
    fn from(ty: &ExternType) -> Self {
        match ty {
            ExternType::Func(_) => Self::Func,
            ExternType::Memory(_) => Self::Memory,
            ExternType::Table(_) => Self::Table,
            ExternType::Global(_) => Self::Global,
            #[allow(unreachable_patterns)]
            _ => Self::Other,
        }
    }
}

/// Import the module declares, with the kind of item it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedItem {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

/// Compiled guest image. Immutable and cheap to clone.
#[derive(Clone)]
pub struct GuestModule {
    inner: Module,
}

impl GuestModule {
    /// Wraps a compiled module, rejecting it unless it exports linear memory
    /// under `memory_export`.
    pub(crate) fn new(inner: Module, memory_export: &str) -> Result<Self> {
        let has_memory = inner
            .exports()
            .any(|export| export.name() == memory_export && export.ty().memory().is_some());
        if !has_memory {
            return Err(Error::MissingMemoryExport {
                name: memory_export.to_string(),
            });
        }
        Ok(Self { inner })
    }

    pub(crate) const fn inner(&self) -> &Module {
        &self.inner
    }

    #[must_use]
    pub fn exported_functions(&self) -> Vec<ExportedFunction> {
        self.inner
            .exports()
            .filter_map(|export| {
                let ExternType::Func(ty) = export.ty() else {
                    return None;
                };
                Some(ExportedFunction {
                    name: export.name().to_string(),
                    params: ty.params().map(|p| p.to_string()).collect(),
                    results: ty.results().map(|r| r.to_string()).collect(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn exported_memories(&self) -> Vec<ExportedMemory> {
        self.inner
            .exports()
            .filter_map(|export| {
                let ExternType::Memory(ty) = export.ty() else {
                    return None;
                };
                Some(ExportedMemory {
                    name: export.name().to_string(),
                    minimum_pages: ty.minimum(),
                    maximum_pages: ty.maximum(),
                    is_64: ty.is_64(),
                    is_shared: ty.is_shared(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn imports(&self) -> Vec<ImportedItem> {
        self.inner
            .imports()
            .map(|import| ImportedItem {
                module: import.module().to_string(),
                name: import.name().to_string(),
                kind: ImportKind::from(&import.ty()),
            })
            .collect()
    }
}

impl core::fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GuestModule")
            .field("name", &self.inner.name())
            .finish_non_exhaustive()
    }
}
