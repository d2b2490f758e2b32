//! Compiling and instantiating the guest.
//!
//! Typical flow:
//! 1. Build a [`Runtime`] with [`RuntimeBuilder`].
//! 2. [`Runtime::load`] the raw (already decompressed) module image into a
//!    [`GuestModule`].
//! 3. [`Runtime::instantiate`] it to get an [`Instance`], then create a
//!    [`Parser`](crate::Parser) from the instance.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::anyhow;
use bytes::Bytes;
use tracing::{Instrument, info, info_span, warn};
use wasmtime::{Config, Engine, Linker};

use crate::{
    error::{Error, Result},
    imports::{HeapLayout, ImportTable},
    instance::Instance,
    internal::{
        cache, configure::configure_engine, exports::GuestExports, session::Session,
        state::HostState,
    },
    memory::GuestMemory,
    module::GuestModule,
};

#[derive(Clone, Debug)]
struct RuntimeConfig {
    max_memory: usize,
    cache: Option<PathBuf>,
    memory_export: String,
    heap_layout: HeapLayout,
}

impl RuntimeConfig {
    const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;
    const DEFAULT_MEMORY_EXPORT: &'static str = "memory";
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory: Self::DEFAULT_MAX_MEMORY,
            cache: None,
            memory_export: Self::DEFAULT_MEMORY_EXPORT.to_string(),
            heap_layout: HeapLayout::default(),
        }
    }
}

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    engine_config: Option<Config>,
}

impl RuntimeBuilder {
    /// Hard cap on guest linear memory, in bytes.
    #[must_use]
    pub const fn max_memory(mut self, bytes: usize) -> Self {
        self.config.max_memory = bytes;
        self
    }

    /// Directory for precompiled `.cwasm` artifacts. Unset disables caching.
    #[must_use]
    pub fn cache_path(mut self, p: impl Into<PathBuf>) -> Self {
        self.config.cache = Some(p.into());
        self
    }

    /// Name under which the guest exports its linear memory.
    #[must_use]
    pub fn memory_export(mut self, name: impl Into<String>) -> Self {
        self.config.memory_export = name.into();
        self
    }

    #[must_use]
    pub const fn heap_layout(mut self, layout: HeapLayout) -> Self {
        self.config.heap_layout = layout;
        self
    }

    #[must_use]
    pub fn engine_config(mut self, cfg: Config) -> Self {
        self.engine_config = Some(cfg);
        self
    }

    /// # Errors
    /// [`Error::Engine`] if wasmtime rejects the engine configuration.
    pub fn build(self) -> Result<Runtime> {
        let custom_engine_config = self.engine_config.is_some();
        let mut engine_cfg = self.engine_config.unwrap_or_default();
        if custom_engine_config {
            warn!("custom wasmtime::Config provided; tsbridge will force async support");
        }
        configure_engine(&mut engine_cfg);
        let engine = Engine::new(&engine_cfg).map_err(Error::Engine)?;

        Ok(Runtime {
            engine,
            config: self.config,
        })
    }
}

/// Owns the engine and the configuration shared by every module it loads.
pub struct Runtime {
    engine: Engine,
    config: RuntimeConfig,
}

fn next_instance_id() -> u64 {
    static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

impl Runtime {
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Runtime with default configuration.
    ///
    /// # Errors
    /// Returns an error if the engine cannot be created.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Import table used by [`Runtime::instantiate`].
    #[must_use]
    pub fn import_table(&self) -> ImportTable {
        ImportTable::standard(self.config.heap_layout)
    }

    /// Compiles a raw WebAssembly module image.
    ///
    /// # Errors
    /// [`Error::Compile`] if the bytes are not a valid module,
    /// [`Error::MissingMemoryExport`] if it does not export its linear memory.
    pub async fn load(&self, image: impl Into<Bytes>) -> Result<GuestModule> {
        let image = image.into();
        let span = info_span!("runtime.load", size = image.len());
        async {
            let module = match &self.config.cache {
                Some(dir) => cache::load_or_compile(&self.engine, image, dir).await?,
                None => cache::compile(&self.engine, image).await?,
            };
            let module = GuestModule::new(module, &self.config.memory_export)?;
            info!("loaded guest module");
            Ok(module)
        }
        .instrument(span)
        .await
    }

    /// Reads and compiles a module image from disk.
    ///
    /// # Errors
    /// [`Error::Io`] if the file cannot be read, otherwise as [`Runtime::load`].
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<GuestModule> {
        let image = tokio::fs::read(path.as_ref()).await?;
        self.load(image).await
    }

    /// Instantiates `module` with [`Runtime::import_table`].
    ///
    /// # Errors
    /// See [`Runtime::instantiate_with`].
    pub async fn instantiate(&self, module: &GuestModule) -> Result<Instance> {
        self.instantiate_with(module, &self.import_table()).await
    }

    /// Instantiates `module`, satisfying its imports from `imports`.
    ///
    /// # Errors
    /// [`Error::Instantiation`] if an import is not in the table or has a
    /// different signature, a required export is missing or mistyped, or the
    /// guest traps while starting. [`Error::MissingMemoryExport`] if the
    /// instance has no linear memory export.
    pub async fn instantiate_with(
        &self,
        module: &GuestModule,
        imports: &ImportTable,
    ) -> Result<Instance> {
        let id = next_instance_id();
        let span = info_span!("runtime.instantiate", instance = id);
        async {
            let unresolved = imports.unresolved(module.inner());
            if !unresolved.is_empty() {
                return Err(Error::Instantiation(anyhow!(
                    "unresolved imports: {}",
                    unresolved.join(", ")
                )));
            }

            let mut linker = Linker::new(&self.engine);
            imports.define(&mut linker).map_err(Error::Instantiation)?;

            let mut store = HostState::new_store(
                &self.engine,
                id,
                &self.config.memory_export,
                self.config.max_memory,
            );
            let instance = linker
                .instantiate_async(&mut store, module.inner())
                .await
                .map_err(Error::Instantiation)?;

            let memory = instance
                .get_memory(&mut store, &self.config.memory_export)
                .map(GuestMemory::new)
                .ok_or_else(|| Error::MissingMemoryExport {
                    name: self.config.memory_export.clone(),
                })?;
            let exports =
                GuestExports::resolve(&mut store, &instance).map_err(Error::Instantiation)?;

            let session = Session::new(store, memory, exports);
            info!(memory_size = session.memory_size(), "guest instance ready");
            Ok(Instance::new(id, module.clone(), session))
        }
        .instrument(span)
        .await
    }
}
