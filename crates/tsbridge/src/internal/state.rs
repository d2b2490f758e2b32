use wasmtime::{Engine, Store};

use crate::internal::resource::MemoryLimiter;

/// Per-store host data.
pub struct HostState {
    pub instance_id: u64,
    pub memory_export: String,
    pub limiter: MemoryLimiter,
}

impl HostState {
    pub fn new_store(
        engine: &Engine,
        instance_id: u64,
        memory_export: &str,
        max_memory: usize,
    ) -> Store<Self> {
        let mut store = Store::new(
            engine,
            Self {
                instance_id,
                memory_export: memory_export.to_string(),
                limiter: MemoryLimiter::new(max_memory),
            },
        );
        store.limiter(|s| &mut s.limiter);
        store
    }
}
