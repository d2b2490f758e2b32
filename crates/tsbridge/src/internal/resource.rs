use tracing::debug;
use wasmtime::ResourceLimiter;

/// Caps guest growth. A refused `memory.grow` makes the guest allocator return
/// null rather than trapping.
pub struct MemoryLimiter {
    max_memory_hard: usize,
    max_table_elements_hard: usize,
    current: usize,
}

impl MemoryLimiter {
    /// Host-side cost charged per table element when deriving the table cap
    /// from the memory cap.
    const TABLE_ELEMENT_BUDGET_BYTES: usize = 64;
    /// A tree-sitter build keeps every grammar callback in its function
    /// table, so small memory caps still get room for them.
    const MIN_TABLE_ELEMENTS: usize = 4096;

    pub fn new(max_memory_hard: usize) -> Self {
        Self {
            max_memory_hard,
            max_table_elements_hard: (max_memory_hard / Self::TABLE_ELEMENT_BUDGET_BYTES)
                .max(Self::MIN_TABLE_ELEMENTS),
            current: 0,
        }
    }

    /// Linear memory size last granted to the guest.
    pub const fn current(&self) -> usize {
        self.current
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        let granted = desired <= self.max_memory_hard;
        if granted {
            self.current = desired;
        } else {
            debug!(
                current,
                desired,
                limit = self.max_memory_hard,
                "refused guest memory growth"
            );
        }
        Ok(granted)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_table_elements_hard)
    }
}
