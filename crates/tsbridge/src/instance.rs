use std::sync::Arc;

use tokio::sync::MappedMutexGuard;

use crate::{
    error::{Error, Result},
    internal::session::{Dispatcher, Session},
    memory::Address,
    module::{ExportedFunction, ExportedMemory, GuestModule},
    syntax::Parser,
};

/// Live guest instance: its linear memory, exports, and every handle created
/// from it.
///
/// Calls are serialized: concurrent callers wait for the instance rather than
/// racing on guest memory. Each method holds the instance for the whole
/// operation, including any allocation it makes and releases.
pub struct Instance {
    module: GuestModule,
    dispatcher: Arc<Dispatcher>,
}

impl Instance {
    pub(crate) fn new(id: u64, module: GuestModule, session: Session) -> Self {
        Self {
            module,
            dispatcher: Dispatcher::new(id, session),
        }
    }

    async fn session(&self) -> Result<MappedMutexGuard<'_, Session>> {
        self.dispatcher.acquire().await.ok_or(Error::InstanceClosed)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.dispatcher.id()
    }

    #[must_use]
    pub const fn module(&self) -> &GuestModule {
        &self.module
    }

    #[must_use]
    pub fn exported_functions(&self) -> Vec<ExportedFunction> {
        self.module.exported_functions()
    }

    #[must_use]
    pub fn exported_memories(&self) -> Vec<ExportedMemory> {
        self.module.exported_memories()
    }

    /// Creates a parser with no language configured.
    ///
    /// # Errors
    /// [`Error::Call`] if the guest traps or returns a null parser.
    pub async fn new_parser(&self) -> Result<Parser> {
        Parser::create(Arc::clone(&self.dispatcher)).await
    }

    /// Allocates `size` bytes on the guest heap. The caller must
    /// [`release`](Self::release) the result.
    ///
    /// # Errors
    /// [`Error::AllocationFailed`] if the guest allocator returns null.
    pub async fn allocate(&self, size: u32) -> Result<Address> {
        self.session().await?.allocate(size).await
    }

    /// Frees a guest heap allocation. Releasing [`Address::NULL`] does nothing.
    ///
    /// # Errors
    /// [`Error::Call`] if the guest deallocator traps.
    pub async fn release(&self, addr: Address) -> Result<()> {
        if addr.is_null() {
            return Ok(());
        }
        self.session().await?.release(addr).await
    }

    /// Copies `text` plus a trailing NUL into a fresh guest allocation. The
    /// caller owns the returned address.
    ///
    /// # Errors
    /// [`Error::AllocationFailed`] if the guest cannot allocate the buffer.
    pub async fn write_string(&self, text: &str) -> Result<Address> {
        self.session().await?.write_string(text).await
    }

    /// Reads the NUL-terminated string at `addr`; null reads as empty.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if `addr` is outside memory or no NUL precedes
    /// the end of memory.
    pub async fn read_c_string(&self, addr: Address) -> Result<String> {
        self.session().await?.read_c_string(addr)
    }

    /// # Errors
    /// [`Error::OutOfBounds`] if any byte of the range is outside memory.
    pub async fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>> {
        self.session().await?.read_bytes(addr, len)
    }

    /// Writes all of `bytes` at `addr` or nothing.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if any byte of the range is outside memory.
    pub async fn write_bytes(&self, addr: Address, bytes: &[u8]) -> Result<()> {
        self.session().await?.write_bytes(addr, bytes)
    }

    /// Current size of guest linear memory in bytes.
    ///
    /// # Errors
    /// [`Error::InstanceClosed`] after [`close`](Self::close).
    pub async fn memory_size(&self) -> Result<usize> {
        Ok(self.session().await?.memory_size())
    }

    /// Linear memory the guest has grown to, as seen by the memory limiter.
    ///
    /// # Errors
    /// [`Error::InstanceClosed`] after [`close`](Self::close).
    pub async fn memory_usage(&self) -> Result<usize> {
        Ok(self.session().await?.memory_usage())
    }

    /// Number of parser, tree, and node handles not yet deleted.
    ///
    /// # Errors
    /// [`Error::InstanceClosed`] after [`close`](Self::close).
    pub async fn live_handles(&self) -> Result<usize> {
        Ok(self.session().await?.handles.len())
    }

    /// Tears down the guest instance. Outstanding handles become invalid and
    /// fail with [`Error::UseAfterFree`]. Returns whether the instance was
    /// still open.
    pub async fn close(&self) -> bool {
        self.dispatcher.close().await
    }
}

impl core::fmt::Debug for Instance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.dispatcher.id())
            .field("module", &self.module)
            .finish()
    }
}
