use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;
use wasmtime::Store;

use crate::{
    error::{Error, Result},
    internal::{
        exports::{
            FREE, GuestExports, MALLOC, NODE_TO_STRING, PARSER_DELETE, PARSER_NEW, PARSER_PARSE,
            PARSER_SET_LANGUAGE, TREE_DELETE, TREE_ROOT_NODE,
        },
        handle::HandleTable,
        state::HostState,
    },
    memory::{Address, GuestMemory, nul_terminated},
};

/// Serialization point for one guest instance. Every guest call and every
/// memory access holds the session lock for its whole duration.
pub struct Dispatcher {
    id: u64,
    session: Mutex<Option<Session>>,
}

impl Dispatcher {
    pub fn new(id: u64, session: Session) -> Arc<Self> {
        Arc::new(Self {
            id,
            session: Mutex::new(Some(session)),
        })
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for exclusive access. `None` once the instance has been closed.
    pub async fn acquire(&self) -> Option<MappedMutexGuard<'_, Session>> {
        MutexGuard::try_map(self.session.lock().await, Option::as_mut).ok()
    }

    /// Drops the session, returning whether it was still open.
    pub async fn close(&self) -> bool {
        self.session.lock().await.take().is_some()
    }
}

pub struct Session {
    store: Store<HostState>,
    memory: GuestMemory,
    exports: GuestExports,
    pub handles: HandleTable,
}

impl Session {
    pub fn new(store: Store<HostState>, memory: GuestMemory, exports: GuestExports) -> Self {
        Self {
            store,
            memory,
            exports,
            handles: HandleTable::default(),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.memory.size(&self.store)
    }

    pub fn memory_usage(&self) -> usize {
        self.store.data().limiter.current()
    }

    pub async fn allocate(&mut self, size: u32) -> Result<Address> {
        let addr = self
            .exports
            .malloc
            .call_async(&mut self.store, size)
            .await
            .map(Address::new)
            .map_err(|e| Error::call(MALLOC, e))?;
        if addr.is_null() {
            return Err(Error::AllocationFailed {
                size: u64::from(size),
            });
        }
        Ok(addr)
    }

    pub async fn release(&mut self, addr: Address) -> Result<()> {
        if addr.is_null() {
            return Ok(());
        }
        self.exports
            .free
            .call_async(&mut self.store, addr.get())
            .await
            .map_err(|e| Error::call(FREE, e))
    }

    /// Releases `addr` on an error path, where the caller already has an
    /// error to report.
    pub async fn release_after_error(&mut self, addr: Address) {
        if let Err(error) = self.release(addr).await {
            warn!(%addr, %error, "failed to release guest allocation during cleanup");
        }
    }

    pub async fn write_string(&mut self, text: &str) -> Result<Address> {
        let bytes = nul_terminated(text);
        let size = u32::try_from(bytes.len()).map_err(|_| Error::AllocationFailed {
            size: bytes.len() as u64,
        })?;
        let addr = self.allocate(size).await?;
        if let Err(e) = self.memory.write_bytes(&mut self.store, addr, &bytes) {
            self.release_after_error(addr).await;
            return Err(e);
        }
        Ok(addr)
    }

    pub fn read_c_string(&self, addr: Address) -> Result<String> {
        self.memory.read_c_string(&self.store, addr)
    }

    pub fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>> {
        self.memory.read_bytes(&self.store, addr, len)
    }

    pub fn write_bytes(&mut self, addr: Address, bytes: &[u8]) -> Result<()> {
        self.memory.write_bytes(&mut self.store, addr, bytes)
    }

    pub async fn parser_new(&mut self) -> Result<Address> {
        let addr = self
            .exports
            .parser_new
            .call_async(&mut self.store, ())
            .await
            .map(Address::new)
            .map_err(|e| Error::call(PARSER_NEW, e))?;
        if addr.is_null() {
            return Err(Error::call(
                PARSER_NEW,
                anyhow::anyhow!("guest returned a null parser"),
            ));
        }
        Ok(addr)
    }

    pub async fn parser_delete(&mut self, parser: Address) -> Result<()> {
        self.exports
            .parser_delete
            .call_async(&mut self.store, parser.get())
            .await
            .map_err(|e| Error::call(PARSER_DELETE, e))
    }

    /// Returns whether the guest accepted the language.
    pub async fn parser_set_language(
        &mut self,
        parser: Address,
        language: Address,
    ) -> Result<bool> {
        self.exports
            .parser_set_language
            .call_async(&mut self.store, (parser.get(), language.get()))
            .await
            .map(|ok| ok != 0)
            .map_err(|e| Error::call(PARSER_SET_LANGUAGE, e))
    }

    /// Parses `len` bytes at `text` without an old tree. May return null.
    pub async fn parser_parse(
        &mut self,
        parser: Address,
        text: Address,
        len: u32,
    ) -> Result<Address> {
        self.exports
            .parser_parse
            .call_async(
                &mut self.store,
                (parser.get(), Address::NULL.get(), text.get(), len),
            )
            .await
            .map(Address::new)
            .map_err(|e| Error::call(PARSER_PARSE, e))
    }

    pub async fn tree_delete(&mut self, tree: Address) -> Result<()> {
        self.exports
            .tree_delete
            .call_async(&mut self.store, tree.get())
            .await
            .map_err(|e| Error::call(TREE_DELETE, e))
    }

    pub async fn tree_root_node(&mut self, tree: Address, out: Address) -> Result<()> {
        self.exports
            .tree_root_node
            .call_async(&mut self.store, (tree.get(), out.get()))
            .await
            .map_err(|e| Error::call(TREE_ROOT_NODE, e))
    }

    /// Returns a guest-allocated string the caller must release, or null.
    pub async fn node_to_string(&mut self, node: Address) -> Result<Address> {
        self.exports
            .node_to_string
            .call_async(&mut self.store, node.get())
            .await
            .map(Address::new)
            .map_err(|e| Error::call(NODE_TO_STRING, e))
    }
}
