use std::sync::Arc;

use tracing::warn;

use super::acquire;
use crate::{
    error::{HandleKind, Result},
    internal::{
        handle::{Entry, HandleId},
        session::Dispatcher,
    },
};

/// Size of the guest's `TSNode` struct.
pub const NODE_SIZE: usize = 32;
#[allow(clippy::cast_possible_truncation)]
pub(super) const NODE_SIZE_U32: u32 = NODE_SIZE as u32;

const KIND: HandleKind = HandleKind::Node;

/// Copy of a guest `TSNode` in a host-owned buffer.
///
/// The struct is opaque: only whole-struct access is offered, since the field
/// layout belongs to the guest build.
#[derive(Clone)]
pub struct Node {
    dispatcher: Arc<Dispatcher>,
    id: HandleId,
}

impl Node {
    pub(crate) const fn new(dispatcher: Arc<Dispatcher>, id: HandleId) -> Self {
        Self { dispatcher, id }
    }

    /// S-expression rendering of the node's subtree.
    ///
    /// # Errors
    /// [`Error::Call`](crate::Error::Call) if the guest traps,
    /// [`Error::OutOfBounds`](crate::Error::OutOfBounds) if the returned string
    /// is not terminated inside guest memory.
    pub async fn to_sexp(&self) -> Result<String> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let node = session.handles.get(self.id, KIND)?.addr();

        let string = session.node_to_string(node).await?;
        if string.is_null() {
            return Ok(String::new());
        }
        // The guest hands ownership of the string to the caller.
        let text = session.read_c_string(string);
        let released = session.release(string).await;
        match (text, released) {
            (Ok(text), Ok(())) => Ok(text),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(error) = released {
                    warn!(addr = %string, %error, "failed to release node string");
                }
                Err(e)
            }
        }
    }

    /// Raw bytes of the node struct.
    ///
    /// # Errors
    /// [`Error::UseAfterFree`](crate::Error::UseAfterFree) if the node was
    /// deleted.
    pub async fn raw_bytes(&self) -> Result<[u8; NODE_SIZE]> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let node = session.handles.get(self.id, KIND)?.addr();
        let bytes = session.read_bytes(node, NODE_SIZE)?;
        let mut out = [0; NODE_SIZE];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Releases the node buffer. The tree it came from is unaffected.
    ///
    /// # Errors
    /// [`Error::UseAfterFree`](crate::Error::UseAfterFree) if already deleted,
    /// [`Error::Call`](crate::Error::Call) if the guest deallocator traps.
    pub async fn delete(&self) -> Result<()> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let addr = session.handles.remove(self.id, KIND)?.addr();
        session.release(addr).await
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("instance", &self.dispatcher.id())
            .field("handle", &self.id)
            .finish()
    }
}
