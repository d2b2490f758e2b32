use std::sync::Arc;

use super::{Node, acquire, node::NODE_SIZE_U32};
use crate::{
    error::{HandleKind, Result},
    internal::{
        handle::{Entry, HandleId},
        session::Dispatcher,
    },
};

const KIND: HandleKind = HandleKind::Tree;

/// Guest `TSTree` produced by [`Parser::parse_string`](super::Parser::parse_string).
#[derive(Clone)]
pub struct Tree {
    dispatcher: Arc<Dispatcher>,
    id: HandleId,
}

impl Tree {
    pub(crate) const fn new(dispatcher: Arc<Dispatcher>, id: HandleId) -> Self {
        Self { dispatcher, id }
    }

    /// Copies the root node into a fresh host-owned buffer on the guest heap.
    /// The buffer lives until the node is deleted, independent of the tree.
    ///
    /// # Errors
    /// [`Error::AllocationFailed`](crate::Error::AllocationFailed) if the
    /// buffer cannot be allocated, [`Error::Call`](crate::Error::Call) if the
    /// guest traps (the buffer is released first).
    pub async fn root_node(&self) -> Result<Node> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let tree = session.handles.get(self.id, KIND)?.addr();

        let buf = session.allocate(NODE_SIZE_U32).await?;
        if let Err(e) = session.tree_root_node(tree, buf).await {
            session.release_after_error(buf).await;
            return Err(e);
        }

        let id = session.handles.insert(Entry::Node { addr: buf });
        drop(session);
        Ok(Node::new(Arc::clone(&self.dispatcher), id))
    }

    /// Frees the guest tree. Nodes read from it are unaffected and must still
    /// be deleted on their own.
    ///
    /// # Errors
    /// [`Error::UseAfterFree`](crate::Error::UseAfterFree) if already deleted,
    /// [`Error::Call`](crate::Error::Call) if the guest traps.
    pub async fn delete(&self) -> Result<()> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let addr = session.handles.remove(self.id, KIND)?.addr();
        session.tree_delete(addr).await
    }
}

impl core::fmt::Debug for Tree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tree")
            .field("instance", &self.dispatcher.id())
            .field("handle", &self.id)
            .finish()
    }
}
