use std::sync::Arc;

use tracing::{debug, warn};

use super::{Tree, acquire};
use crate::{
    error::{Error, HandleKind, Result},
    internal::{
        handle::{Entry, HandleId},
        session::Dispatcher,
    },
    memory::Address,
};

const KIND: HandleKind = HandleKind::Parser;

/// Guest `TSParser`.
#[derive(Clone)]
pub struct Parser {
    dispatcher: Arc<Dispatcher>,
    id: HandleId,
}

impl Parser {
    pub(crate) async fn create(dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let mut session = dispatcher.acquire().await.ok_or(Error::InstanceClosed)?;
        let addr = session.parser_new().await?;
        let id = session.handles.insert(Entry::Parser {
            addr,
            language: None,
        });
        drop(session);

        debug!(instance = dispatcher.id(), %addr, "created parser");
        Ok(Self { dispatcher, id })
    }

    /// Language currently assigned to the parser, if any.
    ///
    /// # Errors
    /// [`Error::UseAfterFree`] if the parser was deleted.
    pub async fn language(&self) -> Result<Option<Address>> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        match session.handles.get(self.id, KIND)? {
            Entry::Parser { language, .. } => Ok(language),
            _ => Err(Error::UseAfterFree { kind: KIND }),
        }
    }

    /// Assigns the guest language object at `language`. Passing
    /// [`Address::NULL`] clears the language if the guest accepts it.
    ///
    /// # Errors
    /// [`Error::InvalidLanguage`] if the guest rejects the language; the
    /// previous language stays in effect.
    pub async fn set_language(&self, language: Address) -> Result<()> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let parser = session.handles.get(self.id, KIND)?.addr();
        if !session.parser_set_language(parser, language).await? {
            return Err(Error::InvalidLanguage { language });
        }
        if let Entry::Parser { language: current, .. } = session.handles.get_mut(self.id, KIND)? {
            *current = (!language.is_null()).then_some(language);
        }
        Ok(())
    }

    /// Parses `text` from scratch.
    ///
    /// The text is copied into guest memory for the duration of the call and
    /// released afterwards, whatever the outcome.
    ///
    /// # Errors
    /// [`Error::ParseFailed`] if the guest returns no tree, which is the
    /// expected outcome when no language is set.
    pub async fn parse_string(&self, text: &str) -> Result<Tree> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let parser = session.handles.get(self.id, KIND)?.addr();
        let len = u32::try_from(text.len()).map_err(|_| Error::AllocationFailed {
            size: text.len() as u64,
        })?;

        let text_addr = session.write_string(text).await?;
        let parsed = session.parser_parse(parser, text_addr, len).await;
        let released = session.release(text_addr).await;

        let tree = match (parsed, released) {
            (Ok(tree), Ok(())) => tree,
            (Err(e), released) => {
                if let Err(error) = released {
                    warn!(addr = %text_addr, %error, "failed to release parse input");
                }
                return Err(e);
            }
            (Ok(tree), Err(e)) => {
                if !tree.is_null() {
                    if let Err(error) = session.tree_delete(tree).await {
                        warn!(addr = %tree, %error, "failed to delete tree during cleanup");
                    }
                }
                return Err(e);
            }
        };
        if tree.is_null() {
            return Err(Error::ParseFailed);
        }

        let id = session.handles.insert(Entry::Tree { addr: tree });
        drop(session);
        Ok(Tree::new(Arc::clone(&self.dispatcher), id))
    }

    /// Frees the guest parser. The handle is invalid afterwards even if the
    /// guest call fails.
    ///
    /// # Errors
    /// [`Error::UseAfterFree`] if already deleted, [`Error::Call`] if the guest
    /// traps.
    pub async fn delete(&self) -> Result<()> {
        let mut session = acquire(&self.dispatcher, KIND).await?;
        let addr = session.handles.remove(self.id, KIND)?.addr();
        session.parser_delete(addr).await
    }
}

impl core::fmt::Debug for Parser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Parser")
            .field("instance", &self.dispatcher.id())
            .field("handle", &self.id)
            .finish()
    }
}
