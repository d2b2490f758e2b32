//! Handles to guest parser objects.
//!
//! A handle names a slot in its instance's handle table rather than holding a
//! guest address directly. Deleting through any clone of a handle invalidates
//! all of its clones; afterwards every operation fails with
//! [`Error::UseAfterFree`] before the guest is called. Nothing is deleted
//! implicitly: dropping a handle without calling `delete` leaves the guest
//! object alive until the instance is closed.

mod node;
mod parser;
mod tree;

use tokio::sync::MappedMutexGuard;

pub use self::{
    node::{NODE_SIZE, Node},
    parser::Parser,
    tree::Tree,
};
use crate::{
    error::{Error, HandleKind, Result},
    internal::session::{Dispatcher, Session},
};

async fn acquire(
    dispatcher: &Dispatcher,
    kind: HandleKind,
) -> Result<MappedMutexGuard<'_, Session>> {
    dispatcher
        .acquire()
        .await
        .ok_or(Error::UseAfterFree { kind })
}
